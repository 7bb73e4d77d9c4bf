use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tempo-validation")]
#[command(about = "Validate TEMPO satellite retrievals against ground monitoring networks")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose (debug) logging")]
    pub verbose: bool,

    #[arg(
        long,
        global = true,
        default_value = "info",
        help = "Log level: trace, debug, info, warn or error"
    )]
    pub log_level: String,
}

/// Input files shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    #[arg(short, long, help = "Ground observations CSV")]
    pub ground: PathBuf,

    #[arg(
        short,
        long,
        required = true,
        num_args = 1..,
        help = "Satellite CSV as REGION=path, or a file named REGION_*.csv"
    )]
    pub satellite: Vec<String>,
}

/// Matching and run settings layered over the configuration file
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    #[arg(long, help = "Configuration file (TOML, YAML or JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Spatial matching radius in km")]
    pub radius_km: Option<f64>,

    #[arg(long, help = "Temporal matching window in hours")]
    pub window_hours: Option<f64>,

    #[arg(long, help = "Hours-to-km weight in the match score")]
    pub time_weight: Option<f64>,

    #[arg(long, help = "Restrict to one pollutant: NO2, OZONE, PM2.5 or HCHO")]
    pub parameter: Option<String>,

    #[arg(long, help = "Use the strict pixel quality thresholds")]
    pub strict_quality: bool,

    #[arg(long, help = "Drop ground values at or above this bound [default: 500]")]
    pub max_ground_value: Option<f64>,

    #[arg(long, help = "Disable the ground value upper bound")]
    pub no_max_ground_value: bool,

    #[arg(long, help = "Trim each city's ground values to the [p, 100-p] percentile band")]
    pub trim_percentile: Option<f64>,

    #[arg(long, help = "Worker threads [default: number of CPUs]")]
    pub max_workers: Option<usize>,
}

/// Where and how the artifacts are written
#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    #[arg(
        short,
        long,
        help = "Output directory [default: output/tempo-validation-{YYMMDD}]"
    )]
    pub output_dir: Option<PathBuf>,

    #[arg(long, default_value = "csv", help = "Matched pairs format: csv or parquet")]
    pub pairs_format: String,

    #[arg(short, long, default_value = "snappy", help = "Parquet compression")]
    pub compression: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Match, calibrate and assess; writes every artifact
    Validate {
        #[command(flatten)]
        inputs: InputArgs,

        #[command(flatten)]
        run: RunArgs,

        #[command(flatten)]
        output: OutputArgs,

        #[arg(long, help = "Random seed for bootstrap and permutation draws")]
        seed: Option<u64>,

        #[arg(long)]
        bootstrap_iterations: Option<usize>,

        #[arg(long)]
        permutation_iterations: Option<usize>,

        #[arg(long, help = "Group pairs by city or region")]
        group_by: Option<String>,

        #[arg(long, help = "Fixed Deming variance ratio")]
        variance_ratio: Option<f64>,

        #[arg(long, help = "Skip the radius/window sensitivity grid")]
        no_sensitivity: bool,
    },

    /// Clean and match only; writes the matched pairs table
    Match {
        #[command(flatten)]
        inputs: InputArgs,

        #[command(flatten)]
        run: RunArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Load and clean inputs, then print counts, exclusions and ranges
    Inspect {
        #[arg(short, long, help = "Ground observations CSV")]
        ground: Option<PathBuf>,

        #[arg(short, long, help = "Satellite CSV as REGION=path, or a file named REGION_*.csv")]
        satellite: Vec<String>,

        #[arg(long, help = "Show this many parsed records per input", default_value = "0")]
        sample: usize,
    },
}
