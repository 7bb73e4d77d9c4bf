use anyhow::{anyhow, Context};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::analyzers::dataset_summary::{summarize_ground, summarize_pixels};
use crate::cli::args::{Cli, Commands, InputArgs, OutputArgs, RunArgs};
use crate::config::ValidationConfig;
use crate::models::{GroupBy, Pollutant, QualityFilter};
use crate::processors::pipeline::run_validation_with_progress;
use crate::readers::{ConcurrentReader, GroundDataset, GroundReader, SatelliteDataset, SatelliteReader, SatelliteSource};
use crate::utils::filename::generate_default_output_dir;
use crate::utils::progress::ProgressReporter;
use crate::writers::{ArtifactWriter, PairsFormat};

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    init_logging(&cli.log_level, cli.verbose)?;

    match cli.command {
        Commands::Validate {
            inputs,
            run,
            output,
            seed,
            bootstrap_iterations,
            permutation_iterations,
            group_by,
            variance_ratio,
            no_sensitivity,
        } => {
            let mut config = build_config(&run)?;
            if let Some(seed) = seed {
                config.random_seed = seed;
            }
            if let Some(n) = bootstrap_iterations {
                config.bootstrap_iterations = n;
            }
            if let Some(n) = permutation_iterations {
                config.permutation_iterations = n;
            }
            if let Some(group_by) = group_by {
                config.group_by = GroupBy::parse(&group_by)
                    .ok_or_else(|| anyhow!("--group-by must be 'city' or 'region', got '{}'", group_by))?;
            }
            if variance_ratio.is_some() {
                config.variance_ratio = variance_ratio;
            }
            if no_sensitivity {
                config.sensitivity_enabled = false;
            }
            let config = config.checked().context("invalid settings")?;

            println!("Validating TEMPO retrievals against ground observations...");
            println!("Ground file: {}", inputs.ground.display());
            println!(
                "Radius: {} km, window: {} h, seed: {}",
                config.spatial_radius_km, config.temporal_window_hours, config.random_seed
            );

            let (ground, satellite) = load_inputs(&inputs, &config).await?;

            let progress = ProgressReporter::new_spinner("Validating...", cli.verbose);
            let output_data = run_validation_with_progress(&ground, &satellite, &config, Some(&progress))
                .context("validation run failed")?;
            progress.finish_with_message(&format!(
                "Validated {} matched pairs",
                output_data.matched_pairs.len()
            ));

            let writer = artifact_writer(&output)?.with_min_group_pairs(config.min_group_pairs);
            let written = writer
                .write_all(&output_data)
                .with_context(|| format!("writing artifacts to {}", writer.output_dir().display()))?;

            let report = &output_data.report;
            println!("\n{}", report.matching.summary());
            println!("\n{}", report.summary());

            let rows = report.agreement_summary_rows(config.min_group_pairs);
            if !rows.is_empty() {
                println!("\nPer-group agreement:");
                for row in &rows {
                    println!(
                        "  {:<16} n={:<5} {:<10} RMSE raw {} -> calibrated {} ({})",
                        row.group,
                        row.n_samples,
                        row.sample_status,
                        format_optional(row.raw_rmse),
                        format_optional(row.calibrated_rmse),
                        row.fit_method
                    );
                }
            }

            println!("\nArtifacts:");
            for path in written.paths() {
                println!("  {}", path.display());
            }
        }

        Commands::Match { inputs, run, output } => {
            let config = build_config(&run)?.checked().context("invalid settings")?;
            let (ground, satellite) = load_inputs(&inputs, &config).await?;

            let progress = ProgressReporter::new_spinner("Matching...", cli.verbose);
            let (pairs, statistics) = config
                .matcher()
                .match_all(&ground.observations, &satellite.pixels_by_region)?;
            progress.finish_with_message(&format!("Matched {} pairs", pairs.len()));

            println!("\n{}", statistics.summary());

            let writer = artifact_writer(&output)?;
            let path = writer
                .write_pairs(&pairs)
                .with_context(|| format!("writing matched pairs to {}", writer.output_dir().display()))?;
            println!("\nMatched pairs written to {}", path.display());
        }

        Commands::Inspect {
            ground,
            satellite,
            sample,
        } => {
            if ground.is_none() && satellite.is_empty() {
                return Err(anyhow!("nothing to inspect: pass --ground and/or --satellite"));
            }

            if let Some(path) = ground {
                let dataset = GroundReader::new()
                    .read(&path)
                    .with_context(|| format!("reading ground file {}", path.display()))?;
                print_ground(&path, &dataset, sample);
            }

            for arg in &satellite {
                let source = SatelliteSource::parse(arg)?;
                let (pixels, cleaning, checksum) = SatelliteReader::new()
                    .read(&source.path)
                    .with_context(|| format!("reading satellite file {}", source.path.display()))?;

                println!("\nSatellite file: {} (region {})", source.path.display(), source.region);
                println!("SHA-256: {} ({})", checksum.sha256, checksum.encoding);
                println!("{}", summarize_pixels(pixels.iter(), &cleaning).summary());
                for (i, pixel) in pixels.iter().take(sample).enumerate() {
                    let values: Vec<String> = pixel
                        .column_values
                        .iter()
                        .map(|(p, v)| format!("{}={:.3}", p, v))
                        .collect();
                    println!(
                        "{}. ({:.3}, {:.3}) at {}: {}",
                        i + 1,
                        pixel.latitude,
                        pixel.longitude,
                        pixel.timestamp.format("%Y-%m-%d %H:%M"),
                        values.join(", ")
                    );
                }
            }
        }
    }

    Ok(())
}

fn init_logging(log_level: &str, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        match log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Configuration file and environment, then command-line overrides
fn build_config(run: &RunArgs) -> anyhow::Result<ValidationConfig> {
    let mut config = ValidationConfig::load(run.config.as_deref()).with_context(|| match &run.config {
        Some(path) => format!("loading configuration from {}", path.display()),
        None => "loading configuration from the environment".to_string(),
    })?;

    if let Some(radius) = run.radius_km {
        config.spatial_radius_km = radius;
    }
    if let Some(window) = run.window_hours {
        config.temporal_window_hours = window;
    }
    if let Some(weight) = run.time_weight {
        config.time_weight = weight;
    }
    if let Some(parameter) = &run.parameter {
        config.parameter = Some(parameter.parse::<Pollutant>()?);
    }
    if run.strict_quality {
        config.quality = QualityFilter::strict();
    }
    if let Some(max) = run.max_ground_value {
        config.ground_qc.max_value = Some(max);
    }
    if run.no_max_ground_value {
        config.ground_qc.max_value = None;
    }
    if let Some(percentile) = run.trim_percentile {
        config.ground_qc.trim_percentile = Some(percentile);
    }
    if let Some(workers) = run.max_workers {
        config.max_workers = workers;
    }
    Ok(config)
}

async fn load_inputs(
    inputs: &InputArgs,
    config: &ValidationConfig,
) -> anyhow::Result<(GroundDataset, SatelliteDataset)> {
    let sources = inputs
        .satellite
        .iter()
        .map(String::as_str)
        .map(SatelliteSource::parse)
        .collect::<crate::error::Result<Vec<_>>>()?;

    let progress = ProgressReporter::new_spinner("Loading inputs...", false);
    let (ground, satellite) = ConcurrentReader::new(config.max_workers)
        .with_parameter(config.parameter)
        .with_ground_qc(config.ground_qc.clone())
        .read_inputs(&inputs.ground, &sources)
        .await
        .with_context(|| {
            format!(
                "loading {} and {} satellite file(s)",
                inputs.ground.display(),
                sources.len()
            )
        })?;
    progress.finish_with_message(&format!(
        "Loaded {} observations and {} pixels",
        ground.len(),
        satellite.total_pixels()
    ));

    info!("Ground cleaning: {}", ground.cleaning.summary());
    Ok((ground, satellite))
}

fn artifact_writer(output: &OutputArgs) -> anyhow::Result<ArtifactWriter> {
    let output_dir: PathBuf = output
        .output_dir
        .clone()
        .unwrap_or_else(generate_default_output_dir);
    let writer = ArtifactWriter::new(output_dir)
        .with_pairs_format(PairsFormat::parse(&output.pairs_format)?)
        .with_compression(&output.compression)?;
    Ok(writer)
}

fn print_ground(path: &std::path::Path, dataset: &GroundDataset, sample: usize) {
    println!("\nGround file: {}", path.display());
    if let Some(checksum) = &dataset.source {
        println!("SHA-256: {} ({})", checksum.sha256, checksum.encoding);
    }
    println!("{}", summarize_ground(dataset).summary());
    for (i, obs) in dataset.observations.iter().take(sample).enumerate() {
        println!(
            "{}. {} ({}) {} at {}: {:.2}",
            i + 1,
            obs.station_id,
            obs.city,
            obs.parameter,
            obs.timestamp.format("%Y-%m-%d %H:%M"),
            obs.value
        );
    }
}

fn format_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.3}", v))
}
