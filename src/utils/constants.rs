/// Mean Earth radius used by the haversine primitive
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Matching defaults
pub const DEFAULT_SPATIAL_RADIUS_KM: f64 = 20.0;
pub const DEFAULT_TEMPORAL_WINDOW_HOURS: f64 = 1.0;
pub const DEFAULT_TIME_WEIGHT: f64 = 2.0;

/// Resampling defaults
pub const DEFAULT_BOOTSTRAP_ITERATIONS: usize = 1000;
pub const DEFAULT_PERMUTATION_ITERATIONS: usize = 1000;
pub const DEFAULT_MAX_RESAMPLING_ITERATIONS: usize = 10_000;
pub const DEFAULT_RANDOM_SEED: u64 = 42;

/// Relaxed pixel quality thresholds (demo data)
pub const RELAXED_MAX_QUALITY_FLAG: i32 = 2;
pub const RELAXED_MAX_CLOUD_FRACTION: f64 = 0.8;
pub const RELAXED_MAX_SOLAR_ZENITH_DEG: f64 = 85.0;

/// Strict pixel quality thresholds (production retrievals)
pub const STRICT_MAX_QUALITY_FLAG: i32 = 0;
pub const STRICT_MAX_CLOUD_FRACTION: f64 = 0.3;
pub const STRICT_MAX_SOLAR_ZENITH_DEG: f64 = 70.0;

/// Ground value quality control
pub const DEFAULT_GROUND_MAX_VALUE: f64 = 500.0;
pub const DEFAULT_TRIM_MIN_ROWS: usize = 20;

/// Satellite column fill value
pub const SATELLITE_FILL_VALUE: f64 = -999.0;

/// Deming regression constants
pub const MAD_TO_SIGMA: f64 = 1.4826;
pub const MAD_EPSILON: f64 = 1e-9;
pub const LAMBDA_MIN: f64 = 0.05;
pub const LAMBDA_MAX: f64 = 20.0;
pub const DEGENERATE_VARIANCE: f64 = 1e-6;

/// Minimum sample counts
pub const DEFAULT_MIN_GROUP_PAIRS: usize = 5;
pub const DEFAULT_LOCO_MIN_TRAIN: usize = 10;
pub const DEFAULT_LOCO_MIN_TEST: usize = 5;
pub const DEFAULT_BOOTSTRAP_MIN_SAMPLES: usize = 20;
pub const BREUSCH_PAGAN_MIN_SAMPLES: usize = 11;
pub const MAGNITUDE_BUCKET_MIN_SAMPLES: usize = 6;
pub const STRATUM_MIN_SAMPLES: usize = 11;
pub const STATION_CITY_MIN_PAIRS: usize = 20;
pub const STATION_MIN_PAIRS: usize = 4;
pub const DIURNAL_CITY_MIN_PAIRS: usize = 20;

/// Agreement thresholds
pub const LOA_Z: f64 = 1.96;
pub const PROPORTIONAL_BIAS_SLOPE_THRESHOLD: f64 = 0.01;
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Sensitivity grid defaults
pub const DEFAULT_SENSITIVITY_RADII_KM: [f64; 3] = [10.0, 20.0, 30.0];
pub const DEFAULT_SENSITIVITY_WINDOWS_HOURS: [f64; 3] = [1.0, 3.0, 6.0];

/// Output file names
pub const MATCHED_PAIRS_FILE: &str = "matched_pairs";
pub const REPORT_FILE: &str = "validation_report.json";
pub const AGREEMENT_SUMMARY_FILE: &str = "agreement_summary.csv";
pub const LOCO_RESULTS_FILE: &str = "loco_results.csv";
pub const SENSITIVITY_RESULTS_FILE: &str = "sensitivity_results.csv";

/// Processing defaults
pub const DEFAULT_ROW_GROUP_SIZE: usize = 10000;

/// Parquet compression options
pub const COMPRESSION_SNAPPY: &str = "snappy";
pub const COMPRESSION_GZIP: &str = "gzip";
pub const COMPRESSION_LZ4: &str = "lz4";
pub const COMPRESSION_ZSTD: &str = "zstd";
pub const COMPRESSION_NONE: &str = "none";

/// Default city to region lookup
pub const DEFAULT_REGION_CITIES: [(&str, &[&str]); 3] = [
    (
        "NYC",
        &["New York City", "Philadelphia", "Boston", "Washington DC"],
    ),
    ("CANADA", &["Montreal", "Toronto", "Hamilton"]),
    ("MEXICO", &["Mexico City", "Ecatepec", "Toluca"]),
];
