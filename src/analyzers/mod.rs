pub mod agreement;
pub mod cross_validation;
pub mod dataset_summary;
pub mod deming;
pub mod descriptive;
pub mod optimizer;
pub mod sensitivity;
pub mod stratification;

pub use agreement::{assess_group, AgreementOptions};
pub use cross_validation::{leave_one_group_out, FoldStatus, LocoFold, LocoOptions, LocoSummary};
pub use dataset_summary::{DatasetSummary, GeographicBounds, PairSummary, TimeRange};
pub use deming::{calibrate, fit_deming, DemingFit};
pub use sensitivity::{sensitivity_grid, SensitivityAnalysis, SensitivityCell};
pub use stratification::{stratify, StationBiasSpread, StratifiedAnalysis, Stratum};
