pub mod data_cleaner;
pub mod matcher;
pub mod pipeline;
pub mod report_assembler;

pub use data_cleaner::{CleaningReport, ExclusionReason, GroundQc};
pub use matcher::{DropReason, MatchSettings, MatchStatistics, Matcher, RegionMatchStatistics};
pub use pipeline::{run_validation, run_validation_with_progress, ValidationOutput};
pub use report_assembler::{
    AgreementSummaryRow, GroupMetrics, ReportAssembler, RunManifest, ValidationReport,
    OVERALL_GROUP,
};
