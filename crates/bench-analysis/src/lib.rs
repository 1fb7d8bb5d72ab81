mod aggregate;
mod build_log;
mod extract;

pub use aggregate::{
    aggregate_by_key, average_by_case, reconcile, reconcile_sections, AggregatedMetrics, Means,
    ReconcileError,
};
pub use build_log::{parse_compilation_log, CompilationStats};
pub use extract::{
    extract_metrics, extract_sections, ExtractError, Marker, MetricScanner, RunMetrics,
    SectionKey, SectionMetrics,
};
