use std::collections::BTreeMap;

use thiserror::Error;

use crate::extract::{ExtractError, RunMetrics, SectionKey, SectionMetrics};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Means {
    pub time_ms: f64,
    pub communication_bytes: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatedMetrics {
    pub attempted: usize,
    pub succeeded: usize,
    pub means: Option<Means>,
}

#[derive(Default)]
struct Totals {
    attempted: usize,
    succeeded: usize,
    time_ms: u128,
    communication_bytes: u128,
}

impl Totals {
    fn add<E>(&mut self, record: &Result<RunMetrics, E>) {
        self.attempted += 1;
        if let Ok(metrics) = record {
            self.succeeded += 1;
            self.time_ms += u128::from(metrics.time_ms);
            self.communication_bytes += u128::from(metrics.communication_bytes());
        }
    }

    fn finish(self) -> AggregatedMetrics {
        let means = (self.succeeded > 0).then(|| {
            let n = self.succeeded as f64;
            Means {
                time_ms: self.time_ms as f64 / n,
                communication_bytes: self.communication_bytes as f64 / n,
            }
        });
        AggregatedMetrics {
            attempted: self.attempted,
            succeeded: self.succeeded,
            means,
        }
    }
}

pub fn aggregate_by_key<K, E, I>(records: I) -> BTreeMap<K, AggregatedMetrics>
where
    K: Ord,
    I: IntoIterator<Item = (K, Result<RunMetrics, E>)>,
{
    let mut totals: BTreeMap<K, Totals> = BTreeMap::new();
    for (key, record) in records {
        totals.entry(key).or_default().add(&record);
    }
    totals
        .into_iter()
        .map(|(key, totals)| (key, totals.finish()))
        .collect()
}

/// Merges two views of the same exchange.
///
/// What `first` sent is what `second` received, so each direction is the
/// larger of the two observers' counts for it. Elapsed time is the larger of
/// the two.
pub fn reconcile(first: &RunMetrics, second: &RunMetrics) -> RunMetrics {
    RunMetrics {
        time_ms: first.time_ms.max(second.time_ms),
        sent_bytes: first.sent_bytes.max(second.received_bytes),
        received_bytes: first.received_bytes.max(second.sent_bytes),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("trial {trial} case {case}: present in only one log")]
    MissingCounterpart { trial: u64, case: String },
    #[error("trial {trial} case {case}: {source}")]
    Extraction {
        trial: u64,
        case: String,
        #[source]
        source: ExtractError,
    },
}

pub fn reconcile_sections(
    first: &SectionMetrics,
    second: &SectionMetrics,
) -> BTreeMap<SectionKey, Result<RunMetrics, ReconcileError>> {
    let extraction = |key: &SectionKey, source: &ExtractError| ReconcileError::Extraction {
        trial: key.trial,
        case: key.case.clone(),
        source: source.clone(),
    };

    let mut merged = BTreeMap::new();
    for key in first.keys().chain(second.keys()) {
        if merged.contains_key(key) {
            continue;
        }
        let result = match (first.get(key), second.get(key)) {
            (Some(Ok(a)), Some(Ok(b))) => Ok(reconcile(a, b)),
            (Some(Err(err)), _) | (_, Some(Err(err))) => Err(extraction(key, err)),
            _ => Err(ReconcileError::MissingCounterpart {
                trial: key.trial,
                case: key.case.clone(),
            }),
        };
        merged.insert(key.clone(), result);
    }
    merged
}

pub fn average_by_case(
    reconciled: BTreeMap<SectionKey, Result<RunMetrics, ReconcileError>>,
) -> BTreeMap<String, AggregatedMetrics> {
    aggregate_by_key(
        reconciled
            .into_iter()
            .map(|(key, record)| (key.case, record)),
    )
}
