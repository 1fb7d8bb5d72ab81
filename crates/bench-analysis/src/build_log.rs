use std::sync::OnceLock;

use regex::Regex;

use crate::extract::{parse_count, ExtractError, Marker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilationStats {
    pub label_variables: u64,
    pub information_flow_ms: u64,
    pub selection_variables: u64,
    pub selection_ms: u64,
}

const BUILD_MARKERS: [(Marker, &str); 4] = [
    (Marker::LabelVariables, r"number of label variables: (\d+)"),
    (
        Marker::InformationFlowTime,
        r"finished information flow analysis, ran for (\d+)ms",
    ),
    (Marker::SelectionVariables, r"number of symvars: (\d+)"),
    (
        Marker::SelectionTime,
        r"finished protocol selection, ran for (\d+)ms",
    ),
];

fn build_markers() -> &'static [(Marker, Regex)] {
    static COMPILED: OnceLock<Vec<(Marker, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        BUILD_MARKERS
            .iter()
            .map(|(marker, pattern)| (*marker, Regex::new(pattern).expect("build pattern")))
            .collect()
    })
}

/// Parses the statistics of `benchmarks` consecutively compiled programs.
///
/// The compiler prints each marker once per program, in build order, so the
/// k-th occurrence of every marker belongs to the k-th program.
pub fn parse_compilation_log(
    log: &str,
    benchmarks: usize,
) -> Vec<Result<CompilationStats, ExtractError>> {
    let streams: Vec<(Marker, Vec<&str>)> = build_markers()
        .iter()
        .map(|(marker, regex)| {
            let values = regex
                .captures_iter(log)
                .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
                .collect();
            (*marker, values)
        })
        .collect();

    (0..benchmarks)
        .map(|index| {
            let mut values = [0u64; 4];
            for (slot, (marker, occurrences)) in values.iter_mut().zip(&streams) {
                let text = occurrences
                    .get(index)
                    .ok_or(ExtractError::MissingMarker(*marker))?;
                *slot = parse_count(*marker, text)?;
            }
            let [label_variables, information_flow_ms, selection_variables, selection_ms] = values;
            Ok(CompilationStats {
                label_variables,
                information_flow_ms,
                selection_variables,
                selection_ms,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occurrences_are_assigned_in_build_order() {
        let log = "\
compiling Biomatch.via
number of label variables: 12
finished information flow analysis, ran for 40ms
number of symvars: 7
finished protocol selection, ran for 300ms
compiling Median.via
number of label variables: 30
finished information flow analysis, ran for 55ms
number of symvars: 19
finished protocol selection, ran for 912ms
";
        let stats = parse_compilation_log(log, 2);
        assert_eq!(
            stats,
            vec![
                Ok(CompilationStats {
                    label_variables: 12,
                    information_flow_ms: 40,
                    selection_variables: 7,
                    selection_ms: 300,
                }),
                Ok(CompilationStats {
                    label_variables: 30,
                    information_flow_ms: 55,
                    selection_variables: 19,
                    selection_ms: 912,
                }),
            ]
        );
    }

    #[test]
    fn missing_occurrence_fails_only_that_benchmark() {
        let log = "\
number of label variables: 1
finished information flow analysis, ran for 2ms
number of symvars: 3
finished protocol selection, ran for 4ms
number of label variables: 5
finished information flow analysis, ran for 6ms
";
        let stats = parse_compilation_log(log, 2);
        assert!(stats[0].is_ok());
        assert_eq!(
            stats[1],
            Err(ExtractError::MissingMarker(Marker::SelectionVariables))
        );
    }
}
