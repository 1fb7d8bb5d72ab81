use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    BackendBytes,
    RuntimeSent,
    RuntimeReceived,
    Elapsed,
    LabelVariables,
    InformationFlowTime,
    SelectionVariables,
    SelectionTime,
    Trial,
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Marker::BackendBytes => "backend total bytes",
            Marker::RuntimeSent => "runtime bytes sent",
            Marker::RuntimeReceived => "runtime bytes received",
            Marker::Elapsed => "elapsed time",
            Marker::LabelVariables => "label variable count",
            Marker::InformationFlowTime => "information flow time",
            Marker::SelectionVariables => "selection variable count",
            Marker::SelectionTime => "protocol selection time",
            Marker::Trial => "trial number",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("missing {0} marker")]
    MissingMarker(Marker),
    #[error("{marker} marker carries an out-of-range value: {text}")]
    MalformedNumber { marker: Marker, text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunMetrics {
    pub time_ms: u64,
    pub sent_bytes: u64,
    pub received_bytes: u64,
}

impl RunMetrics {
    pub fn communication_bytes(&self) -> u64 {
        self.sent_bytes.saturating_add(self.received_bytes)
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    BackendSent,
    BackendReceived,
    RuntimeSent,
    RuntimeReceived,
    TimeMs,
}

#[derive(Debug, Clone, Copy)]
enum Combine {
    Accumulate,
    Last,
}

struct Rule {
    marker: Marker,
    pattern: &'static str,
    captures: &'static [(&'static str, Field)],
    combine: Combine,
}

const RULES: &[Rule] = &[
    Rule {
        marker: Marker::BackendBytes,
        pattern: r"total sent/recv: (?P<sent>\d+) / (?P<received>\d+)",
        captures: &[("sent", Field::BackendSent), ("received", Field::BackendReceived)],
        combine: Combine::Accumulate,
    },
    Rule {
        marker: Marker::RuntimeSent,
        pattern: r"bytes sent to host \w+: (?P<bytes>\d+)",
        captures: &[("bytes", Field::RuntimeSent)],
        combine: Combine::Last,
    },
    Rule {
        marker: Marker::RuntimeReceived,
        pattern: r"bytes received from host \w+: (?P<bytes>\d+)",
        captures: &[("bytes", Field::RuntimeReceived)],
        combine: Combine::Last,
    },
    Rule {
        marker: Marker::Elapsed,
        pattern: r"finished interpretation, total running time: (?P<ms>\d+)ms",
        captures: &[("ms", Field::TimeMs)],
        combine: Combine::Last,
    },
];

fn compiled_rules() -> &'static [(Regex, &'static Rule)] {
    static COMPILED: OnceLock<Vec<(Regex, &'static Rule)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .map(|rule| (Regex::new(rule.pattern).expect("metric pattern"), rule))
            .collect()
    })
}

pub(crate) fn parse_count(marker: Marker, text: &str) -> Result<u64, ExtractError> {
    text.parse::<u64>()
        .map_err(|_| ExtractError::MalformedNumber {
            marker,
            text: text.to_string(),
        })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricScanner {
    backend_sent: Option<u64>,
    backend_received: Option<u64>,
    runtime_sent: Option<u64>,
    runtime_received: Option<u64>,
    time_ms: Option<u64>,
}

impl MetricScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed_line(&mut self, line: &str) -> Result<(), ExtractError> {
        for (regex, rule) in compiled_rules() {
            let Some(caps) = regex.captures(line) else {
                continue;
            };
            for (name, field) in rule.captures {
                let Some(m) = caps.name(name) else {
                    continue;
                };
                let value = parse_count(rule.marker, m.as_str())?;
                combine_slot(rule.marker, self.slot(*field), value, rule.combine)?;
            }
        }
        Ok(())
    }

    fn slot(&mut self, field: Field) -> &mut Option<u64> {
        match field {
            Field::BackendSent => &mut self.backend_sent,
            Field::BackendReceived => &mut self.backend_received,
            Field::RuntimeSent => &mut self.runtime_sent,
            Field::RuntimeReceived => &mut self.runtime_received,
            Field::TimeMs => &mut self.time_ms,
        }
    }

    /// Backend counters are optional; the three runtime markers are not.
    pub fn finish(&self) -> Result<RunMetrics, ExtractError> {
        let time_ms = self
            .time_ms
            .ok_or(ExtractError::MissingMarker(Marker::Elapsed))?;
        let runtime_sent = self
            .runtime_sent
            .ok_or(ExtractError::MissingMarker(Marker::RuntimeSent))?;
        let runtime_received = self
            .runtime_received
            .ok_or(ExtractError::MissingMarker(Marker::RuntimeReceived))?;
        Ok(RunMetrics {
            time_ms,
            sent_bytes: accumulate(
                Marker::RuntimeSent,
                self.backend_sent.unwrap_or(0),
                runtime_sent,
            )?,
            received_bytes: accumulate(
                Marker::RuntimeReceived,
                self.backend_received.unwrap_or(0),
                runtime_received,
            )?,
        })
    }
}

fn accumulate(marker: Marker, total: u64, value: u64) -> Result<u64, ExtractError> {
    total
        .checked_add(value)
        .ok_or_else(|| ExtractError::MalformedNumber {
            marker,
            text: value.to_string(),
        })
}

fn combine_slot(
    marker: Marker,
    slot: &mut Option<u64>,
    value: u64,
    combine: Combine,
) -> Result<(), ExtractError> {
    *slot = Some(match (combine, *slot) {
        (Combine::Accumulate, Some(total)) => accumulate(marker, total, value)?,
        _ => value,
    });
    Ok(())
}

pub fn extract_metrics(log: &str) -> Result<RunMetrics, ExtractError> {
    let mut scanner = MetricScanner::new();
    for line in log.lines() {
        scanner.feed_line(line)?;
    }
    scanner.finish()
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SectionKey {
    pub trial: u64,
    pub case: String,
}

pub type SectionMetrics = BTreeMap<SectionKey, Result<RunMetrics, ExtractError>>;

fn section_markers() -> &'static (Regex, Regex) {
    static MARKERS: OnceLock<(Regex, Regex)> = OnceLock::new();
    MARKERS.get_or_init(|| {
        (
            Regex::new(r"starting trial (?P<trial>\d+)").expect("trial pattern"),
            Regex::new(r"executing (?P<case>\S+)").expect("case pattern"),
        )
    })
}

type OpenSection = (SectionKey, MetricScanner, Option<ExtractError>);

fn close_section(open: &mut Option<OpenSection>, sections: &mut SectionMetrics) {
    if let Some((key, scanner, failure)) = open.take() {
        let result = match failure {
            Some(err) => Err(err),
            None => scanner.finish(),
        };
        sections.insert(key, result);
    }
}

/// Splits a combined log on `starting trial N` / `executing CASE` markers and
/// extracts each section independently.
///
/// A trial marker closes the open case. Lines outside a case are ignored. A
/// case that repeats within one trial replaces the earlier section. A trial
/// number that does not fit a `u64` fails the whole log, since its sections
/// could no longer be matched against another log.
pub fn extract_sections(log: &str) -> Result<SectionMetrics, ExtractError> {
    let (trial_re, case_re) = section_markers();
    let mut sections = SectionMetrics::new();
    let mut trial: Option<u64> = None;
    let mut open: Option<OpenSection> = None;

    for line in log.lines() {
        if let Some(caps) = trial_re.captures(line) {
            close_section(&mut open, &mut sections);
            trial = Some(parse_count(Marker::Trial, &caps["trial"])?);
        } else if let Some(caps) = case_re.captures(line) {
            close_section(&mut open, &mut sections);
            if let Some(trial) = trial {
                let key = SectionKey {
                    trial,
                    case: caps["case"].to_string(),
                };
                open = Some((key, MetricScanner::new(), None));
            }
        } else if let Some((_, scanner, failure)) = open.as_mut() {
            if failure.is_none() {
                if let Err(err) = scanner.feed_line(line) {
                    *failure = Some(err);
                }
            }
        }
    }
    close_section(&mut open, &mut sections);
    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = "\
INFO Runtime - connecting to bob
total sent/recv: 100 / 200
something unrelated: 17
total sent/recv: 10 / 20
Runtime - bytes sent to host bob: 1000
Runtime - bytes received from host bob: 2000
Interpreter - finished interpretation, total running time: 125ms
";

    #[test]
    fn extracts_sum_of_backend_and_runtime_counters() {
        let metrics = extract_metrics(WELL_FORMED).expect("well-formed log");
        assert_eq!(
            metrics,
            RunMetrics {
                time_ms: 125,
                sent_bytes: 1110,
                received_bytes: 2220,
            }
        );
        assert_eq!(metrics.communication_bytes(), 3330);
    }

    #[test]
    fn runtime_markers_take_last_match() {
        let log = "\
bytes sent to host bob: 5
bytes sent to host chuck: 7
bytes received from host bob: 1
bytes received from host chuck: 3
finished interpretation, total running time: 9ms
finished interpretation, total running time: 11ms
";
        let metrics = extract_metrics(log).expect("log");
        assert_eq!(metrics.sent_bytes, 7);
        assert_eq!(metrics.received_bytes, 3);
        assert_eq!(metrics.time_ms, 11);
    }

    #[test]
    fn backend_counters_are_optional() {
        let log = "\
bytes sent to host alice: 0
bytes received from host alice: 0
finished interpretation, total running time: 0ms
";
        let metrics = extract_metrics(log).expect("zero is a real measurement");
        assert_eq!(metrics, RunMetrics::default());
    }

    #[test]
    fn missing_required_markers_are_reported() {
        let no_time = "bytes sent to host a: 1\nbytes received from host a: 1\n";
        assert_eq!(
            extract_metrics(no_time),
            Err(ExtractError::MissingMarker(Marker::Elapsed))
        );

        let no_sent =
            "bytes received from host a: 1\nfinished interpretation, total running time: 3ms\n";
        assert_eq!(
            extract_metrics(no_sent),
            Err(ExtractError::MissingMarker(Marker::RuntimeSent))
        );

        let no_received =
            "bytes sent to host a: 1\nfinished interpretation, total running time: 3ms\n";
        assert_eq!(
            extract_metrics(no_received),
            Err(ExtractError::MissingMarker(Marker::RuntimeReceived))
        );

        assert!(extract_metrics("").is_err());
    }

    #[test]
    fn overflowing_values_are_malformed() {
        let log = "finished interpretation, total running time: 99999999999999999999999ms\n";
        match extract_metrics(log) {
            Err(ExtractError::MalformedNumber { marker, .. }) => {
                assert_eq!(marker, Marker::Elapsed)
            }
            other => panic!("expected malformed number, got {:?}", other),
        }
    }

    #[test]
    fn scanner_matches_whole_text_extraction() {
        let mut scanner = MetricScanner::new();
        for line in WELL_FORMED.lines() {
            scanner.feed_line(line).expect("line");
        }
        assert_eq!(scanner.finish(), extract_metrics(WELL_FORMED));
    }

    #[test]
    fn sections_split_on_trial_and_case_markers() {
        let log = "\
preamble: bytes sent to host bob: 99
starting trial 1
executing small
total sent/recv: 4 / 6
Runtime - bytes sent to host bob: 1
Runtime - bytes received from host bob: 2
Interpreter - finished interpretation, total running time: 10ms
executing large
Runtime - bytes sent to host bob: 10
Interpreter - finished interpretation, total running time: 20ms
starting trial 2
executing small
Runtime - bytes sent to host bob: 3
Runtime - bytes received from host bob: 4
Interpreter - finished interpretation, total running time: 30ms
";
        let sections = extract_sections(log).expect("sections");
        assert_eq!(sections.len(), 3);

        let small1 = SectionKey {
            trial: 1,
            case: "small".to_string(),
        };
        assert_eq!(
            sections[&small1],
            Ok(RunMetrics {
                time_ms: 10,
                sent_bytes: 5,
                received_bytes: 8,
            })
        );

        let large1 = SectionKey {
            trial: 1,
            case: "large".to_string(),
        };
        assert_eq!(
            sections[&large1],
            Err(ExtractError::MissingMarker(Marker::RuntimeReceived))
        );

        let small2 = SectionKey {
            trial: 2,
            case: "small".to_string(),
        };
        assert_eq!(
            sections[&small2],
            Ok(RunMetrics {
                time_ms: 30,
                sent_bytes: 3,
                received_bytes: 4,
            })
        );
    }

    #[test]
    fn case_before_any_trial_is_ignored() {
        let log = "\
executing orphan
bytes sent to host a: 1
bytes received from host a: 1
finished interpretation, total running time: 1ms
";
        assert!(extract_sections(log).expect("sections").is_empty());
    }

    #[test]
    fn out_of_range_trial_number_fails_the_log() {
        let log = "\
starting trial 1
executing a
bytes sent to host b: 1
bytes received from host b: 1
finished interpretation, total running time: 1ms
starting trial 99999999999999999999999
executing a
bytes sent to host b: 2
bytes received from host b: 2
finished interpretation, total running time: 2ms
";
        assert_eq!(
            extract_sections(log),
            Err(ExtractError::MalformedNumber {
                marker: Marker::Trial,
                text: "99999999999999999999999".to_string(),
            })
        );
    }
}
