//! Invariant checks over a finished simulation.
//!
//! The oracle reads the store back through the public API and compares it
//! against the simulator's model and trace.

use std::collections::BTreeSet;

use vellum_core::{History, ProjectId};
use vellum_core::history::Origin;

use crate::agent::Files;
use crate::{SimulationResult, TraceEventKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Live chunks do not tile `[0, tip]` with one open chunk last.
    Partition { detail: String },
    /// The store's tip disagrees with the number of committed versions.
    Tip { expected: u64, actual: u64 },
    /// Replaying `version` gave different files than were committed.
    Content {
        version: u64,
        missing: Vec<String>,
        unexpected: Vec<String>,
        differing: Vec<String>,
    },
    /// A sealed chunk changed, or vanished without being retired.
    SealedChunk { chunk_id: i64, detail: String },
    /// A conflict was reported for a writer that was not behind.
    Conflict { expected: u64, actual: u64 },
    /// A restore change lacks provenance naming its target.
    Provenance { version: u64, target: u64 },
    /// The store returned an error no correct store would.
    Unexpected { writer: usize, detail: String },
    /// The store could not be read back at all.
    Read { detail: String },
}

pub struct HistoryOracle;

impl HistoryOracle {
    /// Run every check.
    #[must_use]
    pub fn check_all(history: &History, project_id: ProjectId, result: &SimulationResult) -> OracleResult {
        let mut violations = Vec::new();
        violations.extend(check_trace(result));
        violations.extend(check_partition(history, project_id));
        violations.extend(check_content(history, project_id, &result.model));
        violations.extend(check_sealed(history, project_id, result));
        violations.extend(check_provenance(history, project_id, result));
        OracleResult::from_violations(violations)
    }
}

/// Conflicts only for writers behind the tip; no unexpected store errors.
#[must_use]
pub fn check_trace(result: &SimulationResult) -> Vec<InvariantViolation> {
    result
        .trace
        .iter()
        .filter_map(|event| match &event.kind {
            TraceEventKind::Conflict {
                expected, actual, ..
            } if expected >= actual => {
                Some(InvariantViolation::Conflict {
                    expected: *expected,
                    actual: *actual,
                })
            }
            TraceEventKind::Unexpected { writer, detail } => Some(InvariantViolation::Unexpected {
                writer: *writer,
                detail: detail.clone(),
            }),
            _ => None,
        })
        .collect()
}

#[must_use]
pub fn check_partition(history: &History, project_id: ProjectId) -> Vec<InvariantViolation> {
    match history.chunks().validate_partition(project_id) {
        Ok(()) => Vec::new(),
        Err(error) => vec![InvariantViolation::Partition {
            detail: error.to_string(),
        }],
    }
}

/// The tip matches the model and every version replays to its model files.
#[must_use]
pub fn check_content(history: &History, project_id: ProjectId, model: &[Files]) -> Vec<InvariantViolation> {
    let expected_tip = u64::try_from(model.len().saturating_sub(1)).unwrap_or(u64::MAX);
    let actual_tip = match history.chunks().latest_version(project_id) {
        Ok(tip) => tip,
        Err(error) => return vec![read_failure(&error)],
    };
    if actual_tip != expected_tip {
        return vec![InvariantViolation::Tip {
            expected: expected_tip,
            actual: actual_tip,
        }];
    }

    let assembler = history.assembler();
    let mut violations = Vec::new();
    for (version, expected) in (0..).zip(model) {
        let actual: Files = match assembler.export_full_content(project_id, version) {
            Ok(content) => content
                .into_iter()
                .map(|(path, bytes)| (path, String::from_utf8_lossy(&bytes).into_owned()))
                .collect(),
            Err(error) => {
                violations.push(read_failure(&error));
                continue;
            }
        };
        if let Some(violation) = compare_files(version, expected, &actual) {
            violations.push(violation);
        }
    }
    violations
}

fn compare_files(version: u64, expected: &Files, actual: &Files) -> Option<InvariantViolation> {
    let expected_paths: BTreeSet<&String> = expected.keys().collect();
    let actual_paths: BTreeSet<&String> = actual.keys().collect();
    let missing: Vec<String> = expected_paths
        .difference(&actual_paths)
        .map(|path| (*path).clone())
        .collect();
    let unexpected: Vec<String> = actual_paths
        .difference(&expected_paths)
        .map(|path| (*path).clone())
        .collect();
    let differing: Vec<String> = expected
        .iter()
        .filter(|(path, content)| actual.get(*path).is_some_and(|found| found != *content))
        .map(|(path, _)| path.clone())
        .collect();
    if missing.is_empty() && unexpected.is_empty() && differing.is_empty() {
        None
    } else {
        Some(InvariantViolation::Content {
            version,
            missing,
            unexpected,
            differing,
        })
    }
}

/// Every chunk sealed during the run is still live and unchanged, or was
/// retired by compaction with its range intact.
#[must_use]
pub fn check_sealed(history: &History, project_id: ProjectId, result: &SimulationResult) -> Vec<InvariantViolation> {
    let chunks = history.chunks();
    let (live, old) = match (chunks.list_chunks(project_id), chunks.list_old_chunks(project_id)) {
        (Ok(live), Ok(old)) => (live, old),
        (Err(error), _) | (_, Err(error)) => return vec![read_failure(&error)],
    };

    let mut violations = Vec::new();
    for sealed in &result.sealed {
        let mismatch = |detail: String| InvariantViolation::SealedChunk {
            chunk_id: sealed.chunk_id,
            detail,
        };
        if let Some(record) = live.iter().find(|chunk| chunk.id == sealed.chunk_id) {
            let range = (record.start_version, record.end_version);
            if !record.closed || range != (sealed.start_version, sealed.end_version) {
                violations.push(mismatch(format!(
                    "now {range:?} closed={}, sealed as {:?}",
                    record.closed,
                    (sealed.start_version, sealed.end_version)
                )));
                continue;
            }
            match chunks.load_chunk(sealed.chunk_id) {
                Ok(chunk) if chunk.changes.len() == sealed.change_count => {}
                Ok(chunk) => violations.push(mismatch(format!(
                    "{} changes, sealed with {}",
                    chunk.changes.len(),
                    sealed.change_count
                ))),
                Err(error) => violations.push(read_failure(&error)),
            }
        } else if let Some(retired) = old.iter().find(|chunk| chunk.chunk_id == sealed.chunk_id) {
            let range = (retired.start_version, retired.end_version);
            if range != (sealed.start_version, sealed.end_version) {
                violations.push(mismatch(format!("retired as {range:?}")));
            }
        } else {
            violations.push(mismatch("neither live nor retired".to_string()));
        }
    }
    violations
}

/// Each restore change carries a project-restore origin naming its target.
#[must_use]
pub fn check_provenance(history: &History, project_id: ProjectId, result: &SimulationResult) -> Vec<InvariantViolation> {
    let assembler = history.assembler();
    let mut violations = Vec::new();
    for event in &result.trace {
        let TraceEventKind::Restore { target, version, .. } = event.kind else {
            continue;
        };
        let changes = match assembler.get_changes(project_id, version - 1, version) {
            Ok(changes) => changes,
            Err(error) => {
                violations.push(read_failure(&error));
                continue;
            }
        };
        let tagged = changes.first().and_then(|change| change.origin.as_ref()).is_some_and(
            |origin| matches!(origin, Origin::RestoreProject { version: v, .. } if *v == target),
        );
        if !tagged {
            violations.push(InvariantViolation::Provenance { version, target });
        }
    }
    violations
}

fn read_failure(error: &impl std::fmt::Display) -> InvariantViolation {
    InvariantViolation::Read {
        detail: error.to_string(),
    }
}

/// One line per violation for reports.
#[must_use]
pub fn describe(violation: &InvariantViolation) -> String {
    match violation {
        InvariantViolation::Partition { detail } => format!("partition: {detail}"),
        InvariantViolation::Tip { expected, actual } => {
            format!("tip: expected version {expected}, store has {actual}")
        }
        InvariantViolation::Content {
            version,
            missing,
            unexpected,
            differing,
        } => format!(
            "content at v{version}: missing={missing:?} unexpected={unexpected:?} differing={differing:?}"
        ),
        InvariantViolation::SealedChunk { chunk_id, detail } => {
            format!("sealed chunk {chunk_id}: {detail}")
        }
        InvariantViolation::Conflict { expected, actual } => {
            format!("conflict reported at expected={expected} but tip was {actual}")
        }
        InvariantViolation::Provenance { version, target } => {
            format!("restore at v{version} lacks origin naming v{target}")
        }
        InvariantViolation::Unexpected { writer, detail } => {
            format!("writer {writer} hit {detail}")
        }
        InvariantViolation::Read { detail } => format!("read failed: {detail}"),
    }
}
