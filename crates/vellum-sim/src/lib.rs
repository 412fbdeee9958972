//! vellum-sim: deterministic simulation of racing history writers.
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` for harness failures; store misbehaviour is
//!   recorded in the trace and judged by the [`oracle`].
//! - **Logging**: `tracing` macros with `seed` / `round` / `writer` fields.
//!
//! Every round each writer either refreshes its view of the project or keeps
//! a stale one, then the writers act in a shuffled order against one real
//! [`History`]. A model of every committed version is kept alongside, so the
//! oracle can replay the store and compare.

pub mod agent;
pub mod campaign;
pub mod oracle;
pub mod rng;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vellum_core::history::{FileRef, SealedChunk};
use vellum_core::{
    Change, History, HistoryConfig, HistoryError, Operation, ProjectId, timestamp,
};

use crate::agent::{Action, ActionMix, Files, SimulatedWriter, View, WriterId};
use crate::rng::DeterministicRng;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub writers: usize,
    pub rounds: u64,
    pub initial_files: usize,
    /// Passed through to the store's chunking config.
    pub max_changes_per_chunk: u64,
    /// Chance per round that a writer skips refreshing its view.
    pub stale_view_percent: u8,
    /// Rebuild attempts after a conflict before a writer gives up.
    pub max_retries: u32,
    pub mix: ActionMix,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            writers: 3,
            rounds: 30,
            initial_files: 2,
            max_changes_per_chunk: 5,
            stale_view_percent: 40,
            max_retries: 3,
            mix: ActionMix::default(),
        }
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Returns an error for configurations that cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.writers == 0 {
            bail!("writers must be > 0");
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        if self.max_changes_per_chunk == 0 {
            bail!("max_changes_per_chunk must be > 0");
        }
        Ok(())
    }
}

/// A chunk as it looked when it was sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedFingerprint {
    pub chunk_id: i64,
    pub start_version: u64,
    pub end_version: u64,
    pub change_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEventKind {
    Commit {
        writer: WriterId,
        action: String,
        version: u64,
    },
    Conflict {
        writer: WriterId,
        expected: u64,
        actual: u64,
    },
    GaveUp {
        writer: WriterId,
    },
    Restore {
        writer: WriterId,
        target: u64,
        version: u64,
    },
    Seal {
        writer: Option<WriterId>,
        chunk_id: i64,
    },
    Compact {
        writer: WriterId,
        retired: usize,
    },
    /// The store failed in a way a correct store never should.
    Unexpected {
        writer: WriterId,
        detail: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub round: u64,
    pub kind: TraceEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub seed: u64,
    pub trace: Vec<TraceEvent>,
    /// Expected files at every version, indexed by version.
    pub model: Vec<Files>,
    pub sealed: Vec<SealedFingerprint>,
}

impl SimulationResult {
    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.trace
            .iter()
            .filter(|event| kind_label(&event.kind) == label)
            .count()
    }

    /// Both a lost race and a compaction happened in this run.
    #[must_use]
    pub fn interesting(&self) -> bool {
        self.count("conflict") > 0 && self.count("compact") > 0
    }
}

const fn kind_label(kind: &TraceEventKind) -> &'static str {
    match kind {
        TraceEventKind::Commit { .. } => "commit",
        TraceEventKind::Conflict { .. } => "conflict",
        TraceEventKind::GaveUp { .. } => "gave_up",
        TraceEventKind::Restore { .. } => "restore",
        TraceEventKind::Seal { .. } => "seal",
        TraceEventKind::Compact { .. } => "compact",
        TraceEventKind::Unexpected { .. } => "unexpected",
    }
}

pub struct Simulator {
    config: SimulationConfig,
    history: History,
    project_id: ProjectId,
    rng: DeterministicRng,
    writers: Vec<SimulatedWriter>,
    trace: Vec<TraceEvent>,
    model: Vec<Files>,
    sealed: Vec<SealedFingerprint>,
    round: u64,
}

impl Simulator {
    /// Create the project and commit the initial files as version 1.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configs or if the store cannot be set up.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let mut history_config = HistoryConfig::default();
        history_config.chunking.max_changes_per_chunk = config.max_changes_per_chunk;
        history_config.retry.base_backoff_ms = 0;
        let history = History::in_memory(history_config)?;
        let project_id = history.create_project().context("create project")?;

        let mut files = Files::new();
        for n in 0..config.initial_files {
            files.insert(format!("doc{n}.tex"), format!("initial text {n}"));
        }
        let mut operations = Vec::new();
        for (path, content) in &files {
            let blob = history.blobs().put_string(content)?;
            operations.push(Operation::add(path.clone(), FileRef::from_blob(&blob)));
        }
        history
            .writer()
            .persist_changes(project_id, 0, &[Change::new(operations, timestamp::now())])
            .context("commit initial files")?;

        Ok(Self {
            rng: DeterministicRng::new(config.seed),
            writers: (0..config.writers).map(SimulatedWriter::new).collect(),
            config,
            history,
            project_id,
            trace: Vec::new(),
            model: vec![Files::new(), files],
            sealed: Vec::new(),
            round: 0,
        })
    }

    #[must_use]
    pub const fn history(&self) -> &History {
        &self.history
    }

    #[must_use]
    pub const fn project_id(&self) -> ProjectId {
        self.project_id
    }

    /// Run every round and return the trace and model.
    ///
    /// # Errors
    ///
    /// Returns an error only when the harness itself cannot read the store.
    pub fn run(&mut self) -> Result<SimulationResult> {
        for round in 0..self.config.rounds {
            self.round = round;
            self.step()?;
        }
        info!(
            seed = self.config.seed,
            versions = self.model.len() - 1,
            events = self.trace.len(),
            "simulation finished"
        );
        Ok(SimulationResult {
            seed: self.config.seed,
            trace: self.trace.clone(),
            model: self.model.clone(),
            sealed: self.sealed.clone(),
        })
    }

    fn step(&mut self) -> Result<()> {
        for idx in 0..self.writers.len() {
            if self.writers[idx].view().is_none() || !self.rng.chance(self.config.stale_view_percent) {
                let view = self.current_view()?;
                self.writers[idx].observe(view);
            }
        }
        let mut order: Vec<usize> = (0..self.writers.len()).collect();
        self.rng.shuffle(&mut order);
        for idx in order {
            self.act(idx)?;
        }
        Ok(())
    }

    fn act(&mut self, idx: usize) -> Result<()> {
        let mix = self.config.mix;
        let writer_id = self.writers[idx].id();
        let mut retries = 0;
        loop {
            let Some(action) = self.writers[idx].plan(&mut self.rng, &mix) else {
                return Ok(());
            };
            debug!(seed = self.config.seed, round = self.round, writer = writer_id, action = action.label(), "act");
            match self.perform(idx, &action)? {
                Attempt::Done => return Ok(()),
                Attempt::Conflict { expected, actual } => {
                    self.record(TraceEventKind::Conflict {
                        writer: writer_id,
                        expected,
                        actual,
                    });
                    retries += 1;
                    if retries > self.config.max_retries {
                        self.record(TraceEventKind::GaveUp { writer: writer_id });
                        return Ok(());
                    }
                    let view = self.current_view()?;
                    self.writers[idx].observe(view);
                }
            }
        }
    }

    fn perform(&mut self, idx: usize, action: &Action) -> Result<Attempt> {
        let writer_id = self.writers[idx].id();
        match action {
            Action::Seal => {
                match self.history.writer().seal(self.project_id) {
                    Ok(Some(sealed)) => self.record_seal(Some(writer_id), sealed)?,
                    Ok(None) => {}
                    Err(error) => self.unexpected(writer_id, &error),
                }
                Ok(Attempt::Done)
            }
            Action::Compact => {
                match self.history.compact(self.project_id) {
                    Ok(Some(report)) => self.record(TraceEventKind::Compact {
                        writer: writer_id,
                        retired: report.retired.len(),
                    }),
                    Ok(None) => {}
                    Err(error) => self.unexpected(writer_id, &error),
                }
                Ok(Attempt::Done)
            }
            Action::Restore { target } => {
                let user = self.writers[idx].user_id();
                match self
                    .history
                    .restorer()
                    .restore_project(self.project_id, *target, Some(user.as_str()))
                {
                    Ok(_) => {
                        let version = self.history.chunks().latest_version(self.project_id)?;
                        let restored = self.model_at(*target)?.clone();
                        self.model.push(restored);
                        self.record(TraceEventKind::Restore {
                            writer: writer_id,
                            target: *target,
                            version,
                        });
                        self.note_auto_seal(version)?;
                    }
                    Err(error) => self.unexpected(writer_id, &error),
                }
                Ok(Attempt::Done)
            }
            _ => self.commit(idx, action),
        }
    }

    fn commit(&mut self, idx: usize, action: &Action) -> Result<Attempt> {
        let writer_id = self.writers[idx].id();
        let Some(view) = self.writers[idx].view().cloned() else {
            return Ok(Attempt::Done);
        };
        let Some(next_files) = action.apply_to(&view.files) else {
            bail!("writer {writer_id} planned {action:?} that does not fit its view");
        };
        let change = Change::new(self.operations(action)?, timestamp::now())
            .with_author(Some(self.writers[idx].user_id()));

        match self
            .history
            .writer()
            .persist_changes(self.project_id, view.version, &[change])
        {
            Ok(outcome) => {
                if let Some(sealed) = outcome.sealed {
                    self.record_seal(None, sealed)?;
                }
                self.model.push(next_files.clone());
                self.writers[idx].observe(View {
                    version: outcome.version,
                    files: next_files,
                });
                self.record(TraceEventKind::Commit {
                    writer: writer_id,
                    action: action.label().to_string(),
                    version: outcome.version,
                });
                Ok(Attempt::Done)
            }
            Err(HistoryError::VersionConflict { expected, actual }) => {
                Ok(Attempt::Conflict { expected, actual })
            }
            Err(error) => {
                self.unexpected(writer_id, &error);
                Ok(Attempt::Done)
            }
        }
    }

    fn operations(&self, action: &Action) -> Result<Vec<Operation>> {
        Ok(match action {
            Action::Edit {
                pathname,
                operation,
            } => vec![Operation::edit(pathname.clone(), operation.clone())],
            Action::Add { pathname, content } => {
                let blob = self.history.blobs().put_string(content)?;
                vec![Operation::add(pathname.clone(), FileRef::from_blob(&blob))]
            }
            Action::Remove { pathname } => vec![Operation::remove(pathname.clone())],
            Action::Rename {
                pathname,
                new_pathname,
            } => vec![Operation::rename(pathname.clone(), new_pathname.clone())],
            Action::Restore { .. } | Action::Seal | Action::Compact => Vec::new(),
        })
    }

    /// A restore appends through the writer, which may seal a full chunk.
    fn note_auto_seal(&mut self, version: u64) -> Result<()> {
        let Some(last) = self
            .history
            .chunks()
            .list_chunks(self.project_id)?
            .into_iter()
            .rev()
            .find(|chunk| chunk.closed)
        else {
            return Ok(());
        };
        let known = self.sealed.iter().any(|seen| seen.chunk_id == last.id);
        if !known && last.end_version == version {
            let open = self.history.chunks().load_latest(self.project_id)?;
            self.record_seal(
                None,
                SealedChunk {
                    closed_id: last.id,
                    open_id: open.record.id,
                },
            )?;
        }
        Ok(())
    }

    fn record_seal(&mut self, writer: Option<WriterId>, sealed: SealedChunk) -> Result<()> {
        let chunk = self.history.chunks().load_chunk(sealed.closed_id)?;
        self.sealed.push(SealedFingerprint {
            chunk_id: sealed.closed_id,
            start_version: chunk.record.start_version,
            end_version: chunk.record.end_version,
            change_count: chunk.changes.len(),
        });
        self.record(TraceEventKind::Seal {
            writer,
            chunk_id: sealed.closed_id,
        });
        Ok(())
    }

    fn current_view(&self) -> Result<View> {
        let assembler = self.history.assembler();
        let (version, _) = assembler.get_latest_snapshot(self.project_id)?;
        let files = assembler
            .export_full_content(self.project_id, version)?
            .into_iter()
            .map(|(path, bytes)| (path, String::from_utf8_lossy(&bytes).into_owned()))
            .collect();
        Ok(View { version, files })
    }

    fn model_at(&self, version: u64) -> Result<&Files> {
        usize::try_from(version)
            .ok()
            .and_then(|idx| self.model.get(idx))
            .with_context(|| format!("no model for version {version}"))
    }

    fn unexpected(&mut self, writer: WriterId, error: &HistoryError) {
        self.record(TraceEventKind::Unexpected {
            writer,
            detail: format!("{} {error}", error.code()),
        });
    }

    fn record(&mut self, kind: TraceEventKind) {
        self.trace.push(TraceEvent {
            round: self.round,
            kind,
        });
    }
}

enum Attempt {
    Done,
    Conflict { expected: u64, actual: u64 },
}
