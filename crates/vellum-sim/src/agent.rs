//! Simulated writers.
//!
//! A writer plans against its own view of the project, which may lag the real
//! tip. Plans built on a stale view are exactly the appends the chunk store
//! must reject.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vellum_core::TextOperation;

use crate::rng::DeterministicRng;

pub type WriterId = usize;

/// Path to text content.
pub type Files = BTreeMap<String, String>;

const WORDS: &[&str] = &["alpha", " beta", "\\section{x}", "é", "中文", "\n", "🦀"];

/// A writer's last observed project state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub version: u64,
    pub files: Files,
}

/// Something a writer decided to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Edit {
        pathname: String,
        operation: TextOperation,
    },
    Add {
        pathname: String,
        content: String,
    },
    Remove {
        pathname: String,
    },
    Rename {
        pathname: String,
        new_pathname: String,
    },
    Restore {
        target: u64,
    },
    Seal,
    Compact,
}

impl Action {
    /// Short name for traces.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Edit { .. } => "edit",
            Self::Add { .. } => "add",
            Self::Remove { .. } => "remove",
            Self::Rename { .. } => "rename",
            Self::Restore { .. } => "restore",
            Self::Seal => "seal",
            Self::Compact => "compact",
        }
    }

    /// True for actions appended as a plain change against the view.
    #[must_use]
    pub const fn is_file_change(&self) -> bool {
        matches!(
            self,
            Self::Edit { .. } | Self::Add { .. } | Self::Remove { .. } | Self::Rename { .. }
        )
    }

    /// The file set after this action, given the files it was planned on.
    /// `None` for actions that do not change files directly.
    #[must_use]
    pub fn apply_to(&self, files: &Files) -> Option<Files> {
        let mut next = files.clone();
        match self {
            Self::Edit {
                pathname,
                operation,
            } => {
                let current = next.get(pathname)?;
                let edited = operation.apply_to_string(current).ok()?;
                next.insert(pathname.clone(), edited);
            }
            Self::Add { pathname, content } => {
                next.insert(pathname.clone(), content.clone());
            }
            Self::Remove { pathname } => {
                next.remove(pathname)?;
            }
            Self::Rename {
                pathname,
                new_pathname,
            } => {
                let content = next.remove(pathname)?;
                next.insert(new_pathname.clone(), content);
            }
            Self::Restore { .. } | Self::Seal | Self::Compact => return None,
        }
        Some(next)
    }
}

/// Percent chances for the non-edit actions; whatever is left over edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMix {
    pub add_percent: u8,
    pub remove_percent: u8,
    pub rename_percent: u8,
    pub restore_percent: u8,
    pub seal_percent: u8,
    pub compact_percent: u8,
}

impl Default for ActionMix {
    fn default() -> Self {
        Self {
            add_percent: 8,
            remove_percent: 4,
            rename_percent: 4,
            restore_percent: 5,
            seal_percent: 6,
            compact_percent: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedWriter {
    id: WriterId,
    view: Option<View>,
    files_created: u64,
}

impl SimulatedWriter {
    #[must_use]
    pub const fn new(id: WriterId) -> Self {
        Self {
            id,
            view: None,
            files_created: 0,
        }
    }

    #[must_use]
    pub const fn id(&self) -> WriterId {
        self.id
    }

    #[must_use]
    pub fn user_id(&self) -> String {
        format!("writer-{}", self.id)
    }

    #[must_use]
    pub const fn view(&self) -> Option<&View> {
        self.view.as_ref()
    }

    pub fn observe(&mut self, view: View) {
        self.view = Some(view);
    }

    /// Plan the next action against the current view; `None` without one.
    pub fn plan(&mut self, rng: &mut DeterministicRng, mix: &ActionMix) -> Option<Action> {
        let view = self.view.as_ref()?;
        let paths: Vec<&String> = view.files.keys().collect();
        let roll = rng.below(100);
        let mut threshold = 0;
        let mut within = |percent: u8| {
            threshold += usize::from(percent);
            roll < threshold
        };

        if within(mix.seal_percent) {
            return Some(Action::Seal);
        }
        if within(mix.compact_percent) {
            return Some(Action::Compact);
        }
        if within(mix.restore_percent) && view.version > 1 {
            let target = 1 + rng.next_u64() % (view.version - 1);
            return Some(Action::Restore { target });
        }
        if within(mix.add_percent) || paths.is_empty() {
            self.files_created += 1;
            return Some(Action::Add {
                pathname: format!("w{}/f{}.tex", self.id, self.files_created),
                content: random_words(rng, 3),
            });
        }
        let pathname = (*rng.pick(&paths)?).clone();
        if within(mix.remove_percent) && paths.len() > 1 {
            return Some(Action::Remove { pathname });
        }
        if within(mix.rename_percent) {
            self.files_created += 1;
            return Some(Action::Rename {
                pathname,
                new_pathname: format!("w{}/r{}.tex", self.id, self.files_created),
            });
        }
        let current = view.files.get(&pathname)?;
        Some(Action::Edit {
            operation: random_edit(rng, current.chars().count()),
            pathname,
        })
    }
}

fn random_words(rng: &mut DeterministicRng, max: usize) -> String {
    (0..=rng.below(max))
        .filter_map(|_| rng.pick(WORDS).copied())
        .collect()
}

/// One insert and one remove at random places in a text of `len` chars.
fn random_edit(rng: &mut DeterministicRng, len: usize) -> TextOperation {
    let at = rng.below(len + 1);
    let removed = rng.below((len - at).min(6) + 1);
    TextOperation::new()
        .retain(at)
        .insert(random_words(rng, 2))
        .remove(removed)
        .retain(len - at - removed)
}

#[cfg(test)]
mod tests {
    use super::{Action, ActionMix, Files, SimulatedWriter, View};
    use crate::rng::DeterministicRng;

    fn view(version: u64) -> View {
        let mut files = Files::new();
        files.insert("main.tex".into(), "hello".into());
        files.insert("refs.bib".into(), "@book{}".into());
        View { version, files }
    }

    #[test]
    fn no_plan_without_a_view() {
        let mut writer = SimulatedWriter::new(0);
        let mut rng = DeterministicRng::new(1);
        assert_eq!(writer.plan(&mut rng, &ActionMix::default()), None);
    }

    #[test]
    fn planned_file_changes_apply_to_the_view() {
        let mut writer = SimulatedWriter::new(3);
        writer.observe(view(4));
        let mut rng = DeterministicRng::new(99);
        for _ in 0..500 {
            let action = writer.plan(&mut rng, &ActionMix::default()).expect("plan");
            if action.is_file_change() {
                let files = &writer.view().expect("view").files;
                assert!(action.apply_to(files).is_some(), "{action:?}");
            }
            if let Action::Restore { target } = action {
                assert!((1..4).contains(&target));
            }
        }
    }
}
