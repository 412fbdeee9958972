#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rand::Rng;
use vellum_core::ot::{
    Comment, StringFileData, TextOperation, TrackingDirective, TrackingProps, TrackingType,
};

const ALPHABET: &[char] = &['a', 'b', 'c', ' ', '\n', 'é', '中', '🦀'];
const USERS: &[&str] = &["user1", "user2"];

// ---------------------------------------------------------------------------
// proptest strategies
// ---------------------------------------------------------------------------

pub fn arb_text(max_len: usize) -> impl Strategy<Value = String> + Clone {
    prop::collection::vec(prop::sample::select(ALPHABET), 0..=max_len)
        .prop_map(|chars| chars.into_iter().collect())
}

pub fn arb_tracking() -> impl Strategy<Value = TrackingProps> + Clone {
    (
        prop::sample::select(USERS),
        prop_oneof![Just(TrackingType::Insert), Just(TrackingType::Delete)],
        0i64..1_000,
    )
        .prop_map(|(user, kind, secs)| tracking(kind, user, secs))
}

/// One builder step; lengths are clamped against the remaining base when the
/// operation is assembled.
#[derive(Debug, Clone)]
pub enum Step {
    Retain(usize, Option<TrackingProps>, bool),
    Insert(String, Option<TrackingProps>, Option<String>),
    Remove(usize),
}

pub fn arb_step() -> impl Strategy<Value = Step> + Clone {
    prop_oneof![
        (1usize..8, prop::option::weighted(0.2, arb_tracking()), prop::bool::weighted(0.1))
            .prop_map(|(len, tracking, clear)| Step::Retain(len, tracking, clear)),
        (
            arb_text(6).prop_filter("non-empty", |text| !text.is_empty()),
            prop::option::weighted(0.2, arb_tracking()),
            prop::option::weighted(0.2, prop::sample::select(&["c1", "c2"][..]).prop_map(String::from)),
        )
            .prop_map(|(text, tracking, comment)| Step::Insert(text, tracking, comment)),
        (1usize..8).prop_map(Step::Remove),
    ]
}

pub fn arb_steps() -> impl Strategy<Value = Vec<Step>> + Clone {
    prop::collection::vec(arb_step(), 0..10)
}

/// A file grown from empty text by a few rounds of generated steps, so its
/// annotations are in the shape `apply` leaves them. Threads `c1` and `c2`
/// exist from the start.
pub fn arb_file() -> impl Strategy<Value = StringFileData> {
    prop::collection::vec(arb_steps(), 1..4).prop_map(|rounds| {
        let mut file = StringFileData::new("");
        for id in ["c1", "c2"] {
            file.comments_mut().add(Comment::new(id, Vec::new(), false));
        }
        for steps in &rounds {
            build_op(file.char_len(), steps)
                .apply(&mut file)
                .expect("built for this length");
        }
        file
    })
}

/// Assemble `steps` into an operation whose base length is exactly
/// `base_len`.
pub fn build_op(base_len: usize, steps: &[Step]) -> TextOperation {
    let mut op = TextOperation::new();
    let mut remaining = base_len;
    for step in steps {
        op = match step {
            Step::Retain(len, tracking, clear) => {
                let len = (*len).min(remaining);
                remaining -= len;
                let directive = if *clear {
                    TrackingDirective::Clear
                } else {
                    tracking
                        .clone()
                        .map_or(TrackingDirective::Unspecified, TrackingDirective::from)
                };
                op.retain_with(len, directive)
            }
            Step::Insert(text, tracking, comment) => {
                op.insert_with(text.clone(), tracking.clone(), comment.iter().cloned().collect())
            }
            Step::Remove(len) => {
                let len = (*len).min(remaining);
                remaining -= len;
                op.remove(len)
            }
        };
    }
    op.retain(remaining)
}

// ---------------------------------------------------------------------------
// Seeded rand helpers
// ---------------------------------------------------------------------------

pub fn tracking(kind: TrackingType, user: &str, secs: i64) -> TrackingProps {
    let ts = Utc
        .timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .expect("valid timestamp");
    TrackingProps::new(kind, user, ts)
}

pub fn random_text(rng: &mut impl Rng, max_len: usize) -> String {
    let len = rng.gen_range(0..=max_len);
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())])
        .collect()
}

fn random_tracking(rng: &mut impl Rng) -> TrackingProps {
    let kind = if rng.gen_bool(0.5) {
        TrackingType::Insert
    } else {
        TrackingType::Delete
    };
    tracking(kind, USERS[rng.gen_range(0..USERS.len())], rng.gen_range(0..1_000))
}

/// A random operation over `base_len` characters; each step is annotated
/// with probability `annotation_rate`.
pub fn random_operation(rng: &mut impl Rng, base_len: usize, annotation_rate: f64) -> TextOperation {
    let mut op = TextOperation::new();
    let mut remaining = base_len;
    loop {
        let done = remaining == 0 && rng.gen_bool(0.3);
        if done {
            return op;
        }
        match rng.gen_range(0..3) {
            0 if remaining > 0 => {
                let len = rng.gen_range(1..=remaining.min(6));
                remaining -= len;
                let directive = if rng.gen_bool(annotation_rate) {
                    if rng.gen_bool(0.25) {
                        TrackingDirective::Clear
                    } else {
                        TrackingDirective::from(random_tracking(rng))
                    }
                } else {
                    TrackingDirective::Unspecified
                };
                op = op.retain_with(len, directive);
            }
            1 if remaining > 0 => {
                let len = rng.gen_range(1..=remaining.min(6));
                remaining -= len;
                op = op.remove(len);
            }
            _ => {
                let mut text = random_text(rng, 5);
                if text.is_empty() {
                    text.push('x');
                }
                let tracking = rng.gen_bool(annotation_rate).then(|| random_tracking(rng));
                let comments = if rng.gen_bool(annotation_rate) {
                    vec![format!("c{}", rng.gen_range(0..3))]
                } else {
                    Vec::new()
                };
                op = op.insert_with(text, tracking, comments);
            }
        }
    }
}

/// A random file, built by applying annotated operations to empty text so
/// its comments and tracked changes are well-formed. Threads `c0`..`c2`
/// exist up front so inserts naming them gain ranges.
pub fn random_file(rng: &mut impl Rng, annotation_rate: f64) -> StringFileData {
    let mut file = StringFileData::new("");
    for id in ["c0", "c1", "c2"] {
        file.comments_mut().add(Comment::new(id, Vec::new(), false));
    }
    for _ in 0..rng.gen_range(1..4) {
        let op = random_operation(rng, file.char_len(), annotation_rate);
        op.apply(&mut file).expect("generated operation fits");
    }
    file
}
