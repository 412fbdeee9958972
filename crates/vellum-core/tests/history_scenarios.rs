//! End-to-end history behaviour through the `History` facade.

use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vellum_core::history::{FileRef, Origin};
use vellum_core::store::open_database;
use vellum_core::{
    Change, History, HistoryConfig, HistoryError, MemoryObjectStore, ObjectStore, Operation,
    ProjectId, TextOperation, timestamp,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(max_changes_per_chunk: u64) -> HistoryConfig {
    let mut config = HistoryConfig::default();
    config.chunking.max_changes_per_chunk = max_changes_per_chunk;
    config.retry.base_backoff_ms = 1;
    config.retry.max_attempts = 20;
    config
}

fn history(max_changes_per_chunk: u64) -> History {
    History::in_memory(config(max_changes_per_chunk)).expect("in-memory history")
}

fn add_text(history: &History, pathname: &str, text: &str) -> Operation {
    let blob = history.blobs().put_string(text).expect("put text");
    Operation::add(pathname, FileRef::from_blob(&blob))
}

fn append(history: &History, project: ProjectId, operations: Vec<Operation>) -> u64 {
    let tip = history.chunks().latest_version(project).expect("tip");
    history
        .writer()
        .persist_changes(project, tip, &[Change::new(operations, timestamp::now())])
        .expect("append")
        .version
}

fn text_at(history: &History, project: ProjectId, pathname: &str, version: u64) -> String {
    let bytes = history
        .assembler()
        .get_file_content_at(project, pathname, version)
        .expect("read")
        .unwrap_or_else(|| panic!("{pathname} missing at {version}"));
    String::from_utf8(bytes).expect("utf-8")
}

/// Replace the whole of `pathname` with `text`.
fn rewrite(history: &History, project: ProjectId, pathname: &str, text: &str) -> u64 {
    let tip = history.chunks().latest_version(project).expect("tip");
    let current = text_at(history, project, pathname, tip);
    append(
        history,
        project,
        vec![Operation::edit(pathname, TextOperation::diff(&current, text))],
    )
}

fn shared_history(path: &Path, objects: &Arc<dyn ObjectStore>) -> History {
    History::from_parts(
        open_database(path).expect("open db"),
        Arc::clone(objects),
        config(100),
    )
}

// ---------------------------------------------------------------------------
// Appending and reading
// ---------------------------------------------------------------------------

#[test]
fn sequential_edits_assemble_in_order() {
    let h = history(100);
    let project = h.create_project().expect("project");

    let v1 = append(
        &h,
        project,
        vec![
            add_text(&h, "main.tex", ""),
            Operation::edit("main.tex", TextOperation::new().insert("hello")),
        ],
    );
    let v2 = append(
        &h,
        project,
        vec![Operation::edit(
            "main.tex",
            TextOperation::new().retain(5).insert(" world"),
        )],
    );

    assert_eq!((v1, v2), (1, 2));
    assert_eq!(text_at(&h, project, "main.tex", 2), "hello world");
    assert_eq!(text_at(&h, project, "main.tex", 1), "hello");
    assert!(
        h.assembler()
            .get_file_at(project, "main.tex", 0)
            .expect("v0")
            .is_none()
    );

    let changes = h.assembler().get_changes(project, 0, 2).expect("changes");
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[1].operations[0].pathname(), "main.tex");
}

#[test]
fn reading_beyond_the_tip_is_version_not_found() {
    let h = history(100);
    let project = h.create_project().expect("project");
    append(&h, project, vec![add_text(&h, "a.tex", "a")]);

    let err = h
        .assembler()
        .get_snapshot_at(project, 2)
        .expect_err("no version 2");
    assert!(matches!(
        err,
        HistoryError::VersionNotFound {
            requested: 2,
            latest: 1
        }
    ));
}

#[test]
fn edits_that_do_not_fit_are_rejected_before_storage() {
    let h = history(100);
    let project = h.create_project().expect("project");
    append(&h, project, vec![add_text(&h, "a.tex", "abc")]);

    let bad = Change::new(
        vec![Operation::edit("a.tex", TextOperation::new().retain(10))],
        timestamp::now(),
    );
    let err = h
        .writer()
        .persist_changes(project, 1, &[bad])
        .expect_err("length mismatch");
    assert!(matches!(err, HistoryError::Operation(_)));
    assert_eq!(h.chunks().latest_version(project).expect("tip"), 1);
}

#[test]
fn stale_append_conflicts_then_succeeds_after_reload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("history.db");
    let objects: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    let first = shared_history(&path, &objects);
    let second = shared_history(&path, &objects);

    let project = first.create_project().expect("project");
    append(&first, project, vec![add_text(&first, "main.tex", "")]);

    // Both writers observe version 1.
    let seen_by_first = first.chunks().latest_version(project).expect("tip");
    let seen_by_second = second.chunks().latest_version(project).expect("tip");
    assert_eq!((seen_by_first, seen_by_second), (1, 1));

    let insert_a = Change::new(
        vec![Operation::edit("main.tex", TextOperation::new().insert("A"))],
        timestamp::now(),
    );
    first
        .writer()
        .persist_changes(project, seen_by_first, &[insert_a])
        .expect("first wins");

    let insert_b = |base: usize| {
        Change::new(
            vec![Operation::edit(
                "main.tex",
                TextOperation::new().retain(base).insert("B"),
            )],
            timestamp::now(),
        )
    };
    let err = second
        .writer()
        .persist_changes(project, seen_by_second, &[insert_b(0)])
        .expect_err("second is stale");
    assert!(matches!(
        err,
        HistoryError::VersionConflict {
            expected: 1,
            actual: 2
        }
    ));
    assert!(err.is_retryable());

    let (tip, snapshot) = second.assembler().get_latest_snapshot(project).expect("reload");
    let base = snapshot
        .text("main.tex", &second.blobs())
        .expect("text")
        .char_len();
    let outcome = second
        .writer()
        .persist_changes(project, tip, &[insert_b(base)])
        .expect("retry");

    assert_eq!(outcome.version, 3);
    assert_eq!(text_at(&first, project, "main.tex", 3), "AB");
    let open = first.chunks().load_latest(project).expect("tip chunk");
    assert_eq!(open.changes.len(), 3);
    first.chunks().validate_partition(project).expect("partition");
}

#[test]
fn concurrent_writers_retry_until_every_change_lands() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("history.db");
    let objects: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    let setup = shared_history(&path, &objects);
    let project = setup.create_project().expect("project");
    append(&setup, project, vec![add_text(&setup, "log.txt", "")]);

    const PER_WRITER: usize = 10;
    let writers: Vec<_> = ["x", "y"]
        .into_iter()
        .map(|mark| {
            let path = path.clone();
            let objects = Arc::clone(&objects);
            thread::spawn(move || {
                let h = shared_history(&path, &objects);
                for _ in 0..PER_WRITER {
                    h.writer()
                        .append_with_retry(project, |files, _| {
                            let len = files.text("log.txt", &h.blobs())?.char_len();
                            Ok(vec![Change::new(
                                vec![Operation::edit(
                                    "log.txt",
                                    TextOperation::new().retain(len).insert(mark),
                                )],
                                timestamp::now(),
                            )])
                        })
                        .expect("append with retry");
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().expect("writer thread");
    }

    let latest = setup.chunks().latest_version(project).expect("tip");
    assert_eq!(latest, 1 + 2 * PER_WRITER as u64);
    let text = text_at(&setup, project, "log.txt", latest);
    assert_eq!(text.matches('x').count(), PER_WRITER);
    assert_eq!(text.matches('y').count(), PER_WRITER);
    setup.chunks().validate_partition(project).expect("partition");
}

// ---------------------------------------------------------------------------
// Sealing and compaction
// ---------------------------------------------------------------------------

#[test]
fn append_after_seal_targets_the_new_open_chunk() {
    let h = history(100);
    let project = h.create_project().expect("project");
    append(&h, project, vec![add_text(&h, "main.tex", "one")]);
    rewrite(&h, project, "main.tex", "two");

    let sealed = h.writer().seal(project).expect("seal").expect("non-empty");
    let closed_before = h.chunks().load_chunk(sealed.closed_id).expect("closed");
    assert!(closed_before.record.closed);

    let v3 = rewrite(&h, project, "main.tex", "three");
    assert_eq!(v3, 3);

    let closed_after = h.chunks().load_chunk(sealed.closed_id).expect("closed");
    assert!(closed_after.record.closed);
    assert_eq!(closed_after.record, closed_before.record);
    assert_eq!(closed_after.changes, closed_before.changes);

    let open = h.chunks().load_latest(project).expect("open");
    assert_eq!(open.record.id, sealed.open_id);
    assert_eq!((open.record.start_version, open.record.end_version), (2, 3));
    assert_eq!(text_at(&h, project, "main.tex", 2), "two");
    assert_eq!(text_at(&h, project, "main.tex", 3), "three");
}

#[test]
fn full_chunks_are_sealed_automatically() {
    let h = history(3);
    let project = h.create_project().expect("project");
    append(&h, project, vec![add_text(&h, "a.tex", "")]);
    for n in 0..6 {
        rewrite(&h, project, "a.tex", &format!("rev {n}"));
    }

    let chunks = h.chunks().list_chunks(project).expect("chunks");
    let spans: Vec<(u64, u64, bool)> = chunks
        .iter()
        .map(|c| (c.start_version, c.end_version, c.closed))
        .collect();
    assert_eq!(spans, vec![(0, 3, true), (3, 6, true), (6, 7, false)]);
    for version in 2..=7 {
        assert_eq!(
            text_at(&h, project, "a.tex", version),
            format!("rev {}", version - 2)
        );
    }
}

#[test]
fn random_appends_and_seals_keep_the_partition() {
    let h = history(5);
    let project = h.create_project().expect("project");
    append(&h, project, vec![add_text(&h, "doc.tex", "")]);

    let mut rng = StdRng::seed_from_u64(42);
    let mut model = vec![String::new()];
    for _ in 0..60 {
        let current = model.last().cloned().unwrap_or_default();
        let len = current.chars().count();
        let at = rng.gen_range(0..=len);
        let op = TextOperation::new()
            .retain(at)
            .insert(format!("{}", rng.gen_range(0..10)))
            .retain(len - at);
        let next = op.apply_to_string(&current).expect("apply");
        append(&h, project, vec![Operation::edit("doc.tex", op)]);
        model.push(next);

        if rng.gen_bool(0.15) {
            h.writer().seal(project).expect("seal");
        }
        h.chunks().validate_partition(project).expect("partition");
    }

    for (offset, expected) in model.iter().enumerate() {
        let version = offset as u64 + 1;
        assert_eq!(&text_at(&h, project, "doc.tex", version), expected);
    }
}

#[test]
fn compaction_preserves_every_version() {
    let h = history(2);
    let project = h.create_project().expect("project");
    append(&h, project, vec![add_text(&h, "a.tex", "")]);
    for n in 1..10 {
        rewrite(&h, project, "a.tex", &format!("rev {n}"));
    }
    let before: Vec<String> = (1..=10)
        .map(|v| text_at(&h, project, "a.tex", v))
        .collect();

    let report = h.compact(project).expect("compact").expect("run selected");
    assert_eq!(report.retired.len(), 5);
    assert_eq!(report.changes_merged, 10);
    assert_eq!(
        (report.promoted.start_version, report.promoted.end_version),
        (0, 10)
    );
    assert_eq!(h.chunks().list_old_chunks(project).expect("old").len(), 5);
    h.chunks().validate_partition(project).expect("partition");

    let after: Vec<String> = (1..=10)
        .map(|v| text_at(&h, project, "a.tex", v))
        .collect();
    assert_eq!(after, before);
    assert!(h.compact(project).expect("second pass").is_none());
}

// ---------------------------------------------------------------------------
// Restore
// ---------------------------------------------------------------------------

#[test]
fn restore_file_reproduces_target_content() {
    let h = history(100);
    let project = h.create_project().expect("project");
    append(&h, project, vec![add_text(&h, "main.tex", "hello")]);
    rewrite(&h, project, "main.tex", "hello world");
    rewrite(&h, project, "main.tex", "hello brave world");
    rewrite(&h, project, "main.tex", "goodbye brave world");
    rewrite(&h, project, "main.tex", "goodbye");
    let current = text_at(&h, project, "main.tex", 5);

    let change = h
        .restorer()
        .restore_file(project, "main.tex", 3, Some("user-7"))
        .expect("restore");

    let [Operation::TextEdit { pathname, operation }] = change.operations.as_slice() else {
        panic!("expected one text edit, got {:?}", change.operations);
    };
    assert_eq!(pathname, "main.tex");
    assert_eq!(
        operation.apply_to_string(&current).expect("apply"),
        "hello brave world"
    );

    let origin = change.origin.as_ref().expect("origin");
    assert_eq!(origin.kind(), "file-restore");
    assert_eq!(
        origin,
        &Origin::restore_file(3, "main.tex", h.chunks().version_timestamp(project, 3).expect("ts"))
    );
    assert_eq!(change.v2_authors, vec![Some("user-7".to_string())]);

    assert_eq!(text_at(&h, project, "main.tex", 6), "hello brave world");
    let stored = h.assembler().get_changes(project, 5, 6).expect("stored");
    assert_eq!(stored[0].origin, change.origin);
}

#[test]
fn restore_origin_matches_stored_change_after_sub_millisecond_edits() {
    let h = history(100);
    let project = h.create_project().expect("project");
    let fine = timestamp::parse("2024-03-01T10:00:00.123456789Z").expect("ts");
    let edits = [
        add_text(&h, "main.tex", "first"),
        Operation::edit("main.tex", TextOperation::new().retain(5).insert("!")),
    ];
    for (tip, operation) in (0..).zip(edits) {
        h.writer()
            .persist_changes(project, tip, &[Change::new(vec![operation], fine)])
            .expect("append");
    }

    let change = h
        .restorer()
        .restore_project(project, 1, None)
        .expect("restore");
    let origin = change.origin.clone().expect("origin");
    assert_eq!(
        origin.to_raw()["timestamp"],
        serde_json::json!("2024-03-01T10:00:00.123Z")
    );
    let stored = h.assembler().get_changes(project, 2, 3).expect("stored");
    assert_eq!(stored[0].origin, Some(origin));
}

#[test]
fn restore_file_brings_back_a_deleted_file() {
    let h = history(100);
    let project = h.create_project().expect("project");
    append(&h, project, vec![add_text(&h, "refs.bib", "@book{x}")]);
    append(&h, project, vec![Operation::remove("refs.bib")]);

    h.restorer()
        .restore_file(project, "refs.bib", 1, None)
        .expect("restore");
    assert_eq!(text_at(&h, project, "refs.bib", 3), "@book{x}");

    let err = h
        .restorer()
        .restore_file(project, "missing.tex", 1, None)
        .expect_err("never existed");
    assert!(matches!(err, HistoryError::InvalidChange(_)));
}

#[test]
fn restore_project_resets_every_file() {
    let h = history(100);
    let project = h.create_project().expect("project");
    append(
        &h,
        project,
        vec![add_text(&h, "a.tex", "alpha"), add_text(&h, "b.tex", "beta")],
    );
    rewrite(&h, project, "a.tex", "alpha two");
    append(&h, project, vec![Operation::remove("b.tex")]);
    append(&h, project, vec![add_text(&h, "c.tex", "gamma")]);
    let image = h.blobs().put(&[0x89, b'P', b'N', b'G', 0]).expect("binary");
    append(
        &h,
        project,
        vec![Operation::add("fig.png", FileRef::from_blob(&image))],
    );

    let change = h
        .restorer()
        .restore_project(project, 1, Some("user-3"))
        .expect("restore");
    assert_eq!(change.origin.as_ref().map(Origin::kind), Some("project-restore"));

    let tip = h.chunks().latest_version(project).expect("tip");
    assert_eq!(tip, 6);
    let restored = h.assembler().export_full_content(project, tip).expect("export");
    let original = h.assembler().export_full_content(project, 1).expect("export");
    assert_eq!(restored, original);
}

#[test]
fn restoring_the_current_state_still_records_provenance() {
    let h = history(100);
    let project = h.create_project().expect("project");
    append(&h, project, vec![add_text(&h, "a.tex", "same")]);

    let change = h
        .restorer()
        .restore_project(project, 1, None)
        .expect("restore");
    assert!(change.operations.is_empty());
    assert_eq!(h.chunks().latest_version(project).expect("tip"), 2);
    assert_eq!(text_at(&h, project, "a.tex", 2), "same");
}

// ---------------------------------------------------------------------------
// Export and blobs
// ---------------------------------------------------------------------------

#[test]
fn zip_export_contains_every_file() {
    let h = history(100);
    let project = h.create_project().expect("project");
    append(
        &h,
        project,
        vec![
            add_text(&h, "main.tex", "\\documentclass{article}"),
            add_text(&h, "chapters/one.tex", "Once"),
        ],
    );

    let mut buf = Cursor::new(Vec::new());
    let written = h
        .assembler()
        .export_zip(project, 1, &mut buf)
        .expect("export");
    assert_eq!(written, 2);

    let mut archive = zip::ZipArchive::new(Cursor::new(buf.into_inner())).expect("archive");
    assert_eq!(archive.len(), 2);
    let mut content = String::new();
    archive
        .by_name("chapters/one.tex")
        .expect("entry")
        .read_to_string(&mut content)
        .expect("read");
    assert_eq!(content, "Once");
}

#[test]
fn identical_content_is_stored_once() {
    let conn = vellum_core::store::open_in_memory().expect("db");
    let objects = MemoryObjectStore::new();
    let blobs = vellum_core::BlobStore::new(&conn, &objects);

    let first = blobs.put_string("shared preamble").expect("put");
    let second = blobs.put_string("shared preamble").expect("put");
    assert_eq!(first, second);
    assert_eq!(objects.len(), 1);
    assert_eq!(blobs.get_string(&first.hash).expect("get"), "shared preamble");
}

#[test]
fn changes_referencing_unknown_blobs_are_refused() {
    let h = history(100);
    let project = h.create_project().expect("project");
    let phantom = vellum_core::blob::Blob::describe(b"never stored");
    let change = Change::new(
        vec![Operation::add("ghost.tex", FileRef::from_blob(&phantom))],
        timestamp::now(),
    );

    let err = h
        .chunks()
        .append_to_pending(project, 0, &[change])
        .expect_err("blob missing");
    assert!(matches!(err, HistoryError::MissingBlob { .. }));
    assert_eq!(h.chunks().latest_version(project).expect("tip"), 0);
}

#[test]
fn origins_survive_the_wire_form() {
    let restored = Origin::restore_project(
        12,
        timestamp::parse("2024-03-01T10:00:00.000Z").expect("ts"),
    );
    let raw = restored.to_raw();
    assert_eq!(raw["kind"], "project-restore");
    assert_eq!(Origin::from_raw(Some(&raw)), Some(restored));

    let future = serde_json::json!({ "kind": "ai-suggestion", "model": "x" });
    assert_eq!(
        Origin::from_raw(Some(&future)),
        Some(Origin::plain("ai-suggestion"))
    );
    assert_eq!(Origin::from_raw(None), None);
}
