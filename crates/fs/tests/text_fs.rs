//! Integration tests for the path-addressed core against a recording engine

mod common;

use std::fs;

use common::{
    baseline_text, mirror_text, mount, read_file, seeded_engine, write_file, Call, RecordingEngine,
    LETTERS_HEADER,
};
use engine::TableEngine;
use sql2textfs::text_fs::mirror::Presence;
use sql2textfs::text_fs::reconcile::Reconciled;
use sql2textfs::FsError;

#[test]
fn test_ensure_present_is_idempotent() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    assert_eq!(
        fs.ensure_present("/shop/letters").unwrap(),
        Presence::Materialized
    );
    let live = fs::read(fs.store().live_path("shop", "letters")).unwrap();
    let base = fs::read(fs.store().baseline_path("shop", "letters")).unwrap();

    fs.ensure_present("/shop/letters").unwrap();
    assert_eq!(fs::read(fs.store().live_path("shop", "letters")).unwrap(), live);
    assert_eq!(fs::read(fs.store().baseline_path("shop", "letters")).unwrap(), base);
    assert_eq!(live, base);
}

#[test]
fn test_read_renders_header_and_rows() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    assert_eq!(read_file(&fs, "/shop/letters"), "letter TEXT\nA\nB\nC\n");
}

#[test]
fn test_unedited_release_makes_no_calls() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    let fh = fs.open("/shop/letters", libc::O_RDWR).unwrap();
    assert_eq!(
        fs.release(fh).unwrap(),
        Some(Reconciled::Unchanged)
    );
    assert!(engine.calls().is_empty());
}

#[test]
fn test_diff_becomes_one_insert_and_one_delete() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    let outcome = write_file(&fs, "/shop/letters", "letter TEXT\nA\nC\nD\n").unwrap();
    assert_eq!(
        outcome,
        Some(Reconciled::Applied {
            inserted: 1,
            deleted: 1
        })
    );

    let calls = engine.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.contains(&Call::Insert("D".into())));
    assert!(calls.contains(&Call::Delete("B".into())));

    assert_eq!(engine.list_rows("shop", "letters").unwrap(), vec!["A", "C", "D"]);
    assert_eq!(
        mirror_text(&fs, "shop", "letters"),
        baseline_text(&fs, "shop", "letters")
    );
}

#[test]
fn test_new_file_creates_table_then_rows_in_order() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    let fh = fs
        .create("/shop/fresh", 0o644, libc::O_WRONLY)
        .unwrap();
    fs.write(fh, 0, b"schema-desc\nrow1\nrow2\n").unwrap();
    assert!(!fs.store().has_baseline("shop", "fresh"));

    let outcome = fs.release(fh).unwrap();
    assert_eq!(outcome, Some(Reconciled::Created { rows: 2 }));
    assert_eq!(
        engine.calls(),
        vec![
            Call::CreateTable {
                db: "shop".into(),
                table: "fresh".into(),
                header: "schema-desc".into()
            },
            Call::Insert("row1".into()),
            Call::Insert("row2".into()),
        ]
    );
    assert!(fs.store().has_baseline("shop", "fresh"));
    assert_eq!(
        engine.list_rows("shop", "fresh").unwrap(),
        vec!["row1", "row2"]
    );
}

#[test]
fn test_empty_new_file_fails_to_create() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    let fh = fs.create("/shop/blank", 0o644, libc::O_WRONLY).unwrap();
    let err = fs.release(fh).unwrap_err();
    assert!(matches!(err, FsError::NothingToCreate(_)));
    assert_eq!(err.errno(), libc::EIO);
    // still pending, can be fixed and retried
    assert!(fs.store().has_live("shop", "blank"));
    assert!(write_file(&fs, "/shop/blank", "a TEXT\nx\n").is_ok());
    assert_eq!(engine.list_rows("shop", "blank").unwrap(), vec!["x"]);
}

#[test]
fn test_directory_handles_reuse_smallest() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    let handles: Vec<u64> = (0..3).map(|_| fs.opendir("/").unwrap()).collect();
    assert_eq!(handles, vec![0, 1, 2]);

    fs.releasedir(1).unwrap();
    assert_eq!(fs.free_dir_handles(), vec![1]);
    assert_eq!(fs.opendir("/shop").unwrap(), 1);
    assert!(matches!(fs.releasedir(7), Err(FsError::BadHandle(7))));
}

#[test]
fn test_unlink_pending_table_stays_local() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    fs.mknod("/shop/draft", libc::S_IFREG as u32 | 0o644, 0)
        .unwrap();
    fs.unlink("/shop/draft").unwrap();

    assert!(!fs.store().has_live("shop", "draft"));
    assert!(engine.calls().is_empty());
}

#[test]
fn test_unlink_committed_table_drops_it() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    fs.getattr("/shop/letters").unwrap();
    assert!(fs.store().has_baseline("shop", "letters"));

    fs.unlink("/shop/letters").unwrap();
    assert_eq!(
        engine.calls(),
        vec![Call::DropTable {
            db: "shop".into(),
            table: "letters".into()
        }]
    );
    assert!(!fs.store().has_live("shop", "letters"));
    assert!(!fs.store().has_baseline("shop", "letters"));
    assert!(engine.list_tables("shop").unwrap().is_empty());
}

#[test]
fn test_open_file_is_not_reloaded() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    let fh = fs.open("/shop/letters", libc::O_RDONLY).unwrap();
    assert_eq!(fs.open_count("/shop/letters"), 1);

    // change the table behind the mount's back
    let info = engine.table_info("shop", "letters").unwrap();
    engine.inner.insert_row(&info, "Z").unwrap();

    assert_eq!(fs.ensure_present("/shop/letters").unwrap(), Presence::Kept);
    assert_eq!(mirror_text(&fs, "shop", "letters"), "letter TEXT\nA\nB\nC\n");

    fs.release(fh).unwrap();
    assert_eq!(fs.open_count("/shop/letters"), 0);
    assert_eq!(
        fs.ensure_present("/shop/letters").unwrap(),
        Presence::Reloaded
    );
    assert_eq!(
        mirror_text(&fs, "shop", "letters"),
        "letter TEXT\nA\nB\nC\nZ\n"
    );
}

#[test]
fn test_reload_disabled_keeps_mirror() {
    let engine = seeded_engine();
    let fs = mount(&engine, false);
    fs.ensure_present("/shop/letters").unwrap();

    let info = engine.table_info("shop", "letters").unwrap();
    engine.inner.insert_row(&info, "Z").unwrap();

    assert_eq!(fs.ensure_present("/shop/letters").unwrap(), Presence::Kept);
    assert_eq!(mirror_text(&fs, "shop", "letters"), "letter TEXT\nA\nB\nC\n");
}

#[test]
fn test_failed_insert_stops_and_reloads() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);
    engine.fail_insert_of("D");

    let err = write_file(&fs, "/shop/letters", "letter TEXT\nA\nC\nD\nE\n").unwrap_err();
    assert!(matches!(err, FsError::Engine(_)));
    assert_eq!(err.errno(), libc::EIO);

    // the delete went through, the failing insert stopped the rest
    assert_eq!(
        engine.calls(),
        vec![Call::Delete("B".into()), Call::Insert("D".into())]
    );
    assert_eq!(engine.list_rows("shop", "letters").unwrap(), vec!["A", "C"]);

    // mirror and baseline show what the engine actually holds
    let expected = format!("{LETTERS_HEADER}\nA\nC\n");
    assert_eq!(mirror_text(&fs, "shop", "letters"), expected);
    assert_eq!(baseline_text(&fs, "shop", "letters"), expected);
}

#[test]
fn test_header_edit_is_rejected() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    let err = write_file(&fs, "/shop/letters", "letter TEXT, n INT\nA\nB\nC\n").unwrap_err();
    assert!(matches!(err, FsError::SchemaEdit(_)));
    assert!(engine.calls().is_empty());
    assert_eq!(mirror_text(&fs, "shop", "letters"), "letter TEXT\nA\nB\nC\n");
}

#[test]
fn test_mkdir_and_rmdir_database() {
    let engine = RecordingEngine::new();
    let fs = mount(&engine, true);

    fs.mkdir("/inventory").unwrap();
    assert!(fs.store().db_dir("inventory").is_dir());
    assert_eq!(engine.list_databases().unwrap(), vec!["inventory"]);

    fs.rmdir("/inventory").unwrap();
    assert!(!fs.store().db_dir("inventory").exists());
    assert!(engine.list_databases().unwrap().is_empty());
    assert_eq!(
        engine.calls(),
        vec![
            Call::CreateDatabase("inventory".into()),
            Call::DropDatabase("inventory".into())
        ]
    );
}

#[test]
fn test_nested_mkdir_not_permitted() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    let err = fs.mkdir("/shop/sub").unwrap_err();
    assert_eq!(err.errno(), libc::EPERM);
    assert!(engine.calls().is_empty());
}

#[test]
fn test_rmdir_restores_directory_on_engine_failure() {
    let engine = RecordingEngine::new();
    let fs = mount(&engine, true);
    fs.mkdir("/inventory").unwrap();
    engine.fail_drop_database();

    assert!(fs.rmdir("/inventory").is_err());
    assert!(fs.store().db_dir("inventory").is_dir());
    assert_eq!(engine.list_databases().unwrap(), vec!["inventory"]);
}

#[test]
fn test_rmdir_database_with_tables() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    // nothing materialized, so the local directory is empty
    let err = fs.rmdir("/shop").unwrap_err();
    assert_eq!(err.errno(), libc::ENOTEMPTY);
    assert!(fs.store().db_dir("shop").is_dir());
}

#[test]
fn test_rename_committed_table() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    fs.rename("/shop/letters", "/shop/alphabet").unwrap();
    assert_eq!(
        engine.calls(),
        vec![Call::Rename {
            db: "shop".into(),
            from: "letters".into(),
            to: "alphabet".into()
        }]
    );
    assert_eq!(engine.list_tables("shop").unwrap(), vec!["alphabet"]);
    assert!(fs.store().has_live("shop", "alphabet"));
    assert!(fs.store().has_baseline("shop", "alphabet"));
    assert!(!fs.store().has_live("shop", "letters"));
}

#[test]
fn test_rename_pending_table_is_local() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    let fh = fs.create("/shop/draft", 0o644, libc::O_WRONLY).unwrap();
    fs.write(fh, 0, b"a TEXT\nx\n").unwrap();
    fs.rename("/shop/draft", "/shop/final").unwrap();
    assert!(engine.calls().is_empty());
    assert_eq!(fs.open_count("/shop/final"), 1);

    fs.release(fh).unwrap();
    assert_eq!(engine.list_rows("shop", "final").unwrap(), vec!["x"]);
}

#[test]
fn test_rename_onto_existing_table_refused() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    let fh = fs.create("/shop/draft", 0o644, libc::O_WRONLY).unwrap();
    fs.write(fh, 0, b"letter TEXT\nX\n").unwrap();

    // target only known to the engine
    let err = fs.rename("/shop/draft", "/shop/letters").unwrap_err();
    assert_eq!(err.errno(), libc::EEXIST);

    // target materialized locally
    fs.getattr("/shop/letters").unwrap();
    let err = fs.rename("/shop/draft", "/shop/letters").unwrap_err();
    assert_eq!(err.errno(), libc::EEXIST);

    assert_eq!(mirror_text(&fs, "shop", "draft"), "letter TEXT\nX\n");
    assert_eq!(
        mirror_text(&fs, "shop", "letters"),
        "letter TEXT\nA\nB\nC\n"
    );
    assert_eq!(fs.open_count("/shop/draft"), 1);

    fs.release(fh).unwrap();
    assert!(engine.calls().iter().all(|c| !matches!(c, Call::Delete(_))));
    assert_eq!(engine.list_rows("shop", "letters").unwrap(), vec!["A", "B", "C"]);
    assert_eq!(engine.list_rows("shop", "draft").unwrap(), vec!["X"]);
}

#[test]
fn test_unlink_while_open_releases_handle() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    let fh = fs.open("/shop/letters", libc::O_RDWR).unwrap();
    fs.unlink("/shop/letters").unwrap();
    assert_eq!(fs.open_count("/shop/letters"), 0);

    // a new table under the same name is not touched by the old handle
    fs.mknod("/shop/letters", libc::S_IFREG as u32 | 0o644, 0)
        .unwrap();
    engine.clear_calls();

    assert_eq!(fs.release(fh).unwrap(), None);
    assert!(!fs.is_open(fh));
    assert_eq!(fs.open_count("/shop/letters"), 0);
    assert!(engine.calls().is_empty());
    assert!(!fs.store().has_baseline("shop", "letters"));

    let err = fs.release(fh).unwrap_err();
    assert_eq!(err.errno(), libc::EBADF);
}

#[test]
fn test_rename_across_databases_refused() {
    let engine = seeded_engine();
    engine.inner.create_database("other").unwrap();
    let fs = mount(&engine, true);

    let err = fs.rename("/shop/letters", "/other/letters").unwrap_err();
    assert_eq!(err.errno(), libc::EXDEV);
    let err = fs.rename("/shop", "/market").unwrap_err();
    assert_eq!(err.errno(), libc::ENOTSUP);
    assert!(engine.calls().is_empty());
}

#[test]
fn test_readdir_projection() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    let root = fs.opendir("/").unwrap();
    assert_eq!(fs.readdir("/", root).unwrap(), vec!["shop"]);
    fs.releasedir(root).unwrap();

    fs.getattr("/shop/letters").unwrap();
    fs.mknod("/shop/draft", libc::S_IFREG as u32 | 0o644, 0)
        .unwrap();

    let dir = fs.opendir("/shop").unwrap();
    let names = fs.readdir("/shop", dir).unwrap();
    assert_eq!(names, vec!["letters", "draft"]);
    assert_eq!(fs.listing(dir), Some(names));

    let err = fs.readdir("/", dir).unwrap_err();
    assert_eq!(err.errno(), libc::EBADF);

    fs.releasedir(dir).unwrap();
    assert_eq!(fs.listing(dir), None);
}

#[test]
fn test_baselines_are_hidden() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);
    fs.getattr("/shop/letters").unwrap();

    let err = fs.getattr("/shop/letters.o").unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);
    assert_eq!(
        fs.unlink("/shop/letters.o").unwrap_err().errno(),
        libc::EPERM
    );
}

#[test]
fn test_getattr_missing_table() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    let err = fs.getattr("/shop/nope").unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);
    assert!(!fs.store().has_live("shop", "nope"));
}

#[test]
fn test_open_requires_table_path() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    assert_eq!(fs.open("/shop", libc::O_RDONLY).unwrap_err().errno(), libc::ENOENT);
    assert_eq!(fs.open("/", libc::O_RDONLY).unwrap_err().errno(), libc::ENOENT);
}

#[test]
fn test_partial_writes_and_reads() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);

    let fh = fs.open("/shop/letters", libc::O_RDWR).unwrap();
    assert_eq!(fs.read(fh, 12, 1).unwrap(), b"A");
    // append a row at the end of the file
    let len = fs.getattr("/shop/letters").unwrap().len();
    fs.write(fh, len, b"Q\n").unwrap();
    fs.fsync(fh, true).unwrap();
    fs.flush(fh).unwrap();
    fs.release(fh).unwrap();

    assert_eq!(
        engine.list_rows("shop", "letters").unwrap(),
        vec!["A", "B", "C", "Q"]
    );
    assert!(matches!(fs.read(fh, 0, 1), Err(FsError::BadHandle(_))));
}

#[test]
fn test_truncate_and_times_pass_through() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);
    fs.getattr("/shop/letters").unwrap();

    fs.truncate("/shop/letters", 12).unwrap();
    assert_eq!(mirror_text(&fs, "shop", "letters"), "letter TEXT\n");

    let when = std::time::UNIX_EPOCH + std::time::Duration::from_secs(86_400);
    fs.utimens("/shop/letters", Some(when), Some(when)).unwrap();
    assert_eq!(fs.getattr("/shop/letters").unwrap().modified().unwrap(), when);

    fs.access("/shop/letters", libc::R_OK).unwrap();
    assert!(fs.statfs("/").unwrap().bsize > 0);
}

#[test]
fn test_destroy_removes_mirror() {
    let engine = seeded_engine();
    let fs = mount(&engine, true);
    fs.getattr("/shop/letters").unwrap();

    let root = fs.mirror_root().to_path_buf();
    assert!(root.join("shop/letters").is_file());

    fs.destroy();
    assert!(!root.exists());
}
