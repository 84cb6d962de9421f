//! Sessions over a real directory, with changes reported by the OS watcher.

use std::{sync::Arc, time::Duration};

use sandbox::{MountTree, Sandbox, StdBackend};
use tempfile::tempdir;

use crate::burrow_test::{
    io_util::wait_until,
    session_util::{test_config, TestSession},
};

const WATCH_TIMEOUT: Duration = Duration::from_secs(10);

fn disk_session(root: &std::path::Path) -> TestSession {
    let backend = StdBackend::new(root).expect("Couldn't open sandbox directory");
    TestSession::with_sandbox(Arc::new(Sandbox::new(backend)), test_config())
}

#[test]
fn mount_lands_on_disk_and_in_tree() {
    let dir = tempdir().unwrap();
    let test = disk_session(dir.path());

    let mut tree = MountTree::new();
    tree.insert_file("README.md", "# app");
    tree.insert_dir("src").insert_file("index.ts", "export {};");
    test.session.mount(&tree).unwrap();

    assert_eq!(
        fs_err::read_to_string(dir.path().join("src/index.ts")).unwrap(),
        "export {};"
    );

    assert!(wait_until(WATCH_TIMEOUT, || {
        test.session.wait_idle(WATCH_TIMEOUT);
        test.tree_paths() == vec!["README.md", "src", "src/index.ts"]
    }));
    assert_eq!(test.models.content("README.md").unwrap(), "# app");
}

#[test]
fn outside_edits_are_picked_up() {
    let dir = tempdir().unwrap();
    let test = disk_session(dir.path());
    test.session.mount(&MountTree::new()).unwrap();

    fs_err::create_dir_all(dir.path().join("lib")).unwrap();
    fs_err::write(dir.path().join("lib/a.ts"), "let a = 1;").unwrap();

    assert!(wait_until(WATCH_TIMEOUT, || {
        test.session.wait_idle(WATCH_TIMEOUT);
        test.session.tree().exists("lib/a.ts")
    }));

    fs_err::write(dir.path().join("lib/a.ts"), "let a = 2;").unwrap();
    assert!(wait_until(WATCH_TIMEOUT, || {
        test.session.wait_idle(WATCH_TIMEOUT);
        test.models.content("lib/a.ts").as_deref() == Some("let a = 2;")
    }));

    fs_err::remove_dir_all(dir.path().join("lib")).unwrap();
    assert!(wait_until(WATCH_TIMEOUT, || {
        test.session.wait_idle(WATCH_TIMEOUT);
        !test.session.tree().exists("lib")
    }));
    assert!(test.models.is_empty());
}

#[test]
fn teardown_keeps_files_on_disk() {
    let dir = tempdir().unwrap();
    let test = disk_session(dir.path());
    test.session.create_file("notes.txt", "keep me").unwrap();

    test.session.teardown();

    assert_eq!(
        fs_err::read_to_string(dir.path().join("notes.txt")).unwrap(),
        "keep me"
    );
    assert!(test.session.tree().snapshot().is_empty());
}
