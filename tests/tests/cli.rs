use tempfile::tempdir;

use crate::burrow_test::io_util::burrow_command;

#[test]
fn tree_prints_local_project() {
    let dir = tempdir().unwrap();
    let project = dir.path().join("app");
    fs_err::create_dir_all(project.join("src")).unwrap();
    fs_err::create_dir_all(project.join(".git")).unwrap();
    fs_err::write(project.join("package.json"), "{}").unwrap();
    fs_err::write(project.join("src/index.ts"), "export {};").unwrap();
    fs_err::write(project.join(".git/HEAD"), "ref: refs/heads/main").unwrap();

    let output = burrow_command(&["--color", "never", "tree", "app"], dir.path());
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(
        output.status.success(),
        "burrow tree failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        stdout,
        "src/\n  index.ts\npackage.json\n1 directory, 2 files\n"
    );
}

#[test]
fn tree_of_empty_workspace() {
    let dir = tempdir().unwrap();

    let output = burrow_command(&["--color", "never", "tree", "empty"], dir.path());

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "0 directories, 0 files\n"
    );
}

#[test]
fn missing_project_fails() {
    let dir = tempdir().unwrap();

    let output = burrow_command(&["--color", "never", "tree", "nope"], dir.path());

    assert!(!output.status.success());
}

#[test]
fn bad_config_fails() {
    let dir = tempdir().unwrap();
    fs_err::write(dir.path().join("burrow.json5"), "{ treeDebounceMs: 0 }").unwrap();

    let output = burrow_command(
        &["--color", "never", "tree", "empty", "--config", "burrow.json5"],
        dir.path(),
    );

    assert!(!output.status.success());
}
