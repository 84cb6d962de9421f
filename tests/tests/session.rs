//! End-to-end tests of sessions over an in-memory sandbox: everything goes
//! through sandbox operations and the session's own change queue.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use pretty_assertions::assert_eq;
use sandbox::{MountTree, PortAction, PortEvent, Sandbox};

use libburrow::{SessionConfig, SessionError};

use crate::burrow_test::{
    io_util::wait_until,
    session_util::{test_config, TestSession},
};

fn project() -> MountTree {
    let mut tree = MountTree::new();
    tree.insert_file("package.json", r#"{ "name": "app" }"#);
    let src = tree.insert_dir("src");
    src.insert_file("index.ts", "import './util';");
    src.insert_dir("util").insert_file("math.ts", "export const one = 1;");
    tree
}

#[test]
fn mounting_fills_tree_and_models() {
    let test = TestSession::new();

    test.session.mount(&project()).unwrap();
    test.settle();

    assert_eq!(
        test.tree_paths(),
        vec![
            "package.json",
            "src",
            "src/index.ts",
            "src/util",
            "src/util/math.ts",
        ]
    );
    assert_eq!(
        test.models.paths(),
        vec!["package.json", "src/index.ts", "src/util/math.ts"]
    );
    assert_eq!(
        test.models.content("src/util/math.ts").unwrap(),
        "export const one = 1;"
    );
}

#[test]
fn root_sync_is_repeatable() {
    let test = TestSession::new();
    test.session.mount(&project()).unwrap();
    test.settle();

    let before = test.session.tree().snapshot();
    assert_eq!(test.session.sync_root().unwrap(), 2);
    test.settle();

    assert_eq!(test.session.tree().snapshot(), before);
    assert_eq!(test.models.len(), 3);
}

#[test]
fn package_install_feeds_extra_libs_only() {
    let test = TestSession::new();
    test.session.mount(&project()).unwrap();
    test.settle();

    let sandbox = test.sandbox();
    sandbox.create_dir_all("node_modules/left-pad/lib").unwrap();
    sandbox
        .write("node_modules/left-pad/package.json", "{}")
        .unwrap();
    sandbox
        .write(
            "node_modules/left-pad/index.d.ts",
            "export default function leftPad(s: string): string;",
        )
        .unwrap();
    sandbox
        .write("node_modules/left-pad/lib/util.d.ts", "export {};")
        .unwrap();
    sandbox
        .write("node_modules/left-pad/index.js", "module.exports = {};")
        .unwrap();
    test.settle();

    assert!(!test.session.tree().exists("node_modules"));
    assert!(test
        .models
        .paths()
        .iter()
        .all(|path| !path.starts_with("node_modules")));

    let libs = test.session.extra_libs().libs();
    let lib_paths: Vec<&str> = libs.iter().map(|lib| lib.file_path.as_str()).collect();
    assert_eq!(
        lib_paths,
        vec![
            "file:///node_modules/left-pad/index.d.ts",
            "file:///node_modules/left-pad/lib/util.d.ts",
        ]
    );

    assert!(wait_until(Duration::from_secs(5), || {
        test.sink.last().map(|libs| libs.len()) == Some(2)
    }));

    sandbox.remove("node_modules/left-pad").unwrap();
    test.settle();

    assert!(test.session.extra_libs().is_empty());
    assert!(wait_until(Duration::from_secs(5), || {
        test.sink.last().map(|libs| libs.is_empty()) == Some(true)
    }));
}

#[test]
fn moving_a_workspace_package_moves_its_declarations() {
    let test = TestSession::new();

    let mut tree = MountTree::new();
    let web = tree.insert_dir("web");
    web.insert_file("main.ts", "import 'ui';");
    web.insert_dir("node_modules")
        .insert_dir("ui")
        .insert_file("index.d.ts", "export declare const ui: string;");
    test.session.mount(&tree).unwrap();
    test.settle();

    let lib_paths = |test: &TestSession| -> Vec<String> {
        test.session
            .extra_libs()
            .libs()
            .into_iter()
            .map(|lib| lib.file_path)
            .collect()
    };
    assert_eq!(
        lib_paths(&test),
        vec!["file:///web/node_modules/ui/index.d.ts"]
    );

    test.session.rename_path("web", "site").unwrap();
    test.settle();

    assert_eq!(
        lib_paths(&test),
        vec!["file:///site/node_modules/ui/index.d.ts"]
    );
    assert_eq!(test.tree_paths(), vec!["site", "site/main.ts"]);

    test.session.remove_path("site").unwrap();
    test.settle();

    assert!(test.session.extra_libs().is_empty());
    assert!(test.tree_paths().is_empty());
}

#[test]
fn branch_switch_burst_converges() {
    let test = TestSession::new();
    test.session.mount(&project()).unwrap();
    test.settle();

    let sandbox = test.sandbox();
    sandbox.remove("src/util").unwrap();
    sandbox.rename("src/index.ts", "src/main.ts").unwrap();
    sandbox.create_dir_all("src/components").unwrap();
    sandbox
        .write("src/components/button.ts", "export class Button {}")
        .unwrap();
    sandbox.write("package.json", r#"{ "name": "app2" }"#).unwrap();
    test.settle();

    assert_eq!(
        test.tree_paths(),
        vec![
            "package.json",
            "src",
            "src/components",
            "src/components/button.ts",
            "src/main.ts",
        ]
    );
    assert_eq!(
        test.models.paths(),
        vec!["package.json", "src/components/button.ts", "src/main.ts"]
    );
    assert_eq!(
        test.models.content("package.json").unwrap(),
        r#"{ "name": "app2" }"#
    );
}

#[test]
fn tree_listeners_see_bursts_once() {
    let config = SessionConfig {
        tree_debounce_ms: 150,
        ..test_config()
    };
    let test = TestSession::with_sandbox(Arc::new(Sandbox::new_in_memory()), config);
    let notifications = Arc::new(AtomicUsize::new(0));

    {
        let notifications = Arc::clone(&notifications);
        test.session.tree().subscribe(move || {
            notifications.fetch_add(1, Ordering::SeqCst);
        });
    }

    test.session.mount(&project()).unwrap();
    test.settle();

    assert!(wait_until(Duration::from_secs(5), || {
        notifications.load(Ordering::SeqCst) >= 1
    }));
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(notifications.load(Ordering::SeqCst), 1);
}

#[test]
fn preview_ports_follow_sandbox() {
    let test = TestSession::new();

    test.sandbox().announce_port(PortEvent {
        port: 5173,
        action: PortAction::Open,
        url: "http://localhost:5173".to_owned(),
    });
    assert_eq!(test.session.ports().urls(), vec!["http://localhost:5173"]);

    test.sandbox().announce_port(PortEvent {
        port: 5173,
        action: PortAction::Close,
        url: "http://localhost:5173".to_owned(),
    });
    assert!(test.session.ports().urls().is_empty());
}

#[test]
fn teardown_leaves_nothing_behind() {
    let test = TestSession::new();
    test.session.mount(&project()).unwrap();
    test.settle();

    test.sandbox().announce_port(PortEvent {
        port: 3000,
        action: PortAction::Open,
        url: "http://localhost:3000".to_owned(),
    });

    let sandbox = Arc::clone(test.sandbox());
    test.session.teardown();

    assert!(test.session.is_torn_down());
    assert!(sandbox.is_torn_down());
    assert!(test.session.tree().snapshot().is_empty());
    assert!(test.session.ports().urls().is_empty());
    assert!(test.models.is_empty());
    assert!(test.session.extra_libs().is_empty());
    assert!(test.sink.push_count() >= 1);

    assert!(matches!(
        test.session.create_file("late.ts", ""),
        Err(SessionError::TornDown)
    ));
    assert!(sandbox.read("package.json").is_err());

    // Idempotent.
    test.session.teardown();
}
