use std::{
    path::Path,
    process::{Command, Output},
    thread,
    time::{Duration, Instant},
};

pub static BURROW_PATH: &str = env!("CARGO_BIN_EXE_burrow");

/// Runs the `burrow` binary with file logging disabled.
pub fn burrow_command(args: &[&str], working_dir: &Path) -> Output {
    Command::new(BURROW_PATH)
        .args(args)
        .current_dir(working_dir)
        .env("BURROW_NO_FILE_LOG", "1")
        .output()
        .expect("Couldn't run burrow")
}

/// Polls `condition` until it holds or `timeout` passes. Returns whether it
/// held.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;

    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(20));
    }
}
