use std::{
    io::{self, IsTerminal, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    fmt::{self, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::cli::ColorChoice;

/// Compressed logs older than this are deleted.
const LOG_RETENTION_DAYS: u64 = 7;

/// Keeps the file log writer alive. Dropping it flushes any buffered lines.
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Default location for file logs, inside the user's local data directory.
pub fn default_log_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("burrow").join("logs"))
}

fn console_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "info,libburrow=debug,sandbox=debug",
        2 => "info,libburrow=trace,sandbox=trace",
        _ => "trace",
    }
}

/// Installs the global subscriber: a console layer on stderr, and a daily
/// rolling file layer when `log_dir` is given. Records from the `log` crate
/// are forwarded to it.
pub fn init_logging(
    verbosity: u8,
    color: ColorChoice,
    log_dir: Option<&Path>,
    file_log_level: LevelFilter,
    command_name: &str,
) -> LogGuard {
    if let Err(err) = tracing_log::LogTracer::init() {
        eprintln!("Warning: could not forward log records to tracing: {err}");
    }

    let console_env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_filter(verbosity)));

    let use_ansi = match color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => io::stderr().is_terminal(),
    };

    let console_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(use_ansi)
        .without_time()
        .with_target(false)
        .with_thread_names(false)
        .with_level(true)
        .with_filter(console_env_filter);

    let mut file_guard: Option<tracing_appender::non_blocking::WorkerGuard> = None;

    let file_layer = match log_dir {
        Some(log_dir) if file_log_level != LevelFilter::OFF => {
            match create_file_writer(log_dir, command_name) {
                Ok(file_appender) => {
                    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                    file_guard = Some(guard);

                    let layer = fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_timer(UtcTime::rfc_3339())
                        .with_target(true)
                        .with_thread_names(true)
                        .with_level(true)
                        .with_filter(file_log_level);

                    Some(layer)
                }
                Err(e) => {
                    eprintln!(
                        "Warning: could not set up file logging in {}: {e}",
                        log_dir.display()
                    );
                    None
                }
            }
        }
        _ => None,
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
    {
        eprintln!("Warning: could not install logger: {err}");
    }

    LogGuard {
        _file_guard: file_guard,
    }
}

fn create_file_writer(
    log_dir: &Path,
    command_name: &str,
) -> anyhow::Result<tracing_appender::rolling::RollingFileAppender> {
    fs_err::create_dir_all(log_dir)?;
    compress_old_logs(log_dir, command_name);

    let appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(command_name)
        .filename_suffix("log")
        .build(log_dir)?;

    Ok(appender)
}

fn days_since_epoch(time: SystemTime) -> Option<u64> {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .ok()
        .map(|since_epoch| since_epoch.as_secs() / 86400)
}

/// Gzips this command's logs from previous days and deletes compressed logs
/// past the retention window. Best effort: failures leave files as they are.
fn compress_old_logs(log_dir: &Path, command_name: &str) {
    let today = days_since_epoch(SystemTime::now()).unwrap_or(0);

    let entries = match fs_err::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_owned(),
            None => continue,
        };

        let modified_day = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(days_since_epoch);

        if file_name.ends_with(".log.gz") {
            if let Some(day) = modified_day {
                if today.saturating_sub(day) > LOG_RETENTION_DAYS {
                    let _ = fs_err::remove_file(&path);
                }
            }
            continue;
        }

        if !file_name.ends_with(".log") || !file_name.starts_with(command_name) {
            continue;
        }

        if modified_day.unwrap_or(today) >= today {
            continue;
        }

        if let Err(err) = compress_file(&path) {
            eprintln!("Warning: could not compress {}: {err}", path.display());
        }
    }
}

fn compress_file(path: &Path) -> io::Result<()> {
    let gz_path = path.with_extension("log.gz");
    let input = fs_err::read(path)?;

    match write_gz(&gz_path, &input) {
        Ok(()) => fs_err::remove_file(path),
        Err(err) => {
            let _ = fs_err::remove_file(&gz_path);
            Err(err)
        }
    }
}

fn write_gz(gz_path: &Path, input: &[u8]) -> io::Result<()> {
    let gz_file = fs_err::File::create(gz_path)?;
    let mut encoder = flate2::write::GzEncoder::new(gz_file, flate2::Compression::default());
    encoder.write_all(input)?;
    encoder.finish()?;
    Ok(())
}
