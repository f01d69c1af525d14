//! Run log pipeline.
//!
//! Every `log::info!()` / `log::warn!()` / `log::error!()` in the harness ends
//! up in one file per run, so a failed run can be diagnosed after the fact
//! (in particular a teardown that ran from `Drop` or after a panic).
//!
//! # Architecture
//!
//! ```text
//! log::Record
//!     |
//! [RunLogCollector] (non-blocking, any thread / any runtime)
//!     | (crossbeam unbounded channel)
//!     v
//! [writer thread] -> <scope>/.test-data/logs/<ts>.log
//! ```
//!
//! The writer is a plain OS thread, not a tokio task: the teardown guard may
//! log from a helper thread with its own runtime, or with no runtime at all.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;

use crate::orchestrator::checkpoint::DATA_DIR_NAME;

/// Sub-directory of the fixture data dir holding run logs.
pub const LOGS_DIR_NAME: &str = "logs";

static GLOBAL_COLLECTOR: OnceCell<RunLogCollector> = OnceCell::new();

enum LogMessage {
    Line(String),
    /// Flush marker; the writer answers once every earlier line is on disk
    Flush(std::sync::mpsc::Sender<()>),
}

/// Log directory for a fixture scope: `<scope>/.test-data/logs`.
pub fn logs_dir_for_scope(scope: &Path) -> PathBuf {
    scope.join(DATA_DIR_NAME).join(LOGS_DIR_NAME)
}

/// `log::Log` implementation writing one file per run.
#[derive(Clone)]
pub struct RunLogCollector {
    tx: Sender<LogMessage>,
    log_path: PathBuf,
    level: LevelFilter,
}

impl RunLogCollector {
    /// Create the log directory and file and start the writer thread.
    pub fn new(log_dir: &Path, level: LevelFilter) -> Result<Self, String> {
        std::fs::create_dir_all(log_dir)
            .map_err(|e| format!("Failed to create log dir {}: {}", log_dir.display(), e))?;

        let timestamp = Local::now().format("%Y%m%d_%H%M%S%.3f");
        let log_path = log_dir.join(format!("{}.log", timestamp));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| format!("Failed to open log file {}: {}", log_path.display(), e))?;

        let (tx, rx) = unbounded::<LogMessage>();
        std::thread::Builder::new()
            .name("run-log-writer".to_string())
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    match msg {
                        LogMessage::Line(line) => write_line(&mut file, &line),
                        LogMessage::Flush(done) => {
                            let _ = file.flush();
                            let _ = file.sync_data();
                            let _ = done.send(());
                        }
                    }
                }
            })
            .map_err(|e| format!("Failed to start log writer thread: {}", e))?;

        Ok(RunLogCollector { tx, log_path, level })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Queue a raw line (never blocks).
    pub fn log_line(&self, message: impl Into<String>) {
        let _ = self.tx.send(LogMessage::Line(message.into()));
    }

    /// Block until every line queued before this call is written and synced.
    pub fn flush_and_wait(&self) -> Result<(), String> {
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(done_tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        done_rx
            .recv()
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }
}

fn write_line(file: &mut File, line: &str) {
    let formatted = format!("[{}] {}\n", Local::now().format("%H:%M:%S%.3f"), line);
    let _ = file.write_all(formatted.as_bytes());
}

impl Log for RunLogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.log_line(format!(
                "[{}] [{}] {}",
                record.level(),
                record.target(),
                record.args()
            ));
        }
    }

    fn flush(&self) {
        let _ = self.flush_and_wait();
    }
}

/// Register a collector writing under `log_dir` as the global logger.
///
/// Only the first call installs; later calls return the collector that is
/// already in place.
pub fn install(log_dir: &Path, level: LevelFilter) -> Result<&'static RunLogCollector, String> {
    let collector = GLOBAL_COLLECTOR.get_or_try_init(|| RunLogCollector::new(log_dir, level))?;
    if log::set_logger(collector).is_ok() {
        log::set_max_level(level);
    }
    Ok(collector)
}
