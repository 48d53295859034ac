/* Copyright (c) 2026 The taskd Authors
 *
 * SPDX-License-Identifier: MIT
 */

//! File-backed sinks behind the `log` facade. Regular records land in
//! `taskd.log`, errors in `error.log` with an `[ERROR]` prefix; both are
//! append-only, one record per line, stamped `[DD.MM.YYYY HH:MM:SS]`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Log directory used when the configuration does not name one.
pub const DEFAULT_LOGS_DIR: &str = "logs";

const LOG_FILE: &str = "taskd.log";
const ERROR_FILE: &str = "error.log";

struct FileLogger {
    level: LevelFilter,
    sink: Mutex<File>,
    errors: Mutex<File>,
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let stamp = time::strftime("%d.%m.%Y %H:%M:%S", &time::now()).unwrap_or_default();
        let result = if record.level() == Level::Error {
            writeln!(
                self.errors.lock().unwrap(),
                "[{}] [ERROR] {}",
                stamp,
                record.args()
            )
        } else {
            writeln!(self.sink.lock().unwrap(), "[{}] {}", stamp, record.args())
        };
        // A full disk must not take the scheduler down with it.
        let _ = result;
    }

    fn flush(&self) {
        let _ = self.sink.lock().unwrap().flush();
        let _ = self.errors.lock().unwrap().flush();
    }
}

/// Installs the global file logger, creating the log directory if it does
/// not exist. A second call fails: the `log` facade accepts one logger per
/// process.
pub fn init(dir: &Path, level: LevelFilter) -> io::Result<()> {
    fs::create_dir_all(dir)?;

    let logger = FileLogger {
        level,
        sink: Mutex::new(open_sink(&dir.join(LOG_FILE))?),
        errors: Mutex::new(open_sink(&dir.join(ERROR_FILE))?),
    };

    log::set_boxed_logger(Box::new(logger))
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;
    log::set_max_level(level);
    Ok(())
}

fn open_sink(path: &Path) -> io::Result<File> {
    OpenOptions::new().append(true).create(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sinks_are_created_under_the_log_dir() {
        let dir = std::env::temp_dir().join(format!("taskd_logs_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);

        // init() may only run once per process, so drive the sink directly.
        fs::create_dir_all(&dir).unwrap();
        let logger = FileLogger {
            level: LevelFilter::Info,
            sink: Mutex::new(open_sink(&dir.join(LOG_FILE)).unwrap()),
            errors: Mutex::new(open_sink(&dir.join(ERROR_FILE)).unwrap()),
        };

        logger.log(
            &Record::builder()
                .args(format_args!("queue drained"))
                .level(Level::Info)
                .build(),
        );
        logger.log(
            &Record::builder()
                .args(format_args!("dequeue failed"))
                .level(Level::Error)
                .build(),
        );
        logger.flush();

        let normal = fs::read_to_string(dir.join(LOG_FILE)).unwrap();
        assert!(normal.contains("] queue drained"));
        assert!(normal.starts_with('['));

        let errors = fs::read_to_string(dir.join(ERROR_FILE)).unwrap();
        assert!(errors.contains("[ERROR] dequeue failed"));

        let _ = fs::remove_dir_all(&dir);
    }
}
