use anyhow::Result;
use chrono::{DateTime, Local};
use log::{LevelFilter, Record};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

// Logging setup for the terminal client. Stdout belongs to the conversation, so
// log lines go to a file when one is given and to stderr otherwise.

pub struct SimpleLogger {
    log_file: std::fs::File,
}

impl SimpleLogger {
    pub fn new(log_file_path: &Path) -> Result<Self> {
        let log_file = OpenOptions::new().create(true).append(true).open(log_file_path)?;
        Ok(SimpleLogger { log_file })
    }
}

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now: DateTime<Local> = Local::now();
            // Source file and line make timer races much easier to follow
            let log_message = format!(
                "[{}] {} [{}:{}] {}\n",
                now.format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            );

            if let Ok(mut file) = self.log_file.try_clone() {
                let _ = file.write_all(log_message.as_bytes());
            }
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.log_file.try_clone() {
            let _ = file.flush();
        }
    }
}

pub fn setup_logging(log_file: Option<&Path>, level: LevelFilter) -> Result<()> {
    match log_file {
        Some(path) => {
            let logger = SimpleLogger::new(path)?;
            log::set_boxed_logger(Box::new(logger)).map(|()| log::set_max_level(level))?;
        }
        None => {
            env_logger::Builder::new()
                .filter_level(level)
                .parse_default_env()
                .try_init()?;
        }
    }

    log::info!("Logging initialized at level: {}", level);
    log::info!("{} version {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    Ok(())
}
