use anyhow::{anyhow, Result};
use config::LogOptions;
use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const CRATES: [&str; 4] = ["boxgen", "template", "subscription", "config"];

#[derive(Clone)]
struct TracingWriter {
    file_rotate: Arc<Mutex<FileRotate<AppendCount>>>,
}

impl TracingWriter {
    fn new(file_rotate: Arc<Mutex<FileRotate<AppendCount>>>) -> Self {
        TracingWriter { file_rotate }
    }

    fn with_file<T>(
        &self,
        f: impl FnOnce(&mut FileRotate<AppendCount>) -> io::Result<T>,
    ) -> io::Result<T> {
        let mut guard = self
            .file_rotate
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))?;
        f(&mut guard)
    }
}

impl io::Write for TracingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_file(|file| file.flush())
    }
}

fn rotating_file(path: impl AsRef<Path>, lines: usize, files: usize) -> FileRotate<AppendCount> {
    FileRotate::new(
        path,
        AppendCount::new(files),
        ContentLimit::Lines(lines),
        Compression::None,
        #[cfg(unix)]
        None,
    )
}

fn env_filter(level: Option<&str>) -> Result<EnvFilter> {
    let mut filter = EnvFilter::new("warn");
    for (name, default) in CRATES.iter().zip(["info", "debug", "info", "info"]) {
        let directive = format!("{name}={}", level.unwrap_or(default));
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

pub fn setup_logger(log_path: Option<&str>, options: Option<&LogOptions>) -> Result<()> {
    if options.is_some_and(|it| it.disabled) {
        return Ok(());
    }
    let env_filter = env_filter(options.and_then(|it| it.level.as_deref()))?;

    if let Some(log_path) = log_path {
        if let Some(path) = PathBuf::from(log_path).parent() {
            std::fs::create_dir_all(path)?;
        }
        let logger = Arc::new(Mutex::new(rotating_file(log_path, 100_000, 20)));
        let my_subscriber = FmtSubscriber::builder()
            .with_env_filter(env_filter)
            .with_ansi(false)
            .with_writer(move || TracingWriter::new(logger.clone()))
            .finish();
        tracing::subscriber::set_global_default(my_subscriber)
            .map_err(|e| anyhow!("setting tracing default failed: {e}"))?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .compact()
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| anyhow!("setting tracing default failed: {e}"))?;
    }
    Ok(())
}
