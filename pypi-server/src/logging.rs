//! Tracing subscriber setup.
//!
//! Console output is always on. When [`LoggingConfig::file`] is set, every line
//! is also written to a daily-rotated file through a non-blocking writer; keep
//! the returned [`WorkerGuard`] alive until exit so buffered lines get flushed.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::MakeWriter, prelude::*, registry, util::TryInitError, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{AppError, AppResult};

const DEFAULT_LOG_FILE_NAME: &str = "pypi-server.log";

struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A, B> Write for Tee<A, B>
where
    A: Write,
    B: Write,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write_all(buf);
        let res_b = self.b.write_all(buf);
        res_a.or(res_b).map(|()| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B, W1, W2> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a, Writer = W1>,
    B: MakeWriter<'a, Writer = W2>,
    W1: Write + 'a,
    W2: Write + 'a,
{
    type Writer = Tee<W1, W2>;
    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

/// `RUST_LOG` when set, else the configured level. Runtime internals stay at `warn`.
fn build_filter(level: &str) -> AppResult<EnvFilter> {
    let base = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| AppError::Config(format!("invalid log level '{level}': {e}")))?,
    };
    let mut filter = base;
    for directive in ["tokio=warn", "hyper=warn"] {
        let directive = directive
            .parse()
            .map_err(|e| AppError::Config(format!("invalid log directive: {e}")))?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

fn split_log_path(path: &Path) -> (PathBuf, PathBuf) {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .unwrap_or_else(|| DEFAULT_LOG_FILE_NAME.as_ref());
    (dir.to_path_buf(), PathBuf::from(file_name))
}

/// Install the global subscriber described by `config`.
///
/// # Errors
///
/// Fails on an invalid level or if a global subscriber is already installed.
pub fn init_subscriber(config: &LoggingConfig) -> AppResult<Option<WorkerGuard>> {
    let subscriber = registry().with(build_filter(&config.level)?);
    let is_json = config.format == LogFormat::Json;
    let already_set = |e: TryInitError| AppError::Config(format!("logging already initialized: {e}"));

    let Some(log_path) = &config.file else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_writer(io::stdout);
        if is_json {
            subscriber.with(fmt_layer.json()).try_init().map_err(already_set)?;
        } else {
            subscriber.with(fmt_layer).try_init().map_err(already_set)?;
        }
        return Ok(None);
    };

    let (log_dir, log_filename) = split_log_path(log_path);
    let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let tee_writer = MakeTee {
        make_a: io::stdout,
        make_b: non_blocking,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(tee_writer);
    if is_json {
        subscriber.with(fmt_layer.json()).try_init().map_err(already_set)?;
    } else {
        subscriber.with(fmt_layer).try_init().map_err(already_set)?;
    }
    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tee_writes_to_both() {
        let mut tee = Tee {
            a: Vec::new(),
            b: Vec::new(),
        };
        tee.write_all(b"line\n").unwrap();
        tee.flush().unwrap();
        assert_eq!(tee.a, b"line\n");
        assert_eq!(tee.b, b"line\n");
    }

    #[test]
    fn test_split_log_path() {
        assert_eq!(
            split_log_path(Path::new("/var/log/pypi/server.log")),
            (PathBuf::from("/var/log/pypi"), PathBuf::from("server.log"))
        );
        assert_eq!(
            split_log_path(Path::new("server.log")),
            (PathBuf::from("."), PathBuf::from("server.log"))
        );
    }

    #[test]
    fn test_build_filter_rejects_garbage_level() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(build_filter("info,pypi_server=debug").is_ok());
        assert!(matches!(build_filter("pypi_server=loud"), Err(AppError::Config(_))));
    }
}
