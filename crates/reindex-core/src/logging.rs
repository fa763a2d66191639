//! Logging setup with indicatif integration

use indicatif::MultiProgress;

fn level_style(level: log::Level, color: bool) -> (&'static str, &'static str, &'static str) {
    let label = match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    };
    if !color {
        return ("", label, "");
    }
    let ansi = match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[35m",
    };
    (ansi, label, "\x1b[0m")
}

/// Logger that prints through indicatif MultiProgress so lines don't tear the page bar.
pub struct IndicatifLogger {
    inner: env_logger::Logger,
    multi: MultiProgress,
}

impl IndicatifLogger {
    pub fn new(inner: env_logger::Logger, multi: MultiProgress) -> Self {
        Self { inner, multi }
    }
}

impl log::Log for IndicatifLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if self.inner.enabled(record.metadata()) {
            let (pre, label, post) = level_style(record.level(), true);
            let line = format!("[{pre}{label}{post}] {}", record.args());
            self.multi.suspend(|| eprintln!("{line}"));
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Default filter for the CLI verbosity flags. `RUST_LOG` still wins.
pub fn default_level(quiet: bool, debug: bool) -> &'static str {
    if debug {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    }
}

/// Initialize logging. Pass the `MultiProgress` in TTY mode.
///
/// Off a TTY every line carries a UTC timestamp for log aggregation.
pub fn init_logging(quiet: bool, debug: bool, multi: Option<&MultiProgress>) {
    use std::io::Write;

    let env = env_logger::Env::default().default_filter_or(default_level(quiet, debug));

    if let Some(multi) = multi {
        let logger = env_logger::Builder::from_env(env).build();
        let max_level = logger.filter();
        if log::set_boxed_logger(Box::new(IndicatifLogger::new(logger, multi.clone()))).is_ok() {
            log::set_max_level(max_level);
        }
    } else {
        let _ = env_logger::Builder::from_env(env)
            .format(|buf, record| {
                let (_, label, _) = level_style(record.level(), false);
                writeln!(
                    buf,
                    "{} [{label}] {}",
                    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                    record.args()
                )
            })
            .try_init();
    }
}
