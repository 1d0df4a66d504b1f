use crate::config::Config;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{fmt, EnvFilter};

/// Overrides `log_level` entirely when set.
const LOG_ENV: &str = "FLIGHTBOARD_LOG";
/// HTTP internals only matter when the feed misbehaves.
const QUIET_DEPS: &str = "hyper=warn,hyper_util=warn,reqwest=warn";

/// Where diagnostics end up. Stdout is never a sink; it carries board updates.
#[derive(Debug)]
enum LogSink {
    File(File),
    Stderr,
}

impl LogSink {
    fn open(path: &str) -> Self {
        match open_log_file(path) {
            Some(file) => LogSink::File(file),
            None => LogSink::Stderr,
        }
    }

    fn into_writer(self) -> (NonBlocking, WorkerGuard) {
        match self {
            LogSink::File(file) => tracing_appender::non_blocking(file),
            LogSink::Stderr => tracing_appender::non_blocking(io::stderr()),
        }
    }
}

fn filter_directives(log_level: &str) -> String {
    let level = match log_level.trim() {
        "" => "info",
        other => other,
    };
    format!("{level},{QUIET_DEPS}")
}

/// Installs the global subscriber when `log_enabled`. Keep the guard alive for
/// the life of the process or buffered lines are lost.
pub fn init(config: &Config) -> Option<WorkerGuard> {
    if !config.log_enabled {
        return None;
    }

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(filter_directives(&config.log_level)))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let (writer, guard) = LogSink::open(config.log_file.trim()).into_writer();

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
    Some(guard)
}

fn open_log_file(path: &str) -> Option<File> {
    if path.is_empty() {
        return None;
    }
    let path = Path::new(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let _ = fs::create_dir_all(parent);
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}

#[cfg(test)]
mod tests {
    use super::{filter_directives, init, LogSink};
    use crate::config::Config;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn disabled_logging_installs_nothing() {
        let cfg = Config::default();
        assert!(init(&cfg).is_none());
    }

    #[test]
    fn level_defaults_to_info_and_quiets_http() {
        assert_eq!(
            filter_directives("  "),
            "info,hyper=warn,hyper_util=warn,reqwest=warn"
        );
        assert!(filter_directives("flightboard_follow=debug").starts_with("flightboard_follow=debug,"));
    }

    #[test]
    fn sink_falls_back_to_stderr() {
        assert!(matches!(LogSink::open(""), LogSink::Stderr));

        let mut dir = std::env::temp_dir();
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        dir.push(format!("flightboard-log-test-{suffix}"));
        let path = dir.join("nested").join("follow.log");
        assert!(matches!(
            LogSink::open(path.to_str().unwrap()),
            LogSink::File(_)
        ));
        assert!(path.exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
