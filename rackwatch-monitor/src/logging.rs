use anyhow::Context;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogSettings;

/// Installs the global subscriber: stdout always, plus the log file when
/// `log.path` is set and can be opened. `RUST_LOG` overrides `log.level`.
pub fn init_logging(settings: &LogSettings) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level)
            .with_context(|| format!("invalid log.level {:?}", settings.level))?,
    };

    let mut unopened = None;
    let file_layer = match &settings.path {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
            Err(e) => {
                unopened = Some((path, e));
                None
            }
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .context("logging already initialised")?;

    if let Some((path, e)) = unopened {
        warn!(path = %path.display(), error = %e, "cannot open log file, logging to stdout only");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unopenable_log_file_falls_back_to_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LogSettings {
            level: "debug".into(),
            path: Some(dir.path().join("missing-dir").join("rackwatch.log")),
        };

        init_logging(&settings).unwrap();
        assert!(!dir.path().join("missing-dir").exists());
    }
}
