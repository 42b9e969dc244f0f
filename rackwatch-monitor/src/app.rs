//! Wiring and process lifecycle.
//!
//! Sinks and the remote shutdown backend are decided once, here. Anything
//! enabled but unavailable is reported a single time and left out. After
//! that two tasks run: the poll loop and the HTTP server. Either a signal
//! or the shutdown campaign stops both.

use anyhow::Context;
use rackwatch_core::{
    DisplaySink, LoopExit, PollConfig, PollLoop, SensorSource, ShutdownCoordinator, SinkSet,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{self, ConfigError, Settings};
use crate::display::Jhd1802;
use crate::hosts::build_host_manager;
use crate::http::{build_router, AppState};
use crate::iio::IioDht;
use crate::store::SqliteStore;
use crate::telemetry::InfluxSink;

/// Everything `run` needs, built but not started.
pub struct Monitor {
    pub poll: PollLoop,
    pub state: AppState,
    pub config_tx: watch::Sender<PollConfig>,
}

pub async fn build(settings: &Settings) -> anyhow::Result<Monitor> {
    let device = IioDht::new(&settings.sensor.iio_device);
    if !device.is_present().await {
        warn!(
            device = %device.dir().display(),
            "no IIO temperature channel found, every tick will report ERROR until it appears"
        );
    }
    let sensor = Arc::new(SensorSource::new(device, settings.sensor_timeout()));

    let sinks = build_sinks(settings).await;
    let coordinator = Arc::new(build_coordinator(settings).await);

    let api_key = match &settings.web.api_key_file {
        Some(path) => match config::read_secret(path).await {
            Ok(key) => Some(Arc::from(key)),
            Err(e) => {
                warn!(error = %e, "api key unavailable, POST /override is unprotected");
                None
            }
        },
        None => None,
    };

    let (config_tx, config_rx) = watch::channel(settings.poll_config());
    let poll = PollLoop::new(Arc::clone(&sensor), sinks, Arc::clone(&coordinator), config_rx.clone());

    let state = AppState {
        sensor,
        latest: poll.latest(),
        health: poll.sink_health(),
        coordinator,
        config: config_rx,
        api_key,
        started: Instant::now(),
    };

    Ok(Monitor { poll, state, config_tx })
}

async fn build_sinks(settings: &Settings) -> SinkSet {
    let mut sinks = SinkSet::new();

    if settings.database.enabled {
        sinks.enroll("store", SqliteStore::open(&settings.database.path).await);
    }

    if settings.display.enabled {
        let bus = settings.display.i2c_bus.clone();
        let address = settings.display.address;
        let lcd = tokio::task::spawn_blocking(move || Jhd1802::open(&bus, address))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|opened| opened.map_err(anyhow::Error::from));
        sinks.enroll("display", lcd.map(DisplaySink::new));
    }

    if settings.telemetry.enabled {
        let influx = match config::read_secret(&settings.telemetry.token_file).await {
            Ok(token) => InfluxSink::new(&settings.telemetry, token).map_err(anyhow::Error::from),
            Err(e) => Err(anyhow::Error::from(e)),
        };
        sinks.enroll("telemetry", influx);
    }

    sinks
}

async fn build_coordinator(settings: &Settings) -> ShutdownCoordinator {
    if !settings.shutdown.enabled {
        return ShutdownCoordinator::disabled();
    }
    match build_host_manager(&settings.shutdown).await {
        Ok(manager) => {
            info!(backend = manager.backend(), hosts = ?settings.shutdown.hosts, "remote shutdown armed");
            ShutdownCoordinator::new(manager, settings.shutdown.hosts.clone())
        }
        Err(e) => {
            warn!(error = %e, "remote shutdown enabled but unavailable, disabled for this run");
            ShutdownCoordinator::disabled()
        }
    }
}

/// Re-reads the config file and publishes the new poll settings. On error
/// the current ones stay in place.
pub async fn apply_reload(
    path: &Path,
    config_tx: &watch::Sender<PollConfig>,
) -> Result<PollConfig, ConfigError> {
    let settings = config::reload(path).await?;
    let poll = settings.poll_config();
    config_tx.send_replace(poll);
    Ok(poll)
}

pub async fn run(settings: Settings, config_path: PathBuf) -> anyhow::Result<()> {
    let Monitor { poll, state, config_tx } = build(&settings).await?;
    let cancel = CancellationToken::new();

    let listener = TcpListener::bind(&settings.web.bind)
        .await
        .with_context(|| format!("cannot bind {}", settings.web.bind))?;
    info!(addr = %settings.web.bind, "http api listening");

    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, build_router(state))
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
    });

    tokio::spawn(reload_on_hangup(config_path, config_tx, cancel.clone()));

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let exit = poll.run(cancel.clone()).await;
    match exit {
        LoopExit::ShutdownFired { ticks } => {
            warn!(ticks, "shutdown campaign done, stopping monitor")
        }
        LoopExit::Cancelled { ticks } => info!(ticks, "monitor stopping"),
    }
    cancel.cancel();

    match tokio::time::timeout(Duration::from_secs(5), server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "http server error"),
        Ok(Err(e)) => error!(error = %e, "http server task failed"),
        Err(_) => warn!("http server did not stop within 5s"),
    }

    info!("monitor stopped");
    Ok(())
}

/// SIGHUP re-reads the interval and threshold. Sinks are not rebuilt.
async fn reload_on_hangup(path: PathBuf, config_tx: watch::Sender<PollConfig>, cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "cannot install SIGHUP handler, config reload disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            received = hangup.recv() => {
                if received.is_none() {
                    return;
                }
                match apply_reload(&path, &config_tx).await {
                    Ok(poll) => info!(
                        interval_seconds = poll.interval.as_secs(),
                        threshold = poll.threshold,
                        "config reloaded"
                    ),
                    Err(e) => warn!(path = %path.display(), error = %e, "config reload failed, keeping current settings"),
                }
            }
        }
    }
}

/// Resolves on SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
