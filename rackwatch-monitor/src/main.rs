/**
 * RACKWATCH MONITOR - rack temperature watchdog
 *
 * Polls the DHT11 on a fixed period, shows the reading on the LCD, keeps a
 * history in SQLite, forwards it to InfluxDB and, the first time the
 * temperature goes above the threshold, shuts the remote hosts down.
 *
 * CONFIG: rackwatch.yaml (or $RACKWATCH_CONFIG), .env honoured.
 * SIGNALS: SIGINT/SIGTERM stop, SIGHUP reloads interval and threshold.
 */

use rackwatch_monitor::config::{config_path, load_config};
use rackwatch_monitor::{app, logging};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let path = config_path();
    let loaded = load_config(&path).await;
    logging::init_logging(&loaded.settings.log)?;

    if loaded.created {
        info!(path = %path.display(), "no config file, wrote the defaults");
    }
    for warning in &loaded.warnings {
        warn!(path = %path.display(), "{warning}");
    }
    info!(
        path = %path.display(),
        interval_seconds = loaded.settings.poll.interval_seconds,
        threshold = loaded.settings.poll.threshold,
        "rackwatch starting"
    );

    app::run(loaded.settings, path).await
}
