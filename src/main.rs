use std::sync::Arc;

use tracing::{error, info};

use warden::config::AppConfig;
use warden::controller::Controller;
use warden::gateway::{PaperGateway, StaticMarketData};
use warden::logging::init_logging;
use warden::telemetry::TelemetryBus;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("config: {e}");
        }
        anyhow::bail!("invalid configuration ({} errors)", errors.len());
    }

    info!(
        capital = %config.account.capital,
        data_dir = %config.persistence.data_dir,
        dry_run = config.dry_run.enabled,
        "warden starting"
    );

    // Paper-only runtime: all fills loop back through the controller's
    // fill channel. A live broker adapter plugs in behind BrokerGateway.
    let telemetry = TelemetryBus::new();
    let market = Arc::new(StaticMarketData::default());

    // The gateway needs the fill channel, which the controller creates:
    // wire them up via a staging channel the gateway holds from the start.
    let (staging_tx, mut staging_rx) = tokio::sync::mpsc::channel(256);
    let gateway = Arc::new(PaperGateway::new(staging_tx));

    let (controller, handles) =
        Controller::new(config, gateway, market, telemetry.clone()).await?;

    // Forward paper fills into the control loop
    let fill_tx = handles.fill_tx.clone();
    tokio::spawn(async move {
        while let Some(fill) = staging_rx.recv().await {
            if fill_tx.send(fill).await.is_err() {
                break;
            }
        }
    });

    // Log telemetry for operators
    let mut events = telemetry.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(?event, "telemetry");
        }
    });

    let shutdown_tx = handles.shutdown_tx;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received");
            let _ = shutdown_tx.send(true);
        }
    });

    controller.run().await?;
    Ok(())
}
