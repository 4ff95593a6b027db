use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chatterbass::audio::{playback, BargeInDetector};
use chatterbass::motion::MotionEngine;
use chatterbass::session::{DriverChannels, SessionDriver};
use chatterbass::stream::WsConnector;
use chatterbass::{audio, buttons, hw, Config, Metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Config::from_env();
    info!(demo = cfg.demo_mode, endpoint = %cfg.endpoint_url, "starting up");

    let metrics = Arc::new(Metrics::default());
    let actuator = hw::select_actuator(&cfg)
        .await
        .context("motor actuator init")?;

    let (control_tx, control_rx) = mpsc::channel(cfg.event_queue);
    let (capture_tx, capture_rx) = mpsc::channel(cfg.event_queue);
    let (motion_tx, motion_rx) = mpsc::channel(cfg.event_queue);
    let (speaking_tx, speaking_rx) = watch::channel(false);
    let (vad_tx, vad_rx) = std::sync::mpsc::channel();

    // Capture guard must outlive the driver; dropping it stops the device.
    let _capture = audio::start_capture(&cfg, capture_tx, vad_tx).context("audio capture init")?;
    let playback = playback::start_playback(&cfg).context("audio playback init")?;

    BargeInDetector::new(vad_rx, speaking_rx, control_tx.clone(), cfg.capture_rate).spawn();
    buttons::spawn_stdin_buttons(control_tx.clone());
    buttons::spawn_ctrl_c(control_tx.clone());

    let engine = MotionEngine::new(&cfg, motion_rx, actuator.clone(), metrics.clone());
    let engine_task = tokio::spawn(engine.run());

    let connector = Arc::new(WsConnector::new(
        cfg.endpoint_url.clone(),
        cfg.auth_token.clone(),
    ));
    let driver = SessionDriver::new(
        cfg,
        connector,
        metrics.clone(),
        playback,
        DriverChannels {
            control_rx,
            control_tx,
            capture_rx,
            motion_tx,
            speaking_tx,
        },
    );
    driver.run().await;

    // The driver sends the motion engine its shutdown command; wait for
    // the final neutral before exiting.
    let _ = engine_task.await;
    info!("goodbye");
    Ok(())
}
