use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::audio::{Cue, Playback};
use crate::config::Config;
use crate::metrics::Metrics;
use crate::motion::MotionCommand;
use crate::session::machine::{Effect, SessionMachine};
use crate::stream::client::{StreamClient, StreamConfig, StreamEvent};
use crate::stream::transport::Connector;
use crate::types::{AudioFrame, ControlEvent};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Orchestrates one process lifetime: feeds the state machine, executes
/// its effects, and routes audio between capture, the remote exchange,
/// playback, and the motion engine. The machine decides; this executes.
pub struct SessionDriver {
    cfg: Config,
    machine: SessionMachine,
    connector: Arc<dyn Connector>,
    metrics: Arc<Metrics>,

    control_rx: mpsc::Receiver<ControlEvent>,
    control_tx: mpsc::Sender<ControlEvent>,
    capture_rx: mpsc::Receiver<AudioFrame>,
    stream_rx: mpsc::Receiver<StreamEvent>,
    stream_tx: mpsc::Sender<StreamEvent>,
    motion_tx: mpsc::Sender<MotionCommand>,
    playback: Playback,
    speaking_tx: watch::Sender<bool>,

    client: Option<StreamClient>,
    greeting: Cue,
    farewell: Cue,
}

pub struct DriverChannels {
    pub control_rx: mpsc::Receiver<ControlEvent>,
    pub control_tx: mpsc::Sender<ControlEvent>,
    pub capture_rx: mpsc::Receiver<AudioFrame>,
    pub motion_tx: mpsc::Sender<MotionCommand>,
    pub speaking_tx: watch::Sender<bool>,
}

impl SessionDriver {
    pub fn new(
        cfg: Config,
        connector: Arc<dyn Connector>,
        metrics: Arc<Metrics>,
        playback: Playback,
        channels: DriverChannels,
    ) -> Self {
        let (stream_tx, stream_rx) = mpsc::channel(cfg.event_queue);
        let machine = SessionMachine::new(cfg.idle_timeout);
        let greeting = Cue::greeting(&cfg);
        let farewell = Cue::farewell(&cfg);
        Self {
            cfg,
            machine,
            connector,
            metrics,
            control_rx: channels.control_rx,
            control_tx: channels.control_tx,
            capture_rx: channels.capture_rx,
            stream_rx,
            stream_tx,
            motion_tx: channels.motion_tx,
            playback,
            speaking_tx: channels.speaking_tx,
            client: None,
            greeting,
            farewell,
        }
    }

    pub async fn run(mut self) {
        info!("session driver started");
        let mut poll = tokio::time::interval(POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = self.control_rx.recv() => {
                    match event {
                        Some(event) => self.dispatch(event).await,
                        None => break,
                    }
                }
                event = self.stream_rx.recv() => {
                    // Sender half lives in self; recv never yields None here.
                    if let Some(event) = event {
                        match event {
                            StreamEvent::Control(event) => self.dispatch(event).await,
                            StreamEvent::Audio(frame) => self.route_audio(frame).await,
                        }
                    }
                }
                frame = self.capture_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Some(client) = &self.client {
                                client.send_audio(frame).await;
                            }
                        }
                        None => break,
                    }
                }
                _ = poll.tick() => {
                    let effects = self.machine.poll(Instant::now());
                    self.apply(effects).await;
                }
            }

            if self.machine.is_shutting_down() && self.client.is_none() {
                break;
            }
        }

        // Belt and braces: no session survives the driver.
        if let Some(client) = self.client.take() {
            client.close().await;
        }
        let _ = self.motion_tx.send(MotionCommand::Shutdown).await;
        info!("session driver stopped");
    }

    async fn dispatch(&mut self, event: ControlEvent) {
        let effects = self.machine.handle(event, Instant::now());
        self.apply(effects).await;
    }

    /// Response audio feeds the speaker and the motion engine in step,
    /// but only while a turn is live; stragglers after an interrupt or
    /// turn end are dropped.
    async fn route_audio(&mut self, frame: AudioFrame) {
        if !self.machine.is_speaking() {
            return;
        }
        self.playback.enqueue(frame.clone()).await;
        if self.motion_tx.send(MotionCommand::Frame(frame)).await.is_err() {
            warn!("motion engine gone, frame not animated");
        }
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::OpenSession => self.open_session().await,
                Effect::CloseSession => self.close_session().await,
                Effect::PlayGreeting => {
                    for frame in self.greeting.frames() {
                        self.playback.enqueue(frame.clone()).await;
                    }
                }
                Effect::PlayFarewell => {
                    for frame in self.farewell.frames() {
                        self.playback.enqueue(frame.clone()).await;
                    }
                }
                Effect::FlushPlayback => self.playback.flush(),
                Effect::MotionTurnStarted => {
                    let _ = self.motion_tx.send(MotionCommand::TurnStarted).await;
                }
                Effect::MotionTurnEnded => {
                    let _ = self.motion_tx.send(MotionCommand::TurnEnded).await;
                }
                Effect::MotionInterrupt => {
                    let _ = self.motion_tx.send(MotionCommand::Interrupt).await;
                }
                Effect::SendInterrupt => {
                    if let Some(client) = &self.client {
                        client.interrupt().await;
                    }
                }
                Effect::Shutdown => {
                    info!("shutdown requested");
                }
            }
        }
        let _ = self.speaking_tx.send(self.machine.is_speaking());
    }

    async fn open_session(&mut self) {
        if self.client.is_some() {
            return;
        }
        let stream_cfg = StreamConfig::from_config(&self.cfg);
        match StreamClient::open(
            stream_cfg,
            self.connector.clone(),
            self.stream_tx.clone(),
            self.metrics.clone(),
        )
        .await
        {
            Ok(client) => {
                self.client = Some(client);
            }
            Err(e) => {
                warn!("session open failed: {e}");
                let _ = self
                    .control_tx
                    .send(ControlEvent::Error(e.kind(), e.to_string()))
                    .await;
            }
        }
    }

    async fn close_session(&mut self) {
        if let Some(client) = self.client.take() {
            client.close().await;
            self.metrics.report();
            self.metrics.reset();
        }
    }
}
