use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{CoreError, ErrorKind};
use crate::metrics::Metrics;
use crate::stream::protocol::{self, Envelope, Inbound, SessionIds};
use crate::stream::transport::{Connector, TransportSink, TransportSource};
use crate::types::{AudioFrame, ControlEvent};

/// Streaming parameters lifted out of the full config so tests can build
/// a client without touching audio or motor settings.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub voice_id: String,
    pub system_prompt: String,
    pub capture_rate: u32,
    pub playback_rate: u32,
    pub send_queue: usize,
    pub reconnect_attempts: u32,
    pub reconnect_backoff: Duration,
    /// How many out-of-order frames the resequencer holds back before it
    /// gives up on a gap.
    pub reorder_window: usize,
}

impl StreamConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            voice_id: cfg.voice_id.clone(),
            system_prompt: cfg.system_prompt.clone(),
            capture_rate: cfg.capture_rate,
            playback_rate: cfg.playback_rate,
            send_queue: cfg.send_queue,
            reconnect_attempts: cfg.reconnect_attempts,
            reconnect_backoff: cfg.reconnect_backoff,
            reorder_window: 8,
        }
    }
}

/// What the client hands to the rest of the system.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Control(ControlEvent),
    /// Response playback audio, delivered in sequence order.
    Audio(AudioFrame),
}

#[derive(Debug)]
enum Outbound {
    Event(Envelope),
    /// Graceful close: send the closing choreography and stop.
    Close,
}

/// Bounded capture queue. When full, the oldest frame is dropped and
/// counted; the freshest audio always gets through.
struct FrameQueue {
    inner: Mutex<VecDeque<AudioFrame>>,
    notify: Notify,
    capacity: usize,
    metrics: Arc<Metrics>,
}

impl FrameQueue {
    fn new(capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            metrics,
        }
    }

    async fn push(&self, frame: AudioFrame) {
        let mut q = self.inner.lock().await;
        if q.len() >= self.capacity {
            q.pop_front();
            self.metrics.frame_dropped();
        }
        q.push_back(frame);
        drop(q);
        self.notify.notify_one();
    }

    async fn pop(&self) -> AudioFrame {
        loop {
            if let Some(frame) = self.inner.lock().await.pop_front() {
                return frame;
            }
            self.notify.notified().await;
        }
    }
}

/// Restores sequence order on inbound playback frames. Frames arriving
/// ahead of a gap are held back up to `window` deep; once the window
/// fills, the gap is declared lost and playback skips forward. Frames
/// older than the last released sequence are dropped as late duplicates.
pub struct Resequencer {
    next: u64,
    window: usize,
    pending: BTreeMap<u64, Vec<i16>>,
    late_drops: u64,
}

impl Resequencer {
    pub fn new(window: usize) -> Self {
        Self {
            next: 0,
            window,
            pending: BTreeMap::new(),
            late_drops: 0,
        }
    }

    /// Feed one frame; returns everything now releasable in order.
    pub fn accept(&mut self, seq: u64, pcm: Vec<i16>) -> Vec<(u64, Vec<i16>)> {
        if seq < self.next {
            self.late_drops += 1;
            return Vec::new();
        }
        self.pending.insert(seq, pcm);

        // Skip a gap once the hold-back window is exhausted.
        if self.pending.len() > self.window {
            if let Some((&lowest, _)) = self.pending.iter().next() {
                if lowest > self.next {
                    self.next = lowest;
                }
            }
        }

        let mut out = Vec::new();
        while let Some(pcm) = self.pending.remove(&self.next) {
            out.push((self.next, pcm));
            self.next += 1;
        }
        out
    }

    pub fn late_drops(&self) -> u64 {
        self.late_drops
    }
}

/// Bidirectional streaming client for one session.
///
/// `open` connects, sends the preamble, and spawns the exchange task.
/// Capture audio goes in through `send_audio`; decoded playback frames
/// and control events come out of the channel handed to `open`. One
/// reconnect cycle is attempted on connection loss; beyond that the
/// failure is surfaced as a control event and the task ends.
pub struct StreamClient {
    ids: SessionIds,
    out_tx: mpsc::Sender<Outbound>,
    queue: Arc<FrameQueue>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StreamClient {
    pub async fn open(
        cfg: StreamConfig,
        connector: Arc<dyn Connector>,
        events: mpsc::Sender<StreamEvent>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, CoreError> {
        let ids = SessionIds::generate();
        let (mut sink, source) = connector.connect().await?;
        for env in protocol::preamble(
            &ids,
            &cfg.voice_id,
            &cfg.system_prompt,
            cfg.capture_rate,
            cfg.playback_rate,
        ) {
            sink.send(env.to_json()).await?;
        }
        info!(prompt = %ids.prompt_name, "session opened");
        let _ = events.send(StreamEvent::Control(ControlEvent::SessionStarted)).await;

        let (out_tx, out_rx) = mpsc::channel(cfg.send_queue);
        let queue = Arc::new(FrameQueue::new(cfg.send_queue, metrics.clone()));
        let token = CancellationToken::new();

        let reseq = Resequencer::new(cfg.reorder_window);
        let task = ExchangeTask {
            cfg,
            ids: ids.clone(),
            connector,
            events,
            metrics,
            queue: queue.clone(),
            out_rx,
            token: token.clone(),
            reseq,
            out_seq: 0,
            play_seq: 0,
        };
        let handle = tokio::spawn(task.exchange_loop(sink, source));

        Ok(Self {
            ids,
            out_tx,
            queue,
            token,
            task: Some(handle),
        })
    }

    pub fn ids(&self) -> &SessionIds {
        &self.ids
    }

    pub async fn send_audio(&self, frame: AudioFrame) {
        self.queue.push(frame).await;
    }

    /// Barge-in: ask the endpoint to stop the current turn.
    pub async fn interrupt(&self) {
        let env = protocol::interrupt(&self.ids);
        if self.out_tx.send(Outbound::Event(env)).await.is_err() {
            debug!("interrupt after exchange ended");
        }
    }

    /// Graceful close: closing choreography, then wait briefly for the
    /// exchange task before cancelling it outright.
    pub async fn close(mut self) {
        let _ = self.out_tx.send(Outbound::Close).await;
        if let Some(handle) = self.task.take() {
            if timeout(Duration::from_secs(2), handle).await.is_err() {
                warn!("exchange task did not finish, cancelling");
                self.token.cancel();
            }
        }
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct ExchangeTask {
    cfg: StreamConfig,
    ids: SessionIds,
    connector: Arc<dyn Connector>,
    events: mpsc::Sender<StreamEvent>,
    metrics: Arc<Metrics>,
    queue: Arc<FrameQueue>,
    out_rx: mpsc::Receiver<Outbound>,
    token: CancellationToken,
    reseq: Resequencer,
    out_seq: u64,
    play_seq: u64,
}

/// Select arms only pick the work item; all I/O happens after the select
/// so no branch holds a borrow across an await on another.
enum Step {
    Out(Outbound),
    Frame(AudioFrame),
    In(String),
    Lost(Option<CoreError>),
    Stop,
}

impl ExchangeTask {
    async fn exchange_loop(
        mut self,
        mut sink: Box<dyn TransportSink>,
        mut source: Box<dyn TransportSource>,
    ) {
        loop {
            let step = tokio::select! {
                biased;
                _ = self.token.cancelled() => Step::Stop,
                out = self.out_rx.recv() => match out {
                    Some(out) => Step::Out(out),
                    None => Step::Stop,
                },
                inbound = source.next() => match inbound {
                    Some(Ok(text)) => Step::In(text),
                    Some(Err(e)) => Step::Lost(Some(e)),
                    None => Step::Lost(None),
                },
                frame = self.queue.pop() => Step::Frame(frame),
            };

            match step {
                Step::Out(Outbound::Event(env)) => {
                    if let Err(e) = sink.send(env.to_json()).await {
                        warn!("send failed: {e}");
                        match self.recover().await {
                            Some(pair) => (sink, source) = pair,
                            None => break,
                        }
                    }
                }
                Step::Out(Outbound::Close) => {
                    for env in protocol::closing(&self.ids) {
                        if sink.send(env.to_json()).await.is_err() {
                            break;
                        }
                    }
                    let _ = sink.close().await;
                    let _ = self
                        .events
                        .send(StreamEvent::Control(ControlEvent::SessionEnded))
                        .await;
                    break;
                }
                Step::Frame(frame) => {
                    let env = protocol::audio_input(&self.ids, &frame.pcm, self.out_seq);
                    self.out_seq += 1;
                    if let Err(e) = sink.send(env.to_json()).await {
                        warn!("audio send failed: {e}");
                        match self.recover().await {
                            Some(pair) => (sink, source) = pair,
                            None => break,
                        }
                    }
                }
                Step::In(text) => {
                    self.handle_inbound(&text).await;
                }
                Step::Lost(err) => {
                    if let Some(e) = err {
                        warn!("exchange lost: {e}");
                    } else {
                        info!("endpoint closed the exchange");
                    }
                    match self.recover().await {
                        Some(pair) => (sink, source) = pair,
                        None => break,
                    }
                }
                Step::Stop => break,
            }
        }
        debug!("exchange task finished");
    }

    /// One reconnect cycle: backoff, connect, resend the preamble. On
    /// failure the loss is surfaced and the exchange ends.
    async fn recover(
        &mut self,
    ) -> Option<(Box<dyn TransportSink>, Box<dyn TransportSource>)> {
        for attempt in 1..=self.cfg.reconnect_attempts {
            sleep(self.cfg.reconnect_backoff).await;
            if self.token.is_cancelled() {
                return None;
            }
            info!(attempt, "reconnecting");
            match self.connector.connect().await {
                Ok((mut sink, source)) => {
                    let preamble = protocol::preamble(
                        &self.ids,
                        &self.cfg.voice_id,
                        &self.cfg.system_prompt,
                        self.cfg.capture_rate,
                        self.cfg.playback_rate,
                    );
                    let mut ok = true;
                    for env in preamble {
                        if sink.send(env.to_json()).await.is_err() {
                            ok = false;
                            break;
                        }
                    }
                    if ok {
                        info!("reconnected");
                        return Some((sink, source));
                    }
                }
                Err(e) => warn!(attempt, "reconnect failed: {e}"),
            }
        }
        let _ = self
            .events
            .send(StreamEvent::Control(ControlEvent::Error(
                ErrorKind::ConnectionFailed,
                "exchange lost and reconnect exhausted".to_string(),
            )))
            .await;
        None
    }

    async fn handle_inbound(&mut self, text: &str) {
        let env: Envelope = match serde_json::from_str(text) {
            Ok(env) => env,
            Err(e) => {
                self.metrics.protocol_skip();
                warn!("unparseable event skipped: {e}");
                return;
            }
        };
        match protocol::classify(env.event) {
            // Same treatment as unparseable JSON: a bad payload inside a
            // well-formed event is skipped, not surfaced to the machine.
            Inbound::Control(ControlEvent::Error(ErrorKind::ProtocolError, msg)) => {
                self.metrics.protocol_skip();
                warn!("protocol event skipped: {msg}");
            }
            Inbound::Control(event) => {
                let _ = self.events.send(StreamEvent::Control(event)).await;
            }
            Inbound::Audio { pcm, sequence } => {
                // Unsequenced frames bypass reordering.
                let releasable = match sequence {
                    Some(seq) => {
                        let before = self.reseq.late_drops();
                        let out = self.reseq.accept(seq, pcm);
                        if self.reseq.late_drops() > before {
                            self.metrics.frame_late();
                        }
                        out
                    }
                    None => {
                        let seq = self.play_seq;
                        vec![(seq, pcm)]
                    }
                };
                for (seq, pcm) in releasable {
                    self.play_seq = seq + 1;
                    let frame = AudioFrame::new(pcm, self.cfg.playback_rate, seq);
                    let _ = self.events.send(StreamEvent::Audio(frame)).await;
                }
            }
            Inbound::Text(content) => {
                info!(%content, "transcript");
            }
            Inbound::Ignore => {}
        }
    }
}
