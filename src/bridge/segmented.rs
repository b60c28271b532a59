//! Batch generation from a text description.
//!
//! The remote has no live control channel: each request composes one fixed-length segment from
//! a prompt. Prompts are debounced, requests are tagged with a generation counter, and a segment
//! whose tag no longer matches when it lands is thrown away whole.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bridge::{AudioBridge, Backend, ChunkQueue, SynthesisBridge};
use crate::control::{ControlState, Scale};
use crate::error::BridgeError;
use crate::sampling::{mono_to_stereo, split_segment};
use crate::{PcmChunk, CHUNK_DURATION};


pub const SEGMENT_MS: u32 = 30_000;
pub const SEGMENT_CHUNKS: usize = (SEGMENT_MS as u128 / CHUNK_DURATION.as_millis()) as usize;
pub const QUEUE_CHUNKS: usize = 2 * SEGMENT_CHUNKS;

const IDLE_POLL: Duration = Duration::from_millis(100);


#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Timing {
    /// How long a changed prompt must hold still before it is committed.
    pub debounce: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}


impl Default for Timing {
    fn default() -> Self {
        Timing {
            debounce: Duration::from_secs(2),
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}


pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}


fn scale_phrase(scale: Scale) -> Option<&'static str> {
    match scale {
        Scale::Unspecified => None,
        Scale::CMajorAMinor => Some("C major, uplifting mood"),
        Scale::DMajorBMinor => Some("D major, bright joyful mood"),
        Scale::AFlatMajorFMinor => Some("F minor, melancholic mood"),
        Scale::GFlatMajorEFlatMinor => Some("E-flat minor, dark brooding mood"),
    }
}


/// Describe `controls` in one line of comma-separated phrases.
///
/// Lens prompts lead, heaviest first, followed by descriptors for tempo, density, brightness,
/// key, mutes and temperature, and a closing "instrumental".
pub fn build_prompt(controls: &ControlState) -> String {
    let mut prompts: Vec<_> = controls.prompts.iter().collect();
    prompts.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(CmpOrdering::Equal));
    let mut parts: Vec<&str> = prompts.iter().map(|p| p.text.as_str()).collect();

    parts.push(match controls.tempo {
        t if t < 80 => "slow tempo",
        t if t < 110 => "moderate tempo",
        t if t < 140 => "upbeat tempo",
        _ => "fast energetic tempo",
    });
    if controls.density < 0.3 {
        parts.push("sparse minimal arrangement");
    } else if controls.density > 0.7 {
        parts.push("dense layered arrangement");
    }
    if controls.brightness < 0.3 {
        parts.push("dark muted tones");
    } else if controls.brightness > 0.7 {
        parts.push("bright shimmering tones");
    }
    if let Some(phrase) = scale_phrase(controls.scale) {
        parts.push(phrase);
    }
    if controls.mute_bass {
        parts.push("no bass");
    }
    if controls.mute_drums {
        parts.push("no drums");
    }
    if controls.temperature > 2.0 {
        parts.push("experimental, unconventional");
    } else if controls.temperature < 0.5 {
        parts.push("structured, predictable");
    }
    parts.push("instrumental");

    parts.retain(|p| !p.is_empty());
    parts.join(", ")
}


/// Holds back prompt changes until they have been stable for a while.
///
/// Until a segment has actually been generated (since construction or `reset`), prompts commit
/// as soon as they are polled. After that every change waits out the interval, and a further
/// change restarts it.
#[derive(Debug, Clone)]
pub struct PromptDebouncer {
    interval: Duration,
    pending: Option<(String, Instant)>,
    committed: Option<String>,
    generated: bool,
}


impl PromptDebouncer {
    pub fn new(interval: Duration) -> Self {
        PromptDebouncer { interval, pending: None, committed: None, generated: false }
    }

    pub fn offer(&mut self, prompt: &str, now: Instant) {
        if self.committed.as_deref() == Some(prompt) {
            self.pending = None;
            return;
        }
        if let Some((pending, _)) = &self.pending {
            if pending == prompt {
                return;
            }
        }
        self.pending = Some((prompt.to_string(), now));
    }

    /// Commit the pending prompt if it is due, returning it.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        let due = match &self.pending {
            Some((_, since)) => !self.generated || now.duration_since(*since) >= self.interval,
            None => false,
        };
        if !due {
            return None;
        }
        let (prompt, _) = self.pending.take()?;
        self.committed = Some(prompt.clone());
        Some(prompt)
    }

    pub fn committed(&self) -> Option<&str> {
        self.committed.as_deref()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// A segment for the committed prompt was accepted; debounce from now on.
    pub fn mark_generated(&mut self) {
        self.generated = true;
    }

    pub fn reset(&mut self) {
        self.pending = None;
        self.committed = None;
        self.generated = false;
    }
}


#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "compose")]
pub struct SegmentRequest {
    pub prompt: String,
    pub music_length_ms: u32,
    pub output_format: &'static str,
    pub force_instrumental: bool,
}


impl SegmentRequest {
    pub fn new(prompt: String) -> Self {
        SegmentRequest {
            prompt,
            music_length_ms: SEGMENT_MS,
            output_format: "pcm_48000",
            force_instrumental: true,
        }
    }
}


/// Raw 16-bit little-endian PCM at 48kHz as returned by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub pcm: Vec<u8>,
    pub channels: u16,
}


impl Segment {
    pub fn into_chunks(self) -> Vec<PcmChunk> {
        if self.channels == 1 {
            split_segment(&mono_to_stereo(&self.pcm))
        } else {
            split_segment(&self.pcm)
        }
    }
}


pub trait SegmentService: Send {
    /// Compose one segment. Implementations should give up with `BridgeError::Stopped` soon
    /// after `cancel` is raised.
    fn compose(&mut self, request: &SegmentRequest, cancel: &AtomicBool) -> Result<Segment, BridgeError>;
}


pub trait SegmentConnector: Send + Sync {
    /// Verify the service is reachable and credentials are accepted.
    fn open(&self) -> Result<Box<dyn SegmentService>, BridgeError>;
}


#[derive(Debug, Default)]
pub struct SegmentStats {
    requested: AtomicU64,
    accepted: AtomicU64,
    stale: AtomicU64,
    failed: AtomicU64,
}


#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub requested: u64,
    pub accepted: u64,
    pub stale: u64,
    pub failed: u64,
}


impl SegmentStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requested: self.requested.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}


struct PromptState {
    debouncer: PromptDebouncer,
    generation: u64,
}


struct Shared {
    state: Mutex<PromptState>,
    queue: ChunkQueue,
    stats: SegmentStats,
    cancel: AtomicBool,
    timing: Timing,
}


struct Worker {
    // dropping this wakes the generation loop immediately
    _wake: Sender<()>,
    handle: JoinHandle<()>,
}


pub struct SegmentedBridge {
    connector: Box<dyn SegmentConnector>,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    downgraded: AtomicBool,
    synth: SynthesisBridge,
}


impl SegmentedBridge {
    pub fn new(connector: Box<dyn SegmentConnector>) -> Self {
        Self::with_timing(connector, Timing::default())
    }

    pub fn with_timing(connector: Box<dyn SegmentConnector>, timing: Timing) -> Self {
        SegmentedBridge {
            connector,
            shared: Arc::new(Shared {
                state: Mutex::new(PromptState {
                    debouncer: PromptDebouncer::new(timing.debounce),
                    generation: 0,
                }),
                queue: ChunkQueue::new(QUEUE_CHUNKS),
                stats: SegmentStats::default(),
                cancel: AtomicBool::new(false),
                timing,
            }),
            worker: Mutex::new(None),
            downgraded: AtomicBool::new(false),
            synth: SynthesisBridge::fallback(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.shared.state.lock().generation
    }

    pub fn committed_prompt(&self) -> Option<String> {
        self.shared.state.lock().debouncer.committed().map(str::to_string)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }
}


impl AudioBridge for SegmentedBridge {
    fn connect(&self) -> Result<(), BridgeError> {
        let service = match self.connector.open() {
            Ok(service) => service,
            Err(err) => {
                warn!(error = %err, "segment service unavailable, falling back to synthesis");
                self.downgraded.store(true, Ordering::SeqCst);
                return Ok(());
            }
        };
        self.shared.cancel.store(false, Ordering::SeqCst);
        let (wake, idle) = bounded(0);
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("segment-generation".into())
            .spawn(move || generation_loop(service, shared, idle))
            .map_err(|err| BridgeError::Unavailable(err.to_string()))?;
        *self.worker.lock() = Some(Worker { _wake: wake, handle });
        self.downgraded.store(false, Ordering::SeqCst);
        info!("segment service connected");
        Ok(())
    }

    fn update(&self, controls: &ControlState) {
        if self.is_fallback() {
            return self.synth.update(controls);
        }
        let prompt = build_prompt(controls);
        self.shared.state.lock().debouncer.offer(&prompt, Instant::now());
    }

    fn next_chunk(&self) -> Option<PcmChunk> {
        if self.is_fallback() {
            self.synth.next_chunk()
        } else {
            self.shared.queue.pop()
        }
    }

    fn reset(&self) {
        if self.is_fallback() {
            return self.synth.reset();
        }
        let mut state = self.shared.state.lock();
        state.generation += 1;
        state.debouncer.reset();
        let dropped = self.shared.queue.clear();
        debug!(generation = state.generation, dropped, "segmented bridge reset");
    }

    fn disconnect(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            self.shared.cancel.store(true, Ordering::SeqCst);
            let Worker { _wake, handle } = worker;
            drop(_wake);
            if handle.join().is_err() {
                warn!("segment generation worker panicked");
            }
            info!("segment service disconnected");
        }
    }

    fn is_fallback(&self) -> bool {
        self.downgraded.load(Ordering::SeqCst)
    }

    fn backend(&self) -> Backend {
        if self.is_fallback() {
            Backend::Synthesis
        } else {
            Backend::Segmented
        }
    }
}


impl Drop for SegmentedBridge {
    fn drop(&mut self) {
        self.disconnect();
    }
}


/// Sleep for up to `duration`, returning false if the bridge is shutting down.
fn idle(wake: &Receiver<()>, duration: Duration) -> bool {
    matches!(wake.recv_timeout(duration), Err(RecvTimeoutError::Timeout))
}


fn generation_loop(mut service: Box<dyn SegmentService>, shared: Arc<Shared>, wake: Receiver<()>) {
    let mut backoff = shared.timing.initial_backoff;

    while !shared.cancel.load(Ordering::SeqCst) {
        let job = {
            let mut state = shared.state.lock();
            let generation = state.generation;
            match state.debouncer.poll(Instant::now()) {
                Some(prompt) => Some((prompt, generation)),
                // keep playback continuous with the prompt we already have
                None if !state.debouncer.has_pending() && shared.queue.len() < SEGMENT_CHUNKS => {
                    state.debouncer.committed().map(|p| (p.to_string(), generation))
                }
                None => None,
            }
        };
        let (prompt, tag) = match job {
            Some(job) => job,
            None => {
                if !idle(&wake, IDLE_POLL) {
                    break;
                }
                continue;
            }
        };

        debug!(generation = tag, prompt = %prompt, "requesting segment");
        shared.stats.requested.fetch_add(1, Ordering::Relaxed);
        match service.compose(&SegmentRequest::new(prompt), &shared.cancel) {
            Ok(segment) => {
                backoff = shared.timing.initial_backoff;
                let mut state = shared.state.lock();
                if state.generation != tag {
                    shared.stats.stale.fetch_add(1, Ordering::Relaxed);
                    debug!(tag, current = state.generation, "discarding stale segment");
                    continue;
                }
                let chunks = segment.into_chunks();
                debug!(chunks = chunks.len(), "segment accepted");
                shared.queue.extend(chunks);
                state.debouncer.mark_generated();
                shared.stats.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Err(BridgeError::Stopped) => break,
            Err(err) => {
                shared.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, backoff_secs = backoff.as_secs_f64(), "segment request failed, backing off");
                if !idle(&wake, backoff) {
                    break;
                }
                backoff = next_backoff(backoff, shared.timing.max_backoff);
            }
        }
    }
    debug!("segment generation loop stopped");
}


/// Segment service over a ZeroMQ DEALER socket.
pub struct ZmqSegmentConnector {
    context: zmq::Context,
    endpoint: String,
    api_key: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}


impl ZmqSegmentConnector {
    pub fn new(
        context: zmq::Context,
        endpoint: &str,
        api_key: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        ZmqSegmentConnector {
            context,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            connect_timeout,
            request_timeout,
        }
    }

    fn socket(&self) -> Result<zmq::Socket, BridgeError> {
        let socket = self.context.socket(zmq::DEALER)?;
        socket.set_linger(0)?;
        socket.connect(&self.endpoint)?;
        Ok(socket)
    }
}


impl SegmentConnector for ZmqSegmentConnector {
    fn open(&self) -> Result<Box<dyn SegmentService>, BridgeError> {
        let socket = self.socket()?;
        let ping = serde_json::json!({ "type": "ping", "api_key": self.api_key });
        socket.send(serde_json::to_vec(&ping)?, 0)?;
        if socket.poll(zmq::POLLIN, self.connect_timeout.as_millis() as i64)? == 0 {
            return Err(BridgeError::Timeout(self.connect_timeout));
        }
        let reply: Value = serde_json::from_slice(&socket.recv_bytes(0)?)?;
        if reply.get("type").and_then(Value::as_str) != Some("pong") {
            return Err(BridgeError::Unavailable(format!("unexpected ping reply: {}", reply)));
        }
        Ok(Box::new(ZmqSegmentService {
            connector: ZmqSegmentConnector {
                context: self.context.clone(),
                endpoint: self.endpoint.clone(),
                api_key: self.api_key.clone(),
                connect_timeout: self.connect_timeout,
                request_timeout: self.request_timeout,
            },
            socket: Some(socket),
        }))
    }
}


struct ZmqSegmentService {
    connector: ZmqSegmentConnector,
    socket: Option<zmq::Socket>,
}


impl ZmqSegmentService {
    const POLL_SLICE: Duration = Duration::from_millis(100);

    fn await_reply(&self, socket: &zmq::Socket, cancel: &AtomicBool) -> Result<Vec<Vec<u8>>, BridgeError> {
        let timeout = self.connector.request_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(BridgeError::Stopped);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BridgeError::Timeout(timeout));
            }
            let slice = (deadline - now).min(Self::POLL_SLICE);
            if socket.poll(zmq::POLLIN, slice.as_millis() as i64)? > 0 {
                return Ok(socket.recv_multipart(0)?);
            }
        }
    }
}


impl SegmentService for ZmqSegmentService {
    fn compose(&mut self, request: &SegmentRequest, cancel: &AtomicBool) -> Result<Segment, BridgeError> {
        let socket = match self.socket.take() {
            Some(socket) => socket,
            None => self.connector.socket()?,
        };
        socket.send(serde_json::to_vec(request)?, 0)?;
        // a socket that timed out may still deliver the late reply, so it is not reused
        let frames = self.await_reply(&socket, cancel)?;
        self.socket = Some(socket);

        let mut frames = frames.into_iter();
        let status: Value = serde_json::from_slice(&frames.next().unwrap_or_default())?;
        match status.get("status").and_then(Value::as_str) {
            Some("ok") => Ok(Segment {
                pcm: frames.next().unwrap_or_default(),
                channels: status.get("channels").and_then(Value::as_u64).unwrap_or(2) as u16,
            }),
            Some("rate_limited") => Err(BridgeError::RateLimited),
            Some("error") => Err(BridgeError::Unavailable(
                status.get("message").and_then(Value::as_str).unwrap_or("compose failed").to_string(),
            )),
            _ => Err(BridgeError::Protocol(format!("unexpected compose reply: {}", status))),
        }
    }
}
