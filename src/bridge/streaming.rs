//! Persistent session with a live generative backend.
//!
//! The remote socket lives on a worker thread. `update` and `reset` hand messages to it over a
//! channel, so the tick scheduler never waits on the network; audio coming back is re-chunked
//! into the shared queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::bridge::{AudioBridge, Backend, ChunkQueue, SynthesisBridge};
use crate::control::{ControlField, ControlState, FieldSet, Scale, WeightedPrompt};
use crate::error::BridgeError;
use crate::sampling::Rechunker;
use crate::PcmChunk;


/// About five seconds of audio.
pub const QUEUE_CHUNKS: usize = 100;

const RECV_POLL: Duration = Duration::from_millis(10);


#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionMessage {
    Setup { api_key: String, model: String },
    SetWeightedPrompts { prompts: Vec<WeightedPrompt> },
    SetConfig { config: Map<String, Value> },
    Play,
    ResetContext,
    Stop,
}


impl SessionMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionMessage::Setup { .. } => "setup",
            SessionMessage::SetWeightedPrompts { .. } => "set_weighted_prompts",
            SessionMessage::SetConfig { .. } => "set_config",
            SessionMessage::Play => "play",
            SessionMessage::ResetContext => "reset_context",
            SessionMessage::Stop => "stop",
        }
    }
}


#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Raw 16-bit little-endian stereo PCM of any length.
    Audio(Vec<u8>),
    Other(String),
}


/// One open session. Owned by the bridge's worker thread.
pub trait MusicSession: Send {
    fn send(&mut self, message: &SessionMessage) -> Result<(), BridgeError>;

    /// Wait up to `timeout` for the next inbound message.
    fn recv(&mut self, timeout: Duration) -> Result<Option<Inbound>, BridgeError>;

    fn close(&mut self);
}


pub trait SessionConnector: Send + Sync {
    fn open(&self) -> Result<Box<dyn MusicSession>, BridgeError>;
}


enum Outbound {
    Send(SessionMessage),
    /// Bridge reset; carries the generation the worker should accept audio for from now on.
    Reset(u64),
    Close,
}


struct Link {
    commands: Sender<Outbound>,
    worker: JoinHandle<()>,
}


pub struct StreamingBridge {
    connector: Box<dyn SessionConnector>,
    queue: Arc<ChunkQueue>,
    /// Bumped by `reset` together with clearing the queue. The worker only enqueues audio while
    /// it has caught up with the current generation.
    generation: Arc<Mutex<u64>>,
    link: Mutex<Option<Link>>,
    last_sent: Mutex<Option<ControlState>>,
    downgraded: AtomicBool,
    synth: SynthesisBridge,
}


impl StreamingBridge {
    pub fn new(connector: Box<dyn SessionConnector>) -> Self {
        StreamingBridge {
            connector,
            queue: Arc::new(ChunkQueue::new(QUEUE_CHUNKS)),
            generation: Arc::new(Mutex::new(0)),
            link: Mutex::new(None),
            last_sent: Mutex::new(None),
            downgraded: AtomicBool::new(false),
            synth: SynthesisBridge::fallback(),
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn send(&self, message: SessionMessage) {
        self.command(Outbound::Send(message));
    }

    fn command(&self, outbound: Outbound) {
        match &*self.link.lock() {
            Some(link) => {
                if link.commands.send(outbound).is_err() {
                    debug!("session worker has exited");
                }
            }
            None => debug!("no open session"),
        }
    }
}


impl AudioBridge for StreamingBridge {
    fn connect(&self) -> Result<(), BridgeError> {
        match self.connector.open() {
            Ok(session) => {
                let (commands, receiver) = unbounded();
                let sink = AudioSink {
                    queue: self.queue.clone(),
                    generation: self.generation.clone(),
                    accepting: *self.generation.lock(),
                };
                let worker = thread::Builder::new()
                    .name("streaming-session".into())
                    .spawn(move || run_session(session, receiver, sink))
                    .map_err(|err| BridgeError::Unavailable(err.to_string()))?;
                *self.link.lock() = Some(Link { commands, worker });
                *self.last_sent.lock() = None;
                self.downgraded.store(false, Ordering::SeqCst);
                info!("streaming session connected");
            }
            Err(err) => {
                warn!(error = %err, "streaming session unavailable, falling back to synthesis");
                self.downgraded.store(true, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn update(&self, controls: &ControlState) {
        if self.is_fallback() {
            return self.synth.update(controls);
        }
        let mut last_sent = self.last_sent.lock();
        let (messages, snapshot) = plan_update(last_sent.as_ref(), controls);
        for message in messages {
            self.send(message);
        }
        *last_sent = Some(snapshot);
    }

    fn next_chunk(&self) -> Option<PcmChunk> {
        if self.is_fallback() {
            self.synth.next_chunk()
        } else {
            self.queue.pop()
        }
    }

    fn reset(&self) {
        *self.last_sent.lock() = None;
        if self.is_fallback() {
            return self.synth.reset();
        }
        let (generation, dropped) = {
            let mut generation = self.generation.lock();
            *generation += 1;
            (*generation, self.queue.clear())
        };
        debug!(generation, dropped, "streaming bridge reset");
        self.command(Outbound::Reset(generation));
    }

    fn disconnect(&self) {
        let link = self.link.lock().take();
        if let Some(link) = link {
            // a worker that already exited has closed its own session
            let _ = link.commands.send(Outbound::Close);
            if link.worker.join().is_err() {
                warn!("streaming session worker panicked");
            }
            info!("streaming session closed");
        }
    }

    fn is_fallback(&self) -> bool {
        self.downgraded.load(Ordering::SeqCst)
    }

    fn backend(&self) -> Backend {
        if self.is_fallback() {
            Backend::Synthesis
        } else {
            Backend::Streaming
        }
    }
}


impl Drop for StreamingBridge {
    fn drop(&mut self) {
        self.disconnect();
    }
}


/// Messages needed to bring the remote from `last_sent` to `controls`, and the snapshot to diff
/// against next time.
///
/// With no snapshot everything is pushed. Otherwise only fields outside the dead-zone are sent
/// and only those are merged into the snapshot, so sub-threshold drift accumulates against what
/// the remote actually has.
pub(crate) fn plan_update(
    last_sent: Option<&ControlState>,
    controls: &ControlState,
) -> (Vec<SessionMessage>, ControlState) {
    let previous = match last_sent {
        Some(previous) => previous,
        None => {
            let messages = vec![
                SessionMessage::SetWeightedPrompts { prompts: controls.prompts.clone() },
                SessionMessage::SetConfig { config: session_config(controls, FieldSet::all(), true) },
                SessionMessage::Play,
            ];
            return (messages, controls.clone());
        }
    };

    let changed = controls.diff(previous);
    let mut messages = Vec::new();
    if changed.is_empty() {
        return (messages, previous.clone());
    }
    if changed.contains(ControlField::Prompts) {
        messages.push(SessionMessage::SetWeightedPrompts { prompts: controls.prompts.clone() });
    }
    let config = session_config(controls, changed, false);
    if !config.is_empty() {
        messages.push(SessionMessage::SetConfig { config });
    }
    if changed.contains(ControlField::Tempo) || changed.contains(ControlField::Scale) {
        messages.push(SessionMessage::ResetContext);
    }
    (messages, previous.merged(controls, changed))
}


fn session_config(controls: &ControlState, fields: FieldSet, full: bool) -> Map<String, Value> {
    let mut config = Map::new();
    for field in fields.iter() {
        let (key, value) = match field {
            ControlField::Tempo => ("bpm", json!(controls.tempo)),
            ControlField::Density => ("density", json!(controls.density)),
            ControlField::Brightness => ("brightness", json!(controls.brightness)),
            ControlField::Guidance => ("guidance", json!(controls.guidance)),
            ControlField::Temperature => ("temperature", json!(controls.temperature)),
            ControlField::MuteBass => ("mute_bass", json!(controls.mute_bass)),
            ControlField::MuteDrums => ("mute_drums", json!(controls.mute_drums)),
            ControlField::Scale if full && controls.scale == Scale::Unspecified => continue,
            ControlField::Scale => ("scale", json!(controls.scale)),
            ControlField::Prompts => continue,
        };
        config.insert(key.to_string(), value);
    }
    config
}


/// Worker side of the queue: audio is accepted only for the generation the worker has reached.
struct AudioSink {
    queue: Arc<ChunkQueue>,
    generation: Arc<Mutex<u64>>,
    accepting: u64,
}


impl AudioSink {
    /// Enqueue under the generation lock so a concurrent `reset` can't clear in between.
    fn accept(&self, chunks: Vec<PcmChunk>) {
        let current = self.generation.lock();
        if *current == self.accepting {
            self.queue.extend(chunks);
        } else {
            debug!(chunks = chunks.len(), tag = self.accepting, current = *current, "discarding audio from before reset");
        }
    }
}


fn run_session(mut session: Box<dyn MusicSession>, commands: Receiver<Outbound>, mut sink: AudioSink) {
    let mut rechunker = Rechunker::new();
    loop {
        loop {
            match commands.try_recv() {
                Ok(Outbound::Send(message)) => {
                    if message == SessionMessage::ResetContext {
                        rechunker.clear();
                    }
                    if let Err(err) = session.send(&message) {
                        warn!(error = %err, kind = message.kind(), "session send failed");
                    }
                }
                Ok(Outbound::Reset(generation)) => {
                    rechunker.clear();
                    sink.accepting = generation;
                    if let Err(err) = session.send(&SessionMessage::ResetContext) {
                        warn!(error = %err, "session reset failed");
                    }
                }
                Ok(Outbound::Close) | Err(TryRecvError::Disconnected) => {
                    if let Err(err) = session.send(&SessionMessage::Stop) {
                        debug!(error = %err, "session stop failed");
                    }
                    session.close();
                    return;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match session.recv(RECV_POLL) {
            Ok(Some(Inbound::Audio(bytes))) => sink.accept(rechunker.push(&bytes)),
            Ok(Some(Inbound::Other(kind))) => debug!(kind = %kind, "ignoring session message"),
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "session receive failed");
                thread::sleep(RECV_POLL);
            }
        }
    }
}


/// Session over a ZeroMQ DEALER socket.
pub struct ZmqSessionConnector {
    context: zmq::Context,
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
}


impl ZmqSessionConnector {
    pub const DEFAULT_MODEL: &'static str = "models/lyria-realtime-exp";

    pub fn new(context: zmq::Context, endpoint: &str, api_key: &str, timeout: Duration) -> Self {
        ZmqSessionConnector {
            context,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            timeout,
        }
    }
}


impl SessionConnector for ZmqSessionConnector {
    fn open(&self) -> Result<Box<dyn MusicSession>, BridgeError> {
        let socket = self.context.socket(zmq::DEALER)?;
        socket.set_linger(0)?;
        socket.connect(&self.endpoint)?;

        let setup = SessionMessage::Setup { api_key: self.api_key.clone(), model: self.model.clone() };
        socket.send(serde_json::to_vec(&setup)?, 0)?;
        if socket.poll(zmq::POLLIN, self.timeout.as_millis() as i64)? == 0 {
            return Err(BridgeError::Timeout(self.timeout));
        }
        let reply: Value = serde_json::from_slice(&socket.recv_bytes(0)?)?;
        match reply.get("type").and_then(Value::as_str) {
            Some("setup_complete") => {
                Ok(Box::new(ZmqSession { socket, endpoint: self.endpoint.clone() }))
            }
            Some("error") => Err(BridgeError::Unavailable(
                reply.get("message").and_then(Value::as_str).unwrap_or("setup rejected").to_string(),
            )),
            _ => Err(BridgeError::Protocol(format!("unexpected setup reply: {}", reply))),
        }
    }
}


struct ZmqSession {
    socket: zmq::Socket,
    endpoint: String,
}


impl MusicSession for ZmqSession {
    fn send(&mut self, message: &SessionMessage) -> Result<(), BridgeError> {
        self.socket.send(serde_json::to_vec(message)?, zmq::DONTWAIT)?;
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<Inbound>, BridgeError> {
        if self.socket.poll(zmq::POLLIN, timeout.as_millis() as i64)? == 0 {
            return Ok(None);
        }
        let mut frames = self.socket.recv_multipart(0)?.into_iter();
        let head = match frames.next() {
            Some(head) => head,
            None => return Ok(None),
        };
        if head == b"audio" {
            return Ok(Some(Inbound::Audio(frames.next().unwrap_or_default())));
        }
        let kind = serde_json::from_slice::<Value>(&head)
            .ok()
            .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Some(Inbound::Other(kind)))
    }

    fn close(&mut self) {
        if let Err(err) = self.socket.disconnect(&self.endpoint) {
            debug!(error = %err, "session socket already detached");
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use std::time::Instant;

    use crate::CHUNK_BYTES;

    type Log = Arc<Mutex<Vec<SessionMessage>>>;

    struct FakeSession {
        log: Log,
        audio: Receiver<Vec<u8>>,
    }

    impl MusicSession for FakeSession {
        fn send(&mut self, message: &SessionMessage) -> Result<(), BridgeError> {
            self.log.lock().push(message.clone());
            Ok(())
        }

        fn recv(&mut self, timeout: Duration) -> Result<Option<Inbound>, BridgeError> {
            Ok(self.audio.recv_timeout(timeout).ok().map(Inbound::Audio))
        }

        fn close(&mut self) {}
    }

    struct FakeConnector {
        log: Log,
        audio: Mutex<Option<Receiver<Vec<u8>>>>,
    }

    impl SessionConnector for FakeConnector {
        fn open(&self) -> Result<Box<dyn MusicSession>, BridgeError> {
            let audio = self
                .audio
                .lock()
                .take()
                .ok_or_else(|| BridgeError::Unavailable("no credentials".into()))?;
            Ok(Box::new(FakeSession { log: self.log.clone(), audio }))
        }
    }

    fn connected() -> (StreamingBridge, Log, Sender<Vec<u8>>) {
        let log = Log::default();
        let (audio_tx, audio_rx) = unbounded();
        let connector = FakeConnector { log: log.clone(), audio: Mutex::new(Some(audio_rx)) };
        let bridge = StreamingBridge::new(Box::new(connector));
        bridge.connect().unwrap();
        (bridge, log, audio_tx)
    }

    fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn kinds(messages: &[SessionMessage]) -> Vec<&'static str> {
        messages.iter().map(SessionMessage::kind).collect()
    }

    #[test]
    fn test_first_update_pushes_everything() {
        let (messages, snapshot) = plan_update(None, &ControlState::default());
        assert_eq!(kinds(&messages), vec!["set_weighted_prompts", "set_config", "play"]);
        match &messages[1] {
            SessionMessage::SetConfig { config } => {
                assert_eq!(config.len(), 7);
                assert_eq!(config["bpm"], json!(120));
                assert!(!config.contains_key("scale"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(snapshot, ControlState::default());
    }

    #[test]
    fn test_unchanged_state_sends_nothing() {
        let cs = ControlState::default();
        let (messages, _) = plan_update(Some(&cs), &cs);
        assert!(messages.is_empty());
    }

    #[test]
    fn test_subthreshold_drift_accumulates() {
        let base = ControlState::default();
        let step1 = ControlState { density: base.density + 0.006, ..base.clone() };
        let (messages, snapshot) = plan_update(Some(&base), &step1);
        assert!(messages.is_empty());
        assert_eq!(snapshot.density, base.density);

        let step2 = ControlState { density: base.density + 0.012, ..base.clone() };
        let (messages, snapshot) = plan_update(Some(&snapshot), &step2);
        assert_eq!(kinds(&messages), vec!["set_config"]);
        assert_eq!(snapshot.density, step2.density);
    }

    #[test]
    fn test_tempo_and_scale_reset_context() {
        let base = ControlState::default();
        let faster = ControlState { tempo: 140, ..base.clone() };
        let (messages, _) = plan_update(Some(&base), &faster);
        assert_eq!(kinds(&messages), vec!["set_config", "reset_context"]);

        let rekeyed = ControlState { scale: Scale::DMajorBMinor, ..base.clone() };
        let (messages, _) = plan_update(Some(&base), &rekeyed);
        assert_eq!(kinds(&messages), vec!["set_config", "reset_context"]);

        let reprompted = ControlState { prompts: vec![WeightedPrompt::new("rain", 1.0)], ..base.clone() };
        let (messages, _) = plan_update(Some(&base), &reprompted);
        assert_eq!(kinds(&messages), vec!["set_weighted_prompts"]);
    }

    #[test]
    fn test_reset_forces_full_push() {
        let (bridge, log, _audio) = connected();
        let cs = ControlState::default();
        bridge.update(&cs);
        bridge.update(&cs);
        bridge.reset();
        bridge.update(&cs);
        assert!(wait_until(|| log.lock().len() >= 7));
        bridge.disconnect();

        let sent = kinds(&log.lock());
        assert_eq!(
            sent,
            vec![
                "set_weighted_prompts", "set_config", "play",
                "reset_context",
                "set_weighted_prompts", "set_config", "play",
                "stop",
            ]
        );
    }

    /// Blocks in `recv` until the test hands it audio, like a socket mid-read.
    struct BlockingSession {
        log: Log,
        audio: Receiver<Vec<u8>>,
    }

    impl MusicSession for BlockingSession {
        fn send(&mut self, message: &SessionMessage) -> Result<(), BridgeError> {
            self.log.lock().push(message.clone());
            Ok(())
        }

        fn recv(&mut self, _timeout: Duration) -> Result<Option<Inbound>, BridgeError> {
            Ok(self.audio.recv().ok().map(Inbound::Audio))
        }

        fn close(&mut self) {}
    }

    struct BlockingConnector {
        log: Log,
        audio: Mutex<Option<Receiver<Vec<u8>>>>,
    }

    impl SessionConnector for BlockingConnector {
        fn open(&self) -> Result<Box<dyn MusicSession>, BridgeError> {
            let audio = self.audio.lock().take().ok_or(BridgeError::Stopped)?;
            Ok(Box::new(BlockingSession { log: self.log.clone(), audio }))
        }
    }

    #[test]
    fn test_audio_received_across_reset_is_dropped() {
        let log = Log::default();
        let (release, held) = unbounded();
        let connector = BlockingConnector { log: log.clone(), audio: Mutex::new(Some(held)) };
        let bridge = StreamingBridge::new(Box::new(connector));
        bridge.connect().unwrap();

        // the worker is parked in recv while the lens switches
        bridge.reset();
        release.send(vec![1u8; 3 * CHUNK_BYTES]).unwrap();
        assert!(wait_until(|| kinds(&log.lock()).contains(&"reset_context")));
        assert!(bridge.next_chunk().is_none());
        assert_eq!(bridge.queued(), 0);

        release.send(vec![2u8; CHUNK_BYTES]).unwrap();
        assert!(wait_until(|| bridge.queued() == 1));
        assert_eq!(bridge.next_chunk().unwrap().as_bytes()[0], 2);

        drop(release);
        bridge.disconnect();
    }

    #[test]
    fn test_inbound_audio_is_rechunked() {
        let (bridge, _log, audio) = connected();
        audio.send(vec![0u8; CHUNK_BYTES + 100]).unwrap();
        assert!(wait_until(|| bridge.queued() == 1));
        audio.send(vec![0u8; CHUNK_BYTES - 100]).unwrap();
        assert!(wait_until(|| bridge.queued() == 2));

        assert_eq!(bridge.next_chunk().unwrap().as_bytes().len(), CHUNK_BYTES);
        assert_eq!(bridge.next_chunk().unwrap().as_bytes().len(), CHUNK_BYTES);
        assert!(bridge.next_chunk().is_none());
        assert_eq!(bridge.backend(), Backend::Streaming);
    }

    #[test]
    fn test_connect_failure_downgrades_to_synthesis() {
        let connector = FakeConnector { log: Log::default(), audio: Mutex::new(None) };
        let bridge = StreamingBridge::new(Box::new(connector));
        assert!(bridge.connect().is_ok());
        assert!(bridge.is_fallback());
        assert_eq!(bridge.backend(), Backend::Synthesis);
        bridge.update(&ControlState::default());
        assert_eq!(bridge.next_chunk().unwrap().as_bytes().len(), CHUNK_BYTES);
    }
}
