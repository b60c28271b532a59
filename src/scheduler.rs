//! The two periodic loops of a running session.
//!
//! The tick scheduler owns the `SessionContext` (active lens, bridge handle, live-data state) and
//! is the only thread that switches lenses or calls `AudioBridge::update`. The audio scheduler
//! only pulls chunks. They share nothing but the bridge, the hub handle and the pause flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{select, Receiver, Sender};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bridge::AudioBridge;
use crate::control::ControlState;
use crate::error::LensError;
use crate::hub::{Broadcast, ClientId, Request};
use crate::lens::{create_lens, ActiveLens, LENSES};
use crate::protocol::{ClientMessage, LensInfo, ServerMessage, WireFrame};
use crate::sources::WeatherFeed;
use crate::CHUNK_DURATION;


/// Audio pull cadence: one chunk per chunk duration keeps clients in real time.
pub const DEFAULT_AUDIO_CADENCE: Duration = CHUNK_DURATION;


/// Everything the tick scheduler mutates. Single writer: never shared across threads.
pub struct SessionContext {
    lens: Box<dyn ActiveLens>,
    bridge: Arc<dyn AudioBridge>,
    alpha: f64,
    feed: Option<Box<dyn WeatherFeed>>,
    live: bool,
    started: Instant,
}


impl SessionContext {
    pub fn new(
        lens: &str,
        alpha: f64,
        bridge: Arc<dyn AudioBridge>,
        feed: Option<Box<dyn WeatherFeed>>,
    ) -> Result<Self, LensError> {
        Ok(SessionContext {
            lens: create_lens(lens, alpha)?,
            bridge,
            alpha,
            feed,
            live: false,
            started: Instant::now(),
        })
    }

    pub fn lens(&self) -> &dyn ActiveLens {
        self.lens.as_ref()
    }

    pub fn bridge(&self) -> &Arc<dyn AudioBridge> {
        &self.bridge
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Replace the active lens with a fresh instance and reset the bridge before anything else
    /// ticks. Returns false when `name` is already active, which changes nothing.
    pub fn switch_lens(&mut self, name: &str) -> Result<bool, LensError> {
        if name == self.lens.name() {
            return Ok(false);
        }
        let lens = create_lens(name, self.alpha)?;
        self.lens = lens;
        self.live = false;
        self.bridge.reset();
        info!(lens = name, "lens switched");
        Ok(true)
    }

    pub fn set_param(&mut self, name: &str, value: f64) -> Result<(), LensError> {
        self.lens.set_param(name, value)
    }

    pub fn set_live(&mut self, enabled: bool) -> Result<(), LensError> {
        if !self.lens.supports_live() {
            return Err(LensError::LiveUnsupported(self.lens.name().to_string()));
        }
        if enabled && self.feed.is_none() {
            return Err(LensError::NoLiveFeed);
        }
        self.live = enabled;
        if !enabled {
            self.lens.set_live_weather(None);
        }
        info!(lens = self.lens.name(), live = enabled, "live data toggled");
        Ok(())
    }

    /// One lens tick: produce, map, clamp, and hand the clamped state to the bridge.
    pub fn tick(&mut self) -> (ControlState, Value) {
        if self.live {
            if let Some(feed) = self.feed.as_mut() {
                let observation = feed.latest();
                self.lens.set_live_weather(observation);
            }
        }
        let frame = self.lens.tick(self.started.elapsed().as_secs_f64());
        let controls = frame.controls.clamp();
        self.bridge.update(&controls);
        (controls, frame.viz)
    }

    fn init_message(&self, paused: bool) -> ServerMessage {
        ServerMessage::Init {
            lens: self.lens.name().to_string(),
            lenses: LENSES.iter().map(LensInfo::from).collect(),
            backend: self.bridge.backend(),
            is_fallback: self.bridge.is_fallback(),
            paused,
        }
    }
}


fn emit(hub: &dyn Broadcast, message: &ServerMessage) {
    match WireFrame::message(message) {
        Ok(frame) => hub.broadcast(frame),
        Err(err) => warn!(error = %err, "failed to encode server message"),
    }
}


fn reply(hub: &dyn Broadcast, client: &ClientId, message: &ServerMessage) {
    match WireFrame::message(message) {
        Ok(frame) => hub.send_to(client, frame),
        Err(err) => warn!(error = %err, "failed to encode server message"),
    }
}


pub struct TickScheduler {
    context: SessionContext,
    hub: Arc<dyn Broadcast>,
    requests: Receiver<Request>,
    shutdown: Receiver<()>,
    paused: Arc<AtomicBool>,
}


impl TickScheduler {
    /// Serve requests and tick the active lens at its own rate until shutdown.
    pub fn run(mut self) {
        let mut deadline = Instant::now();
        loop {
            select! {
                recv(self.shutdown) -> _ => break,
                recv(self.requests) -> request => match request {
                    Ok(request) => {
                        if self.handle(request) {
                            deadline = Instant::now() + self.context.lens.tick_interval();
                        }
                    }
                    Err(_) => break,
                },
                recv(crossbeam_channel::at(deadline)) -> _ => {
                    self.tick();
                    let now = Instant::now();
                    deadline += self.context.lens.tick_interval();
                    if deadline < now {
                        deadline = now + self.context.lens.tick_interval();
                    }
                }
            }
        }
        debug!("tick scheduler stopped");
    }

    fn tick(&mut self) {
        if self.paused.load(Ordering::SeqCst) || self.hub.subscriber_count() == 0 {
            return;
        }
        let (controls, viz) = self.context.tick();
        let state = ServerMessage::State {
            viz,
            controls,
            lens: self.context.lens.name().to_string(),
            backend: self.context.bridge.backend(),
            is_fallback: self.context.bridge.is_fallback(),
        };
        emit(self.hub.as_ref(), &state);
    }

    /// Apply one client request. Returns true when the active lens changed.
    fn handle(&mut self, request: Request) -> bool {
        let Request { client, message } = request;
        let hub = self.hub.as_ref();
        let outcome = match message {
            ClientMessage::Hello => {
                let init = self.context.init_message(self.paused.load(Ordering::SeqCst));
                reply(hub, &client, &init);
                return false;
            }
            ClientMessage::SwitchLens { lens } => match self.context.switch_lens(&lens) {
                Ok(true) => {
                    emit(hub, &ServerMessage::LensSwitched { lens });
                    return true;
                }
                Ok(false) => {
                    debug!(lens = %lens, "lens already active");
                    Ok(())
                }
                Err(err) => Err(err),
            },
            ClientMessage::SetParam { name, value } => self.context.set_param(&name, value),
            ClientMessage::Pause => {
                self.set_paused(true);
                Ok(())
            }
            ClientMessage::Resume => {
                self.set_paused(false);
                Ok(())
            }
            ClientMessage::ToggleLive { enabled } => self.context.set_live(enabled),
            ClientMessage::Bye => Ok(()),
        };

        if let Err(err) = outcome {
            debug!(error = %err, "request rejected");
            reply(hub, &client, &ServerMessage::Rejected { reason: err.to_string() });
        }
        false
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        info!(paused, "playback toggled");
        emit(self.hub.as_ref(), &ServerMessage::Paused { paused });
    }
}


pub struct AudioScheduler {
    bridge: Arc<dyn AudioBridge>,
    hub: Arc<dyn Broadcast>,
    shutdown: Receiver<()>,
    paused: Arc<AtomicBool>,
    cadence: Duration,
}


impl AudioScheduler {
    /// Pull at most one chunk per cadence tick. Never waits for audio to appear.
    pub fn run(self) {
        let ticker = crossbeam_channel::tick(self.cadence);
        loop {
            select! {
                recv(self.shutdown) -> _ => break,
                recv(ticker) -> _ => self.pump(),
            }
        }
        debug!("audio scheduler stopped");
    }

    fn pump(&self) {
        if self.paused.load(Ordering::SeqCst) || self.hub.subscriber_count() == 0 {
            return;
        }
        if let Some(chunk) = self.bridge.next_chunk() {
            self.hub.broadcast(WireFrame::audio(&chunk));
        }
    }
}


/// Both schedulers of a live session plus the means to stop them.
pub struct Session {
    bridge: Arc<dyn AudioBridge>,
    paused: Arc<AtomicBool>,
    shutdown: Option<Sender<()>>,
    workers: Vec<thread::JoinHandle<()>>,
}


impl Session {
    pub fn start(
        context: SessionContext,
        hub: Arc<dyn Broadcast>,
        requests: Receiver<Request>,
        audio_cadence: Duration,
    ) -> Result<Self> {
        let (shutdown, stopped) = crossbeam_channel::bounded::<()>(0);
        let paused = Arc::new(AtomicBool::new(false));
        let bridge = context.bridge.clone();

        let audio = AudioScheduler {
            bridge: bridge.clone(),
            hub: hub.clone(),
            shutdown: stopped.clone(),
            paused: paused.clone(),
            cadence: audio_cadence,
        };
        let ticks = TickScheduler {
            context,
            hub,
            requests,
            shutdown: stopped,
            paused: paused.clone(),
        };

        let workers = vec![
            thread::Builder::new().name("tick-scheduler".into()).spawn(move || ticks.run())?,
            thread::Builder::new().name("audio-scheduler".into()).spawn(move || audio.run())?,
        ];
        info!(cadence = ?audio_cadence, "session started");

        Ok(Session {
            bridge,
            paused,
            shutdown: Some(shutdown),
            workers,
        })
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Stop both schedulers, then disconnect the bridge.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.shutdown.take().is_none() {
            return;
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("scheduler thread panicked");
            }
        }
        self.bridge.disconnect();
        info!("session stopped");
    }
}


impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;

    use crate::bridge::segmented::{Segment, SegmentConnector, SegmentRequest, SegmentService, Timing, SEGMENT_CHUNKS};
    use crate::bridge::{Backend, SegmentedBridge, SynthesisBridge};
    use crate::error::BridgeError;
    use crate::protocol::{decode_server, ServerFrame};
    use crate::sources::WeatherRecord;
    use crate::{PcmChunk, CHUNK_BYTES};

    fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[derive(Default)]
    struct RecordingHub {
        subscribers: AtomicUsize,
        sent: Mutex<Vec<(Option<ClientId>, ServerFrame)>>,
    }

    impl RecordingHub {
        fn with_subscriber() -> Arc<Self> {
            let hub = RecordingHub::default();
            hub.subscribers.store(1, Ordering::SeqCst);
            Arc::new(hub)
        }

        fn record(&self, to: Option<ClientId>, frame: WireFrame) {
            let parts = vec![frame.kind_byte().to_vec(), frame.payload];
            self.sent.lock().push((to, decode_server(&parts).unwrap()));
        }

        fn messages(&self) -> Vec<(Option<ClientId>, ServerMessage)> {
            self.sent
                .lock()
                .iter()
                .filter_map(|(to, frame)| match frame {
                    ServerFrame::Message(message) => Some((to.clone(), message.clone())),
                    ServerFrame::Audio(_) => None,
                })
                .collect()
        }

        fn states(&self) -> usize {
            self.messages().iter().filter(|(_, m)| matches!(m, ServerMessage::State { .. })).count()
        }

        fn audio(&self) -> usize {
            self.sent.lock().iter().filter(|(_, f)| matches!(f, ServerFrame::Audio(_))).count()
        }
    }

    impl Broadcast for RecordingHub {
        fn broadcast(&self, frame: WireFrame) {
            self.record(None, frame);
        }

        fn send_to(&self, client: &ClientId, frame: WireFrame) {
            self.record(Some(client.clone()), frame);
        }

        fn subscriber_count(&self) -> usize {
            self.subscribers.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingBridge {
        updates: Mutex<Vec<ControlState>>,
        resets: AtomicUsize,
    }

    impl AudioBridge for RecordingBridge {
        fn connect(&self) -> Result<(), BridgeError> {
            Ok(())
        }
        fn update(&self, controls: &ControlState) {
            self.updates.lock().push(controls.clone());
        }
        fn next_chunk(&self) -> Option<PcmChunk> {
            None
        }
        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
        fn disconnect(&self) {}
        fn is_fallback(&self) -> bool {
            false
        }
        fn backend(&self) -> Backend {
            Backend::Streaming
        }
    }

    struct FixedFeed(WeatherRecord);

    impl WeatherFeed for FixedFeed {
        fn latest(&mut self) -> Option<WeatherRecord> {
            Some(self.0.clone())
        }
    }

    fn client() -> ClientId {
        ClientId(b"client-1".to_vec())
    }

    #[test]
    fn test_tick_clamps_before_bridge() {
        let bridge = Arc::new(RecordingBridge::default());
        let mut context = SessionContext::new("pulse", 0.15, bridge.clone(), None).unwrap();
        context.set_param("heart_rate", 40.0).unwrap();
        let (controls, viz) = context.tick();
        assert_eq!(controls.tempo, 60);
        assert_eq!(viz["type"], "pulse");
        assert_eq!(bridge.updates.lock()[0], controls);
    }

    #[test]
    fn test_switch_lens() {
        let bridge = Arc::new(RecordingBridge::default());
        let mut context = SessionContext::new("atmosphere", 0.15, bridge.clone(), None).unwrap();

        assert_eq!(context.switch_lens("atmosphere"), Ok(false));
        assert_eq!(bridge.resets.load(Ordering::SeqCst), 0);

        assert_eq!(context.switch_lens("nowhere"), Err(LensError::UnknownLens("nowhere".into())));
        assert_eq!(context.lens().name(), "atmosphere");
        assert_eq!(bridge.resets.load(Ordering::SeqCst), 0);

        context.set_param("wind_speed", 25.0).unwrap();
        assert_eq!(context.switch_lens("lattice"), Ok(true));
        assert_eq!(context.switch_lens("atmosphere"), Ok(true));
        assert_eq!(bridge.resets.load(Ordering::SeqCst), 2);
        // a new instance starts from declared defaults
        assert_eq!(context.lens().params().get("wind_speed"), 5.0);
    }

    #[test]
    fn test_live_weather_toggle() {
        let observed = WeatherRecord {
            temperature: 33.0,
            wind_speed: 2.0,
            humidity: 20.0,
            pressure: 1000.0,
            rain_probability: 0.0,
        };
        let bridge = Arc::new(RecordingBridge::default());
        let feed: Box<dyn WeatherFeed> = Box::new(FixedFeed(observed));
        let mut context = SessionContext::new("pulse", 0.15, bridge.clone(), Some(feed)).unwrap();
        assert_eq!(context.set_live(true), Err(LensError::LiveUnsupported("pulse".into())));

        context.switch_lens("atmosphere").unwrap();
        context.set_live(true).unwrap();
        let (_, viz) = context.tick();
        assert_eq!(viz["data"]["temperature"], 33.0);

        context.set_live(false).unwrap();
        let (_, viz) = context.tick();
        assert_eq!(viz["data"]["temperature"], 20.0);

        let mut without_feed = SessionContext::new("atmosphere", 0.15, bridge, None).unwrap();
        assert_eq!(without_feed.set_live(true), Err(LensError::NoLiveFeed));
    }

    /// Segment service that holds every request until the test releases it.
    struct HeldService {
        release: Receiver<()>,
    }

    impl SegmentService for HeldService {
        fn compose(&mut self, _request: &SegmentRequest, cancel: &AtomicBool) -> Result<Segment, BridgeError> {
            loop {
                if cancel.load(Ordering::SeqCst) {
                    return Err(BridgeError::Stopped);
                }
                if self.release.recv_timeout(Duration::from_millis(5)).is_ok() {
                    return Ok(Segment { pcm: vec![0; SEGMENT_CHUNKS * CHUNK_BYTES], channels: 2 });
                }
            }
        }
    }

    struct HeldConnector(Mutex<Option<HeldService>>);

    impl SegmentConnector for HeldConnector {
        fn open(&self) -> Result<Box<dyn SegmentService>, BridgeError> {
            match self.0.lock().take() {
                Some(service) => Ok(Box::new(service)),
                None => Err(BridgeError::Unavailable("already opened".into())),
            }
        }
    }

    #[test]
    fn test_lens_switch_discards_in_flight_segment() {
        let (release, held) = crossbeam_channel::unbounded();
        let connector = HeldConnector(Mutex::new(Some(HeldService { release: held })));
        let timing = Timing {
            debounce: Duration::from_millis(50),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        };
        let segmented = Arc::new(SegmentedBridge::with_timing(Box::new(connector), timing));
        segmented.connect().unwrap();

        let mut context = SessionContext::new("atmosphere", 0.15, segmented.clone(), None).unwrap();
        context.tick();
        assert!(wait_until(|| segmented.stats().requested == 1));

        context.switch_lens("flow").unwrap();
        release.send(()).unwrap();
        assert!(wait_until(|| segmented.stats().stale == 1));
        assert_eq!(segmented.stats().accepted, 0);
        assert_eq!(segmented.queued(), 0);
        segmented.disconnect();
    }

    #[test]
    fn test_rejections_go_to_the_requester() {
        let hub = RecordingHub::with_subscriber();
        let (requests, incoming) = crossbeam_channel::unbounded();
        let bridge: Arc<dyn AudioBridge> = Arc::new(RecordingBridge::default());
        let context = SessionContext::new("flow", 0.15, bridge, None).unwrap();
        let session = Session::start(context, hub.clone(), incoming, Duration::from_millis(50)).unwrap();

        let message = ClientMessage::SetParam { name: "latency".into(), value: 900.0 };
        requests.send(Request { client: client(), message }).unwrap();
        requests.send(Request { client: client(), message: ClientMessage::SwitchLens { lens: "x".into() } }).unwrap();
        assert!(wait_until(|| {
            hub.messages().iter().filter(|(_, m)| matches!(m, ServerMessage::Rejected { .. })).count() == 2
        }));
        for (to, message) in hub.messages() {
            if let ServerMessage::Rejected { reason } = message {
                assert_eq!(to, Some(client()));
                assert!(!reason.is_empty());
            }
        }
        session.shutdown();
    }

    #[test]
    fn test_session_broadcasts_state_and_audio() {
        let hub = RecordingHub::with_subscriber();
        let (requests, incoming) = crossbeam_channel::unbounded();
        let bridge: Arc<dyn AudioBridge> = Arc::new(SynthesisBridge::new());
        let context = SessionContext::new("pulse", 0.15, bridge, None).unwrap();
        let session = Session::start(context, hub.clone(), incoming, Duration::from_millis(20)).unwrap();

        requests.send(Request { client: client(), message: ClientMessage::Hello }).unwrap();
        assert!(wait_until(|| hub.states() >= 3 && hub.audio() >= 3));

        let init = hub
            .messages()
            .into_iter()
            .find_map(|(to, m)| match m {
                ServerMessage::Init { lens, lenses, backend, paused, .. } => Some((to, lens, lenses.len(), backend, paused)),
                _ => None,
            })
            .unwrap();
        assert_eq!(init, (Some(client()), "pulse".to_string(), 4, Backend::Synthesis, false));

        let state = hub.messages().into_iter().find_map(|(_, m)| match m {
            ServerMessage::State { controls, lens, .. } => Some((controls, lens)),
            _ => None,
        });
        let (controls, lens) = state.unwrap();
        assert_eq!(lens, "pulse");
        assert_eq!(controls.tempo, 72);

        requests.send(Request { client: client(), message: ClientMessage::Pause }).unwrap();
        assert!(wait_until(|| session.is_paused()));
        assert!(wait_until(|| hub.messages().iter().any(|(_, m)| *m == ServerMessage::Paused { paused: true })));
        thread::sleep(Duration::from_millis(60));
        let frozen = hub.sent.lock().len();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(hub.sent.lock().len(), frozen);

        requests.send(Request { client: client(), message: ClientMessage::Resume }).unwrap();
        assert!(wait_until(|| hub.sent.lock().len() > frozen + 2));

        let started = Instant::now();
        session.shutdown();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_idle_without_subscribers() {
        let hub = Arc::new(RecordingHub::default());
        let (_requests, incoming) = crossbeam_channel::unbounded::<Request>();
        let bridge: Arc<dyn AudioBridge> = Arc::new(SynthesisBridge::new());
        let context = SessionContext::new("flow", 0.15, bridge, None).unwrap();
        let session = Session::start(context, hub.clone(), incoming, Duration::from_millis(10)).unwrap();
        thread::sleep(Duration::from_millis(300));
        assert!(hub.sent.lock().is_empty());
        session.shutdown();
    }
}
