use std::sync::Arc;

use tracing::{info, warn};

use crate::bridge::{AudioBridge, Backend, SynthesisBridge};


/// A deferred bridge constructor, tried in priority order at startup.
pub struct Candidate {
    pub backend: Backend,
    build: Box<dyn FnOnce() -> Arc<dyn AudioBridge>>,
}


impl Candidate {
    pub fn new<F>(backend: Backend, build: F) -> Self
    where
        F: FnOnce() -> Arc<dyn AudioBridge> + 'static,
    {
        Candidate { backend, build: Box::new(build) }
    }
}


/// Connect the first candidate that comes up for real.
///
/// A candidate whose `connect` fails or that downgraded itself is disconnected and skipped. With
/// no candidates at all, plain synthesis is the configured backend; if every candidate was
/// skipped, synthesis stands in and reports itself as a fallback.
pub fn select_bridge(candidates: Vec<Candidate>) -> Arc<dyn AudioBridge> {
    let attempted = !candidates.is_empty();
    for candidate in candidates {
        let backend = candidate.backend;
        let bridge = (candidate.build)();
        match bridge.connect() {
            Ok(()) if !bridge.is_fallback() => {
                info!(%backend, "audio backend selected");
                return bridge;
            }
            Ok(()) => warn!(%backend, "audio backend unavailable, trying next"),
            Err(err) => warn!(%backend, error = %err, "audio backend failed to connect, trying next"),
        }
        bridge.disconnect();
    }

    let synthesis: Arc<dyn AudioBridge> = if attempted {
        warn!("no remote audio backend available, using local synthesis");
        Arc::new(SynthesisBridge::fallback())
    } else {
        info!("audio backend selected: local synthesis");
        Arc::new(SynthesisBridge::new())
    };
    if let Err(err) = synthesis.connect() {
        warn!(error = %err, "synthesis bridge reported a connect error");
    }
    synthesis
}


#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::control::ControlState;
    use crate::error::BridgeError;
    use crate::PcmChunk;

    struct FakeBridge {
        backend: Backend,
        refuse: bool,
        downgrade: bool,
        disconnected: Arc<AtomicBool>,
    }

    impl AudioBridge for FakeBridge {
        fn connect(&self) -> Result<(), BridgeError> {
            if self.refuse {
                Err(BridgeError::Unavailable("refused".into()))
            } else {
                Ok(())
            }
        }
        fn update(&self, _: &ControlState) {}
        fn next_chunk(&self) -> Option<PcmChunk> {
            None
        }
        fn reset(&self) {}
        fn disconnect(&self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }
        fn is_fallback(&self) -> bool {
            self.downgrade
        }
        fn backend(&self) -> Backend {
            self.backend
        }
    }

    fn candidate(backend: Backend, refuse: bool, downgrade: bool) -> (Candidate, Arc<AtomicBool>) {
        let disconnected = Arc::new(AtomicBool::new(false));
        let flag = disconnected.clone();
        let candidate = Candidate::new(backend, move || {
            Arc::new(FakeBridge { backend, refuse, downgrade, disconnected: flag }) as Arc<dyn AudioBridge>
        });
        (candidate, disconnected)
    }

    #[test]
    fn test_first_working_candidate_wins() {
        let (refusing, refused) = candidate(Backend::Streaming, true, false);
        let (downgraded, dropped) = candidate(Backend::Streaming, false, true);
        let (working, kept) = candidate(Backend::Segmented, false, false);
        let bridge = select_bridge(vec![refusing, downgraded, working]);

        assert_eq!(bridge.backend(), Backend::Segmented);
        assert!(!bridge.is_fallback());
        assert!(refused.load(Ordering::SeqCst));
        assert!(dropped.load(Ordering::SeqCst));
        assert!(!kept.load(Ordering::SeqCst));
    }

    #[test]
    fn test_no_candidates_is_plain_synthesis() {
        let bridge = select_bridge(vec![]);
        assert_eq!(bridge.backend(), Backend::Synthesis);
        assert!(!bridge.is_fallback());
    }

    #[test]
    fn test_all_candidates_failing_falls_back() {
        let (refusing, _) = candidate(Backend::Streaming, true, false);
        let (downgraded, _) = candidate(Backend::Segmented, false, true);
        let bridge = select_bridge(vec![refusing, downgraded]);
        assert_eq!(bridge.backend(), Backend::Synthesis);
        assert!(bridge.is_fallback());
        assert!(bridge.next_chunk().is_some());
    }
}
