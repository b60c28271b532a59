//! Server configuration, from flags or `SONIFY_*` environment variables.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::warn;

use crate::bridge::segmented::ZmqSegmentConnector;
use crate::bridge::streaming::ZmqSessionConnector;
use crate::bridge::{AudioBridge, Backend, Candidate, SegmentedBridge, StreamingBridge};
use crate::control::smoothing::DEFAULT_ALPHA;
use crate::error::ConfigError;
use crate::lens::{lens_names, DEFAULT_LENS};
use crate::scheduler::DEFAULT_AUDIO_CADENCE;


#[derive(Debug, Clone, Parser)]
#[command(name = "sonify-server", version, about = "Turn live data streams into music for every subscriber")]
pub struct ServerConfig {
    /// Endpoint the subscriber hub binds to
    #[arg(long, env = "SONIFY_BIND", default_value = "tcp://*:5555")]
    pub bind: String,

    /// Lens active at startup
    #[arg(long, env = "SONIFY_LENS", default_value = DEFAULT_LENS)]
    pub lens: String,

    /// Smoothing factor for the continuous controls, in (0, 1]
    #[arg(long, env = "SONIFY_ALPHA", default_value_t = DEFAULT_ALPHA)]
    pub alpha: f64,

    /// Milliseconds between audio pulls
    #[arg(long = "audio-cadence-ms", env = "SONIFY_AUDIO_CADENCE_MS", default_value_t = DEFAULT_AUDIO_CADENCE.as_millis() as u64)]
    pub audio_cadence_ms: u64,

    /// Streaming music session endpoint
    #[arg(long, env = "SONIFY_STREAMING_ENDPOINT")]
    pub streaming_endpoint: Option<String>,

    #[arg(long, env = "SONIFY_STREAMING_KEY", hide_env_values = true)]
    pub streaming_key: Option<String>,

    /// Segment composition service endpoint
    #[arg(long, env = "SONIFY_SEGMENT_ENDPOINT")]
    pub segment_endpoint: Option<String>,

    #[arg(long, env = "SONIFY_SEGMENT_KEY", hide_env_values = true)]
    pub segment_key: Option<String>,

    /// Publisher of live weather observations
    #[arg(long, env = "SONIFY_WEATHER_ENDPOINT")]
    pub weather_endpoint: Option<String>,

    #[arg(long = "connect-timeout-ms", env = "SONIFY_CONNECT_TIMEOUT_MS", default_value_t = 10_000)]
    pub connect_timeout_ms: u64,

    /// How long a single segment composition may take
    #[arg(long = "request-timeout-ms", env = "SONIFY_REQUEST_TIMEOUT_MS", default_value_t = 120_000)]
    pub request_timeout_ms: u64,
}


impl ServerConfig {
    /// Reject values the pipeline can't run with. An unknown startup lens is not fatal.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(ConfigError::Alpha(self.alpha));
        }
        if self.audio_cadence_ms == 0 {
            return Err(ConfigError::ZeroCadence);
        }
        if !lens_names().any(|name| name == self.lens) {
            warn!(lens = %self.lens, fallback = DEFAULT_LENS, "unknown startup lens");
            self.lens = DEFAULT_LENS.to_string();
        }
        Ok(())
    }

    pub fn audio_cadence(&self) -> Duration {
        Duration::from_millis(self.audio_cadence_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}


/// Endpoint plus credentials for one remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct Remote {
    pub endpoint: String,
    pub api_key: String,
}


impl Remote {
    fn from_parts(endpoint: &Option<String>, api_key: &Option<String>) -> Option<Self> {
        match (endpoint.as_deref(), api_key.as_deref()) {
            (Some(endpoint), Some(api_key)) if !endpoint.is_empty() && !api_key.is_empty() => Some(Remote {
                endpoint: endpoint.to_string(),
                api_key: api_key.to_string(),
            }),
            _ => None,
        }
    }
}


/// Which remote backends are worth attempting, in cascade order.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendPlan {
    pub streaming: Option<Remote>,
    pub segmented: Option<Remote>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}


impl BackendPlan {
    pub fn from_config(config: &ServerConfig) -> Self {
        BackendPlan {
            streaming: Remote::from_parts(&config.streaming_endpoint, &config.streaming_key),
            segmented: Remote::from_parts(&config.segment_endpoint, &config.segment_key),
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
        }
    }

    /// Backends in the order they will be tried. Synthesis always comes last.
    pub fn order(&self) -> Vec<Backend> {
        let mut order = Vec::new();
        if self.streaming.is_some() {
            order.push(Backend::Streaming);
        }
        if self.segmented.is_some() {
            order.push(Backend::Segmented);
        }
        order.push(Backend::Synthesis);
        order
    }

    /// Deferred constructors for the remote backends, ready for `select_bridge`.
    pub fn candidates(&self, context: &zmq::Context) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        if let Some(remote) = self.streaming.clone() {
            let context = context.clone();
            let timeout = self.connect_timeout;
            candidates.push(Candidate::new(Backend::Streaming, move || {
                let connector = ZmqSessionConnector::new(context, &remote.endpoint, &remote.api_key, timeout);
                Arc::new(StreamingBridge::new(Box::new(connector))) as Arc<dyn AudioBridge>
            }));
        }
        if let Some(remote) = self.segmented.clone() {
            let context = context.clone();
            let (connect_timeout, request_timeout) = (self.connect_timeout, self.request_timeout);
            candidates.push(Candidate::new(Backend::Segmented, move || {
                let connector = ZmqSegmentConnector::new(
                    context,
                    &remote.endpoint,
                    &remote.api_key,
                    connect_timeout,
                    request_timeout,
                );
                Arc::new(SegmentedBridge::new(Box::new(connector))) as Arc<dyn AudioBridge>
            }));
        }
        candidates
    }
}


#[cfg(test)]
mod test {
    use super::*;

    fn parse(args: &[&str]) -> ServerConfig {
        let mut argv = vec!["sonify-server"];
        argv.extend_from_slice(args);
        ServerConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let mut config = parse(&[]);
        config.validate().unwrap();
        assert_eq!(config.lens, "atmosphere");
        assert_eq!(config.alpha, DEFAULT_ALPHA);
        assert_eq!(config.audio_cadence(), Duration::from_millis(50));
    }

    #[test]
    fn test_validation() {
        let mut config = parse(&["--alpha", "0"]);
        assert_eq!(config.validate(), Err(ConfigError::Alpha(0.0)));

        let mut config = parse(&["--alpha", "1.5"]);
        assert_eq!(config.validate(), Err(ConfigError::Alpha(1.5)));

        let mut config = parse(&["--alpha", "1"]);
        assert!(config.validate().is_ok());

        let mut config = parse(&["--audio-cadence-ms", "0"]);
        assert_eq!(config.validate(), Err(ConfigError::ZeroCadence));

        let mut config = parse(&["--lens", "kaleidoscope"]);
        config.validate().unwrap();
        assert_eq!(config.lens, "atmosphere");

        let mut config = parse(&["--lens", "flow"]);
        config.validate().unwrap();
        assert_eq!(config.lens, "flow");
    }

    #[test]
    fn test_backend_plan_needs_endpoint_and_key() {
        let plan = BackendPlan::from_config(&parse(&[]));
        assert_eq!(plan.order(), vec![Backend::Synthesis]);
        assert!(plan.candidates(&zmq::Context::new()).is_empty());

        let plan = BackendPlan::from_config(&parse(&["--streaming-endpoint", "tcp://music:7000"]));
        assert_eq!(plan.order(), vec![Backend::Synthesis]);

        let plan = BackendPlan::from_config(&parse(&[
            "--streaming-endpoint",
            "tcp://music:7000",
            "--streaming-key",
            "k1",
            "--segment-endpoint",
            "tcp://compose:7001",
            "--segment-key",
            "k2",
        ]));
        assert_eq!(plan.order(), vec![Backend::Streaming, Backend::Segmented, Backend::Synthesis]);
        let backends: Vec<Backend> = plan.candidates(&zmq::Context::new()).iter().map(|c| c.backend).collect();
        assert_eq!(backends, vec![Backend::Streaming, Backend::Segmented]);

        let plan = BackendPlan::from_config(&parse(&["--segment-endpoint", "tcp://compose:7001", "--segment-key", ""]));
        assert!(plan.segmented.is_none());
    }
}
