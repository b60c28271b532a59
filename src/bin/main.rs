use std::io::BufRead;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};

use sonify::bridge::select_bridge;
use sonify::config::{BackendPlan, ServerConfig};
use sonify::hub::{Broadcast, Hub};
use sonify::scheduler::{Session, SessionContext};
use sonify::sources::{WeatherFeed, ZmqWeatherFeed};
use sonify::telemetry;


fn main() -> Result<()> {
    let mut config = ServerConfig::parse();
    telemetry::init_tracing()?;
    config.validate().context("invalid configuration")?;

    let context = zmq::Context::new();
    let plan = BackendPlan::from_config(&config);
    info!(order = ?plan.order(), "starting backend cascade");
    let bridge = select_bridge(plan.candidates(&context));

    let feed: Option<Box<dyn WeatherFeed>> = match config.weather_endpoint.as_deref() {
        Some(endpoint) => match ZmqWeatherFeed::new(&context, endpoint) {
            Ok(feed) => Some(Box::new(feed)),
            Err(err) => {
                warn!(endpoint, error = %err, "live weather disabled");
                None
            }
        },
        None => None,
    };

    let (requests, incoming) = crossbeam_channel::unbounded();
    let hub = Hub::bind(&context, &config.bind, requests)?;
    let broadcast: Arc<dyn Broadcast> = Arc::new(hub.handle());

    let session_context = SessionContext::new(&config.lens, config.alpha, bridge, feed)?;
    let session = Session::start(session_context, broadcast, incoming, config.audio_cadence())?;
    info!(lens = %config.lens, bind = %config.bind, "sonify running, 'q' or end of input stops it");

    // stdin is the only control surface the operator has
    let (stop, stopped) = crossbeam_channel::bounded::<()>(1);
    thread::Builder::new().name("stdin".into()).spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim() == "q" => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        if stop.send(()).is_err() {
            debug!("stop request after shutdown began");
        }
    })?;
    if stopped.recv().is_err() {
        debug!("stdin reader exited without a stop request");
    }

    info!("shutting down");
    session.shutdown();
    hub.shutdown();
    Ok(())
}
