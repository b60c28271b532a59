//! Subscriber hub: one ZeroMQ ROUTER socket owned by a dedicated thread.
//!
//! Clients are DEALER sockets identified by their routing id. The hub registers a client on
//! `hello`, forwards every parsed request to the scheduler, and fans frames out to subscribers
//! with non-blocking sends so one slow client never holds up the rest.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, trace, warn};

use crate::protocol::{decode_client, ClientMessage, ServerMessage, WireFrame};


const POLL: Duration = Duration::from_millis(5);
/// Outbound frames buffered per subscriber before sends start being skipped.
const SEND_HWM: i32 = 64;


/// ZeroMQ routing id of a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(pub Vec<u8>);


/// A parsed client request, tagged with who sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub client: ClientId,
    pub message: ClientMessage,
}


/// Best-effort delivery to subscribers.
pub trait Broadcast: Send + Sync {
    fn broadcast(&self, frame: WireFrame);

    fn send_to(&self, client: &ClientId, frame: WireFrame);

    fn subscriber_count(&self) -> usize;
}


enum Outgoing {
    All(Arc<WireFrame>),
    To(ClientId, WireFrame),
}


/// Cheap cloneable sender side of the hub.
#[derive(Clone)]
pub struct HubHandle {
    outbound: Sender<Outgoing>,
    subscribers: Arc<AtomicUsize>,
}


impl Broadcast for HubHandle {
    fn broadcast(&self, frame: WireFrame) {
        if self.outbound.send(Outgoing::All(Arc::new(frame))).is_err() {
            trace!("hub stopped, dropping broadcast");
        }
    }

    fn send_to(&self, client: &ClientId, frame: WireFrame) {
        if self.outbound.send(Outgoing::To(client.clone(), frame)).is_err() {
            trace!("hub stopped, dropping reply");
        }
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Relaxed)
    }
}


/// The set of registered subscribers, mirrored into a shared count.
struct Subscribers {
    ids: HashSet<ClientId>,
    count: Arc<AtomicUsize>,
}


impl Subscribers {
    fn register(&mut self, client: &ClientId) -> bool {
        let added = self.ids.insert(client.clone());
        self.count.store(self.ids.len(), Ordering::Relaxed);
        added
    }

    fn remove(&mut self, client: &ClientId) -> bool {
        let removed = self.ids.remove(client);
        self.count.store(self.ids.len(), Ordering::Relaxed);
        removed
    }
}


pub struct Hub {
    handle: HubHandle,
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}


impl Hub {
    /// Bind the ROUTER socket and start serving. Parsed requests go to `requests`.
    pub fn bind(context: &zmq::Context, endpoint: &str, requests: Sender<Request>) -> Result<Self> {
        let socket = context.socket(zmq::ROUTER)?;
        socket.set_router_mandatory(true)?;
        socket.set_sndhwm(SEND_HWM)?;
        socket.set_linger(0)?;
        socket
            .bind(endpoint)
            .with_context(|| format!("failed to bind subscriber hub to {}", endpoint))?;
        info!(endpoint, "subscriber hub listening");

        let (outbound, pending) = crossbeam_channel::unbounded();
        let count = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let subscribers = Subscribers { ids: HashSet::new(), count: count.clone() };

        let worker = {
            let stop = stop.clone();
            thread::Builder::new()
                .name("hub".into())
                .spawn(move || serve(socket, subscribers, pending, requests, stop))?
        };

        Ok(Hub {
            handle: HubHandle { outbound, subscribers: count },
            stop,
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn stop_worker(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("hub thread panicked");
            }
        }
    }
}


impl Drop for Hub {
    fn drop(&mut self) {
        self.stop_worker();
    }
}


fn serve(
    socket: zmq::Socket,
    mut subscribers: Subscribers,
    pending: Receiver<Outgoing>,
    requests: Sender<Request>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::SeqCst) {
        match pending.recv_timeout(POLL) {
            Ok(outgoing) => deliver(&socket, &mut subscribers, outgoing),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        while let Ok(outgoing) = pending.try_recv() {
            deliver(&socket, &mut subscribers, outgoing);
        }
        receive(&socket, &mut subscribers, &requests);
    }
    debug!("hub stopped");
}


fn deliver(socket: &zmq::Socket, subscribers: &mut Subscribers, outgoing: Outgoing) {
    match outgoing {
        Outgoing::All(frame) => {
            let ids: Vec<ClientId> = subscribers.ids.iter().cloned().collect();
            for client in ids {
                send(socket, subscribers, &client, &frame);
            }
        }
        Outgoing::To(client, frame) => send(socket, subscribers, &client, &frame),
    }
}


/// One non-blocking send. A full queue skips this frame for this client only; an unreachable
/// client is dropped from the broadcast set.
fn send(socket: &zmq::Socket, subscribers: &mut Subscribers, client: &ClientId, frame: &WireFrame) {
    let kind = frame.kind_byte();
    let parts: [&[u8]; 3] = [&client.0, &kind, &frame.payload];
    match socket.send_multipart(parts, zmq::DONTWAIT) {
        Ok(()) => {}
        Err(zmq::Error::EAGAIN) => trace!(kind = ?frame.kind, "subscriber backed up, frame skipped"),
        Err(err) => {
            if subscribers.remove(client) {
                info!(error = %err, remaining = subscribers.ids.len(), "subscriber removed");
            }
        }
    }
}


fn receive(socket: &zmq::Socket, subscribers: &mut Subscribers, requests: &Sender<Request>) {
    loop {
        let parts = match socket.recv_multipart(zmq::DONTWAIT) {
            Ok(parts) => parts,
            Err(zmq::Error::EAGAIN) => return,
            Err(err) => {
                warn!(error = %err, "hub receive failed");
                return;
            }
        };
        let (client, body) = match parts.as_slice() {
            [id, body, ..] => (ClientId(id.clone()), body),
            _ => continue,
        };

        let message = match decode_client(body) {
            Ok(message) => message,
            Err(err) => {
                debug!(error = %err, "malformed client message");
                let rejected = ServerMessage::Rejected { reason: err.to_string() };
                if let Ok(frame) = WireFrame::message(&rejected) {
                    send(socket, subscribers, &client, &frame);
                }
                continue;
            }
        };

        match message {
            ClientMessage::Hello => {
                if subscribers.register(&client) {
                    info!(subscribers = subscribers.ids.len(), "subscriber joined");
                }
            }
            ClientMessage::Bye => {
                if subscribers.remove(&client) {
                    info!(subscribers = subscribers.ids.len(), "subscriber left");
                }
            }
            _ => {}
        }
        if requests.send(Request { client, message }).is_err() {
            debug!("scheduler gone, dropping request");
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::{decode_server, encode_client, ServerFrame};

    fn client(context: &zmq::Context, endpoint: &str) -> zmq::Socket {
        let socket = context.socket(zmq::DEALER).unwrap();
        socket.set_rcvtimeo(2000).unwrap();
        socket.connect(endpoint).unwrap();
        socket
    }

    fn say(socket: &zmq::Socket, message: &ClientMessage) {
        socket.send(encode_client(message).unwrap(), 0).unwrap();
    }

    fn hear(socket: &zmq::Socket) -> ServerFrame {
        decode_server(&socket.recv_multipart(0).unwrap()).unwrap()
    }

    #[test]
    fn test_subscribers_registry() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut subscribers = Subscribers { ids: HashSet::new(), count: count.clone() };
        let a = ClientId(b"a".to_vec());
        assert!(subscribers.register(&a));
        assert!(!subscribers.register(&a));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(subscribers.remove(&a));
        assert!(!subscribers.remove(&a));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_hello_registers_and_broadcast_reaches_client() {
        let context = zmq::Context::new();
        let endpoint = "inproc://hub-broadcast";
        let (requests, incoming) = crossbeam_channel::unbounded();
        let hub = Hub::bind(&context, endpoint, requests).unwrap();
        let handle = hub.handle();

        let dealer = client(&context, endpoint);
        say(&dealer, &ClientMessage::Hello);
        let request = incoming.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(request.message, ClientMessage::Hello);
        assert_eq!(handle.subscriber_count(), 1);

        let paused = ServerMessage::Paused { paused: true };
        handle.broadcast(WireFrame::message(&paused).unwrap());
        assert_eq!(hear(&dealer), ServerFrame::Message(paused));

        let rejected = ServerMessage::Rejected { reason: "no".into() };
        handle.send_to(&request.client, WireFrame::message(&rejected).unwrap());
        assert_eq!(hear(&dealer), ServerFrame::Message(rejected));

        say(&dealer, &ClientMessage::Bye);
        assert_eq!(incoming.recv_timeout(Duration::from_secs(2)).unwrap().message, ClientMessage::Bye);
        assert_eq!(handle.subscriber_count(), 0);
        hub.shutdown();
    }

    #[test]
    fn test_malformed_request_is_rejected_to_sender_only() {
        let context = zmq::Context::new();
        let endpoint = "inproc://hub-malformed";
        let (requests, incoming) = crossbeam_channel::unbounded();
        let hub = Hub::bind(&context, endpoint, requests).unwrap();

        let dealer = client(&context, endpoint);
        dealer.send(&b"{\"type\":\"dance\"}"[..], 0).unwrap();
        match hear(&dealer) {
            ServerFrame::Message(ServerMessage::Rejected { .. }) => {}
            other => panic!("unexpected frame {:?}", other),
        }
        assert!(incoming.try_recv().is_err());
        hub.shutdown();
    }
}
