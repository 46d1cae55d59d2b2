//! In-memory network of cores shared by the integration tests.
//!
//! Messages are queued on a single wire and delivered one at a time, with
//! each core's engine events pumped into its handler between deliveries.
//! Time only moves when a test calls [`Network::advance`].

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use avroute_core::protocol::messages::{AnnounceMessage, CostUpdateMessage};
use avroute_core::{
    ConnectionType, ControlRegistry, CoreMessage, EndpointInfo, PeerId, RoutingEvent,
    RoutingGraph, Source, SourceId,
};
use avroute_node::application::cost_distribution::{
    CostDistributionHandler, ProtocolTimings, TieLine,
};
use avroute_node::application::messaging::MessageSender;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::TryRecvError};
use uuid::Uuid;

const MESSAGE_PORT: u16 = 24900;

/// Upper bound on deliveries in one [`Network::settle`].
const MAX_STEPS: usize = 10_000;

#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: PeerId,
    pub to: PeerId,
    pub message: CoreMessage,
}

#[derive(Default)]
struct Wire {
    queue: VecDeque<Envelope>,
    delivered: Vec<Envelope>,
    muted: HashSet<PeerId>,
}

struct WireSender {
    from: PeerId,
    wire: Arc<Mutex<Wire>>,
}

impl MessageSender for WireSender {
    fn send(&self, peer: PeerId, message: CoreMessage) {
        self.wire.lock().queue.push_back(Envelope {
            from: self.from,
            to: peer,
            message,
        });
    }
}

pub struct Core {
    pub id: PeerId,
    pub name: String,
    pub graph: Arc<RoutingGraph>,
    pub handler: CostDistributionHandler,
    events: Mutex<broadcast::Receiver<RoutingEvent>>,
}

pub struct Network {
    wire: Arc<Mutex<Wire>>,
    cores: Vec<Core>,
    now: Instant,
}

/// Default timings without jitter, so regular updates land on whole periods.
pub fn timings() -> ProtocolTimings {
    ProtocolTimings {
        update_jitter: Duration::ZERO,
        ..ProtocolTimings::default()
    }
}

pub fn av() -> ConnectionType {
    ConnectionType::VIDEO | ConnectionType::AUDIO
}

pub fn empty_graph() -> Arc<RoutingGraph> {
    Arc::new(RoutingGraph::new(Arc::new(ControlRegistry::new())))
}

/// Adds a local source on its own device (`100 + id`).
pub fn add_local_source(graph: &RoutingGraph, id: u32) {
    graph.add_source(Source {
        id: SourceId(id),
        name: format!("Source {id}"),
        endpoint: EndpointInfo::new(100 + id, 0, 1),
        connection_type: av(),
        remote: false,
    });
}

impl Network {
    pub fn new() -> Self {
        Self {
            wire: Arc::new(Mutex::new(Wire::default())),
            cores: Vec::new(),
            now: Instant::now(),
        }
    }

    /// Adds and starts a core; returns its index.
    pub fn add_core(&mut self, name: &str, graph: Arc<RoutingGraph>, tie_lines: Vec<TieLine>) -> usize {
        let n = self.cores.len() as u8 + 1;
        let id = PeerId::new(
            SocketAddr::from(([10, 0, 0, n], MESSAGE_PORT)),
            Uuid::from_u128(u128::from(n)),
        );
        let events = Mutex::new(graph.subscribe());
        let sender = Arc::new(WireSender {
            from: id,
            wire: Arc::clone(&self.wire),
        });
        let handler =
            CostDistributionHandler::new(id, name, Arc::clone(&graph), sender, timings(), tie_lines);
        handler.start(self.now);
        self.cores.push(Core {
            id,
            name: name.to_string(),
            graph,
            handler,
            events,
        });
        self.cores.len() - 1
    }

    pub fn core(&self, index: usize) -> &Core {
        &self.cores[index]
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// `listener` hears `speaker`'s announce, then the network settles.
    pub fn announce(&self, listener: usize, speaker: usize) {
        let speaker = &self.cores[speaker];
        self.cores[listener].handler.handle_message(
            speaker.id,
            CoreMessage::Announce(AnnounceMessage {
                core_name: speaker.name.clone(),
                message_port: MESSAGE_PORT,
            }),
            self.now,
        );
        self.settle();
    }

    /// Drops everything `index` sends or would receive.
    pub fn mute(&self, index: usize) {
        self.wire.lock().muted.insert(self.cores[index].id);
    }

    /// Delivers queued messages and engine events until both run dry.
    pub fn settle(&self) {
        for _ in 0..MAX_STEPS {
            let pumped = self.pump_events();
            let next = self.wire.lock().queue.pop_front();
            match next {
                Some(envelope) => self.deliver(envelope),
                None if pumped => continue,
                None => return,
            }
        }
        panic!("network did not settle after {MAX_STEPS} steps");
    }

    /// Moves time forward in one-second steps, firing timers and settling
    /// after each step.
    pub fn advance(&mut self, by: Duration) {
        let end = self.now + by;
        while self.now < end {
            self.now = (self.now + Duration::from_secs(1)).min(end);
            for core in &self.cores {
                core.handler.process_timers(self.now);
            }
            self.settle();
        }
    }

    /// Every message delivered so far, in delivery order.
    pub fn delivered(&self) -> Vec<Envelope> {
        self.wire.lock().delivered.clone()
    }

    /// Cost updates delivered from `from` to `to`, oldest first.
    pub fn cost_updates(&self, from: usize, to: usize) -> Vec<CostUpdateMessage> {
        let (from, to) = (self.cores[from].id, self.cores[to].id);
        self.delivered()
            .into_iter()
            .filter(|e| e.from == from && e.to == to)
            .filter_map(|e| match e.message {
                CoreMessage::CostUpdate(update) => Some(update),
                _ => None,
            })
            .collect()
    }

    fn pump_events(&self) -> bool {
        let mut any = false;
        for core in &self.cores {
            loop {
                let event = core.events.lock().try_recv();
                match event {
                    Ok(event) => {
                        core.handler.handle_routing_event(&event, self.now);
                        any = true;
                    }
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
        }
        any
    }

    fn deliver(&self, envelope: Envelope) {
        {
            let mut wire = self.wire.lock();
            if wire.muted.contains(&envelope.from) || wire.muted.contains(&envelope.to) {
                return;
            }
            wire.delivered.push(envelope.clone());
        }
        if let Some(core) = self.cores.iter().find(|c| c.id == envelope.to) {
            core.handler
                .handle_message(envelope.from, envelope.message, self.now);
        }
    }
}
