use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::Serialize;

use crate::lens::Params;
use crate::sources::DomainSource;


/// Packet rate at which the network counts as fully loaded.
pub const SATURATION_RATE: f64 = 200.0;
const MAX_EDGES: usize = 20;
const LAYOUT_SEED: u64 = 42;


#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: usize,
    pub x: f64,
    pub y: f64,
}


#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub src: usize,
    pub dst: usize,
    pub packets: u32,
}


#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkRecord {
    pub packet_rate: f64,
    pub packet_count: u32,
    pub latency_ms: f64,
    pub error_rate: f64,
    pub errors: u32,
    pub is_burst: bool,
    pub throughput_mbps: f64,
    pub active_edges: Vec<Edge>,
    pub nodes: Vec<Node>,
    pub node_activity: Vec<f64>,
    pub load_level: f64,
}


/// Traffic over a small fixed graph, shaped by the rate, latency and burst sliders.
pub struct NetworkSource {
    rng: StdRng,
    nodes: Vec<Node>,
    activity: Vec<f64>,
}


impl NetworkSource {
    pub fn new() -> Self {
        NetworkSource {
            rng: StdRng::seed_from_u64(123),
            nodes: Vec::new(),
            activity: Vec::new(),
        }
    }

    /// Lay the graph out again when the node count changes. The layout seed is fixed so the
    /// same count always draws the same picture.
    fn ensure_nodes(&mut self, n: usize) {
        if self.nodes.len() == n {
            return;
        }
        let mut layout = StdRng::seed_from_u64(LAYOUT_SEED);
        self.nodes = (0..n)
            .map(|id| Node {
                id,
                x: layout.gen_range(0.1..0.9),
                y: layout.gen_range(0.1..0.9),
            })
            .collect();
        self.activity = vec![0.0; n];
    }
}


impl Default for NetworkSource {
    fn default() -> Self {
        Self::new()
    }
}


impl DomainSource for NetworkSource {
    type Record = NetworkRecord;

    fn tick(&mut self, _t: f64, params: &Params) -> NetworkRecord {
        let packet_rate = params.get("packet_rate");
        let error_rate = params.get("error_rate");
        let is_burst = params.get("burst") >= 0.5;
        let n = (params.get("num_nodes") as usize).max(2);
        self.ensure_nodes(n);

        let z: f64 = self.rng.sample(StandardNormal);
        let packet_count = (packet_rate * 0.2 + z * packet_rate * 0.05).max(0.0) as u32;
        let errors = (0..packet_count).filter(|_| self.rng.gen::<f64>() < error_rate).count() as u32;

        let load_level = (packet_rate / SATURATION_RATE).min(1.0);
        let surge = if is_burst { 3.0 } else { 1.0 };
        for activity in self.activity.iter_mut() {
            let spike = (self.rng.gen::<f64>() * load_level * surge).min(1.0);
            *activity = 0.7 * *activity + 0.3 * spike;
        }

        let n_edges = MAX_EDGES.min((packet_rate * 0.1) as usize + if is_burst { 5 } else { 0 });
        let mut active_edges = Vec::with_capacity(n_edges);
        for _ in 0..n_edges {
            let src = self.rng.gen_range(0..n);
            let dst = self.rng.gen_range(0..n);
            if src != dst {
                active_edges.push(Edge {
                    src,
                    dst,
                    packets: self.rng.gen_range(1..=5),
                });
            }
        }

        NetworkRecord {
            packet_rate,
            packet_count,
            latency_ms: params.get("latency"),
            error_rate,
            errors,
            is_burst,
            throughput_mbps: packet_count as f64 * 1.5 / 1000.0,
            active_edges,
            nodes: self.nodes.clone(),
            node_activity: self.activity.clone(),
            load_level,
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::lens::flow::Flow;
    use crate::lens::LensModel;

    #[test]
    fn test_layout_is_stable() {
        let params = Params::defaults(Flow::PARAMETERS);
        let mut a = NetworkSource::new();
        let mut b = NetworkSource::new();
        let first = a.tick(0.0, &params).nodes;
        assert_eq!(first.len(), 8);
        assert_eq!(first, b.tick(0.0, &params).nodes);
        assert!(first.iter().all(|n| n.x >= 0.1 && n.x < 0.9 && n.y >= 0.1 && n.y < 0.9));
    }

    #[test]
    fn test_node_count_follows_param() {
        let mut params = Params::defaults(Flow::PARAMETERS);
        let mut source = NetworkSource::new();
        source.tick(0.0, &params);
        params.set("num_nodes", 12.0).unwrap();
        let record = source.tick(0.2, &params);
        assert_eq!(record.nodes.len(), 12);
        assert_eq!(record.node_activity.len(), 12);
    }

    #[test]
    fn test_edges_and_activity() {
        let mut params = Params::defaults(Flow::PARAMETERS);
        params.set("packet_rate", 200.0).unwrap();
        params.set("burst", 1.0).unwrap();
        let mut source = NetworkSource::new();
        for i in 0..20 {
            let record = source.tick(i as f64 * 0.2, &params);
            assert!(record.is_burst);
            assert_eq!(record.load_level, 1.0);
            assert!(record.active_edges.len() <= MAX_EDGES);
            assert!(record.active_edges.iter().all(|e| e.src != e.dst && e.src < 8 && e.dst < 8));
            assert!(record.node_activity.iter().all(|a| (0.0..=1.0).contains(a)));
            assert!(record.errors <= record.packet_count);
        }
    }
}
