/// In-memory network of runtimes for end-to-end testing
/// Every node shares one `LocalHub`, and time only moves when the test says so

use std::time::Duration;

use log::debug;

use refsync_runtime::{
    shared::{Endpoint, Instant, LoadScope, ReferenceId, SyncError},
    transport::{local::LocalHub, InitArgs, InterfaceKey, LOCAL},
    LoadStatus, Runtime, RuntimeConfig, RuntimeEvent,
};

/// Ticks `settle` runs. Enough for a subscribe, a redirect and the answers
/// to cross a three-hop path.
const SETTLE_ROUNDS: usize = 8;
const MAX_LOAD_ROUNDS: usize = 16;

pub struct TestNetwork {
    hub: LocalHub,
    now: Instant,
    config: RuntimeConfig,
    nodes: Vec<Runtime>,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            hub: LocalHub::new(),
            now: Instant::now(),
            config,
            nodes: Vec::new(),
        }
    }

    pub fn hub(&self) -> &LocalHub {
        &self.hub
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Adds a node reachable by every other global node, through a global
    /// `local` interface used as its default route.
    pub fn add_node(&mut self, name: &str) -> usize {
        let index = self.add_isolated_node(name);
        let now = self.now;
        self.nodes[index]
            .connect(LOCAL, None, &InitArgs::new(), true, &now)
            .unwrap();
        index
    }

    /// Adds a node with the `local` channel type registered but no
    /// interfaces. Connect it with `link`.
    pub fn add_isolated_node(&mut self, name: &str) -> usize {
        let index = self.nodes.len();
        let endpoint = Endpoint::named(name).with_instance(index as u64 + 1);
        let mut runtime = Runtime::new(self.config.clone(), endpoint);
        runtime.register_transport(LOCAL, self.hub.factory());
        debug!("Added node {} as {}", index, endpoint);
        self.nodes.push(runtime);
        index
    }

    /// Opens point-to-point interfaces between two nodes, one on each side.
    pub fn link(&mut self, a: usize, b: usize) -> (InterfaceKey, InterfaceKey) {
        let now = self.now;
        let a_endpoint = self.endpoint(a);
        let b_endpoint = self.endpoint(b);
        let a_key = self.nodes[a]
            .connect(LOCAL, Some(&b_endpoint), &InitArgs::new(), false, &now)
            .unwrap();
        let b_key = self.nodes[b]
            .connect(LOCAL, Some(&a_endpoint), &InitArgs::new(), false, &now)
            .unwrap();
        (a_key, b_key)
    }

    pub fn endpoint(&self, node: usize) -> Endpoint {
        *self.nodes[node].local_endpoint()
    }

    pub fn node(&self, node: usize) -> &Runtime {
        &self.nodes[node]
    }

    pub fn node_mut(&mut self, node: usize) -> &mut Runtime {
        &mut self.nodes[node]
    }

    pub fn advance(&mut self, duration: Duration) {
        self.now.add_duration(duration);
    }

    /// One round of the runtime loop on every node, flushing updates
    /// without waiting for the flush interval.
    pub fn tick(&mut self) {
        let now = self.now;
        for runtime in self.nodes.iter_mut() {
            runtime.receive_all_packets(&now);
            runtime.update(&now);
            runtime.flush_now();
            runtime.send_all_updates(&now);
        }
    }

    pub fn settle(&mut self) {
        for _ in 0..SETTLE_ROUNDS {
            self.tick();
        }
    }

    /// Loads `id` on `node`, ticking the network until the load resolves.
    pub fn load(&mut self, node: usize, id: &ReferenceId) -> Result<ReferenceId, SyncError> {
        let mut scope = LoadScope::new();
        let start = self.now;
        let key = match self.nodes[node].load(&mut scope, id, &start)? {
            LoadStatus::Ready(id) => return Ok(id),
            LoadStatus::Pending(key) => key,
        };

        for _ in 0..MAX_LOAD_ROUNDS {
            let now = self.now;
            if let Some(result) = self.nodes[node].poll_load(&key, &now) {
                scope.finish(id);
                return result;
            }
            self.tick();
        }
        panic!("Load of {} on node {} never resolved", id, node);
    }

    pub fn events(&mut self, node: usize) -> Vec<RuntimeEvent> {
        self.nodes[node].take_events()
    }

    /// Shuts a node down and starts a fresh runtime with the same endpoint
    /// on the hub. Storage must be added again by the caller.
    pub fn restart(&mut self, node: usize) -> &mut Runtime {
        let endpoint = self.endpoint(node);
        self.nodes[node].shutdown();

        let now = self.now;
        let mut runtime = Runtime::new(self.config.clone(), endpoint);
        runtime.register_transport(LOCAL, self.hub.factory());
        runtime
            .connect(LOCAL, None, &InitArgs::new(), true, &now)
            .unwrap();
        self.nodes[node] = runtime;
        &mut self.nodes[node]
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}
