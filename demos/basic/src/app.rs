use log::{info, warn};

use refsync_runtime::{
    shared::{
        Endpoint, Instant, LoadScope, ObserverControl, ReferenceId, ReferenceOptions,
        SyncError, Value,
    },
    transport::{local::LocalHub, InitArgs, LOCAL},
    LoadKey, LoadStatus, Runtime, RuntimeConfig, RuntimeEvent,
};

const LAST_COUNT: i64 = 10;
const TICKS_PER_COUNT: u32 = 6;

enum Stage {
    Loading(LoadKey),
    Counting,
    Greeting,
    Done,
}

/// Two endpoints on one in-memory hub. `alice` owns a counter; `bob`
/// subscribes to it, watches it count up, then writes back a greeting.
pub struct App {
    alice: Runtime,
    bob: Runtime,
    counter: ReferenceId,
    stage: Stage,
    ticks: u32,
}

fn runtime(hub: &LocalHub, name: &str, now: &Instant) -> Runtime {
    let mut runtime = Runtime::new(RuntimeConfig::default(), Endpoint::named(name));
    runtime.register_transport(LOCAL, hub.factory());
    if let Err(err) = runtime.connect(LOCAL, None, &InitArgs::new(), true, now) {
        warn!("{} could not connect: {}", name, err);
    }
    runtime
}

impl App {
    pub fn new() -> Result<Self, SyncError> {
        let hub = LocalHub::new();
        let now = Instant::now();
        let mut alice = runtime(&hub, "alice", &now);
        let mut bob = runtime(&hub, "bob", &now);

        let counter = alice.registry_mut().create(
            Value::map([("count", Value::Int(0)), ("greeting", Value::Null)]),
            ReferenceOptions::new().label("counter"),
        )?;
        alice.registry_mut().hold(&counter)?;
        info!("alice created counter {}", counter);

        let stage = match bob.load(&mut LoadScope::new(), &counter, &now)? {
            LoadStatus::Pending(key) => Stage::Loading(key),
            LoadStatus::Ready(_) => Stage::Counting,
        };

        Ok(App {
            alice,
            bob,
            counter,
            stage,
            ticks: 0,
        })
    }

    /// Runs one tick of both endpoints. Returns `false` once the demo is
    /// over.
    pub fn update(&mut self) -> bool {
        let now = Instant::now();
        for runtime in [&mut self.alice, &mut self.bob] {
            runtime.receive_all_packets(&now);
            runtime.update(&now);
        }

        for event in self.alice.take_events() {
            log_event("alice", &event);
        }
        for event in self.bob.take_events() {
            log_event("bob", &event);
        }

        self.ticks += 1;
        self.stage = match std::mem::replace(&mut self.stage, Stage::Done) {
            Stage::Loading(key) => self.finish_loading(key, &now),
            Stage::Counting => self.count(),
            Stage::Greeting => self.check_greeting(),
            Stage::Done => Stage::Done,
        };

        for runtime in [&mut self.alice, &mut self.bob] {
            runtime.send_all_updates(&now);
        }

        !matches!(self.stage, Stage::Done)
    }

    fn finish_loading(&mut self, key: LoadKey, now: &Instant) -> Stage {
        match self.bob.poll_load(&key, now) {
            None => Stage::Loading(key),
            Some(Ok(id)) => {
                info!("bob subscribed to {}", id);
                let watched = self.bob.registry_mut().observe_property(&id, "count", |change| {
                    info!("bob sees count = {:?}", change.value);
                    ObserverControl::Continue
                });
                if let Err(err) = watched {
                    warn!("bob cannot observe the counter: {}", err);
                }
                Stage::Counting
            }
            Some(Err(err)) => {
                warn!("bob failed to load the counter: {}", err);
                Stage::Done
            }
        }
    }

    fn count(&mut self) -> Stage {
        if self.ticks % TICKS_PER_COUNT != 0 {
            return Stage::Counting;
        }
        let registry = self.alice.registry_mut();
        let next = registry
            .property(&self.counter, "count")
            .ok()
            .and_then(|value| value.as_int())
            .unwrap_or(0)
            + 1;
        if let Err(err) = registry.set_property(&self.counter, "count", Value::Int(next)) {
            warn!("alice could not count: {}", err);
            return Stage::Done;
        }
        if next < LAST_COUNT {
            return Stage::Counting;
        }

        let greeting = Value::text("thanks for counting");
        if let Err(err) = self
            .bob
            .registry_mut()
            .set_property(&self.counter, "greeting", greeting)
        {
            warn!("bob could not write back: {}", err);
            return Stage::Done;
        }
        Stage::Greeting
    }

    fn check_greeting(&mut self) -> Stage {
        match self.alice.registry().property(&self.counter, "greeting") {
            Ok(Value::Text(text)) => {
                info!("alice received greeting: {}", text);
                Stage::Done
            }
            _ => Stage::Greeting,
        }
    }

    pub fn shutdown(&mut self) {
        self.bob.shutdown();
        self.alice.shutdown();
    }
}

fn log_event(name: &str, event: &RuntimeEvent) {
    match event {
        RuntimeEvent::PeerDiscovered(endpoint) => info!("{} discovered {}", name, endpoint),
        RuntimeEvent::LoadFailed { error, .. } | RuntimeEvent::Error(error) => {
            warn!("{}: {}", name, error)
        }
        _ => {}
    }
}
