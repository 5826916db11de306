// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The server acceptor (component C8): maintains a backlog of listening
//! endpoint instances, promotes connected ones to pumps, and reaps dead
//! ones.
//!
//! A scan/promote/reap loop over a fixed-size pool of pre-provisioned
//! instances is a poor fit for `interprocess`'s listener, which already
//! accepts connections one at a time without needing a caller-managed
//! backlog of OS handles. This module keeps the *contract* (a configurable
//! `backlog` of concurrently-acceptable connections, a
//! connect/disconnect/message notification surface, reaping of dead pumps)
//! while realizing it as `backlog` concurrent `accept()` tasks against one
//! shared listener rather than `backlog` separate named-pipe instances,
//! since `interprocess::local_socket::Listener` already unifies connection
//! acceptance across platforms for us.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::watch;

use crate::error::Error;
use crate::pump::PumpHandle;
use crate::registry::Registry;
use crate::transport::{Endpoint, EndpointListener};

/// Notified from the acceptor task; callbacks must not block -- each is
/// invoked inline on the acceptor's tokio task, so a slow handler delays
/// promotion/reaping of every other connection.
pub trait ServerHandlers: Send + Sync + 'static {
    fn on_connect(&self, _connection_id: u64) {}
    fn on_disconnect(&self, _connection_id: u64) {}
}

impl ServerHandlers for () {}

/// How many connections the acceptor keeps simultaneously promotable.
pub const DEFAULT_BACKLOG: usize = 8;

/// How long the acceptor's reap pass sleeps between scans.
pub const DEFAULT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(20);

/// Server-side configuration as a small typed value rather than a pile of
/// positional constructor arguments.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub backlog: usize,
    pub poll_interval: std::time::Duration,
    pub call_timeout: std::time::Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            backlog: DEFAULT_BACKLOG,
            poll_interval: DEFAULT_POLL_INTERVAL,
            call_timeout: crate::pump::DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// A running server: owns the acceptor task and the shared registry/state.
/// Dropping this stops accepting new connections but does not forcibly
/// close already-promoted pumps (call [`Server::shutdown`] for that).
pub struct Server {
    shutdown: watch::Sender<bool>,
    connections: Arc<std::sync::Mutex<Vec<(u64, PumpHandle)>>>,
}

impl Server {
    /// Binds `name` and starts accepting up to `config.backlog` connections
    /// concurrently, dispatching inbound calls through `registry` against
    /// shared `state`. Each accepted connection is promoted to its own
    /// [`PumpHandle`]; a pump whose connection reports `!is_connected()` is
    /// reaped and its slot freed for reuse.
    pub fn bind<T, H>(
        name: &str,
        config: ServerConfig,
        registry: Registry<T>,
        state: T,
        handlers: H,
    ) -> Result<Self, Error>
    where
        T: Send + Sync + 'static,
        H: ServerHandlers,
    {
        let listener = Arc::new(EndpointListener::bind(name)?);
        let registry = Arc::new(registry);
        let state = Arc::new(state);
        let handlers = Arc::new(handlers);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connections = Arc::new(std::sync::Mutex::new(Vec::new()));

        tokio::spawn(run_acceptor(
            listener,
            config,
            registry,
            state,
            handlers,
            shutdown_rx,
            connections.clone(),
        ));

        Ok(Server {
            shutdown: shutdown_tx,
            connections,
        })
    }

    /// Stops accepting new connections and signals every promoted pump to
    /// shut down. The shutdown signal terminates each pump loop after its
    /// in-flight operations are cancelled.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        for (_, pump) in self.connections.lock().unwrap().iter() {
            pump.shutdown();
        }
    }

    /// Snapshot of currently-live connection handles, for tests and
    /// diagnostics.
    pub fn live_connections(&self) -> usize {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, p)| p.is_connected())
            .count()
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_acceptor<T, H>(
    listener: Arc<EndpointListener>,
    config: ServerConfig,
    registry: Arc<Registry<T>>,
    state: Arc<T>,
    handlers: Arc<H>,
    mut shutdown_rx: watch::Receiver<bool>,
    connections: Arc<std::sync::Mutex<Vec<(u64, PumpHandle)>>>,
) where
    T: Send + Sync + 'static,
    H: ServerHandlers,
{
    let next_connection_id = AtomicU64::new(1);
    let mut accept_slots = tokio::task::JoinSet::new();

    for _ in 0..config.backlog.max(1) {
        spawn_accept(&listener, &mut accept_slots);
    }

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("acceptor: shutdown requested, stopping accept loop");
                    break;
                }
            }

            Some(accepted) = accept_slots.join_next() => {
                match accepted {
                    Ok(Ok(endpoint)) => {
                        let connection_id = next_connection_id.fetch_add(1, Ordering::Relaxed);
                        promote(endpoint, connection_id, &registry, &state, &handlers, &connections);
                        spawn_accept(&listener, &mut accept_slots);
                    }
                    Ok(Err(e)) => {
                        warn!("acceptor: accept failed: {e}");
                        spawn_accept(&listener, &mut accept_slots);
                    }
                    Err(join_err) => {
                        warn!("acceptor: accept task panicked: {join_err}");
                        spawn_accept(&listener, &mut accept_slots);
                    }
                }
            }

            _ = tokio::time::sleep(config.poll_interval) => {
                reap(&connections, &handlers);
            }
        }
    }

    accept_slots.abort_all();
}

fn spawn_accept(
    listener: &Arc<EndpointListener>,
    slots: &mut tokio::task::JoinSet<Result<Endpoint, Error>>,
) {
    let listener = listener.clone();
    slots.spawn(async move { listener.accept().await });
}

fn promote<T, H>(
    endpoint: Endpoint,
    connection_id: u64,
    registry: &Arc<Registry<T>>,
    state: &Arc<T>,
    handlers: &Arc<H>,
    connections: &Arc<std::sync::Mutex<Vec<(u64, PumpHandle)>>>,
) where
    T: Send + Sync + 'static,
    H: ServerHandlers,
{
    let (reader, writer) = endpoint.into_split();
    let pump = PumpHandle::spawn(reader, writer, registry.clone(), state.clone());
    handlers.on_connect(connection_id);
    connections.lock().unwrap().push((connection_id, pump));
}

/// Drops pump handles whose connection has gone away, notifying
/// `handlers.on_disconnect(connection_id)` for each.
fn reap<H: ServerHandlers>(
    connections: &Arc<std::sync::Mutex<Vec<(u64, PumpHandle)>>>,
    handlers: &Arc<H>,
) {
    let mut guard = connections.lock().unwrap();
    let mut dead = Vec::new();
    guard.retain(|(id, pump)| {
        let alive = pump.is_connected();
        if !alive {
            dead.push(*id);
        }
        alive
    });
    drop(guard);
    for id in dead {
        handlers.on_disconnect(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Kind, Value};
    use std::sync::atomic::AtomicUsize;

    fn echo(_client: u64, args: &[Value], _state: &()) -> Result<Vec<Value>, String> {
        Ok(args.to_vec())
    }

    #[tokio::test]
    async fn accepts_promotes_and_serves_a_connection() {
        let name = format!("pipe_rpc_test_acceptor_{}", std::process::id());
        let mut registry: Registry<()> = Registry::new();
        let mut default_collection = crate::registry::Collection::new("Default");
        default_collection.add_function(crate::registry::FunctionDescriptor::new(
            "echo",
            vec![Kind::UInt64],
            echo,
        ));
        registry.register_collection(default_collection);

        let server = Server::bind(&name, ServerConfig::default(), registry, (), ()).unwrap();

        let endpoint = Endpoint::connect(&name).await.unwrap();
        let (reader, writer) = endpoint.into_split();
        let client = PumpHandle::spawn(reader, writer, Arc::new(Registry::<()>::new()), Arc::new(()));

        // Give the acceptor a moment to promote the connection.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(server.live_connections(), 1);

        let reply = client
            .call_synchronous(
                "Default",
                "echo",
                vec![Value::UInt64(99)],
                std::time::Duration::from_millis(500),
            )
            .await
            .unwrap();
        assert_eq!(reply, vec![Value::UInt64(99)]);

        server.shutdown();
    }

    #[derive(Clone, Default)]
    struct CountingHandlers {
        connects: Arc<AtomicUsize>,
        disconnects: Arc<AtomicUsize>,
    }

    impl ServerHandlers for CountingHandlers {
        fn on_connect(&self, _connection_id: u64) {
            self.connects.fetch_add(1, Ordering::Relaxed);
        }
        fn on_disconnect(&self, _connection_id: u64) {
            self.disconnects.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn disconnect_is_reaped_and_notified() {
        let name = format!("pipe_rpc_test_acceptor_reap_{}", std::process::id());
        let registry: Registry<()> = Registry::new();
        let mut config = ServerConfig::default();
        config.poll_interval = std::time::Duration::from_millis(10);
        let handlers = CountingHandlers::default();
        let server = Server::bind(&name, config, registry, (), handlers.clone()).unwrap();

        let endpoint = Endpoint::connect(&name).await.unwrap();
        let (reader, writer) = endpoint.into_split();
        let client = PumpHandle::spawn(reader, writer, Arc::new(Registry::<()>::new()), Arc::new(()));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(server.live_connections(), 1);
        assert_eq!(handlers.connects.load(Ordering::Relaxed), 1);

        client.shutdown();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert_eq!(server.live_connections(), 0);
        assert_eq!(handlers.disconnects.load(Ordering::Relaxed), 1);

        server.shutdown();
    }
}
