// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The client-side convenience wrapper: connects to a named endpoint, spawns
//! a single pump, and exposes [`PumpHandle`]'s call surface directly.

use std::sync::Arc;

use crate::acceptor::ServerConfig;
use crate::error::{CallError, Error};
use crate::pump::PumpHandle;
use crate::registry::Registry;
use crate::transport::Endpoint;
use crate::value::Value;

/// Client-side configuration. Mirrors [`ServerConfig`]'s small-typed-value
/// shape; a client has no backlog or accept poll interval to tune, only the
/// default synchronous-call timeout.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub call_timeout: std::time::Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            call_timeout: crate::pump::DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl From<&ServerConfig> for ClientConfig {
    fn from(server: &ServerConfig) -> Self {
        ClientConfig {
            call_timeout: server.call_timeout,
        }
    }
}

/// One client connection: a single pump over a single endpoint, created
/// already connected or not created at all -- construction fails outright
/// rather than returning a disconnected client. A disconnected client is
/// never reused -- reconnect by constructing a new [`Client`].
pub struct Client {
    pump: PumpHandle,
    config: ClientConfig,
}

impl Client {
    /// Connects to the endpoint named `name`. Most clients never register
    /// any collections of their own (only the server dispatches inbound
    /// calls), so this constructor takes no registry; use
    /// [`Client::connect_with_registry`] for a peer that also serves calls
    /// back to the server.
    pub async fn connect(name: &str, config: ClientConfig) -> Result<Self, Error> {
        Self::connect_with_registry(name, config, Registry::new(), ()).await
    }

    /// As [`Client::connect`], but also dispatches inbound calls through
    /// `registry` against `state` -- useful for the rarer bidirectional
    /// case where the server calls back into a client.
    pub async fn connect_with_registry<T: Send + Sync + 'static>(
        name: &str,
        config: ClientConfig,
        registry: Registry<T>,
        state: T,
    ) -> Result<Self, Error> {
        let endpoint = Endpoint::connect(name).await?;
        let (reader, writer) = endpoint.into_split();
        let pump = PumpHandle::spawn(reader, writer, Arc::new(registry), Arc::new(state));
        Ok(Client { pump, config })
    }

    pub fn is_connected(&self) -> bool {
        self.pump.is_connected()
    }

    pub fn shutdown(&self) {
        self.pump.shutdown()
    }

    /// Non-blocking call. See [`PumpHandle::call`].
    pub fn call(
        &self,
        class_name: impl Into<String>,
        function_name: impl Into<String>,
        arguments: Vec<Value>,
        callback: crate::correlation::Callback,
    ) -> (bool, u64) {
        self.pump.call(class_name, function_name, arguments, callback)
    }

    pub fn cancel(&self, uid: u64) -> bool {
        self.pump.cancel(uid)
    }

    /// Blocking call using this client's configured default timeout.
    pub async fn call_synchronous(
        &self,
        class_name: impl Into<String>,
        function_name: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Result<Vec<Value>, CallError> {
        self.pump
            .call_synchronous(class_name, function_name, arguments, self.config.call_timeout)
            .await
    }

    /// As [`Client::call_synchronous`], but with an explicit timeout
    /// overriding the client's configured default.
    pub async fn call_synchronous_with_timeout(
        &self,
        class_name: impl Into<String>,
        function_name: impl Into<String>,
        arguments: Vec<Value>,
        timeout: std::time::Duration,
    ) -> Result<Vec<Value>, CallError> {
        self.pump
            .call_synchronous(class_name, function_name, arguments, timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acceptor::{Server, ServerConfig};
    use crate::registry::{Collection, FunctionDescriptor};
    use crate::value::Kind;

    fn add(_client: u64, args: &[Value], _state: &()) -> Result<Vec<Value>, String> {
        let Value::Int32(a) = args[0] else {
            return Err("expected Int32".into());
        };
        let Value::Int32(b) = args[1] else {
            return Err("expected Int32".into());
        };
        Ok(vec![Value::Int32(a + b)])
    }

    #[tokio::test]
    async fn two_arg_sum_end_to_end() {
        let name = format!("pipe_rpc_test_client_{}", std::process::id());
        let mut registry: Registry<()> = Registry::new();
        let mut math = Collection::new("Math");
        math.add_function(FunctionDescriptor::new(
            "add",
            vec![Kind::Int32, Kind::Int32],
            add,
        ));
        registry.register_collection(math);

        let server = Server::bind(&name, ServerConfig::default(), registry, (), ()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let client = Client::connect(&name, ClientConfig::default()).await.unwrap();
        let reply = client
            .call_synchronous("Math", "add", vec![Value::Int32(2), Value::Int32(3)])
            .await
            .unwrap();
        assert_eq!(reply, vec![Value::Int32(5)]);

        client.shutdown();
        server.shutdown();
    }

    #[tokio::test]
    async fn binary_payload_round_trip() {
        fn blob_len(_client: u64, args: &[Value], _state: &()) -> Result<Vec<Value>, String> {
            let Value::Binary(b) = &args[0] else {
                return Err("expected Binary".into());
            };
            Ok(vec![Value::UInt64(b.len() as u64)])
        }

        let name = format!("pipe_rpc_test_client_blob_{}", std::process::id());
        let mut registry: Registry<()> = Registry::new();
        let mut blob = Collection::new("Blob");
        blob.add_function(FunctionDescriptor::new("len", vec![Kind::Binary], blob_len));
        registry.register_collection(blob);

        let server = Server::bind(&name, ServerConfig::default(), registry, (), ()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let client = Client::connect(&name, ClientConfig::default()).await.unwrap();
        let payload = vec![0xABu8; 1_048_576];
        let reply = client
            .call_synchronous("Blob", "len", vec![Value::Binary(payload)])
            .await
            .unwrap();
        assert_eq!(reply, vec![Value::UInt64(1_048_576)]);

        client.shutdown();
        server.shutdown();
    }

    #[tokio::test]
    async fn connect_to_nothing_listening_fails() {
        let name = format!("pipe_rpc_test_client_missing_{}", std::process::id());
        let err = Client::connect(&name, ClientConfig::default()).await.unwrap_err();
        assert!(matches!(err, Error::Disconnected | Error::Io(_)));
    }
}
