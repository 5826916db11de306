// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use clap::Parser;

use pipe_rpc::{Collection, FunctionDescriptor, Kind, Registry, Server, ServerConfig, Value};

#[derive(Parser)]
struct Cli {
    /// Endpoint name to listen on (a named pipe path on Windows, a socket
    /// path elsewhere).
    name: String,

    #[arg(long, default_value_t = pipe_rpc::acceptor::DEFAULT_BACKLOG)]
    backlog: usize,
}

struct ServerState {}

fn echo(_client: u64, args: &[Value], _state: &ServerState) -> Result<Vec<Value>, String> {
    Ok(args.to_vec())
}

fn add(_client: u64, args: &[Value], _state: &ServerState) -> Result<Vec<Value>, String> {
    let Value::Int32(a) = args[0] else {
        return Err("expected Int32".into());
    };
    let Value::Int32(b) = args[1] else {
        return Err("expected Int32".into());
    };
    Ok(vec![Value::Int32(a + b)])
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    env_logger::init();

    let args = Cli::parse();

    let mut registry: Registry<ServerState> = Registry::new();

    let mut default_collection = Collection::new("Default");
    default_collection.add_function(FunctionDescriptor::new("echo", vec![Kind::UInt64], echo));
    registry.register_collection(default_collection);

    let mut math = Collection::new("Math");
    math.add_function(FunctionDescriptor::new(
        "add",
        vec![Kind::Int32, Kind::Int32],
        add,
    ));
    registry.register_collection(math);

    let config = ServerConfig {
        backlog: args.backlog,
        ..ServerConfig::default()
    };

    let _server = match Server::bind(&args.name, config, registry, ServerState {}, ()) {
        Ok(server) => server,
        Err(e) => {
            log::error!("failed to bind endpoint {}: {e}", args.name);
            std::process::exit(-1);
        }
    };

    log::info!("listening on {}", args.name);

    // The acceptor and per-connection pumps run on their own tokio tasks;
    // this task just keeps the runtime alive until killed.
    std::future::pending::<()>().await;
}
