// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use clap::{Parser, Subcommand};

use pipe_rpc::{Client, ClientConfig, Value};

#[derive(Parser)]
struct Cli {
    /// Endpoint name to connect to, matching the server's.
    name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Calls `Default::echo(value)` and prints the reply.
    Echo { value: u64 },
    /// Calls `Math::add(a, b)` and prints the reply.
    Add { a: i32, b: i32 },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    env_logger::init();

    let args = Cli::parse();

    let client = match Client::connect(&args.name, ClientConfig::default()).await {
        Ok(client) => client,
        Err(e) => {
            log::error!("failed to connect to {}: {e}", args.name);
            std::process::exit(-1);
        }
    };

    let result = match args.command {
        Command::Echo { value } => {
            client
                .call_synchronous("Default", "echo", vec![Value::UInt64(value)])
                .await
        }
        Command::Add { a, b } => {
            client
                .call_synchronous("Math", "add", vec![Value::Int32(a), Value::Int32(b)])
                .await
        }
    };

    let reply = match result {
        Ok(reply) => reply,
        Err(e) => {
            log::error!("call failed: {e}");
            std::process::exit(-1);
        }
    };

    println!("{reply:?}");

    client.shutdown();
}
