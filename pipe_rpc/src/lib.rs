// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! `pipe_rpc` -- a local, bidirectional, request/reply RPC runtime over
//! host-OS named pipes (Windows named pipes; Unix domain sockets standing
//! in for the macOS `-req`/`-rep` FIFO pair, per [`transport`]'s module
//! docs). A single server process owns a listening endpoint; one or more
//! client processes connect to it and invoke named remote procedures
//! organized into named collections, looked up by a mangled signature
//! derived from the function name and its argument kinds.
//!
//! ```text
//! caller -> correlation table (reserve uid)
//!        -> value codec (encode)
//!        -> pump (enqueue write)
//!        -> transport (write)
//!        -> peer transport (read)
//!        -> peer pump -> peer registry (dispatch)
//!        -> reply encoded back
//!        -> originating pump -> correlation table (take) -> caller's callback
//! ```
//!
//! | Component | Module |
//! |---|---|
//! | C1 Value codec | [`value`] |
//! | C2 Async I/O primitive | [`asyncio`] |
//! | C3 Transport endpoint | [`transport`] |
//! | C4 Framer | [`framer`] |
//! | C5 Function registry | [`registry`] |
//! | C6 Correlation table | [`correlation`] |
//! | C7 Connection pump | [`pump`] |
//! | C8 Server acceptor | [`acceptor`] |
//!
//! Top-level entry points: [`acceptor::Server`] (server side) and
//! [`client::Client`] (client side).

pub mod acceptor;
pub mod asyncio;
pub mod client;
pub mod correlation;
pub mod error;
pub mod framer;
pub mod pump;
pub mod registry;
pub mod transport;
pub mod value;

pub use acceptor::{Server, ServerConfig, ServerHandlers};
pub use client::{Client, ClientConfig};
pub use error::{CallError, Error};
pub use pump::PumpHandle;
pub use registry::{Collection, FunctionDescriptor, Registry};
pub use value::{Authenticate, AuthenticateReply, FunctionCall, FunctionReply, Kind, Value};
