//! # Tank Server Library
//!
//! Authoritative server for the multiplayer tank game. It owns the canonical
//! record of every connected tank, validates what clients report, and fans
//! each accepted change out to the other participants.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative State
//! The server holds one [`TankInfo`](shared::TankInfo) per active peer:
//! position, direction, type, health and destruction. Clients report
//! changes to their own tank; the server clamps and stores them, then tells
//! everyone else.
//!
//! ### Session Lifecycle
//! Each connection is `Connecting` until its tank is allocated, `Active`
//! while it takes part, and `Disconnected` once it leaves. Joining peers
//! receive a full catch-up of every existing tank before anything else.
//!
//! ### Relay Group
//! With two or more active peers the server keeps a single relay group over
//! all of them and rebuilds it on every join and leave. Free-text messages
//! are relayed through the server or addressed to the group.
//!
//! ## Architecture Design
//!
//! ### Single Actor
//! All state lives in [`GameServer`](game::GameServer), driven by one task
//! that drains a queue of [`ServerMessage`](network::ServerMessage)s. Every
//! event is processed to completion before the next, so no locking is needed
//! and notification order per peer is deterministic.
//!
//! ### TCP Transport
//! Each peer has its own TCP connection carrying length-prefixed bincode
//! frames. A reader task forwards packets to the actor; a writer task drains
//! a per-peer queue fed through [`MessageSink`](channel::MessageSink).
//!
//! ## Module Organization
//!
//! - `registry`: tank records and the clamped mutation operations
//! - `session`: peer ids, capacity and lifecycle state
//! - `relay`: relay group membership
//! - `game`: connect and disconnect orchestration, catch-up
//! - `router`: per-request handling and fan-out
//! - `console`: operator commands
//! - `channel`: the outbound delivery seam
//! - `network`: sockets, handshake and the actor loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind("127.0.0.1:33334", 32).await?;
//!     let handle = server.handle();
//!     let running = tokio::spawn(server.run());
//!
//!     // ... later
//!     handle.shutdown();
//!     running.await?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod console;
pub mod error;
pub mod game;
pub mod network;
pub mod registry;
pub mod relay;
pub mod router;
pub mod session;
