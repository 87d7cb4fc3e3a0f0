//! # Tank Client Library
//!
//! Console client for the multiplayer tank game. It connects to the
//! authoritative server, issues requests for the player's own tank and keeps
//! a local mirror of every tank it has heard about.
//!
//! ## Architecture Overview
//!
//! ### Optimistic Own State
//! Requests about the player's own tank (move, type, health, destroy, spawn)
//! are applied to the local view at the moment they are sent. The server's
//! notifications overwrite that view whenever they arrive; there is no
//! rollback or replay, the last write simply wins.
//!
//! ### Remote Tanks
//! Other tanks are created by join or spawn notifications and updated by the
//! rest. Updates for an id that was never introduced are dropped.
//!
//! ### Concurrency
//! Three loops touch the mirror: a poll loop that drains inbound packets
//! every 10ms, an optional auto-move loop that wanders the tank every 3 to
//! 5 seconds, and the interactive command loop. All of them go through one
//! `tokio::sync::Mutex`. A shared running flag is the only way to stop the
//! background loops; shutdown gives the auto-move loop one second to notice.
//!
//! ## Module Organization
//!
//! ### Mirror Module (`mirror`)
//! The local projection of game state:
//! - Own tank view with optimistic updates
//! - Remote tank views keyed by peer id
//! - Relay group id and members
//! - Bounded history of chat messages
//!
//! ### Commands Module (`commands`)
//! Parsing of the interactive console commands and their usage errors.
//!
//! ### Network Module (`network`)
//! TCP connection, handshake, reader and writer tasks, the poll and
//! auto-move loops, and the request methods on [`ClientHandle`](network::ClientHandle).
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("127.0.0.1:33334").await?;
//!     client.start_polling();
//!
//!     let handle = client.handle();
//!     handle.request_move(10.0, 20.0, 90.0).await;
//!     handle.send_message("hello").await;
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod mirror;
pub mod network;
