//! # Game Client Library
//!
//! This library provides the client side of the turn-based simulation:
//! a replica of the server's turn log plus a background pathfinding
//! worker that answers queries without ever blocking a simulation tick.
//!
//! ## Architecture Overview
//!
//! ### Authoritative Turns
//! The client never advances the game on its own. It sends intents to
//! the server, and the server's broadcast turns are the only thing that
//! moves the simulation forward. Joining mid-game delivers the full
//! turn history, so a replica can always be rebuilt by replaying turns
//! in order.
//!
//! ### Offloaded Pathfinding
//! Path searches run on a dedicated worker task behind a long-lived
//! channel. Requests are correlated by id, so any number of queries can
//! be in flight at once, and a query meters its answer out over
//! simulation ticks so the cost of a search never lands on a single
//! frame.
//!
//! ## Module Organization
//!
//! - `astar`: the grid model and the search the worker runs
//! - `network`: connection, join handshake, and the turn replica
//! - `pathfind`: tick-paced queries over the worker channel
//! - `worker`: the worker protocol, router, and background task
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::astar::TileGrid;
//! use client::network::GameClient;
//! use client::pathfind::{PathPoll, PathQuery};
//! use client::worker::PathWorker;
//! use shared::Cell;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let worker = PathWorker::spawn();
//! worker.initialize(TileGrid::new(64, 64)).await?;
//!
//! let mut client = GameClient::connect("127.0.0.1:8080", "demo", "player-1").await?;
//! let mut query = PathQuery::new(worker.clone(), Cell::new(0, 0), Cell::new(12, 9), 3);
//!
//! while let Some(turn) = client.next_turn().await {
//!     if query.poll(turn.turn_number) == PathPoll::Completed {
//!         let path = query.reconstruct_path()?;
//!         client.send_intent(serde_json::json!({ "path": path })).await?;
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod astar;
pub mod network;
pub mod pathfind;
pub mod worker;
