//! # Turn Server Library
//!
//! This library provides the authoritative server side of the turn-based
//! netcode: it collects client intents per game room, closes them into
//! numbered turns on a fixed interval, and broadcasts every turn to all
//! connected sessions. Clients never exchange state, only ordered intent
//! batches, so any client can reconstruct the game by replaying the turn
//! history through its own deterministic simulation.
//!
//! ## Core Responsibilities
//!
//! ### Turn Coordination
//! Each room buffers the intents that arrive between ticks and flushes
//! them as the next turn in the history. Turn numbers are the history
//! indices, so the sequence a client observes is gapless and immutable.
//!
//! ### Session Management
//! Sessions are keyed by client id within a room. A reconnecting client
//! replaces its old session, and anyone joining a running game receives
//! the full turn history up front so it can replay to the live state.
//!
//! ### Room Lifecycle
//! A room moves from lobby to active play to finished purely as a
//! function of elapsed time. A supervisor task starts the game when the
//! lobby closes and ends it when the game duration is spent; the same
//! constants back the `phase` query, so observers and timers agree.
//!
//! ## Architecture Design
//!
//! ### One Task Per Room
//! All mutation of a room's state happens on that room's driver task,
//! which processes registration, inbound frames and ticker firings from
//! a single `select!` loop. This keeps snapshot-append-clear atomic
//! without any locking.
//!
//! ### Length-Prefixed JSON Frames
//! Connections are plain TCP carrying length-prefixed JSON messages. A
//! malformed frame is logged and dropped; it never terminates the room
//! or the connection. A failed send to one session never blocks the
//! broadcast to the others.
//!
//! ## Module Organization
//!
//! - `room`: the turn coordinator, its phase computation and driver task
//! - `room_manager`: the game-id to room map and lifecycle supervisors
//! - `client`: the per-session handle used for broadcasting
//! - `network`: listener, join handshake and socket reader/writer tasks
//! - `config`: tunable intervals and durations

pub mod client;
pub mod config;
pub mod network;
pub mod room;
pub mod room_manager;
