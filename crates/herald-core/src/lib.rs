//! # herald-core
//!
//! Targeting and event-routing context for the Herald websocket server.
//!
//! This crate provides the pieces a transport needs to dispatch inbound
//! events and decide who receives the outgoing messages:
//!
//! - **Websocket** - Per-worker targeting context and dispatcher
//! - **Rooms** - Room store contract and an in-memory implementation
//! - **Pipeline** - Ordered middleware chain ending in the event handler
//! - **Push** - Resolved delivery handed back to the transport
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│  Websocket  │────▶│  Pipeline   │──▶ handler
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │
//!        │ Push              ▼
//!        └────────────┌─────────────┐
//!                     │  RoomStore  │
//!                     └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use herald_core::{ChainPipeline, ConnectionId, MemoryRoomStore, Websocket};
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! let mut ws = Websocket::new(Arc::new(MemoryRoomStore::new()), Arc::new(ChainPipeline));
//! ws.on("join", |ws, payload| {
//!     if let Some(room) = payload.data.as_str() {
//!         ws.join([room])?;
//!     }
//!     Ok(Value::Null)
//! });
//!
//! ws.set_sender(ConnectionId(1));
//! ws.call("join", json!("lobby")).unwrap();
//! ws.reset();
//! ```

pub mod auth;
pub mod error;
pub mod handler;
pub mod pipeline;
pub mod push;
pub mod rooms;
pub mod target;
pub mod websocket;

pub use auth::{Authenticatable, USER_ROOM_PREFIX};
pub use error::Error;
pub use handler::{EventRegistry, Handler};
pub use pipeline::{ChainPipeline, Middleware, Next, Pipeline};
pub use push::{Push, PushSink};
pub use rooms::{MemoryRoomStore, RoomConfig, RoomError, RoomStats, RoomStore};
pub use target::{ConnectionId, Payload, Target};
pub use websocket::Websocket;
