//! Async Rust client for PHD2's TCP/JSON-RPC event protocol.
//!
//! A [`client::Session`] dials one PHD2 instance, keeps a background reader
//! task that turns the event stream into derived state (current
//! [`events::AppState`], running guide statistics, settle progress), and
//! exposes the server's RPC surface as typed async methods.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod io;
pub mod rpc;
pub mod stats;
pub mod types;

pub use client::Session;
pub use config::{Config, Phd2Config, SettleParams};
pub use error::{Phd2Error, Result};
pub use events::{AppState, Phd2Event};
pub use stats::GuideStats;
pub use types::{Profile, SettleProgress, SingleFrameResult, Subframe};
