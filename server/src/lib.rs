//! Spore server library.
//!
//! This module exposes the server components for use in tests and binaries.

pub mod config;
pub mod connection;
pub mod hub;
pub mod physics;
pub mod player;
pub mod protocol;
pub mod registry;
pub mod spawn;
pub mod states;
pub mod store;
pub mod ws;
