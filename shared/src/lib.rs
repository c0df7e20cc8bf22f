//! Wire protocol and gameplay tuning shared between the server and clients.

pub mod config;
pub mod protocol;
