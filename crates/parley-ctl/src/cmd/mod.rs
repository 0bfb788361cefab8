//! CLI command modules.

pub mod chat;
pub mod http;
pub mod multicast;
pub mod status;
pub mod users;
