//! Realtime case synchronization for the moderation console.
//!
//! Keeps a two-tier cache of moderation cases (the filtered list and the
//! selected case's detail) consistent with the bot backend. Change
//! notifications arrive over a persistent event stream and are turned into
//! scoped refetches; user mutations go through the REST API.

pub mod actions;
pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod controller;
pub mod messages;
pub mod reconnect;
pub mod session;
pub mod stream;
