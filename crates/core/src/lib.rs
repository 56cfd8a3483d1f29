//! Domain model and pure helpers for the case inbox.
//!
//! Nothing in this crate performs I/O. The sync crate builds the stream
//! client, cache and controller on top of these types.

pub mod case;
pub mod error;
pub mod event_types;
pub mod query;
pub mod sla;
pub mod types;
