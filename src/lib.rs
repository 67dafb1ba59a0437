//! Pinmonl - bookmark monitor
//!
//! This library crate exposes the job dispatcher and the repository
//! metadata crawler so that the binary and the integration tests share them.

pub mod config;
pub mod events;
pub mod monler;
pub mod queue;
