//! Shared building blocks for the silt storage engine.
//!
//! This crate holds the types that cross crate boundaries: the [`types::Pair`]
//! record that every layer of the engine speaks, and the layered
//! [`config::Config`] loaded by the server binary.

pub mod config;
pub mod types;
