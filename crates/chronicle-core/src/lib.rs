//! Chronicle core: contracts and primitives for the event-sourcing engine.
//!
//! This crate defines the persistence contracts (event, snapshot and saga
//! stores), the aggregate and saga abstractions, the message envelope carried
//! on the bus, and the small shared utilities every other crate depends on.
//! It contains no runtime machinery and no storage backend.

pub mod aggregate;
pub mod clock;
pub mod codec;
pub mod command;
pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
pub mod repository;
pub mod saga;
pub mod sequential;
pub mod snapshot;
pub mod transient;
