//! Handler registration and read-side queries.

pub mod command_handlers;
pub mod query_handlers;
pub mod saga_handlers;
