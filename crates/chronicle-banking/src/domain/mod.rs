//! Accounts, their commands and events, and the money-transfer saga.

pub mod aggregates;
pub mod commands;
pub mod events;
pub mod sagas;
