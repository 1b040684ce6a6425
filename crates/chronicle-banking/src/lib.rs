//! Chronicle reference domain: bank accounts and money transfers.
//!
//! Accounts are event-sourced aggregates. A transfer withdraws from the
//! source account and is completed by a saga that credits the target, or
//! refunds the source if the credit has not happened within a day.

pub mod application;
pub mod domain;
