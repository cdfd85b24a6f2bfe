//! Core data types for Tally

pub mod event;
pub mod ledger;
pub mod notify;
