//! Typed Ethereum bindings for the SONM smart contracts.
//!
//! [`contracts::SonmContract`] embeds the ABI and creation bytecode of every
//! SONM contract. [`ethereum::BoundContract`] calls, transacts with and reads
//! the event logs of a deployed instance through any
//! [`ethereum::ContractBackend`].

pub mod commands;
pub mod config;
pub mod contracts;
pub mod ethereum;
