//! Core domain + application logic for the spending bot.
//!
//! This crate is framework-agnostic: Telegram lives behind [`messaging::port::MessagingPort`]
//! and storage behind [`credentials::UserStore`] / [`aggregator::AggregateStore`],
//! implemented in adapter crates (or by the in-memory adapters here).

pub mod actor;
pub mod aggregator;
pub mod credentials;
pub mod domain;
pub mod errors;
pub mod expense;
pub mod logging;
pub mod messaging;
pub mod onboarding;
pub mod router;
pub mod scheduler;
pub mod settings;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod test_support;

pub use errors::{Error, Result};
