//! Core domain and application logic for purgebot, a Telegram channel bulk-delete bot.
//!
//! This crate is framework-agnostic. The Bot API and MTProto live behind
//! ports (traits) implemented in adapter crates.

pub mod config;
pub mod deleter;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod flow;
pub mod logging;
pub mod messaging;
pub mod pacing;
pub mod ports;
pub mod security;
pub mod utils;
pub mod validation;

pub use errors::{Error, Result};
