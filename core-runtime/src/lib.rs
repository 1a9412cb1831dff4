//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the library reader:
//! - Logging and tracing infrastructure
//! - Configuration management (bridges, filter preferences, load toggles)
//! - Event bus system
//!
//! ## Overview
//!
//! Every other core crate depends on this one for its configuration types and
//! logging conventions. Scan and library events raised by the reader are
//! broadcast through [`events::EventBus`] so hosts can observe the pipeline
//! without subscribing to the collection streams themselves.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
