//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the offline media core:
//! - Logging and tracing infrastructure
//! - Configuration management and product policy values
//! - Event bus for download and playback events
//!
//! ## Overview
//!
//! Every other core crate depends on this one. It establishes the logging
//! conventions, the fail-fast capability checks, and the broadcast channel
//! that carries events to the host.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
