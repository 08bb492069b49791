//! Shared utilities for the forge compiler toolkit.
//!
//! Everything the member crates have in common lives here: source spans for
//! the builder's source map, the workspace-wide error type, and the logging
//! interfaces that builders and optimization passes report through.

pub mod error;
pub mod logging;
pub mod span;

pub use error::{ForgeError, ForgeResult};
pub use logging::{CaptureHandler, LogHandler, LogLevel, Logger};
pub use span::{Position, Span};
