//! # Observability Module
//!
//! Structured logging for the ParkFlow node.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use parkflow_node::observability::{init_logging, LogFormat};
//!
//! init_logging("info", LogFormat::Pretty);
//! ```

mod logging;

pub use logging::{default_directives, init_logging, LogFormat};
