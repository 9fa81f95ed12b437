//! # Utility Modules
//!
//! Supporting utilities shared across the tunnel implementation.
//!
//! ## Components
//! - **Logging**: Structured logging configuration

pub mod logging;
