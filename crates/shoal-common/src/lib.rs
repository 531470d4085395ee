//! Common utilities for shoal
//!
//! This crate provides the error type shared by every shoal crate.

pub mod error;

pub use error::{Result, ShoalError};
