//! Test utilities for Cipherline
//!
//! Fixtures for building in-memory worlds of users and conversations, plus
//! async helpers for waiting on channels and conditions with a deadline.

pub mod async_helpers;
pub mod fixtures;

pub use async_helpers::*;
pub use fixtures::*;
