//! Utility functions and types

pub mod stats;
