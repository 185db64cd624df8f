//! Error types shared by every layer of the monitor.

pub mod types;
