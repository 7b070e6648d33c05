//! Host-side client for the removable-storage shell of serial devices.
//!
//! Speaks the firmware's line-oriented `storage` commands over a raw
//! serial port or a serial-over-TCP bridge, turning the echo-laden byte
//! stream into reliable list, read, write, and delete operations.

pub mod config;
pub mod error;
pub mod session;
pub mod version;
