//! Compile-time configuration constants used across the NIC driver crates.
//!
//! Nothing in here is tunable at runtime; per-device tunables live in
//! the driver's own configuration struct.

#![no_std]

pub mod memory;
pub mod time;
