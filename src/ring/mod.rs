// src/ring/mod.rs
//! Thread-safe circular byte buffer with blocking, overwrite and transfer modes

pub mod buffer;
pub mod config;
mod storage;
mod transfer;

pub use buffer::RingBuffer;
pub use config::RingConfig;
