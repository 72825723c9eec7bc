//! Packed supervised fine-tuning driver
//!
//! This crate wires the packer from `tunepack-data` into a training loop:
//! configuration loading, train/eval dataset construction, metrics logging,
//! checkpointing of the data position and the commands behind the `tunepack`
//! binary.

pub mod commands;
pub mod config;
pub mod datasets;
pub mod metrics;
pub mod train;
