//! Shared types for the PathSteer fabric.
//!
//! This crate contains:
//! - **Status models** — the JSON snapshot published by the Edge engine and
//!   read by the operator UI
//! - **Command language** — operator directives dropped into the command queue
//! - **Event log** — append-only JSONL event stream, one file per run
//! - **ID generation** — short run identifiers (`run_XXXXXXXX`)

pub mod command;
pub mod events;
pub mod ids;
pub mod status;
