//! # PathSteer Controller dedup engine
//!
//! The edge duplicates packets pre-encryption across two tunnels during
//! protection windows; both copies arrive here bearing the same 5-tuple.
//! This engine is the first-arrival gate: it fingerprints each
//! decapsulated IP packet over stable header bytes, admits the first copy,
//! and transparently drops the second. Forwarded packets egress unchanged
//! — the gate never touches payload.

pub mod engine;
pub mod fingerprint;
pub mod metrics;
pub mod table;
