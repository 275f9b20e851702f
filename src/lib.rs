//! Palisade - TCP Admission-Control Front-End
//!
//! This crate implements a TCP front-end that admits or rejects incoming
//! connections based on a per-client request-rate policy. It bounds both
//! request throughput (fixed-window counting per client) and the memory used
//! to track clients (TTL eviction driven by request volume).

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod server;
