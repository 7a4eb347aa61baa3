//! Tollbooth - Persistent Fixed-Window Rate Limiting
//!
//! This crate implements a fixed-window rate limiter whose counters live in a
//! relational database instead of process memory. Limit decisions survive
//! restarts and are shared by every instance pointed at the same table, with
//! each decision made by a single atomic upsert on the store side.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
