//! Rate limiting logic and counter state.

mod backend;
mod counter;
mod descriptor;
mod limiter;
mod options;
mod schema;

#[cfg(test)]
mod testing;

pub use backend::{CounterStore, UpsertRequest};
pub use counter::{now_ms, CounterRow, RateLimiterRes};
pub use descriptor::StorageKey;
pub use limiter::PersistentRateLimiter;
pub use options::LimiterOptions;
pub use schema::SchemaGuardian;
