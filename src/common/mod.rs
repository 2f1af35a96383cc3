//! Shared building blocks: errors, domain types, channels and the broker seam

pub mod backoff;
pub mod channels;
pub mod errors;
pub mod traits;
pub mod types;
