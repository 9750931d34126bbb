//! Shared forge-access primitives: credential rotation and request pacing.
//!
//! Both the discovery source (search API calls) and the repo acquirer
//! (clones, archive downloads) go through these before touching the forge.

pub mod credentials;
pub mod rate_limit;

pub use credentials::{CredentialLease, CredentialPool, PoolError};
pub use rate_limit::RateLimiter;
