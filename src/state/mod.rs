//! Shared crawl state
//!
//! Process-local state that every worker consults before touching the
//! remote API.
//!
//! # Components
//!
//! - `CredentialPool`: round-robin API credentials with exhaustion tracking
//! - `CircuitBreaker`: fails fast while the remote API is unreachable

mod circuit;
mod credentials;

pub use circuit::{CircuitBreaker, CircuitState};
pub use credentials::{AllExhausted, Credential, CredentialPool, CredentialStats, QuotaProbe};
