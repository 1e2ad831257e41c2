//! # Utility Modules
//!
//! Supporting utilities for cryptography, logging, timing and metrics.
//!
//! ## Components
//! - **Crypto**: AES-128-CBC session cipher and P-256 ECIES
//! - **Logging**: Structured logging configuration
//! - **Timeout**: Default deadlines and async timeout wrappers
//! - **Metrics**: Thread-safe observability counters
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom, OsRng)
//! - Memory zeroing for session keys (zeroize crate)

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod timeout;
