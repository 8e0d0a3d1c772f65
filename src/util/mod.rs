//! Cross-cutting helpers: retry-with-backoff and secret scrubbing.

pub mod retry;
pub mod scrub;
