use thiserror::Error;

/// Top-level error type for the `doorlink-api` crate.
///
/// Covers the wire-level failure modes: HTTP transport and URL
/// construction. Stream end-of-life is not an error (`next_event`
/// returns `Ok(None)`), and malformed `state` payloads are dropped and
/// logged in the SSE layer. `doorlink-core` maps these into
/// domain-level variants.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}
