//! Input validation helpers for MCP server
//!
//! Security-critical validation functions for query length and path handling.

use anyhow::{bail, Result};

/// Maximum query length to prevent excessive embedding computation
pub const MAX_QUERY_LENGTH: usize = 8192;

/// Validate query length to prevent excessive embedding computation.
pub fn validate_query_length(query: &str) -> Result<()> {
    if query.len() > MAX_QUERY_LENGTH {
        bail!(
            "Query too long: {} bytes (max {})",
            query.len(),
            MAX_QUERY_LENGTH
        );
    }
    Ok(())
}
