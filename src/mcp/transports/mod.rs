//! MCP transport implementations
//!
//! Transports provide different ways to communicate with the MCP server.

mod stdio;

pub use stdio::serve_stdio;

#[cfg(feature = "serve")]
mod http;
#[cfg(feature = "serve")]
pub use http::serve_http;
