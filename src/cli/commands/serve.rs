//! `pommel serve`: starts either the loopback HTTP query API or the stdio MCP
//! transport for coding-agent integration (§4.12).

use std::path::Path;

use anyhow::Result;

use pommel::config::Config;

/// Default port for the loopback HTTP query API.
const DEFAULT_PORT: u16 = 7797;

pub(crate) fn run(root: &Path, config: &Config, port: Option<u16>, mcp: bool) -> Result<()> {
    if mcp {
        pommel::mcp::serve_stdio(root, config)
    } else {
        run_http(root, config, port.unwrap_or(DEFAULT_PORT))
    }
}

#[cfg(feature = "serve")]
fn run_http(root: &Path, config: &Config, port: u16) -> Result<()> {
    pommel::mcp::serve_http(root, port, config)
}

#[cfg(not(feature = "serve"))]
fn run_http(_root: &Path, _config: &Config, _port: u16) -> Result<()> {
    anyhow::bail!(
        "the loopback HTTP query API was not built into this binary; \
         rebuild with `--features serve`, or pass --mcp for the stdio transport"
    )
}
