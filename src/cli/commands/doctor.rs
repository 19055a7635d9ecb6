//! `pommel doctor`: read-only aggregate health check (§4.13).

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use pommel::config::Config;

use crate::cli::signal::ExitCode;

pub(crate) fn run(root: &Path, config: &Config) -> Result<ExitCode> {
    let provider = config.build_provider_stack()?;
    let provider_kind = config.embedding.provider_or_default().to_string();
    let index_path = config.store.path_or_default(root);

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(pommel::health::run(&index_path, provider.as_ref(), &provider_kind));
    drop(rt);

    for check in &report.checks {
        let mark = if check.ok { "[✓]".green() } else { "[✗]".red() };
        println!("  {mark} {}: {}", check.name, check.detail);
    }

    if report.all_ok() {
        println!("\nAll checks passed.");
        Ok(ExitCode::Success)
    } else {
        println!("\nOne or more checks failed.");
        Ok(ExitCode::Failure)
    }
}
