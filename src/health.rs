//! Health/doctor diagnostics (§4.13)
//!
//! A read-only aggregate over provider health, Store statistics, and schema
//! compatibility, exposed via `pommel doctor`. Never mutates the index.

use std::time::Duration;

use crate::embedder::Provider;
use crate::store::{ModelInfo, Store, StoreError};

/// One named check and its outcome, rendered as a `[✓]`/`[✗]` line by the CLI.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

/// Aggregate diagnostic report for `pommel doctor`.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    /// True if every check passed. The CLI exits non-zero when this is false.
    pub fn all_ok(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }
}

/// Runs the doctor checks: provider reachability, index presence and stats, schema
/// compatibility, and (for remote/hosted providers) `embedding.url` reachability.
///
/// Read-only; never writes to the store or reindexes anything.
pub async fn run(
    index_path: &std::path::Path,
    provider: &dyn Provider,
    provider_kind: &str,
) -> HealthReport {
    let mut checks = Vec::new();

    checks.push(check_provider_health(provider).await);

    match open_store_readonly(index_path, provider) {
        Ok(store) => {
            checks.push(check_schema(&store, provider));
            checks.push(check_index_stats(&store, provider));
        }
        Err(e) => {
            checks.push(CheckResult {
                name: "index".to_string(),
                ok: false,
                detail: format!("{e}"),
            });
        }
    }

    if provider_kind != "local" {
        checks.push(check_remote_reachable(provider).await);
    }

    HealthReport { checks }
}

async fn check_provider_health(provider: &dyn Provider) -> CheckResult {
    match provider.health().await {
        Ok(()) => CheckResult {
            name: "embedding provider".to_string(),
            ok: true,
            detail: format!("{} ({} dims)", provider.model_name(), provider.dimensions()),
        },
        Err(e) => CheckResult {
            name: "embedding provider".to_string(),
            ok: false,
            detail: e.to_string(),
        },
    }
}

fn open_store_readonly(index_path: &std::path::Path, provider: &dyn Provider) -> Result<Store, StoreError> {
    if !index_path.exists() {
        return Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("index not found at {}; run 'pommel index' first", index_path.display()),
        )));
    }
    let model = ModelInfo {
        model_name: provider.model_name().to_string(),
        dimensions: provider.dimensions() as u32,
    };
    Store::open(index_path, Some(&model))
}

fn check_schema(_store: &Store, _provider: &dyn Provider) -> CheckResult {
    // Store::open already enforced schema/model compatibility above; reaching here
    // means the open succeeded, so schema and model are compatible.
    CheckResult {
        name: "schema".to_string(),
        ok: true,
        detail: format!("v{}", crate::store::CURRENT_SCHEMA_VERSION),
    }
}

fn check_index_stats(store: &Store, provider: &dyn Provider) -> CheckResult {
    let model = ModelInfo {
        model_name: provider.model_name().to_string(),
        dimensions: provider.dimensions() as u32,
    };
    match store.stats(&model) {
        Ok(stats) => CheckResult {
            name: "index".to_string(),
            ok: true,
            detail: format!(
                "{} files, {} chunks, {} embeddings",
                stats.file_count, stats.chunk_count, stats.embedding_count
            ),
        },
        Err(e) => CheckResult {
            name: "index".to_string(),
            ok: false,
            detail: e.to_string(),
        },
    }
}

async fn check_remote_reachable(provider: &dyn Provider) -> CheckResult {
    let cancel = crate::embedder::CancelToken::new();
    let probe = tokio::time::timeout(Duration::from_secs(5), provider.embed_one("health check", &cancel)).await;
    match probe {
        Ok(Ok(_)) => CheckResult {
            name: "remote reachability".to_string(),
            ok: true,
            detail: "reachable".to_string(),
        },
        Ok(Err(e)) => CheckResult {
            name: "remote reachability".to_string(),
            ok: false,
            detail: e.to_string(),
        },
        Err(_) => CheckResult {
            name: "remote reachability".to_string(),
            ok: false,
            detail: "timed out after 5s".to_string(),
        },
    }
}
