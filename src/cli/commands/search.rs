//! `pommel search`: hybrid+rerank query against the index (§4.12).

use std::path::Path;

use anyhow::{Context, Result};

use pommel::config::Config;
use pommel::search::SearchOptions;
use pommel::{HnswIndex, Reranker, Store};

use crate::cli::display;

pub(crate) struct SearchArgs {
    pub query: String,
    pub limit: usize,
    pub json: bool,
    pub hybrid: bool,
    pub rerank: bool,
    pub levels: Vec<String>,
    pub path_prefix: Option<String>,
    pub no_content: bool,
    pub context: Option<usize>,
}

pub(crate) fn run(root: &Path, config: &Config, args: SearchArgs) -> Result<()> {
    let index_path = config.store.path_or_default(root);
    if !index_path.exists() {
        anyhow::bail!("no index found at {}; run 'pommel index' first", index_path.display());
    }

    let provider = config.build_provider_stack()?;
    let model = pommel::ModelInfo { model_name: provider.model_name().to_string(), dimensions: provider.dimensions() as u32 };
    let store = Store::open(&index_path, Some(&model)).context("failed to open index")?;

    let index_dir = pommel::resolve_index_dir(root);
    let vector_index = HnswIndex::try_load(&index_dir);
    let reranker = Reranker::new();

    let levels: Vec<pommel::ChunkLevel> =
        args.levels.iter().filter_map(|l| l.parse().ok()).collect();

    let options = SearchOptions {
        limit: args.limit,
        levels,
        path_prefix: args.path_prefix,
        hybrid: args.hybrid,
        rerank: args.rerank,
        ..SearchOptions::default()
    };

    let rt = tokio::runtime::Runtime::new().context("failed to start search runtime")?;
    let response = rt.block_on(pommel::search(
        &store,
        vector_index.as_deref(),
        provider.as_ref(),
        &reranker,
        &args.query,
        &options,
    ))?;
    drop(rt);

    if args.json {
        display::display_json(&response)?;
    } else {
        display::display_human(&response, root, args.no_content, args.context);
    }
    Ok(())
}
