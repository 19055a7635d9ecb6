//! `pommel watch`: recursive filesystem watcher with debounce (§4.10).
//!
//! Wraps a `notify` recommended watcher in a background thread, coalesces bursts of
//! events per path into a single event per path over a debounce window, filters paths
//! through `indexing.include_patterns`/`exclude_patterns`, and drives the Indexer one
//! event at a time via `process_event`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use pommel::{FileEvent, Indexer};

/// Default glob patterns when `indexing.include_patterns` is unset: every extension
/// the language registry knows how to parse.
fn default_include_patterns() -> Vec<String> {
    pommel::language::REGISTRY
        .all()
        .flat_map(|def| def.extensions.iter().map(|ext| format!("**/*.{ext}")))
        .collect()
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/.pommel/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ]
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?);
    }
    builder.build().context("failed to build glob set")
}

/// Decides which filesystem events matter and maps `notify::Event` to `FileEvent`.
struct Debouncer {
    include: GlobSet,
    exclude: GlobSet,
    root: PathBuf,
}

impl Debouncer {
    fn accepts(&self, path: &Path) -> bool {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        self.include.is_match(rel) && !self.exclude.is_match(rel)
    }

    fn to_file_event(&self, event: &Event) -> Option<FileEvent> {
        let path = event.paths.first()?.clone();
        if !self.accepts(&path) {
            return None;
        }
        match event.kind {
            EventKind::Create(_) => Some(FileEvent::Created(path)),
            EventKind::Modify(_) => Some(FileEvent::Modified(path)),
            EventKind::Remove(_) => Some(FileEvent::Deleted(path)),
            _ => None,
        }
    }
}

/// Watches `root` recursively, debouncing bursts of filesystem events per path into a
/// single event each `debounce` window, and drives `indexer` with the result.
///
/// Runs until `should_stop` returns true (checked once per debounce tick), so Ctrl+C
/// handling in the CLI layer can request a clean shutdown between windows.
pub async fn watch(
    root: &Path,
    indexer: &Indexer,
    include_patterns: Option<Vec<String>>,
    exclude_patterns: Option<Vec<String>>,
    debounce: Duration,
    no_ignore: bool,
    mut should_stop: impl FnMut() -> bool,
) -> Result<()> {
    let include = build_globset(&include_patterns.unwrap_or_else(default_include_patterns))?;
    let exclude = if no_ignore {
        build_globset(&[])?
    } else {
        build_globset(&exclude_patterns.unwrap_or_else(default_exclude_patterns))?
    };
    let debouncer = Debouncer { include, exclude, root: root.to_path_buf() };

    // Bounded channel from the notify callback thread into this async loop (§5:
    // bounded mpsc for the Watcher -> Indexer stream, watcher blocks when full).
    let (tx, mut rx) = mpsc::channel::<Event>(256);

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if tx.blocking_send(event).is_err() {
                    tracing::debug!("watch channel closed, dropping event");
                }
            }
            Err(e) => tracing::warn!(error = %e, "watch error"),
        },
        notify::Config::default(),
    )
    .context("failed to start filesystem watcher")?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .with_context(|| format!("failed to watch {}", root.display()))?;

    tracing::info!(root = %root.display(), debounce_ms = debounce.as_millis() as u64, "watching for changes");

    let mut pending: HashMap<PathBuf, FileEvent> = HashMap::new();
    loop {
        if should_stop() {
            break;
        }

        // Collect whatever arrives within one debounce window, then flush.
        let deadline = tokio::time::Instant::now() + debounce;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                event = rx.recv() => match event {
                    Some(event) => {
                        if let Some(file_event) = debouncer.to_file_event(&event) {
                            pending.insert(file_event.path().to_path_buf(), file_event);
                        }
                    }
                    None => break,
                },
            }
        }

        if pending.is_empty() {
            continue;
        }

        let events: Vec<FileEvent> = pending.drain().map(|(_, v)| v).collect();
        for event in &events {
            let rel = pommel::rel_display(event.path(), root);
            match indexer.process_event(root, event.clone()).await {
                Ok(stats) => {
                    tracing::debug!(
                        path = %rel,
                        indexed = stats.files_indexed,
                        deleted = stats.files_deleted,
                        skipped = stats.files_skipped,
                        "watch: reindexed"
                    );
                }
                Err(e) => tracing::warn!(path = %rel, error = %e, "watch: reindex failed"),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_include_patterns_nonempty() {
        assert!(!default_include_patterns().is_empty());
    }

    #[test]
    fn test_debouncer_accepts_matches_include_excludes_exclude() {
        let debouncer = Debouncer {
            include: build_globset(&["**/*.rs".to_string()]).unwrap(),
            exclude: build_globset(&["**/target/**".to_string()]).unwrap(),
            root: PathBuf::from("/proj"),
        };
        assert!(debouncer.accepts(Path::new("/proj/src/main.rs")));
        assert!(!debouncer.accepts(Path::new("/proj/target/debug/main.rs")));
        assert!(!debouncer.accepts(Path::new("/proj/src/main.py")));
    }

    #[test]
    fn test_build_globset_rejects_invalid_pattern() {
        assert!(build_globset(&["[".to_string()]).is_err());
    }
}
