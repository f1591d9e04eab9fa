use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use library::Indexer;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::spawn_session;

/// Watches `roots` and starts a new session once events settle for `debounce`.
/// The returned watcher must be kept alive.
pub fn start_watcher(
    indexer: Arc<Indexer>,
    roots: &[PathBuf],
    debounce: Duration,
) -> Result<RecommendedWatcher, notify::Error> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        NotifyConfig::default(),
    )?;

    let mut watched = 0;
    for root in roots {
        match watcher.watch(root, RecursiveMode::Recursive) {
            Ok(()) => {
                info!(
                    "Watching {} for changes (debounce {}s)",
                    root.display(),
                    debounce.as_secs()
                );
                watched += 1;
            }
            Err(err) => warn!("Failed to watch {}: {}", root.display(), err),
        }
    }
    if watched == 0 {
        warn!("No music folder could be watched; relying on scheduled scans");
    }

    tokio::spawn(async move {
        watch_loop(indexer, rx, debounce).await;
    });

    Ok(watcher)
}

async fn watch_loop(indexer: Arc<Indexer>, mut rx: UnboundedReceiver<Event>, debounce: Duration) {
    loop {
        let event = match rx.recv().await {
            Some(event) => event,
            None => break,
        };
        if !is_relevant_event(&event) {
            continue;
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => {
                    // Supersedes whatever session is still tagging.
                    spawn_session(Arc::clone(&indexer), "watch");
                    break;
                }
                maybe_event = rx.recv() => {
                    if maybe_event.is_none() {
                        return;
                    }
                }
            }
        }
    }
}

fn is_relevant_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}
