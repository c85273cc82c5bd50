use std::path::PathBuf;
use std::time::Duration;

use library::Library;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{info, warn};

/// Re-runs `sync` once the roots have been quiet for `debounce`.
/// Returns when the watcher channel closes.
pub async fn run(library: Library, debounce: Duration) -> Result<(), Box<dyn std::error::Error>> {
    let roots: Vec<PathBuf> = library.roots().to_vec();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        NotifyConfig::default(),
    )?;

    for root in &roots {
        match watcher.watch(root, RecursiveMode::Recursive) {
            Ok(()) => info!(
                "Watching {} for changes (debounce {}s)",
                root.display(),
                debounce.as_secs()
            ),
            Err(err) => warn!("Failed to watch {}: {}", root.display(), err),
        }
    }

    watch_loop(library, rx, debounce).await;
    drop(watcher);
    Ok(())
}

async fn watch_loop(library: Library, mut rx: UnboundedReceiver<Event>, debounce: Duration) {
    loop {
        let event = match rx.recv().await {
            Some(event) => event,
            None => break,
        };
        if !is_relevant_event(&event) {
            continue;
        }

        let mut deadline = Instant::now() + debounce;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    let sync_library = library.clone();
                    match tokio::task::spawn_blocking(move || sync_library.sync()).await {
                        Ok(Ok(report)) => {
                            if report.changed() {
                                info!(
                                    "Auto-sync: {} added, {} updated, {} removed",
                                    report.added, report.updated, report.removed
                                );
                            }
                        }
                        Ok(Err(err)) => warn!("Auto-sync failed: {}", err),
                        Err(err) => warn!("Auto-sync join error: {}", err),
                    }
                    break;
                }
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) if is_relevant_event(&event) => {
                            deadline = Instant::now() + debounce;
                        }
                        Some(_) => {}
                        None => return,
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

#[cfg(test)]
mod tests {
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};
    use notify::{Event, EventKind};

    use super::is_relevant_event;

    #[test]
    fn only_changes_restart_the_debounce() {
        assert!(is_relevant_event(&Event::new(EventKind::Create(CreateKind::File))));
        assert!(is_relevant_event(&Event::new(EventKind::Modify(ModifyKind::Any))));
        assert!(is_relevant_event(&Event::new(EventKind::Remove(RemoveKind::File))));
        assert!(!is_relevant_event(&Event::new(EventKind::Access(AccessKind::Any))));
        assert!(!is_relevant_event(&Event::new(EventKind::Other)));
    }
}
