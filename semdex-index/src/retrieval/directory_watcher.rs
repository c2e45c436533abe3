use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;
use tokio::sync::mpsc;

/// Receives collection names whose source directory changed.
#[async_trait]
pub trait ChangeHandler: Send + Sync + 'static {
    async fn collection_changed(&self, collection: String);
}

/// Maps a changed path to the collection that owns it: the first directory
/// below `root`. Hidden directories and the root itself own nothing.
pub fn collection_for(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    match relative.components().next()? {
        Component::Normal(name) => {
            let name = name.to_str()?;
            (!name.starts_with('.')).then(|| name.to_string())
        }
        _ => None,
    }
}

/// Watches the documents root and forwards debounced changes, one call per
/// collection per debounce window.
pub struct DirectoryWatcher {
    root: PathBuf,
    event_watcher: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    listener: tokio::task::JoinHandle<()>,
}

impl DirectoryWatcher {
    pub fn start<H: ChangeHandler>(root: &Path, debounce: Duration, handler: Arc<H>) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("creating documents root {}", root.display()))?;
        // Events arrive with canonical paths on some platforms
        let root = root.canonicalize()?;
        let (events_tx, events_rx) = mpsc::channel(128);

        // The listener needs to exist first or the debouncer thread may block
        let listener = tokio::task::spawn(Self::listen(events_rx, handler));

        let base = root.clone();
        let mut event_watcher = notify_debouncer_mini::new_debouncer(
            debounce,
            move |res: notify_debouncer_mini::DebounceEventResult| {
                let events = match res {
                    Ok(events) => events,
                    Err(err) => {
                        tracing::warn!("File watcher error: {}", err);
                        return;
                    }
                };
                let mut changed: Vec<String> = events
                    .iter()
                    .filter_map(|ev| collection_for(&base, &ev.path))
                    .collect();
                changed.sort();
                changed.dedup();
                for collection in changed {
                    // Runs on the debouncer's own thread, not in async context
                    if events_tx.blocking_send(collection).is_err() {
                        tracing::debug!("Watcher listener has stopped; dropping change");
                        return;
                    }
                }
            },
        )?;

        event_watcher
            .watcher()
            .watch(&root, notify::RecursiveMode::Recursive)?;
        tracing::info!("Watching {} (debounce {:?})", root.display(), debounce);

        Ok(Self {
            root,
            event_watcher,
            listener,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stops watching and lets already queued changes finish.
    pub async fn stop(self) {
        let Self {
            root,
            event_watcher,
            mut listener,
        } = self;
        drop(event_watcher);
        if tokio::time::timeout(Duration::from_secs(30), &mut listener)
            .await
            .is_err()
        {
            tracing::warn!("Watcher on {} did not drain in time", root.display());
            listener.abort();
        }
    }

    async fn listen<H: ChangeHandler>(events_rx: mpsc::Receiver<String>, handler: Arc<H>) {
        let handler_ref = &handler;
        let recv_stream = tokio_stream::wrappers::ReceiverStream::new(events_rx);
        recv_stream
            .for_each_concurrent(16, |collection| async move {
                tracing::debug!(collection = %collection, "Change detected");
                handler_ref.collection_changed(collection).await
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChangeHandler for RecordingHandler {
        async fn collection_changed(&self, collection: String) {
            self.calls.lock().unwrap().push(collection);
        }
    }

    #[test]
    fn test_collection_for() {
        let root = Path::new("/data/docs");
        assert_eq!(
            collection_for(root, Path::new("/data/docs/notes/a.txt")),
            Some("notes".to_string())
        );
        assert_eq!(
            collection_for(root, Path::new("/data/docs/notes")),
            Some("notes".to_string())
        );
        assert_eq!(collection_for(root, Path::new("/data/docs")), None);
        assert_eq!(collection_for(root, Path::new("/data/docs/.git/HEAD")), None);
        assert_eq!(collection_for(root, Path::new("/elsewhere/notes/a.txt")), None);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_listen_forwards_every_change() -> Result<()> {
        let (tx, rx) = mpsc::channel(128);
        let handler = Arc::new(RecordingHandler::default());
        let listener = tokio::spawn(DirectoryWatcher::listen(rx, Arc::clone(&handler)));

        tx.send("notes".to_string()).await?;
        tx.send("recipes".to_string()).await?;
        // Close the sender so that the listener loop terminates.
        drop(tx);
        listener.await?;

        let calls = handler.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls.contains(&"notes".to_string()));
        assert!(calls.contains(&"recipes".to_string()));
        assert!(logs_contain("Change detected"));
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_without_events() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let handler = Arc::new(RecordingHandler::default());
        let watcher = DirectoryWatcher::start(dir.path(), Duration::from_millis(50), handler)?;
        assert!(watcher.root().is_absolute());
        watcher.stop().await;
        Ok(())
    }
}
