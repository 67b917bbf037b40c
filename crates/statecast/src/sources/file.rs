//! Watched-file source
//!
//! Watches the directory containing the configured file and yields the whole
//! file every time it is created or modified. Bursts of events (editors and
//! games often write in several steps) are coalesced into one read of the
//! latest contents. The contents are passed on as raw bytes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use statecast_core::{ChannelError, ChannelSource, RawPayload};

/// Quiet period after the last qualifying event before the file is read
const QUIET_MILLIS: u64 = 100;

struct ActiveWatch {
    // dropping the watcher stops event delivery
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

/// File source watching `path`
pub struct FileSource {
    path: PathBuf,
    watch: Option<ActiveWatch>,
}

impl FileSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path, watch: None }
    }
}

/// Directory to watch for `path`
fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Whether `event` reports new contents for the file named like `target`
///
/// The watch is non-recursive on the file's own directory, so comparing file
/// names is enough and sidesteps symlinked or relative path prefixes.
fn touches(event: &Event, target: &Path) -> bool {
    let content_changed = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_));
    content_changed
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some() && p.file_name() == target.file_name())
}

#[async_trait]
impl ChannelSource for FileSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn open(&mut self) -> Result<(), ChannelError> {
        // Bridge notify's sync callback into the tokio world.
        let (event_tx, events) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = event_tx.send(res);
        })
        .map_err(|e| ChannelError::Watch(e.to_string()))?;

        let dir = watch_dir(&self.path);
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| ChannelError::Watch(format!("failed to watch {}: {}", dir.display(), e)))?;

        info!(path = ?self.path, "file watch started");
        self.watch = Some(ActiveWatch {
            _watcher: watcher,
            events,
        });
        Ok(())
    }

    async fn read(&mut self) -> Result<RawPayload, ChannelError> {
        let Self { path, watch } = self;
        let watch = watch.as_mut().ok_or(ChannelError::NotOpen)?;

        // Phase 1: wait for an event that touches the file
        loop {
            match watch.events.recv().await {
                Some(Ok(event)) if touches(&event, path) => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => warn!(error = %e, "file watcher error"),
                None => return Err(ChannelError::Disconnected),
            }
        }

        // Phase 2: swallow follow-up events until a quiet period passes
        let quiet = Duration::from_millis(QUIET_MILLIS);
        loop {
            match tokio::time::timeout(quiet, watch.events.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) => return Err(ChannelError::Disconnected),
                Err(_) => break,
            }
        }

        // Phase 3: the latest contents are the payload, undecoded
        let contents = tokio::fs::read(&*path).await?;
        debug!(path = ?path, bytes = contents.len(), "file read");
        Ok(contents)
    }

    async fn close(&mut self) {
        if self.watch.take().is_some() {
            debug!(path = ?self.path, "file watch stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind};
    use std::fs;
    use tempfile::TempDir;
    use tokio::time::{sleep, timeout};

    fn event(kind: EventKind, path: &str) -> Event {
        Event {
            kind,
            paths: vec![PathBuf::from(path)],
            attrs: Default::default(),
        }
    }

    #[test]
    fn test_watch_dir() {
        assert_eq!(watch_dir(Path::new("/tmp/game/state.json")), PathBuf::from("/tmp/game"));
        assert_eq!(watch_dir(Path::new("state.json")), PathBuf::from("."));
    }

    #[test]
    fn test_touches_modify_of_target() {
        let target = Path::new("/tmp/game/state.json");
        let ev = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Any)),
            "/private/tmp/game/state.json",
        );
        assert!(touches(&ev, target));
    }

    #[test]
    fn test_touches_create_of_target() {
        let target = Path::new("state.json");
        let ev = event(EventKind::Create(CreateKind::File), "/work/state.json");
        assert!(touches(&ev, target));
    }

    #[test]
    fn test_ignores_other_files() {
        let target = Path::new("/tmp/game/state.json");
        let ev = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Any)),
            "/tmp/game/state.json.tmp",
        );
        assert!(!touches(&ev, target));
    }

    #[test]
    fn test_ignores_remove_and_access() {
        let target = Path::new("/tmp/game/state.json");
        let removed = event(EventKind::Remove(RemoveKind::File), "/tmp/game/state.json");
        let accessed = event(EventKind::Access(AccessKind::Any), "/tmp/game/state.json");
        assert!(!touches(&removed, target));
        assert!(!touches(&accessed, target));
    }

    #[tokio::test]
    async fn test_read_before_open() {
        let mut source = FileSource::new(PathBuf::from("/tmp/state.json"));
        assert!(matches!(source.read().await, Err(ChannelError::NotOpen)));
    }

    #[tokio::test]
    async fn test_open_missing_directory_fails() {
        let mut source = FileSource::new(PathBuf::from("/nonexistent/dir/state.json"));
        assert!(matches!(source.open().await, Err(ChannelError::Watch(_))));
    }

    #[tokio::test]
    async fn test_file_source_yields_latest_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"id":1,"hp":100}"#).unwrap();

        let mut source = FileSource::new(path.clone());
        source.open().await.unwrap();

        // Wait for watcher to initialize
        sleep(Duration::from_millis(150)).await;

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            fs::write(&writer_path, r#"{"id":1,"hp":90}"#).unwrap();
            sleep(Duration::from_millis(10)).await;
            fs::write(&writer_path, r#"{"id":1,"hp":80}"#).unwrap();
        });

        let payload = timeout(Duration::from_secs(5), source.read())
            .await
            .expect("file change should be observed")
            .unwrap();
        assert_eq!(payload, br#"{"id":1,"hp":80}"#);

        writer.await.unwrap();
        source.close().await;
    }
}
