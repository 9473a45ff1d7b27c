//! Drop-folder watcher.
//!
//! Polls a directory (non-recursively) for `*.json` files. A file is read
//! once its size and modification time have been stable for the debounce
//! window; its whole content is one message. After dispatch the file is
//! deleted, so a crash between dispatch and delete replays it on restart
//! (upserts are idempotent). Outbound commands go to a sub-directory.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{RunningTransport, SessionContext, TransportError};
use crate::command::{DropOutbox, Outbound};
use crate::config::FileDropSettings;

#[derive(Debug, Clone)]
pub struct FileDropTransport {
    dir: PathBuf,
    settings: FileDropSettings,
}

impl FileDropTransport {
    pub fn new(dir: PathBuf, settings: FileDropSettings) -> Self {
        Self { dir, settings }
    }

    pub async fn start(self, ctx: SessionContext) -> Result<RunningTransport, TransportError> {
        let watch_err = |source| TransportError::Watch {
            path: self.dir.clone(),
            source,
        };
        let meta = tokio::fs::metadata(&self.dir).await.map_err(watch_err)?;
        if !meta.is_dir() {
            return Err(watch_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a directory",
            )));
        }

        let outbox = Arc::new(DropOutbox::new(self.dir.join(&self.settings.outbox)));
        let endpoint = self.dir.display().to_string();
        info!(%endpoint, outbox = %outbox.dir().display(), "watching drop folder");

        let task = tokio::spawn(watch_loop(self.dir, self.settings, ctx));
        Ok(RunningTransport {
            tasks: vec![task],
            outbound: Outbound::Directory(outbox),
            local_addr: None,
            endpoint,
            cleanup: None,
        })
    }
}

async fn watch_loop(dir: PathBuf, settings: FileDropSettings, ctx: SessionContext) {
    let mut debouncer = Debouncer::new(settings.debounce);
    let mut ticker = interval(settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let snapshot = match scan_directory(&dir).await {
            Ok(snapshot) => snapshot,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                ctx.fail(format!("watched directory {} disappeared", dir.display()));
                break;
            }
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "directory scan failed");
                continue;
            }
        };

        for path in debouncer.observe(snapshot, Instant::now()) {
            if ctx.cancel.is_cancelled() {
                break;
            }
            if let Err(err) = consume_file(&path, &ctx).await {
                warn!(path = %path.display(), error = %err, "failed to read drop file; will retry");
                debouncer.retry(&path, Instant::now());
            }
        }
    }
    debug!("drop-folder watcher stopped");
}

/// Read, dispatch, delete. Only a read failure is returned; a failed delete
/// is logged and the file is left for the debouncer to ignore.
async fn consume_file(path: &Path, ctx: &SessionContext) -> io::Result<()> {
    let bytes = tokio::fs::read(path).await?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    debug!(path = %path.display(), bytes = bytes.len(), "drop file read");
    ctx.dispatch(text).await;
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "drop file consumed"),
        Err(err) => warn!(path = %path.display(), error = %err, "failed to delete processed file"),
    }
    Ok(())
}

/// Size and modification time; any difference counts as a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

async fn scan_directory(dir: &Path) -> io::Result<Vec<(PathBuf, FileStamp)>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if !is_json {
            continue;
        }
        // Entries can vanish between listing and stat.
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        found.push((
            path,
            FileStamp {
                len: meta.len(),
                modified: meta.modified().ok(),
            },
        ));
    }
    Ok(found)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Settling,
    Consumed,
}

#[derive(Debug)]
struct Tracked {
    stamp: FileStamp,
    changed_at: Instant,
    phase: Phase,
}

/// Per-path debounce over successive directory snapshots.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    tracked: HashMap<PathBuf, Tracked>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            tracked: HashMap::new(),
        }
    }

    /// Feed a snapshot; returns paths that have been quiet for the whole
    /// window and were not handed out since their last change, sorted.
    pub fn observe(&mut self, snapshot: Vec<(PathBuf, FileStamp)>, now: Instant) -> Vec<PathBuf> {
        let mut seen = HashSet::with_capacity(snapshot.len());
        for (path, stamp) in snapshot {
            seen.insert(path.clone());
            match self.tracked.get_mut(&path) {
                Some(t) if t.stamp == stamp => {}
                Some(t) => {
                    t.stamp = stamp;
                    t.changed_at = now;
                    t.phase = Phase::Settling;
                }
                None => {
                    self.tracked.insert(
                        path,
                        Tracked {
                            stamp,
                            changed_at: now,
                            phase: Phase::Settling,
                        },
                    );
                }
            }
        }
        self.tracked.retain(|path, _| seen.contains(path));

        let window = self.window;
        let mut ready: Vec<PathBuf> = self
            .tracked
            .iter_mut()
            .filter(|(_, t)| t.phase == Phase::Settling && now.duration_since(t.changed_at) >= window)
            .map(|(path, t)| {
                t.phase = Phase::Consumed;
                path.clone()
            })
            .collect();
        ready.sort();
        ready
    }

    /// Put a path back into its debounce window.
    pub fn retry(&mut self, path: &Path, now: Instant) {
        if let Some(t) = self.tracked.get_mut(path) {
            t.changed_at = now;
            t.phase = Phase::Settling;
        }
    }

    pub fn tracked(&self) -> usize {
        self.tracked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(len: u64) -> FileStamp {
        FileStamp {
            len,
            modified: None,
        }
    }

    fn snap(entries: &[(&str, u64)]) -> Vec<(PathBuf, FileStamp)> {
        entries
            .iter()
            .map(|(p, len)| (PathBuf::from(p), stamp(*len)))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn file_is_ready_after_quiet_window() {
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        let t0 = Instant::now();
        assert!(debouncer.observe(snap(&[("a.json", 10)]), t0).is_empty());
        assert!(debouncer
            .observe(snap(&[("a.json", 10)]), t0 + Duration::from_millis(250))
            .is_empty());
        assert_eq!(
            debouncer.observe(snap(&[("a.json", 10)]), t0 + Duration::from_millis(500)),
            vec![PathBuf::from("a.json")]
        );
        // Handed out once.
        assert!(debouncer
            .observe(snap(&[("a.json", 10)]), t0 + Duration::from_secs(5))
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn growing_file_restarts_the_window() {
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        let t0 = Instant::now();
        debouncer.observe(snap(&[("a.json", 10)]), t0);
        debouncer.observe(snap(&[("a.json", 20)]), t0 + Duration::from_millis(400));
        assert!(debouncer
            .observe(snap(&[("a.json", 20)]), t0 + Duration::from_millis(600))
            .is_empty());
        assert_eq!(
            debouncer.observe(snap(&[("a.json", 20)]), t0 + Duration::from_millis(900)),
            vec![PathBuf::from("a.json")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn consumed_file_changing_again_is_redelivered() {
        let mut debouncer = Debouncer::new(Duration::ZERO);
        let t0 = Instant::now();
        assert_eq!(debouncer.observe(snap(&[("a.json", 1)]), t0).len(), 1);
        assert!(debouncer.observe(snap(&[("a.json", 1)]), t0).is_empty());
        assert_eq!(debouncer.observe(snap(&[("a.json", 2)]), t0).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_files_are_forgotten_and_retry_rearms() {
        let mut debouncer = Debouncer::new(Duration::ZERO);
        let t0 = Instant::now();
        debouncer.observe(snap(&[("a.json", 1), ("b.json", 1)]), t0);
        debouncer.observe(snap(&[("b.json", 1)]), t0);
        assert_eq!(debouncer.tracked(), 1);

        debouncer.retry(Path::new("b.json"), t0);
        assert_eq!(
            debouncer.observe(snap(&[("b.json", 1)]), t0),
            vec![PathBuf::from("b.json")]
        );
    }

    #[tokio::test]
    async fn scan_lists_only_json_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("B.JSON"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("partial.json.tmp"), "{").unwrap();
        std::fs::create_dir(dir.path().join("commands.json")).unwrap();

        let mut names: Vec<String> = scan_directory(dir.path())
            .await
            .unwrap()
            .into_iter()
            .map(|(p, _)| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["B.JSON", "a.json"]);
    }
}
