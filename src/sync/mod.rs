//! Per-file metadata synchronization.
//!
//! [`SyncCoordinator`] is the single entry point through which the rest of
//! an application reads and stores photo metadata. It guarantees:
//!
//! - at most one rewrite per file is in flight, while different files are
//!   rewritten in parallel;
//! - rapid successive stores to one file coalesce: the value written after
//!   the current rewrite is always the newest one, intermediate values may
//!   never reach disk;
//! - reads see the newest stored value even before it is on disk;
//! - a failed rewrite never damages the file, because new content is staged
//!   in a sibling temp file and renamed over the original.
//!
//! Rewrites run on the blocking pool of a tokio runtime. Results are
//! published as [`SyncEvent`]s.
//!
//! ```rust,no_run
//! use iris_meta::config::Config;
//! use iris_meta::sync::{SyncCoordinator, SyncEvent};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let coordinator = SyncCoordinator::builder()
//!     .from_config(&Config::default())
//!     .build()?;
//! let mut events = coordinator.subscribe();
//!
//! let mut metadata = coordinator.get("left-eye.jpg")?;
//! metadata.comment = Some("check again in 6 months".into());
//! coordinator.store("left-eye.jpg", metadata);
//!
//! if let SyncEvent::Failed { path, reason } = events.recv().await? {
//!     eprintln!("failed to store metadata for {}: {reason}", path.display());
//! }
//! # Ok(())
//! # }
//! ```

mod pending;
mod replace;
mod task;

pub use pending::PathState;
pub use replace::{AtomicFileReplacer, FileReplacer};

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{Notify, broadcast};

use crate::config::{Config, StoreOption, SyncSettings};
use crate::error::{CodecError, SyncError};
use crate::exif::{JpegCodec, MetadataCodec};
use crate::files;
use crate::metadata::Metadata;
use pending::{PendingWriteStore, Submission};

/// Outcome of one rewrite, published to all subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The file now holds the metadata of one `store` call.
    Stored { path: PathBuf },
    /// A rewrite failed; the file is unchanged.
    Failed { path: PathBuf, reason: String },
}

/// Builder for [`SyncCoordinator`].
#[derive(Default)]
pub struct SyncCoordinatorBuilder {
    codec: Option<Arc<dyn MetadataCodec>>,
    replacer: Option<Arc<dyn FileReplacer>>,
    store_option: StoreOption,
    settings: SyncSettings,
    runtime: Option<Handle>,
}

impl SyncCoordinatorBuilder {
    /// Take the store policy and engine settings from `config`.
    pub fn from_config(mut self, config: &Config) -> Self {
        self.store_option = config.metadata.store_option;
        self.settings = config.sync.clone();
        self
    }

    pub fn store_option(mut self, store_option: StoreOption) -> Self {
        self.store_option = store_option;
        self
    }

    /// Use a custom codec instead of [`JpegCodec`].
    pub fn codec(mut self, codec: Arc<dyn MetadataCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Use a custom replacer instead of [`AtomicFileReplacer`].
    pub fn replacer(mut self, replacer: Arc<dyn FileReplacer>) -> Self {
        self.replacer = Some(replacer);
        self
    }

    /// Runtime whose blocking pool runs the rewrites. Defaults to the
    /// runtime `build` is called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<SyncCoordinator, SyncError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| SyncError::NoRuntime)?,
        };
        let store_option = self.store_option;
        let codec = self
            .codec
            .unwrap_or_else(|| Arc::new(JpegCodec::new(store_option)));
        let replacer = self
            .replacer
            .unwrap_or_else(|| Arc::new(AtomicFileReplacer::new(self.settings.temp_suffix.clone())));
        let (events, _) = broadcast::channel(self.settings.event_capacity.max(1));

        Ok(SyncCoordinator {
            inner: Arc::new(Inner {
                codec,
                replacer,
                pending: PendingWriteStore::new(),
                store_option,
                events,
                idle: Notify::new(),
                runtime,
            }),
        })
    }
}

/// Reads and stores photo metadata with coalesced, crash-safe rewrites.
///
/// Cheap to clone; clones share the same pending writes. Create one per
/// application and hand clones to whoever needs it.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    codec: Arc<dyn MetadataCodec>,
    replacer: Arc<dyn FileReplacer>,
    pending: PendingWriteStore,
    store_option: StoreOption,
    events: broadcast::Sender<SyncEvent>,
    /// Signalled whenever a path becomes idle.
    idle: Notify,
    runtime: Handle,
}

impl SyncCoordinator {
    pub fn builder() -> SyncCoordinatorBuilder {
        SyncCoordinatorBuilder::default()
    }

    /// Newest known metadata of `path`.
    ///
    /// Returns the value of a pending store if there is one, otherwise reads
    /// the file. Corrupt metadata is logged and reported as empty metadata;
    /// only a file that is not a supported photo is an error.
    pub fn get(&self, path: impl AsRef<Path>) -> Result<Metadata, SyncError> {
        let key = files::canonical_path(path.as_ref());
        if let Some(pending) = self.inner.pending.latest(&key) {
            return Ok(pending);
        }

        match self.inner.codec.read(&key) {
            Ok(metadata) => Ok(metadata),
            Err(e @ CodecError::UnsupportedFormat { .. }) => Err(SyncError::Unsupported(e)),
            Err(e) => {
                log::warn!("{e}. Using empty metadata");
                Ok(Metadata::default())
            }
        }
    }

    /// Request that `metadata` be written to `path`, and return immediately.
    ///
    /// If a rewrite of `path` is in flight, `metadata` replaces whatever was
    /// waiting behind it and is written once that rewrite finishes. The
    /// outcome is published as a [`SyncEvent`].
    ///
    /// A path that is not a supported photo is logged and ignored.
    pub fn store(&self, path: impl AsRef<Path>, metadata: Metadata) {
        let path = path.as_ref();

        if !self.inner.store_option.writes_files() {
            log::debug!("Storing disabled, not writing metadata of {}", path.display());
            return;
        }

        if let Err(e) = self.inner.codec.check_format(path) {
            log::warn!("Not storing metadata: {e}");
            return;
        }

        let key = files::canonical_path(path);
        match self.inner.pending.submit(&key, metadata.clone()) {
            Submission::Start => self.inner.spawn_rewrites(key, metadata),
            Submission::Queued => {
                log::debug!("Rewrite of {} in flight, queued new metadata", key.display());
            }
            Submission::Replaced => {
                log::debug!("Rewrite of {} in flight, replaced queued metadata", key.display());
            }
        }
    }

    /// [`store`](Self::store) unless `metadata` equals what [`get`](Self::get)
    /// returns. Returns whether a store was requested.
    ///
    /// The comparison and the store are not atomic; a concurrent store to the
    /// same path may slip in between.
    pub fn store_if_changed(&self, path: impl AsRef<Path>, metadata: Metadata) -> bool {
        let path = path.as_ref();
        if !self.inner.store_option.writes_files() {
            return false;
        }
        match self.get(path) {
            Ok(current) if current == metadata => {
                log::debug!("Metadata of {} unchanged", path.display());
                false
            }
            Ok(_) => {
                self.store(path, metadata);
                true
            }
            Err(e) => {
                log::warn!("Not storing metadata: {e}");
                false
            }
        }
    }

    /// Receive a [`SyncEvent`] for every finished rewrite from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until no rewrite is in flight or queued.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.pending.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Number of paths with a rewrite in flight.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn path_state(&self, path: impl AsRef<Path>) -> PathState {
        self.inner.pending.state(&files::canonical_path(path.as_ref()))
    }
}

impl Inner {
    fn spawn_rewrites(self: &Arc<Self>, key: PathBuf, metadata: Metadata) {
        let rewrite = PendingRewrite {
            inner: Arc::clone(self),
            key,
            metadata: Some(metadata),
        };
        // A runtime that is shutting down drops the closure unrun
        self.runtime.spawn_blocking(move || rewrite.run());
    }

    /// Write `metadata`, then keep writing whatever was queued meanwhile,
    /// until the path is idle.
    fn run_rewrites(&self, key: &Path, mut metadata: Metadata) {
        loop {
            self.rewrite_once(key, &metadata);
            match self.pending.complete(key) {
                Some(next) => {
                    log::debug!("Writing queued metadata for {}", key.display());
                    metadata = next;
                }
                None => break,
            }
        }
        self.idle.notify_waiters();
    }

    fn rewrite_once(&self, key: &Path, metadata: &Metadata) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            task::rewrite(self.codec.as_ref(), self.replacer.as_ref(), key, metadata)
        }))
        .unwrap_or_else(|_| {
            Err(SyncError::TaskPanicked {
                path: key.to_path_buf(),
            })
        });

        let event = match result {
            Ok(()) => {
                log::info!("Stored metadata for {}", key.display());
                SyncEvent::Stored {
                    path: key.to_path_buf(),
                }
            }
            Err(e) => {
                log::error!("Failed to store metadata for {}: {e}", key.display());
                SyncEvent::Failed {
                    path: key.to_path_buf(),
                    reason: e.to_string(),
                }
            }
        };

        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Fail a path whose rewrites will never run, releasing its entry.
    fn abandon(&self, key: &Path) {
        let e = SyncError::RuntimeShutdown {
            path: key.to_path_buf(),
        };
        log::error!("{e}");

        // Drops the running slot and anything queued behind it
        while self.pending.complete(key).is_some() {}

        let _ = self.events.send(SyncEvent::Failed {
            path: key.to_path_buf(),
            reason: e.to_string(),
        });
        self.idle.notify_waiters();
    }
}

/// Rewrite loop handed to the blocking pool.
///
/// Dropping it without [`run`](Self::run) abandons the path, so its entry
/// cannot stay running forever.
struct PendingRewrite {
    inner: Arc<Inner>,
    key: PathBuf,
    metadata: Option<Metadata>,
}

impl PendingRewrite {
    fn run(mut self) {
        if let Some(metadata) = self.metadata.take() {
            self.inner.run_rewrites(&self.key, metadata);
        }
    }
}

impl Drop for PendingRewrite {
    fn drop(&mut self) {
        if self.metadata.is_some() {
            self.inner.abandon(&self.key);
        }
    }
}
