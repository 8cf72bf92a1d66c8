use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::metadata::Metadata;

/// Where a path is in its write lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
    /// No rewrite in flight.
    Absent,
    /// One rewrite in flight, nothing waiting.
    Running,
    /// One rewrite in flight and a newer value waiting behind it.
    RunningWithQueued,
}

/// Outcome of [`PendingWriteStore::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Submission {
    /// The path was idle; the caller must start a rewrite with the value.
    Start,
    /// A rewrite is in flight; the value now waits in the queued slot.
    Queued,
    /// A rewrite is in flight and an older queued value was dropped.
    Replaced,
}

/// A path with a rewrite in flight. There is no entry for idle paths, so
/// `queued` can only ever be set while `running` is.
#[derive(Debug)]
struct Entry {
    running: Metadata,
    queued: Option<Metadata>,
}

/// In-memory record of metadata that is being, or about to be, written.
///
/// Keyed by canonical path. Every operation takes the map lock once, does
/// constant work and releases it; the lock is never held across I/O.
#[derive(Debug, Default)]
pub(crate) struct PendingWriteStore {
    entries: Mutex<HashMap<PathBuf, Entry>>,
}

impl PendingWriteStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // Each operation leaves the map consistent before it can panic, so a
    // poisoned lock still guards valid data.
    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Newest value not yet on disk: the queued one, else the running one.
    pub(crate) fn latest(&self, key: &Path) -> Option<Metadata> {
        let entries = self.lock();
        let entry = entries.get(key)?;
        Some(entry.queued.as_ref().unwrap_or(&entry.running).clone())
    }

    /// Register `metadata` as the next value for `key`.
    pub(crate) fn submit(&self, key: &Path, metadata: Metadata) -> Submission {
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(entry) => match entry.queued.replace(metadata) {
                Some(_) => Submission::Replaced,
                None => Submission::Queued,
            },
            None => {
                entries.insert(
                    key.to_path_buf(),
                    Entry {
                        running: metadata,
                        queued: None,
                    },
                );
                Submission::Start
            }
        }
    }

    /// Called when the rewrite of `key` has finished, successfully or not.
    ///
    /// Promotes the queued value to running and returns it, or removes the
    /// entry and returns `None` when nothing is queued.
    pub(crate) fn complete(&self, key: &Path) -> Option<Metadata> {
        let mut entries = self.lock();
        let entry = entries.get_mut(key)?;
        match entry.queued.take() {
            Some(next) => {
                entry.running = next.clone();
                Some(next)
            }
            None => {
                entries.remove(key);
                None
            }
        }
    }

    pub(crate) fn state(&self, key: &Path) -> PathState {
        match self.lock().get(key) {
            None => PathState::Absent,
            Some(Entry { queued: None, .. }) => PathState::Running,
            Some(Entry { queued: Some(_), .. }) => PathState::RunningWithQueued,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(text: &str) -> Metadata {
        Metadata {
            comment: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn first_submit_starts() {
        let store = PendingWriteStore::new();
        let key = Path::new("/photos/a.jpg");
        assert_eq!(store.state(key), PathState::Absent);
        assert_eq!(store.submit(key, comment("1")), Submission::Start);
        assert_eq!(store.state(key), PathState::Running);
        assert_eq!(store.latest(key), Some(comment("1")));
    }

    #[test]
    fn later_submits_coalesce_into_queued_slot() {
        let store = PendingWriteStore::new();
        let key = Path::new("/photos/a.jpg");
        store.submit(key, comment("1"));
        assert_eq!(store.submit(key, comment("2")), Submission::Queued);
        assert_eq!(store.submit(key, comment("3")), Submission::Replaced);
        assert_eq!(store.state(key), PathState::RunningWithQueued);
        assert_eq!(store.latest(key), Some(comment("3")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn complete_promotes_then_removes() {
        let store = PendingWriteStore::new();
        let key = Path::new("/photos/a.jpg");
        store.submit(key, comment("1"));
        store.submit(key, comment("2"));

        assert_eq!(store.complete(key), Some(comment("2")));
        assert_eq!(store.state(key), PathState::Running);
        assert_eq!(store.latest(key), Some(comment("2")));

        assert_eq!(store.complete(key), None);
        assert_eq!(store.state(key), PathState::Absent);
        assert!(store.is_empty());
    }

    #[test]
    fn complete_of_unknown_path_is_none() {
        let store = PendingWriteStore::new();
        assert_eq!(store.complete(Path::new("/photos/none.jpg")), None);
    }

    #[test]
    fn paths_are_independent() {
        let store = PendingWriteStore::new();
        let a = Path::new("/photos/a.jpg");
        let b = Path::new("/photos/b.jpg");
        assert_eq!(store.submit(a, comment("a")), Submission::Start);
        assert_eq!(store.submit(b, comment("b")), Submission::Start);
        store.complete(a);
        assert_eq!(store.state(a), PathState::Absent);
        assert_eq!(store.state(b), PathState::Running);
        assert_eq!(store.len(), 1);
    }
}
