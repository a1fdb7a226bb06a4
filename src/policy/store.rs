//! Hot-reloadable policy stores
//!
//! A [`PolicyStore`] owns the current [`PolicySnapshot`] for one policy file.
//! Readers clone an `Arc` to the snapshot and never wait on a reload: the
//! refresh guard is only ever try-locked on the hot path, so at most one
//! caller stats and reparses the file while everyone else keeps using the
//! snapshot already published.
//!
//! [`StoreRegistry`] hands out one store per policy path.

use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};
use std::time::{Instant, SystemTime};

use super::config::ParsedPolicy;
use super::error::ConfigError;
use super::snapshot::PolicySnapshot;
use crate::audit::{AuditKind, AuditLevel, AuditRecord, AuditSink};

/// Cheap fingerprint of the policy file used for staleness checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SourceMarker {
    exists: bool,
    modified: Option<SystemTime>,
    len: u64,
}

impl SourceMarker {
    fn read(path: &Path) -> Self {
        match std::fs::metadata(path) {
            Ok(meta) => Self {
                exists: true,
                modified: meta.modified().ok(),
                len: meta.len(),
            },
            Err(_) => Self {
                exists: false,
                modified: None,
                len: 0,
            },
        }
    }
}

struct RefreshState {
    last_check: Instant,
    /// Marker of the file the current snapshot was built from
    loaded: SourceMarker,
    /// Marker of the last file version that failed to load
    failed: Option<SourceMarker>,
}

/// Current policy for one source file
pub struct PolicyStore {
    path: PathBuf,
    sink_override: Option<Arc<dyn AuditSink>>,
    current: RwLock<Arc<PolicySnapshot>>,
    refresh: Mutex<RefreshState>,
}

impl PolicyStore {
    /// Load the policy at `path`; audit records go where the policy says
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        Self::open_with(path, None)
    }

    /// Load the policy at `path`, optionally forcing every snapshot's audit sink
    pub fn open_with(
        path: &Path,
        sink_override: Option<Arc<dyn AuditSink>>,
    ) -> Result<Self, ConfigError> {
        let marker = SourceMarker::read(path);
        let snapshot = build_snapshot(path, sink_override.as_ref())?;

        tracing::info!(
            "Loaded policy {:?} (generation {}, {} mode)",
            path,
            snapshot.generation(),
            snapshot.mode()
        );

        Ok(Self {
            path: path.to_path_buf(),
            sink_override,
            current: RwLock::new(Arc::new(snapshot)),
            refresh: Mutex::new(RefreshState {
                last_check: Instant::now(),
                loaded: marker,
                failed: None,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Generation of the snapshot currently published
    pub fn generation(&self) -> u64 {
        self.read_current().generation()
    }

    /// Snapshot to evaluate against, reloading first if the file changed
    ///
    /// The file is stat'ed at most once per refresh interval. When another
    /// caller is already checking, the published snapshot is returned as is.
    pub fn current_snapshot(&self) -> Arc<PolicySnapshot> {
        let snapshot = self.read_current();

        let mut state = match self.refresh.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => {
                tracing::warn!("Policy refresh lock was poisoned, recovering");
                poisoned.into_inner()
            }
            Err(TryLockError::WouldBlock) => return snapshot,
        };

        if state.last_check.elapsed() < snapshot.refresh_interval() {
            return snapshot;
        }
        state.last_check = Instant::now();

        let marker = SourceMarker::read(&self.path);
        if marker == state.loaded || state.failed == Some(marker) {
            return snapshot;
        }

        tracing::debug!("Policy {:?} changed on disk, reloading", self.path);
        match self.swap(&mut state, marker) {
            Ok(fresh) => fresh,
            Err(_) => snapshot,
        }
    }

    /// Reparse the policy file now, regardless of the refresh interval
    ///
    /// On failure the previous snapshot stays in effect; the error is audited
    /// and also returned.
    pub fn reload(&self) -> Result<Arc<PolicySnapshot>, ConfigError> {
        let mut state = self.lock_refresh();
        state.last_check = Instant::now();
        let marker = SourceMarker::read(&self.path);
        self.swap(&mut state, marker)
    }

    fn swap(
        &self,
        state: &mut MutexGuard<'_, RefreshState>,
        marker: SourceMarker,
    ) -> Result<Arc<PolicySnapshot>, ConfigError> {
        match build_snapshot(&self.path, self.sink_override.as_ref()) {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *self.write_current() = snapshot.clone();
                state.loaded = marker;
                state.failed = None;
                tracing::info!(
                    "Reloaded policy {:?} (generation {}, {} mode)",
                    self.path,
                    snapshot.generation(),
                    snapshot.mode()
                );
                Ok(snapshot)
            }
            Err(err) => {
                state.failed = Some(marker);
                self.report_reload_failure(&err);
                Err(err)
            }
        }
    }

    fn report_reload_failure(&self, err: &ConfigError) {
        tracing::error!(
            "Failed to reload policy {:?}, keeping previous rules: {}",
            self.path,
            err
        );
        let snapshot = self.read_current();
        let record = AuditRecord::new(
            AuditLevel::Error,
            AuditKind::ReloadFailed,
            snapshot.mode(),
            &self.path.display().to_string(),
        )
        .with_detail(err.to_string());
        snapshot.sink().record(&record);
        snapshot.sink().flush();
    }

    fn read_current(&self) -> Arc<PolicySnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| {
                tracing::warn!("Policy snapshot lock was poisoned, recovering");
                poisoned.into_inner()
            })
            .clone()
    }

    fn write_current(&self) -> std::sync::RwLockWriteGuard<'_, Arc<PolicySnapshot>> {
        self.current.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Policy snapshot lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_refresh(&self) -> MutexGuard<'_, RefreshState> {
        self.refresh.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Policy refresh lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("path", &self.path)
            .field("current", &self.read_current())
            .finish()
    }
}

fn build_snapshot(
    path: &Path,
    sink_override: Option<&Arc<dyn AuditSink>>,
) -> Result<PolicySnapshot, ConfigError> {
    let policy = ParsedPolicy::load(path)?;
    match sink_override {
        Some(sink) => PolicySnapshot::build_with_sink(&policy, sink.clone()),
        None => PolicySnapshot::build(&policy),
    }
}

static GLOBAL_REGISTRY: Lazy<StoreRegistry> = Lazy::new(StoreRegistry::new);

/// Per-path creation slot; the cell's own lock serializes the first load
type StoreSlot = Arc<OnceCell<Arc<PolicyStore>>>;

/// One [`PolicyStore`] per policy path
#[derive(Default)]
pub struct StoreRegistry {
    stores: DashMap<PathBuf, StoreSlot>,
    sink: Option<Arc<dyn AuditSink>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose stores all send audit records to `sink`
    pub fn with_sink(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            stores: DashMap::new(),
            sink: Some(sink),
        }
    }

    /// The process-wide registry
    pub fn global() -> &'static StoreRegistry {
        &GLOBAL_REGISTRY
    }

    /// Store for `path`, loading it on first use
    ///
    /// Concurrent first calls for the same path load it once and share the
    /// result. The load runs under a lock private to `path`, outside the map's
    /// shard lock, so lookups of other paths never wait on it. A load failure
    /// registers nothing.
    pub fn get_or_create(&self, path: impl AsRef<Path>) -> Result<Arc<PolicyStore>, ConfigError> {
        let path = path.as_ref();
        if let Some(store) = self.get(path) {
            return Ok(store);
        }

        let slot = self
            .stores
            .entry(path.to_path_buf())
            .or_default()
            .value()
            .clone();

        let result = slot
            .get_or_try_init(|| PolicyStore::open_with(path, self.sink.clone()).map(Arc::new))
            .cloned();
        if result.is_err() {
            self.stores.remove_if(path, |_, slot| slot.get().is_none());
        }
        result
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<Arc<PolicyStore>> {
        self.stores
            .get(path.as_ref())
            .and_then(|slot| slot.value().get().cloned())
    }

    /// Forget the store for `path`; holders of the `Arc` keep using it
    pub fn remove(&self, path: impl AsRef<Path>) -> Option<Arc<PolicyStore>> {
        self.stores
            .remove(path.as_ref())
            .and_then(|(_, slot)| slot.get().cloned())
    }

    /// Number of loaded stores
    pub fn len(&self) -> usize {
        self.stores
            .iter()
            .filter(|slot| slot.value().get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;
    use std::time::Duration;
    use tempfile::TempDir;

    const LOOSE: &str = r#"
refresh_ms = 0

[blacklist]
patterns = []

[whitelist]
patterns = ['.*']
"#;

    const STRICT: &str = r#"
refresh_ms = 0

[blacklist]
patterns = ['^com\.app\.Widget$']

[whitelist]
patterns = ['.*']
"#;

    /// Rewrite the policy and push its mtime forward so the change is visible
    fn rewrite(path: &Path, content: &str, bump_secs: u64) {
        std::fs::write(path, content).unwrap();
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(bump_secs))
            .unwrap();
    }

    fn write_policy(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_open_missing_file() {
        let err = PolicyStore::open(Path::new("/nope/serialgate.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_reload_on_change() {
        let tmp = TempDir::new().unwrap();
        let path = write_policy(&tmp, "policy.toml", LOOSE);
        let store = PolicyStore::open(&path).unwrap();
        assert_eq!(store.path(), path.as_path());

        let before = store.current_snapshot();
        assert!(before.blacklist().is_empty());

        rewrite(&path, STRICT, 10);
        let after = store.current_snapshot();
        assert_eq!(after.blacklist().len(), 1);
        assert!(after.generation() > before.generation());
        assert_eq!(store.generation(), after.generation());
    }

    #[test]
    fn test_unchanged_file_keeps_snapshot() {
        let tmp = TempDir::new().unwrap();
        let path = write_policy(&tmp, "policy.toml", LOOSE);
        let store = PolicyStore::open(&path).unwrap();

        let a = store.current_snapshot();
        let b = store.current_snapshot();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_refresh_interval_throttles_checks() {
        let tmp = TempDir::new().unwrap();
        let slow = LOOSE.replace("refresh_ms = 0", "refresh_ms = 3600000");
        let path = write_policy(&tmp, "policy.toml", &slow);
        let store = PolicyStore::open(&path).unwrap();
        let before = store.current_snapshot();

        rewrite(&path, STRICT, 10);
        let after = store.current_snapshot();
        assert!(Arc::ptr_eq(&before, &after));

        // A forced reload ignores the interval
        let forced = store.reload().unwrap();
        assert_eq!(forced.blacklist().len(), 1);
    }

    #[test]
    fn test_failed_reload_keeps_previous_and_audits() {
        let tmp = TempDir::new().unwrap();
        let path = write_policy(&tmp, "policy.toml", LOOSE);
        let sink = Arc::new(MemorySink::new());
        let store = PolicyStore::open_with(&path, Some(sink.clone())).unwrap();
        let before = store.current_snapshot();

        rewrite(&path, "[blacklist]\npatterns = ['(']\n[whitelist]\npatterns = []\n", 10);
        let after = store.current_snapshot();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(sink.count(AuditKind::ReloadFailed), 1);

        // The same broken file is not reparsed again
        let _ = store.current_snapshot();
        assert_eq!(sink.count(AuditKind::ReloadFailed), 1);

        // Fixing the file recovers
        rewrite(&path, STRICT, 20);
        let fixed = store.current_snapshot();
        assert_eq!(fixed.blacklist().len(), 1);
    }

    #[test]
    fn test_deleted_file_keeps_previous() {
        let tmp = TempDir::new().unwrap();
        let path = write_policy(&tmp, "policy.toml", LOOSE);
        let sink = Arc::new(MemorySink::new());
        let store = PolicyStore::open_with(&path, Some(sink.clone())).unwrap();
        let before = store.current_snapshot();

        std::fs::remove_file(&path).unwrap();
        let after = store.current_snapshot();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(sink.count(AuditKind::ReloadFailed), 1);
        assert!(store.reload().is_err());
    }

    #[test]
    fn test_registry_shares_store() {
        let tmp = TempDir::new().unwrap();
        let path = write_policy(&tmp, "policy.toml", LOOSE);
        let registry = StoreRegistry::new();

        let a = registry.get_or_create(&path).unwrap();
        let b = registry.get_or_create(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_concurrent_first_access() {
        let tmp = TempDir::new().unwrap();
        let path = write_policy(&tmp, "policy.toml", LOOSE);
        let registry = Arc::new(StoreRegistry::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let path = path.clone();
                std::thread::spawn(move || registry.get_or_create(&path).unwrap())
            })
            .collect();
        let stores: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(stores.iter().all(|s| Arc::ptr_eq(s, &stores[0])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_failure_registers_nothing() {
        let tmp = TempDir::new().unwrap();
        let path = write_policy(
            &tmp,
            "bad.toml",
            "[blacklist]\npatterns = ['(']\n[whitelist]\npatterns = []\n",
        );
        let registry = StoreRegistry::new();

        let err = registry.get_or_create(&path).unwrap_err();
        assert!(err.is_pattern_syntax());
        assert!(registry.get(&path).is_none());
        assert!(registry.is_empty());

        // Concurrent failing loads leave no pending slot behind
        let registry = Arc::new(registry);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let path = path.clone();
                std::thread::spawn(move || registry.get_or_create(&path).is_err())
            })
            .collect();
        assert!(handles.into_iter().all(|h| h.join().unwrap()));
        assert!(registry.is_empty());

        // Once fixed, the next request succeeds
        std::fs::write(&path, LOOSE).unwrap();
        assert!(registry.get_or_create(&path).is_ok());
        assert!(registry.remove(&path).is_some());
        assert!(registry.is_empty());
    }
}
