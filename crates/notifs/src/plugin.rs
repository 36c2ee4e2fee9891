//! Lifecycle of the native plugin that actually displays notifications.
//!
//! The handle is shared state with an explicit owner: wrap it in an `Arc`
//! and hand clones to every `DispatchClient` that should reach the same
//! plugin. Tests build their own handle around a fake loader.
//!
//! ```text
//! Unloaded --load--> Loading --ok--> Ready --reload--> (Closed) --> Loading
//!                        \--err--> Unloaded
//! Ready | Closed --unload--> Closed
//! ```

use std::sync::{
    Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use strum::Display;
use tracing::{debug, error, info};

use crate::{
    dispatch::Completer,
    error::{
        DispatchError, LoadError, LoadInProgressSnafu, PluginNotLoadedSnafu,
    },
};

/// Numeric identifier of an operation exported by the plugin. Only
/// positive ids are valid.
pub type OpId = i32;

/// The call boundary of a loaded plugin.
pub trait NativePlugin: Send + Sync {
    /// Resolve a logical operation name. `None`, zero and negative ids all
    /// mean the operation is not available.
    fn op_id(&self, name: &str) -> Option<OpId>;

    /// Blocking call returning the response envelope bytes.
    fn call(&self, op: OpId, request: &[u8]) -> Result<Vec<u8>, DispatchError>;

    /// Issue a call whose response is delivered through `completer`, possibly
    /// before this returns. Returning a non-empty immediate payload is a
    /// protocol violation.
    fn call_async(
        &self,
        op: OpId,
        request: &[u8],
        completer: Completer,
    ) -> Result<Option<Vec<u8>>, DispatchError>;
}

/// Acquires a plugin artifact and opens it.
pub trait PluginLoader: Send + Sync {
    fn load(
        &self,
        options: &LoadOptions,
    ) -> Result<Box<dyn NativePlugin>, LoadError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// reuse a previously acquired artifact
    #[default]
    Use,
    /// acquire a fresh copy before opening
    Reload,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub cache: CachePolicy,
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PluginState {
    Unloaded,
    Loading,
    Ready,
    Closed,
}

/// A reference to the plugin that was `Ready` when the lease was taken.
/// Keeps that plugin open until the lease is dropped, even across a reload.
#[derive(Clone)]
pub struct PluginLease {
    plugin: Arc<dyn NativePlugin>,
    generation: u64,
}

impl PluginLease {
    pub fn plugin(&self) -> &dyn NativePlugin {
        self.plugin.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct Slot {
    state: PluginState,
    plugin: Option<Arc<dyn NativePlugin>>,
    generation: u64,
}

pub struct PluginHandle {
    loader: Box<dyn PluginLoader>,
    slot: RwLock<Slot>,
}

impl PluginHandle {
    pub fn new(loader: impl PluginLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            slot: RwLock::new(Slot {
                state: PluginState::Unloaded,
                plugin: None,
                generation: 0,
            }),
        }
    }

    pub fn state(&self) -> PluginState {
        self.read().state
    }

    /// Number of successful loads so far.
    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Load the plugin, closing the currently loaded one first. Returns the
    /// generation of the newly loaded plugin.
    ///
    /// Dispatch attempts made while the load is in progress are rejected
    /// with `PluginNotLoaded`.
    pub fn load(&self, options: LoadOptions) -> Result<u64, LoadError> {
        let previous = {
            let mut slot = self.write();
            if slot.state == PluginState::Loading {
                return LoadInProgressSnafu.fail();
            }
            let previous = slot.plugin.take();
            if previous.is_some() {
                info!(
                    generation = slot.generation,
                    "closing plugin for reload"
                );
            }
            slot.state = PluginState::Loading;
            previous
        };
        drop(previous);

        if options.verbose {
            info!(cache = ?options.cache, "loading notification plugin");
        } else {
            debug!(cache = ?options.cache, "loading notification plugin");
        }

        match self.loader.load(&options) {
            Ok(plugin) => {
                let mut slot = self.write();
                slot.generation += 1;
                slot.plugin = Some(Arc::from(plugin));
                slot.state = PluginState::Ready;
                info!(
                    generation = slot.generation,
                    "notification plugin ready"
                );
                Ok(slot.generation)
            }
            Err(err) => {
                self.write().state = PluginState::Unloaded;
                error!(%err, "failed to load notification plugin");
                Err(err)
            }
        }
    }

    /// Close the plugin. Outstanding leases keep it open until they drop.
    pub fn unload(&self) -> Result<(), LoadError> {
        let mut slot = self.write();
        match slot.state {
            PluginState::Loading => LoadInProgressSnafu.fail(),
            PluginState::Unloaded => Ok(()),
            PluginState::Ready | PluginState::Closed => {
                if slot.plugin.take().is_some() {
                    info!(
                        generation = slot.generation,
                        "notification plugin closed"
                    );
                }
                slot.state = PluginState::Closed;
                Ok(())
            }
        }
    }

    /// Borrow the ready plugin for one dispatch.
    pub fn lease(&self) -> Result<PluginLease, DispatchError> {
        let slot = self.read();
        match (&slot.plugin, slot.state) {
            (Some(plugin), PluginState::Ready) => Ok(PluginLease {
                plugin: Arc::clone(plugin),
                generation: slot.generation,
            }),
            (_, state) => PluginNotLoadedSnafu { state }.fail(),
        }
    }

    // the slot is never left half-updated, so a poisoned lock is still
    // consistent
    fn read(&self) -> RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    struct CountedPlugin {
        closed: Arc<AtomicUsize>,
    }

    impl Drop for CountedPlugin {
        fn drop(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl NativePlugin for CountedPlugin {
        fn op_id(&self, _name: &str) -> Option<OpId> {
            None
        }

        fn call(
            &self,
            _op: OpId,
            _request: &[u8],
        ) -> Result<Vec<u8>, DispatchError> {
            Ok(Vec::new())
        }

        fn call_async(
            &self,
            _op: OpId,
            _request: &[u8],
            _completer: Completer,
        ) -> Result<Option<Vec<u8>>, DispatchError> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct TestLoader {
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
        fail_next: Mutex<bool>,
        seen_options: Mutex<Vec<LoadOptions>>,
    }

    impl PluginLoader for Arc<TestLoader> {
        fn load(
            &self,
            options: &LoadOptions,
        ) -> Result<Box<dyn NativePlugin>, LoadError> {
            self.seen_options.lock().unwrap().push(*options);
            if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
                return Err(LoadError::Loader {
                    message: "artifact missing".to_string(),
                });
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountedPlugin {
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    fn handle() -> (PluginHandle, Arc<TestLoader>) {
        let loader = Arc::new(TestLoader::default());
        (PluginHandle::new(Arc::clone(&loader)), loader)
    }

    #[test]
    fn starts_unloaded_and_rejects_dispatch() {
        let (handle, _) = handle();
        assert_eq!(handle.state(), PluginState::Unloaded);
        assert_eq!(handle.generation(), 0);
        let err = handle.lease().err().unwrap();
        assert!(matches!(
            err,
            DispatchError::PluginNotLoaded {
                state: PluginState::Unloaded
            }
        ));
    }

    #[test]
    fn load_makes_plugin_ready() {
        let (handle, loader) = handle();
        let generation = handle.load(LoadOptions::default()).unwrap();
        assert_eq!(generation, 1);
        assert_eq!(handle.state(), PluginState::Ready);
        assert_eq!(handle.lease().unwrap().generation(), 1);
        assert_eq!(loader.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_load_returns_to_unloaded() {
        let (handle, loader) = handle();
        *loader.fail_next.lock().unwrap() = true;
        let err = handle.load(LoadOptions::default()).unwrap_err();
        assert!(err.to_string().contains("artifact missing"));
        assert_eq!(handle.state(), PluginState::Unloaded);
        assert_eq!(handle.generation(), 0);

        handle.load(LoadOptions::default()).unwrap();
        assert_eq!(handle.state(), PluginState::Ready);
    }

    #[test]
    fn reload_closes_previous_plugin() {
        let (handle, loader) = handle();
        handle.load(LoadOptions::default()).unwrap();
        let generation = handle
            .load(LoadOptions {
                cache: CachePolicy::Reload,
                verbose: true,
            })
            .unwrap();
        assert_eq!(generation, 2);
        assert_eq!(loader.closed.load(Ordering::SeqCst), 1);
        assert_eq!(loader.opened.load(Ordering::SeqCst), 2);
        assert_eq!(
            loader.seen_options.lock().unwrap().last().unwrap().cache,
            CachePolicy::Reload
        );
    }

    #[test]
    fn failed_reload_leaves_nothing_ready() {
        let (handle, loader) = handle();
        handle.load(LoadOptions::default()).unwrap();
        *loader.fail_next.lock().unwrap() = true;
        assert!(handle.load(LoadOptions::default()).is_err());
        assert_eq!(handle.state(), PluginState::Unloaded);
        assert_eq!(loader.closed.load(Ordering::SeqCst), 1);
        assert!(handle.lease().is_err());
    }

    #[test]
    fn lease_outlives_reload() {
        let (handle, loader) = handle();
        handle.load(LoadOptions::default()).unwrap();
        let lease = handle.lease().unwrap();
        handle.load(LoadOptions::default()).unwrap();

        // the old plugin stays open while leased
        assert_eq!(loader.closed.load(Ordering::SeqCst), 0);
        assert_eq!(lease.generation(), 1);
        assert_eq!(handle.lease().unwrap().generation(), 2);
        drop(lease);
        assert_eq!(loader.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unload_closes_and_is_idempotent() {
        let (handle, loader) = handle();
        handle.unload().unwrap();
        assert_eq!(handle.state(), PluginState::Unloaded);

        handle.load(LoadOptions::default()).unwrap();
        handle.unload().unwrap();
        assert_eq!(handle.state(), PluginState::Closed);
        assert_eq!(loader.closed.load(Ordering::SeqCst), 1);
        handle.unload().unwrap();
        assert_eq!(handle.state(), PluginState::Closed);

        let err = handle.lease().err().unwrap();
        assert!(matches!(
            err,
            DispatchError::PluginNotLoaded {
                state: PluginState::Closed
            }
        ));
        assert_eq!(err.kind(), crate::error::ErrorKind::Lifecycle);
    }

    #[test]
    fn closed_plugin_can_be_loaded_again() {
        let (handle, _) = handle();
        handle.load(LoadOptions::default()).unwrap();
        handle.unload().unwrap();
        assert_eq!(handle.load(LoadOptions::default()).unwrap(), 2);
        assert_eq!(handle.state(), PluginState::Ready);
    }
}
