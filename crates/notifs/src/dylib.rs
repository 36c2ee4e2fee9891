//! Plugin backed by a dynamic library.
//!
//! The library exports
//!
//! ```c
//! const uint8_t *notify_send(const uint8_t *request, size_t len);
//! void notify_free(const uint8_t *response); // optional
//! ```
//!
//! `notify_send` takes a JSON request and returns a length-prefixed JSON
//! response envelope. The response stays owned by the library; if
//! `notify_free` is exported it is called once the response was copied.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use libloading::Library;
use snafu::ResultExt;
use tracing::{debug, info, warn};

use crate::{
    config::PluginConfig,
    dispatch::Completer,
    error::{
        DispatchError, IoSnafu, LibrarySnafu, LoadError, MissingSymbolSnafu,
        NoRuntimeSnafu, UnknownOperationSnafu,
    },
    plugin::{CachePolicy, LoadOptions, NativePlugin, OpId, PluginLoader},
    protocol::{OP_NOTIFY_SEND, read_length_prefixed},
    spawn_blocking_named,
};

const SEND_SYMBOL: &[u8] = b"notify_send\0";
const FREE_SYMBOL: &[u8] = b"notify_free\0";

const NOTIFY_SEND_ID: OpId = 1;

type SendFn = unsafe extern "C" fn(*const u8, usize) -> *const u8;
type FreeFn = unsafe extern "C" fn(*const u8);

pub struct DylibLoader {
    config: PluginConfig,
}

impl DylibLoader {
    pub fn new(config: PluginConfig) -> Self {
        Self { config }
    }
}

impl PluginLoader for DylibLoader {
    fn load(
        &self,
        options: &LoadOptions,
    ) -> Result<Box<dyn NativePlugin>, LoadError> {
        let source = self.config.library_path();
        if !source.is_file() {
            return Err(LoadError::LibraryNotFound { path: source });
        }

        let copy = match options.cache {
            CachePolicy::Use => None,
            CachePolicy::Reload => {
                Some(fresh_copy(&source, &self.config.cache_dir)?)
            }
        };
        let path = copy.as_ref().map_or(source, |c| c.path.clone());

        if options.verbose {
            info!(path = %path.display(), "opening plugin library");
        } else {
            debug!(path = %path.display(), "opening plugin library");
        }

        // SAFETY: the configured library is trusted to be a notifs plugin.
        // A copy that fails to open is removed when `copy` drops.
        let plugin = unsafe { DylibPlugin::open_with(&path, copy)? };
        Ok(Box::new(plugin))
    }
}

/// A private copy of the plugin artifact, removed when dropped.
struct CopiedArtifact {
    path: PathBuf,
}

impl Drop for CopiedArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "removed plugin copy");
            }
            Err(err) => {
                warn!(
                    %err,
                    path = %self.path.display(),
                    "failed to remove plugin copy"
                );
            }
        }
    }
}

/// An open library and the copy it was opened from.
struct OpenLibrary {
    _lib: Library,
    // fields drop in order: the library is closed before its file goes
    _copy: Option<CopiedArtifact>,
}

pub struct DylibPlugin {
    send: SendFn,
    free: Option<FreeFn>,
    lib: Arc<OpenLibrary>,
}

impl DylibPlugin {
    /// Open the library at `path` and resolve its exports.
    ///
    /// # Safety
    ///
    /// The library's initializers run on open, and its `notify_send` /
    /// `notify_free` exports must have the signatures documented on this
    /// module.
    pub unsafe fn open(path: &Path) -> Result<Self, LoadError> {
        unsafe { Self::open_with(path, None) }
    }

    unsafe fn open_with(
        path: &Path,
        copy: Option<CopiedArtifact>,
    ) -> Result<Self, LoadError> {
        let lib = unsafe { Library::new(path) }.context(LibrarySnafu { path })?;
        let send: SendFn = *unsafe { lib.get::<SendFn>(SEND_SYMBOL) }
            .context(MissingSymbolSnafu {
                symbol: "notify_send",
            })?;
        let free: Option<FreeFn> =
            unsafe { lib.get::<FreeFn>(FREE_SYMBOL) }.ok().map(|sym| *sym);

        Ok(Self {
            send,
            free,
            lib: Arc::new(OpenLibrary {
                _lib: lib,
                _copy: copy,
            }),
        })
    }

    fn check_op(op: OpId) -> Result<(), DispatchError> {
        if op == NOTIFY_SEND_ID {
            Ok(())
        } else {
            UnknownOperationSnafu {
                op: op.to_string(),
            }
            .fail()
        }
    }
}

impl NativePlugin for DylibPlugin {
    fn op_id(&self, name: &str) -> Option<OpId> {
        (name == OP_NOTIFY_SEND).then_some(NOTIFY_SEND_ID)
    }

    fn call(&self, op: OpId, request: &[u8]) -> Result<Vec<u8>, DispatchError> {
        Self::check_op(op)?;
        // SAFETY: `self.lib` keeps both exports loaded.
        unsafe { invoke(self.send, self.free, request) }
    }

    fn call_async(
        &self,
        op: OpId,
        request: &[u8],
        completer: Completer,
    ) -> Result<Option<Vec<u8>>, DispatchError> {
        Self::check_op(op)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| NoRuntimeSnafu.build())?;

        let request = request.to_vec();
        let (send, free) = (self.send, self.free);
        let lib = Arc::clone(&self.lib);
        spawn_blocking_named(&runtime, OP_NOTIFY_SEND, move || {
            // hold the library open until the call has returned, even if the
            // handle is reloaded meanwhile
            let _lib = lib;
            // SAFETY: `_lib` keeps both exports loaded.
            match unsafe { invoke(send, free, &request) } {
                Ok(payload) => completer.complete(payload),
                Err(err) => completer.fail(err),
            }
        });
        Ok(None)
    }
}

/// # Safety
///
/// `send` and `free` must come from a library that is still loaded.
unsafe fn invoke(
    send: SendFn,
    free: Option<FreeFn>,
    request: &[u8],
) -> Result<Vec<u8>, DispatchError> {
    let ptr = unsafe { send(request.as_ptr(), request.len()) };
    let payload = unsafe { read_length_prefixed(ptr) };
    match free {
        Some(free) if !ptr.is_null() => unsafe { free(ptr) },
        _ => {}
    }
    payload
}

/// Copy the artifact to a unique file so the OS loader cannot hand back an
/// image it already has mapped.
fn fresh_copy(
    source: &Path,
    cache_dir: &Path,
) -> Result<CopiedArtifact, LoadError> {
    std::fs::create_dir_all(cache_dir).context(IoSnafu { path: cache_dir })?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    let file_name = source
        .file_name()
        .map_or_else(|| "plugin".into(), |n| n.to_string_lossy());
    let dest = cache_dir.join(format!(
        "{}-{nanos}-{file_name}",
        std::process::id()
    ));

    std::fs::copy(source, &dest).context(IoSnafu { path: &dest })?;
    debug!(
        from = %source.display(),
        to = %dest.display(),
        "copied plugin artifact"
    );
    Ok(CopiedArtifact { path: dest })
}
