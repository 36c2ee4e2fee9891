//! Desktop notifications displayed by a native plugin.
//!
//! A [`Notification`] is built and validated here, then handed to a
//! [`DispatchClient`], which serializes it and calls into the plugin held by
//! a [`PluginHandle`]. The plugin does the actual displaying.

use tokio::{runtime::Handle, task::JoinHandle};

pub mod config;
pub mod dispatch;
pub mod dylib;
pub mod error;
pub mod notification;
pub mod notify;
pub mod platform;
pub mod plugin;
pub mod protocol;

pub use config::PluginConfig;
pub use dispatch::{CallId, Completer, DispatchClient, Mode};
pub use dylib::{DylibLoader, DylibPlugin};
pub use error::{DispatchError, ErrorKind, LoadError, NotificationError};
pub use notification::{Fields, Notification};
pub use notify::{NotifyOptions, notify};
pub use platform::{Feature, HostOs, Platform, PlatformSupport};
pub use plugin::{
    CachePolicy, LoadOptions, NativePlugin, OpId, PluginHandle, PluginLease,
    PluginLoader, PluginState,
};
pub use protocol::{Icon, NotificationRequest, NotifyResult, Timeout};

use tracing::Span;

/// Run blocking work on `runtime`'s blocking pool inside a span named after
/// the task.
pub(crate) fn spawn_blocking_named<F, R>(
    runtime: &Handle,
    name: &str,
    f: F,
) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let span = tracing::info_span!("task", task_name = %name);
    runtime.spawn_blocking(move || Span::in_scope(&span, f))
}
