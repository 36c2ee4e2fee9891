//! Request/response dispatch across the plugin call boundary.
//!
//! Sync calls block the calling thread until the plugin returns the
//! response bytes. Async calls register a one-shot completion keyed by a
//! fresh [`CallId`] *before* the plugin is invoked, so a plugin that
//! completes inline (inside `call_async`) still resolves the caller exactly
//! once.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{
    error::{
        CallInFlightSnafu, CompletionDroppedSnafu, DispatchError,
        ProtocolViolationSnafu, UnknownOperationSnafu,
    },
    plugin::{NativePlugin, OpId, PluginHandle},
    protocol::{decode_response, encode_request},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Sync,
    Async,
}

/// Identifies one in-flight async call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId {
    pub op: OpId,
    pub seq: u64,
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.op, self.seq)
    }
}

/// What the plugin delivers for an async call: the response bytes, or the
/// error it hit while producing them.
type Outcome = Result<Vec<u8>, DispatchError>;

/// Completions waiting for the plugin to answer.
#[derive(Default)]
pub(crate) struct PendingCalls {
    next_seq: AtomicU64,
    waiting: Mutex<HashMap<CallId, oneshot::Sender<Outcome>>>,
}

impl PendingCalls {
    fn next_call(&self, op: OpId) -> CallId {
        CallId {
            op,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn register(
        &self,
        call: CallId,
    ) -> Result<oneshot::Receiver<Outcome>, DispatchError> {
        let mut waiting = self.lock();
        if waiting.contains_key(&call) {
            return CallInFlightSnafu { call }.fail();
        }
        let (tx, rx) = oneshot::channel();
        waiting.insert(call, tx);
        Ok(rx)
    }

    /// Deliver an outcome. Returns false if nothing was waiting on `call`.
    fn resolve(&self, call: CallId, outcome: Outcome) -> bool {
        let Some(tx) = self.lock().remove(&call) else {
            return false;
        };
        // the caller may have given up; that is not the plugin's problem
        let _ = tx.send(outcome);
        true
    }

    fn forget(&self, call: CallId) {
        self.lock().remove(&call);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(
        &self,
    ) -> MutexGuard<'_, HashMap<CallId, oneshot::Sender<Outcome>>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One-shot handle the plugin uses to deliver the response of an async
/// call. Dropping it without calling [`Completer::complete`] or
/// [`Completer::fail`] fails the waiting caller with `CompletionDropped`.
pub struct Completer {
    call: CallId,
    pending: Option<Arc<PendingCalls>>,
}

impl Completer {
    fn new(call: CallId, pending: Arc<PendingCalls>) -> Self {
        Self {
            call,
            pending: Some(pending),
        }
    }

    pub fn call_id(&self) -> CallId {
        self.call
    }

    pub fn complete(self, payload: Vec<u8>) {
        debug!(
            call = %self.call,
            len = payload.len(),
            "async call completed"
        );
        self.finish(Ok(payload));
    }

    /// Hand the caller the error the plugin hit instead of a response.
    pub fn fail(self, err: DispatchError) {
        debug!(call = %self.call, %err, "async call failed");
        self.finish(Err(err));
    }

    fn finish(mut self, outcome: Outcome) {
        if let Some(pending) = self.pending.take() {
            if !pending.resolve(self.call, outcome) {
                warn!(
                    call = %self.call,
                    "completion for a call nobody waits on"
                );
            }
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            warn!(call = %self.call, "completer dropped without a response");
            pending.forget(self.call);
        }
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("call", &self.call)
            .field("armed", &self.pending.is_some())
            .finish()
    }
}

#[derive(Clone)]
pub struct DispatchClient {
    handle: Arc<PluginHandle>,
    pending: Arc<PendingCalls>,
}

impl DispatchClient {
    pub fn new(handle: Arc<PluginHandle>) -> Self {
        Self {
            handle,
            pending: Arc::new(PendingCalls::default()),
        }
    }

    pub fn handle(&self) -> &Arc<PluginHandle> {
        &self.handle
    }

    /// Async calls still waiting on the plugin.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub async fn call<Req, Resp>(
        &self,
        op: &str,
        request: &Req,
        mode: Mode,
    ) -> Result<Resp, DispatchError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        match mode {
            Mode::Sync => self.call_sync(op, request),
            Mode::Async => self.call_async(op, request).await,
        }
    }

    pub fn call_sync<Req, Resp>(
        &self,
        op: &str,
        request: &Req,
    ) -> Result<Resp, DispatchError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let lease = self.handle.lease()?;
        let op_id = resolve_op(lease.plugin(), op)?;
        let bytes = encode_request(request)?;

        debug!(op, op_id, len = bytes.len(), "sync call");
        let payload = lease.plugin().call(op_id, &bytes)?;
        decode_response(&payload)
    }

    pub async fn call_async<Req, Resp>(
        &self,
        op: &str,
        request: &Req,
    ) -> Result<Resp, DispatchError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let lease = self.handle.lease()?;
        let op_id = resolve_op(lease.plugin(), op)?;
        let bytes = encode_request(request)?;

        let call = self.pending.next_call(op_id);
        let rx = self.pending.register(call)?;
        let completer = Completer::new(call, Arc::clone(&self.pending));

        debug!(op, %call, len = bytes.len(), "async call");
        match lease.plugin().call_async(op_id, &bytes, completer) {
            Ok(Some(immediate)) if !immediate.is_empty() => {
                self.pending.forget(call);
                return ProtocolViolationSnafu {
                    op,
                    len: immediate.len(),
                }
                .fail();
            }
            Ok(_) => {}
            Err(err) => {
                self.pending.forget(call);
                return Err(err);
            }
        }

        let outcome = rx
            .await
            .map_err(|_| CompletionDroppedSnafu { call }.build())?;
        drop(lease);
        let payload = outcome?;
        decode_response(&payload)
    }
}

fn resolve_op(
    plugin: &dyn NativePlugin,
    op: &str,
) -> Result<OpId, DispatchError> {
    match plugin.op_id(op) {
        Some(id) if id > 0 => Ok(id),
        _ => UnknownOperationSnafu { op }.fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_ids_are_unique_per_registry() {
        let pending = PendingCalls::default();
        let a = pending.next_call(3);
        let b = pending.next_call(3);
        assert_ne!(a, b);
        assert_eq!(a.op, 3);
        assert_eq!(a.to_string(), "3#0");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let pending = PendingCalls::default();
        let call = pending.next_call(1);
        let _rx = pending.register(call).unwrap();
        let err = pending.register(call).unwrap_err();
        assert!(matches!(err, DispatchError::CallInFlight { .. }));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn completer_resolves_once() {
        let pending = Arc::new(PendingCalls::default());
        let call = pending.next_call(1);
        let mut rx = pending.register(call).unwrap();

        Completer::new(call, Arc::clone(&pending)).complete(b"first".to_vec());
        assert_eq!(rx.try_recv().unwrap().unwrap(), b"first");
        assert_eq!(pending.len(), 0);

        // a second completion for the same id finds nobody waiting
        assert!(!pending.resolve(call, Ok(b"second".to_vec())));
    }

    #[test]
    fn dropped_completer_fails_the_waiter() {
        let pending = Arc::new(PendingCalls::default());
        let call = pending.next_call(1);
        let mut rx = pending.register(call).unwrap();

        drop(Completer::new(call, Arc::clone(&pending)));
        assert!(rx.try_recv().is_err());
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn failed_completer_hands_over_the_error() {
        let pending = Arc::new(PendingCalls::default());
        let call = pending.next_call(1);
        let mut rx = pending.register(call).unwrap();

        Completer::new(call, Arc::clone(&pending))
            .fail(DispatchError::NullResponse);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(DispatchError::NullResponse)
        ));
        assert_eq!(pending.len(), 0);
    }
}
