//! Operation handles and their lifecycle

use crate::error::{record_last_error, ErrorCode};
use crate::service::ServiceDescription;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Callback receiving every event of an operation.
///
/// Invoked synchronously from the operation's worker, one event at a time.
pub type Callback =
    Arc<dyn Fn(&OperationHandle, ErrorCode, Option<&ServiceDescription>) + Send + Sync>;

/// Predicate deciding whether a discovered service reaches the callback
pub type ServiceFilter = Arc<dyn Fn(&ServiceDescription) -> bool + Send + Sync>;

/// Spawns the parked worker of a submitted operation. Dropping it unlaunched releases the session.
pub(crate) type Launcher = Box<dyn FnOnce(OperationHandle) + Send>;

/// Unique identifier of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an operation does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Service registration
    Advertise,
    /// Service browse
    Discover,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Advertise => write!(f, "advertise"),
            OperationKind::Discover => write!(f, "discover"),
        }
    }
}

/// Lifecycle state of an operation
///
/// `Created` and `Submitted` are reached synchronously inside the starting call;
/// `Running` and `Terminated` are set by the background worker once
/// [`OperationHandle::start`] has launched it. A submission failure moves straight
/// from `Created` to `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    /// Handle exists, nothing submitted yet
    Created,
    /// Resolver accepted the request, worker parked until started
    Submitted,
    /// Worker is pumping resolver events
    Running,
    /// Worker exited and the session is released
    Terminated,
}

struct HandleInner {
    id: OperationId,
    kind: OperationKind,
    target: String,
    state: Mutex<OperationState>,
    last_error: Mutex<Option<String>>,
    cancel: CancellationToken,
    terminated: CancellationToken,
    launcher: Mutex<Option<Launcher>>,
}

/// Token for a live advertise or discover operation.
///
/// Cloning is cheap and every clone refers to the same operation.
#[derive(Clone)]
pub struct OperationHandle {
    inner: Arc<HandleInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl OperationHandle {
    pub(crate) fn new<S: Into<String>>(kind: OperationKind, target: S) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: OperationId::new(),
                kind,
                target: target.into(),
                state: Mutex::new(OperationState::Created),
                last_error: Mutex::new(None),
                cancel: CancellationToken::new(),
                terminated: CancellationToken::new(),
                launcher: Mutex::new(None),
            }),
        }
    }

    /// Get the operation identifier
    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    /// Get the operation kind
    pub fn kind(&self) -> OperationKind {
        self.inner.kind
    }

    /// Service name being advertised, or registration type being browsed
    pub fn target(&self) -> &str {
        &self.inner.target
    }

    /// Get the current lifecycle state
    pub fn state(&self) -> OperationState {
        *lock(&self.inner.state)
    }

    /// Last error recorded for this operation only
    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner.last_error).clone()
    }

    /// Launch the worker of a submitted operation.
    ///
    /// Events reach the callback only after this is called, so the handle can be
    /// stored before the first callback runs. Returns `false` if there was nothing
    /// to launch: already started, cancelled, or failed at submission.
    pub fn start(&self) -> bool {
        let launcher = lock(&self.inner.launcher).take();
        match launcher {
            Some(launch) if !self.is_cancelled() => {
                debug!("Starting {} operation {}", self.inner.kind, self.inner.id);
                launch(self.clone());
                true
            }
            Some(parked) => {
                drop(parked);
                self.mark_terminated();
                false
            }
            None => false,
        }
    }

    /// Ask the worker to stop.
    ///
    /// The readiness wait is abandoned, the resolver session is released and the
    /// callback is not invoked for the cancellation itself. An operation that was
    /// never started is released immediately. Idempotent.
    pub fn cancel(&self) {
        debug!("Cancelling {} operation {}", self.inner.kind, self.inner.id);
        self.inner.cancel.cancel();
        let parked = lock(&self.inner.launcher).take();
        if let Some(parked) = parked {
            drop(parked);
            self.mark_terminated();
        }
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Check if the worker has exited
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.is_cancelled()
    }

    /// Wait until the worker has exited and released its session
    pub async fn terminated(&self) {
        self.inner.terminated.cancelled().await;
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub(crate) fn park(&self, launcher: Launcher) {
        self.set_state(OperationState::Submitted);
        *lock(&self.inner.launcher) = Some(launcher);
    }

    pub(crate) fn set_state(&self, state: OperationState) {
        let mut current = lock(&self.inner.state);
        if *current != OperationState::Terminated {
            debug!("Operation {} {:?} -> {:?}", self.inner.id, *current, state);
            *current = state;
        }
    }

    pub(crate) fn mark_terminated(&self) {
        self.set_state(OperationState::Terminated);
        self.inner.terminated.cancel();
    }

    /// Record a failure for this operation and in the process-wide diagnostic
    pub(crate) fn record_error(&self, message: &str) {
        *lock(&self.inner.last_error) = Some(message.to_string());
        record_last_error(message);
    }
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("target", &self.inner.target)
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for OperationHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for OperationHandle {}
