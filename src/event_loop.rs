//! Readiness-wait loop pumping one resolver session

use crate::{
    error::{ErrorCode, MdnsError},
    operation::{Callback, OperationHandle, OperationState},
    resolver::{ResolverReply, ResolverSession},
};
use std::{io, time::Duration};
use tracing::{debug, error, info, trace};

/// Why an event loop exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The operation was cancelled through its handle
    Cancelled,
    /// A fatal failure was reported to the callback with this code
    Failed(ErrorCode),
}

/// Worker state for one operation: the session and where its events go
pub(crate) struct EventLoop<H> {
    session: Option<Box<dyn ResolverSession>>,
    callback: Callback,
    on_reply: H,
    wait_timeout: Duration,
}

/// A loop that is dropped without running still releases its session
impl<H> Drop for EventLoop<H> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
            debug!("Released session of an operation that never ran");
        }
    }
}

/// Closes the session and marks the handle terminated exactly once, including on unwind
struct Teardown {
    session: Option<Box<dyn ResolverSession>>,
    handle: OperationHandle,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
        self.handle.mark_terminated();
        debug!("Released session of operation {}", self.handle.id());
    }
}

impl<H> EventLoop<H>
where
    H: FnMut(&OperationHandle, ResolverReply) + Send,
{
    pub(crate) fn new(
        session: Box<dyn ResolverSession>,
        callback: Callback,
        on_reply: H,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            session: Some(session),
            callback,
            on_reply,
            wait_timeout,
        }
    }

    /// Pump the session for `handle` until cancellation or a fatal failure, then release it
    pub(crate) async fn run(mut self, handle: OperationHandle) -> LoopExit {
        let mut teardown = Teardown {
            session: self.session.take(),
            handle: handle.clone(),
        };
        handle.set_state(OperationState::Running);
        info!("Event loop started for {} operation {}", handle.kind(), handle.id());

        let exit = match teardown.session.as_mut() {
            Some(session) => {
                pump(
                    session.as_mut(),
                    &handle,
                    &self.callback,
                    &mut self.on_reply,
                    self.wait_timeout,
                )
                .await
            }
            None => LoopExit::Cancelled,
        };

        drop(teardown);
        info!("Event loop for operation {} exited: {:?}", handle.id(), exit);
        exit
    }
}

async fn pump<H>(
    session: &mut dyn ResolverSession,
    handle: &OperationHandle,
    callback: &Callback,
    on_reply: &mut H,
    wait_timeout: Duration,
) -> LoopExit
where
    H: FnMut(&OperationHandle, ResolverReply) + Send,
{
    let token = handle.cancellation_token();

    loop {
        if token.is_cancelled() {
            return LoopExit::Cancelled;
        }

        let waited = tokio::select! {
            biased;
            _ = token.cancelled() => return LoopExit::Cancelled,
            waited = tokio::time::timeout(wait_timeout, session.readable()) => waited,
        };

        match waited {
            Err(_) => {
                trace!("Readiness wait of operation {} timed out", handle.id());
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {
                debug!("Readiness wait of operation {} interrupted, retrying", handle.id());
            }
            Ok(Err(e)) => {
                let err = MdnsError::wait_failed(&e);
                return fail(handle, callback, &err);
            }
            Ok(Ok(())) => match session.process_result() {
                Ok(Some(reply)) => {
                    trace!("Operation {} reply: {:?}", handle.id(), reply);
                    on_reply(handle, reply);
                }
                Ok(None) => {}
                Err(e) => {
                    let err = MdnsError::session(e.code, format!("Resolver call failed: {}", e.message));
                    return fail(handle, callback, &err);
                }
            },
        }
    }
}

fn fail(handle: &OperationHandle, callback: &Callback, err: &MdnsError) -> LoopExit {
    error!("Operation {} failed: {}", handle.id(), err);
    handle.record_error(&err.to_string());
    let code = err.code();
    callback(handle, code, None);
    LoopExit::Failed(code)
}
