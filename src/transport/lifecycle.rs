use super::{CloseHandlerFn, ErrorHandlerFn, MessageHandlerFn};
use crate::context::CancellationToken;
use crate::types::{JsonRpcMessage, McpError};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Unstarted,
    Running,
    Closed,
}

#[derive(Default)]
struct Handlers {
    message: Option<MessageHandlerFn>,
    error: Option<ErrorHandlerFn>,
    close: Option<CloseHandlerFn>,
}

/// Lifecycle state and callback slots shared by a transport and its read
/// thread.
pub(crate) struct Lifecycle {
    name: &'static str,
    state: Mutex<TransportState>,
    handlers: Mutex<Handlers>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Lifecycle {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(TransportState::Unstarted),
            handlers: Mutex::new(Handlers::default()),
        }
    }

    pub(crate) fn state(&self) -> TransportState {
        *lock(&self.state)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == TransportState::Running
    }

    /// Unstarted -> Running. Any other state is left untouched.
    pub(crate) fn begin_start(&self) -> Result<(), McpError> {
        let mut state = lock(&self.state);
        match *state {
            TransportState::Unstarted => {
                *state = TransportState::Running;
                Ok(())
            }
            TransportState::Running | TransportState::Closed => Err(McpError::AlreadyStarted),
        }
    }

    /// Undo [`Lifecycle::begin_start`] when the read thread could not be
    /// spawned.
    pub(crate) fn abort_start(&self) {
        let mut state = lock(&self.state);
        if *state == TransportState::Running {
            *state = TransportState::Unstarted;
        }
    }

    /// Move to Closed. Returns true only for the call that made the move.
    pub(crate) fn begin_close(&self) -> bool {
        let mut state = lock(&self.state);
        let previous = std::mem::replace(&mut *state, TransportState::Closed);
        previous != TransportState::Closed
    }

    pub(crate) fn set_message_handler(&self, handler: MessageHandlerFn) {
        lock(&self.handlers).message = Some(handler);
    }

    pub(crate) fn set_error_handler(&self, handler: ErrorHandlerFn) {
        lock(&self.handlers).error = Some(handler);
    }

    pub(crate) fn set_close_handler(&self, handler: CloseHandlerFn) {
        lock(&self.handlers).close = Some(handler);
    }

    /// Hand a message to the message handler on the calling thread. The slot
    /// lock is released before the handler runs so handlers may re-register.
    ///
    /// A panicking handler is reported as [`McpError::HandlerPanicked`] and
    /// the read loop carries on with the next message.
    pub(crate) fn dispatch(&self, ctx: &CancellationToken, message: JsonRpcMessage) {
        let handler = lock(&self.handlers).message.clone();
        match handler {
            Some(handler) => {
                let method = message.method().map(str::to_owned);
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(ctx, message)));
                if let Err(payload) = outcome {
                    self.report(McpError::HandlerPanicked {
                        method,
                        message: panic_message(payload.as_ref()),
                    });
                }
            }
            None => warn!(
                "{}: no message handler registered, dropping {}",
                self.name,
                message.kind()
            ),
        }
    }

    pub(crate) fn report(&self, err: McpError) {
        let handler = lock(&self.handlers).error.clone();
        match handler {
            Some(handler) => handler(err),
            None => error!("{}: {}", self.name, err),
        }
    }

    pub(crate) fn notify_closed(&self) {
        let handler = lock(&self.handlers).close.clone();
        debug!("{}: closed", self.name);
        if let Some(handler) = handler {
            handler();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn starts_once() {
        let lifecycle = Lifecycle::new("test");
        assert_eq!(lifecycle.state(), TransportState::Unstarted);
        assert!(lifecycle.begin_start().is_ok());
        assert!(lifecycle.is_running());
        assert!(matches!(lifecycle.begin_start(), Err(McpError::AlreadyStarted)));
        assert!(lifecycle.is_running());
    }

    #[test]
    fn cannot_restart_after_close() {
        let lifecycle = Lifecycle::new("test");
        assert!(lifecycle.begin_start().is_ok());
        assert!(lifecycle.begin_close());
        assert!(!lifecycle.begin_close());
        assert!(matches!(lifecycle.begin_start(), Err(McpError::AlreadyStarted)));
        assert_eq!(lifecycle.state(), TransportState::Closed);
    }

    #[test]
    fn abort_start_allows_retry() {
        let lifecycle = Lifecycle::new("test");
        assert!(lifecycle.begin_start().is_ok());
        lifecycle.abort_start();
        assert_eq!(lifecycle.state(), TransportState::Unstarted);
        assert!(lifecycle.begin_start().is_ok());
    }

    #[test]
    fn latest_handler_wins() {
        let lifecycle = Lifecycle::new("test");
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        lifecycle.set_error_handler(Arc::new(move |_err: McpError| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        lifecycle.report(McpError::TransportClosed);

        let counter = second.clone();
        lifecycle.set_error_handler(Arc::new(move |_err: McpError| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        lifecycle.report(McpError::TransportClosed);

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_is_reported() {
        let lifecycle = Lifecycle::new("test");
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        lifecycle.set_error_handler(Arc::new(move |err: McpError| {
            lock(&sink).push(err);
        }));
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        lifecycle.set_message_handler(Arc::new(
            move |_ctx: &CancellationToken, message: JsonRpcMessage| {
                if message.method() == Some("boom") {
                    panic!("handler exploded");
                }
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));

        let ctx = CancellationToken::new();
        lifecycle.dispatch(
            &ctx,
            crate::types::JsonRpcNotification::new("boom", None).into(),
        );
        lifecycle.dispatch(&ctx, crate::types::JsonRpcNotification::initialized().into());

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        let reported = lock(&reported);
        match reported.as_slice() {
            [McpError::HandlerPanicked { method, message }] => {
                assert_eq!(method.as_deref(), Some("boom"));
                assert_eq!(message, "handler exploded");
            }
            other => panic!("unexpected reports {:?}", other),
        }
    }

    #[test]
    fn missing_handlers_do_not_panic() {
        let lifecycle = Lifecycle::new("test");
        lifecycle.report(McpError::TransportClosed);
        lifecycle.dispatch(
            &CancellationToken::new(),
            crate::types::JsonRpcNotification::initialized().into(),
        );
        lifecycle.notify_closed();
    }
}
