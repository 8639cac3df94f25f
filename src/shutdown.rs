use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::error::ConveyorError;

/// Shutdown coordinator shared by the dispatcher, the workers, and (via its
/// token) running handlers.
///
/// One cancellation broadcast serves three roles: stop the dispatcher from
/// claiming, let idle workers wind down, and tell handlers to abort long
/// work. The first error recorded by [`kill`](Shutdown::kill) becomes the
/// pool's final cause; later errors are dropped.
#[derive(Clone)]
pub(crate) struct Shutdown {
    token: CancellationToken,
    cause: Arc<Mutex<Option<ConveyorError>>>,
}

impl Shutdown {
    pub(crate) fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            cause: Arc::new(Mutex::new(None)),
        }
    }

    /// Begin a clean shutdown with no cause.
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Begin shutdown because something broke. Only the first cause sticks.
    pub(crate) fn kill(&self, cause: ConveyorError) {
        let mut slot = self.cause.lock().unwrap();
        slot.get_or_insert(cause);
        drop(slot);
        self.token.cancel();
    }

    pub(crate) async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token handed to handlers so they can watch for shutdown.
    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(crate) fn take_cause(&self) -> Option<ConveyorError> {
        self.cause.lock().unwrap().take()
    }
}
