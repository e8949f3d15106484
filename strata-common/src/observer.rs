use std::error::Error;
use std::fmt::Debug;
use std::sync::Arc;

use tracing::error;

/// A hook notified whenever an operation fails.
///
/// Observers only see failures, they cannot change the outcome. The error
/// is still returned to the caller after every observer has been invoked.
pub trait ErrorObserver: Debug + Send + Sync {
    fn on_error(&self, operation: &str, error: &(dyn Error + 'static));
}

/// An observer that can be shared between components.
pub type SharedObserver = Arc<dyn ErrorObserver>;

#[derive(Debug, Default)]
/// Logs every observed failure as a `tracing` error event.
pub struct TracingObserver;

impl ErrorObserver for TracingObserver {
    fn on_error(&self, operation: &str, error: &(dyn Error + 'static)) {
        error!(operation = operation, error = %error, "Operation failed");
    }
}

/// Notifies the observer (if any) of the error carried by `result`.
pub fn observe<T, E>(
    observer: Option<&SharedObserver>,
    operation: &str,
    result: Result<T, E>,
) -> Result<T, E>
where
    E: Error + 'static,
{
    if let (Some(observer), Err(e)) = (observer, &result) {
        observer.on_error(operation, e);
    }
    result
}
