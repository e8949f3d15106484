pub mod cancel;
pub mod observer;
pub mod signal_handler;

pub use self::cancel::CancellationToken;
pub use self::observer::{ErrorObserver, SharedObserver, TracingObserver};
