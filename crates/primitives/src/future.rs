use std::future::Future;
use std::pin::Pin;

/// Boxed future handed to the workspace lock's queue.
pub type BoxFutureStatic<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;
