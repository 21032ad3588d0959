//! Data producers
//!
//! A [`Loader`] is a zero-argument producer of a JSON payload. It may finish
//! immediately or after an arbitrary await. Panics inside a producer are
//! caught and reported as a [`LoaderError`] like any other failure.

use crate::error::LoaderError;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

pub type LoaderResult = Result<Value, LoaderError>;

type Producer = dyn Fn() -> BoxFuture<'static, LoaderResult> + Send + Sync;

/// A cloneable handle to a data-producing function
#[derive(Clone)]
pub struct Loader {
    producer: Arc<Producer>,
}

impl Loader {
    /// Wrap an async producer
    pub fn new<F, Fut>(producer: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LoaderResult> + Send + 'static,
    {
        Self {
            producer: Arc::new(move || producer().boxed()),
        }
    }

    /// Wrap a synchronous producer
    pub fn from_fn<F>(producer: F) -> Self
    where
        F: Fn() -> LoaderResult + Send + Sync + 'static,
    {
        Self {
            producer: Arc::new(move || futures::future::ready(producer()).boxed()),
        }
    }

    /// A producer that always yields a clone of `value`
    pub fn value(value: Value) -> Self {
        Self::from_fn(move || Ok(value.clone()))
    }

    /// A producer that always fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::from_fn(move || Err(LoaderError::new(message.clone())))
    }

    /// A producer that never resolves
    pub fn pending() -> Self {
        Self::new(futures::future::pending::<LoaderResult>)
    }

    /// Delay every invocation of this producer by `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        if latency.is_zero() {
            return self;
        }
        Self::new(move || {
            let inner = self.clone();
            async move {
                tokio::time::sleep(latency).await;
                inner.invoke().await
            }
        })
    }

    /// Run the producer to completion
    pub async fn invoke(&self) -> LoaderResult {
        let future = match panic::catch_unwind(AssertUnwindSafe(|| (self.producer)())) {
            Ok(future) => future,
            Err(payload) => return Err(LoaderError::from_panic(payload)),
        };

        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(LoaderError::from_panic(payload)),
        }
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_value_loader() {
        let loader = Loader::value(json!({ "items": [1, 2, 3] }));
        assert_eq!(loader.invoke().await.unwrap(), json!({ "items": [1, 2, 3] }));
    }

    #[tokio::test]
    async fn test_failing_loader() {
        let loader = Loader::failing("boom");
        assert_eq!(loader.invoke().await.unwrap_err().message, "boom");
    }

    #[tokio::test]
    async fn test_sync_panic_is_caught() {
        let loader = Loader::from_fn(|| panic!("kaboom"));
        assert_eq!(loader.invoke().await.unwrap_err().message, "kaboom");
    }

    #[tokio::test]
    async fn test_async_panic_is_caught() {
        let loader = Loader::new(|| async {
            tokio::task::yield_now().await;
            if true {
                panic!("late kaboom");
            }
            Ok(Value::Null)
        });
        assert_eq!(loader.invoke().await.unwrap_err().message, "late kaboom");
    }

    #[tokio::test]
    async fn test_each_invoke_calls_producer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let loader = Loader::from_fn(move || Ok(json!(counter.fetch_add(1, Ordering::SeqCst))));

        loader.invoke().await.unwrap();
        loader.clone().invoke().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_result() {
        let loader = Loader::value(json!(1)).with_latency(Duration::from_millis(500));
        let start = tokio::time::Instant::now();

        loader.invoke().await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_never_resolves() {
        let loader = Loader::pending();
        let result = tokio::time::timeout(Duration::from_secs(60), loader.invoke()).await;
        assert!(result.is_err());
    }
}
