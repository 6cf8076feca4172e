//! Deduplication of identical concurrent engine calls.

use cascade_core::EngineResponse;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::Arc;

type InFlight = Shared<BoxFuture<'static, EngineResponse>>;

/// At most one running computation per key; later callers await the first one's result.
#[derive(Default, Clone)]
pub struct SingleFlight {
    in_flight: Arc<DashMap<String, InFlight>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless a computation for `key` is already in flight,
    /// in which case its result is awaited instead.
    ///
    /// The entry is removed when the computation finishes, whichever caller drives it.
    pub async fn run<F, Fut>(&self, key: String, work: F) -> EngineResponse
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResponse> + Send + 'static,
    {
        let shared = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let in_flight = Arc::clone(&self.in_flight);
                let computation = work();
                let shared = async move {
                    let response = computation.await;
                    in_flight.remove(&key);
                    response
                }
                .boxed()
                .shared();
                entry.insert(shared.clone());
                shared
            }
        };

        shared.await
    }

    /// Number of keys currently in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let flights = SingleFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let call = |value: i64| {
            let runs = Arc::clone(&runs);
            flights.run("key".to_string(), move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                EngineResponse::ok(json!(value))
            })
        };

        let (a, b) = tokio::join!(call(1), call(2));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(a, b);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn finished_keys_run_again() {
        let flights = SingleFlight::new();
        let first = flights.run("key".to_string(), || async { EngineResponse::ok(json!(1)) }).await;
        let second = flights.run("key".to_string(), || async { EngineResponse::ok(json!(2)) }).await;
        assert_eq!(first.result, Some(json!(1)));
        assert_eq!(second.result, Some(json!(2)));
    }

    #[tokio::test]
    async fn different_keys_do_not_block_each_other() {
        let flights = SingleFlight::new();
        let (a, b) = tokio::join!(
            flights.run("a".to_string(), || async { EngineResponse::ok(json!("a")) }),
            flights.run("b".to_string(), || async { EngineResponse::error("engine request failed") }),
        );
        assert!(a.is_ok());
        assert!(!b.is_ok());
    }
}
