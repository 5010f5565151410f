//! Liveness, readiness and heap endpoints for the process supervisor.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;

/// Allocator counters reported by `/debug/heap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub allocated: usize,
    pub resident: usize,
}

/// Shared between the gather loop (writer) and the probe handlers.
#[derive(Clone)]
pub struct ProbeState {
    ready: Arc<AtomicBool>,
    heap: fn() -> Option<HeapStats>,
}

impl ProbeState {
    pub fn new(heap: fn() -> Option<HeapStats>) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            heap,
        }
    }

    /// Marks the agent ready; called once a gather cycle has completed.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

pub fn router(state: ProbeState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/debug/heap", get(heap))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok\n"
}

async fn readyz(State(state): State<ProbeState>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "ready\n")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "waiting for first gather cycle\n")
    }
}

async fn heap(State(state): State<ProbeState>) -> (StatusCode, String) {
    match (state.heap)() {
        Some(stats) => (
            StatusCode::OK,
            format!(
                "allocated {}\nresident {}\n",
                stats.allocated, stats.resident
            ),
        ),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "allocator statistics unavailable\n".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn fixed_heap() -> Option<HeapStats> {
        Some(HeapStats {
            allocated: 4096,
            resident: 8192,
        })
    }

    async fn get_path(state: &ProbeState, path: &str) -> (StatusCode, String) {
        let response = router(state.clone())
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_healthz_always_ok() {
        let state = ProbeState::new(fixed_heap);
        assert_eq!(get_path(&state, "/healthz").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_after_first_cycle() {
        let state = ProbeState::new(fixed_heap);
        assert_eq!(
            get_path(&state, "/readyz").await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.mark_ready();
        assert_eq!(get_path(&state, "/readyz").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_heap_stats_as_text() {
        let state = ProbeState::new(fixed_heap);
        let (status, body) = get_path(&state, "/debug/heap").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "allocated 4096\nresident 8192\n");

        let state = ProbeState::new(|| None);
        let (status, _) = get_path(&state, "/debug/heap").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
