//! Scripted HTTP server for provider tests.
//!
//! Each path gets a queue of `(status, body)` responses served in order; the
//! last one repeats once the queue is down to it. Unscripted paths return 404.
//! Every request path and query string is recorded.

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::Router;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[derive(Default)]
struct ServerState {
    routes: Mutex<HashMap<String, VecDeque<(u16, String)>>>,
    requests: Mutex<Vec<String>>,
}

pub struct MockHttpServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockHttpServer {
    /// Start on an ephemeral loopback port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let app = Router::new().fallback(respond).with_state(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Script the responses for `path`.
    pub fn script(&self, path: &str, responses: Vec<(u16, &str)>) {
        let queue = responses
            .into_iter()
            .map(|(status, body)| (status, body.to_string()))
            .collect();
        self.state.routes.lock().insert(path.to_string(), queue);
    }

    /// Requests received so far, as `path?query`.
    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().clone()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|r| r.split('?').next() == Some(path))
            .count()
    }

    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn respond(State(state): State<Arc<ServerState>>, uri: Uri) -> (StatusCode, String) {
    let path = uri.path().to_string();
    state.requests.lock().push(match uri.query() {
        Some(q) => format!("{path}?{q}"),
        None => path.clone(),
    });

    let mut routes = state.routes.lock();
    let Some(queue) = routes.get_mut(&path) else {
        return (StatusCode::NOT_FOUND, String::new());
    };
    let (status, body) = if queue.len() > 1 {
        queue.pop_front().unwrap_or_default()
    } else {
        queue.front().cloned().unwrap_or_default()
    };
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        body,
    )
}
