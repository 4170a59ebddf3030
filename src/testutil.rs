use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use axum::{extract::Path, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use tokio::{
    sync::oneshot::{self, Receiver, Sender},
    task::JoinHandle,
};

use crate::client::{ClientError, ClientResult, OperationsClient};

pub const FAKE_OPERATION_ID: &str = "op-1";

/// In-process stand-in for the Inspectr REST API.
pub struct FakeApiHandle {
    handle: JoinHandle<Result<(), String>>,
    close_tx: Sender<()>,
    addr: SocketAddr,
}

impl FakeApiHandle {
    pub async fn shutdown(self) -> Result<(), String> {
        self.close_tx
            .send(())
            .map_err(|_| "failed to send shutdown signal".to_string())?;
        self.handle.await.unwrap_or_else(|e| Err(e.to_string()))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

pub async fn spawn_fake_api() -> FakeApiHandle {
    let app = Router::new().route("/api/operations/:id", get(get_operation));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (close_tx, close_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                _ = close_rx.await;
            })
            .await
            .map_err(|e| e.to_string())
    });

    FakeApiHandle {
        handle,
        close_tx,
        addr,
    }
}

async fn get_operation(Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    match id.as_str() {
        FAKE_OPERATION_ID => (
            StatusCode::OK,
            Json(json!({
                "id": id,
                "request": {"method": "GET", "path": "/hello"},
                "response": {"status": 200, "event_frames": []}
            })),
        ),
        "broken" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": {"message": "storage unavailable"}})),
        ),
        "scalar" => (StatusCode::OK, Json(json!("op"))),
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "operation not found"})),
        ),
    }
}

/// Client whose responses are handed out in call order. Each call waits for
/// its paired [`Sender`] so tests decide when, and in which order, fetches
/// complete.
#[derive(Default)]
pub struct ScriptedClient {
    pending: Mutex<VecDeque<Receiver<ClientResult<Value>>>>,
    calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl ScriptedClient {
    /// Queues the next response slot and returns the sender that resolves it.
    pub fn expect_call(&self) -> Sender<ClientResult<Value>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().push_back(rx);
        tx
    }

    /// Queues an already-resolved response.
    pub fn respond_with(&self, result: ClientResult<Value>) {
        _ = self.expect_call().send(result);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperationsClient for ScriptedClient {
    async fn get_operation(&self, id: &str) -> ClientResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(id.to_string());
        let rx = self.pending.lock().unwrap().pop_front();
        match rx {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(ClientError::Transport("response dropped".to_string()))),
            None => Err(ClientError::Transport(format!(
                "unexpected call for \"{}\"",
                id
            ))),
        }
    }
}
