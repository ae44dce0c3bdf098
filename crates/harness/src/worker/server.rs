//! Lambda Invoke API host for the mock worker.
//!
//! The workflow engine's Lambda client calls
//! `POST /2015-03-31/functions/{name}/invocations` with the task parameters as the
//! body. A task failure is still HTTP 200, flagged with `X-Amz-Function-Error`.

use std::net::SocketAddr;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Json;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{MockWorker, WorkerReply};

/// Route the engine invokes.
pub const INVOKE_ROUTE: &str = "/2015-03-31/functions/{name}/invocations";

const FUNCTION_ERROR_HEADER: HeaderName = HeaderName::from_static("x-amz-function-error");
const EXECUTED_VERSION_HEADER: HeaderName = HeaderName::from_static("x-amz-executed-version");

/// Host configuration for the mock worker HTTP server.
#[derive(Clone)]
pub struct MockWorkerServer {
    bind_address: SocketAddr,
    worker: MockWorker,
}

impl MockWorkerServer {
    pub fn new(bind_address: SocketAddr, worker: MockWorker) -> Self {
        Self { bind_address, worker }
    }

    /// Router serving the invoke route; exposed so it can be mounted elsewhere.
    pub fn router(worker: MockWorker) -> Router {
        Router::new().route(INVOKE_ROUTE, post(invoke)).with_state(worker)
    }

    /// Bind and start serving. The returned handle reports the bound address and
    /// shuts the server down.
    pub async fn start(self) -> std::io::Result<RunningMockWorkerServer> {
        let cancellation_token = CancellationToken::new();
        let listener = tokio::net::TcpListener::bind(self.bind_address).await?;
        let bound_address = listener.local_addr()?;
        let router = Self::router(self.worker);

        let server_handle = tokio::spawn({
            let shutdown = cancellation_token.child_token();
            async move {
                if let Err(error) = axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown.cancelled().await;
                    })
                    .await
                {
                    error!(%error, "mock worker server stopped with an error");
                }
            }
        });

        info!(address = %bound_address, "mock worker listening");
        Ok(RunningMockWorkerServer {
            bind_address: bound_address,
            cancellation_token,
            server_handle,
        })
    }
}

/// Runtime handle for a running mock worker server.
#[derive(Debug)]
pub struct RunningMockWorkerServer {
    bind_address: SocketAddr,
    cancellation_token: CancellationToken,
    server_handle: JoinHandle<()>,
}

impl RunningMockWorkerServer {
    pub fn bound_address(&self) -> SocketAddr {
        self.bind_address
    }

    /// Stop accepting requests and wait for the server task to finish.
    pub async fn stop(self) -> Result<(), tokio::task::JoinError> {
        self.cancellation_token.cancel();
        self.server_handle.await
    }
}

async fn invoke(State(worker): State<MockWorker>, Path(name): Path<String>, body: Bytes) -> Response {
    let envelope: Value = if body.iter().all(u8::is_ascii_whitespace) {
        json!({})
    } else {
        match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(error) => {
                return failure_response("InvalidRequestContentException", &format!("invocation body is not JSON: {error}"));
            }
        }
    };
    debug!(lambda = %name, "mock worker invoked");

    match worker.invoke(envelope).await {
        Ok(WorkerReply::Output(output)) => (
            StatusCode::OK,
            [(EXECUTED_VERSION_HEADER, HeaderValue::from_static("$LATEST"))],
            Json(output),
        )
            .into_response(),
        Ok(WorkerReply::Failure(failure)) => failure_response(&failure.error_type, &failure.error_message),
        Err(error) => {
            error!(lambda = %name, %error, "mock worker could not reach the ledger");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"Type": "Service", "message": error.to_string()})),
            )
                .into_response()
        }
    }
}

fn failure_response(error_type: &str, message: &str) -> Response {
    (
        StatusCode::OK,
        [
            (FUNCTION_ERROR_HEADER, HeaderValue::from_static("Unhandled")),
            (EXECUTED_VERSION_HEADER, HeaderValue::from_static("$LATEST")),
        ],
        Json(json!({"errorType": error_type, "errorMessage": message})),
    )
        .into_response()
}
