//! Step Functions JSON 1.0 protocol client.
//!
//! Every operation is a `POST /` carrying the operation name in the
//! `X-Amz-Target` header and a JSON body. Step Functions Local does not verify
//! request signatures, so requests carry a syntactically valid placeholder
//! `Authorization` header built from dummy credentials.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Url, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use sfn_tester_types::{ExecutionDescription, ExecutionSummary, HistoryEvent};
use tracing::{debug, warn};

use crate::{EngineError, WorkflowEngine};

const TARGET_PREFIX: &str = "AWSStepFunctions";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const DUMMY_ACCESS_KEY: &str = "dummy";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for a Step Functions compatible endpoint.
#[derive(Debug, Clone)]
pub struct StepFunctionsClient {
    endpoint: Url,
    region: String,
    http: Client,
}

impl StepFunctionsClient {
    /// Construct a client for `endpoint` (for example `http://localhost:8083`).
    pub fn new(endpoint: &str, region: &str) -> Result<Self, EngineError> {
        let endpoint = validate_endpoint(endpoint)?;
        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static(CONTENT_TYPE));
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| EngineError::invalid_endpoint(endpoint.as_str(), error.to_string()))?;

        Ok(Self {
            endpoint,
            region: region.to_string(),
            http,
        })
    }

    /// Endpoint this client sends requests to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Cheap reachability probe used by readiness checks.
    pub async fn ping(&self) -> Result<(), EngineError> {
        let _: Value = self.call("ListStateMachines", json!({ "maxResults": 1 })).await?;
        Ok(())
    }

    async fn call<T: DeserializeOwned>(&self, operation: &str, body: Value) -> Result<T, EngineError> {
        debug!(operation, endpoint = %self.endpoint, "calling workflow engine");
        let amz_date = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let response = self
            .http
            .post(self.endpoint.clone())
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{operation}"))
            .header("X-Amz-Date", &amz_date)
            .header(header::AUTHORIZATION, self.authorization(&amz_date))
            .body(body.to_string())
            .send()
            .await
            .map_err(|source| EngineError::Transport {
                operation: operation.to_string(),
                source,
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|source| EngineError::Transport {
            operation: operation.to_string(),
            source,
        })?;

        if !status.is_success() {
            let error = parse_service_error(operation, status.as_u16(), &text);
            warn!(operation, status = status.as_u16(), error = %error, "workflow engine rejected request");
            return Err(error);
        }

        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(text).map_err(|source| EngineError::Decode {
            operation: operation.to_string(),
            source,
        })
    }

    fn authorization(&self, amz_date: &str) -> String {
        let date = amz_date.get(..8).unwrap_or(amz_date);
        format!(
            "AWS4-HMAC-SHA256 Credential={DUMMY_ACCESS_KEY}/{date}/{}/states/aws4_request, SignedHeaders=content-type;host;x-amz-date;x-amz-target, Signature=0",
            self.region
        )
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateStateMachineOutput {
    state_machine_arn: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartExecutionOutput {
    execution_arn: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetExecutionHistoryOutput {
    #[serde(default)]
    events: Vec<HistoryEvent>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListExecutionsOutput {
    #[serde(default)]
    executions: Vec<ExecutionSummary>,
    #[serde(default)]
    next_token: Option<String>,
}

#[async_trait]
impl WorkflowEngine for StepFunctionsClient {
    async fn create_definition(&self, name: &str, document: &Value, role_ref: &str) -> Result<String, EngineError> {
        let output: CreateStateMachineOutput = self
            .call(
                "CreateStateMachine",
                json!({
                    "name": name,
                    "definition": document.to_string(),
                    "roleArn": role_ref,
                }),
            )
            .await?;
        Ok(output.state_machine_arn)
    }

    async fn start_execution(&self, definition_ref: &str, run_name: &str, input: &Value) -> Result<String, EngineError> {
        let output: StartExecutionOutput = self
            .call(
                "StartExecution",
                json!({
                    "stateMachineArn": definition_ref,
                    "name": run_name,
                    "input": input.to_string(),
                }),
            )
            .await?;
        Ok(output.execution_arn)
    }

    async fn describe_execution(&self, execution_ref: &str) -> Result<ExecutionDescription, EngineError> {
        self.call("DescribeExecution", json!({ "executionArn": execution_ref })).await
    }

    async fn get_execution_history(&self, execution_ref: &str) -> Result<Vec<HistoryEvent>, EngineError> {
        let mut events = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut body = json!({ "executionArn": execution_ref });
            if let Some(token) = &next_token {
                body["nextToken"] = Value::String(token.clone());
            }
            let page: GetExecutionHistoryOutput = self.call("GetExecutionHistory", body).await?;
            events.extend(page.events);
            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }
        Ok(events)
    }

    async fn list_executions(&self, definition_ref: &str) -> Result<Vec<ExecutionSummary>, EngineError> {
        let mut executions = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut body = json!({ "stateMachineArn": definition_ref });
            if let Some(token) = &next_token {
                body["nextToken"] = Value::String(token.clone());
            }
            let page: ListExecutionsOutput = self.call("ListExecutions", body).await?;
            executions.extend(page.executions);
            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }
        Ok(executions)
    }

    async fn stop_execution(&self, execution_ref: &str) -> Result<(), EngineError> {
        let _: Value = self.call("StopExecution", json!({ "executionArn": execution_ref })).await?;
        Ok(())
    }

    async fn delete_definition(&self, definition_ref: &str) -> Result<(), EngineError> {
        let _: Value = self
            .call("DeleteStateMachine", json!({ "stateMachineArn": definition_ref }))
            .await?;
        Ok(())
    }
}

/// Validate that an endpoint is an absolute http(s) URL with a host.
fn validate_endpoint(endpoint: &str) -> Result<Url, EngineError> {
    let url = Url::parse(endpoint).map_err(|error| EngineError::invalid_endpoint(endpoint, error.to_string()))?;
    if url.host_str().is_none() {
        return Err(EngineError::invalid_endpoint(endpoint, "endpoint must include a host"));
    }
    if !matches!(url.scheme(), "http" | "https") {
        return Err(EngineError::invalid_endpoint(
            endpoint,
            format!("unsupported scheme '{}://'", url.scheme()),
        ));
    }
    Ok(url)
}

/// Decode an engine error document such as
/// `{"__type": "com.amazonaws.swf.service.v2.model#StateMachineDoesNotExist", "message": "..."}`.
fn parse_service_error(operation: &str, status: u16, body: &str) -> EngineError {
    let document: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let error_code = document
        .get("__type")
        .and_then(Value::as_str)
        .map(|raw| raw.rsplit('#').next().unwrap_or(raw).to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let message = document
        .get("message")
        .or_else(|| document.get("Message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());
    EngineError::service(operation, status, error_code, message)
}
