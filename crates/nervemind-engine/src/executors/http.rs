//! HTTP request executor.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nervemind_workflow::{DataObject, Node};
use serde_json::{json, Value};

use crate::credentials::{CredentialKind, DecryptedCredential};
use crate::error::EngineError;
use crate::executor::{NodeCategory, NodeDescriptor, NodeExecutor, NodeOutput};
use crate::logger::{LogCategory, LogEntry, LogLevel};
use crate::runtime::ExecutionContext;

/// httpRequest node. Applies the referenced credential by its kind and
/// records a verbose request/response entry when asked to.
pub struct HttpRequestExecutor {
    client: reqwest::Client,
}

impl HttpRequestExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_credential(
    request: reqwest::RequestBuilder,
    credential: &DecryptedCredential,
) -> reqwest::RequestBuilder {
    match credential.kind {
        CredentialKind::ApiKey => {
            let key = credential.get_str("key").unwrap_or("");
            if let Some(query_name) = credential.get_str("queryName") {
                request.query(&[(query_name, key)])
            } else {
                let header = credential.get_str("headerName").unwrap_or("X-Api-Key");
                request.header(header, key)
            }
        }
        CredentialKind::Basic => request.basic_auth(
            credential.get_str("username").unwrap_or(""),
            credential.get_str("password"),
        ),
        CredentialKind::Bearer => {
            request.bearer_auth(credential.get_str("token").unwrap_or(""))
        }
        CredentialKind::OAuth2 => {
            request.bearer_auth(credential.get_str("accessToken").unwrap_or(""))
        }
        CredentialKind::CustomHeader => request.header(
            credential.get_str("headerName").unwrap_or("X-Custom"),
            credential.get_str("headerValue").unwrap_or(""),
        ),
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "httpRequest",
            display_name: "HTTP Request",
            category: NodeCategory::Integration,
            trigger_kind: None,
            description: "Performs an HTTP request and flows the response onward.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string"},
                    "method": {"type": "string",
                               "enum": ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"]},
                    "headers": {"type": "object"},
                    "body": {},
                    "timeout": {"type": "integer", "minimum": 1},
                    "credentialId": {"type": "string"},
                    "verbose": {"type": "boolean"}
                },
                "required": ["url"]
            }),
        }
    }

    fn validate(&self, config: &DataObject) -> HashMap<String, String> {
        let mut errors = HashMap::new();
        if config
            .get("url")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
        {
            errors.insert("url".to_string(), "httpRequest missing URL".to_string());
        }
        errors
    }

    async fn execute(
        &self,
        node: &Node,
        input: &DataObject,
        ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        let url = node.parameter_str("url").map(str::trim).unwrap_or("");
        if url.is_empty() {
            return Err(EngineError::for_node(&node.id, "httpRequest missing URL"));
        }

        let method_name = node
            .parameter_str("method")
            .unwrap_or("GET")
            .to_uppercase();
        let method = reqwest::Method::from_bytes(method_name.as_bytes())
            .unwrap_or(reqwest::Method::GET);

        let mut request = self.client.request(method.clone(), url);

        if let Some(Value::Object(headers)) = node.get_parameter("headers") {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name, value);
                }
            }
        }

        if let Some(body) = node.get_parameter("body") {
            if !matches!(method, reqwest::Method::GET | reqwest::Method::HEAD) {
                request = request.json(body);
            }
        }

        if let Some(timeout_ms) = node.get_parameter("timeout").and_then(Value::as_u64) {
            request = request.timeout(Duration::from_millis(timeout_ms));
        }

        // Resolve the credential lazily; its values never reach the logger.
        let credential_id = node
            .credential_id
            .clone()
            .or_else(|| node.parameter_str("credentialId").map(String::from));
        if let Some(id) = credential_id {
            let resolver = ctx.credential_resolver.as_ref().ok_or_else(|| {
                EngineError::Credential(format!("no credential resolver for credential '{id}'"))
            })?;
            let credential = resolver.resolve(&id).await?;
            request = apply_credential(request, &credential);
        }

        let cancel = ctx.cancellation_token();
        let started = Instant::now();
        let response = tokio::select! {
            result = request.send() => result.map_err(|e| EngineError::ExternalApi {
                api_name: reqwest::Url::parse(url)
                    .ok()
                    .and_then(|u| u.host_str().map(String::from)),
                status_code: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            })?,
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        };

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let body: Value =
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.clone()));
        let duration_ms = started.elapsed().as_millis() as u64;

        let verbose = node
            .get_parameter("verbose")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if verbose {
            ctx.logger.emit(
                LogEntry::new(
                    LogLevel::Debug,
                    LogCategory::DataFlow,
                    &ctx.execution_id,
                    format!("{method_name} {url} -> {status} in {duration_ms} ms"),
                )
                .with_context("method", Value::String(method_name.clone()))
                .with_context("url", Value::String(url.to_string()))
                .with_context("status", json!(status))
                .with_context("durationMs", json!(duration_ms))
                .with_payload(&body),
            );
        }

        let mut output = input.clone();
        output.insert("status".to_string(), json!(status));
        output.insert("body".to_string(), body);
        output.insert("durationMs".to_string(), json!(duration_ms));
        Ok(NodeOutput::main(output))
    }
}
