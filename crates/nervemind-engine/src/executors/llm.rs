//! LLM chat executor against an OpenAI-compatible completions endpoint.

use std::collections::HashMap;

use async_trait::async_trait;
use nervemind_workflow::{DataObject, Node};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::error::EngineError;
use crate::executor::{NodeCategory, NodeDescriptor, NodeExecutor, NodeOutput};
use crate::runtime::ExecutionContext;

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// One chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Chat completion request body.
#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f64,
}

/// Chat completion response body.
#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// llmChat node.
pub struct LlmChatExecutor {
    client: reqwest::Client,
}

impl LlmChatExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for LlmChatExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for LlmChatExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "llmChat",
            display_name: "LLM Chat",
            category: NodeCategory::Integration,
            trigger_kind: None,
            description: "Sends a prompt to a chat-completion API and flows the reply onward.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "model": {"type": "string"},
                    "prompt": {"type": "string"},
                    "systemPrompt": {"type": "string"},
                    "temperature": {"type": "number", "minimum": 0, "maximum": 2},
                    "maxTokens": {"type": "integer", "minimum": 1},
                    "apiUrl": {"type": "string"},
                    "credentialId": {"type": "string"}
                },
                "required": ["prompt"]
            }),
        }
    }

    fn validate(&self, config: &DataObject) -> HashMap<String, String> {
        let mut warnings = HashMap::new();
        if config
            .get("prompt")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
        {
            warnings.insert("prompt".to_string(), "llmChat missing prompt".to_string());
        }
        warnings
    }

    async fn execute(
        &self,
        node: &Node,
        input: &DataObject,
        ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        let prompt = node.parameter_str("prompt").map(str::trim).unwrap_or("");
        if prompt.is_empty() {
            // Missing prompt is a warning, not a failure: the node becomes
            // a pass-through.
            warn!(node = %node.name, "llmChat missing prompt");
            return Ok(NodeOutput::main(input.clone()));
        }

        let model = node.parameter_str("model").unwrap_or("gpt-4o-mini");
        let api_url = node.parameter_str("apiUrl").unwrap_or(DEFAULT_API_URL);

        let mut messages = Vec::new();
        if let Some(system) = node.parameter_str("systemPrompt") {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let body = ChatRequest {
            model: model.to_string(),
            messages,
            max_tokens: node
                .get_parameter("maxTokens")
                .and_then(Value::as_u64)
                .unwrap_or(1024) as u32,
            temperature: node
                .get_parameter("temperature")
                .and_then(Value::as_f64)
                .unwrap_or(0.7),
        };

        let mut request = self.client.post(api_url).json(&body);

        let credential_id = node
            .credential_id
            .clone()
            .or_else(|| node.parameter_str("credentialId").map(String::from));
        if let Some(id) = credential_id {
            let resolver = ctx.credential_resolver.as_ref().ok_or_else(|| {
                EngineError::Credential(format!("no credential resolver for credential '{id}'"))
            })?;
            let credential = resolver.resolve(&id).await?;
            let token = credential
                .get_str("token")
                .or_else(|| credential.get_str("accessToken"))
                .or_else(|| credential.get_str("key"))
                .unwrap_or("");
            request = request.bearer_auth(token);
        }

        let cancel = ctx.cancellation_token();
        let response = tokio::select! {
            result = request.send() => result.map_err(|e| EngineError::ExternalApi {
                api_name: Some("llm".to_string()),
                status_code: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            })?,
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EngineError::ExternalApi {
                api_name: Some("llm".to_string()),
                status_code: Some(status.as_u16()),
                message,
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            EngineError::for_node(&node.id, format!("malformed chat response: {e}"))
        })?;
        let reply = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        let mut output = input.clone();
        output.insert("response".to_string(), Value::String(reply));
        output.insert("model".to_string(), Value::String(model.to_string()));
        Ok(NodeOutput::main(output))
    }
}
