//! Google Gemini provider implementation
//!
//! Talks to the Generative Language REST API (`models/{model}:generateContent`)
//! with the `x-goog-api-key` header. Tool calls map onto Gemini's
//! `functionCall` / `functionResponse` parts.

use super::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Gemini provider
pub struct GeminiProvider {
    client: Client,
    config: ProviderConfig,
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = http_client(config.timeout_secs.unwrap_or(120))?;
        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or("https://generativelanguage.googleapis.com/v1beta")
    }
}

/// Accept LiteLLM-style ids such as `gemini/gemini-1.5-flash`.
fn model_id(model: &str) -> &str {
    model.strip_prefix("gemini/").unwrap_or(model)
}

impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn default_model(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or("gemini-1.5-flash")
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let model = model_id(request.model.as_deref().unwrap_or(self.default_model())).to_string();
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ProviderError::AuthenticationFailed)?;

        let api_request = build_request(&request);

        let mut req = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url(), model))
            .header("x-goog-api-key", api_key)
            .json(&api_request);

        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        tracing::debug!(model = %model, messages = request.messages.len(), "gemini generateContent");

        let response = req.send().await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry = retry_after(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, retry, text));
        }

        let api_response: GeminiResponse = response.json().await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        parse_response(api_response, &model)
    }
}

/// Translate a provider-neutral request into Gemini's wire format.
fn build_request(request: &CompletionRequest) -> GeminiRequest {
    let mut system_parts = Vec::new();
    let mut contents: Vec<GeminiContent> = Vec::new();

    for msg in &request.messages {
        match msg.role {
            Role::System => {
                if let Some(text) = &msg.content {
                    system_parts.push(GeminiPart::text(text.clone()));
                }
            }
            Role::User => contents.push(GeminiContent {
                role: Some("user".into()),
                parts: vec![GeminiPart::text(msg.content.clone().unwrap_or_default())],
            }),
            Role::Assistant => {
                let mut parts = Vec::new();
                if let Some(text) = msg.content.as_ref().filter(|t| !t.is_empty()) {
                    parts.push(GeminiPart::text(text.clone()));
                }
                for call in msg.tool_calls.iter().flatten() {
                    let args = serde_json::from_str(&call.arguments)
                        .unwrap_or_else(|_| serde_json::json!({}));
                    parts.push(GeminiPart {
                        function_call: Some(GeminiFunctionCall {
                            name: call.name.clone(),
                            args,
                        }),
                        ..Default::default()
                    });
                }
                contents.push(GeminiContent {
                    role: Some("model".into()),
                    parts,
                });
            }
            Role::Tool => {
                let part = GeminiPart {
                    function_response: Some(GeminiFunctionResponse {
                        name: msg.tool_name.clone().unwrap_or_default(),
                        response: serde_json::json!({
                            "content": msg.content.clone().unwrap_or_default()
                        }),
                    }),
                    ..Default::default()
                };
                // Consecutive tool results answer one model turn and travel together.
                let merge = contents.last().is_some_and(|last| {
                    !last.parts.is_empty()
                        && last.parts.iter().all(|p| p.function_response.is_some())
                });
                if !merge {
                    contents.push(GeminiContent {
                        role: Some("user".into()),
                        parts: Vec::new(),
                    });
                }
                if let Some(last) = contents.last_mut() {
                    last.parts.push(part);
                }
            }
        }
    }

    let generation_config = if request.temperature.is_some()
        || request.max_tokens.is_some()
        || request.stop.is_some()
    {
        Some(GeminiGenerationConfig {
            temperature: request.temperature,
            max_output_tokens: request.max_tokens,
            stop_sequences: request.stop.clone(),
        })
    } else {
        None
    };

    GeminiRequest {
        contents,
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: None,
                parts: system_parts,
            })
        },
        tools: request.tools.as_ref().map(|tools| {
            vec![GeminiTool {
                function_declarations: tools
                    .iter()
                    .map(|t| GeminiFunctionDeclaration {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    })
                    .collect(),
            }]
        }),
        generation_config,
    }
}

fn parse_response(api_response: GeminiResponse, model: &str) -> Result<CompletionResponse, ProviderError> {
    if let Some(feedback) = &api_response.prompt_feedback {
        if let Some(reason) = &feedback.block_reason {
            return Err(ProviderError::InvalidRequest(format!("prompt blocked: {}", reason)));
        }
    }

    let candidate = api_response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Other("No candidates in response".into()))?;

    let mut content = String::new();
    let mut tool_calls = Vec::new();

    for (index, part) in candidate.content.map(|c| c.parts).unwrap_or_default().into_iter().enumerate() {
        if let Some(text) = part.text {
            content.push_str(&text);
        }
        if let Some(call) = part.function_call {
            tool_calls.push(ToolCall {
                id: format!("call_{}", index),
                name: call.name,
                arguments: serde_json::to_string(&call.args).unwrap_or_else(|_| "{}".into()),
            });
        }
    }

    let finish_reason = if !tool_calls.is_empty() {
        FinishReason::ToolCalls
    } else {
        match candidate.finish_reason.as_deref() {
            Some("STOP") => FinishReason::Stop,
            Some("MAX_TOKENS") => FinishReason::Length,
            Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") | Some("PROHIBITED_CONTENT") => {
                FinishReason::ContentFilter
            }
            _ => FinishReason::Unknown,
        }
    };

    let usage = api_response
        .usage_metadata
        .map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        })
        .unwrap_or_default();

    Ok(CompletionResponse {
        id: api_response.response_id.unwrap_or_default(),
        model: api_response.model_version.unwrap_or_else(|| model.to_string()),
        content: if content.is_empty() { None } else { Some(content) },
        tool_calls,
        finish_reason,
        usage,
    })
}

// ============================================================================
// Gemini API Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<GeminiFunctionResponse>,
}

impl GeminiPart {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
    model_version: Option<String>,
    response_id: Option<String>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: usize,
    #[serde(default)]
    candidates_token_count: usize,
    #[serde(default)]
    total_token_count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}
