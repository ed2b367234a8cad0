use async_openai::types as oai;

use crate::relay::claude::types::{
    ClaudeCompleteResponse, ClaudeContentBlock, ClaudeMessageResponse,
};
use crate::relay::dto::RelayUsage;
use crate::relay::info::RelayInfo;

/// Rough token estimate for the legacy protocol, which reports no counts.
pub fn estimate_tokens(text: &str) -> i64 {
    estimate_tokens_from_chars(text.chars().count())
}

pub fn estimate_tokens_from_chars(chars: usize) -> i64 {
    chars.div_ceil(4) as i64
}

pub fn map_stop_reason(stop_reason: Option<&str>) -> Option<oai::FinishReason> {
    match stop_reason {
        Some("end_turn") | Some("stop_sequence") => Some(oai::FinishReason::Stop),
        Some("max_tokens") => Some(oai::FinishReason::Length),
        Some("tool_use") => Some(oai::FinishReason::ToolCalls),
        Some("refusal") => Some(oai::FinishReason::ContentFilter),
        Some(_) => Some(oai::FinishReason::Stop),
        None => None,
    }
}

pub fn extract_reasoning_content(resp: &ClaudeMessageResponse) -> Option<String> {
    let mut reasoning = String::new();
    let mut has_redacted = false;
    for block in &resp.content {
        match block {
            ClaudeContentBlock::Thinking { thinking } => {
                if !reasoning.is_empty() {
                    reasoning.push('\n');
                }
                reasoning.push_str(thinking);
            }
            ClaudeContentBlock::RedactedThinking { .. } => {
                has_redacted = true;
            }
            _ => {}
        }
    }

    if !reasoning.is_empty() {
        return Some(reasoning);
    }
    if has_redacted {
        return Some("[redacted_thinking]".to_string());
    }
    None
}

fn completion_usage(usage: RelayUsage) -> oai::CompletionUsage {
    oai::CompletionUsage {
        prompt_tokens: usage.prompt_tokens.max(0) as u32,
        completion_tokens: usage.completion_tokens.max(0) as u32,
        total_tokens: usage.total_tokens().max(0) as u32,
        prompt_tokens_details: if usage.cache_read_tokens > 0 {
            Some(oai::PromptTokensDetails {
                cached_tokens: Some(usage.cache_read_tokens as u32),
                audio_tokens: None,
            })
        } else {
            None
        },
        completion_tokens_details: None,
    }
}

/// 消息协议响应 -> 统一 Chat Completions 响应
#[allow(deprecated)]
pub fn claude_to_openai(resp: &ClaudeMessageResponse) -> (oai::CreateChatCompletionResponse, RelayUsage) {
    let mut text = String::new();
    let mut tool_calls: Vec<oai::ChatCompletionMessageToolCall> = Vec::new();
    for block in &resp.content {
        match block {
            ClaudeContentBlock::Text { text: t } => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(t);
            }
            ClaudeContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(oai::ChatCompletionMessageToolCall {
                    id: id.clone(),
                    r#type: oai::ChatCompletionToolType::Function,
                    function: oai::FunctionCall {
                        name: name.clone(),
                        arguments: serde_json::to_string(input)
                            .unwrap_or_else(|_| "{}".to_string()),
                    },
                });
            }
            ClaudeContentBlock::Thinking { .. }
            | ClaudeContentBlock::RedactedThinking { .. }
            | ClaudeContentBlock::Unknown => {}
        }
    }

    let finish_reason = map_stop_reason(resp.stop_reason.as_deref());
    let usage = RelayUsage::from(resp.usage);

    let message = oai::ChatCompletionResponseMessage {
        role: oai::Role::Assistant,
        content: if text.is_empty() { None } else { Some(text) },
        refusal: None,
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        function_call: None,
        audio: None,
    };

    let response = oai::CreateChatCompletionResponse {
        id: resp.id.clone(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp() as u32,
        model: resp.model.clone(),
        choices: vec![oai::ChatChoice {
            index: 0,
            message,
            finish_reason,
            logprobs: None,
        }],
        usage: Some(completion_usage(usage)),
        service_tier: None,
        system_fingerprint: None,
    };

    (response, usage)
}

/// 旧版补全协议响应 -> 统一 Chat Completions 响应（token 数为估算值）
#[allow(deprecated)]
pub fn complete_to_openai(
    info: &RelayInfo,
    resp: &ClaudeCompleteResponse,
) -> (oai::CreateChatCompletionResponse, RelayUsage) {
    let usage = RelayUsage {
        prompt_tokens: 0,
        completion_tokens: estimate_tokens(&resp.completion),
        cache_read_tokens: 0,
        cache_write_tokens: 0,
    };

    let model = if resp.model.is_empty() {
        info.upstream_model_name.clone()
    } else {
        resp.model.clone()
    };

    let message = oai::ChatCompletionResponseMessage {
        role: oai::Role::Assistant,
        content: Some(resp.completion.trim_start().to_string()),
        refusal: None,
        tool_calls: None,
        function_call: None,
        audio: None,
    };

    let response = oai::CreateChatCompletionResponse {
        id: format!("chatcmpl-{}", info.request_id),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp() as u32,
        model,
        choices: vec![oai::ChatChoice {
            index: 0,
            message,
            finish_reason: map_stop_reason(resp.stop_reason.as_deref()),
            logprobs: None,
        }],
        usage: Some(completion_usage(usage)),
        service_tier: None,
        system_fingerprint: None,
    };

    (response, usage)
}
