use anthropic_ai_sdk::types::message as anthropic;
use async_openai::types as oai;

use crate::error::Result;
use crate::relay::claude::types::ClaudeCompleteRequest;
use crate::relay::info::RelayInfo;

use oai::CreateChatCompletionRequest;

pub fn image_source_from_url(url: &str) -> (String, String, String) {
    if url.starts_with("http://") || url.starts_with("https://") {
        ("url".to_string(), String::new(), url.to_string())
    } else if let Some(rest) = url.strip_prefix("data:") {
        // format: data:<mime>;base64,<data>
        let mut parts = rest.splitn(2, ',');
        let meta = parts.next().unwrap_or("");
        let data = parts.next().unwrap_or("");
        let mime = meta.split(';').next().unwrap_or("application/octet-stream");
        ("base64".to_string(), mime.to_string(), data.to_string())
    } else {
        ("url".to_string(), String::new(), url.to_string())
    }
}

pub fn extract_system_prompt(openai_req: &CreateChatCompletionRequest) -> Option<String> {
    for msg in &openai_req.messages {
        match msg {
            oai::ChatCompletionRequestMessage::Developer(dev) => {
                return match &dev.content {
                    oai::ChatCompletionRequestDeveloperMessageContent::Text(s) => Some(s.clone()),
                    oai::ChatCompletionRequestDeveloperMessageContent::Array(parts) => Some(
                        parts
                            .iter()
                            .map(|p| p.text.as_str())
                            .collect::<Vec<_>>()
                            .join("\n"),
                    ),
                };
            }
            oai::ChatCompletionRequestMessage::System(sys) => {
                return match &sys.content {
                    oai::ChatCompletionRequestSystemMessageContent::Text(s) => Some(s.clone()),
                    oai::ChatCompletionRequestSystemMessageContent::Array(parts) => Some(
                        parts
                            .iter()
                            .map(|p| match p {
                                oai::ChatCompletionRequestSystemMessageContentPart::Text(t) => {
                                    t.text.as_str()
                                }
                            })
                            .collect::<Vec<_>>()
                            .join("\n"),
                    ),
                };
            }
            _ => {}
        }
    }
    None
}

fn user_content_text(content: &oai::ChatCompletionRequestUserMessageContent) -> String {
    match content {
        oai::ChatCompletionRequestUserMessageContent::Text(text) => text.clone(),
        oai::ChatCompletionRequestUserMessageContent::Array(parts) => parts
            .iter()
            .filter_map(|p| match p {
                oai::ChatCompletionRequestUserMessageContentPart::Text(t) => {
                    Some(t.text.as_str())
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn assistant_content_text(content: &oai::ChatCompletionRequestAssistantMessageContent) -> String {
    match content {
        oai::ChatCompletionRequestAssistantMessageContent::Text(text) => text.clone(),
        oai::ChatCompletionRequestAssistantMessageContent::Array(parts) => parts
            .iter()
            .map(|p| match p {
                oai::ChatCompletionRequestAssistantMessageContentPart::Text(t) => t.text.as_str(),
                oai::ChatCompletionRequestAssistantMessageContentPart::Refusal(r) => {
                    r.refusal.as_str()
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn stop_sequences(openai_req: &CreateChatCompletionRequest) -> Option<Vec<String>> {
    match openai_req.stop.clone() {
        Some(oai::Stop::String(s)) => Some(vec![s]),
        Some(oai::Stop::StringArray(v)) => Some(v),
        None => None,
    }
}

#[allow(deprecated)]
fn max_tokens(openai_req: &CreateChatCompletionRequest) -> u32 {
    openai_req
        .max_completion_tokens
        .or(openai_req.max_tokens)
        .unwrap_or(1024)
}

/// 旧版补全协议：把多轮对话压平为 Human/Assistant 文本提示
pub fn openai_to_claude_complete(
    info: &RelayInfo,
    openai_req: &CreateChatCompletionRequest,
) -> ClaudeCompleteRequest {
    let mut prompt = String::new();
    for msg in &openai_req.messages {
        match msg {
            oai::ChatCompletionRequestMessage::Developer(_)
            | oai::ChatCompletionRequestMessage::System(_) => {
                // system 文本作为前导段落，仅在开头生效
                if prompt.is_empty()
                    && let Some(system) = extract_system_prompt(openai_req)
                {
                    prompt.push_str(&system);
                }
            }
            oai::ChatCompletionRequestMessage::User(m) => {
                prompt.push_str("\n\nHuman: ");
                prompt.push_str(&user_content_text(&m.content));
            }
            oai::ChatCompletionRequestMessage::Assistant(m) => {
                if let Some(content) = &m.content {
                    prompt.push_str("\n\nAssistant: ");
                    prompt.push_str(&assistant_content_text(content));
                }
            }
            // the legacy protocol has no tool channel
            oai::ChatCompletionRequestMessage::Tool(_)
            | oai::ChatCompletionRequestMessage::Function(_) => {}
        }
    }
    prompt.push_str("\n\nAssistant:");

    ClaudeCompleteRequest {
        model: info.upstream_model_name.clone(),
        prompt,
        max_tokens_to_sample: max_tokens(openai_req),
        temperature: openai_req.temperature,
        top_p: openai_req.top_p,
        stop_sequences: stop_sequences(openai_req),
        stream: openai_req.stream,
    }
}

/// 结构化消息协议：system 提取、多模态图片、工具调用/工具结果逐块映射
pub fn openai_to_claude_message(
    info: &RelayInfo,
    openai_req: &CreateChatCompletionRequest,
) -> Result<anthropic::CreateMessageParams> {
    let system_prompt = extract_system_prompt(openai_req);

    let tools: Option<Vec<anthropic::Tool>> = openai_req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| anthropic::Tool {
                name: t.function.name.clone(),
                description: t.function.description.clone(),
                input_schema: t.function.parameters.clone().unwrap_or_default(),
            })
            .collect()
    });

    let tool_choice = match openai_req.tool_choice.clone() {
        Some(oai::ChatCompletionToolChoiceOption::Named(named)) => {
            Some(anthropic::ToolChoice::Tool {
                name: named.function.name,
            })
        }
        Some(oai::ChatCompletionToolChoiceOption::Auto) => Some(anthropic::ToolChoice::Auto),
        Some(oai::ChatCompletionToolChoiceOption::Required) => Some(anthropic::ToolChoice::Any),
        Some(oai::ChatCompletionToolChoiceOption::None) => Some(anthropic::ToolChoice::None),
        None => None,
    };

    let mut mapped_messages: Vec<anthropic::Message> =
        Vec::with_capacity(openai_req.messages.len());
    for msg in &openai_req.messages {
        match msg {
            oai::ChatCompletionRequestMessage::Developer(_)
            | oai::ChatCompletionRequestMessage::System(_) => {
                // handled via system prompt
            }
            oai::ChatCompletionRequestMessage::Function(_) => {
                // legacy function message: ignore; handled by tools/tool_calls
            }
            oai::ChatCompletionRequestMessage::User(m) => {
                let content = match &m.content {
                    oai::ChatCompletionRequestUserMessageContent::Text(text) => {
                        anthropic::MessageContent::Text {
                            content: text.clone(),
                        }
                    }
                    oai::ChatCompletionRequestUserMessageContent::Array(parts) => {
                        let blocks = parts
                            .iter()
                            .filter_map(|p| match p {
                                oai::ChatCompletionRequestUserMessageContentPart::Text(t) => {
                                    Some(anthropic::ContentBlock::Text {
                                        text: t.text.clone(),
                                    })
                                }
                                oai::ChatCompletionRequestUserMessageContentPart::ImageUrl(img) => {
                                    let (src_type, media_type, data_or_url) =
                                        image_source_from_url(&img.image_url.url);
                                    Some(anthropic::ContentBlock::Image {
                                        source: anthropic::ImageSource {
                                            type_: src_type,
                                            media_type,
                                            data: data_or_url,
                                        },
                                    })
                                }
                                oai::ChatCompletionRequestUserMessageContentPart::InputAudio(_) => {
                                    None
                                }
                            })
                            .collect();
                        anthropic::MessageContent::Blocks { content: blocks }
                    }
                };
                mapped_messages.push(anthropic::Message {
                    role: anthropic::Role::User,
                    content,
                });
            }
            oai::ChatCompletionRequestMessage::Assistant(m) => {
                let mut blocks: Vec<anthropic::ContentBlock> = Vec::new();
                if let Some(content) = &m.content {
                    let text = assistant_content_text(content);
                    if !text.is_empty() {
                        blocks.push(anthropic::ContentBlock::Text { text });
                    }
                }
                if let Some(tool_calls) = &m.tool_calls {
                    for tc in tool_calls {
                        let input = if tc.function.arguments.is_empty() {
                            serde_json::json!({})
                        } else {
                            serde_json::from_str(&tc.function.arguments)
                                .unwrap_or_else(|_| serde_json::json!({}))
                        };
                        blocks.push(anthropic::ContentBlock::ToolUse {
                            id: tc.id.clone(),
                            name: tc.function.name.clone(),
                            input,
                        });
                    }
                }
                if !blocks.is_empty() {
                    mapped_messages.push(anthropic::Message {
                        role: anthropic::Role::Assistant,
                        content: anthropic::MessageContent::Blocks { content: blocks },
                    });
                }
            }
            oai::ChatCompletionRequestMessage::Tool(m) => {
                // OpenAI tool results -> Anthropic tool_result content block
                let content_str = match &m.content {
                    oai::ChatCompletionRequestToolMessageContent::Text(t) => t.clone(),
                    oai::ChatCompletionRequestToolMessageContent::Array(parts) => parts
                        .iter()
                        .map(|p| match p {
                            oai::ChatCompletionRequestToolMessageContentPart::Text(t) => {
                                t.text.clone()
                            }
                        })
                        .collect::<Vec<_>>()
                        .join("\n"),
                };
                mapped_messages.push(anthropic::Message {
                    role: anthropic::Role::User,
                    content: anthropic::MessageContent::Blocks {
                        content: vec![anthropic::ContentBlock::ToolResult {
                            tool_use_id: m.tool_call_id.clone(),
                            content: content_str,
                        }],
                    },
                });
            }
        }
    }

    Ok(anthropic::CreateMessageParams {
        model: info.upstream_model_name.clone(),
        system: system_prompt,
        messages: mapped_messages,
        tools,
        tool_choice,
        max_tokens: max_tokens(openai_req),
        temperature: Some(openai_req.temperature.unwrap_or(1.0)),
        top_p: Some(openai_req.top_p.unwrap_or(1.0)),
        stream: Some(openai_req.stream.unwrap_or(false)),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::types as oai;

    fn base_request(messages: Vec<oai::ChatCompletionRequestMessage>) -> CreateChatCompletionRequest {
        oai::CreateChatCompletionRequestArgs::default()
            .model("claude-2.1")
            .messages(messages)
            .build()
            .unwrap()
    }

    fn user(text: &str) -> oai::ChatCompletionRequestMessage {
        oai::ChatCompletionRequestUserMessageArgs::default()
            .content(text)
            .build()
            .unwrap()
            .into()
    }

    fn system(text: &str) -> oai::ChatCompletionRequestMessage {
        oai::ChatCompletionRequestSystemMessageArgs::default()
            .content(text)
            .build()
            .unwrap()
            .into()
    }

    fn assistant(text: &str) -> oai::ChatCompletionRequestMessage {
        oai::ChatCompletionRequestAssistantMessageArgs::default()
            .content(text)
            .build()
            .unwrap()
            .into()
    }

    fn info() -> RelayInfo {
        RelayInfo::new("claude-2.1", "claude-2.1", "https://api.anthropic.com", "sk-test")
    }

    #[test]
    fn complete_mode_flattens_turns_and_appends_assistant_cue() {
        let req = base_request(vec![
            system("You are terse."),
            user("hello"),
            assistant("hi"),
            user("bye"),
        ]);
        let converted = openai_to_claude_complete(&info(), &req);
        assert_eq!(
            converted.prompt,
            "You are terse.\n\nHuman: hello\n\nAssistant: hi\n\nHuman: bye\n\nAssistant:"
        );
        assert_eq!(converted.model, "claude-2.1");
        assert_eq!(converted.max_tokens_to_sample, 1024);
    }

    #[test]
    fn complete_mode_maps_stop_sequences() {
        let mut req = base_request(vec![user("hello")]);
        req.stop = Some(oai::Stop::StringArray(vec!["\n\nHuman:".to_string()]));
        let converted = openai_to_claude_complete(&info(), &req);
        assert_eq!(
            converted.stop_sequences,
            Some(vec!["\n\nHuman:".to_string()])
        );
    }

    #[test]
    fn message_mode_extracts_system_and_uses_upstream_model() {
        let req = base_request(vec![system("You are terse."), user("hello")]);
        let mut relay = info();
        relay.upstream_model_name = "claude-sonnet-4-20250514".to_string();
        let params = openai_to_claude_message(&relay, &req).unwrap();
        assert_eq!(params.model, "claude-sonnet-4-20250514");
        assert_eq!(params.system.as_deref(), Some("You are terse."));
        assert_eq!(params.messages.len(), 1);
    }

    #[test]
    fn message_mode_maps_tool_results_to_user_blocks() {
        let tool_msg = oai::ChatCompletionRequestMessage::Tool(
            oai::ChatCompletionRequestToolMessage {
                content: oai::ChatCompletionRequestToolMessageContent::Text("72F".to_string()),
                tool_call_id: "call_1".to_string(),
            },
        );
        let req = base_request(vec![user("weather?"), tool_msg]);
        let params = openai_to_claude_message(&info(), &req).unwrap();
        assert_eq!(params.messages.len(), 2);
        match &params.messages[1].content {
            anthropic::MessageContent::Blocks { content } => match &content[0] {
                anthropic::ContentBlock::ToolResult { tool_use_id, content } => {
                    assert_eq!(tool_use_id, "call_1");
                    assert_eq!(content, "72F");
                }
                _ => panic!("tool result was not mapped to a tool_result block"),
            },
            _ => panic!("tool result message should carry content blocks"),
        }
    }

    #[test]
    fn data_url_images_become_base64_sources() {
        let (src, mime, data) = image_source_from_url("data:image/png;base64,AAAA");
        assert_eq!(src, "base64");
        assert_eq!(mime, "image/png");
        assert_eq!(data, "AAAA");

        let (src, mime, data) = image_source_from_url("https://example.com/cat.png");
        assert_eq!(src, "url");
        assert!(mime.is_empty());
        assert_eq!(data, "https://example.com/cat.png");
    }
}
