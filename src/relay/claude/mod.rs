mod constants;
mod request;
mod response;
mod stream;
mod types;

pub use constants::{CHANNEL_NAME, DEFAULT_ANTHROPIC_VERSION, MODEL_LIST};
pub use types::{
    ClaudeApiError, ClaudeCompleteRequest, ClaudeCompleteResponse, ClaudeErrorResponse,
    ClaudeMessageResponse, ClaudeUsage,
};

use anthropic_ai_sdk::types::message::CreateMessageParams;
use async_openai::types::CreateChatCompletionRequest;
use async_trait::async_trait;
use reqwest::header::{
    ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue,
};
use serde_json::Value;

use crate::config::ClaudeSettings;
use crate::error::{GatewayError, Result};
use crate::relay::adaptor::{ChannelAdaptor, RelayResponse};
use crate::relay::info::RelayInfo;

/// Which native wire schema this call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// Legacy single-prompt protocol (`/v1/complete`).
    Completion,
    /// Structured multi-turn protocol (`/v1/messages`).
    Message,
}

pub struct ClaudeAdaptor {
    request_mode: RequestMode,
    settings: ClaudeSettings,
}

impl ClaudeAdaptor {
    pub fn new(settings: ClaudeSettings) -> Self {
        Self {
            request_mode: RequestMode::Message,
            settings,
        }
    }

    pub fn request_mode(&self) -> RequestMode {
        self.request_mode
    }

    fn header_value(&self, value: &str) -> Result<HeaderValue> {
        HeaderValue::from_str(value)
            .map_err(|_| GatewayError::InvalidRequest(format!("invalid header value: {value:?}")))
    }

    /// Beta/安全 header 回退、x-stainless 透传与客户端指纹伪装
    fn common_claude_headers(
        &self,
        info: &RelayInfo,
        inbound: &HeaderMap,
        headers: &mut HeaderMap,
    ) -> Result<()> {
        // 透传或设置默认 anthropic-beta header
        if let Some(beta) = inbound.get("anthropic-beta") {
            headers.insert("anthropic-beta", beta.clone());
        } else if self.settings.default_beta_enabled && !self.settings.default_beta_header.is_empty()
        {
            headers.insert(
                "anthropic-beta",
                self.header_value(&self.settings.default_beta_header)?,
            );
        }

        // 安全 header 跟随 beta 默认值，绝不单独生效
        if let Some(v) = inbound.get("anthropic-dangerous-direct-browser-access") {
            headers.insert("anthropic-dangerous-direct-browser-access", v.clone());
        } else if self.settings.default_beta_enabled {
            headers.insert(
                "anthropic-dangerous-direct-browser-access",
                HeaderValue::from_static("true"),
            );
        }

        // 透传所有 x-stainless-* 和 x-app 相关 header
        let mut saw_client_identity = false;
        for (name, value) in inbound.iter() {
            let lower = name.as_str();
            if lower.starts_with("x-stainless-") {
                saw_client_identity = true;
                headers.insert(name.clone(), value.clone());
            } else if lower.starts_with("x-app") {
                headers.insert(name.clone(), value.clone());
            }
        }

        // 客户端完全没带指纹时，伪装成官方第一方客户端（仅在启用 beta 默认时）
        if !saw_client_identity && self.settings.default_beta_enabled {
            let fp = &self.settings.fingerprint;
            headers.insert("x-stainless-lang", self.header_value(&fp.lang)?);
            headers.insert(
                "x-stainless-package-version",
                self.header_value(&fp.package_version)?,
            );
            headers.insert("x-stainless-os", self.header_value(&fp.os)?);
            headers.insert("x-stainless-arch", self.header_value(&fp.arch)?);
            headers.insert("x-stainless-runtime", self.header_value(&fp.runtime)?);
            headers.insert(
                "x-stainless-runtime-version",
                self.header_value(&fp.runtime_version)?,
            );
            headers.insert(
                "x-stainless-retry-count",
                self.header_value(&fp.retry_count)?,
            );
            headers.insert("x-stainless-timeout", self.header_value(&fp.timeout)?);
            headers.insert(
                reqwest::header::USER_AGENT,
                self.header_value(&fp.user_agent)?,
            );
        }

        // 按模型配置的附加 header 最后写入
        if let Some(extra) = self.settings.model_headers.get(&info.origin_model_name) {
            for (key, value) in extra {
                let name = HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| GatewayError::Config(format!("invalid header name: {key:?}")))?;
                headers.insert(name, self.header_value(value)?);
            }
        }

        Ok(())
    }

    fn parse_upstream_error(&self, status: u16, body: &[u8]) -> GatewayError {
        match serde_json::from_slice::<ClaudeErrorResponse>(body) {
            Ok(envelope) => GatewayError::Upstream {
                status,
                error_type: envelope.error.error_type,
                message: envelope.error.message,
            },
            Err(_) => GatewayError::Upstream {
                status,
                error_type: "upstream_error".to_string(),
                message: String::from_utf8_lossy(body).chars().take(512).collect(),
            },
        }
    }
}

#[async_trait]
impl ChannelAdaptor for ClaudeAdaptor {
    fn init(&mut self, info: &RelayInfo) {
        let model = info.upstream_model_name.as_str();
        if model.starts_with("claude-2") || model.starts_with("claude-instant") {
            self.request_mode = RequestMode::Completion;
        } else {
            self.request_mode = RequestMode::Message;
        }
    }

    fn get_request_url(&self, info: &RelayInfo) -> Result<String> {
        let base = info.channel_base_url.trim_end_matches('/');
        let mut url = match self.request_mode {
            RequestMode::Message => format!("{}/v1/messages", base),
            RequestMode::Completion => format!("{}/v1/complete", base),
        };
        // 客户端指定 beta=true，或配置启用了默认 beta
        if info.is_claude_beta_query || self.settings.default_beta_enabled {
            url.push_str("?beta=true");
        }
        Ok(url)
    }

    fn setup_request_header(
        &self,
        info: &RelayInfo,
        inbound: &HeaderMap,
        headers: &mut HeaderMap,
    ) -> Result<()> {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            ACCEPT,
            if info.is_stream {
                HeaderValue::from_static("text/event-stream")
            } else {
                HeaderValue::from_static("application/json")
            },
        );

        // 默认使用 x-api-key 认证（官方格式），同时设置 Bearer 以兼容第三方代理
        headers.insert("x-api-key", self.header_value(&info.api_key)?);
        headers.insert(
            AUTHORIZATION,
            self.header_value(&format!("Bearer {}", info.api_key))?,
        );

        let version = inbound
            .get("anthropic-version")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_ANTHROPIC_VERSION);
        headers.insert("anthropic-version", self.header_value(version)?);

        self.common_claude_headers(info, inbound, headers)
    }

    fn convert_openai_request(
        &self,
        info: &RelayInfo,
        request: &CreateChatCompletionRequest,
    ) -> Result<Value> {
        if request.messages.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "chat request has no messages".to_string(),
            ));
        }
        let body = match self.request_mode {
            RequestMode::Completion => {
                serde_json::to_value(request::openai_to_claude_complete(info, request))?
            }
            RequestMode::Message => {
                serde_json::to_value(request::openai_to_claude_message(info, request)?)?
            }
        };
        Ok(body)
    }

    fn convert_claude_request(
        &self,
        _info: &RelayInfo,
        request: &CreateMessageParams,
    ) -> Result<Value> {
        // 原生请求直接透传
        Ok(serde_json::to_value(request)?)
    }

    async fn do_response(
        &self,
        info: &RelayInfo,
        resp: reqwest::Response,
    ) -> Result<RelayResponse> {
        if info.is_stream {
            let status = resp.status();
            if !status.is_success() {
                let body = resp.bytes().await?;
                return Err(self.parse_upstream_error(status.as_u16(), &body));
            }
            let (events, usage) = stream::spawn_stream_pump(info, resp);
            return Ok(RelayResponse::Streaming { events, usage });
        }

        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(self.parse_upstream_error(status.as_u16(), &body));
        }

        // 某些网关以 200 透传错误包体
        if let Ok(envelope) = serde_json::from_slice::<ClaudeErrorResponse>(&body)
            && envelope.kind == "error"
        {
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                error_type: envelope.error.error_type,
                message: envelope.error.message,
            });
        }

        let (response, usage) = match self.request_mode {
            RequestMode::Message => {
                let parsed: ClaudeMessageResponse = serde_json::from_slice(&body)?;
                response::claude_to_openai(&parsed)
            }
            RequestMode::Completion => {
                let parsed: ClaudeCompleteResponse = serde_json::from_slice(&body)?;
                response::complete_to_openai(info, &parsed)
            }
        };
        Ok(RelayResponse::Completed { response, usage })
    }

    fn get_model_list(&self) -> &'static [&'static str] {
        MODEL_LIST
    }

    fn get_channel_name(&self) -> &'static str {
        CHANNEL_NAME
    }
}
