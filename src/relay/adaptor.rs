use anthropic_ai_sdk::types::message::CreateMessageParams;
use async_openai::types::{CreateChatCompletionRequest, CreateChatCompletionResponse};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{GatewayError, Result};
use crate::relay::dto::{
    AudioRequest, EmbeddingRequest, GeminiChatRequest, ImageRequest, OpenAIResponsesRequest,
    RelayUsage, RerankRequest,
};
use crate::relay::info::RelayInfo;
use crate::relay::streaming::ResponseStream;

/// What a completed relay exchange hands back to the caller.
///
/// Streaming responses return immediately with the translated event stream;
/// the usage record resolves once the upstream terminal frame is observed,
/// so consumption reporting can await it off the request path.
pub enum RelayResponse {
    Completed {
        response: CreateChatCompletionResponse,
        usage: RelayUsage,
    },
    Streaming {
        events: ResponseStream,
        usage: oneshot::Receiver<RelayUsage>,
    },
}

/// One implementation per upstream provider family.
///
/// Every capability below must be answerable on every channel: a provider
/// either converts faithfully or returns `GatewayError::NotImplemented`, so
/// callers never type-inspect an adaptor to learn what it supports. The
/// defaults declare the exotic capabilities unsupported; chat-capable
/// channels override what they actually speak.
#[async_trait]
pub trait ChannelAdaptor: Send + Sync {
    /// Derive per-call mode state from the resolved upstream model name.
    /// Idempotent, no I/O, cannot fail.
    fn init(&mut self, info: &RelayInfo);

    fn get_request_url(&self, info: &RelayInfo) -> Result<String>;

    /// Populate the outbound header set from the call context and the
    /// inbound request headers (for passthrough and fallback rules).
    fn setup_request_header(
        &self,
        info: &RelayInfo,
        inbound: &HeaderMap,
        headers: &mut HeaderMap,
    ) -> Result<()>;

    /// Translate the unified chat request into the provider's native body.
    fn convert_openai_request(
        &self,
        info: &RelayInfo,
        request: &CreateChatCompletionRequest,
    ) -> Result<Value>;

    fn convert_claude_request(
        &self,
        _info: &RelayInfo,
        _request: &CreateMessageParams,
    ) -> Result<Value> {
        Err(GatewayError::NotImplemented("claude request conversion"))
    }

    fn convert_gemini_request(
        &self,
        _info: &RelayInfo,
        _request: &GeminiChatRequest,
    ) -> Result<Value> {
        Err(GatewayError::NotImplemented("gemini request conversion"))
    }

    fn convert_audio_request(&self, _info: &RelayInfo, _request: &AudioRequest) -> Result<Value> {
        Err(GatewayError::NotImplemented("audio request conversion"))
    }

    fn convert_image_request(&self, _info: &RelayInfo, _request: &ImageRequest) -> Result<Value> {
        Err(GatewayError::NotImplemented("image request conversion"))
    }

    fn convert_embedding_request(
        &self,
        _info: &RelayInfo,
        _request: &EmbeddingRequest,
    ) -> Result<Value> {
        Err(GatewayError::NotImplemented("embedding request conversion"))
    }

    fn convert_rerank_request(&self, _info: &RelayInfo, _request: &RerankRequest) -> Result<Value> {
        Err(GatewayError::NotImplemented("rerank request conversion"))
    }

    fn convert_openai_responses_request(
        &self,
        _info: &RelayInfo,
        _request: &OpenAIResponsesRequest,
    ) -> Result<Value> {
        Err(GatewayError::NotImplemented("responses request conversion"))
    }

    /// Transport only: send the assembled request on the shared client.
    /// Interpreting the response body belongs to `do_response`.
    async fn do_request(
        &self,
        info: &RelayInfo,
        client: &reqwest::Client,
        headers: HeaderMap,
        body: Value,
    ) -> Result<reqwest::Response> {
        let url = self.get_request_url(info)?;
        let resp = client.post(&url).headers(headers).json(&body).send().await?;
        Ok(resp)
    }

    /// Branches on `info.is_stream`: parse the whole body, or pump the
    /// incremental frames, into the unified response model plus usage.
    async fn do_response(&self, info: &RelayInfo, resp: reqwest::Response)
    -> Result<RelayResponse>;

    fn get_model_list(&self) -> &'static [&'static str];

    fn get_channel_name(&self) -> &'static str;
}
