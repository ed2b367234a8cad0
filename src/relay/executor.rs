use std::sync::Arc;

use async_openai::types::CreateChatCompletionRequest;
use reqwest::header::HeaderMap;
use tokio::sync::oneshot;

use crate::billing::{ConsumeLogRequest, LedgerClient};
use crate::error::Result;
use crate::relay::adaptor::{ChannelAdaptor, RelayResponse};
use crate::relay::dto::RelayUsage;
use crate::relay::info::RelayInfo;

/// Shared collaborators the pipeline needs, owned by the composition root.
pub struct RelayDeps {
    pub http_client: reqwest::Client,
    pub ledger: Arc<LedgerClient>,
}

fn build_consume_log(info: &RelayInfo, usage: RelayUsage) -> ConsumeLogRequest {
    ConsumeLogRequest {
        api_user_id: info.user_id,
        api_token_id: info.token_id,
        model_name: info.origin_model_name.clone(),
        // 计价层在核心之外，这里按 token 总数上报配额
        quota: usage.total_tokens(),
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        cache_read_tokens: usage.cache_read_tokens,
        cache_write_tokens: usage.cache_write_tokens,
        request_id: info.request_id.clone(),
        ip: info.client_ip.clone(),
    }
}

fn spawn_consume_report(ledger: Arc<LedgerClient>, record: ConsumeLogRequest) {
    // 上报绝不阻塞主链路
    tokio::spawn(async move {
        ledger.record_consume_log(&record).await;
    });
}

/// Run one unified-chat exchange through a channel adaptor.
///
/// The step order is fixed: init, headers, body conversion, transport,
/// response handling; once usage is known the consumption report is spawned
/// fire-and-forget. For streaming responses the caller still receives a live
/// usage receiver; reporting happens when the terminal frame resolves it.
pub async fn relay_openai_chat(
    adaptor: &mut dyn ChannelAdaptor,
    info: &RelayInfo,
    inbound_headers: &HeaderMap,
    request: &CreateChatCompletionRequest,
    deps: &RelayDeps,
) -> Result<RelayResponse> {
    adaptor.init(info);

    let mut headers = HeaderMap::new();
    adaptor.setup_request_header(info, inbound_headers, &mut headers)?;
    let body = adaptor.convert_openai_request(info, request)?;
    let resp = adaptor
        .do_request(info, &deps.http_client, headers, body)
        .await?;

    match adaptor.do_response(info, resp).await? {
        RelayResponse::Completed { response, usage } => {
            spawn_consume_report(deps.ledger.clone(), build_consume_log(info, usage));
            Ok(RelayResponse::Completed { response, usage })
        }
        RelayResponse::Streaming { events, usage } => {
            let (usage_tx, usage_rx) = oneshot::channel();
            let ledger = deps.ledger.clone();
            let info_for_report = info.clone();
            tokio::spawn(async move {
                let Ok(usage) = usage.await else {
                    tracing::warn!(
                        request_id = %info_for_report.request_id,
                        "stream ended without a usage record; skipping consume report"
                    );
                    return;
                };
                let _ = usage_tx.send(usage);
                ledger
                    .record_consume_log(&build_consume_log(&info_for_report, usage))
                    .await;
            });
            Ok(RelayResponse::Streaming {
                events,
                usage: usage_rx,
            })
        }
    }
}
