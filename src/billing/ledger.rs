use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::billing::cache::{Clock, RATIO_CACHE_TTL, RatioCache, SystemClock};
use crate::billing::retry::{AttemptError, retry_with_backoff};
use crate::config::LedgerSettings;
use crate::error::{GatewayError, Result};

/// 积分消耗记录请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeLogRequest {
    pub api_user_id: i64,
    pub api_token_id: i64,
    pub model_name: String,
    pub quota: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cache_read_tokens: i64,
    pub cache_write_tokens: i64,
    pub request_id: String,
    pub ip: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ConsumeLogResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<ConsumeLogData>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ConsumeLogData {
    #[serde(default)]
    pub transaction_id: i64,
    #[serde(default)]
    pub balance: i64,
}

/// 账本状态响应
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub success: bool,
    pub data: StatusData,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct StatusData {
    #[serde(default)]
    pub credit_to_quota_ratio: i64,
    #[serde(default)]
    pub credit_to_price_ratio: i64,
}

/// Best-effort client for the external billing ledger.
///
/// Reporting never blocks or fails the primary exchange: an unconfigured
/// ledger is a silent no-op and every send failure ends in a log line, not
/// an error on the request path.
pub struct LedgerClient {
    base_url: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
    ratio_cache: RatioCache,
}

impl LedgerClient {
    pub fn new(settings: &LedgerSettings, client: reqwest::Client) -> Self {
        Self::with_clock(settings, client, Arc::new(SystemClock))
    }

    pub fn with_clock(
        settings: &LedgerSettings,
        client: reqwest::Client,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            base_url: settings
                .base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
            client,
            ratio_cache: RatioCache::new(RATIO_CACHE_TTL, clock),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some() && self.api_key.is_some()
    }

    /// 记录积分消耗（带重试，不向主链路抛错）
    pub async fn record_consume_log(&self, record: &ConsumeLogRequest) {
        let (Some(base_url), Some(api_key)) = (&self.base_url, &self.api_key) else {
            return;
        };

        match self.send_consume_log(base_url, api_key, record).await {
            Ok(data) => {
                tracing::info!(
                    api_user_id = record.api_user_id,
                    transaction_id = data.transaction_id,
                    balance = data.balance,
                    "Recorded consume log to ledger"
                );
            }
            Err(e) => {
                tracing::error!(
                    api_user_id = record.api_user_id,
                    request_id = %record.request_id,
                    "Failed to record consume log to ledger: {}",
                    e
                );
            }
        }
    }

    async fn send_consume_log(
        &self,
        base_url: &str,
        api_key: &str,
        record: &ConsumeLogRequest,
    ) -> Result<ConsumeLogData> {
        let url = format!("{}/api/system/consume-log", base_url);

        retry_with_backoff("ledger consume-log", || {
            let url = url.clone();
            async move {
                let resp = self
                    .client
                    .post(&url)
                    .bearer_auth(api_key)
                    .json(record)
                    .send()
                    .await
                    .map_err(|e| AttemptError::Retryable(e.into()))?;

                let status = resp.status();
                if !status.is_success() {
                    let err = GatewayError::Upstream {
                        status: status.as_u16(),
                        error_type: "ledger_error".to_string(),
                        message: format!("ledger API returned status {}", status.as_u16()),
                    };
                    // 5xx 重试，4xx 直接返回
                    return if status.is_server_error() {
                        Err(AttemptError::Retryable(err))
                    } else {
                        Err(AttemptError::Terminal(err))
                    };
                }

                let parsed: ConsumeLogResponse = resp
                    .json()
                    .await
                    .map_err(|e| AttemptError::Retryable(e.into()))?;

                if !parsed.success {
                    // 业务层拒绝，重试不会改变结果
                    return Err(AttemptError::Terminal(GatewayError::Config(format!(
                        "ledger API error: {}",
                        parsed.message
                    ))));
                }

                Ok(parsed.data.unwrap_or_default())
            }
        })
        .await
    }

    /// 获取账本状态信息
    pub async fn get_status(&self) -> Result<StatusResponse> {
        let Some(base_url) = &self.base_url else {
            return Err(GatewayError::Config("ledger not configured".to_string()));
        };
        let url = format!("{}/api/status", base_url);

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                error_type: "ledger_error".to_string(),
                message: format!("ledger API returned status {}", status.as_u16()),
            });
        }

        let parsed: StatusResponse = resp.json().await?;
        if !parsed.success {
            return Err(GatewayError::Config(
                "ledger API returned success=false".to_string(),
            ));
        }
        Ok(parsed)
    }

    /// 获取积分转额度比例（带 5 分钟缓存）
    pub async fn get_credit_to_quota_ratio(&self) -> Result<i64> {
        if self.base_url.is_none() {
            return Err(GatewayError::Config("ledger not configured".to_string()));
        }

        self.ratio_cache
            .get_or_refresh(|| async move {
                let status = self.get_status().await?;
                Ok(status.data.credit_to_quota_ratio)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpClientSettings;
    use crate::http_client::build_shared_client;

    fn client() -> reqwest::Client {
        build_shared_client(&HttpClientSettings::default()).unwrap()
    }

    #[test]
    fn consume_log_request_uses_the_ledger_wire_names() {
        let record = ConsumeLogRequest {
            api_user_id: 7,
            api_token_id: 11,
            model_name: "claude-sonnet-4-20250514".to_string(),
            quota: 1500,
            prompt_tokens: 1000,
            completion_tokens: 500,
            cache_read_tokens: 200,
            cache_write_tokens: 40,
            request_id: "req-1".to_string(),
            ip: "10.0.0.2".to_string(),
        };
        let value = serde_json::to_value(&record).unwrap();
        for key in [
            "api_user_id",
            "api_token_id",
            "model_name",
            "quota",
            "prompt_tokens",
            "completion_tokens",
            "cache_read_tokens",
            "cache_write_tokens",
            "request_id",
            "ip",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn configuration_requires_both_url_and_key() {
        let unset = LedgerClient::new(&LedgerSettings::default(), client());
        assert!(!unset.is_configured());

        let url_only = LedgerClient::new(
            &LedgerSettings {
                base_url: Some("https://ledger.internal".to_string()),
                api_key: None,
            },
            client(),
        );
        assert!(!url_only.is_configured());

        let both = LedgerClient::new(
            &LedgerSettings {
                base_url: Some("https://ledger.internal/".to_string()),
                api_key: Some("sk-ledger".to_string()),
            },
            client(),
        );
        assert!(both.is_configured());
    }

    #[tokio::test]
    async fn unconfigured_ledger_reporting_is_a_silent_noop() {
        let ledger = LedgerClient::new(&LedgerSettings::default(), client());
        // must return immediately without touching the network
        ledger
            .record_consume_log(&ConsumeLogRequest {
                api_user_id: 1,
                api_token_id: 1,
                model_name: "claude-sonnet-4-20250514".to_string(),
                quota: 10,
                prompt_tokens: 5,
                completion_tokens: 5,
                cache_read_tokens: 0,
                cache_write_tokens: 0,
                request_id: "req-noop".to_string(),
                ip: String::new(),
            })
            .await;
    }

    #[tokio::test]
    async fn unconfigured_ratio_lookup_is_a_config_error() {
        let ledger = LedgerClient::new(&LedgerSettings::default(), client());
        match ledger.get_credit_to_quota_ratio().await {
            Err(GatewayError::Config(_)) => {}
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn status_response_parses_ratios() {
        let parsed: StatusResponse = serde_json::from_str(
            r#"{"success":true,"data":{"credit_to_quota_ratio":500000,"credit_to_price_ratio":7}}"#,
        )
        .unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.data.credit_to_quota_ratio, 500_000);
        assert_eq!(parsed.data.credit_to_price_ratio, 7);
    }
}
