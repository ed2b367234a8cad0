use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Expiry sentinel meaning "never expires".
pub const NEVER_EXPIRES: i64 = -1;

/// Status values of the external token entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum TokenStatus {
    Enabled,
    Disabled,
    Expired,
    Exhausted,
}

impl From<TokenStatus> for i32 {
    fn from(status: TokenStatus) -> i32 {
        match status {
            TokenStatus::Enabled => 1,
            TokenStatus::Disabled => 2,
            TokenStatus::Expired => 3,
            TokenStatus::Exhausted => 4,
        }
    }
}

impl TryFrom<i32> for TokenStatus {
    type Error = String;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(TokenStatus::Enabled),
            2 => Ok(TokenStatus::Disabled),
            3 => Ok(TokenStatus::Expired),
            4 => Ok(TokenStatus::Exhausted),
            other => Err(format!("unknown token status: {other}")),
        }
    }
}

/// External token entity, read-only inside the core. The owning CRUD layer
/// persists it; the business rules it must honor live here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub status: TokenStatus,
    #[serde(default)]
    pub created_time: i64,
    #[serde(default)]
    pub accessed_time: i64,
    /// Unix seconds, or `NEVER_EXPIRES`.
    pub expired_time: i64,
    pub remain_quota: i64,
    #[serde(default)]
    pub used_quota: i64,
    pub unlimited_quota: bool,
    #[serde(default)]
    pub model_limits_enabled: bool,
    #[serde(default)]
    pub model_limits: Vec<String>,
    #[serde(default)]
    pub allow_ips: Option<String>,
    #[serde(default)]
    pub group: String,
}

impl Token {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expired_time != NEVER_EXPIRES && self.expired_time <= now
    }

    pub fn is_exhausted(&self) -> bool {
        self.remain_quota <= 0 && !self.unlimited_quota
    }

    pub fn model_allowed(&self, model: &str) -> bool {
        if !self.model_limits_enabled {
            return true;
        }
        self.model_limits.iter().any(|m| m == model)
    }

    /// Admission rules for moving a token back to `Enabled`.
    ///
    /// An expired token with a past expiry (and no never-expires sentinel)
    /// and an exhausted token with nothing left to spend must not silently
    /// resume serving traffic; the operator has to fix expiry or quota first.
    pub fn validate_enable_transition(&self, now: i64) -> Result<()> {
        if self.status == TokenStatus::Expired && self.is_expired(now) {
            return Err(GatewayError::Admission(
                "token has expired; extend the expiry time or set it to never expire before enabling"
                    .to_string(),
            ));
        }
        if self.status == TokenStatus::Exhausted && self.is_exhausted() {
            return Err(GatewayError::Admission(
                "token quota is used up; raise the remaining quota or mark it unlimited before enabling"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Response shape of the token-status endpoint the CRUD layer serves; the
/// core reads it to answer "how much is left on this token".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub object: String,
    pub name: String,
    pub total_granted: i64,
    pub total_used: i64,
    pub total_available: i64,
    pub unlimited_quota: bool,
    pub model_limits: Vec<String>,
    pub model_limits_enabled: bool,
    /// Unix seconds; `0` when the token never expires.
    pub expires_at: i64,
}

impl From<&Token> for TokenUsage {
    fn from(token: &Token) -> Self {
        TokenUsage {
            object: "token_usage".to_string(),
            name: token.name.clone(),
            total_granted: token.remain_quota + token.used_quota,
            total_used: token.used_quota,
            total_available: token.remain_quota,
            unlimited_quota: token.unlimited_quota,
            model_limits: token.model_limits.clone(),
            model_limits_enabled: token.model_limits_enabled,
            expires_at: if token.expired_time == NEVER_EXPIRES {
                0
            } else {
                token.expired_time
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn token() -> Token {
        Token {
            id: 3,
            user_id: 12,
            name: "ci".to_string(),
            status: TokenStatus::Enabled,
            created_time: NOW - 86_400,
            accessed_time: NOW,
            expired_time: NEVER_EXPIRES,
            remain_quota: 1000,
            used_quota: 200,
            unlimited_quota: false,
            model_limits_enabled: false,
            model_limits: Vec::new(),
            allow_ips: None,
            group: "default".to_string(),
        }
    }

    #[test]
    fn expired_token_with_past_expiry_cannot_be_enabled() {
        let mut t = token();
        t.status = TokenStatus::Expired;
        t.expired_time = NOW - 60;
        match t.validate_enable_transition(NOW) {
            Err(GatewayError::Admission(reason)) => assert!(reason.contains("expired")),
            other => panic!("expected Admission rejection, got {:?}", other),
        }
    }

    #[test]
    fn expired_status_with_never_sentinel_can_be_enabled() {
        let mut t = token();
        t.status = TokenStatus::Expired;
        t.expired_time = NEVER_EXPIRES;
        assert!(t.validate_enable_transition(NOW).is_ok());
    }

    #[test]
    fn expired_status_with_future_expiry_can_be_enabled() {
        let mut t = token();
        t.status = TokenStatus::Expired;
        t.expired_time = NOW + 3600;
        assert!(t.validate_enable_transition(NOW).is_ok());
    }

    #[test]
    fn exhausted_token_without_quota_cannot_be_enabled() {
        let mut t = token();
        t.status = TokenStatus::Exhausted;
        t.remain_quota = 0;
        match t.validate_enable_transition(NOW) {
            Err(GatewayError::Admission(reason)) => assert!(reason.contains("quota")),
            other => panic!("expected Admission rejection, got {:?}", other),
        }
    }

    #[test]
    fn exhausted_token_with_unlimited_flag_can_be_enabled() {
        let mut t = token();
        t.status = TokenStatus::Exhausted;
        t.remain_quota = 0;
        t.unlimited_quota = true;
        assert!(t.validate_enable_transition(NOW).is_ok());
    }

    #[test]
    fn exhausted_status_with_replenished_quota_can_be_enabled() {
        let mut t = token();
        t.status = TokenStatus::Exhausted;
        t.remain_quota = 50;
        assert!(t.validate_enable_transition(NOW).is_ok());
    }

    #[test]
    fn model_limits_gate_only_when_enabled() {
        let mut t = token();
        assert!(t.model_allowed("claude-sonnet-4-20250514"));

        t.model_limits_enabled = true;
        t.model_limits = vec!["claude-3-5-haiku-20241022".to_string()];
        assert!(t.model_allowed("claude-3-5-haiku-20241022"));
        assert!(!t.model_allowed("claude-sonnet-4-20250514"));
    }

    #[test]
    fn usage_view_reports_granted_and_sentinel_expiry() {
        let t = token();
        let usage = TokenUsage::from(&t);
        assert_eq!(usage.object, "token_usage");
        assert_eq!(usage.total_granted, 1200);
        assert_eq!(usage.total_available, 1000);
        assert_eq!(usage.expires_at, 0);
    }

    #[test]
    fn status_round_trips_through_wire_integers() {
        let json = serde_json::to_string(&TokenStatus::Exhausted).unwrap();
        assert_eq!(json, "4");
        let back: TokenStatus = serde_json::from_str("3").unwrap();
        assert_eq!(back, TokenStatus::Expired);
        assert!(serde_json::from_str::<TokenStatus>("9").is_err());
    }
}
