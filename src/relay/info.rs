/// Per-call relay state, threaded through every adaptor operation.
///
/// Built once when the inbound request is admitted, immutable afterwards;
/// the mode an adaptor derives in `init` lives on the adaptor instance, not
/// here. Dropped when the call finishes.
#[derive(Debug, Clone)]
pub struct RelayInfo {
    pub request_id: String,
    /// Model name sent to the upstream channel (after redirects).
    pub upstream_model_name: String,
    /// Model name the client asked for, used for per-model header rules and
    /// billing records.
    pub origin_model_name: String,
    pub channel_base_url: String,
    pub api_key: String,
    pub is_stream: bool,
    /// Client explicitly asked for the beta query (`?beta=true`) on this call.
    pub is_claude_beta_query: bool,
    pub user_id: i64,
    pub token_id: i64,
    pub client_ip: String,
}

impl RelayInfo {
    pub fn new(
        origin_model_name: impl Into<String>,
        upstream_model_name: impl Into<String>,
        channel_base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            upstream_model_name: upstream_model_name.into(),
            origin_model_name: origin_model_name.into(),
            channel_base_url: channel_base_url.into(),
            api_key: api_key.into(),
            is_stream: false,
            is_claude_beta_query: false,
            user_id: 0,
            token_id: 0,
            client_ip: String::new(),
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.is_stream = stream;
        self
    }

    pub fn with_beta_query(mut self, beta: bool) -> Self {
        self.is_claude_beta_query = beta;
        self
    }

    pub fn with_accounting(mut self, user_id: i64, token_id: i64, client_ip: &str) -> Self {
        self.user_id = user_id;
        self.token_id = token_id;
        self.client_ip = client_ip.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::RelayInfo;

    #[test]
    fn request_ids_are_unique_per_call() {
        let a = RelayInfo::new("claude-sonnet-4", "claude-sonnet-4", "https://api.example", "sk-1");
        let b = RelayInfo::new("claude-sonnet-4", "claude-sonnet-4", "https://api.example", "sk-1");
        assert_ne!(a.request_id, b.request_id);
    }
}
