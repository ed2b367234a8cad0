use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("upstream API error (status {status}, type {error_type}): {message}")]
    Upstream {
        status: u16,
        error_type: String,
        message: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0} is not implemented for this channel")]
    NotImplemented(&'static str),

    #[error("admission rejected: {0}")]
    Admission(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl GatewayError {
    /// Billing-path classification: transport and decode failures plus
    /// upstream 5xx are worth another attempt, everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Http(_) | GatewayError::Json(_) => true,
            GatewayError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::GatewayError;

    #[test]
    fn upstream_5xx_is_retryable_4xx_is_not() {
        let server = GatewayError::Upstream {
            status: 502,
            error_type: "api_error".into(),
            message: "bad gateway".into(),
        };
        let client = GatewayError::Upstream {
            status: 400,
            error_type: "invalid_request_error".into(),
            message: "bad body".into(),
        };
        assert!(server.is_retryable());
        assert!(!client.is_retryable());
    }

    #[test]
    fn business_failures_are_terminal() {
        assert!(!GatewayError::Config("ledger rejected".into()).is_retryable());
        assert!(!GatewayError::Admission("token expired".into()).is_retryable());
    }
}
