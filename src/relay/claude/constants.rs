pub const CHANNEL_NAME: &str = "claude";

pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

pub const MODEL_LIST: &[&str] = &[
    "claude-instant-1.2",
    "claude-2.0",
    "claude-2.1",
    "claude-3-haiku-20240307",
    "claude-3-opus-20240229",
    "claude-3-5-haiku-20241022",
    "claude-3-5-sonnet-20241022",
    "claude-3-7-sonnet-20250219",
    "claude-sonnet-4-20250514",
    "claude-opus-4-20250514",
    "claude-opus-4-1-20250805",
];
