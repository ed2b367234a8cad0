mod settings;

pub use settings::{
    ClaudeSettings, ClientFingerprint, HttpClientSettings, LedgerSettings, Settings,
};
