pub mod adaptor;
pub mod claude;
pub mod dto;
pub mod executor;
pub mod info;
pub mod streaming;

pub use adaptor::{ChannelAdaptor, RelayResponse};
pub use claude::{ClaudeAdaptor, RequestMode};
pub use dto::RelayUsage;
pub use info::RelayInfo;
