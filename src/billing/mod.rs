mod cache;
mod ledger;
mod retry;

pub use cache::{Clock, RATIO_CACHE_TTL, RatioCache, SystemClock};
pub use ledger::{ConsumeLogData, ConsumeLogRequest, LedgerClient, StatusData, StatusResponse};
pub use retry::{INITIAL_BACKOFF, MAX_RETRIES, backoff_delay};
