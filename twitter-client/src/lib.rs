pub mod api;
pub mod fetcher;
pub mod rate_limiter;
pub mod text;
pub mod thread_builder;

pub use api::{
    parse_timestamp, parse_tweets, DropReason, MediaEntity, PostDetail, PostPage, SourcePlatform,
    SourceUser, TweetData,
};
pub use fetcher::{parse_status_id, PostFetcher};
pub use rate_limiter::{BudgetConfig, EndpointBudgetTracker, EndpointUsage};
pub use text::{expand_links, format_post_text, truncate, ExpandedText, MAX_TEXT_CHARS};
pub use thread_builder::{merge_threads, ThreadBuilder, MAX_THREAD_DEPTH};
