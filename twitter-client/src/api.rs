use async_trait::async_trait;
use bluemigrate_core::{RawPost, TwitterApiError, UrlEntity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Format used by the legacy v1.1 payloads, e.g. `Wed Oct 10 20:19:24 +0000 2018`.
const LEGACY_TIMESTAMP_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// Contract of the source platform client.
///
/// Implementations must surface rate limiting as
/// [`TwitterApiError::TooManyRequests`] (or a 429 `RequestFailed`) so the budget
/// tracker can react to it.
#[async_trait]
pub trait SourcePlatform: Send + Sync {
    async fn get_user_by_handle(&self, handle: &str) -> Result<SourceUser, TwitterApiError>;

    /// First page when `cursor` is `None`; the page's `next_cursor` continues it.
    async fn get_user_posts(
        &self,
        user: &SourceUser,
        cursor: Option<&str>,
    ) -> Result<PostPage, TwitterApiError>;

    async fn get_post_by_id(&self, post_id: &str) -> Result<PostDetail, TwitterApiError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUser {
    pub id: String,
    pub screen_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostPage {
    pub posts: Vec<TweetData>,
    pub next_cursor: Option<String>,
}

/// A post together with the conversation around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostDetail {
    pub post: TweetData,
    /// Ancestors, oldest first.
    #[serde(default)]
    pub reply_to: Vec<TweetData>,
    /// Self-replies continuing the thread below `post`.
    #[serde(default)]
    pub thread: Vec<TweetData>,
}

impl PostDetail {
    pub fn into_conversation(self) -> Vec<TweetData> {
        let mut tweets = self.reply_to;
        tweets.push(self.post);
        tweets.extend(self.thread);
        tweets
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaEntity {
    #[serde(default)]
    pub media_url_https: Option<String>,
}

/// Post as delivered by the source platform; every field may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TweetData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, alias = "full_text")]
    pub text: Option<String>,
    #[serde(default)]
    pub urls: Vec<UrlEntity>,
    #[serde(default)]
    pub media: Vec<MediaEntity>,
    #[serde(default)]
    pub in_reply_to_status_id_str: Option<String>,
    #[serde(default)]
    pub is_quote_status: bool,
    #[serde(default)]
    pub retweeted_status_id: Option<String>,
}

/// Why a wire record could not become a [`RawPost`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    #[error("post has no id")]
    MissingId,

    #[error("post {post_id} has no timestamp")]
    MissingTimestamp { post_id: String },

    #[error("post {post_id} has unparseable timestamp '{value}'")]
    InvalidTimestamp { post_id: String, value: String },
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(value, LEGACY_TIMESTAMP_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl TryFrom<TweetData> for RawPost {
    type Error = DropReason;

    fn try_from(tweet: TweetData) -> Result<Self, Self::Error> {
        let id = tweet
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or(DropReason::MissingId)?;

        let raw_timestamp = tweet
            .created_at
            .ok_or_else(|| DropReason::MissingTimestamp {
                post_id: id.clone(),
            })?;
        let created_at =
            parse_timestamp(&raw_timestamp).ok_or_else(|| DropReason::InvalidTimestamp {
                post_id: id.clone(),
                value: raw_timestamp.clone(),
            })?;

        let raw_text = tweet.text.unwrap_or_default();
        let is_retweet = tweet.retweeted_status_id.is_some() || raw_text.starts_with("RT @");
        let media_urls = tweet
            .media
            .into_iter()
            .filter_map(|m| m.media_url_https)
            .collect();

        Ok(Self {
            id,
            created_at,
            raw_text,
            url_entities: tweet.urls,
            media_urls,
            reply_to_id: tweet.in_reply_to_status_id_str.filter(|id| !id.is_empty()),
            is_quote: tweet.is_quote_status,
            is_retweet,
        })
    }
}

/// Converts wire records, logging and skipping the ones that cannot be used.
pub fn parse_tweets(tweets: impl IntoIterator<Item = TweetData>) -> Vec<RawPost> {
    tweets
        .into_iter()
        .filter_map(|tweet| match RawPost::try_from(tweet) {
            Ok(post) => Some(post),
            Err(reason) => {
                debug!("Dropping source post: {}", reason);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tweet(id: &str) -> TweetData {
        TweetData {
            id: Some(id.to_string()),
            created_at: Some("Wed Oct 10 20:19:24 +0000 2018".to_string()),
            text: Some("hello".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_legacy_and_rfc3339_timestamps() {
        let legacy = parse_timestamp("Wed Oct 10 20:19:24 +0000 2018").unwrap();
        assert_eq!(legacy.to_rfc3339(), "2018-10-10T20:19:24+00:00");

        let modern = parse_timestamp("2018-10-10T22:19:24+02:00").unwrap();
        assert_eq!(modern, legacy);

        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_conversion_drops_incomplete_records() {
        let mut no_id = tweet("1");
        no_id.id = None;
        assert_eq!(RawPost::try_from(no_id), Err(DropReason::MissingId));

        let mut no_time = tweet("2");
        no_time.created_at = None;
        assert!(matches!(
            RawPost::try_from(no_time),
            Err(DropReason::MissingTimestamp { .. })
        ));

        let mut bad_time = tweet("3");
        bad_time.created_at = Some("not a date".to_string());
        let reason = RawPost::try_from(bad_time).unwrap_err();
        assert!(matches!(reason, DropReason::InvalidTimestamp { .. }));
        assert_eq!(
            reason.to_string(),
            "post 3 has unparseable timestamp 'not a date'"
        );

        let parsed = parse_tweets(vec![tweet("4"), TweetData::default()]);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, "4");
    }

    #[test]
    fn test_retweet_detection_and_media() {
        let mut rt = tweet("5");
        rt.text = Some("RT @someone: hi".to_string());
        rt.media = vec![
            MediaEntity {
                media_url_https: Some("https://pbs.twimg.com/a.jpg".to_string()),
            },
            MediaEntity::default(),
        ];
        let post = RawPost::try_from(rt).unwrap();
        assert!(post.is_retweet);
        assert!(post.is_excluded());
        assert_eq!(post.media_urls, vec!["https://pbs.twimg.com/a.jpg"]);
    }

    #[test]
    fn test_wire_record_from_json() {
        let tweet: TweetData = serde_json::from_str(
            r#"{
                "id": "10",
                "created_at": "Wed Oct 10 20:19:24 +0000 2018",
                "full_text": "see https://t.co/abc",
                "urls": [{"url": "https://t.co/abc", "expanded_url": "https://example.com"}],
                "in_reply_to_status_id_str": "9"
            }"#,
        )
        .unwrap();
        let post = RawPost::try_from(tweet).unwrap();
        assert_eq!(post.reply_to_id.as_deref(), Some("9"));
        assert_eq!(post.url_entities.len(), 1);
        assert!(!post.is_excluded());
    }

    #[test]
    fn test_conversation_order() {
        let detail = PostDetail {
            post: tweet("2"),
            reply_to: vec![tweet("1")],
            thread: vec![tweet("3"), tweet("4")],
        };
        let ids: Vec<_> = detail
            .into_conversation()
            .into_iter()
            .filter_map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
    }
}
