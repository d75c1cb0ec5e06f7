use crate::error::CoreError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

pub const DEFAULT_POST_LIMIT: usize = 800;

const LINK_FACET_TYPE: &str = "app.bsky.richtext.facet#link";

fn default_post_limit() -> usize {
    DEFAULT_POST_LIMIT
}

/// Body accepted by the request layer before it becomes a queued job.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRequest {
    #[serde(default)]
    pub migration_id: Option<String>,
    #[serde(default)]
    pub source_handle: Option<String>,
    pub dest_handle: String,
    pub credential: String,
    #[serde(default = "default_post_limit")]
    pub post_limit: usize,
    #[serde(default)]
    pub explicit_thread_urls: Option<Vec<String>>,
}

impl MigrationRequest {
    pub fn validate(&self) -> Result<(), CoreError> {
        let has_handle = self
            .source_handle
            .as_deref()
            .is_some_and(|h| !h.trim().is_empty());
        let has_threads = self
            .explicit_thread_urls
            .as_ref()
            .is_some_and(|urls| !urls.is_empty());

        if !has_handle && !has_threads {
            return Err(CoreError::InvalidInput {
                message: "Either 'sourceHandle' or 'explicitThreadUrls' must be provided"
                    .to_string(),
            });
        }
        if self.dest_handle.trim().is_empty() {
            return Err(CoreError::InvalidInput {
                message: "'destHandle' must not be empty".to_string(),
            });
        }
        if self.post_limit == 0 {
            return Err(CoreError::InvalidInput {
                message: "'postLimit' must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn into_job(self) -> Result<MigrationJob, CoreError> {
        self.validate()?;
        Ok(MigrationJob {
            migration_id: self
                .migration_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("migration_{}", uuid::Uuid::new_v4())),
            source_handle: self.source_handle.filter(|h| !h.trim().is_empty()),
            dest_handle: self.dest_handle,
            credential: self.credential,
            post_limit: self.post_limit,
            explicit_thread_urls: self.explicit_thread_urls.unwrap_or_default(),
        })
    }
}

#[derive(Clone)]
pub struct MigrationJob {
    pub migration_id: String,
    pub source_handle: Option<String>,
    pub dest_handle: String,
    pub credential: String,
    pub post_limit: usize,
    pub explicit_thread_urls: Vec<String>,
}

impl fmt::Debug for MigrationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationJob")
            .field("migration_id", &self.migration_id)
            .field("source_handle", &self.source_handle)
            .field("dest_handle", &self.dest_handle)
            .field("credential", &"<redacted>")
            .field("post_limit", &self.post_limit)
            .field("explicit_thread_urls", &self.explicit_thread_urls)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlEntity {
    pub url: String,
    #[serde(default)]
    pub expanded_url: Option<String>,
    #[serde(default)]
    pub display_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawPost {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub raw_text: String,
    pub url_entities: Vec<UrlEntity>,
    pub media_urls: Vec<String>,
    pub reply_to_id: Option<String>,
    pub is_quote: bool,
    pub is_retweet: bool,
}

impl RawPost {
    /// Quote posts and retweets are never migrated.
    pub fn is_excluded(&self) -> bool {
        self.is_quote || self.is_retweet || self.raw_text.starts_with("RT @")
    }
}

/// Link annotation over a UTF-8 byte range of post text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Facet {
    pub byte_start: usize,
    pub byte_end: usize,
    pub uri: String,
}

impl Serialize for Facet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Index {
            byte_start: usize,
            byte_end: usize,
        }

        #[derive(Serialize)]
        struct Feature<'a> {
            #[serde(rename = "$type")]
            kind: &'static str,
            uri: &'a str,
        }

        #[derive(Serialize)]
        struct Wire<'a> {
            index: Index,
            features: [Feature<'a>; 1],
        }

        Wire {
            index: Index {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
            },
            features: [Feature {
                kind: LINK_FACET_TYPE,
                uri: &self.uri,
            }],
        }
        .serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormattedPost {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub facets: Vec<Facet>,
    pub media_urls: Vec<String>,
    /// Parent within the thread; `None` for the thread root.
    pub reply_to_id: Option<String>,
    pub depth: usize,
}

impl FormattedPost {
    pub fn created_at_iso(&self) -> String {
        self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Depth-first flattening of one reply tree, root first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Thread {
    posts: Vec<FormattedPost>,
}

impl Thread {
    pub fn new(posts: Vec<FormattedPost>) -> Self {
        Self { posts }
    }

    pub fn root(&self) -> Option<&FormattedPost> {
        self.posts.first()
    }

    pub fn posts(&self) -> &[FormattedPost] {
        &self.posts
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn contains(&self, post_id: &str) -> bool {
        self.posts.iter().any(|p| p.id == post_id)
    }

    pub fn media_count(&self) -> usize {
        self.posts.iter().map(|p| p.media_urls.len()).sum()
    }

    pub fn into_posts(self) -> Vec<FormattedPost> {
        self.posts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub root: StrongRef,
    pub parent: StrongRef,
}
