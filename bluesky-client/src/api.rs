use async_trait::async_trait;
use bluemigrate_core::{BlueskyApiError, Facet, FormattedPost, ReplyRef, StrongRef};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const POST_COLLECTION: &str = "app.bsky.feed.post";
const IMAGES_EMBED_TYPE: &str = "app.bsky.embed.images";

/// Contract of the destination platform client.
#[async_trait]
pub trait DestinationPlatform: Send + Sync {
    async fn login(&self, identifier: &str, password: &str) -> Result<Session, BlueskyApiError>;

    /// Resolves a handle to the account's DID.
    async fn resolve_handle(&self, handle: &str) -> Result<String, BlueskyApiError>;

    async fn upload_media(
        &self,
        session: &Session,
        data: Vec<u8>,
        mime_type: &str,
    ) -> Result<BlobRef, BlueskyApiError>;

    async fn publish_post(
        &self,
        session: &Session,
        record: &PostRecord,
    ) -> Result<StrongRef, BlueskyApiError>;
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("did", &self.did)
            .field("handle", &self.handle)
            .field("access_jwt", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidLink {
    #[serde(rename = "$link")]
    pub link: String,
}

/// Reference to an uploaded blob, embedded verbatim in records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    #[serde(rename = "$type", default = "blob_type")]
    pub kind: String,
    #[serde(rename = "ref")]
    pub link: CidLink,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub size: u64,
}

fn blob_type() -> String {
    "blob".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddedImage {
    pub alt: String,
    pub image: BlobRef,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImagesEmbed {
    #[serde(rename = "$type")]
    pub kind: &'static str,
    pub images: Vec<EmbeddedImage>,
}

impl ImagesEmbed {
    pub fn new(blobs: Vec<BlobRef>) -> Self {
        Self {
            kind: IMAGES_EMBED_TYPE,
            images: blobs
                .into_iter()
                .map(|image| EmbeddedImage {
                    alt: String::new(),
                    image,
                })
                .collect(),
        }
    }
}

/// `app.bsky.feed.post` record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    #[serde(rename = "$type")]
    pub kind: &'static str,
    pub text: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<ImagesEmbed>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub facets: Vec<Facet>,
}

impl PostRecord {
    pub fn from_post(post: &FormattedPost, images: Vec<BlobRef>, reply: Option<ReplyRef>) -> Self {
        Self {
            kind: POST_COLLECTION,
            text: post.text.clone(),
            created_at: post.created_at_iso(),
            embed: (!images.is_empty()).then(|| ImagesEmbed::new(images)),
            reply,
            facets: post.facets.clone(),
        }
    }

    pub fn image_count(&self) -> usize {
        self.embed.as_ref().map_or(0, |e| e.images.len())
    }
}
