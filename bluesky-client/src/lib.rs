pub mod api;
pub mod media;
pub mod points_limiter;
pub mod publisher;
pub mod retry;
pub mod xrpc;

pub use api::{BlobRef, DestinationPlatform, ImagesEmbed, PostRecord, Session, POST_COLLECTION};
pub use media::{
    upload_images, HttpImageDownloader, ImageDownloader, ImageProcessor, MediaPreparer,
    PreparedImage, ThreadMedia,
};
pub use points_limiter::{AccountPointsLimiter, ActionPoints};
pub use publisher::{MigrationPublisher, PublishReport, PublishState, PublisherConfig};
pub use retry::{recovery_for, RecoveryAction, UploadFailureKind};
pub use xrpc::XrpcClient;
