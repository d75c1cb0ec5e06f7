use crate::api::{BlobRef, DestinationPlatform, Session};
use crate::retry::UploadFailureKind;
use async_trait::async_trait;
use bluemigrate_core::{DestinationConfig, MediaError, Thread};
use futures::stream::{self, StreamExt};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ImageFormat;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait ImageDownloader: Send + Sync {
    async fn download(&self, url: &str) -> Result<Vec<u8>, MediaError>;
}

#[derive(Debug, Clone)]
pub struct HttpImageDownloader {
    http: reqwest::Client,
}

impl HttpImageDownloader {
    pub fn new() -> Result<Self, MediaError> {
        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| MediaError::DownloadFailed {
                url: String::new(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ImageDownloader for HttpImageDownloader {
    async fn download(&self, url: &str) -> Result<Vec<u8>, MediaError> {
        let failed = |reason: String| MediaError::DownloadFailed {
            url: url.to_string(),
            reason,
        };
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| failed(e.to_string()))?;
        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Image bytes ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub resized: bool,
}

fn mime_for(format: Option<ImageFormat>) -> &'static str {
    match format {
        Some(ImageFormat::Png) => "image/png",
        Some(ImageFormat::Gif) => "image/gif",
        Some(ImageFormat::WebP) => "image/webp",
        _ => "image/jpeg",
    }
}

/// Shrinks oversized images so they fit the destination's blob limit.
#[derive(Debug, Clone)]
pub struct ImageProcessor {
    max_bytes: usize,
    resize_factor: f64,
    jpeg_quality: u8,
}

impl ImageProcessor {
    pub fn new(max_bytes: usize, resize_factor: f64, jpeg_quality: u8) -> Self {
        Self {
            max_bytes,
            resize_factor,
            jpeg_quality,
        }
    }

    pub fn from_config(config: &DestinationConfig) -> Self {
        Self::new(
            config.max_image_bytes,
            config.resize_factor,
            config.jpeg_quality,
        )
    }

    /// Returns small images untouched. Larger ones are scaled by the resize
    /// factor on both axes and re-encoded in their own format. Unknown
    /// formats become JPEG.
    pub fn prepare(&self, data: Vec<u8>) -> Result<PreparedImage, MediaError> {
        let format = image::guess_format(&data).ok();
        if data.len() <= self.max_bytes {
            return Ok(PreparedImage {
                data,
                mime_type: mime_for(format).to_string(),
                resized: false,
            });
        }

        let decoded = image::load_from_memory(&data).map_err(|e| MediaError::DecodeFailed {
            reason: e.to_string(),
        })?;
        let width = self.scale(decoded.width());
        let height = self.scale(decoded.height());
        let resized = decoded.resize_exact(width, height, FilterType::Lanczos3);

        let encode_failed = |e: image::ImageError| MediaError::EncodeFailed {
            reason: e.to_string(),
        };
        let mut out = Vec::new();
        let mime_type = match format {
            Some(keep @ (ImageFormat::Png | ImageFormat::Gif | ImageFormat::WebP)) => {
                resized
                    .write_to(&mut Cursor::new(&mut out), keep)
                    .map_err(encode_failed)?;
                mime_for(Some(keep))
            }
            _ => {
                let mut encoder = JpegEncoder::new_with_quality(&mut out, self.jpeg_quality);
                encoder
                    .encode_image(&resized.to_rgb8())
                    .map_err(encode_failed)?;
                "image/jpeg"
            }
        };

        debug!(
            "Resized image {}x{} -> {}x{} ({} -> {} bytes)",
            decoded.width(),
            decoded.height(),
            width,
            height,
            data.len(),
            out.len()
        );
        Ok(PreparedImage {
            data: out,
            mime_type: mime_type.to_string(),
            resized: true,
        })
    }

    fn scale(&self, dimension: u32) -> u32 {
        ((dimension as f64 * self.resize_factor).round() as u32).max(1)
    }
}

/// Per-post prepared images of the thread being published.
///
/// Reused across threads; [`ThreadMedia::release`] gives the pooled
/// allocations back.
#[derive(Debug, Default)]
pub struct ThreadMedia {
    slots: Vec<Vec<PreparedImage>>,
}

impl ThreadMedia {
    pub fn take(&mut self, post_index: usize) -> Vec<PreparedImage> {
        self.slots
            .get_mut(post_index)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    pub fn image_count(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    pub fn release(&mut self) {
        self.slots.clear();
        self.slots.shrink_to_fit();
    }

    fn reset(&mut self, posts: usize) {
        self.slots.clear();
        self.slots.resize_with(posts, Vec::new);
    }
}

/// Downloads and prepares images ahead of publishing.
#[derive(Clone)]
pub struct MediaPreparer {
    downloader: Arc<dyn ImageDownloader>,
    processor: ImageProcessor,
    fetch_concurrency: usize,
}

impl MediaPreparer {
    pub fn new(
        downloader: Arc<dyn ImageDownloader>,
        processor: ImageProcessor,
        fetch_concurrency: usize,
    ) -> Self {
        Self {
            downloader,
            processor,
            fetch_concurrency: fetch_concurrency.max(1),
        }
    }

    /// Fetches every image of every post in `thread`. Failures drop only the
    /// affected image.
    pub async fn prepare_thread(&self, thread: &Thread, media: &mut ThreadMedia) {
        media.reset(thread.len());
        if thread.media_count() == 0 {
            return;
        }

        let jobs: Vec<(usize, String)> = thread
            .posts()
            .iter()
            .enumerate()
            .flat_map(|(i, post)| post.media_urls.iter().map(move |url| (i, url.clone())))
            .collect();
        info!("Pre-processing {} images for thread", jobs.len());

        let prepared: Vec<(usize, Option<PreparedImage>)> = stream::iter(jobs)
            .map(|(i, url)| async move { (i, self.prepare_one(&url).await) })
            .buffered(self.fetch_concurrency)
            .collect()
            .await;

        for (i, image) in prepared {
            if let Some(image) = image {
                media.slots[i].push(image);
            }
        }
    }

    async fn prepare_one(&self, url: &str) -> Option<PreparedImage> {
        let result = match self.downloader.download(url).await {
            Ok(data) => self.processor.prepare(data),
            Err(e) => Err(e),
        };
        match result {
            Ok(image) => Some(image),
            Err(e) => {
                warn!("Failed to process image from URL {}: {}", url, e);
                None
            }
        }
    }
}

/// Uploads images with bounded concurrency, keeping their order. Failed
/// uploads are classified, logged and left out.
pub async fn upload_images(
    destination: &dyn DestinationPlatform,
    session: &Session,
    images: Vec<PreparedImage>,
    concurrency: usize,
) -> Vec<BlobRef> {
    let total = images.len();
    let results: Vec<_> = stream::iter(images)
        .map(|image| async move {
            destination
                .upload_media(session, image.data, &image.mime_type)
                .await
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut blobs = Vec::with_capacity(total);
    for result in results {
        match result {
            Ok(blob) => blobs.push(blob),
            Err(e) => {
                let kind = UploadFailureKind::classify(&e);
                warn!("Dropping image after upload failure ({}): {}", kind, e);
            }
        }
    }
    debug!("Successfully uploaded {}/{} images", blobs.len(), total);
    blobs
}
