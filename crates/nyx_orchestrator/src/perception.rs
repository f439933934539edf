//! Image perception (§4.6 parallel fan-out, §5: "CPU-bound image work runs
//! on `spawn_blocking`"). Downloads a referenced image, classifies it via a
//! [`VisualClassifier`], and for photos compresses + base64-embeds it for
//! the agent prompt. The HTTP client setup mirrors the teacher's provider
//! clients (`providers::openai::OpenAiClient::new`): a `reqwest::Client`
//! built once with explicit timeouts, not the bare default.

use crate::visual::{VisualClassifier, VisualKind, VisualType};
use anyhow::{Context, Result};
use base64::Engine;
use image::imageops::FilterType;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_DIMENSION: u32 = 1536;
const JPEG_QUALITY: u8 = 85;

pub struct ImagePerception {
    client: reqwest::Client,
    classifier: Arc<dyn VisualClassifier>,
    cache: Mutex<lru::LruCache<String, VisualType>>,
}

impl ImagePerception {
    pub fn new(classifier: Arc<dyn VisualClassifier>) -> Result<Self> {
        let client = reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT).timeout(READ_TIMEOUT).build()?;
        Ok(Self {
            client,
            classifier,
            cache: Mutex::new(lru::LruCache::new(std::num::NonZeroUsize::new(256).unwrap())),
        })
    }

    /// Fetches, classifies, and (for photos) compresses the image at `url`.
    /// Results are cached by URL for the lifetime of the process.
    pub async fn perceive(&self, url: &str) -> Result<VisualType> {
        if let Some(cached) = self.cache.lock().await.get(url) {
            return Ok(cached.clone());
        }

        let bytes = self.client.get(url).send().await.context("downloading image")?.bytes().await.context("reading image body")?.to_vec();

        let kind = self.classifier.classify(&bytes).await.context("classifying image")?;
        let visual = match kind {
            VisualKind::Sticker => VisualType::Sticker,
            VisualKind::Icon => VisualType::Icon,
            VisualKind::Photo => {
                let jpeg = tokio::task::spawn_blocking(move || compress_to_jpeg(&bytes)).await.context("compression task panicked")??;
                VisualType::Photo { base64_jpeg: base64::engine::general_purpose::STANDARD.encode(jpeg) }
            }
        };

        self.cache.lock().await.put(url.to_string(), visual.clone());
        Ok(visual)
    }
}

/// Downscales to at most [`MAX_DIMENSION`] on the long edge and re-encodes
/// as JPEG. Runs on a blocking thread; decode/resize/encode are all
/// CPU-bound and would stall the async runtime otherwise.
fn compress_to_jpeg(bytes: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).context("decoding image")?;
    let (w, h) = (img.width(), img.height());
    let resized = if w.max(h) > MAX_DIMENSION {
        img.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Lanczos3)
    } else {
        img
    };

    let mut buf = Cursor::new(Vec::new());
    resized.write_with_encoder(image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)).context("encoding jpeg")?;
    Ok(buf.into_inner())
}
