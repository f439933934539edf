//! Default [`VisualClassifier`] wiring (§4.6 perception stage's classify
//! step). No vision-capable endpoint is part of the engine's stack, so
//! classification falls back to simple image-geometry heuristics: small,
//! near-square images are treated as stickers (QQ/IM sticker packs are
//! almost always square thumbnails well under typical photo resolution),
//! everything else is a photo. Grounded on the same "classify into a
//! closed enum, degrade gracefully without a model" shape as
//! `nyx_orchestrator::filter`'s gating stage.

use async_trait::async_trait;
use nyx_orchestrator::{VisualClassifier, VisualKind};

const STICKER_MAX_DIMENSION: u32 = 300;

pub struct HeuristicVisualClassifier;

#[async_trait]
impl VisualClassifier for HeuristicVisualClassifier {
    async fn classify(&self, image_bytes: &[u8]) -> anyhow::Result<VisualKind> {
        let bytes = image_bytes.to_vec();
        let kind = tokio::task::spawn_blocking(move || classify_bytes(&bytes)).await?;
        Ok(kind)
    }
}

fn classify_bytes(bytes: &[u8]) -> VisualKind {
    match image::load_from_memory(bytes) {
        Ok(img) => {
            let (w, h) = (img.width(), img.height());
            let near_square = w > 0 && h > 0 && (w as f32 / h as f32 - 1.0).abs() < 0.15;
            if near_square && w.max(h) <= STICKER_MAX_DIMENSION {
                VisualKind::Sticker
            } else {
                VisualKind::Photo
            }
        }
        Err(_) => VisualKind::Icon,
    }
}
