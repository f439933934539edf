//! Visual classification (§9: "sticker/photo handling becomes enum-based
//! polymorphism instead of ad-hoc booleans"). One image reference per
//! inbound batch is classified into a [`VisualType`]; photos keep a
//! compressed, base64-embedded payload, stickers keep only a label.

#[derive(Debug, Clone, PartialEq)]
pub enum VisualType {
    None,
    Sticker,
    Photo { base64_jpeg: String },
    Icon,
}

impl VisualType {
    pub fn is_sticker(&self) -> bool {
        matches!(self, VisualType::Sticker)
    }

    pub fn is_photo(&self) -> bool {
        matches!(self, VisualType::Photo { .. })
    }
}

/// §4.6: "classify via a small model call into {sticker, photo, icon}".
/// The classifier is a trait so tests can stub it without a real LLM call.
#[async_trait::async_trait]
pub trait VisualClassifier: Send + Sync {
    async fn classify(&self, image_bytes: &[u8]) -> anyhow::Result<VisualKind>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualKind {
    Sticker,
    Photo,
    Icon,
}
