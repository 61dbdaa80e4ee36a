// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Prefix shared by every collage layout code, e.g. `collage-1-2`.
pub const COLLAGE_PREFIX: &str = "collage-";

/// Root aggregate produced by the upstream analysis step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductAnalysis {
    pub product_name: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub marketing_copy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_visual_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_category: Option<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl ProductAnalysis {
    /// Subject used when a section needs a description of the product itself.
    pub fn subject(&self) -> &str {
        self.product_visual_description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.product_name)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub layout_type: LayoutType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_slots: Option<Vec<ImageSlot>>,
    #[serde(default)]
    pub is_original_image: bool,
    #[serde(default)]
    pub is_preview: bool,
    #[serde(default)]
    pub use_fixed_image: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_image_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_image_mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_caption: Option<String>,
}

impl Section {
    pub fn has_image(&self) -> bool {
        non_empty(self.image_url.as_deref()).is_some()
    }

    pub fn prompt(&self) -> Option<&str> {
        non_empty(self.image_prompt.as_deref())
    }

    pub fn fixed_image(&self) -> Option<&str> {
        non_empty(self.fixed_image_base64.as_deref())
    }

    /// Slots, if the section carries at least one.
    pub fn slots(&self) -> Option<&[ImageSlot]> {
        self.image_slots.as_deref().filter(|slots| !slots.is_empty())
    }

    /// Data URL built from the fixed image payload.
    pub fn fixed_image_data_url(&self) -> Option<String> {
        let data = self.fixed_image()?;
        let mime = non_empty(self.fixed_image_mime_type.as_deref()).unwrap_or("image/png");
        Some(format!("data:{mime};base64,{data}"))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSlot {
    pub id: String,
    #[serde(default)]
    pub slot_type: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<ImageCrop>,
}

impl ImageSlot {
    pub fn has_image(&self) -> bool {
        non_empty(self.image_url.as_deref()).is_some()
    }
}

/// Cosmetic crop transform. Carried through generation untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageCrop {
    pub zoom: f64,
    pub pan_x: f64,
    pub pan_y: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LayoutType {
    #[default]
    FullWidth,
    SplitLeft,
    SplitRight,
    Grid2,
    Grid3,
    TextOnly,
    ImageOnly,
    /// Full layout code, including the `collage-` prefix.
    Collage(String),
    Other(String),
}

impl LayoutType {
    pub fn as_code(&self) -> &str {
        match self {
            LayoutType::FullWidth => "full-width",
            LayoutType::SplitLeft => "split-left",
            LayoutType::SplitRight => "split-right",
            LayoutType::Grid2 => "grid-2",
            LayoutType::Grid3 => "grid-3",
            LayoutType::TextOnly => "text-only",
            LayoutType::ImageOnly => "image-only",
            LayoutType::Collage(code) | LayoutType::Other(code) => code.as_str(),
        }
    }

    pub fn is_text_only(&self) -> bool {
        matches!(self, LayoutType::TextOnly)
    }

    pub fn is_collage(&self) -> bool {
        matches!(self, LayoutType::Collage(_))
    }
}

impl From<String> for LayoutType {
    fn from(code: String) -> Self {
        match code.as_str() {
            "full-width" => LayoutType::FullWidth,
            "split-left" => LayoutType::SplitLeft,
            "split-right" => LayoutType::SplitRight,
            "grid-2" => LayoutType::Grid2,
            "grid-3" => LayoutType::Grid3,
            "text-only" => LayoutType::TextOnly,
            "image-only" => LayoutType::ImageOnly,
            _ if code.starts_with(COLLAGE_PREFIX) => LayoutType::Collage(code),
            _ => LayoutType::Other(code),
        }
    }
}

impl From<&str> for LayoutType {
    fn from(code: &str) -> Self {
        LayoutType::from(code.to_string())
    }
}

impl From<LayoutType> for String {
    fn from(layout: LayoutType) -> Self {
        match layout {
            LayoutType::Collage(code) | LayoutType::Other(code) => code,
            other => other.as_code().to_string(),
        }
    }
}

impl fmt::Display for LayoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Base64 image payload with its mime type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceImage {
    pub data: String,
    #[serde(default)]
    pub mime_type: String,
}

impl ReferenceImage {
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Parses `data:<mime>;base64,<data>`.
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (mime_type, data) = rest.split_once(";base64,")?;
        if mime_type.is_empty() || data.is_empty() {
            return None;
        }
        Some(Self {
            data: data.to_string(),
            mime_type: mime_type.to_string(),
        })
    }
}

/// A purchasable color variant, read-only to generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorOption {
    pub color_name: String,
    #[serde(default)]
    pub images: Vec<ReferenceImage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    #[default]
    Creation,
    Localization,
}

/// Free-form model settings forwarded to the synthesis backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Snapshot of an orchestration run's progress.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationProgress {
    pub total: usize,
    pub current: usize,
    pub current_section_id: String,
    pub current_section_title: String,
    pub completed_section_ids: Vec<String>,
    pub start_time: Option<DateTime<Utc>>,
}

impl GenerationProgress {
    pub fn is_idle(&self) -> bool {
        self.start_time.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    /// Run failed after doing some work; `analysis` holds what was finished.
    Partial,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: Uuid,
    pub status: RunStatus,
    pub analysis: ProductAnalysis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
