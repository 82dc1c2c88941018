use chrono::{ DateTime, Utc };
use serde::{ Deserialize, Serialize };
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// The classes the remote classifier is allowed to report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiseaseLabel {
    #[serde(rename = "Healthy Leaf")]
    HealthyLeaf,
    #[serde(rename = "Insect Pest Disease")]
    InsectPest,
    #[serde(rename = "Leaf Spot Disease")]
    LeafSpot,
    #[serde(rename = "Mosaic Virus Disease")]
    MosaicVirus,
    #[serde(rename = "Small Leaf Disease")]
    SmallLeaf,
    #[serde(rename = "White Mold Disease")]
    WhiteMold,
    #[serde(rename = "Wilt Disease")]
    Wilt,
}

impl DiseaseLabel {
    pub const ALL: [DiseaseLabel; 7] = [
        DiseaseLabel::HealthyLeaf,
        DiseaseLabel::InsectPest,
        DiseaseLabel::LeafSpot,
        DiseaseLabel::MosaicVirus,
        DiseaseLabel::SmallLeaf,
        DiseaseLabel::WhiteMold,
        DiseaseLabel::Wilt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiseaseLabel::HealthyLeaf => "Healthy Leaf",
            DiseaseLabel::InsectPest => "Insect Pest Disease",
            DiseaseLabel::LeafSpot => "Leaf Spot Disease",
            DiseaseLabel::MosaicVirus => "Mosaic Virus Disease",
            DiseaseLabel::SmallLeaf => "Small Leaf Disease",
            DiseaseLabel::WhiteMold => "White Mold Disease",
            DiseaseLabel::Wilt => "Wilt Disease",
        }
    }
}

impl fmt::Display for DiseaseLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct UnknownLabel(pub String);

impl fmt::Display for UnknownLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unrecognized disease label: '{}'", self.0)
    }
}

impl std::error::Error for UnknownLabel {}

/// Exact, case-sensitive membership in the acceptable label set.
impl FromStr for DiseaseLabel {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiseaseLabel::ALL
            .iter()
            .copied()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| UnknownLabel(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DiagnosisResult {
    pub label: DiseaseLabel,
    pub confidence: f64,
    pub bounding_boxes: Vec<BoundingBox>,
    pub diagnosed_at: DateTime<Utc>,
}

/// Display text for a diagnosed label in the source language and its translation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiseaseInfo {
    pub query: String,
    pub translated_query: String,
    pub source_text: String,
    pub translated_text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

impl ImageUpload {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self { bytes, mime_type: mime_type.into(), file_name: file_name.into() }
    }

    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self { bytes, mime_type: mime_type_for(path).to_string(), file_name })
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}
