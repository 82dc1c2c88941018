use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use reqwest::header::ACCEPT;
use reqwest::multipart::{ Form, Part };
use reqwest::Client as HttpClient;
use serde::Deserialize;
use thiserror::Error;

use crate::models::diagnosis::{ BoundingBox, DiagnosisResult, DiseaseLabel, ImageUpload };

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Classifier request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Classifier returned status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Raw classifier reply. Either `class` (+ `confidence`, optional boxes) or a
/// `message`/`error` explaining why nothing was classified.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ClassifierResponse {
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub bounding_boxes: Option<Vec<BoundingBox>>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Recognized(DiagnosisResult),
    /// A class came back but it is not one we know how to treat.
    Unrecognized { class: String, confidence: Option<f64> },
    /// No class at all; carries the classifier's explanation.
    Declined(String),
}

pub const DEFAULT_DECLINE_MESSAGE: &str = "An error occurred.";

pub fn interpret(response: ClassifierResponse) -> Classification {
    let class = match response.class.filter(|c| !c.is_empty()) {
        Some(class) => class,
        None => {
            let reason = response.message
                .or(response.error)
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DECLINE_MESSAGE.to_string());
            return Classification::Declined(reason);
        }
    };

    match class.parse::<DiseaseLabel>() {
        Ok(label) =>
            Classification::Recognized(DiagnosisResult {
                label,
                confidence: response.confidence.unwrap_or(0.0),
                bounding_boxes: response.bounding_boxes.unwrap_or_default(),
                diagnosed_at: Utc::now(),
            }),
        Err(_) => Classification::Unrecognized { class, confidence: response.confidence },
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image: &ImageUpload) -> Result<ClassifierResponse, ClassifierError>;
}

/// Posts the image as a multipart form with a single `file` field.
pub struct HttpClassifier {
    http: HttpClient,
    url: String,
}

impl HttpClassifier {
    pub fn new(url: &str) -> Self {
        Self { http: HttpClient::new(), url: url.to_string() }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, image: &ImageUpload) -> Result<ClassifierResponse, ClassifierError> {
        let part = Part::bytes(image.bytes.clone())
            .file_name(image.file_name.clone())
            .mime_str(&image.mime_type)?;
        let form = Form::new().part("file", part);

        debug!("Submitting {} ({} bytes) to classifier", image.file_name, image.bytes.len());
        let resp = self.http
            .post(&self.url)
            .header(ACCEPT, "application/json")
            .multipart(form)
            .send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClassifierError::Status { status: status.as_u16(), body });
        }
        Ok(resp.json::<ClassifierResponse>().await?)
    }
}
