use once_cell::sync::Lazy;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use log::info;

use super::ConfigError;

const SYSTEM_PROMPT: &str =
    "You are an expert on eggplants and related topics like diseases, prevention, and cures. Do not answer unrelated questions.";

const FALLBACK_REPLY: &str = "Sorry, I encountered an error while processing your request.";

const DISEASE_REPLIES: [(&str, &str); 6] = [
    (
        "Insect Pest Disease",
        "Insect pests like aphids, whiteflies, and mites can attack eggplants. Use insecticidal soaps or neem oil for effective control.",
    ),
    (
        "Leaf Spot Disease",
        "Leaf Spot Disease is caused by fungi or bacteria, leading to brown or black spots on leaves. Apply fungicides and maintain proper spacing between plants to prevent it.",
    ),
    (
        "Mosaic Virus Disease",
        "Mosaic Virus Disease causes mottled patterns on leaves and stunted growth. Remove infected plants and control insect vectors like aphids.",
    ),
    (
        "Small Leaf Disease",
        "Small Leaf Disease leads to reduced leaf size and poor growth. Ensure proper nutrient supply and monitor for pest infestations.",
    ),
    (
        "White Mold Disease",
        "White Mold Disease causes white, cottony growth on stems and leaves. Avoid overwatering and use fungicides as needed.",
    ),
    (
        "Wilt Disease",
        "Wilt Disease can be caused by fungi like Fusarium or bacteria. Ensure well-drained soil and rotate crops to prevent buildup of pathogens.",
    ),
];

static BUILTIN: Lazy<Arc<ReplyBook>> = Lazy::new(|| {
    Arc::new(ReplyBook {
        system_prompt: SYSTEM_PROMPT.to_string(),
        fallback_reply: FALLBACK_REPLY.to_string(),
        disease_replies: DISEASE_REPLIES
            .iter()
            .map(|(key, reply)| DiseaseReply { key: key.to_string(), reply: reply.to_string() })
            .collect(),
    })
});

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DiseaseReply {
    pub key: String,
    pub reply: String,
}

/// Fixed texts the chat doctor answers with: the seed prompt, the apology used
/// when completion fails, and the keyword table consulted before any completion.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReplyBook {
    pub system_prompt: String,
    pub fallback_reply: String,
    pub disease_replies: Vec<DiseaseReply>,
}

impl ReplyBook {
    pub fn builtin() -> Arc<ReplyBook> {
        BUILTIN.clone()
    }

    pub fn load(path: &Path) -> Result<Arc<ReplyBook>, ConfigError> {
        let json_str = fs::read_to_string(path)?;
        let book: ReplyBook = serde_json::from_str(&json_str)?;
        if book.system_prompt.trim().is_empty() {
            return Err(ConfigError::Invalid("system_prompt must not be empty".to_string()));
        }
        info!("Loaded {} disease replies from {}", book.disease_replies.len(), path.display());
        Ok(Arc::new(book))
    }

    pub fn load_or_builtin(path: Option<&Path>) -> Result<Arc<ReplyBook>, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::builtin()),
        }
    }

    /// First table entry, in table order, whose key occurs in `text` ignoring case.
    pub fn lookup(&self, text: &str) -> Option<&DiseaseReply> {
        let lowered = text.to_lowercase();
        self.disease_replies
            .iter()
            .find(|entry| lowered.contains(&entry.key.to_lowercase()))
    }
}
