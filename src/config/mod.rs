pub mod replies;

use crate::cli::Args;
use crate::diagnosis::display::LanguageNames;
use crate::diagnosis::DiagnosisConfig;
use crate::firebase::FirebaseConfig;
use crate::llm::{ LlmConfig, LlmType };
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting: {0}")]
    Invalid(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Firebase,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryType {
    Firebase,
    Redis,
    Memory,
}

pub fn backend(args: &Args) -> Result<Backend, ConfigError> {
    match args.backend.to_lowercase().as_str() {
        "firebase" => Ok(Backend::Firebase),
        "memory" => Ok(Backend::Memory),
        other => Err(ConfigError::Invalid(format!("Unsupported backend: {}", other))),
    }
}

pub fn history_type(args: &Args) -> Result<HistoryType, ConfigError> {
    match args.history_type.to_lowercase().as_str() {
        "firebase" => Ok(HistoryType::Firebase),
        "redis" => Ok(HistoryType::Redis),
        "memory" => Ok(HistoryType::Memory),
        other => Err(ConfigError::Invalid(format!("Unsupported history store type: {}", other))),
    }
}

pub fn require(value: &str, name: &'static str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Missing(name));
    }
    Ok(trimmed.to_string())
}

pub fn require_opt(value: &Option<String>, name: &'static str) -> Result<String, ConfigError> {
    require(value.as_deref().unwrap_or_default(), name)
}

pub fn firebase_config(args: &Args) -> Result<FirebaseConfig, ConfigError> {
    Ok(FirebaseConfig {
        api_key: require(&args.firebase_api_key, "FIREBASE_API_KEY")?,
        auth_url: require(&args.firebase_auth_url, "FIREBASE_AUTH_URL")?,
        database_url: require_opt(&args.firebase_database_url, "FIREBASE_DATABASE_URL")?,
        storage_bucket: args.firebase_storage_bucket.clone().filter(|b| !b.trim().is_empty()),
    })
}

pub fn diagnosis_config(args: &Args) -> Result<DiagnosisConfig, ConfigError> {
    Ok(DiagnosisConfig {
        classifier_url: require_opt(&args.classifier_url, "CLASSIFIER_URL")?,
        google_api_key: require(&args.google_api_key, "GOOGLE_API_KEY")?,
        search_engine_id: require(&args.search_engine_id, "SEARCH_ENGINE_ID")?,
        search_url: require(&args.search_url, "SEARCH_URL")?,
        translate_url: require(&args.translate_url, "TRANSLATE_URL")?,
        translate_target: require(&args.translate_target, "TRANSLATE_TARGET")?,
        languages: LanguageNames {
            source: args.source_language_name.clone(),
            translated: args.translated_language_name.clone(),
        },
    })
}

pub fn llm_config(args: &Args) -> Result<LlmConfig, ConfigError> {
    let llm_type: LlmType = args.chat_llm_type
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{}", e)))?;
    if !(0.0..=2.0).contains(&args.chat_temperature) {
        return Err(ConfigError::Invalid(format!("CHAT_TEMPERATURE out of range: {}", args.chat_temperature)));
    }
    let api_key = Some(args.chat_api_key.clone()).filter(|k| !k.is_empty());
    if api_key.is_none() && llm_type != LlmType::Ollama {
        return Err(ConfigError::Missing("CHAT_API_KEY"));
    }
    Ok(LlmConfig {
        llm_type,
        api_key,
        completion_model: args.chat_model.clone(),
        base_url: args.chat_base_url.clone(),
        temperature: args.chat_temperature,
    })
}
