use std::fmt::Write as _;

use super::enrich::NO_INFORMATION;
use crate::models::diagnosis::{ DiagnosisResult, DiseaseInfo };

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LanguageToggle {
    #[default]
    Source,
    Translated,
}

impl LanguageToggle {
    pub fn toggle(self) -> Self {
        match self {
            LanguageToggle::Source => LanguageToggle::Translated,
            LanguageToggle::Translated => LanguageToggle::Source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageNames {
    pub source: String,
    pub translated: String,
}

/// Presentation state of a finished diagnosis.
#[derive(Debug, Clone)]
pub struct ResultView {
    pub result: DiagnosisResult,
    pub info: Option<DiseaseInfo>,
    pub languages: LanguageNames,
    pub active: LanguageToggle,
}

impl ResultView {
    pub fn new(result: DiagnosisResult, info: Option<DiseaseInfo>, languages: LanguageNames) -> Self {
        Self { result, info, languages, active: LanguageToggle::default() }
    }

    pub fn toggle(&mut self) {
        self.active = self.active.toggle();
    }

    pub fn headline(&self) -> String {
        format!("Eggplant {}", self.result.label)
    }

    pub fn confidence(&self) -> String {
        format!("{:.2}", self.result.confidence)
    }

    pub fn info_text(&self) -> &str {
        match (&self.info, self.active) {
            (Some(info), LanguageToggle::Source) => &info.source_text,
            (Some(info), LanguageToggle::Translated) => &info.translated_text,
            (None, _) => NO_INFORMATION,
        }
    }

    pub fn toggle_label(&self) -> String {
        let other = match self.active {
            LanguageToggle::Source => &self.languages.translated,
            LanguageToggle::Translated => &self.languages.source,
        };
        format!("Show in {}", other)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Detected Disease\n  {}", self.headline());
        let _ = writeln!(out, "Confidence\n  {}", self.confidence());
        for (i, b) in self.result.bounding_boxes.iter().enumerate() {
            let _ = writeln!(out, "  box {}: x={} y={} w={} h={}", i + 1, b.x, b.y, b.width, b.height);
        }
        let _ = writeln!(out, "Information\n{}", self.info_text());
        let _ = write!(out, "[{}]", self.toggle_label());
        out
    }
}
