pub mod classifier;
pub mod display;
pub mod enrich;

use log::{ error, info, warn };
use std::fmt;
use std::sync::Arc;

use self::classifier::{ Classification, Classifier, ClassifierError, HttpClassifier };
use self::display::{ LanguageNames, ResultView };
use self::enrich::{ Enricher, GoogleSearch, GoogleTranslate };
use crate::models::diagnosis::{ DiagnosisResult, DiseaseInfo, ImageUpload };
use crate::models::notice::Notice;

/// Endpoints and language settings for the diagnosis workflow.
#[derive(Clone)]
pub struct DiagnosisConfig {
    pub classifier_url: String,
    pub google_api_key: String,
    pub search_engine_id: String,
    pub search_url: String,
    pub translate_url: String,
    pub translate_target: String,
    pub languages: LanguageNames,
}

impl fmt::Debug for DiagnosisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosisConfig")
            .field("classifier_url", &self.classifier_url)
            .field("google_api_key", &"<redacted>")
            .field("search_engine_id", &self.search_engine_id)
            .field("search_url", &self.search_url)
            .field("translate_url", &self.translate_url)
            .field("translate_target", &self.translate_target)
            .field("languages", &self.languages)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Submitting,
    Rejected,
    Enriching,
    Ready,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Rejected | PipelineState::Ready | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Submitting => "submitting",
            PipelineState::Rejected => "rejected",
            PipelineState::Enriching => "enriching",
            PipelineState::Ready => "ready",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

pub fn no_image_notice() -> Notice {
    Notice::new("Select Image", "No image selected. Please select an image to proceed.")
}

pub fn unrecognized_notice(message: &str) -> Notice {
    Notice::new("Unrecognized Disease", message)
}

pub const UNCLEAR_IMAGE: &str = "Please provide a clear and more accurate image.";

#[derive(Debug)]
pub enum DiagnosisOutcome {
    /// Nothing was submitted.
    NoImage(Notice),
    Rejected(Notice),
    Failed(ClassifierError),
    /// `info` is `None` when enrichment failed; the result stands regardless.
    Ready {
        result: DiagnosisResult,
        info: Option<DiseaseInfo>,
    },
}

impl DiagnosisOutcome {
    pub fn notice(&self) -> Option<&Notice> {
        match self {
            DiagnosisOutcome::NoImage(n) | DiagnosisOutcome::Rejected(n) => Some(n),
            _ => None,
        }
    }
}

/// Image -> classifier -> label check -> search and translation.
pub struct DiagnosisPipeline {
    classifier: Arc<dyn Classifier>,
    enricher: Enricher,
    languages: LanguageNames,
    state: PipelineState,
}

impl DiagnosisPipeline {
    pub fn new(classifier: Arc<dyn Classifier>, enricher: Enricher, languages: LanguageNames) -> Self {
        Self { classifier, enricher, languages, state: PipelineState::Idle }
    }

    pub fn from_config(config: &DiagnosisConfig) -> Self {
        let classifier = Arc::new(HttpClassifier::new(&config.classifier_url));
        let search = Arc::new(
            GoogleSearch::new(&config.search_url, &config.google_api_key, &config.search_engine_id)
        );
        let translate = Arc::new(GoogleTranslate::new(&config.translate_url, &config.google_api_key));
        let enricher = Enricher::new(search, translate, &config.translate_target);
        Self::new(classifier, enricher, config.languages.clone())
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn view(&self, result: DiagnosisResult, info: Option<DiseaseInfo>) -> ResultView {
        ResultView::new(result, info, self.languages.clone())
    }

    fn transition(&mut self, next: PipelineState) {
        info!("Diagnosis {} -> {}", self.state, next);
        self.state = next;
    }

    /// Runs one image through the workflow. Every call ends in a terminal
    /// state, except a missing image, which leaves the pipeline idle.
    pub async fn diagnose(&mut self, image: Option<ImageUpload>) -> DiagnosisOutcome {
        self.state = PipelineState::Idle;
        let image = match image.filter(|img| !img.is_empty()) {
            Some(image) => image,
            None => {
                warn!("Diagnosis requested without an image");
                return DiagnosisOutcome::NoImage(no_image_notice());
            }
        };

        self.transition(PipelineState::Submitting);
        let response = match self.classifier.classify(&image).await {
            Ok(response) => response,
            Err(e) => {
                error!("Classification of {} failed: {}", image.file_name, e);
                self.transition(PipelineState::Failed);
                return DiagnosisOutcome::Failed(e);
            }
        };

        let result = match classifier::interpret(response) {
            Classification::Recognized(result) => result,
            Classification::Unrecognized { class, confidence } => {
                warn!("Classifier returned unknown label '{}' ({:?})", class, confidence);
                self.transition(PipelineState::Rejected);
                return DiagnosisOutcome::Rejected(unrecognized_notice(UNCLEAR_IMAGE));
            }
            Classification::Declined(message) => {
                warn!("Classifier declined the image: {}", message);
                self.transition(PipelineState::Rejected);
                return DiagnosisOutcome::Rejected(unrecognized_notice(&message));
            }
        };

        info!("Classified as {} ({:.2})", result.label, result.confidence);
        self.transition(PipelineState::Enriching);
        let info = match self.enricher.enrich(result.label).await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Enrichment for {} failed: {}", result.label, e);
                None
            }
        };

        self.transition(PipelineState::Ready);
        DiagnosisOutcome::Ready { result, info }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::classifier::ClassifierResponse;
    use super::enrich::tests::{ FixedSearch, TagTranslator };
    use crate::models::diagnosis::DiseaseLabel;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{ AtomicUsize, Ordering };

    struct ScriptedClassifier {
        reply: Option<serde_json::Value>,
        calls: AtomicUsize,
    }

    impl ScriptedClassifier {
        fn new(reply: Option<serde_json::Value>) -> Arc<Self> {
            Arc::new(Self { reply, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl Classifier for ScriptedClassifier {
        async fn classify(&self, _image: &ImageUpload) -> Result<ClassifierResponse, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Some(value) => Ok(serde_json::from_value(value.clone()).unwrap_or_default()),
                None => Err(ClassifierError::Status { status: 500, body: "boom".into() }),
            }
        }
    }

    fn languages() -> LanguageNames {
        LanguageNames { source: "English".into(), translated: "Urdu".into() }
    }

    fn leaf() -> Option<ImageUpload> {
        Some(ImageUpload::new(vec![0xff, 0xd8, 0xff], "image/jpeg", "leaf.jpg"))
    }

    struct Harness {
        pipeline: DiagnosisPipeline,
        classifier: Arc<ScriptedClassifier>,
        search: Arc<FixedSearch>,
        translator: Arc<TagTranslator>,
    }

    fn harness(reply: Option<serde_json::Value>, translate_fails: bool) -> Harness {
        let classifier = ScriptedClassifier::new(reply);
        let search = FixedSearch::new(Ok(vec!["Small chlorotic leaves."]));
        let translator = TagTranslator::new(translate_fails);
        let enricher = Enricher::new(search.clone(), translator.clone(), "ur");
        let pipeline = DiagnosisPipeline::new(classifier.clone(), enricher, languages());
        Harness { pipeline, classifier, search, translator }
    }

    #[tokio::test]
    async fn missing_image_makes_no_call() {
        let mut h = harness(Some(json!({ "class": "Wilt Disease" })), false);
        let outcome = h.pipeline.diagnose(None).await;
        assert_eq!(outcome.notice(), Some(&no_image_notice()));
        assert_eq!(h.pipeline.state(), PipelineState::Idle);

        let empty = Some(ImageUpload::new(Vec::new(), "image/png", "x.png"));
        assert!(matches!(h.pipeline.diagnose(empty).await, DiagnosisOutcome::NoImage(_)));
        assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_label_is_rejected_without_enrichment() {
        let mut h = harness(Some(json!({ "class": "Unknown Blight", "confidence": 0.4 })), false);
        let outcome = h.pipeline.diagnose(leaf()).await;

        assert_eq!(h.pipeline.state(), PipelineState::Rejected);
        let notice = outcome.notice().unwrap();
        assert_eq!(notice.title, "Unrecognized Disease");
        assert_eq!(notice.message, UNCLEAR_IMAGE);
        assert_eq!(h.search.calls(), 0);
        assert_eq!(h.translator.calls(), 0);
    }

    #[tokio::test]
    async fn classifier_message_is_shown() {
        let mut h = harness(Some(json!({ "message": "Please upload an image containing a leaf." })), false);
        let outcome = h.pipeline.diagnose(leaf()).await;
        assert_eq!(outcome.notice().unwrap().message, "Please upload an image containing a leaf.");
        assert_eq!(h.pipeline.state(), PipelineState::Rejected);
    }

    #[tokio::test]
    async fn recognized_label_is_enriched() {
        let mut h = harness(Some(json!({ "class": "Small Leaf Disease", "confidence": 98.5 })), false);
        match h.pipeline.diagnose(leaf()).await {
            DiagnosisOutcome::Ready { result, info } => {
                assert_eq!(result.label, DiseaseLabel::SmallLeaf);
                let info = info.unwrap();
                assert_eq!(info.source_text, "Small chlorotic leaves.");
                assert_eq!(info.translated_text, "[ur] Small chlorotic leaves.");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.pipeline.state(), PipelineState::Ready);
        assert_eq!(h.search.calls(), 1);
        assert_eq!(h.translator.calls(), 2);
    }

    #[tokio::test]
    async fn translation_failure_still_reaches_ready() {
        let mut h = harness(Some(json!({ "class": "Leaf Spot Disease", "confidence": 96.0 })), true);
        match h.pipeline.diagnose(leaf()).await {
            DiagnosisOutcome::Ready { info: Some(info), .. } => {
                assert_eq!(info.translated_text, info.source_text);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.pipeline.state(), PipelineState::Ready);
    }

    #[tokio::test]
    async fn search_failure_keeps_the_result() {
        let classifier = ScriptedClassifier::new(Some(json!({ "class": "Healthy Leaf", "confidence": 99.1 })));
        let enricher = Enricher::new(FixedSearch::new(Err("quota")), TagTranslator::new(false), "ur");
        let mut pipeline = DiagnosisPipeline::new(classifier, enricher, languages());

        match pipeline.diagnose(leaf()).await {
            DiagnosisOutcome::Ready { result, info } => {
                assert_eq!(result.label, DiseaseLabel::HealthyLeaf);
                assert!(info.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn transport_failure_ends_in_failed() {
        let mut h = harness(None, false);
        assert!(matches!(h.pipeline.diagnose(leaf()).await, DiagnosisOutcome::Failed(_)));
        assert_eq!(h.pipeline.state(), PipelineState::Failed);
        assert!(h.pipeline.state().is_terminal());
        assert_eq!(h.search.calls(), 0);
    }
}
