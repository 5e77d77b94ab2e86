//! Scriptable recommendation engine for deterministic testing.
//!
//! ```rust,ignore
//! use recsys_store::mock::{MockEngineFactory, MockOperation};
//!
//! let factory = MockEngineFactory::new("mock")
//!     .with_f1(0.75)
//!     .with_prediction(PredictedAnnotation::new(Position::span(0, 4), Some("PER".into()), 0.9));
//!
//! registry.register(Arc::new(factory.clone()));
//! // ... run the pipeline ...
//! assert_eq!(factory.call_count(MockOperation::Train), 1);
//! ```
//!
//! Evaluation partitions the annotations found on the recommender's layer
//! with the given splitter, so undersized pools come back skipped. Otherwise
//! it reports a two-label confusion matrix whose macro F1 equals the
//! configured value.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use recsys_core::{
    AnnotationFeature, AnnotationLayer, Cas, ConfusionMatrix, ContextKey, DataSplitter, Error,
    EvaluationResult, PredictedAnnotation, RecommendationEngine, RecommendationEngineFactory,
    Recommender, RecommenderContext, Result, TrainingCapability,
};

/// Number of documents seen by the last training run, stored in the context.
pub const TRAINED_DOCUMENTS: ContextKey<usize> = ContextKey::new("mock.trained_documents");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    Train,
    Predict,
    Evaluate,
    Build,
}

#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: MockOperation,
    pub recommender_id: i64,
    /// Documents handed to the call (1 for predict).
    pub documents: usize,
}

#[derive(Debug, Clone)]
struct MockConfig {
    id: String,
    capability: TrainingCapability,
    evaluable: bool,
    accepts: bool,
    f1: f64,
    predictions: Vec<PredictedAnnotation>,
    document_predictions: HashMap<String, Vec<PredictedAnnotation>>,
    failing: HashSet<MockOperation>,
    panicking: HashSet<MockOperation>,
    delays: HashMap<MockOperation, Duration>,
    reports_set_sizes: bool,
}

#[derive(Clone)]
pub struct MockEngineFactory {
    config: Arc<MockConfig>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockEngineFactory {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            config: Arc::new(MockConfig {
                id: id.into(),
                capability: TrainingCapability::TrainingSupported,
                evaluable: true,
                accepts: true,
                f1: 1.0,
                predictions: Vec::new(),
                document_predictions: HashMap::new(),
                failing: HashSet::new(),
                panicking: HashSet::new(),
                delays: HashMap::new(),
                reports_set_sizes: true,
            }),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_capability(mut self, capability: TrainingCapability) -> Self {
        Arc::make_mut(&mut self.config).capability = capability;
        self
    }

    pub fn with_evaluable(mut self, evaluable: bool) -> Self {
        Arc::make_mut(&mut self.config).evaluable = evaluable;
        self
    }

    /// Whether the factory accepts any layer/feature pairing.
    pub fn with_accepts(mut self, accepts: bool) -> Self {
        Arc::make_mut(&mut self.config).accepts = accepts;
        self
    }

    /// Macro F1 reported by evaluation, in steps of 0.01.
    pub fn with_f1(mut self, f1: f64) -> Self {
        Arc::make_mut(&mut self.config).f1 = f1.clamp(0.0, 1.0);
        self
    }

    /// Predicted for every document.
    pub fn with_prediction(mut self, prediction: PredictedAnnotation) -> Self {
        Arc::make_mut(&mut self.config).predictions.push(prediction);
        self
    }

    /// Predicted for one document only.
    pub fn with_document_prediction(
        mut self,
        document_name: impl Into<String>,
        prediction: PredictedAnnotation,
    ) -> Self {
        Arc::make_mut(&mut self.config)
            .document_predictions
            .entry(document_name.into())
            .or_default()
            .push(prediction);
        self
    }

    /// Make `operation` return an engine error.
    pub fn failing_on(mut self, operation: MockOperation) -> Self {
        Arc::make_mut(&mut self.config).failing.insert(operation);
        self
    }

    /// Make `operation` panic.
    pub fn panicking_on(mut self, operation: MockOperation) -> Self {
        Arc::make_mut(&mut self.config).panicking.insert(operation);
        self
    }

    /// Block the calling thread for `delay` whenever `operation` runs.
    pub fn with_delay(mut self, operation: MockOperation, delay: Duration) -> Self {
        Arc::make_mut(&mut self.config).delays.insert(operation, delay);
        self
    }

    /// Leave training/test set sizes at zero in evaluation results.
    pub fn without_set_sizes(mut self) -> Self {
        Arc::make_mut(&mut self.config).reports_set_sizes = false;
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, operation: MockOperation) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }
}

fn lock(calls: &Mutex<Vec<MockCall>>) -> std::sync::MutexGuard<'_, Vec<MockCall>> {
    calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecommendationEngineFactory for MockEngineFactory {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        "Mock engine"
    }

    fn accepts(&self, _layer: &AnnotationLayer, _feature: &AnnotationFeature) -> bool {
        self.config.accepts
    }

    fn is_evaluable(&self) -> bool {
        self.config.evaluable
    }

    fn build(&self, recommender: &Recommender) -> Result<Box<dyn RecommendationEngine>> {
        let engine = MockEngine {
            recommender: recommender.clone(),
            config: Arc::clone(&self.config),
            calls: Arc::clone(&self.calls),
        };
        engine.record(MockOperation::Build, 0)?;
        Ok(Box::new(engine))
    }
}

struct MockEngine {
    recommender: Recommender,
    config: Arc<MockConfig>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockEngine {
    fn record(&self, operation: MockOperation, documents: usize) -> Result<()> {
        lock(&self.calls).push(MockCall {
            operation,
            recommender_id: self.recommender.id,
            documents,
        });
        if let Some(delay) = self.config.delays.get(&operation) {
            std::thread::sleep(*delay);
        }
        if self.config.panicking.contains(&operation) {
            panic!("mock engine panicked during {:?}", operation);
        }
        if self.config.failing.contains(&operation) {
            return Err(Error::Engine(format!("mock engine failed during {:?}", operation)));
        }
        Ok(())
    }

    /// One instance per annotation on the recommender's layer.
    fn instances<'a>(&'a self, documents: &'a [Cas]) -> Vec<&'a str> {
        let layer = self.recommender.layer.name.as_str();
        let feature = self.recommender.feature.name.as_str();
        documents
            .iter()
            .flat_map(|cas| cas.select(layer))
            .map(|a| a.feature(feature).unwrap_or_default())
            .collect()
    }
}

impl RecommendationEngine for MockEngine {
    fn recommender(&self) -> &Recommender {
        &self.recommender
    }

    fn training_capability(&self) -> TrainingCapability {
        self.config.capability
    }

    fn train(&self, context: &mut RecommenderContext, documents: &[Cas]) -> Result<()> {
        self.record(MockOperation::Train, documents.len())?;
        context.put(&TRAINED_DOCUMENTS, documents.len())?;
        context.log_message(format!("Trained on {} documents", documents.len()));
        Ok(())
    }

    fn predict(&self, _context: &RecommenderContext, cas: &Cas) -> Result<Vec<PredictedAnnotation>> {
        self.record(MockOperation::Predict, 1)?;
        let mut predictions = self.config.predictions.clone();
        if let Some(extra) = self.config.document_predictions.get(&cas.document_name) {
            predictions.extend(extra.iter().cloned());
        }
        Ok(predictions)
    }

    fn evaluate(&self, documents: &[Cas], splitter: &DataSplitter) -> Result<EvaluationResult> {
        self.record(MockOperation::Evaluate, documents.len())?;
        let instances = self.instances(documents);
        let split = match splitter.split(&instances) {
            Ok(split) => split,
            Err(skipped) => return Ok(skipped.into_evaluation_result()),
        };

        let correct = (self.config.f1 * 100.0).round() as u64;
        let confused = 100 - correct;
        let mut confusion = ConfusionMatrix::new();
        confusion.add("A", "A", correct);
        confusion.add("A", "B", confused);
        confusion.add("B", "B", correct);
        confusion.add("B", "A", confused);

        let ratio = if instances.is_empty() {
            0.0
        } else {
            split.training.len() as f64 / instances.len() as f64
        };
        let result = EvaluationResult::new(confusion).with_training_data_ratio(ratio);
        Ok(if self.config.reports_set_sizes {
            result.with_set_sizes(split.training.len(), split.test.len())
        } else {
            result
        })
    }

    fn estimate_sample_count(&self, documents: &[Cas]) -> usize {
        self.instances(documents).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recsys_core::{PercentageBasedSplitter, Position};

    fn recommender() -> Recommender {
        Recommender::new(
            1,
            "mock",
            AnnotationLayer::span(1, 1, "Entity"),
            AnnotationFeature::new(1, 1, "value"),
            "mock",
        )
    }

    fn annotated(count: usize) -> Cas {
        let text = "w ".repeat(count);
        let mut cas = Cas::new("doc", text);
        for i in 0..count {
            let begin = (i * 2) as i32;
            cas.add_span(
                "Entity",
                recsys_core::Offset::new(begin, begin + 1),
                [("value".to_string(), "A".to_string())].into(),
            )
            .unwrap();
        }
        cas
    }

    #[test]
    fn test_evaluate_reports_configured_f1() {
        let factory = MockEngineFactory::new("mock").with_f1(0.75);
        let engine = factory.build(&recommender()).unwrap();
        let splitter = DataSplitter::Percentage(PercentageBasedSplitter::new(0.8, 10));

        let result = engine.evaluate(&[annotated(60)], &splitter).unwrap();
        assert!(!result.is_skipped());
        assert!((result.f1_score() - 0.75).abs() < 1e-9);
        assert_eq!(result.training_set_size, 48);
        assert_eq!(result.test_set_size, 12);
    }

    #[test]
    fn test_evaluate_skips_small_pool() {
        let factory = MockEngineFactory::new("mock");
        let engine = factory.build(&recommender()).unwrap();
        let splitter = DataSplitter::Percentage(PercentageBasedSplitter::new(0.8, 10));

        let result = engine.evaluate(&[annotated(25)], &splitter).unwrap();
        assert!(result.is_skipped());
    }

    #[test]
    fn test_failures_and_call_log() {
        let factory = MockEngineFactory::new("mock").failing_on(MockOperation::Predict);
        let engine = factory.build(&recommender()).unwrap();
        let ctx = RecommenderContext::empty();

        assert!(matches!(
            engine.predict(&ctx, &Cas::new("doc", "text")),
            Err(Error::Engine(_))
        ));
        assert_eq!(factory.call_count(MockOperation::Build), 1);
        assert_eq!(factory.call_count(MockOperation::Predict), 1);
    }

    #[test]
    fn test_document_specific_predictions() {
        let factory = MockEngineFactory::new("mock")
            .with_prediction(PredictedAnnotation::new(Position::span(0, 1), None, 0.5))
            .with_document_prediction(
                "special",
                PredictedAnnotation::new(Position::span(2, 3), None, 0.5),
            );
        let engine = factory.build(&recommender()).unwrap();
        let ctx = RecommenderContext::empty();

        assert_eq!(engine.predict(&ctx, &Cas::new("plain", "abc")).unwrap().len(), 1);
        assert_eq!(engine.predict(&ctx, &Cas::new("special", "abc")).unwrap().len(), 2);
    }
}
