//! In-memory annotation schema and suggestion materialization.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use recsys_core::{
    Anchor, AnnotationLayer, AnnotationSchemaService, AnnotationSuggestion, Cas, Error, LayerKind,
    Offset, Position, Result,
};

#[derive(Debug, Clone, Default)]
pub struct MemorySchemaService {
    layers: Arc<RwLock<HashMap<i64, AnnotationLayer>>>,
}

impl MemorySchemaService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_layer(&self, layer: AnnotationLayer) {
        self.layers.write().await.insert(layer.id, layer);
    }

    pub async fn set_layer_enabled(&self, layer_id: i64, enabled: bool) -> Result<()> {
        let mut layers = self.layers.write().await;
        let layer = layers.get_mut(&layer_id).ok_or(Error::LayerNotFound(layer_id))?;
        layer.enabled = enabled;
        Ok(())
    }
}

/// Id of the span on `layer` exactly at `offset`, creating it if missing.
fn span_at(cas: &mut Cas, layer: &str, offset: Offset) -> Result<i32> {
    if let Some(existing) = cas.spans_at(layer, offset).next() {
        return Ok(existing.id);
    }
    cas.add_span(layer, offset, BTreeMap::new())
}

fn set_feature(cas: &mut Cas, id: i32, feature: &str, label: Option<&str>) -> Result<i32> {
    let mut features = cas
        .get(id)
        .map(|a| a.features.clone())
        .ok_or_else(|| Error::Cas(format!("Annotation {} vanished", id)))?;
    match label {
        Some(label) => features.insert(feature.to_string(), label.to_string()),
        None => features.remove(feature),
    };
    cas.set_features(id, features)?;
    Ok(id)
}

#[async_trait]
impl AnnotationSchemaService for MemorySchemaService {
    async fn list_layers(&self, project_id: i64) -> Result<Vec<AnnotationLayer>> {
        let mut layers: Vec<AnnotationLayer> = self
            .layers
            .read()
            .await
            .values()
            .filter(|l| l.project_id == project_id)
            .cloned()
            .collect();
        layers.sort_by_key(|l| l.id);
        Ok(layers)
    }

    async fn get_layer(&self, layer_id: i64) -> Result<AnnotationLayer> {
        self.layers
            .read()
            .await
            .get(&layer_id)
            .cloned()
            .ok_or(Error::LayerNotFound(layer_id))
    }

    async fn materialize(
        &self,
        cas: &mut Cas,
        layer: &AnnotationLayer,
        feature: &str,
        suggestion: &AnnotationSuggestion,
        label: Option<&str>,
    ) -> Result<i32> {
        match (layer.kind, suggestion.position) {
            (LayerKind::Span, Position::Span(offset)) => {
                // An empty span on the position is reused before creating one.
                let target = cas
                    .spans_at(&layer.name, offset)
                    .find(|a| a.feature(feature).is_none())
                    .map(|a| a.id);
                let id = match target {
                    Some(id) => id,
                    None => cas.add_span(&layer.name, offset, BTreeMap::new())?,
                };
                set_feature(cas, id, feature, label)
            }
            (LayerKind::Relation, Position::Relation { source, target }) => {
                let attach = layer.attach_layer.as_deref().ok_or_else(|| {
                    Error::InvalidInput(format!("Relation layer '{}' has no attach layer", layer.name))
                })?;
                let source_id = span_at(cas, attach, source)?;
                let target_id = span_at(cas, attach, target)?;
                let existing = cas
                    .select(&layer.name)
                    .find(|a| {
                        a.anchor
                            == Anchor::Relation {
                                source: source_id,
                                target: target_id,
                            }
                            && a.feature(feature).is_none()
                    })
                    .map(|a| a.id);
                let id = match existing {
                    Some(id) => id,
                    None => cas.add_relation(&layer.name, source_id, target_id, BTreeMap::new())?,
                };
                set_feature(cas, id, feature, label)
            }
            (kind, position) => Err(Error::InvalidInput(format!(
                "Cannot place {:?} suggestion at {} on {:?} layer '{}'",
                position.kind(),
                position,
                kind,
                layer.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span_suggestion(label: &str) -> AnnotationSuggestion {
        AnnotationSuggestion::new(
            1,
            "rec",
            1,
            "value",
            "doc1",
            Position::span(0, 4),
            Some(label.to_string()),
            0.9,
        )
    }

    #[tokio::test]
    async fn test_materialize_span_creates_annotation() {
        let schema = MemorySchemaService::new();
        let layer = AnnotationLayer::span(1, 1, "Entity");
        let mut cas = Cas::new("doc1", "John lives in Berlin");

        let s = span_suggestion("PER");
        let id = schema
            .materialize(&mut cas, &layer, "value", &s, Some("PER"))
            .await
            .unwrap();

        assert_eq!(cas.get(id).unwrap().feature("value"), Some("PER"));
        assert!(cas.contains_annotation("Entity", &s.position, "value", Some("PER")));
    }

    #[tokio::test]
    async fn test_materialize_relation_creates_endpoints() {
        let schema = MemorySchemaService::new();
        let layer = AnnotationLayer::relation(2, 1, "Rel", "Entity");
        let mut cas = Cas::new("doc1", "John lives in Berlin");
        let position = Position::relation(Offset::new(0, 4), Offset::new(14, 20));
        let s = AnnotationSuggestion::new(
            1,
            "rec",
            2,
            "value",
            "doc1",
            position,
            Some("livesIn".to_string()),
            0.9,
        );

        schema
            .materialize(&mut cas, &layer, "value", &s, Some("livesIn"))
            .await
            .unwrap();

        assert_eq!(cas.select("Entity").count(), 2);
        assert!(cas.contains_annotation("Rel", &position, "value", Some("livesIn")));
    }

    #[tokio::test]
    async fn test_materialize_kind_mismatch_fails() {
        let schema = MemorySchemaService::new();
        let layer = AnnotationLayer::relation(2, 1, "Rel", "Entity");
        let mut cas = Cas::new("doc1", "John lives in Berlin");
        let result = schema
            .materialize(&mut cas, &layer, "value", &span_suggestion("PER"), Some("PER"))
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_list_layers_by_project() {
        let schema = MemorySchemaService::new();
        schema.add_layer(AnnotationLayer::span(2, 1, "B")).await;
        schema.add_layer(AnnotationLayer::span(1, 1, "A")).await;
        schema.add_layer(AnnotationLayer::span(3, 2, "C")).await;

        let layers = schema.list_layers(1).await.unwrap();
        assert_eq!(layers.iter().map(|l| l.id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(matches!(schema.get_layer(9).await, Err(Error::LayerNotFound(9))));
    }
}
