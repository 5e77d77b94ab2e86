//! Minimal annotation document ("CAS") used by the pipeline.
//!
//! Holds the document text and a flat list of span and relation annotations.
//! Only what the pipeline inspects is modelled: which layers carry
//! annotations, what sits at a given position, and adding an accepted
//! suggestion.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::suggestion::{Offset, Position};

/// Anchoring of a CAS annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Anchor {
    Span(Offset),
    Relation { source: i32, target: i32 },
}

/// One annotation stored in a CAS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: i32,
    /// Layer type name.
    pub layer: String,
    pub anchor: Anchor,
    pub features: BTreeMap<String, String>,
}

impl Annotation {
    pub fn feature(&self, name: &str) -> Option<&str> {
        self.features.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cas {
    pub document_name: String,
    pub text: String,
    annotations: Vec<Annotation>,
    next_id: i32,
}

impl Cas {
    pub fn new(document_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            document_name: document_name.into(),
            text: text.into(),
            annotations: Vec::new(),
            next_id: 1,
        }
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Annotations on the given layer.
    pub fn select<'a>(&'a self, layer: &'a str) -> impl Iterator<Item = &'a Annotation> + 'a {
        self.annotations.iter().filter(move |a| a.layer == layer)
    }

    pub fn has_annotations_on(&self, layer: &str) -> bool {
        self.select(layer).next().is_some()
    }

    pub fn get(&self, id: i32) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.id == id)
    }

    /// Text covered by `offset`, if it lies within the document.
    pub fn covered_text(&self, offset: Offset) -> Option<&str> {
        let (begin, end) = (usize::try_from(offset.begin).ok()?, usize::try_from(offset.end).ok()?);
        self.text.get(begin..end)
    }

    fn check_offset(&self, offset: Offset) -> Result<()> {
        if offset.begin < 0 || offset.end < offset.begin || offset.end as usize > self.text.len() {
            return Err(Error::Cas(format!(
                "Offset [{}, {}) outside document '{}' of length {}",
                offset.begin,
                offset.end,
                self.document_name,
                self.text.len()
            )));
        }
        Ok(())
    }

    /// Add a span annotation, returning its id.
    pub fn add_span(
        &mut self,
        layer: &str,
        offset: Offset,
        features: BTreeMap<String, String>,
    ) -> Result<i32> {
        self.check_offset(offset)?;
        Ok(self.push(layer, Anchor::Span(offset), features))
    }

    /// Add a relation between two existing annotations, returning its id.
    pub fn add_relation(
        &mut self,
        layer: &str,
        source: i32,
        target: i32,
        features: BTreeMap<String, String>,
    ) -> Result<i32> {
        for endpoint in [source, target] {
            if self.get(endpoint).is_none() {
                return Err(Error::Cas(format!(
                    "Relation endpoint {} does not exist in '{}'",
                    endpoint, self.document_name
                )));
            }
        }
        Ok(self.push(layer, Anchor::Relation { source, target }, features))
    }

    /// Replace the feature values of an existing annotation.
    pub fn set_features(&mut self, id: i32, features: BTreeMap<String, String>) -> Result<()> {
        let annotation = self
            .annotations
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| Error::Cas(format!("No annotation {} in '{}'", id, self.document_name)))?;
        annotation.features = features;
        Ok(())
    }

    fn push(&mut self, layer: &str, anchor: Anchor, features: BTreeMap<String, String>) -> i32 {
        let id = self.next_id;
        self.next_id += 1;
        self.annotations.push(Annotation {
            id,
            layer: layer.to_string(),
            anchor,
            features,
        });
        id
    }

    /// Span annotations on `layer` exactly covering `offset`.
    pub fn spans_at<'a>(
        &'a self,
        layer: &'a str,
        offset: Offset,
    ) -> impl Iterator<Item = &'a Annotation> + 'a {
        self.select(layer)
            .filter(move |a| matches!(a.anchor, Anchor::Span(o) if o == offset))
    }

    /// Position of an annotation as a suggestion would describe it.
    pub fn position_of(&self, annotation: &Annotation) -> Option<Position> {
        match annotation.anchor {
            Anchor::Span(offset) => Some(Position::Span(offset)),
            Anchor::Relation { source, target } => {
                let source = self.span_offset(source)?;
                let target = self.span_offset(target)?;
                Some(Position::relation(source, target))
            }
        }
    }

    fn span_offset(&self, id: i32) -> Option<Offset> {
        match self.get(id)?.anchor {
            Anchor::Span(offset) => Some(offset),
            Anchor::Relation { .. } => None,
        }
    }

    /// Whether `layer` already holds an annotation at `position` whose
    /// `feature` equals `label`.
    pub fn contains_annotation(
        &self,
        layer: &str,
        position: &Position,
        feature: &str,
        label: Option<&str>,
    ) -> bool {
        self.select(layer).any(|a| {
            self.position_of(a).as_ref() == Some(position) && a.feature(feature) == label
        })
    }
}
