//! Trained-model state of one recommender for one user.
//!
//! Engines store whatever they need under typed [`ContextKey`]s. A training
//! run works on a [`RecommenderContext::copy`] of the published context and
//! closes it before publishing; readers only ever see closed contexts behind
//! an `Arc`.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Typed key into a [`RecommenderContext`].
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

type ContextValue = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct RecommenderContext {
    values: HashMap<&'static str, ContextValue>,
    ready: bool,
    closed: bool,
    messages: Vec<String>,
}

impl RecommenderContext {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Open copy for the next training run. Values are shared, not cloned;
    /// engines replace values instead of mutating them.
    pub fn copy(&self) -> Self {
        Self {
            values: self.values.clone(),
            ready: self.ready,
            closed: false,
            messages: Vec::new(),
        }
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &ContextKey<T>) -> Option<Arc<T>> {
        self.values
            .get(key.name)
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }

    pub fn put<T: Any + Send + Sync>(&mut self, key: &ContextKey<T>, value: T) -> Result<()> {
        self.check_open()?;
        self.values.insert(key.name, Arc::new(value));
        Ok(())
    }

    pub fn contains<T>(&self, key: &ContextKey<T>) -> bool {
        self.values.contains_key(key.name)
    }

    pub fn mark_ready(&mut self) -> Result<()> {
        self.check_open()?;
        self.ready = true;
        Ok(())
    }

    pub fn is_ready_for_prediction(&self) -> bool {
        self.ready
    }

    /// Freeze the context. Further writes fail.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn log_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Context("Context is closed".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for RecommenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("RecommenderContext")
            .field("keys", &keys)
            .field("ready", &self.ready)
            .field("closed", &self.closed)
            .field("messages", &self.messages.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: ContextKey<Vec<String>> = ContextKey::new("model");
    const COUNT: ContextKey<usize> = ContextKey::new("count");

    #[test]
    fn test_put_and_get_typed_values() {
        let mut ctx = RecommenderContext::empty();
        ctx.put(&MODEL, vec!["a".to_string()]).unwrap();
        ctx.put(&COUNT, 3usize).unwrap();

        assert_eq!(ctx.get(&MODEL).unwrap().as_slice(), ["a".to_string()]);
        assert_eq!(*ctx.get(&COUNT).unwrap(), 3);
        assert!(ctx.contains(&MODEL));
    }

    #[test]
    fn test_wrong_type_returns_none() {
        let mut ctx = RecommenderContext::empty();
        ctx.put(&COUNT, 3usize).unwrap();
        let wrong: ContextKey<String> = ContextKey::new("count");
        assert!(ctx.get(&wrong).is_none());
    }

    #[test]
    fn test_closed_context_rejects_writes() {
        let mut ctx = RecommenderContext::empty();
        ctx.close();
        assert!(ctx.is_closed());
        assert!(matches!(ctx.put(&COUNT, 1usize), Err(Error::Context(_))));
        assert!(ctx.mark_ready().is_err());
    }

    #[test]
    fn test_copy_is_open_and_independent() {
        let mut original = RecommenderContext::empty();
        original.put(&COUNT, 1usize).unwrap();
        original.mark_ready().unwrap();
        original.log_message("trained");
        original.close();

        let mut copy = original.copy();
        assert!(!copy.is_closed());
        assert!(copy.is_ready_for_prediction());
        assert!(copy.messages().is_empty());

        copy.put(&COUNT, 2usize).unwrap();
        assert_eq!(*copy.get(&COUNT).unwrap(), 2);
        assert_eq!(*original.get(&COUNT).unwrap(), 1);
    }
}
