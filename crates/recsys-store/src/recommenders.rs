//! In-memory recommender configuration, contexts and active lists.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use recsys_core::{
    Error, EvaluatedRecommender, Recommender, RecommenderContext, RecommenderRepository, Result,
};

#[derive(Debug, Default)]
struct RecommenderState {
    recommenders: BTreeMap<i64, Recommender>,
    contexts: HashMap<(String, i64), Arc<RecommenderContext>>,
    /// (user, layer) -> active list
    active: HashMap<(String, i64), Vec<EvaluatedRecommender>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryRecommenderRepository {
    inner: Arc<RwLock<RecommenderState>>,
}

impl MemoryRecommenderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a recommender configuration.
    pub async fn save_recommender(&self, recommender: Recommender) {
        self.inner
            .write()
            .await
            .recommenders
            .insert(recommender.id, recommender);
    }

    /// Delete a recommender together with its contexts.
    pub async fn delete_recommender(&self, recommender_id: i64) -> Result<()> {
        let mut state = self.inner.write().await;
        state
            .recommenders
            .remove(&recommender_id)
            .ok_or(Error::RecommenderNotFound(recommender_id))?;
        state.contexts.retain(|(_, id), _| *id != recommender_id);
        Ok(())
    }
}

#[async_trait]
impl RecommenderRepository for MemoryRecommenderRepository {
    async fn list_recommenders(&self, layer_id: i64) -> Result<Vec<Recommender>> {
        Ok(self
            .inner
            .read()
            .await
            .recommenders
            .values()
            .filter(|r| r.layer.id == layer_id)
            .cloned()
            .collect())
    }

    async fn get_recommender(&self, recommender_id: i64) -> Result<Recommender> {
        self.inner
            .read()
            .await
            .recommenders
            .get(&recommender_id)
            .cloned()
            .ok_or(Error::RecommenderNotFound(recommender_id))
    }

    async fn get_context(
        &self,
        user: &str,
        recommender_id: i64,
    ) -> Result<Option<Arc<RecommenderContext>>> {
        Ok(self
            .inner
            .read()
            .await
            .contexts
            .get(&(user.to_string(), recommender_id))
            .cloned())
    }

    async fn put_context(
        &self,
        user: &str,
        recommender_id: i64,
        context: Arc<RecommenderContext>,
    ) -> Result<()> {
        if !context.is_closed() {
            return Err(Error::Context(format!(
                "Refusing to publish open context for recommender {}",
                recommender_id
            )));
        }
        self.inner
            .write()
            .await
            .contexts
            .insert((user.to_string(), recommender_id), context);
        Ok(())
    }

    async fn get_active_recommenders(
        &self,
        user: &str,
        layer_id: i64,
    ) -> Result<Vec<EvaluatedRecommender>> {
        Ok(self
            .inner
            .read()
            .await
            .active
            .get(&(user.to_string(), layer_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn set_active_recommenders(
        &self,
        user: &str,
        layer_id: i64,
        recommenders: Vec<EvaluatedRecommender>,
    ) -> Result<()> {
        self.inner
            .write()
            .await
            .active
            .insert((user.to_string(), layer_id), recommenders);
        Ok(())
    }

    async fn has_active_recommenders(&self, user: &str, project_id: i64) -> Result<bool> {
        let state = self.inner.read().await;
        Ok(state.active.iter().any(|((u, _), list)| {
            u == user
                && list
                    .iter()
                    .any(|e| e.active && e.recommender.project_id == project_id)
        }))
    }
}
