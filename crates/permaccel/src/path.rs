//! Recorded validation paths.
//!
//! Each optimized request leaves a [`ValidationPath`] describing the route it
//! took through the engine, keyed by its canonical request id.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::cache::CacheTier;
use crate::cache::keys::path_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStep {
    CacheLookup,
    Predict,
    Index,
    Batch,
    Parallel,
    Authoritative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationPath {
    pub path_id: String,
    pub steps: Vec<PathStep>,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Accumulates steps while a request is in flight.
#[derive(Debug)]
pub struct PathTrace {
    steps: Vec<PathStep>,
    started: Instant,
}

impl PathTrace {
    pub fn start() -> Self {
        Self {
            steps: Vec::with_capacity(4),
            started: Instant::now(),
        }
    }

    pub fn push(&mut self, step: PathStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn finish(self, path_id: String, confidence: Option<f64>) -> ValidationPath {
        ValidationPath {
            path_id,
            steps: self.steps,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            confidence,
        }
    }
}

/// In-process path records mirrored to the cache tier.
#[derive(Clone)]
pub struct ValidationPathCache {
    entries: Arc<DashMap<String, ValidationPath>>,
    tier: Arc<CacheTier>,
    ttl: Duration,
}

impl ValidationPathCache {
    pub fn new(tier: Arc<CacheTier>, ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            tier,
            ttl,
        }
    }

    pub async fn record(&self, path: ValidationPath) {
        self.tier.put(&path_key(&path.path_id), &path, self.ttl).await;
        self.entries.insert(path.path_id.clone(), path);
    }

    pub fn get(&self, path_id: &str) -> Option<ValidationPath> {
        self.entries.get(path_id).map(|entry| entry.clone())
    }

    pub fn path_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn evict(&self, path_id: &str) -> bool {
        self.entries.remove(path_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryDistributedCache;

    #[tokio::test]
    async fn test_record_and_mirror() {
        let tier = Arc::new(CacheTier::new(
            Arc::new(InMemoryDistributedCache::new()),
            Duration::from_secs(60),
        ));
        let cache = ValidationPathCache::new(tier.clone(), Duration::from_secs(1800));

        let mut trace = PathTrace::start();
        trace.push(PathStep::CacheLookup);
        trace.push(PathStep::Parallel);
        cache.record(trace.finish("42:doc:read".into(), None)).await;

        let recorded = cache.get("42:doc:read").unwrap();
        assert_eq!(recorded.steps, vec![PathStep::CacheLookup, PathStep::Parallel]);
        assert!(tier.exists(&path_key("42:doc:read")).await);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_step_serialization() {
        let json = serde_json::to_string(&vec![PathStep::CacheLookup, PathStep::Batch]).unwrap();
        assert_eq!(json, r#"["cache_lookup","batch"]"#);
    }
}
