//! In-memory vector index over chunk embeddings.
//!
//! Vectors are grouped into one shard per document. Each shard sits behind its
//! own lock, so a search sees a document's chunks either before or after a
//! single write, and writers for different documents do not contend. The
//! shard registry has a separate lock that is only held long enough to clone
//! shard handles. No lock is held across an `.await`.


use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::embeddings::{blob_to_vec, check_finite};
use crate::{RagError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_id: i64,
    pub document_id: String,
    pub score: f32,
}

#[derive(Debug, Default)]
struct Shard {
    vectors: BTreeMap<i64, Vec<f32>>,
}

type ShardHandle = Arc<RwLock<Shard>>;

#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    model_id: String,
    shards: RwLock<HashMap<String, ShardHandle>>,
    owners: RwLock<HashMap<i64, String>>,
}

impl VectorIndex {
    #[inline]
    pub fn new(model_id: &str, dimension: usize) -> Self {
        Self {
            dimension,
            model_id: model_id.to_string(),
            shards: RwLock::new(HashMap::new()),
            owners: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the index from persisted embeddings produced by `model_id`
    #[inline]
    pub async fn load(database: &Database, model_id: &str, dimension: usize) -> Result<Self> {
        let index = Self::new(model_id, dimension);
        let stored = database.list_embeddings().await?;

        let mut skipped = 0usize;
        for row in stored {
            if row.model_id != model_id || row.dimension != dimension as i64 {
                skipped += 1;
                continue;
            }
            index.upsert(
                &row.external_id,
                row.chunk_id,
                blob_to_vec(&row.vector),
                model_id,
            )?;
        }

        if skipped > 0 {
            warn!(
                "Skipped {} stored embeddings from other models; re-ingest those documents to search them with {}",
                skipped, model_id
            );
        }
        info!(
            "Loaded {} vectors across {} documents into the index",
            index.len(),
            index.document_count()
        );

        Ok(index)
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.owners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn document_count(&self) -> usize {
        self.shards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Insert or replace the vector for `chunk_id` under `document_id`
    #[inline]
    pub fn upsert(
        &self,
        document_id: &str,
        chunk_id: i64,
        vector: Vec<f32>,
        model_id: &str,
    ) -> Result<()> {
        if model_id != self.model_id {
            return Err(RagError::ModelMismatch {
                expected: self.model_id.clone(),
                actual: model_id.to_string(),
            });
        }
        if vector.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        check_finite(&vector)?;

        let previous_owner = self
            .owners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chunk_id, document_id.to_string());

        if let Some(previous) = previous_owner.filter(|owner| owner != document_id) {
            if let Some(shard) = self.shard(&previous) {
                shard
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .vectors
                    .remove(&chunk_id);
            }
        }

        let shard = self.shard_or_insert(document_id);
        shard
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .vectors
            .insert(chunk_id, vector);

        debug!("Indexed chunk {} for document {}", chunk_id, document_id);
        Ok(())
    }

    /// Remove a single chunk; returns whether it was present
    #[inline]
    pub fn delete(&self, chunk_id: i64) -> bool {
        let owner = self
            .owners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&chunk_id);

        let Some(owner) = owner else {
            return false;
        };

        if let Some(shard) = self.shard(&owner) {
            shard
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .vectors
                .remove(&chunk_id);
        }
        true
    }

    /// Remove every chunk of a document; returns how many were removed
    #[inline]
    pub fn delete_document(&self, document_id: &str) -> usize {
        let removed = self
            .shards
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(document_id);

        let Some(shard) = removed else {
            return 0;
        };

        let chunk_ids: Vec<i64> = shard
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .vectors
            .keys()
            .copied()
            .collect();

        let mut owners = self.owners.write().unwrap_or_else(PoisonError::into_inner);
        for chunk_id in &chunk_ids {
            if owners.get(chunk_id).is_some_and(|owner| owner == document_id) {
                owners.remove(chunk_id);
            }
        }

        debug!(
            "Removed {} chunks of document {} from the index",
            chunk_ids.len(),
            document_id
        );
        chunk_ids.len()
    }

    /// Top `k` chunks by cosine similarity, best first, ties broken by ascending chunk id.
    ///
    /// With a filter only chunks of the listed documents are candidates; an
    /// empty filter matches nothing.
    #[inline]
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&[String]>,
    ) -> Result<Vec<ScoredChunk>> {
        if query.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        check_finite(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let candidates: Vec<(String, ShardHandle)> = {
            let shards = self.shards.read().unwrap_or_else(PoisonError::into_inner);
            match filter {
                Some(document_ids) => document_ids
                    .iter()
                    .unique()
                    .filter_map(|id| shards.get(id).map(|shard| (id.clone(), Arc::clone(shard))))
                    .collect(),
                None => shards
                    .iter()
                    .map(|(id, shard)| (id.clone(), Arc::clone(shard)))
                    .collect(),
            }
        };

        let query_norm = norm(query);
        let mut scored = Vec::new();
        for (document_id, shard) in candidates {
            let shard = shard.read().unwrap_or_else(PoisonError::into_inner);
            for (chunk_id, vector) in &shard.vectors {
                scored.push(ScoredChunk {
                    chunk_id: *chunk_id,
                    document_id: document_id.clone(),
                    score: cosine_similarity(query, query_norm, vector),
                });
            }
        }

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(k);

        debug!("Search returned {} of at most {} chunks", scored.len(), k);
        Ok(scored)
    }

    fn shard(&self, document_id: &str) -> Option<ShardHandle> {
        self.shards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document_id)
            .map(Arc::clone)
    }

    fn shard_or_insert(&self, document_id: &str) -> ShardHandle {
        if let Some(shard) = self.shard(document_id) {
            return shard;
        }
        let mut shards = self.shards.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(shards.entry(document_id.to_string()).or_default())
    }
}

// Accumulated in f64 so large finite components cannot overflow to NaN
fn norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt()
}

/// Cosine similarity with a precomputed norm for `query`; zero vectors score 0
fn cosine_similarity(query: &[f32], query_norm: f64, vector: &[f32]) -> f32 {
    let vector_norm = norm(vector);
    if query_norm < f64::EPSILON || vector_norm < f64::EPSILON {
        return 0.0;
    }
    let dot: f64 = query
        .iter()
        .zip(vector)
        .map(|(&a, &b)| f64::from(a) * f64::from(b))
        .sum();
    (dot / (query_norm * vector_norm)).clamp(-1.0, 1.0) as f32
}
