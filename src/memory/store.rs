//! Bounded memory of past steps, retrievable by situation similarity.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::actions::PlanSummary;
use crate::config::EvictionPolicy;

use super::fingerprint::Fingerprint;

/// How a step turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Partial,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Partial => "partial",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One remembered step. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub situation_fingerprint: Fingerprint,
    pub action_taken: PlanSummary,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

/// Memory store errors.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
}

/// Capacity-bounded record store.
///
/// Records are kept oldest first. Writers take the write lock for the whole
/// insert/evict/persist sequence, so a reader never sees a half-applied
/// insert.
pub struct MemoryStore {
    records: RwLock<VecDeque<MemoryRecord>>,
    capacity: usize,
    policy: EvictionPolicy,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// A store that lives only in process memory.
    pub fn in_memory(capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
            policy,
            path: None,
        }
    }

    /// Open a store backed by a JSON-lines file, loading what is there.
    ///
    /// Malformed lines are skipped with a warning. If the file holds more
    /// records than `capacity`, the oldest are dropped and the file rewritten.
    pub fn open(
        path: impl AsRef<Path>,
        capacity: usize,
        policy: EvictionPolicy,
    ) -> Result<Self, MemoryError> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self::in_memory(capacity, policy);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| MemoryError::IoError(e.to_string()))?;
        }

        let mut records = VecDeque::new();
        if path.exists() {
            let content =
                fs::read_to_string(&path).map_err(|e| MemoryError::IoError(e.to_string()))?;
            for (lineno, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<MemoryRecord>(line) {
                    Ok(record) => records.push_back(record),
                    Err(e) => tracing::warn!(
                        "Skipping malformed memory record at {}:{}: {}",
                        path.display(),
                        lineno + 1,
                        e
                    ),
                }
            }
        }

        let overflow = records.len().saturating_sub(store.capacity);
        records.drain(..overflow);
        store.records = RwLock::new(records);
        store.path = Some(path);

        if overflow > 0 {
            let records = store.records.read().unwrap_or_else(|e| e.into_inner());
            store.rewrite(&records)?;
        }

        tracing::info!(
            "Memory store opened with {} records (capacity {})",
            store.len(),
            store.capacity
        );
        Ok(store)
    }

    /// Store a record for a finished step, evicting if over capacity.
    ///
    /// The record is kept in memory even when persisting it fails; the error
    /// is still returned.
    pub fn record(
        &self,
        fingerprint: Fingerprint,
        plan_summary: PlanSummary,
        outcome: Outcome,
    ) -> Result<MemoryRecord, MemoryError> {
        let record = MemoryRecord {
            situation_fingerprint: fingerprint,
            action_taken: plan_summary,
            outcome,
            timestamp: Utc::now(),
        };

        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.push_back(record.clone());

        let mut evicted = 0;
        while records.len() > self.capacity {
            self.evict_one(&mut records);
            evicted += 1;
        }
        if evicted > 0 {
            tracing::debug!("Evicted {} memory record(s) ({:?})", evicted, self.policy);
        }

        if self.path.is_some() {
            if evicted > 0 {
                self.rewrite(&records)?;
            } else {
                self.append(&record)?;
            }
        }
        Ok(record)
    }

    /// Remove exactly one record other than the newest.
    fn evict_one(&self, records: &mut VecDeque<MemoryRecord>) {
        let newest = match records.back() {
            Some(r) => r.situation_fingerprint.clone(),
            None => return,
        };
        let candidates = records.len() - 1;
        if candidates == 0 {
            return;
        }

        let victim = match self.policy {
            EvictionPolicy::Oldest => 0,
            EvictionPolicy::Relevance => {
                let mut victim = 0;
                let mut lowest = f32::INFINITY;
                for (i, r) in records.iter().take(candidates).enumerate() {
                    let sim = r.situation_fingerprint.similarity(&newest);
                    // strict: ties keep the oldest
                    if sim < lowest {
                        lowest = sim;
                        victim = i;
                    }
                }
                victim
            }
        };
        records.remove(victim);
    }

    /// Up to `k` records ordered by similarity, most similar first; among
    /// equal scores the newer record comes first.
    pub fn retrieve(&self, fingerprint: &Fingerprint, k: usize) -> Vec<MemoryRecord> {
        if k == 0 {
            return Vec::new();
        }
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut scored: Vec<(f32, usize)> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.situation_fingerprint.similarity(fingerprint), i))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));
        scored
            .into_iter()
            .take(k)
            .map(|(_, i)| records[i].clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All records, oldest first.
    pub fn snapshot(&self) -> Vec<MemoryRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    fn append(&self, record: &MemoryRecord) -> Result<(), MemoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let line =
            serde_json::to_string(record).map_err(|e| MemoryError::SerializeError(e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| MemoryError::IoError(e.to_string()))?;
        writeln!(file, "{}", line).map_err(|e| MemoryError::IoError(e.to_string()))
    }

    fn rewrite(&self, records: &VecDeque<MemoryRecord>) -> Result<(), MemoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut content = String::new();
        for record in records {
            content.push_str(
                &serde_json::to_string(record)
                    .map_err(|e| MemoryError::SerializeError(e.to_string()))?,
            );
            content.push('\n');
        }
        let tmp = path.with_extension("jsonl.tmp");
        fs::write(&tmp, content).map_err(|e| MemoryError::IoError(e.to_string()))?;
        fs::rename(&tmp, path).map_err(|e| MemoryError::IoError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::PlanSource;
    use crate::memory::HashFingerprinter;
    use std::env;

    fn summary(label: &str) -> PlanSummary {
        PlanSummary {
            source: PlanSource::Model,
            capabilities: vec!["tap".into()],
            confidence: 0.8,
            rationale: label.into(),
        }
    }

    fn fp(text: &str) -> Fingerprint {
        HashFingerprinter.fingerprint_text(text)
    }

    #[test]
    fn test_retrieve_empty_store() {
        let store = MemoryStore::in_memory(10, EvictionPolicy::Oldest);
        assert!(store.retrieve(&fp("anything"), 3).is_empty());
    }

    #[test]
    fn test_retrieve_orders_by_similarity() {
        let store = MemoryStore::in_memory(10, EvictionPolicy::Oldest);
        store.record(fp("whatsapp chats ana luis"), summary("chats"), Outcome::Success).unwrap();
        store.record(fp("settings wifi bluetooth"), summary("settings"), Outcome::Failure).unwrap();
        store.record(fp("whatsapp chats ana"), summary("chats2"), Outcome::Partial).unwrap();

        let hits = store.retrieve(&fp("whatsapp chats ana luis"), 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].action_taken.rationale, "chats");
        assert_eq!(hits[1].action_taken.rationale, "chats2");
        // retrieval leaves the store untouched
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_oldest_eviction_removes_exactly_one() {
        let store = MemoryStore::in_memory(3, EvictionPolicy::Oldest);
        for i in 0..4 {
            store.record(fp(&format!("screen {}", i)), summary(&i.to_string()), Outcome::Success).unwrap();
        }
        let kept: Vec<String> = store.snapshot().into_iter().map(|r| r.action_taken.rationale).collect();
        assert_eq!(kept, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_relevance_eviction_drops_least_similar() {
        let store = MemoryStore::in_memory(2, EvictionPolicy::Relevance);
        store.record(fp("music albums shuffle"), summary("music"), Outcome::Success).unwrap();
        store.record(fp("whatsapp chats ana"), summary("chats"), Outcome::Success).unwrap();
        store.record(fp("whatsapp chats ana luis"), summary("chats2"), Outcome::Success).unwrap();

        let kept: Vec<String> = store.snapshot().into_iter().map(|r| r.action_taken.rationale).collect();
        assert_eq!(kept, vec!["chats", "chats2"]);
    }

    #[test]
    fn test_persistence_round_trip_enforces_capacity() {
        let path = env::temp_dir().join(format!("pilot_memory_{}.jsonl", uuid::Uuid::new_v4()));

        {
            let store = MemoryStore::open(&path, 10, EvictionPolicy::Oldest).unwrap();
            for i in 0..5 {
                store.record(fp(&format!("screen {}", i)), summary(&i.to_string()), Outcome::Success).unwrap();
            }
        }

        let reopened = MemoryStore::open(&path, 3, EvictionPolicy::Oldest).unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.snapshot()[0].action_taken.rationale, "2");
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 3);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_open_skips_malformed_lines() {
        let path = env::temp_dir().join(format!("pilot_memory_{}.jsonl", uuid::Uuid::new_v4()));
        fs::write(&path, "not json\n\n").unwrap();
        let store = MemoryStore::open(&path, 10, EvictionPolicy::Oldest).unwrap();
        assert!(store.is_empty());
        let _ = fs::remove_file(&path);
    }
}
