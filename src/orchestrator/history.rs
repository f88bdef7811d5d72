use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One generation or repair attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    #[serde(skip)]
    pub html: String,
    /// `None` until validated. An attempt whose validation crashed stays
    /// `None` and ranks as 0.
    pub score: Option<f64>,
    pub label: String,
    pub timestamp_ms: u64,
}

impl HistoryEntry {
    pub fn effective_score(&self) -> f64 {
        self.score.unwrap_or(0.0)
    }
}

/// Append-only record of every candidate seen in one run.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate and return its index.
    pub fn push(&mut self, html: impl Into<String>, label: impl Into<String>) -> usize {
        self.entries.push(HistoryEntry {
            html: html.into(),
            score: None,
            label: label.into(),
            timestamp_ms: now_ms(),
        });
        self.entries.len() - 1
    }

    /// Set the score of an entry once. Later calls are ignored, so a recorded
    /// score never changes.
    pub fn record_score(&mut self, index: usize, score: f64) -> bool {
        match self.entries.get_mut(index) {
            Some(entry) if entry.score.is_none() => {
                entry.score = Some(score);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Index of the highest-scoring scored entry. Ties go to the earliest.
    pub fn best(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, entry) in self.entries.iter().enumerate() {
            let Some(score) = entry.score else { continue };
            if best.is_none_or(|(_, b)| score > b) {
                best = Some((i, score));
            }
        }
        best.map(|(i, _)| i)
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best().and_then(|i| self.entries[i].score)
    }
}
