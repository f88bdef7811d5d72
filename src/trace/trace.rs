use serde::Serialize;

use crate::orchestrator::history::now_ms;

/// One orchestrator transition, written as a JSONL line.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub timestamp_ms: u64,
    pub step: u64,

    pub state: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_count: Option<usize>,

    pub decision: Option<String>,
    pub reason: Option<String>,
}

impl TraceEvent {
    pub fn now(step: u64, state: impl std::fmt::Debug) -> Self {
        Self {
            timestamp_ms: now_ms(),
            step,
            state: format!("{:?}", state),
            history_index: None,
            label: None,
            score: None,
            error_count: None,
            decision: None,
            reason: None,
        }
    }

    pub fn with_entry(mut self, index: usize, label: &str) -> Self {
        self.history_index = Some(index);
        self.label = Some(label.to_string());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_errors(mut self, count: usize) -> Self {
        self.error_count = Some(count);
        self
    }

    pub fn with_decision(mut self, decision: impl ToString) -> Self {
        self.decision = Some(decision.to_string());
        self
    }

    pub fn with_reason(mut self, reason: impl ToString) -> Self {
        self.reason = Some(reason.to_string());
        self
    }
}
