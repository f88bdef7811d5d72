use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    Allow,
    Block(&'static str),
}

/// Bounds on the surgical loop: a wall-clock deadline and an attempt count.
/// Checked between attempts only, never mid-validation.
#[derive(Debug, Clone)]
pub struct RepairBudget {
    deadline: Instant,
    pub attempts_remaining: u32,
}

impl RepairBudget {
    pub fn new(global_timeout: Duration, max_attempts: u32) -> Self {
        Self {
            deadline: Instant::now() + global_timeout,
            attempts_remaining: max_attempts,
        }
    }

    pub fn timed_out(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Spend one attempt. Returns the budget left afterwards.
    pub fn consume(self) -> Self {
        Self {
            attempts_remaining: self.attempts_remaining.saturating_sub(1),
            ..self
        }
    }
}

pub fn check_budget(budget: &RepairBudget) -> BudgetDecision {
    // ---- Time budget ----
    if budget.timed_out() {
        return BudgetDecision::Block("global_timeout");
    }

    // ---- Attempt budget ----
    if budget.attempts_remaining == 0 {
        return BudgetDecision::Block("attempts_exhausted");
    }

    BudgetDecision::Allow
}
