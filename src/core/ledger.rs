// src/core/ledger.rs — Budget ledger: gates and accounts every model call
//
// Every root turn and every sub-call is reserved here before the network call is
// made, and recorded here with the provider-reported usage once it returns.
// Reservations only gate; spent totals only ever contain actual usage.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cost::{calculate_cost, estimate_cost};
use crate::infra::config::RlmConfig;
use crate::provider::TokenUsage;

/// Which kind of model call a reservation or usage record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Root,
    Sub,
}

impl std::fmt::Display for CallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallKind::Root => write!(f, "root"),
            CallKind::Sub => write!(f, "sub"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BudgetError {
    #[error("Cost ceiling exceeded: ${projected:.4} projected against a ${limit:.2} limit")]
    CostCeiling { projected: f64, limit: f64 },

    #[error("Token ceiling exceeded: {projected} tokens projected against a {limit} limit")]
    TokenCeiling { projected: u64, limit: u64 },

    #[error("Recursion depth exceeded: depth {depth} already at max {max}")]
    DepthExceeded { depth: u32, max: u32 },
}

/// Hard and soft ceilings the ledger enforces.
#[derive(Debug, Clone)]
pub struct BudgetLimits {
    pub max_usd: f64,
    pub max_tokens: u64,
    pub max_depth: u32,
    pub soft_limit_fraction: f64,
}

impl From<&RlmConfig> for BudgetLimits {
    fn from(cfg: &RlmConfig) -> Self {
        Self {
            max_usd: cfg.max_session_budget_usd,
            max_tokens: cfg.max_tokens_per_session,
            max_depth: cfg.max_subcall_depth,
            soft_limit_fraction: cfg.soft_limit_fraction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoftLimitDimension {
    Cost,
    Tokens,
}

/// Raised once per dimension when projected usage crosses the soft fraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftLimitWarning {
    pub dimension: SoftLimitDimension,
    pub used: f64,
    pub limit: f64,
    pub fraction: f64,
}

impl SoftLimitWarning {
    /// Steering text handed to the model at the next turn boundary.
    pub fn message(&self) -> String {
        let pct = if self.limit > 0.0 {
            self.used / self.limit * 100.0
        } else {
            100.0
        };
        match self.dimension {
            SoftLimitDimension::Cost => format!(
                "[BUDGET WARNING] {:.0}% of the ${:.2} budget is committed. \
                 Stop exploring and call FINAL(...) with your best answer soon.",
                pct, self.limit
            ),
            SoftLimitDimension::Tokens => format!(
                "[BUDGET WARNING] {:.0}% of the {} token budget is committed. \
                 Stop exploring and call FINAL(...) with your best answer soon.",
                pct, self.limit as u64
            ),
        }
    }
}

/// Read-only snapshot of the ledger. Costs keep full precision; only `Display` rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSummary {
    pub elapsed_secs: f64,
    pub root_calls: u32,
    pub sub_calls: u32,
    pub root_cost_usd: f64,
    pub sub_cost_usd: f64,
    pub total_cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub current_depth: u32,
    pub max_depth_reached: u32,
    pub max_budget_usd: f64,
    pub budget_used_pct: f64,
}

impl std::fmt::Display for BudgetSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "${:.2} of ${:.2} ({:.1}%) · {} root / {} sub calls · {} tokens · {:.1}s",
            self.total_cost_usd,
            self.max_budget_usd,
            self.budget_used_pct,
            self.root_calls,
            self.sub_calls,
            self.total_tokens,
            self.elapsed_secs,
        )
    }
}

#[derive(Debug, Clone)]
struct Reservation {
    kind: CallKind,
    cost_usd: f64,
    tokens: u64,
}

type SoftLimitCallback = Box<dyn Fn(SoftLimitWarning) + Send + Sync>;

/// The only owner of budget state. All mutation goes through its methods.
pub struct BudgetLedger {
    limits: BudgetLimits,
    started: Instant,
    elapsed: Duration,
    root_calls: u32,
    sub_calls: u32,
    root_cost_usd: f64,
    sub_cost_usd: f64,
    input_tokens: u64,
    output_tokens: u64,
    current_depth: u32,
    max_depth_reached: u32,
    outstanding: Vec<Reservation>,
    warned_cost: bool,
    warned_tokens: bool,
    on_soft_limit: Option<SoftLimitCallback>,
}

/// Ledger shared between the turn loop and the sub-query tool.
pub type SharedLedger = Arc<Mutex<BudgetLedger>>;

/// Lock a shared ledger. A poisoned lock still holds consistent totals
/// (every mutation is a handful of plain assignments), so recover it.
pub fn lock_ledger(ledger: &SharedLedger) -> MutexGuard<'_, BudgetLedger> {
    ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BudgetLedger {
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            started: Instant::now(),
            elapsed: Duration::ZERO,
            root_calls: 0,
            sub_calls: 0,
            root_cost_usd: 0.0,
            sub_cost_usd: 0.0,
            input_tokens: 0,
            output_tokens: 0,
            current_depth: 0,
            max_depth_reached: 0,
            outstanding: Vec::new(),
            warned_cost: false,
            warned_tokens: false,
            on_soft_limit: None,
        }
    }

    pub fn from_config(cfg: &RlmConfig) -> Self {
        Self::new(BudgetLimits::from(cfg))
    }

    /// Register the non-blocking soft-limit callback.
    pub fn with_soft_limit_callback(
        mut self,
        cb: impl Fn(SoftLimitWarning) + Send + Sync + 'static,
    ) -> Self {
        self.on_soft_limit = Some(Box::new(cb));
        self
    }

    pub fn into_shared(self) -> SharedLedger {
        Arc::new(Mutex::new(self))
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    /// Gate a call before it is made. On success an outstanding reservation is
    /// held until `record_usage` or `cancel_reservation` releases it.
    pub fn check_and_reserve(
        &mut self,
        model: &str,
        est_input_tokens: u32,
        est_output_tokens: u32,
        kind: CallKind,
    ) -> Result<(), BudgetError> {
        self.touch();
        let est_cost = estimate_cost(model, est_input_tokens, est_output_tokens);
        let est_tokens = est_input_tokens as u64 + est_output_tokens as u64;

        let projected_cost = self.total_cost() + self.outstanding_cost() + est_cost;
        if projected_cost > self.limits.max_usd {
            tracing::warn!(
                kind = %kind,
                model,
                projected_cost,
                limit = self.limits.max_usd,
                "Reservation rejected by cost ceiling"
            );
            return Err(BudgetError::CostCeiling {
                projected: projected_cost,
                limit: self.limits.max_usd,
            });
        }

        let projected_tokens = self.total_tokens() + self.outstanding_tokens() + est_tokens;
        if projected_tokens > self.limits.max_tokens {
            tracing::warn!(
                kind = %kind,
                model,
                projected_tokens,
                limit = self.limits.max_tokens,
                "Reservation rejected by token ceiling"
            );
            return Err(BudgetError::TokenCeiling {
                projected: projected_tokens,
                limit: self.limits.max_tokens,
            });
        }

        self.outstanding.push(Reservation {
            kind,
            cost_usd: est_cost,
            tokens: est_tokens,
        });
        tracing::debug!(kind = %kind, model, est_cost, est_tokens, "Reserved budget");

        self.check_soft_limits(projected_cost, projected_tokens);
        Ok(())
    }

    /// Apply provider-reported usage. Returns the cost that was charged.
    pub fn record_usage(&mut self, model: &str, usage: &TokenUsage, kind: CallKind) -> f64 {
        self.touch();
        self.release(kind);

        let cost = calculate_cost(model, usage);
        match kind {
            CallKind::Root => {
                self.root_calls += 1;
                self.root_cost_usd += cost;
            }
            CallKind::Sub => {
                self.sub_calls += 1;
                self.sub_cost_usd += cost;
            }
        }
        self.input_tokens += usage.input_tokens as u64;
        self.output_tokens += usage.output_tokens as u64;

        tracing::debug!(
            kind = %kind,
            model,
            cost,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Recorded usage"
        );

        let projected_cost = self.total_cost() + self.outstanding_cost();
        let projected_tokens = self.total_tokens() + self.outstanding_tokens();
        self.check_soft_limits(projected_cost, projected_tokens);
        cost
    }

    /// Release a reservation whose call never produced usage.
    pub fn cancel_reservation(&mut self, kind: CallKind) {
        self.touch();
        self.release(kind);
    }

    /// Enter one level of recursive delegation.
    pub fn enter_subcall(&mut self) -> Result<(), BudgetError> {
        self.touch();
        if self.current_depth >= self.limits.max_depth {
            return Err(BudgetError::DepthExceeded {
                depth: self.current_depth,
                max: self.limits.max_depth,
            });
        }
        self.current_depth += 1;
        self.max_depth_reached = self.max_depth_reached.max(self.current_depth);
        Ok(())
    }

    /// Leave one level of recursive delegation. Never goes below zero.
    pub fn exit_subcall(&mut self) {
        self.touch();
        self.current_depth = self.current_depth.saturating_sub(1);
    }

    /// Sample the clock without any other activity.
    pub fn tick(&mut self) {
        self.touch();
    }

    pub fn current_depth(&self) -> u32 {
        self.current_depth
    }

    pub fn total_cost(&self) -> f64 {
        self.root_cost_usd + self.sub_cost_usd
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Pure read of every running total.
    pub fn get_summary(&self) -> BudgetSummary {
        let total_cost_usd = self.total_cost();
        let budget_used_pct = if self.limits.max_usd > 0.0 {
            total_cost_usd / self.limits.max_usd * 100.0
        } else {
            0.0
        };
        BudgetSummary {
            elapsed_secs: self.elapsed.as_secs_f64(),
            root_calls: self.root_calls,
            sub_calls: self.sub_calls,
            root_cost_usd: self.root_cost_usd,
            sub_cost_usd: self.sub_cost_usd,
            total_cost_usd,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.total_tokens(),
            current_depth: self.current_depth,
            max_depth_reached: self.max_depth_reached,
            max_budget_usd: self.limits.max_usd,
            budget_used_pct,
        }
    }

    // ─── Internals ──────────────────────────────────────────────

    fn touch(&mut self) {
        self.elapsed = self.started.elapsed();
    }

    fn release(&mut self, kind: CallKind) {
        if let Some(pos) = self.outstanding.iter().position(|r| r.kind == kind) {
            self.outstanding.remove(pos);
        }
    }

    fn outstanding_cost(&self) -> f64 {
        self.outstanding.iter().map(|r| r.cost_usd).sum()
    }

    fn outstanding_tokens(&self) -> u64 {
        self.outstanding.iter().map(|r| r.tokens).sum()
    }

    fn check_soft_limits(&mut self, projected_cost: f64, projected_tokens: u64) {
        let fraction = self.limits.soft_limit_fraction;

        if !self.warned_cost && projected_cost >= self.limits.max_usd * fraction {
            self.warned_cost = true;
            self.emit_soft_limit(SoftLimitWarning {
                dimension: SoftLimitDimension::Cost,
                used: projected_cost,
                limit: self.limits.max_usd,
                fraction,
            });
        }

        let token_threshold = self.limits.max_tokens as f64 * fraction;
        if !self.warned_tokens && projected_tokens as f64 >= token_threshold {
            self.warned_tokens = true;
            self.emit_soft_limit(SoftLimitWarning {
                dimension: SoftLimitDimension::Tokens,
                used: projected_tokens as f64,
                limit: self.limits.max_tokens as f64,
                fraction,
            });
        }
    }

    fn emit_soft_limit(&self, warning: SoftLimitWarning) {
        tracing::info!(
            dimension = ?warning.dimension,
            used = warning.used,
            limit = warning.limit,
            "Soft budget limit crossed"
        );
        if let Some(ref cb) = self.on_soft_limit {
            cb(warning);
        }
    }
}

/// Scoped recursion-depth acquisition. Exits on drop, including on error paths.
pub struct SubcallGuard {
    ledger: SharedLedger,
}

impl SubcallGuard {
    pub fn enter(ledger: &SharedLedger) -> Result<Self, BudgetError> {
        lock_ledger(ledger).enter_subcall()?;
        Ok(Self {
            ledger: Arc::clone(ledger),
        })
    }
}

impl Drop for SubcallGuard {
    fn drop(&mut self) {
        lock_ledger(&self.ledger).exit_subcall();
    }
}
