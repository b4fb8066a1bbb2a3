//! Cost-budget middleware.
//!
//! Policy: optimistic execution, pessimistic accounting. The operator runs
//! whenever any budget is left; its cost is only known afterwards and is
//! charged then. A call whose cost does not fit is reported as
//! `OpError::BudgetExceeded` even though its side effects already happened.
//! Callers needing strict admission control must estimate cost up front.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use repokeeper_core::{OpError, OpInput, OpOutput};
use tower::Layer;

use super::Middleware;
use crate::context::OpContext;
use crate::operator::{BoxedOperator, Operator};

/// Computes the cost of a successful call from its output.
pub type CostFn = Arc<dyn Fn(&OpOutput) -> f64 + Send + Sync>;

/// Cost taken from the first metric named `name` (0 when absent).
#[must_use]
pub fn metric_cost(name: &'static str) -> CostFn {
    Arc::new(move |output: &OpOutput| output.metric(name).map_or(0.0, |m| m.value))
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Ledger {
    max: f64,
    used: f64,
}

/// Mutex-guarded cost ledger with a hard ceiling.
///
/// `used <= max` holds after every successful charge.
#[derive(Debug)]
pub struct Budget {
    ledger: Mutex<Ledger>,
}

impl Budget {
    #[must_use]
    pub fn new(max: f64) -> Self {
        Self {
            ledger: Mutex::new(Ledger { max, used: 0.0 }),
        }
    }

    #[must_use]
    pub fn max(&self) -> f64 {
        self.ledger.lock().max
    }

    #[must_use]
    pub fn used(&self) -> f64 {
        self.ledger.lock().used
    }

    #[must_use]
    pub fn left(&self) -> f64 {
        let ledger = self.ledger.lock();
        ledger.max - ledger.used
    }

    /// Record `cost` if it fits. Returns `false`, leaving the ledger untouched,
    /// when it would push `used` past `max`.
    pub fn charge(&self, cost: f64) -> bool {
        let mut ledger = self.ledger.lock();
        if ledger.used + cost > ledger.max {
            return false;
        }
        ledger.used += cost;
        true
    }
}

// ---------------------------------------------------------------------------
// BudgetLayer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct BudgetLayer {
    budget: Arc<Budget>,
    cost_fn: CostFn,
}

impl BudgetLayer {
    #[must_use]
    pub fn new(budget: Arc<Budget>, cost_fn: CostFn) -> Self {
        Self { budget, cost_fn }
    }
}

impl Layer<BoxedOperator> for BudgetLayer {
    type Service = BoxedOperator;

    fn layer(&self, inner: BoxedOperator) -> BoxedOperator {
        Arc::new(BudgetOperator {
            inner,
            budget: Arc::clone(&self.budget),
            cost_fn: Arc::clone(&self.cost_fn),
        })
    }
}

/// Charge every successful call's cost against `budget`.
pub fn with_budget(budget: Arc<Budget>, cost_fn: CostFn) -> Middleware {
    Arc::new(BudgetLayer::new(budget, cost_fn))
}

// ---------------------------------------------------------------------------
// BudgetOperator
// ---------------------------------------------------------------------------

struct BudgetOperator {
    inner: BoxedOperator,
    budget: Arc<Budget>,
    cost_fn: CostFn,
}

#[async_trait]
impl Operator for BudgetOperator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> &str {
        self.inner.version()
    }

    async fn run(&self, ctx: &OpContext, input: &OpInput) -> Result<OpOutput, OpError> {
        if self.budget.left() <= 0.0 {
            tracing::warn!(operator = %self.inner.name(), "budget exhausted, call rejected");
            return Err(OpError::BudgetExceeded);
        }

        let output = self.inner.run(ctx, input).await?;

        let cost = (self.cost_fn)(&output);
        if cost > 0.0 && !self.budget.charge(cost) {
            tracing::warn!(
                operator = %self.inner.name(),
                cost = cost,
                left = self.budget.left(),
                "call cost exceeds remaining budget"
            );
            return Err(OpError::BudgetExceeded);
        }

        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
