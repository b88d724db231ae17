//! Tracking which evaluations a user has paid for.
//!
//! The `(user_id, evaluation_id)` unique index is the idempotency primitive
//! of the whole charge engine: a concurrent double-charge surfaces as a
//! catchable `DuplicateConsumption`, never as a double bill.

use std::collections::HashSet;
use std::sync::Arc;

use canvass_core::{EvaluationId, Result, UserId};
use canvass_store::{Database, evals};

#[derive(Debug, Clone)]
pub struct ConsumptionService {
    db: Arc<Database>,
}

impl ConsumptionService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn is_consumed(&self, user_id: &UserId, evaluation_id: EvaluationId) -> Result<bool> {
        let conn = self.db.conn();
        let consumed = evals::consumed_ids(&conn, user_id, &[evaluation_id])?;
        Ok(consumed.contains(&evaluation_id))
    }

    /// Which of the given evaluations the user has already consumed.
    pub async fn consumed_ids(
        &self,
        user_id: &UserId,
        evaluation_ids: &[EvaluationId],
    ) -> Result<HashSet<EvaluationId>> {
        let conn = self.db.conn();
        evals::consumed_ids(&conn, user_id, evaluation_ids)
    }

    /// Record a consumption outside a batch charge. Direct callers must
    /// handle `DuplicateConsumption` themselves.
    pub async fn record(
        &self,
        user_id: &UserId,
        evaluation_id: EvaluationId,
        amount_charged: f64,
    ) -> Result<i64> {
        let conn = self.db.conn();
        evals::insert_consumed(&conn, user_id, evaluation_id, amount_charged)
    }
}
