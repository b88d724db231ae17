//! The charge engine: make users pay for fresh evaluations atomically and
//! idempotently, with planned partiality when the balance does not cover
//! the whole batch.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};

use canvass_core::{EvaluationId, Result, UserId};
use canvass_store::{Database, evals, users};
use chrono::Utc;

use crate::balance::{balance_in, debit_in};
use crate::pricing::PricingStrategy;

/// Guards the affordable-count division against float representation noise
/// right at an exact-affordability boundary.
const AFFORD_EPSILON: f64 = 1e-9;

/// Outcome of a charge. `skipped` holds both already-consumed and
/// unaffordable ids, in input order; a rerun with identical input charges
/// nothing and skips everything.
#[derive(Debug, Clone)]
pub struct ChargeResult {
    pub charged: Vec<EvaluationId>,
    pub skipped: Vec<EvaluationId>,
    pub total_charged: f64,
    pub remaining_balance: f64,
}

/// Dry-run of a charge: same partitioning, no writes.
#[derive(Debug, Clone)]
pub struct ChargePreview {
    pub fresh_count: usize,
    pub already_consumed_count: usize,
    pub estimated_cost: f64,
    pub user_balance: f64,
    pub affordable_count: usize,
    pub needs_top_up: bool,
}

pub struct ChargeService {
    db: Arc<Database>,
    pricing: Arc<dyn PricingStrategy>,
}

impl std::fmt::Debug for ChargeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChargeService")
            .field("pricing", &self.pricing)
            .finish_non_exhaustive()
    }
}

impl ChargeService {
    pub fn new(db: Arc<Database>, pricing: Arc<dyn PricingStrategy>) -> Self {
        Self { db, pricing }
    }

    /// Charge the user for the fresh subset of `evaluation_ids`.
    ///
    /// Already-consumed ids are skipped for free; of the rest, only as many
    /// as the balance affords are charged (input order decides which). The
    /// debit and all consumption inserts commit in one transaction, so a
    /// duplicate-consumption race rolls the whole charge back rather than
    /// billing for rows that were not recorded.
    #[instrument(skip(self, evaluation_ids), fields(user = %user_id, count = evaluation_ids.len()))]
    pub async fn charge(
        &self,
        user_id: &UserId,
        evaluation_ids: &[EvaluationId],
    ) -> Result<ChargeResult> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        let result = self.charge_in(&tx, user_id, evaluation_ids)?;
        tx.commit()?;
        Ok(result)
    }

    /// Charge inside the caller's transaction. Report generation uses this
    /// so the snapshot and its charge commit or roll back together.
    pub fn charge_in(
        &self,
        tx: &rusqlite::Connection,
        user_id: &UserId,
        evaluation_ids: &[EvaluationId],
    ) -> Result<ChargeResult> {
        let now = Utc::now();

        if evaluation_ids.is_empty() {
            let available = users::available_balance(tx, user_id, now)?;
            return Ok(empty_result(available));
        }

        let already_consumed = evals::consumed_ids(tx, user_id, evaluation_ids)?;
        let candidates: Vec<EvaluationId> = evaluation_ids
            .iter()
            .filter(|id| !already_consumed.contains(id))
            .copied()
            .collect();

        let available = users::available_balance(tx, user_id, now)?;

        if candidates.is_empty() {
            return Ok(ChargeResult {
                charged: Vec::new(),
                skipped: evaluation_ids.to_vec(),
                total_charged: 0.0,
                remaining_balance: available,
            });
        }

        let unit_price = self.pricing.unit_price(user_id);
        let affordable = affordable_count(available, unit_price, candidates.len());

        let to_charge = &candidates[..affordable];
        let cannot_afford: HashSet<EvaluationId> =
            candidates[affordable..].iter().copied().collect();

        let skipped: Vec<EvaluationId> = evaluation_ids
            .iter()
            .filter(|id| already_consumed.contains(id) || cannot_afford.contains(id))
            .copied()
            .collect();

        if to_charge.is_empty() {
            return Ok(ChargeResult {
                charged: Vec::new(),
                skipped,
                total_charged: 0.0,
                remaining_balance: available,
            });
        }

        let total = self.pricing.total(user_id, to_charge.len());
        let reference_id = to_charge
            .iter()
            .take(10)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let record = debit_in(
            tx,
            user_id,
            total,
            &format!("Loaded {} evaluations", to_charge.len()),
            Some("evaluation_batch"),
            Some(&reference_id),
        )?;

        for &id in to_charge {
            evals::insert_consumed(tx, user_id, id, unit_price)?;
        }

        info!(
            user = %user_id,
            charged = to_charge.len(),
            skipped = skipped.len(),
            total,
            "charged for evaluations"
        );

        Ok(ChargeResult {
            charged: to_charge.to_vec(),
            skipped,
            total_charged: total,
            remaining_balance: record.balance_after,
        })
    }

    /// What a charge with these inputs would do, without doing it.
    #[instrument(skip(self, evaluation_ids), fields(user = %user_id))]
    pub async fn preview(
        &self,
        user_id: &UserId,
        evaluation_ids: &[EvaluationId],
    ) -> Result<ChargePreview> {
        let now = Utc::now();
        let conn = self.db.conn();

        let balance = balance_in(&conn, user_id, now)?;

        if evaluation_ids.is_empty() {
            return Ok(ChargePreview {
                fresh_count: 0,
                already_consumed_count: 0,
                estimated_cost: 0.0,
                user_balance: balance.available,
                affordable_count: 0,
                needs_top_up: false,
            });
        }

        let already_consumed = evals::consumed_ids(&conn, user_id, evaluation_ids)?;
        drop(conn);

        let fresh_count = evaluation_ids.len() - already_consumed.len();
        let unit_price = self.pricing.unit_price(user_id);
        let affordable = affordable_count(balance.available, unit_price, fresh_count);

        Ok(ChargePreview {
            fresh_count,
            already_consumed_count: already_consumed.len(),
            estimated_cost: self.pricing.total(user_id, fresh_count),
            user_balance: balance.available,
            affordable_count: affordable,
            needs_top_up: fresh_count > affordable,
        })
    }

    pub fn unit_price(&self, user_id: &UserId) -> f64 {
        self.pricing.unit_price(user_id)
    }
}

fn empty_result(available: f64) -> ChargeResult {
    ChargeResult {
        charged: Vec::new(),
        skipped: Vec::new(),
        total_charged: 0.0,
        remaining_balance: available,
    }
}

/// How many of `candidates` the balance covers. A zero (or free) unit price
/// affords everything.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn affordable_count(available: f64, unit_price: f64, candidates: usize) -> usize {
    if unit_price <= 0.0 {
        return candidates;
    }
    let by_balance = ((available / unit_price) + AFFORD_EPSILON).floor().max(0.0) as usize;
    by_balance.min(candidates)
}
