//! User balances backed by credit grants.
//!
//! A debit consumes grants FIFO-by-expiry (soonest expiry first, never-
//! expiring last) and appends a `BalanceTransaction` carrying the post-
//! balance. Grants are drained, never deleted, so the audit trail survives.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use std::sync::Arc;
use tracing::{debug, instrument};

use canvass_core::{
    BalanceInfo, BalanceTransaction, CreditSource, Error, Result, TransactionId, TransactionType,
    UserId,
};
use canvass_store::{Database, users};

const EXPIRING_SOON_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct BalanceService {
    db: Arc<Database>,
}

impl BalanceService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Available balance: the sum of non-expired grants with credit left,
    /// plus how much of it expires within the next week.
    pub async fn balance(&self, user_id: &UserId) -> Result<BalanceInfo> {
        let now = Utc::now();
        let conn = self.db.conn();
        balance_in(&conn, user_id, now)
    }

    pub async fn can_afford(&self, user_id: &UserId, amount: f64) -> Result<bool> {
        Ok(self.balance(user_id).await?.available >= amount)
    }

    /// Deduct `amount`, consuming grants in FIFO-by-expiry order. Fails with
    /// `InsufficientBalance` when the locked grant view holds less than
    /// required; the high-level charge engine never triggers that because it
    /// pre-computes affordability.
    #[instrument(skip(self), fields(user = %user_id))]
    pub async fn debit(
        &self,
        user_id: &UserId,
        amount: f64,
        reason: &str,
        reference_type: Option<&str>,
        reference_id: Option<&str>,
    ) -> Result<BalanceTransaction> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        let record = debit_in(&tx, user_id, amount, reason, reference_type, reference_id)?;
        tx.commit()?;
        Ok(record)
    }

    /// Add balance by creating a new grant; `source` restricts provenance.
    #[instrument(skip(self), fields(user = %user_id, source = source.as_str()))]
    pub async fn credit(
        &self,
        user_id: &UserId,
        amount: f64,
        source: CreditSource,
        expires_at: Option<DateTime<Utc>>,
        reason: &str,
        reference_type: Option<&str>,
        reference_id: Option<&str>,
    ) -> Result<BalanceTransaction> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        let record = credit_in(
            &tx,
            user_id,
            amount,
            source,
            expires_at,
            reason,
            reference_type,
            reference_id,
        )?;
        tx.commit()?;
        Ok(record)
    }

    /// Page of the append-only audit log, newest first.
    pub async fn transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<BalanceTransaction>, i64)> {
        let conn = self.db.conn();
        users::transactions(&conn, user_id, limit, offset)
    }
}

pub(crate) fn balance_in(
    conn: &Connection,
    user_id: &UserId,
    now: DateTime<Utc>,
) -> Result<BalanceInfo> {
    let available = users::available_balance(conn, user_id, now)?;
    let (expiring_soon, expiring_at) =
        users::expiring_soon(conn, user_id, now, now + Duration::days(EXPIRING_SOON_DAYS))?;

    Ok(BalanceInfo {
        user_id: user_id.clone(),
        available,
        expiring_soon,
        expiring_at,
    })
}

/// Debit inside the caller's transaction, so charges can pair it with
/// consumption inserts atomically.
pub(crate) fn debit_in(
    conn: &Connection,
    user_id: &UserId,
    amount: f64,
    reason: &str,
    reference_type: Option<&str>,
    reference_id: Option<&str>,
) -> Result<BalanceTransaction> {
    if amount <= 0.0 {
        return Err(Error::NonPositiveAmount(amount));
    }

    let now = Utc::now();
    let grants = users::active_grants(conn, user_id, now)?;
    let total_available: f64 = grants.iter().map(|g| g.remaining_amount).sum();

    if total_available < amount {
        return Err(Error::InsufficientBalance {
            required: amount,
            available: total_available,
        });
    }

    let mut remaining_to_debit = amount;
    for grant in &grants {
        if remaining_to_debit <= 0.0 {
            break;
        }
        let take = grant.remaining_amount.min(remaining_to_debit);
        users::set_grant_remaining(conn, grant.id, grant.remaining_amount - take)?;
        remaining_to_debit -= take;
    }

    let balance_after = total_available - amount;
    let id = users::insert_transaction(
        conn,
        user_id,
        TransactionType::Debit,
        amount,
        balance_after,
        reason,
        reference_type,
        reference_id,
    )?;

    debug!(user = %user_id, amount, balance_after, "debited balance");
    Ok(record(
        id,
        user_id,
        TransactionType::Debit,
        amount,
        balance_after,
        reason,
        reference_type,
        reference_id,
        now,
    ))
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn credit_in(
    conn: &Connection,
    user_id: &UserId,
    amount: f64,
    source: CreditSource,
    expires_at: Option<DateTime<Utc>>,
    reason: &str,
    reference_type: Option<&str>,
    reference_id: Option<&str>,
) -> Result<BalanceTransaction> {
    if amount <= 0.0 {
        return Err(Error::NonPositiveAmount(amount));
    }

    let now = Utc::now();
    let balance_after = users::available_balance(conn, user_id, now)? + amount;

    users::insert_grant(conn, user_id, source, amount, expires_at)?;
    let id = users::insert_transaction(
        conn,
        user_id,
        TransactionType::Credit,
        amount,
        balance_after,
        reason,
        reference_type,
        reference_id,
    )?;

    debug!(user = %user_id, amount, balance_after, "credited balance");
    Ok(record(
        id,
        user_id,
        TransactionType::Credit,
        amount,
        balance_after,
        reason,
        reference_type,
        reference_id,
        now,
    ))
}

#[allow(clippy::too_many_arguments)]
fn record(
    id: TransactionId,
    user_id: &UserId,
    tx_type: TransactionType,
    amount: f64,
    balance_after: f64,
    reason: &str,
    reference_type: Option<&str>,
    reference_id: Option<&str>,
    created_at: DateTime<Utc>,
) -> BalanceTransaction {
    BalanceTransaction {
        id,
        user_id: user_id.clone(),
        tx_type,
        amount,
        balance_after,
        reason: reason.to_owned(),
        reference_type: reference_type.map(str::to_owned),
        reference_id: reference_id.map(str::to_owned),
        created_at,
    }
}
