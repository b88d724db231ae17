//! Data-access primitives for the users store: accounts, credit grants,
//! and the append-only balance audit log.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use canvass_core::{
    BalanceTransaction, CreditGrant, CreditSource, GrantId, Result, TransactionId,
    TransactionType, User, UserId,
};

use super::helpers::{self, GRANT_COLS, TX_COLS, USER_COLS, grant_from_row, tx_from_row, user_from_row};

pub fn insert_user(
    conn: &Connection,
    id: &UserId,
    email: &str,
    hashed_password: &str,
    full_name: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, email, hashed_password, full_name, created_at)
         VALUES (?, ?, ?, ?, ?)",
        params![id, email, hashed_password, full_name, helpers::now_ms()],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &UserId) -> Result<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE id = ?"),
            params![id],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE email = ?"),
            params![email],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

/// Mark a user verified and active. Returns false for an unknown id.
pub fn set_verified(conn: &Connection, id: &UserId) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE users SET email_verified = 1, is_active = 1, verification_token = NULL
         WHERE id = ?",
        params![id],
    )?;
    Ok(changed > 0)
}

// ---------------------------------------------------------------------------
// Credit grants
// ---------------------------------------------------------------------------

pub fn insert_grant(
    conn: &Connection,
    user_id: &UserId,
    source: CreditSource,
    amount: f64,
    expires_at: Option<DateTime<Utc>>,
) -> Result<GrantId> {
    conn.execute(
        "INSERT INTO credit_grants (user_id, source, original_amount, remaining_amount, expires_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            user_id,
            source.as_str(),
            amount,
            amount,
            helpers::opt_ms(expires_at),
            helpers::now_ms(),
        ],
    )?;
    Ok(GrantId(conn.last_insert_rowid()))
}

/// Non-expired grants with balance left, in debit order: soonest expiry
/// first, never-expiring last, ties broken by age.
pub fn active_grants(
    conn: &Connection,
    user_id: &UserId,
    now: DateTime<Utc>,
) -> Result<Vec<CreditGrant>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {GRANT_COLS} FROM credit_grants
         WHERE user_id = ?
           AND remaining_amount > 0
           AND (expires_at IS NULL OR expires_at > ?)
         ORDER BY expires_at IS NULL, expires_at ASC, created_at ASC, id ASC"
    ))?;
    let rows = stmt.query_map(params![user_id, helpers::ms_from_dt(now)], grant_from_row)?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn set_grant_remaining(conn: &Connection, id: GrantId, remaining: f64) -> Result<()> {
    conn.execute(
        "UPDATE credit_grants SET remaining_amount = ? WHERE id = ?",
        params![remaining, id],
    )?;
    Ok(())
}

pub fn available_balance(conn: &Connection, user_id: &UserId, now: DateTime<Utc>) -> Result<f64> {
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(remaining_amount), 0)
         FROM credit_grants
         WHERE user_id = ?
           AND remaining_amount > 0
           AND (expires_at IS NULL OR expires_at > ?)",
        params![user_id, helpers::ms_from_dt(now)],
        |row| row.get(0),
    )?;
    Ok(total)
}

/// Balance expiring within the window, plus the earliest expiry inside it.
pub fn expiring_soon(
    conn: &Connection,
    user_id: &UserId,
    now: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<(f64, Option<DateTime<Utc>>)> {
    let (amount, at): (f64, Option<i64>) = conn.query_row(
        "SELECT COALESCE(SUM(remaining_amount), 0), MIN(expires_at)
         FROM credit_grants
         WHERE user_id = ?
           AND remaining_amount > 0
           AND expires_at IS NOT NULL
           AND expires_at > ?
           AND expires_at <= ?",
        params![user_id, helpers::ms_from_dt(now), helpers::ms_from_dt(until)],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok((amount, helpers::opt_dt(at)))
}

/// Global count of signup-bonus grants, for the cap check. Callers run this
/// inside the same transaction as the insert it gates.
pub fn count_signup_bonuses(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM credit_grants WHERE source = 'signup_bonus'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ---------------------------------------------------------------------------
// Balance transactions
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
pub fn insert_transaction(
    conn: &Connection,
    user_id: &UserId,
    tx_type: TransactionType,
    amount: f64,
    balance_after: f64,
    reason: &str,
    reference_type: Option<&str>,
    reference_id: Option<&str>,
) -> Result<TransactionId> {
    conn.execute(
        "INSERT INTO balance_transactions
             (user_id, type, amount, balance_after, reason, reference_type, reference_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            user_id,
            tx_type.as_str(),
            amount,
            balance_after,
            reason,
            reference_type,
            reference_id,
            helpers::now_ms(),
        ],
    )?;
    Ok(TransactionId(conn.last_insert_rowid()))
}

/// Page of the audit log, newest first, plus the total row count.
pub fn transactions(
    conn: &Connection,
    user_id: &UserId,
    limit: usize,
    offset: usize,
) -> Result<(Vec<BalanceTransaction>, i64)> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM balance_transactions WHERE user_id = ?",
        params![user_id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {TX_COLS} FROM balance_transactions
         WHERE user_id = ?
         ORDER BY created_at DESC, id DESC
         LIMIT ? OFFSET ?"
    ))?;
    let rows = stmt.query_map(
        params![
            user_id,
            i64::try_from(limit).unwrap_or(i64::MAX),
            i64::try_from(offset).unwrap_or(0),
        ],
        tx_from_row,
    )?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok((out, total))
}
