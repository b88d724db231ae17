//! Signup verification and the capped signup bonus.
//!
//! The bonus cap is global: once `max_signup_bonuses` grants with source
//! `signup_bonus` exist across all users, later signups still verify and
//! activate but receive nothing. Count and insert share one transaction so
//! the cap cannot be overshot.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, instrument};

use canvass_core::{BalanceTransaction, Config, CreditSource, Error, Result, UserId};
use canvass_store::{Database, users};

use crate::balance::credit_in;

#[derive(Debug, Clone)]
pub struct SignupService {
    db: Arc<Database>,
    bonus_amount: f64,
    bonus_expiry_days: i64,
    max_bonuses: i64,
}

impl SignupService {
    pub fn new(db: Arc<Database>, config: &Config) -> Self {
        Self {
            db,
            bonus_amount: config.billing.signup_bonus_amount,
            bonus_expiry_days: config.billing.signup_bonus_expiry_days,
            max_bonuses: config.billing.max_signup_bonuses,
        }
    }

    /// Mark the user verified and active, then attempt the signup bonus.
    /// Returns the credit transaction when a bonus was granted.
    #[instrument(skip(self), fields(user = %user_id))]
    pub async fn verify_user(&self, user_id: &UserId) -> Result<Option<BalanceTransaction>> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        if !users::set_verified(&tx, user_id)? {
            return Err(Error::not_found("user", user_id));
        }
        let bonus = self.grant_bonus_in(&tx, user_id)?;

        tx.commit()?;
        Ok(bonus)
    }

    /// Attempt the bonus alone (for accounts verified through other paths).
    pub async fn grant_signup_bonus(&self, user_id: &UserId) -> Result<Option<BalanceTransaction>> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        let bonus = self.grant_bonus_in(&tx, user_id)?;
        tx.commit()?;
        Ok(bonus)
    }

    fn grant_bonus_in(
        &self,
        conn: &rusqlite::Connection,
        user_id: &UserId,
    ) -> Result<Option<BalanceTransaction>> {
        if self.bonus_amount <= 0.0 {
            return Ok(None);
        }

        let granted = users::count_signup_bonuses(conn)?;
        if granted >= self.max_bonuses {
            info!(user = %user_id, granted, cap = self.max_bonuses, "signup bonus cap reached");
            return Ok(None);
        }

        let expires_at = Utc::now() + Duration::days(self.bonus_expiry_days);
        let record = credit_in(
            conn,
            user_id,
            self.bonus_amount,
            CreditSource::SignupBonus,
            Some(expires_at),
            "Signup bonus",
            Some("signup"),
            None,
        )?;
        info!(user = %user_id, amount = self.bonus_amount, "signup bonus granted");
        Ok(Some(record))
    }
}
