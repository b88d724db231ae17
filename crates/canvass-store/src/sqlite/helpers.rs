use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Row;
use rusqlite::types::Value;

use canvass_core::{
    Answer, BalanceTransaction, CreditGrant, CreditSource, Evaluation, EvaluationStatus,
    GroupReport, GroupReportItem, Prompt, PromptGroup, QueueEntry, QueueStatus, ReportItemStatus,
    TransactionType, User,
};

pub(super) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub(super) fn ms_from_dt(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub(super) fn dt_from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
}

pub(super) fn opt_dt(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(dt_from_ms)
}

pub(super) fn opt_ms(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(ms_from_dt)
}

/// Placeholder list `?,?,...,?` for IN clauses.
pub(super) fn placeholders(count: usize) -> String {
    let mut out = String::with_capacity(count * 2);
    for i in 0..count {
        if i > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

pub(super) fn id_params<I: Copy + Into<i64>>(ids: &[I]) -> Vec<Value> {
    ids.iter().map(|id| Value::from((*id).into())).collect()
}

pub(super) fn embedding_to_json(embedding: &[f32]) -> String {
    serde_json::to_string(embedding).unwrap_or_else(|_| "[]".to_owned())
}

// ---------------------------------------------------------------------------
// Row mappers — column order matches the SELECT lists in the access modules.
// ---------------------------------------------------------------------------

pub(super) const PROMPT_COLS: &str = "id, prompt_text, topic_id, user_id";

pub(super) fn prompt_from_row(row: &Row<'_>) -> rusqlite::Result<Prompt> {
    Ok(Prompt {
        id: row.get(0)?,
        text: row.get(1)?,
        topic_id: row.get(2)?,
        user_id: row.get(3)?,
    })
}

pub(super) const GROUP_COLS: &str =
    "id, user_id, title, topic_id, brand, competitors, created_at, updated_at";

pub(super) fn group_from_row(row: &Row<'_>) -> rusqlite::Result<PromptGroup> {
    let brand: Option<String> = row.get(4)?;
    let competitors: String = row.get(5)?;
    Ok(PromptGroup {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        topic_id: row.get(3)?,
        brand: brand.and_then(|raw| serde_json::from_str(&raw).ok()),
        competitors: serde_json::from_str(&competitors).unwrap_or_default(),
        created_at: dt_from_ms(row.get(6)?),
        updated_at: dt_from_ms(row.get(7)?),
    })
}

pub(super) const QUEUE_COLS: &str = "id, prompt_id, requested_by, request_batch_id, requested_at, \
     status, claimed_at, completed_at, evaluation_id, failure_reason";

pub(super) fn queue_entry_from_row(row: &Row<'_>) -> rusqlite::Result<QueueEntry> {
    let status: String = row.get(5)?;
    Ok(QueueEntry {
        id: row.get(0)?,
        prompt_id: row.get(1)?,
        requested_by: row.get(2)?,
        request_batch_id: row.get(3)?,
        requested_at: dt_from_ms(row.get(4)?),
        status: QueueStatus::parse(&status).unwrap_or(QueueStatus::Failed),
        claimed_at: opt_dt(row.get(6)?),
        completed_at: opt_dt(row.get(7)?),
        evaluation_id: row.get(8)?,
        failure_reason: row.get(9)?,
    })
}

pub(super) const EVALUATION_COLS: &str =
    "id, prompt_id, assistant_plan_id, status, created_at, claimed_at, completed_at, answer";

pub(super) fn evaluation_from_row(row: &Row<'_>) -> rusqlite::Result<Evaluation> {
    let status: String = row.get(3)?;
    let answer: Option<String> = row.get(7)?;
    Ok(Evaluation {
        id: row.get(0)?,
        prompt_id: row.get(1)?,
        assistant_plan_id: row.get(2)?,
        status: EvaluationStatus::parse(&status).unwrap_or(EvaluationStatus::Failed),
        created_at: dt_from_ms(row.get(4)?),
        claimed_at: opt_dt(row.get(5)?),
        completed_at: opt_dt(row.get(6)?),
        answer: answer.and_then(|raw| serde_json::from_str::<Answer>(&raw).ok()),
    })
}

pub(super) const GRANT_COLS: &str =
    "id, user_id, source, original_amount, remaining_amount, expires_at, created_at";

pub(super) fn grant_from_row(row: &Row<'_>) -> rusqlite::Result<CreditGrant> {
    let source: String = row.get(2)?;
    Ok(CreditGrant {
        id: row.get(0)?,
        user_id: row.get(1)?,
        source: CreditSource::parse(&source).unwrap_or(CreditSource::AdminGrant),
        original_amount: row.get(3)?,
        remaining_amount: row.get(4)?,
        expires_at: opt_dt(row.get(5)?),
        created_at: dt_from_ms(row.get(6)?),
    })
}

pub(super) const TX_COLS: &str = "id, user_id, type, amount, balance_after, reason, \
     reference_type, reference_id, created_at";

pub(super) fn tx_from_row(row: &Row<'_>) -> rusqlite::Result<BalanceTransaction> {
    let tx_type: String = row.get(2)?;
    Ok(BalanceTransaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        tx_type: TransactionType::parse(&tx_type).unwrap_or(TransactionType::Debit),
        amount: row.get(3)?,
        balance_after: row.get(4)?,
        reason: row.get(5)?,
        reference_type: row.get(6)?,
        reference_id: row.get(7)?,
        created_at: dt_from_ms(row.get(8)?),
    })
}

pub(super) const USER_COLS: &str = "id, email, hashed_password, full_name, is_active, \
     is_superuser, email_verified, deleted_at";

pub(super) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        hashed_password: row.get(2)?,
        full_name: row.get(3)?,
        is_active: row.get(4)?,
        is_superuser: row.get(5)?,
        email_verified: row.get(6)?,
        deleted_at: opt_dt(row.get(7)?),
    })
}

pub(super) const REPORT_COLS: &str = "id, group_id, user_id, title, created_at, total_prompts, \
     prompts_with_data, prompts_awaiting, total_evaluations_loaded, total_cost, \
     brand_snapshot, competitors_snapshot";

pub(super) fn report_from_row(row: &Row<'_>) -> rusqlite::Result<GroupReport> {
    let brand: Option<String> = row.get(10)?;
    let competitors: String = row.get(11)?;
    Ok(GroupReport {
        id: row.get(0)?,
        group_id: row.get(1)?,
        user_id: row.get(2)?,
        title: row.get(3)?,
        created_at: dt_from_ms(row.get(4)?),
        total_prompts: row.get(5)?,
        prompts_with_data: row.get(6)?,
        prompts_awaiting: row.get(7)?,
        total_evaluations_loaded: row.get(8)?,
        total_cost: row.get(9)?,
        brand_snapshot: brand.and_then(|raw| serde_json::from_str(&raw).ok()),
        competitors_snapshot: serde_json::from_str(&competitors).unwrap_or_default(),
    })
}

pub(super) const REPORT_ITEM_COLS: &str =
    "id, report_id, prompt_id, evaluation_id, status, is_fresh, amount_charged";

pub(super) fn report_item_from_row(row: &Row<'_>) -> rusqlite::Result<GroupReportItem> {
    let status: String = row.get(4)?;
    Ok(GroupReportItem {
        id: row.get(0)?,
        report_id: row.get(1)?,
        prompt_id: row.get(2)?,
        evaluation_id: row.get(3)?,
        status: ReportItemStatus::parse(&status).unwrap_or(ReportItemStatus::Skipped),
        is_fresh: row.get(5)?,
        amount_charged: row.get(6)?,
    })
}
