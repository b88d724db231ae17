//! Data-access primitives for the evals store: assistants and plans, the
//! execution queue, evaluations, consumptions, and scrape batches.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use rusqlite::types::Value;
use std::collections::{HashMap, HashSet};

use canvass_core::{
    Answer, AssistantId, BatchStatus, Error, Evaluation, EvaluationId, PlanId, PromptId,
    QueueEntry, QueueEntryId, Result, ScrapeBatch, UserId,
};

use super::helpers::{
    self, EVALUATION_COLS, QUEUE_COLS, evaluation_from_row, id_params, placeholders,
    queue_entry_from_row,
};

// ---------------------------------------------------------------------------
// Assistants and plans
// ---------------------------------------------------------------------------

pub fn ensure_assistant(conn: &Connection, name: &str) -> Result<AssistantId> {
    conn.execute(
        "INSERT OR IGNORE INTO ai_assistants (name, created_at) VALUES (?, ?)",
        params![name, helpers::now_ms()],
    )?;
    let id = conn.query_row(
        "SELECT id FROM ai_assistants WHERE name = ?",
        params![name],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn ensure_plan(conn: &Connection, assistant_id: AssistantId, name: &str) -> Result<PlanId> {
    conn.execute(
        "INSERT OR IGNORE INTO ai_assistant_plans (assistant_id, name, created_at) VALUES (?, ?, ?)",
        params![assistant_id, name, helpers::now_ms()],
    )?;
    let id = conn.query_row(
        "SELECT id FROM ai_assistant_plans WHERE assistant_id = ? AND name = ?",
        params![assistant_id, name],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Case-insensitive lookup of `(assistant, plan)` to a plan id.
pub fn resolve_plan(conn: &Connection, assistant: &str, plan: &str) -> Result<Option<PlanId>> {
    let id = conn
        .query_row(
            "SELECT p.id
             FROM ai_assistant_plans p
             JOIN ai_assistants a ON a.id = p.assistant_id
             WHERE UPPER(a.name) = UPPER(?) AND UPPER(p.name) = UPPER(?)
             LIMIT 1",
            params![assistant, plan],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

// ---------------------------------------------------------------------------
// Execution queue
// ---------------------------------------------------------------------------

/// Prompts among `ids` that already have a non-terminal queue entry.
pub fn active_prompt_ids(conn: &Connection, ids: &[PromptId]) -> Result<HashSet<PromptId>> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }

    let sql = format!(
        "SELECT prompt_id FROM execution_queue
         WHERE prompt_id IN ({})
           AND status IN ('pending', 'in_progress')",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(id_params(ids)), |row| row.get(0))?;

    let mut out = HashSet::new();
    for row in rows {
        out.insert(row?);
    }
    Ok(out)
}

pub fn insert_entry(
    conn: &Connection,
    prompt_id: PromptId,
    requested_by: &UserId,
    batch_id: &str,
) -> Result<QueueEntry> {
    let now = helpers::now_ms();
    conn.execute(
        "INSERT INTO execution_queue (prompt_id, requested_by, request_batch_id, requested_at, status)
         VALUES (?, ?, ?, ?, 'pending')",
        params![prompt_id, requested_by, batch_id, now],
    )?;
    let id = QueueEntryId(conn.last_insert_rowid());
    entry(conn, id)?.ok_or_else(|| Error::not_found("queue entry", id))
}

pub fn entry(conn: &Connection, id: QueueEntryId) -> Result<Option<QueueEntry>> {
    let entry = conn
        .query_row(
            &format!("SELECT {QUEUE_COLS} FROM execution_queue WHERE id = ?"),
            params![id],
            queue_entry_from_row,
        )
        .optional()?;
    Ok(entry)
}

pub fn entry_by_evaluation(
    conn: &Connection,
    evaluation_id: EvaluationId,
) -> Result<Option<QueueEntry>> {
    let entry = conn
        .query_row(
            &format!("SELECT {QUEUE_COLS} FROM execution_queue WHERE evaluation_id = ?"),
            params![evaluation_id],
            queue_entry_from_row,
        )
        .optional()?;
    Ok(entry)
}

pub fn pending_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM execution_queue WHERE status = 'pending'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Cancel the caller's pending entries for the given prompts. In-progress
/// entries are untouched. Returns how many rows transitioned.
pub fn cancel_pending(conn: &Connection, ids: &[PromptId], user_id: &UserId) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }

    let sql = format!(
        "UPDATE execution_queue SET status = 'cancelled'
         WHERE prompt_id IN ({})
           AND requested_by = ?
           AND status = 'pending'",
        placeholders(ids.len())
    );
    let mut values = id_params(ids);
    values.push(Value::from(user_id.0.clone()));
    let changed = conn.execute(&sql, params_from_iter(values))?;
    Ok(changed)
}

/// Reset in-progress entries whose claim is older than `cutoff` back to
/// pending. Run inline at the top of every poll.
pub fn reset_stale_claims(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE execution_queue
         SET status = 'pending', claimed_at = NULL
         WHERE status = 'in_progress' AND claimed_at < ?",
        params![helpers::ms_from_dt(cutoff)],
    )?;
    Ok(changed)
}

/// Oldest pending entry (FIFO by request time).
pub fn next_pending(conn: &Connection) -> Result<Option<QueueEntry>> {
    let entry = conn
        .query_row(
            &format!(
                "SELECT {QUEUE_COLS} FROM execution_queue
                 WHERE status = 'pending'
                 ORDER BY requested_at ASC, id ASC
                 LIMIT 1"
            ),
            [],
            queue_entry_from_row,
        )
        .optional()?;
    Ok(entry)
}

/// Transition an entry to in-progress and link its evaluation.
pub fn claim_entry(
    conn: &Connection,
    id: QueueEntryId,
    evaluation_id: EvaluationId,
    claimed_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE execution_queue
         SET status = 'in_progress', claimed_at = ?, evaluation_id = ?
         WHERE id = ?",
        params![helpers::ms_from_dt(claimed_at), evaluation_id, id],
    )?;
    Ok(())
}

/// Terminal completed transition; a no-op on rows already terminal.
pub fn mark_completed(
    conn: &Connection,
    id: QueueEntryId,
    evaluation_id: EvaluationId,
) -> Result<()> {
    conn.execute(
        "UPDATE execution_queue
         SET status = 'completed', completed_at = ?, evaluation_id = ?
         WHERE id = ? AND status IN ('pending', 'in_progress')",
        params![helpers::now_ms(), evaluation_id, id],
    )?;
    Ok(())
}

/// Terminal failed transition; a no-op on rows already terminal.
pub fn mark_failed(conn: &Connection, id: QueueEntryId, reason: &str) -> Result<()> {
    conn.execute(
        "UPDATE execution_queue
         SET status = 'failed', completed_at = ?, failure_reason = ?
         WHERE id = ? AND status IN ('pending', 'in_progress')",
        params![helpers::now_ms(), reason, id],
    )?;
    Ok(())
}

/// The caller's pending and in-progress entries, FIFO.
pub fn user_items(conn: &Connection, user_id: &UserId) -> Result<Vec<QueueEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {QUEUE_COLS} FROM execution_queue
         WHERE requested_by = ?
           AND status IN ('pending', 'in_progress')
         ORDER BY requested_at ASC, id ASC"
    ))?;
    let rows = stmt.query_map(params![user_id], queue_entry_from_row)?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// The caller's completed entries newer than `cutoff`, newest first.
pub fn recently_completed(
    conn: &Connection,
    user_id: &UserId,
    cutoff: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<QueueEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {QUEUE_COLS} FROM execution_queue
         WHERE requested_by = ?
           AND status = 'completed'
           AND completed_at > ?
         ORDER BY completed_at DESC
         LIMIT ?"
    ))?;
    let rows = stmt.query_map(
        params![
            user_id,
            helpers::ms_from_dt(cutoff),
            i64::try_from(limit).unwrap_or(i64::MAX),
        ],
        queue_entry_from_row,
    )?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Evaluations
// ---------------------------------------------------------------------------

pub fn insert_evaluation(
    conn: &Connection,
    prompt_id: PromptId,
    plan_id: PlanId,
    claimed_at: DateTime<Utc>,
) -> Result<EvaluationId> {
    conn.execute(
        "INSERT INTO prompt_evaluations (prompt_id, assistant_plan_id, status, created_at, claimed_at)
         VALUES (?, ?, 'in_progress', ?, ?)",
        params![
            prompt_id,
            plan_id,
            helpers::ms_from_dt(claimed_at),
            helpers::ms_from_dt(claimed_at),
        ],
    )?;
    Ok(EvaluationId(conn.last_insert_rowid()))
}

pub fn evaluation(conn: &Connection, id: EvaluationId) -> Result<Option<Evaluation>> {
    let evaluation = conn
        .query_row(
            &format!("SELECT {EVALUATION_COLS} FROM prompt_evaluations WHERE id = ?"),
            params![id],
            evaluation_from_row,
        )
        .optional()?;
    Ok(evaluation)
}

pub fn complete_evaluation(
    conn: &Connection,
    id: EvaluationId,
    answer: &Answer,
    completed_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE prompt_evaluations
         SET status = 'completed', answer = ?, completed_at = ?
         WHERE id = ?",
        params![
            serde_json::to_string(answer)?,
            helpers::ms_from_dt(completed_at),
            id,
        ],
    )?;
    Ok(())
}

pub fn fail_evaluation(
    conn: &Connection,
    id: EvaluationId,
    answer: Option<&Answer>,
    completed_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE prompt_evaluations
         SET status = 'failed', answer = ?, completed_at = ?
         WHERE id = ?",
        params![
            answer.map(serde_json::to_string).transpose()?,
            helpers::ms_from_dt(completed_at),
            id,
        ],
    )?;
    Ok(())
}

pub fn delete_evaluation(conn: &Connection, id: EvaluationId) -> Result<()> {
    conn.execute("DELETE FROM prompt_evaluations WHERE id = ?", params![id])?;
    Ok(())
}

/// Latest completed evaluation per prompt for one plan.
pub fn latest_completed(
    conn: &Connection,
    plan_id: PlanId,
    prompt_ids: &[PromptId],
) -> Result<HashMap<PromptId, Evaluation>> {
    if prompt_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let sql = format!(
        "SELECT {EVALUATION_COLS} FROM prompt_evaluations
         WHERE assistant_plan_id = ?
           AND prompt_id IN ({})
           AND status = 'completed'
         ORDER BY completed_at DESC, id DESC",
        placeholders(prompt_ids.len())
    );
    let mut values = vec![Value::from(plan_id.0)];
    values.extend(id_params(prompt_ids));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), evaluation_from_row)?;

    let mut out: HashMap<PromptId, Evaluation> = HashMap::new();
    for row in rows {
        let evaluation = row?;
        // Rows arrive newest-first; keep the first one seen per prompt.
        out.entry(evaluation.prompt_id).or_insert(evaluation);
    }
    Ok(out)
}

/// A completed evaluation joined with its assistant and plan names.
#[derive(Debug, Clone)]
pub struct CompletedEvaluation {
    pub id: EvaluationId,
    pub prompt_id: PromptId,
    pub assistant_plan_id: PlanId,
    pub completed_at: DateTime<Utc>,
    pub plan_name: String,
    pub assistant_name: String,
}

/// All completed evaluations for the prompts, newest first, with assistant
/// info attached.
pub fn completed_with_assistants(
    conn: &Connection,
    prompt_ids: &[PromptId],
) -> Result<Vec<CompletedEvaluation>> {
    if prompt_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT e.id, e.prompt_id, e.assistant_plan_id, e.completed_at, p.name, a.name
         FROM prompt_evaluations e
         JOIN ai_assistant_plans p ON p.id = e.assistant_plan_id
         JOIN ai_assistants a ON a.id = p.assistant_id
         WHERE e.prompt_id IN ({})
           AND e.status = 'completed'
         ORDER BY e.completed_at DESC, e.id DESC",
        placeholders(prompt_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(id_params(prompt_ids)), |row| {
        Ok(CompletedEvaluation {
            id: row.get(0)?,
            prompt_id: row.get(1)?,
            assistant_plan_id: row.get(2)?,
            completed_at: helpers::dt_from_ms(row.get(3)?),
            plan_name: row.get(4)?,
            assistant_name: row.get(5)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Ids of all completed evaluations for the prompts.
pub fn completed_ids(conn: &Connection, prompt_ids: &[PromptId]) -> Result<Vec<EvaluationId>> {
    if prompt_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT id FROM prompt_evaluations
         WHERE prompt_id IN ({})
           AND status = 'completed'
         ORDER BY id",
        placeholders(prompt_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(id_params(prompt_ids)), |row| row.get(0))?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Prompts among `ids` that have at least one completed evaluation.
pub fn prompts_with_completed(
    conn: &Connection,
    prompt_ids: &[PromptId],
) -> Result<HashSet<PromptId>> {
    if prompt_ids.is_empty() {
        return Ok(HashSet::new());
    }

    let sql = format!(
        "SELECT DISTINCT prompt_id FROM prompt_evaluations
         WHERE prompt_id IN ({})
           AND status = 'completed'",
        placeholders(prompt_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(id_params(prompt_ids)), |row| row.get(0))?;

    let mut out = HashSet::new();
    for row in rows {
        out.insert(row?);
    }
    Ok(out)
}

/// Prompts among `ids` with an in-progress evaluation right now.
pub fn prompts_in_progress(
    conn: &Connection,
    prompt_ids: &[PromptId],
) -> Result<HashSet<PromptId>> {
    if prompt_ids.is_empty() {
        return Ok(HashSet::new());
    }

    let sql = format!(
        "SELECT DISTINCT prompt_id FROM prompt_evaluations
         WHERE prompt_id IN ({})
           AND status = 'in_progress'",
        placeholders(prompt_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(id_params(prompt_ids)), |row| row.get(0))?;

    let mut out = HashSet::new();
    for row in rows {
        out.insert(row?);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Consumed evaluations
// ---------------------------------------------------------------------------

/// Which of the given evaluations the user has already paid for.
pub fn consumed_ids(
    conn: &Connection,
    user_id: &UserId,
    evaluation_ids: &[EvaluationId],
) -> Result<HashSet<EvaluationId>> {
    if evaluation_ids.is_empty() {
        return Ok(HashSet::new());
    }

    let sql = format!(
        "SELECT evaluation_id FROM consumed_evaluations
         WHERE user_id = ?
           AND evaluation_id IN ({})",
        placeholders(evaluation_ids.len())
    );
    let mut values = vec![Value::from(user_id.0.clone())];
    values.extend(id_params(evaluation_ids));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), |row| row.get(0))?;

    let mut out = HashSet::new();
    for row in rows {
        out.insert(row?);
    }
    Ok(out)
}

/// Record a consumption. The `(user_id, evaluation_id)` unique index is the
/// idempotency primitive: a violation surfaces as `DuplicateConsumption`.
pub fn insert_consumed(
    conn: &Connection,
    user_id: &UserId,
    evaluation_id: EvaluationId,
    amount_charged: f64,
) -> Result<i64> {
    let inserted = conn.execute(
        "INSERT INTO consumed_evaluations (user_id, evaluation_id, amount_charged, consumed_at)
         VALUES (?, ?, ?, ?)",
        params![user_id, evaluation_id, amount_charged, helpers::now_ms()],
    );

    match inserted {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(error) if is_unique_violation(&error) => Err(Error::DuplicateConsumption {
            user_id: user_id.clone(),
            evaluation_id,
        }),
        Err(error) => Err(error.into()),
    }
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ---------------------------------------------------------------------------
// Scrape batches
// ---------------------------------------------------------------------------

pub fn insert_batch(
    conn: &Connection,
    batch_id: &str,
    user_id: &UserId,
    prompt_ids: &[PromptId],
) -> Result<()> {
    conn.execute(
        "INSERT INTO scrape_batches (batch_id, user_id, prompt_ids, status, created_at)
         VALUES (?, ?, ?, 'pending', ?)",
        params![
            batch_id,
            user_id,
            serde_json::to_string(&prompt_ids.iter().map(|p| p.0).collect::<Vec<_>>())?,
            helpers::now_ms(),
        ],
    )?;
    Ok(())
}

pub fn batch(conn: &Connection, batch_id: &str) -> Result<Option<ScrapeBatch>> {
    let row = conn
        .query_row(
            "SELECT batch_id, user_id, prompt_ids, status, created_at, completed_at
             FROM scrape_batches WHERE batch_id = ?",
            params![batch_id],
            |row| {
                let prompt_ids: String = row.get(2)?;
                let status: String = row.get(3)?;
                Ok(ScrapeBatch {
                    batch_id: row.get(0)?,
                    user_id: row.get(1)?,
                    prompt_ids: serde_json::from_str::<Vec<i64>>(&prompt_ids)
                        .unwrap_or_default()
                        .into_iter()
                        .map(PromptId)
                        .collect(),
                    status: BatchStatus::parse(&status).unwrap_or(BatchStatus::Failed),
                    created_at: helpers::dt_from_ms(row.get(4)?),
                    completed_at: helpers::opt_dt(row.get(5)?),
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Terminal transition of a batch record. Returns false for unknown ids.
pub fn complete_batch(conn: &Connection, batch_id: &str, status: BatchStatus) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE scrape_batches SET status = ?, completed_at = ? WHERE batch_id = ?",
        params![status.as_str(), helpers::now_ms(), batch_id],
    )?;
    Ok(changed > 0)
}

/// Prompts among `ids` already included in a pending batch, to suppress
/// duplicate outbound requests.
pub fn pending_batch_prompt_ids(
    conn: &Connection,
    prompt_ids: &[PromptId],
) -> Result<HashSet<PromptId>> {
    if prompt_ids.is_empty() {
        return Ok(HashSet::new());
    }

    let mut stmt =
        conn.prepare("SELECT prompt_ids FROM scrape_batches WHERE status = 'pending'")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut pending: HashSet<PromptId> = HashSet::new();
    for row in rows {
        let ids: Vec<i64> = serde_json::from_str(&row?).unwrap_or_default();
        pending.extend(ids.into_iter().map(PromptId));
    }

    let asked: HashSet<PromptId> = prompt_ids.iter().copied().collect();
    Ok(pending.intersection(&asked).copied().collect())
}
