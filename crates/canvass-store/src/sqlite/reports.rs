//! Data-access primitives for report snapshots.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use canvass_core::{
    EvaluationId, GroupId, GroupReport, GroupReportItem, PromptId, ReportId, ReportItemStatus,
    Result, UserId,
};

use super::helpers::{self, REPORT_COLS, REPORT_ITEM_COLS, report_from_row, report_item_from_row};

/// Aggregate counts of a report row, written once at generation time.
#[derive(Debug, Clone)]
pub struct ReportCounts {
    pub total_prompts: i64,
    pub prompts_with_data: i64,
    pub prompts_awaiting: i64,
    pub total_evaluations_loaded: i64,
    pub total_cost: f64,
}

#[allow(clippy::too_many_arguments)]
pub fn insert_report(
    conn: &Connection,
    group_id: GroupId,
    user_id: &UserId,
    title: Option<&str>,
    counts: &ReportCounts,
    brand_snapshot: Option<&serde_json::Value>,
    competitors_snapshot: &[serde_json::Value],
) -> Result<ReportId> {
    conn.execute(
        "INSERT INTO group_reports
             (group_id, user_id, title, created_at, total_prompts, prompts_with_data,
              prompts_awaiting, total_evaluations_loaded, total_cost,
              brand_snapshot, competitors_snapshot)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            group_id,
            user_id,
            title,
            helpers::now_ms(),
            counts.total_prompts,
            counts.prompts_with_data,
            counts.prompts_awaiting,
            counts.total_evaluations_loaded,
            counts.total_cost,
            brand_snapshot.map(serde_json::Value::to_string),
            serde_json::to_string(competitors_snapshot)?,
        ],
    )?;
    Ok(ReportId(conn.last_insert_rowid()))
}

pub fn insert_item(
    conn: &Connection,
    report_id: ReportId,
    prompt_id: PromptId,
    evaluation_id: Option<EvaluationId>,
    status: ReportItemStatus,
    is_fresh: bool,
    amount_charged: Option<f64>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO group_report_items
             (report_id, prompt_id, evaluation_id, status, is_fresh, amount_charged)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            report_id,
            prompt_id,
            evaluation_id,
            status.as_str(),
            is_fresh,
            amount_charged,
        ],
    )?;
    Ok(())
}

pub fn report(conn: &Connection, id: ReportId) -> Result<Option<GroupReport>> {
    let report = conn
        .query_row(
            &format!("SELECT {REPORT_COLS} FROM group_reports WHERE id = ?"),
            params![id],
            report_from_row,
        )
        .optional()?;
    Ok(report)
}

pub fn report_for_user(
    conn: &Connection,
    id: ReportId,
    user_id: &UserId,
) -> Result<Option<GroupReport>> {
    let report = conn
        .query_row(
            &format!("SELECT {REPORT_COLS} FROM group_reports WHERE id = ? AND user_id = ?"),
            params![id, user_id],
            report_from_row,
        )
        .optional()?;
    Ok(report)
}

/// Most recent report for a group, if any.
pub fn latest_report(
    conn: &Connection,
    group_id: GroupId,
    user_id: &UserId,
) -> Result<Option<GroupReport>> {
    let report = conn
        .query_row(
            &format!(
                "SELECT {REPORT_COLS} FROM group_reports
                 WHERE group_id = ? AND user_id = ?
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1"
            ),
            params![group_id, user_id],
            report_from_row,
        )
        .optional()?;
    Ok(report)
}

/// Page of a group's reports, newest first, plus the total count.
pub fn list_reports(
    conn: &Connection,
    group_id: GroupId,
    user_id: &UserId,
    limit: usize,
    offset: usize,
) -> Result<(Vec<GroupReport>, i64)> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM group_reports WHERE group_id = ? AND user_id = ?",
        params![group_id, user_id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {REPORT_COLS} FROM group_reports
         WHERE group_id = ? AND user_id = ?
         ORDER BY created_at DESC, id DESC
         LIMIT ? OFFSET ?"
    ))?;
    let rows = stmt.query_map(
        params![
            group_id,
            user_id,
            i64::try_from(limit).unwrap_or(i64::MAX),
            i64::try_from(offset).unwrap_or(0),
        ],
        report_from_row,
    )?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok((out, total))
}

pub fn report_items(conn: &Connection, report_id: ReportId) -> Result<Vec<GroupReportItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REPORT_ITEM_COLS} FROM group_report_items WHERE report_id = ? ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![report_id], report_item_from_row)?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Per-prompt evaluation info of a report: the selected evaluation id (if
/// any) and its completion time. This is the freshness cutoff for the next
/// report.
pub fn report_evaluation_info(
    conn: &Connection,
    report_id: ReportId,
) -> Result<Vec<(PromptId, Option<EvaluationId>, Option<DateTime<Utc>>)>> {
    let mut stmt = conn.prepare(
        "SELECT i.prompt_id, i.evaluation_id, e.completed_at
         FROM group_report_items i
         LEFT JOIN prompt_evaluations e ON e.id = i.evaluation_id
         WHERE i.report_id = ?",
    )?;
    let rows = stmt.query_map(params![report_id], |row| {
        Ok((
            row.get::<_, PromptId>(0)?,
            row.get::<_, Option<EvaluationId>>(1)?,
            row.get::<_, Option<i64>>(2)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (prompt_id, evaluation_id, completed_at) = row?;
        out.push((prompt_id, evaluation_id, helpers::opt_dt(completed_at)));
    }
    Ok(out)
}
