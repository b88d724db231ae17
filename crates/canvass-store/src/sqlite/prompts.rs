//! Data-access primitives for the prompt store: prompts with embeddings,
//! nearest-neighbour lookup, groups and bindings.
//!
//! Functions take an explicit connection (or transaction) so services can
//! compose them atomically. The vector-index paths also take the database
//! handle for the graceful-degradation flag.

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::HashMap;

use canvass_core::{GroupId, Prompt, PromptGroup, PromptId, Result, UserId};

use super::helpers::{
    self, GROUP_COLS, PROMPT_COLS, group_from_row, id_params, placeholders, prompt_from_row,
};
use super::Database;

pub fn insert(
    db: &Database,
    conn: &Connection,
    text: &str,
    embedding: &[f32],
    topic_id: Option<i64>,
    user_id: Option<&UserId>,
) -> Result<PromptId> {
    conn.execute(
        "INSERT INTO prompts (prompt_text, embedding, topic_id, user_id, created_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
            text,
            helpers::embedding_to_json(embedding),
            topic_id,
            user_id,
            helpers::now_ms(),
        ],
    )?;
    let id = PromptId(conn.last_insert_rowid());

    if db.vector_search_enabled()
        && let Err(error) = conn.execute(
            "INSERT OR REPLACE INTO prompts_vec(rowid, embedding) VALUES (?, ?)",
            params![id, helpers::embedding_to_json(embedding)],
        )
    {
        db.disable_vector_search(&error, "prompt_embedding_insert");
    }

    Ok(id)
}

pub fn get(conn: &Connection, id: PromptId) -> Result<Option<Prompt>> {
    let prompt = conn
        .query_row(
            &format!("SELECT {PROMPT_COLS} FROM prompts WHERE id = ?"),
            params![id],
            prompt_from_row,
        )
        .optional()?;
    Ok(prompt)
}

/// Fetch many prompts at once, keyed by id. Missing ids are simply absent.
pub fn get_many(conn: &Connection, ids: &[PromptId]) -> Result<HashMap<PromptId, Prompt>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let sql = format!(
        "SELECT {PROMPT_COLS} FROM prompts WHERE id IN ({})",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(id_params(ids)), prompt_from_row)?;

    let mut out = HashMap::with_capacity(ids.len());
    for row in rows {
        let prompt = row?;
        out.insert(prompt.id, prompt);
    }
    Ok(out)
}

/// Cosine nearest neighbour over the vector index. Returns the closest
/// prompt and its similarity, or None when the index is empty or disabled.
pub fn nearest(
    db: &Database,
    conn: &Connection,
    embedding: &[f32],
) -> Result<Option<(PromptId, f32)>> {
    if !db.vector_search_enabled() {
        return Ok(None);
    }

    let result = conn
        .query_row(
            "SELECT rowid, distance FROM prompts_vec
             WHERE embedding MATCH ? AND k = 1
             ORDER BY distance ASC",
            params![helpers::embedding_to_json(embedding)],
            |row| {
                let id: PromptId = row.get(0)?;
                let distance: f64 = row.get(1)?;
                Ok((id, distance))
            },
        )
        .optional();

    match result {
        #[allow(clippy::cast_possible_truncation)]
        Ok(hit) => Ok(hit.map(|(id, distance)| (id, (1.0 - distance) as f32))),
        Err(error) => {
            db.disable_vector_search(&error, "prompt_nearest_query");
            Ok(None)
        }
    }
}

/// Exact-text fallback used when the vector index is unavailable.
pub fn find_by_text(conn: &Connection, text: &str) -> Result<Option<PromptId>> {
    let id = conn
        .query_row(
            "SELECT id FROM prompts WHERE prompt_text = ? LIMIT 1",
            params![text],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

pub fn insert_group(
    conn: &Connection,
    user_id: &UserId,
    title: &str,
    topic_id: Option<i64>,
    brand: Option<&serde_json::Value>,
    competitors: &[serde_json::Value],
) -> Result<GroupId> {
    let now = helpers::now_ms();
    conn.execute(
        "INSERT INTO prompt_groups (user_id, title, topic_id, brand, competitors, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            user_id,
            title,
            topic_id,
            brand.map(serde_json::Value::to_string),
            serde_json::to_string(competitors)?,
            now,
            now,
        ],
    )?;
    Ok(GroupId(conn.last_insert_rowid()))
}

pub fn get_group(conn: &Connection, id: GroupId) -> Result<Option<PromptGroup>> {
    let group = conn
        .query_row(
            &format!("SELECT {GROUP_COLS} FROM prompt_groups WHERE id = ?"),
            params![id],
            group_from_row,
        )
        .optional()?;
    Ok(group)
}

pub fn get_group_for_user(
    conn: &Connection,
    id: GroupId,
    user_id: &UserId,
) -> Result<Option<PromptGroup>> {
    let group = conn
        .query_row(
            &format!("SELECT {GROUP_COLS} FROM prompt_groups WHERE id = ? AND user_id = ?"),
            params![id, user_id],
            group_from_row,
        )
        .optional()?;
    Ok(group)
}

/// Update tracked brand metadata. The topic stays immutable after creation.
pub fn update_group_brand(
    conn: &Connection,
    id: GroupId,
    brand: Option<&serde_json::Value>,
    competitors: &[serde_json::Value],
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE prompt_groups SET brand = ?, competitors = ?, updated_at = ? WHERE id = ?",
        params![
            brand.map(serde_json::Value::to_string),
            serde_json::to_string(competitors)?,
            helpers::now_ms(),
            id,
        ],
    )?;
    Ok(changed > 0)
}

/// Bind a prompt into a group. Returns false when the pair already exists.
pub fn bind_prompt(conn: &Connection, group_id: GroupId, prompt_id: PromptId) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO prompt_group_bindings (group_id, prompt_id, added_at)
         VALUES (?, ?, ?)",
        params![group_id, prompt_id, helpers::now_ms()],
    )?;
    Ok(inserted > 0)
}

/// All prompt ids bound to a group, in binding order.
pub fn group_prompt_ids(conn: &Connection, group_id: GroupId) -> Result<Vec<PromptId>> {
    let mut stmt = conn.prepare(
        "SELECT prompt_id FROM prompt_group_bindings WHERE group_id = ? ORDER BY added_at, id",
    )?;
    let rows = stmt.query_map(params![group_id], |row| row.get(0))?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
