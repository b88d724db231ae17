use anyhow::Result;
use rusqlite::Connection;
use std::sync::Once;
use tracing::warn;

/// Entry-point shape `sqlite3_auto_extension` expects.
type ExtensionInit = unsafe extern "C" fn(
    *mut rusqlite::ffi::sqlite3,
    *mut *mut std::os::raw::c_char,
    *const rusqlite::ffi::sqlite3_api_routines,
) -> std::os::raw::c_int;

/// Register sqlite-vec with SQLite's auto-extension hook so every
/// subsequently opened connection can create and query `vec0` tables.
pub(super) fn register_vec_extension() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| {
        // SAFETY: sqlite3_vec_init is the extension entry point exported by
        // the linked sqlite-vec static library; it has the init signature
        // sqlite3_auto_extension expects. Registration happens once, before
        // any connection is opened.
        #[allow(unsafe_code)]
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute::<
                *const (),
                ExtensionInit,
            >(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        }
    });
}

/// Prompt store: prompts with embeddings, user-owned groups, bindings.
pub(super) fn init_prompts_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS prompts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            prompt_text TEXT NOT NULL,
            embedding TEXT NOT NULL,
            topic_id INTEGER,
            user_id TEXT,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_prompts_topic ON prompts(topic_id);

        CREATE TABLE IF NOT EXISTS prompt_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            topic_id INTEGER,
            brand TEXT,
            competitors TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(user_id, title)
        );

        CREATE INDEX IF NOT EXISTS idx_groups_user ON prompt_groups(user_id);

        CREATE TABLE IF NOT EXISTS prompt_group_bindings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id INTEGER NOT NULL REFERENCES prompt_groups(id) ON DELETE CASCADE,
            prompt_id INTEGER NOT NULL REFERENCES prompts(id) ON DELETE CASCADE,
            added_at INTEGER NOT NULL,
            UNIQUE(group_id, prompt_id)
        );

        CREATE INDEX IF NOT EXISTS idx_bindings_group ON prompt_group_bindings(group_id);
        CREATE INDEX IF NOT EXISTS idx_bindings_prompt ON prompt_group_bindings(prompt_id);
        ",
    )?;

    Ok(())
}

/// Users store: accounts, credit grants, append-only balance audit log.
pub(super) fn init_users_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            hashed_password TEXT NOT NULL,
            full_name TEXT,
            is_active INTEGER NOT NULL DEFAULT 0,
            is_superuser INTEGER NOT NULL DEFAULT 0,
            email_verified INTEGER NOT NULL DEFAULT 0,
            verification_token TEXT,
            verification_expires_at INTEGER,
            deleted_at INTEGER,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS credit_grants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            source TEXT NOT NULL,
            original_amount REAL NOT NULL,
            remaining_amount REAL NOT NULL
                CHECK (remaining_amount >= 0 AND remaining_amount <= original_amount),
            expires_at INTEGER,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_grants_user ON credit_grants(user_id);
        CREATE INDEX IF NOT EXISTS idx_grants_source ON credit_grants(source);

        CREATE TABLE IF NOT EXISTS balance_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            type TEXT NOT NULL,
            amount REAL NOT NULL CHECK (amount > 0),
            balance_after REAL NOT NULL,
            reason TEXT NOT NULL,
            reference_type TEXT,
            reference_id TEXT,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_tx_user_created
            ON balance_transactions(user_id, created_at DESC);
        ",
    )?;

    Ok(())
}

/// Evals store: assistants/plans, the execution queue, evaluations,
/// consumptions, report snapshots, scrape batches.
pub(super) fn init_evals_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS ai_assistants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ai_assistant_plans (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            assistant_id INTEGER NOT NULL REFERENCES ai_assistants(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(assistant_id, name)
        );

        CREATE TABLE IF NOT EXISTS execution_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            prompt_id INTEGER NOT NULL,
            requested_by TEXT NOT NULL,
            request_batch_id TEXT NOT NULL,
            requested_at INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            claimed_at INTEGER,
            completed_at INTEGER,
            evaluation_id INTEGER,
            failure_reason TEXT
        );

        -- The single invariant preventing duplicate scheduling: at most one
        -- non-terminal entry per prompt, enforced by the database.
        CREATE UNIQUE INDEX IF NOT EXISTS uq_queue_active_prompt
            ON execution_queue(prompt_id)
            WHERE status IN ('pending', 'in_progress');

        CREATE INDEX IF NOT EXISTS idx_queue_status_requested
            ON execution_queue(status, requested_at);
        CREATE INDEX IF NOT EXISTS idx_queue_requester
            ON execution_queue(requested_by, status);
        CREATE INDEX IF NOT EXISTS idx_queue_evaluation
            ON execution_queue(evaluation_id);

        CREATE TABLE IF NOT EXISTS prompt_evaluations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            prompt_id INTEGER NOT NULL,
            assistant_plan_id INTEGER NOT NULL REFERENCES ai_assistant_plans(id),
            status TEXT NOT NULL DEFAULT 'in_progress',
            created_at INTEGER NOT NULL,
            claimed_at INTEGER,
            completed_at INTEGER,
            answer TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_evals_prompt_status
            ON prompt_evaluations(prompt_id, status);
        CREATE INDEX IF NOT EXISTS idx_evals_plan
            ON prompt_evaluations(assistant_plan_id);

        CREATE TABLE IF NOT EXISTS consumed_evaluations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            evaluation_id INTEGER NOT NULL,
            amount_charged REAL NOT NULL,
            consumed_at INTEGER NOT NULL,
            UNIQUE(user_id, evaluation_id)
        );

        CREATE TABLE IF NOT EXISTS group_reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id INTEGER NOT NULL,
            user_id TEXT NOT NULL,
            title TEXT,
            created_at INTEGER NOT NULL,
            total_prompts INTEGER NOT NULL,
            prompts_with_data INTEGER NOT NULL,
            prompts_awaiting INTEGER NOT NULL,
            total_evaluations_loaded INTEGER NOT NULL,
            total_cost REAL NOT NULL,
            brand_snapshot TEXT,
            competitors_snapshot TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_reports_group
            ON group_reports(group_id, user_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS group_report_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            report_id INTEGER NOT NULL REFERENCES group_reports(id) ON DELETE CASCADE,
            prompt_id INTEGER NOT NULL,
            evaluation_id INTEGER,
            status TEXT NOT NULL,
            is_fresh INTEGER NOT NULL DEFAULT 0,
            amount_charged REAL
        );

        CREATE INDEX IF NOT EXISTS idx_report_items_report
            ON group_report_items(report_id);

        CREATE TABLE IF NOT EXISTS scrape_batches (
            batch_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            prompt_ids TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'pending',
            created_at INTEGER NOT NULL,
            completed_at INTEGER
        );
        ",
    )?;

    Ok(())
}

/// Create the `vec0` virtual table over prompt embeddings. Returns false
/// (vector search disabled) when the extension is unavailable; callers fall
/// back to exact-text matching.
pub(super) fn init_vector_schema(conn: &Connection, dimensions: usize) -> bool {
    let ddl = format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS prompts_vec
         USING vec0(embedding float[{dimensions}] distance_metric=cosine)"
    );

    match conn.execute_batch(&ddl) {
        Ok(()) => true,
        Err(error) => {
            warn!(error = %error, "sqlite-vec unavailable, vector search disabled");
            false
        }
    }
}
