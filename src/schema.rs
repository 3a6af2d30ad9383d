//! Structure definitions and table rebuilds.
//!
//! A structure definition is raw schema text: statements separated by `;`,
//! interleaved with block comments and free whitespace. Rebuilding drops
//! the table, replays the parsed statements, and invalidates every cache
//! that could hold stale column metadata.

use crate::error::Error;
use crate::registry::Registry;
use crate::store::Store;
use regex::Regex;
use std::sync::LazyLock;

// http://ostermiller.org/findcomment.html
static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\*(?s:.)*?\*/").expect("block comment pattern"));
static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--[^\n]*").expect("line comment pattern"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Split raw schema text into executable statements: comments stripped,
/// whitespace collapsed, split on `;`, blanks discarded.
pub fn statements(raw: &str) -> Vec<String> {
    let stripped = COMMENT.replace_all(raw, " ");
    let stripped = LINE_COMMENT.replace_all(&stripped, " ");
    let collapsed = WHITESPACE.replace_all(&stripped, " ");
    collapsed
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Drop and recreate `name`'s table from its structure definition.
///
/// With `force` false this is a no-op when the table already exists. The
/// connection is scoped to this call and released on every exit path. A
/// failing statement aborts the remainder and surfaces as
/// [`Error::SchemaRebuildFailed`]; there is no retry. On success, the
/// store's structural cache and the cached column layout of `name` and
/// every type derived from it are dropped.
pub async fn rebuild_table(
    store: &dyn Store,
    registry: &Registry,
    name: &str,
    force: bool,
) -> crate::Result<()> {
    let record_type = registry.get(name)?;
    let conn = store.checkout().await?;
    if !force && conn.table_exists(record_type.table()).await? {
        return Ok(());
    }
    log::info!("rebuilding table {} for {}", record_type.table(), name);
    let raw = record_type
        .structure()
        .ok_or_else(|| Error::MissingStructure(name.to_string()))?;
    conn.execute(&format!("DROP TABLE IF EXISTS \"{}\"", record_type.table()))
        .await?;
    for statement in statements(raw) {
        if let Err(source) = conn.execute(&statement).await {
            return Err(Error::SchemaRebuildFailed { statement, source });
        }
    }
    store.invalidate_structural_cache();
    record_type.forget_columns();
    for derived in registry.derived_of(name) {
        registry.get(derived)?.forget_columns();
    }
    Ok(())
}
