//! Safe batch iteration over arbitrarily large collections.
//!
//! Regular keyset pagination assumes an integer-like primary key. Reference
//! data is frequently keyed by textual codes, so the fallback path walks
//! the collection in fixed windows ordered by the declared key, with any
//! ambient row scope suspended so the offset arithmetic indexes the full
//! collection. Iteration holds no cursor state beyond the current offset;
//! it terminates on the first empty window.

use crate::BATCH_SIZE;
use crate::registry::KeyKind;
use crate::registry::RecordType;
use crate::store::Page;
use crate::store::Record;
use crate::store::Store;
use crate::store::Value;

/// Visit every row of `record_type` in windows of `batch_size`, ascending
/// by primary key. Rows present throughout the iteration and not deleted
/// from an already-visited key range are visited exactly once; the callback
/// only ever sees non-empty batches. Store errors abort immediately,
/// leaving a partial traversal.
pub async fn for_each_batch<F>(
    store: &dyn Store,
    record_type: &RecordType,
    batch_size: usize,
    mut visit: F,
) -> crate::Result<()>
where
    F: FnMut(Vec<Record>),
{
    match record_type.key_kind() {
        // integer keys paginate cheaply: the store's native keyset scan
        KeyKind::Integer => {
            let mut after: Option<Value> = None;
            loop {
                let rows = store
                    .query_after(
                        record_type.table(),
                        record_type.primary_key(),
                        after.as_ref(),
                        batch_size,
                    )
                    .await?;
                if rows.is_empty() {
                    return Ok(());
                }
                after = rows.last().map(|row| row.key(record_type.primary_key()));
                visit(rows);
            }
        }
        KeyKind::Text => {
            let mut offset = 0;
            loop {
                let page = Page {
                    table: record_type.table(),
                    order_by: record_type.primary_key(),
                    offset,
                    limit: batch_size,
                    unscoped: true,
                };
                let rows = store.query_page(&page).await?;
                if rows.is_empty() {
                    return Ok(());
                }
                offset += batch_size;
                visit(rows);
            }
        }
    }
}

/// Per-record convenience over [`for_each_batch`] at the default window
/// size, preserving ordering and the exactly-once guarantee.
pub async fn for_each_record<F>(
    store: &dyn Store,
    record_type: &RecordType,
    mut visit: F,
) -> crate::Result<()>
where
    F: FnMut(Record),
{
    for_each_batch(store, record_type, BATCH_SIZE, |rows| {
        rows.into_iter().for_each(&mut visit)
    })
    .await
}
