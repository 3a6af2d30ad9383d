use crate::store::StoreError;

/// Framework-level failures. Store errors pass through unchanged; there is
/// no retry or translation layer anywhere in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A record type asked to mine original sources without declaring its
    /// own step definitions. Fatal to that type's composition.
    #[error("no step definitions declared for record type `{0}`")]
    DefinitionNotFound(String),

    /// A statement failed during table rebuild. Remaining statements were
    /// skipped; the connection was still released.
    #[error("schema rebuild failed on statement `{statement}`")]
    SchemaRebuildFailed {
        statement: String,
        #[source]
        source: StoreError,
    },

    #[error("record type `{0}` has no structure definition")]
    MissingStructure(String),

    #[error("unknown record type `{0}`")]
    UnknownType(String),

    #[error("record type `{0}` is already registered")]
    DuplicateType(String),

    #[error("snapshot fetch failed for `{slug}`")]
    Snapshot {
        slug: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
