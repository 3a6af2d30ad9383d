//! Record-type declarations and the process-scoped registry.
//!
//! Domain modules declare their reference-data classes here at startup;
//! everything else in the framework reads the registry. There is no global
//! registry object: callers own a [`Registry`] and pass it where needed.

use crate::error::Error;
use crate::fallback::FallbackRule;
use crate::script::PopulationScript;
use crate::script::Step;
use crate::snapshot;
use crate::store::Store;
use crate::store::StoreError;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Shape of a declared primary key. Integer-like keys take the store's
/// native batch-scan path; text keys take the offset path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Integer,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Bool,
}

/// One declared attribute of a record type.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    kind: FieldKind,
}

impl Field {
    pub fn text(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FieldKind::Text }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FieldKind::Integer }
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FieldKind::Float }
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FieldKind::Bool }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }
}

/// Everything a domain module supplies when registering a type.
///
/// `miner` is the type's own step-definition unit: the ordered steps that
/// populate it from original sources. A type registered without one cannot
/// be composed with `mine_from_original_sources`.
pub struct RecordTypeDecl {
    name: String,
    table: Option<String>,
    primary_key: String,
    key_kind: KeyKind,
    structure: Option<String>,
    fields: Vec<Field>,
    fallback: FallbackRule,
    miner: Option<Vec<Step>>,
    parents: Vec<String>,
    derived_from: Option<String>,
}

impl RecordTypeDecl {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>, key_kind: KeyKind) -> Self {
        Self {
            name: name.into(),
            table: None,
            primary_key: primary_key.into(),
            key_kind,
            structure: None,
            fields: Vec::new(),
            fallback: FallbackRule::default(),
            miner: None,
            parents: Vec::new(),
            derived_from: None,
        }
    }

    /// Override the table name; defaults to the pluralized lowercase name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Raw schema text for the type's table.
    pub fn structure(mut self, structure: impl Into<String>) -> Self {
        self.structure = Some(structure.into());
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fallback(mut self, rule: FallbackRule) -> Self {
        self.fallback = rule;
        self
    }

    /// The type's own population steps, run when mining original sources.
    pub fn miner(mut self, steps: Vec<Step>) -> Self {
        self.miner = Some(steps);
        self
    }

    /// Declare a structurally related ancestor whose population runs before
    /// this type's own when parent associations are included.
    pub fn parent(mut self, name: impl Into<String>) -> Self {
        self.parents.push(name.into());
        self
    }

    /// Declare this type as derived from `name`; rebuilding the base table
    /// also forgets this type's cached column layout.
    pub fn derived_from(mut self, name: impl Into<String>) -> Self {
        self.derived_from = Some(name.into());
        self
    }
}

/// A registered reference-data class. Identity is immutable; the population
/// script is mutated by composition during initialization and read-only
/// once population begins.
pub struct RecordType {
    name: String,
    table: String,
    primary_key: String,
    key_kind: KeyKind,
    structure: Option<String>,
    fields: Vec<Field>,
    fallback: FallbackRule,
    miner: Option<Vec<Step>>,
    script: PopulationScript,
    columns: RwLock<Option<Vec<String>>>,
}

impl RecordType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn key_kind(&self) -> KeyKind {
        self.key_kind
    }

    pub fn structure(&self) -> Option<&str> {
        self.structure.as_deref()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn fallback(&self) -> &FallbackRule {
        &self.fallback
    }

    pub(crate) fn miner(&self) -> Option<&[Step]> {
        self.miner.as_deref()
    }

    pub fn script(&self) -> &PopulationScript {
        &self.script
    }

    pub(crate) fn script_mut(&mut self) -> &mut PopulationScript {
        &mut self.script
    }

    /// Column layout of the backing table, loaded lazily and cached until
    /// [`Self::forget_columns`].
    pub async fn columns(&self, store: &dyn Store) -> Result<Vec<String>, StoreError> {
        if let Some(columns) = self.columns.read().expect("columns lock").clone() {
            return Ok(columns);
        }
        let columns = store.columns(&self.table).await?;
        *self.columns.write().expect("columns lock") = Some(columns.clone());
        Ok(columns)
    }

    pub fn forget_columns(&self) {
        *self.columns.write().expect("columns lock") = None;
    }

    pub fn remembers_columns(&self) -> bool {
        self.columns.read().expect("columns lock").is_some()
    }
}

/// Process-scoped registry of every declared record type, plus the two
/// explicit edge lists: parent associations and derived-from fan-out.
/// Populated at startup registration time, read-only thereafter.
#[derive(Default)]
pub struct Registry {
    types: BTreeMap<String, RecordType>,
    parents: BTreeMap<String, Vec<String>>,
    derived: BTreeMap<String, Vec<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a declared type. Edges must name already-registered types;
    /// dangling edges fail here rather than being skipped at rebuild time.
    pub fn register(&mut self, decl: RecordTypeDecl) -> crate::Result<()> {
        if self.types.contains_key(&decl.name) {
            return Err(Error::DuplicateType(decl.name));
        }
        for parent in &decl.parents {
            if !self.types.contains_key(parent) {
                return Err(Error::UnknownType(parent.clone()));
            }
        }
        if let Some(base) = &decl.derived_from {
            if !self.types.contains_key(base) {
                return Err(Error::UnknownType(base.clone()));
            }
        }
        log::debug!("registering record type {}", decl.name);
        let table = decl.table.unwrap_or_else(|| snapshot::slug(&decl.name));
        self.parents.insert(decl.name.clone(), decl.parents);
        if let Some(base) = decl.derived_from {
            self.derived.entry(base).or_default().push(decl.name.clone());
        }
        self.types.insert(
            decl.name.clone(),
            RecordType {
                name: decl.name,
                table,
                primary_key: decl.primary_key,
                key_kind: decl.key_kind,
                structure: decl.structure,
                fields: decl.fields,
                fallback: decl.fallback,
                miner: decl.miner,
                script: PopulationScript::default(),
                columns: RwLock::new(None),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> crate::Result<&RecordType> {
        self.types
            .get(name)
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> crate::Result<&mut RecordType> {
        self.types
            .get_mut(name)
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecordType> {
        self.types.values()
    }

    pub fn parents_of(&self, name: &str) -> &[String] {
        self.parents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn derived_of(&self, name: &str) -> &[String] {
        self.derived.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}
