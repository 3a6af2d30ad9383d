//! Population scripts: ordered, de-duplicated step lists.
//!
//! A script is a sequence of named steps grouped into phases. Insertion is
//! a set-union operation keyed by `(phase, description)` — requesting a step
//! that is already present is a no-op, whichever end it was aimed at.

mod compose;
mod run;

pub use compose::*;
pub use run::*;

use crate::registry::RecordType;
use crate::store::Store;
use std::fmt;
use std::sync::Arc;

/// Logical stage of a population script. Scripts run phases in declaration
/// order: `Sql` first, then `Process`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Sql,
    Process,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sql => write!(f, "sql"),
            Self::Process => write!(f, "process"),
        }
    }
}

/// Everything a step needs at execution time.
pub struct StepContext<'a> {
    pub store: &'a dyn Store,
    pub record_type: &'a RecordType,
}

/// An opaque named unit of population work declared by a domain module.
#[async_trait::async_trait]
pub trait Procedure: Send + Sync {
    async fn run(&self, ctx: &StepContext<'_>) -> crate::Result<()>;
}

/// What a step does when the runner reaches it.
#[derive(Clone)]
pub enum StepAction {
    /// Drop and recreate the type's table from its structure definition.
    RebuildTable,
    /// Re-run the population of every declared parent association.
    RunParentAssociations,
    /// Fetch and apply a remote pre-mined snapshot of the table.
    FetchSnapshot { slug: String },
    /// Domain-declared work.
    Procedure(Arc<dyn Procedure>),
}

impl fmt::Debug for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RebuildTable => write!(f, "RebuildTable"),
            Self::RunParentAssociations => write!(f, "RunParentAssociations"),
            Self::FetchSnapshot { slug } => write!(f, "FetchSnapshot({slug})"),
            Self::Procedure(_) => write!(f, "Procedure"),
        }
    }
}

/// An ordered, named unit of work within a script.
#[derive(Debug, Clone)]
pub struct Step {
    pub phase: Phase,
    pub description: String,
    pub action: StepAction,
}

impl Step {
    pub fn new(phase: Phase, description: impl Into<String>, action: StepAction) -> Self {
        Self { phase, description: description.into(), action }
    }

    pub fn procedure(
        phase: Phase,
        description: impl Into<String>,
        procedure: impl Procedure + 'static,
    ) -> Self {
        Self::new(phase, description, StepAction::Procedure(Arc::new(procedure)))
    }
}

/// The step sequence of one record type. Steps stay grouped by phase; both
/// insertion ends are idempotent on `(phase, description)`.
#[derive(Debug, Clone, Default)]
pub struct PopulationScript {
    steps: Vec<Step>,
}

impl PopulationScript {
    /// Insert at the back of the step's phase. Returns false if the key was
    /// already present.
    pub fn append_once(&mut self, step: Step) -> bool {
        if self.contains(step.phase, &step.description) {
            return false;
        }
        let (_, end) = self.span(step.phase);
        self.steps.insert(end, step);
        true
    }

    /// Insert at the front of the step's phase. Returns false if the key was
    /// already present.
    pub fn prepend_once(&mut self, step: Step) -> bool {
        if self.contains(step.phase, &step.description) {
            return false;
        }
        let (start, _) = self.span(step.phase);
        self.steps.insert(start, step);
        true
    }

    pub fn contains(&self, phase: Phase, description: &str) -> bool {
        self.steps
            .iter()
            .any(|s| s.phase == phase && s.description == description)
    }

    /// Steps in execution order: phases in declaration order, insertion
    /// order within each phase.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }

    /// Human-readable step listing for diagnostic traces.
    pub fn descriptions(&self) -> Vec<String> {
        self.steps
            .iter()
            .map(|s| format!("{}:{}", s.phase, s.description))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    // Half-open index range occupied by `phase`; relies on steps staying
    // sorted by phase.
    fn span(&self, phase: Phase) -> (usize, usize) {
        let start = self
            .steps
            .iter()
            .position(|s| s.phase >= phase)
            .unwrap_or(self.steps.len());
        let end = start
            + self.steps[start..]
                .iter()
                .take_while(|s| s.phase == phase)
                .count();
        (start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(phase: Phase, description: &str) -> Step {
        Step::new(phase, description, StepAction::RebuildTable)
    }

    #[test]
    fn append_is_idempotent() {
        let mut script = PopulationScript::default();
        assert!(script.append_once(noop(Phase::Process, "import")));
        assert!(!script.append_once(noop(Phase::Process, "import")));
        assert_eq!(script.len(), 1);
    }

    #[test]
    fn prepend_after_append_is_a_noop() {
        let mut script = PopulationScript::default();
        script.append_once(noop(Phase::Process, "import"));
        assert!(!script.prepend_once(noop(Phase::Process, "import")));
        assert_eq!(script.len(), 1);
    }

    #[test]
    fn prepend_lands_before_existing_phase_steps() {
        let mut script = PopulationScript::default();
        script.append_once(noop(Phase::Process, "second"));
        script.prepend_once(noop(Phase::Process, "first"));
        assert_eq!(
            script.descriptions(),
            vec!["process:first".to_string(), "process:second".to_string()]
        );
    }

    #[test]
    fn sql_phase_runs_before_process_phase() {
        let mut script = PopulationScript::default();
        script.append_once(noop(Phase::Process, "derive"));
        script.append_once(noop(Phase::Sql, "load"));
        assert_eq!(
            script.descriptions(),
            vec!["sql:load".to_string(), "process:derive".to_string()]
        );
    }

    #[test]
    fn same_description_in_distinct_phases_is_two_steps() {
        let mut script = PopulationScript::default();
        script.append_once(noop(Phase::Sql, "import"));
        script.append_once(noop(Phase::Process, "import"));
        assert_eq!(script.len(), 2);
    }
}
