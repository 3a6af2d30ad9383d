use super::Phase;
use super::Step;
use super::StepAction;
use crate::error::Error;
use crate::registry::Registry;
use crate::snapshot;

/// Step descriptions fixed by the composer.
pub const REBUILD: &str = "rebuild table";
pub const PARENT_ASSOCIATIONS: &str = "run parent associations";
pub const SNAPSHOT: &str = "pre-mined reference data";

/// Which steps a composition call asks for.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComposeOptions {
    /// Append a step that re-runs every declared ancestor's population.
    pub include_parent_associations: bool,
    /// Load the type's own step definitions and rebuild its table first;
    /// otherwise fetch the pre-mined snapshot instead.
    pub mine_from_original_sources: bool,
}

/// Compose `name`'s population script from `options`.
///
/// Insertion is keyed by `(phase, description)`, so composing repeatedly or
/// with overlapping option sets never duplicates a step. When the options
/// ask for mining and the type declared no step definitions, this fails
/// with [`Error::DefinitionNotFound`] before touching the script.
pub fn compose(
    registry: &mut Registry,
    name: &str,
    options: &ComposeOptions,
) -> crate::Result<()> {
    let record_type = registry.get_mut(name)?;
    if options.mine_from_original_sources && record_type.miner().is_none() {
        return Err(Error::DefinitionNotFound(name.to_string()));
    }
    log::debug!(
        "{name} script before: {:?}",
        record_type.script().descriptions()
    );
    if options.include_parent_associations {
        record_type.script_mut().append_once(Step::new(
            Phase::Process,
            PARENT_ASSOCIATIONS,
            StepAction::RunParentAssociations,
        ));
    }
    if options.mine_from_original_sources {
        let miner: Vec<Step> = record_type
            .miner()
            .map(|steps| steps.to_vec())
            .unwrap_or_default();
        for step in miner {
            record_type.script_mut().append_once(step);
        }
        record_type.script_mut().prepend_once(Step::new(
            Phase::Process,
            REBUILD,
            StepAction::RebuildTable,
        ));
    } else {
        let slug = snapshot::slug(record_type.name());
        record_type.script_mut().prepend_once(Step::new(
            Phase::Sql,
            SNAPSHOT,
            StepAction::FetchSnapshot { slug },
        ));
    }
    log::debug!(
        "{name} script after: {:?}",
        record_type.script().descriptions()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::Procedure;
    use super::super::StepContext;
    use crate::registry::KeyKind;
    use crate::registry::RecordTypeDecl;

    struct Noop;

    #[async_trait::async_trait]
    impl Procedure for Noop {
        async fn run(&self, _: &StepContext<'_>) -> crate::Result<()> {
            Ok(())
        }
    }

    fn mined() -> RecordTypeDecl {
        RecordTypeDecl::new("Country", "iso_3166_code", KeyKind::Text).miner(vec![
            Step::procedure(Phase::Process, "import codes", Noop),
            Step::procedure(Phase::Process, "import names", Noop),
        ])
    }

    fn registry_with(decl: RecordTypeDecl) -> Registry {
        let mut registry = Registry::new();
        registry.register(decl).expect("register");
        registry
    }

    #[test]
    fn rebuild_precedes_every_other_process_step() {
        let mut registry = registry_with(mined());
        let options = ComposeOptions {
            include_parent_associations: true,
            mine_from_original_sources: true,
        };
        compose(&mut registry, "Country", &options).expect("compose");
        let script = registry.get("Country").expect("type").script();
        assert_eq!(
            script.descriptions().first().map(String::as_str),
            Some("process:rebuild table")
        );
    }

    #[test]
    fn premined_branch_prepends_snapshot_fetch() {
        let mut registry = registry_with(mined());
        compose(&mut registry, "Country", &ComposeOptions::default()).expect("compose");
        let script = registry.get("Country").expect("type").script();
        assert_eq!(
            script.descriptions(),
            vec!["sql:pre-mined reference data".to_string()]
        );
        let step = script.steps().next().expect("step");
        assert!(
            matches!(&step.action, StepAction::FetchSnapshot { slug } if slug == "countries")
        );
    }

    #[test]
    fn recomposition_never_duplicates_steps() {
        let mut registry = registry_with(mined());
        let narrow = ComposeOptions {
            include_parent_associations: true,
            ..Default::default()
        };
        let wide = ComposeOptions {
            include_parent_associations: true,
            mine_from_original_sources: true,
        };
        compose(&mut registry, "Country", &narrow).expect("compose");
        compose(&mut registry, "Country", &wide).expect("compose");
        compose(&mut registry, "Country", &wide).expect("compose");
        let script = registry.get("Country").expect("type").script();
        let mut keys: Vec<String> = script.descriptions();
        let total = keys.len();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), total);
        // union of both option sets: rebuild + 2 miner steps + parents + snapshot
        assert_eq!(total, 5);
    }

    #[test]
    fn mining_without_step_definitions_fails_clean() {
        let mut registry =
            registry_with(RecordTypeDecl::new("Country", "iso_3166_code", KeyKind::Text));
        let options = ComposeOptions {
            include_parent_associations: true,
            mine_from_original_sources: true,
        };
        let err = compose(&mut registry, "Country", &options).expect_err("no miner");
        assert!(matches!(err, Error::DefinitionNotFound(_)));
        // no partial composition
        assert!(registry.get("Country").expect("type").script().is_empty());
    }

    #[test]
    fn parent_step_is_appended_not_prepended() {
        let mut registry = registry_with(mined());
        let options = ComposeOptions {
            include_parent_associations: true,
            mine_from_original_sources: true,
        };
        compose(&mut registry, "Country", &options).expect("compose");
        let script = registry.get("Country").expect("type").script();
        assert_eq!(
            script.descriptions().last().map(String::as_str),
            Some("process:import names")
        );
    }
}
