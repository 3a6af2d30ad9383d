use super::StepAction;
use super::StepContext;
use crate::registry::Registry;
use crate::schema;
use crate::snapshot::SnapshotSource;
use crate::store::Store;
use futures::future::BoxFuture;
use std::collections::BTreeSet;

/// Execute `name`'s composed script: steps in phase order, each at most
/// once. Parent associations recurse through the registry's edge list; the
/// visited set keeps edge cycles terminating and runs each type at most
/// once per top-level call. The first failing step aborts the rest.
pub async fn run_script(
    registry: &Registry,
    store: &dyn Store,
    snapshots: &dyn SnapshotSource,
    name: &str,
) -> crate::Result<()> {
    let mut visited = BTreeSet::new();
    run_inner(registry, store, snapshots, name, &mut visited).await
}

fn run_inner<'a>(
    registry: &'a Registry,
    store: &'a dyn Store,
    snapshots: &'a dyn SnapshotSource,
    name: &'a str,
    visited: &'a mut BTreeSet<String>,
) -> BoxFuture<'a, crate::Result<()>> {
    Box::pin(async move {
        if !visited.insert(name.to_string()) {
            return Ok(());
        }
        let record_type = registry.get(name)?;
        log::info!(
            "populating {} with {:?}",
            record_type.name(),
            record_type.script().descriptions()
        );
        for step in record_type.script().steps() {
            log::debug!("{}: running {}:{}", name, step.phase, step.description);
            match &step.action {
                StepAction::RebuildTable => {
                    schema::rebuild_table(store, registry, name, true).await?;
                }
                StepAction::RunParentAssociations => {
                    for parent in registry.parents_of(name) {
                        run_inner(registry, store, snapshots, parent, visited).await?;
                    }
                }
                StepAction::FetchSnapshot { slug } => {
                    let script = snapshots.fetch(slug).await?;
                    let conn = store.checkout().await?;
                    for statement in schema::statements(&script) {
                        conn.execute(&statement).await?;
                    }
                }
                StepAction::Procedure(procedure) => {
                    let ctx = StepContext { store, record_type };
                    procedure.run(&ctx).await?;
                }
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::KeyKind;
    use crate::registry::RecordTypeDecl;
    use crate::script::ComposeOptions;
    use crate::script::Phase;
    use crate::script::Procedure;
    use crate::script::Step;
    use crate::script::compose;
    use crate::store::MemStore;
    use std::sync::Arc;
    use std::sync::Mutex;

    struct FixedSnapshots(&'static str);

    #[async_trait::async_trait]
    impl SnapshotSource for FixedSnapshots {
        async fn fetch(&self, _: &str) -> crate::Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Journal {
        entries: Arc<Mutex<Vec<String>>>,
        entry: &'static str,
    }

    #[async_trait::async_trait]
    impl Procedure for Journal {
        async fn run(&self, _: &StepContext<'_>) -> crate::Result<()> {
            self.entries.lock().expect("journal mutex").push(self.entry.to_string());
            Ok(())
        }
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[tokio::test]
    async fn snapshot_branch_applies_each_statement() {
        init_logging();
        let mut registry = Registry::new();
        registry
            .register(RecordTypeDecl::new("Country", "iso_3166_code", KeyKind::Text))
            .expect("register");
        compose(&mut registry, "Country", &ComposeOptions::default()).expect("compose");
        let store = MemStore::new();
        let snapshots =
            FixedSnapshots("CREATE TABLE countries (iso_3166_code varchar(2)); INSERT INTO countries VALUES ('US');");
        run_script(&registry, &store, &snapshots, "Country")
            .await
            .expect("run");
        assert_eq!(
            store.statements(),
            vec![
                "CREATE TABLE countries (iso_3166_code varchar(2))".to_string(),
                "INSERT INTO countries VALUES ('US')".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn mining_rebuilds_before_domain_steps() {
        let entries = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        registry
            .register(
                RecordTypeDecl::new("Country", "iso_3166_code", KeyKind::Text)
                    .structure("CREATE TABLE countries (iso_3166_code varchar(2), name text);")
                    .miner(vec![Step::procedure(
                        Phase::Process,
                        "import names",
                        Journal { entries: Arc::clone(&entries), entry: "import names" },
                    )]),
            )
            .expect("register");
        let options = ComposeOptions { mine_from_original_sources: true, ..Default::default() };
        compose(&mut registry, "Country", &options).expect("compose");
        let store = MemStore::new();
        run_script(&registry, &store, &FixedSnapshots(""), "Country")
            .await
            .expect("run");
        // table was rebuilt before the miner step ran
        assert_eq!(store.columns_of("countries").expect("table"), vec![
            "iso_3166_code".to_string(),
            "name".to_string(),
        ]);
        assert_eq!(*entries.lock().expect("journal mutex"), vec!["import names".to_string()]);
    }

    #[tokio::test]
    async fn parent_associations_run_parents_once() {
        init_logging();
        let entries = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        let miner = |entry| {
            vec![Step::procedure(
                Phase::Process,
                entry,
                Journal { entries: Arc::clone(&entries), entry },
            )]
        };
        registry
            .register(
                RecordTypeDecl::new("Country", "iso_3166_code", KeyKind::Text)
                    .structure("CREATE TABLE countries (iso_3166_code varchar(2));")
                    .miner(miner("populate countries")),
            )
            .expect("register");
        registry
            .register(
                RecordTypeDecl::new("ZipCode", "code", KeyKind::Text)
                    .structure("CREATE TABLE zip_codes (code text);")
                    .miner(miner("populate zip codes"))
                    .parent("Country"),
            )
            .expect("register");
        let options = ComposeOptions {
            include_parent_associations: true,
            mine_from_original_sources: true,
        };
        compose(&mut registry, "Country", &options).expect("compose");
        compose(&mut registry, "ZipCode", &options).expect("compose");
        run_script(&registry, &MemStore::new(), &FixedSnapshots(""), "ZipCode")
            .await
            .expect("run");
        let entries = entries.lock().expect("journal mutex").clone();
        assert_eq!(
            entries,
            vec!["populate countries".to_string(), "populate zip codes".to_string()]
        );
    }
}
