use stackyard_core::{
    ComponentRecord, ComponentType, FlavorRegistry, GlobalConfig, Repository, RepositoryError,
    StackWrapper, StoreError, DEFAULT_STACK_NAME,
};

fn repository_in(dir: &std::path::Path) -> Repository {
    let config = GlobalConfig::load(dir).unwrap();
    Repository::new(&config).unwrap()
}

#[test]
fn empty_store_is_seeded_with_the_default_stack() {
    let dir = tempfile::tempdir().unwrap();
    let repository = repository_in(dir.path());

    assert_eq!(repository.active_stack_name().unwrap(), DEFAULT_STACK_NAME);
    let stack = repository.active_stack().unwrap();
    assert!(stack.component(ComponentType::Orchestrator).is_some());
    assert!(stack.component(ComponentType::MetadataStore).is_some());
    assert!(stack.component(ComponentType::ArtifactStore).is_some());
}

#[test]
fn seeding_happens_once_per_store() {
    let dir = tempfile::tempdir().unwrap();

    let first = repository_in(dir.path());
    let seeded = first.active_stack().unwrap();
    drop(first);

    let second = repository_in(dir.path());
    assert_eq!(second.stack_configurations().unwrap().len(), 1);
    assert_eq!(second.active_stack().unwrap(), seeded);
}

#[test]
fn stack_lifecycle_through_the_facade() {
    let dir = tempfile::tempdir().unwrap();
    let mut repository = repository_in(dir.path());

    let default = repository.get_stack(DEFAULT_STACK_NAME).unwrap();
    let staging = StackWrapper::new("staging", default.components.clone());
    repository.register_stack(&staging).unwrap();
    assert_eq!(repository.stacks().unwrap().len(), 2);

    repository.activate_stack("staging").unwrap();
    assert_eq!(repository.active_stack_name().unwrap(), "staging");

    repository.deregister_stack(DEFAULT_STACK_NAME).unwrap();
    let err = repository.get_stack(DEFAULT_STACK_NAME).unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Store(StoreError::StackNotFound(_))
    ));
}

#[test]
fn component_lifecycle_through_the_facade() {
    let dir = tempfile::tempdir().unwrap();
    let mut repository = repository_in(dir.path());

    let secrets = ComponentRecord::new(
        ComponentType::SecretsManager,
        "vault",
        "local",
        serde_json::json!({"mount": "/secrets"}),
    )
    .unwrap();
    repository.register_component(&secrets).unwrap();

    let loaded = repository
        .get_component(ComponentType::SecretsManager, "vault")
        .unwrap();
    assert_eq!(loaded.uuid, secrets.uuid);
    assert_eq!(
        repository
            .get_components(ComponentType::SecretsManager)
            .unwrap()
            .len(),
        1
    );

    repository
        .deregister_component(ComponentType::SecretsManager, "vault")
        .unwrap();
    let err = repository
        .get_component(ComponentType::SecretsManager, "vault")
        .unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Store(StoreError::ComponentNotFound { .. })
    ));
}

#[test]
fn pipeline_runs_are_empty_before_any_execution() {
    let dir = tempfile::tempdir().unwrap();
    let repository = repository_in(dir.path());
    let registry = FlavorRegistry::builtin();

    assert!(repository.pipeline_runs(&registry, None).unwrap().is_empty());
    assert!(repository
        .pipeline_run(&registry, None, "first-run")
        .unwrap()
        .is_none());
}

#[test]
fn pipeline_runs_are_read_from_the_metadata_store_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = GlobalConfig::load(dir.path()).unwrap();
    let repository = Repository::new(&config).unwrap();
    let registry = FlavorRegistry::builtin();

    // Simulate an execution engine recording one finished run in the
    // seeded metadata store's database.
    let database = config
        .profile_dir(stackyard_core::DEFAULT_PROFILE_NAME)
        .join("metadata.db");
    let conn = rusqlite::Connection::open(&database).unwrap();
    conn.execute_batch(
        "CREATE TABLE pipeline_runs (
            pipeline_name TEXT NOT NULL,
            run_name TEXT NOT NULL,
            status TEXT NOT NULL,
            finished_at INTEGER
        );
        INSERT INTO pipeline_runs VALUES ('etl', 'etl-001', 'succeeded', 1724400000000);",
    )
    .unwrap();
    drop(conn);

    let runs = repository.pipeline_runs(&registry, None).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].pipeline_name, "etl");
    assert_eq!(runs[0].status, stackyard_core::RunStatus::Succeeded);

    let run = repository.pipeline_run(&registry, None, "etl-001").unwrap();
    assert!(run.is_some());
    assert!(repository
        .pipeline_run(&registry, None, "etl-002")
        .unwrap()
        .is_none());
}

#[test]
fn pipeline_runs_can_be_scoped_to_a_named_stack() {
    let dir = tempfile::tempdir().unwrap();
    let config = GlobalConfig::load(dir.path()).unwrap();
    let mut repository = Repository::new(&config).unwrap();
    let registry = FlavorRegistry::builtin();

    // A second stack with its own metadata store database.
    let staging_db = dir.path().join("staging-metadata.db");
    let default = repository.get_stack(DEFAULT_STACK_NAME).unwrap();
    let metadata_store = ComponentRecord::new(
        ComponentType::MetadataStore,
        "staging",
        "sqlite",
        serde_json::json!({"database": staging_db.display().to_string()}),
    )
    .unwrap();
    let mut components = vec![metadata_store];
    components.push(
        default
            .component(ComponentType::Orchestrator)
            .unwrap()
            .clone(),
    );
    components.push(
        default
            .component(ComponentType::ArtifactStore)
            .unwrap()
            .clone(),
    );
    repository
        .register_stack(&StackWrapper::new("staging", components))
        .unwrap();

    let conn = rusqlite::Connection::open(&staging_db).unwrap();
    conn.execute_batch(
        "CREATE TABLE pipeline_runs (
            pipeline_name TEXT NOT NULL,
            run_name TEXT NOT NULL,
            status TEXT NOT NULL,
            finished_at INTEGER
        );
        INSERT INTO pipeline_runs VALUES ('train', 'train-007', 'failed', 1724400100000);",
    )
    .unwrap();
    drop(conn);

    // The named stack serves its own records; the active stack has none.
    let runs = repository
        .pipeline_runs(&registry, Some("staging"))
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_name, "train-007");
    assert!(repository.pipeline_runs(&registry, None).unwrap().is_empty());

    let run = repository
        .pipeline_run(&registry, Some("staging"), "train-007")
        .unwrap();
    assert_eq!(run.unwrap().status, stackyard_core::RunStatus::Failed);

    let err = repository
        .pipeline_runs(&registry, Some("phantom"))
        .unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Store(StoreError::StackNotFound(_))
    ));
}
