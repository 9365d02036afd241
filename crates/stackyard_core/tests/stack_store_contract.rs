use stackyard_core::{
    ComponentRecord, ComponentType, LocalStackStore, SqlStackStore, StackStore, StackWrapper,
    StoreError, DEFAULT_STACK_NAME,
};
use tempfile::TempDir;
use uuid::Uuid;

fn local_store(dir: &TempDir) -> Box<dyn StackStore> {
    Box::new(LocalStackStore::open(&LocalStackStore::local_url(dir.path())).unwrap())
}

fn sql_store(_dir: &TempDir) -> Box<dyn StackStore> {
    Box::new(SqlStackStore::open("sqlite://:memory:").unwrap())
}

fn seeded(open: fn(&TempDir) -> Box<dyn StackStore>) -> (TempDir, Box<dyn StackStore>) {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open(&dir);
    let stack = StackWrapper::default_local(dir.path()).unwrap();
    store.register_stack(&stack).unwrap();
    store.set_active_stack(DEFAULT_STACK_NAME).unwrap();
    (dir, store)
}

fn for_each_backend(check: fn(TempDir, Box<dyn StackStore>)) {
    for open in [local_store, sql_store] {
        let (dir, store) = seeded(open);
        check(dir, store);
    }
}

#[test]
fn registered_stack_roundtrips_with_full_component_records() {
    for_each_backend(|dir, store| {
        let stack = store.get_stack(DEFAULT_STACK_NAME).unwrap();
        assert_eq!(stack.name, DEFAULT_STACK_NAME);
        assert_eq!(stack.components.len(), 3);

        let expected = StackWrapper::default_local(dir.path()).unwrap();
        for record in &stack.components {
            let seeded = expected.component(record.kind).unwrap();
            assert_eq!(record.name, seeded.name);
            assert_eq!(record.flavor, seeded.flavor);
        }

        let stacks = store.stacks().unwrap();
        assert_eq!(stacks.len(), 1);
        assert_eq!(stacks[0], stack);
    });
}

#[test]
fn duplicate_stack_registration_is_a_conflict() {
    for_each_backend(|dir, mut store| {
        let stack = StackWrapper::default_local(dir.path()).unwrap();
        let err = store.register_stack(&stack).unwrap_err();
        assert!(matches!(err, StoreError::StackExists(_)));
        assert!(err.is_conflict());
        assert_eq!(store.stack_configurations().unwrap().len(), 1);
    });
}

#[test]
fn incomplete_stack_is_rejected_before_any_write() {
    for_each_backend(|_dir, mut store| {
        let orchestrator = ComponentRecord::new(
            ComponentType::Orchestrator,
            "lonely",
            "local",
            serde_json::json!({}),
        )
        .unwrap();
        let incomplete = StackWrapper::new("incomplete", vec![orchestrator]);

        let err = store.register_stack(&incomplete).unwrap_err();
        assert!(matches!(err, StoreError::InvalidStack(_)));
        assert!(err.is_invariant_violation());
        assert!(!store.stack_configurations().unwrap().contains_key("incomplete"));
        assert!(store
            .component_names(ComponentType::Orchestrator)
            .unwrap()
            .iter()
            .all(|name| name != "lonely"));
    });
}

#[test]
fn component_reregistration_with_matching_token_is_a_noop() {
    for_each_backend(|_dir, mut store| {
        let existing = store
            .get_component(ComponentType::Orchestrator, DEFAULT_STACK_NAME)
            .unwrap();

        store.register_component(&existing).unwrap();
        let reloaded = store
            .get_component(ComponentType::Orchestrator, DEFAULT_STACK_NAME)
            .unwrap();
        assert_eq!(reloaded.uuid, existing.uuid);
    });
}

#[test]
fn component_reregistration_with_differing_token_is_a_conflict() {
    for_each_backend(|_dir, mut store| {
        let impostor = ComponentRecord::with_token(
            ComponentType::Orchestrator,
            DEFAULT_STACK_NAME,
            "local",
            Uuid::new_v4(),
            serde_json::json!({}),
        )
        .unwrap();

        let original = store
            .get_component(ComponentType::Orchestrator, DEFAULT_STACK_NAME)
            .unwrap();
        let err = store.register_component(&impostor).unwrap_err();
        assert!(matches!(err, StoreError::ComponentExists { .. }));
        assert!(err.is_conflict());

        let unchanged = store
            .get_component(ComponentType::Orchestrator, DEFAULT_STACK_NAME)
            .unwrap();
        assert_eq!(unchanged.uuid, original.uuid);
    });
}

#[test]
fn active_stack_cannot_be_deregistered() {
    for_each_backend(|_dir, mut store| {
        let err = store.deregister_stack(DEFAULT_STACK_NAME).unwrap_err();
        assert!(matches!(err, StoreError::ActiveStackDeregistration(_)));
        assert!(err.is_invariant_violation());

        assert_eq!(store.active_stack_name().unwrap(), DEFAULT_STACK_NAME);
        assert!(store.get_stack(DEFAULT_STACK_NAME).is_ok());
    });
}

#[test]
fn referenced_component_cannot_be_deregistered() {
    for_each_backend(|_dir, mut store| {
        let err = store
            .deregister_component(ComponentType::Orchestrator, DEFAULT_STACK_NAME)
            .unwrap_err();
        assert!(matches!(err, StoreError::ComponentInUse { .. }));
        assert!(err.is_invariant_violation());

        assert!(store
            .get_component(ComponentType::Orchestrator, DEFAULT_STACK_NAME)
            .is_ok());
    });
}

#[test]
fn unreferenced_component_can_be_deregistered() {
    for_each_backend(|_dir, mut store| {
        let registry = ComponentRecord::new(
            ComponentType::ContainerRegistry,
            "harbor",
            "default",
            serde_json::json!({"uri": "registry.internal:5000"}),
        )
        .unwrap();
        store.register_component(&registry).unwrap();

        store
            .deregister_component(ComponentType::ContainerRegistry, "harbor")
            .unwrap();
        let err = store
            .get_component(ComponentType::ContainerRegistry, "harbor")
            .unwrap_err();
        assert!(err.is_not_found());
    });
}

#[test]
fn inactive_stack_can_be_deregistered() {
    for_each_backend(|_dir, mut store| {
        let default = store.get_stack(DEFAULT_STACK_NAME).unwrap();
        let second = StackWrapper::new("staging", default.components.clone());
        store.register_stack(&second).unwrap();

        store.deregister_stack("staging").unwrap();
        assert!(matches!(
            store.get_stack("staging").unwrap_err(),
            StoreError::StackNotFound(_)
        ));
        assert_eq!(store.active_stack_name().unwrap(), DEFAULT_STACK_NAME);
    });
}

#[test]
fn deregistering_a_stack_frees_its_exclusive_components() {
    for_each_backend(|_dir, mut store| {
        let default = store.get_stack(DEFAULT_STACK_NAME).unwrap();
        let own_orchestrator = ComponentRecord::new(
            ComponentType::Orchestrator,
            "kube",
            "local",
            serde_json::json!({}),
        )
        .unwrap();
        let mut components = vec![own_orchestrator.clone()];
        components.push(
            default
                .component(ComponentType::MetadataStore)
                .unwrap()
                .clone(),
        );
        components.push(
            default
                .component(ComponentType::ArtifactStore)
                .unwrap()
                .clone(),
        );
        store
            .register_stack(&StackWrapper::new("s1", components))
            .unwrap();

        let err = store
            .deregister_component(ComponentType::Orchestrator, "kube")
            .unwrap_err();
        assert!(matches!(err, StoreError::ComponentInUse { .. }));

        store.deregister_stack("s1").unwrap();
        store
            .deregister_component(ComponentType::Orchestrator, "kube")
            .unwrap();
        assert!(store
            .get_component(ComponentType::Orchestrator, "kube")
            .unwrap_err()
            .is_not_found());
    });
}

#[test]
fn activating_an_unknown_stack_fails() {
    for_each_backend(|_dir, mut store| {
        let err = store.set_active_stack("phantom").unwrap_err();
        assert!(matches!(err, StoreError::StackNotFound(_)));
        assert_eq!(store.active_stack_name().unwrap(), DEFAULT_STACK_NAME);
    });
}

#[test]
fn lookup_of_unknown_names_is_not_found() {
    for_each_backend(|_dir, store| {
        assert!(store.get_stack("phantom").unwrap_err().is_not_found());
        assert!(store
            .get_component(ComponentType::SecretsManager, "phantom")
            .unwrap_err()
            .is_not_found());
    });
}

#[test]
fn local_store_persists_identity_tokens_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = LocalStackStore::local_url(dir.path());

    let registered = {
        let mut store = LocalStackStore::open(&url).unwrap();
        let stack = StackWrapper::default_local(dir.path()).unwrap();
        store.register_stack(&stack).unwrap();
        store.set_active_stack(DEFAULT_STACK_NAME).unwrap();
        store
            .get_component(ComponentType::MetadataStore, DEFAULT_STACK_NAME)
            .unwrap()
    };

    let reopened = LocalStackStore::open(&url).unwrap();
    let reloaded = reopened
        .get_component(ComponentType::MetadataStore, DEFAULT_STACK_NAME)
        .unwrap();
    assert_eq!(reloaded.uuid, registered.uuid);
    assert_eq!(reloaded.payload, registered.payload);
    assert_eq!(reopened.active_stack_name().unwrap(), DEFAULT_STACK_NAME);
}

#[test]
fn sql_store_persists_identity_tokens_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = SqlStackStore::local_url(dir.path());

    let registered = {
        let mut store = SqlStackStore::open(&url).unwrap();
        let stack = StackWrapper::default_local(dir.path()).unwrap();
        store.register_stack(&stack).unwrap();
        store.set_active_stack(DEFAULT_STACK_NAME).unwrap();
        store
            .get_component(ComponentType::MetadataStore, DEFAULT_STACK_NAME)
            .unwrap()
    };

    let reopened = SqlStackStore::open(&url).unwrap();
    let reloaded = reopened
        .get_component(ComponentType::MetadataStore, DEFAULT_STACK_NAME)
        .unwrap();
    assert_eq!(reloaded.uuid, registered.uuid);
    assert_eq!(reopened.active_stack_name().unwrap(), DEFAULT_STACK_NAME);
}
