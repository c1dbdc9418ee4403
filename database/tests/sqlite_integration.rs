use workflow_core::error::EngineError;
use workflow_core::models::{
    ContainerType, Dependency, DependencyType, EntityId, NewFeature, NewProject, NewTask, Priority,
};
use workflow_database::{EntityStore, SqliteEntityStore};

async fn create_test_store() -> SqliteEntityStore {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let thread_id = std::thread::current().id();
    let db_name = format!(":memory:test_{timestamp}_{thread_id:?}");
    let store = SqliteEntityStore::new(&db_name).await.unwrap();
    store.migrate().await.unwrap();
    store
}

#[tokio::test]
async fn store_creation_and_health_check() {
    let store = create_test_store().await;
    assert!(store.health_check().await.is_ok());
}

#[tokio::test]
async fn full_project_feature_task_hierarchy() {
    let store = create_test_store().await;

    let project = store
        .create_project(NewProject {
            name: "Workflow Engine".to_string(),
            summary: "state engine".to_string(),
            description: Some("long form".to_string()),
            tags: vec!["backend".to_string()],
        })
        .await
        .unwrap();

    let feature = store
        .create_feature(NewFeature {
            project_id: Some(project.id),
            name: "Cascade Service".to_string(),
            summary: "auto-unblock downstream work".to_string(),
            description: None,
            priority: Priority::High,
            tags: vec![],
            requires_verification: true,
        })
        .await
        .unwrap();
    assert_eq!(feature.project_id, Some(project.id));

    let task = store
        .create_task(NewTask {
            project_id: Some(project.id),
            feature_id: Some(feature.id),
            title: "Implement recursive apply_cascades".to_string(),
            summary: "depth-bounded recursion".to_string(),
            description: None,
            priority: Priority::Medium,
            complexity: 6,
            tags: vec![],
            requires_verification: false,
        })
        .await
        .unwrap();
    assert_eq!(task.feature_id, Some(feature.id));

    let features = store.find_features_by_project(project.id).await.unwrap();
    assert_eq!(features.len(), 1);

    let tasks = store.find_tasks_by_feature(feature.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, task.id);
}

#[tokio::test]
async fn update_task_bumps_version_and_rejects_stale_writes() {
    let store = create_test_store().await;
    let mut task = store
        .create_task(NewTask {
            project_id: None,
            feature_id: None,
            title: "Task".to_string(),
            summary: "summary".to_string(),
            description: None,
            priority: Priority::Low,
            complexity: 3,
            tags: vec![],
            requires_verification: false,
        })
        .await
        .unwrap();
    assert_eq!(task.version, 1);

    task.version = 2;
    task.status = workflow_core::models::Status::new("in-progress");
    let updated = store.update_task(task.clone()).await.unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.status.as_str(), "in-progress");

    // Submitting the same stale base version again must conflict.
    let mut stale = task.clone();
    stale.version = 2;
    let err = store.update_task(stale).await.unwrap_err();
    assert!(matches!(err, EngineError::VersionConflict { .. }));
}

#[tokio::test]
async fn sections_are_scoped_by_entity_and_title_is_unique() {
    let store = create_test_store().await;
    let task = store
        .create_task(NewTask {
            project_id: None,
            feature_id: None,
            title: "Task".to_string(),
            summary: "summary".to_string(),
            description: None,
            priority: Priority::Medium,
            complexity: 5,
            tags: vec![],
            requires_verification: true,
        })
        .await
        .unwrap();

    let section = store
        .create_section(workflow_core::models::Section {
            id: EntityId::new(),
            entity_type: ContainerType::Task,
            entity_id: task.id,
            title: "Verification".to_string(),
            usage_description: "machine-checkable gate".to_string(),
            content: r#"[{"criteria": "tests pass", "pass": true}]"#.to_string(),
            content_format: workflow_core::models::ContentFormat::Json,
            ordinal: 0,
            version: 1,
        })
        .await
        .unwrap();

    let found = store
        .find_section_by_title(ContainerType::Task, task.id, "Verification")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, section.id);

    let duplicate = store
        .create_section(workflow_core::models::Section {
            id: EntityId::new(),
            entity_type: ContainerType::Task,
            entity_id: task.id,
            title: "Verification".to_string(),
            usage_description: String::new(),
            content: String::new(),
            content_format: workflow_core::models::ContentFormat::Markdown,
            ordinal: 1,
            version: 1,
        })
        .await;
    assert!(duplicate.is_err());
}

#[tokio::test]
async fn dependency_queries_filter_by_type() {
    let store = create_test_store().await;
    let blocked = store
        .create_task(NewTask {
            project_id: None,
            feature_id: None,
            title: "Blocked task".to_string(),
            summary: "summary".to_string(),
            description: None,
            priority: Priority::Medium,
            complexity: 5,
            tags: vec![],
            requires_verification: false,
        })
        .await
        .unwrap();
    let blocker = store
        .create_task(NewTask {
            project_id: None,
            feature_id: None,
            title: "Blocker task".to_string(),
            summary: "summary".to_string(),
            description: None,
            priority: Priority::Medium,
            complexity: 5,
            tags: vec![],
            requires_verification: false,
        })
        .await
        .unwrap();

    store
        .create_dependency(Dependency {
            id: EntityId::new(),
            from_task_id: blocked.id,
            to_task_id: blocker.id,
            dependency_type: DependencyType::IsBlockedBy,
        })
        .await
        .unwrap();

    let deps = store
        .find_by_from_task_id(blocked.id, Some(DependencyType::IsBlockedBy))
        .await
        .unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].to_task_id, blocker.id);

    let incoming = store.find_by_to_task_id(blocker.id, None).await.unwrap();
    assert_eq!(incoming.len(), 1);

    let none_matching = store
        .find_by_from_task_id(blocked.id, Some(DependencyType::Blocks))
        .await
        .unwrap();
    assert!(none_matching.is_empty());
}

#[tokio::test]
async fn feature_counts_track_completion() {
    let store = create_test_store().await;
    let project = store
        .create_project(NewProject {
            name: "Project".to_string(),
            summary: "summary".to_string(),
            description: None,
            tags: vec![],
        })
        .await
        .unwrap();

    for _ in 0..2 {
        store
            .create_feature(NewFeature {
                project_id: Some(project.id),
                name: "Feature".to_string(),
                summary: "summary".to_string(),
                description: None,
                priority: Priority::Medium,
                tags: vec![],
                requires_verification: false,
            })
            .await
            .unwrap();
    }
    let mut third = store
        .create_feature(NewFeature {
            project_id: Some(project.id),
            name: "Feature three".to_string(),
            summary: "summary".to_string(),
            description: None,
            priority: Priority::Medium,
            tags: vec![],
            requires_verification: false,
        })
        .await
        .unwrap();
    third.version += 1;
    third.status = workflow_core::models::Status::new("completed");
    store.update_feature(third).await.unwrap();

    let counts = store.get_feature_counts_by_project_id(project.id).await.unwrap();
    assert_eq!(counts.total, 3);
    assert_eq!(counts.completed, 1);
}

#[tokio::test]
async fn delete_project_does_not_cascade_but_detaches_children() {
    let store = create_test_store().await;
    let project = store
        .create_project(NewProject {
            name: "Project".to_string(),
            summary: "summary".to_string(),
            description: None,
            tags: vec![],
        })
        .await
        .unwrap();
    let feature = store
        .create_feature(NewFeature {
            project_id: Some(project.id),
            name: "Feature".to_string(),
            summary: "summary".to_string(),
            description: None,
            priority: Priority::Medium,
            tags: vec![],
            requires_verification: false,
        })
        .await
        .unwrap();

    store.delete_project(project.id).await.unwrap();

    let still_there = store.get_feature(feature.id).await.unwrap();
    assert!(still_there.is_some(), "ON DELETE SET NULL must not remove the feature row");
    assert_eq!(still_there.unwrap().project_id, None);
}
