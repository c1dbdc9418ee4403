//! In-memory implementation of `EntityStore`.
//!
//! Grounded on the teacher's `MockTaskRepository`: a `parking_lot::Mutex`
//! per collection, an error-injection slot consumed by the next call, and a
//! call-history log assertable from tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use workflow_core::error::{EngineError, Result};
use workflow_core::models::{
    ContainerType, Dependency, DependencyType, EntityId, Feature, FeatureCounts, NewFeature,
    NewProject, NewTask, Project, Section, Status, Task, TaskCounts,
};
use workflow_core::store::EntityStore;

#[derive(Default)]
pub struct InMemoryEntityStore {
    projects: Mutex<HashMap<EntityId, Project>>,
    features: Mutex<HashMap<EntityId, Feature>>,
    tasks: Mutex<HashMap<EntityId, Task>>,
    sections: Mutex<HashMap<EntityId, Section>>,
    dependencies: Mutex<HashMap<EntityId, Dependency>>,
    error_injection: Mutex<Option<EngineError>>,
    call_history: Mutex<Vec<String>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error to be returned by the next call, then cleared.
    pub fn inject_error(&self, error: EngineError) {
        *self.error_injection.lock() = Some(error);
    }

    pub fn call_history(&self) -> Vec<String> {
        self.call_history.lock().clone()
    }

    pub fn clear_history(&self) {
        self.call_history.lock().clear();
    }

    pub fn assert_called(&self, method: &str) {
        let history = self.call_history.lock();
        assert!(
            history.iter().any(|call| call.contains(method)),
            "method '{method}' was not called. call history: {history:?}"
        );
    }

    fn record(&self, method: &str) {
        self.call_history.lock().push(method.to_string());
    }

    fn check_error_injection(&self) -> Result<()> {
        if let Some(error) = self.error_injection.lock().take() {
            return Err(error);
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn create_project(&self, new: NewProject) -> Result<Project> {
        self.record("create_project");
        self.check_error_injection()?;
        if new.name.trim().is_empty() {
            return Err(EngineError::empty_field("name"));
        }
        let now = Utc::now();
        let project = Project {
            id: EntityId::new(),
            name: new.name,
            summary: new.summary,
            description: new.description,
            status: Status::new("planning"),
            tags: workflow_core::models::normalize_tags(&new.tags),
            version: 1,
            created_at: now,
            modified_at: now,
        };
        self.projects.lock().insert(project.id, project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: EntityId) -> Result<Option<Project>> {
        self.record("get_project");
        self.check_error_injection()?;
        Ok(self.projects.lock().get(&id).cloned())
    }

    async fn update_project(&self, project: Project) -> Result<Project> {
        self.record("update_project");
        self.check_error_injection()?;
        let mut projects = self.projects.lock();
        let existing = projects
            .get(&project.id)
            .ok_or_else(|| EngineError::not_found("project", project.id))?;
        let expected = project.version - 1;
        if existing.version != expected {
            return Err(EngineError::version_conflict(project.id, expected, existing.version));
        }
        projects.insert(project.id, project.clone());
        Ok(project)
    }

    async fn delete_project(&self, id: EntityId) -> Result<()> {
        self.record("delete_project");
        self.check_error_injection()?;
        self.projects.lock().remove(&id);
        for feature in self.features.lock().values_mut() {
            if feature.project_id == Some(id) {
                feature.project_id = None;
            }
        }
        Ok(())
    }

    async fn create_feature(&self, new: NewFeature) -> Result<Feature> {
        self.record("create_feature");
        self.check_error_injection()?;
        if new.name.trim().is_empty() {
            return Err(EngineError::empty_field("name"));
        }
        let now = Utc::now();
        let feature = Feature {
            id: EntityId::new(),
            project_id: new.project_id,
            name: new.name,
            summary: new.summary,
            description: new.description,
            status: Status::new("planning"),
            priority: new.priority,
            tags: workflow_core::models::normalize_tags(&new.tags),
            requires_verification: new.requires_verification,
            version: 1,
            created_at: now,
            modified_at: now,
        };
        self.features.lock().insert(feature.id, feature.clone());
        Ok(feature)
    }

    async fn get_feature(&self, id: EntityId) -> Result<Option<Feature>> {
        self.record("get_feature");
        self.check_error_injection()?;
        Ok(self.features.lock().get(&id).cloned())
    }

    async fn update_feature(&self, feature: Feature) -> Result<Feature> {
        self.record("update_feature");
        self.check_error_injection()?;
        let mut features = self.features.lock();
        let existing = features
            .get(&feature.id)
            .ok_or_else(|| EngineError::not_found("feature", feature.id))?;
        let expected = feature.version - 1;
        if existing.version != expected {
            return Err(EngineError::version_conflict(feature.id, expected, existing.version));
        }
        features.insert(feature.id, feature.clone());
        Ok(feature)
    }

    async fn delete_feature(&self, id: EntityId) -> Result<()> {
        self.record("delete_feature");
        self.check_error_injection()?;
        self.features.lock().remove(&id);
        for task in self.tasks.lock().values_mut() {
            if task.feature_id == Some(id) {
                task.feature_id = None;
            }
        }
        Ok(())
    }

    async fn find_features_by_project(&self, project_id: EntityId) -> Result<Vec<Feature>> {
        self.record("find_features_by_project");
        self.check_error_injection()?;
        Ok(self
            .features
            .lock()
            .values()
            .filter(|f| f.project_id == Some(project_id))
            .cloned()
            .collect())
    }

    async fn create_task(&self, new: NewTask) -> Result<Task> {
        self.record("create_task");
        self.check_error_injection()?;
        if new.title.trim().is_empty() {
            return Err(EngineError::empty_field("title"));
        }
        let now = Utc::now();
        let task = Task {
            id: EntityId::new(),
            project_id: new.project_id,
            feature_id: new.feature_id,
            title: new.title,
            summary: new.summary,
            description: new.description,
            status: Status::new("backlog"),
            priority: new.priority,
            complexity: new.complexity,
            tags: workflow_core::models::normalize_tags(&new.tags),
            requires_verification: new.requires_verification,
            version: 1,
            created_at: now,
            modified_at: now,
        };
        self.tasks.lock().insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: EntityId) -> Result<Option<Task>> {
        self.record("get_task");
        self.check_error_injection()?;
        Ok(self.tasks.lock().get(&id).cloned())
    }

    async fn update_task(&self, task: Task) -> Result<Task> {
        self.record("update_task");
        self.check_error_injection()?;
        let mut tasks = self.tasks.lock();
        let existing = tasks
            .get(&task.id)
            .ok_or_else(|| EngineError::not_found("task", task.id))?;
        let expected = task.version - 1;
        if existing.version != expected {
            return Err(EngineError::version_conflict(task.id, expected, existing.version));
        }
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn delete_task(&self, id: EntityId) -> Result<()> {
        self.record("delete_task");
        self.check_error_injection()?;
        self.tasks.lock().remove(&id);
        Ok(())
    }

    async fn find_tasks_by_project(&self, project_id: EntityId) -> Result<Vec<Task>> {
        self.record("find_tasks_by_project");
        self.check_error_injection()?;
        Ok(self
            .tasks
            .lock()
            .values()
            .filter(|t| t.project_id == Some(project_id))
            .cloned()
            .collect())
    }

    async fn find_tasks_by_feature(&self, feature_id: EntityId) -> Result<Vec<Task>> {
        self.record("find_tasks_by_feature");
        self.check_error_injection()?;
        Ok(self
            .tasks
            .lock()
            .values()
            .filter(|t| t.feature_id == Some(feature_id))
            .cloned()
            .collect())
    }

    async fn create_section(&self, mut section: Section) -> Result<Section> {
        self.record("create_section");
        self.check_error_injection()?;
        if section.id.as_bytes() == [0; 16] {
            section.id = EntityId::new();
        }
        let mut sections = self.sections.lock();
        let duplicate = sections.values().any(|s| {
            s.entity_type == section.entity_type
                && s.entity_id == section.entity_id
                && s.title == section.title
        });
        if duplicate {
            return Err(EngineError::Validation(format!(
                "section '{}' already exists for this entity",
                section.title
            )));
        }
        sections.insert(section.id, section.clone());
        Ok(section)
    }

    async fn get_section(&self, id: EntityId) -> Result<Option<Section>> {
        self.record("get_section");
        self.check_error_injection()?;
        Ok(self.sections.lock().get(&id).cloned())
    }

    async fn update_section(&self, section: Section) -> Result<Section> {
        self.record("update_section");
        self.check_error_injection()?;
        let mut sections = self.sections.lock();
        if !sections.contains_key(&section.id) {
            return Err(EngineError::not_found("section", section.id));
        }
        sections.insert(section.id, section.clone());
        Ok(section)
    }

    async fn delete_section(&self, id: EntityId) -> Result<()> {
        self.record("delete_section");
        self.check_error_injection()?;
        self.sections.lock().remove(&id);
        Ok(())
    }

    async fn find_sections(
        &self,
        entity_type: ContainerType,
        entity_id: EntityId,
    ) -> Result<Vec<Section>> {
        self.record("find_sections");
        self.check_error_injection()?;
        let mut result: Vec<Section> = self
            .sections
            .lock()
            .values()
            .filter(|s| s.entity_type == entity_type && s.entity_id == entity_id)
            .cloned()
            .collect();
        result.sort_by_key(|s| s.ordinal);
        Ok(result)
    }

    async fn find_section_by_title(
        &self,
        entity_type: ContainerType,
        entity_id: EntityId,
        title: &str,
    ) -> Result<Option<Section>> {
        self.record("find_section_by_title");
        self.check_error_injection()?;
        Ok(self
            .sections
            .lock()
            .values()
            .find(|s| s.entity_type == entity_type && s.entity_id == entity_id && s.title == title)
            .cloned())
    }

    async fn create_dependency(&self, mut dependency: Dependency) -> Result<Dependency> {
        self.record("create_dependency");
        self.check_error_injection()?;
        if dependency.id.as_bytes() == [0; 16] {
            dependency.id = EntityId::new();
        }
        self.dependencies.lock().insert(dependency.id, dependency.clone());
        Ok(dependency)
    }

    async fn delete_dependency(&self, id: EntityId) -> Result<()> {
        self.record("delete_dependency");
        self.check_error_injection()?;
        self.dependencies.lock().remove(&id);
        Ok(())
    }

    async fn find_by_from_task_id(
        &self,
        from_task_id: EntityId,
        dependency_type: Option<DependencyType>,
    ) -> Result<Vec<Dependency>> {
        self.record("find_by_from_task_id");
        self.check_error_injection()?;
        Ok(self
            .dependencies
            .lock()
            .values()
            .filter(|d| d.from_task_id == from_task_id)
            .filter(|d| dependency_type.map_or(true, |t| d.dependency_type == t))
            .cloned()
            .collect())
    }

    async fn find_by_to_task_id(
        &self,
        to_task_id: EntityId,
        dependency_type: Option<DependencyType>,
    ) -> Result<Vec<Dependency>> {
        self.record("find_by_to_task_id");
        self.check_error_injection()?;
        Ok(self
            .dependencies
            .lock()
            .values()
            .filter(|d| d.to_task_id == to_task_id)
            .filter(|d| dependency_type.map_or(true, |t| d.dependency_type == t))
            .cloned()
            .collect())
    }

    async fn get_task_count(&self, feature_id: EntityId) -> Result<u64> {
        self.record("get_task_count");
        self.check_error_injection()?;
        Ok(self
            .tasks
            .lock()
            .values()
            .filter(|t| t.feature_id == Some(feature_id))
            .count() as u64)
    }

    async fn get_task_counts_by_feature_id(&self, feature_id: EntityId) -> Result<TaskCounts> {
        self.record("get_task_counts_by_feature_id");
        self.check_error_injection()?;
        let mut by_status = std::collections::BTreeMap::new();
        let mut total = 0u64;
        for task in self.tasks.lock().values().filter(|t| t.feature_id == Some(feature_id)) {
            total += 1;
            *by_status.entry(task.status.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(TaskCounts { total, by_status })
    }

    async fn get_feature_counts_by_project_id(&self, project_id: EntityId) -> Result<FeatureCounts> {
        self.record("get_feature_counts_by_project_id");
        self.check_error_injection()?;
        let features = self.features.lock();
        let scoped: Vec<&Feature> = features.values().filter(|f| f.project_id == Some(project_id)).collect();
        Ok(FeatureCounts {
            total: scoped.len() as u64,
            completed: scoped.iter().filter(|f| f.status.as_str() == "completed").count() as u64,
        })
    }

    async fn delete_task_cascade(&self, task_id: EntityId) -> Result<()> {
        self.record("delete_task_cascade");
        self.check_error_injection()?;
        self.dependencies
            .lock()
            .retain(|_, d| d.from_task_id != task_id && d.to_task_id != task_id);
        self.sections
            .lock()
            .retain(|_, s| !(s.entity_type == ContainerType::Task && s.entity_id == task_id));
        self.tasks.lock().remove(&task_id);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        self.record("health_check");
        self.check_error_injection()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{new_feature_fixture, new_project_fixture, new_task_fixture};

    #[tokio::test]
    async fn create_and_get_project_roundtrips() {
        let store = InMemoryEntityStore::new();
        let project = store.create_project(new_project_fixture("Engine")).await.unwrap();
        let fetched = store.get_project(project.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, project.id);
        store.assert_called("get_project");
    }

    #[tokio::test]
    async fn error_injection_surfaces_once() {
        let store = InMemoryEntityStore::new();
        store.inject_error(EngineError::Internal("boom".to_string()));
        let result = store.create_project(new_project_fixture("Engine")).await;
        assert!(result.is_err());
        // Injected error is consumed; the next call succeeds.
        let result = store.create_project(new_project_fixture("Engine 2")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn stale_version_update_conflicts() {
        let store = InMemoryEntityStore::new();
        let mut task = store.create_task(new_task_fixture("Task")).await.unwrap();
        task.version = 2;
        let updated = store.update_task(task.clone()).await.unwrap();
        assert_eq!(updated.version, 2);

        let mut stale = task;
        stale.version = 2;
        let err = store.update_task(stale).await.unwrap_err();
        assert!(matches!(err, EngineError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn delete_project_detaches_features() {
        let store = InMemoryEntityStore::new();
        let project = store.create_project(new_project_fixture("Engine")).await.unwrap();
        let mut new_feature = new_feature_fixture("Cascade");
        new_feature.project_id = Some(project.id);
        let feature = store.create_feature(new_feature).await.unwrap();

        store.delete_project(project.id).await.unwrap();
        let found = store.get_feature(feature.id).await.unwrap().unwrap();
        assert_eq!(found.project_id, None);
    }
}
