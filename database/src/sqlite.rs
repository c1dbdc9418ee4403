//! SQLite implementation of `EntityStore`.
//!
//! Grounded on the teacher's `SqliteTaskRepository`: same connection-pool
//! setup (WAL journal mode, `busy_timeout`, foreign keys on), same
//! `sqlx::migrate!` bootstrap, same `sqlx_error_to_*` funnel pattern — but
//! every mutating method here does an optimistic-concurrency compare-and-set
//! on `version` instead of the teacher's unconditional `UPDATE ... WHERE id`,
//! per the data model's version invariant.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{migrate::MigrateDatabase, Row, Sqlite, SqlitePool};

use workflow_core::error::{EngineError, Result};
use workflow_core::models::{
    ContainerType, Dependency, DependencyType, EntityId, Feature, FeatureCounts, NewFeature,
    NewProject, NewTask, Project, Section, Status, Task, TaskCounts,
};
use workflow_core::store::EntityStore;

use crate::common::{
    bind_container_type, bind_content_format, bind_dependency_type, bind_priority, bind_tags,
    blob_to_id, id_to_blob, new_uuid_blob, row_to_dependency, row_to_feature, row_to_project,
    row_to_section, row_to_task, sqlx_error_to_engine_error,
};

#[derive(Debug, Clone)]
pub struct SqliteEntityStore {
    pool: SqlitePool,
}

impl SqliteEntityStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let db_url = if database_url.starts_with(":memory:") || database_url.starts_with("sqlite://") {
            database_url.to_string()
        } else {
            format!("sqlite://{database_url}")
        };

        if !db_url.contains(":memory:") && !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            Sqlite::create_database(&db_url)
                .await
                .map_err(|e| EngineError::Database(format!("failed to create database: {e}")))?;
        }

        let connect_options = if db_url.contains(":memory:") {
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(&db_url)
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Memory)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
        } else {
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(db_url.replace("sqlite://", ""))
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
        };

        let pool = SqlitePool::connect_with(connect_options)
            .await
            .map_err(sqlx_error_to_engine_error)?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/sqlite")
            .run(&self.pool)
            .await
            .map_err(|e| EngineError::Database(format!("migration failed: {e}")))?;
        tracing::info!("database migrations completed successfully");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn current_project_version(&self, id: EntityId) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT version FROM projects WHERE id = ?")
            .bind(id_to_blob(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_engine_error)?;
        Ok(row.map(|r| r.get::<i64, _>("version")))
    }

    async fn current_feature_version(&self, id: EntityId) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT version FROM features WHERE id = ?")
            .bind(id_to_blob(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_engine_error)?;
        Ok(row.map(|r| r.get::<i64, _>("version")))
    }

    async fn current_task_version(&self, id: EntityId) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT version FROM tasks WHERE id = ?")
            .bind(id_to_blob(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_engine_error)?;
        Ok(row.map(|r| r.get::<i64, _>("version")))
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    // -- Projects ------------------------------------------------------------

    async fn create_project(&self, new: NewProject) -> Result<Project> {
        if new.name.trim().is_empty() {
            return Err(EngineError::empty_field("name"));
        }
        let id = EntityId::new();
        let now = Utc::now();
        let tags = workflow_core::models::normalize_tags(&new.tags);

        let row = sqlx::query(
            r#"
            INSERT INTO projects (id, name, summary, description, status, tags, version, created_at, modified_at)
            VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
            RETURNING id, name, summary, description, status, tags, version, created_at, modified_at
            "#,
        )
        .bind(id_to_blob(id))
        .bind(&new.name)
        .bind(&new.summary)
        .bind(&new.description)
        .bind("planning")
        .bind(bind_tags(&tags))
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;

        row_to_project(&row)
    }

    async fn get_project(&self, id: EntityId) -> Result<Option<Project>> {
        let row = sqlx::query(
            "SELECT id, name, summary, description, status, tags, version, created_at, modified_at FROM projects WHERE id = ?",
        )
        .bind(id_to_blob(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;
        row.as_ref().map(row_to_project).transpose()
    }

    async fn update_project(&self, project: Project) -> Result<Project> {
        let expected = project.version - 1;
        let row = sqlx::query(
            r#"
            UPDATE projects SET name = ?, summary = ?, description = ?, status = ?, tags = ?, version = ?, modified_at = ?
            WHERE id = ? AND version = ?
            RETURNING id, name, summary, description, status, tags, version, created_at, modified_at
            "#,
        )
        .bind(&project.name)
        .bind(&project.summary)
        .bind(&project.description)
        .bind(project.status.as_str())
        .bind(bind_tags(&project.tags))
        .bind(project.version)
        .bind(project.modified_at)
        .bind(id_to_blob(project.id))
        .bind(expected)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;

        match row {
            Some(row) => row_to_project(&row),
            None => {
                let actual = self
                    .current_project_version(project.id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("project", project.id))?;
                Err(EngineError::version_conflict(project.id, expected, actual))
            }
        }
    }

    async fn delete_project(&self, id: EntityId) -> Result<()> {
        sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id_to_blob(id))
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_engine_error)?;
        Ok(())
    }

    // -- Features --------------------------------------------------------------

    async fn create_feature(&self, new: NewFeature) -> Result<Feature> {
        if new.name.trim().is_empty() {
            return Err(EngineError::empty_field("name"));
        }
        let id = EntityId::new();
        let now = Utc::now();
        let tags = workflow_core::models::normalize_tags(&new.tags);

        let row = sqlx::query(
            r#"
            INSERT INTO features (id, project_id, name, summary, description, status, priority, tags, requires_verification, version, created_at, modified_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            RETURNING id, project_id, name, summary, description, status, priority, tags, requires_verification, version, created_at, modified_at
            "#,
        )
        .bind(new.project_id.map(id_to_blob))
        .bind(&new.name)
        .bind(&new.summary)
        .bind(&new.description)
        .bind("planning")
        .bind(bind_priority(new.priority))
        .bind(bind_tags(&tags))
        .bind(new.requires_verification as i64)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;

        row_to_feature(&row)
    }

    async fn get_feature(&self, id: EntityId) -> Result<Option<Feature>> {
        let row = sqlx::query(
            "SELECT id, project_id, name, summary, description, status, priority, tags, requires_verification, version, created_at, modified_at FROM features WHERE id = ?",
        )
        .bind(id_to_blob(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;
        row.as_ref().map(row_to_feature).transpose()
    }

    async fn update_feature(&self, feature: Feature) -> Result<Feature> {
        let expected = feature.version - 1;
        let row = sqlx::query(
            r#"
            UPDATE features SET project_id = ?, name = ?, summary = ?, description = ?, status = ?, priority = ?, tags = ?, requires_verification = ?, version = ?, modified_at = ?
            WHERE id = ? AND version = ?
            RETURNING id, project_id, name, summary, description, status, priority, tags, requires_verification, version, created_at, modified_at
            "#,
        )
        .bind(feature.project_id.map(id_to_blob))
        .bind(&feature.name)
        .bind(&feature.summary)
        .bind(&feature.description)
        .bind(feature.status.as_str())
        .bind(bind_priority(feature.priority))
        .bind(bind_tags(&feature.tags))
        .bind(feature.requires_verification as i64)
        .bind(feature.version)
        .bind(feature.modified_at)
        .bind(id_to_blob(feature.id))
        .bind(expected)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;

        match row {
            Some(row) => row_to_feature(&row),
            None => {
                let actual = self
                    .current_feature_version(feature.id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("feature", feature.id))?;
                Err(EngineError::version_conflict(feature.id, expected, actual))
            }
        }
    }

    async fn delete_feature(&self, id: EntityId) -> Result<()> {
        sqlx::query("DELETE FROM features WHERE id = ?")
            .bind(id_to_blob(id))
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_engine_error)?;
        Ok(())
    }

    async fn find_features_by_project(&self, project_id: EntityId) -> Result<Vec<Feature>> {
        let rows = sqlx::query(
            "SELECT id, project_id, name, summary, description, status, priority, tags, requires_verification, version, created_at, modified_at FROM features WHERE project_id = ? ORDER BY created_at ASC",
        )
        .bind(id_to_blob(project_id))
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;
        rows.iter().map(row_to_feature).collect()
    }

    // -- Tasks -------------------------------------------------------------------

    async fn create_task(&self, new: NewTask) -> Result<Task> {
        if new.title.trim().is_empty() {
            return Err(EngineError::empty_field("title"));
        }
        let id = EntityId::new();
        let now = Utc::now();
        let tags = workflow_core::models::normalize_tags(&new.tags);

        let row = sqlx::query(
            r#"
            INSERT INTO tasks (id, project_id, feature_id, title, summary, description, status, priority, complexity, tags, requires_verification, version, created_at, modified_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            RETURNING id, project_id, feature_id, title, summary, description, status, priority, complexity, tags, requires_verification, version, created_at, modified_at
            "#,
        )
        .bind(new.project_id.map(id_to_blob))
        .bind(new.feature_id.map(id_to_blob))
        .bind(&new.title)
        .bind(&new.summary)
        .bind(&new.description)
        .bind("backlog")
        .bind(bind_priority(new.priority))
        .bind(new.complexity as i64)
        .bind(bind_tags(&tags))
        .bind(new.requires_verification as i64)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;

        row_to_task(&row)
    }

    async fn get_task(&self, id: EntityId) -> Result<Option<Task>> {
        let row = sqlx::query(
            "SELECT id, project_id, feature_id, title, summary, description, status, priority, complexity, tags, requires_verification, version, created_at, modified_at FROM tasks WHERE id = ?",
        )
        .bind(id_to_blob(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn update_task(&self, task: Task) -> Result<Task> {
        let expected = task.version - 1;
        let row = sqlx::query(
            r#"
            UPDATE tasks SET project_id = ?, feature_id = ?, title = ?, summary = ?, description = ?, status = ?, priority = ?, complexity = ?, tags = ?, requires_verification = ?, version = ?, modified_at = ?
            WHERE id = ? AND version = ?
            RETURNING id, project_id, feature_id, title, summary, description, status, priority, complexity, tags, requires_verification, version, created_at, modified_at
            "#,
        )
        .bind(task.project_id.map(id_to_blob))
        .bind(task.feature_id.map(id_to_blob))
        .bind(&task.title)
        .bind(&task.summary)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(bind_priority(task.priority))
        .bind(task.complexity as i64)
        .bind(bind_tags(&task.tags))
        .bind(task.requires_verification as i64)
        .bind(task.version)
        .bind(task.modified_at)
        .bind(id_to_blob(task.id))
        .bind(expected)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;

        match row {
            Some(row) => row_to_task(&row),
            None => {
                let actual = self
                    .current_task_version(task.id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("task", task.id))?;
                Err(EngineError::version_conflict(task.id, expected, actual))
            }
        }
    }

    async fn delete_task(&self, id: EntityId) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id_to_blob(id))
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_engine_error)?;
        Ok(())
    }

    async fn find_tasks_by_project(&self, project_id: EntityId) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            "SELECT id, project_id, feature_id, title, summary, description, status, priority, complexity, tags, requires_verification, version, created_at, modified_at FROM tasks WHERE project_id = ? ORDER BY created_at ASC",
        )
        .bind(id_to_blob(project_id))
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;
        rows.iter().map(row_to_task).collect()
    }

    async fn find_tasks_by_feature(&self, feature_id: EntityId) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            "SELECT id, project_id, feature_id, title, summary, description, status, priority, complexity, tags, requires_verification, version, created_at, modified_at FROM tasks WHERE feature_id = ? ORDER BY created_at ASC",
        )
        .bind(id_to_blob(feature_id))
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;
        rows.iter().map(row_to_task).collect()
    }

    // -- Sections ----------------------------------------------------------

    async fn create_section(&self, section: Section) -> Result<Section> {
        let id = if section.id.as_bytes() == [0; 16] {
            EntityId::new()
        } else {
            section.id
        };
        let row = sqlx::query(
            r#"
            INSERT INTO sections (id, entity_type, entity_id, title, usage_description, content, content_format, ordinal, version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)
            RETURNING id, entity_type, entity_id, title, usage_description, content, content_format, ordinal, version
            "#,
        )
        .bind(id_to_blob(id))
        .bind(bind_container_type(section.entity_type))
        .bind(id_to_blob(section.entity_id))
        .bind(&section.title)
        .bind(&section.usage_description)
        .bind(&section.content)
        .bind(bind_content_format(section.content_format))
        .bind(section.ordinal)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;

        row_to_section(&row)
    }

    async fn get_section(&self, id: EntityId) -> Result<Option<Section>> {
        let row = sqlx::query(
            "SELECT id, entity_type, entity_id, title, usage_description, content, content_format, ordinal, version FROM sections WHERE id = ?",
        )
        .bind(id_to_blob(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;
        row.as_ref().map(row_to_section).transpose()
    }

    async fn update_section(&self, section: Section) -> Result<Section> {
        let expected = section.version - 1;
        let row = sqlx::query(
            r#"
            UPDATE sections SET usage_description = ?, content = ?, content_format = ?, ordinal = ?, version = ?
            WHERE id = ? AND version = ?
            RETURNING id, entity_type, entity_id, title, usage_description, content, content_format, ordinal, version
            "#,
        )
        .bind(&section.usage_description)
        .bind(&section.content)
        .bind(bind_content_format(section.content_format))
        .bind(section.ordinal)
        .bind(section.version)
        .bind(id_to_blob(section.id))
        .bind(expected)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;

        match row {
            Some(row) => row_to_section(&row),
            None => Err(EngineError::not_found("section", section.id)),
        }
    }

    async fn delete_section(&self, id: EntityId) -> Result<()> {
        sqlx::query("DELETE FROM sections WHERE id = ?")
            .bind(id_to_blob(id))
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_engine_error)?;
        Ok(())
    }

    async fn find_sections(
        &self,
        entity_type: ContainerType,
        entity_id: EntityId,
    ) -> Result<Vec<Section>> {
        let rows = sqlx::query(
            "SELECT id, entity_type, entity_id, title, usage_description, content, content_format, ordinal, version FROM sections WHERE entity_type = ? AND entity_id = ? ORDER BY ordinal ASC",
        )
        .bind(bind_container_type(entity_type))
        .bind(id_to_blob(entity_id))
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;
        rows.iter().map(row_to_section).collect()
    }

    async fn find_section_by_title(
        &self,
        entity_type: ContainerType,
        entity_id: EntityId,
        title: &str,
    ) -> Result<Option<Section>> {
        let row = sqlx::query(
            "SELECT id, entity_type, entity_id, title, usage_description, content, content_format, ordinal, version FROM sections WHERE entity_type = ? AND entity_id = ? AND title = ?",
        )
        .bind(bind_container_type(entity_type))
        .bind(id_to_blob(entity_id))
        .bind(title)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;
        row.as_ref().map(row_to_section).transpose()
    }

    // -- Dependencies ------------------------------------------------------

    async fn create_dependency(&self, dependency: Dependency) -> Result<Dependency> {
        let id = if dependency.id.as_bytes() == [0; 16] {
            EntityId::new()
        } else {
            dependency.id
        };
        let row = sqlx::query(
            r#"
            INSERT INTO dependencies (id, from_task_id, to_task_id, dependency_type)
            VALUES (?, ?, ?, ?)
            RETURNING id, from_task_id, to_task_id, dependency_type
            "#,
        )
        .bind(id_to_blob(id))
        .bind(id_to_blob(dependency.from_task_id))
        .bind(id_to_blob(dependency.to_task_id))
        .bind(bind_dependency_type(dependency.dependency_type))
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;

        row_to_dependency(&row)
    }

    async fn delete_dependency(&self, id: EntityId) -> Result<()> {
        sqlx::query("DELETE FROM dependencies WHERE id = ?")
            .bind(id_to_blob(id))
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_engine_error)?;
        Ok(())
    }

    async fn find_by_from_task_id(
        &self,
        from_task_id: EntityId,
        dependency_type: Option<DependencyType>,
    ) -> Result<Vec<Dependency>> {
        let rows = match dependency_type {
            Some(dep_type) => {
                sqlx::query(
                    "SELECT id, from_task_id, to_task_id, dependency_type FROM dependencies WHERE from_task_id = ? AND dependency_type = ?",
                )
                .bind(id_to_blob(from_task_id))
                .bind(bind_dependency_type(dep_type))
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT id, from_task_id, to_task_id, dependency_type FROM dependencies WHERE from_task_id = ?",
                )
                .bind(id_to_blob(from_task_id))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(sqlx_error_to_engine_error)?;
        rows.iter().map(row_to_dependency).collect()
    }

    async fn find_by_to_task_id(
        &self,
        to_task_id: EntityId,
        dependency_type: Option<DependencyType>,
    ) -> Result<Vec<Dependency>> {
        let rows = match dependency_type {
            Some(dep_type) => {
                sqlx::query(
                    "SELECT id, from_task_id, to_task_id, dependency_type FROM dependencies WHERE to_task_id = ? AND dependency_type = ?",
                )
                .bind(id_to_blob(to_task_id))
                .bind(bind_dependency_type(dep_type))
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT id, from_task_id, to_task_id, dependency_type FROM dependencies WHERE to_task_id = ?",
                )
                .bind(id_to_blob(to_task_id))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(sqlx_error_to_engine_error)?;
        rows.iter().map(row_to_dependency).collect()
    }

    // -- Aggregate queries ---------------------------------------------------

    async fn get_task_count(&self, feature_id: EntityId) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) as total FROM tasks WHERE feature_id = ?")
            .bind(id_to_blob(feature_id))
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_engine_error)?;
        Ok(row.get::<i64, _>("total") as u64)
    }

    async fn get_task_counts_by_feature_id(&self, feature_id: EntityId) -> Result<TaskCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) as count FROM tasks WHERE feature_id = ? GROUP BY status")
            .bind(id_to_blob(feature_id))
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_engine_error)?;

        let mut by_status = std::collections::BTreeMap::new();
        let mut total = 0u64;
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            total += count as u64;
            by_status.insert(status, count as u64);
        }
        Ok(TaskCounts { total, by_status })
    }

    async fn get_feature_counts_by_project_id(&self, project_id: EntityId) -> Result<FeatureCounts> {
        let row = sqlx::query(
            "SELECT COUNT(*) as total, SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) as completed FROM features WHERE project_id = ?",
        )
        .bind(id_to_blob(project_id))
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;

        Ok(FeatureCounts {
            total: row.get::<i64, _>("total") as u64,
            completed: row.get::<Option<i64>, _>("completed").unwrap_or(0) as u64,
        })
    }

    async fn delete_task_cascade(&self, task_id: EntityId) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_engine_error)?;

        sqlx::query("DELETE FROM dependencies WHERE from_task_id = ? OR to_task_id = ?")
            .bind(id_to_blob(task_id))
            .bind(id_to_blob(task_id))
            .execute(&mut *tx)
            .await
            .map_err(sqlx_error_to_engine_error)?;

        sqlx::query("DELETE FROM sections WHERE entity_type = ? AND entity_id = ?")
            .bind(bind_container_type(ContainerType::Task))
            .bind(id_to_blob(task_id))
            .execute(&mut *tx)
            .await
            .map_err(sqlx_error_to_engine_error)?;

        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id_to_blob(task_id))
            .execute(&mut *tx)
            .await
            .map_err(sqlx_error_to_engine_error)?;

        tx.commit().await.map_err(sqlx_error_to_engine_error)?;
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_engine_error)?;
        Ok(())
    }

    /// Persists to the `role_transitions` audit table created by migration
    /// `0006`, kept even after the entity itself is later deleted.
    async fn record_role_transition(
        &self,
        entity_type: ContainerType,
        entity_id: EntityId,
        from_status: &Status,
        to_status: &Status,
        role: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO role_transitions (id, entity_type, entity_id, from_status, to_status, role, occurred_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new_uuid_blob())
        .bind(bind_container_type(entity_type))
        .bind(id_to_blob(entity_id))
        .bind(from_status.as_str())
        .bind(to_status.as_str())
        .bind(role)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_engine_error)?;
        Ok(())
    }
}

impl SqliteEntityStore {
    pub fn id_from_parts(bytes: &[u8]) -> Result<EntityId> {
        blob_to_id(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_core::models::{NewFeature, NewProject, NewTask};

    async fn test_store() -> SqliteEntityStore {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let db_name = format!(":memory:test_{timestamp}");
        let store = SqliteEntityStore::new(&db_name).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn health_check_passes_after_migration() {
        let store = test_store().await;
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn project_roundtrips_through_create_and_get() {
        let store = test_store().await;
        let project = store
            .create_project(NewProject {
                name: "Engine".to_string(),
                summary: "workflow engine".to_string(),
                description: None,
                tags: vec!["core".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(project.version, 1);
        assert_eq!(project.status.as_str(), "planning");

        let fetched = store.get_project(project.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, project.id);
        assert!(fetched.tags.contains("core"));
    }

    #[tokio::test]
    async fn update_project_enforces_optimistic_concurrency() {
        let store = test_store().await;
        let mut project = store
            .create_project(NewProject {
                name: "Engine".to_string(),
                summary: "workflow engine".to_string(),
                description: None,
                tags: vec![],
            })
            .await
            .unwrap();

        project.version += 1;
        project.status = Status::new("in-development");
        let updated = store.update_project(project.clone()).await.unwrap();
        assert_eq!(updated.version, 2);

        // Stale version should now conflict.
        let mut stale = updated.clone();
        stale.version = 2;
        let result = store.update_project(stale).await;
        assert!(matches!(result, Err(EngineError::VersionConflict { .. })));
    }

    #[tokio::test]
    async fn task_counts_group_by_status() {
        let store = test_store().await;
        let feature = store
            .create_feature(NewFeature {
                project_id: None,
                name: "Feature".to_string(),
                summary: "summary".to_string(),
                description: None,
                priority: Default::default(),
                tags: vec![],
                requires_verification: false,
            })
            .await
            .unwrap();

        for _ in 0..3 {
            store
                .create_task(NewTask {
                    project_id: None,
                    feature_id: Some(feature.id),
                    title: "Task".to_string(),
                    summary: "summary".to_string(),
                    description: None,
                    priority: Default::default(),
                    complexity: 5,
                    tags: vec![],
                    requires_verification: false,
                })
                .await
                .unwrap();
        }

        let counts = store.get_task_counts_by_feature_id(feature.id).await.unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.count_for(&Status::new("backlog")), 3);
    }

    #[tokio::test]
    async fn delete_task_cascade_removes_dependencies_and_sections() {
        let store = test_store().await;
        let task = store
            .create_task(NewTask {
                project_id: None,
                feature_id: None,
                title: "Task".to_string(),
                summary: "summary".to_string(),
                description: None,
                priority: Default::default(),
                complexity: 5,
                tags: vec![],
                requires_verification: false,
            })
            .await
            .unwrap();

        store
            .create_section(Section {
                id: EntityId::new(),
                entity_type: ContainerType::Task,
                entity_id: task.id,
                title: "Verification".to_string(),
                usage_description: "gate".to_string(),
                content: "[]".to_string(),
                content_format: workflow_core::models::ContentFormat::Json,
                ordinal: 0,
                version: 1,
            })
            .await
            .unwrap();

        store.delete_task_cascade(task.id).await.unwrap();
        assert!(store.get_task(task.id).await.unwrap().is_none());
        assert!(store
            .find_sections(ContainerType::Task, task.id)
            .await
            .unwrap()
            .is_empty());
    }
}
