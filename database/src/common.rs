//! Row<->model conversions and SQLx error mapping, grounded on the teacher's
//! `common.rs` (one `row_to_*` function per entity, one error-mapping
//! function funneling every `sqlx::Error` through `EngineError`).

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use workflow_core::error::{EngineError, Result};
use workflow_core::models::{
    ContainerType, ContentFormat, Dependency, DependencyType, EntityId, Feature, Priority,
    Project, Section, Status, Task,
};

pub fn id_to_blob(id: EntityId) -> Vec<u8> {
    id.as_bytes().to_vec()
}

pub fn blob_to_id(bytes: &[u8]) -> Result<EntityId> {
    let array: [u8; 16] = bytes
        .try_into()
        .map_err(|_| EngineError::Database(format!("malformed entity id blob ({} bytes)", bytes.len())))?;
    Ok(EntityId::from_bytes(array))
}

fn tags_to_json(tags: &BTreeSet<String>) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

fn json_to_tags(raw: &str) -> BTreeSet<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn container_type_to_str(container_type: ContainerType) -> &'static str {
    container_type.as_str()
}

fn container_type_from_str(raw: &str) -> Result<ContainerType> {
    match raw {
        "project" => Ok(ContainerType::Project),
        "feature" => Ok(ContainerType::Feature),
        "task" => Ok(ContainerType::Task),
        other => Err(EngineError::Database(format!("unknown container_type '{other}'"))),
    }
}

fn priority_to_str(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "low",
        Priority::Medium => "medium",
        Priority::High => "high",
        Priority::Critical => "critical",
    }
}

fn priority_from_str(raw: &str) -> Priority {
    match raw {
        "low" => Priority::Low,
        "high" => Priority::High,
        "critical" => Priority::Critical,
        _ => Priority::Medium,
    }
}

fn content_format_to_str(format: ContentFormat) -> &'static str {
    match format {
        ContentFormat::Markdown => "markdown",
        ContentFormat::Json => "json",
        ContentFormat::Plain => "plain",
    }
}

fn content_format_from_str(raw: &str) -> ContentFormat {
    match raw {
        "json" => ContentFormat::Json,
        "plain" => ContentFormat::Plain,
        _ => ContentFormat::Markdown,
    }
}

fn dependency_type_to_str(dep: DependencyType) -> &'static str {
    match dep {
        DependencyType::Blocks => "BLOCKS",
        DependencyType::IsBlockedBy => "IS_BLOCKED_BY",
        DependencyType::RelatesTo => "RELATES_TO",
    }
}

fn dependency_type_from_str(raw: &str) -> Result<DependencyType> {
    match raw {
        "BLOCKS" => Ok(DependencyType::Blocks),
        "IS_BLOCKED_BY" => Ok(DependencyType::IsBlockedBy),
        "RELATES_TO" => Ok(DependencyType::RelatesTo),
        other => Err(EngineError::Database(format!("unknown dependency_type '{other}'"))),
    }
}

pub fn row_to_project(row: &SqliteRow) -> Result<Project> {
    let id_blob: Vec<u8> = row.get("id");
    let tags_raw: String = row.get("tags");
    Ok(Project {
        id: blob_to_id(&id_blob)?,
        name: row.get("name"),
        summary: row.get("summary"),
        description: row.get("description"),
        status: Status::new(row.get::<String, _>("status")),
        tags: json_to_tags(&tags_raw),
        version: row.get("version"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        modified_at: row.get::<DateTime<Utc>, _>("modified_at"),
    })
}

pub fn row_to_feature(row: &SqliteRow) -> Result<Feature> {
    let id_blob: Vec<u8> = row.get("id");
    let project_id_blob: Option<Vec<u8>> = row.get("project_id");
    let tags_raw: String = row.get("tags");
    Ok(Feature {
        id: blob_to_id(&id_blob)?,
        project_id: project_id_blob.map(|b| blob_to_id(&b)).transpose()?,
        name: row.get("name"),
        summary: row.get("summary"),
        description: row.get("description"),
        status: Status::new(row.get::<String, _>("status")),
        priority: priority_from_str(&row.get::<String, _>("priority")),
        tags: json_to_tags(&tags_raw),
        requires_verification: row.get::<i64, _>("requires_verification") != 0,
        version: row.get("version"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        modified_at: row.get::<DateTime<Utc>, _>("modified_at"),
    })
}

pub fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let id_blob: Vec<u8> = row.get("id");
    let project_id_blob: Option<Vec<u8>> = row.get("project_id");
    let feature_id_blob: Option<Vec<u8>> = row.get("feature_id");
    let tags_raw: String = row.get("tags");
    Ok(Task {
        id: blob_to_id(&id_blob)?,
        project_id: project_id_blob.map(|b| blob_to_id(&b)).transpose()?,
        feature_id: feature_id_blob.map(|b| blob_to_id(&b)).transpose()?,
        title: row.get("title"),
        summary: row.get("summary"),
        description: row.get("description"),
        status: Status::new(row.get::<String, _>("status")),
        priority: priority_from_str(&row.get::<String, _>("priority")),
        complexity: row.get::<i64, _>("complexity") as u8,
        tags: json_to_tags(&tags_raw),
        requires_verification: row.get::<i64, _>("requires_verification") != 0,
        version: row.get("version"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        modified_at: row.get::<DateTime<Utc>, _>("modified_at"),
    })
}

pub fn row_to_section(row: &SqliteRow) -> Result<Section> {
    let id_blob: Vec<u8> = row.get("id");
    let entity_id_blob: Vec<u8> = row.get("entity_id");
    Ok(Section {
        id: blob_to_id(&id_blob)?,
        entity_type: container_type_from_str(&row.get::<String, _>("entity_type"))?,
        entity_id: blob_to_id(&entity_id_blob)?,
        title: row.get("title"),
        usage_description: row.get("usage_description"),
        content: row.get("content"),
        content_format: content_format_from_str(&row.get::<String, _>("content_format")),
        ordinal: row.get("ordinal"),
        version: row.get("version"),
    })
}

pub fn row_to_dependency(row: &SqliteRow) -> Result<Dependency> {
    let id_blob: Vec<u8> = row.get("id");
    let from_blob: Vec<u8> = row.get("from_task_id");
    let to_blob: Vec<u8> = row.get("to_task_id");
    Ok(Dependency {
        id: blob_to_id(&id_blob)?,
        from_task_id: blob_to_id(&from_blob)?,
        to_task_id: blob_to_id(&to_blob)?,
        dependency_type: dependency_type_from_str(&row.get::<String, _>("dependency_type"))?,
    })
}

pub fn bind_tags(tags: &BTreeSet<String>) -> String {
    tags_to_json(tags)
}

pub fn bind_container_type(container_type: ContainerType) -> &'static str {
    container_type_to_str(container_type)
}

pub fn bind_priority(priority: Priority) -> &'static str {
    priority_to_str(priority)
}

pub fn bind_content_format(format: ContentFormat) -> &'static str {
    content_format_to_str(format)
}

pub fn bind_dependency_type(dep: DependencyType) -> &'static str {
    dependency_type_to_str(dep)
}

pub fn new_uuid_blob() -> Vec<u8> {
    Uuid::new_v4().as_bytes().to_vec()
}

#[allow(dead_code)]
fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::from_str(raw).map_err(|e| EngineError::Database(e.to_string()))
}

/// Fold every `sqlx::Error` into the engine's closed error type.
pub fn sqlx_error_to_engine_error(err: sqlx::Error) -> EngineError {
    match &err {
        sqlx::Error::RowNotFound => EngineError::NotFound("row not found".to_string()),
        sqlx::Error::Database(db_err) => {
            let message = db_err.message();
            if message.contains("UNIQUE constraint failed") {
                EngineError::Validation(format!("uniqueness constraint violated: {message}"))
            } else if message.contains("FOREIGN KEY constraint failed") {
                EngineError::DependencyFailure(format!("foreign key constraint violated: {message}"))
            } else {
                EngineError::Database(format!("database constraint error: {message}"))
            }
        }
        sqlx::Error::PoolTimedOut => EngineError::Database("connection pool timeout".to_string()),
        sqlx::Error::Io(io_err) => EngineError::Database(format!("database I/O error: {io_err}")),
        _ => EngineError::Database(format!("database operation failed: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrips_through_blob() {
        let id = EntityId::new();
        let blob = id_to_blob(id);
        assert_eq!(blob_to_id(&blob).unwrap(), id);
    }

    #[test]
    fn tags_roundtrip_through_json() {
        let mut tags = BTreeSet::new();
        tags.insert("a".to_string());
        tags.insert("b".to_string());
        let json = bind_tags(&tags);
        assert_eq!(json_to_tags(&json), tags);
    }

    #[test]
    fn container_type_roundtrips() {
        for ct in [ContainerType::Project, ContainerType::Feature, ContainerType::Task] {
            assert_eq!(container_type_from_str(bind_container_type(ct)).unwrap(), ct);
        }
    }
}
