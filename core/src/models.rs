use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 128-bit opaque identifier for every persisted entity.
///
/// Stored as a 16-byte blob in the relational layer; the newtype exists so
/// call sites never confuse a project id with a task id at the type level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Status string, normalized to lowercase-hyphenated form.
///
/// `in_progress`, `in-progress`, and `IN_PROGRESS` all normalize to the same
/// `Status`, matching the case-insensitive, underscore/hyphen-insensitive
/// invariant from the data model.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(String);

impl Status {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(normalize_status(raw.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Status {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Status {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Lowercase, trim, and collapse `_` to `-`. Idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize_status(raw: &str) -> String {
    raw.trim().to_lowercase().replace('_', "-")
}

/// The three levels of the container hierarchy. Fixed by the data model —
/// unlike statuses, this is not config-driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    Project,
    Feature,
    Task,
}

impl ContainerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerType::Project => "project",
            ContainerType::Feature => "feature",
            ContainerType::Task => "task",
        }
    }
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The classification every status maps to under the active flow config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Queue,
    Work,
    Review,
    Blocked,
    Terminal,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Queue => "queue",
            Role::Work => "work",
            Role::Review => "review",
            Role::Blocked => "blocked",
            Role::Terminal => "terminal",
        }
    }
}

/// The closed set of caller-facing transition verbs. `Start` is resolved
/// against the active flow by the progression service; the other four map
/// directly to a fixed target status regardless of flow position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Start,
    Complete,
    Cancel,
    Block,
    Hold,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Start => "start",
            Trigger::Complete => "complete",
            Trigger::Cancel => "cancel",
            Trigger::Block => "block",
            Trigger::Hold => "hold",
        }
    }

    /// The fixed target status for every trigger except `Start`, which has
    /// none: its target depends on the container's active flow position.
    pub fn fixed_target(&self) -> Option<&'static str> {
        match self {
            Trigger::Start => None,
            Trigger::Complete => Some("completed"),
            Trigger::Cancel => Some("cancelled"),
            Trigger::Block => Some("blocked"),
            Trigger::Hold => Some("on-hold"),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Trigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "start" => Ok(Trigger::Start),
            "complete" => Ok(Trigger::Complete),
            "cancel" => Ok(Trigger::Cancel),
            "block" => Ok(Trigger::Block),
            "hold" => Ok(Trigger::Hold),
            other => Err(format!(
                "unknown trigger '{other}' (expected start, complete, cancel, block, or hold)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyType {
    Blocks,
    IsBlockedBy,
    RelatesTo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Markdown,
    Json,
    Plain,
}

/// Normalize and deduplicate a tag set (lowercase, order-insensitive).
pub fn normalize_tags(tags: &[String]) -> BTreeSet<String> {
    tags.iter().map(|t| t.trim().to_lowercase()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: EntityId,
    pub name: String,
    pub summary: String,
    pub description: Option<String>,
    pub status: Status,
    pub tags: BTreeSet<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: EntityId,
    pub project_id: Option<EntityId>,
    pub name: String,
    pub summary: String,
    pub description: Option<String>,
    pub status: Status,
    pub priority: Priority,
    pub tags: BTreeSet<String>,
    pub requires_verification: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: EntityId,
    pub project_id: Option<EntityId>,
    pub feature_id: Option<EntityId>,
    pub title: String,
    pub summary: String,
    pub description: Option<String>,
    pub status: Status,
    pub priority: Priority,
    pub complexity: u8,
    pub tags: BTreeSet<String>,
    pub requires_verification: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: EntityId,
    pub entity_type: ContainerType,
    pub entity_id: EntityId,
    pub title: String,
    pub usage_description: String,
    pub content: String,
    pub content_format: ContentFormat,
    pub ordinal: i32,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub id: EntityId,
    pub from_task_id: EntityId,
    pub to_task_id: EntityId,
    pub dependency_type: DependencyType,
}

/// New-entity payloads, mirroring the entity shape minus server-assigned fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub summary: String,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFeature {
    pub project_id: Option<EntityId>,
    pub name: String,
    pub summary: String,
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub requires_verification: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub project_id: Option<EntityId>,
    pub feature_id: Option<EntityId>,
    pub title: String,
    pub summary: String,
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_complexity")]
    pub complexity: u8,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub requires_verification: bool,
}

fn default_complexity() -> u8 {
    5
}

/// Counts of child tasks grouped by status, as returned by
/// `EntityStore::get_task_counts_by_feature_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub total: u64,
    pub by_status: std::collections::BTreeMap<String, u64>,
}

impl TaskCounts {
    pub fn count_for(&self, status: &Status) -> u64 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCounts {
    pub total: u64,
    pub completed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_normalization_is_idempotent() {
        let a = Status::new("IN_PROGRESS");
        let b = Status::new("in-progress");
        let c = Status::new(" in_progress ");
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.as_str(), "in-progress");

        let once = normalize_status(a.as_str());
        let twice = normalize_status(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn entity_id_roundtrips_through_bytes() {
        let id = EntityId::new();
        let bytes = id.as_bytes();
        assert_eq!(EntityId::from_bytes(bytes), id);
    }

    #[test]
    fn tag_normalization_dedupes_and_lowercases() {
        let tags = vec!["Production".to_string(), "production".to_string(), " staging ".to_string()];
        let normalized = normalize_tags(&tags);
        assert_eq!(normalized.len(), 2);
        assert!(normalized.contains("production"));
        assert!(normalized.contains("staging"));
    }
}
