//! Workflow Config Loader (C2): parses `.taskorchestrator/config.yaml`,
//! resolves the active flow for a `(container, tags)` pair, and caches the
//! parsed document with a short TTL.
//!
//! Grounded two ways: the struct-per-concern, `config`-crate-driven style of
//! the teacher's `mcp-server/src/config.rs` (process bootstrap config stays
//! TOML, see `workflow-server`), and the YAML-specific loader idiom shown in
//! the `mcb-infrastructure` example (`serde_yaml::Value` parse, then
//! `serde_yaml::from_value` into a typed struct, with a validation pass and
//! an explicit fallback mode on any failure).

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::models::{normalize_tags, ContainerType, Status};

const CACHE_TTL: Duration = Duration::from_secs(2);
const CONFIG_RELATIVE_PATH: &str = ".taskorchestrator/config.yaml";
const BUNDLED_DEFAULT: &str = include_str!("../config/default_flow.yaml");

/// The resolved flow for a particular `(container, tags, current_status)`
/// query, returned to callers for response enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowPath {
    pub active_flow: String,
    pub flow_sequence: Vec<String>,
    /// Index of `current_status` in `flow_sequence`, or `-1` if absent.
    pub current_position: i32,
    pub terminal_statuses: BTreeSet<String>,
    pub emergency_transitions: BTreeSet<String>,
    pub matched_tags: Vec<String>,
}

impl FlowPath {
    pub fn is_terminal(&self, status: &Status) -> bool {
        self.terminal_statuses.contains(status.as_str())
    }

    pub fn position_of(&self, status: &Status) -> Option<usize> {
        self.flow_sequence.iter().position(|s| s == status.as_str())
    }

    pub fn next_after_current(&self) -> Option<&str> {
        if self.current_position < 0 {
            return None;
        }
        self.flow_sequence
            .get(self.current_position as usize + 1)
            .map(String::as_str)
    }
}

/// Either a fully resolved V2 config, or V1-compatibility mode: no flow
/// rules, enum-only validation, all transitions permitted.
#[derive(Debug, Clone)]
pub enum ConfigMode {
    V1Compatible,
    V2(WorkflowConfig),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowConfig {
    pub version: String,
    pub status_progression: HashMap<String, ContainerFlowConfig>,
    #[serde(default)]
    pub status_validation: StatusValidationConfig,
    #[serde(default)]
    pub auto_cascade: AutoCascadeConfig,
    #[serde(default)]
    pub completion_cleanup: CompletionCleanupConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContainerFlowConfig {
    pub default_flow: Vec<String>,
    #[serde(default)]
    pub flow_mappings: Vec<FlowMapping>,
    #[serde(default)]
    pub emergency_transitions: Vec<String>,
    #[serde(default)]
    pub terminal_statuses: Vec<String>,
    /// Additional `<name>_flow` entries, captured verbatim.
    #[serde(flatten)]
    pub named_flows: HashMap<String, Vec<String>>,
}

impl ContainerFlowConfig {
    fn flow_named(&self, name: &str) -> Option<&Vec<String>> {
        if name == "default" {
            return Some(&self.default_flow);
        }
        self.named_flows.get(&format!("{name}_flow"))
    }

    /// All statuses across every flow defined for this container — the V2
    /// membership set used by `validateStatus`.
    pub fn all_statuses(&self) -> BTreeSet<String> {
        let mut set: BTreeSet<String> = self.default_flow.iter().cloned().collect();
        for flow in self.named_flows.values() {
            set.extend(flow.iter().cloned());
        }
        set.extend(self.emergency_transitions.iter().cloned());
        set
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlowMapping {
    pub tags: Vec<String>,
    pub flow: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusValidationConfig {
    #[serde(default = "default_true")]
    pub enforce_sequential: bool,
    #[serde(default)]
    pub allow_backward: bool,
    #[serde(default = "default_true")]
    pub allow_emergency: bool,
    #[serde(default = "default_true")]
    pub validate_prerequisites: bool,
}

impl Default for StatusValidationConfig {
    fn default() -> Self {
        Self {
            enforce_sequential: true,
            allow_backward: false,
            allow_emergency: true,
            validate_prerequisites: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutoCascadeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

impl Default for AutoCascadeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_depth: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CompletionCleanupConfig {
    #[serde(default)]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> u32 {
    3
}

struct CacheEntry {
    mode: ConfigMode,
    loaded_at: Instant,
    source_mtime: Option<std::time::SystemTime>,
}

/// Loads and caches `WorkflowConfig` keyed by working directory.
///
/// Lock-free reads are not attempted; the cache is a `parking_lot::Mutex`
/// guarding a small map, never held across an `.await` point (the loader is
/// synchronous — file reads are the only suspension point and they happen
/// before the lock is taken).
pub struct WorkflowConfigLoader {
    cache: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl Default for WorkflowConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowConfigLoader {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the config mode for `working_dir`, honoring the TTL and
    /// modification-time based invalidation.
    pub fn load(&self, working_dir: &Path) -> ConfigMode {
        let canonical = working_dir
            .canonicalize()
            .unwrap_or_else(|_| working_dir.to_path_buf());
        let config_path = canonical.join(CONFIG_RELATIVE_PATH);
        let current_mtime = std::fs::metadata(&config_path)
            .and_then(|m| m.modified())
            .ok();

        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.get(&canonical) {
                let fresh = entry.loaded_at.elapsed() < CACHE_TTL;
                let unchanged = entry.source_mtime == current_mtime;
                if fresh && unchanged {
                    return entry.mode.clone();
                }
            }
        }

        let mode = Self::parse(&config_path);

        let mut cache = self.cache.lock();
        cache.insert(
            canonical,
            CacheEntry {
                mode: mode.clone(),
                loaded_at: Instant::now(),
                source_mtime: current_mtime,
            },
        );
        mode
    }

    fn parse(config_path: &Path) -> ConfigMode {
        let text = match std::fs::read_to_string(config_path) {
            Ok(text) => text,
            Err(_) => BUNDLED_DEFAULT.to_string(),
        };

        match serde_yaml::from_str::<WorkflowConfig>(&text) {
            Ok(config) => ConfigMode::V2(config),
            Err(err) => {
                tracing::warn!(
                    path = %config_path.display(),
                    error = %err,
                    "malformed workflow config, falling back to V1-compatibility mode"
                );
                ConfigMode::V1Compatible
            }
        }
    }
}

impl Clone for ConfigMode {
    fn clone(&self) -> Self {
        match self {
            ConfigMode::V1Compatible => ConfigMode::V1Compatible,
            ConfigMode::V2(cfg) => ConfigMode::V2(cfg.clone()),
        }
    }
}

/// Resolve the active `FlowPath` for `(container_type, tags, current_status)`
/// against a V2 config. First-match-wins over `flow_mappings`, falling back
/// to `default_flow` when nothing matches.
pub fn resolve_flow_path(
    config: &WorkflowConfig,
    container_type: ContainerType,
    tags: &[String],
    current_status: &Status,
) -> Option<FlowPath> {
    let container_cfg = config.status_progression.get(container_type.as_str())?;
    let normalized_tags = normalize_tags(tags);

    let mut matched_tags: Vec<String> = Vec::new();
    let mut active_flow = "default".to_string();

    for mapping in &container_cfg.flow_mappings {
        let mapping_tags = normalize_tags(&mapping.tags);
        let overlap: Vec<String> = mapping_tags
            .intersection(&normalized_tags)
            .cloned()
            .collect();
        if !overlap.is_empty() {
            active_flow = mapping.flow.clone();
            matched_tags = overlap;
            break;
        }
    }

    let flow_sequence = container_cfg.flow_named(&active_flow)?.clone();
    let current_position = flow_sequence
        .iter()
        .position(|s| s == current_status.as_str())
        .map(|i| i as i32)
        .unwrap_or(-1);

    Some(FlowPath {
        active_flow,
        flow_sequence,
        current_position,
        terminal_statuses: container_cfg.terminal_statuses.iter().cloned().collect(),
        emergency_transitions: container_cfg
            .emergency_transitions
            .iter()
            .cloned()
            .collect(),
        matched_tags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> WorkflowConfig {
        serde_yaml::from_str(
            r#"
version: "1"
status_progression:
  task:
    default_flow: [pending, in-progress, testing, completed]
    hotfix_flow: [pending, in-progress, completed]
    flow_mappings:
      - tags: [hotfix, urgent]
        flow: hotfix
      - tags: [chore]
        flow: hotfix
    emergency_transitions: [cancelled]
    terminal_statuses: [completed, cancelled]
status_validation:
  enforce_sequential: true
  allow_backward: false
  allow_emergency: true
  validate_prerequisites: true
auto_cascade:
  enabled: true
  max_depth: 3
completion_cleanup:
  enabled: true
"#,
        )
        .unwrap()
    }

    #[test]
    fn first_matching_mapping_wins() {
        let config = sample_config();
        // Tags match both mappings (urgent + chore); the first one in
        // document order ("hotfix"/"urgent") must win over "chore".
        let path = resolve_flow_path(
            &config,
            ContainerType::Task,
            &["urgent".to_string(), "chore".to_string()],
            &Status::new("pending"),
        )
        .unwrap();
        assert_eq!(path.active_flow, "hotfix");
        assert_eq!(path.flow_sequence, vec!["pending", "in-progress", "completed"]);
    }

    #[test]
    fn no_matching_tags_falls_back_to_default() {
        let config = sample_config();
        let path = resolve_flow_path(
            &config,
            ContainerType::Task,
            &["backend".to_string()],
            &Status::new("pending"),
        )
        .unwrap();
        assert_eq!(path.active_flow, "default");
        assert_eq!(path.current_position, 0);
    }

    #[test]
    fn current_position_is_minus_one_when_absent() {
        let config = sample_config();
        let path = resolve_flow_path(
            &config,
            ContainerType::Task,
            &[],
            &Status::new("archived"),
        )
        .unwrap();
        assert_eq!(path.current_position, -1);
    }

    #[test]
    fn malformed_yaml_falls_back_to_v1() {
        let dir = tempdir_with_config("not: [valid: yaml");
        let loader = WorkflowConfigLoader::new();
        let mode = loader.load(dir.path());
        assert!(matches!(mode, ConfigMode::V1Compatible));
    }

    #[test]
    fn well_formed_yaml_loads_v2() {
        let dir = tempdir_with_config(
            r#"
version: "1"
status_progression:
  task:
    default_flow: [pending, completed]
    terminal_statuses: [completed]
"#,
        );
        let loader = WorkflowConfigLoader::new();
        let mode = loader.load(dir.path());
        assert!(matches!(mode, ConfigMode::V2(_)));
    }

    fn tempdir_with_config(yaml: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let cfg_dir = dir.path().join(".taskorchestrator");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(cfg_dir.join("config.yaml"), yaml).unwrap();
        dir
    }
}
