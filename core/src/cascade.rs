//! Cascade Service (C6): detects and applies the automatic follow-on status
//! changes a single transition can trigger — unblocking downstream tasks,
//! advancing a feature when its first task starts, and cleaning up after a
//! container reaches a terminal status.
//!
//! Grounded on the teacher's `repository.rs` dependency-graph queries (reused
//! here through `EntityStore::find_by_to_task_id`) and on the recursive,
//! depth-bounded walk the teacher's workspace-setup cascade used before
//! trimming — generalized from a fixed two-level walk to the config-driven
//! `auto_cascade.max_depth` bound.

use crate::config::{ConfigMode, WorkflowConfig};
use crate::error::Result;
use crate::models::{ContainerType, EntityId, Status};
use crate::progression::ProgressionService;
use crate::store::EntityStore;

/// A single automatic follow-on change discovered after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum CascadeEvent {
    /// A downstream task's last open blocker just resolved.
    TaskUnblocked { task_id: EntityId },
    /// The first task under a feature started; the feature should advance
    /// out of its queue status.
    FeatureAutoAdvance {
        feature_id: EntityId,
        to_status: Status,
    },
    /// A feature reached a terminal status and completion cleanup is
    /// enabled: every child task already in `{completed, cancelled,
    /// deferred}` is deleted along with its sections and dependencies;
    /// non-terminal children are retained and reported.
    CompletionCleanup {
        feature_id: EntityId,
        deleted_task_ids: Vec<EntityId>,
        retained_task_ids: Vec<EntityId>,
    },
}

/// The outcome of applying one `CascadeEvent`, with any cascades it in turn
/// triggered. Failures are captured per-event rather than aborting the walk.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedCascade {
    pub event: CascadeEvent,
    pub applied: bool,
    pub error: Option<String>,
    pub child_cascades: Vec<AppliedCascade>,
}

/// Describes the transition that just committed, as input to cascade
/// detection.
#[derive(Debug, Clone)]
pub struct TransitionedEntity {
    pub container_type: ContainerType,
    pub entity_id: EntityId,
    pub feature_id: Option<EntityId>,
    pub from_status: Status,
    pub to_status: Status,
}

pub struct CascadeService;

impl CascadeService {
    /// Find every `CascadeEvent` a just-committed transition can trigger.
    /// Does not apply anything — pure detection over the current store state.
    pub async fn detect_cascade_events(
        store: &dyn EntityStore,
        config: &WorkflowConfig,
        transitioned: &TransitionedEntity,
    ) -> Result<Vec<CascadeEvent>> {
        let mut events = Vec::new();

        if transitioned.container_type == ContainerType::Task {
            let downstream = store
                .find_by_to_task_id(transitioned.entity_id, None)
                .await?;
            for dep in downstream {
                let unblocked = Self::blockers_resolved(store, dep.from_task_id).await?;
                if unblocked {
                    events.push(CascadeEvent::TaskUnblocked {
                        task_id: dep.from_task_id,
                    });
                }
            }

            if let Some(feature_id) = transitioned.feature_id {
                if transitioned.to_status.as_str() != transitioned.from_status.as_str() {
                    if let Some(event) =
                        Self::maybe_feature_auto_advance(store, config, feature_id).await?
                    {
                        events.push(event);
                    }
                    if let Some(event) = Self::maybe_all_tasks_complete(
                        store,
                        config,
                        feature_id,
                        &transitioned.to_status,
                    )
                    .await?
                    {
                        events.push(event);
                    }
                }
            }
        }

        if transitioned.container_type == ContainerType::Feature
            && config.completion_cleanup.enabled
            && transitioned.to_status.as_str() != transitioned.from_status.as_str()
            && Self::is_terminal(config, ContainerType::Feature, &transitioned.to_status)
        {
            const CLEANUP_ELIGIBLE: [&str; 3] = ["completed", "cancelled", "deferred"];
            let tasks = store.find_tasks_by_feature(transitioned.entity_id).await?;
            let (deleted, retained): (Vec<_>, Vec<_>) = tasks
                .into_iter()
                .partition(|t| CLEANUP_ELIGIBLE.contains(&t.status.as_str()));
            if !deleted.is_empty() || !retained.is_empty() {
                events.push(CascadeEvent::CompletionCleanup {
                    feature_id: transitioned.entity_id,
                    deleted_task_ids: deleted.into_iter().map(|t| t.id).collect(),
                    retained_task_ids: retained.into_iter().map(|t| t.id).collect(),
                });
            }
        }

        Ok(events)
    }

    /// Apply a batch of cascade events, recursing into the follow-on events
    /// each application produces, bounded by `auto_cascade.max_depth`.
    /// Stops descending (but still reports what was applied) once the depth
    /// bound or `cancelled` is hit.
    #[allow(clippy::only_used_in_recursion)]
    pub async fn apply_cascades(
        store: &dyn EntityStore,
        config: &WorkflowConfig,
        events: Vec<CascadeEvent>,
        depth: u32,
        cancelled: &dyn Fn() -> bool,
    ) -> Vec<AppliedCascade> {
        let mut results = Vec::with_capacity(events.len());

        for event in events {
            if cancelled() {
                results.push(AppliedCascade {
                    event,
                    applied: false,
                    error: Some("cascade cancelled".to_string()),
                    child_cascades: Vec::new(),
                });
                continue;
            }

            let outcome = Self::apply_one(store, config, &event).await;
            let (applied, error) = match &outcome {
                Ok(()) => (true, None),
                Err(err) => (false, Some(err.to_string())),
            };

            let child_cascades = if applied && depth + 1 < config.auto_cascade.max_depth {
                match Self::follow_on_events(store, config, &event).await {
                    Ok(follow_ons) if !follow_ons.is_empty() => {
                        Box::pin(Self::apply_cascades(
                            store,
                            config,
                            follow_ons,
                            depth + 1,
                            cancelled,
                        ))
                        .await
                    }
                    _ => Vec::new(),
                }
            } else {
                Vec::new()
            };

            results.push(AppliedCascade {
                event,
                applied,
                error,
                child_cascades,
            });
        }

        results
    }

    /// Re-derive the detection pass for whatever entity `event` touched, so a
    /// cascade chain (unblock → feature advance → ...) keeps walking.
    async fn follow_on_events(
        store: &dyn EntityStore,
        config: &WorkflowConfig,
        event: &CascadeEvent,
    ) -> Result<Vec<CascadeEvent>> {
        match event {
            CascadeEvent::TaskUnblocked { task_id } => {
                let task = store.get_task(*task_id).await?;
                match task {
                    Some(task) => {
                        let transitioned = TransitionedEntity {
                            container_type: ContainerType::Task,
                            entity_id: task.id,
                            feature_id: task.feature_id,
                            from_status: task.status.clone(),
                            to_status: task.status,
                        };
                        Self::detect_cascade_events(store, config, &transitioned).await
                    }
                    None => Ok(Vec::new()),
                }
            }
            CascadeEvent::FeatureAutoAdvance { .. } | CascadeEvent::CompletionCleanup { .. } => {
                Ok(Vec::new())
            }
        }
    }

    async fn apply_one(
        store: &dyn EntityStore,
        _config: &WorkflowConfig,
        event: &CascadeEvent,
    ) -> Result<()> {
        match event {
            CascadeEvent::TaskUnblocked { .. } => {
                // Unblocking is purely informational at the store level: the
                // task's status does not change, only its eligibility for a
                // future `in-progress` transition. Nothing to persist.
                Ok(())
            }
            CascadeEvent::FeatureAutoAdvance {
                feature_id,
                to_status,
            } => {
                let mut feature = store
                    .get_feature(*feature_id)
                    .await?
                    .ok_or_else(|| crate::error::EngineError::not_found("feature", *feature_id))?;
                feature.status = to_status.clone();
                feature.version += 1;
                store.update_feature(feature).await?;
                Ok(())
            }
            CascadeEvent::CompletionCleanup { deleted_task_ids, .. } => {
                for task_id in deleted_task_ids {
                    store.delete_task_cascade(*task_id).await?;
                }
                Ok(())
            }
        }
    }

    /// A task's blockers are resolved once every upstream `BLOCKS` edge
    /// points to a task whose status is `completed` or `cancelled`, or to no
    /// task at all — a missing upstream counts as resolved, same as a
    /// terminal one.
    async fn blockers_resolved(store: &dyn EntityStore, task_id: EntityId) -> Result<bool> {
        let blockers = store
            .find_by_from_task_id(task_id, Some(crate::models::DependencyType::IsBlockedBy))
            .await?;
        if blockers.is_empty() {
            return Ok(false);
        }
        for blocker in &blockers {
            let upstream = store.get_task(blocker.to_task_id).await?;
            match upstream {
                Some(task)
                    if task.status.as_str() != "completed" && task.status.as_str() != "cancelled" =>
                {
                    return Ok(false);
                }
                _ => {}
            }
        }
        Ok(true)
    }

    async fn maybe_feature_auto_advance(
        store: &dyn EntityStore,
        config: &WorkflowConfig,
        feature_id: EntityId,
    ) -> Result<Option<CascadeEvent>> {
        if !config.auto_cascade.enabled {
            return Ok(None);
        }
        let feature = match store.get_feature(feature_id).await? {
            Some(feature) => feature,
            None => return Ok(None),
        };

        let mode = ConfigMode::V2(config.clone());
        let tags: Vec<String> = feature.tags.iter().cloned().collect();
        let flow_path =
            match ProgressionService::get_flow_path(&mode, ContainerType::Feature, &tags, &feature.status) {
                Some(path) => path,
                None => return Ok(None),
            };

        // Only the first position in the flow (the queue status) auto-advances.
        if flow_path.current_position != 0 {
            return Ok(None);
        }

        let counts = store.get_task_counts_by_feature_id(feature_id).await?;
        let in_progress_or_later = counts.total - counts.by_status.get("pending").copied().unwrap_or(0)
            - counts.by_status.get("backlog").copied().unwrap_or(0);
        if in_progress_or_later == 0 {
            return Ok(None);
        }

        match flow_path.next_after_current() {
            Some(next) => Ok(Some(CascadeEvent::FeatureAutoAdvance {
                feature_id,
                to_status: Status::new(next),
            })),
            None => Ok(None),
        }
    }

    /// All tasks under a feature reaching a terminal status advances the
    /// feature one step forward in its own flow (e.g. `in-development` to
    /// `testing`). Distinct from `maybe_feature_auto_advance`, which only
    /// fires on the first task leaving the queue; this fires regardless of
    /// the feature's current position, as long as it isn't already terminal.
    async fn maybe_all_tasks_complete(
        store: &dyn EntityStore,
        config: &WorkflowConfig,
        feature_id: EntityId,
        to_status: &Status,
    ) -> Result<Option<CascadeEvent>> {
        if !config.auto_cascade.enabled || !Self::is_terminal(config, ContainerType::Task, to_status) {
            return Ok(None);
        }

        let feature = match store.get_feature(feature_id).await? {
            Some(feature) => feature,
            None => return Ok(None),
        };

        let mode = ConfigMode::V2(config.clone());
        let tags: Vec<String> = feature.tags.iter().cloned().collect();
        let flow_path =
            match ProgressionService::get_flow_path(&mode, ContainerType::Feature, &tags, &feature.status) {
                Some(path) if !path.is_terminal(&feature.status) => path,
                _ => return Ok(None),
            };

        let counts = store.get_task_counts_by_feature_id(feature_id).await?;
        if counts.total == 0 {
            return Ok(None);
        }
        let task_terminal_statuses = config
            .status_progression
            .get(ContainerType::Task.as_str())
            .map(|c| c.terminal_statuses.clone())
            .unwrap_or_default();
        let terminal_count: u64 = task_terminal_statuses
            .iter()
            .map(|s| counts.by_status.get(s).copied().unwrap_or(0))
            .sum();
        if terminal_count != counts.total {
            return Ok(None);
        }

        match flow_path.next_after_current() {
            Some(next) => Ok(Some(CascadeEvent::FeatureAutoAdvance {
                feature_id,
                to_status: Status::new(next),
            })),
            None => Ok(None),
        }
    }

    fn is_terminal(config: &WorkflowConfig, container_type: ContainerType, status: &Status) -> bool {
        config
            .status_progression
            .get(container_type.as_str())
            .map(|c| c.terminal_statuses.iter().any(|s| s == status.as_str()))
            .unwrap_or(false)
    }

    /// Every downstream task whose blockers became fully resolved as a
    /// result of `completed_task_id` finishing.
    pub async fn find_newly_unblocked_tasks(
        store: &dyn EntityStore,
        completed_task_id: EntityId,
    ) -> Result<Vec<EntityId>> {
        let downstream = store
            .find_by_to_task_id(completed_task_id, Some(crate::models::DependencyType::IsBlockedBy))
            .await?;
        let mut unblocked = Vec::new();
        for dep in downstream {
            if Self::blockers_resolved(store, dep.from_task_id).await? {
                unblocked.push(dep.from_task_id);
            }
        }
        Ok(unblocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification_uses_config() {
        let config: WorkflowConfig = serde_yaml::from_str(
            r#"
version: "1"
status_progression:
  task:
    default_flow: [pending, completed]
    terminal_statuses: [completed, cancelled]
"#,
        )
        .unwrap();
        assert!(CascadeService::is_terminal(
            &config,
            ContainerType::Task,
            &Status::new("completed")
        ));
        assert!(!CascadeService::is_terminal(
            &config,
            ContainerType::Task,
            &Status::new("pending")
        ));
    }
}
