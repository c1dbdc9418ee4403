//! Fixture builders producing ready-to-insert `New*` payloads with sane
//! defaults, so tests only spell out the field they actually care about.

use workflow_core::models::{NewFeature, NewProject, NewTask, Priority};

pub fn new_project_fixture(name: &str) -> NewProject {
    NewProject {
        name: name.to_string(),
        summary: format!("{name} summary"),
        description: None,
        tags: Vec::new(),
    }
}

pub fn new_feature_fixture(name: &str) -> NewFeature {
    NewFeature {
        project_id: None,
        name: name.to_string(),
        summary: format!("{name} summary"),
        description: None,
        priority: Priority::Medium,
        tags: Vec::new(),
        requires_verification: false,
    }
}

pub fn new_task_fixture(title: &str) -> NewTask {
    NewTask {
        project_id: None,
        feature_id: None,
        title: title.to_string(),
        summary: format!("{title} summary"),
        description: None,
        priority: Priority::Medium,
        complexity: 5,
        tags: Vec::new(),
        requires_verification: false,
    }
}
