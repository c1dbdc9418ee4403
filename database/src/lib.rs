//! SQLite persistence for the workflow engine.
//!
//! This crate provides the [`SqliteEntityStore`] implementation of
//! `workflow_core::store::EntityStore`, offering pooled connections, WAL
//! mode, and `sqlx::migrate!`-managed schema evolution.
//!
//! # Usage
//!
//! ```rust,no_run
//! use workflow_database::{EntityStore, SqliteEntityStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteEntityStore::new(":memory:").await?;
//!     store.migrate().await?;
//!     store.health_check().await?;
//!     Ok(())
//! }
//! ```

mod common;
mod sqlite;

pub use sqlite::SqliteEntityStore;

pub use workflow_core::error::{EngineError, Result};
pub use workflow_core::models::{
    ContainerType, Dependency, DependencyType, EntityId, Feature, NewFeature, NewProject, NewTask,
    Project, Section, Status, Task,
};
pub use workflow_core::store::EntityStore;
