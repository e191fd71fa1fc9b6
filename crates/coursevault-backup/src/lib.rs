//! Coursevault Backup Engine
//!
//! This crate backs up a course and its related rows into a single archive
//! and restores such archives into a record store, remapping every id on
//! the way in.
//!
//! # Features
//!
//! ## Backup
//! - **Step plans**: ordered, dependency-sorted steps, each writing one XML file
//! - **Setting tree**: per-course and per-activity switches with cascading locks
//! - **Annotations**: users are backed up only when something references them
//! - **Manifest format**: JSON metadata with settings, checksums and statistics
//!
//! ## Restore
//! - **Path dispatch**: streamed XML elements routed to handlers by path
//! - **Id mappings**: old ids mapped to new ones for the life of the job
//! - **Log rules**: legacy log rows rewritten to point at restored ids
//! - **Transactions**: a failed or dry-run restore removes what it inserted
//!
//! # Examples
//!
//! ```no_run
//! use coursevault_backup::{backup_controller, ArchiveBuilder, MemoryStore};
//! use camino::Utf8Path;
//! use std::collections::BTreeMap;
//!
//! fn main() -> coursevault_backup::Result<()> {
//!     let store = MemoryStore::load(Utf8Path::new("dataset.json"))?;
//!     let mut controller = backup_controller(store, 2, &BTreeMap::new())?;
//!     let output = controller.execute()?;
//!
//!     let summary = ArchiveBuilder::default().write(
//!         &output.files,
//!         &output.manifest,
//!         Utf8Path::new("course-2.tar.gz"),
//!     )?;
//!     println!("Backup created: {} bytes", summary.size_bytes);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod controller;
pub mod course;
pub mod error;
pub mod executor;
pub mod logger;
pub mod manifest;
pub mod plan;
pub mod progress;
pub mod restore;
pub mod settings;
pub mod store;
pub mod structure;
pub mod template;

// Re-export commonly used types
pub use archive::{ArchiveBuilder, ArchiveReader, ArchiveSummary};
pub use controller::{
    BackupController, BackupOutput, Controller, JobStatus, RestoreController, RestoreOutcome,
};
pub use course::{
    backup_controller, course_backup_plan, course_restore_plan, course_restore_settings,
    course_settings,
};
pub use error::{BackupError, Result, ValidationErrors};
pub use executor::{ExecutionReport, StepExecutor};
pub use logger::{
    FileLogger, LogSink, LoggerChain, MemoryLogger, OutputIndentedLogger, TracingLogger,
};
pub use manifest::{
    human_bytes, BackupManifest, BackupStatistics, ChecksumInfo, StepRecord, MANIFEST_FILENAME,
    MANIFEST_VERSION,
};
pub use plan::{JobContext, Step, StepPlan};
pub use progress::{BarProgress, NullProgress, ProgressReporter, RecordingProgress};
pub use restore::{
    IdMappings, LogRecord, LogRule, LogRuleSet, RestoreManager, RestoreOptions, RestoreRun,
    RestoreTarget,
};
pub use settings::{DependencyKind, Setting, SettingTree, SettingValue, ValueType};
pub use store::{record, MemoryStore, Record, RecordStore};
pub use structure::BackupContext;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
