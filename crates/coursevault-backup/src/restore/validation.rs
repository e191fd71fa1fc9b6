//! Pre-flight validation for restore operations

use super::context::RestoreTarget;
use crate::error::{Result, ValidationErrors};
use crate::manifest::BackupManifest;
use crate::store::RecordStore;
use coursevault_core::config::RestoreDefaults;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Archive file every course restore starts from
pub const COURSE_FILE: &str = "course/course.xml";

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub target: RestoreTarget,
    /// Restore legacy log rows
    pub restore_logs: bool,
    /// Map archived users onto existing users with the same username
    pub match_existing_users: bool,
    /// Run the whole restore, then roll it back
    pub dry_run: bool,
    /// Setting overrides applied before execution
    pub overrides: BTreeMap<String, String>,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self::from_config(&RestoreDefaults::default())
    }
}

impl RestoreOptions {
    pub fn from_config(defaults: &RestoreDefaults) -> Self {
        Self {
            target: RestoreTarget::NewCourse,
            restore_logs: defaults.restore_logs,
            match_existing_users: defaults.match_existing_users,
            dry_run: false,
            overrides: BTreeMap::new(),
        }
    }
}

/// Checks that must pass before any row is written
pub fn validate_restore_preconditions<S: RecordStore + ?Sized>(
    manifest: &BackupManifest,
    store: &S,
    options: &RestoreOptions,
) -> Result<()> {
    info!("Validating restore preconditions for job {}", manifest.job_id);
    let mut errors = ValidationErrors::new();

    manifest.validate()?;
    debug!("✓ Manifest version {} is supported", manifest.version);

    if !manifest.files.contains_key(COURSE_FILE) {
        errors.add("archive", format!("archive has no {}", COURSE_FILE));
    }

    if let RestoreTarget::ExistingCourse(id) = options.target {
        if store.get("course", id)?.is_none() {
            errors.add("into-course", format!("course {} does not exist", id));
        } else {
            debug!("✓ Target course {} exists", id);
        }
    }

    errors.into_result()?;
    info!("All preconditions validated");
    Ok(())
}
