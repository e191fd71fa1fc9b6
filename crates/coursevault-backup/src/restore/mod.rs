//! Restore system

use crate::archive::ArchiveReader;
use crate::controller::{RestoreController, RestoreOutcome};
use crate::course::{course_restore_plan, course_restore_settings};
use crate::error::Result;
use crate::logger::LoggerChain;
use crate::progress::ProgressReporter;
use crate::store::RecordStore;
use std::time::Instant;
use tracing::{info, warn};

pub mod context;
pub mod dispatch;
pub mod log_rule;
pub mod mapping;
pub mod step;
pub mod transaction;
pub mod validation;

pub use context::{RestoreContext, RestoreStats, RestoreTarget};
pub use dispatch::{DispatchSummary, PathData, PathDispatcher, PathHandler};
pub use log_rule::{LogRecord, LogRule, LogRuleSet};
pub use mapping::IdMappings;
pub use step::{RestoreStep, TableHandler};
pub use transaction::{RestoreChange, RestoreTransaction};
pub use validation::{validate_restore_preconditions, RestoreOptions, COURSE_FILE};

/// The store handed back by a restore, with what happened to it
pub struct RestoreRun<S> {
    pub store: S,
    pub result: Result<RestoreOutcome>,
}

pub struct RestoreManager {
    options: RestoreOptions,
}

impl RestoreManager {
    pub fn new(options: RestoreOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RestoreOptions {
        &self.options
    }

    /// Restore a course archive into `store`.
    ///
    /// The rows are kept only when every step succeeds and this is not a
    /// dry run; otherwise everything the job inserted is removed again.
    pub fn restore<S: RecordStore + 'static>(
        &self,
        archive: ArchiveReader,
        store: S,
        logger: LoggerChain,
        progress: Box<dyn ProgressReporter>,
    ) -> RestoreRun<S> {
        let start = Instant::now();
        info!(
            "Starting restore: job={}, source course={}, dry_run={}",
            archive.manifest().job_id,
            archive.manifest().course_id,
            self.options.dry_run
        );

        // Stage 1: Validation
        info!("Stage 1/4: Validating preconditions");
        if let Err(e) = validate_restore_preconditions(archive.manifest(), &store, &self.options) {
            return RestoreRun {
                store,
                result: Err(e),
            };
        }

        // Stage 2: Settings and plan
        info!("Stage 2/4: Preparing restore plan");
        let prepared = course_restore_settings(archive.manifest(), &self.options)
            .and_then(|settings| Ok((settings, course_restore_plan::<S>(&self.options)?)));
        let (settings, plan) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                return RestoreRun {
                    store,
                    result: Err(e),
                }
            }
        };

        let mut controller =
            RestoreController::restore(store, archive, settings, self.options.target, plan)
                .with_logger(logger)
                .with_progress(progress);

        // Stage 3: Execution
        info!("Stage 3/4: Executing restore {}", controller.id());
        let result = match controller.execute() {
            Ok(mut outcome) if self.options.dry_run => {
                Self::rollback(&mut controller);
                outcome.dry_run = true;
                Ok(outcome)
            }
            Ok(outcome) => {
                // Stage 4: Commit
                info!("Stage 4/4: Committing restore");
                controller.commit().map(|_| outcome)
            }
            Err(e) => {
                warn!("Restore failed: {}", e);
                Self::rollback(&mut controller);
                Err(e)
            }
        };

        if let Ok(outcome) = &result {
            info!(
                "Restore complete: course={}, mappings={}, duration={:?}",
                outcome.course_id,
                outcome.mappings,
                start.elapsed()
            );
        }

        RestoreRun {
            store: controller.into_store(),
            result,
        }
    }

    fn rollback<S: RecordStore>(controller: &mut RestoreController<S>) {
        match controller.rollback() {
            Ok(removed) => info!("Removed {} restored rows", removed),
            Err(e) => warn!("Rollback incomplete: {}", e),
        }
    }
}
