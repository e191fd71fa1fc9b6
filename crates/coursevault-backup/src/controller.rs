//! Job controllers.
//!
//! A controller owns everything one backup or restore job needs: its
//! settings (inside the job context), its plan, its logger chain and its
//! progress reporter. It walks a fixed status sequence and refuses
//! operations that do not fit the current status.

use crate::archive::ArchiveReader;
use crate::error::{BackupError, Result};
use crate::executor::{ExecutionReport, StepExecutor};
use crate::logger::{LogSink, LoggerChain};
use crate::manifest::{BackupManifest, StepRecord};
use crate::plan::{JobContext, StepPlan};
use crate::progress::{NullProgress, ProgressReporter};
use crate::restore::{RestoreContext, RestoreStats, RestoreTarget};
use crate::settings::SettingTree;
use crate::store::RecordStore;
use crate::structure::BackupContext;
use coursevault_core::{JobKind, LogLevel};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Created,
    Configured,
    Executing,
    FinishedOk,
    FinishedErr,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::FinishedOk | JobStatus::FinishedErr)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Created => "created",
            JobStatus::Configured => "configured",
            JobStatus::Executing => "executing",
            JobStatus::FinishedOk => "finished",
            JobStatus::FinishedErr => "failed",
        };
        write!(f, "{}", s)
    }
}

pub struct Controller<C: JobContext> {
    id: String,
    status: JobStatus,
    context: C,
    plan: Option<StepPlan<C>>,
    executor: Option<StepExecutor<C>>,
    logger: LoggerChain,
    progress: Box<dyn ProgressReporter>,
}

pub type BackupController<S> = Controller<BackupContext<S>>;
pub type RestoreController<S> = Controller<RestoreContext<S>>;

impl<C: JobContext> Controller<C> {
    pub fn new(context: C, plan: StepPlan<C>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Created,
            context,
            plan: Some(plan),
            executor: None,
            logger: LoggerChain::new(),
            progress: Box::new(NullProgress),
        }
    }

    pub fn with_logger(mut self, logger: LoggerChain) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn add_logger(&mut self, sink: Box<dyn LogSink>) {
        self.logger.add_logger(sink);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> JobKind {
        self.context.kind()
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn logger(&self) -> &LoggerChain {
        &self.logger
    }

    pub fn settings(&self) -> &SettingTree {
        self.context.settings()
    }

    /// Settings can change until execution starts
    pub fn settings_mut(&mut self) -> Result<&mut SettingTree> {
        match self.status {
            JobStatus::Created | JobStatus::Configured => Ok(self.context.settings_mut()),
            other => Err(BackupError::invalid_state("created or configured", other)),
        }
    }

    /// Log through the job's logger chain
    pub fn log(
        &mut self,
        message: &str,
        level: LogLevel,
        args: &[(&str, &str)],
        depth: usize,
        display: bool,
    ) -> Result<()> {
        self.logger.log(message, level, args, depth, display)
    }

    /// Order the plan. Done implicitly by the first execution.
    pub fn configure(&mut self) -> Result<()> {
        if self.status != JobStatus::Created {
            return Err(BackupError::invalid_state(JobStatus::Created, self.status));
        }
        let plan = self
            .plan
            .take()
            .ok_or_else(|| BackupError::coding("controller has no plan"))?;
        let executor = StepExecutor::new(plan.build()?);

        let steps = executor.plan().len().to_string();
        let kind = self.kind().to_string();
        self.executor = Some(executor);
        self.status = JobStatus::Configured;
        self.logger.log(
            "Configured {kind} job {id} with {steps} steps",
            LogLevel::Debug,
            &[("kind", kind.as_str()), ("id", self.id.as_str()), ("steps", steps.as_str())],
            0,
            false,
        )
    }

    /// Freeze the settings and run the plan once
    pub fn run(&mut self) -> Result<ExecutionReport> {
        if self.status == JobStatus::Created {
            self.configure()?;
        }
        if self.status != JobStatus::Configured {
            return Err(BackupError::invalid_state(JobStatus::Configured, self.status));
        }
        let executor = self
            .executor
            .as_mut()
            .ok_or_else(|| BackupError::coding("configured controller has no executor"))?;

        self.status = JobStatus::Executing;
        self.context.settings_mut().freeze();
        let kind = self.context.kind().to_string();
        info!("Executing {} job {}", kind, self.id);
        self.logger.log(
            "Starting {kind} {id}",
            LogLevel::Info,
            &[("kind", kind.as_str()), ("id", self.id.as_str())],
            0,
            true,
        )?;

        match executor.run(&mut self.context, &mut self.logger, self.progress.as_mut()) {
            Ok(report) => {
                self.status = JobStatus::FinishedOk;
                self.logger.log(
                    "Finished {kind} {id}",
                    LogLevel::Info,
                    &[("kind", kind.as_str()), ("id", self.id.as_str())],
                    0,
                    true,
                )?;
                Ok(report)
            }
            Err(err) => {
                self.status = JobStatus::FinishedErr;
                warn!("{} job {} failed: {}", kind, self.id, err);
                Err(err)
            }
        }
    }
}

/// Everything a finished backup produced
#[derive(Debug, Clone)]
pub struct BackupOutput {
    pub manifest: BackupManifest,
    pub files: BTreeMap<String, Vec<u8>>,
    pub report: ExecutionReport,
}

impl<S: RecordStore> Controller<BackupContext<S>> {
    pub fn backup(
        store: S,
        course_id: i64,
        settings: SettingTree,
        plan: StepPlan<BackupContext<S>>,
    ) -> Self {
        Self::new(BackupContext::new(store, course_id, settings), plan)
    }

    /// Run the backup and collect its files with their manifest
    pub fn execute(&mut self) -> Result<BackupOutput> {
        let report = self.run()?;

        let files = std::mem::take(&mut self.context.files);
        let mut manifest = BackupManifest::new(
            self.id.clone(),
            self.context.course_id,
            self.context.settings.snapshot(),
            &files,
        );
        manifest.steps = report
            .executed
            .iter()
            .filter(|s| files.contains_key(&s.path))
            .map(|s| StepRecord {
                name: s.name.clone(),
                path: s.path.clone(),
            })
            .collect();
        manifest.statistics.annotated = self.context.annotation_counts();
        manifest.statistics.duration_seconds = Some(report.duration.as_secs_f64());

        Ok(BackupOutput {
            manifest,
            files,
            report,
        })
    }

    pub fn into_store(self) -> S {
        self.context.store
    }
}

/// Result of a restore job
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub job_id: String,
    /// The course the archive was restored into
    pub course_id: i64,
    pub stats: RestoreStats,
    /// Number of id mappings recorded
    pub mappings: usize,
    pub report: ExecutionReport,
    /// The restore was rolled back on purpose
    pub dry_run: bool,
}

impl<S: RecordStore> Controller<RestoreContext<S>> {
    pub fn restore(
        store: S,
        archive: ArchiveReader,
        settings: SettingTree,
        target: RestoreTarget,
        plan: StepPlan<RestoreContext<S>>,
    ) -> Self {
        let (_, files) = archive.into_parts();
        Self::new(RestoreContext::new(store, files, settings, target), plan)
    }

    pub fn execute(&mut self) -> Result<RestoreOutcome> {
        let report = self.run()?;
        let course_id = self
            .context
            .course_id
            .ok_or_else(|| BackupError::coding("restore finished without a target course"))?;

        Ok(RestoreOutcome {
            job_id: self.id.clone(),
            course_id,
            stats: self.context.stats.clone(),
            mappings: self.context.mappings.len(),
            report,
            dry_run: false,
        })
    }

    /// Keep the restored rows
    pub fn commit(&mut self) -> Result<()> {
        if self.status != JobStatus::FinishedOk {
            return Err(BackupError::invalid_state(JobStatus::FinishedOk, self.status));
        }
        self.context.transaction.commit()
    }

    /// Remove every row the restore inserted
    pub fn rollback(&mut self) -> Result<usize> {
        if !self.status.is_finished() {
            return Err(BackupError::invalid_state("finished or failed", self.status));
        }
        let removed = self.context.rollback()?;
        let count = removed.to_string();
        self.logger.log(
            "Rolled back {count} restored rows",
            LogLevel::Warning,
            &[("count", count.as_str())],
            0,
            true,
        )?;
        Ok(removed)
    }

    pub fn into_store(self) -> S {
        self.context.into_store()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemoryLogger;
    use crate::plan::tests::{TraceContext, TraceStep};
    use crate::settings::Setting;
    use crate::store::{record, MemoryStore};
    use crate::structure::{Element, Param, Source, StructureStep};
    use coursevault_core::SettingLevel;

    fn trace_controller() -> Controller<TraceContext> {
        let mut ctx = TraceContext::default();
        ctx.settings
            .add(Setting::boolean("users", SettingLevel::Root, true))
            .unwrap();
        let plan = StepPlan::new()
            .with_step(TraceStep::boxed("course", &[]))
            .unwrap();
        Controller::new(ctx, plan)
    }

    #[test]
    fn test_status_sequence() {
        let mut controller = trace_controller();
        assert_eq!(controller.status(), JobStatus::Created);
        assert_eq!(controller.kind(), JobKind::Backup);
        assert_eq!(controller.id().len(), 36);

        controller.configure().unwrap();
        assert_eq!(controller.status(), JobStatus::Configured);
        assert!(controller.configure().is_err());

        controller.run().unwrap();
        assert_eq!(controller.status(), JobStatus::FinishedOk);
        assert_eq!(controller.context().trace, vec!["course"]);
    }

    #[test]
    fn test_settings_are_frozen_once_executing() {
        let mut controller = trace_controller();
        controller
            .settings_mut()
            .unwrap()
            .set_value("users", crate::settings::SettingValue::Bool(false))
            .unwrap();

        controller.run().unwrap();
        assert!(controller.settings().is_frozen());
        assert!(matches!(
            controller.settings_mut().err(),
            Some(BackupError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_second_run_is_invalid_state() {
        let mut controller = trace_controller();
        controller.run().unwrap();
        assert!(matches!(
            controller.run().unwrap_err(),
            BackupError::InvalidState { .. }
        ));
        assert_eq!(controller.context().trace.len(), 1);
    }

    #[test]
    fn test_failed_run_sets_failed_status() {
        let mut broken = TraceStep::boxed("course", &[]);
        broken.fail = true;
        let plan = StepPlan::new().with_step(broken).unwrap();
        let mut controller = Controller::new(TraceContext::default(), plan);

        assert!(controller.run().is_err());
        assert_eq!(controller.status(), JobStatus::FinishedErr);
        assert_eq!(controller.status().to_string(), "failed");
    }

    #[test]
    fn test_log_reaches_every_sink() {
        let first = MemoryLogger::new(LogLevel::Info);
        let second = MemoryLogger::new(LogLevel::Debug);
        let (a, b) = (first.buffer(), second.buffer());

        let mut controller = trace_controller()
            .with_logger(LoggerChain::with_sinks(vec![Box::new(first)]));
        controller.add_logger(Box::new(second));
        assert_eq!(controller.logger().len(), 2);

        controller
            .log("hello {who}", LogLevel::Info, &[("who", "world")], 0, true)
            .unwrap();
        controller.log("details", LogLevel::Debug, &[], 1, false).unwrap();

        assert_eq!(a.lock().unwrap().len(), 1);
        assert_eq!(b.lock().unwrap().len(), 2);
        assert_eq!(a.lock().unwrap()[0].message, "hello world");
    }

    #[test]
    fn test_backup_execute_builds_manifest() {
        let mut store = MemoryStore::new();
        store
            .insert_with_id("course", record([("id", "2"), ("fullname", "Rust")]))
            .unwrap();

        let tree = Element::rows("course", Source::table("course").filter("id", Param::CourseId))
            .fields(&["fullname"]);
        let plan = StepPlan::new()
            .with_step(Box::new(StructureStep::new("course", "course/course.xml", tree)))
            .unwrap();
        let mut controller = BackupController::backup(store, 2, SettingTree::new(), plan);

        let output = controller.execute().unwrap();
        assert_eq!(output.manifest.course_id, 2);
        assert_eq!(output.manifest.job_id, controller.id());
        assert_eq!(output.manifest.steps.len(), 1);
        assert!(output.manifest.files.contains_key("course/course.xml"));
        assert!(output.files.contains_key("course/course.xml"));
        assert!(output.manifest.statistics.duration_seconds.is_some());

        let store = controller.into_store();
        assert_eq!(store.count("course"), 1);
    }
}
