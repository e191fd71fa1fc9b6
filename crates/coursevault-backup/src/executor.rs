//! Runs a built plan, one step at a time, in plan order.

use crate::error::{BackupError, Result};
use crate::logger::LoggerChain;
use crate::plan::{BuiltPlan, JobContext, PlannedStep};
use crate::progress::ProgressReporter;
use coursevault_core::LogLevel;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A step that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStep {
    pub position: usize,
    pub name: String,
    pub path: String,
}

/// What happened during one execution
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub executed: Vec<ExecutedStep>,
    pub skipped: Vec<String>,
    pub duration: Duration,
}

impl ExecutionReport {
    pub fn executed_names(&self) -> Vec<&str> {
        self.executed.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Executes a plan exactly once
pub struct StepExecutor<C: JobContext> {
    plan: BuiltPlan<C>,
    ran: bool,
}

impl<C: JobContext> StepExecutor<C> {
    pub fn new(plan: BuiltPlan<C>) -> Self {
        Self { plan, ran: false }
    }

    pub fn plan(&self) -> &BuiltPlan<C> {
        &self.plan
    }

    pub fn has_run(&self) -> bool {
        self.ran
    }

    /// Run every enabled step in order. The first failing step aborts the
    /// run with `StepFailed`; later steps are never started. A step whose
    /// enabled check fails counts as failed.
    pub fn run(
        &mut self,
        ctx: &mut C,
        logger: &mut LoggerChain,
        progress: &mut dyn ProgressReporter,
    ) -> Result<ExecutionReport> {
        if self.ran {
            return Err(BackupError::coding("a plan can only be executed once"));
        }
        self.ran = true;

        let started = Instant::now();
        let mut report = ExecutionReport::default();
        let kind = ctx.kind().to_string();
        progress.start(self.plan.len() as u64, &format!("Running {} steps", kind));

        for planned in self.plan.steps_mut() {
            let name = planned.step.name().to_string();

            match run_step(planned, ctx, logger, &kind) {
                Ok(true) => report.executed.push(ExecutedStep {
                    position: planned.position,
                    name: name.clone(),
                    path: planned.step.path().to_string(),
                }),
                Ok(false) => report.skipped.push(name.clone()),
                Err(err) => {
                    let message = err.to_string();
                    if let Err(log_err) = logger.log(
                        "Step {step} failed: {error}",
                        LogLevel::Error,
                        &[("step", name.as_str()), ("error", message.as_str())],
                        1,
                        true,
                    ) {
                        warn!("Could not log failure of step {}: {}", name, log_err);
                    }
                    progress.finish("failed");
                    return Err(BackupError::StepFailed {
                        step: name,
                        position: planned.position,
                        source: Box::new(err),
                    });
                }
            }
            progress.advance(&name);
        }

        report.duration = started.elapsed();
        progress.finish("done");
        Ok(report)
    }
}

/// Run one step if it is enabled. Returns whether it ran.
fn run_step<C: JobContext>(
    planned: &mut PlannedStep<C>,
    ctx: &mut C,
    logger: &mut LoggerChain,
    kind: &str,
) -> Result<bool> {
    let name = planned.step.name().to_string();
    if !planned.step.is_enabled(ctx)? {
        logger.log(
            "Skipping step {step}",
            LogLevel::Debug,
            &[("step", name.as_str())],
            1,
            false,
        )?;
        return Ok(false);
    }

    let position = planned.position.to_string();
    logger.log(
        "Executing step {position}: {step}",
        LogLevel::Info,
        &[("position", position.as_str()), ("step", name.as_str())],
        1,
        true,
    )?;
    debug!("{} step {} ({})", kind, name, planned.step.path());

    planned.step.process(ctx, logger)?;
    Ok(true)
}
