//! Steps and step plans.
//!
//! A plan is the ordered list of steps a job executes. Steps may declare
//! that they must run after other steps; `StepPlan::build` orders them with
//! a depth-first topological sort that otherwise keeps declaration order.

use crate::error::{BackupError, Result};
use crate::logger::LoggerChain;
use crate::settings::SettingTree;
use coursevault_core::JobKind;
use std::collections::{HashMap, HashSet};

/// State shared by every step of one job
pub trait JobContext {
    fn kind(&self) -> JobKind;

    fn settings(&self) -> &SettingTree;

    fn settings_mut(&mut self) -> &mut SettingTree;
}

/// One unit of backup or restore work
pub trait Step<C: JobContext> {
    fn name(&self) -> &str;

    /// Archive path this step writes (backup) or reads (restore)
    fn path(&self) -> &str;

    /// Names of steps that must run before this one
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether the step runs in this job; disabled steps are skipped
    fn is_enabled(&self, _ctx: &C) -> Result<bool> {
        Ok(true)
    }

    fn process(&mut self, ctx: &mut C, logger: &mut LoggerChain) -> Result<()>;
}

/// Steps in declaration order, not yet ordered
pub struct StepPlan<C: JobContext> {
    steps: Vec<Box<dyn Step<C>>>,
}

impl<C: JobContext> Default for StepPlan<C> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<C: JobContext> StepPlan<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, step: Box<dyn Step<C>>) -> Result<()> {
        if self.steps.iter().any(|s| s.name() == step.name()) {
            return Err(BackupError::coding(format!(
                "step '{}' is already in the plan",
                step.name()
            )));
        }
        self.steps.push(step);
        Ok(())
    }

    /// Builder-style `add`
    pub fn with_step(mut self, step: Box<dyn Step<C>>) -> Result<Self> {
        self.add(step)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Order the steps and fix their positions
    pub fn build(self) -> Result<BuiltPlan<C>> {
        let index: HashMap<String, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name().to_string(), i))
            .collect();
        let deps: Vec<Vec<String>> = self.steps.iter().map(|s| s.depends_on()).collect();

        for (i, step_deps) in deps.iter().enumerate() {
            for dep in step_deps {
                if !index.contains_key(dep) {
                    return Err(BackupError::coding(format!(
                        "step '{}' depends on unknown step '{}'",
                        self.steps[i].name(),
                        dep
                    )));
                }
            }
        }

        let mut order = Vec::with_capacity(self.steps.len());
        let mut seen = HashSet::new();
        let mut visiting = Vec::new();
        let names: Vec<&str> = self.steps.iter().map(|s| s.name()).collect();
        for i in 0..self.steps.len() {
            visit(i, &names, &deps, &index, &mut order, &mut seen, &mut visiting)?;
        }

        let mut slots: Vec<Option<Box<dyn Step<C>>>> = self.steps.into_iter().map(Some).collect();
        let steps = order
            .into_iter()
            .enumerate()
            .filter_map(|(position, i)| {
                slots[i].take().map(|step| PlannedStep {
                    position: position + 1,
                    step,
                })
            })
            .collect();

        Ok(BuiltPlan { steps })
    }
}

fn visit(
    i: usize,
    names: &[&str],
    deps: &[Vec<String>],
    index: &HashMap<String, usize>,
    order: &mut Vec<usize>,
    seen: &mut HashSet<usize>,
    visiting: &mut Vec<usize>,
) -> Result<()> {
    if seen.contains(&i) {
        return Ok(());
    }
    if let Some(start) = visiting.iter().position(|&v| v == i) {
        let cycle: Vec<String> = visiting[start..]
            .iter()
            .chain(std::iter::once(&i))
            .map(|&v| names[v].to_string())
            .collect();
        return Err(BackupError::coding(format!(
            "circular step dependency: {}",
            cycle.join(" -> ")
        )));
    }

    visiting.push(i);
    for dep in &deps[i] {
        if let Some(&d) = index.get(dep) {
            visit(d, names, deps, index, order, seen, visiting)?;
        }
    }
    visiting.pop();

    seen.insert(i);
    order.push(i);
    Ok(())
}

/// A step with its fixed, 1-based position
pub struct PlannedStep<C: JobContext> {
    pub position: usize,
    pub step: Box<dyn Step<C>>,
}

/// An ordered, immutable plan
pub struct BuiltPlan<C: JobContext> {
    steps: Vec<PlannedStep<C>>,
}

impl<C: JobContext> BuiltPlan<C> {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.step.name()).collect()
    }

    pub(crate) fn steps_mut(&mut self) -> &mut [PlannedStep<C>] {
        &mut self.steps
    }
}
