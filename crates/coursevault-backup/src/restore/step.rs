//! Restore steps and the generic table row handler

use super::context::RestoreContext;
use super::dispatch::{PathData, PathDispatcher, PathHandler};
use crate::error::Result;
use crate::logger::LoggerChain;
use crate::plan::Step;
use crate::store::{field_i64, record_id, RecordStore};
use crate::template;
use coursevault_core::LogLevel;

/// Restores one archive file by dispatching its elements
pub struct RestoreStep<S: RecordStore> {
    name: String,
    path: String,
    dispatcher: PathDispatcher<RestoreContext<S>>,
    depends_on: Vec<String>,
    setting: Option<String>,
}

impl<S: RecordStore> RestoreStep<S> {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            dispatcher: PathDispatcher::new(),
            depends_on: Vec::new(),
            setting: None,
        }
    }

    /// Register a handler for an element path of this step's file
    pub fn on<H>(mut self, element_path: &str, handler: H) -> Result<Self>
    where
        H: PathHandler<RestoreContext<S>> + 'static,
    {
        self.dispatcher.register(element_path, handler)?;
        Ok(self)
    }

    pub fn after(mut self, step: impl Into<String>) -> Self {
        self.depends_on.push(step.into());
        self
    }

    pub fn enabled_by(mut self, name: impl Into<String>) -> Self {
        self.setting = Some(name.into());
        self
    }
}

impl<S: RecordStore> Step<RestoreContext<S>> for RestoreStep<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn depends_on(&self) -> Vec<String> {
        self.depends_on.clone()
    }

    fn is_enabled(&self, ctx: &RestoreContext<S>) -> Result<bool> {
        match &self.setting {
            Some(name) => ctx.settings.bool_value(name),
            None => Ok(true),
        }
    }

    fn process(&mut self, ctx: &mut RestoreContext<S>, logger: &mut LoggerChain) -> Result<()> {
        let Some(xml) = ctx.file(&self.path).map(<[u8]>::to_vec) else {
            return logger.log(
                "{path} is not in the archive, nothing to restore",
                LogLevel::Info,
                &[("path", self.path.as_str())],
                2,
                true,
            );
        };

        let summary = self.dispatcher.dispatch(&xml, ctx)?;
        let total = summary.total().to_string();
        logger.log(
            "Restored {count} elements from {path}",
            LogLevel::Debug,
            &[("count", total.as_str()), ("path", self.path.as_str())],
            2,
            false,
        )
    }
}

/// Restores the rows of one table.
///
/// The old `id` is dropped and a new row inserted. Parent fields must have
/// a mapping; foreign keys fall back to 0 when they have none. The new id
/// is then mapped under the handler's item type.
#[derive(Debug, Clone)]
pub struct TableHandler {
    itemtype: String,
    table: String,
    parents: Vec<(String, String)>,
    foreign_keys: Vec<(String, String)>,
    gate: Option<String>,
}

impl TableHandler {
    pub fn new(itemtype: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            itemtype: itemtype.into(),
            table: table.into(),
            parents: Vec::new(),
            foreign_keys: Vec::new(),
            gate: None,
        }
    }

    /// `field` holds the old id of a required `itemtype` row
    pub fn with_parent(mut self, field: impl Into<String>, itemtype: impl Into<String>) -> Self {
        self.parents.push((field.into(), itemtype.into()));
        self
    }

    /// `field` holds the old id of an optional `itemtype` row
    pub fn with_foreign_key(mut self, field: impl Into<String>, itemtype: impl Into<String>) -> Self {
        self.foreign_keys.push((field.into(), itemtype.into()));
        self
    }

    /// Leave rows out while the boolean setting named by `template`
    /// (filled from the row) is off. Settings the job does not define
    /// leave the row in.
    pub fn only_if(mut self, template: impl Into<String>) -> Self {
        self.gate = Some(template.into());
        self
    }
}

impl<S: RecordStore> PathHandler<RestoreContext<S>> for TableHandler {
    fn handle(&mut self, data: &PathData, ctx: &mut RestoreContext<S>) -> Result<()> {
        let old_id = record_id(&data.record)?;

        for (field, itemtype) in &self.parents {
            if ctx.is_excluded(itemtype, field_i64(&data.record, field)?) {
                ctx.exclude(&self.itemtype, old_id);
                return Ok(());
            }
        }
        if let Some(gate) = &self.gate {
            let name = template::fill(gate, |key| data.record.get(key).map(String::as_str));
            if ctx.settings.get(&name).is_some() && !ctx.settings.bool_value(&name)? {
                ctx.exclude(&self.itemtype, old_id);
                return Ok(());
            }
        }

        let mut row = data.record.clone();
        row.remove("id");
        for (field, itemtype) in &self.parents {
            let old = field_i64(&row, field)?;
            let new = ctx.mappings.require_mappingid(itemtype, old)?;
            row.insert(field.clone(), new.to_string());
        }
        for (field, itemtype) in &self.foreign_keys {
            let old = row
                .get(field)
                .and_then(|v| v.trim().parse::<i64>().ok())
                .unwrap_or(0);
            let new = if old > 0 {
                ctx.mappings.get_mappingid(itemtype, old).unwrap_or(0)
            } else {
                0
            };
            row.insert(field.clone(), new.to_string());
        }

        let new_id = ctx.insert(&self.table, row)?;
        ctx.mappings.set_mapping(&self.itemtype, old_id, new_id)
    }
}
