//! Log rules: rewriting activity log rows so they point at restored ids.
//!
//! A rule matches logs by module and action (`*` matches any). Its read
//! templates pull `{itemtype}` placeholders out of the old url and info;
//! each placeholder value is an old id that gets remapped, and the write
//! templates are filled with the new ids.

use super::mapping::IdMappings;
use crate::error::{BackupError, Result};
use crate::store::{field_i64, Record};
use crate::template::{self, Pattern};
use std::collections::BTreeMap;

const ANY: &str = "*";

/// One activity log row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRecord {
    pub time: i64,
    pub userid: i64,
    pub course: i64,
    pub cmid: i64,
    pub module: String,
    pub action: String,
    pub url: String,
    pub info: String,
}

impl LogRecord {
    pub fn from_record(record: &Record) -> Result<Self> {
        let text = |field: &str| record.get(field).cloned().unwrap_or_default();
        let optional = |field: &str| -> Result<i64> {
            match record.get(field).map(|v| v.trim()) {
                None | Some("") => Ok(0),
                Some(_) => field_i64(record, field),
            }
        };
        Ok(Self {
            time: optional("time")?,
            userid: optional("userid")?,
            course: field_i64(record, "course")?,
            cmid: optional("cmid")?,
            module: text("module"),
            action: text("action"),
            url: text("url"),
            info: text("info"),
        })
    }

    pub fn to_record(&self) -> Record {
        crate::store::record([
            ("time", self.time.to_string()),
            ("userid", self.userid.to_string()),
            ("course", self.course.to_string()),
            ("cmid", self.cmid.to_string()),
            ("module", self.module.clone()),
            ("action", self.action.clone()),
            ("url", self.url.clone()),
            ("info", self.info.clone()),
        ])
    }
}

#[derive(Debug, Clone)]
pub struct LogRule {
    module: String,
    action: String,
    url_write: String,
    info_write: String,
    url_read: Option<Pattern>,
    info_read: Option<Pattern>,
    module_write: Option<String>,
    action_write: Option<String>,
}

impl LogRule {
    pub fn new(
        module: impl Into<String>,
        action: impl Into<String>,
        url_write: impl Into<String>,
        info_write: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            action: action.into(),
            url_write: url_write.into(),
            info_write: info_write.into(),
            url_read: None,
            info_read: None,
            module_write: None,
            action_write: None,
        }
    }

    /// Templates the old url and info must match; an empty template reads
    /// nothing from that field
    pub fn with_read(mut self, url_read: &str, info_read: &str) -> Result<Self> {
        let compile = |t: &str| -> Result<Option<Pattern>> {
            if t.is_empty() {
                return Ok(None);
            }
            Pattern::compile(t)
                .map(Some)
                .map_err(|e| BackupError::coding(format!("bad log read template '{}': {}", t, e)))
        };
        self.url_read = compile(url_read)?;
        self.info_read = compile(info_read)?;
        Ok(self)
    }

    /// Rename the module and action of rewritten logs
    pub fn with_target(mut self, module: impl Into<String>, action: impl Into<String>) -> Self {
        self.module_write = Some(module.into());
        self.action_write = Some(action.into());
        self
    }

    pub fn matches(&self, log: &LogRecord) -> bool {
        (self.module == ANY || self.module == log.module)
            && (self.action == ANY || self.action == log.action)
    }

    /// Placeholder values read from the old url and info. `None` when a
    /// read template does not match.
    fn read(&self, log: &LogRecord) -> Option<BTreeMap<String, String>> {
        let mut values = BTreeMap::new();
        for (pattern, input) in [(&self.url_read, &log.url), (&self.info_read, &log.info)] {
            if let Some(pattern) = pattern {
                values.extend(pattern.captures(input)?);
            }
        }
        Some(values)
    }

    fn write(&self, log: &LogRecord, values: &BTreeMap<String, String>) -> LogRecord {
        let lookup = |key: &str| values.get(key).map(String::as_str);
        LogRecord {
            module: self.module_write.clone().unwrap_or_else(|| log.module.clone()),
            action: self.action_write.clone().unwrap_or_else(|| log.action.clone()),
            url: template::fill(&self.url_write, lookup),
            info: template::fill(&self.info_write, lookup),
            ..log.clone()
        }
    }

    /// Rewrite a log without touching any ids. Logs this rule does not
    /// match come back unchanged. Calling it never changes the rule.
    pub fn process(&self, log: &LogRecord) -> LogRecord {
        if !self.matches(log) {
            return log.clone();
        }
        let values = self.read(log).unwrap_or_default();
        self.write(log, &values)
    }

    /// Rewrite a log with every placeholder remapped to its new id.
    /// `None` means the log cannot be restored: the rule does not match,
    /// a read template fails, or a placeholder has no mapping.
    pub fn process_mapped(&self, log: &LogRecord, mappings: &IdMappings) -> Option<LogRecord> {
        if !self.matches(log) {
            return None;
        }
        let values = self.read(log)?;

        let mut mapped = BTreeMap::new();
        for (itemtype, old) in &values {
            let old: i64 = old.trim().parse().ok()?;
            let new = mappings.get_mappingid(itemtype, old)?;
            mapped.insert(itemtype.clone(), new.to_string());
        }

        let unresolved = template::placeholders(&self.url_write)
            .into_iter()
            .chain(template::placeholders(&self.info_write))
            .any(|name| !mapped.contains_key(&name));
        if unresolved {
            return None;
        }
        Some(self.write(log, &mapped))
    }
}

/// Ordered rule list; the first matching rule applies
#[derive(Debug, Clone, Default)]
pub struct LogRuleSet {
    rules: Vec<LogRule>,
}

impl LogRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rule: LogRule) {
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rewrite one log for the restored course. Besides the rule's own
    /// placeholders, the course must be mapped; the user and course module
    /// are remapped when set. `None` drops the log.
    pub fn process(&self, log: &LogRecord, mappings: &IdMappings) -> Option<LogRecord> {
        let rule = self.rules.iter().find(|r| r.matches(log))?;
        let mut restored = rule.process_mapped(log, mappings)?;

        restored.course = mappings.get_mappingid("course", log.course)?;
        restored.userid = if log.userid > 0 {
            mappings.get_mappingid("user", log.userid).unwrap_or(0)
        } else {
            0
        };
        restored.cmid = if log.cmid > 0 {
            mappings.get_mappingid("activity", log.cmid)?
        } else {
            0
        };
        Some(restored)
    }

    /// Rules for the log rows a course backup produces
    pub fn course_defaults() -> Result<Self> {
        let mut set = Self::new();
        set.add(
            LogRule::new("course", "view", "view.php?id={course}", "{course}")
                .with_read("view.php?id={course}", "{course}")?,
        );
        set.add(
            LogRule::new("course", "update", "edit.php?id={course}", "{course}")
                .with_read("edit.php?id={course}", "{course}")?,
        );
        set.add(
            LogRule::new("user", "view", "view.php?id={user}&course={course}", "{user}")
                .with_read("view.php?id={user}&course={course}", "{user}")?,
        );
        for action in ["view", "add", "update"] {
            set.add(
                LogRule::new(ANY, action, "view.php?id={activity}", "{activity}")
                    .with_read("view.php?id={activity}", "{activity}")?,
            );
        }
        set.add(
            LogRule::new(ANY, "add entry", "view.php?id={activity}", "{activity_entry}")
                .with_read("view.php?id={activity}", "{activity_entry}")?,
        );
        Ok(set)
    }
}
