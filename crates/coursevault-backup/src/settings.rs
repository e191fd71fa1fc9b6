//! Backup/restore settings.
//!
//! Settings are named, typed values arranged in a hierarchy (root, course,
//! section, activity). A setting can depend on another one: while the
//! dependency is active the child is forced to its disabled value and
//! locked by hierarchy. Settings may be changed freely until the owning job
//! starts executing, at which point the tree is frozen.

use crate::error::{BackupError, Result, ValidationErrors};
use coursevault_core::{LockStatus, SettingLevel, Visibility};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Declared type of a setting value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int,
    Text,
    /// ASCII letters, digits and underscores only
    Alphanum,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Bool => write!(f, "bool"),
            ValueType::Int => write!(f, "int"),
            ValueType::Text => write!(f, "text"),
            ValueType::Alphanum => write!(f, "alphanum"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl SettingValue {
    /// Parse a textual value for the given type.
    pub fn parse(value_type: ValueType, raw: &str) -> std::result::Result<Self, String> {
        let trimmed = raw.trim();
        match value_type {
            ValueType::Bool => match trimmed.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(SettingValue::Bool(true)),
                "0" | "false" | "no" | "off" => Ok(SettingValue::Bool(false)),
                _ => Err(format!("expected a boolean, got '{}'", raw)),
            },
            ValueType::Int => trimmed
                .parse()
                .map(SettingValue::Int)
                .map_err(|_| format!("expected an integer, got '{}'", raw)),
            ValueType::Text => Ok(SettingValue::Text(raw.to_string())),
            ValueType::Alphanum => {
                if is_alphanum(trimmed) {
                    Ok(SettingValue::Text(trimmed.to_string()))
                } else {
                    Err(format!(
                        "only letters, digits and underscores are allowed, got '{}'",
                        raw
                    ))
                }
            }
        }
    }

    /// The value a setting takes while a dependency disables it
    pub fn disabled(value_type: ValueType) -> Self {
        match value_type {
            ValueType::Bool => SettingValue::Bool(false),
            ValueType::Int => SettingValue::Int(0),
            ValueType::Text | ValueType::Alphanum => SettingValue::Text(String::new()),
        }
    }

    pub fn fits(&self, value_type: ValueType) -> bool {
        match (self, value_type) {
            (SettingValue::Bool(_), ValueType::Bool) => true,
            (SettingValue::Int(_), ValueType::Int) => true,
            (SettingValue::Text(_), ValueType::Text) => true,
            (SettingValue::Text(s), ValueType::Alphanum) => is_alphanum(s),
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            SettingValue::Bool(b) => !b,
            SettingValue::Int(i) => *i == 0,
            SettingValue::Text(s) => s.is_empty(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{}", if *b { "1" } else { "0" }),
            SettingValue::Int(i) => write!(f, "{}", i),
            SettingValue::Text(s) => f.write_str(s),
        }
    }
}

fn is_alphanum(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A single named setting
#[derive(Debug, Clone, PartialEq)]
pub struct Setting {
    pub name: String,
    pub value_type: ValueType,
    pub value: SettingValue,
    pub visibility: Visibility,
    pub status: LockStatus,
    pub level: SettingLevel,
}

impl Setting {
    pub fn new(
        name: impl Into<String>,
        level: SettingLevel,
        value_type: ValueType,
        value: SettingValue,
    ) -> Result<Self> {
        let name = name.into();
        if !value.fits(value_type) {
            return Err(BackupError::coding(format!(
                "default value '{}' of setting '{}' is not a valid {}",
                value, name, value_type
            )));
        }
        Ok(Self {
            name,
            value_type,
            value,
            visibility: Visibility::Visible,
            status: LockStatus::NotLocked,
            level,
        })
    }

    /// Shorthand for a boolean setting
    pub fn boolean(name: impl Into<String>, level: SettingLevel, value: bool) -> Self {
        Self {
            name: name.into(),
            value_type: ValueType::Bool,
            value: SettingValue::Bool(value),
            visibility: Visibility::Visible,
            status: LockStatus::NotLocked,
            level,
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_status(mut self, status: LockStatus) -> Self {
        self.status = status;
        self
    }
}

/// Condition under which a parent setting disables a child
#[derive(Debug, Clone, PartialEq)]
pub enum DependencyKind {
    DisabledIfFalse,
    DisabledIfEquals(SettingValue),
    DisabledIfEmpty,
}

impl DependencyKind {
    fn is_active(&self, parent: &SettingValue) -> bool {
        match self {
            DependencyKind::DisabledIfFalse => parent.as_bool() == Some(false),
            DependencyKind::DisabledIfEquals(value) => parent == value,
            DependencyKind::DisabledIfEmpty => parent.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Dependency {
    parent: String,
    child: String,
    kind: DependencyKind,
}

/// The settings of one job
#[derive(Debug, Clone, Default)]
pub struct SettingTree {
    settings: Vec<Setting>,
    index: HashMap<String, usize>,
    dependencies: Vec<Dependency>,
    frozen: bool,
}

impl SettingTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, setting: Setting) -> Result<()> {
        self.ensure_mutable("add a setting")?;
        if self.index.contains_key(&setting.name) {
            return Err(BackupError::coding(format!(
                "setting '{}' is already defined",
                setting.name
            )));
        }
        self.index.insert(setting.name.clone(), self.settings.len());
        self.settings.push(setting);
        Ok(())
    }

    /// Make `child` depend on `parent`. The parent's current value is
    /// applied to the child straight away.
    pub fn add_dependency(&mut self, parent: &str, child: &str, kind: DependencyKind) -> Result<()> {
        self.ensure_mutable("add a dependency")?;
        let parent_setting = self
            .get(parent)
            .ok_or_else(|| BackupError::coding(format!("unknown parent setting '{}'", parent)))?;
        let child_setting = self
            .get(child)
            .ok_or_else(|| BackupError::coding(format!("unknown child setting '{}'", child)))?;

        if child_setting.level < parent_setting.level {
            return Err(BackupError::coding(format!(
                "setting '{}' ({}) cannot depend on deeper setting '{}' ({})",
                child, child_setting.level, parent, parent_setting.level
            )));
        }
        if parent == child || self.reaches(child, parent) {
            return Err(BackupError::coding(format!(
                "dependency {} -> {} would create a cycle",
                parent, child
            )));
        }

        self.dependencies.push(Dependency {
            parent: parent.to_string(),
            child: child.to_string(),
            kind,
        });
        self.refresh(child);
        self.cascade(child);
        Ok(())
    }

    /// True if `to` is reachable from `from` following parent -> child edges
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from.to_string()];
        let mut seen = HashSet::new();
        while let Some(name) = stack.pop() {
            if name == to {
                return true;
            }
            if !seen.insert(name.clone()) {
                continue;
            }
            for dep in self.dependencies.iter().filter(|d| d.parent == name) {
                stack.push(dep.child.clone());
            }
        }
        false
    }

    pub fn set_value(&mut self, name: &str, value: SettingValue) -> Result<()> {
        self.ensure_mutable("change a setting")?;
        let idx = self.position(name)?;
        let setting = &mut self.settings[idx];

        if setting.status.is_locked() {
            return Err(BackupError::SettingLocked {
                name: name.to_string(),
                status: setting.status,
            });
        }
        if !value.fits(setting.value_type) {
            return Err(BackupError::coding(format!(
                "value '{}' is not a valid {} for setting '{}'",
                value, setting.value_type, name
            )));
        }

        setting.value = value;
        self.cascade(name);
        Ok(())
    }

    pub fn set_status(&mut self, name: &str, status: LockStatus) -> Result<()> {
        self.ensure_mutable("change a setting status")?;
        let idx = self.position(name)?;
        self.settings[idx].status = status;
        Ok(())
    }

    pub fn set_visibility(&mut self, name: &str, visibility: Visibility) -> Result<()> {
        self.ensure_mutable("change a setting visibility")?;
        let idx = self.position(name)?;
        self.settings[idx].visibility = visibility;
        Ok(())
    }

    /// Re-evaluate the dependencies of every descendant of `name`
    fn cascade(&mut self, name: &str) {
        let mut queue: Vec<String> = self.dependents_of(name).into_iter().map(String::from).collect();
        while let Some(child) = queue.pop() {
            self.refresh(&child);
            queue.extend(self.dependents_of(&child).into_iter().map(String::from));
        }
    }

    /// Apply the current parent values to one child
    fn refresh(&mut self, child: &str) {
        let Some(&idx) = self.index.get(child) else {
            return;
        };
        let disabled = self
            .dependencies
            .iter()
            .filter(|d| d.child == child)
            .any(|d| {
                self.get(&d.parent)
                    .map(|p| d.kind.is_active(&p.value))
                    .unwrap_or(false)
            });

        let setting = &mut self.settings[idx];
        if disabled {
            setting.value = SettingValue::disabled(setting.value_type);
            if matches!(
                setting.status,
                LockStatus::NotLocked | LockStatus::LockedByHierarchy
            ) {
                setting.status = LockStatus::LockedByHierarchy;
            }
        } else if setting.status == LockStatus::LockedByHierarchy {
            setting.status = LockStatus::NotLocked;
        }
    }

    /// Parse and apply textual overrides, all or nothing.
    ///
    /// Every rejected entry is reported under its setting name. Overrides
    /// are applied shallowest level first. An override that a later parent
    /// change forces back to its disabled value is reported as locked.
    pub fn apply_overrides(&mut self, overrides: &BTreeMap<String, String>) -> Result<()> {
        self.ensure_mutable("apply setting overrides")?;

        let mut ordered: Vec<(&String, &String)> = overrides.iter().collect();
        ordered.sort_by_key(|(name, _)| {
            self.get(name)
                .map(|s| s.level)
                .unwrap_or(SettingLevel::Activity)
        });

        let mut staged = self.clone();
        let mut errors = ValidationErrors::new();
        let mut requested: Vec<(&String, SettingValue)> = Vec::new();

        for (name, raw) in ordered {
            let Some(setting) = staged.get(name) else {
                errors.add(name.as_str(), "unknown setting");
                continue;
            };
            let value = match SettingValue::parse(setting.value_type, raw) {
                Ok(value) => value,
                Err(message) => {
                    errors.add(name.as_str(), message);
                    continue;
                }
            };
            requested.push((name, value.clone()));
            if setting.value == value {
                continue;
            }
            match staged.set_value(name, value) {
                Ok(()) => {}
                Err(BackupError::SettingLocked { status, .. }) => {
                    errors.add(name.as_str(), format!("setting is {}", status));
                }
                Err(e) => return Err(e),
            }
        }

        for (name, value) in requested {
            if errors.get(name).is_some() {
                continue;
            }
            if let Some(setting) = staged.get(name) {
                if setting.value != value {
                    errors.add(name.as_str(), format!("setting is {}", setting.status));
                }
            }
        }

        errors.into_result()?;
        *self = staged;
        Ok(())
    }

    /// Make the tree read-only; called when execution starts
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn ensure_mutable(&self, what: &str) -> Result<()> {
        if self.frozen {
            return Err(BackupError::coding(format!(
                "cannot {} once the job is executing",
                what
            )));
        }
        Ok(())
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| BackupError::UnknownSetting {
                name: name.to_string(),
            })
    }

    pub fn get(&self, name: &str) -> Option<&Setting> {
        self.index.get(name).map(|&idx| &self.settings[idx])
    }

    pub fn value(&self, name: &str) -> Result<&SettingValue> {
        Ok(&self.settings[self.position(name)?].value)
    }

    pub fn bool_value(&self, name: &str) -> Result<bool> {
        self.value(name)?.as_bool().ok_or_else(|| {
            BackupError::coding(format!("setting '{}' is not a boolean", name))
        })
    }

    /// Names of the settings that directly depend on `name`
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter(|d| d.parent == name)
            .map(|d| d.child.as_str())
            .collect()
    }

    /// Settings in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Setting> {
        self.settings.iter()
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    /// Name -> textual value, as recorded in the manifest
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.settings
            .iter()
            .map(|s| (s.name.clone(), s.value.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> SettingTree {
        let mut tree = SettingTree::new();
        tree.add(Setting::boolean("users", SettingLevel::Root, true))
            .unwrap();
        tree.add(Setting::boolean("logs", SettingLevel::Root, true))
            .unwrap();
        tree.add(Setting::boolean("forum_3_included", SettingLevel::Activity, true))
            .unwrap();
        tree.add(Setting::boolean("forum_3_userinfo", SettingLevel::Activity, true))
            .unwrap();
        tree.add_dependency("users", "logs", DependencyKind::DisabledIfFalse)
            .unwrap();
        tree.add_dependency("users", "forum_3_userinfo", DependencyKind::DisabledIfFalse)
            .unwrap();
        tree.add_dependency(
            "forum_3_included",
            "forum_3_userinfo",
            DependencyKind::DisabledIfFalse,
        )
        .unwrap();
        tree
    }

    #[test]
    fn test_duplicate_setting_is_coding_error() {
        let mut tree = tree();
        let err = tree
            .add(Setting::boolean("users", SettingLevel::Root, false))
            .unwrap_err();
        assert!(err.is_coding());
    }

    #[test]
    fn test_disabling_parent_locks_children() {
        let mut tree = tree();
        tree.set_value("users", SettingValue::Bool(false)).unwrap();

        let logs = tree.get("logs").unwrap();
        assert_eq!(logs.value, SettingValue::Bool(false));
        assert_eq!(logs.status, LockStatus::LockedByHierarchy);
        assert_eq!(
            tree.get("forum_3_userinfo").unwrap().status,
            LockStatus::LockedByHierarchy
        );

        let err = tree.set_value("logs", SettingValue::Bool(true)).unwrap_err();
        assert!(matches!(err, BackupError::SettingLocked { .. }));
    }

    #[test]
    fn test_reenabling_parent_unlocks_but_keeps_value() {
        let mut tree = tree();
        tree.set_value("users", SettingValue::Bool(false)).unwrap();
        tree.set_value("users", SettingValue::Bool(true)).unwrap();

        let logs = tree.get("logs").unwrap();
        assert_eq!(logs.status, LockStatus::NotLocked);
        assert_eq!(logs.value, SettingValue::Bool(false));
    }

    #[test]
    fn test_child_stays_locked_while_any_parent_disables_it() {
        let mut tree = tree();
        tree.set_value("users", SettingValue::Bool(false)).unwrap();
        tree.set_value("forum_3_included", SettingValue::Bool(false))
            .unwrap();
        tree.set_value("users", SettingValue::Bool(true)).unwrap();

        assert_eq!(
            tree.get("forum_3_userinfo").unwrap().status,
            LockStatus::LockedByHierarchy
        );
    }

    #[test]
    fn test_dependency_applies_current_parent_value() {
        let mut tree = SettingTree::new();
        tree.add(Setting::boolean("activities", SettingLevel::Root, false))
            .unwrap();
        tree.add(Setting::boolean("page_9_included", SettingLevel::Activity, true))
            .unwrap();
        tree.add_dependency("activities", "page_9_included", DependencyKind::DisabledIfFalse)
            .unwrap();

        assert!(!tree.bool_value("page_9_included").unwrap());
    }

    #[test]
    fn test_dependency_on_deeper_level_is_rejected() {
        let mut tree = tree();
        let err = tree
            .add_dependency("forum_3_included", "users", DependencyKind::DisabledIfFalse)
            .unwrap_err();
        assert!(err.is_coding());
    }

    #[test]
    fn test_dependency_cycle_is_rejected() {
        let mut tree = tree();
        let err = tree
            .add_dependency("logs", "users", DependencyKind::DisabledIfFalse)
            .unwrap_err();
        assert!(err.is_coding());
    }

    #[test]
    fn test_disabled_if_equals_and_empty() {
        let mut tree = SettingTree::new();
        tree.add(
            Setting::new(
                "filename",
                SettingLevel::Root,
                ValueType::Text,
                SettingValue::Text("backup.cvz".into()),
            )
            .unwrap(),
        )
        .unwrap();
        tree.add(
            Setting::new(
                "mode",
                SettingLevel::Root,
                ValueType::Alphanum,
                SettingValue::Text("general".into()),
            )
            .unwrap(),
        )
        .unwrap();
        tree.add(Setting::boolean("anonymize", SettingLevel::Course, true))
            .unwrap();
        tree.add(Setting::boolean("blocks", SettingLevel::Course, true))
            .unwrap();
        tree.add_dependency(
            "mode",
            "anonymize",
            DependencyKind::DisabledIfEquals(SettingValue::Text("import".into())),
        )
        .unwrap();
        tree.add_dependency("filename", "blocks", DependencyKind::DisabledIfEmpty)
            .unwrap();

        tree.set_value("mode", SettingValue::Text("import".into()))
            .unwrap();
        assert!(!tree.bool_value("anonymize").unwrap());

        tree.set_value("filename", SettingValue::Text(String::new()))
            .unwrap();
        assert_eq!(
            tree.get("blocks").unwrap().status,
            LockStatus::LockedByHierarchy
        );
    }

    #[test]
    fn test_type_mismatch_is_coding_error() {
        let mut tree = tree();
        let err = tree.set_value("users", SettingValue::Int(1)).unwrap_err();
        assert!(err.is_coding());

        let err = Setting::new(
            "mode",
            SettingLevel::Root,
            ValueType::Alphanum,
            SettingValue::Text("not alpha!".into()),
        )
        .unwrap_err();
        assert!(err.is_coding());
    }

    #[test]
    fn test_unknown_setting() {
        let mut tree = tree();
        assert!(matches!(
            tree.set_value("nope", SettingValue::Bool(true)),
            Err(BackupError::UnknownSetting { .. })
        ));
        assert!(tree.bool_value("nope").is_err());
    }

    #[test]
    fn test_frozen_tree_rejects_mutation() {
        let mut tree = tree();
        tree.freeze();
        assert!(tree.is_frozen());
        assert!(tree
            .set_value("users", SettingValue::Bool(false))
            .unwrap_err()
            .is_coding());
        assert!(tree
            .set_visibility("users", Visibility::Hidden)
            .unwrap_err()
            .is_coding());
        assert!(tree
            .add(Setting::boolean("late", SettingLevel::Root, true))
            .unwrap_err()
            .is_coding());
    }

    #[test]
    fn test_apply_overrides_collects_errors_by_field() {
        let mut tree = tree();
        let overrides: BTreeMap<String, String> = [
            ("users", "maybe"),
            ("bogus", "1"),
            ("forum_3_included", "0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let err = tree.apply_overrides(&overrides).unwrap_err();
        let BackupError::Validation(errors) = err else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.get("bogus"), Some("unknown setting"));
        assert!(errors.get("users").unwrap().contains("boolean"));

        // nothing applied
        assert!(tree.bool_value("forum_3_included").unwrap());
    }

    #[test]
    fn test_apply_overrides_reports_hierarchy_locks() {
        let mut tree = tree();
        let overrides: BTreeMap<String, String> = [("users", "false"), ("logs", "true")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let BackupError::Validation(errors) = tree.apply_overrides(&overrides).unwrap_err()
        else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.get("logs"), Some("setting is locked-by-hierarchy"));
    }

    #[test]
    fn test_apply_overrides_reports_lock_regardless_of_name_order() {
        // "a_child" sorts before "z_parent" at the same level
        let mut tree = SettingTree::new();
        tree.add(Setting::boolean("z_parent", SettingLevel::Course, true))
            .unwrap();
        tree.add(Setting::boolean("a_child", SettingLevel::Course, true))
            .unwrap();
        tree.add_dependency("z_parent", "a_child", DependencyKind::DisabledIfFalse)
            .unwrap();
        let overrides: BTreeMap<String, String> = [("z_parent", "0"), ("a_child", "1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let BackupError::Validation(errors) = tree.apply_overrides(&overrides).unwrap_err()
        else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.get("a_child"), Some("setting is locked-by-hierarchy"));
        assert!(tree.bool_value("z_parent").unwrap());
    }

    #[test]
    fn test_apply_overrides_success() {
        let mut tree = tree();
        let overrides: BTreeMap<String, String> = [("users", "no"), ("logs", "0")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        tree.apply_overrides(&overrides).unwrap();
        assert!(!tree.bool_value("users").unwrap());
        assert!(!tree.bool_value("logs").unwrap());
    }

    #[test]
    fn test_snapshot_and_order() {
        let tree = tree();
        let names: Vec<&str> = tree.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["users", "logs", "forum_3_included", "forum_3_userinfo"]
        );
        assert_eq!(tree.snapshot().get("users"), Some(&"1".to_string()));
        assert_eq!(tree.dependents_of("users"), vec!["logs", "forum_3_userinfo"]);
    }
}
