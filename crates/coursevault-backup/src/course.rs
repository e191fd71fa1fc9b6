//! Course backup and restore: the settings, steps and handlers for a
//! course with its sections, activities, activity entries, users and logs.
//!
//! Archive layout:
//!
//! | file | written by | restored by |
//! |---|---|---|
//! | `course/course.xml` | `course` | `course` |
//! | `activities/activities.xml` | `activities` | `activities` |
//! | `users/users.xml` | `users` (annotated ids only) | `users` |
//! | `logs/logs.xml` | `logs` | `logs` |

use crate::controller::BackupController;
use crate::error::{BackupError, Result, ValidationErrors};
use crate::manifest::BackupManifest;
use crate::plan::StepPlan;
use crate::restore::{
    LogRecord, LogRuleSet, PathData, RestoreContext, RestoreOptions, RestoreStep, RestoreTarget,
    TableHandler,
};
use crate::settings::{DependencyKind, Setting, SettingTree};
use crate::store::{record_id, RecordStore};
use crate::structure::{AnnotatedStep, BackupContext, Element, Param, Source, StructureStep};
use coursevault_core::{LockStatus, SettingLevel};
use std::collections::BTreeMap;

pub const USERS: &str = "users";
pub const LOGS: &str = "logs";
pub const ACTIVITIES: &str = "activities";

const INCLUDED_SUFFIX: &str = "_included";

/// `<modname>_<cmid>_included`
pub fn included_setting(modname: &str, cmid: i64) -> String {
    format!("{}_{}{}", modname, cmid, INCLUDED_SUFFIX)
}

/// `<modname>_<cmid>_userinfo`
pub fn userinfo_setting(modname: &str, cmid: i64) -> String {
    format!("{}_{}_userinfo", modname, cmid)
}

/// Backup settings of one course: the root switches plus an included and
/// a userinfo setting per activity.
pub fn course_settings<S: RecordStore + ?Sized>(store: &S, course_id: i64) -> Result<SettingTree> {
    if store.get("course", course_id)?.is_none() {
        let mut errors = ValidationErrors::new();
        errors.add("course", format!("course {} does not exist", course_id));
        return Err(BackupError::Validation(errors));
    }

    let mut tree = SettingTree::new();
    tree.add(Setting::boolean(USERS, SettingLevel::Root, true))?;
    tree.add(Setting::boolean(LOGS, SettingLevel::Root, true))?;
    tree.add(Setting::boolean(ACTIVITIES, SettingLevel::Root, true))?;
    tree.add_dependency(USERS, LOGS, DependencyKind::DisabledIfFalse)?;

    let course = course_id.to_string();
    for activity in store.select("course_modules", &[("course", course.as_str())])? {
        let cmid = record_id(&activity)?;
        let modname = activity.get("modname").map(String::as_str).unwrap_or("");
        if modname.is_empty() {
            return Err(BackupError::xml(format!("activity {} has no modname", cmid)));
        }
        let included = included_setting(modname, cmid);
        let userinfo = userinfo_setting(modname, cmid);

        tree.add(Setting::boolean(&included, SettingLevel::Activity, true))?;
        tree.add(Setting::boolean(&userinfo, SettingLevel::Activity, true))?;
        tree.add_dependency(ACTIVITIES, &included, DependencyKind::DisabledIfFalse)?;
        tree.add_dependency(USERS, &userinfo, DependencyKind::DisabledIfFalse)?;
        tree.add_dependency(&included, &userinfo, DependencyKind::DisabledIfFalse)?;
    }
    Ok(tree)
}

/// Steps of a course backup.
///
/// `users` is declared before `logs` but depends on it, so the built plan
/// runs it last, once every user id has been annotated.
pub fn course_backup_plan<S: RecordStore + 'static>() -> Result<StepPlan<BackupContext<S>>> {
    let sections = Element::rows(
        "section",
        Source::table("course_sections").filter("course", Param::Parent("id".to_string())),
    )
    .fields(&["course", "section", "name", "summary"]);
    let course = Element::rows("course", Source::table("course").filter("id", Param::CourseId))
        .fields(&["fullname", "shortname", "summary"])
        .child(Element::wrapper("sections").child(sections));

    let entries = Element::rows(
        "entry",
        Source::table("activity_entries").filter("activity", Param::Parent("id".to_string())),
    )
    .fields(&["activity", "userid", "content", "timecreated"])
    .annotate("userid", "user");
    let activities = Element::wrapper("activities").child(
        Element::rows(
            "activity",
            Source::table("course_modules").filter("course", Param::CourseId),
        )
        .fields(&["course", "section", "modname", "name", "intro"])
        .only_if("{modname}_{id}_included")
        .child(
            Element::wrapper("entries")
                .only_if("{modname}_{id}_userinfo")
                .child(entries),
        ),
    );

    let logs = Element::wrapper("logs").child(
        Element::rows("log", Source::table("log").filter("course", Param::CourseId))
            .fields(&["time", "userid", "course", "module", "action", "cmid", "url", "info"])
            .annotate("userid", "user"),
    );

    StepPlan::new()
        .with_step(Box::new(StructureStep::new("course", "course/course.xml", course)))?
        .with_step(Box::new(
            StructureStep::new(ACTIVITIES, "activities/activities.xml", activities)
                .after("course")
                .enabled_by(ACTIVITIES),
        ))?
        .with_step(Box::new(
            AnnotatedStep::new(USERS, "users/users.xml", "user", "user")
                .elements("users", "user")
                .fields(&["username", "firstname", "lastname", "email"])
                .after(ACTIVITIES)
                .after(LOGS)
                .enabled_by(USERS),
        ))?
        .with_step(Box::new(
            StructureStep::new(LOGS, "logs/logs.xml", logs)
                .after("course")
                .enabled_by(LOGS),
        ))
}

/// Backup controller for one course with `overrides` applied
pub fn backup_controller<S: RecordStore + 'static>(
    store: S,
    course_id: i64,
    overrides: &BTreeMap<String, String>,
) -> Result<BackupController<S>> {
    let mut settings = course_settings(&store, course_id)?;
    settings.apply_overrides(overrides)?;
    let plan = course_backup_plan()?;
    Ok(BackupController::backup(store, course_id, settings, plan))
}

/// Restore settings for an archive.
///
/// Content the backup left out cannot be restored, so its setting is off
/// and locked by config.
pub fn course_restore_settings(
    manifest: &BackupManifest,
    options: &RestoreOptions,
) -> Result<SettingTree> {
    let archived = |name: &str| manifest.setting_enabled(name).unwrap_or(false);
    let root = |name: &str, enabled: bool| {
        let setting = Setting::boolean(name, SettingLevel::Root, archived(name) && enabled);
        if archived(name) {
            setting
        } else {
            setting.with_status(LockStatus::LockedByConfig)
        }
    };

    let mut tree = SettingTree::new();
    tree.add(root(USERS, true))?;
    tree.add(root(LOGS, options.restore_logs))?;
    tree.add(root(ACTIVITIES, true))?;
    tree.add_dependency(USERS, LOGS, DependencyKind::DisabledIfFalse)?;

    for name in manifest.settings.keys().filter(|n| n.ends_with(INCLUDED_SUFFIX)) {
        let name = name.as_str();
        let mut setting = Setting::boolean(name, SettingLevel::Activity, archived(name));
        if !archived(name) {
            setting = setting.with_status(LockStatus::LockedByConfig);
        }
        tree.add(setting)?;
        tree.add_dependency(ACTIVITIES, name, DependencyKind::DisabledIfFalse)?;
    }

    tree.apply_overrides(&options.overrides)?;
    Ok(tree)
}

/// Steps of a course restore
pub fn course_restore_plan<S: RecordStore + 'static>(
    options: &RestoreOptions,
) -> Result<StepPlan<RestoreContext<S>>> {
    let match_users = options.match_existing_users;
    let rules = LogRuleSet::course_defaults()?;

    let course = RestoreStep::new("course", "course/course.xml")
        .on("/course", restore_course::<S>)?
        .on(
            "/course/sections/section",
            TableHandler::new("course_section", "course_sections").with_parent("course", "course"),
        )?;

    let users = RestoreStep::new(USERS, "users/users.xml")
        .on(
            "/users/user",
            move |data: &PathData, ctx: &mut RestoreContext<S>| -> Result<()> {
                restore_user(data, ctx, match_users)
            },
        )?
        .after("course")
        .enabled_by(USERS);

    let activities = RestoreStep::new(ACTIVITIES, "activities/activities.xml")
        .on(
            "/activities/activity",
            TableHandler::new("activity", "course_modules")
                .with_parent("course", "course")
                .with_parent("section", "course_section")
                .only_if("{modname}_{id}_included"),
        )?
        .on(
            "/activities/activity/entries/entry",
            TableHandler::new("activity_entry", "activity_entries")
                .with_parent("activity", "activity")
                .with_foreign_key("userid", "user")
                .only_if(USERS),
        )?
        .after("course")
        .after(USERS)
        .enabled_by(ACTIVITIES);

    let logs = RestoreStep::new(LOGS, "logs/logs.xml")
        .on(
            "/logs/log",
            move |data: &PathData, ctx: &mut RestoreContext<S>| -> Result<()> {
                let log = LogRecord::from_record(&data.record)?;
                match rules.process(&log, &ctx.mappings) {
                    Some(restored) => {
                        ctx.insert("log", restored.to_record())?;
                    }
                    None => ctx.skip("log"),
                }
                Ok(())
            },
        )?
        .after(ACTIVITIES)
        .after(USERS)
        .enabled_by(LOGS);

    StepPlan::new()
        .with_step(Box::new(course))?
        .with_step(Box::new(users))?
        .with_step(Box::new(activities))?
        .with_step(Box::new(logs))
}

/// Create the course, or map it onto the target course
fn restore_course<S: RecordStore>(data: &PathData, ctx: &mut RestoreContext<S>) -> Result<()> {
    let old_id = record_id(&data.record)?;
    let target = ctx.target;
    let new_id = match target {
        RestoreTarget::ExistingCourse(id) => {
            ctx.reuse("course", id);
            id
        }
        RestoreTarget::NewCourse => {
            let mut row = data.record.clone();
            row.remove("id");
            let base = row.get("shortname").map(String::as_str).unwrap_or("");
            let shortname = unique_shortname(&ctx.store, base)?;
            row.insert("shortname".to_string(), shortname);
            ctx.insert("course", row)?
        }
    };
    ctx.mappings.set_mapping("course", old_id, new_id)?;
    ctx.course_id = Some(new_id);
    Ok(())
}

/// `base`, or `base_N` with the lowest N not taken yet
fn unique_shortname<S: RecordStore + ?Sized>(store: &S, base: &str) -> Result<String> {
    let base = if base.trim().is_empty() { "course" } else { base.trim() };
    let mut candidate = base.to_string();
    let mut n = 1;
    while store.find_one("course", "shortname", &candidate)?.is_some() {
        candidate = format!("{}_{}", base, n);
        n += 1;
    }
    Ok(candidate)
}

fn restore_user<S: RecordStore>(
    data: &PathData,
    ctx: &mut RestoreContext<S>,
    match_existing: bool,
) -> Result<()> {
    let old_id = record_id(&data.record)?;
    let username = data
        .record
        .get("username")
        .map(|u| u.trim())
        .unwrap_or("");

    if match_existing && !username.is_empty() {
        if let Some(existing) = ctx.store.find_one("user", "username", username)? {
            let id = record_id(&existing)?;
            ctx.reuse("user", id);
            return ctx.mappings.set_mapping("user", old_id, id);
        }
    }

    let mut row = data.record.clone();
    row.remove("id");
    let new_id = ctx.insert("user", row)?;
    ctx.mappings.set_mapping("user", old_id, new_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingValue;
    use crate::store::{record, MemoryStore};

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store
            .insert_with_id("course", record([("id", "2"), ("shortname", "rust")]))
            .unwrap();
        for (id, course, modname) in [("5", "2", "forum"), ("6", "2", "page"), ("7", "3", "quiz")] {
            store
                .insert_with_id(
                    "course_modules",
                    record([("id", id), ("course", course), ("modname", modname)]),
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn test_course_settings_tree() {
        let mut tree = course_settings(&store(), 2).unwrap();
        let names: Vec<&str> = tree.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "users",
                "logs",
                "activities",
                "forum_5_included",
                "forum_5_userinfo",
                "page_6_included",
                "page_6_userinfo",
            ]
        );

        tree.set_value(USERS, SettingValue::Bool(false)).unwrap();
        assert!(!tree.bool_value(LOGS).unwrap());
        assert!(!tree.bool_value("forum_5_userinfo").unwrap());
        assert!(tree.bool_value("forum_5_included").unwrap());

        tree.set_value("page_6_included", SettingValue::Bool(false)).unwrap();
        assert_eq!(
            tree.get("page_6_userinfo").unwrap().status,
            LockStatus::LockedByHierarchy
        );
    }

    #[test]
    fn test_course_settings_for_unknown_course() {
        let err = course_settings(&store(), 99).unwrap_err();
        assert!(matches!(err, BackupError::Validation(_)));
    }

    #[test]
    fn test_backup_plan_runs_users_last() {
        let plan = course_backup_plan::<MemoryStore>().unwrap().build().unwrap();
        assert_eq!(plan.names(), vec!["course", "activities", "logs", "users"]);
    }

    #[test]
    fn test_restore_plan_order() {
        let plan = course_restore_plan::<MemoryStore>(&RestoreOptions::default())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(plan.names(), vec!["course", "users", "activities", "logs"]);
    }

    #[test]
    fn test_backup_controller_applies_overrides() {
        let overrides = BTreeMap::from([("forum_5_included".to_string(), "0".to_string())]);
        let controller = backup_controller(store(), 2, &overrides).unwrap();
        assert!(!controller.settings().bool_value("forum_5_included").unwrap());

        let bad = BTreeMap::from([("nope".to_string(), "1".to_string())]);
        assert!(matches!(
            backup_controller(store(), 2, &bad).err(),
            Some(BackupError::Validation(_))
        ));
    }

    fn manifest(settings: &[(&str, &str)]) -> BackupManifest {
        let settings = settings
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BackupManifest::new("job", 2, settings, &BTreeMap::new())
    }

    #[test]
    fn test_restore_settings_lock_what_was_not_backed_up() {
        let manifest = manifest(&[
            ("users", "0"),
            ("logs", "0"),
            ("activities", "1"),
            ("forum_5_included", "1"),
            ("forum_5_userinfo", "0"),
            ("page_6_included", "0"),
        ]);
        let tree = course_restore_settings(&manifest, &RestoreOptions::default()).unwrap();

        assert!(!tree.bool_value(USERS).unwrap());
        assert_eq!(tree.get(USERS).unwrap().status, LockStatus::LockedByConfig);
        assert!(!tree.bool_value(LOGS).unwrap());
        assert!(tree.bool_value("forum_5_included").unwrap());
        assert_eq!(
            tree.get("page_6_included").unwrap().status,
            LockStatus::LockedByConfig
        );
        assert!(tree.get("forum_5_userinfo").is_none());
    }

    #[test]
    fn test_restore_settings_honour_options() {
        let manifest = manifest(&[("users", "1"), ("logs", "1"), ("activities", "1")]);
        let options = RestoreOptions {
            restore_logs: false,
            ..RestoreOptions::default()
        };
        let tree = course_restore_settings(&manifest, &options).unwrap();
        assert!(tree.bool_value(USERS).unwrap());
        assert!(!tree.bool_value(LOGS).unwrap());

        // Locked settings cannot be switched back on
        let options = RestoreOptions {
            overrides: BTreeMap::from([("page_6_included".to_string(), "1".to_string())]),
            ..RestoreOptions::default()
        };
        let manifest = self::manifest(&[("users", "1"), ("page_6_included", "0")]);
        assert!(course_restore_settings(&manifest, &options).is_err());
    }

    #[test]
    fn test_unique_shortname() {
        let mut store = store();
        assert_eq!(unique_shortname(&store, "go").unwrap(), "go");
        assert_eq!(unique_shortname(&store, "rust").unwrap(), "rust_1");

        store
            .insert_with_id("course", record([("id", "3"), ("shortname", "rust_1")]))
            .unwrap();
        assert_eq!(unique_shortname(&store, "rust").unwrap(), "rust_2");
        assert_eq!(unique_shortname(&store, " ").unwrap(), "course");
    }

    #[test]
    fn test_existing_users_are_reused() {
        let mut store = MemoryStore::new();
        store
            .insert_with_id("user", record([("id", "40"), ("username", "ada")]))
            .unwrap();
        let mut ctx = RestoreContext::new(
            store,
            BTreeMap::new(),
            SettingTree::new(),
            RestoreTarget::NewCourse,
        );
        let data = |id: &str, username: &str| PathData {
            name: "user".to_string(),
            path: "/users/user".to_string(),
            record: record([("id", id), ("username", username)]),
        };

        restore_user(&data("7", "ada"), &mut ctx, true).unwrap();
        restore_user(&data("8", "grace"), &mut ctx, true).unwrap();

        assert_eq!(ctx.mappings.get_mappingid("user", 7), Some(40));
        assert_eq!(ctx.mappings.get_mappingid("user", 8), Some(41));
        assert_eq!(ctx.transaction.inserted_count(), 1);
        assert_eq!(ctx.transaction.reused_count(), 1);
        assert_eq!(ctx.stats.inserted("user"), 1);
    }
}
