//! Backup structure: declarative element trees serialized to XML.
//!
//! An [`Element`] either repeats once per row of a table query or, without a
//! source, is a plain wrapper emitted once inside its parent. Rows are
//! written as `<name id="..">` with one child element per final field.

use crate::error::{BackupError, Result};
use crate::logger::LoggerChain;
use crate::plan::{JobContext, Step};
use crate::settings::SettingTree;
use crate::store::{record_id, Record, RecordStore};
use crate::template;
use coursevault_core::{JobKind, LogLevel};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::{BTreeMap, BTreeSet};

/// Value of a source filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    /// The id of the course being backed up
    CourseId,
    /// A field of the nearest enclosing row
    Parent(String),
    /// A literal value
    Value(String),
}

/// Where an element's rows come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub table: String,
    pub filter: Vec<(String, Param)>,
}

impl Source {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: Vec::new(),
        }
    }

    pub fn filter(mut self, field: impl Into<String>, param: Param) -> Self {
        self.filter.push((field.into(), param));
        self
    }
}

/// One node of a backup structure
#[derive(Debug, Clone)]
pub struct Element {
    name: String,
    fields: Vec<String>,
    children: Vec<Element>,
    source: Option<Source>,
    annotations: Vec<(String, String)>,
    gate: Option<String>,
}

impl Element {
    /// A wrapper element, emitted once
    pub fn wrapper(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            children: Vec::new(),
            source: None,
            annotations: Vec::new(),
            gate: None,
        }
    }

    /// An element repeated once per row of `source`
    pub fn rows(name: impl Into<String>, source: Source) -> Self {
        Self {
            source: Some(source),
            ..Self::wrapper(name)
        }
    }

    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fields.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// Record the value of `field` of every written row under `itemtype`
    pub fn annotate(mut self, field: impl Into<String>, itemtype: impl Into<String>) -> Self {
        self.annotations.push((field.into(), itemtype.into()));
        self
    }

    /// Only write this element when the boolean setting named by
    /// `template` is on. Placeholders are filled from the row being written,
    /// or for wrappers from the enclosing row.
    pub fn only_if(mut self, template: impl Into<String>) -> Self {
        self.gate = Some(template.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// State collected while a backup runs
pub struct BackupContext<S: RecordStore> {
    pub course_id: i64,
    pub store: S,
    pub settings: SettingTree,
    /// Archive path -> file contents
    pub files: BTreeMap<String, Vec<u8>>,
    annotations: BTreeMap<String, BTreeSet<i64>>,
}

impl<S: RecordStore> BackupContext<S> {
    pub fn new(store: S, course_id: i64, settings: SettingTree) -> Self {
        Self {
            course_id,
            store,
            settings,
            files: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn annotate(&mut self, itemtype: &str, id: i64) {
        if id > 0 {
            self.annotations
                .entry(itemtype.to_string())
                .or_default()
                .insert(id);
        }
    }

    /// Annotated ids of `itemtype`, ascending
    pub fn annotated(&self, itemtype: &str) -> Vec<i64> {
        self.annotations
            .get(itemtype)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of annotated ids per item type
    pub fn annotation_counts(&self) -> BTreeMap<String, usize> {
        self.annotations
            .iter()
            .map(|(itemtype, ids)| (itemtype.clone(), ids.len()))
            .collect()
    }

    pub fn add_file(&mut self, path: &str, content: Vec<u8>) -> Result<()> {
        if self.files.insert(path.to_string(), content).is_some() {
            return Err(BackupError::coding(format!(
                "archive file '{}' written twice",
                path
            )));
        }
        Ok(())
    }
}

impl<S: RecordStore> JobContext for BackupContext<S> {
    fn kind(&self) -> JobKind {
        JobKind::Backup
    }

    fn settings(&self) -> &SettingTree {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut SettingTree {
        &mut self.settings
    }
}

fn new_writer() -> Result<Writer<Vec<u8>>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    Ok(writer)
}

/// Write one field as a leaf element; empty values become `<field/>`
fn write_leaf(writer: &mut Writer<Vec<u8>>, name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        writer.write_event(Event::Empty(BytesStart::new(name)))?;
    } else {
        writer.write_event(Event::Start(BytesStart::new(name)))?;
        writer.write_event(Event::Text(BytesText::new(value)))?;
        writer.write_event(Event::End(BytesEnd::new(name)))?;
    }
    Ok(())
}

fn write_row(writer: &mut Writer<Vec<u8>>, name: &str, row: &Record, fields: &[String]) -> Result<()> {
    let id = record_id(row)?.to_string();
    let mut start = BytesStart::new(name);
    start.push_attribute(("id", id.as_str()));
    writer.write_event(Event::Start(start))?;
    for field in fields {
        let value = row.get(field).map(String::as_str).unwrap_or("");
        write_leaf(writer, field, value)?;
    }
    Ok(())
}

/// Step that serializes an element tree into one archive file
pub struct StructureStep {
    name: String,
    path: String,
    root: Element,
    depends_on: Vec<String>,
    setting: Option<String>,
}

impl StructureStep {
    pub fn new(name: impl Into<String>, path: impl Into<String>, root: Element) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            root,
            depends_on: Vec::new(),
            setting: None,
        }
    }

    pub fn after(mut self, step: impl Into<String>) -> Self {
        self.depends_on.push(step.into());
        self
    }

    /// Run only while the boolean setting `name` is on
    pub fn enabled_by(mut self, name: impl Into<String>) -> Self {
        self.setting = Some(name.into());
        self
    }

    /// Serialize the tree against the context's store
    pub fn serialize<S: RecordStore>(&self, ctx: &mut BackupContext<S>) -> Result<Vec<u8>> {
        let mut writer = new_writer()?;
        write_element(&mut writer, &self.root, None, ctx)?;
        Ok(writer.into_inner())
    }
}

fn gate_open<S: RecordStore>(
    gate: &Option<String>,
    row: Option<&Record>,
    ctx: &BackupContext<S>,
) -> Result<bool> {
    let Some(gate) = gate else {
        return Ok(true);
    };
    let name = template::fill(gate, |key| row.and_then(|r| r.get(key)).map(String::as_str));
    ctx.settings.bool_value(&name)
}

fn write_element<S: RecordStore>(
    writer: &mut Writer<Vec<u8>>,
    element: &Element,
    parent: Option<&Record>,
    ctx: &mut BackupContext<S>,
) -> Result<()> {
    let Some(source) = &element.source else {
        if !gate_open(&element.gate, parent, ctx)? {
            return Ok(());
        }
        writer.write_event(Event::Start(BytesStart::new(element.name.as_str())))?;
        for child in &element.children {
            write_element(writer, child, parent, ctx)?;
        }
        writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
        return Ok(());
    };

    let mut filter = Vec::with_capacity(source.filter.len());
    for (field, param) in &source.filter {
        let value = match param {
            Param::CourseId => ctx.course_id.to_string(),
            Param::Value(v) => v.clone(),
            Param::Parent(parent_field) => parent
                .and_then(|r| r.get(parent_field))
                .cloned()
                .ok_or_else(|| {
                    BackupError::coding(format!(
                        "element '{}' filters on parent field '{}' which is not in scope",
                        element.name, parent_field
                    ))
                })?,
        };
        filter.push((field.as_str(), value));
    }
    let filter: Vec<(&str, &str)> = filter.iter().map(|(f, v)| (*f, v.as_str())).collect();
    let rows = ctx.store.select(&source.table, &filter)?;

    for row in &rows {
        if !gate_open(&element.gate, Some(row), ctx)? {
            continue;
        }
        write_row(writer, &element.name, row, &element.fields)?;
        for (field, itemtype) in &element.annotations {
            if let Some(id) = row.get(field).and_then(|v| v.trim().parse::<i64>().ok()) {
                ctx.annotate(itemtype, id);
            }
        }
        for child in &element.children {
            write_element(writer, child, Some(row), ctx)?;
        }
        writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
    }
    Ok(())
}

impl<S: RecordStore> Step<BackupContext<S>> for StructureStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn depends_on(&self) -> Vec<String> {
        self.depends_on.clone()
    }

    fn is_enabled(&self, ctx: &BackupContext<S>) -> Result<bool> {
        match &self.setting {
            Some(name) => ctx.settings.bool_value(name),
            None => Ok(true),
        }
    }

    fn process(&mut self, ctx: &mut BackupContext<S>, logger: &mut LoggerChain) -> Result<()> {
        let bytes = self.serialize(ctx)?;
        let size = bytes.len().to_string();
        ctx.add_file(&self.path, bytes)?;
        logger.log(
            "Wrote {path} ({size} bytes)",
            LogLevel::Debug,
            &[("path", self.path.as_str()), ("size", size.as_str())],
            2,
            false,
        )
    }
}

/// Step that writes the rows of every annotated id of one item type
pub struct AnnotatedStep {
    name: String,
    path: String,
    itemtype: String,
    table: String,
    root: String,
    element: String,
    fields: Vec<String>,
    depends_on: Vec<String>,
    setting: Option<String>,
}

impl AnnotatedStep {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        itemtype: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            itemtype: itemtype.into(),
            table: table.into(),
            root: String::new(),
            element: String::new(),
            fields: Vec::new(),
            depends_on: Vec::new(),
            setting: None,
        }
    }

    /// Element names: `<root><element id=..>..</element></root>`
    pub fn elements(mut self, root: impl Into<String>, element: impl Into<String>) -> Self {
        self.root = root.into();
        self.element = element.into();
        self
    }

    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fields.extend(fields.iter().map(|f| f.to_string()));
        self
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

impl<S: RecordStore> Step<BackupContext<S>> for AnnotatedStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn depends_on(&self) -> Vec<String> {
        self.depends_on.clone()
    }

    fn is_enabled(&self, ctx: &BackupContext<S>) -> Result<bool> {
        match &self.setting {
            Some(name) => ctx.settings.bool_value(name),
            None => Ok(true),
        }
    }

    fn process(&mut self, ctx: &mut BackupContext<S>, logger: &mut LoggerChain) -> Result<()> {
        if self.root.is_empty() || self.element.is_empty() {
            return Err(BackupError::coding(format!(
                "annotated step '{}' has no element names",
                self.name
            )));
        }

        let mut writer = new_writer()?;
        writer.write_event(Event::Start(BytesStart::new(self.root.as_str())))?;

        let mut written = 0usize;
        for id in ctx.annotated(&self.itemtype) {
            // Annotated ids that no longer resolve are left out
            let Some(row) = ctx.store.get(&self.table, id)? else {
                continue;
            };
            write_row(&mut writer, &self.element, &row, &self.fields)?;
            writer.write_event(Event::End(BytesEnd::new(self.element.as_str())))?;
            written += 1;
        }
        writer.write_event(Event::End(BytesEnd::new(self.root.as_str())))?;

        ctx.add_file(&self.path, writer.into_inner())?;
        let count = written.to_string();
        logger.log(
            "Wrote {count} {itemtype} records",
            LogLevel::Debug,
            &[("count", count.as_str()), ("itemtype", self.itemtype.as_str())],
            2,
            false,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Setting;
    use crate::store::{record, MemoryStore};
    use coursevault_core::SettingLevel;

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store
            .insert_with_id("course", record([("id", "2"), ("fullname", "Tom & Jerry")]))
            .unwrap();
        for (id, course, name) in [("10", "2", "Intro"), ("11", "2", ""), ("12", "3", "Other")] {
            store
                .insert_with_id(
                    "course_sections",
                    record([("id", id), ("course", course), ("name", name)]),
                )
                .unwrap();
        }
        store
    }

    fn course_tree() -> Element {
        Element::rows("course", Source::table("course").filter("id", Param::CourseId))
            .fields(&["fullname"])
            .child(
                Element::wrapper("sections").child(
                    Element::rows(
                        "section",
                        Source::table("course_sections").filter("course", Param::Parent("id".into())),
                    )
                    .fields(&["name"])
                    .annotate("course", "course"),
                ),
            )
    }

    #[test]
    fn test_serialize_nested_rows() {
        let mut ctx = BackupContext::new(store(), 2, SettingTree::new());
        let step = StructureStep::new("course", "course/course.xml", course_tree());
        let xml = String::from_utf8(step.serialize(&mut ctx).unwrap()).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<course id=\"2\">"));
        assert!(xml.contains("<fullname>Tom &amp; Jerry</fullname>"));
        assert!(xml.contains("<section id=\"10\">"));
        assert!(xml.contains("<name>Intro</name>"));
        assert!(xml.contains("<name/>"));
        assert!(!xml.contains("Other"));
        assert_eq!(ctx.annotated("course"), vec![2]);
    }

    #[test]
    fn test_gated_rows_are_left_out() {
        let mut settings = SettingTree::new();
        settings
            .add(Setting::boolean("section_10", SettingLevel::Section, true))
            .unwrap();
        settings
            .add(Setting::boolean("section_11", SettingLevel::Section, false))
            .unwrap();

        let tree = Element::rows(
            "section",
            Source::table("course_sections").filter("course", Param::CourseId),
        )
        .fields(&["name"])
        .only_if("section_{id}");
        let mut ctx = BackupContext::new(store(), 2, settings);
        let xml = String::from_utf8(
            StructureStep::new("sections", "sections.xml", tree)
                .serialize(&mut ctx)
                .unwrap(),
        )
        .unwrap();

        assert!(xml.contains("id=\"10\""));
        assert!(!xml.contains("id=\"11\""));
    }

    #[test]
    fn test_parent_param_without_parent_is_coding_error() {
        let tree = Element::rows(
            "section",
            Source::table("course_sections").filter("course", Param::Parent("id".into())),
        );
        let mut ctx = BackupContext::new(store(), 2, SettingTree::new());
        let err = StructureStep::new("s", "s.xml", tree)
            .serialize(&mut ctx)
            .unwrap_err();
        assert!(err.is_coding());
    }

    #[test]
    fn test_annotated_step_writes_annotated_rows_only() {
        let mut store = store();
        for (id, name) in [("4", "ada"), ("5", "grace")] {
            store
                .insert_with_id("user", record([("id", id), ("username", name)]))
                .unwrap();
        }
        let mut ctx = BackupContext::new(store, 2, SettingTree::new());
        ctx.annotate("user", 5);
        ctx.annotate("user", 99);
        ctx.annotate("user", 0);

        let mut step = AnnotatedStep::new("users", "users/users.xml", "user", "user")
            .elements("users", "user")
            .fields(&["username"]);
        step.process(&mut ctx, &mut LoggerChain::new()).unwrap();

        let xml = String::from_utf8(ctx.files["users/users.xml"].clone()).unwrap();
        assert!(xml.contains("<username>grace</username>"));
        assert!(!xml.contains("ada"));
        assert_eq!(ctx.annotated("user"), vec![5, 99]);
    }

    #[test]
    fn test_same_file_twice_is_coding_error() {
        let mut ctx = BackupContext::new(MemoryStore::new(), 1, SettingTree::new());
        ctx.add_file("a.xml", Vec::new()).unwrap();
        assert!(ctx.add_file("a.xml", Vec::new()).unwrap_err().is_coding());
    }
}
