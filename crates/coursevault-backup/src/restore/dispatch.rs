//! Streaming path dispatch over restore XML.
//!
//! Handlers are registered for absolute element paths such as
//! `/activities/activity`. While the document is read, every element at a
//! registered path is collected into a [`Record`]: its attributes plus the
//! text of each direct child element that has no children of its own and
//! does not lead to a nested registered path. The record is handed to the handler as soon as the
//! element closes, or earlier when a nested registered element opens, so a
//! parent is always processed before its children.

use crate::error::{BackupError, Result};
use crate::store::Record;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::{BTreeMap, HashMap};

/// One dispatched element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathData {
    /// Element name
    pub name: String,
    /// Absolute path of the element
    pub path: String,
    /// Attributes and leaf fields, ordered by key
    pub record: Record,
}

/// Processes the elements found at one path
pub trait PathHandler<C> {
    fn handle(&mut self, data: &PathData, ctx: &mut C) -> Result<()>;
}

impl<C, F> PathHandler<C> for F
where
    F: FnMut(&PathData, &mut C) -> Result<()>,
{
    fn handle(&mut self, data: &PathData, ctx: &mut C) -> Result<()> {
        self(data, ctx)
    }
}

/// Elements dispatched per path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub counts: BTreeMap<String, usize>,
}

impl DispatchSummary {
    pub fn count(&self, path: &str) -> usize {
        self.counts.get(path).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

struct OpenElement {
    name: String,
    text: String,
    has_children: bool,
}

struct Frame {
    handler: usize,
    depth: usize,
    name: String,
    path: String,
    record: Record,
    dispatched: bool,
}

pub struct PathDispatcher<C> {
    handlers: Vec<(String, Box<dyn PathHandler<C>>)>,
    index: HashMap<String, usize>,
}

impl<C> Default for PathDispatcher<C> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<C> PathDispatcher<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an absolute path
    pub fn register<H>(&mut self, path: &str, handler: H) -> Result<()>
    where
        H: PathHandler<C> + 'static,
    {
        if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') {
            return Err(BackupError::coding(format!(
                "'{}' is not an absolute element path",
                path
            )));
        }
        if self.index.contains_key(path) {
            return Err(BackupError::coding(format!(
                "path '{}' already has a handler",
                path
            )));
        }
        self.index.insert(path.to_string(), self.handlers.len());
        self.handlers.push((path.to_string(), Box::new(handler)));
        Ok(())
    }

    /// Registered paths, in registration order
    pub fn paths(&self) -> Vec<&str> {
        self.handlers.iter().map(|(p, _)| p.as_str()).collect()
    }

    /// Read `xml` and dispatch every element at a registered path.
    /// A handler error stops the dispatch and is returned as is.
    pub fn dispatch(&mut self, xml: &[u8], ctx: &mut C) -> Result<DispatchSummary> {
        let mut reader = Reader::from_reader(xml);
        let mut buf = Vec::new();
        let mut open: Vec<OpenElement> = Vec::new();
        let mut frames: Vec<Frame> = Vec::new();
        let mut summary = DispatchSummary::default();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    self.open_element(&e, &mut open, &mut frames, ctx, &mut summary)?;
                }
                Event::Empty(e) => {
                    self.open_element(&e, &mut open, &mut frames, ctx, &mut summary)?;
                    self.close_element(&mut open, &mut frames, ctx, &mut summary)?;
                }
                Event::End(_) => {
                    self.close_element(&mut open, &mut frames, ctx, &mut summary)?;
                }
                Event::Text(t) => {
                    if let Some(top) = open.last_mut() {
                        top.text.push_str(utf8(&t)?);
                    }
                }
                Event::CData(t) => {
                    if let Some(top) = open.last_mut() {
                        top.text.push_str(utf8(&t)?);
                    }
                }
                Event::GeneralRef(r) => {
                    if let Some(top) = open.last_mut() {
                        top.text.push_str(&resolve_entity(utf8(&r)?)?);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !open.is_empty() {
            return Err(BackupError::xml("document ended inside an element"));
        }
        Ok(summary)
    }

    fn open_element(
        &mut self,
        start: &BytesStart<'_>,
        open: &mut Vec<OpenElement>,
        frames: &mut Vec<Frame>,
        ctx: &mut C,
        summary: &mut DispatchSummary,
    ) -> Result<()> {
        let name = utf8(start.name().as_ref())?.to_string();
        if let Some(parent) = open.last_mut() {
            parent.has_children = true;
        }
        open.push(OpenElement {
            name: name.clone(),
            text: String::new(),
            has_children: false,
        });

        let path = open.iter().fold(String::new(), |mut path, element| {
            path.push('/');
            path.push_str(&element.name);
            path
        });
        let Some(&handler) = self.index.get(&path) else {
            return Ok(());
        };

        // The enclosing registered element is complete once a nested one opens
        if let Some(frame) = frames.last_mut() {
            self.flush(frame, ctx, summary)?;
        }

        let mut record = Record::new();
        for attr in start.attributes() {
            let attr = attr.map_err(BackupError::xml)?;
            let key = utf8(attr.key.as_ref())?.to_string();
            let value = quick_xml::escape::unescape(utf8(&attr.value)?).map_err(BackupError::xml)?;
            record.insert(key, value.into_owned());
        }
        frames.push(Frame {
            handler,
            depth: open.len(),
            name,
            path,
            record,
            dispatched: false,
        });
        Ok(())
    }

    fn close_element(
        &mut self,
        open: &mut Vec<OpenElement>,
        frames: &mut Vec<Frame>,
        ctx: &mut C,
        summary: &mut DispatchSummary,
    ) -> Result<()> {
        let depth = open.len();
        let Some(closed) = open.pop() else {
            return Err(BackupError::xml("closing tag without an open element"));
        };

        if frames.last().is_some_and(|f| f.depth == depth) {
            if let Some(mut frame) = frames.pop() {
                self.flush(&mut frame, ctx, summary)?;
            }
            return Ok(());
        }
        if closed.has_children {
            return Ok(());
        }

        // Fields after a nested registered element arrive too late
        let Some(frame) = frames
            .last_mut()
            .filter(|f| !f.dispatched && f.depth + 1 == depth)
        else {
            return Ok(());
        };
        let path = format!("{}/{}", frame.path, closed.name);
        if !self.leads_to_handler(&path) {
            frame.record.insert(closed.name, closed.text);
        }
        Ok(())
    }

    /// True if `path` is a proper ancestor of a registered path
    fn leads_to_handler(&self, path: &str) -> bool {
        self.handlers.iter().any(|(registered, _)| {
            registered
                .strip_prefix(path)
                .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    fn flush(&mut self, frame: &mut Frame, ctx: &mut C, summary: &mut DispatchSummary) -> Result<()> {
        if frame.dispatched {
            return Ok(());
        }
        frame.dispatched = true;

        let data = PathData {
            name: frame.name.clone(),
            path: frame.path.clone(),
            record: std::mem::take(&mut frame.record),
        };
        self.handlers[frame.handler].1.handle(&data, ctx)?;
        *summary.counts.entry(data.path).or_default() += 1;
        Ok(())
    }
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(BackupError::xml)
}

fn resolve_entity(name: &str) -> Result<String> {
    if let Some(number) = name.strip_prefix('#') {
        let code = match number.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => number.parse(),
        }
        .map_err(|_| BackupError::xml(format!("invalid character reference &{};", name)))?;
        return char::from_u32(code)
            .map(String::from)
            .ok_or_else(|| BackupError::xml(format!("invalid character reference &{};", name)));
    }

    let resolved = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        other => return Err(BackupError::xml(format!("unknown entity &{};", other))),
    };
    Ok(resolved.to_string())
}
