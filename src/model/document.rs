// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! In-memory document tree.
//!
//! The tree is an arena: nodes are addressed by [`NodeId`] and never move, so ids handed out by
//! a query stay valid while the tree is mutated. Detached nodes simply stop being reachable from
//! the document node; serialization only walks attached nodes.

use std::borrow::Cow;
use std::collections::BTreeSet;

use indexmap::IndexMap;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Text,
    Comment,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Element => "element",
            Self::Text => "text",
            Self::Comment => "comment",
        }
    }
}

/// Tag name plus an ordered, unique-keyed attribute map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: IndexMap<String, String>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), attributes: IndexMap::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &IndexMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Returns the previous value, if any. Existing keys keep their position.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.attributes.insert(key.into(), value.into())
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<String> {
        self.attributes.shift_remove(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeData {
    Document,
    Element(Element),
    Text { text: String, cdata: bool },
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("malformed XML at byte {position}: {message}")]
    Syntax { message: String, position: u64 },
    #[error("document has no root element")]
    Empty,
    #[error("document has more than one root element (second root at byte {position})")]
    MultipleRoots { position: u64 },
    #[error("text outside the root element at byte {position}")]
    TextOutsideRoot { position: u64 },
    #[error("unclosed element(s): <{}>", names.join(">, <"))]
    Unclosed { names: Vec<String> },
}

impl DocumentError {
    pub fn position(&self) -> Option<u64> {
        match self {
            Self::Syntax { position, .. }
            | Self::MultipleRoots { position }
            | Self::TextOutsideRoot { position } => Some(*position),
            Self::Empty | Self::Unclosed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("node has no parent")]
    NoParent,
    #[error("node is not an element")]
    NotAnElement,
    #[error("node cannot contain children")]
    NotAContainer,
}

/// Parsed diagram document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    nodes: Vec<Node>,
    prolog: String,
    epilog: String,
}

const DOCUMENT_NODE: NodeId = NodeId(0);

impl Document {
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        let mut doc = Self {
            nodes: vec![Node { data: NodeData::Document, parent: None, children: Vec::new() }],
            prolog: String::new(),
            epilog: String::new(),
        };
        let mut reader = Reader::from_str(text);
        let mut stack: Vec<NodeId> = Vec::new();
        let mut seen_root = false;

        loop {
            let position = reader.buffer_position() as u64;
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let parent = doc.open_parent(&stack, &mut seen_root, position)?;
                    let element = read_element(&e, &reader)?;
                    let id = doc.push_node(NodeData::Element(element), Some(parent));
                    stack.push(id);
                }
                Ok(Event::Empty(e)) => {
                    let parent = doc.open_parent(&stack, &mut seen_root, position)?;
                    let element = read_element(&e, &reader)?;
                    doc.push_node(NodeData::Element(element), Some(parent));
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Text(e)) => {
                    let text = e.unescape().map_err(|err| syntax_error(&err, &reader))?;
                    doc.push_text(&stack, seen_root, text, false, position)?;
                }
                Ok(Event::CData(e)) => {
                    let text = String::from_utf8_lossy(&e);
                    doc.push_text(&stack, seen_root, text, true, position)?;
                }
                Ok(Event::Comment(e)) => {
                    let body = String::from_utf8_lossy(&e).into_owned();
                    match stack.last() {
                        Some(&parent) => {
                            doc.push_node(NodeData::Comment(body), Some(parent));
                        }
                        None => doc.outer_buffer(seen_root).push_str(&format!("<!--{body}-->")),
                    }
                }
                Ok(Event::Decl(e)) => {
                    let body = String::from_utf8_lossy(&e).into_owned();
                    doc.prolog.push_str(&format!("<?{body}?>"));
                }
                Ok(Event::PI(e)) => {
                    let body = String::from_utf8_lossy(&e).into_owned();
                    doc.outer_buffer(seen_root).push_str(&format!("<?{body}?>"));
                }
                Ok(Event::DocType(e)) => {
                    let body = String::from_utf8_lossy(&e).into_owned();
                    doc.prolog.push_str(&format!("<!DOCTYPE {}>", body.trim()));
                }
                Ok(Event::Eof) => {
                    if !stack.is_empty() {
                        let names = stack
                            .iter()
                            .filter_map(|&id| doc.element(id).map(|el| el.name().to_owned()))
                            .collect();
                        return Err(DocumentError::Unclosed { names });
                    }
                    break;
                }
                Err(err) => return Err(syntax_error(&err, &reader)),
            }
        }

        if !seen_root {
            return Err(DocumentError::Empty);
        }
        Ok(doc)
    }

    /// Parses a standalone fragment that must consist of exactly one root element.
    pub fn parse_fragment(text: &str) -> Result<Self, DocumentError> {
        Self::parse(text.trim())
    }

    fn open_parent(
        &self,
        stack: &[NodeId],
        seen_root: &mut bool,
        position: u64,
    ) -> Result<NodeId, DocumentError> {
        if let Some(&parent) = stack.last() {
            return Ok(parent);
        }
        if *seen_root {
            return Err(DocumentError::MultipleRoots { position });
        }
        *seen_root = true;
        Ok(DOCUMENT_NODE)
    }

    fn push_text(
        &mut self,
        stack: &[NodeId],
        seen_root: bool,
        text: Cow<'_, str>,
        cdata: bool,
        position: u64,
    ) -> Result<(), DocumentError> {
        match stack.last() {
            Some(&parent) => {
                self.push_node(NodeData::Text { text: text.into_owned(), cdata }, Some(parent));
                Ok(())
            }
            None if text.trim().is_empty() => {
                self.outer_buffer(seen_root).push_str(&text);
                Ok(())
            }
            None => Err(DocumentError::TextOutsideRoot { position }),
        }
    }

    fn outer_buffer(&mut self, seen_root: bool) -> &mut String {
        if seen_root {
            &mut self.epilog
        } else {
            &mut self.prolog
        }
    }

    fn push_node(&mut self, data: NodeData, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node { data, parent, children: Vec::new() });
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(id);
        }
        id
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn document_node(&self) -> NodeId {
        DOCUMENT_NODE
    }

    /// The single top-level element. Parsing guarantees it exists.
    pub fn root_element(&self) -> NodeId {
        self.nodes[DOCUMENT_NODE.0]
            .children
            .iter()
            .copied()
            .find(|&id| self.kind(id) == NodeKind::Element)
            .unwrap_or(DOCUMENT_NODE)
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        match self.node(id).map(|node| &node.data) {
            Some(NodeData::Element(_)) => NodeKind::Element,
            Some(NodeData::Text { .. }) => NodeKind::Text,
            Some(NodeData::Comment(_)) => NodeKind::Comment,
            Some(NodeData::Document) | None => NodeKind::Document,
        }
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.node(id).map(|node| &node.data) {
            Some(NodeData::Element(element)) => Some(element),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match self.nodes.get_mut(id.0).map(|node| &mut node.data) {
            Some(NodeData::Element(element)) => Some(element),
            _ => None,
        }
    }

    /// Text of a text node, or the body of a comment node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.node(id).map(|node| &node.data) {
            Some(NodeData::Text { text, .. }) | Some(NodeData::Comment(text)) => Some(text),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|node| node.children.as_slice()).unwrap_or(&[])
    }

    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id).iter().copied().filter(move |&child| self.kind(child) == NodeKind::Element)
    }

    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&current| self.parent(current))
    }

    /// Whether the node is still reachable from the document node.
    pub fn is_attached(&self, id: NodeId) -> bool {
        id == DOCUMENT_NODE || self.ancestors(id).any(|ancestor| ancestor == DOCUMENT_NODE)
    }

    /// Pre-order list of `id` and everything below it.
    pub fn descendants_or_self(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, id: NodeId) -> String {
        match self.node(id).map(|node| &node.data) {
            Some(NodeData::Text { text, .. }) | Some(NodeData::Comment(text)) => text.clone(),
            _ => self
                .descendants_or_self(id)
                .into_iter()
                .filter_map(|node| match self.node(node).map(|n| &n.data) {
                    Some(NodeData::Text { text, .. }) => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Rank of every attached node in document order; detached nodes rank `usize::MAX`.
    pub fn document_order(&self) -> Vec<usize> {
        let mut ranks = vec![usize::MAX; self.nodes.len()];
        for (rank, id) in self.descendants_or_self(DOCUMENT_NODE).into_iter().enumerate() {
            ranks[id.0] = rank;
        }
        ranks
    }

    /// Values of every `id` attribute on attached elements.
    pub fn element_ids(&self) -> BTreeSet<String> {
        self.element_ids_within(DOCUMENT_NODE)
    }

    /// Values of every `id` attribute in the subtree rooted at `id`.
    pub fn element_ids_within(&self, id: NodeId) -> BTreeSet<String> {
        self.descendants_or_self(id)
            .into_iter()
            .filter_map(|id| self.element(id).and_then(|el| el.attribute("id")).map(str::to_owned))
            .collect()
    }

    pub fn position_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|&child| child == id)
    }

    /// Replaces the content of a text node.
    pub fn set_text(&mut self, id: NodeId, value: impl Into<String>) -> Result<(), TreeError> {
        match self.nodes.get_mut(id.0).map(|node| &mut node.data) {
            Some(NodeData::Text { text, .. }) => {
                *text = value.into();
                Ok(())
            }
            _ => Err(TreeError::NotAnElement),
        }
    }

    /// Replaces every child of an element with a single text node (or nothing, for empty text).
    pub fn replace_children_with_text(&mut self, id: NodeId, value: &str) -> Result<(), TreeError> {
        if self.kind(id) != NodeKind::Element {
            return Err(TreeError::NotAnElement);
        }
        for child in std::mem::take(&mut self.nodes[id.0].children) {
            self.nodes[child.0].parent = None;
        }
        if !value.is_empty() {
            self.push_node(NodeData::Text { text: value.to_owned(), cdata: false }, Some(id));
        }
        Ok(())
    }

    /// Unlinks a node from its parent. The node and its subtree stay in the arena.
    pub fn detach(&mut self, id: NodeId) -> Result<NodeId, TreeError> {
        let parent = self.parent(id).ok_or(TreeError::NoParent)?;
        self.nodes[parent.0].children.retain(|&child| child != id);
        self.nodes[id.0].parent = None;
        Ok(parent)
    }

    /// Links an unattached node under `parent` at `index` (clamped to the child count).
    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) -> Result<(), TreeError> {
        if !matches!(self.kind(parent), NodeKind::Element | NodeKind::Document) {
            return Err(TreeError::NotAContainer);
        }
        if self.parent(child).is_some() {
            self.detach(child)?;
        }
        let children = &mut self.nodes[parent.0].children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.nodes[child.0].parent = Some(parent);
        Ok(())
    }

    /// Deep-copies `node` from `source` into this arena. The copy is returned unattached.
    pub fn import_subtree(&mut self, source: &Document, node: NodeId) -> NodeId {
        let Some(source_node) = source.node(node) else {
            return self.push_node(NodeData::Text { text: String::new(), cdata: false }, None);
        };
        let copy = self.push_node(source_node.data.clone(), None);
        for &child in &source_node.children {
            let child_copy = self.import_subtree(source, child);
            self.nodes[copy.0].children.push(child_copy);
            self.nodes[child_copy.0].parent = Some(copy);
        }
        copy
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(self.nodes.len() * 32);
        out.push_str(&self.prolog);
        for &child in self.children(DOCUMENT_NODE) {
            self.write_node(child, &mut out);
        }
        out.push_str(&self.epilog);
        out
    }

    /// Serializes a single node (outer XML for elements).
    pub fn node_to_xml(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.node(id) else {
            return;
        };
        match &node.data {
            NodeData::Document => {
                for &child in &node.children {
                    self.write_node(child, out);
                }
            }
            NodeData::Text { text, cdata: true } => {
                out.push_str("<![CDATA[");
                out.push_str(text);
                out.push_str("]]>");
            }
            NodeData::Text { text, cdata: false } => out.push_str(&escape_text(text)),
            NodeData::Comment(body) => {
                out.push_str("<!--");
                out.push_str(body);
                out.push_str("-->");
            }
            NodeData::Element(element) => {
                out.push('<');
                out.push_str(&element.name);
                for (key, value) in &element.attributes {
                    out.push(' ');
                    out.push_str(key);
                    out.push_str("=\"");
                    out.push_str(&escape_attribute(value));
                    out.push('"');
                }
                if node.children.is_empty() {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                for &child in &node.children {
                    self.write_node(child, out);
                }
                out.push_str("</");
                out.push_str(&element.name);
                out.push('>');
            }
        }
    }
}

fn syntax_error(err: &quick_xml::Error, reader: &Reader<&[u8]>) -> DocumentError {
    DocumentError::Syntax { message: err.to_string(), position: reader.error_position() as u64 }
}

fn read_element(start: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Element, DocumentError> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|err| DocumentError::Syntax {
            message: format!("invalid element name: {err}"),
            position: reader.buffer_position() as u64,
        })?
        .to_owned();
    let mut element = Element::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|err| DocumentError::Syntax {
            message: format!("invalid attribute: {err}"),
            position: reader.buffer_position() as u64,
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|err| syntax_error(&err, reader))?;
        element.set_attribute(key, value.into_owned());
    }
    Ok(element)
}

fn escape_text(s: &str) -> Cow<'_, str> {
    if !s.bytes().any(|b| matches!(b, b'&' | b'<' | b'>')) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn escape_attribute(s: &str) -> Cow<'_, str> {
    if !s.bytes().any(|b| matches!(b, b'&' | b'<' | b'>' | b'"' | b'\n' | b'\r' | b'\t')) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#xa;"),
            '\r' => out.push_str("&#xd;"),
            '\t' => out.push_str("&#x9;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}
