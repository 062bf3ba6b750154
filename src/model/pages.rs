// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::Serialize;

use super::document::{Document, NodeId};

/// A page is an element child of the document's root element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct PageInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Vertex,
    Edge,
    Other,
}

/// Page lookup for a single document snapshot.
#[derive(Debug, Clone, Default)]
pub struct PageIndex {
    pages: Vec<PageInfo>,
    by_node: HashMap<NodeId, usize>,
}

impl PageIndex {
    pub fn build(doc: &Document) -> Self {
        let mut index = Self::default();
        for (position, node) in doc.element_children(doc.root_element()).enumerate() {
            let element = doc.element(node);
            let id = element
                .and_then(|el| el.attribute("id"))
                .map(str::to_owned)
                .unwrap_or_else(|| format!("page-{position}"));
            let name = element.and_then(|el| el.attribute("name")).map(str::to_owned);
            index.by_node.insert(node, index.pages.len());
            index.pages.push(PageInfo { id, name, index: position });
        }
        index
    }

    pub fn pages(&self) -> &[PageInfo] {
        &self.pages
    }

    pub fn into_pages(self) -> Vec<PageInfo> {
        self.pages
    }

    /// The page owning `node`, or `None` for global nodes (the root element and above).
    pub fn page_of(&self, doc: &Document, node: NodeId) -> Option<&PageInfo> {
        std::iter::once(node)
            .chain(doc.ancestors(node))
            .find_map(|candidate| self.by_node.get(&candidate))
            .map(|&slot| &self.pages[slot])
    }
}

pub fn list_pages(doc: &Document) -> Vec<PageInfo> {
    PageIndex::build(doc).into_pages()
}

pub fn cell_kind(doc: &Document, node: NodeId) -> CellKind {
    let Some(element) = doc.element(node) else {
        return CellKind::Other;
    };
    let flagged = |key: &str| element.attribute(key) == Some("1");
    if flagged("vertex") || element.name().eq_ignore_ascii_case("vertex") {
        CellKind::Vertex
    } else if flagged("edge") || element.name().eq_ignore_ascii_case("edge") {
        CellKind::Edge
    } else {
        CellKind::Other
    }
}
