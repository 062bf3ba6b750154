// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Node Selector: locator resolution with optional page scoping.

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::locator::{Locator, LocatorError};
use super::xpath::{NodeRef, QueryError, XPath};
use crate::model::{cell_kind, CellKind, Document, NodeKind, PageIndex, PageInfo};

/// Caller-declared page scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PageFilter {
    /// Page identifiers the caller may see or touch. `None` means every page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_pages: Option<BTreeSet<String>>,
    /// Fail when a match belongs to no page.
    pub reject_global_nodes: bool,
    /// Fail (instead of silently dropping) when a match lies outside `allowed_pages`.
    pub reject_foreign_pages: bool,
    /// Privileged callers skip filtering entirely.
    pub bypass: bool,
}

impl PageFilter {
    pub fn allow_pages<I, S>(pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { allowed_pages: Some(pages.into_iter().map(Into::into).collect()), ..Self::default() }
    }

    pub fn is_active(&self) -> bool {
        !self.bypass && (self.allowed_pages.is_some() || self.reject_global_nodes)
    }

    /// The filter used for mutations: an active scope never lets an edit touch global nodes.
    pub fn for_mutation(&self) -> Self {
        let mut filter = self.clone();
        if filter.is_active() {
            filter.reject_global_nodes = true;
        }
        filter
    }

    /// Checks that every allowed page exists in the document.
    pub fn validate_against(&self, pages: &[PageInfo]) -> Result<(), SelectError> {
        let Some(allowed) = self.allowed_pages.as_ref().filter(|_| !self.bypass) else {
            return Ok(());
        };
        let unknown: Vec<String> = allowed
            .iter()
            .filter(|wanted| !pages.iter().any(|page| &page.id == *wanted))
            .cloned()
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(SelectError::UnknownPages { pages: unknown })
        }
    }

    fn allows(&self, page: &str) -> bool {
        self.allowed_pages.as_ref().map_or(true, |allowed| allowed.contains(page))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    #[error(transparent)]
    Locator(#[from] LocatorError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("query `{query}` matched a node outside every page, which is not allowed in a page-scoped call")]
    GlobalNode { query: String },
    #[error("query `{query}` matched a node on page `{page}`, which is outside the allowed pages")]
    ForeignPage { query: String, page: String },
    #[error("page filter names unknown page(s): {}", pages.join(", "))]
    UnknownPages { pages: Vec<String> },
}

impl SelectError {
    pub fn query(&self) -> Option<&str> {
        match self {
            Self::Query(err) => Some(err.expression()),
            Self::GlobalNode { query } | Self::ForeignPage { query, .. } => Some(query),
            Self::Locator(_) | Self::UnknownPages { .. } => None,
        }
    }
}

/// Result of a resolution: the canonical query plus the surviving matches in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub query: String,
    pub nodes: Vec<NodeRef>,
    /// Matches removed by the page filter.
    pub dropped: usize,
}

pub fn resolve(
    doc: &Document,
    locator: &Locator,
    filter: Option<&PageFilter>,
) -> Result<Selection, SelectError> {
    let query = locator.canonical_query();
    let matches = XPath::compile(&query)?.select(doc)?;

    let Some(filter) = filter.filter(|f| f.is_active()) else {
        return Ok(Selection { query, nodes: matches, dropped: 0 });
    };

    let index = PageIndex::build(doc);
    let mut nodes = Vec::with_capacity(matches.len());
    let mut dropped = 0;
    for found in matches {
        match index.page_of(doc, found.node()) {
            None if filter.reject_global_nodes => return Err(SelectError::GlobalNode { query }),
            None if filter.allowed_pages.is_some() => dropped += 1,
            None => nodes.push(found),
            Some(page) if filter.allows(&page.id) => nodes.push(found),
            Some(page) if filter.reject_foreign_pages => {
                return Err(SelectError::ForeignPage { query, page: page.id.clone() });
            }
            Some(_) => dropped += 1,
        }
    }
    Ok(Selection { query, nodes, dropped })
}

/// Summary of one match, as returned by reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct MatchInfo {
    pub node_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    /// Attribute value, text content, or outer XML for elements.
    pub value: String,
}

pub fn describe_match(doc: &Document, index: &PageIndex, found: &NodeRef) -> MatchInfo {
    let page = index.page_of(doc, found.node()).map(|page| page.id.clone());
    match found {
        NodeRef::Attribute { element, name } => MatchInfo {
            node_type: "attribute",
            tag: doc.element(*element).map(|el| el.name().to_owned()),
            id: doc.element(*element).and_then(|el| el.attribute("id")).map(str::to_owned),
            page,
            attribute: Some(name.clone()),
            value: doc
                .element(*element)
                .and_then(|el| el.attribute(name))
                .unwrap_or_default()
                .to_owned(),
        },
        NodeRef::Node(id) => {
            let element = doc.element(*id);
            let value = match doc.kind(*id) {
                NodeKind::Element => doc.node_to_xml(*id),
                _ => doc.text_content(*id),
            };
            MatchInfo {
                node_type: doc.kind(*id).as_str(),
                tag: element.map(|el| el.name().to_owned()),
                id: element.and_then(|el| el.attribute("id")).map(str::to_owned),
                page,
                attribute: None,
                value,
            }
        }
    }
}

/// One identified diagram cell, as listed by list-mode reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct CellInfo {
    pub id: String,
    pub page: String,
    pub tag: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Every element carrying an `id` below a page container, restricted to the filter's pages.
pub fn list_cells(doc: &Document, filter: Option<&PageFilter>) -> Vec<CellInfo> {
    let filter = filter.filter(|f| f.is_active());
    let index = PageIndex::build(doc);
    let mut cells = Vec::new();

    for page_node in doc.element_children(doc.root_element()) {
        let Some(page) = index.page_of(doc, page_node) else {
            continue;
        };
        if filter.is_some_and(|f| !f.allows(&page.id)) {
            continue;
        }
        for node in doc.descendants_or_self(page_node).into_iter().skip(1) {
            let Some(element) = doc.element(node) else {
                continue;
            };
            let Some(id) = element.attribute("id") else {
                continue;
            };
            let kind = match cell_kind(doc, node) {
                CellKind::Vertex => "vertex",
                CellKind::Edge => "edge",
                CellKind::Other => "other",
            };
            cells.push(CellInfo {
                id: id.to_owned(),
                page: page.id.clone(),
                tag: element.name().to_owned(),
                kind,
                source: element.attribute("source").map(str::to_owned),
                target: element.attribute("target").map(str::to_owned),
                label: element.attribute("value").map(str::to_owned),
            });
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::{list_cells, resolve, PageFilter, SelectError};
    use crate::model::{list_pages, Document};
    use crate::query::locator::Locator;

    const DOC: &str = r#"<mxfile id="root"><diagram id="A"><cell id="a1" vertex="1"/><cell id="a2" edge="1" source="a1" target="a1"/></diagram><diagram id="B"><cell id="b1" vertex="1" value="Bee"/></diagram></mxfile>"#;

    #[fixture]
    fn doc() -> Document {
        Document::parse(DOC).expect("parse")
    }

    fn query(q: &str) -> Locator {
        Locator::Query(q.to_owned())
    }

    #[rstest]
    fn id_and_canonical_query_resolve_identically(doc: Document) {
        let by_id = resolve(&doc, &Locator::Id("a2".to_owned()), None).expect("id");
        let by_query = resolve(&doc, &query(&by_id.query), None).expect("query");
        assert_eq!(by_id.nodes, by_query.nodes);
        assert_eq!(by_id.nodes.len(), 1);
    }

    #[rstest]
    fn allowed_pages_drop_foreign_matches(doc: Document) {
        let filter = PageFilter::allow_pages(["A"]);
        let selection = resolve(&doc, &query("//cell"), Some(&filter)).expect("resolve");
        assert_eq!(selection.nodes.len(), 2);
        assert_eq!(selection.dropped, 1);

        let only_b = resolve(&doc, &query("//cell[@id='b1']"), Some(&filter)).expect("resolve");
        assert!(only_b.nodes.is_empty());
    }

    #[rstest]
    fn strict_modes_reject(doc: Document) {
        let strict = PageFilter { reject_foreign_pages: true, ..PageFilter::allow_pages(["A"]) };
        let err = resolve(&doc, &query("//cell[@id='b1']"), Some(&strict)).unwrap_err();
        assert!(matches!(err, SelectError::ForeignPage { ref page, .. } if page == "B"));

        let scoped = PageFilter::allow_pages(["A"]).for_mutation();
        let err = resolve(&doc, &Locator::Id("root".to_owned()), Some(&scoped)).unwrap_err();
        assert!(matches!(err, SelectError::GlobalNode { .. }));
    }

    #[rstest]
    fn bypass_disables_filtering(doc: Document) {
        let filter = PageFilter { bypass: true, ..PageFilter::allow_pages(["A"]).for_mutation() };
        let selection = resolve(&doc, &query("//*[@id]"), Some(&filter)).expect("resolve");
        assert_eq!(selection.nodes.len(), 6);
    }

    #[rstest]
    fn unknown_pages_are_reported(doc: Document) {
        let pages = list_pages(&doc);
        assert!(PageFilter::allow_pages(["A", "B"]).validate_against(&pages).is_ok());
        let err = PageFilter::allow_pages(["A", "Z"]).validate_against(&pages).unwrap_err();
        assert_eq!(err, SelectError::UnknownPages { pages: vec!["Z".to_owned()] });
    }

    #[rstest]
    fn list_mode_respects_allowed_pages(doc: Document) {
        let all = list_cells(&doc, None);
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].kind, "edge");
        assert_eq!(all[1].source.as_deref(), Some("a1"));

        let only_a = list_cells(&doc, Some(&PageFilter::allow_pages(["A"])));
        assert!(only_a.iter().all(|cell| cell.page == "A"));
        assert_eq!(only_a.len(), 2);
    }
}
