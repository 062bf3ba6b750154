// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::fmt;

use serde::Serialize;

/// Where an operation or read points: a stable element identifier or a raw query.
///
/// Identifiers are rewritten into one canonical query so everything downstream handles a single
/// locator form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum Locator {
    Id(String),
    Query(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LocatorError {
    #[error("either `id` or `xpath` must be provided")]
    Missing,
}

impl Locator {
    /// Builds a locator from optional wire fields. An identifier wins over a query; empty strings
    /// count as absent.
    pub fn from_parts(id: Option<&str>, xpath: Option<&str>) -> Result<Self, LocatorError> {
        let id = id.filter(|value| !value.is_empty());
        let xpath = xpath.map(str::trim).filter(|value| !value.is_empty());
        match (id, xpath) {
            (Some(id), _) => Ok(Self::Id(id.to_owned())),
            (None, Some(xpath)) => Ok(Self::Query(xpath.to_owned())),
            (None, None) => Err(LocatorError::Missing),
        }
    }

    /// The query actually evaluated for this locator.
    pub fn canonical_query(&self) -> String {
        match self {
            Self::Id(id) => id_query(id),
            Self::Query(query) => query.clone(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id {id:?}"),
            Self::Query(query) => write!(f, "xpath `{query}`"),
        }
    }
}

pub fn id_query(id: &str) -> String {
    format!("//*[@id={}]", xpath_literal(id))
}

/// Quotes `value` as a string literal. Values containing both quote characters are split into a
/// `concat()` call since the query language has no escape sequences.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    if !value.contains('"') {
        return format!("\"{value}\"");
    }

    let mut parts = Vec::new();
    for (index, chunk) in value.split('\'').enumerate() {
        if index > 0 {
            parts.push("\"'\"".to_owned());
        }
        if !chunk.is_empty() {
            parts.push(format!("'{chunk}'"));
        }
    }
    format!("concat({})", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{id_query, xpath_literal, Locator, LocatorError};
    use crate::model::Document;
    use crate::query::xpath::select;

    #[rstest]
    #[case("s1", "'s1'")]
    #[case("it's", "\"it's\"")]
    #[case("a\"b'c", "concat('a\"b', \"'\", 'c')")]
    #[case("'\"", "concat(\"'\", '\"')")]
    fn quotes_literals(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(xpath_literal(raw), expected);
    }

    #[test]
    fn id_wins_and_missing_is_an_error() {
        assert_eq!(Locator::from_parts(Some("a"), Some("//b")), Ok(Locator::Id("a".to_owned())));
        assert_eq!(Locator::from_parts(Some(""), Some(" //b ")), Ok(Locator::Query("//b".to_owned())));
        assert_eq!(Locator::from_parts(None, None), Err(LocatorError::Missing));
        assert_eq!(Locator::from_parts(Some(""), Some("  ")), Err(LocatorError::Missing));
    }

    #[rstest]
    #[case("plain")]
    #[case("quote'd")]
    #[case("both\"and'")]
    #[case("]|//*[")]
    fn awkward_ids_resolve_exactly_one_element(#[case] id: &str) {
        let mut doc = Document::parse("<r><a/><b/></r>").expect("parse");
        let target = doc.element_children(doc.root_element()).nth(1).expect("b");
        doc.element_mut(target).expect("element").set_attribute("id", id);

        let found = select(&doc, &id_query(id)).expect("select");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].node(), target);
    }
}
