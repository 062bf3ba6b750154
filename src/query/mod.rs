// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Locating nodes: the query language, locators, and page-scoped selection.

pub mod locator;
pub mod selector;
pub mod xpath;

pub use locator::{id_query, xpath_literal, Locator, LocatorError};
pub use selector::{
    describe_match, list_cells, resolve, CellInfo, MatchInfo, PageFilter, SelectError, Selection,
};
pub use xpath::{select, NodeRef, QueryError, XPath};
