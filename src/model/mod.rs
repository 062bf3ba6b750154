// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Core data model: the parsed document tree, its pages, and typed identifiers.

pub mod document;
pub mod ids;
pub mod pages;

pub use document::{Document, DocumentError, Element, NodeId, NodeKind, TreeError};
pub use ids::{CallId, Id, IdError, RequestId};
pub use pages::{cell_kind, list_pages, CellKind, PageIndex, PageInfo};
