// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Proteus: a transactional edit engine for diagram XML documents.
//!
//! Callers locate nodes by id or query, apply ordered batches of structural edits atomically,
//! and commit the result through a host that may reject it and trigger a rollback. Every
//! capability runs through one tool pipeline, serialized by a single-flight queue.

pub mod batch;
pub mod config;
pub mod error;
pub mod mcp;
pub mod model;
pub mod ops;
pub mod query;
pub mod store;
pub mod tools;
