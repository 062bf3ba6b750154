// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Model Context Protocol (MCP) bridge.
//!
//! Exposes the diagram capabilities to remote agents. Every call is routed through the serial
//! queue, so MCP clients and in-process callers never mutate the document concurrently.

mod server;
mod types;

pub use server::ProteusMcp;
pub use types::McpFailure;
