// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Proteus CLI entrypoint.
//!
//! Serves one diagram file over MCP stdio. Logs go to stderr (`PROTEUS_LOG`, default `info`) so
//! stdout stays reserved for the protocol.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use proteus::config::EngineConfig;
use proteus::error::ToolResult;
use proteus::mcp::ProteusMcp;
use proteus::store::{ChangeFeed, FileDocumentHost, WriteBackCoordinator, WriteDurability};
use proteus::tools::{register_diagram_tools, CapabilityRegistry, SerialQueue, ToolCall, ToolPipeline};
use tracing_subscriber::EnvFilter;

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} <document> [--config <path>] [--durable-writes]\n\nServes the diagram file over MCP stdio (tools: diagram.read, diagram.edit_batch).\n--config loads engine settings from a JSON file; PROTEUS_* environment variables override it.\n--durable-writes opts into slower, best-effort durable persistence (fsync/sync where supported).\nPROTEUS_LOG sets the log filter (default: info); logs are written to stderr."
    );
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct CliOptions {
    document: Option<PathBuf>,
    config: Option<PathBuf>,
    durable_writes: bool,
}

fn parse_options(mut args: impl Iterator<Item = String>) -> Result<CliOptions, ()> {
    let mut options = CliOptions::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                if options.config.is_some() {
                    return Err(());
                }
                options.config = Some(PathBuf::from(args.next().ok_or(())?));
            }
            "--durable-writes" => {
                if options.durable_writes {
                    return Err(());
                }
                options.durable_writes = true;
            }
            _ if arg.starts_with('-') => return Err(()),
            _ => {
                if options.document.is_some() {
                    return Err(());
                }
                options.document = Some(PathBuf::from(arg));
            }
        }
    }

    if options.document.is_none() {
        return Err(());
    }
    Ok(options)
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("PROTEUS_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

async fn serve(document: PathBuf, config: EngineConfig, durability: WriteDurability) -> Result<(), Box<dyn Error>> {
    let host = Arc::new(FileDocumentHost::new(document).with_durability(durability));
    let coordinator = Arc::new(
        WriteBackCoordinator::new(host, Arc::new(ChangeFeed::new()))
            .with_timeouts(config.host_io_timeout(), config.acceptance_wait()),
    );

    let mut registry = CapabilityRegistry::new();
    register_diagram_tools(&mut registry, coordinator, &config);
    let pipeline = ToolPipeline::new(registry)
        .with_augmented_messages(config.augment_failure_messages)
        .with_reporter(Arc::new(|call: &ToolCall, result: &ToolResult| -> anyhow::Result<()> {
            tracing::info!(call_id = %call.id, capability = %call.name, success = result.is_success(), "tool.result");
            Ok(())
        }));
    let queue = Arc::new(SerialQueue::new(Arc::new(pipeline)));

    ProteusMcp::new(Arc::clone(&queue)).serve_stdio().await?;

    if let Err(err) = queue.drain(config.drain_timeout()).await {
        tracing::warn!(error = %err, "shutting down with calls still in flight");
        queue.abort_current();
    }
    Ok(())
}

fn main() {
    let result = (|| -> Result<(), Box<dyn Error>> {
        let mut args = std::env::args();
        let program = args.next().unwrap_or_else(|| "proteus".to_owned());

        let options = match parse_options(args) {
            Ok(options) => options,
            Err(()) => {
                print_usage(&program);
                std::process::exit(2);
            }
        };
        init_logging();

        let config = EngineConfig::load(options.config.as_deref())?;
        let durability =
            if options.durable_writes { WriteDurability::Durable } else { WriteDurability::BestEffort };
        let Some(document) = options.document else {
            print_usage(&program);
            std::process::exit(2);
        };
        if !document.is_file() {
            return Err(format!("document {} does not exist", document.display()).into());
        }

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        runtime.block_on(serve(document, config, durability))
    })();

    if let Err(err) = result {
        eprintln!("proteus: {err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{parse_options, CliOptions};

    fn args(values: &[&str]) -> impl Iterator<Item = String> {
        values.iter().map(|value| (*value).to_owned()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn parses_document_and_flags_in_any_order() {
        let options = parse_options(args(&["--durable-writes", "d.drawio", "--config", "c.json"]))
            .expect("parse options");
        assert_eq!(
            options,
            CliOptions {
                document: Some(PathBuf::from("d.drawio")),
                config: Some(PathBuf::from("c.json")),
                durable_writes: true,
            }
        );
    }

    #[test]
    fn requires_a_document() {
        parse_options(args(&[])).unwrap_err();
        parse_options(args(&["--durable-writes"])).unwrap_err();
    }

    #[test]
    fn rejects_unknown_duplicate_and_dangling_args() {
        parse_options(args(&["d.drawio", "--nope"])).unwrap_err();
        parse_options(args(&["a.drawio", "b.drawio"])).unwrap_err();
        parse_options(args(&["d.drawio", "--durable-writes", "--durable-writes"])).unwrap_err();
        parse_options(args(&["d.drawio", "--config"])).unwrap_err();
    }
}
