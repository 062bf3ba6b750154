// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Engine configuration: defaults, an optional JSON file, then `PROTEUS_*` environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Slack added on top of the worst-case sum of an edit's sequential host steps.
pub const EDIT_TIMEOUT_MARGIN_MS: u64 = 1_000;

/// Host round trips an edit may perform in sequence: fetch, snapshot, persist, rollback persist.
const EDIT_HOST_STEPS: u64 = 4;

const ENV_PREFIX: &str = "PROTEUS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub read_timeout_ms: u64,
    /// Derived from the host timeouts when unset.
    pub edit_timeout_ms: Option<u64>,
    pub host_io_timeout_ms: u64,
    /// How long a write waits for an external accept/reject verdict before assuming acceptance.
    pub acceptance_wait_ms: u64,
    pub drain_timeout_ms: u64,
    /// Append a rendering of the structured detail to failure messages.
    pub augment_failure_messages: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 10_000,
            edit_timeout_ms: None,
            host_io_timeout_ms: 5_000,
            acceptance_wait_ms: 3_000,
            drain_timeout_ms: 30_000,
            augment_failure_messages: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("config file {path:?} does not exist")]
    MissingFile { path: PathBuf },
    #[error("`{field}` must be greater than zero")]
    Zero { field: &'static str },
    #[error(
        "edit_timeout_ms ({configured}) must be at least {required} ms: 4 host round trips plus the acceptance wait plus {EDIT_TIMEOUT_MARGIN_MS} ms"
    )]
    EditTimeoutTooShort { configured: u64, required: u64 },
}

impl EngineConfig {
    /// Loads defaults, then `path` (JSON) if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`EngineConfig::load`], but reads overrides from `env` instead of the process
    /// environment when provided.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::MissingFile { path: path.to_path_buf() });
            }
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Json));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .try_parsing(true)
                .source(env),
        );

        let loaded: EngineConfig = builder.build()?.try_deserialize()?;
        loaded.validated()
    }

    /// Checks limits and fills in the derived edit timeout.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        for (field, value) in [
            ("read_timeout_ms", self.read_timeout_ms),
            ("host_io_timeout_ms", self.host_io_timeout_ms),
            ("drain_timeout_ms", self.drain_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }

        let required = self.edit_budget_ms().saturating_add(EDIT_TIMEOUT_MARGIN_MS);
        match self.edit_timeout_ms {
            Some(configured) if configured < required => {
                return Err(ConfigError::EditTimeoutTooShort { configured, required });
            }
            Some(_) => {}
            None => self.edit_timeout_ms = Some(required),
        }
        Ok(self)
    }

    /// Worst case of an edit's sequential sub-steps, without margin.
    pub fn edit_budget_ms(&self) -> u64 {
        self.host_io_timeout_ms
            .saturating_mul(EDIT_HOST_STEPS)
            .saturating_add(self.acceptance_wait_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn edit_timeout(&self) -> Duration {
        let derived = self.edit_budget_ms().saturating_add(EDIT_TIMEOUT_MARGIN_MS);
        Duration::from_millis(self.edit_timeout_ms.unwrap_or(derived))
    }

    pub fn host_io_timeout(&self) -> Duration {
        Duration::from_millis(self.host_io_timeout_ms)
    }

    pub fn acceptance_wait(&self) -> Duration {
        Duration::from_millis(self.acceptance_wait_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
