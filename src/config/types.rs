//! Configuration types.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::process::{ScriptInvocation, TerminationMode, DEFAULT_MANAGER};

/// How the script process is stopped on disposal or cancellation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminationKind {
    #[default]
    Force,
    Graceful,
}

/// Runner configuration loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Package manager command (`npm`, `yarn`, `pnpm`, ...).
    pub manager: String,
    /// Directory containing `package.json`. Defaults to the current directory.
    pub working_dir: Option<PathBuf>,
    /// Environment overrides applied on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Termination strategy.
    pub termination: TerminationKind,
    /// SIGTERM grace period for `graceful` termination.
    pub grace_period_ms: u64,
    /// How long output readers may drain after the process is killed.
    pub drain_timeout_ms: u64,
}

fn default_grace_period_ms() -> u64 {
    5000
}

fn default_drain_timeout_ms() -> u64 {
    2000
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            manager: DEFAULT_MANAGER.to_string(),
            working_dir: None,
            env: BTreeMap::new(),
            termination: TerminationKind::default(),
            grace_period_ms: default_grace_period_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn termination_mode(&self) -> TerminationMode {
        match self.termination {
            TerminationKind::Force => TerminationMode::Force,
            TerminationKind::Graceful => {
                TerminationMode::Graceful(Duration::from_millis(self.grace_period_ms))
            }
        }
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Build an invocation of `script` using the configured manager and env.
    #[must_use]
    pub fn invocation(&self, working_dir: PathBuf, script: &str) -> ScriptInvocation {
        ScriptInvocation::new(working_dir, script)
            .manager(self.manager.clone())
            .envs(self.env.clone())
    }
}
