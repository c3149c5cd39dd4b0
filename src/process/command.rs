//! Script invocation building.
//!
//! A [`ScriptInvocation`] describes one `<manager> run <script> -- <args>`
//! call and knows how to turn itself into a [`tokio::process::Command`] that
//! runs through the host shell with all stdio piped.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use super::error::SupervisorError;

/// Package manager used when none is configured.
pub const DEFAULT_MANAGER: &str = "npm";

/// Shell interpreter used to run the manager command.
///
/// Going through the shell lets wrapper scripts such as `npm.cmd` or
/// `pnpm` shims resolve the same way they do in a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shell {
    program: String,
    flag: String,
}

impl Shell {
    #[must_use]
    pub fn new(program: impl Into<String>, flag: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            flag: flag.into(),
        }
    }

    /// `cmd /c` on Windows, `sh -c` elsewhere.
    #[must_use]
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self::new("cmd", "/c")
        } else {
            Self::new("sh", "-c")
        }
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn flag(&self) -> &str {
        &self.flag
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::platform_default()
    }
}

/// Builder describing a package-manager script run.
#[derive(Debug, Clone)]
pub struct ScriptInvocation {
    working_dir: PathBuf,
    script: String,
    arguments: Option<String>,
    env: BTreeMap<String, String>,
    manager: String,
    shell: Shell,
}

impl ScriptInvocation {
    /// Describe a run of `script` from `working_dir` using the default manager.
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>, script: impl Into<String>) -> Self {
        Self {
            working_dir: working_dir.into(),
            script: script.into(),
            arguments: None,
            env: BTreeMap::new(),
            manager: DEFAULT_MANAGER.to_string(),
            shell: Shell::default(),
        }
    }

    /// Extra arguments passed to the script after the `--` separator.
    ///
    /// The string is appended verbatim, so shell quoting is the caller's.
    #[must_use]
    pub fn arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = Some(arguments.into());
        self
    }

    /// Override one environment variable in the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Override several environment variables in the child.
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set the package manager command (e.g. `npm`, `yarn`, `pnpm`).
    #[must_use]
    pub fn manager(mut self, manager: impl Into<String>) -> Self {
        self.manager = manager.into();
        self
    }

    /// Override the shell interpreter.
    #[must_use]
    pub fn shell(mut self, shell: Shell) -> Self {
        self.shell = shell;
        self
    }

    #[must_use]
    pub fn get_working_dir(&self) -> &Path {
        &self.working_dir
    }

    #[must_use]
    pub fn get_script(&self) -> &str {
        &self.script
    }

    #[must_use]
    pub fn get_arguments(&self) -> Option<&str> {
        self.arguments.as_deref()
    }

    #[must_use]
    pub fn get_env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    #[must_use]
    pub fn get_manager(&self) -> &str {
        &self.manager
    }

    #[must_use]
    pub fn get_shell(&self) -> &Shell {
        &self.shell
    }

    /// Check that the working directory, script and manager are non-empty.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::InvalidArgument` naming the first empty field.
    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.working_dir.as_os_str().is_empty() {
            return Err(SupervisorError::InvalidArgument {
                name: "working_dir",
            });
        }
        if self.script.trim().is_empty() {
            return Err(SupervisorError::InvalidArgument { name: "script" });
        }
        if self.manager.trim().is_empty() {
            return Err(SupervisorError::InvalidArgument { name: "manager" });
        }
        Ok(())
    }

    /// The command line handed to the shell.
    #[must_use]
    pub fn command_line(&self) -> String {
        let script = shell_escape::escape(self.script.as_str().into());
        let line = format!(
            "{} run {} -- {}",
            self.manager.trim(),
            script,
            self.arguments.as_deref().unwrap_or_default()
        );
        line.trim_end().to_string()
    }

    /// Build the shell command with piped stdio, working directory and env overrides.
    #[must_use]
    pub fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.shell.program);

        #[cfg(windows)]
        cmd.raw_arg(format!("{} {}", self.shell.flag, self.command_line()));

        #[cfg(not(windows))]
        cmd.arg(&self.shell.flag).arg(self.command_line());

        cmd.current_dir(&self.working_dir)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }

    /// The PATH the child will see: the override if set, else the inherited one.
    #[must_use]
    pub fn effective_path(&self) -> Option<String> {
        self.env
            .get("PATH")
            .cloned()
            .or_else(|| std::env::var("PATH").ok())
    }

    /// The executable the manager command starts, if it can be checked up front.
    ///
    /// Leading `NAME=value` assignments are skipped. Returns `None` when the
    /// command starts with a shell builtin or cannot be split, in which case
    /// only the shell can tell whether it runs.
    #[must_use]
    pub fn manager_executable(&self) -> Option<String> {
        let words = shell_words::split(&self.manager).ok()?;
        let word = words.into_iter().find(|w| !is_env_assignment(w))?;
        (!SHELL_BUILTINS.contains(&word.as_str())).then_some(word)
    }

    /// Locate the manager executable before spawning.
    ///
    /// The shell would start fine even when the manager is missing and only
    /// fail later with exit code 127, so the lookup is done up front.
    /// Returns `Ok(None)` when the command is left to the shell to resolve.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::ProcessLaunch` if the executable cannot be found.
    pub fn resolve_manager(&self) -> Result<Option<PathBuf>, SupervisorError> {
        let Some(executable) = self.manager_executable() else {
            tracing::debug!(manager = %self.manager.trim(), "Manager left to the shell to resolve");
            return Ok(None);
        };
        let path_var = self.effective_path().unwrap_or_default();

        match resolve_executable(&executable, &self.working_dir, &path_var) {
            Some(path) => Ok(Some(path)),
            None => Err(self.launch_error(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("'{executable}' was not found"),
            ))),
        }
    }

    /// Wrap a spawn failure with the PATH diagnostic.
    #[must_use]
    pub fn launch_error(&self, source: std::io::Error) -> SupervisorError {
        SupervisorError::ProcessLaunch {
            command: self.manager.trim().to_string(),
            path: self.effective_path().unwrap_or_default(),
            source,
        }
    }
}

/// Words that run something other than an executable on PATH.
const SHELL_BUILTINS: &[&str] = &[
    ".", "builtin", "call", "command", "eval", "exec", "source", "start", "time",
];

/// Whether `word` is a `NAME=value` prefix assignment.
fn is_env_assignment(word: &str) -> bool {
    let Some((name, _)) = word.split_once('=') else {
        return false;
    };
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Resolve an executable name against `path_var`.
///
/// Names containing a path separator are resolved against `base_dir`
/// instead of being searched on PATH.
#[must_use]
pub fn resolve_executable(name: &str, base_dir: &Path, path_var: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    let path = Path::new(name);
    if path.components().count() > 1 || path.is_absolute() {
        let full = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        };
        return candidates(&full).into_iter().find(|p| p.is_file());
    }

    std::env::split_paths(OsStr::new(path_var))
        .flat_map(|dir| candidates(&dir.join(name)))
        .find(|candidate| candidate.is_file())
}

fn candidates(base: &Path) -> Vec<PathBuf> {
    let mut out = vec![base.to_path_buf()];
    if cfg!(windows) && base.extension().is_none() {
        for ext in ["exe", "cmd", "bat"] {
            out.push(base.with_extension(ext));
        }
    }
    out
}
