//! Launch parameters for a child process.
//!
//! A [`ProcessDescriptor`] is built once, before launch, and read without
//! modification by the launcher. It can also be deserialized from the
//! `[process]` table of a config file.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Scheduling class for the worker threads serving a process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Background,
    Utility,
    #[default]
    Default,
    UserInitiated,
    UserInteractive,
}

impl Priority {
    /// Short name used in thread names and log fields.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Utility => "utility",
            Self::Default => "default",
            Self::UserInitiated => "user-initiated",
            Self::UserInteractive => "user-interactive",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "background" => Ok(Self::Background),
            "utility" => Ok(Self::Utility),
            "default" => Ok(Self::Default),
            "user-initiated" => Ok(Self::UserInitiated),
            "user-interactive" => Ok(Self::UserInteractive),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Immutable description of what to launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    path: PathBuf,
    #[serde(default)]
    args: Vec<String>,
    /// Explicit environment. `None` inherits the parent's environment.
    #[serde(default)]
    env: Option<BTreeMap<String, String>>,
    /// Working directory. `None` inherits the parent's.
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default)]
    priority: Priority,
}

impl ProcessDescriptor {
    /// Create a descriptor for the executable at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            env: None,
            cwd: None,
            priority: Priority::default(),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Replace the inherited environment with an explicit one.
    #[must_use]
    pub fn env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Set a single variable in the explicit environment.
    ///
    /// The first call switches the descriptor from an inherited to an
    /// explicit environment.
    #[must_use]
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Set the working directory for the child.
    #[must_use]
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set the priority class of the worker threads.
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn explicit_env(&self) -> Option<&BTreeMap<String, String>> {
        self.env.as_ref()
    }

    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    #[must_use]
    pub fn priority_class(&self) -> Priority {
        self.priority
    }

    /// Full argument vector, with the path as `argv[0]`.
    #[must_use]
    pub fn argv(&self) -> Vec<Vec<u8>> {
        std::iter::once(self.path.as_os_str().as_bytes().to_vec())
            .chain(self.args.iter().map(|a| a.as_bytes().to_vec()))
            .collect()
    }

    /// Environment as `KEY=VALUE` entries.
    ///
    /// Uses the explicit map when set, otherwise a snapshot of the current
    /// process environment.
    #[must_use]
    pub fn environment(&self) -> Vec<Vec<u8>> {
        match &self.env {
            Some(vars) => vars
                .iter()
                .map(|(k, v)| format!("{k}={v}").into_bytes())
                .collect(),
            None => std::env::vars_os()
                .map(|(k, v)| {
                    let mut entry = k.as_bytes().to_vec();
                    entry.push(b'=');
                    entry.extend_from_slice(v.as_bytes());
                    entry
                })
                .collect(),
        }
    }

    /// Shell-escaped command line, for logs.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.path.as_os_str())
            .chain(self.args.iter().map(OsStr::new))
            .map(|part| shell_escape::escape(Cow::Owned(part.to_string_lossy().into_owned())))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for ProcessDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (priority: {}", self.command_line(), self.priority)?;
        if let Some(cwd) = &self.cwd {
            write!(f, ", cwd: {}", cwd.display())?;
        }
        f.write_str(")")
    }
}
