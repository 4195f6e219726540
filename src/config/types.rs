use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub credentials: CredentialConfig,
    #[serde(default)]
    pub content: ContentConfig,
}

/// Which shell to drive and how long to wait for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Shell binary, resolved through `PATH` (default: "bash").
    #[serde(default = "default_shell_path")]
    pub path: String,
    /// Init file passed to the shell at startup. When unset, a generated
    /// rc file is used that sources the system and user rc files.
    #[serde(default)]
    pub init_file: Option<PathBuf>,
    /// Seconds to wait for the first prompt after a (re)start (default: 10).
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
    /// Seconds to wait for a prompt during bookkeeping commands (default: 30).
    #[serde(default = "default_prompt_timeout")]
    pub prompt_timeout_secs: u64,
}

/// Interactive-secret handling for privilege-class commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Off by default; when off, privilege-class commands run as ordinary
    /// commands and no secret is ever requested.
    #[serde(default)]
    pub enabled: bool,
    /// Seconds for the first wait in the credential exchange (default: 5).
    /// Subsequent waits are unbounded.
    #[serde(default = "default_first_prompt_timeout")]
    pub first_prompt_timeout_secs: u64,
    /// Milliseconds per best-effort wait that absorbs residual banner text
    /// after an authentication verdict (default: 300).
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,
}

/// Rich-content extraction settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Directory under which decoded payload files are deleted after
    /// reading. Defaults to `$TMPDIR`, then `/tmp`.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

fn default_shell_path() -> String {
    "bash".to_string()
}

fn default_startup_timeout() -> u64 {
    10
}

fn default_prompt_timeout() -> u64 {
    30
}

fn default_first_prompt_timeout() -> u64 {
    5
}

fn default_settle_timeout_ms() -> u64 {
    300
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            path: default_shell_path(),
            init_file: None,
            startup_timeout_secs: default_startup_timeout(),
            prompt_timeout_secs: default_prompt_timeout(),
        }
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            first_prompt_timeout_secs: default_first_prompt_timeout(),
            settle_timeout_ms: default_settle_timeout_ms(),
        }
    }
}
