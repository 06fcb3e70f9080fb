//! Environment helpers: `.env` loading and the variables the SDK exports or reads.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use crate::config::ClaudeAgentOptions;

/// Identifies the SDK flavour to the CLI.
pub const ENTRYPOINT_VAR: &str = "CLAUDE_CODE_ENTRYPOINT";
/// Version of this crate, exported to the CLI.
pub const SDK_VERSION_VAR: &str = "CLAUDE_AGENT_SDK_VERSION";
/// Any non-empty value disables the CLI version probe.
pub const SKIP_VERSION_CHECK_VAR: &str = "CLAUDE_AGENT_SDK_SKIP_VERSION_CHECK";

const ANTHROPIC_VARS: [&str; 3] = ["ANTHROPIC_API_KEY", "ANTHROPIC_BASE_URL", "ANTHROPIC_MODEL"];

/// Loads environment variables from a .env file in the specified directory.
/// Falls back to the current directory if no path is provided.
///
/// Variables are loaded into the process environment and the ANTHROPIC_* subset
/// is returned, ready for `ClaudeAgentOptions::env`.
///
/// # Example
/// ```no_run
/// use claude_agent_sdk::env::load_env;
///
/// let env_vars = load_env(None).unwrap();
/// let project_vars = load_env(Some(std::path::Path::new("/path/to/project"))).unwrap();
/// ```
pub fn load_env(dir: Option<&Path>) -> Result<HashMap<String, String>, EnvError> {
    let env_path = match dir {
        Some(d) => d.join(".env"),
        None => std::env::current_dir()?.join(".env"),
    };

    if env_path.exists() {
        dotenvy::from_path(&env_path)?;
    }

    Ok(get_anthropic_env())
}

/// Returns the ANTHROPIC_* variables present in the process environment.
pub fn get_anthropic_env() -> HashMap<String, String> {
    ANTHROPIC_VARS
        .iter()
        .filter_map(|name| {
            std::env::var(name)
                .ok()
                .map(|value| (name.to_string(), value))
        })
        .collect()
}

/// Creates options whose `env` carries the credentials loaded from `.env`.
///
/// # Example
/// ```no_run
/// use claude_agent_sdk::env::options_from_env;
///
/// let options = options_from_env(None).unwrap();
/// ```
pub fn options_from_env(dir: Option<&Path>) -> Result<ClaudeAgentOptions, EnvError> {
    let env_vars = load_env(dir)?;

    let mut options = ClaudeAgentOptions {
        env: env_vars,
        ..Default::default()
    };

    if let Ok(model) = std::env::var("ANTHROPIC_MODEL") {
        options.model = Some(model);
    }

    Ok(options)
}

/// Whether the parent environment asks to skip the CLI version probe.
pub fn skip_version_check() -> bool {
    std::env::var_os(SKIP_VERSION_CHECK_VAR).is_some_and(|value| !value.is_empty())
}

/// Errors that can occur when loading environment configuration.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] dotenvy::Error),
}
