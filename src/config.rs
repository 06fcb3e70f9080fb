//! Options snapshot consumed by the transport and the control router.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::hooks::{HookEvent, HookMatcher};
use crate::mcp::SdkMcpServer;
use crate::permission::{CanUseToolHandle, PermissionMode};

/// Source of configuration settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingSource {
    User,
    Project,
    Local,
}

impl SettingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingSource::User => "user",
            SettingSource::Project => "project",
            SettingSource::Local => "local",
        }
    }
}

/// Preset system prompt configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemPromptPreset {
    #[serde(rename = "type")]
    pub kind: SystemPromptPresetType,
    pub preset: SystemPromptPresetName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append: Option<String>,
}

/// Type discriminator for system prompt presets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SystemPromptPresetType {
    #[serde(rename = "preset")]
    Preset,
}

/// Supported preset names.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SystemPromptPresetName {
    #[serde(rename = "claude_code")]
    ClaudeCode,
}

/// Representation of the system prompt option supplied to the SDK.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Preset(SystemPromptPreset),
}

impl SystemPrompt {
    /// The `claude_code` preset with extra instructions appended.
    pub fn preset_with_append(append: impl Into<String>) -> Self {
        SystemPrompt::Preset(SystemPromptPreset {
            kind: SystemPromptPresetType::Preset,
            preset: SystemPromptPresetName::ClaudeCode,
            append: Some(append.into()),
        })
    }
}

/// Agent definition configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDefinition {
    pub description: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpStdioServerConfig {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpRemoteServerConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

/// In-process server relayed over `mcp_message` control requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpSdkServerConfig {
    pub name: String,
    /// Local handle, never sent to the CLI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<Value>,
}

/// Union of supported MCP server configurations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum McpServerConfig {
    #[serde(rename = "stdio")]
    Stdio(McpStdioServerConfig),
    #[serde(rename = "sse")]
    Sse(McpRemoteServerConfig),
    #[serde(rename = "http")]
    Http(McpRemoteServerConfig),
    #[serde(rename = "sdk")]
    Sdk(McpSdkServerConfig),
}

/// Representation of MCP server configuration input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum McpServers {
    Map(BTreeMap<String, McpServerConfig>),
    Path(PathBuf),
    Inline(String),
}

impl Default for McpServers {
    fn default() -> Self {
        Self::Map(BTreeMap::new())
    }
}

impl McpServers {
    pub fn is_empty(&self) -> bool {
        match self {
            McpServers::Map(map) => map.is_empty(),
            McpServers::Path(_) => false,
            McpServers::Inline(raw) => raw.is_empty(),
        }
    }
}

/// Callback invoked when the CLI writes to stderr.
pub type StderrCallback = Arc<dyn Fn(&str) + Send + Sync + 'static>;

/// Rejected option combinations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("cannot use both resume and continue_conversation options")]
    ConflictingSessionOptions,
    #[error("working directory does not exist: {}", .0.display())]
    MissingCwd(PathBuf),
    #[error("CLI path does not exist: {}", .0.display())]
    MissingCliPath(PathBuf),
    #[error("invalid permission mode: {0}")]
    InvalidPermissionMode(String),
    #[error("can_use_tool callback cannot be used with permission_prompt_tool_name")]
    ConflictingPermissionPrompt,
    #[error("can_use_tool callback requires a streaming prompt")]
    PermissionCallbackRequiresStreaming,
}

/// Query options for Claude SDK.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClaudeAgentOptions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<SystemPrompt>,
    pub mcp_servers: McpServers,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,
    pub continue_conversation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disallowed_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_prompt_tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add_dirs: Vec<PathBuf>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Extra CLI flags; a `None` value emits a bare `--key`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_args: BTreeMap<String, Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_buffer_size: Option<usize>,
    #[serde(skip)]
    pub stderr: Option<StderrCallback>,
    #[serde(skip)]
    pub can_use_tool: Option<CanUseToolHandle>,
    #[serde(skip)]
    pub hooks: Option<BTreeMap<HookEvent, Vec<HookMatcher>>>,
    #[serde(skip)]
    pub sdk_servers: HashMap<String, Arc<dyn SdkMcpServer>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub include_partial_messages: bool,
    pub fork_session: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<BTreeMap<String, AgentDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setting_sources: Option<Vec<SettingSource>>,
    /// How long an outbound control request waits for its response.
    #[serde(skip)]
    pub control_request_timeout: Option<Duration>,
}

impl ClaudeAgentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the option combinations the CLI would reject.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.continue_conversation && self.resume.is_some() {
            return Err(OptionsError::ConflictingSessionOptions);
        }

        if let Some(cwd) = self.cwd.as_ref() {
            if !cwd.is_dir() {
                return Err(OptionsError::MissingCwd(cwd.clone()));
            }
        }

        if let Some(cli_path) = self.cli_path.as_ref() {
            if !cli_path.exists() {
                return Err(OptionsError::MissingCliPath(cli_path.clone()));
            }
        }

        Ok(())
    }

    /// Directory the CLI runs in: `cwd` or the current process directory.
    pub fn working_directory(&self) -> Option<PathBuf> {
        self.cwd
            .clone()
            .or_else(|| std::env::current_dir().ok())
    }

    /// Register an SDK MCP server instance that will be hosted in-process.
    pub fn add_sdk_server(&mut self, server: Arc<dyn SdkMcpServer>) {
        let name = server.name().to_string();
        self.sdk_servers.insert(name.clone(), server);

        let mut map = match std::mem::take(&mut self.mcp_servers) {
            McpServers::Map(map) => map,
            McpServers::Path(_) | McpServers::Inline(_) => BTreeMap::new(),
        };

        map.insert(
            name.clone(),
            McpServerConfig::Sdk(McpSdkServerConfig {
                name,
                instance: None,
            }),
        );

        self.mcp_servers = McpServers::Map(map);
    }

    pub fn with_allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_disallowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disallowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: SystemPrompt) -> Self {
        self.system_prompt = Some(system_prompt);
        self
    }

    pub fn with_permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = Some(mode);
        self
    }

    pub fn with_continue_conversation(mut self, continue_conversation: bool) -> Self {
        self.continue_conversation = continue_conversation;
        self
    }

    pub fn with_resume(mut self, session_id: impl Into<String>) -> Self {
        self.resume = Some(session_id.into());
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_permission_prompt_tool_name(mut self, name: impl Into<String>) -> Self {
        self.permission_prompt_tool_name = Some(name.into());
        self
    }

    /// Relative paths are resolved against the current directory.
    pub fn with_cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(absolutize(cwd.as_ref()));
        self
    }

    /// Relative paths are resolved against the current directory.
    pub fn with_cli_path(mut self, cli_path: impl AsRef<Path>) -> Self {
        self.cli_path = Some(absolutize(cli_path.as_ref()));
        self
    }

    pub fn with_settings(mut self, settings: impl Into<String>) -> Self {
        self.settings = Some(settings.into());
        self
    }

    pub fn with_add_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.add_dirs.push(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_extra_arg(mut self, flag: impl Into<String>, value: Option<String>) -> Self {
        self.extra_args.insert(flag.into(), value);
        self
    }

    pub fn with_max_buffer_size(mut self, bytes: usize) -> Self {
        self.max_buffer_size = Some(bytes);
        self
    }

    pub fn with_stderr<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.stderr = Some(Arc::new(callback));
        self
    }

    pub fn with_can_use_tool(mut self, callback: CanUseToolHandle) -> Self {
        self.can_use_tool = Some(callback);
        self
    }

    pub fn with_hook(mut self, event: HookEvent, matcher: HookMatcher) -> Self {
        self.hooks
            .get_or_insert_with(BTreeMap::new)
            .entry(event)
            .or_default()
            .push(matcher);
        self
    }

    pub fn with_agent(mut self, name: impl Into<String>, agent: AgentDefinition) -> Self {
        self.agents
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), agent);
        self
    }

    pub fn with_mcp_server(mut self, name: impl Into<String>, config: McpServerConfig) -> Self {
        let mut map = match std::mem::take(&mut self.mcp_servers) {
            McpServers::Map(map) => map,
            McpServers::Path(_) | McpServers::Inline(_) => BTreeMap::new(),
        };
        map.insert(name.into(), config);
        self.mcp_servers = McpServers::Map(map);
        self
    }

    pub fn with_sdk_server(mut self, server: Arc<dyn SdkMcpServer>) -> Self {
        self.add_sdk_server(server);
        self
    }

    pub fn with_setting_sources(mut self, sources: Vec<SettingSource>) -> Self {
        self.setting_sources = Some(sources);
        self
    }

    pub fn with_include_partial_messages(mut self, include: bool) -> Self {
        self.include_partial_messages = include;
        self
    }

    pub fn with_fork_session(mut self, fork: bool) -> Self {
        self.fork_session = fork;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_control_request_timeout(mut self, timeout: Duration) -> Self {
        self.control_request_timeout = Some(timeout);
        self
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(dir) => dir.join(path),
        Err(_) => path.to_path_buf(),
    }
}

impl std::fmt::Debug for ClaudeAgentOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeAgentOptions")
            .field("allowed_tools", &self.allowed_tools)
            .field("system_prompt", &self.system_prompt)
            .field("mcp_servers", &self.mcp_servers)
            .field("permission_mode", &self.permission_mode)
            .field("continue_conversation", &self.continue_conversation)
            .field("resume", &self.resume)
            .field("max_turns", &self.max_turns)
            .field("disallowed_tools", &self.disallowed_tools)
            .field("model", &self.model)
            .field(
                "permission_prompt_tool_name",
                &self.permission_prompt_tool_name,
            )
            .field("cwd", &self.cwd)
            .field("cli_path", &self.cli_path)
            .field("settings", &self.settings)
            .field("add_dirs", &self.add_dirs)
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .field("extra_args", &self.extra_args)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("has_stderr", &self.stderr.is_some())
            .field("has_can_use_tool", &self.can_use_tool.is_some())
            .field("hooks_registered", &self.hooks.as_ref().map(|h| h.len()))
            .field("sdk_servers", &self.sdk_servers.len())
            .field("user", &self.user)
            .field("include_partial_messages", &self.include_partial_messages)
            .field("fork_session", &self.fork_session)
            .field("agents", &self.agents)
            .field("setting_sources", &self.setting_sources)
            .field("control_request_timeout", &self.control_request_timeout)
            .finish()
    }
}
