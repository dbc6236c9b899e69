use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;

// ============ Python Identifier Validation ============

/// Python reserved keywords that cannot be used as identifiers
const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await",
    "break", "class", "continue", "def", "del", "elif", "else", "except",
    "finally", "for", "from", "global", "if", "import", "in", "is",
    "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

/// Validate that a string is a valid Python identifier (module name).
/// 
/// Rules:
/// - Only lowercase letters, digits, and underscores
/// - Cannot start with a digit
/// - Cannot be a Python keyword
/// - Cannot be empty
pub fn validate_python_identifier(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Python identifier cannot be empty".to_string());
    }

    // Check first character (must be letter or underscore)
    let first_char = name.chars().next().unwrap();
    if !first_char.is_ascii_lowercase() && first_char != '_' {
        return Err(format!(
            "Python identifier must start with a lowercase letter or underscore, got '{}'",
            first_char
        ));
    }

    // Check all characters (must be lowercase letters, digits, or underscores)
    for (i, c) in name.chars().enumerate() {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '_' {
            return Err(format!(
                "Python identifier can only contain lowercase letters, digits, and underscores. \
                Invalid character '{}' at position {}",
                c, i
            ));
        }
    }

    // Check for Python keywords
    if PYTHON_KEYWORDS.contains(&name) {
        return Err(format!("'{}' is a Python reserved keyword", name));
    }

    Ok(())
}

/// Convert an arbitrary string to a valid Python identifier (snake_case).
///
/// Transformations:
/// - Convert to lowercase
/// - Replace spaces, hyphens, and other separators with underscores
/// - Remove invalid characters
/// - Prepend underscore if starts with digit
/// - Handle empty result
pub fn to_python_identifier(name: &str) -> String {
    let mut result = String::new();
    let mut last_was_underscore = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            // Convert to lowercase
            for lc in c.to_lowercase() {
                result.push(lc);
            }
            last_was_underscore = false;
        } else if c == ' ' || c == '-' || c == '_' || c == '.' {
            // Replace separators with underscore (avoiding duplicates)
            if !last_was_underscore && !result.is_empty() {
                result.push('_');
                last_was_underscore = true;
            }
        }
        // Skip other characters
    }

    // Remove trailing underscores
    while result.ends_with('_') {
        result.pop();
    }

    // Handle empty result
    if result.is_empty() {
        return "module".to_string();
    }

    // Prepend underscore if starts with digit
    if result.chars().next().unwrap().is_ascii_digit() {
        result = format!("_{}", result);
    }

    // Handle Python keywords by appending underscore
    if PYTHON_KEYWORDS.contains(&result.as_str()) {
        result.push('_');
    }

    result
}

// ============ Transport Types ============

/// MCP Server transport type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Transport {
    Stdio,
    Sse { url: String },
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Stdio
    }
}

/// Configuration for a single MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub transport: Transport,
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub auto_approve_tools: bool,
    /// If true (default), tools from this server are deferred (hidden initially, discovered via tool_search)
    /// If false, tools are active (immediately visible to the model)
    #[serde(default = "default_defer_tools")]
    pub defer_tools: bool,
    /// Python module name for this server's tools (must be valid Python identifier).
    /// If not set, defaults to a sanitized version of the server id.
    /// Used for Python imports: `from {python_name} import tool_function`
    #[serde(default)]
    pub python_name: Option<String>,
}

fn default_defer_tools() -> bool {
    true
}

impl McpServerConfig {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            enabled: false,
            transport: Transport::Stdio,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            auto_approve_tools: false,
            defer_tools: true,
            python_name: None,
        }
    }

    /// Get the Python module name for this server.
    /// Returns the configured python_name, or derives one from the server id.
    pub fn get_python_name(&self) -> String {
        self.python_name
            .clone()
            .unwrap_or_else(|| to_python_identifier(&self.id))
    }

    /// Validate and set the Python module name.
    /// Returns an error if the name is not a valid Python identifier.
    pub fn set_python_name(&mut self, name: &str) -> Result<(), String> {
        validate_python_identifier(name)?;
        self.python_name = Some(name.to_string());
        Ok(())
    }
}

/// Ensure python_name is populated and sanitized from the display name.
pub fn enforce_python_name(config: &mut McpServerConfig) {
    let sanitized = to_python_identifier(&config.name);
    config.name = sanitized.clone();
    config.python_name = Some(sanitized);
}

// ============ Tool Call Formats ============

/// A text-based or native tool calling convention a model can be asked to use.
///
/// `Native` means the model's own function-calling API (OpenAI `tool_calls`,
/// or whatever `ToolFormat` the running model advertises); the other five are
/// text-embedded conventions parsed by `tool_adapters.rs`/`tool_parsing/*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallFormatName {
    Native,
    Hermes,
    Mistral,
    Pythonic,
    PureJson,
    /// Tools are materialized as Python callables inside the sandboxed executor.
    CodeMode,
}

impl Default for ToolCallFormatName {
    fn default() -> Self {
        ToolCallFormatName::Hermes
    }
}

/// Which tool call formats are enabled, and which one is tried first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFormatConfig {
    pub primary: ToolCallFormatName,
    #[serde(default = "default_enabled_formats")]
    pub enabled: Vec<ToolCallFormatName>,
}

fn default_enabled_formats() -> Vec<ToolCallFormatName> {
    vec![ToolCallFormatName::Hermes, ToolCallFormatName::PureJson]
}

impl Default for ToolCallFormatConfig {
    fn default() -> Self {
        Self {
            primary: ToolCallFormatName::default(),
            enabled: default_enabled_formats(),
        }
    }
}

impl ToolCallFormatConfig {
    /// Whether a format is in the enabled list.
    pub fn is_enabled(&self, format: ToolCallFormatName) -> bool {
        self.enabled.contains(&format)
    }

    /// Dedupe `enabled` and make sure `primary` is a member of it.
    ///
    /// Settings can be edited from the UI or CLI independently, so after any
    /// mutation we reconcile them rather than trusting the caller.
    pub fn normalize(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.enabled.retain(|f| seen.insert(*f));

        if self.enabled.is_empty() {
            self.enabled.push(self.primary);
        } else if !self.enabled.contains(&self.primary) {
            self.enabled.insert(0, self.primary);
        }
    }

    /// Resolve which format should actually be advertised in the system prompt
    /// for this turn, falling back off `primary` when it can't be honored.
    ///
    /// `CodeMode` needs the Python sandbox available; `Native` needs the model
    /// to actually support tool calling. When the chosen format isn't usable,
    /// fall back to the first other enabled format, preferring `Hermes` as a
    /// last resort since every text-based model family understands it.
    pub fn resolve_primary_for_prompt(
        &self,
        code_mode_available: bool,
        native_available: bool,
    ) -> ToolCallFormatName {
        let usable = |fmt: &ToolCallFormatName| match fmt {
            ToolCallFormatName::CodeMode => code_mode_available,
            ToolCallFormatName::Native => native_available,
            _ => true,
        };

        if usable(&self.primary) {
            return self.primary;
        }

        self.enabled
            .iter()
            .find(|f| usable(f))
            .copied()
            .unwrap_or(ToolCallFormatName::Hermes)
    }
}

// ============ Chat Wire Format ============

/// Which Foundry-local HTTP endpoint a chat request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatFormatName {
    /// `/v1/chat/completions`
    OpenaiCompletions,
    /// `/v1/responses` - only used when the selected model advertises support
    OpenaiResponses,
}

impl Default for ChatFormatName {
    fn default() -> Self {
        ChatFormatName::OpenaiCompletions
    }
}

// ============ Database Toolbox ============

/// Database engine behind a configured `DatabaseSourceConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportedDatabaseKind {
    Postgres,
    Mysql,
    Sqlite,
    Bigquery,
    Spanner,
}

impl SupportedDatabaseKind {
    /// The MCP tool name this database kind's server exposes for running SQL.
    pub fn execute_tool_name(&self) -> &'static str {
        match self {
            SupportedDatabaseKind::Postgres => "query",
            SupportedDatabaseKind::Mysql => "query",
            SupportedDatabaseKind::Sqlite => "read_query",
            SupportedDatabaseKind::Bigquery => "execute-sql",
            SupportedDatabaseKind::Spanner => "execute_sql",
        }
    }
}

/// A single database connection, backed by an MCP server under the hood.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSourceConfig {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub kind: SupportedDatabaseKind,
    #[serde(default)]
    pub transport: Transport,
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub auto_approve_tools: bool,
    #[serde(default = "default_defer_tools")]
    pub defer_tools: bool,
    /// Required for BigQuery; used to qualify fully-qualified table names.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Restrict schema discovery to these datasets/schemas when set.
    #[serde(default)]
    pub dataset_allowlist: Option<Vec<String>>,
    /// Restrict schema discovery to these tables when set.
    #[serde(default)]
    pub table_allowlist: Option<Vec<String>>,
}

impl DatabaseSourceConfig {
    /// SQL dialect name used for prompt text and cached schema metadata.
    pub fn get_sql_dialect(&self) -> &'static str {
        match self.kind {
            SupportedDatabaseKind::Postgres => "PostgreSQL",
            SupportedDatabaseKind::Mysql => "MySQL",
            SupportedDatabaseKind::Sqlite => "SQLite",
            SupportedDatabaseKind::Bigquery => "BigQuery Standard SQL",
            SupportedDatabaseKind::Spanner => "Cloud Spanner SQL",
        }
    }
}

/// Global database toolbox configuration: `search_schemas`/`execute_sql`
/// built-ins operate over whichever sources are enabled here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseToolboxConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub sources: Vec<DatabaseSourceConfig>,
}

/// One column of a cached table schema, used to build embedding text and
/// prompt context for the database toolbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedColumnSchema {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub description: Option<String>,
    #[serde(default)]
    pub special_attributes: Vec<String>,
    #[serde(default)]
    pub top_values: Vec<String>,
}

/// A cached table schema (one row vectorized into `schema_search`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTableSchema {
    pub fully_qualified_name: String,
    pub source_id: String,
    pub kind: SupportedDatabaseKind,
    pub sql_dialect: String,
    #[serde(default = "default_table_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub columns: Vec<CachedColumnSchema>,
    #[serde(default)]
    pub primary_keys: Vec<String>,
    #[serde(default)]
    pub partition_columns: Vec<String>,
    #[serde(default)]
    pub cluster_columns: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_table_enabled() -> bool {
    true
}

/// One table a chat always has attached, regardless of user action this turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlwaysOnTableConfig {
    pub source_id: String,
    pub table_fq_name: String,
}

// ============ Application Settings ============

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
    /// Optional system prompt snippets keyed by "{server_id}::{tool_name}".
    /// Use "builtin" as server_id for built-in tools.
    #[serde(default)]
    pub tool_system_prompts: HashMap<String, String>,
    /// Whether the python_execution built-in tool is enabled (disabled by default).
    /// When enabled, models can execute Python code in a sandboxed environment.
    /// Renamed from code_execution_enabled - alias preserved for backwards compatibility.
    #[serde(default, alias = "code_execution_enabled")]
    pub python_execution_enabled: bool,
    /// Whether Python code can itself call discovered MCP tools.
    #[serde(default)]
    pub python_tool_calling_enabled: bool,
    /// Whether the tool_search built-in (discovers deferred MCP tools) is enabled.
    #[serde(default)]
    pub tool_search_enabled: bool,
    /// Whether the search_schemas built-in is enabled.
    #[serde(default)]
    pub search_schemas_enabled: bool,
    /// Whether the execute_sql built-in is enabled.
    #[serde(default)]
    pub execute_sql_enabled: bool,
    /// Built-in tool names that should be treated as globally enabled across
    /// every chat, independent of what the user attaches to a given turn.
    #[serde(default)]
    pub always_on_builtin_tools: Vec<String>,
    /// MCP tool keys ("serverId::toolName") treated the same way.
    #[serde(default)]
    pub always_on_mcp_tools: Vec<String>,
    /// Database tables attached to every chat by default.
    #[serde(default)]
    pub always_on_tables: Vec<AlwaysOnTableConfig>,
    /// RAG document paths indexed and retrievable from every chat by default.
    #[serde(default)]
    pub always_on_rag_paths: Vec<String>,
    /// Database connections and their schema-toolbox configuration.
    #[serde(default)]
    pub database_toolbox: DatabaseToolboxConfig,
    /// Max MCP tools `tool_search` returns per query.
    #[serde(default = "default_tool_search_max_results")]
    pub tool_search_max_results: u32,
    /// Whether the system prompt includes worked examples for the active
    /// tool-call format.
    #[serde(default)]
    pub tool_use_examples_enabled: bool,
    /// How many examples to include when `tool_use_examples_enabled`.
    #[serde(default = "default_tool_use_examples_max")]
    pub tool_use_examples_max: u32,
    /// Minimum cosine-similarity score for a RAG chunk to be included in context.
    #[serde(default = "default_rag_chunk_min_relevancy")]
    pub rag_chunk_min_relevancy: f32,
    /// Minimum score for a schema_search result to be considered relevant.
    #[serde(default = "default_schema_relevancy_threshold")]
    pub schema_relevancy_threshold: f32,
    /// Score gap above which a single RAG result is treated as dominant
    /// (included alone rather than alongside weaker matches).
    #[serde(default = "default_rag_dominant_threshold")]
    pub rag_dominant_threshold: f32,
    /// Tool call format selection (primary + enabled fallback chain).
    #[serde(default)]
    pub tool_call_formats: ToolCallFormatConfig,
    /// Default chat wire format (chat/completions vs. responses) for models
    /// that don't have a per-model override.
    #[serde(default)]
    pub chat_format_default: ChatFormatName,
    /// Per-model chat format overrides, keyed by model id.
    #[serde(default)]
    pub chat_format_overrides: HashMap<String, ChatFormatName>,
    /// Use the legacy single-format tool-call prompt instead of the
    /// multi-format fallback chain. Kept for users pinned to older configs.
    #[serde(default)]
    pub legacy_tool_call_format_enabled: bool,
}

fn default_system_prompt() -> String {
    r#"You are a helpful AI assistant. Be direct and concise in your responses. When you don't know something, say so rather than guessing."#.to_string()
}

fn default_tool_search_max_results() -> u32 {
    5
}

fn default_tool_use_examples_max() -> u32 {
    2
}

fn default_rag_chunk_min_relevancy() -> f32 {
    0.3
}

fn default_schema_relevancy_threshold() -> f32 {
    0.3
}

fn default_rag_dominant_threshold() -> f32 {
    0.15
}

/// Create the default MCP test server configuration
fn default_mcp_test_server() -> McpServerConfig {
    // Try to find the pre-built binary in common locations
    // Priority: target/release > cargo run
    let binary_path = std::env::current_dir().ok().and_then(|cwd| {
        let release_path = cwd.join("target/release/mcp-test-server");
        if release_path.exists() {
            Some(release_path.to_string_lossy().to_string())
        } else {
            let alt_path = cwd.join("mcp-test-server/target/release/mcp-test-server");
            if alt_path.exists() {
                Some(alt_path.to_string_lossy().to_string())
            } else {
                None
            }
        }
    });

    let mut base = if let Some(path) = binary_path {
        McpServerConfig {
            id: "mcp-test-server".to_string(),
            name: "mcp_test_server_dev".to_string(),
            enabled: false, // Disabled by default
            transport: Transport::Stdio,
            command: Some(path),
            args: vec![],
            env: HashMap::new(),
            auto_approve_tools: true, // Auto-approve for dev testing
            defer_tools: true,        // Tools deferred by default (discovered via tool_search)
            python_name: None,
        }
    } else {
        // Fall back to cargo run if binary not found
        McpServerConfig {
            id: "mcp-test-server".to_string(),
            name: "mcp_test_server_dev".to_string(),
            enabled: false, // Disabled by default
            transport: Transport::Stdio,
            command: Some("cargo".to_string()),
            args: vec![
                "run".to_string(),
                "--manifest-path".to_string(),
                "mcp-test-server/Cargo.toml".to_string(),
                "--release".to_string(),
            ],
            env: HashMap::new(),
            auto_approve_tools: true, // Auto-approve for dev testing
            defer_tools: true,        // Tools deferred by default (discovered via tool_search)
            python_name: None,
        }
    };
    enforce_python_name(&mut base);
    base
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            mcp_servers: vec![default_mcp_test_server()],
            tool_system_prompts: HashMap::new(),
            python_execution_enabled: false,
            python_tool_calling_enabled: false,
            tool_search_enabled: false,
            search_schemas_enabled: false,
            execute_sql_enabled: false,
            always_on_builtin_tools: Vec::new(),
            always_on_mcp_tools: Vec::new(),
            always_on_tables: Vec::new(),
            always_on_rag_paths: Vec::new(),
            database_toolbox: DatabaseToolboxConfig::default(),
            tool_search_max_results: default_tool_search_max_results(),
            tool_use_examples_enabled: false,
            tool_use_examples_max: default_tool_use_examples_max(),
            rag_chunk_min_relevancy: default_rag_chunk_min_relevancy(),
            schema_relevancy_threshold: default_schema_relevancy_threshold(),
            rag_dominant_threshold: default_rag_dominant_threshold(),
            tool_call_formats: ToolCallFormatConfig::default(),
            chat_format_default: ChatFormatName::default(),
            chat_format_overrides: HashMap::new(),
            legacy_tool_call_format_enabled: false,
        }
    }
}

impl AppSettings {
    /// Whether a built-in tool name is in the always-on list.
    pub fn is_builtin_always_on(&self, name: &str) -> bool {
        self.always_on_builtin_tools.iter().any(|t| t == name)
    }

    /// Database sources, surfaced as plain MCP server configs so the MCP
    /// host actor can connect to them the same way as any other server.
    pub fn get_all_mcp_configs(&self) -> Vec<McpServerConfig> {
        let mut configs = self.mcp_servers.clone();
        for source in &self.database_toolbox.sources {
            configs.push(McpServerConfig {
                id: source.id.clone(),
                name: source.name.clone(),
                enabled: source.enabled,
                transport: source.transport.clone(),
                command: source.command.clone(),
                args: source.args.clone(),
                env: source.env.clone(),
                auto_approve_tools: source.auto_approve_tools,
                defer_tools: source.defer_tools,
                python_name: None,
            });
        }
        configs
    }

    /// Internal (non-tool-exposed) schema search runs automatically when
    /// sql_select is always-on but schema_search isn't explicitly exposed as
    /// a tool - the model still needs schema context, just not as a callable.
    pub fn should_run_internal_schema_search(&self) -> bool {
        self.is_builtin_always_on("sql_select") && !self.is_builtin_always_on("schema_search")
    }
}

/// Ensure the default MCP test server exists in settings (for migration)
pub fn ensure_default_servers(settings: &mut AppSettings) {
    // Check if mcp-test-server already exists
    let has_test_server = settings
        .mcp_servers
        .iter()
        .any(|s| s.id == "mcp-test-server");

    if !has_test_server {
        println!("Adding default MCP test server to settings");
        settings.mcp_servers.insert(0, default_mcp_test_server());
    }
}

/// Get the path to the config file
fn get_config_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".drift-chat").join("config.json")
}

/// Load settings from the config file
pub async fn load_settings() -> AppSettings {
    let config_path = get_config_path();

    let mut settings = match fs::read_to_string(&config_path).await {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(settings) => {
                println!("Settings loaded from {:?}", config_path);
                settings
            }
            Err(e) => {
                println!("Failed to parse settings: {}, using defaults", e);
                AppSettings::default()
            }
        },
        Err(e) => {
            println!(
                "No config file found at {:?}: {}, using defaults",
                config_path, e
            );
            AppSettings::default()
        }
    };

    // Ensure default servers exist (migration)
    ensure_default_servers(&mut settings);

    settings
}

/// Save settings to the config file
pub async fn save_settings(settings: &AppSettings) -> Result<(), String> {
    let config_path = get_config_path();

    // Ensure the directory exists
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }

    let contents = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;

    fs::write(&config_path, contents)
        .await
        .map_err(|e| format!("Failed to write config file: {}", e))?;

    println!("Settings saved to {:?}", config_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = AppSettings::default();
        assert!(!settings.system_prompt.is_empty());
        // Default settings include the mcp-test-server (disabled by default)
        assert!(settings
            .mcp_servers
            .iter()
            .any(|s| s.id == "mcp-test-server"));
        assert!(
            !settings
                .mcp_servers
                .iter()
                .find(|s| s.id == "mcp-test-server")
                .unwrap()
                .enabled
        );
        assert!(settings.tool_system_prompts.is_empty());
        // python_execution is disabled by default
        assert!(!settings.python_execution_enabled);
    }

    #[test]
    fn test_serialize_deserialize() {
        let mut settings = AppSettings::default();
        settings.mcp_servers.push(McpServerConfig {
            id: "test-1".to_string(),
            name: "Test Server".to_string(),
            enabled: true,
            transport: Transport::Stdio,
            command: Some("node".to_string()),
            args: vec!["server.js".to_string()],
            env: HashMap::from([("DEBUG".to_string(), "true".to_string())]),
            auto_approve_tools: false,
            defer_tools: true,
            python_name: Some("test_server".to_string()),
        });

        let json = serde_json::to_string(&settings).unwrap();
        let parsed: AppSettings = serde_json::from_str(&json).unwrap();

        assert_eq!(settings.system_prompt, parsed.system_prompt);
        assert_eq!(settings.mcp_servers.len(), parsed.mcp_servers.len());
        assert_eq!(settings.mcp_servers[0].id, parsed.mcp_servers[0].id);
    }

    #[test]
    fn test_backwards_compat_code_execution_enabled() {
        // Test that old config files with "code_execution_enabled" still work
        let json =
            r#"{"system_prompt": "test", "mcp_servers": [], "code_execution_enabled": true}"#;
        let parsed: AppSettings = serde_json::from_str(json).unwrap();
        assert!(parsed.python_execution_enabled);
    }

    // ============ Python Identifier Validation Tests ============

    #[test]
    fn test_validate_python_identifier_valid() {
        assert!(validate_python_identifier("my_module").is_ok());
        assert!(validate_python_identifier("weather_api").is_ok());
        assert!(validate_python_identifier("mcp_test_server").is_ok());
        assert!(validate_python_identifier("_private").is_ok());
        assert!(validate_python_identifier("module123").is_ok());
        assert!(validate_python_identifier("a").is_ok());
    }

    #[test]
    fn test_validate_python_identifier_invalid() {
        // Empty
        assert!(validate_python_identifier("").is_err());

        // Starts with digit
        assert!(validate_python_identifier("123module").is_err());

        // Contains uppercase
        assert!(validate_python_identifier("MyModule").is_err());
        assert!(validate_python_identifier("myModule").is_err());

        // Contains invalid characters
        assert!(validate_python_identifier("my-module").is_err());
        assert!(validate_python_identifier("my.module").is_err());
        assert!(validate_python_identifier("my module").is_err());
        assert!(validate_python_identifier("my@module").is_err());

        // Python keywords
        assert!(validate_python_identifier("import").is_err());
        assert!(validate_python_identifier("class").is_err());
        assert!(validate_python_identifier("def").is_err());
        assert!(validate_python_identifier("None").is_err());
    }

    #[test]
    fn test_to_python_identifier() {
        // Basic conversion
        assert_eq!(to_python_identifier("My Module"), "my_module");
        assert_eq!(to_python_identifier("mcp-test-server"), "mcp_test_server");
        assert_eq!(to_python_identifier("Weather API"), "weather_api");

        // Handle leading digits
        assert_eq!(to_python_identifier("123abc"), "_123abc");

        // Handle special characters
        assert_eq!(to_python_identifier("my.module.name"), "my_module_name");
        assert_eq!(to_python_identifier("test@server#1"), "testserver1");

        // Handle multiple separators
        assert_eq!(to_python_identifier("my--module__name"), "my_module_name");

        // Handle empty/invalid input
        assert_eq!(to_python_identifier("@#$"), "module");
        assert_eq!(to_python_identifier(""), "module");

        // Handle Python keywords
        assert_eq!(to_python_identifier("import"), "import_");
        assert_eq!(to_python_identifier("class"), "class_");

        // Handle trailing separators
        assert_eq!(to_python_identifier("module_"), "module");
        assert_eq!(to_python_identifier("module--"), "module");
    }

    #[test]
    fn test_mcp_server_get_python_name() {
        // With explicit python_name
        let mut config = McpServerConfig::new("my-server".to_string(), "My Server".to_string());
        config.python_name = Some("custom_name".to_string());
        assert_eq!(config.get_python_name(), "custom_name");

        // Without explicit python_name (derived from id)
        let config2 = McpServerConfig::new("mcp-weather-api".to_string(), "Weather".to_string());
        assert_eq!(config2.get_python_name(), "mcp_weather_api");
    }

    #[test]
    fn test_mcp_server_set_python_name() {
        let mut config = McpServerConfig::new("test".to_string(), "Test".to_string());

        // Valid name
        assert!(config.set_python_name("my_module").is_ok());
        assert_eq!(config.python_name, Some("my_module".to_string()));

        // Invalid name
        assert!(config.set_python_name("My-Module").is_err());
        assert!(config.set_python_name("123abc").is_err());
        assert!(config.set_python_name("import").is_err());
    }

    #[test]
    fn test_enforce_python_name_sanitizes_name_and_python_name() {
        let mut config = McpServerConfig::new("server-1".to_string(), "Server Name 1".to_string());
        enforce_python_name(&mut config);
        assert_eq!(config.name, "server_name_1");
        assert_eq!(config.python_name.as_deref(), Some("server_name_1"));
    }
}
