//! Configuration: TOML file with `${VAR}` environment substitution.
//!
//! ```toml
//! [queue]
//! namespace = "summarizeQueue"
//! empty_poll_delay_ms = 10000
//!
//! [store]
//! kind = "rtdb"
//! database_url = "${TASUKI_DATABASE_URL}"
//! auth_token = "${TASUKI_AUTH_TOKEN:-}"   # 未設定なら空 = トークンなし
//!
//! [executor]
//! program = "summarize"
//! ```
//!
//! # 環境変数の展開
//! - `${VAR}` は必須。未設定なら `EnvVarNotSet` で起動しない
//! - `${VAR:-default}` は未設定のとき `default` を使う（空でもよい）
//! - コメント（`#` 以降）の中は展開しない
//! - `"..."` の中に入る値はエスケープされる。`'...'` の中はそのまま
//! - 判定は行単位なので、複数行文字列の中では使わないこと

use std::fs;
use std::ops::Range;
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::impls::rtdb::DEFAULT_MAX_TRANSACTION_RETRIES;
use crate::impls::CommandExecutor;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable not set: {0}")]
    EnvVarNotSet(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TasukiConfig {
    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub executor: ExecutorSettings,
}

/// Poll loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Queue namespace (path of the queue in the store).
    #[serde(default)]
    pub namespace: String,

    /// Sleep after an empty poll or a store failure.
    #[serde(default = "default_empty_poll_delay_ms")]
    pub empty_poll_delay_ms: u64,

    /// Upper bound of random jitter added to each backoff sleep.
    #[serde(default)]
    pub poll_jitter_ms: u64,

    /// Executor time limit. No limit when absent.
    #[serde(default)]
    pub execution_timeout_ms: Option<u64>,

    /// Number of poll loops run by one process.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_empty_poll_delay_ms() -> u64 {
    10_000
}

fn default_workers() -> usize {
    1
}

impl QueueSettings {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn empty_poll_delay(&self) -> Duration {
        Duration::from_millis(self.empty_poll_delay_ms)
    }

    pub fn poll_jitter(&self) -> Duration {
        Duration::from_millis(self.poll_jitter_ms)
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            empty_poll_delay_ms: default_empty_poll_delay_ms(),
            poll_jitter_ms: 0,
            execution_timeout_ms: None,
            workers: default_workers(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Rtdb,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub kind: StoreKind,

    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default = "default_max_transaction_retries")]
    pub max_transaction_retries: u32,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_max_transaction_retries() -> u32 {
    DEFAULT_MAX_TRANSACTION_RETRIES
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl StoreSettings {
    /// The configured token, or `None` when it is missing or blank.
    pub fn auth_token(&self) -> Option<String> {
        self.auth_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            database_url: None,
            auth_token: None,
            max_transaction_retries: default_max_transaction_retries(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// External command run per task, with `payload_ref` appended.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default)]
    pub program: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,
}

impl ExecutorSettings {
    pub fn command(&self) -> Result<CommandExecutor, ConfigError> {
        let program = self
            .program
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ConfigError::Invalid("executor.program is required".into()))?;
        Ok(CommandExecutor::new(program, self.args.clone()))
    }
}

impl TasukiConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content)?;
        Ok(toml::from_str(&expanded)?)
    }

    /// Startup checks. Failing here is fatal: the worker never starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("queue.namespace must not be empty".into()));
        }
        if self.queue.workers == 0 {
            return Err(ConfigError::Invalid("queue.workers must be at least 1".into()));
        }
        if self.queue.execution_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "queue.execution_timeout_ms must be positive".into(),
            ));
        }
        if self.store.kind == StoreKind::Rtdb
            && self
                .store
                .database_url
                .as_deref()
                .is_none_or(|url| url.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "store.database_url is required for the rtdb store".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${VAR}` and `${VAR:-default}` from the process environment.
fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
    expand_vars(content, |name| std::env::var(name).ok())
}

fn expand_vars(
    content: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;
    let mut result = String::with_capacity(content.len());

    for line in content.split_inclusive('\n') {
        let (comment_start, basic_strings) = scan_line(line);
        let (code, comment) = line.split_at(comment_start);

        let mut copied = 0;
        for cap in re.captures_iter(code) {
            let Some(whole) = cap.get(0) else { continue };
            let var_name = &cap[1];
            let var_value = match (lookup(var_name), cap.get(2)) {
                (Some(value), _) => value,
                (None, Some(default)) => default.as_str().to_string(),
                (None, None) => return Err(ConfigError::EnvVarNotSet(var_name.to_string())),
            };

            result.push_str(&code[copied..whole.start()]);
            if basic_strings.iter().any(|range| range.contains(&whole.start())) {
                result.push_str(&escape_basic(&var_value));
            } else {
                result.push_str(&var_value);
            }
            copied = whole.end();
        }
        result.push_str(&code[copied..]);
        result.push_str(comment);
    }

    Ok(result)
}

/// Byte offset where a comment starts (or the line length), and the
/// contents of each `"..."` string before it.
fn scan_line(line: &str) -> (usize, Vec<Range<usize>>) {
    let mut basic_strings = Vec::new();
    let mut open: Option<(char, usize)> = None;
    let mut escaped = false;

    for (i, c) in line.char_indices() {
        match open {
            Some(('"', start)) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    basic_strings.push(start..i);
                    open = None;
                }
            }
            Some(_) => {
                if c == '\'' {
                    open = None;
                }
            }
            None => match c {
                '#' => return (i, basic_strings),
                '"' | '\'' => open = Some((c, i + 1)),
                _ => {}
            },
        }
    }

    if let Some(('"', start)) = open {
        basic_strings.push(start..line.len());
    }
    (line.len(), basic_strings)
}

fn escape_basic(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c => escaped.push(c),
        }
    }
    escaped
}
