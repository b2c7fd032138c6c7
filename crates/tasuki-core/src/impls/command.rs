//! CommandExecutor - 外部コマンドをジョブとして実行
//!
//! `program args... <payload_ref>` を起動し、終了コードで成否を判定します。
//! ジョブ本体（ダウンロード・要約・アップロードなど）は任意の実行ファイルに任せます。

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::domain::{ExecutionError, PayloadRef};
use crate::ports::JobExecutor;

/// Bytes of stderr kept in `error_detail`.
const STDERR_TAIL: usize = 512;

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let mut start = text.len().saturating_sub(STDERR_TAIL);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[async_trait]
impl JobExecutor for CommandExecutor {
    async fn execute(&self, payload_ref: &PayloadRef) -> Result<(), ExecutionError> {
        if payload_ref.is_empty() {
            return Err(ExecutionError::Decode("record has no payload reference".into()));
        }

        debug!(program = %self.program, payload_ref = %payload_ref, "spawning job command");
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(payload_ref.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ExecutionError::MissingConfig(format!("{}: {e}", self.program))
                }
                _ => ExecutionError::Failed(format!("failed to start {}: {e}", self.program)),
            })?;

        if output.status.success() {
            return Ok(());
        }
        let tail = stderr_tail(&output.stderr);
        if tail.is_empty() {
            Err(ExecutionError::Failed(output.status.to_string()))
        } else {
            Err(ExecutionError::Failed(format!("{}: {tail}", output.status)))
        }
    }
}
