//! Oracle reached through an external command.
//!
//! One process per request. The request is written to the child's stdin as a
//! single JSON line; the child answers with one JSON line on stdout:
//!
//! ```text
//! {"text": "..."}
//! {"error": {"class": "transient" | "permanent", "message": "..."}}
//! ```

use super::{Oracle, OracleError, OracleRequest};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    class: String,
    message: String,
}

/// Oracle that spawns `program args...` for every request.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandOracle {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Split a shell-like command line on whitespace (no quoting support).
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).with_args(parts.map(str::to_string).collect()))
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

fn parse_response(line: &str) -> Result<String, OracleError> {
    let response: WireResponse = serde_json::from_str(line.trim())
        .map_err(|e| OracleError::Malformed(format!("unparsable response line: {}", e)))?;

    if let Some(error) = response.error {
        return Err(match error.class.as_str() {
            "transient" => OracleError::Transport(error.message),
            "rate_limited" | "rate-limited" => OracleError::RateLimited(error.message),
            _ => OracleError::Rejected(error.message),
        });
    }

    response
        .text
        .ok_or_else(|| OracleError::Malformed("response has neither text nor error".to_string()))
}

#[async_trait]
impl Oracle for CommandOracle {
    async fn transform(&self, request: &OracleRequest) -> Result<String, OracleError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            OracleError::Transport(format!("failed to start {}: {}", self.program, e))
        })?;

        let payload = serde_json::to_string(request)
            .map_err(|e| OracleError::Rejected(format!("failed to serialize request: {}", e)))?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| OracleError::Transport("no stdin available".to_string()))?;
            stdin
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| OracleError::Transport(format!("failed to write request: {}", e)))?;
            stdin
                .write_all(b"\n")
                .await
                .map_err(|e| OracleError::Transport(format!("failed to write newline: {}", e)))?;
            stdin
                .flush()
                .await
                .map_err(|e| OracleError::Transport(format!("failed to flush stdin: {}", e)))?;
            // stdin dropped here so the child sees EOF
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OracleError::Transport("no stdout available".to_string()))?;
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| OracleError::Transport(format!("failed to read response: {}", e)))?;
        if read == 0 {
            return Err(OracleError::Transport(format!(
                "{} exited without answering",
                self.program
            )));
        }

        let _ = child.start_kill();
        parse_response(&line)
    }
}
