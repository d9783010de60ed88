//! Boundary to the external codec binary. One process spawn per call, no
//! retries; every failure is normalized to an opaque `CodecError` and the
//! real cause (exit status, stderr) stays in the server log.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use shared_formats::{ProtocolId, UnknownFormat};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::{self, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::logging;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Requested token is outside the supported set; nothing was spawned.
    #[error("invalid format")]
    InvalidFormat(#[from] UnknownFormat),
    /// The tool ran but produced nothing usable: non-zero exit, stderr
    /// output, empty stdout, or an over-deadline run.
    #[error("external codec failed")]
    ToolFailure,
    /// The tool could not be launched at all.
    #[error("external codec unavailable")]
    ToolUnavailable,
}

/// The three codec operations the console needs. Implemented by the real
/// process gateway; mocked/scripted in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PacketCodec: Send + Sync {
    async fn convert(
        &self,
        input: ProtocolId,
        output: ProtocolId,
        data: &str,
    ) -> Result<String, CodecError>;

    async fn encode(&self, output: ProtocolId, message: &str) -> Result<String, CodecError>;

    async fn decode(&self, input: ProtocolId, data: &str) -> Result<String, CodecError>;
}

/// Extract the payload line from the codec's stdout. The tool prints one
/// record per line and terminates output with a newline, so the value callers
/// act on is the second-to-last element of the `\n` split. Single-line output
/// with no trailing newline does not satisfy the framing and is a tool fault.
pub fn canonical_payload(output: &str) -> Result<String, CodecError> {
    let lines: Vec<&str> = output.split('\n').collect();
    if lines.len() < 2 {
        warn!(len = output.len(), "codec output violates line framing");
        return Err(CodecError::ToolFailure);
    }
    Ok(lines[lines.len() - 2].to_owned())
}

#[derive(Debug, Clone)]
pub struct CodecGateway {
    bin: String,
    timeout: Duration,
}

impl CodecGateway {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(&cfg.codec_bin, Duration::from_millis(cfg.codec_timeout_ms))
    }

    /// Spawn the tool once with a discrete argument vector. Payloads and
    /// messages ride as plain argv entries; nothing is ever interpolated into
    /// a shell line.
    async fn run(
        &self,
        op: &'static str,
        input: Option<ProtocolId>,
        output: Option<ProtocolId>,
        args: Vec<String>,
    ) -> Result<String, CodecError> {
        let call_id = Uuid::new_v4();
        let started = Instant::now();
        logging::codec_call();

        let in_tok = input.map(ProtocolId::as_token).unwrap_or("");
        let out_tok = output.map(ProtocolId::as_token).unwrap_or("");

        let mut cmd = Command::new(&self.bin);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(%call_id, op, bin = %self.bin, error = %e, "codec spawn failed");
                logging::codec_failure();
                logging::csv::log_conversion(call_id, op, in_tok, out_tok, "unavailable", started.elapsed())
                    .await;
                return Err(CodecError::ToolUnavailable);
            }
        };

        let out = match time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                warn!(%call_id, op, error = %e, "codec wait failed");
                logging::codec_failure();
                logging::csv::log_conversion(call_id, op, in_tok, out_tok, "failed", started.elapsed())
                    .await;
                return Err(CodecError::ToolFailure);
            }
            Err(_elapsed) => {
                // Dropping the timed-out future kills the child (kill_on_drop).
                warn!(%call_id, op, timeout_ms = self.timeout.as_millis() as u64, "codec call timed out");
                logging::codec_failure();
                logging::csv::log_conversion(call_id, op, in_tok, out_tok, "timeout", started.elapsed())
                    .await;
                return Err(CodecError::ToolFailure);
            }
        };

        let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&out.stderr);
        if !out.status.success() || !stderr.trim().is_empty() || stdout.is_empty() {
            warn!(
                %call_id,
                op,
                exit = ?out.status.code(),
                stderr = %stderr.trim(),
                stdout_len = stdout.len(),
                "codec call failed"
            );
            logging::codec_failure();
            logging::csv::log_conversion(call_id, op, in_tok, out_tok, "failed", started.elapsed())
                .await;
            return Err(CodecError::ToolFailure);
        }

        debug!(%call_id, op, elapsed_ms = started.elapsed().as_millis() as u64, "codec call ok");
        logging::csv::log_conversion(call_id, op, in_tok, out_tok, "ok", started.elapsed()).await;
        Ok(stdout)
    }
}

#[async_trait]
impl PacketCodec for CodecGateway {
    async fn convert(
        &self,
        input: ProtocolId,
        output: ProtocolId,
        data: &str,
    ) -> Result<String, CodecError> {
        let args = vec![
            "-if".to_string(),
            input.as_token().to_string(),
            "-of".to_string(),
            output.as_token().to_string(),
            "-d".to_string(),
            data.to_string(),
        ];
        self.run("convert", Some(input), Some(output), args).await
    }

    async fn encode(&self, output: ProtocolId, message: &str) -> Result<String, CodecError> {
        let args = vec![
            "-of".to_string(),
            output.as_token().to_string(),
            "-m".to_string(),
            message.to_string(),
        ];
        self.run("encode", None, Some(output), args).await
    }

    async fn decode(&self, input: ProtocolId, data: &str) -> Result<String, CodecError> {
        let args = vec![
            "-if".to_string(),
            input.as_token().to_string(),
            "-d".to_string(),
            data.to_string(),
        ];
        self.run("decode", Some(input), None, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn framing_takes_second_to_last_line() {
        assert_eq!(canonical_payload("X\n").unwrap(), "X");
        assert_eq!(canonical_payload("Converted Data:\nB\n").unwrap(), "B");
        assert_eq!(canonical_payload("A\nB\nC\n").unwrap(), "C");
    }

    #[test]
    fn framing_rejects_unterminated_output() {
        assert_eq!(canonical_payload(""), Err(CodecError::ToolFailure));
        assert_eq!(canonical_payload("no-newline"), Err(CodecError::ToolFailure));
    }

    fn script_gateway(dir: &tempfile::TempDir, body: &str, timeout_ms: u64) -> CodecGateway {
        let path = dir.path().join("fake-codec.sh");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh").unwrap();
        writeln!(f, "{body}").unwrap();
        drop(f);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        CodecGateway::new(path.to_string_lossy(), Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn convert_passes_an_argument_vector() {
        // `echo` prints its argv back, so shell-hostile payloads must come
        // through verbatim as a single argument.
        let gw = CodecGateway::new("/bin/echo", Duration::from_millis(1000));
        let hostile = "$(reboot); \"quoted\" | tee";
        let out = gw
            .convert(ProtocolId::Aos, ProtocolId::Ccsds, hostile)
            .await
            .unwrap();
        assert_eq!(
            canonical_payload(&out).unwrap(),
            format!("-if aos -of ccsds -d {hostile}")
        );
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let gw = CodecGateway::new("/nonexistent/converter.bin", Duration::from_millis(200));
        let err = gw.encode(ProtocolId::Aos, "HELLO").await.unwrap_err();
        assert_eq!(err, CodecError::ToolUnavailable);
    }

    #[tokio::test]
    async fn stderr_output_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let gw = script_gateway(&dir, "echo ok; echo boom >&2", 1000);
        let err = gw.decode(ProtocolId::PusTm, "payload").await.unwrap_err();
        assert_eq!(err, CodecError::ToolFailure);
    }

    #[tokio::test]
    async fn empty_stdout_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let gw = script_gateway(&dir, "exit 0", 1000);
        let err = gw.decode(ProtocolId::PusTc, "payload").await.unwrap_err();
        assert_eq!(err, CodecError::ToolFailure);
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let gw = script_gateway(&dir, "echo partial; exit 3", 1000);
        let err = gw
            .convert(ProtocolId::Ccsds, ProtocolId::Aos, "x")
            .await
            .unwrap_err();
        assert_eq!(err, CodecError::ToolFailure);
    }

    #[tokio::test]
    async fn over_deadline_call_fails() {
        let dir = tempfile::tempdir().unwrap();
        let gw = script_gateway(&dir, "sleep 2; echo late", 50);
        let err = gw.encode(ProtocolId::PusTm, "slow").await.unwrap_err();
        assert_eq!(err, CodecError::ToolFailure);
    }
}
