//! Deterministic in-process stand-in for the external codec binary.
//!
//! Payloads take the shape `fmt(message)` and every response mimics the real
//! tool's framing: one record per line, trailing newline, payload on the
//! second-to-last line.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use shared_formats::ProtocolId;

use crate::codec::{CodecError, PacketCodec};

pub struct ScriptedCodec {
    calls: Mutex<Vec<String>>,
    fail_all: bool,
    delay: Option<Duration>,
}

impl ScriptedCodec {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_all: false,
            delay: None,
        }
    }

    /// Every call reports `ToolFailure` (after recording itself).
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::new()
        }
    }

    /// Every call sleeps before completing, to let tests race resets against
    /// in-flight conversions.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn note(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn gate(&self) -> Result<(), CodecError> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if self.fail_all {
            Err(CodecError::ToolFailure)
        } else {
            Ok(())
        }
    }

    fn unwrap_payload(payload: &str, fmt: ProtocolId) -> Result<&str, CodecError> {
        payload
            .strip_prefix(fmt.as_token())
            .and_then(|rest| rest.strip_prefix('('))
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or(CodecError::ToolFailure)
    }
}

impl Default for ScriptedCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PacketCodec for ScriptedCodec {
    async fn convert(
        &self,
        input: ProtocolId,
        output: ProtocolId,
        data: &str,
    ) -> Result<String, CodecError> {
        self.note(format!("convert {input}->{output}"));
        self.gate().await?;
        let inner = Self::unwrap_payload(data, input)?;
        Ok(format!("Converted Data:\n{}({inner})\n", output.as_token()))
    }

    async fn encode(&self, output: ProtocolId, message: &str) -> Result<String, CodecError> {
        self.note(format!("encode {output}"));
        self.gate().await?;
        Ok(format!("Encoded Data:\n{}({message})\n", output.as_token()))
    }

    async fn decode(&self, input: ProtocolId, data: &str) -> Result<String, CodecError> {
        self.note(format!("decode {input}"));
        self.gate().await?;
        let inner = Self::unwrap_payload(data, input)?;
        Ok(format!("Decoded Data:\n{inner}\n"))
    }
}
