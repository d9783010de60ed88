//! Operator-facing HTTP surface: the three converter endpoints the external
//! callers already speak, plus the session endpoints that drive the input
//! edge and expose the packet state. Hand-rolled HTTP/1.1 over a tokio
//! listener; one request per connection, `Connection: close`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared_formats::{PacketState, ProtocolId, SatelliteId, Timestamp};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::codec::{CodecError, PacketCodec};
use crate::commands;
use crate::config::Config;
use crate::logging;
use crate::state::StateHandle;

pub struct AppCtx {
    pub cfg: Config,
    pub state: StateHandle,
    pub codec: Arc<dyn PacketCodec>,
}

// ================================ DTOs ======================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConvertRequest {
    input_format: String,
    output_format: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncodeRequest {
    output_format: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecodeRequest {
    input_format: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct SessionEncodeRequest {
    satellite: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct SatelliteView {
    protocol: ProtocolId,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// What the operator sees: one entry per satellite, the common (hub) payload,
/// and the session telemetry counters. Authored slots report no message.
#[derive(Debug, Serialize)]
struct StateView {
    generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    authored_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    common: Option<String>,
    satellites: BTreeMap<&'static str, SatelliteView>,
    telemetry: logging::Telemetry,
}

impl StateView {
    fn from_state(snap: &PacketState) -> Self {
        let mut satellites = BTreeMap::new();
        for sat in SatelliteId::ALL {
            satellites.insert(
                sat.as_str(),
                SatelliteView {
                    protocol: sat.leaf_format(),
                    data: snap.slot(sat).map(str::to_owned),
                    message: snap
                        .message(sat)
                        .and_then(|m| m.decoded())
                        .map(str::to_owned),
                },
            );
        }
        Self {
            generation: snap.generation,
            authored_at: snap.authored_at,
            common: snap.hub.clone(),
            satellites,
            telemetry: logging::telemetry_snapshot(),
        }
    }
}

// ============================ Request plumbing ==============================

#[derive(Debug)]
struct Request {
    method: String,
    path: String,
    body: Vec<u8>,
}

#[derive(Debug)]
enum ReadOutcome {
    Request(Request),
    Closed,
    Malformed,
    TooLarge,
}

async fn read_request<R>(reader: &mut R, body_limit: usize) -> std::io::Result<ReadOutcome>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(ReadOutcome::Closed);
    }
    let mut parts = line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return Ok(ReadOutcome::Malformed);
    };
    let method = method.to_string();
    let path = path.to_string();

    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await? == 0 {
            return Ok(ReadOutcome::Closed);
        }
        let trimmed = header.trim_end();
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    if content_length > body_limit {
        return Ok(ReadOutcome::TooLarge);
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;
    Ok(ReadOutcome::Request(Request { method, path, body }))
}

struct Response {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into().into_bytes(),
        }
    }

    fn json(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: "application/json",
            body,
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "",
    }
}

async fn write_response<W>(writer: &mut W, resp: &Response) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        resp.status,
        reason(resp.status),
        resp.content_type,
        resp.body.len(),
    );
    writer.write_all(head.as_bytes()).await?;
    writer.write_all(&resp.body).await?;
    writer.flush().await
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "request body rejected");
        Response::text(400, "Bad request")
    })
}

fn json_view(view: &StateView) -> Response {
    match serde_json::to_vec(view) {
        Ok(body) => Response::json(200, body),
        Err(e) => {
            warn!(error = %e, "state view serialization failed");
            Response::text(500, "Internal error")
        }
    }
}

// =============================== Handlers ===================================

async fn route(ctx: &AppCtx, req: Request) -> Response {
    match (req.method.as_str(), req.path.as_str()) {
        ("POST", "/converter/convert") => convert(ctx, &req.body).await,
        ("POST", "/converter/encode") => encode(ctx, &req.body).await,
        ("POST", "/converter/decode") => decode(ctx, &req.body).await,
        ("POST", "/session/encode") => session_encode(ctx, &req.body).await,
        ("POST", "/session/reset") => session_reset(ctx).await,
        ("GET", "/session/state") => session_state(ctx).await,
        _ => Response::text(404, "Not found"),
    }
}

/// Callers only ever see an opaque failure body; the real cause stays in
/// the gateway logs.
fn failure_response(err: CodecError, failed_body: &'static str) -> Response {
    match err {
        CodecError::InvalidFormat(_) => Response::text(500, "Invalid format"),
        CodecError::ToolFailure | CodecError::ToolUnavailable => {
            Response::text(500, failed_body)
        }
    }
}

async fn convert(ctx: &AppCtx, body: &[u8]) -> Response {
    let req: ConvertRequest = match parse_body(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let result = async {
        // Unknown tokens fail here; the codec is never spawned for them.
        let input: ProtocolId = req.input_format.parse()?;
        let output: ProtocolId = req.output_format.parse()?;
        ctx.codec.convert(input, output, &req.data).await
    }
    .await;
    match result {
        Ok(out) => Response::text(200, out),
        Err(err) => failure_response(err, "Conversion failed"),
    }
}

async fn encode(ctx: &AppCtx, body: &[u8]) -> Response {
    let req: EncodeRequest = match parse_body(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let result = async {
        let output: ProtocolId = req.output_format.parse()?;
        ctx.codec.encode(output, &req.message).await
    }
    .await;
    match result {
        Ok(out) => Response::text(200, out),
        Err(err) => failure_response(err, "Encoding failed"),
    }
}

async fn decode(ctx: &AppCtx, body: &[u8]) -> Response {
    let req: DecodeRequest = match parse_body(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let result = async {
        let input: ProtocolId = req.input_format.parse()?;
        ctx.codec.decode(input, &req.data).await
    }
    .await;
    match result {
        Ok(out) => Response::text(200, out),
        Err(err) => failure_response(err, "Decoding failed"),
    }
}

async fn session_encode(ctx: &AppCtx, body: &[u8]) -> Response {
    let req: SessionEncodeRequest = match parse_body(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let Ok(sat) = req.satellite.parse::<SatelliteId>() else {
        return Response::text(400, "Unknown satellite");
    };
    match commands::encode_input(&ctx.state, ctx.codec.as_ref(), sat, &req.message).await {
        Ok(snap) => json_view(&StateView::from_state(&snap)),
        Err(err) => failure_response(err, "Encoding failed"),
    }
}

async fn session_reset(ctx: &AppCtx) -> Response {
    let snap = commands::reset(&ctx.state).await;
    json_view(&StateView::from_state(&snap))
}

async fn session_state(ctx: &AppCtx) -> Response {
    let snap = ctx.state.snapshot().await;
    json_view(&StateView::from_state(&snap))
}

// ================================ Server ====================================

async fn handle_conn(stream: TcpStream, ctx: Arc<AppCtx>) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let resp = match read_request(&mut reader, ctx.cfg.body_limit).await? {
        ReadOutcome::Closed => return Ok(()),
        ReadOutcome::Malformed => Response::text(400, "Bad request"),
        ReadOutcome::TooLarge => Response::text(413, "Payload too large"),
        ReadOutcome::Request(req) => {
            debug!(method = %req.method, path = %req.path, "request");
            route(&ctx, req).await
        }
    };
    write_response(&mut write_half, &resp).await
}

pub async fn serve(cfg: Config, state: StateHandle, codec: Arc<dyn PacketCodec>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&cfg.bind_addr).await?;
    info!(addr = %cfg.bind_addr, "http surface listening");
    let ctx = Arc::new(AppCtx { cfg, state, codec });

    loop {
        let (stream, peer) = listener.accept().await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_conn(stream, ctx).await {
                debug!(error = %e, %peer, "connection error");
            }
        });
    }
}
