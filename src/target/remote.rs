//! JSON-lines target over a Unix socket
//!
//! Each request is one line `{"id", "command", "args"}`; the mutation layer
//! answers with one line `{"id", "success", "result"?, "error"?}`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use structure_plan::{BlockPos, BulkRegionOp, LegacyOp};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::protocol::{commands, CommandResult, Request, Response};
use super::simulated::{SimulatedWorld, DEFAULT_REACH};
use super::{Channel, GameMode, ReadResult, WorldTarget};
use crate::error::{Error, Result};

/// Capabilities reported by the mutation layer on connect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetInfo {
    #[serde(default)]
    pub channel: Channel,
    #[serde(default)]
    pub mode: GameMode,
    #[serde(default = "default_reach")]
    pub reach: f64,
}

fn default_reach() -> f64 {
    DEFAULT_REACH
}

impl Default for TargetInfo {
    fn default() -> Self {
        Self {
            channel: Channel::default(),
            mode: GameMode::default(),
            reach: DEFAULT_REACH,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SetBlockArgs {
    x: i32,
    y: i32,
    z: i32,
    block: String,
}

pub struct RemoteTarget {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_id: u64,
    request_timeout: Duration,
    info: TargetInfo,
}

impl RemoteTarget {
    pub async fn connect(path: &Path, request_timeout: Duration) -> Result<Self> {
        let stream = UnixStream::connect(path).await.map_err(|e| Error::ConnectionRefused {
            reason: format!("{}: {}", path.display(), e),
        })?;
        let (reader, writer) = stream.into_split();
        let mut target = Self {
            reader: BufReader::new(reader),
            writer,
            next_id: 0,
            request_timeout,
            info: TargetInfo::default(),
        };
        if let Some(info) = target.call(commands::INFO, json!({})).await? {
            target.info = decode(info)?;
        }
        info!(
            socket = %path.display(),
            channel = ?target.info.channel,
            mode = ?target.info.mode,
            reach = target.info.reach,
            "connected to target"
        );
        Ok(target)
    }

    pub fn info(&self) -> &TargetInfo {
        &self.info
    }

    async fn call(&mut self, command: &str, args: Value) -> Result<Option<Value>> {
        self.next_id += 1;
        let request = Request {
            id: format!("sb_{}", self.next_id),
            command: command.to_string(),
            args,
        };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;

        let mut buf = String::new();
        let n = tokio::time::timeout(self.request_timeout, self.reader.read_line(&mut buf))
            .await
            .map_err(|_| Error::TimeoutWaiting { operation: "target response" })??;
        if n == 0 {
            return Err(Error::Disconnected { reason: "target closed the connection".into() });
        }

        let response: Response =
            serde_json::from_str(&buf).map_err(|e| Error::InvalidResponse(format!("{}: {}", e, buf.trim_end())))?;
        if response.id != request.id {
            return Err(Error::InvalidResponse(format!(
                "expected response {}, got {}",
                request.id, response.id
            )));
        }
        if !response.success {
            return Err(Error::Rejected {
                command: command.to_string(),
                reason: response.error.unwrap_or_else(|| "unknown error".into()),
            });
        }
        Ok(response.result)
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::InvalidResponse(e.to_string()))
}

impl WorldTarget for RemoteTarget {
    async fn set_block(&mut self, pos: BlockPos, block: &str) -> Result<()> {
        self.call(commands::SET_BLOCK, json!({"x": pos.x, "y": pos.y, "z": pos.z, "block": block}))
            .await?;
        Ok(())
    }

    async fn read_block(&mut self, pos: BlockPos) -> Result<ReadResult> {
        match self.call(commands::READ_BLOCK, json!({"x": pos.x, "y": pos.y, "z": pos.z})).await? {
            Some(v) => decode(v),
            None => Ok(ReadResult::Unavailable),
        }
    }

    async fn run_bulk(&mut self, op: &BulkRegionOp) -> Result<u64> {
        let args = serde_json::to_value(LegacyOp::from_bulk(op))?;
        let result = self.call(commands::BULK, args).await?;
        Ok(result
            .as_ref()
            .and_then(|v| v.get("changed"))
            .and_then(Value::as_u64)
            .unwrap_or(op.estimated_block_count))
    }

    async fn move_to(&mut self, pos: BlockPos) -> Result<()> {
        self.call(commands::MOVE_TO, serde_json::to_value(pos)?).await?;
        Ok(())
    }

    async fn agent_position(&mut self) -> Result<Option<BlockPos>> {
        match self.call(commands::POSITION, json!({})).await? {
            Some(Value::Null) | None => Ok(None),
            Some(v) => Ok(Some(decode(v)?)),
        }
    }

    fn channel(&self) -> Channel {
        self.info.channel
    }

    fn mode(&self) -> GameMode {
        self.info.mode
    }

    fn reach(&self) -> f64 {
        self.info.reach
    }
}

/// Bind the socket, replacing a stale file from an earlier run.
pub fn bind_socket(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = std::fs::remove_file(path);
    UnixListener::bind(path).map_err(|e| Error::Io(format!("failed to bind socket: {}", e)))
}

enum ServeCommand {
    Execute(Request, oneshot::Sender<Response>),
}

/// Serve a simulated world to any number of clients. One task owns the world;
/// connections forward requests to it in arrival order.
pub async fn serve_simulated(listener: UnixListener, world: SimulatedWorld) -> Result<()> {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<ServeCommand>(100);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let cmd_tx = cmd_tx.clone();
                    tokio::spawn(handle_client(stream, cmd_tx));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
    });

    let mut world = world;
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            ServeCommand::Execute(request, response_tx) => {
                let response = handle_command(&mut world, request).await;
                let _ = response_tx.send(response);
            }
        }
    }
    Ok(())
}

async fn handle_client(stream: UnixStream, cmd_tx: mpsc::Sender<ServeCommand>) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await.is_ok() && !line.is_empty() {
        match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                let (response_tx, response_rx) = oneshot::channel();
                if cmd_tx.send(ServeCommand::Execute(request, response_tx)).await.is_ok() {
                    if let Ok(response) = response_rx.await {
                        let json = serde_json::to_string(&response).unwrap_or_default();
                        let _ = writer.write_all(json.as_bytes()).await;
                        let _ = writer.write_all(b"\n").await;
                    }
                }
            }
            Err(e) => debug!(error = %e, "ignoring malformed request"),
        }
        line.clear();
    }
}

async fn handle_command(world: &mut SimulatedWorld, request: Request) -> Response {
    let result = match request.command.as_str() {
        commands::INFO => CommandResult::ok(json!({
            "channel": world.channel(),
            "mode": world.mode(),
            "reach": world.reach(),
        })),
        commands::SET_BLOCK => match serde_json::from_value::<SetBlockArgs>(request.args) {
            Ok(args) => match world.set_block(BlockPos::new(args.x, args.y, args.z), &args.block).await {
                Ok(()) => CommandResult::ok_empty(),
                Err(e) => CommandResult::err(e.to_string()),
            },
            Err(e) => CommandResult::err(format!("bad arguments: {}", e)),
        },
        commands::READ_BLOCK => match serde_json::from_value::<BlockPos>(request.args) {
            Ok(pos) => match world.read_block(pos).await {
                Ok(read) => CommandResult::ok(json!(read)),
                Err(e) => CommandResult::err(e.to_string()),
            },
            Err(e) => CommandResult::err(format!("bad arguments: {}", e)),
        },
        commands::BULK => match serde_json::from_value::<LegacyOp>(request.args) {
            Ok(op) => {
                let changed = world.apply_shape(&op.shape(), op.block());
                CommandResult::ok(json!({ "changed": changed }))
            }
            Err(e) => CommandResult::err(format!("bad arguments: {}", e)),
        },
        commands::MOVE_TO => match serde_json::from_value::<BlockPos>(request.args) {
            Ok(pos) => match world.move_to(pos).await {
                Ok(()) => CommandResult::ok_empty(),
                Err(e) => CommandResult::err(e.to_string()),
            },
            Err(e) => CommandResult::err(format!("bad arguments: {}", e)),
        },
        commands::POSITION => match world.agent_position().await {
            Ok(pos) => CommandResult::ok(json!(pos)),
            Err(e) => CommandResult::err(e.to_string()),
        },
        other => CommandResult::err(format!("unknown command: {}", other)),
    };
    result.into_response(request.id)
}
