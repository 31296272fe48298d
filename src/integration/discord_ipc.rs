//! Local IPC client for the Discord rich presence service.
//!
//! Frames are `u32 LE opcode`, `u32 LE length`, then a JSON body. The client
//! connects lazily and drops the connection on any I/O failure so the next
//! call reconnects. Each request/reply exchange runs on the connection's own
//! thread and the caller waits a bounded time for it, since named pipes have
//! no read timeout.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::{json, Map, Value};

use crate::error::PresenceError;
use crate::integration::presence_publisher::{PresenceActivity, PresenceClient};
use crate::protocol::AccountInfo;

const OP_HANDSHAKE: u32 = 0;
const OP_FRAME: u32 = 1;
const OP_CLOSE: u32 = 2;
const OP_PING: u32 = 3;
const OP_PONG: u32 = 4;
const IPC_VERSION: u32 = 1;
const MAX_FRAME_BYTES: usize = 1 << 20;
const IPC_SOCKET_SLOTS: usize = 10;
const IPC_READ_TIMEOUT: Duration = Duration::from_secs(5);
const IPC_REPLY_TIMEOUT: Duration = Duration::from_secs(6);
const ACTIVITY_TYPE_LISTENING: u8 = 2;
const AVATAR_CDN_URL: &str = "https://cdn.discordapp.com";
const AVATAR_SIZE: u32 = 128;

trait IpcStream: Read + Write + Send {}
impl<T: Read + Write + Send> IpcStream for T {}

fn io_error(context: &str, err: std::io::Error) -> PresenceError {
    PresenceError::Transport(format!("{context}: {err}"))
}

/// Serializes one IPC frame.
pub fn encode_frame(opcode: u32, payload: &Value) -> Result<Vec<u8>, PresenceError> {
    let body = serde_json::to_vec(payload)?;
    let length = u32::try_from(body.len())
        .map_err(|_| PresenceError::Parse("IPC frame body too large".to_string()))?;
    let mut frame = Vec::with_capacity(8 + body.len());
    frame.extend_from_slice(&opcode.to_le_bytes());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reads one IPC frame, returning its opcode and JSON body.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<(u32, Value), PresenceError> {
    let mut header = [0u8; 8];
    reader
        .read_exact(&mut header)
        .map_err(|err| io_error("reading IPC header", err))?;
    let opcode = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if length > MAX_FRAME_BYTES {
        return Err(PresenceError::Parse(format!(
            "IPC frame of {length} bytes exceeds limit"
        )));
    }
    let mut body = vec![0u8; length];
    reader
        .read_exact(&mut body)
        .map_err(|err| io_error("reading IPC body", err))?;
    let payload = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)?
    };
    Ok((opcode, payload))
}

/// Socket paths probed in order on Unix hosts.
pub fn socket_candidates_from(bases: &[PathBuf]) -> Vec<PathBuf> {
    let mut unique_bases: Vec<&PathBuf> = Vec::new();
    for base in bases {
        if !unique_bases.contains(&base) {
            unique_bases.push(base);
        }
    }
    let mut candidates = Vec::new();
    for base in unique_bases {
        for sandbox in ["", "snap.discord", "app/com.discordapp.Discord"] {
            let directory = if sandbox.is_empty() {
                base.clone()
            } else {
                base.join(sandbox)
            };
            for slot in 0..IPC_SOCKET_SLOTS {
                candidates.push(directory.join(format!("discord-ipc-{slot}")));
            }
        }
    }
    candidates
}

#[cfg(unix)]
fn socket_candidates() -> Vec<PathBuf> {
    let mut bases: Vec<PathBuf> = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"]
        .iter()
        .filter_map(|name| std::env::var_os(name))
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .collect();
    bases.push(PathBuf::from("/tmp"));
    socket_candidates_from(&bases)
}

#[cfg(windows)]
fn socket_candidates() -> Vec<PathBuf> {
    (0..IPC_SOCKET_SLOTS)
        .map(|slot| PathBuf::from(format!(r"\\.\pipe\discord-ipc-{slot}")))
        .collect()
}

#[cfg(not(any(unix, windows)))]
fn socket_candidates() -> Vec<PathBuf> {
    Vec::new()
}

#[cfg(unix)]
fn open_stream(path: &Path) -> std::io::Result<Box<dyn IpcStream>> {
    let stream = std::os::unix::net::UnixStream::connect(path)?;
    stream.set_read_timeout(Some(IPC_READ_TIMEOUT))?;
    stream.set_write_timeout(Some(IPC_READ_TIMEOUT))?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
fn open_stream(path: &Path) -> std::io::Result<Box<dyn IpcStream>> {
    let pipe = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)?;
    Ok(Box::new(pipe))
}

fn avatar_url(user_id: &str, avatar_hash: Option<&str>, discriminator: &str) -> String {
    match avatar_hash.filter(|hash| !hash.is_empty() && !user_id.is_empty()) {
        Some(hash) => {
            let extension = if hash.starts_with("a_") { "gif" } else { "png" };
            format!("{AVATAR_CDN_URL}/avatars/{user_id}/{hash}.{extension}?size={AVATAR_SIZE}")
        }
        None => {
            let index = discriminator.parse::<u64>().unwrap_or(0) % 5;
            format!("{AVATAR_CDN_URL}/embed/avatars/{index}.png")
        }
    }
}

/// Account details from the READY dispatch's `user` object.
pub fn account_from_ready_user(user: &Value) -> AccountInfo {
    let field = |key: &str| user.get(key).and_then(Value::as_str).unwrap_or_default();
    let name = match field("username") {
        "" => "Unknown",
        name => name,
    };
    let discriminator = field("discriminator");
    let display_name = if discriminator.is_empty() || discriminator == "0" {
        name.to_string()
    } else {
        format!("{name}#{discriminator}")
    };
    AccountInfo {
        display_name,
        avatar_url: avatar_url(
            field("id"),
            user.get("avatar").and_then(Value::as_str),
            discriminator,
        ),
    }
}

/// Wire shape of an activity inside `SET_ACTIVITY`.
pub fn activity_json(activity: &PresenceActivity) -> Value {
    let mut body = Map::new();
    body.insert("type".to_string(), json!(ACTIVITY_TYPE_LISTENING));
    body.insert("details".to_string(), json!(activity.details));
    if !activity.state.is_empty() {
        body.insert("state".to_string(), json!(activity.state));
    }

    let mut timestamps = Map::new();
    if let Some(start) = activity.start {
        timestamps.insert("start".to_string(), json!(start.saturating_mul(1000)));
    }
    if let Some(end) = activity.end {
        timestamps.insert("end".to_string(), json!(end.saturating_mul(1000)));
    }
    if !timestamps.is_empty() {
        body.insert("timestamps".to_string(), Value::Object(timestamps));
    }

    body.insert(
        "assets".to_string(),
        json!({
            "large_image": activity.large_image,
            "large_text": activity.large_text,
            "small_image": activity.small_image,
            "small_text": activity.small_text,
        }),
    );
    if !activity.buttons.is_empty() {
        let buttons: Vec<Value> = activity
            .buttons
            .iter()
            .map(|button| json!({ "label": button.label, "url": button.url }))
            .collect();
        body.insert("buttons".to_string(), Value::Array(buttons));
    }
    Value::Object(body)
}

fn set_activity_command(activity: Option<&PresenceActivity>, pid: u32) -> Value {
    json!({
        "cmd": "SET_ACTIVITY",
        "args": {
            "pid": pid,
            "activity": activity.map(activity_json).unwrap_or(Value::Null),
        },
        "nonce": uuid::Uuid::new_v4().to_string(),
    })
}

fn dispatch_error(payload: &Value) -> Option<PresenceError> {
    if payload.get("evt").and_then(Value::as_str) != Some("ERROR") {
        return None;
    }
    let data = payload.get("data");
    let code = data
        .and_then(|data| data.get("code"))
        .and_then(Value::as_i64)
        .unwrap_or_default();
    let message = data
        .and_then(|data| data.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    Some(PresenceError::PresenceService(format!("{message} (code {code})")))
}

/// Writes one request frame and reads until the matching reply frame.
fn exchange_on_stream<S: Read + Write + ?Sized>(
    stream: &mut S,
    opcode: u32,
    payload: &Value,
) -> Result<Value, PresenceError> {
    let frame = encode_frame(opcode, payload)?;
    stream
        .write_all(&frame)
        .map_err(|err| io_error("writing IPC frame", err))?;
    stream
        .flush()
        .map_err(|err| io_error("flushing IPC frame", err))?;

    loop {
        let (reply_opcode, reply) = read_frame(stream)?;
        match reply_opcode {
            OP_FRAME => return Ok(reply),
            OP_PING => {
                let pong = encode_frame(OP_PONG, &reply)?;
                stream
                    .write_all(&pong)
                    .map_err(|err| io_error("writing IPC pong", err))?;
            }
            OP_CLOSE => {
                let message = reply
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("closed by peer");
                return Err(PresenceError::Transport(format!(
                    "presence IPC closed: {message}"
                )));
            }
            other => debug!("DiscordIpcClient: ignoring IPC opcode {}", other),
        }
    }
}

struct IpcRequest {
    opcode: u32,
    payload: Value,
    reply: mpsc::SyncSender<Result<Value, PresenceError>>,
}

/// An open IPC stream owned by a dedicated thread.
///
/// Dropping the handle stops the thread once its current read returns; a
/// thread stuck on a silent peer is abandoned with its stream.
struct IpcConnection {
    requests: mpsc::Sender<IpcRequest>,
}

impl IpcConnection {
    fn spawn(stream: Box<dyn IpcStream>) -> Result<Self, PresenceError> {
        let (requests, incoming) = mpsc::channel::<IpcRequest>();
        thread::Builder::new()
            .name("presence-ipc".to_string())
            .spawn(move || {
                let mut stream = stream;
                while let Ok(request) = incoming.recv() {
                    let result =
                        exchange_on_stream(stream.as_mut(), request.opcode, &request.payload);
                    let broken = matches!(result, Err(PresenceError::Transport(_)));
                    let _ = request.reply.send(result);
                    if broken {
                        break;
                    }
                }
                debug!("DiscordIpcClient: connection thread stopped");
            })
            .map_err(|err| io_error("spawning IPC thread", err))?;
        Ok(Self { requests })
    }

    fn exchange(
        &self,
        opcode: u32,
        payload: &Value,
        timeout: Duration,
    ) -> Result<Value, PresenceError> {
        let closed = || PresenceError::Transport("presence IPC connection closed".to_string());
        let (reply, result) = mpsc::sync_channel(1);
        self.requests
            .send(IpcRequest {
                opcode,
                payload: payload.clone(),
                reply,
            })
            .map_err(|_| closed())?;
        match result.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(PresenceError::Transport(format!(
                "no IPC reply within {} ms",
                timeout.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(closed()),
        }
    }
}

/// Presence client speaking the desktop app's local IPC protocol.
pub struct DiscordIpcClient {
    client_id: String,
    connection: Option<IpcConnection>,
    reply_timeout: Duration,
}

impl DiscordIpcClient {
    pub fn new(client_id: String) -> Self {
        Self {
            client_id,
            connection: None,
            reply_timeout: IPC_REPLY_TIMEOUT,
        }
    }

    fn open_first_socket() -> Result<Box<dyn IpcStream>, PresenceError> {
        let mut last_error = None;
        for path in socket_candidates() {
            match open_stream(&path) {
                Ok(stream) => {
                    debug!("DiscordIpcClient: connected to {}", path.display());
                    return Ok(stream);
                }
                Err(err) => last_error = Some(err),
            }
        }
        Err(match last_error {
            Some(err) => io_error("no presence IPC socket accepted a connection", err),
            None => PresenceError::Transport("no presence IPC socket paths".to_string()),
        })
    }

    fn exchange(&mut self, opcode: u32, payload: &Value) -> Result<Value, PresenceError> {
        let result = match self.connection.as_ref() {
            Some(connection) => connection.exchange(opcode, payload, self.reply_timeout),
            None => Err(PresenceError::Transport("not connected".to_string())),
        };
        if matches!(result, Err(PresenceError::Transport(_))) {
            warn!("DiscordIpcClient: dropping connection after transport failure");
            self.connection = None;
        }
        result
    }

    fn ensure_connected(&mut self) -> Result<(), PresenceError> {
        if self.connection.is_none() {
            self.connect()?;
        }
        Ok(())
    }

    fn send_activity(&mut self, activity: Option<&PresenceActivity>) -> Result<(), PresenceError> {
        self.ensure_connected()?;
        let command = set_activity_command(activity, std::process::id());
        let reply = self.exchange(OP_FRAME, &command)?;
        match dispatch_error(&reply) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl PresenceClient for DiscordIpcClient {
    fn connect(&mut self) -> Result<AccountInfo, PresenceError> {
        self.connection = Some(IpcConnection::spawn(Self::open_first_socket()?)?);
        let handshake = json!({ "v": IPC_VERSION, "client_id": self.client_id });
        let ready = self.exchange(OP_HANDSHAKE, &handshake)?;
        if let Some(err) = dispatch_error(&ready) {
            self.connection = None;
            return Err(err);
        }
        if ready.get("evt").and_then(Value::as_str) != Some("READY") {
            self.connection = None;
            return Err(PresenceError::PresenceService(
                "handshake did not return READY".to_string(),
            ));
        }
        let account = ready
            .get("data")
            .and_then(|data| data.get("user"))
            .map(account_from_ready_user)
            .unwrap_or_else(|| account_from_ready_user(&Value::Null));
        info!("DiscordIpcClient: connected as {}", account.display_name);
        Ok(account)
    }

    fn update(&mut self, activity: &PresenceActivity) -> Result<(), PresenceError> {
        self.send_activity(Some(activity))
    }

    fn clear(&mut self) -> Result<(), PresenceError> {
        self.send_activity(None)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Read, Write};
    use std::path::PathBuf;
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::{Duration, Instant};

    use serde_json::json;

    use super::{
        account_from_ready_user, activity_json, dispatch_error, encode_frame, read_frame,
        set_activity_command, socket_candidates_from, DiscordIpcClient, IpcConnection, OP_FRAME,
        OP_PING, OP_PONG,
    };
    use crate::error::PresenceError;
    use crate::integration::presence_publisher::{PresenceActivity, PresenceButton, PresenceClient};

    /// Replays canned frames and records everything written.
    struct ScriptedStream {
        incoming: Cursor<Vec<u8>>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.incoming.read(buf)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written
                .lock()
                .expect("written lock")
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Accepts writes but never answers until `release` is dropped.
    struct SilentStream {
        release: mpsc::Receiver<()>,
    }

    impl Read for SilentStream {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            let _ = self.release.recv();
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "released"))
        }
    }

    impl Write for SilentStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn client_on(stream: Box<dyn super::IpcStream>, reply_timeout: Duration) -> DiscordIpcClient {
        DiscordIpcClient {
            client_id: "123".to_string(),
            connection: Some(IpcConnection::spawn(stream).expect("connection thread")),
            reply_timeout,
        }
    }

    #[test]
    fn test_frame_layout_is_little_endian_header_then_json() {
        let frame = encode_frame(1, &json!({ "a": 1 })).expect("encodes");
        assert_eq!(&frame[0..4], &1u32.to_le_bytes());
        assert_eq!(&frame[4..8], &7u32.to_le_bytes());
        assert_eq!(&frame[8..], br#"{"a":1}"#);

        let (opcode, payload) = read_frame(&mut Cursor::new(frame)).expect("decodes");
        assert_eq!(opcode, 1);
        assert_eq!(payload, json!({ "a": 1 }));
    }

    #[test]
    fn test_truncated_frame_is_transport_error() {
        let mut frame = encode_frame(1, &json!({ "evt": "READY" })).expect("encodes");
        frame.truncate(10);
        assert!(matches!(
            read_frame(&mut Cursor::new(frame)),
            Err(PresenceError::Transport(_))
        ));
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut header = Vec::new();
        header.extend_from_slice(&1u32.to_le_bytes());
        header.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            read_frame(&mut Cursor::new(header)),
            Err(PresenceError::Parse(_))
        ));
    }

    #[test]
    fn test_socket_candidates_cover_sandboxes_and_dedupe() {
        let bases = vec![PathBuf::from("/run/user/1000"), PathBuf::from("/run/user/1000")];
        let candidates = socket_candidates_from(&bases);
        assert_eq!(candidates.len(), 30);
        assert_eq!(candidates[0], PathBuf::from("/run/user/1000/discord-ipc-0"));
        assert!(candidates.contains(&PathBuf::from(
            "/run/user/1000/app/com.discordapp.Discord/discord-ipc-9"
        )));
    }

    #[test]
    fn test_account_display_name_and_custom_avatar() {
        let account = account_from_ready_user(&json!({
            "id": "42",
            "username": "listener",
            "discriminator": "1234",
            "avatar": "a_abc"
        }));
        assert_eq!(account.display_name, "listener#1234");
        assert_eq!(
            account.avatar_url,
            "https://cdn.discordapp.com/avatars/42/a_abc.gif?size=128"
        );
    }

    #[test]
    fn test_account_without_avatar_uses_default_index() {
        let account = account_from_ready_user(&json!({
            "id": "42",
            "username": "listener",
            "discriminator": "0007"
        }));
        assert_eq!(account.display_name, "listener#0007");
        assert_eq!(
            account.avatar_url,
            "https://cdn.discordapp.com/embed/avatars/2.png"
        );

        let modern = account_from_ready_user(&json!({ "username": "x", "discriminator": "0" }));
        assert_eq!(modern.display_name, "x");
        assert_eq!(modern.avatar_url, "https://cdn.discordapp.com/embed/avatars/0.png");
    }

    #[test]
    fn test_activity_json_uses_millisecond_timestamps() {
        let activity = PresenceActivity {
            details: "A".to_string(),
            state: "B • C".to_string(),
            large_image: "am_logo".to_string(),
            large_text: "C".to_string(),
            small_image: "play".to_string(),
            small_text: "Playing".to_string(),
            start: Some(100),
            end: Some(300),
            buttons: vec![PresenceButton {
                label: "Open".to_string(),
                url: "https://music.test".to_string(),
            }],
        };
        let body = activity_json(&activity);
        assert_eq!(body["type"], json!(2));
        assert_eq!(body["timestamps"]["start"], json!(100_000));
        assert_eq!(body["timestamps"]["end"], json!(300_000));
        assert_eq!(body["assets"]["small_text"], json!("Playing"));
        assert_eq!(body["buttons"][0]["url"], json!("https://music.test"));
    }

    #[test]
    fn test_clear_command_sends_null_activity_with_nonce() {
        let command = set_activity_command(None, 77);
        assert_eq!(command["cmd"], json!("SET_ACTIVITY"));
        assert_eq!(command["args"]["pid"], json!(77));
        assert!(command["args"]["activity"].is_null());
        assert_eq!(command["nonce"].as_str().map(str::len), Some(36));
    }

    #[test]
    fn test_error_event_maps_to_presence_service() {
        let reply = json!({ "evt": "ERROR", "data": { "code": 4000, "message": "bad" } });
        assert_eq!(
            dispatch_error(&reply),
            Some(PresenceError::PresenceService("bad (code 4000)".to_string()))
        );
        assert!(dispatch_error(&json!({ "evt": null })).is_none());
    }

    #[test]
    fn test_silent_peer_fails_within_reply_timeout() {
        let (release, blocked) = mpsc::channel();
        let mut client = client_on(
            Box::new(SilentStream { release: blocked }),
            Duration::from_millis(100),
        );

        let started = Instant::now();
        let result = client.clear();

        assert!(matches!(result, Err(PresenceError::Transport(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(client.connection.is_none());
        drop(release);
    }

    #[test]
    fn test_ping_is_answered_before_reply() {
        let mut incoming = encode_frame(OP_PING, &json!({ "n": 1 })).expect("encodes");
        incoming.extend(encode_frame(OP_FRAME, &json!({ "evt": null })).expect("encodes"));
        let written = Arc::new(Mutex::new(Vec::new()));
        let mut client = client_on(
            Box::new(ScriptedStream {
                incoming: Cursor::new(incoming),
                written: Arc::clone(&written),
            }),
            Duration::from_secs(2),
        );

        client.clear().expect("clear succeeds");

        let written = written.lock().expect("written lock").clone();
        let mut reader = Cursor::new(written);
        let (opcode, command) = read_frame(&mut reader).expect("command frame");
        assert_eq!(opcode, OP_FRAME);
        assert_eq!(command["cmd"], json!("SET_ACTIVITY"));
        let (opcode, pong) = read_frame(&mut reader).expect("pong frame");
        assert_eq!(opcode, OP_PONG);
        assert_eq!(pong, json!({ "n": 1 }));
        assert!(client.connection.is_some());
    }
}
