//! Per-connection worker: authentication handshake, the lockstep request
//! loop and teardown.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bazaar_shared::codec::{self, FrameBuf};
use bazaar_shared::constants::{AUTH_LOGIN, AUTH_SIGNUP, FIELD_SEPARATOR};
use bazaar_shared::types::{normalize_username, validate_username};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::dispatcher::{self, AppState, Response};
use crate::error::ServerError;
use crate::presence::SessionHandle;

/// An authenticated connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: String,
    pub handle: SessionHandle,
}

impl Session {
    pub fn new(user: String, handle: SessionHandle) -> Self {
        Self { user, handle }
    }
}

/// Serve one client until it logs out, disconnects, times out or breaks the
/// framing. Presence is released on every exit path.
pub async fn serve_connection(state: AppState, mut stream: TcpStream, peer: SocketAddr) {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    let session = match handshake(&state, &mut reader, &mut writer, peer).await {
        Ok(Some(session)) => session,
        Ok(None) => return,
        Err(e) => {
            debug!(peer = %peer, error = %e, "Connection lost during handshake");
            return;
        }
    };

    info!(
        user = %session.user,
        peer = %peer,
        session = %session.handle.session_id,
        "User connected"
    );

    match request_loop(&state, &session, &mut reader, &mut writer).await {
        Ok(()) => info!(user = %session.user, "User logged out"),
        Err(ServerError::Transient(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
            info!(user = %session.user, "Client disconnected")
        }
        Err(e) if e.is_fatal() => info!(user = %session.user, error = %e, "Connection dropped"),
        Err(e) => warn!(user = %session.user, error = %e, "Connection closed on error"),
    }

    state
        .presence
        .unregister(&session.user, session.handle.session_id)
        .await;
}

async fn request_loop<R, W>(
    state: &AppState,
    session: &Session,
    reader: &mut R,
    writer: &mut W,
) -> Result<(), ServerError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let max_blob = state.config.max_payload_bytes;

    loop {
        let read = dispatcher::read_request(reader, max_blob);
        let request = with_timeout(state.config.read_timeout, read).await?;

        let Some(request) = request else {
            continue;
        };

        let response = dispatcher::dispatch(state, session, request).await;
        if response == Response::Close {
            return Ok(());
        }

        if let Some(frame) = response.encode()? {
            codec::write_frame(writer, frame).await?;
        }
    }
}

/// Bound a client read by the configured idle limit.
async fn with_timeout<T>(
    limit: Option<Duration>,
    read: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timeout"))?,
        None => read.await,
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Authenticate the client. `Ok(None)` means the client was turned away and
/// the connection should be dropped.
///
/// Every read is bounded by the idle limit, so a client that never finishes
/// authenticating cannot hold its connection slot.
async fn handshake<R, W>(
    state: &AppState,
    reader: &mut R,
    writer: &mut W,
    peer: SocketAddr,
) -> io::Result<Option<Session>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mode = with_timeout(state.config.read_timeout, codec::read_short(reader)).await?;
    match codec::decode_text(&mode).ok().as_deref() {
        Some(AUTH_LOGIN) => login(state, reader, writer, peer).await,
        Some(AUTH_SIGNUP) => signup(state, reader, writer, peer).await,
        _ => {
            debug!(peer = %peer, "Unknown handshake mode");
            Ok(None)
        }
    }
}

async fn login<R, W>(
    state: &AppState,
    reader: &mut R,
    writer: &mut W,
    peer: SocketAddr,
) -> io::Result<Option<Session>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let Some(username) = read_username(state, reader).await? else {
        return reject(writer, peer, "malformed username").await;
    };

    let name = username.clone();
    match state.store.call(move |db| db.user_exists(&name)).await {
        Ok(true) => {}
        Ok(false) => return reject(writer, peer, "unknown user").await,
        Err(e) => {
            warn!(error = %e, "User lookup failed");
            return reject(writer, peer, "lookup failed").await;
        }
    }
    write_flag(writer, true).await?;

    let password = read_text(state, reader).await?.unwrap_or_default();
    let name = username.clone();
    let verified = state
        .store
        .call(move |db| db.verify_credentials(&name, &password))
        .await;
    if !matches!(verified, Ok(true)) {
        return reject(writer, peer, "bad credentials").await;
    }

    let handle = SessionHandle::new(peer);
    if let Err(e) = state.presence.register(&username, handle.clone()).await {
        warn!(user = %username, peer = %peer, "Rejected duplicate login");
        return reject(writer, peer, &e.to_string()).await;
    }

    if let Err(e) = write_flag(writer, true).await {
        state.presence.unregister(&username, handle.session_id).await;
        return Err(e);
    }
    Ok(Some(Session::new(username, handle)))
}

async fn signup<R, W>(
    state: &AppState,
    reader: &mut R,
    writer: &mut W,
    peer: SocketAddr,
) -> io::Result<Option<Session>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let Some(username) = read_username(state, reader).await? else {
        return reject(writer, peer, "malformed username").await;
    };
    if !state.config.registration_open {
        return reject(writer, peer, "registration closed").await;
    }

    let name = username.clone();
    match state.store.call(move |db| db.user_exists(&name)).await {
        Ok(false) => {}
        Ok(true) => return reject(writer, peer, "username taken").await,
        Err(e) => {
            warn!(error = %e, "User lookup failed");
            return reject(writer, peer, "lookup failed").await;
        }
    }
    write_flag(writer, true).await?;

    let credentials = read_text(state, reader).await?.unwrap_or_default();
    let Some((display_name, password)) = credentials.split_once(FIELD_SEPARATOR) else {
        return reject(writer, peer, "malformed signup").await;
    };
    let display_name = match display_name.trim() {
        "" => username.clone(),
        name => name.to_string(),
    };
    let password = password.to_string();

    let name = username.clone();
    let created = state
        .store
        .call(move |db| db.create_user(&name, &password, &display_name))
        .await;
    match created {
        Ok(_) => info!(user = %username, "Registered new user"),
        // Also covers a concurrent signup taking the name between the steps.
        Err(e) => return reject(writer, peer, &e.to_string()).await,
    }

    let handle = SessionHandle::new(peer);
    if let Err(e) = state.presence.register(&username, handle.clone()).await {
        return reject(writer, peer, &e.to_string()).await;
    }
    if let Err(e) = write_flag(writer, true).await {
        state.presence.unregister(&username, handle.session_id).await;
        return Err(e);
    }
    Ok(Some(Session::new(username, handle)))
}

/// Read a short text field. `Ok(None)` when it is not valid UTF-8.
async fn read_text<R: AsyncRead + Unpin>(
    state: &AppState,
    reader: &mut R,
) -> io::Result<Option<String>> {
    let raw = with_timeout(state.config.read_timeout, codec::read_short(reader)).await?;
    Ok(codec::decode_text(&raw).ok())
}

/// Read and normalize a username. `Ok(None)` when it is unusable.
async fn read_username<R: AsyncRead + Unpin>(
    state: &AppState,
    reader: &mut R,
) -> io::Result<Option<String>> {
    Ok(read_text(state, reader)
        .await?
        .map(|raw| normalize_username(&raw))
        .filter(|name| validate_username(name).is_ok()))
}

async fn reject<W: AsyncWrite + Unpin>(
    writer: &mut W,
    peer: SocketAddr,
    reason: &str,
) -> io::Result<Option<Session>> {
    info!(peer = %peer, reason, "Authentication rejected");
    write_flag(writer, false).await?;
    Ok(None)
}

async fn write_flag<W: AsyncWrite + Unpin>(writer: &mut W, ok: bool) -> io::Result<()> {
    let mut frame = FrameBuf::new();
    frame.flag(ok);
    codec::write_frame(writer, frame.freeze()).await
}

#[cfg(test)]
mod tests {
    use bazaar_shared::constants::SHORT_FIELD_LEN;
    use bazaar_store::Database;

    use super::*;
    use crate::config::ServerConfig;

    fn short(text: &str) -> Vec<u8> {
        let mut field = vec![0u8; SHORT_FIELD_LEN];
        field[..text.len()].copy_from_slice(text.as_bytes());
        field
    }

    fn app_state(registration_open: bool) -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("session.db")).unwrap();
        db.create_user("alice", "secret", "Alice").unwrap();
        let config = ServerConfig {
            registration_open,
            ..ServerConfig::default()
        };
        (dir, AppState::new(db, config))
    }

    fn peer() -> SocketAddr {
        ([127, 0, 0, 1], 50000).into()
    }

    async fn run_handshake(state: &AppState, input: Vec<u8>) -> (Option<Session>, Vec<u8>) {
        let mut reader = input.as_slice();
        let mut written = Vec::new();
        let session = handshake(state, &mut reader, &mut written, peer())
            .await
            .unwrap();
        (session, written)
    }

    #[tokio::test]
    async fn test_unknown_user_rejected_before_password() {
        let (_dir, state) = app_state(true);
        let mut input = short(AUTH_LOGIN);
        input.extend(short("ghost"));

        // No password follows; the handshake must not try to read one.
        let (session, written) = run_handshake(&state, input).await;
        assert!(session.is_none());
        assert_eq!(written, b"0");
    }

    #[tokio::test]
    async fn test_login_and_duplicate_login() {
        let (_dir, state) = app_state(true);
        let mut input = short(AUTH_LOGIN);
        input.extend(short(" Alice "));
        input.extend(short("secret"));

        let (session, written) = run_handshake(&state, input.clone()).await;
        assert_eq!(session.unwrap().user, "alice");
        assert_eq!(written, b"11");

        let (second, written) = run_handshake(&state, input).await;
        assert!(second.is_none());
        assert_eq!(written, b"10");
        assert!(state.presence.is_online("alice").await);
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let (_dir, state) = app_state(true);
        let mut input = short(AUTH_LOGIN);
        input.extend(short("alice"));
        input.extend(short("nope"));

        let (session, written) = run_handshake(&state, input).await;
        assert!(session.is_none());
        assert_eq!(written, b"10");
        assert!(!state.presence.is_online("alice").await);
    }

    #[tokio::test]
    async fn test_signup() {
        let (_dir, state) = app_state(true);
        let mut input = short(AUTH_SIGNUP);
        input.extend(short("Bob"));
        input.extend(short("Bob Builder|pa|ss"));

        let (session, written) = run_handshake(&state, input).await;
        assert_eq!(session.unwrap().user, "bob");
        assert_eq!(written, b"11");

        let db = state.store.database();
        assert_eq!(db.get_user("bob").unwrap().display_name, "Bob Builder");
        assert!(db.verify_credentials("bob", "pa|ss").unwrap());
    }

    #[tokio::test]
    async fn test_signup_taken_or_closed() {
        let (_dir, state) = app_state(true);
        let mut input = short(AUTH_SIGNUP);
        input.extend(short("ALICE"));
        let (session, written) = run_handshake(&state, input).await;
        assert!(session.is_none());
        assert_eq!(written, b"0");

        let (_dir, closed) = app_state(false);
        let mut input = short(AUTH_SIGNUP);
        input.extend(short("carol"));
        let (session, written) = run_handshake(&closed, input).await;
        assert!(session.is_none());
        assert_eq!(written, b"0");
    }

    fn idle_limited_state(limit: Duration) -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("session.db")).unwrap();
        db.create_user("alice", "secret", "Alice").unwrap();
        let config = ServerConfig {
            read_timeout: Some(limit),
            ..ServerConfig::default()
        };
        (dir, AppState::new(db, config))
    }

    #[tokio::test]
    async fn test_silent_client_times_out_in_handshake() {
        let (_dir, state) = idle_limited_state(Duration::from_millis(50));
        let (server_side, _client_side) = tokio::io::duplex(64);
        let (reader, mut writer) = tokio::io::split(server_side);
        let mut reader = BufReader::new(reader);

        let err = handshake(&state, &mut reader, &mut writer, peer())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_stalled_password_times_out() {
        let (_dir, state) = idle_limited_state(Duration::from_millis(50));
        let (server_side, mut client_side) = tokio::io::duplex(4 * SHORT_FIELD_LEN);

        let mut hello = short(AUTH_LOGIN);
        hello.extend(short("alice"));
        tokio::io::AsyncWriteExt::write_all(&mut client_side, &hello)
            .await
            .unwrap();

        let (reader, mut writer) = tokio::io::split(server_side);
        let mut reader = BufReader::new(reader);
        let err = handshake(&state, &mut reader, &mut writer, peer())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(!state.presence.is_online("alice").await);
    }

    #[tokio::test]
    async fn test_idle_session_is_dropped_as_fatal() {
        let (_dir, state) = idle_limited_state(Duration::from_millis(50));
        let session = Session::new("alice".into(), SessionHandle::new(peer()));
        let (server_side, _client_side) = tokio::io::duplex(64);
        let (mut reader, mut writer) = tokio::io::split(server_side);

        let err = request_loop(&state, &session, &mut reader, &mut writer)
            .await
            .err()
            .unwrap();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            ServerError::Transient(ref e) if e.kind() == io::ErrorKind::TimedOut
        ));
    }

    #[tokio::test]
    async fn test_unknown_mode_closes_silently() {
        let (_dir, state) = app_state(true);
        let (session, written) = run_handshake(&state, short("maybe")).await;
        assert!(session.is_none());
        assert!(written.is_empty());
    }
}
