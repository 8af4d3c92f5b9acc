//! Per-connection handler: login, message routing and teardown.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive the first frame → it must be a `LoginRequest`
//!   2. Admit the name into the lobby → `LoginSuccess`, replay, roster
//!   3. Spawn the writer task that drains the session's outbox
//!   4. Loop: receive messages → relay chat, answer roster requests
//!   5. Leave the lobby, let the writer flush, close the socket

use std::sync::Arc;
use std::time::Duration;

use murmur_protocol::{Codec, Message};
use murmur_room::Lobby;
use murmur_session::{INVALID_LOGIN, Outbox, Session, SessionError, SessionState, login_name};
use murmur_transport::{Connection, ConnectionId, TcpConnection, TransportError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::MurmurError;
use crate::server::ServerState;

type WriterHandle = JoinHandle<Result<(), TransportError>>;

/// Drop guard that takes a session out of the lobby when the handler exits.
///
/// This ensures cleanup happens even if the handler panics or its task is
/// aborted. Since `Drop` is synchronous, we spawn a fire-and-forget task for
/// the async lock. The normal exit path departs explicitly and disarms it.
struct DepartureGuard {
    id: ConnectionId,
    lobby: Arc<Lobby>,
    armed: bool,
}

impl DepartureGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DepartureGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let id = self.id;
        let lobby = Arc::clone(&self.lobby);
        tokio::spawn(async move {
            lobby.depart(id).await;
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C: Codec>(
    conn: TcpConnection<C>,
    state: Arc<ServerState>,
) -> Result<(), MurmurError> {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    let peer = conn.peer_addr();
    let config = &state.session;
    tracing::debug!(%conn_id, %peer, "handling new connection");

    let mut session = Session::new(conn_id);
    session.transition(SessionState::AwaitingLogin)?;

    // --- Step 1: Login ---
    let first = match conn.recv_within(config.read_timeout).await {
        Ok(Some(message)) => Some(message),
        Ok(None) => {
            tracing::debug!(%conn_id, "connection closed before login");
            session.transition(SessionState::Closed)?;
            return Ok(());
        }
        // Well-framed but unknown: answered like any other bad first frame.
        Err(e) if e.is_skippable() => {
            tracing::debug!(%conn_id, error = %e, "undecodable first frame");
            None
        }
        Err(e) => {
            session.transition(SessionState::Closed)?;
            return Err(e.into());
        }
    };

    let login = match &first {
        Some(message) => login_name(message),
        None => Err(SessionError::Handshake(INVALID_LOGIN.to_string())),
    };
    let username = match login {
        Ok(name) => name,
        Err(e) => return reject(&conn, &mut session, config.send_timeout, e).await,
    };

    // --- Step 2: Admission ---
    conn.bind_session(session.session_id()).await;
    let (outbox, outbox_rx) = Outbox::channel(conn_id, config.outbox_capacity);
    if let Err(e) = state
        .lobby
        .admit(session.session_id(), &username, outbox)
        .await
    {
        return reject(&conn, &mut session, config.send_timeout, e).await;
    }
    session.authenticate(username.clone())?;
    tracing::info!(%conn_id, %peer, %username, "user logged in");

    let mut guard = DepartureGuard {
        id: conn_id,
        lobby: Arc::clone(&state.lobby),
        armed: true,
    };

    // --- Step 3: Writer ---
    let mut writer: WriterHandle = tokio::spawn(write_loop(
        Arc::clone(&conn),
        outbox_rx,
        config.send_timeout,
    ));

    // --- Step 4: Message loop ---
    let outcome = serve_session(&conn, &state, &username, &mut writer).await;

    // --- Step 5: Teardown ---
    session.transition(SessionState::Closing)?;
    state.lobby.depart(conn_id).await;
    guard.disarm();

    // The lobby dropped the outbox, so the writer finishes once the queue
    // is flushed.
    if !writer.is_finished() {
        if tokio::time::timeout(config.send_timeout, &mut writer)
            .await
            .is_err()
        {
            tracing::debug!(%conn_id, "writer did not flush in time");
            writer.abort();
        }
    }
    if let Err(e) = conn.close().await {
        tracing::debug!(%conn_id, error = %e, "close failed");
    }
    session.transition(SessionState::Closed)?;
    tracing::info!(%conn_id, %username, "session closed");

    outcome
}

/// Sends `LoginFailure` with the error's text and closes the connection.
async fn reject<C: Codec>(
    conn: &TcpConnection<C>,
    session: &mut Session,
    send_timeout: Duration,
    error: SessionError,
) -> Result<(), MurmurError> {
    let reason = error.to_string();
    tracing::warn!(conn_id = %conn.id(), %reason, "login rejected");

    let failure = Message::LoginFailure { reason };
    if let Err(e) = conn.send_within(failure, send_timeout).await {
        tracing::debug!(conn_id = %conn.id(), error = %e, "could not deliver login failure");
    }
    if let Err(e) = conn.close().await {
        tracing::debug!(conn_id = %conn.id(), error = %e, "close failed");
    }
    session.transition(SessionState::Closed)?;
    Ok(())
}

/// Drains a session's outbox onto its socket. This is the only task that
/// writes to the connection once the session is admitted.
async fn write_loop<C: Codec>(
    conn: Arc<TcpConnection<C>>,
    mut outbox: mpsc::Receiver<Message>,
    send_timeout: Duration,
) -> Result<(), TransportError> {
    while let Some(message) = outbox.recv().await {
        tracing::debug!(conn_id = %conn.id(), kind = %message.message_type(), "sending");
        conn.send_within(message, send_timeout).await?;
    }
    Ok(())
}

/// Reads and routes messages until the client leaves, goes silent, breaks
/// the stream, or its writer stops.
async fn serve_session<C: Codec>(
    conn: &TcpConnection<C>,
    state: &ServerState,
    username: &str,
    writer: &mut WriterHandle,
) -> Result<(), MurmurError> {
    let conn_id = conn.id();

    loop {
        let received = tokio::select! {
            received = conn.recv_within(state.session.read_timeout) => received,
            finished = &mut *writer => {
                return match finished {
                    Ok(Ok(())) => {
                        tracing::info!(%conn_id, username, "evicted from lobby");
                        Ok(())
                    }
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => {
                        tracing::warn!(%conn_id, error = %e, "writer task failed");
                        Ok(())
                    }
                };
            }
        };

        let message = match received {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::info!(%conn_id, username, "connection closed by peer");
                return Ok(());
            }
            Err(e) if e.is_skippable() => {
                tracing::warn!(%conn_id, error = %e, "ignoring undecodable message");
                continue;
            }
            Err(TransportError::Timeout(limit)) => {
                tracing::info!(%conn_id, username, ?limit, "connection timed out");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(%conn_id, kind = %message.message_type(), "received");
        match message {
            Message::UserMessage { content, .. } => {
                if content.trim().is_empty() {
                    continue;
                }
                let relayed = Message::UserMessage {
                    sender: Some(username.to_string()),
                    content,
                };
                state.lobby.broadcast(relayed, Some(conn_id)).await;
            }
            Message::UserListRequest => {
                state.lobby.send_roster(conn_id).await?;
            }
            Message::LogoutRequest => {
                tracing::info!(%conn_id, username, "user logged out");
                return Ok(());
            }
            other => {
                tracing::warn!(
                    %conn_id,
                    kind = %other.message_type(),
                    "ignoring unexpected message"
                );
            }
        }
    }
}
