//! Client connection core: login, sending and a background event reader.
//!
//! A front end (terminal, GUI) drives a [`ChatClient`] and renders the
//! [`ClientEvent`]s it produces. Nothing here draws anything.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use murmur_protocol::{Codec, Message};
use murmur_session::SessionError;
use murmur_transport::{Connection, TcpConnection, TransportError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::MurmurError;

/// How long `connect` waits for the server's answer to a login.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the client's connection stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// The connection went away without the user logging out.
    Disconnected,
    /// The server refused the login, with its reason.
    LoginFailed(String),
}

/// Something the front end should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Chat, server, join and leave traffic.
    Message(Message),
    /// The full list of logged-in users.
    Roster(Vec<String>),
    ConnectionState(ConnectionState),
}

/// A logged-in chat connection speaking codec `C`.
///
/// # Example
///
/// ```rust,no_run
/// use murmur::prelude::*;
///
/// # async fn run() -> Result<(), MurmurError> {
/// let (client, mut events) = ChatClient::<JsonCodec>::connect("127.0.0.1:8080", "alice").await?;
/// client.send_chat("hello").await?;
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct ChatClient<C: Codec> {
    addr: String,
    username: String,
    conn: Arc<TcpConnection<C>>,
    reader: JoinHandle<()>,
    events: mpsc::UnboundedSender<ClientEvent>,
    logged_out: Arc<AtomicBool>,
}

impl<C: Codec> ChatClient<C> {
    /// Connects to `addr` and logs in as `username`.
    ///
    /// On success the roster has already been requested and a background
    /// task is forwarding server traffic to the returned receiver.
    ///
    /// # Errors
    /// [`MurmurError::Session`] with [`SessionError::Handshake`] carrying
    /// the server's reason when the login is refused; transport errors when
    /// the server cannot be reached.
    pub async fn connect(
        addr: impl Into<String>,
        username: impl Into<String>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), MurmurError> {
        let addr = addr.into();
        let username = username.into();
        let (events, events_rx) = mpsc::unbounded_channel();
        let logged_out = Arc::new(AtomicBool::new(false));

        let (conn, reader) = open::<C>(&addr, &username, &events, &logged_out).await?;

        Ok((
            Self {
                addr,
                username,
                conn,
                reader,
                events,
                logged_out,
            },
            events_rx,
        ))
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// `true` while the background reader is running and the user has not
    /// logged out.
    pub fn is_connected(&self) -> bool {
        !self.logged_out.load(Ordering::SeqCst) && !self.reader.is_finished()
    }

    /// Sends a chat line. Empty or whitespace-only text is not sent.
    pub async fn send_chat(&self, text: &str) -> Result<(), MurmurError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        self.conn.send(Message::chat(text)).await?;
        Ok(())
    }

    /// Asks the server for the current roster; it arrives as
    /// [`ClientEvent::Roster`].
    pub async fn request_roster(&self) -> Result<(), MurmurError> {
        self.conn.send(Message::UserListRequest).await?;
        Ok(())
    }

    /// Tells the server we are leaving and closes the connection.
    ///
    /// A dead connection is not an error here: the user is gone either way.
    pub async fn logout(&mut self) -> Result<(), MurmurError> {
        if self.logged_out.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.conn.send(Message::LogoutRequest).await {
            tracing::debug!(error = %e, "logout request not delivered");
        }
        if let Err(e) = self.conn.close().await {
            tracing::debug!(error = %e, "close failed");
        }
        self.reader.abort();
        let _ = self
            .events
            .send(ClientEvent::ConnectionState(ConnectionState::Disconnected));
        tracing::info!(username = %self.username, "logged out");
        Ok(())
    }

    /// Opens a new connection and logs in again under the same name.
    /// Does nothing while still connected.
    pub async fn reconnect(&mut self) -> Result<(), MurmurError> {
        if self.is_connected() {
            return Ok(());
        }
        self.reader.abort();
        self.logged_out.store(false, Ordering::SeqCst);

        let (conn, reader) =
            open::<C>(&self.addr, &self.username, &self.events, &self.logged_out).await?;
        self.conn = conn;
        self.reader = reader;
        Ok(())
    }
}

impl<C: Codec> Drop for ChatClient<C> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Connects, logs in and starts the reader task.
async fn open<C: Codec>(
    addr: &str,
    username: &str,
    events: &mpsc::UnboundedSender<ClientEvent>,
    logged_out: &Arc<AtomicBool>,
) -> Result<(Arc<TcpConnection<C>>, JoinHandle<()>), MurmurError> {
    let _ = events.send(ClientEvent::ConnectionState(ConnectionState::Connecting));

    let conn = match login::<C>(addr, username).await {
        Ok(conn) => conn,
        Err(e) => {
            let state = match e.login_failure() {
                Some(reason) => ConnectionState::LoginFailed(reason),
                None => ConnectionState::Disconnected,
            };
            let _ = events.send(ClientEvent::ConnectionState(state));
            return Err(e);
        }
    };
    let conn = Arc::new(conn);
    let _ = events.send(ClientEvent::ConnectionState(ConnectionState::Connected));
    tracing::info!(%addr, username, protocol = %C::KIND, "logged in");

    conn.send(Message::UserListRequest).await?;

    let reader = tokio::spawn(read_loop(
        Arc::clone(&conn),
        events.clone(),
        Arc::clone(logged_out),
    ));
    Ok((conn, reader))
}

/// Sends the login and waits for the verdict.
async fn login<C: Codec>(addr: &str, username: &str) -> Result<TcpConnection<C>, MurmurError> {
    let conn = TcpConnection::<C>::connect(addr).await?;
    conn.send(Message::LoginRequest {
        username: username.to_string(),
    })
    .await?;

    match conn.recv_within(LOGIN_TIMEOUT).await? {
        Some(Message::LoginSuccess { session_id }) => {
            if let Some(session_id) = session_id {
                conn.bind_session(&session_id).await;
            }
            Ok(conn)
        }
        Some(Message::LoginFailure { reason }) => {
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "close failed");
            }
            Err(SessionError::Handshake(reason).into())
        }
        Some(other) => {
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "close failed");
            }
            Err(SessionError::Handshake(format!(
                "unexpected {} in reply to login",
                other.message_type()
            ))
            .into())
        }
        None => Err(TransportError::ConnectionLost("closed during login".into()).into()),
    }
}

/// Forwards server traffic as events until the connection ends.
async fn read_loop<C: Codec>(
    conn: Arc<TcpConnection<C>>,
    events: mpsc::UnboundedSender<ClientEvent>,
    logged_out: Arc<AtomicBool>,
) {
    loop {
        let event = match conn.recv().await {
            Ok(Some(Message::UserListResponse { users })) => ClientEvent::Roster(users),
            Ok(Some(message)) => ClientEvent::Message(message),
            Ok(None) => break,
            Err(e) if e.is_skippable() => {
                tracing::warn!(error = %e, "ignoring undecodable message");
                continue;
            }
            Err(e) => {
                tracing::debug!(error = %e, "read failed");
                break;
            }
        };
        if events.send(event).is_err() {
            // Nobody is listening any more.
            return;
        }
    }

    if !logged_out.load(Ordering::SeqCst) {
        tracing::info!("connection lost");
        let _ = events.send(ClientEvent::ConnectionState(ConnectionState::Disconnected));
    }
}
