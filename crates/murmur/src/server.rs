//! `ChatServer` builder and accept loop.
//!
//! This is the entry point for running a Murmur relay. It ties together all
//! the layers: transport → protocol → session → room.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use murmur_protocol::{Codec, JsonCodec, NativeCodec, ProtocolKind, XmlCodec};
use murmur_room::{DEFAULT_HISTORY_CAPACITY, Lobby};
use murmur_session::SessionConfig;
use murmur_transport::{TcpTransport, Transport};
use tokio::sync::Semaphore;

use crate::config::{DEFAULT_MAX_CLIENTS, ServerConfig};
use crate::handler::handle_connection;
use crate::MurmurError;

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. The lobby
/// does its own locking.
pub(crate) struct ServerState {
    pub(crate) lobby: Arc<Lobby>,
    pub(crate) session: SessionConfig,
}

/// Builder for configuring and starting a Murmur server.
///
/// # Example
///
/// ```rust,no_run
/// use murmur::prelude::*;
///
/// # async fn run() -> Result<(), MurmurError> {
/// let server = ChatServerBuilder::new()
///     .bind("0.0.0.0:8080")
///     .max_clients(32)
///     .build::<JsonCodec>()
///     .await?;
/// server.run().await
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ChatServerBuilder {
    bind_addr: String,
    max_clients: usize,
    history_capacity: usize,
    session_config: SessionConfig,
}

impl ChatServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            max_clients: DEFAULT_MAX_CLIENTS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            session_config: SessionConfig::default(),
        }
    }

    /// Starts from a resolved [`ServerConfig`]. The protocol is chosen by
    /// the codec passed to [`build`](Self::build).
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            bind_addr: config.bind_addr.clone(),
            max_clients: config.max_clients.max(1),
            history_capacity: config.history_capacity,
            session_config: config.session.clone(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets how many connections are serviced at once (at least one).
    pub fn max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients.max(1);
        self
    }

    /// Sets how many recent messages newcomers are replayed.
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Sets the per-connection configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Binds the listener for codec `C`.
    ///
    /// # Errors
    /// Fails if the address cannot be bound; this is the only fatal
    /// condition for a server.
    pub async fn build<C: Codec>(self) -> Result<ChatServer<C>, MurmurError> {
        let transport = TcpTransport::<C>::bind(self.bind_addr.as_str()).await?;

        let state = Arc::new(ServerState {
            lobby: Arc::new(Lobby::new(self.history_capacity)),
            session: self.session_config,
        });

        Ok(ChatServer {
            transport,
            state,
            slots: Arc::new(Semaphore::new(self.max_clients)),
        })
    }
}

impl Default for ChatServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Murmur server speaking codec `C`.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// accepting connections.
pub struct ChatServer<C: Codec> {
    transport: TcpTransport<C>,
    state: Arc<ServerState>,
    slots: Arc<Semaphore>,
}

impl<C: Codec> ChatServer<C> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, MurmurError> {
        Ok(self.transport.local_addr()?)
    }

    /// The shared room, for server-side announcements and inspection.
    pub fn lobby(&self) -> Arc<Lobby> {
        Arc::clone(&self.state.lobby)
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), MurmurError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Runs the accept loop until Ctrl-C.
    pub async fn run_until_ctrl_c(self) -> Result<(), MurmurError> {
        self.run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Runs the accept loop until `shutdown` resolves, then closes the
    /// listener.
    ///
    /// Each accepted connection gets its own task, which waits for one of
    /// `max_clients` slots before it is serviced. Sessions already running
    /// when `shutdown` fires are left to finish on their own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), MurmurError>
    where
        F: Future<Output = ()>,
    {
        let Self {
            mut transport,
            state,
            slots,
        } = self;
        tracing::info!(protocol = %C::KIND, "murmur server running");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested, no longer accepting");
                    break;
                }
                accepted = transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&state);
                        let slots = Arc::clone(&slots);
                        tokio::spawn(async move {
                            let Ok(_slot) = slots.acquire_owned().await else {
                                return;
                            };
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        transport.shutdown().await?;
        Ok(())
    }
}

/// Binds a server for `config.protocol` and runs it until Ctrl-C.
pub async fn serve(config: ServerConfig) -> Result<(), MurmurError> {
    serve_until(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

/// Binds a server for `config.protocol` and runs it until `shutdown`
/// resolves.
pub async fn serve_until<F>(config: ServerConfig, shutdown: F) -> Result<(), MurmurError>
where
    F: Future<Output = ()>,
{
    let builder = ChatServerBuilder::from_config(&config);
    match config.protocol {
        ProtocolKind::Native => builder.build::<NativeCodec>().await?.run_until(shutdown).await,
        ProtocolKind::Json => builder.build::<JsonCodec>().await?.run_until(shutdown).await,
        ProtocolKind::Xml => builder.build::<XmlCodec>().await?.run_until(shutdown).await,
    }
}
