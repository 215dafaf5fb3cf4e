//! Connection acceptor
//!
//! Listens on the configured port and publishes each accepted connection
//! into the first free slot. When every slot is taken the new connection
//! is closed on the spot; there is no queue beyond the kernel backlog.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::mixer::slot::MixerState;
use crate::network::stream::ClientStream;

/// Result of handling one accepted connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Stored in the given slot
    Registered { slot: usize, peer: String },
    /// All slots were full; the connection was closed
    Rejected { peer: String },
}

pub struct Acceptor {
    listener: TcpListener,
    retry_delay: Duration,
}

impl Acceptor {
    /// Bind with address reuse so a restarted server can take the port
    /// straight back. Failures here are fatal to the process.
    pub fn bind(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let addr = config.listen_addr();
        let backlog = config.max_clients.min(i32::MAX as usize) as i32;
        let listener = create_listener(addr, backlog)?;

        tracing::info!("Listening for clients on {}", addr);

        Ok(Self {
            listener,
            retry_delay: config.accept_retry(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.listener
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))
    }

    /// Accept connections forever
    pub fn run(self, state: Arc<MixerState<TcpStream>>) {
        loop {
            match self.accept_one(&state) {
                Ok(AcceptOutcome::Registered { slot, peer }) => {
                    tracing::info!("Connection from {} assigned to slot {}", peer, slot);
                }
                Ok(AcceptOutcome::Rejected { peer }) => {
                    tracing::warn!(
                        "Player limit of {} reached, closing connection from {}",
                        state.capacity(),
                        peer
                    );
                }
                Err(e) => {
                    tracing::warn!("{}; retrying in {:?}", e, self.retry_delay);
                    thread::sleep(self.retry_delay);
                }
            }
        }
    }

    /// Block for one connection and hand it to the slot table
    pub fn accept_one(&self, state: &MixerState<TcpStream>) -> Result<AcceptOutcome, NetworkError> {
        let (stream, addr) = self
            .listener
            .accept()
            .map_err(|e| NetworkError::AcceptFailed(e.to_string()))?;

        // One-byte acks must not sit in Nagle's buffer
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("set_nodelay failed for {}: {}", addr, e);
        }

        let peer = addr.to_string();
        match state.register(stream, peer.clone()) {
            Ok(slot) => Ok(AcceptOutcome::Registered { slot, peer }),
            Err(mut stream) => {
                // Lock already released; closing is plain I/O
                stream.close();
                Ok(AcceptOutcome::Rejected { peer })
            }
        }
    }
}

fn create_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener, NetworkError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    socket
        .bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

    socket
        .listen(backlog.max(1))
        .map_err(|e| NetworkError::ListenFailed(e.to_string()))?;

    Ok(socket.into())
}
