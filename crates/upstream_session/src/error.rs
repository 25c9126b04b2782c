use thiserror::Error;

/// Errors from the master and chat sessions.
///
/// The first three variants are the operator-facing authentication
/// taxonomy: they are surfaced once and never retried in a tight loop.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("master server rejected the credentials")]
    BadCredentials,
    #[error("account has no hosting permission")]
    NoHostingPermission,
    #[error("master server outage (HTTP {0})")]
    MasterOutage(u16),
    #[error("unexpected master server response (HTTP {0})")]
    UnexpectedStatus(u16),
    #[error("authentication failed: {detail}")]
    AuthRejected { detail: String },
    #[error("could not parse master server response: {0}")]
    ParseFailure(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chat server rejected the handshake: {0}")]
    HandshakeRejected(String),
    #[error("chat server closed the connection during handshake")]
    HandshakeEof,
    #[error("chat connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wire protocol error: {0}")]
    Wire(#[from] wire_protocol::WireError),
    #[error("not connected to the chat server")]
    NotConnected,
}
