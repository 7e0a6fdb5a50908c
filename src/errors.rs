use thiserror::Error;

/// Errors produced while loading the key=value configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be opened or read.
    #[error("Failed to read config file: {0}")]
    ReadError(String),
}

/// Errors produced while loading the symbol catalog CSV.
///
/// Malformed rows are not errors (they are skipped with a warning);
/// these variants cover the startup-fatal cases only.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The catalog file could not be opened or read.
    #[error("Failed to read symbols file: {0}")]
    ReadError(String),

    /// The catalog parsed but yielded zero usable symbols.
    #[error("No symbols loaded from file: {0}")]
    Empty(String),
}

/// Errors produced by the client-side market-data socket.
#[derive(Error, Debug)]
pub enum SocketError {
    /// The host string is not an IPv4 literal.
    #[error("Invalid IPv4 address: {0}")]
    BadAddress(String),

    /// Socket creation or option manipulation failed.
    #[error("Socket setup failed: {0}")]
    Setup(String),

    /// The connection did not become writable within the timeout, or
    /// completed with a non-zero `SO_ERROR`.
    #[error("Connect to {0} failed: {1}")]
    ConnectFailed(String, String),

    /// An operation was attempted on a socket that is not connected.
    #[error("Socket is not connected")]
    NotConnected,

    /// A hard receive error; the socket is marked disconnected.
    #[error("Receive failed: {0}")]
    RecvFailed(String),

    /// The subscription frame could not be written in full.
    #[error("Subscription send failed: {0}")]
    SendFailed(String),
}

/// Errors produced by the exchange server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Binding or configuring the listening socket failed. Fatal at
    /// startup.
    #[error("Failed to bind server socket: {0}")]
    BindError(String),

    /// The epoll instance could not be created or manipulated.
    #[error("Event loop setup failed: {0}")]
    EventLoopError(String),

    /// Symbol catalog problems bubble up as startup-fatal.
    #[error("Symbol catalog error: {0}")]
    CatalogError(#[from] CatalogError),
}

/// High-level errors returned by the server and client binaries.
///
/// Used at the application entry points for formatting user-facing
/// messages and wrapping lower-level failures.
#[derive(Error, Debug)]
pub enum CliError {
    /// General wrapper around any textual failure.
    #[error("Cli failed with error: {0}")]
    GeneralError(String),
}

impl From<ServerError> for CliError {
    fn from(err: ServerError) -> Self {
        CliError::GeneralError(err.to_string())
    }
}

impl From<SocketError> for CliError {
    fn from(err: SocketError) -> Self {
        CliError::GeneralError(err.to_string())
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::GeneralError(err.to_string())
    }
}

impl From<CatalogError> for CliError {
    fn from(err: CatalogError) -> Self {
        CliError::GeneralError(err.to_string())
    }
}
