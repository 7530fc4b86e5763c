//! # Listeners
//!
//! Anything a `Server` can accept connections from.

use async_trait::async_trait;

use crate::endpoint::Connection;

#[async_trait]
pub trait Listener: Send + 'static {
    type Conn: Connection;

    /// Waits for the next connection and a printable peer address.
    async fn accept(&mut self) -> std::io::Result<(Self::Conn, String)>;
}

#[async_trait]
impl Listener for tokio::net::TcpListener {
    type Conn = tokio::net::TcpStream;

    async fn accept(&mut self) -> std::io::Result<(Self::Conn, String)> {
        let (stream, addr) = tokio::net::TcpListener::accept(self).await?;
        stream.set_nodelay(true)?;
        Ok((stream, addr.to_string()))
    }
}

#[cfg(unix)]
#[async_trait]
impl Listener for tokio::net::UnixListener {
    type Conn = tokio::net::UnixStream;

    async fn accept(&mut self) -> std::io::Result<(Self::Conn, String)> {
        let (stream, addr) = tokio::net::UnixListener::accept(self).await?;
        let peer = match addr.as_pathname() {
            Some(path) => path.display().to_string(),
            None => "unnamed".to_string(),
        };
        Ok((stream, peer))
    }
}
