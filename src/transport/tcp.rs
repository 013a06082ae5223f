//! TCP link to the Gecko stub.

use super::Transport;
use crate::error::{ErrorCode, GeckoError, Result};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Blocking TCP transport with connect and per-read timeouts.
pub struct TcpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    io_timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(3),
            io_timeout: Duration::from_secs(2),
            stream: None,
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, io: Duration) -> Self {
        self.connect_timeout = connect;
        self.io_timeout = io;
        self
    }

    pub fn peer(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn resolve(&self) -> Result<Vec<SocketAddr>> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map(|addrs| addrs.collect())
            .map_err(|e| GeckoError::io(ErrorCode::TransportQueryError, e))
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "not connected"))
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let mut last_err = None;
        for addr in self.resolve()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(self.io_timeout))
                        .and_then(|_| stream.set_write_timeout(Some(self.io_timeout)))
                        .and_then(|_| stream.set_nodelay(true))
                        .map_err(|e| GeckoError::io(ErrorCode::TransportTimeoutSetError, e))?;
                    log::debug!("connected to {}", addr);
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    log::debug!("connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => GeckoError::io(ErrorCode::NoTransportFound, e),
            None => GeckoError::with_detail(ErrorCode::NoTransportFound, self.peer()),
        })
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.shutdown(std::net::Shutdown::Both).ok();
            log::debug!("disconnected from {}", self.peer());
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let stream = self.stream()?;
        stream.write_all(data)?;
        stream.flush()
    }

    fn send_partial(&mut self, data: &[u8]) -> io::Result<usize> {
        let stream = self.stream()?;
        let written = stream.write(data)?;
        stream.flush()?;
        Ok(written)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.stream()?.read_exact(buf)
    }

    fn try_recv_byte(&mut self) -> io::Result<Option<u8>> {
        let stream = self.stream()?;
        stream.set_nonblocking(true)?;
        let mut byte = [0u8; 1];
        let result = match stream.read(&mut byte) {
            Ok(0) => Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            Ok(_) => Ok(Some(byte[0])),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        };
        stream.set_nonblocking(false)?;
        result
    }

    fn purge(&mut self) -> Result<()> {
        let purge_err = |e| GeckoError::io(ErrorCode::TransportPurgeError, e);
        let stream = self.stream().map_err(purge_err)?;
        stream.set_nonblocking(true).map_err(purge_err)?;
        let mut scratch = [0u8; 256];
        let result = loop {
            match stream.read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(purge_err(e)),
            }
        };
        stream.set_nonblocking(false).map_err(purge_err)?;
        result
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}
