//! Raw TCP connection to one backend node
//!
//! Buffered synchronous TCP with the RESP codec on top. One request,
//! one response; the borrower owns the connection exclusively.

use std::io::{self, BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::cluster::Endpoint;
use crate::utils::{ConnectionError, RespDecoder, RespEncoder, RespValue};

const WRITE_BUF_CAPACITY: usize = 8192;
const READ_BUF_CAPACITY: usize = 8192;

/// A single logical connection to one backend node
///
/// Reader and writer halves are split so the write buffer can be flushed
/// independently of pending reads.
pub struct RawConnection {
    writer: BufWriter<TcpStream>,
    reader: BufReader<TcpStream>,
}

impl RawConnection {
    /// Open a TCP connection to the endpoint
    ///
    /// `timeout` bounds the connect as well as each read and write.
    pub fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self, ConnectionError> {
        let connect_failed = |source: io::Error| ConnectionError::ConnectFailed {
            host: endpoint.host.clone(),
            port: endpoint.port,
            source,
        };

        let addr = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(connect_failed)?
            .next()
            .ok_or_else(|| {
                connect_failed(io::Error::new(io::ErrorKind::NotFound, "No addresses found"))
            })?;

        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(connect_failed)?;

        stream.set_nodelay(true).ok(); // Disable Nagle's algorithm
        stream.set_read_timeout(Some(timeout)).ok();
        stream.set_write_timeout(Some(timeout)).ok();

        let writer = BufWriter::with_capacity(
            WRITE_BUF_CAPACITY,
            stream.try_clone().map_err(connect_failed)?,
        );
        let reader = BufReader::with_capacity(READ_BUF_CAPACITY, stream);

        Ok(Self { writer, reader })
    }

    /// Send an encoded command and receive one response
    pub fn execute(&mut self, encoder: &RespEncoder) -> io::Result<RespValue> {
        self.writer.write_all(encoder.as_bytes())?;
        self.writer.flush()?;

        let mut decoder = RespDecoder::new(&mut self.reader);
        decoder.decode()
    }
}
