//! Transport session for the Futura controller
//!
//! [`RegisterTransport`] is the seam between the coordinator and the wire: four
//! register calls plus lifecycle queries. [`TcpSession`] implements it over a
//! single Modbus TCP connection that is opened lazily and discarded on any
//! transport fault, so the next call starts from a fresh connect.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::codec::u32_to_words;
use crate::config::FuturaConfig;
use crate::constants::{
    FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_REGISTER, MAX_MBAP_LENGTH, MBAP_HEADER_LEN,
    MODBUS_PROTOCOL_ID,
};
use crate::error::{FuturaError, FuturaResult};
use crate::pdu::{ModbusPdu, PduBuilder};
use crate::register_map::{ReadSegment, RegisterSpace};

/// Lifecycle of the session socket.
///
/// `Disconnected → Connecting → Connected → (Faulted → Disconnected)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Faulted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Counters kept by a transport over its lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub faults: u64,
    pub connects: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Register-level access to one device.
///
/// Implementations must tear down their connection on every error for which
/// [`FuturaError::is_transport_fault`] holds before returning it.
pub trait RegisterTransport: Send {
    /// Read `count` registers starting at `start` (FC03 or FC04)
    fn read_registers(
        &mut self,
        space: RegisterSpace,
        start: u16,
        count: u16,
    ) -> impl Future<Output = FuturaResult<Vec<u16>>> + Send;

    /// Write one holding register (FC06)
    fn write_register(
        &mut self,
        address: u16,
        value: u16,
    ) -> impl Future<Output = FuturaResult<()>> + Send;

    /// Write consecutive holding registers (FC16)
    fn write_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> impl Future<Output = FuturaResult<()>> + Send;

    /// Whether a connection is currently held
    fn connection_state(&self) -> ConnectionState;

    /// Close the connection; the next call reconnects
    fn close(&mut self) -> impl Future<Output = FuturaResult<()>> + Send;

    fn stats(&self) -> TransportStats;

    /// Read the whole of `segment`
    fn read_segment(
        &mut self,
        segment: &ReadSegment,
    ) -> impl Future<Output = FuturaResult<Vec<u16>>> + Send {
        self.read_registers(segment.space, segment.start, segment.count)
    }

    /// Write a 32-bit value as two registers, high word first
    fn write_u32(
        &mut self,
        address: u16,
        value: u32,
    ) -> impl Future<Output = FuturaResult<()>> + Send {
        async move {
            if address == u16::MAX {
                return Err(FuturaError::invalid_data(format!(
                    "32-bit write at {} runs past the address space",
                    address
                )));
            }
            let words = u32_to_words(value);
            self.write_registers(address, &words).await
        }
    }
}

/// Modbus TCP session to one unit
pub struct TcpSession {
    host: String,
    port: u16,
    unit_id: u8,
    connect_timeout: Duration,
    request_timeout: Duration,
    stream: Option<TcpStream>,
    state: ConnectionState,
    transaction_id: u16,
    stats: TransportStats,
}

impl TcpSession {
    /// Create a session with default timeouts; nothing is connected yet.
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8) -> Self {
        let default_timeout = Duration::from_millis(crate::DEFAULT_TIMEOUT_MS);
        Self {
            host: host.into(),
            port,
            unit_id,
            connect_timeout: default_timeout,
            request_timeout: default_timeout,
            stream: None,
            state: ConnectionState::Disconnected,
            transaction_id: 0,
            stats: TransportStats::default(),
        }
    }

    pub fn from_config(config: &FuturaConfig) -> Self {
        Self::new(config.host.clone(), config.port, config.unit_id).with_timeouts(
            Duration::from_millis(config.connect_timeout_ms),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, request_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.request_timeout = request_timeout;
        self
    }

    /// `host:port` of the device
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// Open the connection unless one is already held.
    pub async fn connect(&mut self) -> FuturaResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        debug!("Connecting to {}", self.endpoint());

        let attempt = timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await;

        let stream = match attempt {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.state = ConnectionState::Disconnected;
                self.stats.faults += 1;
                let err = FuturaError::connection(format!("connect to {}: {}", self.endpoint(), e));
                warn!("{}", err);
                return Err(err);
            }
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                self.stats.faults += 1;
                let err = FuturaError::timeout(
                    format!("connect to {}", self.endpoint()),
                    self.connect_timeout.as_millis() as u64,
                );
                warn!("{}", err);
                return Err(err);
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY not set: {}", e);
        }

        self.stream = Some(stream);
        self.state = ConnectionState::Connected;
        self.stats.connects += 1;
        info!("Connected to {} (unit {})", self.endpoint(), self.unit_id);
        Ok(())
    }

    /// Drop the socket after a transport fault.
    fn fault(&mut self, err: &FuturaError) {
        self.state = ConnectionState::Faulted;
        self.stats.faults += 1;
        warn!("Session to {} faulted: {}", self.endpoint(), err);
        self.stream = None;
        self.state = ConnectionState::Disconnected;
    }

    /// One request/response exchange, connecting first if needed.
    ///
    /// `parse` validates the reply; a fault from either the exchange or the
    /// parse tears the connection down.
    async fn call<R, F>(&mut self, request: ModbusPdu, parse: F) -> FuturaResult<R>
    where
        F: FnOnce(&ModbusPdu) -> FuturaResult<R> + Send,
        R: Send,
    {
        self.connect().await?;

        let result = match self.transact(&request).await {
            Ok(response) => parse(&response),
            Err(e) => Err(e),
        };

        if let Err(err) = &result {
            if err.is_transport_fault() {
                self.fault(err);
            }
        }
        result
    }

    async fn transact(&mut self, request: &ModbusPdu) -> FuturaResult<ModbusPdu> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| FuturaError::connection("not connected"))?;

        self.transaction_id = self.transaction_id.wrapping_add(1);
        let transaction_id = self.transaction_id;

        let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + request.len());
        frame.put_u16(transaction_id);
        frame.put_u16(MODBUS_PROTOCOL_ID);
        frame.put_u16((request.len() + 1) as u16);
        frame.put_u8(self.unit_id);
        frame.put_slice(request.as_slice());

        let request_timeout = self.request_timeout;
        let exchange = timeout(request_timeout, write_and_read(stream, &frame)).await;

        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;

        let (header, pdu) = match exchange {
            Ok(result) => result?,
            Err(_) => {
                return Err(FuturaError::timeout(
                    format!("transaction {} to {}", transaction_id, self.endpoint()),
                    request_timeout.as_millis() as u64,
                ))
            }
        };

        self.stats.responses_received += 1;
        self.stats.bytes_received += (MBAP_HEADER_LEN + pdu.len()) as u64;

        if header.transaction_id != transaction_id {
            return Err(FuturaError::protocol(format!(
                "transaction id mismatch: sent {}, received {}",
                transaction_id, header.transaction_id
            )));
        }
        if header.protocol_id != MODBUS_PROTOCOL_ID {
            return Err(FuturaError::protocol(format!(
                "unexpected protocol id {}",
                header.protocol_id
            )));
        }
        if header.unit_id != self.unit_id {
            return Err(FuturaError::protocol(format!(
                "unit id mismatch: sent {}, received {}",
                self.unit_id, header.unit_id
            )));
        }

        ModbusPdu::from_slice(&pdu)
    }
}

impl RegisterTransport for TcpSession {
    async fn read_registers(
        &mut self,
        space: RegisterSpace,
        start: u16,
        count: u16,
    ) -> FuturaResult<Vec<u16>> {
        let fc = space.read_function();
        let request = PduBuilder::read_registers(fc, start, count)?;
        let registers = self
            .call(request, move |response| response.parse_registers(fc, count))
            .await?;
        debug!("Read {} {} register(s) at {}", count, space, start);
        Ok(registers)
    }

    async fn write_register(&mut self, address: u16, value: u16) -> FuturaResult<()> {
        let request = PduBuilder::write_single_register(address, value)?;
        self.call(request, move |response| {
            response.parse_write_ack(FC_WRITE_SINGLE_REGISTER, address, value)
        })
        .await?;
        debug!("Wrote holding {} = {}", address, value);
        Ok(())
    }

    async fn write_registers(&mut self, address: u16, values: &[u16]) -> FuturaResult<()> {
        let request = PduBuilder::write_multiple_registers(address, values)?;
        let quantity = values.len() as u16;
        self.call(request, move |response| {
            response.parse_write_ack(FC_WRITE_MULTIPLE_REGISTERS, address, quantity)
        })
        .await?;
        debug!("Wrote {} holding register(s) at {}", quantity, address);
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
    }

    async fn close(&mut self) -> FuturaResult<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of {} failed: {}", self.endpoint(), e);
            }
            info!("Closed connection to {}", self.endpoint());
        }
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }
}

struct MbapHeader {
    transaction_id: u16,
    protocol_id: u16,
    unit_id: u8,
}

async fn write_and_read(
    stream: &mut TcpStream,
    frame: &[u8],
) -> FuturaResult<(MbapHeader, Vec<u8>)> {
    stream.write_all(frame).await?;
    read_frame(stream).await
}

/// Read one MBAP frame, returning the header and the PDU bytes.
async fn read_frame(stream: &mut TcpStream) -> FuturaResult<(MbapHeader, Vec<u8>)> {
    let mut header = [0u8; MBAP_HEADER_LEN];
    stream.read_exact(&mut header).await?;

    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    // Unit id plus at least a function code
    if !(2..=MAX_MBAP_LENGTH).contains(&length) {
        return Err(FuturaError::protocol(format!(
            "invalid MBAP length {}",
            length
        )));
    }

    let mut pdu = vec![0u8; length - 1];
    stream.read_exact(&mut pdu).await?;

    let header = MbapHeader {
        transaction_id: u16::from_be_bytes([header[0], header[1]]),
        protocol_id: u16::from_be_bytes([header[2], header[3]]),
        unit_id: header[6],
    };
    Ok((header, pdu))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok, block_on};

    #[test]
    fn test_new_session_is_disconnected() {
        let session = TcpSession::new("192.0.2.10", 502, 1);
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(session.endpoint(), "192.0.2.10:502");
        assert_eq!(session.stats(), TransportStats::default());
    }

    #[test]
    fn test_from_config() {
        let config = FuturaConfig {
            host: "futura.local".into(),
            port: 1502,
            unit_id: 7,
            connect_timeout_ms: 250,
            request_timeout_ms: 750,
            ..FuturaConfig::default()
        };
        let session = TcpSession::from_config(&config);
        assert_eq!(session.endpoint(), "futura.local:1502");
        assert_eq!(session.unit_id(), 7);
        assert_eq!(session.connect_timeout, Duration::from_millis(250));
        assert_eq!(session.request_timeout, Duration::from_millis(750));
    }

    #[tokio::test]
    async fn test_refused_connect_leaves_session_disconnected() {
        // Bind then drop to obtain a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut session = TcpSession::new("127.0.0.1", port, 1);
        let err = session
            .read_registers(RegisterSpace::Input, 14, 8)
            .await
            .unwrap_err();

        assert!(err.is_transport_fault());
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(session.stats().faults, 1);
        assert_eq!(session.stats().requests_sent, 0);
    }

    #[test]
    fn test_invalid_request_rejected_before_connect() {
        let mut session = TcpSession::new("192.0.2.10", 502, 1);
        let err = assert_err!(block_on(session.read_registers(RegisterSpace::Holding, 0, 0)));
        assert!(err.is_rejected_locally());
        assert_eq!(session.stats().connects, 0);
    }

    #[test]
    fn test_u32_write_at_last_address_rejected_before_connect() {
        let mut session = TcpSession::new("192.0.2.10", 502, 1);
        let err = assert_err!(block_on(session.write_u32(u16::MAX, 1)));
        assert!(matches!(err, FuturaError::InvalidData { .. }));
        assert_eq!(session.stats().connects, 0);
        assert_eq!(session.stats().faults, 0);
    }

    #[test]
    fn test_close_without_connection() {
        let mut session = TcpSession::new("192.0.2.10", 502, 1);
        assert_ok!(block_on(session.close()));
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }
}
