//! # Modbus TCP Responder
//!
//! Serves the shared [`DeviceState`] to Modbus masters.
//!
//! - [`handle_request`]: one decoded request against the locked state
//! - [`Session`]: one connection; buffers bytes, answers complete frames,
//!   enforces the idle timeout
//! - [`ModbusTcpServer`]: accept loop with a connection limit and shutdown
//!
//! Requests the simulator does not understand are dropped without a
//! response; exception responses are not produced.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::constants::{COIL_ON, MAX_READ_COILS, MAX_READ_REGISTERS, RECEIVE_BUFFER_SIZE};
use crate::error::{ModbusError, ModbusResult};
use crate::frame::{decode_frame, encode_frame};
use crate::pdu::{ModbusPdu, PduBuilder};
use crate::protocol::ModbusRequest;
use crate::state::{lock_state, DeviceState, SharedState};

/// Coil some unit families write periodically as a heartbeat
pub const KEEPALIVE_COIL: u16 = 31;

/// Apply one request to the state and build its response PDU.
///
/// The caller holds the state lock for the whole call, so a write, its dirty
/// mark, mirror copy and front-panel unpack are observed together.
pub fn handle_request(state: &mut DeviceState, request: &ModbusRequest) -> ModbusResult<ModbusPdu> {
    let function = request.function();
    match request {
        ModbusRequest::ReadCoils { address, quantity } => {
            let count = (*quantity).min(MAX_READ_COILS as u16);
            debug!("{} read {} coils from {}", function, count, address);
            PduBuilder::build_read_coils_response(&state.registers.read_coils(*address, count))
        }
        ModbusRequest::ReadHoldingRegisters { address, quantity }
        | ModbusRequest::ReadInputRegisters { address, quantity } => {
            let count = (*quantity).min(MAX_READ_REGISTERS as u16);
            let values = state.registers.read_registers(*address, count);
            debug!("{} read {} regs from {} -> {:?}", function, count, address, values);
            PduBuilder::build_read_registers_response(function.to_u8(), &values)
        }
        ModbusRequest::WriteSingleCoil { address, value } => {
            let on = *value == COIL_ON;
            if *address == KEEPALIVE_COIL {
                debug!("Keep-alive ping on coil {}", address);
            } else {
                debug!("{} coil {} = {}", function, address, on);
            }
            state.registers.set_coil(*address, on);
            PduBuilder::build_echo_response(function.to_u8(), *address, *value)
        }
        ModbusRequest::WriteSingleRegister { address, value } => {
            debug!("{} register {} = {}", function, address, value);
            state.write_register(*address, *value);
            PduBuilder::build_echo_response(function.to_u8(), *address, *value)
        }
        ModbusRequest::WriteMultipleRegisters { address, values } => {
            debug!("{} {} registers from {}: {:?}", function, values.len(), address, values);
            state.write_registers(*address, values);
            PduBuilder::build_write_multiple_response(*address, values.len() as u16)
        }
    }
}

/// Decode a request PDU and answer it under the state lock.
pub fn respond(state: &SharedState, pdu: &ModbusPdu) -> ModbusResult<ModbusPdu> {
    let request = ModbusRequest::decode(pdu)?;
    let mut guard = lock_state(state);
    handle_request(&mut guard, &request)
}

/// One master connection
pub struct Session<S> {
    io: S,
    state: SharedState,
    idle_timeout: Duration,
    buffer: BytesMut,
    out: BytesMut,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a session over `io`
    pub fn new(io: S, state: SharedState, idle_timeout: Duration) -> Self {
        Self {
            io,
            state,
            idle_timeout,
            buffer: BytesMut::with_capacity(RECEIVE_BUFFER_SIZE),
            out: BytesMut::with_capacity(RECEIVE_BUFFER_SIZE),
        }
    }

    /// Serve until the peer closes, goes idle, or sends an unframeable stream.
    ///
    /// A clean close returns `Ok(())`.
    pub async fn run(mut self) -> ModbusResult<()> {
        loop {
            let read = tokio::time::timeout(self.idle_timeout, self.io.read_buf(&mut self.buffer)).await;
            let n = match read {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ModbusError::timeout(
                        "idle session",
                        self.idle_timeout.as_millis() as u64,
                    ))
                }
            };
            if n == 0 {
                return Ok(());
            }

            while let Some(frame) = decode_frame(&mut self.buffer)? {
                let response = match respond(&self.state, &frame.pdu) {
                    Ok(response) => response,
                    Err(e) if e.is_connection_fatal() => return Err(e),
                    Err(ModbusError::InvalidFunction { code }) => {
                        debug!("Ignoring unsupported function code 0x{:02X}", code);
                        continue;
                    }
                    Err(e) => {
                        warn!("Dropping request: {}", e);
                        continue;
                    }
                };
                self.out.clear();
                encode_frame(&frame.header, &response, &mut self.out);
                self.io.write_all(&self.out).await?;
            }
        }
    }
}

/// Modbus TCP accept loop
pub struct ModbusTcpServer {
    listener: TcpListener,
    state: SharedState,
    max_connections: usize,
    idle_timeout: Duration,
}

impl ModbusTcpServer {
    /// Bind to `address` (`host:port`)
    pub async fn bind(
        address: &str,
        state: SharedState,
        max_connections: usize,
        idle_timeout: Duration,
    ) -> ModbusResult<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self {
            listener,
            state,
            max_connections,
            idle_timeout,
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> ModbusResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept masters until `shutdown` resolves.
    ///
    /// Connections beyond the limit are closed right after accept. Sessions
    /// still running at shutdown are left to finish on their own.
    pub async fn run<F>(self, shutdown: F) -> ModbusResult<()>
    where
        F: Future<Output = ()>,
    {
        let limit = Arc::new(Semaphore::new(self.max_connections));
        tokio::pin!(shutdown);

        info!("Modbus TCP server listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Server shutdown");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                            return Err(e.into());
                        }
                    };

                    let Ok(permit) = Arc::clone(&limit).try_acquire_owned() else {
                        warn!(
                            "Connection limit ({}) reached, rejecting {}",
                            self.max_connections, peer
                        );
                        drop(socket);
                        continue;
                    };

                    if let Err(e) = socket.set_nodelay(true) {
                        debug!("set_nodelay failed for {}: {}", peer, e);
                    }
                    info!("Client connected from {}", peer);

                    let session = Session::new(socket, Arc::clone(&self.state), self.idle_timeout);
                    tokio::spawn(async move {
                        let _permit = permit;
                        match session.run().await {
                            Ok(()) => info!("Client {} disconnected", peer),
                            Err(e) => warn!("Client {} session ended: {}", peer, e),
                        }
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIL_OFF;
    use crate::front_panel::FRONT_PANEL_ADDRESS;
    use tokio_test::io::Builder;

    fn frame(tid: u16, pdu: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(7 + pdu.len());
        bytes.extend_from_slice(&tid.to_be_bytes());
        bytes.extend_from_slice(&[0x00, 0x00]);
        bytes.extend_from_slice(&(pdu.len() as u16 + 1).to_be_bytes());
        bytes.push(0x01);
        bytes.extend_from_slice(pdu);
        bytes
    }

    fn handle(state: &mut DeviceState, request: ModbusRequest) -> Vec<u8> {
        handle_request(state, &request).unwrap().as_slice().to_vec()
    }

    #[test]
    fn test_write_then_read_back() {
        let mut state = DeviceState::new();
        let echo = handle(
            &mut state,
            ModbusRequest::WriteSingleRegister {
                address: 10708,
                value: 3,
            },
        );
        assert_eq!(echo, vec![0x06, 0x29, 0xD4, 0x00, 0x03]);
        assert!(state.registers.is_dirty(10708));

        let read = handle(
            &mut state,
            ModbusRequest::ReadInputRegisters {
                address: 10704,
                quantity: 1,
            },
        );
        assert_eq!(read, vec![0x04, 0x02, 0x00, 0x03]);
    }

    #[test]
    fn test_write_multiple_marks_each_address() {
        let mut state = DeviceState::new();
        let response = handle(
            &mut state,
            ModbusRequest::WriteMultipleRegisters {
                address: 10708,
                values: vec![4, 2, 255],
            },
        );
        assert_eq!(response, vec![0x10, 0x29, 0xD4, 0x00, 0x03]);
        assert_eq!(state.registers.read_registers(10704, 3), vec![4, 2, 255]);
        for address in 10708..=10710 {
            assert!(state.registers.is_dirty(address));
        }
    }

    #[test]
    fn test_read_registers_clamped() {
        let mut state = DeviceState::new();
        let response = handle(
            &mut state,
            ModbusRequest::ReadHoldingRegisters {
                address: 0,
                quantity: 300,
            },
        );
        assert_eq!(response[1], 250);
        assert_eq!(response.len(), 2 + 250);
    }

    #[test]
    fn test_read_coils_clamped() {
        let mut state = DeviceState::new();
        state.registers.set_coil(1999, true);
        state.registers.set_coil(2000, true);
        let response = handle(
            &mut state,
            ModbusRequest::ReadCoils {
                address: 0,
                quantity: 3000,
            },
        );
        assert_eq!(response[0], 0x01);
        assert_eq!(response[1], 250);
        assert_eq!(response.len(), 2 + 250);
        assert_eq!(response[251], 0b1000_0000);
    }

    #[test]
    fn test_write_multiple_with_zero_quantity() {
        let mut state = DeviceState::new();
        let pdu = ModbusPdu::from_slice(&[0x10, 0x00, 0x0A, 0x00, 0x00, 0x00]).unwrap();
        let request = ModbusRequest::decode(&pdu).unwrap();
        assert_eq!(
            request,
            ModbusRequest::WriteMultipleRegisters {
                address: 10,
                values: Vec::new()
            }
        );

        let response = handle(&mut state, request);
        assert_eq!(response, vec![0x10, 0x00, 0x0A, 0x00, 0x00]);
        assert!(!state.registers.has_dirty());
    }

    #[test]
    fn test_coils() {
        let mut state = DeviceState::new();
        let echo = handle(
            &mut state,
            ModbusRequest::WriteSingleCoil {
                address: KEEPALIVE_COIL,
                value: COIL_ON,
            },
        );
        assert_eq!(echo, vec![0x05, 0x00, 0x1F, 0xFF, 0x00]);
        handle(
            &mut state,
            ModbusRequest::WriteSingleCoil {
                address: 33,
                value: 0x1234,
            },
        );
        assert!(!state.registers.get_coil(33));

        let read = handle(
            &mut state,
            ModbusRequest::ReadCoils {
                address: 30,
                quantity: 10,
            },
        );
        assert_eq!(read, vec![0x01, 0x02, 0b0000_0010, 0x00]);

        handle(
            &mut state,
            ModbusRequest::WriteSingleCoil {
                address: KEEPALIVE_COIL,
                value: COIL_OFF,
            },
        );
        assert!(!state.registers.get_coil(KEEPALIVE_COIL));
    }

    #[test]
    fn test_front_panel_write_unpacks() {
        let mut state = DeviceState::new();
        handle(
            &mut state,
            ModbusRequest::WriteSingleRegister {
                address: FRONT_PANEL_ADDRESS,
                value: 336,
            },
        );
        assert_eq!(state.variables.get("$power"), 5.0);
        assert_eq!(state.variables.target("$boost"), 1.0);
    }

    #[test]
    fn test_respond_drops_bad_requests() {
        let state = DeviceState::new().into_shared();
        let unknown = ModbusPdu::from_slice(&[0x2B, 0x0E, 0x01, 0x00]).unwrap();
        let unknown = respond(&state, &unknown).unwrap_err();
        assert!(matches!(unknown, ModbusError::InvalidFunction { code: 0x2B }));
        assert!(!unknown.is_connection_fatal());

        let short = ModbusPdu::from_slice(&[0x03, 0x00]).unwrap();
        let short = respond(&state, &short).unwrap_err();
        assert!(matches!(short, ModbusError::InvalidData { .. }));
        assert!(!short.is_connection_fatal());

        assert!(!respond(&state, &ModbusPdu::new()).unwrap_err().is_connection_fatal());

        let read = ModbusPdu::from_slice(&[0x03, 0x28, 0x3C, 0x00, 0x01]).unwrap();
        assert_eq!(respond(&state, &read).unwrap().as_slice(), &[0x03, 0x02, 0x00, 0x78]);
    }

    #[tokio::test]
    async fn test_session_answers_pipelined_frames() {
        let state = DeviceState::new().into_shared();
        let mut requests = frame(1, &[0x06, 0x29, 0xD6, 0x00, 0xFA]);
        requests.extend(frame(2, &[0x03, 0x29, 0xD2, 0x00, 0x01]));

        let mock = Builder::new()
            .read(&requests)
            .write(&frame(1, &[0x06, 0x29, 0xD6, 0x00, 0xFA]))
            .write(&frame(2, &[0x03, 0x02, 0x00, 0xFA]))
            .build();

        Session::new(mock, Arc::clone(&state), Duration::from_secs(5))
            .run()
            .await
            .unwrap();
        assert!(lock_state(&state).registers.is_dirty(10710));
    }

    #[tokio::test]
    async fn test_session_reassembles_split_frame_and_skips_bad_ones() {
        let state = DeviceState::new().into_shared();
        let request = frame(7, &[0x03, 0x28, 0x3C, 0x00, 0x01]);

        let mock = Builder::new()
            .read(&frame(5, &[0x2B, 0x0E, 0x01, 0x00]))
            .read(&frame(6, &[0x06, 0x00]))
            .read(&request[..4])
            .read(&request[4..])
            .write(&frame(7, &[0x03, 0x02, 0x00, 0x78]))
            .build();

        Session::new(mock, state, Duration::from_secs(5))
            .run()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_session_closes_on_oversized_length() {
        let state = DeviceState::new().into_shared();
        let mock = Builder::new()
            .read(&[0x00, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0x03])
            .build();

        let result = Session::new(mock, state, Duration::from_secs(5)).run().await;
        assert!(matches!(result, Err(ModbusError::Frame { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_idle_timeout() {
        let state = DeviceState::new().into_shared();
        let (_client, server) = tokio::io::duplex(64);

        let result = Session::new(server, state, Duration::from_secs(2)).run().await;
        assert!(matches!(result, Err(ModbusError::Timeout { .. })));
    }
}
