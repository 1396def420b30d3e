//! End-to-end tests over a loopback TCP socket

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Instant};

use hru_modbus_sim::state::lock_state;
use hru_modbus_sim::{load_unit, ModbusResult, SharedState, Simulator, SimulatorConfig};

fn definitions() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("definitions")
}

struct Running {
    address: std::net::SocketAddr,
    state: SharedState,
    stop: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<ModbusResult<()>>,
}

impl Running {
    async fn shutdown(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap().unwrap();
    }
}

async fn start(code: &str, config: SimulatorConfig) -> Running {
    let unit = load_unit(&definitions(), code).unwrap();
    let simulator = Simulator::new(unit, config).unwrap();
    let state = simulator.state();
    let server = simulator.bind().await.unwrap();
    let address = server.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(simulator.serve(server, async move {
        let _ = stopped.await;
    }));
    Running {
        address,
        state,
        stop,
        task,
    }
}

fn fast_config() -> SimulatorConfig {
    SimulatorConfig::local().with_tick_interval(Duration::from_millis(20))
}

fn frame(tid: u16, pdu: &[u8]) -> Vec<u8> {
    let mut bytes = tid.to_be_bytes().to_vec();
    bytes.extend_from_slice(&[0x00, 0x00]);
    bytes.extend_from_slice(&(pdu.len() as u16 + 1).to_be_bytes());
    bytes.push(0x01);
    bytes.extend_from_slice(pdu);
    bytes
}

async fn exchange(stream: &mut TcpStream, tid: u16, pdu: &[u8]) -> Vec<u8> {
    stream.write_all(&frame(tid, pdu)).await.unwrap();
    read_response(stream, tid).await
}

async fn read_response(stream: &mut TcpStream, tid: u16) -> Vec<u8> {
    let mut header = [0u8; 7];
    timeout(Duration::from_secs(2), stream.read_exact(&mut header))
        .await
        .expect("response timed out")
        .unwrap();
    assert_eq!(u16::from_be_bytes([header[0], header[1]]), tid);
    assert_eq!(header[6], 0x01);
    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    let mut pdu = vec![0u8; length - 1];
    stream.read_exact(&mut pdu).await.unwrap();
    pdu
}

async fn read_register(stream: &mut TcpStream, address: u16) -> u16 {
    let [hi, lo] = address.to_be_bytes();
    let response = exchange(stream, 0x0F00, &[0x03, hi, lo, 0x00, 0x01]).await;
    u16::from_be_bytes([response[2], response[3]])
}

async fn write_register(stream: &mut TcpStream, address: u16, value: u16) {
    let [hi, lo] = address.to_be_bytes();
    let [vh, vl] = value.to_be_bytes();
    let request = [0x06, hi, lo, vh, vl];
    assert_eq!(exchange(stream, 0x0E00, &request).await, request.to_vec());
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_trigger_setpoint_over_tcp() {
    let running = start("atrea-rd5-cf", fast_config()).await;
    let mut stream = TcpStream::connect(running.address).await.unwrap();

    // initial write-back: 22.5 °C in tenths, mode 2
    wait_for(|| lock_state(&running.state).registers.get_register(10706) == 225).await;
    assert_eq!(read_register(&mut stream, 10705).await, 2);

    write_register(&mut stream, 10710, 300).await;
    write_register(&mut stream, 10702, 0).await;

    let state = running.state.clone();
    wait_for(move || lock_state(&state).variables.target("$temperature") == 30.0).await;
    wait_for(|| lock_state(&running.state).registers.get_register(10702) == 1).await;
    wait_for(|| lock_state(&running.state).registers.get_register(10706) == 300).await;
    assert_eq!(read_register(&mut stream, 10702).await, 1);
    assert_eq!(read_register(&mut stream, 10706).await, 300);

    running.shutdown().await;
}

#[tokio::test]
async fn test_block_write_and_input_read() {
    let slow = SimulatorConfig::local().with_tick_interval(Duration::from_secs(30));
    let running = start("atrea-rd5-cf", slow).await;
    let mut stream = TcpStream::connect(running.address).await.unwrap();

    let response = exchange(
        &mut stream,
        3,
        &[0x10, 0x29, 0xD4, 0x00, 0x02, 0x04, 0x00, 0x04, 0x00, 0x03],
    )
    .await;
    assert_eq!(response, vec![0x10, 0x29, 0xD4, 0x00, 0x02]);

    // the mirror copy is visible before any tick
    let response = exchange(&mut stream, 4, &[0x04, 0x29, 0xD0, 0x00, 0x02]).await;
    assert_eq!(response, vec![0x04, 0x04, 0x00, 0x04, 0x00, 0x03]);

    running.shutdown().await;
}

#[tokio::test]
async fn test_direct_unit_and_keepalive_coil() {
    let running = start("korado", fast_config()).await;
    let mut stream = TcpStream::connect(running.address).await.unwrap();

    let coil = [0x05, 0x00, 0x1F, 0xFF, 0x00];
    assert_eq!(exchange(&mut stream, 1, &coil).await, coil.to_vec());
    assert_eq!(exchange(&mut stream, 2, &[0x01, 0x00, 0x1F, 0x00, 0x01]).await, vec![0x01, 0x01, 0x01]);

    write_register(&mut stream, 106, 3).await;
    let state = running.state.clone();
    wait_for(move || {
        let guard = lock_state(&state);
        guard.variables.get("$power") == 3.0 && guard.variables.target("$power") == 3.0
    })
    .await;
    assert_eq!(read_register(&mut stream, 106).await, 3);

    running.shutdown().await;
}

#[tokio::test]
async fn test_front_panel_unit() {
    let running = start("xvent", fast_config()).await;
    let mut stream = TcpStream::connect(running.address).await.unwrap();

    let request = [0x10, 0x9C, 0x40, 0x00, 0x01, 0x02, 0x01, 0x55];
    assert_eq!(
        exchange(&mut stream, 9, &request).await,
        vec![0x10, 0x9C, 0x40, 0x00, 0x01]
    );
    {
        let guard = lock_state(&running.state);
        assert_eq!(guard.variables.get("$power"), 5.0);
        assert_eq!(guard.variables.get("$boost"), 1.0);
        assert_eq!(guard.variables.get("$bypass"), 1.0);
    }

    sleep(Duration::from_millis(100)).await;
    assert_eq!(read_register(&mut stream, 0x9C40).await, 0x0155);

    running.shutdown().await;
}

#[tokio::test]
async fn test_unsupported_function_is_ignored() {
    let running = start("atrea-rd5-cf", fast_config()).await;
    let mut stream = TcpStream::connect(running.address).await.unwrap();

    let mut bytes = frame(1, &[0x2B, 0x0E, 0x01, 0x00]);
    bytes.extend(frame(2, &[0x03, 0x28, 0x3C, 0x00, 0x01]));
    stream.write_all(&bytes).await.unwrap();

    let response = read_response(&mut stream, 2).await;
    assert_eq!(response[0], 0x03);
    assert_eq!(response[1], 0x02);

    running.shutdown().await;
}

#[tokio::test]
async fn test_connection_limit() {
    let running = start("atrea-rd5-cf", fast_config().with_max_connections(1)).await;

    let mut first = TcpStream::connect(running.address).await.unwrap();
    read_register(&mut first, 10300).await;

    let mut second = TcpStream::connect(running.address).await.unwrap();
    let mut buf = [0u8; 1];
    let closed = timeout(Duration::from_secs(2), second.read(&mut buf))
        .await
        .expect("rejected connection was not closed");
    assert!(matches!(closed, Ok(0) | Err(_)));

    // the admitted session keeps working
    read_register(&mut first, 10300).await;

    running.shutdown().await;
}
