use std::hint::black_box;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, Criterion};

use hru_modbus_sim::frame::decode_frame;
use hru_modbus_sim::server::respond;
use hru_modbus_sim::{load_unit, DeviceState, PhysicsEngine, PhysicsProfile};

fn engine() -> PhysicsEngine {
    let definitions = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("definitions");
    let unit = load_unit(&definitions, "atrea-rd5-cf").expect("bundled unit definition");
    PhysicsEngine::new(Arc::new(unit), PhysicsProfile::default())
}

fn bench_tick(c: &mut Criterion) {
    let engine = engine();
    let mut state = DeviceState::new();
    engine.prepare(&mut state);
    state.variables.set_target("$temperature", 30.0);

    c.bench_function("physics_tick_idle", |b| {
        b.iter(|| engine.tick_at(black_box(&mut state), Duration::from_secs(12), 0.0))
    });

    c.bench_function("physics_tick_trigger", |b| {
        b.iter(|| {
            state.write_register(10710, 250);
            state.write_register(10702, 0);
            engine.tick_at(black_box(&mut state), Duration::from_secs(12), 0.0);
        })
    });
}

fn bench_request(c: &mut Criterion) {
    let shared = DeviceState::new().into_shared();
    let request: [u8; 12] = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x29, 0xD0, 0x00, 0x7D];

    c.bench_function("decode_and_respond_read_125", |b| {
        b.iter(|| {
            let mut buf = BytesMut::from(&request[..]);
            let frame = decode_frame(&mut buf).ok().flatten().expect("complete frame");
            black_box(respond(&shared, &frame.pdu))
        })
    });
}

criterion_group!(benches, bench_tick, bench_request);
criterion_main!(benches);
