#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

use hru_modbus_sim::frame::decode_frame;
use hru_modbus_sim::server::handle_request;
use hru_modbus_sim::{DeviceState, ModbusRequest};

// Arbitrary bytes from a master must never panic the responder.
fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);
    let mut state = DeviceState::new();

    while let Ok(Some(frame)) = decode_frame(&mut buf) {
        if let Ok(request) = ModbusRequest::decode(&frame.pdu) {
            let _ = handle_request(&mut state, &request);
        }
    }
});
