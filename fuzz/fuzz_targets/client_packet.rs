#![no_main]

use bitstream::RawStreamCodec;
use client::{Client, ClientConfig, LoopbackTransport, MapUpdateConsumer, Transport};
use libfuzzer_sys::fuzz_target;

struct NullMap;
impl MapUpdateConsumer for NullMap {
    fn on_map_update(&mut self, _data: &[u8]) {}
}

fuzz_target!(|data: &[u8]| {
    // An arbitrary datagram must never panic the client; structured decode
    // errors (which tear the session down) are fine.
    let (client_side, mut server_side) = LoopbackTransport::pair();
    let mut client: Client<LoopbackTransport, RawStreamCodec> =
        Client::new(ClientConfig::default(), client_side);
    client.connect("fuzz.example").unwrap();
    let _ = client.update(&mut NullMap);

    server_side.update();
    server_side.send(LoopbackTransport::CONNECTION, data);
    let _ = client.update(&mut NullMap);
    let _ = client.send_data();
});
