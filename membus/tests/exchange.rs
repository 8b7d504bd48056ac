use std::io::{Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use membus::{
    crc16, AddressRange, AduParseError, Client, Device, ExceptionCode, FrameParseError, Indexed,
    MemoryMap, PacketLogger, RequestError, Server, Transport, UnitId,
};

const SLAVE_ADDRESS: u8 = 0x04;

fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    let client = TcpStream::connect(address).unwrap();
    let (server, _) = listener.accept().unwrap();
    client.set_nodelay(true).unwrap();
    server.set_nodelay(true).unwrap();
    (client, server)
}

/// run a slave on its own thread until `count` requests have been answered
fn serve_requests(stream: TcpStream, memory: MemoryMap, count: usize) -> thread::JoinHandle<MemoryMap> {
    thread::spawn(move || {
        let device = Device::new(UnitId::new(SLAVE_ADDRESS), memory.clone());
        let mut server = Server::new(Transport::rtu(stream));
        for _ in 0..count {
            server.handle_request(std::slice::from_ref(&device)).unwrap();
        }
        memory
    })
}

/// frame a message body with its CRC trailer
fn rtu_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = body.to_vec();
    let crc = crc16(body);
    frame.push((crc >> 8) as u8);
    frame.push(crc as u8);
    frame
}

/// canned stream: replays `input` on reads, collects writes
struct Fixture {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl Fixture {
    fn new(input: Vec<u8>) -> Self {
        Self {
            input: Cursor::new(input),
            output: Vec::new(),
        }
    }
}

impl Read for Fixture {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for Fixture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// delivers reads at most two bytes at a time
struct Chunked<S> {
    inner: S,
}

impl<S: Read> Read for Chunked<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let limit = buf.len().min(2);
        self.inner.read(&mut buf[..limit])
    }
}

impl<S: Write> Write for Chunked<S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[derive(Clone, Default)]
struct Capture {
    frames: Arc<Mutex<Vec<(&'static str, Vec<u8>)>>>,
}

impl PacketLogger for Capture {
    fn sent(&mut self, data: &[u8]) {
        self.frames.lock().unwrap().push(("tx", data.to_vec()));
    }

    fn received(&mut self, data: &[u8]) {
        self.frames.lock().unwrap().push(("rx", data.to_vec()));
    }
}

#[test]
fn round_trip_single_coil_writes_converge_on_both_sides() {
    let offsets = [0u16, 7, 255, 4096, u16::MAX];
    let (master_stream, slave_stream) = tcp_pair();
    let slave = serve_requests(slave_stream, MemoryMap::new(), offsets.len() * 2);

    let master_memory = MemoryMap::new();
    let device = Device::new(UnitId::new(SLAVE_ADDRESS), master_memory.clone());
    let mut client = Client::new(Transport::rtu(master_stream));

    for offset in offsets {
        client.write_single_coil(&device, Indexed::new(offset, true)).unwrap();
        assert!(master_memory.output_coils().get(offset));
    }
    for offset in offsets {
        client.write_single_coil(&device, Indexed::new(offset, false)).unwrap();
        assert!(!master_memory.output_coils().get(offset));
    }

    let slave_memory = slave.join().unwrap();
    for offset in offsets {
        assert!(!slave_memory.output_coils().get(offset));
    }
}

#[test]
fn round_trip_single_register_writes_converge_on_both_sides() {
    let values: [(u16, u16); 4] = [(0, 1), (16, 0xABCD), (255, 0), (u16::MAX, u16::MAX)];
    let (master_stream, slave_stream) = tcp_pair();
    let slave = serve_requests(slave_stream, MemoryMap::new(), values.len());

    let master_memory = MemoryMap::new();
    let device = Device::new(UnitId::new(SLAVE_ADDRESS), master_memory.clone());
    let mut client = Client::new(Transport::rtu(master_stream));

    for (offset, value) in values {
        client
            .write_single_register(&device, Indexed::new(offset, value))
            .unwrap();
        assert_eq!(master_memory.output_registers().get(offset), value);
    }

    let slave_memory = slave.join().unwrap();
    for (offset, value) in values {
        assert_eq!(slave_memory.output_registers().get(offset), value);
    }
}

#[test]
fn bulk_discrete_input_read_updates_only_the_requested_bits() {
    let slave_memory = MemoryMap::new();
    slave_memory.input_coils().set(12, true);
    slave_memory.input_coils().set(13, true);

    let (master_stream, slave_stream) = tcp_pair();
    let slave = serve_requests(slave_stream, slave_memory, 1);

    let master_memory = MemoryMap::new();
    let device = Device::new(UnitId::new(SLAVE_ADDRESS), master_memory.clone());
    let mut client = Client::new(Transport::rtu(master_stream));

    client
        .read_discrete_inputs(&device, AddressRange::new(10, 13))
        .unwrap();

    for address in 0..64u16 {
        let expected = matches!(address, 12 | 13);
        assert_eq!(master_memory.input_coils().get(address), expected, "address {address}");
    }

    // the slave's own memory is untouched by a read
    let slave_memory = slave.join().unwrap();
    assert!(slave_memory.input_coils().get(12));
    assert!(slave_memory.input_coils().get(13));
}

#[test]
fn write_multiple_registers_round_trip_and_idempotent_read_back() {
    let values = [0x0102u16, 0, 0xFFFF, 0xABCD, 7];
    let (master_stream, slave_stream) = tcp_pair();
    let slave = serve_requests(slave_stream, MemoryMap::new(), 3);

    let master_memory = MemoryMap::new();
    let device = Device::new(UnitId::new(SLAVE_ADDRESS), master_memory.clone());
    let mut client = Client::new(Transport::rtu(master_stream));

    client.write_multiple_registers(&device, 100, &values).unwrap();

    // two identical reads against an unchanged slave yield identical contents
    for _ in 0..2 {
        client
            .read_holding_registers(&device, AddressRange::new(100, values.len() as u16))
            .unwrap();
        for (index, value) in values.iter().enumerate() {
            assert_eq!(
                master_memory.output_registers().get(100 + index as u16),
                *value
            );
        }
    }

    let slave_memory = slave.join().unwrap();
    for (index, value) in values.iter().enumerate() {
        assert_eq!(
            slave_memory.output_registers().get(100 + index as u16),
            *value
        );
    }
}

#[test]
fn write_multiple_coils_round_trip() {
    let values = [true, false, true, true, false, false, true, false, true, true];
    let (master_stream, slave_stream) = tcp_pair();
    let slave = serve_requests(slave_stream, MemoryMap::new(), 1);

    let device = Device::new(UnitId::new(SLAVE_ADDRESS), MemoryMap::new());
    let mut client = Client::new(Transport::rtu(master_stream));

    client.write_multiple_coils(&device, 20, &values).unwrap();

    let slave_memory = slave.join().unwrap();
    for (index, value) in values.iter().enumerate() {
        assert_eq!(slave_memory.output_coils().get(20 + index as u16), *value);
    }
    // the byte after the run stays untouched
    assert!(!slave_memory.output_coils().get(20 + values.len() as u16));
}

#[test]
fn tampered_frame_fails_crc_validation_and_leaves_memory_unchanged() {
    let body = [SLAVE_ADDRESS, 0x06, 0x00, 0x10, 0x12, 0x34];
    let mut request = rtu_frame(&body);
    request[5] ^= 0x01; // flip one bit in the register value

    let memory = MemoryMap::new();
    let device = Device::new(UnitId::new(SLAVE_ADDRESS), memory.clone());
    let mut server = Server::new(Transport::rtu(Fixture::new(request)));

    let result = server.handle_request(std::slice::from_ref(&device));
    assert!(matches!(
        result,
        Err(RequestError::BadFrame(FrameParseError::CrcValidationFailure(_, _)))
    ));
    assert_eq!(memory.output_registers().get(0x10), 0);
}

#[test]
fn exception_response_surfaces_as_a_typed_failure() {
    let response = rtu_frame(&[SLAVE_ADDRESS, 0x81, 0x02]);

    let memory = MemoryMap::new();
    let device = Device::new(UnitId::new(SLAVE_ADDRESS), memory.clone());
    let mut client = Client::new(Transport::rtu(Fixture::new(response)));

    let result = client.read_coils(&device, AddressRange::new(0, 16));
    assert_eq!(
        result,
        Err(RequestError::Exception(ExceptionCode::IllegalDataAddress))
    );
    for address in 0..32u16 {
        assert!(!memory.output_coils().get(address));
    }
}

#[test]
fn responses_delivered_in_small_chunks_decode_identically() {
    let response = rtu_frame(&[SLAVE_ADDRESS, 0x02, 0x02, 0x0C, 0x00]);

    let chunked_memory = MemoryMap::new();
    let device = Device::new(UnitId::new(SLAVE_ADDRESS), chunked_memory.clone());
    let mut client = Client::new(Transport::rtu(Chunked {
        inner: Fixture::new(response.clone()),
    }));
    client
        .read_discrete_inputs(&device, AddressRange::new(10, 13))
        .unwrap();

    let whole_memory = MemoryMap::new();
    let device = Device::new(UnitId::new(SLAVE_ADDRESS), whole_memory.clone());
    let mut client = Client::new(Transport::rtu(Fixture::new(response)));
    client
        .read_discrete_inputs(&device, AddressRange::new(10, 13))
        .unwrap();

    for address in 0..32u16 {
        assert_eq!(
            chunked_memory.input_coils().get(address),
            whole_memory.input_coils().get(address),
            "address {address}"
        );
        let expected = matches!(address, 12 | 13);
        assert_eq!(chunked_memory.input_coils().get(address), expected);
    }
}

#[test]
fn truncated_response_surfaces_as_unexpected_eof() {
    // claims four payload bytes but delivers only two before end-of-data
    let response = vec![SLAVE_ADDRESS, 0x03, 0x04, 0x00, 0x01];

    let device = Device::new(UnitId::new(SLAVE_ADDRESS), MemoryMap::new());
    let mut client = Client::new(Transport::rtu(Fixture::new(response)));

    let result = client.read_holding_registers(&device, AddressRange::new(0, 2));
    assert_eq!(
        result,
        Err(RequestError::Io(std::io::ErrorKind::UnexpectedEof))
    );
}

#[test]
fn unknown_device_address_is_a_hard_failure() {
    let request = rtu_frame(&[0x09, 0x01, 0x00, 0x00, 0x00, 0x08]);

    let device = Device::new(UnitId::new(SLAVE_ADDRESS), MemoryMap::new());
    let mut server = Server::new(Transport::rtu(Fixture::new(request)));

    assert_eq!(
        server.handle_request(std::slice::from_ref(&device)),
        Err(RequestError::BadFrame(FrameParseError::UnknownDeviceAddress(0x09)))
    );
}

#[test]
fn unsupported_function_code_is_rejected() {
    let request = rtu_frame(&[SLAVE_ADDRESS, 0x2B, 0x0E, 0x01, 0x00]);

    let device = Device::new(UnitId::new(SLAVE_ADDRESS), MemoryMap::new());
    let mut server = Server::new(Transport::rtu(Fixture::new(request)));

    assert_eq!(
        server.handle_request(std::slice::from_ref(&device)),
        Err(RequestError::BadFrame(FrameParseError::UnknownFunctionCode(0x2B)))
    );
}

#[test]
fn mismatched_write_multiple_echo_count_fails_the_call() {
    // echo claims three registers were written instead of two
    let response = rtu_frame(&[SLAVE_ADDRESS, 0x10, 0x00, 0x10, 0x00, 0x03]);

    let device = Device::new(UnitId::new(SLAVE_ADDRESS), MemoryMap::new());
    let mut client = Client::new(Transport::rtu(Fixture::new(response)));

    let result = client.write_multiple_registers(&device, 0x10, &[1, 2]);
    assert_eq!(
        result,
        Err(RequestError::BadResponse(AduParseError::ReplyEchoMismatch))
    );
}

#[test]
fn packet_logger_observes_completed_frames_verbatim() {
    let request_body = [SLAVE_ADDRESS, 0x06, 0x00, 0x08, 0xBE, 0xEF];
    let response = rtu_frame(&request_body); // the echo of a single write

    let capture = Capture::default();
    let mut transport = Transport::rtu(Fixture::new(response.clone()));
    transport.set_packet_logger(Box::new(capture.clone()));

    let device = Device::new(UnitId::new(SLAVE_ADDRESS), MemoryMap::new());
    let mut client = Client::new(transport);
    client
        .write_single_register(&device, Indexed::new(0x08, 0xBEEF))
        .unwrap();

    let frames = capture.frames.lock().unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], ("tx", rtu_frame(&request_body)));
    assert_eq!(frames[1], ("rx", response));
}

#[test]
fn several_devices_can_share_one_server() {
    let (master_stream, slave_stream) = tcp_pair();

    let first_memory = MemoryMap::new();
    let second_memory = MemoryMap::new();
    let devices_on_slave = [
        Device::new(UnitId::new(0x01), first_memory.clone()),
        Device::new(UnitId::new(0x02), second_memory.clone()),
    ];
    let slave = thread::spawn(move || {
        let mut server = Server::new(Transport::rtu(slave_stream));
        for _ in 0..2 {
            server.handle_request(&devices_on_slave).unwrap();
        }
    });

    let mut client = Client::new(Transport::rtu(master_stream));
    let first = Device::new(UnitId::new(0x01), MemoryMap::new());
    let second = Device::new(UnitId::new(0x02), MemoryMap::new());
    client.write_single_register(&first, Indexed::new(0, 11)).unwrap();
    client.write_single_register(&second, Indexed::new(0, 22)).unwrap();
    slave.join().unwrap();

    assert_eq!(first_memory.output_registers().get(0), 11);
    assert_eq!(second_memory.output_registers().get(0), 22);
}
