use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use membus::{
    crc16, AddressRange, Client, Device, ExceptionCode, FunctionCode, Indexed, MemoryMap,
    RequestError, Server, Transport, UnitId,
};

const SLAVE_ADDRESS: u8 = 0x11;

fn rtu_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = body.to_vec();
    let crc = crc16(body);
    frame.push((crc >> 8) as u8);
    frame.push(crc as u8);
    frame
}

#[tokio::test]
async fn async_round_trip_matches_the_blocking_semantics() {
    let (master_stream, slave_stream) = tokio::io::duplex(512);
    let token = CancellationToken::new();

    let slave_memory = MemoryMap::new();
    slave_memory.input_registers().set(40, 0x0102);
    slave_memory.input_registers().set(41, 0x0304);

    let master_memory = MemoryMap::new();
    let device = Device::new(UnitId::new(SLAVE_ADDRESS), master_memory.clone());
    let mut client = Client::new(Transport::rtu(master_stream));

    let server_memory = slave_memory.clone();
    let server_token = token.clone();
    let server_task = async move {
        let device = Device::new(UnitId::new(SLAVE_ADDRESS), server_memory);
        let mut server = Server::new(Transport::rtu(slave_stream));
        for _ in 0..4 {
            server
                .handle_request_async(std::slice::from_ref(&device), &server_token)
                .await
                .unwrap();
        }
    };

    let client_task = async {
        client
            .write_single_register_async(&device, Indexed::new(5, 0xCAFE), &token)
            .await
            .unwrap();
        client
            .write_multiple_coils_async(&device, 8, &[true, false, true], &token)
            .await
            .unwrap();
        client
            .read_input_registers_async(&device, AddressRange::new(40, 2), &token)
            .await
            .unwrap();
        client
            .read_coils_async(&device, AddressRange::new(8, 3), &token)
            .await
            .unwrap();
    };

    tokio::join!(client_task, server_task);

    assert_eq!(master_memory.input_registers().get(40), 0x0102);
    assert_eq!(master_memory.input_registers().get(41), 0x0304);
    assert!(master_memory.output_coils().get(8));
    assert!(!master_memory.output_coils().get(9));
    assert!(master_memory.output_coils().get(10));
    assert_eq!(slave_memory.output_registers().get(5), 0xCAFE);
}

#[tokio::test]
async fn canceled_call_aborts_cleanly_and_the_client_stays_usable() {
    let (master_stream, mut raw_slave) = tokio::io::duplex(512);

    let master_memory = MemoryMap::new();
    let device = Device::new(UnitId::new(SLAVE_ADDRESS), master_memory.clone());
    let mut client = Client::new(Transport::rtu(master_stream));

    let canceled = CancellationToken::new();
    canceled.cancel();
    assert_eq!(
        client
            .read_coils_async(&device, AddressRange::new(0, 8), &canceled)
            .await,
        Err(RequestError::Canceled)
    );

    // nothing was written by the canceled call, and the engine is reusable
    let token = CancellationToken::new();
    let serve = async {
        let mut request = [0u8; 8];
        tokio::io::AsyncReadExt::read_exact(&mut raw_slave, &mut request)
            .await
            .unwrap();
        let response = rtu_frame(&[SLAVE_ADDRESS, 0x01, 0x01, 0x05]);
        raw_slave.write_all(&response).await.unwrap();
    };
    let call = client.read_coils_async(&device, AddressRange::new(0, 8), &token);
    let (result, _) = tokio::join!(call, serve);
    result.unwrap();

    assert!(master_memory.output_coils().get(0));
    assert!(!master_memory.output_coils().get(1));
    assert!(master_memory.output_coils().get(2));
}

#[tokio::test]
async fn exception_sent_by_a_slave_fails_the_async_call() {
    let (master_stream, slave_stream) = tokio::io::duplex(512);
    let token = CancellationToken::new();

    let device = Device::new(UnitId::new(SLAVE_ADDRESS), MemoryMap::new());
    let mut client = Client::new(Transport::rtu(master_stream));

    let server_token = token.clone();
    let server_task = async move {
        let mut server = Server::new(Transport::rtu(slave_stream));
        server
            .send_exception_async(
                UnitId::new(SLAVE_ADDRESS),
                FunctionCode::ReadHoldingRegisters,
                ExceptionCode::ServerDeviceBusy,
                &server_token,
            )
            .await
            .unwrap();
    };

    let call = client.read_holding_registers_async(&device, AddressRange::new(0, 4), &token);
    let (result, _) = tokio::join!(call, server_task);
    assert_eq!(
        result,
        Err(RequestError::Exception(ExceptionCode::ServerDeviceBusy))
    );
}
