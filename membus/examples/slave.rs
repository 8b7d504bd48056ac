//! A slave exposing one device over TCP. Pair it with the `master` example.

use tokio_util::sync::CancellationToken;

use membus::{
    DecodeLevel, Device, FrameDecodeLevel, MemoryMap, PhysDecodeLevel, Server, Transport, UnitId,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let listener = tokio::net::TcpListener::bind("0.0.0.0:10502").await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    let memory = MemoryMap::new();
    for address in 0..16u16 {
        memory.input_registers().set(address, address * 100);
    }

    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::info!("accepted connection from {peer}");
        let memory = memory.clone();
        tokio::spawn(async move {
            let device = Device::new(UnitId::new(0x01), memory);
            let transport = Transport::rtu(socket).with_decode_level(DecodeLevel::new(
                FrameDecodeLevel::Payload,
                PhysDecodeLevel::Nothing,
            ));
            let mut server = Server::new(transport);
            let token = CancellationToken::new();
            loop {
                let result = server
                    .handle_request_async(std::slice::from_ref(&device), &token)
                    .await;
                if let Err(err) = result {
                    tracing::warn!("session ended: {err}");
                    break;
                }
            }
        });
    }
}
