//! A master that writes a coil and polls the input registers of a remote
//! device. Pair it with the `slave` example.

use clap::Parser;
use tokio_util::sync::CancellationToken;

use membus::{
    AddressRange, Client, Device, FrameDecodeLevel, Indexed, MemoryMap, Transport, UnitId,
};

#[derive(Parser)]
#[command(name = "master")]
#[command(about = "Write a coil and poll the input registers of a remote device")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:10502", help = "address of the slave")]
    host: String,

    #[arg(short = 'i', long, default_value = "1", help = "unit id of the target device")]
    id: u8,

    #[arg(short = 'q', long, default_value = "16", help = "quantity of registers to read")]
    quantity: u16,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let socket = tokio::net::TcpStream::connect(&args.host).await?;
    let transport = Transport::rtu(socket).with_decode_level(FrameDecodeLevel::Header.into());
    let mut client = Client::new(transport);
    let device = Device::new(UnitId::new(args.id), MemoryMap::new());
    let token = CancellationToken::new();

    client
        .write_single_coil_async(&device, Indexed::new(3, true), &token)
        .await?;
    client
        .read_input_registers_async(&device, AddressRange::new(0, args.quantity), &token)
        .await?;

    for address in 0..args.quantity {
        let value = device.memory().input_registers().get(address);
        println!("input register {address}: {value}");
    }
    Ok(())
}
