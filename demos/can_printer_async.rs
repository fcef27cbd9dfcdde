use tokio_stream::StreamExt;
use udt1cri::udt1cri::{Config, Udt1cri};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let bitrate = std::env::args()
        .nth(1)
        .map(|arg| arg.parse().expect("bitrate in bit/s"))
        .unwrap_or(500_000);

    let config = Config {
        bitrate: Some(bitrate),
        ..Default::default()
    };
    let adapter = Udt1cri::new_async(config).unwrap();
    let mut stream = adapter.recv();

    while let Some(frame) = stream.next().await {
        let id: u32 = frame.id.into();
        println!("[{}]\t0x{:x}\t{}", frame.bus, id, hex::encode(frame.data));
    }
}
