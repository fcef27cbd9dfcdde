//! # The UDT1CRI Crate
//! Driver for the UniSwarm UDT1CRI USB CAN debugger. The adapter speaks a fixed-size,
//! command-tagged protocol over a pair of bulk endpoints; this crate translates that
//! protocol into ordinary CAN frames and back, so the dongle can be used like any other
//! CAN interface.
//!
//! ## Async CAN Example
//!
//! The following opens the first UDT1CRI on the system at 500 kbit/s, and then receives all frames.
//!
//! ```rust,no_run
//! use tokio_stream::StreamExt;
//! async fn can_example() {
//!     let config = udt1cri::udt1cri::Config {
//!         bitrate: Some(500_000),
//!         ..Default::default()
//!     };
//!     let adapter = udt1cri::udt1cri::Udt1cri::new_async(config).unwrap();
//!     let mut stream = adapter.recv();
//!
//!     while let Some(frame) = stream.next().await {
//!         let id: u32 = frame.id.into();
//!         println!("[{}]\t0x{:x}\t{}", frame.bus, id, hex::encode(frame.data));
//!     }
//! }
//! ```
//!
//! ## Layout
//!  - [`can`]: generic CAN types and the async adapter wrapper
//!  - [`udt1cri`]: the wire codec, bitrate table, transmit context pool, receive dispatcher and driver
//!

pub mod can;
mod error;
pub mod udt1cri;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
pub use tokio_stream::Stream;
