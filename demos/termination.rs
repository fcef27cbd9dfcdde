//! Switches the bus termination resistor and prints the state reported by the adapter.
use std::sync::Arc;
use std::time::Duration;

use udt1cri::can::async_can::BroadcastInterface;
use udt1cri::can::AsyncCanAdapter;
use udt1cri::udt1cri::usb::RusbTransport;
use udt1cri::udt1cri::{Config, Udt1cri};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let value = std::env::args().nth(1).unwrap_or_else(|| "1".to_string());

    let config = Config::default();
    let (completion_sender, completion_receiver) = tokio::sync::mpsc::unbounded_channel();
    let transport = RusbTransport::open_first(completion_sender, config.timeout).unwrap();

    let iface = Arc::new(BroadcastInterface::new());
    let driver = Arc::new(Udt1cri::new(transport, iface.clone(), config));
    driver.start().unwrap();

    let _adapter = AsyncCanAdapter::new(driver.clone(), iface, completion_receiver);

    driver.store_termination(&value).unwrap();

    // The adapter reports the new state with its next keep-alive
    tokio::time::sleep(Duration::from_secs(2)).await;

    let state = driver.device_state();
    println!("termination: {}", state.termination_enabled as u8);
    if let Some(version) = state.usb_firmware {
        println!("USB firmware: {}", version);
    }
    if let Some(version) = state.can_firmware {
        println!("CAN firmware: {}", version);
    }
    let berr = driver.berr_counter();
    println!("tx errors: {}, rx errors: {}", berr.txerr, berr.rxerr);
}
