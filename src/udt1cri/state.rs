use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::can::BusErrorCounter;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Per-adapter status, updated by the receive dispatcher from keep-alive messages.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceState {
    pub tx_err_count: u8,
    pub rx_err_count: u8,
    pub termination_enabled: bool,
    /// Set by the first USB-side keep-alive of the session.
    pub usb_firmware_seen: bool,
    /// Set by the first CAN-side keep-alive of the session.
    pub can_firmware_seen: bool,
    pub usb_firmware: Option<FirmwareVersion>,
    pub can_firmware: Option<FirmwareVersion>,
}

impl DeviceState {
    pub fn berr_counter(&self) -> BusErrorCounter {
        BusErrorCounter {
            txerr: self.tx_err_count,
            rxerr: self.rx_err_count,
        }
    }
}

/// Interface counters. Touched from both the submission and the completion side.
#[derive(Debug, Default)]
pub struct Statistics {
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    rx_malformed: AtomicU64,
    tx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    tx_dropped: AtomicU64,
}

/// Point in time copy of [`Statistics`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_malformed: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_dropped: u64,
}

impl Statistics {
    pub fn record_rx(&self, dlc: u8) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(dlc as u64, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.rx_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx(&self, dlc: u8) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(dlc as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.tx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_malformed: self.rx_malformed.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_dropped: self.tx_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters() {
        let stats = Statistics::default();
        stats.record_rx(8);
        stats.record_rx(3);
        stats.record_tx(2);
        stats.record_dropped();
        stats.record_malformed();

        assert_eq!(
            stats.snapshot(),
            StatisticsSnapshot {
                rx_packets: 2,
                rx_bytes: 11,
                rx_malformed: 1,
                tx_packets: 1,
                tx_bytes: 2,
                tx_dropped: 1,
            }
        );
    }

    #[test]
    fn version_display() {
        let version = FirmwareVersion { major: 1, minor: 12 };
        assert_eq!(version.to_string(), "1.12");
    }
}
