//! Routes inbound messages to their handlers.

use tracing::{debug, info, warn};

use crate::can::NetworkInterface;
use crate::udt1cri::constants::{FirmwareTarget, DEBUG_KEEPALIVE_CAN, DEBUG_KEEPALIVE_USB};
use crate::udt1cri::state::{DeviceState, FirmwareVersion, Statistics};
use crate::udt1cri::usb_protocol::WireMessage;

/// What handling a message amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// A CAN frame was forwarded to the network side.
    Frame,
    /// First keep-alive of a microcontroller, its firmware version was latched.
    FirmwareVersion(FirmwareTarget, FirmwareVersion),
    /// Keep-alive after the first one, only the status was updated.
    KeepAlive,
    Ignored,
    /// Command id the host does not expect from the device.
    Unsupported(u8),
}

pub struct Dispatcher<'a> {
    pub state: &'a mut DeviceState,
    pub stats: &'a Statistics,
    pub iface: &'a dyn NetworkInterface,
    /// Keep-alive debug bits, see [`DEBUG_KEEPALIVE_USB`] and [`DEBUG_KEEPALIVE_CAN`].
    pub debug: u8,
}

impl Dispatcher<'_> {
    pub fn dispatch(&mut self, msg: &WireMessage) -> Dispatched {
        match *msg {
            WireMessage::CanReceive { .. } => match msg.to_frame() {
                Some(frame) => {
                    self.stats.record_rx(frame.dlc());
                    self.iface.rx(frame);
                    Dispatched::Frame
                }
                None => Dispatched::Ignored,
            },
            WireMessage::KeepAliveUsb {
                termination_state,
                fw_major,
                fw_minor,
            } => {
                if self.debug & DEBUG_KEEPALIVE_USB != 0 {
                    debug!("USB keep-alive {:?}", msg);
                }

                self.state.termination_enabled = termination_state != 0;

                if self.state.usb_firmware_seen {
                    return Dispatched::KeepAlive;
                }

                let version = FirmwareVersion {
                    major: fw_major,
                    minor: fw_minor,
                };
                info!("PIC USB version {}", version);
                self.state.usb_firmware_seen = true;
                self.state.usb_firmware = Some(version);
                Dispatched::FirmwareVersion(FirmwareTarget::Usb, version)
            }
            WireMessage::KeepAliveCan {
                tx_err,
                rx_err,
                fw_major,
                fw_minor,
                ..
            } => {
                if self.debug & DEBUG_KEEPALIVE_CAN != 0 {
                    debug!("CAN keep-alive {:?}", msg);
                }

                self.state.tx_err_count = tx_err;
                self.state.rx_err_count = rx_err;

                if self.state.can_firmware_seen {
                    return Dispatched::KeepAlive;
                }

                let version = FirmwareVersion {
                    major: fw_major,
                    minor: fw_minor,
                };
                info!("PIC CAN version {}", version);
                self.state.can_firmware_seen = true;
                self.state.can_firmware = Some(version);
                Dispatched::FirmwareVersion(FirmwareTarget::Can, version)
            }
            // Chatter between the two microcontrollers of the adapter
            WireMessage::NothingToSend => Dispatched::Ignored,
            // Carries the transmit timestamp only, the context was released by the write completion
            WireMessage::CanTransmitAck { .. } => Dispatched::Ignored,
            _ => {
                let tag = msg.tag();
                warn!("Unsupported msg (0x{:02X})", tag);
                Dispatched::Unsupported(tag)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::{Frame, Identifier};
    use crate::udt1cri::usb_protocol::decode;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Frame>>);

    impl NetworkInterface for Collect {
        fn rx(&self, frame: Frame) {
            self.0.lock().unwrap().push(frame);
        }
    }

    fn keep_alive_can(tx_err: u8, rx_err: u8) -> WireMessage {
        WireMessage::KeepAliveCan {
            tx_err,
            rx_err,
            rx_overflow: 0,
            tx_bus_off: 0,
            bitrate_hi: 0x01,
            bitrate_lo: 0xf4,
            rx_lost: 0,
            bus_state: 0,
            fw_major: 2,
            fw_minor: 1,
            debug_mode: 0,
            test_complete: 0,
            test_result: 0,
        }
    }

    fn keep_alive_usb(termination_state: u8) -> WireMessage {
        WireMessage::KeepAliveUsb {
            termination_state,
            fw_major: 1,
            fw_minor: 4,
        }
    }

    #[test]
    fn can_frame_forwarded() {
        let mut state = DeviceState::default();
        let stats = Statistics::default();
        let iface = Collect::default();
        let mut dispatcher = Dispatcher {
            state: &mut state,
            stats: &stats,
            iface: &iface,
            debug: 0,
        };

        let msg = WireMessage::CanReceive {
            id: 0x7e8,
            dlc: 3,
            extended: false,
            rtr: false,
            fd: false,
            timestamp: 0,
            data: [0x02, 0x7e, 0x00, 0, 0, 0, 0, 0],
        };
        assert_eq!(dispatcher.dispatch(&msg), Dispatched::Frame);

        let frames = iface.0.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id, Identifier::Standard(0x7e8));
        assert_eq!(frames[0].data, vec![0x02, 0x7e, 0x00]);

        let stats = stats.snapshot();
        assert_eq!(stats.rx_packets, 1);
        assert_eq!(stats.rx_bytes, 3);
    }

    #[test]
    fn keep_alive_latch() {
        let mut state = DeviceState::default();
        let stats = Statistics::default();
        let iface = Collect::default();
        let mut dispatcher = Dispatcher {
            state: &mut state,
            stats: &stats,
            iface: &iface,
            debug: DEBUG_KEEPALIVE_CAN | DEBUG_KEEPALIVE_USB,
        };

        let mut reports = 0;
        for (i, msg) in [
            keep_alive_can(1, 2),
            keep_alive_usb(1),
            keep_alive_can(3, 4),
            keep_alive_usb(0),
            keep_alive_can(5, 6),
        ]
        .iter()
        .enumerate()
        {
            match dispatcher.dispatch(msg) {
                Dispatched::FirmwareVersion(..) => reports += 1,
                Dispatched::KeepAlive => assert!(i >= 2),
                other => panic!("unexpected {:?}", other),
            }
        }

        // One report per microcontroller
        assert_eq!(reports, 2);
        assert_eq!(state.tx_err_count, 5);
        assert_eq!(state.rx_err_count, 6);
        assert!(!state.termination_enabled);
        assert_eq!(state.usb_firmware, Some(FirmwareVersion { major: 1, minor: 4 }));
        assert_eq!(state.can_firmware, Some(FirmwareVersion { major: 2, minor: 1 }));
        assert!(iface.0.lock().unwrap().is_empty());
    }

    #[test]
    fn ignored_and_unknown() {
        let mut state = DeviceState::default();
        let stats = Statistics::default();
        let iface = Collect::default();
        let mut dispatcher = Dispatcher {
            state: &mut state,
            stats: &stats,
            iface: &iface,
            debug: 0,
        };

        assert_eq!(
            dispatcher.dispatch(&WireMessage::NothingToSend),
            Dispatched::Ignored
        );
        assert_eq!(
            dispatcher.dispatch(&WireMessage::CanTransmitAck { timestamp: 1 }),
            Dispatched::Ignored
        );
        assert_eq!(
            dispatcher.dispatch(&decode(&[0u8; 20])),
            Dispatched::Unsupported(0)
        );
        // Host-to-device commands are not expected inbound
        assert_eq!(
            dispatcher.dispatch(&WireMessage::ChangeBitrateRequest { kbps: 500 }),
            Dispatched::Unsupported(0xa1)
        );
        assert_eq!(state, DeviceState::default());
    }
}
