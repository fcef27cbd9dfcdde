use crate::can::{Frame, Identifier, CAN_EFF_MASK, CAN_MAX_DLEN, CAN_SFF_MASK};
use crate::udt1cri::constants::*;

// Every message is MESSAGE_SIZE bytes, byte 0 is the command id.
//
// CAN messages (receive 0xE3, transmit 0xA3)
//   byte 0       cmd_id
//   byte 1       dlc         (low nibble length, bit 6 RTR)
//   byte 2       flags       (0x01 extended, 0x02 RTR, 0x08 FD)
//   byte 3       checksum    (unused)
//   byte 4..8    eid         (little endian, bit 31 extended, bit 30 RTR)
//   byte 8..12   timestamp   (little endian)
//   byte 12..20  data
//
// CAN-side keep-alive (0xF5)
//   tx_err, rx_err, rx_buff_ovfl, tx_bus_off, bitrate_hi, bitrate_lo,
//   rx_lost_lo, rx_lost_hi, can_stat, ver_major, ver_minor, debug_mode,
//   test_complete, test_result
//
// USB-side keep-alive (0xF7)
//   termination_state, ver_major, ver_minor

const CAN_DLC: usize = 1;
const CAN_FLAGS: usize = 2;
const CAN_EID: usize = 4;
const CAN_TIMESTAMP: usize = 8;
const CAN_DATA: usize = 12;

/// One decoded message of the adapter protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireMessage {
    CanReceive {
        id: u32,
        dlc: u8,
        extended: bool,
        rtr: bool,
        fd: bool,
        timestamp: u32,
        data: [u8; CAN_MAX_DLEN],
    },
    CanTransmitRequest {
        id: u32,
        dlc: u8,
        extended: bool,
        rtr: bool,
        data: [u8; CAN_MAX_DLEN],
    },
    CanTransmitAck {
        timestamp: u32,
    },
    KeepAliveUsb {
        termination_state: u8,
        fw_major: u8,
        fw_minor: u8,
    },
    KeepAliveCan {
        tx_err: u8,
        rx_err: u8,
        rx_overflow: u8,
        tx_bus_off: u8,
        bitrate_hi: u8,
        bitrate_lo: u8,
        rx_lost: u16,
        bus_state: u8,
        fw_major: u8,
        fw_minor: u8,
        debug_mode: u8,
        test_complete: u8,
        test_result: u8,
    },
    ChangeBitrateRequest {
        kbps: u16,
    },
    SetTerminationRequest {
        enabled: bool,
    },
    ReadFirmwareVersionRequest {
        target: FirmwareTarget,
    },
    NothingToSend,
    /// Unrecognized command id. Kept so the dispatcher can report it.
    Unknown {
        tag: u8,
    },
}

impl WireMessage {
    /// Command id byte this message is encoded with.
    pub fn tag(&self) -> u8 {
        let cmd = match self {
            WireMessage::CanReceive { .. } => CommandId::ReceiveMessage,
            WireMessage::CanTransmitRequest { .. } => CommandId::TransmitMessage,
            WireMessage::CanTransmitAck { .. } => CommandId::TransmitResponse,
            WireMessage::KeepAliveUsb { .. } => CommandId::AliveFromUsb,
            WireMessage::KeepAliveCan { .. } => CommandId::AliveFromCan,
            WireMessage::ChangeBitrateRequest { .. } => CommandId::ChangeBitRate,
            WireMessage::SetTerminationRequest { .. } => CommandId::SetupTermination,
            WireMessage::ReadFirmwareVersionRequest { .. } => CommandId::ReadFirmwareVersion,
            WireMessage::NothingToSend => CommandId::NothingToSend,
            WireMessage::Unknown { tag } => return *tag,
        };
        cmd as u8
    }

    /// Transmit request carrying `frame`. Frames built with [`Frame::new`] never exceed 8 bytes.
    pub fn transmit_request(frame: &Frame) -> WireMessage {
        let mut data = [0u8; CAN_MAX_DLEN];
        let dlc = frame.data.len().min(CAN_MAX_DLEN);
        if !frame.rtr {
            data[..dlc].copy_from_slice(&frame.data[..dlc]);
        }

        WireMessage::CanTransmitRequest {
            id: frame.id.into(),
            dlc: dlc as u8,
            extended: frame.id.is_extended(),
            rtr: frame.rtr,
            data,
        }
    }

    /// Semantic CAN frame for the two CAN-carrying variants.
    pub fn to_frame(&self) -> Option<Frame> {
        let (id, dlc, extended, rtr, fd, data) = match *self {
            WireMessage::CanReceive {
                id,
                dlc,
                extended,
                rtr,
                fd,
                data,
                ..
            } => (id, dlc, extended, rtr, fd, data),
            WireMessage::CanTransmitRequest {
                id,
                dlc,
                extended,
                rtr,
                data,
            } => (id, dlc, extended, rtr, false, data),
            _ => return None,
        };

        let id = match extended {
            true => Identifier::Extended(id & CAN_EFF_MASK),
            false => Identifier::Standard(id & CAN_SFF_MASK),
        };

        let len = (dlc as usize).min(CAN_MAX_DLEN);
        let mut frame = Frame::new(0, id, &data[..len]).ok()?;
        frame.rtr = rtr;
        frame.fd = fd;
        Some(frame)
    }
}

fn pack_can_header(buf: &mut [u8; MESSAGE_SIZE], id: u32, dlc: u8, extended: bool, rtr: bool) {
    debug_assert!(dlc as usize <= CAN_MAX_DLEN);

    let mut eid = id & CAN_EFF_MASK;
    let mut flags = 0;
    let mut dlc = dlc & DLC_MASK;

    if extended {
        eid |= CAN_EXID_MASK;
        flags |= FLAG_CAN_EID;
    }
    if rtr {
        eid |= CAN_RTR_MASK;
        flags |= FLAG_CAN_RTR;
        dlc |= DLC_RTR_MASK;
    }

    buf[CAN_DLC] = dlc;
    buf[CAN_FLAGS] = flags;
    buf[CAN_EID..CAN_EID + 4].copy_from_slice(&eid.to_le_bytes());
}

fn read_u32(dat: &[u8; MESSAGE_SIZE], offset: usize) -> u32 {
    u32::from_le_bytes([dat[offset], dat[offset + 1], dat[offset + 2], dat[offset + 3]])
}

/// Identifier, DLC, extended and RTR flags of a CAN message. All flag encodings are OR'd.
fn unpack_can_header(dat: &[u8; MESSAGE_SIZE], check_dlc_rtr: bool) -> (u32, u8, bool, bool) {
    let eid = read_u32(dat, CAN_EID);
    let flags = dat[CAN_FLAGS];

    let extended = flags & FLAG_CAN_EID != 0 || eid & CAN_EXID_MASK != 0;
    let mut rtr = flags & FLAG_CAN_RTR != 0 || eid & CAN_RTR_MASK != 0;
    if check_dlc_rtr {
        rtr |= dat[CAN_DLC] & DLC_RTR_MASK != 0;
    }

    let dlc = (dat[CAN_DLC] & DLC_MASK).min(CAN_MAX_DLEN as u8);
    (eid & CAN_EFF_MASK, dlc, extended, rtr)
}

fn can_data(dat: &[u8; MESSAGE_SIZE]) -> [u8; CAN_MAX_DLEN] {
    let mut data = [0u8; CAN_MAX_DLEN];
    data.copy_from_slice(&dat[CAN_DATA..CAN_DATA + CAN_MAX_DLEN]);
    data
}

/// Decode a single message. Never fails, unrecognized command ids become [`WireMessage::Unknown`].
pub fn decode(dat: &[u8; MESSAGE_SIZE]) -> WireMessage {
    let tag = dat[0];
    let Some(cmd) = CommandId::from_repr(tag) else {
        return WireMessage::Unknown { tag };
    };

    match cmd {
        CommandId::ReceiveMessage => {
            let (id, dlc, extended, rtr) = unpack_can_header(dat, true);
            WireMessage::CanReceive {
                id,
                dlc,
                extended,
                rtr,
                fd: dat[CAN_FLAGS] & FLAG_CAN_FDF != 0,
                timestamp: read_u32(dat, CAN_TIMESTAMP),
                data: can_data(dat),
            }
        }
        CommandId::TransmitMessage => {
            let (id, dlc, extended, rtr) = unpack_can_header(dat, false);
            WireMessage::CanTransmitRequest {
                id,
                dlc,
                extended,
                rtr,
                data: can_data(dat),
            }
        }
        CommandId::TransmitResponse => WireMessage::CanTransmitAck {
            timestamp: read_u32(dat, CAN_TIMESTAMP),
        },
        CommandId::AliveFromUsb => WireMessage::KeepAliveUsb {
            termination_state: dat[1],
            fw_major: dat[2],
            fw_minor: dat[3],
        },
        CommandId::AliveFromCan => WireMessage::KeepAliveCan {
            tx_err: dat[1],
            rx_err: dat[2],
            rx_overflow: dat[3],
            tx_bus_off: dat[4],
            bitrate_hi: dat[5],
            bitrate_lo: dat[6],
            rx_lost: u16::from_le_bytes([dat[7], dat[8]]),
            bus_state: dat[9],
            fw_major: dat[10],
            fw_minor: dat[11],
            debug_mode: dat[12],
            test_complete: dat[13],
            test_result: dat[14],
        },
        CommandId::ChangeBitRate => WireMessage::ChangeBitrateRequest {
            kbps: u16::from_be_bytes([dat[1], dat[2]]),
        },
        CommandId::SetupTermination => WireMessage::SetTerminationRequest {
            enabled: dat[1] != 0,
        },
        CommandId::ReadFirmwareVersion => match FirmwareTarget::from_repr(dat[1]) {
            Some(target) => WireMessage::ReadFirmwareVersionRequest { target },
            None => WireMessage::Unknown { tag },
        },
        CommandId::NothingToSend => WireMessage::NothingToSend,
    }
}

/// Encode a single message. Unused trailing bytes are zero.
pub fn encode(msg: &WireMessage) -> [u8; MESSAGE_SIZE] {
    let mut buf = [0u8; MESSAGE_SIZE];

    match *msg {
        WireMessage::CanReceive {
            id,
            dlc,
            extended,
            rtr,
            fd,
            timestamp,
            data,
        } => {
            pack_can_header(&mut buf, id, dlc, extended, rtr);
            if fd {
                buf[CAN_FLAGS] |= FLAG_CAN_FDF;
            }
            buf[CAN_TIMESTAMP..CAN_TIMESTAMP + 4].copy_from_slice(&timestamp.to_le_bytes());
            buf[CAN_DATA..].copy_from_slice(&data);
        }
        WireMessage::CanTransmitRequest {
            id,
            dlc,
            extended,
            rtr,
            data,
        } => {
            pack_can_header(&mut buf, id, dlc, extended, rtr);
            buf[CAN_DATA..].copy_from_slice(&data);
        }
        WireMessage::CanTransmitAck { timestamp } => {
            buf[CAN_TIMESTAMP..CAN_TIMESTAMP + 4].copy_from_slice(&timestamp.to_le_bytes());
        }
        WireMessage::KeepAliveUsb {
            termination_state,
            fw_major,
            fw_minor,
        } => {
            buf[1..4].copy_from_slice(&[
                termination_state,
                fw_major,
                fw_minor,
            ]);
        }
        WireMessage::KeepAliveCan {
            tx_err,
            rx_err,
            rx_overflow,
            tx_bus_off,
            bitrate_hi,
            bitrate_lo,
            rx_lost,
            bus_state,
            fw_major,
            fw_minor,
            debug_mode,
            test_complete,
            test_result,
        } => {
            let [rx_lost_lo, rx_lost_hi] = rx_lost.to_le_bytes();
            buf[1..15].copy_from_slice(&[
                tx_err,
                rx_err,
                rx_overflow,
                tx_bus_off,
                bitrate_hi,
                bitrate_lo,
                rx_lost_lo,
                rx_lost_hi,
                bus_state,
                fw_major,
                fw_minor,
                debug_mode,
                test_complete,
                test_result,
            ]);
        }
        WireMessage::ChangeBitrateRequest { kbps } => {
            buf[1..3].copy_from_slice(&kbps.to_be_bytes());
        }
        WireMessage::SetTerminationRequest { enabled } => {
            buf[1] = enabled as u8;
        }
        WireMessage::ReadFirmwareVersionRequest { target } => {
            buf[1] = target as u8;
        }
        WireMessage::NothingToSend | WireMessage::Unknown { .. } => {}
    }

    buf[0] = msg.tag();

    buf
}

/// Decode all whole messages in a read buffer.
///
/// Returns the messages and the number of trailing bytes that did not form a complete message.
/// Those bytes are discarded, the next buffer starts at a message boundary again.
pub fn unpack_messages(dat: &[u8]) -> (Vec<WireMessage>, usize) {
    let mut chunks = dat.chunks_exact(MESSAGE_SIZE);
    let mut ret = Vec::with_capacity(dat.len() / MESSAGE_SIZE);

    for chunk in &mut chunks {
        let mut msg = [0u8; MESSAGE_SIZE];
        msg.copy_from_slice(chunk);
        ret.push(decode(&msg));
    }

    (ret, chunks.remainder().len())
}
