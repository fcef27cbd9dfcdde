use strum_macros::{EnumIter, FromRepr};

pub const VENDOR_ID: u16 = 0x04d8;
pub const PRODUCT_ID: u16 = 0xee0c;

/// Number of transmit transfers (and transmit contexts) that may be in flight.
pub const UDT1CRI_MAX_TX_URBS: usize = 20;
/// Number of receive transfers kept queued on the bulk-in endpoint.
pub const UDT1CRI_MAX_RX_URBS: usize = 20;

/// Every message on the wire has this exact size, in both directions.
pub const MESSAGE_SIZE: usize = 20;

/// The device stacks several messages into one transfer, so reads are larger than a message.
pub const USB_RX_BUFF_SIZE: usize = 512;

pub const USB_EP_IN: u8 = 0x81;
pub const USB_EP_OUT: u8 = 0x01;
pub const USB_INTERFACE: u8 = 0;

pub const CAN_CLOCK_HZ: u32 = 40_000_000;

// DLC byte
pub const DLC_MASK: u8 = 0x0f;
pub const DLC_RTR_MASK: u8 = 0x40;

// Flags byte of the CAN messages
pub const FLAG_CAN_EID: u8 = 0x01;
pub const FLAG_CAN_RTR: u8 = 0x02;
pub const FLAG_CAN_FDF: u8 = 0x08;

// 32-bit identifier field
pub const CAN_EXID_MASK: u32 = 0x8000_0000;
pub const CAN_RTR_MASK: u32 = 0x4000_0000;

/// Bits of [`super::Config::debug`] enabling full keep-alive logging.
pub const DEBUG_KEEPALIVE_USB: u8 = 0x01;
pub const DEBUG_KEEPALIVE_CAN: u8 = 0x02;

#[derive(Debug, PartialEq, Eq, Copy, Clone, FromRepr)]
#[repr(u8)]
pub enum CommandId {
    ReceiveMessage = 0xe3,
    AliveFromCan = 0xf5,
    AliveFromUsb = 0xf7,
    ChangeBitRate = 0xa1,
    TransmitMessage = 0xa3,
    SetupTermination = 0xa8,
    ReadFirmwareVersion = 0xa9,
    NothingToSend = 0xff,
    TransmitResponse = 0xe2,
}

/// Which of the two microcontrollers inside the adapter a version query targets.
#[derive(Debug, PartialEq, Eq, Copy, Clone, FromRepr, EnumIter)]
#[repr(u8)]
pub enum FirmwareTarget {
    Usb = 1,
    Can = 2,
}

/// Control modes the adapter accepts. Switching between them is a no-op on the device.
pub const CTRLMODE_LOOPBACK: u32 = 0x01;
pub const CTRLMODE_LISTENONLY: u32 = 0x02;
pub const CTRLMODE_ONE_SHOT: u32 = 0x08;
pub const CTRLMODE_SUPPORTED: u32 = CTRLMODE_LOOPBACK | CTRLMODE_LISTENONLY | CTRLMODE_ONE_SHOT;

/// Hardware bit-timing limits. The firmware uses a fixed rate table, these are presentation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTimingConst {
    pub name: &'static str,
    pub clock_hz: u32,
    pub tseg1_min: u32,
    pub tseg1_max: u32,
    pub tseg2_min: u32,
    pub tseg2_max: u32,
    pub sjw_max: u32,
    pub brp_min: u32,
    pub brp_max: u32,
    pub brp_inc: u32,
}

pub const UDT1CRI_BITTIMING_CONST: BitTimingConst = BitTimingConst {
    name: "udt1cri_usb",
    clock_hz: CAN_CLOCK_HZ,
    tseg1_min: 1,
    tseg1_max: 8,
    tseg2_min: 1,
    tseg2_max: 8,
    sjw_max: 4,
    brp_min: 2,
    brp_max: 128,
    brp_inc: 2,
};
