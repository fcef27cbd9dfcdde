//! Generic CAN types and traits

pub mod async_can;

use std::fmt;

pub use async_can::AsyncCanAdapter;

/// Maximum payload of a classic CAN frame.
pub const CAN_MAX_DLEN: usize = 8;

/// Extended frame format flag in a raw 32-bit identifier.
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;
/// Remote transmission request flag in a raw 32-bit identifier.
pub const CAN_RTR_FLAG: u32 = 0x4000_0000;
pub const CAN_SFF_MASK: u32 = 0x0000_07ff;
pub const CAN_EFF_MASK: u32 = 0x1fff_ffff;

/// Identifier for a CAN frame
#[derive(Copy, Clone, PartialOrd, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Identifier {
    Standard(u32),
    Extended(u32),
}

impl Identifier {
    pub fn is_standard(&self) -> bool {
        match self {
            Identifier::Standard(_) => true,
            Identifier::Extended(_) => false,
        }
    }
    pub fn is_extended(&self) -> bool {
        !self.is_standard()
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Extended(id) => write!(f, "0x{:08x}", id),
            Identifier::Standard(id) => write!(f, "0x{:03x}", id),
        }
    }
}

impl From<u32> for Identifier {
    fn from(id: u32) -> Identifier {
        if id <= CAN_SFF_MASK {
            Identifier::Standard(id)
        } else {
            Identifier::Extended(id)
        }
    }
}

impl From<Identifier> for u32 {
    fn from(val: Identifier) -> u32 {
        match val {
            Identifier::Standard(id) => id,
            Identifier::Extended(id) => id,
        }
    }
}

/// Link state of the CAN interface as reported to the network side.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CanState {
    Stopped,
    ErrorActive,
}

/// Transmit and receive error counters of the CAN controller.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct BusErrorCounter {
    pub txerr: u8,
    pub rxerr: u8,
}

/// A CAN frame
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Frame {
    /// The bus index for adapters supporting multiple CAN busses
    pub bus: u8,
    /// Arbitration ID
    pub id: Identifier,
    /// Frame Data. For remote frames only the length is meaningful.
    pub data: Vec<u8>,
    /// Wheter the frame was sent out by the adapter
    pub loopback: bool,
    /// Remote transmission request
    pub rtr: bool,
    /// The adapter flagged the frame as CAN-FD. Payloads are still limited to 8 bytes.
    pub fd: bool,
}
impl Unpin for Frame {}

impl Frame {
    pub fn new(bus: u8, id: Identifier, data: &[u8]) -> Result<Frame, crate::error::Error> {
        // Check if the data length is valid
        if data.len() > CAN_MAX_DLEN {
            return Err(crate::error::Error::MalformedFrame);
        }

        // Check if the ID makes sense
        match id {
            Identifier::Standard(id) if id > CAN_SFF_MASK => {
                return Err(crate::error::Error::MalformedFrame)
            }
            Identifier::Extended(id) if id > CAN_EFF_MASK => {
                return Err(crate::error::Error::MalformedFrame)
            }
            _ => {}
        };

        Ok(Frame {
            bus,
            id,
            data: data.to_vec(),
            loopback: false,
            rtr: false,
            fd: false,
        })
    }

    /// Remote frame requesting `dlc` bytes.
    pub fn new_remote(bus: u8, id: Identifier, dlc: u8) -> Result<Frame, crate::error::Error> {
        let mut frame = Frame::new(bus, id, &vec![0; dlc as usize])?;
        frame.rtr = true;
        Ok(frame)
    }

    /// Data length code
    pub fn dlc(&self) -> u8 {
        self.data.len() as u8
    }

    /// Raw identifier with the extended and RTR flags folded into bits 31 and 30.
    pub fn can_id(&self) -> u32 {
        let mut raw = match self.id {
            Identifier::Standard(id) => id & CAN_SFF_MASK,
            Identifier::Extended(id) => (id & CAN_EFF_MASK) | CAN_EFF_FLAG,
        };
        if self.rtr {
            raw |= CAN_RTR_FLAG;
        }
        raw
    }

    /// Builds a frame from a raw identifier carrying the extended and RTR flags.
    pub fn from_can_id(bus: u8, can_id: u32, data: &[u8]) -> Result<Frame, crate::error::Error> {
        let id = match can_id & CAN_EFF_FLAG != 0 {
            true => Identifier::Extended(can_id & CAN_EFF_MASK),
            false => Identifier::Standard(can_id & CAN_SFF_MASK),
        };
        let mut frame = Frame::new(bus, id, data)?;
        frame.rtr = can_id & CAN_RTR_FLAG != 0;
        Ok(frame)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("bus", &self.bus)
            .field("id", &self.id)
            .field("data", &hex::encode(&self.data))
            .field("loopback", &self.loopback)
            .field("rtr", &self.rtr)
            .field("fd", &self.fd)
            .finish()
    }
}

/// The network side of an adapter: consumes received frames and controls the transmit queue.
pub trait NetworkInterface: Send + Sync {
    /// A frame was received from the bus.
    fn rx(&self, frame: Frame);

    /// A transmitted frame was taken by the adapter. The frame has `loopback` set.
    fn echo(&self, frame: Frame) {
        self.rx(frame)
    }

    /// Transmit contexts are available again after [`NetworkInterface::stop_queue`].
    fn wake_queue(&self) {}

    /// No transmit context is free. Stop queueing frames until woken.
    fn stop_queue(&self) {}

    /// The adapter is gone. No further frames will be accepted.
    fn detach(&self) {}
}

/// Trait for a CAN adapter whose transfers complete asynchronously.
pub trait CanAdapter: Send + Sync {
    /// Hand a frame to the adapter. Must not block.
    fn send(&self, frame: &Frame) -> crate::Result<()>;
    /// Apply the effects of a finished transfer.
    fn handle_completion(&self, completion: crate::udt1cri::transport::Completion);
    /// Cancel all outstanding transfers.
    fn close(&self);
}
