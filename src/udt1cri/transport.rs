//! Boundary to the asynchronous bulk transport.
//!
//! A [`Transport`] queues transfers and reports each one exactly once as a [`Completion`]
//! on the channel it was created with. Buffers are owned by the transport between
//! submission and completion; after the completion the driver owns them again.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::udt1cri::constants::MESSAGE_SIZE;
use crate::udt1cri::context::TxSlot;

/// Final status of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    /// Killed by [`Transport::cancel_all`].
    Cancelled,
    /// The device was unplugged or shut down.
    NoDevice,
    /// Endpoint halted.
    Stall,
    Protocol,
    /// Any other failure. Reads are resubmitted after this.
    Failed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("No Device")]
    NoDevice,
    #[error("Out Of Memory")]
    NoMemory,
    #[error("Transport Shut Down")]
    Shutdown,
    #[error("Transfer submission failed: {0}")]
    Other(String),
}

/// A bulk-in buffer. `len` is the number of valid bytes after a read completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxBuffer {
    pub data: Vec<u8>,
    pub len: usize,
}

impl RxBuffer {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
            len: 0,
        }
    }

    pub fn filled(&self) -> &[u8] {
        &self.data[..self.len.min(self.data.len())]
    }
}

/// A single outbound message together with the context it occupies.
#[derive(Debug)]
pub struct TxTransfer {
    pub slot: TxSlot,
    pub data: [u8; MESSAGE_SIZE],
}

#[derive(Debug)]
pub enum Completion {
    Read {
        buffer: RxBuffer,
        status: TransferStatus,
    },
    Write {
        transfer: TxTransfer,
        status: TransferStatus,
    },
}

pub type CompletionSender = mpsc::UnboundedSender<Completion>;
pub type CompletionReceiver = mpsc::UnboundedReceiver<Completion>;

/// Returned when a write could not be queued. Hands the context back to the caller.
#[derive(Debug)]
pub struct SubmitError {
    pub transfer: TxTransfer,
    pub error: TransportError,
}

pub trait Transport: Send + Sync {
    /// Queue a bulk-in read.
    fn submit_read(&self, buffer: RxBuffer) -> Result<(), TransportError>;

    /// Queue a bulk-out write of one message.
    fn submit_write(&self, transfer: TxTransfer) -> Result<(), SubmitError>;

    /// Cancel every queued transfer. Each one still completes, with [`TransferStatus::Cancelled`].
    fn cancel_all(&self);
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn submit_read(&self, buffer: RxBuffer) -> Result<(), TransportError> {
        (**self).submit_read(buffer)
    }

    fn submit_write(&self, transfer: TxTransfer) -> Result<(), SubmitError> {
        (**self).submit_write(transfer)
    }

    fn cancel_all(&self) {
        (**self).cancel_all()
    }
}
