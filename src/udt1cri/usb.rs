//! [`Transport`] over libusb bulk transfers.
//!
//! Reads and writes are served by one worker thread each. Queued transfers are tagged with the
//! generation they were submitted in; [`Transport::cancel_all`] starts a new generation so
//! everything older completes as [`TransferStatus::Cancelled`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Error;
use crate::udt1cri::constants::{PRODUCT_ID, USB_EP_IN, USB_EP_OUT, USB_INTERFACE, VENDOR_ID};
use crate::udt1cri::transport::{
    Completion, CompletionSender, RxBuffer, SubmitError, TransferStatus, Transport,
    TransportError, TxTransfer,
};

type Handle = rusb::DeviceHandle<rusb::GlobalContext>;

struct Queued<T> {
    generation: u64,
    item: T,
}

pub struct RusbTransport {
    _handle: Arc<Handle>,
    generation: Arc<AtomicU64>,
    reads: Mutex<Option<mpsc::UnboundedSender<Queued<RxBuffer>>>>,
    writes: Mutex<Option<mpsc::UnboundedSender<Queued<TxTransfer>>>>,
    workers: Vec<JoinHandle<()>>,
}

fn transfer_status(e: rusb::Error) -> TransferStatus {
    match e {
        rusb::Error::NoDevice => TransferStatus::NoDevice,
        rusb::Error::Pipe => TransferStatus::Stall,
        rusb::Error::Io | rusb::Error::Overflow => TransferStatus::Protocol,
        rusb::Error::Interrupted => TransferStatus::Cancelled,
        _ => TransferStatus::Failed,
    }
}

/// Runs a blocking transfer until it finishes or its generation is cancelled. Timeouts only
/// give the loop a chance to look at the generation.
fn run_transfer(
    generation: &AtomicU64,
    submitted: u64,
    mut transfer: impl FnMut() -> rusb::Result<usize>,
) -> (TransferStatus, usize) {
    loop {
        if generation.load(Ordering::Acquire) != submitted {
            return (TransferStatus::Cancelled, 0);
        }
        match transfer() {
            Ok(len) => return (TransferStatus::Completed, len),
            // rusb does not report bytes moved before a timeout. For reads they are lost and the
            // next read starts at a packet boundary; the device sends whole messages per packet.
            Err(rusb::Error::Timeout) => continue,
            Err(e) => {
                debug!("bulk transfer failed: {}", e);
                return (transfer_status(e), 0);
            }
        }
    }
}

impl RusbTransport {
    /// Opens the first adapter found on the bus.
    pub fn open_first(completions: CompletionSender, timeout: Duration) -> Result<Self, Error> {
        for device in rusb::devices()?.iter() {
            let device_desc = device.device_descriptor()?;

            if device_desc.vendor_id() != VENDOR_ID {
                continue;
            }
            if device_desc.product_id() != PRODUCT_ID {
                continue;
            }

            return RusbTransport::new(device.open()?, completions, timeout);
        }
        Err(Error::NotFound)
    }

    pub fn new(
        mut handle: Handle,
        completions: CompletionSender,
        timeout: Duration,
    ) -> Result<Self, Error> {
        // Not supported on every platform
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("kernel driver auto-detach unavailable: {}", e);
        }
        handle.claim_interface(USB_INTERFACE)?;

        let handle = Arc::new(handle);
        let generation = Arc::new(AtomicU64::new(0));

        let (read_tx, mut read_rx) = mpsc::unbounded_channel::<Queued<RxBuffer>>();
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Queued<TxTransfer>>();

        let reader = {
            let handle = handle.clone();
            let generation = generation.clone();
            let completions = completions.clone();
            std::thread::spawn(move || {
                while let Some(Queued { generation: submitted, item: mut buffer }) =
                    read_rx.blocking_recv()
                {
                    let (status, len) = run_transfer(&generation, submitted, || {
                        handle.read_bulk(USB_EP_IN, &mut buffer.data, timeout)
                    });
                    buffer.len = len;
                    if completions.send(Completion::Read { buffer, status }).is_err() {
                        break;
                    }
                }
            })
        };

        let writer = {
            let handle = handle.clone();
            let generation = generation.clone();
            std::thread::spawn(move || {
                while let Some(Queued { generation: submitted, item: transfer }) =
                    write_rx.blocking_recv()
                {
                    let (status, len) = run_transfer(&generation, submitted, || {
                        handle.write_bulk(USB_EP_OUT, &transfer.data, timeout)
                    });
                    if status == TransferStatus::Completed && len != transfer.data.len() {
                        warn!("short write, {} of {} bytes", len, transfer.data.len());
                    }
                    if completions.send(Completion::Write { transfer, status }).is_err() {
                        break;
                    }
                }
            })
        };

        Ok(RusbTransport {
            _handle: handle,
            generation,
            reads: Mutex::new(Some(read_tx)),
            writes: Mutex::new(Some(write_tx)),
            workers: vec![reader, writer],
        })
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl Transport for RusbTransport {
    fn submit_read(&self, buffer: RxBuffer) -> Result<(), TransportError> {
        let reads = self.reads.lock().map_err(|_| TransportError::Shutdown)?;
        let Some(queue) = reads.as_ref() else {
            return Err(TransportError::Shutdown);
        };
        queue
            .send(Queued {
                generation: self.current_generation(),
                item: buffer,
            })
            .map_err(|_| TransportError::Shutdown)
    }

    fn submit_write(&self, transfer: TxTransfer) -> Result<(), SubmitError> {
        let queued = Queued {
            generation: self.current_generation(),
            item: transfer,
        };

        let writes = match self.writes.lock() {
            Ok(writes) => writes,
            Err(_) => {
                return Err(SubmitError {
                    transfer: queued.item,
                    error: TransportError::Shutdown,
                })
            }
        };

        match writes.as_ref() {
            Some(queue) => queue.send(queued).map_err(|e| SubmitError {
                transfer: e.0.item,
                error: TransportError::Shutdown,
            }),
            None => Err(SubmitError {
                transfer: queued.item,
                error: TransportError::Shutdown,
            }),
        }
    }

    fn cancel_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        self.cancel_all();

        // Closing the queues ends the workers once they drained them
        if let Ok(mut reads) = self.reads.lock() {
            reads.take();
        }
        if let Ok(mut writes) = self.writes.lock() {
            writes.take();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        // The claimed interface is released when the last handle reference goes away
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mapping() {
        assert_eq!(transfer_status(rusb::Error::NoDevice), TransferStatus::NoDevice);
        assert_eq!(transfer_status(rusb::Error::Pipe), TransferStatus::Stall);
        assert_eq!(transfer_status(rusb::Error::Io), TransferStatus::Protocol);
        assert_eq!(transfer_status(rusb::Error::Interrupted), TransferStatus::Cancelled);
        assert_eq!(transfer_status(rusb::Error::Busy), TransferStatus::Failed);
    }

    #[test]
    fn timeout_retried() {
        let generation = AtomicU64::new(3);
        let mut attempts = 0;
        let result = run_transfer(&generation, 3, || {
            attempts += 1;
            match attempts {
                1 | 2 => Err(rusb::Error::Timeout),
                _ => Ok(20),
            }
        });
        assert_eq!(result, (TransferStatus::Completed, 20));
        assert_eq!(attempts, 3);
    }

    #[test]
    fn stale_generation_cancelled() {
        let generation = AtomicU64::new(4);
        let result = run_transfer(&generation, 3, || Ok(20));
        assert_eq!(result, (TransferStatus::Cancelled, 0));
    }
}
