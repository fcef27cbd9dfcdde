#![allow(dead_code)]
//! In-memory transport and network side for driving the adapter without hardware.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use udt1cri::can::{Frame, NetworkInterface};
use udt1cri::udt1cri::transport::{
    Completion, RxBuffer, SubmitError, TransferStatus, Transport, TransportError, TxTransfer,
};
use udt1cri::udt1cri::usb_protocol::{decode, encode, WireMessage};
use udt1cri::udt1cri::{Config, Udt1cri};

/// Holds submitted transfers until the test completes them.
#[derive(Default)]
pub struct MockTransport {
    reads: Mutex<Vec<RxBuffer>>,
    writes: Mutex<Vec<TxTransfer>>,
    cancelled: Mutex<Vec<Completion>>,
    read_error: Mutex<Option<TransportError>>,
    write_error: Mutex<Option<TransportError>>,
    pub reads_submitted: AtomicUsize,
    pub cancel_calls: AtomicUsize,
}

impl MockTransport {
    pub fn fail_reads(&self, error: Option<TransportError>) {
        *self.read_error.lock().unwrap() = error;
    }

    pub fn fail_writes(&self, error: Option<TransportError>) {
        *self.write_error.lock().unwrap() = error;
    }

    pub fn pending_reads(&self) -> usize {
        self.reads.lock().unwrap().len()
    }

    pub fn pending_writes(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    /// Decoded contents of all queued writes, oldest first.
    pub fn written(&self) -> Vec<WireMessage> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|t| decode(&t.data))
            .collect()
    }

    pub fn take_write(&self) -> TxTransfer {
        self.writes.lock().unwrap().remove(0)
    }

    /// Completes the oldest queued read with the given bytes.
    pub fn read_completion(&self, bytes: &[u8], status: TransferStatus) -> Completion {
        let mut buffer = self.reads.lock().unwrap().remove(0);
        buffer.data[..bytes.len()].copy_from_slice(bytes);
        buffer.len = bytes.len();
        Completion::Read { buffer, status }
    }

    pub fn write_completion(&self, status: TransferStatus) -> Completion {
        Completion::Write {
            transfer: self.take_write(),
            status,
        }
    }

    /// Completions produced by the last [`Transport::cancel_all`].
    pub fn take_cancelled(&self) -> Vec<Completion> {
        std::mem::take(&mut *self.cancelled.lock().unwrap())
    }
}

impl Transport for MockTransport {
    fn submit_read(&self, buffer: RxBuffer) -> Result<(), TransportError> {
        if let Some(e) = self.read_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.reads_submitted.fetch_add(1, Ordering::SeqCst);
        self.reads.lock().unwrap().push(buffer);
        Ok(())
    }

    fn submit_write(&self, transfer: TxTransfer) -> Result<(), SubmitError> {
        if let Some(error) = self.write_error.lock().unwrap().clone() {
            return Err(SubmitError { transfer, error });
        }
        self.writes.lock().unwrap().push(transfer);
        Ok(())
    }

    fn cancel_all(&self) {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        let mut cancelled = self.cancelled.lock().unwrap();
        for buffer in self.reads.lock().unwrap().drain(..) {
            cancelled.push(Completion::Read {
                buffer,
                status: TransferStatus::Cancelled,
            });
        }
        for transfer in self.writes.lock().unwrap().drain(..) {
            cancelled.push(Completion::Write {
                transfer,
                status: TransferStatus::Cancelled,
            });
        }
    }
}

/// Records everything the adapter reports to the network side.
#[derive(Default)]
pub struct Collect {
    pub rx: Mutex<Vec<Frame>>,
    pub echo: Mutex<Vec<Frame>>,
    pub stopped: AtomicUsize,
    pub woken: AtomicUsize,
    pub detached: AtomicUsize,
}

impl NetworkInterface for Collect {
    fn rx(&self, frame: Frame) {
        self.rx.lock().unwrap().push(frame);
    }

    fn echo(&self, frame: Frame) {
        self.echo.lock().unwrap().push(frame);
    }

    fn wake_queue(&self) {
        self.woken.fetch_add(1, Ordering::SeqCst);
    }

    fn stop_queue(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }

    fn detach(&self) {
        self.detached.fetch_add(1, Ordering::SeqCst);
    }
}

pub type MockAdapter = Udt1cri<Arc<MockTransport>>;

pub fn adapter(config: Config) -> (MockAdapter, Arc<MockTransport>, Arc<Collect>) {
    let transport = Arc::new(MockTransport::default());
    let iface = Arc::new(Collect::default());
    let adapter = Udt1cri::new(transport.clone(), iface.clone(), config);
    (adapter, transport, iface)
}

/// Started adapter with the two start-up firmware queries already completed.
pub fn started() -> (MockAdapter, Arc<MockTransport>, Arc<Collect>) {
    let (adapter, transport, iface) = adapter(Config::default());
    adapter.start().unwrap();
    while transport.pending_writes() > 0 {
        adapter.handle_completion(transport.write_completion(TransferStatus::Completed));
    }
    (adapter, transport, iface)
}

pub fn stream(messages: &[WireMessage]) -> Vec<u8> {
    messages.iter().flat_map(|m| encode(m)).collect()
}
