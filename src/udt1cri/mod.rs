//! UniSwarm UDT1CRI USB CAN debugger.
//!
//! The adapter carries two microcontrollers, one on the USB side and one on the CAN side.
//! Both report their status with periodic keep-alive messages; received CAN frames and
//! host commands travel as fixed 20-byte messages over one pair of bulk endpoints.
//!
//! [`Udt1cri`] is the driver. It is fed by a [`Transport`] and reports to a
//! [`NetworkInterface`]. Transfers run asynchronously: the driver submits them and the
//! transport later hands each one back through [`Udt1cri::handle_completion`].
pub mod bitrate;
pub mod constants;
pub mod context;
pub mod dispatcher;
pub mod state;
pub mod transport;
#[cfg(feature = "usb")]
pub mod usb;
pub mod usb_protocol;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use strum::IntoEnumIterator;
use tracing::{error, info, warn};

use crate::can::{BusErrorCounter, CanAdapter, CanState, Frame, NetworkInterface};
use crate::error::Error;
use crate::Result;

use bitrate::BitrateEntry;
use constants::{FirmwareTarget, UDT1CRI_MAX_RX_URBS, USB_RX_BUFF_SIZE};
use context::TxContextPool;
use dispatcher::Dispatcher;
use state::{DeviceState, Statistics, StatisticsSnapshot};
use transport::{Completion, RxBuffer, SubmitError, TransferStatus, Transport, TransportError, TxTransfer};
use usb_protocol::{encode, unpack_messages, WireMessage};

const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Adapter configuration, applied by [`Udt1cri::start`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Bitrate in bits per second, one of [`bitrate::BITRATE_TABLE`]. `None` keeps the device setting.
    pub bitrate: Option<u32>,
    /// Bus termination resistor. `None` keeps the device setting.
    pub termination: Option<bool>,
    /// Size of each bulk-in buffer
    pub rx_buffer_size: usize,
    /// Timeout of a single USB transfer
    pub timeout: Duration,
    /// Keep-alive debug bits, see [`constants::DEBUG_KEEPALIVE_USB`] and [`constants::DEBUG_KEEPALIVE_CAN`].
    pub debug: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bitrate: None,
            termination: None,
            rx_buffer_size: USB_RX_BUFF_SIZE,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            debug: 0,
        }
    }
}

/// Driver for one connected adapter.
pub struct Udt1cri<T: Transport> {
    transport: T,
    iface: Arc<dyn NetworkInterface>,
    config: Config,
    pool: TxContextPool,
    state: Mutex<DeviceState>,
    stats: Statistics,
    can_state: Mutex<CanState>,
    bittiming: Mutex<Option<BitrateEntry>>,
    present: AtomicBool,
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Transport> Udt1cri<T> {
    pub fn new(transport: T, iface: Arc<dyn NetworkInterface>, config: Config) -> Self {
        Self {
            transport,
            iface,
            config,
            pool: TxContextPool::new(),
            state: Mutex::new(DeviceState::default()),
            stats: Statistics::default(),
            can_state: Mutex::new(CanState::Stopped),
            bittiming: Mutex::new(None),
            present: AtomicBool::new(true),
        }
    }

    /// Queues the receive transfers, queries both firmware versions and applies the configuration.
    pub fn start(&self) -> Result<()> {
        if !self.is_present() {
            return Err(Error::DeviceGone);
        }

        // Contexts of a previous session are stale
        self.pool.force_release_all();

        let mut submitted = 0;
        let mut failure = None;
        for _ in 0..UDT1CRI_MAX_RX_URBS {
            match self
                .transport
                .submit_read(RxBuffer::new(self.config.rx_buffer_size))
            {
                Ok(()) => submitted += 1,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if submitted == 0 {
            warn!("couldn't setup read transfers");
            return match failure {
                Some(TransportError::NoDevice) => {
                    self.detach();
                    Err(Error::DeviceGone)
                }
                Some(e) => Err(e.into()),
                None => Err(Error::NotStarted),
            };
        }

        if submitted < UDT1CRI_MAX_RX_URBS {
            warn!("rx performance may be slow");
        }

        *lock(&self.can_state) = CanState::ErrorActive;

        for target in FirmwareTarget::iter() {
            self.read_firmware_version(target)?;
        }

        if let Some(bitrate) = self.config.bitrate {
            self.set_bitrate(bitrate)?;
        }
        if let Some(termination) = self.config.termination {
            self.set_termination(termination)?;
        }

        Ok(())
    }

    /// Submits a CAN frame.
    ///
    /// [`Error::PoolExhausted`] means the frame was not taken: retry once the network queue is
    /// woken. [`Error::AllocationFailure`] means the frame was dropped and must not be retried.
    pub fn transmit(&self, frame: &Frame) -> Result<()> {
        self.check_running()?;

        let Some(slot) = self.pool.acquire() else {
            self.iface.stop_queue();
            return Err(Error::PoolExhausted);
        };

        let data = encode(&WireMessage::transmit_request(frame));
        self.pool.bind_frame(&slot, frame.clone());
        self.submit(TxTransfer { slot, data })
    }

    /// Sends a control command. It occupies a transmit context like a frame does, but its
    /// completion does not touch the statistics.
    pub fn send_command(&self, msg: &WireMessage) -> Result<()> {
        if !self.is_present() {
            return Err(Error::DeviceGone);
        }

        let Some(slot) = self.pool.acquire() else {
            self.iface.stop_queue();
            return Err(Error::PoolExhausted);
        };

        self.submit(TxTransfer {
            slot,
            data: encode(msg),
        })
    }

    fn submit(&self, transfer: TxTransfer) -> Result<()> {
        let Err(SubmitError { transfer, error }) = self.transport.submit_write(transfer) else {
            return Ok(());
        };

        self.pool.release(transfer.slot);
        self.stats.record_dropped();

        match &error {
            TransportError::NoDevice => self.detach(),
            TransportError::NoMemory => error!("No memory left for transfer"),
            e => warn!("failed tx transfer: {}", e),
        }

        Err(error.into())
    }

    /// Selects a bitrate from the firmware table and asks the device to switch to it.
    pub fn set_bitrate(&self, bitrate: u32) -> Result<BitrateEntry> {
        let entry = bitrate::resolve(bitrate).map_err(|e| {
            error!("{}", e);
            e
        })?;

        self.send_command(&WireMessage::ChangeBitrateRequest {
            kbps: entry.device_rate_code,
        })?;

        info!(
            "bitrate set to {} (effective {})",
            entry.nominal_bitrate_bps,
            entry.effective_bitrate()
        );
        *lock(&self.bittiming) = Some(*entry);
        Ok(*entry)
    }

    /// Current bit timing, if a bitrate was set this session.
    pub fn bittiming(&self) -> Option<BitrateEntry> {
        *lock(&self.bittiming)
    }

    /// Asks the device to switch the termination resistor. The new state is reported by the
    /// next USB-side keep-alive.
    pub fn set_termination(&self, enabled: bool) -> Result<()> {
        self.send_command(&WireMessage::SetTerminationRequest { enabled })
    }

    /// Text form of the termination property. Only `0` and `1` are accepted.
    pub fn store_termination(&self, value: &str) -> Result<()> {
        match value.trim().parse::<i32>() {
            Ok(0) => self.set_termination(false),
            Ok(1) => self.set_termination(true),
            _ => Err(Error::InvalidTermination(value.to_string())),
        }
    }

    /// Termination state as last reported by the device.
    pub fn termination(&self) -> bool {
        lock(&self.state).termination_enabled
    }

    pub fn read_firmware_version(&self, target: FirmwareTarget) -> Result<()> {
        self.send_command(&WireMessage::ReadFirmwareVersionRequest { target })
    }

    /// The firmware has no mode switch, every supported mode is accepted as is.
    pub fn set_mode(&self, mode: u32) -> Result<()> {
        if mode & !constants::CTRLMODE_SUPPORTED != 0 {
            warn!("unsupported control mode 0x{:x}", mode);
        }
        Ok(())
    }

    pub fn berr_counter(&self) -> BusErrorCounter {
        lock(&self.state).berr_counter()
    }

    pub fn device_state(&self) -> DeviceState {
        lock(&self.state).clone()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    pub fn can_state(&self) -> CanState {
        *lock(&self.can_state)
    }

    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::Acquire)
    }

    /// Number of transmit contexts currently in flight.
    pub fn in_flight(&self) -> usize {
        self.pool.in_use()
    }

    fn check_running(&self) -> Result<()> {
        if !self.is_present() {
            return Err(Error::DeviceGone);
        }
        if self.can_state() == CanState::Stopped {
            return Err(Error::NotStarted);
        }
        Ok(())
    }

    fn detach(&self) {
        if self.present.swap(false, Ordering::AcqRel) {
            self.iface.detach();
        }
    }

    /// Entry point for the transport's completions. Must be called from a single consumer.
    pub fn handle_completion(&self, completion: Completion) {
        match completion {
            Completion::Read { buffer, status } => self.read_completed(buffer, status),
            Completion::Write { transfer, status } => self.write_completed(transfer, status),
        }
    }

    fn read_completed(&self, buffer: RxBuffer, status: TransferStatus) {
        if !self.is_present() || self.can_state() == CanState::Stopped {
            return;
        }

        match status {
            TransferStatus::Completed => {}
            TransferStatus::Cancelled
            | TransferStatus::Stall
            | TransferStatus::Protocol
            | TransferStatus::NoDevice => return,
            TransferStatus::Failed => {
                info!("Rx transfer aborted ({:?})", status);
                return self.resubmit_read(buffer);
            }
        }

        let (messages, discarded) = unpack_messages(buffer.filled());
        {
            let mut state = lock(&self.state);
            let mut dispatcher = Dispatcher {
                state: &mut state,
                stats: &self.stats,
                iface: self.iface.as_ref(),
                debug: self.config.debug,
            };
            for msg in &messages {
                dispatcher.dispatch(msg);
            }
        }

        if discarded > 0 {
            error!("format error, discarding {} trailing bytes", discarded);
            self.stats.record_malformed();
        }

        self.resubmit_read(buffer)
    }

    fn resubmit_read(&self, mut buffer: RxBuffer) {
        buffer.len = 0;
        match self.transport.submit_read(buffer) {
            Ok(()) => {}
            Err(TransportError::NoDevice) => self.detach(),
            Err(e) => error!("failed resubmitting read bulk transfer: {}", e),
        }
    }

    fn write_completed(&self, transfer: TxTransfer, status: TransferStatus) {
        // Contexts force-released by close() or start() have already been accounted for,
        // their handles are stale even if the index is in use again
        let Some(record) = self.pool.release(transfer.slot) else {
            return;
        };

        if status != TransferStatus::Completed {
            info!("Tx transfer aborted ({:?})", status);
        }

        if !self.is_present() {
            return;
        }

        if record.is_can_frame {
            if status == TransferStatus::Completed {
                self.stats.record_tx(record.dlc);
                if let Some(mut echo) = record.echo {
                    echo.loopback = true;
                    self.iface.echo(echo);
                }
            } else {
                self.stats.record_dropped();
            }
        }

        self.iface.wake_queue();
    }

    /// Stops the interface and cancels every outstanding transfer. Frames still in flight
    /// are dropped.
    pub fn close(&self) {
        *lock(&self.can_state) = CanState::Stopped;
        self.iface.stop_queue();

        self.transport.cancel_all();

        let records = self.pool.force_release_all();
        let dropped = records.iter().filter(|r| r.is_can_frame).count();
        for _ in 0..dropped {
            self.stats.record_dropped();
        }
        if !records.is_empty() {
            warn!(
                "released {} transmit contexts at shutdown, {} frames dropped",
                records.len(),
                dropped
            );
        }
    }

    /// The device was removed.
    pub fn disconnect(&self) {
        info!("device disconnected");
        self.detach();
        self.close();
    }
}

impl<T: Transport> CanAdapter for Udt1cri<T> {
    fn send(&self, frame: &Frame) -> Result<()> {
        self.transmit(frame)
    }

    fn handle_completion(&self, completion: Completion) {
        Udt1cri::handle_completion(self, completion)
    }

    fn close(&self) {
        Udt1cri::close(self)
    }
}

#[cfg(feature = "usb")]
impl Udt1cri<usb::RusbTransport> {
    /// Opens the first adapter on the system and wraps it in an [`crate::can::AsyncCanAdapter`].
    pub fn new_async(config: Config) -> Result<crate::can::AsyncCanAdapter> {
        let (completion_sender, completion_receiver) = tokio::sync::mpsc::unbounded_channel();
        let transport = usb::RusbTransport::open_first(completion_sender, config.timeout)?;
        info!("UniSwarm UDT1CRI CAN debugger connected");

        let iface = Arc::new(crate::can::async_can::BroadcastInterface::new());
        let driver = Arc::new(Udt1cri::new(transport, iface.clone(), config));
        driver.start()?;

        Ok(crate::can::AsyncCanAdapter::new(
            driver,
            iface,
            completion_receiver,
        ))
    }
}
