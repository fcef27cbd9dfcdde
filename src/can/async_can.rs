//! Async wrapper for Adapters implementing the [`CanAdapter`] trait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::can::{CanAdapter, Frame, NetworkInterface};
use crate::error::Error;
use crate::udt1cri::transport::CompletionReceiver;
use crate::Stream;
use async_stream::stream;
use tokio::sync::{broadcast, oneshot, Notify};
use tracing::{error, trace};

const CAN_RX_BUFFER_SIZE: usize = 1024;

/// [`NetworkInterface`] backed by tokio primitives. Received and echoed frames are
/// broadcast, queue wake-ups are signalled through a [`Notify`].
pub struct BroadcastInterface {
    recv_sender: broadcast::Sender<Frame>,
    queue: Notify,
    detached: AtomicBool,
}

impl Default for BroadcastInterface {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastInterface {
    pub fn new() -> Self {
        let (recv_sender, _) = broadcast::channel(CAN_RX_BUFFER_SIZE);
        Self {
            recv_sender,
            queue: Notify::new(),
            detached: AtomicBool::new(false),
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.recv_sender.subscribe()
    }
}

impl NetworkInterface for BroadcastInterface {
    fn rx(&self, frame: Frame) {
        trace!("RX {:?}", frame);
        // No subscribers is fine, the frame is just not observed
        let _ = self.recv_sender.send(frame);
    }

    fn wake_queue(&self) {
        self.queue.notify_waiters();
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::Release);
        self.queue.notify_waiters();
    }
}

async fn process(
    adapter: Arc<dyn CanAdapter>,
    mut shutdown_receiver: oneshot::Receiver<()>,
    mut completions: CompletionReceiver,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_receiver => break,
            completion = completions.recv() => match completion {
                Some(completion) => adapter.handle_completion(completion),
                None => break,
            },
        }
    }
}

/// Async wrapper around a [`CanAdapter`]. Starts a background thread that consumes the
/// transfer completions, so completion effects are applied by a single consumer.
pub struct AsyncCanAdapter {
    adapter: Arc<dyn CanAdapter>,
    iface: Arc<BroadcastInterface>,
    processing_handle: Option<std::thread::JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl AsyncCanAdapter {
    pub fn new<T: CanAdapter + 'static>(
        adapter: Arc<T>,
        iface: Arc<BroadcastInterface>,
        completions: CompletionReceiver,
    ) -> Self {
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let adapter: Arc<dyn CanAdapter> = adapter;

        let mut ret = AsyncCanAdapter {
            adapter: adapter.clone(),
            iface,
            shutdown: Some(shutdown_sender),
            processing_handle: None,
        };

        ret.processing_handle = Some(std::thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("failed to start completion thread: {}", e);
                    return;
                }
            };
            runtime.block_on(process(adapter, shutdown_receiver, completions));
        }));

        ret
    }

    /// Send a single frame. The Future will resolve once the frame has been handed over to the adapter for sending. This does not mean the message is sent out on the CAN bus yet, as this could be pending arbitration.
    ///
    /// While all transmit contexts are in flight the future waits for the adapter to wake the queue.
    pub async fn send(&self, frame: &Frame) -> crate::Result<()> {
        loop {
            // Register before trying, so a wake-up between the attempt and the await is not lost
            let woken = self.iface.queue.notified();

            trace!("TX {:?}", frame);

            match self.adapter.send(frame) {
                Err(Error::PoolExhausted) if !self.iface.is_detached() => woken.await,
                Err(Error::PoolExhausted) => return Err(Error::DeviceGone),
                other => return other,
            }
        }
    }

    /// Receive all frames.
    pub fn recv(&self) -> impl Stream<Item = Frame> {
        self.recv_filter(|_| true)
    }

    /// Receive frames that match a filter. Useful in combination with stream adapters.
    pub fn recv_filter(&self, filter: impl Fn(&Frame) -> bool) -> impl Stream<Item = Frame> {
        let mut rx = self.iface.subscribe();

        Box::pin(stream! {
            loop { match rx.recv().await {
                    Ok(frame) => {
                        if filter(&frame) {
                            yield frame
                        } else {
                            continue
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Drop for AsyncCanAdapter {
    fn drop(&mut self) {
        self.adapter.close();

        if let Some(handle) = self.processing_handle.take() {
            // Send shutdown signal to background tread
            if let Some(shutdown) = self.shutdown.take() {
                let _ = shutdown.send(());
            }
            let _ = handle.join();
        }
    }
}
