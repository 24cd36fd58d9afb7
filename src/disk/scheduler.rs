//! Batched, reordered asynchronous disk I/O.
//!
//! The scheduler owns exclusive access to one block device. Requests are
//! queued through a channel to a dedicated worker thread which accumulates
//! them into batches, flushing when a batch reaches the configured size or
//! when the batch timeout elapses since the last flush, whichever comes
//! first. Within a batch reads execute in arrival order while writes are
//! sorted ascending by page number to approximate sequential access on the
//! device. Every request is answered exactly once through its own
//! single-use result channel.
//!
//! Shutdown drains: queued requests are folded into a final batch and
//! processed before the worker exits. Nothing is cancelled.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, trace, warn};
use parking_lot::RwLock;
use zerocopy::IntoBytes;

use crate::buffer;
use crate::config::SchedulerConfig;
use crate::disk::device::BlockStorage;
use crate::error::{StorageError, StorageResult};
use crate::page::{MemPage, PageId};

/// Outcome of a disk request. Reads resolve to `Some(page)`, writes and
/// syncs to `None`.
pub type DiskResult = StorageResult<Option<MemPage>>;

enum DiskRequest {
    Read {
        page_number: PageId,
        result_tx: SyncSender<DiskResult>,
    },
    Write {
        page_number: PageId,
        payload: MemPage,
        result_tx: SyncSender<DiskResult>,
    },
    Sync {
        result_tx: SyncSender<DiskResult>,
    },
}

enum Command {
    Request(DiskRequest),
    Shutdown,
}

/// Receiving end of a request's single-use result channel.
pub struct ResultHandle {
    rx: Receiver<DiskResult>,
}

impl ResultHandle {
    /// Blocks until the request's batch has been processed.
    pub fn wait(self) -> DiskResult {
        self.rx
            .recv()
            .unwrap_or(Err(StorageError::SchedulerStopped))
    }
}

/// Handle to the disk worker thread.
pub struct DiskScheduler {
    tx: mpsc::Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Takes ownership of `device` and starts the worker thread.
    ///
    /// Panics on invalid configuration; see [`SchedulerConfig::validate`].
    pub fn new(device: Box<dyn BlockStorage>, config: SchedulerConfig) -> Self {
        config.validate();

        let (tx, rx) = mpsc::channel();
        let worker = Worker {
            page_size: device.page_size(),
            device: RwLock::new(device),
            rx,
            config,
        };

        DiskScheduler {
            tx,
            worker: Some(thread::spawn(move || worker.run())),
        }
    }

    /// Queues an asynchronous read of `page_number`.
    pub fn read(&self, page_number: PageId) -> ResultHandle {
        self.submit(|result_tx| DiskRequest::Read {
            page_number,
            result_tx,
        })
    }

    /// Queues an asynchronous write of `payload` to `page_number`.
    pub fn write(&self, page_number: PageId, payload: MemPage) -> ResultHandle {
        self.submit(|result_tx| DiskRequest::Write {
            page_number,
            payload,
            result_tx,
        })
    }

    /// Queues a durability barrier. Processed after the writes of its batch.
    pub fn sync(&self) -> ResultHandle {
        self.submit(|result_tx| DiskRequest::Sync { result_tx })
    }

    fn submit(&self, request: impl FnOnce(SyncSender<DiskResult>) -> DiskRequest) -> ResultHandle {
        let (result_tx, result_rx) = mpsc::sync_channel(1);

        // If the worker is gone the request (and its sender) is dropped and
        // the handle resolves to SchedulerStopped.
        let _ = self.tx.send(Command::Request(request(result_tx)));

        ResultHandle { rx: result_rx }
    }

    /// Stops the worker, blocking until queued requests have been processed.
    /// Further requests resolve to [`StorageError::SchedulerStopped`].
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let _ = self.tx.send(Command::Shutdown);
        if worker.join().is_err() {
            warn!("disk worker thread panicked during shutdown");
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    /// Reads take the shared lock, writes and syncs the exclusive lock.
    device: RwLock<Box<dyn BlockStorage>>,
    page_size: usize,
    rx: Receiver<Command>,
    config: SchedulerConfig,
}

impl Worker {
    fn run(self) {
        let mut batch: Vec<DiskRequest> = Vec::with_capacity(self.config.batch_size);
        let mut deadline = Instant::now() + self.config.batch_timeout;

        loop {
            let timeout = deadline.saturating_duration_since(Instant::now());

            match self.rx.recv_timeout(timeout) {
                Ok(Command::Request(request)) => {
                    batch.push(request);
                    if batch.len() >= self.config.batch_size {
                        self.process_batch(&mut batch);
                        deadline = Instant::now() + self.config.batch_timeout;
                    }
                }
                Ok(Command::Shutdown) => {
                    // Drain whatever was queued behind the shutdown command.
                    while let Ok(Command::Request(request)) = self.rx.try_recv() {
                        batch.push(request);
                    }
                    self.process_batch(&mut batch);
                    debug!("disk worker stopped");
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !batch.is_empty() {
                        self.process_batch(&mut batch);
                    }
                    deadline = Instant::now() + self.config.batch_timeout;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.process_batch(&mut batch);
                    return;
                }
            }
        }
    }

    /// Executes and drains a batch: reads in arrival order, then writes in
    /// ascending page-number order, then sync barriers.
    fn process_batch(&self, batch: &mut Vec<DiskRequest>) {
        if batch.is_empty() {
            return;
        }

        let mut reads = Vec::new();
        let mut writes = Vec::new();
        let mut syncs = Vec::new();

        for request in batch.drain(..) {
            match request {
                DiskRequest::Read { .. } => reads.push(request),
                DiskRequest::Write { .. } => writes.push(request),
                DiskRequest::Sync { .. } => syncs.push(request),
            }
        }

        trace!(
            "flushing batch: {} reads, {} writes, {} syncs",
            reads.len(),
            writes.len(),
            syncs.len()
        );

        for request in reads {
            if let DiskRequest::Read {
                page_number,
                result_tx,
            } = request
            {
                let _ = result_tx.send(self.process_read(page_number));
            }
        }

        writes.sort_by_key(|request| match request {
            DiskRequest::Write { page_number, .. } => *page_number,
            _ => PageId(u32::MAX),
        });

        for request in writes {
            if let DiskRequest::Write {
                page_number,
                payload,
                result_tx,
            } = request
            {
                let _ = result_tx.send(self.process_write(page_number, &payload));
            }
        }

        for request in syncs {
            if let DiskRequest::Sync { result_tx } = request {
                let _ = result_tx.send(self.device.write().sync().map(|()| None));
            }
        }
    }

    fn process_read(&self, page_number: PageId) -> DiskResult {
        let mut image = buffer::alloc_image(self.page_size);

        {
            let device = self.device.read();
            device.read(page_number, image.as_mut_bytes())?;
        }

        MemPage::deserialize(image).map(Some)
    }

    fn process_write(&self, page_number: PageId, payload: &MemPage) -> DiskResult {
        // Serialization failures never touch the device.
        let image = payload
            .serialize()
            .map_err(|e| StorageError::Serialization {
                page: page_number,
                reason: e.to_string(),
            })?;

        if image.len() != self.page_size {
            return Err(StorageError::Serialization {
                page: page_number,
                reason: format!(
                    "payload is {} bytes but the device page size is {}",
                    image.len(),
                    self.page_size
                ),
            });
        }

        let mut device = self.device.write();
        device.write(page_number, image)?;

        Ok(None)
    }
}
