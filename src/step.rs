//! A single replication step: one send/receive round-trip

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tracing::{debug, error};

use crate::bytecount::CountingStream;
use crate::config::ReplicationOptions;
use crate::endpoint::{ReceiveReq, Receiver, SendCompletedReq, SendReq, Sender};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::report::StepReport;
use crate::version::FilesystemVersion;

/// One planned send from `from` (absent for a full send) to `to`.
///
/// Steps are created by a filesystem plan and executed exactly once, in
/// order, by the step engine. The byte counter is published by the
/// executing task once the stream is open; the report surface reads it
/// under the same lock.
pub struct Step {
    sender: Arc<dyn Sender>,
    receiver: Arc<dyn Receiver>,

    filesystem: String,
    from: Option<FilesystemVersion>,
    to: FilesystemVersion,

    /// Raw receiver-reported token; empty means no resume
    resume_token: String,

    replication_options: ReplicationOptions,

    /// Dry-run estimate; 0 when none is available
    expected_size: u64,

    /// Parent filesystem's bytes-replicated counter
    fs_bytes: Arc<AtomicU64>,
    metrics: Arc<Metrics>,

    byte_counter: Mutex<Option<Arc<AtomicU64>>>,
}

impl Step {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        sender: Arc<dyn Sender>,
        receiver: Arc<dyn Receiver>,
        filesystem: String,
        from: Option<FilesystemVersion>,
        to: FilesystemVersion,
        resume_token: String,
        replication_options: ReplicationOptions,
        fs_bytes: Arc<AtomicU64>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            sender,
            receiver,
            filesystem,
            from,
            to,
            resume_token,
            replication_options,
            expected_size: 0,
            fs_bytes,
            metrics,
            byte_counter: Mutex::new(None),
        }
    }

    /// Path of the filesystem this step replicates
    pub fn filesystem(&self) -> &str {
        &self.filesystem
    }

    /// Incremental base; `None` for a full send
    pub fn from_version(&self) -> Option<&FilesystemVersion> {
        self.from.as_ref()
    }

    /// Send target; always a snapshot
    pub fn to_version(&self) -> &FilesystemVersion {
        &self.to
    }

    /// Whether this step continues an interrupted receive
    pub fn is_resume(&self) -> bool {
        !self.resume_token.is_empty()
    }

    /// Dry-run size estimate; 0 when none is available
    pub fn expected_size(&self) -> u64 {
        self.expected_size
    }

    pub(crate) fn set_expected_size(&mut self, size: u64) {
        self.expected_size = size;
    }

    /// Creation time of the send target, for external ordering of steps
    pub fn target_date(&self) -> SystemTime {
        self.to.creation
    }

    /// Whether this step and `other` replicate the same increment of the
    /// same filesystem. Used to pair steps across retry attempts.
    ///
    /// Panics when the two steps belong to different filesystems; the
    /// driver must only compare steps of the same filesystem.
    pub fn target_equals(&self, other: &Step) -> bool {
        if self.filesystem != other.filesystem {
            panic!(
                "step comparison across filesystems: {} vs {}",
                self.filesystem, other.filesystem
            );
        }
        self.from_guid() == other.from_guid() && self.to.guid == other.to.guid
    }

    fn from_guid(&self) -> u64 {
        self.from.as_ref().map(|v| v.guid).unwrap_or(0)
    }

    pub(crate) fn build_send_request(&self) -> SendReq {
        SendReq {
            filesystem: self.filesystem.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            resume_token: self.resume_token.clone(),
            replication_options: self.replication_options,
        }
    }

    /// Execute this step: stream from the sender to the receiver, then tell
    /// the sender the stream was fully received so it can release holds and
    /// advance its replication cursor.
    pub async fn execute(&self) -> Result<()> {
        let send_req = self.build_send_request();
        self.send_recv(&send_req).await?;

        debug!(filesystem = %self.filesystem, "tell sender replication completed");
        if let Err(err) = self
            .sender
            .send_completed(SendCompletedReq { original: send_req })
            .await
        {
            error!(
                filesystem = %self.filesystem,
                error = %err,
                "sender did not acknowledge completed replication"
            );
            return Err(err);
        }
        Ok(())
    }

    async fn send_recv(&self, send_req: &SendReq) -> Result<()> {
        debug!(filesystem = %self.filesystem, step = %self, "initiate send request");
        let (send_res, stream) = self.sender.send(send_req.clone()).await?;
        let stream = stream.ok_or_else(|| {
            Error::protocol("send request did not return a stream, broken sender implementation")
        })?;

        let counting = CountingStream::new(stream);
        let counter = counting.counter();
        *self.byte_counter.lock().unwrap() = Some(counter.clone());

        let receive_req = ReceiveReq {
            filesystem: self.filesystem.clone(),
            to: self.to.clone(),
            clear_resume_token: !send_res.used_resume_token,
            replication_options: self.replication_options,
        };

        debug!(
            filesystem = %self.filesystem,
            clear_resume_token = receive_req.clear_resume_token,
            "initiate receive request"
        );
        let received = self.receiver.receive(receive_req, Box::pin(counting)).await;

        // Bytes count on every exit path: a failed receive still moved them,
        // and the resume token covers them on the next attempt.
        let transferred = counter.load(Ordering::Acquire);
        self.fs_bytes.fetch_add(transferred, Ordering::AcqRel);
        self.metrics.add_bytes_replicated(transferred);

        if let Err(err) = received {
            error!(
                filesystem = %self.filesystem,
                to = %self.to,
                error = %err,
                "receive request failed (might also be an error on the sender)"
            );
            return Err(err);
        }
        debug!(filesystem = %self.filesystem, bytes = transferred, "receive finished");
        Ok(())
    }

    /// Snapshot this step's progress for the report surface
    pub fn report(&self) -> StepReport {
        let bytes_replicated = self
            .byte_counter
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0);

        StepReport {
            from: self.from.as_ref().map(|v| v.rel_name()),
            to: self.to.rel_name(),
            resumed: self.is_resume(),
            bytes_expected: self.expected_size,
            bytes_replicated,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.from {
            None => write!(f, "{}{} (full)", self.filesystem, self.to.rel_name()),
            Some(from) => write!(
                f,
                "{}({} => {})",
                self.filesystem,
                from.rel_name(),
                self.to.rel_name()
            ),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step({})", self)
    }
}
