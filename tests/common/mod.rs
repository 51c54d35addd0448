//! In-memory mock endpoints shared by the integration tests

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use zettasync::config::{InitialReplication, PlannerPolicy};
use zettasync::endpoint::{
    ByteStream, DestroyResult, DestroySnapshotsReq, DestroySnapshotsRes, Endpoint, ReceiveReq,
    Receiver, ReplicationCursorReq, ReplicationCursorRes, SendCompletedReq, SendDryItem,
    SendDryReq, SendDryRes, SendReq, SendRes, Sender,
};
use zettasync::error::{Error, Result};
use zettasync::version::{Filesystem, FilesystemVersion};

/// Bytes every mock send stream carries
pub const STREAM_SIZE: u64 = 512;

pub fn snap(fs: &str, name: &str, guid: u64, txg: u64) -> FilesystemVersion {
    FilesystemVersion::snapshot(fs, name, guid, txg)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Policy helper: everything default except the two knobs the scenarios vary
pub fn policy(initial: InitialReplication, one_step: bool) -> PlannerPolicy {
    let mut policy = PlannerPolicy::default();
    policy.conflict_resolution.initial_replication = initial;
    policy.one_step = one_step;
    policy
}

#[derive(Default)]
pub struct MockSender {
    pub filesystems: Mutex<Vec<Filesystem>>,
    pub versions: Mutex<HashMap<String, Vec<FilesystemVersion>>>,

    /// Recorded requests, for assertions
    pub send_reqs: Mutex<Vec<SendReq>>,
    pub completed_reqs: Mutex<Vec<SendCompletedReq>>,
    pub dry_reqs: Mutex<Vec<SendDryReq>>,

    /// Failure injection
    pub fail_list: bool,
    pub fail_dry: bool,
    pub connectivity_error: Option<String>,
}

impl MockSender {
    pub fn with_versions(path: &str, versions: Vec<FilesystemVersion>) -> Arc<Self> {
        let sender = Self::default();
        sender.filesystems.lock().unwrap().push(Filesystem::new(path));
        sender.versions.lock().unwrap().insert(path.to_string(), versions);
        Arc::new(sender)
    }

    pub fn add_filesystem(&self, fs: Filesystem, versions: Vec<FilesystemVersion>) {
        self.versions
            .lock()
            .unwrap()
            .insert(fs.path.clone(), versions);
        self.filesystems.lock().unwrap().push(fs);
    }
}

#[async_trait]
impl Endpoint for MockSender {
    async fn list_filesystems(&self) -> Result<Vec<Filesystem>> {
        if self.fail_list {
            return Err(Error::transport("sender listing failed"));
        }
        Ok(self.filesystems.lock().unwrap().clone())
    }

    async fn list_versions(&self, filesystem: &str) -> Result<Vec<FilesystemVersion>> {
        Ok(self
            .versions
            .lock()
            .unwrap()
            .get(filesystem)
            .cloned()
            .unwrap_or_default())
    }

    async fn destroy_snapshots(&self, req: DestroySnapshotsReq) -> Result<DestroySnapshotsRes> {
        Ok(DestroySnapshotsRes {
            results: req
                .snapshots
                .into_iter()
                .map(|name| DestroyResult { name, error: None })
                .collect(),
        })
    }

    async fn wait_for_connectivity(&self) -> Result<()> {
        match &self.connectivity_error {
            Some(message) => Err(Error::transport(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Sender for MockSender {
    async fn send(&self, req: SendReq) -> Result<(SendRes, Option<ByteStream>)> {
        let used_resume_token = !req.resume_token.is_empty();
        self.send_reqs.lock().unwrap().push(req);

        let half = (STREAM_SIZE / 2) as usize;
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from(vec![0u8; half])),
            Ok(Bytes::from(vec![0u8; STREAM_SIZE as usize - half])),
        ];
        let stream: ByteStream = Box::pin(futures::stream::iter(chunks));
        Ok((SendRes { used_resume_token }, Some(stream)))
    }

    async fn send_dry(&self, req: SendDryReq) -> Result<SendDryRes> {
        if self.fail_dry {
            return Err(Error::transport("dry run send request failed"));
        }
        let items = req
            .items
            .iter()
            .map(|_| SendDryItem {
                expected_size: STREAM_SIZE,
            })
            .collect();
        self.dry_reqs.lock().unwrap().push(req);
        Ok(SendDryRes { items })
    }

    async fn send_completed(&self, req: SendCompletedReq) -> Result<()> {
        self.completed_reqs.lock().unwrap().push(req);
        Ok(())
    }

    async fn replication_cursor(&self, _req: ReplicationCursorReq) -> Result<ReplicationCursorRes> {
        Ok(ReplicationCursorRes { guid: None })
    }
}

#[derive(Default)]
pub struct MockReceiver {
    pub filesystems: Mutex<Vec<Filesystem>>,
    pub versions: Mutex<HashMap<String, Vec<FilesystemVersion>>>,

    pub receive_reqs: Mutex<Vec<ReceiveReq>>,

    /// Failure injection
    pub fail_list: bool,
    pub fail_receive: Option<String>,
    pub connectivity_error: Option<String>,
}

impl MockReceiver {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_versions(path: &str, versions: Vec<FilesystemVersion>) -> Arc<Self> {
        let receiver = Self::default();
        receiver
            .filesystems
            .lock()
            .unwrap()
            .push(Filesystem::new(path));
        receiver
            .versions
            .lock()
            .unwrap()
            .insert(path.to_string(), versions);
        Arc::new(receiver)
    }

    pub fn add_filesystem(&self, fs: Filesystem, versions: Vec<FilesystemVersion>) {
        self.versions
            .lock()
            .unwrap()
            .insert(fs.path.clone(), versions);
        self.filesystems.lock().unwrap().push(fs);
    }

    /// Register a filesystem that reports an interrupted receive
    pub fn with_resume_token(
        path: &str,
        token: &str,
        versions: Vec<FilesystemVersion>,
    ) -> Arc<Self> {
        let receiver = Self::default();
        receiver.add_filesystem(Filesystem::new(path).with_resume_token(token), versions);
        Arc::new(receiver)
    }

    pub fn version_names(&self, path: &str) -> Vec<String> {
        self.versions
            .lock()
            .unwrap()
            .get(path)
            .map(|versions| versions.iter().map(|v| v.name.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Endpoint for MockReceiver {
    async fn list_filesystems(&self) -> Result<Vec<Filesystem>> {
        if self.fail_list {
            return Err(Error::transport("receiver listing failed"));
        }
        Ok(self.filesystems.lock().unwrap().clone())
    }

    async fn list_versions(&self, filesystem: &str) -> Result<Vec<FilesystemVersion>> {
        Ok(self
            .versions
            .lock()
            .unwrap()
            .get(filesystem)
            .cloned()
            .unwrap_or_default())
    }

    async fn destroy_snapshots(&self, req: DestroySnapshotsReq) -> Result<DestroySnapshotsRes> {
        Ok(DestroySnapshotsRes {
            results: req
                .snapshots
                .into_iter()
                .map(|name| DestroyResult { name, error: None })
                .collect(),
        })
    }

    async fn wait_for_connectivity(&self) -> Result<()> {
        match &self.connectivity_error {
            Some(message) => Err(Error::transport(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Receiver for MockReceiver {
    async fn receive(&self, req: ReceiveReq, mut stream: ByteStream) -> Result<()> {
        // Drain the stream first; even a failing receive consumed bytes.
        while let Some(chunk) = stream.next().await {
            chunk?;
        }

        self.receive_reqs.lock().unwrap().push(req.clone());

        if let Some(message) = &self.fail_receive {
            return Err(Error::receive(req.filesystem, message.clone()));
        }

        // Apply: the received version inherits the sender's GUID, and any
        // resume token is consumed.
        let mut filesystems = self.filesystems.lock().unwrap();
        match filesystems.iter_mut().find(|fs| fs.path == req.filesystem) {
            Some(fs) => fs.resume_token = None,
            None => filesystems.push(Filesystem::new(req.filesystem.clone())),
        }
        self.versions
            .lock()
            .unwrap()
            .entry(req.filesystem)
            .or_default()
            .push(req.to);
        Ok(())
    }
}
