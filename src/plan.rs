//! Per-filesystem replication planning and execution
//!
//! A `FilesystemPlan` takes the paired descriptors for one path, derives the
//! ordered list of replication steps (resume-aware, conflict-resolved,
//! size-estimated) and drives them to completion strictly in order.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

use crate::config::PlannerPolicy;
use crate::diff::{incremental_path, sort_versions, Conflict};
use crate::endpoint::{Receiver, SendDryReq, Sender};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::report::{FilesystemReport, FilesystemState};
use crate::resolve::try_autoresolve_conflict;
use crate::resume::ResumeToken;
use crate::step::Step;
use crate::version::{Filesystem, FilesystemPair, FilesystemVersion};

/// Planning and execution state for one filesystem of a replication attempt
pub struct FilesystemPlan {
    sender: Arc<dyn Sender>,
    receiver: Arc<dyn Receiver>,
    policy: PlannerPolicy,

    path: String,
    sender_fs: Filesystem,
    receiver_fs: Option<Filesystem>,

    metrics: Arc<Metrics>,
    bytes_replicated: Arc<AtomicU64>,

    state: Mutex<FilesystemState>,
    error: Mutex<Option<String>>,
    steps: Mutex<Vec<Arc<Step>>>,
    current_step: AtomicUsize,
}

impl fmt::Debug for FilesystemPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FilesystemPlan({})", self.path)
    }
}

impl FilesystemPlan {
    pub(crate) fn new(
        sender: Arc<dyn Sender>,
        receiver: Arc<dyn Receiver>,
        policy: PlannerPolicy,
        pair: FilesystemPair,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            sender,
            receiver,
            policy,
            path: pair.sender_fs.path.clone(),
            sender_fs: pair.sender_fs,
            receiver_fs: pair.receiver_fs,
            metrics,
            bytes_replicated: Arc::new(AtomicU64::new(0)),
            state: Mutex::new(FilesystemState::Pending),
            error: Mutex::new(None),
            steps: Mutex::new(Vec::new()),
            current_step: AtomicUsize::new(0),
        }
    }

    /// Path of the filesystem this plan replicates
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current lifecycle state
    pub fn state(&self) -> FilesystemState {
        *self.state.lock().unwrap()
    }

    /// Derive the ordered list of replication steps for this filesystem.
    ///
    /// An empty list means the receiver is already up to date.
    pub async fn plan_steps(&self) -> Result<Vec<Arc<Step>>> {
        debug!(filesystem = %self.path, "assessing filesystem");

        if self.sender_fs.is_placeholder {
            debug!(filesystem = %self.path, "sender filesystem is placeholder");
            if let Some(receiver_fs) = &self.receiver_fs {
                if !receiver_fs.is_placeholder {
                    error!(
                        filesystem = %self.path,
                        "sender filesystem is placeholder, but receiver filesystem is not"
                    );
                    return Err(Error::PlaceholderMismatch {
                        filesystem: self.path.clone(),
                    });
                }
            }
            // The receiver materializes placeholders on its own when the
            // first non-placeholder child arrives.
            debug!(filesystem = %self.path, "no steps required for placeholders");
            return Ok(Vec::new());
        }

        let (sender_versions, receiver_versions) = self.list_both_versions().await?;
        if sender_versions.is_empty() {
            error!(filesystem = %self.path, "sender does not have any versions");
            return Err(Conflict::SenderHasNoVersions.into());
        }

        let mut steps = match self.receiver_resume_token() {
            Some(raw_token) => self.plan_resume(raw_token, sender_versions)?,
            None => self.plan_incremental(sender_versions, receiver_versions)?,
        };

        if steps.is_empty() {
            info!(filesystem = %self.path, "planning determined that no replication steps are required");
        } else if let Err(err) = self.update_size_estimates(&mut steps).await {
            warn!(filesystem = %self.path, error = %err, "size estimation failed, continuing without estimates");
        }

        let steps: Vec<Arc<Step>> = steps.into_iter().map(Arc::new).collect();
        *self.steps.lock().unwrap() = steps.clone();
        debug!(filesystem = %self.path, steps = steps.len(), "filesystem planning finished");
        Ok(steps)
    }

    /// Plan and execute all steps, recording state for the report surface.
    ///
    /// Steps commit strictly in order: step n+1 does not start before step
    /// n's completion notification returned.
    pub async fn run(&self) -> Result<()> {
        self.set_state(FilesystemState::Planning);
        let steps = match self.plan_steps().await {
            Ok(steps) => steps,
            Err(err) => {
                self.fail(&err);
                return Err(err);
            }
        };

        self.set_state(FilesystemState::Running);
        for (idx, step) in steps.iter().enumerate() {
            self.current_step.store(idx, Ordering::Release);
            info!(filesystem = %self.path, step = %step, "replication step starting");
            if let Err(err) = step.execute().await {
                self.metrics.incr_steps_failed();
                self.fail(&err);
                return Err(err);
            }
            self.metrics.incr_steps_completed();
            info!(filesystem = %self.path, step = %step, "replication step done");
        }
        self.current_step.store(steps.len(), Ordering::Release);
        self.set_state(FilesystemState::Done);
        Ok(())
    }

    /// Snapshot this filesystem's progress for the report surface
    pub fn report(&self) -> FilesystemReport {
        let steps = self
            .steps
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.report())
            .collect();
        FilesystemReport {
            path: self.path.clone(),
            state: self.state(),
            error: self.error.lock().unwrap().clone(),
            bytes_replicated: self.bytes_replicated.load(Ordering::Acquire),
            current_step: self.current_step.load(Ordering::Acquire),
            steps,
        }
    }

    fn set_state(&self, state: FilesystemState) {
        *self.state.lock().unwrap() = state;
    }

    fn fail(&self, err: &Error) {
        *self.error.lock().unwrap() = Some(err.to_string());
        self.set_state(FilesystemState::Error);
        self.metrics.incr_filesystems_failed();
    }

    fn needs_receiver_versions(&self) -> bool {
        self.receiver_fs
            .as_ref()
            .map(|fs| !fs.is_placeholder)
            .unwrap_or(false)
    }

    fn receiver_resume_token(&self) -> Option<&str> {
        self.receiver_fs
            .as_ref()?
            .resume_token
            .as_deref()
            .filter(|token| !token.is_empty())
    }

    /// List versions on both endpoints concurrently; the receiver call is
    /// skipped when its side is absent or a placeholder.
    async fn list_both_versions(
        &self,
    ) -> Result<(Vec<FilesystemVersion>, Vec<FilesystemVersion>)> {
        let sender_versions = async {
            self.sender
                .list_versions(&self.path)
                .await
                .map_err(|err| Error::transport(format!("sender: {err}")))
        };
        let receiver_versions = async {
            if self.needs_receiver_versions() {
                self.receiver
                    .list_versions(&self.path)
                    .await
                    .map_err(|err| Error::transport(format!("receiver: {err}")))
            } else {
                Ok(Vec::new())
            }
        };
        tokio::try_join!(sender_versions, receiver_versions)
    }

    /// Continue an interrupted receive: the first step re-issues the send
    /// described by the resume token, subsequent steps are incrementals over
    /// the sender's remaining snapshots.
    fn plan_resume(
        &self,
        raw_token: &str,
        sender_versions: Vec<FilesystemVersion>,
    ) -> Result<Vec<Step>> {
        debug!(filesystem = %self.path, "decoding receiver resume token");
        // A token that fails to decode aborts the plan: replicating without
        // it would discard the receiver's partial state and the bytes
        // already transferred.
        let token = ResumeToken::parse(raw_token)?;
        if token.has_from_guid && token.from_guid == token.to_guid {
            return Err(Error::resume_token(
                "fromguid and toguid match the same version on sender",
            ));
        }

        let sorted = sort_versions(sender_versions);

        let mut from_version: Option<&FilesystemVersion> = None;
        let mut to_version: Option<(usize, &FilesystemVersion)> = None;
        for (idx, version) in sorted.iter().enumerate() {
            if token.has_from_guid && version.guid == token.from_guid {
                // prefer snapshots over bookmarks, size estimation is
                // cheaper on snapshot-to-snapshot
                match from_version {
                    Some(existing) if existing.is_snapshot() => {}
                    _ => from_version = Some(version),
                }
            }
            if version.guid == token.to_guid && version.is_snapshot() {
                to_version = Some((idx, version));
            }
        }

        let Some((to_idx, to)) = to_version else {
            return Err(Error::resume_token(format!(
                "toguid {:#x} not found on sender (toname {:?})",
                token.to_guid, token.to_name
            )));
        };

        let resume_step = self.new_step(
            from_version.cloned(),
            to.clone(),
            raw_token.to_string(),
        );

        // By definition the token's target is the receiver's tip; this is
        // not re-verified here, the receive fails if the assumption is
        // wrong. Later steps run over the sender's remaining snapshots,
        // bookmarks dropped.
        let remaining: Vec<&FilesystemVersion> = sorted[to_idx..]
            .iter()
            .filter(|v| v.is_snapshot())
            .collect();

        let mut steps = vec![resume_step];
        if self.policy.one_step && remaining.len() > 1 {
            // collapse only the tail, never the resume step itself
            steps.push(self.new_step(
                Some(remaining[0].clone()),
                remaining[remaining.len() - 1].clone(),
                String::new(),
            ));
        } else {
            for pair in remaining.windows(2) {
                steps.push(self.new_step(
                    Some(pair[0].clone()),
                    pair[1].clone(),
                    String::new(),
                ));
            }
        }
        Ok(steps)
    }

    /// Normal planning: compute the incremental path, auto-resolving
    /// conflicts where policy allows.
    fn plan_incremental(
        &self,
        sender_versions: Vec<FilesystemVersion>,
        receiver_versions: Vec<FilesystemVersion>,
    ) -> Result<Vec<Step>> {
        let path: Vec<Option<FilesystemVersion>> =
            match incremental_path(&receiver_versions, &sender_versions) {
                Ok(path) => path.into_iter().map(Some).collect(),
                Err(conflict) => {
                    let description = conflict.to_string();
                    let policy = self.policy.conflict_resolution.initial_replication;
                    match try_autoresolve_conflict(conflict, policy) {
                        Ok(resolved) => {
                            info!(
                                filesystem = %self.path,
                                conflict = %description,
                                "conflict automatically resolved"
                            );
                            resolved
                        }
                        Err(err) => {
                            error!(
                                filesystem = %self.path,
                                conflict = %description,
                                "cannot resolve conflict"
                            );
                            return Err(err);
                        }
                    }
                }
            };
        Ok(self.steps_from_path(path))
    }

    /// Turn a replication path into consecutive steps, collapsing under the
    /// one-step policy from the first snapshot-based increment onward.
    fn steps_from_path(&self, path: Vec<Option<FilesystemVersion>>) -> Vec<Step> {
        if path.is_empty() {
            return Vec::new();
        }
        if path.len() == 1 {
            panic!(
                "replication path for {} has a single entry {:?}: incremental paths have at least two entries and full sends start with an absent base",
                self.path, path[0]
            );
        }

        let last = path[path.len() - 1]
            .clone()
            .expect("only the first path entry may be an absent base");

        let mut steps = Vec::with_capacity(path.len() - 1);
        for window in path.windows(2) {
            let from = window[0].clone();
            let to = window[1]
                .clone()
                .expect("only the first path entry may be an absent base");

            // A full send cannot anchor a collapsed stream, so collapsing
            // starts at the first increment whose base is a snapshot.
            let collapse = self.policy.one_step
                && from.as_ref().map(|v| v.is_snapshot()).unwrap_or(false);
            if collapse {
                steps.push(self.new_step(from, last, String::new()));
                break;
            }
            steps.push(self.new_step(from, to, String::new()));
        }
        steps
    }

    /// Ask the sender for size estimates for all steps in one batched
    /// dry-run request. Failure is non-fatal; steps keep a zero estimate.
    async fn update_size_estimates(&self, steps: &mut [Step]) -> Result<()> {
        debug!(filesystem = %self.path, "compute send size estimate");
        let req = SendDryReq {
            items: steps.iter().map(|s| s.build_send_request()).collect(),
            concurrency: self.policy.size_estimation_concurrency,
        };
        let res = self
            .sender
            .send_dry(req)
            .await
            .map_err(|err| Error::SizeEstimate {
                message: err.to_string(),
            })?;

        for (step, item) in steps.iter_mut().zip(res.items) {
            step.set_expected_size(item.expected_size);
        }
        Ok(())
    }

    fn new_step(
        &self,
        from: Option<FilesystemVersion>,
        to: FilesystemVersion,
        resume_token: String,
    ) -> Step {
        Step::new(
            self.sender.clone(),
            self.receiver.clone(),
            self.path.clone(),
            from,
            to,
            resume_token,
            self.policy.replication_options,
            self.bytes_replicated.clone(),
            self.metrics.clone(),
        )
    }
}
