//! Top-level replication planner
//!
//! One `Planner` instance is one replication job: it enumerates both
//! endpoints, pairs filesystems by path, builds one plan per pair and drives
//! the plans with bounded parallelism. Per-filesystem failures are recorded
//! in the reports; only planning-phase failures abort the whole attempt.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{error, info};

use crate::config::PlannerPolicy;
use crate::endpoint::{Receiver, Sender};
use crate::error::{Error, Result};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::plan::FilesystemPlan;
use crate::report::ReplicationReport;
use crate::version::FilesystemPair;

/// Coordinates one replication attempt between a sender and a receiver
pub struct Planner {
    sender: Arc<dyn Sender>,
    receiver: Arc<dyn Receiver>,
    policy: PlannerPolicy,
    metrics: Arc<Metrics>,
}

impl Planner {
    /// Create a planner; fails if the policy does not validate
    pub fn new(
        sender: Arc<dyn Sender>,
        receiver: Arc<dyn Receiver>,
        policy: PlannerPolicy,
    ) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            sender,
            receiver,
            policy,
            metrics: Arc::new(Metrics::default()),
        })
    }

    /// Aggregate counters for this attempt
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Probe both endpoints in parallel.
    ///
    /// Identical failure messages from both sides are deduplicated into one.
    pub async fn wait_for_connectivity(&self) -> Result<()> {
        let (sender_res, receiver_res) = tokio::join!(
            self.sender.wait_for_connectivity(),
            self.receiver.wait_for_connectivity()
        );
        match (sender_res, receiver_res) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(sender_err), Err(receiver_err)) => {
                let sender_err = sender_err.to_string();
                let receiver_err = receiver_err.to_string();
                if sender_err == receiver_err {
                    Err(Error::transport(format!(
                        "sender and receiver are not reachable: {sender_err}"
                    )))
                } else {
                    Err(Error::transport(format!(
                        "sender and receiver are not reachable:\n  sender: {sender_err}\n  receiver: {receiver_err}"
                    )))
                }
            }
            (Err(err), Ok(())) => {
                Err(Error::transport(format!("sender is not reachable: {err}")))
            }
            (Ok(()), Err(err)) => {
                Err(Error::transport(format!("receiver is not reachable: {err}")))
            }
        }
    }

    /// Enumerate both endpoints concurrently and build one plan per
    /// sender-side filesystem.
    ///
    /// Receiver-only filesystems are ignored; they belong to another job or
    /// to history. Failure of either listing aborts the whole attempt.
    pub async fn plan(&self) -> Result<Vec<Arc<FilesystemPlan>>> {
        info!("start planning");
        let (sender_list, receiver_list) = tokio::try_join!(
            async {
                self.sender.list_filesystems().await.map_err(|err| {
                    error!(error = %err, "error listing sender filesystems");
                    err
                })
            },
            async {
                self.receiver.list_filesystems().await.map_err(|err| {
                    error!(error = %err, "error listing receiver filesystems");
                    err
                })
            }
        )?;

        let mut plans = Vec::with_capacity(sender_list.len());
        for sender_fs in sender_list {
            let receiver_fs = receiver_list
                .iter()
                .find(|fs| fs.path == sender_fs.path)
                .cloned();
            plans.push(Arc::new(FilesystemPlan::new(
                self.sender.clone(),
                self.receiver.clone(),
                self.policy.clone(),
                FilesystemPair {
                    sender_fs,
                    receiver_fs,
                },
                self.metrics.clone(),
            )));
        }
        self.metrics.add_filesystems_planned(plans.len() as u64);
        info!(filesystems = plans.len(), "planning finished");
        Ok(plans)
    }

    /// Drive all plans with at most `filesystem_concurrency` running at
    /// once. Steps within one plan stay strictly sequential; a failing
    /// filesystem is recorded in its report and does not stop the others.
    pub async fn execute(&self, plans: &[Arc<FilesystemPlan>]) {
        futures::stream::iter(plans.iter().cloned())
            .for_each_concurrent(self.policy.filesystem_concurrency, |plan| async move {
                if let Err(err) = plan.run().await {
                    error!(
                        filesystem = %plan.path(),
                        error = %err,
                        "filesystem replication failed"
                    );
                }
            })
            .await;
    }

    /// Plan and execute one full attempt, returning the final report
    pub async fn run(&self) -> Result<ReplicationReport> {
        let plans = self.plan().await?;
        self.execute(&plans).await;
        Ok(Self::report(&plans))
    }

    /// Snapshot the current progress of `plans` for external observers
    pub fn report(plans: &[Arc<FilesystemPlan>]) -> ReplicationReport {
        ReplicationReport {
            filesystems: plans.iter().map(|plan| plan.report()).collect(),
        }
    }
}
