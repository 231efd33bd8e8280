//! Queue of profile runs.
//!
//! Jobs go through a bounded channel, so `submit` waits when the queue is full.
//! At most `max_concurrent_profiles` runs execute at once, each as its own task
//! with its own cancellation token. A profile can only have one queued or
//! running job at a time.

use crate::error::{LiasseError, Result};
use crate::orchestrator::{ProfileProcessor, RunContext, RunSummary};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

type ActiveRuns = Arc<Mutex<HashMap<String, CancellationToken>>>;

struct Job {
    ctx: RunContext,
    reply: oneshot::Sender<Result<RunSummary>>,
}

/// Handle to a submitted run.
pub struct JobHandle {
    profile_id: String,
    cancel: CancellationToken,
    result: oneshot::Receiver<Result<RunSummary>>,
}

impl JobHandle {
    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the run to finish.
    pub async fn wait(self) -> Result<RunSummary> {
        self.result.await.map_err(|_| LiasseError::WorkerClosed)?
    }
}

fn lock(active: &ActiveRuns) -> Result<MutexGuard<'_, HashMap<String, CancellationToken>>> {
    active
        .lock()
        .map_err(|_| LiasseError::Storage("active run registry lock poisoned".to_string()))
}

pub struct ProfileWorker {
    jobs: mpsc::Sender<Job>,
    active: ActiveRuns,
    dispatcher: JoinHandle<()>,
}

impl ProfileWorker {
    /// Spawns the dispatcher. Must be called inside a tokio runtime.
    pub fn start(processor: Arc<ProfileProcessor>, queue_capacity: usize) -> Self {
        let (jobs, mut queue) = mpsc::channel::<Job>(queue_capacity.max(1));
        let active: ActiveRuns = Arc::new(Mutex::new(HashMap::new()));
        let limit = processor.config().max_concurrent_profiles.max(1);
        let semaphore = Arc::new(Semaphore::new(limit));

        let registry = active.clone();
        let dispatcher = tokio::spawn(async move {
            let mut runs = JoinSet::new();
            while let Some(job) = queue.recv().await {
                while runs.try_join_next().is_some() {}
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let processor = processor.clone();
                let registry = registry.clone();
                runs.spawn(async move {
                    let _permit = permit;
                    let Job { ctx, reply } = job;
                    let profile_id = ctx.profile_id.clone();
                    debug!("Starting run for profile {}", profile_id);

                    // Inner task so a panicking run still clears its registry entry.
                    let run = tokio::spawn(async move { processor.run(&ctx).await });
                    let result = match run.await {
                        Ok(result) => result,
                        Err(e) => {
                            error!("Run for profile {} panicked: {}", profile_id, e);
                            Err(LiasseError::RunAborted {
                                profile_id: profile_id.clone(),
                                reason: e.to_string(),
                            })
                        }
                    };
                    match &result {
                        Ok(summary) => info!(
                            "Profile {} finished: {} documents, {} failures",
                            profile_id,
                            summary.documents,
                            summary.failures.len()
                        ),
                        Err(e) => warn!("Profile {} run failed: {}", profile_id, e),
                    }

                    if let Ok(mut active) = lock(&registry) {
                        active.remove(&profile_id);
                    }
                    let _ = reply.send(result);
                });
            }
            while runs.join_next().await.is_some() {}
            debug!("Profile worker queue closed");
        });

        info!("Profile worker started ({} concurrent runs)", limit);
        Self {
            jobs,
            active,
            dispatcher,
        }
    }

    /// Queues a run. Fails with [`LiasseError::AlreadyRunning`] if the profile
    /// already has a queued or running job.
    pub async fn submit(&self, ctx: RunContext) -> Result<JobHandle> {
        {
            let mut runs = lock(&self.active)?;
            if runs.contains_key(&ctx.profile_id) {
                return Err(LiasseError::AlreadyRunning(ctx.profile_id.clone()));
            }
            runs.insert(ctx.profile_id.clone(), ctx.cancel.clone());
        }

        let (reply, result) = oneshot::channel();
        let handle = JobHandle {
            profile_id: ctx.profile_id.clone(),
            cancel: ctx.cancel.clone(),
            result,
        };

        let profile_id = ctx.profile_id.clone();
        if self.jobs.send(Job { ctx, reply }).await.is_err() {
            if let Ok(mut runs) = lock(&self.active) {
                runs.remove(&profile_id);
            }
            return Err(LiasseError::WorkerClosed);
        }
        Ok(handle)
    }

    /// Cancels the profile's queued or running job. Returns whether one existed.
    pub fn cancel(&self, profile_id: &str) -> bool {
        match lock(&self.active) {
            Ok(runs) => match runs.get(profile_id) {
                Some(token) => {
                    info!("Cancelling processing for profile {}", profile_id);
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn is_active(&self, profile_id: &str) -> bool {
        lock(&self.active).is_ok_and(|runs| runs.contains_key(profile_id))
    }

    /// Stops accepting jobs and waits until every queued and running job has finished.
    pub async fn shutdown(self) {
        drop(self.jobs);
        let _ = self.dispatcher.await;
    }
}
