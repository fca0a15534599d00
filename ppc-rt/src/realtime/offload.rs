//! Evaluation offload
//!
//! Runs the policy engine either on a dedicated worker thread (message passing
//! with correlated replies) or inline on the caller's task. Both sit behind
//! `PolicyEvaluator`, so the controller's call site is identical.
//!
//! The worker owns nothing but a copy of the preset table. Policy state goes
//! in with every request and comes back as a next-state copy.

use async_trait::async_trait;
use ppc_common::contracts::ParentPreset;
use ppc_common::events::CueDecision;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::realtime::feature::FeatureFrame;
use crate::realtime::policy::{self, PolicyState, PolicyTuning};

const WORKER_QUEUE_DEPTH: usize = 8;

/// One correlated evaluation request
#[derive(Debug, Clone)]
pub struct EvalRequest {
    pub request_id: u64,
    /// Bias-corrected frame
    pub frame: FeatureFrame,
    pub policy: PolicyState,
    pub now_ms: i64,
}

#[derive(Debug, Clone)]
pub struct EvalResponse {
    pub request_id: u64,
    pub decision: Option<CueDecision>,
    pub policy: PolicyState,
}

/// Evaluate a request in place
pub fn run_request(request: EvalRequest) -> EvalResponse {
    let (decision, policy) = policy::evaluate(&request.frame, &request.policy, request.now_ms);
    EvalResponse {
        request_id: request.request_id,
        decision,
        policy,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OffloadMode {
    Worker,
    Inline,
}

#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    fn mode(&self) -> OffloadMode;

    async fn evaluate(&self, request: EvalRequest) -> Result<EvalResponse>;

    /// Re-bound a policy state to another preset
    async fn apply_preset(&self, policy: PolicyState, preset: ParentPreset) -> Result<PolicyState>;

    /// Release the evaluator; later calls fail with `WorkerUnavailable`. Idempotent.
    fn shutdown(&self);
}

/// Builds one evaluator per session
pub trait EvaluatorFactory: Send + Sync {
    fn create(&self, tuning: &PolicyTuning) -> Result<Arc<dyn PolicyEvaluator>>;
}

/// Synchronous evaluator on the caller's task
pub struct InlineEvaluator {
    tuning: PolicyTuning,
}

impl InlineEvaluator {
    pub fn new(tuning: PolicyTuning) -> Self {
        Self { tuning }
    }
}

#[async_trait]
impl PolicyEvaluator for InlineEvaluator {
    fn mode(&self) -> OffloadMode {
        OffloadMode::Inline
    }

    async fn evaluate(&self, request: EvalRequest) -> Result<EvalResponse> {
        Ok(run_request(request))
    }

    async fn apply_preset(&self, policy: PolicyState, preset: ParentPreset) -> Result<PolicyState> {
        Ok(self.tuning.apply_preset(&policy, preset))
    }

    fn shutdown(&self) {}
}

enum WorkerMessage {
    Evaluate {
        request: EvalRequest,
        reply: oneshot::Sender<EvalResponse>,
    },
    ApplyPreset {
        policy: PolicyState,
        preset: ParentPreset,
        reply: oneshot::Sender<PolicyState>,
    },
}

/// Evaluator backed by a dedicated OS thread
pub struct WorkerEvaluator {
    tx: Mutex<Option<mpsc::Sender<WorkerMessage>>>,
    eval_timeout: Duration,
    apply_timeout: Duration,
}

impl WorkerEvaluator {
    pub fn spawn(tuning: PolicyTuning, eval_timeout: Duration, apply_timeout: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::channel(WORKER_QUEUE_DEPTH);

        std::thread::Builder::new()
            .name("ppc-policy-worker".to_string())
            .spawn(move || worker_loop(tuning, rx))
            .map_err(|e| Error::WorkerUnavailable(format!("failed to spawn policy worker: {}", e)))?;

        info!("Policy worker started");
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            eval_timeout,
            apply_timeout,
        })
    }

    fn sender(&self) -> Result<mpsc::Sender<WorkerMessage>> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::WorkerUnavailable("policy worker shut down".to_string()))
    }

    async fn call<T>(
        &self,
        message: WorkerMessage,
        reply: oneshot::Receiver<T>,
        timeout: Duration,
    ) -> Result<T> {
        self.sender()?
            .send(message)
            .await
            .map_err(|_| Error::WorkerUnavailable("policy worker stopped".to_string()))?;

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(value)) => Ok(value),
            // Reply sender dropped without answering: the worker thread died
            Ok(Err(_)) => Err(Error::WorkerUnavailable(
                "policy worker dropped the request".to_string(),
            )),
            Err(_) => Err(Error::EvaluationTimeout(timeout.as_millis() as u64)),
        }
    }
}

fn worker_loop(tuning: PolicyTuning, mut rx: mpsc::Receiver<WorkerMessage>) {
    debug!("Policy worker loop started");
    while let Some(message) = rx.blocking_recv() {
        match message {
            WorkerMessage::Evaluate { request, reply } => {
                // Caller may have timed out and gone away
                let _ = reply.send(run_request(request));
            }
            WorkerMessage::ApplyPreset {
                policy,
                preset,
                reply,
            } => {
                let _ = reply.send(tuning.apply_preset(&policy, preset));
            }
        }
    }
    debug!("Policy worker loop exited");
}

#[async_trait]
impl PolicyEvaluator for WorkerEvaluator {
    fn mode(&self) -> OffloadMode {
        OffloadMode::Worker
    }

    async fn evaluate(&self, request: EvalRequest) -> Result<EvalResponse> {
        let (reply, rx) = oneshot::channel();
        self.call(WorkerMessage::Evaluate { request, reply }, rx, self.eval_timeout)
            .await
    }

    async fn apply_preset(&self, policy: PolicyState, preset: ParentPreset) -> Result<PolicyState> {
        let (reply, rx) = oneshot::channel();
        self.call(
            WorkerMessage::ApplyPreset {
                policy,
                preset,
                reply,
            },
            rx,
            self.apply_timeout,
        )
        .await
    }

    fn shutdown(&self) {
        // Dropping the last sender ends the worker loop
        if self.tx.lock().unwrap_or_else(PoisonError::into_inner).take().is_some() {
            info!("Policy worker shut down");
        }
    }
}

impl Drop for WorkerEvaluator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker when enabled, inline otherwise
pub struct DefaultEvaluatorFactory {
    pub worker_enabled: bool,
    pub eval_timeout: Duration,
    pub apply_timeout: Duration,
}

impl EvaluatorFactory for DefaultEvaluatorFactory {
    fn create(&self, tuning: &PolicyTuning) -> Result<Arc<dyn PolicyEvaluator>> {
        if !self.worker_enabled {
            return Ok(Arc::new(InlineEvaluator::new(tuning.clone())));
        }
        match WorkerEvaluator::spawn(tuning.clone(), self.eval_timeout, self.apply_timeout) {
            Ok(worker) => Ok(Arc::new(worker)),
            Err(e) => {
                warn!("Policy worker unavailable: {}", e);
                Err(e)
            }
        }
    }
}
