//! The per-proxy worker.
//!
//! A worker owns exactly one `ProxyEndpoint`. It validates the proxy, claims
//! the proxy's external IP in the shared registry, then consumes the work
//! queue until the queue closes or the proxy dies:
//!
//! ```text
//! Initializing -> Validating -> Claiming -> Running -> Draining -> Terminated
//!                      |            |           |
//!                      +------------+-----------+-------------> Terminated
//! ```

use crate::error::{LookupError, LookupErrorKind, ProxyWhoisError};
use crate::protocols::socks::ProxyConnector;
use crate::protocols::whois::WhoisLookup;
use crate::proxy::ProxyEndpoint;
use crate::queue::{FailureQueue, WorkQueue};
use crate::registry::SharedRegistry;
use crate::store::RecordStore;
use crate::types::{PipelineConfig, WhoisAttempt, WhoisRecord};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Initializing,
    Validating,
    Claiming,
    Running,
    Draining,
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Initializing => "initializing",
            WorkerState::Validating => "validating",
            WorkerState::Claiming => "claiming",
            WorkerState::Running => "running",
            WorkerState::Draining => "draining",
            WorkerState::Terminated => "terminated",
        };
        write!(f, "{}", name)
    }
}

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerExit {
    /// Liveness probe found no external IP
    ProxyUnreachable,
    /// Another worker already runs behind the same external IP
    ProxyAlreadyClaimed,
    /// The proxy died mid-batch; the in-flight record was requeued
    ProxyFailed,
    /// The work queue was closed
    QueueClosed,
}

/// Outcome of one worker run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub proxy: String,
    pub external_ip: Option<String>,
    pub exit: WorkerExit,
    /// State the worker left when it terminated
    pub exit_state: WorkerState,
    pub processed: usize,
    pub succeeded: usize,
    pub requeued: usize,
    pub failed: usize,
}

impl WorkerReport {
    /// Whether the worker got past validation and claiming.
    pub fn reached_running(&self) -> bool {
        matches!(self.exit, WorkerExit::ProxyFailed | WorkerExit::QueueClosed)
    }
}

/// Where a processed record goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Routing {
    Done,
    Retry,
    Exhausted,
    ProxyFailed,
}

/// Holds one slot of the active-worker count for the worker's lifetime.
struct WorkerSlot {
    registry: Arc<SharedRegistry>,
}

impl WorkerSlot {
    fn acquire(registry: Arc<SharedRegistry>) -> Self {
        registry.increment_workers();
        Self { registry }
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.registry.decrement_workers();
    }
}

/// Holds a claimed external IP until the worker terminates.
struct IpClaim {
    registry: Arc<SharedRegistry>,
    ip: String,
}

impl Drop for IpClaim {
    fn drop(&mut self) {
        self.registry.release_proxy_ip(&self.ip);
    }
}

/// Acknowledges one dequeued record when dropped, even during unwinding.
struct TaskDone<'a>(&'a WorkQueue);

impl Drop for TaskDone<'_> {
    fn drop(&mut self) {
        self.0.task_done();
    }
}

/// Collaborators a worker is built with.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: PipelineConfig,
    pub work: Arc<WorkQueue>,
    pub failures: Arc<FailureQueue>,
    pub registry: Arc<SharedRegistry>,
    pub connector: Arc<dyn ProxyConnector>,
    pub lookup: Arc<dyn WhoisLookup>,
    pub store: Arc<dyn RecordStore>,
}

pub struct Worker {
    endpoint: ProxyEndpoint,
    ctx: WorkerContext,
    state: WorkerState,
    processed: usize,
    succeeded: usize,
    requeued: usize,
    failed: usize,
}

impl Worker {
    pub fn new(endpoint: ProxyEndpoint, ctx: WorkerContext) -> Self {
        Self {
            endpoint,
            ctx,
            state: WorkerState::Initializing,
            processed: 0,
            succeeded: 0,
            requeued: 0,
            failed: 0,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    fn transition(&mut self, next: WorkerState) {
        debug!(proxy = %self.endpoint, from = %self.state, to = %next, "worker state change");
        self.state = next;
    }

    /// Run the worker to completion.
    pub async fn run(mut self) -> WorkerReport {
        let _slot = WorkerSlot::acquire(Arc::clone(&self.ctx.registry));

        let exit = match self.start().await {
            Ok(_claim) => self.consume().await,
            Err(e) => {
                warn!(proxy = %self.endpoint.address(), error = %e, "proxy rejected");
                match e {
                    ProxyWhoisError::ProxyAlreadyClaimed { .. } => WorkerExit::ProxyAlreadyClaimed,
                    _ => WorkerExit::ProxyUnreachable,
                }
            }
        };

        let exit_state = self.state;
        self.transition(WorkerState::Terminated);

        WorkerReport {
            proxy: self.endpoint.address(),
            external_ip: self.endpoint.external_ip.clone(),
            exit,
            exit_state,
            processed: self.processed,
            succeeded: self.succeeded,
            requeued: self.requeued,
            failed: self.failed,
        }
    }

    /// Validate the proxy and claim its external IP.
    async fn start(&mut self) -> Result<IpClaim, ProxyWhoisError> {
        self.transition(WorkerState::Validating);
        let ctx = self.ctx.clone();
        if !self
            .endpoint
            .connect(ctx.connector.as_ref(), &ctx.config.probe)
            .await
        {
            return Err(ProxyWhoisError::proxy_unreachable(self.endpoint.address()));
        }

        let ip = match (&self.endpoint.external_ip, self.endpoint.ready) {
            (Some(ip), true) => ip.clone(),
            _ => return Err(ProxyWhoisError::proxy_unreachable(self.endpoint.address())),
        };

        self.transition(WorkerState::Claiming);
        if !ctx.registry.claim_proxy_ip(&ip) {
            return Err(ProxyWhoisError::proxy_already_claimed(
                self.endpoint.address(),
                ip,
            ));
        }

        self.transition(WorkerState::Running);
        info!(proxy = %self.endpoint, "worker running");
        Ok(IpClaim {
            registry: ctx.registry,
            ip,
        })
    }

    /// Consume the work queue until it closes or the proxy dies.
    async fn consume(&mut self) -> WorkerExit {
        let work = Arc::clone(&self.ctx.work);

        while self.state == WorkerState::Running {
            let Some(mut record) = work.get().await else {
                return WorkerExit::QueueClosed;
            };
            let ack = TaskDone(&work);

            let routing = self.process(&mut record).await;
            self.processed += 1;

            match AssertUnwindSafe(self.ctx.store.persist(&record))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(domain = %record.domain(), error = %e, "failed to persist record")
                }
                Err(panic) => error!(
                    domain = %record.domain(),
                    panic = panic_message(&*panic),
                    "record store panicked"
                ),
            }

            match routing {
                Routing::Done => self.succeeded += 1,
                Routing::Retry | Routing::ProxyFailed => {
                    self.requeued += 1;
                    work.put(record);
                }
                Routing::Exhausted => {
                    self.failed += 1;
                    self.ctx.failures.push(record);
                }
            }
            drop(ack);

            if routing == Routing::ProxyFailed {
                self.transition(WorkerState::Draining);
                break;
            }

            if !work.is_empty() && !self.ctx.config.worker_delay.is_zero() {
                tokio::time::sleep(self.ctx.config.worker_delay).await;
            }
        }

        WorkerExit::ProxyFailed
    }

    /// One attempt for one record.
    async fn process(&mut self, record: &mut WhoisRecord) -> Routing {
        record.add_attempt(WhoisAttempt::new(self.endpoint.clone()));

        let result = AssertUnwindSafe(self.ctx.lookup.lookup(&self.endpoint, record.domain()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let reason = panic_message(&*panic);
                error!(
                    proxy = %self.endpoint,
                    domain = %record.domain(),
                    panic = reason,
                    "lookup panicked"
                );
                Err(LookupError::other(format!("lookup panicked: {}", reason)))
            });

        match result {
            Ok(text) => {
                record.set_data(text);
                if let Err(e) = record.mark_success() {
                    error!(error = %e, "lost track of the current attempt");
                }
                debug!(proxy = %self.endpoint, domain = %record.domain(), "lookup succeeded");
                Routing::Done
            }
            Err(err) => {
                self.endpoint.record_error();
                let message = match err.kind {
                    LookupErrorKind::TransportFatal => {
                        let fatal =
                            ProxyWhoisError::transport_fatal(self.endpoint.address(), &err.message);
                        warn!(domain = %record.domain(), error = %fatal, "proxy failed, draining");
                        fatal.to_string()
                    }
                    LookupErrorKind::DomainInvalid => {
                        warn!(domain = %record.domain(), error = %err.message, "invalid domain");
                        format!("Invalid domain: {}", record.domain())
                    }
                    LookupErrorKind::Other => {
                        warn!(
                            proxy = %self.endpoint,
                            domain = %record.domain(),
                            error = %err.message,
                            "lookup failed"
                        );
                        format!("Lookup failed for {}: {}", record.domain(), err.message)
                    }
                };
                if let Err(e) = record.add_error(err.kind, message) {
                    error!(error = %e, "failed to record lookup error");
                }

                if err.kind == LookupErrorKind::TransportFatal {
                    Routing::ProxyFailed
                } else if record.can_retry(self.ctx.config.retry_limit) {
                    Routing::Retry
                } else {
                    Routing::Exhausted
                }
            }
        }
    }
}

/// Best-effort text of a caught panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
