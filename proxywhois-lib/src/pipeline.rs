//! Batch orchestration.
//!
//! `LookupPipeline` owns the queues and the registry, spawns one worker per
//! proxy and decides when a batch is over.

use crate::error::ProxyWhoisError;
use crate::protocols::socks::{ProxyConnector, SocksConnector};
use crate::protocols::whois::{ProxiedWhoisClient, WhoisLookup};
use crate::proxy::ProxyEndpoint;
use crate::queue::{FailureQueue, WorkQueue};
use crate::registry::SharedRegistry;
use crate::store::{FileStore, RecordStore};
use crate::types::{PipelineConfig, WhoisRecord};
use crate::utils::{normalize_domain, validate_domain};
use crate::worker::{Worker, WorkerContext, WorkerReport};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Outcome of `LookupPipeline::run`.
#[derive(Debug, Default, Serialize)]
pub struct BatchSummary {
    /// Records that ended with a successful attempt
    pub succeeded: usize,
    /// Records that exhausted their retries
    pub failed: Vec<WhoisRecord>,
    /// Records still queued when no live worker remained. They stay in the
    /// Work Queue, so a later `run` with fresh proxies picks them up.
    pub unprocessed: Vec<WhoisRecord>,
    pub workers: Vec<WorkerReport>,
}

impl BatchSummary {
    /// Workers that reached `Running`.
    pub fn running_workers(&self) -> usize {
        self.workers.iter().filter(|r| r.reached_running()).count()
    }

    /// Whether every enqueued record was looked up successfully.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.unprocessed.is_empty()
    }
}

/// Bulk WHOIS lookups spread across a pool of proxies.
///
/// # Example
///
/// ```rust,no_run
/// use proxywhois_lib::{LookupPipeline, PipelineConfig, ProxyEndpoint, ProxyType};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pipeline = LookupPipeline::with_socks(PipelineConfig::default());
///     pipeline.enqueue_domains(["example.com", "example.org"]);
///
///     let proxies = vec![ProxyEndpoint::new("127.0.0.1", 9050, ProxyType::Socks5)];
///     let summary = pipeline.run(proxies).await?;
///     println!("{} succeeded", summary.succeeded);
///     Ok(())
/// }
/// ```
pub struct LookupPipeline {
    ctx: WorkerContext,
}

impl LookupPipeline {
    pub fn new(
        config: PipelineConfig,
        connector: Arc<dyn ProxyConnector>,
        lookup: Arc<dyn WhoisLookup>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            ctx: WorkerContext {
                config,
                work: Arc::new(WorkQueue::new()),
                failures: Arc::new(FailureQueue::new()),
                registry: Arc::new(SharedRegistry::new()),
                connector,
                lookup,
                store,
            },
        }
    }

    /// Wire the SOCKS connector, proxied WHOIS client and file store.
    pub fn with_socks(config: PipelineConfig) -> Self {
        let connector: Arc<dyn ProxyConnector> =
            Arc::new(SocksConnector::with_timeout(config.lookup_timeout));
        let lookup = ProxiedWhoisClient::new(Arc::clone(&connector))
            .with_timeout(config.lookup_timeout)
            .with_follow_referrals(config.follow_referrals);
        let store = FileStore::new(config.output_dir.clone()).with_audit(config.audit);
        Self::new(config, connector, Arc::new(lookup), Arc::new(store))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.ctx.config
    }

    pub fn registry(&self) -> &Arc<SharedRegistry> {
        &self.ctx.registry
    }

    pub fn work_queue(&self) -> &Arc<WorkQueue> {
        &self.ctx.work
    }

    /// Add a record to the Work Queue.
    pub fn enqueue(&self, record: WhoisRecord) {
        self.ctx.work.put(record);
    }

    /// Validate and enqueue domain names. Returns how many were queued.
    pub fn enqueue_domains<I, S>(&self, domains: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut queued = 0;
        for domain in domains {
            let domain = domain.as_ref();
            if let Err(e) = validate_domain(domain) {
                warn!(error = %e, "skipping domain");
                continue;
            }
            if !seen.insert(normalize_domain(domain)) {
                continue;
            }
            self.enqueue(WhoisRecord::new(domain));
            queued += 1;
        }
        queued
    }

    /// Take every record in the Failure Queue.
    pub fn drain_failures(&self) -> Vec<WhoisRecord> {
        self.ctx.failures.drain()
    }

    pub fn active_worker_count(&self) -> usize {
        self.ctx.registry.active_workers()
    }

    /// Start a worker for one proxy.
    pub fn spawn_worker(&self, endpoint: ProxyEndpoint) -> JoinHandle<WorkerReport> {
        let worker = Worker::new(endpoint, self.ctx.clone());
        tokio::spawn(worker.run())
    }

    /// Run the queued batch across `endpoints`.
    ///
    /// Completes when every record has been acknowledged (the queue is then
    /// closed so workers exit) or when no worker is left alive. Records
    /// still queued at that point are reported as unprocessed and left in
    /// the queue.
    pub async fn run(
        &self,
        endpoints: Vec<ProxyEndpoint>,
    ) -> Result<BatchSummary, ProxyWhoisError> {
        if self.ctx.work.is_closed() {
            return Err(ProxyWhoisError::internal("work queue already closed"));
        }
        if endpoints.is_empty() {
            warn!("No proxies supplied; nothing will be looked up");
        }

        info!(
            proxies = endpoints.len(),
            domains = self.ctx.work.len(),
            "starting batch"
        );

        let handles: Vec<JoinHandle<WorkerReport>> = endpoints
            .into_iter()
            .map(|endpoint| self.spawn_worker(endpoint))
            .collect();
        let workers = join_all(handles);
        tokio::pin!(workers);

        let work = Arc::clone(&self.ctx.work);
        let results = tokio::select! {
            results = &mut workers => results,
            _ = work.join() => {
                work.close();
                (&mut workers).await
            }
        };

        let mut summary = BatchSummary::default();
        for result in results {
            match result {
                Ok(report) => {
                    summary.succeeded += report.succeeded;
                    summary.workers.push(report);
                }
                Err(e) => error!(error = %e, "worker task failed"),
            }
        }
        summary.failed = self.drain_failures();
        summary.unprocessed = work.snapshot();

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed.len(),
            unprocessed = summary.unprocessed.len(),
            "batch finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::{LookupError, ProxyType, TransportError};
    use async_trait::async_trait;

    struct RefusingConnector;

    #[async_trait]
    impl ProxyConnector for RefusingConnector {
        async fn open(
            &self,
            _endpoint: &ProxyEndpoint,
            _host: &str,
            _port: u16,
        ) -> Result<Box<dyn crate::ProxyStream>, TransportError> {
            Err(TransportError::proxy_unreachable("connection refused"))
        }
    }

    struct NeverCalled;

    #[async_trait]
    impl WhoisLookup for NeverCalled {
        async fn lookup(
            &self,
            _proxy: &ProxyEndpoint,
            domain: &str,
        ) -> Result<String, LookupError> {
            panic!("lookup for {} without a live proxy", domain);
        }
    }

    fn pipeline() -> LookupPipeline {
        LookupPipeline::new(
            PipelineConfig::default(),
            Arc::new(RefusingConnector),
            Arc::new(NeverCalled),
            Arc::new(MemoryStore::new()),
        )
    }

    #[test]
    fn test_enqueue_domains_skips_invalid_and_duplicates() {
        let pipeline = pipeline();
        let queued = pipeline.enqueue_domains(["a.com", "A.COM", "not a domain", "b.org"]);
        assert_eq!(queued, 2);
        assert_eq!(pipeline.work_queue().len(), 2);
    }

    #[tokio::test]
    async fn test_run_without_proxies_leaves_everything_unprocessed() {
        let pipeline = pipeline();
        pipeline.enqueue_domains(["a.com", "b.com"]);

        let summary = pipeline.run(Vec::new()).await.unwrap();
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.unprocessed.len(), 2);
        assert_eq!(pipeline.work_queue().len(), 2);
        assert!(summary.workers.is_empty());
        assert!(!summary.is_complete());
    }

    #[tokio::test]
    async fn test_run_with_empty_queue_finishes() {
        let pipeline = pipeline();
        let proxies = vec![ProxyEndpoint::new("10.0.0.1", 1080, ProxyType::Socks5)];
        let summary = pipeline.run(proxies).await.unwrap();
        assert!(summary.is_complete());
        assert_eq!(summary.workers.len(), 1);
        assert_eq!(pipeline.active_worker_count(), 0);
    }
}
