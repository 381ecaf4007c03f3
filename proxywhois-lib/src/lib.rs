//! # Proxy WHOIS Library
//!
//! Bulk WHOIS lookups spread across a pool of SOCKS proxies, one worker per
//! proxy.
//!
//! Every worker verifies its proxy with an IP echo probe, claims the proxy's
//! external address so that two proxies sharing an exit never both run, and
//! then drains a shared work queue. Failed lookups are retried, possibly on
//! another proxy, until a retry limit is reached, at which point the record
//! lands in the failure queue.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use proxywhois_lib::{LookupPipeline, PipelineConfig, ProxyEndpoint, ProxyType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = LookupPipeline::with_socks(PipelineConfig::default());
//!     pipeline.enqueue_domains(["example.com"]);
//!
//!     let proxy = ProxyEndpoint::parse("socks5://127.0.0.1:9050", ProxyType::Socks5)?;
//!     let summary = pipeline.run(vec![proxy]).await?;
//!     println!("{} succeeded, {} failed", summary.succeeded, summary.failed.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Proxy dedup**: one worker per external IP
//! - **Retry protocol**: bounded retries; a dead proxy never burns a retry
//! - **Pluggable seams**: `ProxyConnector`, `WhoisLookup` and `RecordStore`
//!   traits for custom transports, lookups and storage

// Re-export main public API types and functions
pub use config::{
    load_env_config, load_env_config_from, parse_duration_string, ConfigManager, EnvConfig,
    FileConfig,
};
pub use error::{
    LookupError, LookupErrorKind, ProxyWhoisError, TransportError, TransportErrorKind,
};
pub use pipeline::{BatchSummary, LookupPipeline};
pub use protocols::{ProxiedWhoisClient, ProxyConnector, ProxyStream, SocksConnector, WhoisLookup};
pub use proxy::{parse_probe_response, ProxyAuth, ProxyEndpoint, ProxyType};
pub use queue::{FailureQueue, WorkQueue};
pub use registry::SharedRegistry;
pub use store::{FileStore, MemoryStore, RecordStore};
pub use types::{
    AttemptError, PipelineConfig, ProbeConfig, WhoisAttempt, WhoisRecord, DEFAULT_RETRY_LIMIT,
};
pub use utils::{
    load_domain_file, load_proxy_file, normalize_domain, parse_domain_list, parse_proxy_list,
    validate_domain,
};
pub use worker::{Worker, WorkerContext, WorkerExit, WorkerReport, WorkerState};

// Public modules
pub mod protocols;

// Internal modules - reachable through the re-exports above
mod config;
mod error;
mod pipeline;
mod proxy;
mod queue;
mod registry;
mod store;
mod types;
mod utils;
mod worker;

// Type alias for convenience
pub type Result<T> = std::result::Result<T, ProxyWhoisError>;

// Library version and metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
