//! proxywhois CLI Application
//!
//! A command-line interface for bulk WHOIS lookups over a pool of SOCKS
//! proxies. This CLI application provides a user-friendly interface to the
//! proxywhois-lib library.

mod ui;

use anyhow::{bail, Context};
use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::Parser;
use proxywhois_lib::{
    load_domain_file, load_env_config, load_proxy_file, parse_duration_string, BatchSummary,
    ConfigManager, FileConfig, LookupPipeline, PipelineConfig, ProxyType, WorkerReport,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, Instant};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

/// CLI arguments for proxywhois
#[derive(Parser, Debug)]
#[command(name = "proxywhois")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bulk WHOIS lookups over a pool of SOCKS proxies")]
#[command(
    long_about = "Bulk WHOIS lookups over a pool of SOCKS proxies.\n\nOne worker runs per live proxy, proxies sharing an external IP are used once, and failed lookups are retried on any worker up to the retry limit."
)]
#[command(styles = STYLES)]
pub struct Args {
    /// Domain names to look up
    #[arg(value_name = "DOMAINS", help_heading = "Domain Selection")]
    pub domains: Vec<String>,

    /// Input file with domains (one per line)
    #[arg(
        short = 'f',
        long = "file",
        value_name = "FILE",
        help_heading = "Domain Selection"
    )]
    pub file: Option<PathBuf>,

    /// Proxy list file (one proxy per line, e.g. socks5://host:port)
    #[arg(
        short = 'x',
        long = "proxies",
        value_name = "FILE",
        help_heading = "Proxies"
    )]
    pub proxies: Option<PathBuf>,

    /// Proxy type for entries without a scheme [default: socks5]
    #[arg(long = "proxy-type", value_name = "TYPE", help_heading = "Proxies")]
    pub proxy_type: Option<ProxyType>,

    /// Per-item delay, e.g. "20s" or "500ms" [default: 20s]
    #[arg(long = "delay", value_name = "DURATION", help_heading = "Lookup")]
    pub delay: Option<String>,

    /// Counted failures before a domain is given up on (1-100) [default: 3]
    #[arg(long = "retries", value_name = "N", help_heading = "Lookup")]
    pub retries: Option<usize>,

    /// Timeout for one WHOIS exchange [default: 10s]
    #[arg(long = "lookup-timeout", value_name = "DURATION", help_heading = "Lookup")]
    pub lookup_timeout: Option<String>,

    /// Timeout for the proxy liveness probe [default: 10s]
    #[arg(long = "probe-timeout", value_name = "DURATION", help_heading = "Lookup")]
    pub probe_timeout: Option<String>,

    /// Do not follow registrar WHOIS referrals
    #[arg(long = "no-referrals", help_heading = "Lookup")]
    pub no_referrals: bool,

    /// Directory WHOIS data is written to [default: whois/]
    #[arg(
        short = 'o',
        long = "output",
        value_name = "DIR",
        help_heading = "Output"
    )]
    pub output: Option<PathBuf>,

    /// Also write <DOMAIN>.json with every attempt
    #[arg(long = "audit", help_heading = "Output")]
    pub audit: bool,

    /// Write records that exhausted their retries to FILE as JSON
    #[arg(long = "failures", value_name = "FILE", help_heading = "Output")]
    pub failures: Option<PathBuf>,

    /// Print the batch summary as JSON
    #[arg(short = 'j', long = "json", help_heading = "Output")]
    pub json: bool,

    /// Use a specific config file instead of discovery
    #[arg(
        short = 'c',
        long = "config",
        value_name = "FILE",
        help_heading = "Configuration"
    )]
    pub config: Option<PathBuf>,

    /// Show debug logging
    #[arg(short = 'v', long = "verbose", help_heading = "Configuration")]
    pub verbose: bool,
}

/// JSON view of a finished batch.
#[derive(Serialize)]
struct JsonSummary<'a> {
    succeeded: usize,
    failed: Vec<&'a str>,
    unprocessed: Vec<&'a str>,
    duration_ms: u128,
    workers: &'a [WorkerReport],
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(args.verbose);

    if let Err(e) = run(args).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// Install the stderr subscriber. RUST_LOG wins over `--verbose`.
fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let (config, proxy_type) = build_config(&args)?;

    let domains = collect_domains(&args)?;
    if domains.is_empty() {
        bail!("No domains to look up. Pass DOMAINS or --file");
    }

    let Some(proxy_file) = &args.proxies else {
        bail!("No proxy list given. Pass --proxies FILE");
    };
    let proxies = load_proxy_file(proxy_file, proxy_type)
        .with_context(|| format!("Failed to load proxies from '{}'", proxy_file.display()))?;
    if proxies.is_empty() {
        bail!("Proxy list '{}' contains no usable proxies", proxy_file.display());
    }

    let pipeline = LookupPipeline::with_socks(config);
    let queued = pipeline.enqueue_domains(&domains);
    if queued == 0 {
        bail!("None of the {} domain(s) given are valid", domains.len());
    }

    if !args.json {
        ui::print_header(queued, proxies.len(), pipeline.config());
    }

    let start = Instant::now();
    let summary = pipeline.run(proxies).await?;
    let elapsed = start.elapsed();

    if let Some(path) = &args.failures {
        write_failures(path, &summary)?;
    }

    if args.json {
        print_json_summary(&summary, elapsed)?;
    } else {
        ui::print_summary(&summary, elapsed, args.verbose);
    }

    Ok(())
}

/// Merge defaults < config file < PW_* environment < command line.
fn build_config(args: &Args) -> anyhow::Result<(PipelineConfig, ProxyType)> {
    let config_manager = ConfigManager::new(args.verbose);

    let file_config: FileConfig = match &args.config {
        Some(path) => config_manager
            .load_file(path)
            .with_context(|| format!("Failed to load config file '{}'", path.display()))?,
        None => config_manager.discover_and_load()?,
    };

    let mut config = file_config.apply_to(PipelineConfig::default());
    config = load_env_config().apply_to(config);

    if let Some(retries) = args.retries {
        if retries == 0 || retries > 100 {
            bail!("--retries must be between 1 and 100");
        }
        config = config.with_retry_limit(retries);
    }
    if let Some(delay) = &args.delay {
        config = config.with_worker_delay(parse_cli_duration("--delay", delay)?);
    }
    if let Some(timeout) = &args.lookup_timeout {
        config = config.with_lookup_timeout(parse_cli_duration("--lookup-timeout", timeout)?);
    }
    if let Some(timeout) = &args.probe_timeout {
        config = config.with_probe_timeout(parse_cli_duration("--probe-timeout", timeout)?);
    }
    if let Some(dir) = &args.output {
        config = config.with_output_dir(dir.clone());
    }
    if args.no_referrals {
        config = config.with_follow_referrals(false);
    }
    if args.audit {
        config = config.with_audit(true);
    }

    let proxy_type = args
        .proxy_type
        .or_else(|| file_config.proxy_type())
        .unwrap_or_default();

    debug!(?config, %proxy_type, "effective configuration");
    Ok((config, proxy_type))
}

fn parse_cli_duration(flag: &str, value: &str) -> anyhow::Result<Duration> {
    match parse_duration_string(value) {
        Some(duration) => Ok(duration),
        None => bail!(
            "Invalid {} '{}'. Use format like '500ms', '20s', '2m'",
            flag,
            value
        ),
    }
}

/// Domains from the command line followed by those from --file.
fn collect_domains(args: &Args) -> anyhow::Result<Vec<String>> {
    let mut domains = args.domains.clone();
    if let Some(path) = &args.file {
        let from_file = load_domain_file(path)
            .with_context(|| format!("Failed to load domains from '{}'", path.display()))?;
        domains.extend(from_file);
    }
    Ok(domains)
}

fn write_failures(path: &Path, summary: &BatchSummary) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&summary.failed)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write failures to '{}'", path.display()))?;
    Ok(())
}

fn print_json_summary(summary: &BatchSummary, elapsed: Duration) -> anyhow::Result<()> {
    let view = JsonSummary {
        succeeded: summary.succeeded,
        failed: summary.failed.iter().map(|r| r.domain()).collect(),
        unprocessed: summary.unprocessed.iter().map(|r| r.domain()).collect(),
        duration_ms: elapsed.as_millis(),
        workers: &summary.workers,
    };
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "proxywhois",
            "example.com",
            "-x",
            "proxies.txt",
            "--proxy-type",
            "socks4",
            "--retries",
            "5",
            "--delay",
            "0s",
        ])
        .unwrap();

        assert_eq!(args.domains, vec!["example.com"]);
        assert_eq!(args.proxy_type, Some(ProxyType::Socks4));
        assert_eq!(args.retries, Some(5));
    }

    #[test]
    fn test_cli_overrides_defaults() {
        let args = Args::try_parse_from([
            "proxywhois",
            "-c",
            "/definitely/missing.toml",
        ])
        .unwrap();
        assert!(build_config(&args).is_err());

        let args = Args::try_parse_from([
            "proxywhois",
            "--delay",
            "250ms",
            "--no-referrals",
            "--audit",
            "-o",
            "out",
        ])
        .unwrap();
        let (config, _) = build_config(&args).unwrap();
        assert_eq!(config.worker_delay, Duration::from_millis(250));
        assert!(!config.follow_referrals);
        assert!(config.audit);
        assert_eq!(config.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_invalid_cli_duration() {
        assert!(parse_cli_duration("--delay", "forever").is_err());
        assert_eq!(
            parse_cli_duration("--delay", "2m").unwrap(),
            Duration::from_secs(120)
        );
    }
}
