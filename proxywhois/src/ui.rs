//! Styled terminal output for the proxywhois CLI.
//!
//! Logging goes to stderr through `tracing`; this module owns the
//! human-readable header and summary on stdout.

use console::{pad_str, style, Alignment};
use proxywhois_lib::{BatchSummary, PipelineConfig, WorkerExit, WorkerReport};
use std::time::Duration;

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

// ── Header ───────────────────────────────────────────────────────────────────

/// Print a styled header at the start of a run.
pub fn print_header(domain_count: usize, proxy_count: usize, config: &PipelineConfig) {
    println!(
        "{} {} {}",
        style("proxywhois").bold(),
        style(format!("v{}", env!("CARGO_PKG_VERSION"))).dim(),
        style(format!(
            "- {} domain{} over {} prox{}",
            domain_count,
            plural(domain_count),
            proxy_count,
            if proxy_count == 1 { "y" } else { "ies" }
        ))
        .dim(),
    );
    println!(
        "  {}",
        style(format!(
            "Retries: {} | Delay: {:?} | Output: {}",
            config.retry_limit,
            config.worker_delay,
            config.output_dir.display()
        ))
        .dim()
    );
    println!();
}

// ── Workers ──────────────────────────────────────────────────────────────────

fn exit_label(exit: WorkerExit) -> String {
    match exit {
        WorkerExit::QueueClosed => style("finished").green().to_string(),
        WorkerExit::ProxyFailed => style("proxy died").red().to_string(),
        WorkerExit::ProxyUnreachable => style("unreachable").yellow().to_string(),
        WorkerExit::ProxyAlreadyClaimed => style("duplicate IP").yellow().to_string(),
    }
}

/// One line per worker.
pub fn print_workers(reports: &[WorkerReport]) {
    for report in reports {
        let ip = report.external_ip.as_deref().unwrap_or("-");
        println!(
            "  {} {} {}  {} ok, {} retried, {} failed",
            pad_str(&report.proxy, 24, Alignment::Left, None),
            pad_str(ip, 16, Alignment::Left, None),
            exit_label(report.exit),
            report.succeeded,
            report.requeued,
            report.failed,
        );
    }
    println!();
}

// ── Summary ──────────────────────────────────────────────────────────────────

/// Print the final summary bar with colored counts.
pub fn print_summary(summary: &BatchSummary, duration: Duration, show_workers: bool) {
    if show_workers {
        print_workers(&summary.workers);
    }

    let total = summary.succeeded + summary.failed.len() + summary.unprocessed.len();
    println!(
        "  {}",
        style("────────────────────────────────────────────────────").dim()
    );
    println!(
        "  {} domain{} in {:.1}s  {}  {}  {}  {}  {}  {}",
        style(total).bold(),
        plural(total),
        duration.as_secs_f64(),
        style("|").dim(),
        style(format!("{} succeeded", summary.succeeded)).green(),
        style("|").dim(),
        style(format!("{} failed", summary.failed.len())).red(),
        style("|").dim(),
        style(format!("{} unprocessed", summary.unprocessed.len())).yellow(),
    );

    let running = summary.running_workers();
    println!(
        "  {}",
        style(format!(
            "{} of {} prox{} usable",
            running,
            summary.workers.len(),
            if summary.workers.len() == 1 { "y" } else { "ies" }
        ))
        .dim()
    );

    print_domain_list("Failed after retries:", summary.failed.iter().map(|r| r.domain()));
    print_domain_list(
        "No live proxy left for:",
        summary.unprocessed.iter().map(|r| r.domain()),
    );
}

fn print_domain_list<'a, I: Iterator<Item = &'a str>>(title: &str, domains: I) {
    const MAX_SHOWN: usize = 10;

    let domains: Vec<&str> = domains.collect();
    if domains.is_empty() {
        return;
    }

    let shown = domains.len().min(MAX_SHOWN);
    let mut line = domains[..shown].join(", ");
    if domains.len() > MAX_SHOWN {
        line.push_str(&format!(" (+{} more)", domains.len() - MAX_SHOWN));
    }
    println!("  {} {}", style(title).yellow(), line);
}
