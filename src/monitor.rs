//! Terminal rendering of live snapshots and the final summary.
//!
//! This is a thin consumer of the stats aggregator: it formats what a
//! snapshot or summary already contains and prints it. Nothing here feeds
//! back into the run.

use crate::stats::{EndpointAggregate, Snapshot, Summary};

/// Print one live frame.
pub fn print_frame(snapshot: &Snapshot) {
    println!(
        "[{:>7.1}s] users: {} active / {} total ({} finished) | rps: {:.1} | requests: {} | errors: {}",
        snapshot.elapsed,
        snapshot.active_users,
        snapshot.total_users,
        snapshot.finished_users,
        snapshot.rps,
        snapshot.total_requests,
        snapshot.total_errors,
    );

    for endpoint in &snapshot.endpoints {
        println!(
            "    {:<40} {:>6} req  avg {:>8.1}ms  p95 {:>8.1}ms  p99 {:>8.1}ms  err {:>4}",
            endpoint.name, endpoint.count, endpoint.avg, endpoint.p95, endpoint.p99, endpoint.errors,
        );
    }

    for error in &snapshot.recent_errors {
        println!(
            "    ! user {} [{}] {}",
            error.user_id,
            error.screen.as_deref().unwrap_or("-"),
            error.message,
        );
    }
}

fn format_table_row(endpoint: &EndpointAggregate) -> String {
    format!(
        "{:<40} {:>8} {:>6} {:>9.1} {:>9.1} {:>9.1} {:>9.1} {:>9.1} {:>9.1} {:>9.1}",
        endpoint.name,
        endpoint.count,
        endpoint.errors,
        endpoint.avg,
        endpoint.min,
        endpoint.max,
        endpoint.p50,
        endpoint.p90,
        endpoint.p95,
        endpoint.p99,
    )
}

/// Print the end-of-run summary table.
pub fn print_summary(summary: &Summary) {
    println!();
    println!("Run complete in {:.1}s", summary.duration_seconds);
    println!(
        "  {} requests, {} errors, {} users, {} scenario errors",
        summary.total_requests, summary.total_errors, summary.total_users, summary.scenario_error_count,
    );
    println!();
    println!(
        "{:<40} {:>8} {:>6} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9}",
        "endpoint", "count", "err", "avg", "min", "max", "p50", "p90", "p95", "p99",
    );
    for endpoint in &summary.endpoints {
        println!("{}", format_table_row(endpoint));
    }
}

/// Print the start-of-run banner.
pub fn print_banner(scenario: &str, base_url: &str, users: usize, spawn_rate: f64) {
    println!("Starting load run:");
    println!("  Scenario: {}", scenario);
    println!("  Base URL: {}", base_url);
    println!("  Users: {} (spawn rate {}/s)", users, spawn_rate);
}
