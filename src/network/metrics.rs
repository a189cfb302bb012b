use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::operations::OperationsStatus;

/// Success/failure tally of collection cycles run for scrapes.
#[derive(Debug, Default)]
pub struct ScrapeStats {
    success: AtomicU64,
    failure: AtomicU64,
}

impl ScrapeStats {
    pub fn record(&self, ok: bool) {
        if ok {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.success.load(Ordering::Relaxed),
            self.failure.load(Ordering::Relaxed),
        )
    }
}

/// Renders one cycle's outcome in the Prometheus text format.
///
/// A missing status emits no operations gauges at all, so the collector keeps
/// the previous values instead of seeing zeros.
pub fn render(namespace: &str, status: Option<&OperationsStatus>, stats: &ScrapeStats) -> String {
    let mut out = String::new();
    let prefix = format!("{namespace}_operations");

    if let Some(status) = status {
        gauge_header(
            &mut out,
            &prefix,
            "longest_query_seconds",
            "Longest query running time in seconds",
        );
        let _ = writeln!(
            out,
            "{prefix}_longest_query_seconds {}",
            status.longest_query_time.as_secs_f64()
        );

        gauge_header(
            &mut out,
            &prefix,
            "index_building",
            "Is index building query running, 0 - no, 1 - yes",
        );
        let _ = writeln!(out, "{prefix}_index_building {}", u8::from(status.index_building));

        if status.index_building {
            gauge_header(
                &mut out,
                &prefix,
                "index_building_progress",
                "Holds count of building index total and done records",
            );
            let _ = writeln!(
                out,
                "{prefix}_index_building_progress{{records=\"total\"}} {}",
                status.index_building_progress_total
            );
            let _ = writeln!(
                out,
                "{prefix}_index_building_progress{{records=\"done\"}} {}",
                status.index_building_progress_done
            );
        }
    }

    gauge_header(
        &mut out,
        &prefix,
        "scrape_error",
        "Whether the last operations scrape failed, 0 - no, 1 - yes",
    );
    let _ = writeln!(out, "{prefix}_scrape_error {}", u8::from(status.is_none()));

    let (success, failure) = stats.snapshot();
    let _ = writeln!(
        out,
        "# HELP {prefix}_scrapes_total Operations scrapes by result"
    );
    let _ = writeln!(out, "# TYPE {prefix}_scrapes_total counter");
    let _ = writeln!(out, "{prefix}_scrapes_total{{result=\"success\"}} {success}");
    let _ = writeln!(out, "{prefix}_scrapes_total{{result=\"failure\"}} {failure}");

    out
}

fn gauge_header(out: &mut String, prefix: &str, name: &str, help: &str) {
    let _ = writeln!(out, "# HELP {prefix}_{name} {help}");
    let _ = writeln!(out, "# TYPE {prefix}_{name} gauge");
}
