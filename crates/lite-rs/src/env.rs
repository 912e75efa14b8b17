use std::env;
use std::sync::OnceLock;

static LITERS_PASS_STATS: OnceLock<bool> = OnceLock::new();
static LITERS_OPTIMIZER_MAX_ITERS: OnceLock<usize> = OnceLock::new();
static LITERS_THREADS: OnceLock<Option<usize>> = OnceLock::new();

const DEFAULT_OPTIMIZER_MAX_ITERS: usize = 4;

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn parse_positive(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|v| *v > 0)
}

/// Whether per-pass statistics are logged at `info` rather than `debug`.
pub(crate) fn pass_stats_enabled() -> bool {
    *LITERS_PASS_STATS.get_or_init(|| match env::var("LITERS_PASS_STATS") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

/// Upper bound for fixed-point iteration of the canonicalize stage.
pub(crate) fn optimizer_max_iters() -> usize {
    *LITERS_OPTIMIZER_MAX_ITERS.get_or_init(|| {
        env::var("LITERS_OPTIMIZER_MAX_ITERS")
            .ok()
            .and_then(|v| parse_positive(&v))
            .unwrap_or(DEFAULT_OPTIMIZER_MAX_ITERS)
    })
}

/// Default work thread count for contexts when the config leaves it unset.
pub(crate) fn default_threads() -> Option<usize> {
    *LITERS_THREADS.get_or_init(|| {
        env::var("LITERS_THREADS")
            .ok()
            .and_then(|v| parse_positive(&v))
    })
}
