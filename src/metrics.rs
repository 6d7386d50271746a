//! Engine metrics.
//!
//! Session-level counters and gauges, exposed through the `metriken`
//! registry for whatever exposition layer the embedding application
//! runs.

use metriken::{metric, Counter, Gauge};

#[metric(
    name = "fluxline/exchanges/submitted",
    description = "Exchanges accepted by submit"
)]
pub static EXCHANGES_SUBMITTED: Counter = Counter::new();

#[metric(
    name = "fluxline/exchanges/completed",
    description = "Exchanges finished successfully"
)]
pub static EXCHANGES_COMPLETED: Counter = Counter::new();

#[metric(
    name = "fluxline/exchanges/failed",
    description = "Exchanges terminated by a transfer error"
)]
pub static EXCHANGES_FAILED: Counter = Counter::new();

#[metric(
    name = "fluxline/exchanges/setup_failures",
    description = "Submissions rejected before registration"
)]
pub static SETUP_FAILURES: Counter = Counter::new();

#[metric(
    name = "fluxline/exchanges/active",
    description = "Exchanges currently registered with the multiplexer"
)]
pub static EXCHANGES_ACTIVE: Gauge = Gauge::new();

#[metric(
    name = "fluxline/pool/handles_exhausted",
    description = "Handle-pool backpressure events (submission deferred)"
)]
pub static HANDLE_POOL_EXHAUSTED: Counter = Counter::new();
