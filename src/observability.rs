//! Tracing integration for observability.
//!
//! `log` records are always emitted. With the `tracing` feature enabled,
//! workers additionally run inside a `worker` span and the pipeline emits
//! metric events from [`metrics`].
//!
//! # Example
//!
//! ```rust,ignore
//! use bounded_pipeline::prelude::*;
//! use bounded_pipeline::observability::TracedTransform;
//! use tracing_subscriber::{fmt, prelude::*, EnvFilter};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(EnvFilter::from_default_env()
//!         .add_directive("bounded_pipeline=debug".parse().unwrap()))
//!     .init();
//!
//! let span = tracing::info_span!("ingest", batch = 7);
//! let transform = span.in_scope(|| TracedTransform::new(parse_record));
//! let mut pipeline = Coordinator::new(PipelineConfig::default(), source, transform)?;
//! ```

use crate::core::{Item, Transform, TransformError};

/// A transform wrapper that runs the inner transform inside the span that was
/// current when it was created.
///
/// Workers run on their own threads, so without this the caller's span is
/// lost at the queue boundary.
pub struct TracedTransform<X> {
    inner: X,
    #[cfg(feature = "tracing")]
    span: tracing::Span,
}

impl<X> TracedTransform<X> {
    /// Wrap `inner`, capturing the current span
    pub fn new(inner: X) -> Self {
        Self {
            inner,
            #[cfg(feature = "tracing")]
            span: tracing::Span::current(),
        }
    }

    /// Wrap `inner` with an explicit span
    #[cfg(feature = "tracing")]
    pub fn with_span(inner: X, span: tracing::Span) -> Self {
        Self { inner, span }
    }
}

impl<T, U, X> Transform<T, U> for TracedTransform<X>
where
    X: Transform<T, U>,
{
    fn transform(&self, item: &Item<T>) -> Result<U, TransformError> {
        #[cfg(feature = "tracing")]
        let _guard = self.span.enter();
        self.inner.transform(item)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Metrics recording functions.
///
/// These emit tracing events that metrics backends (for example
/// tracing-opentelemetry) can turn into counters, gauges and histograms.
#[cfg(feature = "tracing")]
pub mod metrics {
    use crate::pipeline::{PipelineState, Tally};
    use crate::pool::ExitReason;
    use std::time::Duration;

    /// Records one transform call.
    #[inline]
    pub fn record_completion(duration: Duration, success: bool) {
        let duration_us = duration.as_micros() as u64;
        if success {
            tracing::trace!(
                counter.items_processed = 1,
                histogram.transform_duration_us = duration_us,
                "item processed"
            );
        } else {
            tracing::trace!(
                counter.items_failed = 1,
                histogram.transform_duration_us = duration_us,
                "item failed"
            );
        }
    }

    /// Records a worker exit.
    #[inline]
    pub fn record_worker_exit(worker_id: usize, reason: &ExitReason) {
        match reason {
            ExitReason::Fatal(msg) => tracing::error!(
                counter.workers_failed = 1,
                worker_id = worker_id,
                error = %msg,
                "worker failed"
            ),
            other => tracing::debug!(
                worker_id = worker_id,
                reason = %other,
                "worker stopped"
            ),
        }
    }

    /// Records a lifecycle transition.
    #[inline]
    pub fn record_state(pipeline: &str, state: PipelineState) {
        tracing::info!(pipeline = pipeline, state = %state, "pipeline state changed");
    }

    /// Records the final tally.
    #[inline]
    pub fn record_tally(tally: &Tally) {
        tracing::info!(
            run_id = %tally.run_id,
            items_produced = tally.items_produced,
            results_collected = tally.results_collected,
            transform_failures = tally.transform_failures,
            items_lost = tally.items_lost,
            items_unprocessed = tally.items_unprocessed,
            cancelled = tally.cancelled.is_some(),
            "pipeline finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ItemId;

    struct Upper;

    impl Transform<String, String> for Upper {
        fn transform(&self, item: &Item<String>) -> Result<String, TransformError> {
            Ok(item.payload().to_uppercase())
        }

        fn name(&self) -> &str {
            "Upper"
        }
    }

    #[test]
    fn test_traced_transform_delegates() {
        let traced = TracedTransform::new(Upper);
        let item = Item::new(ItemId::new(0, 0), "abc".to_string());

        let out: String = traced.transform(&item).unwrap();
        assert_eq!(out, "ABC");
        assert_eq!(Transform::<String, String>::name(&traced), "Upper");
    }
}
