//! Metric analysis: query evaluation and verdict aggregation.
//!
//! While a rollout dwells at a step, the engine runs the configured
//! queries against the metrics provider, grades each result against
//! its threshold, and aggregates to one verdict. Missing signal is
//! `Inconclusive`, never a pass: provider outages, timeouts, and thin
//! sample sets all fail toward caution.

mod provider;

pub use provider::{HttpMetricsProvider, MetricsProvider, ProviderError, StaticMetricsProvider};

use std::sync::Arc;
use std::time::Duration;

use drift_id::AnalysisRunId;
use drift_model::{
    AnalysisRun, AnalysisSpec, MetricQuery, QueryOutcome, Sample, Threshold, Verdict,
    VerdictPolicy,
};
use chrono::Utc;
use tracing::{debug, instrument};

/// Runs analysis cycles against a metrics provider.
pub struct AnalysisEngine {
    provider: Arc<dyn MetricsProvider>,
    call_timeout: Duration,
}

impl AnalysisEngine {
    pub fn new(provider: Arc<dyn MetricsProvider>, call_timeout: Duration) -> Self {
        Self {
            provider,
            call_timeout,
        }
    }

    /// Execute one evaluation cycle: query every metric, grade each
    /// against its threshold, aggregate per the configured policy.
    #[instrument(skip_all, fields(queries = spec.queries.len()))]
    pub async fn run(&self, spec: &AnalysisSpec) -> AnalysisRun {
        let window = Duration::from_secs(spec.window_seconds);
        let mut outcomes = Vec::with_capacity(spec.queries.len());

        for query in &spec.queries {
            let result =
                tokio::time::timeout(self.call_timeout, self.provider.query(&query.expr, window))
                    .await;

            let outcome = match result {
                Ok(Ok(samples)) => evaluate_query(query, &samples, spec.min_samples),
                Ok(Err(err)) => QueryOutcome {
                    name: query.name.clone(),
                    value: None,
                    verdict: Verdict::Inconclusive,
                    message: Some(err.to_string()),
                },
                // A timeout is missing signal, not a failure.
                Err(_) => QueryOutcome {
                    name: query.name.clone(),
                    value: None,
                    verdict: Verdict::Inconclusive,
                    message: Some(format!("query timed out after {:?}", self.call_timeout)),
                },
            };

            debug!(
                query = %outcome.name,
                verdict = %outcome.verdict,
                value = outcome.value,
                "Query evaluated"
            );
            outcomes.push(outcome);
        }

        let verdict = aggregate(&outcomes, spec.policy);

        AnalysisRun {
            id: AnalysisRunId::new(),
            started_at: Utc::now(),
            outcomes,
            verdict,
        }
    }
}

/// Grade one query's samples against its threshold.
pub fn evaluate_query(query: &MetricQuery, samples: &[Sample], min_samples: u32) -> QueryOutcome {
    if (samples.len() as u32) < min_samples.max(1) {
        return QueryOutcome {
            name: query.name.clone(),
            value: None,
            verdict: Verdict::Inconclusive,
            message: Some(format!(
                "{} sample(s), need {}",
                samples.len(),
                min_samples.max(1)
            )),
        };
    }

    match &query.threshold {
        Threshold::Bounds { min, max } => {
            let value = samples[samples.len() - 1].value;
            let below = min.is_some_and(|m| value < m);
            let above = max.is_some_and(|m| value > m);
            let verdict = if below || above {
                Verdict::Fail
            } else {
                Verdict::Pass
            };
            QueryOutcome {
                name: query.name.clone(),
                value: Some(value),
                verdict,
                message: (verdict == Verdict::Fail).then(|| {
                    format!(
                        "value {value} outside bounds [{}, {}]",
                        min.map_or("-inf".to_string(), |m| m.to_string()),
                        max.map_or("+inf".to_string(), |m| m.to_string()),
                    )
                }),
            }
        }
        Threshold::MaxRateOfChange { per_second } => {
            let first = samples[0];
            let last = samples[samples.len() - 1];
            let span = (last.at - first.at).num_seconds();
            if span <= 0 {
                return QueryOutcome {
                    name: query.name.clone(),
                    value: None,
                    verdict: Verdict::Inconclusive,
                    message: Some("zero-width sample window".to_string()),
                };
            }
            let rate = (last.value - first.value).abs() / span as f64;
            let verdict = if rate <= *per_second {
                Verdict::Pass
            } else {
                Verdict::Fail
            };
            QueryOutcome {
                name: query.name.clone(),
                value: Some(rate),
                verdict,
                message: (verdict == Verdict::Fail)
                    .then(|| format!("rate {rate:.6}/s exceeds {per_second}/s")),
            }
        }
    }
}

/// Aggregate per-query outcomes into one verdict.
///
/// A run with no outcomes has no signal and is inconclusive.
pub fn aggregate(outcomes: &[QueryOutcome], policy: VerdictPolicy) -> Verdict {
    if outcomes.is_empty() {
        return Verdict::Inconclusive;
    }

    let fails = outcomes.iter().any(|o| o.verdict == Verdict::Fail);
    let passes = outcomes.iter().any(|o| o.verdict == Verdict::Pass);
    let inconclusive = outcomes.iter().any(|o| o.verdict == Verdict::Inconclusive);

    match policy {
        VerdictPolicy::AllMustPass => {
            if fails {
                Verdict::Fail
            } else if inconclusive {
                Verdict::Inconclusive
            } else {
                Verdict::Pass
            }
        }
        VerdictPolicy::AnyMustPass => {
            if passes {
                Verdict::Pass
            } else if inconclusive {
                Verdict::Inconclusive
            } else {
                Verdict::Fail
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn query(threshold: Threshold) -> MetricQuery {
        MetricQuery {
            name: "error_rate".to_string(),
            expr: "error_rate".to_string(),
            threshold,
        }
    }

    fn flat_samples(value: f64, n: usize) -> Vec<Sample> {
        let now = Utc::now();
        (0..n)
            .map(|i| Sample {
                at: now - ChronoDuration::seconds((n - i) as i64 * 10),
                value,
            })
            .collect()
    }

    #[test]
    fn test_bounds_pass_and_fail() {
        let q = query(Threshold::Bounds {
            min: None,
            max: Some(0.05),
        });

        let ok = evaluate_query(&q, &flat_samples(0.01, 5), 3);
        assert_eq!(ok.verdict, Verdict::Pass);

        let bad = evaluate_query(&q, &flat_samples(0.5, 5), 3);
        assert_eq!(bad.verdict, Verdict::Fail);
        assert!(bad.message.is_some());
    }

    #[test]
    fn test_insufficient_samples_inconclusive() {
        let q = query(Threshold::Bounds {
            min: None,
            max: Some(0.05),
        });
        let outcome = evaluate_query(&q, &flat_samples(0.01, 2), 3);
        assert_eq!(outcome.verdict, Verdict::Inconclusive);
    }

    #[test]
    fn test_zero_samples_inconclusive() {
        let q = query(Threshold::Bounds { min: None, max: None });
        let outcome = evaluate_query(&q, &[], 0);
        assert_eq!(outcome.verdict, Verdict::Inconclusive);
    }

    #[test]
    fn test_rate_of_change() {
        let now = Utc::now();
        let rising: Vec<Sample> = (0..5)
            .map(|i| Sample {
                at: now + ChronoDuration::seconds(i * 10),
                value: i as f64 * 100.0,
            })
            .collect();

        let tolerant = query(Threshold::MaxRateOfChange { per_second: 50.0 });
        assert_eq!(evaluate_query(&tolerant, &rising, 2).verdict, Verdict::Pass);

        let strict = query(Threshold::MaxRateOfChange { per_second: 1.0 });
        assert_eq!(evaluate_query(&strict, &rising, 2).verdict, Verdict::Fail);
    }

    #[test]
    fn test_aggregate_all_must_pass() {
        let outcome = |verdict| QueryOutcome {
            name: "q".to_string(),
            value: None,
            verdict,
            message: None,
        };

        assert_eq!(
            aggregate(&[outcome(Verdict::Pass), outcome(Verdict::Pass)], VerdictPolicy::AllMustPass),
            Verdict::Pass
        );
        assert_eq!(
            aggregate(&[outcome(Verdict::Pass), outcome(Verdict::Fail)], VerdictPolicy::AllMustPass),
            Verdict::Fail
        );
        assert_eq!(
            aggregate(
                &[outcome(Verdict::Pass), outcome(Verdict::Inconclusive)],
                VerdictPolicy::AllMustPass
            ),
            Verdict::Inconclusive
        );
        assert_eq!(aggregate(&[], VerdictPolicy::AllMustPass), Verdict::Inconclusive);
    }

    #[test]
    fn test_aggregate_any_must_pass() {
        let outcome = |verdict| QueryOutcome {
            name: "q".to_string(),
            value: None,
            verdict,
            message: None,
        };

        assert_eq!(
            aggregate(&[outcome(Verdict::Fail), outcome(Verdict::Pass)], VerdictPolicy::AnyMustPass),
            Verdict::Pass
        );
        assert_eq!(
            aggregate(&[outcome(Verdict::Fail), outcome(Verdict::Fail)], VerdictPolicy::AnyMustPass),
            Verdict::Fail
        );
    }

    #[tokio::test]
    async fn test_engine_run_with_static_provider() {
        let provider = Arc::new(StaticMetricsProvider::new());
        provider.set_flat("error_rate", 0.01, 5);

        let engine = AnalysisEngine::new(provider, Duration::from_secs(1));
        let spec = AnalysisSpec {
            queries: vec![query(Threshold::Bounds {
                min: None,
                max: Some(0.05),
            })],
            min_samples: 3,
            window_seconds: 300,
            interval_seconds: 10,
            ..AnalysisSpec::default()
        };

        let run = engine.run(&spec).await;
        assert_eq!(run.verdict, Verdict::Pass);
        assert_eq!(run.outcomes.len(), 1);
    }

    #[tokio::test]
    async fn test_engine_missing_series_is_inconclusive() {
        let provider = Arc::new(StaticMetricsProvider::new());
        let engine = AnalysisEngine::new(provider, Duration::from_secs(1));
        let spec = AnalysisSpec {
            queries: vec![query(Threshold::Bounds {
                min: None,
                max: Some(0.05),
            })],
            min_samples: 3,
            window_seconds: 300,
            interval_seconds: 10,
            ..AnalysisSpec::default()
        };

        let run = engine.run(&spec).await;
        assert_eq!(run.verdict, Verdict::Inconclusive);
    }
}
