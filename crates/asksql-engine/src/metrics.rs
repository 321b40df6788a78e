//! Prometheus metrics for the question pipeline

use crate::pipeline::Stage;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Duration;

#[derive(Clone)]
pub struct PipelineMetrics {
    questions: IntCounterVec,
    stage_duration: HistogramVec,
}

impl PipelineMetrics {
    /// Create the collectors and register them with `registry`
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let questions = IntCounterVec::new(
            Opts::new(
                "asksql_questions_total",
                "Questions answered, by outcome (success or the failing stage)",
            ),
            &["outcome"],
        )?;
        let stage_duration = HistogramVec::new(
            HistogramOpts::new(
                "asksql_stage_duration_seconds",
                "Time spent in each pipeline stage",
            )
            .buckets(vec![0.005, 0.05, 0.25, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["stage"],
        )?;

        registry.register(Box::new(questions.clone()))?;
        registry.register(Box::new(stage_duration.clone()))?;

        Ok(Self {
            questions,
            stage_duration,
        })
    }

    pub(crate) fn observe_stage(&self, stage: Stage, elapsed: Duration) {
        self.stage_duration
            .with_label_values(&[stage.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    pub(crate) fn record_outcome(&self, outcome: &str) {
        self.questions.with_label_values(&[outcome]).inc();
    }

    pub fn questions_total(&self, outcome: &str) -> u64 {
        self.questions.with_label_values(&[outcome]).get()
    }

    /// Number of timings recorded for `stage`
    pub fn stage_observations(&self, stage: Stage) -> u64 {
        self.stage_duration
            .with_label_values(&[stage.as_str()])
            .get_sample_count()
    }
}
