//! Prometheus metrics for reconciliation cycles

use crate::error::{Error, Result};
use crate::matching::materializer::LinkOutcome;
use crate::reconciler::CycleReport;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Counters updated once per cycle
#[derive(Clone)]
pub struct DiskMakerMetrics {
    cycles_total: IntCounter,
    cycles_aborted_total: IntCounter,
    assignments: IntGauge,
    link_outcomes_total: IntCounterVec,
}

impl DiskMakerMetrics {
    /// Create the metrics and register them on `registry`
    pub fn register(registry: &Registry) -> Result<Self> {
        let metrics = Self {
            cycles_total: IntCounter::new(
                "diskmaker_cycles_total",
                "Total number of reconciliation cycles",
            )
            .map_err(metrics_error)?,
            cycles_aborted_total: IntCounter::new(
                "diskmaker_cycles_aborted_total",
                "Cycles aborted before matching",
            )
            .map_err(metrics_error)?,
            assignments: IntGauge::new(
                "diskmaker_assignments",
                "Assignments produced by the last cycle",
            )
            .map_err(metrics_error)?,
            link_outcomes_total: IntCounterVec::new(
                Opts::new(
                    "diskmaker_link_outcomes_total",
                    "Materialization outcomes by kind",
                ),
                &["outcome"],
            )
            .map_err(metrics_error)?,
        };

        registry
            .register(Box::new(metrics.cycles_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(metrics.cycles_aborted_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(metrics.assignments.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(metrics.link_outcomes_total.clone()))
            .map_err(metrics_error)?;

        Ok(metrics)
    }

    /// Record the result of one cycle
    pub fn observe(&self, report: &CycleReport) {
        self.cycles_total.inc();
        if report.aborted {
            self.cycles_aborted_total.inc();
        }
        self.assignments.set(report.assignments as i64);
        for link in &report.links {
            let outcome = link.outcome.to_string();
            self.link_outcomes_total
                .with_label_values(&[outcome.as_str()])
                .inc();
        }
    }

    pub fn outcome_count(&self, outcome: LinkOutcome) -> u64 {
        let outcome = outcome.to_string();
        self.link_outcomes_total
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles_total.get()
    }

    pub fn aborted_cycles(&self) -> u64 {
        self.cycles_aborted_total.get()
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registration failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::materializer::MaterializedLink;
    use std::path::PathBuf;

    fn link(outcome: LinkOutcome) -> MaterializedLink {
        MaterializedLink {
            storage_class: "ssd".into(),
            path: PathBuf::from("/mnt/local-storage/ssd/sdb"),
            outcome,
        }
    }

    #[test]
    fn test_observe_cycles() {
        let registry = Registry::new();
        let metrics = DiskMakerMetrics::register(&registry).unwrap();

        metrics.observe(&CycleReport {
            aborted: false,
            assignments: 2,
            links: vec![link(LinkOutcome::Created), link(LinkOutcome::AlreadyPresent)],
        });
        metrics.observe(&CycleReport::aborted());

        assert_eq!(metrics.cycles(), 2);
        assert_eq!(metrics.aborted_cycles(), 1);
        assert_eq!(metrics.outcome_count(LinkOutcome::Created), 1);
        assert_eq!(metrics.outcome_count(LinkOutcome::AlreadyPresent), 1);
        assert_eq!(metrics.outcome_count(LinkOutcome::Failed), 0);

        let names: Vec<String> = registry.gather().iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains(&"diskmaker_cycles_total".to_string()));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        DiskMakerMetrics::register(&registry).unwrap();
        assert!(DiskMakerMetrics::register(&registry).is_err());
    }
}
