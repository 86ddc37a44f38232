//! Reconciler - one discovery, match and materialize pass
//!
//! The daemon calls [`DiskMaker::reconcile`] once per tick. Nothing is
//! cached between calls: the inventory is rebuilt from the host and the
//! symlinks on disk are the only state that survives a cycle.
//!
//! Calls must not overlap. Existence checks followed by creation are only
//! safe with a single cycle in flight.

use crate::config::{DiskConfig, DiskMakerConfig};
use crate::discovery::enumerator::DeviceEnumerator;
use crate::domain::ports::EventReporterRef;
use crate::error::{Error, ErrorAction, Result};
use crate::matching::materializer::{LinkOutcome, MaterializedLink, SymlinkMaterializer};
use crate::matching::matcher::SelectionMatcher;
use crate::metrics::DiskMakerMetrics;
use crate::reporter::EventContext;
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use tracing::{debug, info};

// =============================================================================
// Cycle Report
// =============================================================================

/// Summary of one cycle, for logs and metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Host discovery failed and nothing was matched
    pub aborted: bool,
    /// Assignments produced by the matcher across all classes
    pub assignments: usize,
    /// Materialization outcome of each assignment
    pub links: Vec<MaterializedLink>,
}

impl CycleReport {
    pub fn aborted() -> Self {
        Self {
            aborted: true,
            ..Default::default()
        }
    }

    /// Number of assignments that ended in `outcome`
    pub fn count(&self, outcome: LinkOutcome) -> usize {
        self.links.iter().filter(|l| l.outcome == outcome).count()
    }
}

// =============================================================================
// DiskMaker
// =============================================================================

/// Reconciles the declared selection against the host's devices
pub struct DiskMaker {
    config: DiskMakerConfig,
    enumerator: DeviceEnumerator,
    reporter: EventReporterRef,
    metrics: Option<DiskMakerMetrics>,
}

impl DiskMaker {
    /// Diskmaker reading devices from the running host
    pub fn new(config: DiskMakerConfig, reporter: EventReporterRef) -> Self {
        let enumerator = DeviceEnumerator::for_host(&config);
        Self::with_enumerator(config, enumerator, reporter)
    }

    pub fn with_enumerator(
        config: DiskMakerConfig,
        enumerator: DeviceEnumerator,
        reporter: EventReporterRef,
    ) -> Self {
        Self {
            config,
            enumerator,
            reporter,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: DiskMakerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &DiskMakerConfig {
        &self.config
    }

    /// Create the symlink root. Startup precondition, fatal when it fails.
    pub fn ensure_symlink_root(&self) -> Result<()> {
        let root = &self.config.symlink_root;
        DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(root)
            .map_err(|e| {
                Error::Configuration(format!(
                    "error creating local-storage directory {}: {}",
                    root.display(),
                    e
                ))
            })
    }

    /// Run one full cycle against `disk_config`.
    ///
    /// Outcomes are delivered as events to the configured reporter; the
    /// returned report only summarizes them.
    pub fn reconcile(&self, disk_config: &DiskConfig) -> CycleReport {
        let report = self.run_cycle(disk_config);
        if let Some(metrics) = &self.metrics {
            metrics.observe(&report);
        }
        report
    }

    fn run_cycle(&self, disk_config: &DiskConfig) -> CycleReport {
        let owner = disk_config.owner();
        let events = EventContext::new(self.reporter.as_ref(), &owner);
        debug!("Starting cycle for {}", owner.key());

        match self.try_cycle(disk_config, events) {
            Ok(report) => report,
            Err(e) => {
                events.emit_error(&e, None);
                match e.action() {
                    ErrorAction::AbortCycle => CycleReport::aborted(),
                    ErrorAction::SkipMaterialization | ErrorAction::SkipEntry => {
                        CycleReport::default()
                    }
                }
            }
        }
    }

    fn try_cycle(&self, disk_config: &DiskConfig, events: EventContext<'_>) -> Result<CycleReport> {
        let inventory = self.enumerator.inventory()?;

        let matcher = SelectionMatcher::new(&self.config.rootfs_dir, events);
        let assignments = matcher.match_all(disk_config, &inventory);
        let total: usize = assignments.values().map(Vec::len).sum();
        if total == 0 {
            return Err(Error::NoMatchingDevices);
        }

        let materializer = SymlinkMaterializer::new(&self.config.symlink_root, events);
        let links = materializer.materialize(&assignments);

        let report = CycleReport {
            aborted: false,
            assignments: total,
            links,
        };
        info!(
            "Cycle complete: {} assignments, {} created, {} already present, {} failed",
            report.assignments,
            report.count(LinkOutcome::Created),
            report.count(LinkOutcome::AlreadyPresent),
            report.count(LinkOutcome::Failed)
        );
        Ok(report)
    }
}
