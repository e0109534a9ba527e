use crate::error::CoreError;
use crate::flow_stats::{FlowFilter, FlowStatsAggregator, StatsReport};
use crate::link_control::LinkController;
use crate::registry::LinkRegistry;
use crate::tracker::{ConvergenceResult, ConvergenceTracker, SamplingOptions};
use anyhow::Context;
use routeconv_abstract::{NodeHandle, SimulationContext, VirtualTime};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info};

/// Flows covered by a stats report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportScope {
    AllFlows,
    /// Flows from the first node's primary address to the second's.
    Between(NodeHandle, NodeHandle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultAction {
    LinkDown { a: NodeHandle, b: NodeHandle },
    LinkUp { a: NodeHandle, b: NodeHandle },
    TrackerStart { window: String },
    TrackerStop { window: String },
    StatsReport { scope: ReportScope },
}

#[derive(Debug)]
struct WindowSpec {
    tracker: ConvergenceTracker,
    single_shot: bool,
}

/// A timeline of fault and measurement actions.
///
/// Nothing runs until [`submit`](Self::submit) hands the timeline to the
/// engine's scheduler. The run is taken to end at the aggregator's
/// simulation duration.
#[derive(Debug)]
pub struct FaultScenario {
    controller: LinkController,
    aggregator: FlowStatsAggregator,
    end: VirtualTime,
    windows: Vec<WindowSpec>,
    timeline: Vec<(VirtualTime, FaultAction)>,
}

impl FaultScenario {
    pub fn new(registry: LinkRegistry, aggregator: FlowStatsAggregator) -> Self {
        let end = u64::try_from(aggregator.simulation_duration().as_millis()).unwrap_or(u64::MAX);
        Self {
            controller: LinkController::new(Rc::new(registry)),
            aggregator,
            end,
            windows: Vec::new(),
            timeline: Vec::new(),
        }
    }

    pub fn registry(&self) -> &LinkRegistry {
        self.controller.registry()
    }

    pub fn add_window(
        &mut self,
        label: &str,
        nodes: &[NodeHandle],
        options: SamplingOptions,
    ) -> Result<(), CoreError> {
        self.push_window(ConvergenceTracker::new(label, nodes, options), false)
    }

    /// A window that is opened when the scenario is submitted and closed at
    /// `stop_at`.
    pub fn add_single_shot_window(
        &mut self,
        label: &str,
        nodes: &[NodeHandle],
        period: VirtualTime,
        stop_at: VirtualTime,
    ) -> Result<(), CoreError> {
        let tracker =
            ConvergenceTracker::new(label, nodes, SamplingOptions::single_shot(period));
        self.push_window(tracker, true)?;
        self.at(
            stop_at,
            FaultAction::TrackerStop {
                window: label.to_string(),
            },
        );
        Ok(())
    }

    fn push_window(
        &mut self,
        tracker: ConvergenceTracker,
        single_shot: bool,
    ) -> Result<(), CoreError> {
        let label = tracker.label();
        if self.windows.iter().any(|w| w.tracker.label() == label) {
            return Err(CoreError::DuplicateWindow(label));
        }
        self.windows.push(WindowSpec {
            tracker,
            single_shot,
        });
        Ok(())
    }

    pub fn at(&mut self, time: VirtualTime, action: FaultAction) -> &mut Self {
        self.timeline.push((time, action));
        self
    }

    /// Take the link down at `down` and bring it back at `up`.
    pub fn link_failure(
        &mut self,
        a: NodeHandle,
        b: NodeHandle,
        down: VirtualTime,
        up: VirtualTime,
    ) -> &mut Self {
        self.at(down, FaultAction::LinkDown { a, b })
            .at(up, FaultAction::LinkUp { a, b })
    }

    pub fn window_between(
        &mut self,
        label: &str,
        start: VirtualTime,
        stop: VirtualTime,
    ) -> &mut Self {
        self.at(
            start,
            FaultAction::TrackerStart {
                window: label.to_string(),
            },
        )
        .at(
            stop,
            FaultAction::TrackerStop {
                window: label.to_string(),
            },
        )
    }

    pub fn timeline(&self) -> &[(VirtualTime, FaultAction)] {
        &self.timeline
    }

    pub fn end(&self) -> VirtualTime {
        self.end
    }

    pub fn window_labels(&self) -> Vec<String> {
        self.windows.iter().map(|w| w.tracker.label()).collect()
    }

    fn tracker(&self, window: &str) -> Result<ConvergenceTracker, CoreError> {
        self.windows
            .iter()
            .find(|w| w.tracker.label() == window)
            .map(|w| w.tracker.clone())
            .ok_or_else(|| CoreError::UnknownWindow(window.to_string()))
    }

    /// Validate the timeline and queue every action.
    ///
    /// Action times and window references are checked here; link references
    /// are only checked when the action fires. Actions sharing a time run in
    /// the order they were added.
    pub fn submit(self, ctx: &mut dyn SimulationContext) -> Result<ScenarioHandle, CoreError> {
        let mut resolved = Vec::with_capacity(self.timeline.len());
        for (time, action) in &self.timeline {
            if *time > self.end {
                return Err(CoreError::ActionAfterEnd {
                    time: *time,
                    end: self.end,
                });
            }
            let tracker = match action {
                FaultAction::TrackerStart { window } | FaultAction::TrackerStop { window } => {
                    Some(self.tracker(window)?)
                }
                _ => None,
            };
            resolved.push((*time, action.clone(), tracker));
        }

        for spec in self.windows.iter().filter(|w| !w.single_shot) {
            let label = spec.tracker.label();
            let started = self.timeline.iter().any(|(_, action)| {
                matches!(action, FaultAction::TrackerStart { window } if *window == label)
            });
            if !started {
                return Err(CoreError::WindowNeverStarted(label));
            }
        }

        for window in self.windows.iter().filter(|w| w.single_shot) {
            window.tracker.start(ctx);
        }

        let reports: Rc<RefCell<Vec<StatsReport>>> = Rc::default();
        for (time, action, tracker) in resolved {
            debug!(time_ms = time, ?action, "scheduling fault action");
            let controller = self.controller.clone();
            let aggregator = self.aggregator;
            let reports = Rc::clone(&reports);

            ctx.schedule(
                time,
                Box::new(move |ctx: &mut dyn SimulationContext| match action {
                    FaultAction::LinkDown { a, b } => {
                        controller.tear_down(ctx, a, b)?;
                        Ok(())
                    }
                    FaultAction::LinkUp { a, b } => {
                        controller.bring_up(ctx, a, b)?;
                        Ok(())
                    }
                    FaultAction::TrackerStart { .. } => {
                        if let Some(tracker) = tracker {
                            tracker.start(ctx);
                        }
                        Ok(())
                    }
                    FaultAction::TrackerStop { .. } => {
                        if let Some(tracker) = tracker {
                            tracker.stop(ctx);
                        }
                        Ok(())
                    }
                    FaultAction::StatsReport { scope } => {
                        let filter = resolve_scope(&*ctx, scope)
                            .context("Failed to resolve stats report endpoints")?;
                        let report = aggregator.report(ctx, filter);
                        info!(
                            time_ms = report.time_ms,
                            %filter,
                            flows = report.aggregate.flow_count,
                            loss_ratio = report.aggregate.metrics.loss_ratio,
                            "flow statistics collected"
                        );
                        reports.borrow_mut().push(report);
                        Ok(())
                    }
                }),
            );
        }

        Ok(ScenarioHandle {
            trackers: self.windows.into_iter().map(|w| w.tracker).collect(),
            reports,
        })
    }
}

fn resolve_scope(ctx: &dyn SimulationContext, scope: ReportScope) -> Result<FlowFilter, CoreError> {
    match scope {
        ReportScope::AllFlows => Ok(FlowFilter::All),
        ReportScope::Between(source, destination) => Ok(FlowFilter::Pair {
            source: ctx
                .node_address(source)
                .ok_or(CoreError::MissingAddress { node: source })?,
            destination: ctx
                .node_address(destination)
                .ok_or(CoreError::MissingAddress { node: destination })?,
        }),
    }
}

/// Access to the measurements of a submitted scenario.
#[derive(Debug, Clone)]
pub struct ScenarioHandle {
    trackers: Vec<ConvergenceTracker>,
    reports: Rc<RefCell<Vec<StatsReport>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub convergence: Vec<ConvergenceResult>,
    pub reports: Vec<StatsReport>,
}

impl ScenarioHandle {
    /// One result per window, in declaration order.
    pub fn convergence_results(&self) -> Vec<ConvergenceResult> {
        self.trackers.iter().map(ConvergenceTracker::result).collect()
    }

    pub fn reports(&self) -> Vec<StatsReport> {
        self.reports.borrow().clone()
    }

    pub fn tracker(&self, window: &str) -> Option<&ConvergenceTracker> {
        self.trackers.iter().find(|t| t.label() == window)
    }

    pub fn into_outcome(self) -> ScenarioOutcome {
        ScenarioOutcome {
            convergence: self.convergence_results(),
            reports: self.reports(),
        }
    }
}
