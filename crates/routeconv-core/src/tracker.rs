use crate::sampler::{RoutingSnapshot, RoutingStateSampler};
use crate::timer::{RepeatingTimer, TimerHandle};
use routeconv_abstract::{NodeHandle, SimConfig, SimulationContext, VirtualTime};
use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use tracing::{info, warn};

/// When routing tables are sampled relative to a window start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingOptions {
    pub first_delay: VirtualTime,
    pub period: VirtualTime,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            first_delay: 1_000,
            period: 100,
        }
    }
}

impl SamplingOptions {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            first_delay: config.first_sample_delay,
            period: config.sample_period,
        }
    }

    /// Fine-grained sampling from the first period on.
    pub fn single_shot(period: VirtualTime) -> Self {
        Self {
            first_delay: period,
            period,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvergenceResult {
    pub window: String,
    pub elapsed: Duration,
}

impl fmt::Display for ConvergenceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Network convergence time ({}): {:.3} s",
            self.window,
            self.elapsed.as_secs_f64()
        )
    }
}

#[derive(Debug)]
struct TrackingWindow {
    label: String,
    start: VirtualTime,
    samplers: Vec<RoutingStateSampler>,
    active: bool,
    timers: Vec<TimerHandle>,
}

/// Measures how long the routing tables of a set of nodes keep changing
/// after a window is opened.
///
/// Clones share the same window, so a clone captured by a scheduled callback
/// stops the tracker the caller holds.
#[derive(Debug, Clone)]
pub struct ConvergenceTracker {
    window: Rc<RefCell<TrackingWindow>>,
    options: SamplingOptions,
}

impl ConvergenceTracker {
    pub fn new(label: impl Into<String>, nodes: &[NodeHandle], options: SamplingOptions) -> Self {
        let samplers = nodes.iter().copied().map(RoutingStateSampler::new).collect();
        Self {
            window: Rc::new(RefCell::new(TrackingWindow {
                label: label.into(),
                start: 0,
                samplers,
                active: false,
                timers: Vec::new(),
            })),
            options,
        }
    }

    /// A tracker that takes its baseline immediately and samples every
    /// `period` until stopped.
    pub fn single_shot(
        ctx: &mut dyn SimulationContext,
        label: impl Into<String>,
        nodes: &[NodeHandle],
        period: VirtualTime,
    ) -> Self {
        let tracker = Self::new(label, nodes, SamplingOptions::single_shot(period));
        tracker.start(ctx);
        tracker
    }

    /// Open the window at the current time.
    ///
    /// Restarting a running tracker re-baselines every sampler; timers armed
    /// by the previous start turn into no-ops.
    pub fn start(&self, ctx: &mut dyn SimulationContext) {
        let now = ctx.now();
        let count = {
            let mut window = self.window.borrow_mut();
            if window.active {
                warn!(window = %window.label, time_ms = now, "tracker restarted while running");
            }
            for timer in window.timers.drain(..) {
                timer.stop();
            }
            window.start = now;
            window.active = true;
            for sampler in &mut window.samplers {
                sampler.reset(&*ctx);
            }
            info!(
                window = %window.label,
                time_ms = now,
                nodes = window.samplers.len(),
                "convergence window opened"
            );
            window.samplers.len()
        };

        // one timer per node
        let timer = RepeatingTimer::new(self.options.first_delay, self.options.period);
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let window = Rc::clone(&self.window);
            handles.push(timer.start(ctx, move |ctx| {
                if let Some(sampler) = window.borrow_mut().samplers.get_mut(index) {
                    sampler.tick(&*ctx);
                }
                Ok(())
            }));
        }
        self.window.borrow_mut().timers = handles;
    }

    /// Close the window. Every node is sampled once more first, so a change
    /// visible exactly at this instant is attributed to this window.
    pub fn stop(&self, ctx: &mut dyn SimulationContext) {
        let mut window = self.window.borrow_mut();
        if !window.active {
            warn!(window = %window.label, "stop on a tracker that is not running");
            return;
        }

        for sampler in &mut window.samplers {
            sampler.tick(&*ctx);
            sampler.stop();
        }
        for timer in window.timers.drain(..) {
            timer.stop();
        }
        window.active = false;

        let elapsed = convergence_of(&window);
        info!(
            window = %window.label,
            time_ms = ctx.now(),
            convergence_s = elapsed.as_secs_f64(),
            "convergence window closed"
        );
    }

    /// Latest table change across all nodes, relative to the window start.
    /// Zero when nothing changed.
    pub fn network_convergence_time(&self) -> Duration {
        convergence_of(&self.window.borrow())
    }

    pub fn result(&self) -> ConvergenceResult {
        ConvergenceResult {
            window: self.label(),
            elapsed: self.network_convergence_time(),
        }
    }

    pub fn label(&self) -> String {
        self.window.borrow().label.clone()
    }

    pub fn is_active(&self) -> bool {
        self.window.borrow().active
    }

    pub fn start_time(&self) -> VirtualTime {
        self.window.borrow().start
    }

    pub fn options(&self) -> SamplingOptions {
        self.options
    }

    pub fn snapshots(&self) -> Vec<RoutingSnapshot> {
        self.window
            .borrow()
            .samplers
            .iter()
            .map(RoutingStateSampler::snapshot)
            .collect()
    }
}

fn convergence_of(window: &TrackingWindow) -> Duration {
    let latest = window
        .samplers
        .iter()
        .map(RoutingStateSampler::last_change)
        .max()
        .unwrap_or(window.start);
    Duration::from_millis(latest.saturating_sub(window.start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedEngine;

    const A: NodeHandle = NodeHandle::new(1);
    const B: NodeHandle = NodeHandle::new(2);
    const C: NodeHandle = NodeHandle::new(3);

    fn fine() -> SamplingOptions {
        SamplingOptions {
            first_delay: 100,
            period: 100,
        }
    }

    fn engine_with_tables() -> ScriptedEngine {
        let mut engine = ScriptedEngine::new();
        for node in [A, B, C] {
            engine.set_table(node, &format!("{node} initial"));
        }
        engine
    }

    #[test]
    fn latest_change_wins() {
        let mut engine = engine_with_tables();
        engine.run_until(100_000).unwrap();

        let tracker = ConvergenceTracker::new("during", &[A, B, C], fine());
        tracker.start(&mut engine);
        engine.set_table_at(101_200, A, "a rerouted");
        engine.set_table_at(101_500, B, "b rerouted");

        engine.run_until(110_000).unwrap();
        tracker.stop(&mut engine);

        assert_eq!(tracker.network_convergence_time(), Duration::from_millis(1_500));
        assert_eq!(
            tracker.result(),
            ConvergenceResult {
                window: "during".into(),
                elapsed: Duration::from_millis(1_500),
            }
        );
    }

    #[test]
    fn no_change_is_zero() {
        let mut engine = engine_with_tables();
        let tracker = ConvergenceTracker::new("before", &[A, B], fine());
        tracker.start(&mut engine);
        engine.run_until(5_000).unwrap();
        tracker.stop(&mut engine);
        assert_eq!(tracker.network_convergence_time(), Duration::ZERO);
    }

    #[test]
    fn empty_node_set_is_zero() {
        let mut engine = ScriptedEngine::new();
        engine.run_until(700).unwrap();
        let tracker = ConvergenceTracker::new("empty", &[], fine());
        tracker.start(&mut engine);
        engine.run_until(2_000).unwrap();
        tracker.stop(&mut engine);
        assert_eq!(tracker.network_convergence_time(), Duration::ZERO);
    }

    #[test]
    fn coarse_first_sample_delays_detection() {
        let mut engine = engine_with_tables();
        let tracker = ConvergenceTracker::new("coarse", &[A], SamplingOptions::default());
        tracker.start(&mut engine);

        // changed at 0.25 s but first observed by the 1.0 s sample
        engine.set_table_at(250, A, "changed");
        engine.run_until(3_000).unwrap();
        tracker.stop(&mut engine);
        assert_eq!(tracker.network_convergence_time(), Duration::from_millis(1_000));
    }

    #[test]
    fn change_at_stop_belongs_to_window() {
        let mut engine = engine_with_tables();
        let tracker = ConvergenceTracker::new("w", &[A], fine());
        tracker.start(&mut engine);

        engine.set_table_at(1_050, A, "late");
        engine.run_until(1_050).unwrap();
        tracker.stop(&mut engine);
        assert_eq!(tracker.network_convergence_time(), Duration::from_millis(1_050));
    }

    #[test]
    fn ticks_after_stop_do_nothing() {
        let mut engine = engine_with_tables();
        let tracker = ConvergenceTracker::new("w", &[A], fine());
        tracker.start(&mut engine);
        engine.run_until(500).unwrap();
        tracker.stop(&mut engine);
        assert!(!tracker.is_active());

        engine.set_table_at(600, A, "after stop");
        engine.run_until(2_000).unwrap();
        assert_eq!(tracker.network_convergence_time(), Duration::ZERO);
        assert_eq!(engine.pending(), 0);
        assert_eq!(tracker.snapshots()[0].table, format!("{A} initial"));
    }

    #[test]
    fn restart_rebaselines() {
        let mut engine = engine_with_tables();
        let tracker = ConvergenceTracker::new("w", &[A], fine());
        tracker.start(&mut engine);
        engine.set_table_at(300, A, "first");
        engine.run_until(1_000).unwrap();

        tracker.start(&mut engine);
        assert_eq!(tracker.start_time(), 1_000);
        assert_eq!(tracker.network_convergence_time(), Duration::ZERO);

        engine.set_table_at(1_400, A, "second");
        engine.run_until(3_000).unwrap();
        tracker.stop(&mut engine);
        assert_eq!(tracker.network_convergence_time(), Duration::from_millis(400));
    }

    #[test]
    fn single_shot_samples_from_construction() {
        let mut engine = engine_with_tables();
        let tracker = ConvergenceTracker::single_shot(&mut engine, "initial", &[A, B], 100);
        assert!(tracker.is_active());
        assert_eq!(tracker.options(), SamplingOptions::single_shot(100));

        engine.set_table_at(2_340, B, "learned");
        engine.run_until(100_000).unwrap();
        tracker.stop(&mut engine);
        assert_eq!(tracker.network_convergence_time(), Duration::from_millis(2_400));
    }

    #[test]
    fn display_in_seconds() {
        let result = ConvergenceResult {
            window: "after".into(),
            elapsed: Duration::from_millis(1_500),
        };
        assert_eq!(
            result.to_string(),
            "Network convergence time (after): 1.500 s"
        );
    }
}
