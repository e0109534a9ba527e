use routeconv_abstract::{SimulationContext, VirtualTime};
use std::cell::Cell;
use std::rc::Rc;

type Task = Box<dyn FnMut(&mut dyn SimulationContext) -> anyhow::Result<()>>;

/// A periodic task driven by the engine's scheduler.
///
/// Only one firing is queued at a time; each firing re-arms the next one.
/// Stopping does not remove the queued firing from the scheduler, it turns it
/// into a no-op that does not re-arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatingTimer {
    first_delay: VirtualTime,
    period: VirtualTime,
}

/// Shared stop flag of a started [`RepeatingTimer`].
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    stopped: Rc<Cell<bool>>,
    firings: Rc<Cell<u64>>,
}

impl TimerHandle {
    pub fn stop(&self) {
        self.stopped.set(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.get()
    }

    /// How many times the task actually ran.
    pub fn firings(&self) -> u64 {
        self.firings.get()
    }
}

impl RepeatingTimer {
    /// `period` is clamped to one millisecond so a timer can never re-arm at
    /// the instant it fired.
    pub fn new(first_delay: VirtualTime, period: VirtualTime) -> Self {
        Self {
            first_delay,
            period: period.max(1),
        }
    }

    pub fn period(&self) -> VirtualTime {
        self.period
    }

    pub fn first_delay(&self) -> VirtualTime {
        self.first_delay
    }

    /// Arm the timer relative to the current virtual time.
    pub fn start<F>(self, ctx: &mut dyn SimulationContext, task: F) -> TimerHandle
    where
        F: FnMut(&mut dyn SimulationContext) -> anyhow::Result<()> + 'static,
    {
        let handle = TimerHandle::default();
        let first = ctx.now().saturating_add(self.first_delay);
        arm(ctx, first, self.period, handle.clone(), Box::new(task));
        handle
    }
}

fn arm(
    ctx: &mut dyn SimulationContext,
    at: VirtualTime,
    period: VirtualTime,
    handle: TimerHandle,
    mut task: Task,
) {
    ctx.schedule(
        at,
        Box::new(move |ctx: &mut dyn SimulationContext| {
            if handle.is_stopped() {
                return Ok(());
            }
            handle.firings.set(handle.firings.get() + 1);
            task(ctx)?;
            if !handle.is_stopped() {
                let next = ctx.now().saturating_add(period);
                arm(ctx, next, period, handle, task);
            }
            Ok(())
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedEngine;
    use std::cell::RefCell;

    #[test]
    fn fires_on_period() {
        let mut engine = ScriptedEngine::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let record = Rc::clone(&seen);

        let handle = RepeatingTimer::new(1_000, 100).start(&mut engine, move |ctx| {
            record.borrow_mut().push(ctx.now());
            Ok(())
        });

        engine.run_until(1_300).unwrap();
        assert_eq!(*seen.borrow(), vec![1_000, 1_100, 1_200, 1_300]);
        assert_eq!(handle.firings(), 4);
    }

    #[test]
    fn stopped_firing_is_a_no_op() {
        let mut engine = ScriptedEngine::new();
        let handle = RepeatingTimer::new(100, 100).start(&mut engine, |_| Ok(()));

        engine.run_until(250).unwrap();
        assert_eq!(handle.firings(), 2);

        handle.stop();
        // the firing at 300 is still queued
        assert_eq!(engine.pending(), 1);
        engine.run_until(1_000).unwrap();
        assert_eq!(handle.firings(), 2);
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn task_can_stop_itself() {
        let mut engine = ScriptedEngine::new();
        let slot: Rc<RefCell<Option<TimerHandle>>> = Rc::default();
        let inner = Rc::clone(&slot);

        let handle = RepeatingTimer::new(0, 10).start(&mut engine, move |ctx| {
            if ctx.now() >= 30 {
                if let Some(handle) = inner.borrow().as_ref() {
                    handle.stop();
                }
            }
            Ok(())
        });
        *slot.borrow_mut() = Some(handle.clone());

        engine.run_until(100).unwrap();
        assert_eq!(handle.firings(), 4);
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn huge_period_parks_at_the_end_of_time() {
        let mut engine = ScriptedEngine::new();
        let handle = RepeatingTimer::new(100, u64::MAX).start(&mut engine, |_| Ok(()));
        engine.run_until(10_000).unwrap();
        assert_eq!(handle.firings(), 1);
        assert_eq!(engine.pending(), 1);

        let late = RepeatingTimer::new(u64::MAX, 100).start(&mut engine, |_| Ok(()));
        engine.run_until(20_000).unwrap();
        assert_eq!(late.firings(), 0);
    }

    #[test]
    fn zero_period_is_clamped() {
        assert_eq!(RepeatingTimer::new(0, 0).period(), 1);
    }

    #[test]
    fn task_error_aborts() {
        let mut engine = ScriptedEngine::new();
        RepeatingTimer::new(5, 5).start(&mut engine, |_| anyhow::bail!("boom"));
        assert!(engine.run_until(10).is_err());
    }
}
