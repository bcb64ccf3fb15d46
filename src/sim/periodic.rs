//! Periodic activity injection.
//!
//! Built only from `schedule` and `spawn`: each tick spawns one activity and
//! schedules the next tick.

use super::activity::Process;
use super::environment::Environment;
use super::error::SimError;
use super::event::Event;
use super::time::SimTime;
use tracing::debug;

/// Yields the gap before the next spawn; `None` stops the injection.
pub trait Interval: 'static {
    fn next_interval(&mut self) -> Option<SimTime>;
}

impl<F> Interval for F
where
    F: FnMut() -> Option<SimTime> + 'static,
{
    fn next_interval(&mut self) -> Option<SimTime> {
        self()
    }
}

/// Fixed spacing, forever.
pub fn every(gap: SimTime) -> impl Interval {
    move || Some(gap)
}

/// Fixed spacing, `count` spawns in total.
pub fn every_n(gap: SimTime, count: u64) -> impl Interval {
    let mut left = count;
    move || {
        if left == 0 {
            return None;
        }
        left -= 1;
        Some(gap)
    }
}

/// Builds the `n`-th periodic activity (counting from zero): its name and body.
pub type Factory = Box<dyn FnMut(u64) -> (String, Box<dyn Process>)>;

struct PeriodicSpawn {
    interval: Box<dyn Interval>,
    factory: Factory,
    n: u64,
}

impl Event for PeriodicSpawn {
    fn execute(self: Box<Self>, env: &mut Environment) {
        let mut me = *self;
        let (name, process) = (me.factory)(me.n);
        debug!(n = me.n, now = ?env.now(), name = %name, "periodic spawn");
        env.spawn_boxed(name, process);
        me.n += 1;

        if let Some(gap) = me.interval.next_interval() {
            let at = env.now().saturating_add(gap);
            env.push_event(at, Box::new(me));
        }
    }

    fn kind(&self) -> &'static str {
        "periodic_spawn"
    }
}

impl Environment {
    /// Keeps spawning activities: the first one after the first interval,
    /// then one per interval until the policy returns `None`.
    pub fn spawn_periodic<I, F>(&mut self, interval: I, factory: F) -> Result<(), SimError>
    where
        I: Interval,
        F: FnMut(u64) -> (String, Box<dyn Process>) + 'static,
    {
        let mut interval: Box<dyn Interval> = Box::new(interval);
        let Some(gap) = interval.next_interval() else {
            return Ok(());
        };
        let at = self.now().saturating_add(gap);
        self.schedule_at(
            at,
            PeriodicSpawn {
                interval,
                factory: Box::new(factory),
                n: 0,
            },
        )
    }
}
