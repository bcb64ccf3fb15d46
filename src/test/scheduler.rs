use super::traced_env;
use crate::sim::{
    ActivityFault, ActivityState, Context, EnvConfig, Environment, FaultPolicy, ResourceId,
    Script, SimError, SimTime, Step, StopReason, Wake, process_fn,
};
use crate::trace::TraceKind;
use std::cell::RefCell;
use std::rc::Rc;

fn granted(r: ResourceId) -> TraceKind {
    TraceKind::Granted { resource: r }
}

#[test]
fn two_units_two_activities_no_waiting() {
    let mut env = traced_env();
    let r = env.add_resource("r", 2).expect("resource");
    let a = env.spawn("a", Script::new().hold(r, SimTime(5)));
    let b = env.spawn("b", Script::new().hold(r, SimTime(5)));

    let summary = env.run(None).expect("run");
    let trace = env.trace().expect("trace");
    for id in [a, b] {
        assert_eq!(trace.first_time(id, &granted(r)), Some(0));
        assert_eq!(trace.first_time(id, &TraceKind::Finished), Some(5));
    }
    assert_eq!(env.resource(r).expect("r").stats().immediate_grants, 2);
    assert_eq!(env.resource(r).expect("r").stats().max_queue_len, 0);
    assert_eq!(summary.final_time, SimTime(5));
    assert_eq!(summary.finished, 2);
    assert_eq!(summary.stop, StopReason::Exhausted);
}

#[test]
fn single_unit_serializes_arrivals_in_fifo_order() {
    let mut env = traced_env();
    let r = env.add_resource("r", 1).expect("resource");
    let a1 = env.spawn("a1", Script::new().hold(r, SimTime(3)));
    env.spawn_at(SimTime(1), "a2", Script::new().hold(r, SimTime(3)))
        .expect("spawn_at");
    env.spawn_at(SimTime(2), "a3", Script::new().hold(r, SimTime(3)))
        .expect("spawn_at");

    let summary = env.run(None).expect("run");
    assert_eq!(summary.final_time, SimTime(9));
    assert_eq!(summary.spawned, 3);
    assert_eq!(summary.finished, 3);

    let trace = env.trace().expect("trace");
    let a2 = crate::sim::ActivityId(a1.0 + 1);
    let a3 = crate::sim::ActivityId(a1.0 + 2);
    let runs: Vec<_> = [a1, a2, a3]
        .into_iter()
        .map(|id| {
            (
                trace.first_time(id, &granted(r)).expect("granted"),
                trace.first_time(id, &TraceKind::Finished).expect("finished"),
            )
        })
        .collect();
    assert_eq!(runs, vec![(0, 3), (3, 6), (6, 9)]);
    assert_eq!(env.resource(r).expect("r").stats().total_wait, SimTime(6));
}

#[test]
fn fault_while_holding_releases_unit_and_grants_next() {
    let mut env = traced_env();
    let r = env.add_resource("r", 2).expect("resource");
    let a = env.spawn("a", Script::new().acquire(r).delay(SimTime(2)).fail("boom"));
    let b = env.spawn("b", Script::new().hold(r, SimTime(10)));
    env.spawn_at(SimTime(1), "c", Script::new().hold(r, SimTime(4)))
        .expect("spawn_at");

    let summary = env.run(None).expect("run");
    assert_eq!(
        env.state(a),
        Some(&ActivityState::Failed {
            reason: "boom".to_string()
        })
    );
    assert_eq!(env.state(b), Some(&ActivityState::Finished));
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.finished, 2);
    assert_eq!(summary.faults.len(), 1);
    assert_eq!(summary.faults[0].activity, a);
    assert_eq!(summary.faults[0].at, SimTime(2));
    assert_eq!(summary.faults[0].reason, "boom");

    let c = crate::sim::ActivityId(b.0 + 1);
    let trace = env.trace().expect("trace");
    assert_eq!(trace.first_time(c, &granted(r)), Some(2));
    assert_eq!(trace.first_time(c, &TraceKind::Finished), Some(6));
    assert_eq!(env.resource(r).expect("r").in_use(), 0);
    assert_eq!(env.scheduler().balance(a), Some((1, 1)));
}

#[test]
fn abort_policy_stops_run_on_first_fault() {
    let mut env = Environment::with_config(EnvConfig {
        fault_policy: FaultPolicy::Abort,
        trace: false,
    });
    let r = env.add_resource("r", 1).expect("resource");
    env.spawn("ok", Script::new().hold(r, SimTime(1)).delay(SimTime(50)));
    env.spawn_at(SimTime(3), "bad", Script::new().fail("broken"))
        .expect("spawn_at");

    let err = env.run(None).expect_err("aborted");
    match err {
        SimError::Aborted { at, name, fault, .. } => {
            assert_eq!(at, SimTime(3));
            assert_eq!(name, "bad");
            assert_eq!(fault.reason, "broken");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(env.now(), SimTime(3));
    assert_eq!(env.pending_events(), 1);
    assert!(env.run(None).is_err(), "aborted environment stays aborted");
}

#[test]
fn spawn_runs_until_first_suspension() {
    let mut env = Environment::new();
    let started = Rc::new(RefCell::new(false));
    let flag = Rc::clone(&started);
    let id = env.spawn(
        "p",
        process_fn(move |_ctx: &mut Context<'_>, wake: Wake| {
            *flag.borrow_mut() = true;
            match wake {
                Wake::Start => Ok(Step::Delay(SimTime(4))),
                _ => Ok(Step::Done),
            }
        }),
    );
    assert!(*started.borrow());
    assert_eq!(
        env.state(id),
        Some(&ActivityState::WaitingForTime { until: SimTime(4) })
    );
    env.run(None).expect("run");
    assert_eq!(env.state(id), Some(&ActivityState::Finished));
}

#[test]
fn queued_activity_reports_waiting_for_resource() {
    let mut env = Environment::new();
    let r = env.add_resource("r", 1).expect("resource");
    env.spawn("holder", Script::new().hold(r, SimTime(10)));
    let waiter = env.spawn("waiter", Script::new().hold(r, SimTime(1)));
    assert_eq!(
        env.state(waiter),
        Some(&ActivityState::WaitingForResource {
            resource: r,
            since: SimTime::ZERO
        })
    );
    env.run(None).expect("run");
    assert_eq!(env.state(waiter), Some(&ActivityState::Finished));
    assert_eq!(env.now(), SimTime(11));
}

#[test]
fn same_time_wakeups_resume_in_scheduling_order() {
    let mut env = traced_env();
    let ids: Vec<_> = (0..4)
        .map(|i| env.spawn(format!("p{i}"), Script::new().delay(SimTime(7))))
        .collect();
    env.run(None).expect("run");
    let finished: Vec<_> = env
        .trace()
        .expect("trace")
        .records
        .iter()
        .filter(|r| r.kind == TraceKind::Finished)
        .map(|r| r.activity)
        .collect();
    assert_eq!(finished, ids);
}

#[test]
fn releasing_an_unheld_unit_fails_only_that_activity() {
    let mut env = Environment::new();
    let r = env.add_resource("r", 1).expect("resource");
    let other = env.add_resource("other", 1).expect("resource");
    let good = env.spawn("good", Script::new().hold(other, SimTime(2)));
    let bad = env.spawn("bad", Script::new().delay(SimTime(1)).release(r));

    let summary = env.run(None).expect("run");
    assert!(matches!(env.state(bad), Some(ActivityState::Failed { .. })));
    assert_eq!(env.state(good), Some(&ActivityState::Finished));
    assert_eq!(summary.faults.len(), 1);
    assert!(summary.faults[0].reason.contains("without holding"));
    assert_eq!(env.resource(r).expect("r").in_use(), 0);
}

#[test]
fn acquiring_unknown_resource_is_a_fault() {
    let mut env = Environment::new();
    let id = env.spawn("lost", Script::new().acquire(ResourceId(42)));
    match env.state(id) {
        Some(ActivityState::Failed { reason }) => assert!(reason.contains("unknown resource")),
        other => panic!("unexpected state {other:?}"),
    }
    assert_eq!(env.faults().len(), 1);
}

#[test]
fn cancel_and_finish_return_held_units() {
    let mut env = Environment::new();
    let r = env.add_resource("r", 1).expect("resource");
    let leaky = env.spawn("leaky", Script::new().acquire(r).acquire(r));
    // a second unit of a 1-unit pool never frees up
    assert!(matches!(
        env.state(leaky),
        Some(ActivityState::WaitingForResource { .. })
    ));
    env.cancel(leaky).expect("cancel");
    assert_eq!(env.resource(r).expect("r").in_use(), 0);
    assert_eq!(env.resource(r).expect("r").queue_len(), 0);

    let keeper = env.spawn("keeper", Script::new().acquire(r).delay(SimTime(1)));
    let next = env.spawn("next", Script::new().hold(r, SimTime(1)));
    env.run(None).expect("run");
    assert_eq!(env.state(keeper), Some(&ActivityState::Finished));
    assert_eq!(env.state(next), Some(&ActivityState::Finished));
    assert_eq!(env.scheduler().balance(keeper), Some((1, 1)));
    assert_eq!(env.now(), SimTime(2));
    assert!(env.faults().is_empty());
}

#[test]
fn acquire_within_reneges_after_patience() {
    let mut env = traced_env();
    let r = env.add_resource("r", 1).expect("resource");
    env.spawn("holder", Script::new().hold(r, SimTime(10)));
    let outcome = Rc::new(RefCell::new(None));
    let seen = Rc::clone(&outcome);
    let impatient = env.spawn(
        "impatient",
        process_fn(move |ctx: &mut Context<'_>, wake: Wake| match wake {
            Wake::Start => Ok(Step::AcquireWithin {
                resource: r,
                patience: SimTime(3),
            }),
            Wake::Reneged(_) => {
                *seen.borrow_mut() = Some(ctx.now());
                Ok(Step::Done)
            }
            other => Err(ActivityFault::new(format!("unexpected {other:?}"))),
        }),
    );

    env.run(None).expect("run");
    assert_eq!(*outcome.borrow(), Some(SimTime(3)));
    assert_eq!(env.state(impatient), Some(&ActivityState::Finished));
    let trace = env.trace().expect("trace");
    assert_eq!(
        trace.first_time(impatient, &TraceKind::Reneged { resource: r }),
        Some(3)
    );
    assert_eq!(trace.first_time(impatient, &granted(r)), None);
    assert_eq!(env.resource(r).expect("r").stats().withdrawals, 1);
    assert_eq!(env.now(), SimTime(10));
}

#[test]
fn grant_before_patience_disarms_renege() {
    let mut env = traced_env();
    let r = env.add_resource("r", 1).expect("resource");
    env.spawn("holder", Script::new().hold(r, SimTime(2)));
    let patient = env.spawn(
        "patient",
        process_fn(move |ctx: &mut Context<'_>, wake: Wake| match wake {
            Wake::Start => Ok(Step::AcquireWithin {
                resource: r,
                patience: SimTime(5),
            }),
            Wake::Granted(_) => Ok(Step::Delay(SimTime(10))),
            Wake::Timeout => {
                ctx.release(r)?;
                Ok(Step::Done)
            }
            other => Err(ActivityFault::new(format!("unexpected {other:?}"))),
        }),
    );

    env.run(None).expect("run");
    let trace = env.trace().expect("trace");
    assert_eq!(trace.first_time(patient, &granted(r)), Some(2));
    assert_eq!(
        trace.first_time(patient, &TraceKind::Reneged { resource: r }),
        None
    );
    assert_eq!(trace.first_time(patient, &TraceKind::Finished), Some(12));
    assert_eq!(env.resource(r).expect("r").stats().withdrawals, 0);
}

#[test]
fn withdraw_pending_request_resumes_activity() {
    let mut env = traced_env();
    let r = env.add_resource("r", 1).expect("resource");
    let holder = env.spawn("holder", Script::new().hold(r, SimTime(10)));
    let waiter = env.spawn("waiter", Script::new().hold(r, SimTime(1)));

    let summary = env.run(Some(SimTime(1))).expect("run");
    assert_eq!(summary.stop, StopReason::HorizonReached);
    assert_eq!(summary.suspended, 2);

    assert!(!env.withdraw(holder).expect("withdraw"), "holder is not queued");
    assert!(env.withdraw(waiter).expect("withdraw"));
    assert!(!env.withdraw(waiter).expect("withdraw"), "only once");
    assert_eq!(env.resource(r).expect("r").queue_len(), 0);
    assert!(matches!(
        env.withdraw(crate::sim::ActivityId(99)),
        Err(SimError::UnknownActivity(_))
    ));

    env.run(None).expect("run");
    let trace = env.trace().expect("trace");
    assert_eq!(
        trace.first_time(waiter, &TraceKind::Withdrawn { resource: r }),
        Some(1)
    );
    assert_eq!(trace.first_time(waiter, &TraceKind::Finished), Some(1));
    assert_eq!(trace.first_time(waiter, &granted(r)), None);
    assert_eq!(env.state(holder), Some(&ActivityState::Finished));
}

#[test]
fn cancel_holder_hands_unit_to_waiter() {
    let mut env = traced_env();
    let r = env.add_resource("r", 1).expect("resource");
    let holder = env.spawn("holder", Script::new().hold(r, SimTime(100)));
    let waiter = env.spawn("waiter", Script::new().hold(r, SimTime(4)));

    env.run(Some(SimTime(1))).expect("run");
    env.cancel(holder).expect("cancel");
    assert_eq!(
        env.state(holder),
        Some(&ActivityState::Failed {
            reason: "cancelled".to_string()
        })
    );

    let summary = env.run(None).expect("run");
    let trace = env.trace().expect("trace");
    assert_eq!(trace.first_time(waiter, &granted(r)), Some(1));
    assert_eq!(trace.first_time(waiter, &TraceKind::Finished), Some(5));
    // the holder's old wake-up is still queued and is dropped as stale
    assert_eq!(summary.final_time, SimTime(100));
    let resumes = trace
        .for_activity(holder)
        .filter(|r| r.kind == TraceKind::Resumed)
        .count();
    assert_eq!(resumes, 1);
    assert!(summary.faults.is_empty());
    assert_eq!(summary.failed, 1);
    assert_eq!(env.scheduler().balance(holder), Some((1, 1)));
    // cancelling a finished activity is a no-op
    env.cancel(waiter).expect("cancel");
    assert_eq!(env.state(waiter), Some(&ActivityState::Finished));
}

#[test]
fn child_spawned_from_activity_runs_immediately() {
    let mut env = traced_env();
    let r = env.add_resource("r", 1).expect("resource");
    let parent = env.spawn(
        "parent",
        process_fn(move |ctx: &mut Context<'_>, wake: Wake| match wake {
            Wake::Start => Ok(Step::Acquire(r)),
            Wake::Granted(_) => {
                ctx.spawn("child", Script::new().hold(r, SimTime(2)));
                Ok(Step::Delay(SimTime(3)))
            }
            _ => {
                ctx.release(r)?;
                Ok(Step::Done)
            }
        }),
    );
    env.run(None).expect("run");
    let child = crate::sim::ActivityId(parent.0 + 1);
    let trace = env.trace().expect("trace");
    assert_eq!(
        trace.first_time(child, &TraceKind::Requested { resource: r }),
        Some(0)
    );
    assert_eq!(trace.first_time(child, &granted(r)), Some(3));
    assert_eq!(env.now(), SimTime(5));
}

#[test]
fn unit_granted_from_queue_is_released_normally_before_resume() {
    let mut env = traced_env();
    let r = env.add_resource("r", 1).expect("resource");
    let a = env.spawn("a", Script::new().hold(r, SimTime(3)));
    let b = env.spawn("b", Script::new().hold(r, SimTime(3)));
    let c = env.spawn("c", Script::new().hold(r, SimTime(3)));

    // a releases at 3; b gets the unit but its resume is still queued
    assert_eq!(env.step(), Some(SimTime(3)));
    assert_eq!(env.state(a), Some(&ActivityState::Finished));
    assert_eq!(env.state(b), Some(&ActivityState::Running));
    assert_eq!(env.scheduler().held(b, r), 1);
    assert_eq!(env.resource(r).expect("r").queue_len(), 1);

    assert!(!env.withdraw(b).expect("withdraw"), "already granted");
    assert_eq!(env.scheduler().held(b, r), 1);

    env.cancel(b).expect("cancel");
    assert_eq!(env.scheduler().balance(b), Some((1, 1)));

    let summary = env.run(None).expect("run");
    let trace = env.trace().expect("trace");
    assert_eq!(trace.first_time(c, &granted(r)), Some(3));
    assert_eq!(trace.first_time(c, &TraceKind::Finished), Some(6));
    assert_eq!(trace.first_time(b, &TraceKind::Finished), None);
    assert_eq!(env.resource(r).expect("r").in_use(), 0);
    assert_eq!(summary.final_time, SimTime(6));
    assert!(summary.faults.is_empty());
}
