use std::os::unix::net::UnixStream;

use corebus_protocol::Event;
use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;

use super::*;

struct WorkerEchoHandler;

impl EventHandler for WorkerEchoHandler {
    fn handle(
        &self,
        event: &Event,
        ctx: &mut EventContext<'_>,
    ) -> Result<Option<Value>, EventError> {
        ctx.send_alive("echoing");
        Ok(Some(event.data.clone()))
    }
}

fn options(idle_timeout: Duration) -> WorkerOptions {
    WorkerOptions {
        worker_id: "worker-under-test".to_string(),
        socket_path: PathBuf::from("/unused"),
        idle_timeout,
    }
}

fn pipe_pair() -> (UnixStream, UnixStream) {
    let (ours, theirs) = UnixStream::pair().unwrap();
    ours.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    (ours, theirs)
}

#[test]
fn activity_state_tracks_ticks() {
    let activity = ActivityState::default();
    assert!(!activity.is_active());
    activity.touch();
    assert!(activity.is_active());
}

#[test]
fn activity_state_counts_unexpired_execution() {
    let activity = ActivityState::default();
    activity.set_executing(Instant::now() + Duration::from_secs(60));
    assert!(activity.is_active());
    activity.clear_executing();
    assert!(!activity.is_active());
}

#[test]
fn expired_execution_is_not_activity() {
    let activity = ActivityState::default();
    activity.set_executing(Instant::now() - Duration::from_secs(1));
    assert!(!activity.is_active());
}

#[test]
fn health_loop_answers_pings() {
    let (mut pool_side, worker_side) = pipe_pair();
    let alive = Arc::new(AliveSignal::new());
    let activity = Arc::new(ActivityState::default());
    let stop = Arc::new(AtomicBool::new(false));
    let (_tx, rx) = crossbeam_channel::unbounded();

    activity.touch();
    alive.record(Some("busy".into()));

    let handle = {
        let alive = Arc::clone(&alive);
        let activity = Arc::clone(&activity);
        let stop = Arc::clone(&stop);
        thread::spawn(move || health_loop("w-test", worker_side, &alive, &activity, &stop, &rx))
    };

    send_record(&mut pool_side, &HealthRecord::Ping).unwrap();
    match recv_record::<HealthRecord>(&mut pool_side).unwrap() {
        HealthRecord::Pong { status, .. } => assert_eq!(status.as_deref(), Some("busy")),
        other => panic!("unexpected reply: {other:?}"),
    }

    // The alive record was drained; the recent tick still counts.
    send_record(&mut pool_side, &HealthRecord::Ping).unwrap();
    match recv_record::<HealthRecord>(&mut pool_side).unwrap() {
        HealthRecord::Pong { status, .. } => assert!(status.is_none()),
        other => panic!("unexpected reply: {other:?}"),
    }

    send_record(&mut pool_side, &HealthRecord::Shutdown).unwrap();
    match recv_record::<HealthRecord>(&mut pool_side).unwrap() {
        HealthRecord::ShutdownComplete { worker_id } => assert_eq!(worker_id, "w-test"),
        other => panic!("unexpected reply: {other:?}"),
    }
    handle.join().unwrap();
    assert!(stop.load(Ordering::Acquire));
}

#[test]
fn quiet_worker_reports_death_on_second_ping() {
    let (mut pool_side, worker_side) = pipe_pair();
    let alive = Arc::new(AliveSignal::new());
    // Never touched: the main loop is "wedged" from the start.
    let activity = Arc::new(ActivityState::default());
    let stop = Arc::new(AtomicBool::new(false));
    let (_tx, rx) = crossbeam_channel::unbounded();

    let handle = {
        let alive = Arc::clone(&alive);
        let activity = Arc::clone(&activity);
        let stop = Arc::clone(&stop);
        thread::spawn(move || health_loop("w-quiet", worker_side, &alive, &activity, &stop, &rx))
    };

    // First quiet ping is graceful.
    send_record(&mut pool_side, &HealthRecord::Ping).unwrap();
    assert!(matches!(
        recv_record::<HealthRecord>(&mut pool_side).unwrap(),
        HealthRecord::Pong { .. }
    ));

    // Second quiet ping: the worker declares itself dead.
    send_record(&mut pool_side, &HealthRecord::Ping).unwrap();
    match recv_record::<HealthRecord>(&mut pool_side).unwrap() {
        HealthRecord::Died { worker_id } => assert_eq!(worker_id, "w-quiet"),
        other => panic!("unexpected reply: {other:?}"),
    }
    handle.join().unwrap();
    assert!(stop.load(Ordering::Acquire));
}

#[test]
fn alive_record_resets_quiet_counter() {
    let (mut pool_side, worker_side) = pipe_pair();
    let alive = Arc::new(AliveSignal::new());
    let activity = Arc::new(ActivityState::default());
    let stop = Arc::new(AtomicBool::new(false));
    let (_tx, rx) = crossbeam_channel::unbounded();

    let handle = {
        let alive = Arc::clone(&alive);
        let activity = Arc::clone(&activity);
        let stop = Arc::clone(&stop);
        thread::spawn(move || health_loop("w-alive", worker_side, &alive, &activity, &stop, &rx))
    };

    // Quiet ping, then alive evidence, then another quiet ping: the
    // counter restarted, so the second quiet ping is graceful again.
    send_record(&mut pool_side, &HealthRecord::Ping).unwrap();
    assert!(matches!(
        recv_record::<HealthRecord>(&mut pool_side).unwrap(),
        HealthRecord::Pong { .. }
    ));

    alive.record(Some("still here".into()));
    send_record(&mut pool_side, &HealthRecord::Ping).unwrap();
    match recv_record::<HealthRecord>(&mut pool_side).unwrap() {
        HealthRecord::Pong { status, .. } => assert_eq!(status.as_deref(), Some("still here")),
        other => panic!("unexpected reply: {other:?}"),
    }

    send_record(&mut pool_side, &HealthRecord::Ping).unwrap();
    assert!(matches!(
        recv_record::<HealthRecord>(&mut pool_side).unwrap(),
        HealthRecord::Pong { .. }
    ));

    drop(pool_side);
    handle.join().unwrap();
}

#[test]
fn main_loop_registers_and_executes() {
    HandlerRegistry::global().register_with::<WorkerEchoHandler, _>("worker_unit_echo", || {
        WorkerEchoHandler
    });

    let (mut pool_side, worker_side) = pipe_pair();
    let alive = Arc::new(AliveSignal::new());
    let activity = Arc::new(ActivityState::default());
    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = crossbeam_channel::unbounded();

    let opts = options(Duration::from_secs(60));
    let handle = {
        let alive = Arc::clone(&alive);
        let activity = Arc::clone(&activity);
        let stop = Arc::clone(&stop);
        thread::spawn(move || main_loop(&opts, worker_side, &alive, &activity, &stop, &tx))
    };

    // Registration round trip.
    let locator = HandlerRegistry::global().locator("worker_unit_echo").unwrap();
    send_record(&mut pool_side, &TaskRecord::Register { locator }).unwrap();
    match recv_record::<TaskRecord>(&mut pool_side).unwrap() {
        TaskRecord::Result { success, data, .. } => {
            assert!(success);
            assert_eq!(data, Some(json!("registered")));
        }
        other => panic!("unexpected record: {other:?}"),
    }

    // Execution round trip; the handler records alive evidence.
    let event = Event::new("worker_unit_echo", json!({"n": 1}));
    let event_id = event.event_id.clone();
    send_record(&mut pool_side, &TaskRecord::Task { event }).unwrap();
    match recv_record::<TaskRecord>(&mut pool_side).unwrap() {
        TaskRecord::Result {
            event_id: id,
            success,
            data,
            ..
        } => {
            assert_eq!(id, event_id);
            assert!(success);
            assert_eq!(data, Some(json!({"n": 1})));
        }
        other => panic!("unexpected record: {other:?}"),
    }
    assert!(alive.take().is_some());

    // Unknown type fails with no_handler.
    let event = Event::new("worker_unit_unknown", Value::Null);
    send_record(&mut pool_side, &TaskRecord::Task { event }).unwrap();
    match recv_record::<TaskRecord>(&mut pool_side).unwrap() {
        TaskRecord::Result { success, error, .. } => {
            assert!(!success);
            assert_eq!(error.unwrap().kind(), "no_handler");
        }
        other => panic!("unexpected record: {other:?}"),
    }

    // Graceful stop: ack on the task pipe, directive for the health side.
    send_record(&mut pool_side, &TaskRecord::Shutdown).unwrap();
    assert!(matches!(
        recv_record::<TaskRecord>(&mut pool_side).unwrap(),
        TaskRecord::ShutdownAck
    ));
    let stats = handle.join().unwrap().unwrap();
    assert_eq!(stats.events_processed, 1);
    assert_eq!(stats.errors_count, 1);
    assert_eq!(stats.handlers_loaded, 1);
    assert!(matches!(
        rx.try_recv(),
        Ok(HealthDirective::AnnounceShutdownComplete)
    ));
}

#[test]
fn main_loop_idle_timeout_announces_death() {
    let (pool_side, worker_side) = pipe_pair();
    let alive = Arc::new(AliveSignal::new());
    let activity = Arc::new(ActivityState::default());
    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = crossbeam_channel::unbounded();

    let opts = options(Duration::from_millis(200));
    let handle = {
        let alive = Arc::clone(&alive);
        let activity = Arc::clone(&activity);
        let stop = Arc::clone(&stop);
        thread::spawn(move || main_loop(&opts, worker_side, &alive, &activity, &stop, &tx))
    };

    handle.join().unwrap().unwrap();
    assert!(matches!(rx.try_recv(), Ok(HealthDirective::AnnounceDied)));
    drop(pool_side);
}
