// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use relayd::bus::{MessageBus, Outcome, Topic};
use relayd::lifecycle::{Coordinator, LifecycleState, RelayExit};
use relayd::work_queue::pool::WorkerPool;
use relayd::work_queue::queue::RequestQueue;
use relayd::work_queue::request::Request;
use relayd_tests::doubles::{
    DeliveryError, EchoBackend, FakeConnector, GatedBackend, LinkEvent, ManualShutdown,
    RecordingBus,
};

const SHORT: Duration = Duration::from_millis(200);
const LONG: Duration = Duration::from_secs(10);

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + LONG;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn as_bus(bus: &Arc<RecordingBus>) -> Arc<dyn MessageBus> {
    bus.clone()
}

#[test]
fn fifth_request_waits_for_a_worker_then_all_complete() {
    let bus = RecordingBus::new();
    let backend = EchoBackend::new();
    let queue = RequestQueue::for_workers(2);
    assert_eq!(queue.capacity(), 4);

    let (done_tx, done_rx) = mpsc::channel();
    let producer_queue = queue.clone();
    let producer_bus = as_bus(&bus);
    let producer_backend = backend.clone();
    let producer = thread::spawn(move || {
        for payload in ["a", "b", "c", "d", "e"] {
            let request = Request::new(
                Topic::Command,
                payload.as_bytes().to_vec(),
                producer_bus.clone(),
                Some(producer_backend.clone()),
            );
            producer_queue.enqueue(request).unwrap();
            done_tx.send(payload).unwrap();
        }
    });

    for expected in ["a", "b", "c", "d"] {
        assert_eq!(done_rx.recv_timeout(LONG).unwrap(), expected);
    }
    assert!(done_rx.recv_timeout(SHORT).is_err(), "5th enqueue must block");
    assert_eq!(queue.len(), 4);

    let pool = WorkerPool::start(&queue, 1);
    assert_eq!(done_rx.recv_timeout(LONG).unwrap(), "e");
    producer.join().unwrap();

    assert_eq!(bus.wait_for_count(5, LONG).len(), 5);
    assert_eq!(bus.completed_payloads(), ["a", "b", "c", "d", "e"]);
    assert_eq!(backend.sessions(), 5);

    queue.stop();
    pool.wait_until_finished();
    assert_eq!(bus.count(), 5);
}

#[test]
fn interrupt_drains_in_flight_and_queued_requests() {
    let (backend, gate) = GatedBackend::new();
    let connector = FakeConnector::new();
    let bus = RecordingBus::new();
    let (mut shutdown, trigger) = ManualShutdown::new();

    let coordinator = Coordinator::new("relay-e2e", 2, Some(backend));
    let lifecycle = coordinator.lifecycle();
    let relay_connector = connector.clone();
    let relay = thread::spawn(move || coordinator.run(&relay_connector, &mut shutdown));

    assert_eq!(
        lifecycle.wait_for_timeout(LifecycleState::Ready, LONG),
        Some(LifecycleState::Ready)
    );

    for payload in ["p1", "p2"] {
        connector.deliver(as_bus(&bus), Topic::Command, payload.as_bytes()).unwrap();
    }
    assert_eq!(gate.wait_started(2, LONG), 2);
    for payload in ["q1", "q2", "q3"] {
        connector.deliver(as_bus(&bus), Topic::Execution, payload.as_bytes()).unwrap();
    }

    trigger.fire();
    assert!(wait_until(|| connector.is_halted()), "bus link was not halted");

    assert_eq!(
        connector.deliver(as_bus(&bus), Topic::Command, b"late"),
        Err(DeliveryError::LinkDown)
    );
    assert_eq!(lifecycle.current(), LifecycleState::Draining);
    assert_eq!(lifecycle.wait_for_timeout(LifecycleState::Terminated, SHORT), None);
    assert_eq!(bus.count(), 0);
    assert_eq!(gate.started().len(), 2);

    gate.open();
    assert_eq!(relay.join().unwrap(), RelayExit::Clean);
    assert_eq!(lifecycle.current(), LifecycleState::Terminated);

    assert_eq!(bus.completed_payloads(), ["p1", "p2", "q1", "q2", "q3"]);
    let execution_replies = bus
        .replies()
        .iter()
        .filter(|(topic, _)| *topic == Topic::Execution)
        .count();
    assert_eq!(execution_replies, 3);
}

#[test]
fn queue_is_still_open_when_the_bus_halts() {
    let connector = FakeConnector::sending_on_halt();
    let mut coordinator = Coordinator::new("relay-order", 1, Some(EchoBackend::new()));
    coordinator.start(&connector).unwrap();
    coordinator.drain();

    assert_eq!(
        connector.events(),
        [
            LinkEvent::Connected,
            LinkEvent::Running,
            LinkEvent::Halted {
                accepted_at_halt: Some(true)
            }
        ]
    );
    // accepted at halt time, so it was processed before the barrier released
    assert_eq!(connector.halt_bus().completed_payloads(), ["at-halt"]);
}

#[test]
fn concurrent_deliveries_are_either_processed_or_refused_by_the_link() {
    let connector = FakeConnector::new();
    let bus = RecordingBus::new();
    let mut coordinator = Coordinator::new("relay-race", 2, Some(EchoBackend::new()));
    coordinator.start(&connector).unwrap();

    let sender = connector.clone();
    let sender_bus = as_bus(&bus);
    let flood = thread::spawn(move || {
        let mut accepted = 0;
        for i in 0.. {
            match sender.deliver(sender_bus.clone(), Topic::Command, i.to_string().as_bytes()) {
                Ok(()) => accepted += 1,
                Err(e) => return (accepted, e),
            }
        }
        unreachable!()
    });

    thread::sleep(Duration::from_millis(50));
    coordinator.drain();
    let (accepted, stopped_by) = flood.join().unwrap();

    // the link goes down first, so the queue never gets to refuse anything
    assert_eq!(stopped_by, DeliveryError::LinkDown);
    assert_eq!(bus.count(), accepted);
}

#[test]
fn failed_session_acquisition_does_not_leak_a_worker() {
    let connector = FakeConnector::new();
    let bus = RecordingBus::new();
    let mut coordinator = Coordinator::new("relay-acquire", 1, Some(EchoBackend::failing_acquires(1)));
    coordinator.start(&connector).unwrap();

    connector.deliver(as_bus(&bus), Topic::Command, b"x").unwrap();
    connector.deliver(as_bus(&bus), Topic::Command, b"y").unwrap();

    let replies = bus.wait_for_count(2, LONG);
    assert_eq!(replies.len(), 2);
    assert!(matches!(replies[0].1, Outcome::BackendUnavailable(_)));
    assert!(matches!(&replies[1].1, Outcome::Completed(output) if output.stdout == b"y"));

    coordinator.drain();
    assert_eq!(bus.count(), 2);
}

#[test]
fn failing_payloads_become_failure_replies() {
    let connector = FakeConnector::new();
    let bus = RecordingBus::new();
    let mut coordinator = Coordinator::new("relay-fail", 1, Some(EchoBackend::new()));
    coordinator.start(&connector).unwrap();

    for payload in [&b"fail"[..], b"panic", b"fine"] {
        connector.deliver(as_bus(&bus), Topic::Command, payload).unwrap();
    }
    coordinator.drain();

    let replies = bus.replies();
    assert_eq!(replies.len(), 3);
    assert!(matches!(replies[0].1, Outcome::Failed(_)));
    assert!(matches!(replies[1].1, Outcome::Failed(_)));
    assert_eq!(bus.completed_payloads(), ["fine"]);
}

#[test]
fn disabled_backend_answers_every_request() {
    let connector = FakeConnector::new();
    let bus = RecordingBus::new();
    let mut coordinator = Coordinator::new("relay-off", 2, None);
    coordinator.start(&connector).unwrap();

    connector.deliver(as_bus(&bus), Topic::Command, b"anything").unwrap();
    coordinator.drain();

    let replies = bus.replies();
    assert_eq!(replies.len(), 1);
    assert!(matches!(replies[0].1, Outcome::BackendUnavailable(_)));
}

#[test]
fn startup_failures_map_to_exit_statuses() {
    let (mut shutdown, _trigger) = ManualShutdown::new();

    let untouched = FakeConnector::new();
    let exit = Coordinator::new("r", 1, Some(EchoBackend::failing_verification()))
        .run(&untouched, &mut shutdown);
    assert_eq!(exit, RelayExit::BackendError);
    assert!(untouched.events().is_empty());

    let exit = Coordinator::new("r", 1, Some(EchoBackend::new()))
        .run(&FakeConnector::failing_connect(), &mut shutdown);
    assert_eq!(exit, RelayExit::BusError);

    let refused = FakeConnector::failing_run();
    let exit = Coordinator::new("r", 1, None).run(&refused, &mut shutdown);
    assert_eq!(exit, RelayExit::BusError);
    assert_eq!(
        refused.events(),
        [
            LinkEvent::Connected,
            LinkEvent::Halted {
                accepted_at_halt: None
            }
        ]
    );
}
