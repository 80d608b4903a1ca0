//! The worker run loop: dispatch, panic isolation, unregistered tasks,
//! and shutdown.

use std::time::Duration;

use deferq::{Task, Worker};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::common::{test_arg, test_queue, TestArg};

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires redis"]
async fn worker_dispatches_multi_argument_handlers() {
    let queue = test_queue().await;
    let mut worker = Worker::new(queue.clone());
    let (tx, mut rx) = mpsc::unbounded_channel::<i64>();

    worker.register_as("pkg.sum", {
        move |a: i64, b: i64| {
            let tx = tx.clone();
            async move {
                tx.send(a + b).ok();
            }
        }
    });

    queue
        .enqueue(&Task::new("pkg.sum", (2i64, 3i64)).unwrap())
        .await
        .unwrap();

    let handle = worker.handle();
    let running = tokio::spawn(async move { worker.run().await });

    let received = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(received, 5);

    handle.stop();
    timeout(WAIT, running).await.unwrap().unwrap().unwrap();

    assert_eq!(queue.len().await.unwrap(), 0);
    queue.clear().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires redis"]
async fn worker_survives_a_panicking_handler() {
    let queue = test_queue().await;
    let mut worker = Worker::new(queue.clone());
    let worker_id = worker.worker_id().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<TestArg>();

    worker.register_as("pkg.boom", |_arg: TestArg| async move {
        panic!("handler exploded");
        #[allow(unreachable_code)]
        ()
    });
    worker.register_as("pkg.fine", {
        move |arg: TestArg| {
            let tx = tx.clone();
            async move {
                tx.send(arg).ok();
            }
        }
    });

    queue
        .enqueue(&Task::new("pkg.boom", (test_arg(),)).unwrap())
        .await
        .unwrap();
    queue
        .enqueue(&Task::new("pkg.fine", (test_arg(),)).unwrap())
        .await
        .unwrap();

    let handle = worker.handle();
    let running = tokio::spawn(async move { worker.run().await });

    // The second task still runs, so the panic did not kill the loop.
    let received = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(received, test_arg());

    handle.stop();
    timeout(WAIT, running).await.unwrap().unwrap().unwrap();

    // Both tasks were released, even the one that panicked.
    let mut conn = queue.pool().get().await.unwrap();
    let in_flight: usize = redis::cmd("HLEN")
        .arg(queue.processing_key())
        .query_async(&mut *conn)
        .await
        .unwrap();
    assert_eq!(in_flight, 0);

    // The liveness key is gone after a clean shutdown.
    let alive: Option<String> = redis::cmd("GET")
        .arg(&worker_id)
        .query_async(&mut *conn)
        .await
        .unwrap();
    assert!(alive.is_none());

    drop(conn);
    queue.clear().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires redis"]
async fn unregistered_tasks_are_dropped_not_wedged() {
    let queue = test_queue().await;
    let mut worker = Worker::new(queue.clone());
    let (tx, mut rx) = mpsc::unbounded_channel::<i64>();

    worker.register_as("pkg.known", {
        move |v: i64| {
            let tx = tx.clone();
            async move {
                tx.send(v).ok();
            }
        }
    });

    queue
        .enqueue(&Task::new("pkg.unknown", (1i64,)).unwrap())
        .await
        .unwrap();
    queue
        .enqueue(&Task::new("pkg.known", (2i64,)).unwrap())
        .await
        .unwrap();

    let handle = worker.handle();
    let running = tokio::spawn(async move { worker.run().await });

    let received = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(received, 2);

    handle.stop();
    timeout(WAIT, running).await.unwrap().unwrap().unwrap();

    // The unknown task was released rather than left in flight.
    let mut conn = queue.pool().get().await.unwrap();
    let in_flight: usize = redis::cmd("HLEN")
        .arg(queue.processing_key())
        .query_async(&mut *conn)
        .await
        .unwrap();
    assert_eq!(in_flight, 0);

    drop(conn);
    queue.clear().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires redis"]
async fn worker_heartbeats_while_running() {
    let queue = test_queue().await;
    let worker = Worker::new(queue.clone());
    let worker_id = worker.worker_id().to_string();

    let handle = worker.handle();
    let running = tokio::spawn(async move {
        let mut worker = worker;
        worker.run().await
    });

    // The first heartbeat fires immediately on startup.
    let mut alive: Option<String> = None;
    for _ in 0..50 {
        let mut conn = queue.pool().get().await.unwrap();
        alive = redis::cmd("GET")
            .arg(&worker_id)
            .query_async(&mut *conn)
            .await
            .unwrap();
        if alive.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(alive.is_some(), "liveness key was never written");

    handle.stop();
    timeout(WAIT, running).await.unwrap().unwrap().unwrap();
    queue.clear().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires redis"]
async fn worker_can_run_again_after_stopping() {
    let queue = test_queue().await;
    let mut worker = Worker::new(queue.clone());
    let handle = worker.handle();

    let running = tokio::spawn(async move {
        let first = worker.run().await;
        (worker, first)
    });

    // Wait until the loop is up, then stop it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.stop();
    let (mut worker, first) = timeout(WAIT, running).await.unwrap().unwrap();
    first.unwrap();

    // A stopped worker can run again...
    let handle = worker.handle();
    let running = tokio::spawn(async move {
        let again = worker.run().await;
        (worker, again)
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.stop();
    let (_worker, again) = timeout(WAIT, running).await.unwrap().unwrap();
    again.unwrap();

    queue.clear().await.unwrap();
}
