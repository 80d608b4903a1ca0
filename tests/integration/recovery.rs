//! Requeue-lost semantics: dead-worker recovery, liveness protection, and
//! notification reconciliation.

use deferq::Task;

use crate::common::{test_queue, unique_queue_name};

#[tokio::test]
#[ignore = "requires redis"]
async fn unreleased_task_of_a_dead_worker_is_recovered() {
    let queue = test_queue().await;

    for i in 1..=4i64 {
        queue
            .enqueue(&Task::new("pkg.f", (i,)).unwrap())
            .await
            .unwrap();
    }
    for _ in 0..3 {
        queue.dequeue().await.unwrap().expect("expected a task");
        queue.release().await.unwrap();
    }
    // The last one stays in flight when the worker dies.
    queue.dequeue().await.unwrap().expect("expected a task");
    queue.die().await.unwrap();

    assert_eq!(queue.requeue_lost().await.unwrap(), 1);
    assert_eq!(queue.len().await.unwrap(), 1);

    let recovered = queue.dequeue().await.unwrap().expect("expected the lost task");
    assert_eq!(recovered, Task::new("pkg.f", (4i64,)).unwrap());
    queue.release().await.unwrap();

    assert_eq!(queue.requeue_lost().await.unwrap(), 0);
    queue.clear().await.unwrap();
}

#[tokio::test]
#[ignore = "requires redis"]
async fn live_worker_keeps_its_task() {
    let queue = test_queue().await;
    let task = Task::new("pkg.f", (7i64,)).unwrap();

    queue.enqueue(&task).await.unwrap();
    queue.dequeue().await.unwrap().expect("expected a task");

    // While the liveness key is present the task must not come back.
    queue.keep_alive().await.unwrap();
    assert_eq!(queue.requeue_lost().await.unwrap(), 0);
    assert_eq!(queue.len().await.unwrap(), 0);

    // Once it is gone, recovery fires.
    queue.die().await.unwrap();
    assert_eq!(queue.requeue_lost().await.unwrap(), 1);
    assert_eq!(queue.len().await.unwrap(), 1);

    let recovered = queue.dequeue().await.unwrap().expect("expected the lost task");
    assert_eq!(recovered, task);
    queue.release().await.unwrap();

    queue.clear().await.unwrap();
}

#[tokio::test]
#[ignore = "requires redis"]
async fn missing_notifications_are_reconciled() {
    let queue = test_queue().await;
    let mut conn = queue.pool().get().await.unwrap();

    // Pathological state: tasks on the list, no sentinels at all.
    let n = 3i64;
    for i in 0..n {
        let task = Task::new("pkg.f", (i,)).unwrap();
        let _: usize = redis::cmd("RPUSH")
            .arg(queue.name())
            .arg(task.serialize().unwrap())
            .query_async(&mut *conn)
            .await
            .unwrap();
    }
    drop(conn);

    assert_eq!(queue.requeue_lost().await.unwrap(), n);

    let mut conn = queue.pool().get().await.unwrap();
    let noti_len: usize = redis::cmd("LLEN")
        .arg(queue.noti_key())
        .query_async(&mut *conn)
        .await
        .unwrap();
    assert_eq!(noti_len, n as usize);
    drop(conn);

    let popped = queue.dequeue().await.unwrap();
    assert!(popped.is_some(), "dequeue must succeed after reconciliation");
    queue.release().await.unwrap();

    queue.clear().await.unwrap();
}

#[tokio::test]
#[ignore = "requires redis"]
async fn recovery_is_scoped_to_its_own_queue() {
    let queue = test_queue().await;
    let other = deferq::Queue::new(unique_queue_name(), queue.pool().clone());

    queue
        .enqueue(&Task::new("pkg.f", (1i64,)).unwrap())
        .await
        .unwrap();
    queue.dequeue().await.unwrap().expect("expected a task");
    queue.die().await.unwrap();

    assert_eq!(other.requeue_lost().await.unwrap(), 0);
    assert_eq!(queue.requeue_lost().await.unwrap(), 1);

    queue.clear().await.unwrap();
    other.clear().await.unwrap();
}
