//! The sweeper driving recovery across multiple queues.

use std::time::Duration;

use deferq::{RunStatus, Sweeper, Task};
use tokio::time::timeout;

use crate::common::test_queue;

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires redis"]
async fn sweeper_recovers_lost_tasks_on_every_queue() {
    let first = test_queue().await;
    let second = test_queue().await;

    for queue in [&first, &second] {
        queue
            .enqueue(&Task::new("pkg.f", (1i64,)).unwrap())
            .await
            .unwrap();
        queue.dequeue().await.unwrap().expect("expected a task");
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    let mut sweeper = Sweeper::new(vec![first.clone(), second.clone()]);
    sweeper.set_interval(Duration::from_millis(1));

    let runner = {
        let sweeper = sweeper.clone();
        tokio::spawn(async move { sweeper.run().await })
    };

    let deadline = Duration::from_secs(5);
    timeout(deadline, async {
        loop {
            if first.len().await.unwrap() == 1 && second.len().await.unwrap() == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("sweeper did not recover the lost tasks in time");

    sweeper.stop();
    timeout(deadline, runner).await.unwrap().unwrap();
    assert_eq!(sweeper.status(), RunStatus::Stopped);

    first.clear().await.unwrap();
    second.clear().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires redis"]
async fn sweeper_keeps_going_when_one_queue_errors() {
    // A queue whose pool points at a dead server makes requeue_lost fail;
    // the sweeper must still service the healthy queue.
    let healthy = test_queue().await;
    let broken_pool = deferq::RedisPool::with_config(
        "redis://127.0.0.1:1/",
        deferq::PoolConfig {
            max_size: 1,
            min_idle: 0,
            connection_timeout: Duration::from_millis(50),
        },
    )
    .await
    .unwrap();
    let broken = deferq::Queue::new("deferq-test-broken", broken_pool);

    healthy
        .enqueue(&Task::new("pkg.f", (1i64,)).unwrap())
        .await
        .unwrap();
    healthy.dequeue().await.unwrap().expect("expected a task");

    let mut sweeper = Sweeper::new(vec![broken, healthy.clone()]);
    sweeper.set_interval(Duration::from_millis(1));

    let runner = {
        let sweeper = sweeper.clone();
        tokio::spawn(async move { sweeper.run().await })
    };

    timeout(Duration::from_secs(5), async {
        loop {
            if healthy.len().await.unwrap() == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("sweeper stalled on the broken queue");

    sweeper.stop();
    timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();
    healthy.clear().await.unwrap();
}
