//! Multiple producers and workers sharing one queue.

use std::collections::HashSet;
use std::time::Duration;

use deferq::{Task, Worker};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::common::test_queue;

const WAIT: Duration = Duration::from_secs(20);

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires redis"]
async fn concurrent_producers_all_land() {
    let queue = test_queue().await;

    let producers: Vec<_> = (0..4i64)
        .map(|p| {
            let queue = queue.clone();
            tokio::spawn(async move {
                for i in 0..5i64 {
                    let task = Task::new("pkg.f", (p * 100 + i,)).unwrap();
                    queue.enqueue(&task).await.unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }

    assert_eq!(queue.len().await.unwrap(), 20);
    queue.clear().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires redis"]
async fn two_workers_split_the_queue_without_duplicates() {
    let queue = test_queue().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<i64>();

    let total = 10i64;
    for i in 0..total {
        queue
            .enqueue(&Task::new("pkg.f", (i,)).unwrap())
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    let mut runners = Vec::new();
    for _ in 0..2 {
        let mut worker = Worker::new(queue.clone());
        let tx = tx.clone();
        worker.register_as("pkg.f", {
            move |v: i64| {
                let tx = tx.clone();
                async move {
                    tx.send(v).ok();
                }
            }
        });
        handles.push(worker.handle());
        runners.push(tokio::spawn(async move { worker.run().await }));
    }
    drop(tx);

    // Both workers heartbeat, so nothing is recovered into a duplicate
    // while they drain the queue between them.
    let mut received = Vec::new();
    timeout(WAIT, async {
        while received.len() < total as usize {
            match rx.recv().await {
                Some(v) => received.push(v),
                None => break,
            }
        }
    })
    .await
    .expect("workers did not drain the queue in time");

    for handle in &handles {
        handle.stop();
    }
    for runner in runners {
        timeout(WAIT, runner).await.unwrap().unwrap().unwrap();
    }

    assert_eq!(received.len(), total as usize);
    let distinct: HashSet<i64> = received.iter().copied().collect();
    assert_eq!(distinct.len(), total as usize, "a task ran twice: {received:?}");
    assert_eq!(queue.len().await.unwrap(), 0);
    assert_eq!(queue.requeue_lost().await.unwrap(), 0);

    queue.clear().await.unwrap();
}
