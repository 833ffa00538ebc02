//! Integration Tests for Effects
//!
//! These tests run effect bodies on a Tokio runtime and check what they
//! observe when the graph keeps moving while they are suspended.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use cascade_core::reactive::{Data, Done, Event, Graph};

fn collect<T: Data>(event: &Event<T>) -> Arc<Mutex<Vec<T>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    event.watch(move |value: &T| sink.lock().push(value.clone()));
    seen
}

/// Test that bodies reading a store directly see the latest value while
/// bodies fed by `sample` see the value of their own step.
#[tokio::test]
async fn direct_read_and_sample_diverge() {
    let graph = Graph::new();
    let set = graph.event::<i32>();
    let value = graph.store(0);
    value.on(&set, |_, n| *n).unwrap();

    let direct_reads = Arc::new(Mutex::new(Vec::new()));
    let direct = {
        let value = value.clone();
        let reads = direct_reads.clone();
        graph.effect(move |_: i32| {
            let value = value.clone();
            let reads = reads.clone();
            async move {
                reads.lock().push(value.read());
                Ok::<_, ()>(())
            }
        })
    };
    graph.forward(&set, &direct).unwrap();

    let sampled = graph.effect(|snapshot: i32| async move { Ok::<_, ()>(snapshot) });
    graph.sample(value.clone(), &set).target(&sampled).unwrap();
    let sampled_results = collect(&sampled.done_data());

    set.fire(1).unwrap();
    set.fire(2).unwrap();
    set.fire(3).unwrap();
    graph.settled().await;

    assert_eq!(*direct_reads.lock(), vec![3, 3, 3]);
    assert_eq!(*sampled_results.lock(), vec![1, 2, 3]);
}

/// Test that a snapshot handed to an effect does not change while the body
/// is suspended, even though its source store does.
#[tokio::test]
async fn snapshot_survives_suspension() {
    let graph = Graph::new();
    let save = graph.event::<()>();
    let items = graph.store(vec!["a".to_string()]);

    let upload = graph.effect(|snapshot: Vec<String>| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<_, ()>(snapshot.len())
    });
    graph.sample(items.clone(), &save).target(&upload).unwrap();
    let done = collect(&upload.done());

    save.fire(()).unwrap();
    items.write(vec!["a".into(), "b".into(), "c".into()]).unwrap();
    graph.settled().await;

    assert_eq!(
        *done.lock(),
        vec![Done {
            params: vec!["a".to_string()],
            result: 1
        }]
    );
    assert_eq!(items.read().len(), 3);
}

#[derive(Debug, Clone, PartialEq)]
struct Transfer {
    balance: i64,
    amount: i64,
}

/// Test that two transfers of 600 from a balance of 1000 cannot both pass
/// when the balance check uses a sampled snapshot and the debit is a pure
/// reducer of the same step.
#[tokio::test]
async fn sampled_balance_prevents_double_spend() {
    let graph = Graph::new();
    let request = graph.event::<i64>();
    let balance = graph.store(1000_i64);

    let transfer = graph.effect(|t: Transfer| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if t.balance >= t.amount {
            Ok(t.amount)
        } else {
            Err(format!("insufficient funds for {}", t.amount))
        }
    });
    graph
        .sample(balance.clone(), &request)
        .map(|balance, amount| Transfer {
            balance,
            amount: *amount,
        })
        .target(&transfer)
        .unwrap();
    balance
        .on(&transfer, |current, t| {
            if t.balance >= t.amount {
                current - t.amount
            } else {
                *current
            }
        })
        .unwrap();

    let accepted = collect(&transfer.done_data());
    let rejected = collect(&transfer.fail_data());

    request.fire(600).unwrap();
    request.fire(600).unwrap();
    graph.settled().await;

    assert_eq!(*accepted.lock(), vec![600]);
    assert_eq!(rejected.lock().len(), 1);
    assert_eq!(balance.read(), 400);
}

/// Test that checking the balance with a direct read inside the body lets
/// both transfers through.
#[tokio::test]
async fn direct_read_allows_double_spend() {
    let graph = Graph::new();
    let debit = graph.event::<i64>();
    let balance = graph.store(1000_i64);
    balance.on(&debit, |current, amount| current - amount).unwrap();

    let transfer = {
        let balance = balance.clone();
        let debit = debit.clone();
        graph.effect(move |amount: i64| {
            let balance = balance.clone();
            let debit = debit.clone();
            async move {
                let current = balance.read();
                tokio::time::sleep(Duration::from_millis(5)).await;
                if current < amount {
                    return Err("insufficient funds".to_string());
                }
                debit.fire(amount).map_err(|err| err.to_string())?;
                Ok(amount)
            }
        })
    };
    let accepted = collect(&transfer.done_data());

    transfer.call(600).unwrap();
    transfer.call(600).unwrap();
    graph.settled().await;

    assert_eq!(accepted.lock().len(), 2);
    assert_eq!(balance.read(), -200);
}

/// Test that concurrent calls settle independently with their own params.
#[tokio::test]
async fn concurrent_calls_are_independent() {
    let graph = Graph::new();
    let slow_square = graph.effect(|n: u64| async move {
        tokio::time::sleep(Duration::from_millis(40 - n * 10)).await;
        Ok::<_, ()>(n * n)
    });
    let done = collect(&slow_square.done());

    for n in 1..=3 {
        slow_square.call(n).unwrap();
    }
    assert_eq!(slow_square.in_flight().read(), 3);
    graph.settled().await;

    let done = done.lock();
    assert_eq!(
        done.iter().map(|d| d.params).collect::<Vec<_>>(),
        vec![3, 2, 1]
    );
    assert!(done.iter().all(|d| d.result == d.params * d.params));
    assert!(!slow_square.pending().read());
}

/// Test that effect results can be forwarded into stores and that bodies
/// settle from worker threads.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn results_settle_from_worker_threads() {
    let graph = Graph::new();
    let fetch = graph.effect(|id: u32| async move {
        tokio::task::yield_now().await;
        Ok::<_, String>(id * 2)
    });
    let total = graph.store(0_u32);
    total.on(&fetch.done_data(), |sum, n| sum + n).unwrap();
    let last = graph.store(0_u32);
    graph.forward(&fetch.done_data(), &last).unwrap();

    for id in 1..=50 {
        fetch.call(id).unwrap();
    }
    graph.settled().await;

    assert_eq!(total.read(), (1..=50).map(|id| id * 2).sum::<u32>());
    assert_ne!(last.read(), 0);
    assert_eq!(fetch.in_flight().read(), 0);
    assert!(!fetch.pending().read());
}

/// Test that a failing consumer of `done` does not leave the effect pending.
#[tokio::test]
async fn failing_done_consumer_still_releases_pending() {
    let graph = Graph::new();
    let fx = graph.effect_sync(|n: i32| Ok::<_, ()>(n));
    let strict = graph.store(0);
    strict
        .try_on(&fx.done_data(), |_, n| {
            if *n > 10 {
                Err("too large")
            } else {
                Ok(*n)
            }
        })
        .unwrap();

    fx.call(99).unwrap();
    graph.settled().await;

    assert_eq!(strict.read(), 0);
    assert!(!fx.pending().read());
}

#[derive(Debug, Clone, PartialEq)]
struct Verdict {
    approved: bool,
    amount: i64,
    to: &'static str,
}

/// Test the validate-then-commit pattern: the effect decides on a sampled
/// balance, and its outcome is split into approved and rejected events by
/// samples that use the outcome as their own clock.
#[tokio::test]
async fn outcome_samples_split_approved_and_rejected() {
    let graph = Graph::new();
    let request = graph.event::<(i64, &'static str)>();
    let approved = graph.event::<i64>();
    let rejected = graph.event::<Verdict>();
    let balance = graph.store(1000_i64);
    balance.on(&approved, |current, amount| current - amount).unwrap();

    let validate = graph.effect(|(balance, amount, to): (i64, i64, &'static str)| async move {
        Ok::<_, ()>(Verdict {
            approved: balance >= amount,
            amount,
            to,
        })
    });
    graph
        .sample(balance.clone(), &request)
        .map(|balance, (amount, to)| (balance, *amount, *to))
        .target(&validate)
        .unwrap();

    graph
        .sample_unit(&validate.done_data())
        .filter(|_, verdict| verdict.approved)
        .map(|_, verdict| verdict.amount)
        .target(&approved)
        .unwrap();
    graph
        .sample_unit(&validate.done_data())
        .filter(|_, verdict| !verdict.approved)
        .target(&rejected)
        .unwrap();

    let debits = collect(&approved);
    let refusals = collect(&rejected);

    request.fire((600, "alice")).unwrap();
    graph.settled().await;
    request.fire((600, "bob")).unwrap();
    graph.settled().await;

    assert_eq!(*debits.lock(), vec![600]);
    assert_eq!(
        *refusals.lock(),
        vec![Verdict {
            approved: false,
            amount: 600,
            to: "bob"
        }]
    );
    assert_eq!(balance.read(), 400);
}
