use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use node_watcher::config::WatcherConfig;
use node_watcher::k8s::mock::MockPodSource;
use node_watcher::k8s::mock::TestPod;
use node_watcher::k8s::mock::WatchSession;
use node_watcher::k8s::PodWatchEvent;
use node_watcher::watcher::FnConsumer;
use node_watcher::NodeEvent;
use node_watcher::NodeEventType;
use node_watcher::NodeStatus;
use node_watcher::NodeType;
use node_watcher::NodeWatcher;
use node_watcher::WatcherError;
use similar_asserts::assert_eq;
use test_log::test;
use tokio::sync::mpsc;

type Seen = (NodeEventType, NodeType, u32, NodeStatus);

fn config() -> WatcherConfig {
    WatcherConfig {
        request_timeout: Duration::from_secs(5),
        watch_timeout: Duration::from_secs(60),
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
    }
}

fn seen(event: &NodeEvent) -> Seen {
    (
        event.event_type,
        event.node.node_type,
        event.node.id,
        event.node.status,
    )
}

async fn recv_n(rx: &mut mpsc::Receiver<NodeEvent>, count: usize) -> Vec<Seen> {
    let mut events = Vec::with_capacity(count);
    for _ in 0..count {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for node event")
            .expect("watcher closed the channel");
        events.push(seen(&event));
    }
    events
}

async fn assert_quiet(rx: &mut mpsc::Receiver<NodeEvent>) {
    let extra = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(extra.is_err(), "unexpected node event: {extra:?}");
}

#[test(tokio::test)]
async fn dropped_stream_does_not_duplicate_added() {
    let source = Arc::new(MockPodSource::new());
    source.push_list(vec![TestPod::new("mnist", "worker", 0).build()], "5");
    source.push_watch(WatchSession::Closing(vec![Ok(PodWatchEvent::Added(
        TestPod::new("mnist", "worker", 1)
            .resource_version("6")
            .build(),
    ))]));
    // The server replays what the client already saw before reporting new changes.
    source.push_watch(WatchSession::Open(vec![
        Ok(PodWatchEvent::Added(
            TestPod::new("mnist", "worker", 1)
                .resource_version("6")
                .build(),
        )),
        Ok(PodWatchEvent::Added(TestPod::new("mnist", "worker", 0).build())),
        Ok(PodWatchEvent::Modified(
            TestPod::new("mnist", "worker", 1)
                .phase("Succeeded")
                .resource_version("7")
                .build(),
        )),
    ]));
    let watcher = NodeWatcher::new(source.clone(), "mnist", config()).unwrap();
    let (tx, mut rx) = mpsc::channel(4);

    let handle = watcher.subscribe(tx);
    let events = recv_n(&mut rx, 3).await;
    assert_quiet(&mut rx).await;
    handle.cancel();
    handle.join().await.unwrap();

    assert_eq!(
        events,
        vec![
            (NodeEventType::Added, NodeType::Worker, 0, NodeStatus::Running),
            (NodeEventType::Added, NodeType::Worker, 1, NodeStatus::Running),
            (NodeEventType::Modified, NodeType::Worker, 1, NodeStatus::Succeeded),
        ]
    );
    assert_eq!(source.watch_versions(), vec!["5".to_string(), "6".to_string()]);
    assert_eq!(source.list_calls(), 1);
}

#[test(tokio::test)]
async fn expired_version_relists_and_reconciles() {
    let source = Arc::new(MockPodSource::new());
    source.push_list(
        vec![
            TestPod::new("mnist", "ps", 0).build(),
            TestPod::new("mnist", "worker", 0).build(),
            TestPod::new("mnist", "worker", 1).build(),
        ],
        "10",
    );
    source.push_watch(WatchSession::Closing(vec![Ok(PodWatchEvent::Expired)]));
    source.push_list(
        vec![
            TestPod::new("mnist", "ps", 0).build(),
            TestPod::new("mnist", "worker", 0)
                .phase("Failed")
                .terminated(Some("OOMKilled"), 137)
                .build(),
            TestPod::new("mnist", "worker", 2).phase("Pending").build(),
        ],
        "20",
    );
    let watcher = NodeWatcher::new(source.clone(), "mnist", config()).unwrap();
    let (tx, mut rx) = mpsc::channel(8);

    let handle = watcher.subscribe(tx);
    let initial = recv_n(&mut rx, 3).await;
    let reconciled = recv_n(&mut rx, 3).await;
    assert_quiet(&mut rx).await;
    handle.cancel();
    handle.join().await.unwrap();

    assert_eq!(
        initial,
        vec![
            (NodeEventType::Added, NodeType::Ps, 0, NodeStatus::Running),
            (NodeEventType::Added, NodeType::Worker, 0, NodeStatus::Running),
            (NodeEventType::Added, NodeType::Worker, 1, NodeStatus::Running),
        ]
    );
    assert_eq!(
        reconciled,
        vec![
            (NodeEventType::Modified, NodeType::Worker, 0, NodeStatus::Failed),
            (NodeEventType::Added, NodeType::Worker, 2, NodeStatus::Pending),
            (NodeEventType::Deleted, NodeType::Worker, 1, NodeStatus::Deleted),
        ]
    );
    assert_eq!(source.watch_versions(), vec!["10".to_string(), "20".to_string()]);
    assert_eq!(source.list_calls(), 2);
}

#[test(tokio::test)]
async fn rejected_watch_is_retried_from_same_version() {
    let source = Arc::new(MockPodSource::new());
    source.push_list(Vec::new(), "5");
    source.push_watch(WatchSession::Rejected(WatcherError::WatchFailed {
        message: "connection reset".to_string(),
    }));
    source.push_watch(WatchSession::Open(vec![Ok(PodWatchEvent::Added(
        TestPod::new("mnist", "chief", 0).build(),
    ))]));
    let watcher = NodeWatcher::new(source.clone(), "mnist", config()).unwrap();
    let (tx, mut rx) = mpsc::channel(4);

    let handle = watcher.subscribe(tx);
    let events = recv_n(&mut rx, 1).await;
    handle.cancel();
    handle.join().await.unwrap();

    assert_eq!(
        events,
        vec![(NodeEventType::Added, NodeType::Chief, 0, NodeStatus::Running)]
    );
    assert_eq!(source.watch_versions(), vec!["5".to_string(), "5".to_string()]);
}

#[test(tokio::test)]
async fn slow_consumer_loses_no_events() {
    let source = Arc::new(MockPodSource::new());
    let pods = (0..20)
        .rev()
        .map(|index| TestPod::new("mnist", "worker", index).build())
        .collect();
    source.push_list(pods, "1");
    let watcher = NodeWatcher::new(source, "mnist", config()).unwrap();
    let (tx, mut rx) = mpsc::channel(1);

    let handle = watcher.subscribe(tx);
    let mut ids = Vec::new();
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(2)).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, NodeEventType::Added);
        ids.push(event.node.id);
    }
    handle.cancel();
    handle.join().await.unwrap();

    assert_eq!(ids, (0..20).collect::<Vec<u32>>());
}

#[test(tokio::test)]
async fn cancellation_is_idempotent() {
    let source = Arc::new(MockPodSource::new());
    source.push_list(vec![TestPod::new("mnist", "evaluator", 0).build()], "1");
    let watcher = NodeWatcher::new(source, "mnist", config()).unwrap();
    let seen_events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen_events);

    let handle = watcher.subscribe(FnConsumer(move |event: NodeEvent| {
        sink.lock().unwrap().push(seen(&event));
    }));
    while seen_events.lock().unwrap().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.cancel();
    handle.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("watcher did not stop")
        .unwrap();

    assert_eq!(
        *seen_events.lock().unwrap(),
        vec![(NodeEventType::Added, NodeType::Evaluator, 0, NodeStatus::Running)]
    );
}

#[test(tokio::test)]
async fn list_against_unresponsive_server_times_out() {
    let source = Arc::new(MockPodSource::new());
    source.push_list_hanging();
    let quick = WatcherConfig {
        request_timeout: Duration::from_millis(50),
        ..config()
    };
    let watcher = NodeWatcher::new(source, "mnist", quick).unwrap();

    let err = watcher.list().await.unwrap_err();
    assert!(matches!(
        err.current_context(),
        WatcherError::Timeout {
            operation: "list pods",
            ..
        }
    ));
    assert_eq!(err.current_context().is_retryable(), true);
}
