//! Acceptance tests for the search overlay.
//!
//! These run real nodes on loopback TCP and check:
//! 1. Flood termination - TTL bounds how far a search travels along a chain
//! 2. Local search recognition - answers to our own searches stop here
//! 3. Empty probe - always exactly one Response with no results
//! 4. Response relay - transit Responses go everywhere but back
//! 5. No duplicate suppression - a looping search is relayed again
//! 6. Malformed input - a bad frame costs one message, not the connection
//! 7. Download - search, then fetch the file from the advertised host

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;

use floodnet_p2p::download::{download, DownloadService};
use floodnet_p2p::protocol::{Header, MessageCodec};
use floodnet_p2p::{
    FileIndex, FloodNode, Message, MessageId, NodeHandle, P2pConfig, RoutingService, Search,
    SearchReport,
};

/// How long to wait for something that should happen.
const ARRIVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to watch for something that must not happen.
const QUIET_PERIOD: Duration = Duration::from_millis(500);

/// A running node and everything needed to drive and stop it.
struct TestNode {
    addr: SocketAddr,
    download_addr: SocketAddrV4,
    handle: NodeHandle,
    reports: mpsc::UnboundedReceiver<SearchReport>,
    shutdown: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
    _download_shutdown: broadcast::Sender<()>,
    _dir: TempDir,
}

impl TestNode {
    async fn stop(self) {
        let _ = self.shutdown.send(()).await;
        let _ = timeout(ARRIVAL_TIMEOUT, self.task).await;
    }
}

/// Poll `condition` until it holds or `timeout_ms` elapses.
async fn wait_for<F, Fut>(timeout_ms: u64, poll_ms: u64, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout_duration = Duration::from_millis(timeout_ms);
    let poll_duration = Duration::from_millis(poll_ms);

    loop {
        if condition().await {
            return true;
        }
        if start.elapsed() > timeout_duration {
            return false;
        }
        sleep(poll_duration).await;
    }
}

/// Start a node sharing `files`, with a live download service, and return
/// it once its listener is bound.
async fn start_node_get_addr(files: &[(&str, &[u8])], initial_ttl: u8) -> TestNode {
    let dir = tempfile::tempdir().unwrap();
    for (name, contents) in files {
        std::fs::write(dir.path().join(name), contents).unwrap();
    }

    let index = Arc::new(FileIndex::open(dir.path()).await.unwrap());
    let service = DownloadService::bind("127.0.0.1:0".parse().unwrap(), index.clone())
        .await
        .unwrap();
    let download_addr = match service.local_addr().unwrap() {
        SocketAddr::V4(addr) => addr,
        SocketAddr::V6(_) => panic!("download service bound to IPv6"),
    };
    let (download_shutdown, download_rx) = broadcast::channel(1);
    tokio::spawn(service.run(download_rx));

    let config = P2pConfig::new("127.0.0.1:0".parse().unwrap())
        .with_shared_dir(dir.path())
        .with_download_addr(download_addr)
        .with_initial_ttl(initial_ttl)
        .with_connect_timeout(Duration::from_secs(2))
        .with_shutdown_grace(Duration::from_secs(1));

    let mut node = FloodNode::with_file_index(config, index).await;
    let addr_rx = node.bound_addr_receiver();
    let shutdown = node.shutdown_handle();
    let handle = node.handle();
    let reports = node.reports().unwrap();

    let task = tokio::spawn(async move {
        let _ = node.run().await;
    });

    let addr = addr_rx.await.expect("Failed to get bound address");
    TestNode {
        addr,
        download_addr,
        handle,
        reports,
        shutdown,
        task,
        _download_shutdown: download_shutdown,
        _dir: dir,
    }
}

/// Dial `to` from `from` and wait until both ends have registered the link.
async fn link(from: &TestNode, to: &TestNode) {
    let before = to.handle.connection_count().await;
    from.handle.connect(to.addr).await.unwrap();
    let handle = to.handle.clone();
    assert!(
        wait_for(2000, 10, || {
            let handle = handle.clone();
            async move { handle.connection_count().await > before }
        })
        .await,
        "inbound side never registered the connection"
    );
}

/// A hand-driven peer speaking the wire protocol directly.
async fn raw_peer(node: &TestNode) -> Framed<TcpStream, MessageCodec> {
    let before = node.handle.connection_count().await;
    let stream = TcpStream::connect(node.addr).await.unwrap();
    let handle = node.handle.clone();
    assert!(
        wait_for(2000, 10, || {
            let handle = handle.clone();
            async move { handle.connection_count().await > before }
        })
        .await
    );
    Framed::new(stream, MessageCodec::new())
}

async fn next_message(peer: &mut Framed<TcpStream, MessageCodec>) -> Option<Message> {
    match timeout(QUIET_PERIOD, peer.next()).await {
        Ok(Some(Ok(Ok(message)))) => Some(message),
        _ => None,
    }
}

async fn expect_message(peer: &mut Framed<TcpStream, MessageCodec>) -> Message {
    timeout(ARRIVAL_TIMEOUT, peer.next())
        .await
        .expect("timed out waiting for a message")
        .expect("connection closed")
        .expect("read failed")
        .expect("malformed message")
}

/// Collect every report that arrives within the quiet period.
async fn drain_reports(node: &mut TestNode) -> Vec<SearchReport> {
    let mut reports = Vec::new();
    while let Ok(Some(report)) = timeout(QUIET_PERIOD, node.reports.recv()).await {
        reports.push(report);
    }
    reports
}

fn search(ttl: u8, query: &str) -> Search {
    let header = Header::new(MessageId::random(), ttl, RoutingService::BreadthFirst);
    Search::new(header, query).unwrap()
}

// ============================================================================
// Test 1: Flood termination along A - B - C - D
// ============================================================================

#[tokio::test]
async fn test_ttl_two_reaches_c_but_not_beyond() {
    let mut a = start_node_get_addr(&[], 2).await;
    let b = start_node_get_addr(&[("bob_at_b", b"b")], 50).await;
    let c = start_node_get_addr(&[("bob_at_c", b"c")], 50).await;
    let d = start_node_get_addr(&[("bob_at_d", b"d")], 50).await;
    link(&a, &b).await;
    link(&b, &c).await;
    link(&c, &d).await;

    let (id, sent) = a.handle.search("bob").await.unwrap();
    assert_eq!(sent, 1);

    let reports = drain_reports(&mut a).await;
    let hosts: BTreeSet<_> = reports.iter().map(|r| r.response.host()).collect();
    assert!(reports.iter().all(|r| r.response.header().id() == &id));
    assert!(reports.iter().all(|r| r.query == "bob"));
    assert_eq!(hosts, BTreeSet::from([b.download_addr, c.download_addr]));
    assert!(!hosts.contains(&d.download_addr));

    for node in [a, b, c, d] {
        node.stop().await;
    }
}

#[tokio::test]
async fn test_ttl_one_answered_at_b_never_reaches_c() {
    let mut a = start_node_get_addr(&[], 1).await;
    let b = start_node_get_addr(&[("bob_at_b", b"b")], 50).await;
    let c = start_node_get_addr(&[("bob_at_c", b"c")], 50).await;
    link(&a, &b).await;
    link(&b, &c).await;

    a.handle.search("bob").await.unwrap();

    let reports = drain_reports(&mut a).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].response.host(), b.download_addr);
    assert_eq!(reports[0].response.results()[0].file_name(), "bob_at_b");

    for node in [a, b, c] {
        node.stop().await;
    }
}

// ============================================================================
// Test 2: Local search recognition
// ============================================================================

#[tokio::test]
async fn test_answer_to_local_search_not_relayed() {
    let mut a = start_node_get_addr(&[], 5).await;
    let b = start_node_get_addr(&[("bob.txt", b"hello")], 50).await;
    link(&a, &b).await;
    let mut observer = raw_peer(&a).await;

    let (id, sent) = a.handle.search("bob").await.unwrap();
    assert_eq!(sent, 2);

    // The observer sees the search itself, and nothing after it
    match expect_message(&mut observer).await {
        Message::Search(s) => assert_eq!(s.header().id(), &id),
        other => panic!("expected search, got {}", other),
    }

    let report = timeout(ARRIVAL_TIMEOUT, a.reports.recv()).await.unwrap().unwrap();
    assert_eq!(report.query, "bob");
    assert_eq!(report.response.host(), b.download_addr);
    assert_eq!(report.response.results().len(), 1);
    assert!(report.to_string().contains("bob.txt: ID "));

    assert!(next_message(&mut observer).await.is_none());

    a.stop().await;
    b.stop().await;
}

// ============================================================================
// Test 3: Empty probe
// ============================================================================

#[tokio::test]
async fn test_empty_probe_gets_one_empty_response() {
    let node = start_node_get_addr(&[("a", b"1"), ("b", b"2")], 50).await;
    let mut peer = raw_peer(&node).await;

    let probe = search(3, "");
    peer.send(probe.clone().into()).await.unwrap();

    match expect_message(&mut peer).await {
        Message::Response(r) => {
            assert_eq!(r.header().id(), probe.header().id());
            assert!(r.results().is_empty());
            assert_eq!(r.host(), node.download_addr);
        }
        other => panic!("expected response, got {}", other),
    }
    assert!(next_message(&mut peer).await.is_none());

    node.stop().await;
}

#[tokio::test]
async fn test_unmatched_search_gets_no_response() {
    let node = start_node_get_addr(&[("alice", b"1")], 50).await;
    let mut peer = raw_peer(&node).await;

    peer.send(search(3, "bob").into()).await.unwrap();
    assert!(next_message(&mut peer).await.is_none());

    node.stop().await;
}

// ============================================================================
// Test 4: Transit responses flood outward
// ============================================================================

#[tokio::test]
async fn test_transit_response_relayed_to_all_but_sender() {
    let node = start_node_get_addr(&[], 50).await;
    let mut sender = raw_peer(&node).await;
    let mut first = raw_peer(&node).await;
    let mut second = raw_peer(&node).await;

    let header = Header::new(MessageId::random(), 7, RoutingService::DepthFirst);
    let response = floodnet_p2p::Response::new(
        header,
        SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 4000),
    )
    .unwrap();
    sender.send(response.clone().into()).await.unwrap();

    for peer in [&mut first, &mut second] {
        match expect_message(peer).await {
            Message::Response(r) => {
                assert_eq!(r.header().id(), response.header().id());
                assert_eq!(r.header().ttl(), 6);
                assert_eq!(r.header().routing(), RoutingService::DepthFirst);
                assert_eq!(r.host(), response.host());
            }
            other => panic!("expected response, got {}", other),
        }
    }
    assert!(next_message(&mut sender).await.is_none());

    node.stop().await;
}

// ============================================================================
// Test 5: No duplicate suppression
// ============================================================================

#[tokio::test]
async fn test_looping_search_is_relayed_again() {
    let node = start_node_get_addr(&[], 50).await;
    let mut left = raw_peer(&node).await;
    let mut right = raw_peer(&node).await;

    let original = search(5, "loop");
    left.send(original.clone().into()).await.unwrap();

    let relayed = expect_message(&mut right).await;
    assert_eq!(relayed.id(), original.header().id());
    assert_eq!(relayed.ttl(), 4);

    // Send it back in as if it had come around a cycle
    right.send(relayed).await.unwrap();

    let returned = expect_message(&mut left).await;
    assert_eq!(returned.id(), original.header().id());
    assert_eq!(returned.ttl(), 3);

    node.stop().await;
}

// ============================================================================
// Test 6: Malformed input
// ============================================================================

#[tokio::test]
async fn test_malformed_frame_keeps_connection() {
    let node = start_node_get_addr(&[("bob", b"x")], 50).await;
    let mut peer = raw_peer(&node).await;

    // Search with an illegal character in its query
    let mut bad = vec![1u8];
    bad.extend_from_slice(&[7u8; 15]);
    bad.extend_from_slice(&[3, 0, 0, 3]);
    bad.extend_from_slice(b"b b");
    peer.get_mut().write_all(&bad).await.unwrap();

    let good = search(3, "bob");
    peer.send(good.clone().into()).await.unwrap();

    let answer = expect_message(&mut peer).await;
    assert_eq!(answer.id(), good.header().id());
    assert_eq!(node.handle.connection_count().await, 1);

    node.stop().await;
}

#[tokio::test]
async fn test_unknown_message_type_keeps_connection() {
    let node = start_node_get_addr(&[], 50).await;
    let mut peer = raw_peer(&node).await;

    let mut bad = vec![9u8];
    bad.extend_from_slice(&[0u8; 15]);
    bad.extend_from_slice(&[3, 0, 0, 0]);
    peer.get_mut().write_all(&bad).await.unwrap();

    let probe = search(3, "");
    peer.send(probe.clone().into()).await.unwrap();
    assert_eq!(expect_message(&mut peer).await.id(), probe.header().id());

    node.stop().await;
}

// ============================================================================
// Test 7: Search then download
// ============================================================================

#[tokio::test]
async fn test_search_then_download() {
    let contents = b"the quick brown fox".to_vec();
    let mut a = start_node_get_addr(&[], 5).await;
    let b = start_node_get_addr(&[("fox.txt", &contents)], 50).await;
    link(&a, &b).await;

    a.handle.search("fox").await.unwrap();
    let report = timeout(ARRIVAL_TIMEOUT, a.reports.recv()).await.unwrap().unwrap();
    let result = &report.response.results()[0];
    assert_eq!(result.file_size() as usize, contents.len());

    let dest = a.handle.shared_dir().join("fox_copy.txt");
    let received = download(
        SocketAddr::V4(report.response.host()),
        result.file_id(),
        &dest,
    )
    .await
    .unwrap();
    assert_eq!(received as usize, contents.len());
    assert_eq!(std::fs::read(&dest).unwrap(), contents);

    a.stop().await;
    b.stop().await;
}

// ============================================================================
// Test 8: Disconnect handling
// ============================================================================

#[tokio::test]
async fn test_closed_peer_is_deregistered() {
    let node = start_node_get_addr(&[], 50).await;
    let peer = raw_peer(&node).await;
    assert_eq!(node.handle.connection_count().await, 1);

    drop(peer);
    let handle = node.handle.clone();
    assert!(
        wait_for(2000, 10, || {
            let handle = handle.clone();
            async move { handle.connection_count().await == 0 }
        })
        .await
    );

    node.stop().await;
}
