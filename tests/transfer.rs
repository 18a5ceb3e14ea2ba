//! End-to-end transfer tests over the loopback interface.
//!
//! Each test binds one or more in-process receivers on OS-assigned ports,
//! runs them as tokio tasks and drives real sender sessions against them.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use arqcast::frame::{encode_control, encode_data, Frame};
use arqcast::{
    replicate, send_file, shutdown_channel, Config, Destination, Error, LossSimulator, Receiver,
    ReceiverConfig, ReplicationPlan,
};

/// A receiver running on 127.0.0.1 with its own temporary root.
struct Harness {
    receiver: Arc<Receiver>,
    addr: SocketAddr,
    root: TempDir,
    stop: watch::Sender<bool>,
    task: JoinHandle<arqcast::Result<()>>,
}

impl Harness {
    async fn start(loss: LossSimulator) -> Self {
        Self::start_with_idle(loss, Duration::from_secs(300)).await
    }

    async fn start_with_idle(loss: LossSimulator, idle: Duration) -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut config = ReceiverConfig::new(0, loss.drop_percent(), root.path());
        config.bind_ip = Ipv4Addr::LOCALHOST.into();
        config.session_idle_timeout = idle;

        let receiver = Arc::new(Receiver::bind_with_loss(config, loss).await.unwrap());
        let addr = receiver.local_addr().unwrap();
        let (stop, shutdown) = shutdown_channel();

        let task = tokio::spawn({
            let receiver = receiver.clone();
            async move { receiver.run(shutdown).await }
        });

        Self {
            receiver,
            addr,
            root,
            stop,
            task,
        }
    }

    async fn lossless() -> Self {
        Self::start(LossSimulator::new(0)).await
    }

    fn output(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    async fn shutdown(self) -> TempDir {
        self.stop.send(true).unwrap();
        self.task.await.unwrap().unwrap();
        self.root
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn write_input(dir: &Path, data: &[u8]) -> PathBuf {
    let path = dir.join("input.bin");
    std::fs::write(&path, data).unwrap();
    path
}

/// Loopback config with enough slack that scheduler hiccups never exhaust the budget.
fn loopback(mtu: usize, window: usize) -> Config {
    Config {
        retransmit_timeout_ms: 200,
        max_retransmissions: 20,
        ..Config::new(mtu, window)
    }
}

// ---------------------------------------------------------------------------
// Zero loss
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_zero_loss_various_mtu_and_window() {
    let cases: [(usize, usize, usize); 6] = [
        (1, 1, 300),
        (1, 8, 300),
        (10, 3, 1000),
        (100, 1, 2500),
        (512, 4, 5000),
        (1024, 16, 20_000),
    ];

    for (mtu, window, len) in cases {
        let harness = Harness::lossless().await;
        let input_dir = tempfile::tempdir().unwrap();
        let data = payload(len);
        let input = write_input(input_dir.path(), &data);
        let (_stop, shutdown) = shutdown_channel();

        let report = send_file(loopback(mtu, window), harness.addr, &input, "out.bin", shutdown)
            .await
            .unwrap();

        let expected_frames = ((len + mtu - 1) / mtu) as u32;
        assert_eq!(report.frames_acked, expected_frames, "mtu={} window={}", mtu, window);
        assert_eq!(report.bytes_acked, len as u64);
        assert_eq!(report.crc32, crc32fast::hash(&data));

        let written = std::fs::read(harness.output("out.bin")).unwrap();
        assert_eq!(written, data, "mtu={} window={}", mtu, window);

        harness.shutdown().await;
    }
}

#[tokio::test]
async fn test_two_frame_scenario() {
    let harness = Harness::lossless().await;
    let input_dir = tempfile::tempdir().unwrap();
    let input = write_input(input_dir.path(), b"ABCDEFGHIJKLMNOPQRST");
    let (_stop, shutdown) = shutdown_channel();

    let report = send_file(loopback(10, 3), harness.addr, &input, "alpha.txt", shutdown)
        .await
        .unwrap();

    assert_eq!(report.frames_acked, 2);
    assert_eq!(report.bytes_acked, 20);
    assert_eq!(report.output_path, "alpha.txt");
    assert_eq!(
        std::fs::read(harness.output("alpha.txt")).unwrap(),
        b"ABCDEFGHIJKLMNOPQRST"
    );

    let stats = harness.receiver.stats();
    assert_eq!(stats.sessions_started, 1);
    assert!(stats.bytes_written >= 20);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_empty_input_creates_empty_output() {
    let harness = Harness::lossless().await;
    let input_dir = tempfile::tempdir().unwrap();
    let input = write_input(input_dir.path(), b"");
    let (_stop, shutdown) = shutdown_channel();

    let report = send_file(loopback(64, 4), harness.addr, &input, "empty.bin", shutdown)
        .await
        .unwrap();

    assert_eq!(report.frames_acked, 0);
    assert_eq!(report.bytes_acked, 0);
    assert_eq!(std::fs::read(harness.output("empty.bin")).unwrap(), b"");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_nested_output_path_is_created_under_root() {
    let harness = Harness::lossless().await;
    let input_dir = tempfile::tempdir().unwrap();
    let data = payload(777);
    let input = write_input(input_dir.path(), &data);
    let (_stop, shutdown) = shutdown_channel();

    send_file(loopback(100, 4), harness.addr, &input, "/backup/2024/data.bin", shutdown)
        .await
        .unwrap();

    let written = std::fs::read(harness.output("backup/2024/data.bin")).unwrap();
    assert_eq!(written, data);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_clients_on_one_receiver() {
    let harness = Harness::lossless().await;
    let input_dir = tempfile::tempdir().unwrap();
    let first = payload(4000);
    let second: Vec<u8> = payload(3000).into_iter().rev().collect();

    let first_input = input_dir.path().join("first.bin");
    let second_input = input_dir.path().join("second.bin");
    std::fs::write(&first_input, &first).unwrap();
    std::fs::write(&second_input, &second).unwrap();

    let (_stop, shutdown) = shutdown_channel();
    let (a, b) = tokio::join!(
        send_file(loopback(128, 4), harness.addr, &first_input, "a.bin", shutdown.clone()),
        send_file(loopback(64, 8), harness.addr, &second_input, "b.bin", shutdown),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(std::fs::read(harness.output("a.bin")).unwrap(), first);
    assert_eq!(std::fs::read(harness.output("b.bin")).unwrap(), second);
    assert_eq!(harness.receiver.session_count(), 2);

    harness.shutdown().await;
}

/// 프레임 하나를 보내고 응답 하나를 받는다
async fn exchange(socket: &tokio::net::UdpSocket, frame: &[u8]) -> Frame {
    socket.send(frame).await.unwrap();
    let mut buf = [0u8; 64];
    let len = tokio::time::timeout(Duration::from_secs(2), socket.recv(&mut buf))
        .await
        .expect("no reply from receiver")
        .unwrap();
    Frame::decode(&buf[..len]).unwrap()
}

#[tokio::test]
async fn test_reused_source_port_replaces_previous_output() {
    let harness = Harness::lossless().await;
    let control = encode_control("out.bin").unwrap();

    let first = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let source = first.local_addr().unwrap();
    first.connect(harness.addr).await.unwrap();
    assert_eq!(exchange(&first, &control).await, Frame::ControlAck);
    assert_eq!(
        exchange(&first, &encode_data(0, b"OLDOLD", 16).unwrap()).await,
        Frame::Ack { seq: 0 }
    );
    drop(first);

    // 두 번째 전송이 같은 출발지 포트를 받은 경우
    let second = tokio::net::UdpSocket::bind(source).await.unwrap();
    second.connect(harness.addr).await.unwrap();
    assert_eq!(exchange(&second, &control).await, Frame::ControlAck);
    assert_eq!(
        exchange(&second, &encode_data(0, b"NEWNEW", 16).unwrap()).await,
        Frame::Ack { seq: 0 }
    );

    assert_eq!(std::fs::read(harness.output("out.bin")).unwrap(), b"NEWNEW");
    assert_eq!(harness.receiver.stats().sessions_started, 2);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_idle_sessions_are_evicted_by_running_receiver() {
    let harness = Harness::start_with_idle(LossSimulator::new(0), Duration::from_millis(100)).await;
    let input_dir = tempfile::tempdir().unwrap();
    let data = payload(300);
    let input = write_input(input_dir.path(), &data);
    let (_stop, shutdown) = shutdown_channel();

    send_file(loopback(100, 2), harness.addr, &input, "idle.bin", shutdown)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(harness.receiver.session_count(), 0);

    // 제거 후에도 누적 통계는 유지
    let stats = harness.receiver.stats();
    assert_eq!(stats.sessions_started, 1);
    assert_eq!(stats.bytes_written, 300);
    assert_eq!(std::fs::read(harness.output("idle.bin")).unwrap(), data);

    harness.shutdown().await;
}

// ---------------------------------------------------------------------------
// Loss
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_lossy_transfer_is_byte_identical() {
    let harness = Harness::start(LossSimulator::with_seed(30, 7)).await;
    let input_dir = tempfile::tempdir().unwrap();
    let data = payload(2000);
    let input = write_input(input_dir.path(), &data);
    let (_stop, shutdown) = shutdown_channel();

    let config = Config {
        retransmit_timeout_ms: 30,
        max_retransmissions: 500,
        ..Config::new(100, 4)
    };
    let report = send_file(config, harness.addr, &input, "lossy.bin", shutdown)
        .await
        .unwrap();

    assert_eq!(report.frames_acked, 20);
    assert!(report.stats.data_frames_sent >= 20);
    assert_eq!(report.crc32, crc32fast::hash(&data));

    // 재전송이 있었어도 출력은 정확히 한 번씩만 기록
    let written = std::fs::read(harness.output("lossy.bin")).unwrap();
    assert_eq!(written, data);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_total_loss_fails_after_retransmission_limit() {
    let harness = Harness::start(LossSimulator::new(100)).await;
    let input_dir = tempfile::tempdir().unwrap();
    let input = write_input(input_dir.path(), &payload(50));
    let (_stop, shutdown) = shutdown_channel();

    let config = Config::local_test();
    let limit = config.max_retransmissions;
    let err = send_file(config, harness.addr, &input, "never.bin", shutdown)
        .await
        .unwrap_err();

    match err {
        Error::RetransmissionLimit { peer, seq, attempts } => {
            assert_eq!(peer, harness.addr);
            assert_eq!(seq, 0);
            assert_eq!(attempts, limit);
        }
        other => panic!("unexpected error: {}", other),
    }

    // 경로 공지는 드롭되지 않으므로 출력 파일은 비어 있는 채로 존재
    assert_eq!(std::fs::read(harness.output("never.bin")).unwrap(), b"");
    assert!(harness.receiver.stats().frames_dropped > 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_peer_fails_through_retransmission_limit() {
    let closed_port = {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap()
    };
    let input_dir = tempfile::tempdir().unwrap();
    let input = write_input(input_dir.path(), &payload(10));
    let (_stop, shutdown) = shutdown_channel();

    let err = send_file(Config::local_test(), closed_port, &input, "x.bin", shutdown)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RetransmissionLimit { seq: 0, .. }));
}

// ---------------------------------------------------------------------------
// Replication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_replication_with_one_unreachable_destination() {
    let first = Harness::lossless().await;
    let second = Harness::lossless().await;
    let unreachable = {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap().port()
    };

    let input_dir = tempfile::tempdir().unwrap();
    let data = payload(3333);
    let input = write_input(input_dir.path(), &data);

    let plan = ReplicationPlan {
        config: Config {
            retransmit_timeout_ms: 100,
            max_retransmissions: 5,
            ..Config::new(256, 4)
        },
        input_path: input,
        output_path: "replica.bin".into(),
        destinations: vec![
            Destination::new("127.0.0.1", first.addr.port() as i64),
            Destination::new("127.0.0.1", unreachable as i64),
            Destination::new("127.0.0.1", second.addr.port() as i64),
        ],
    };

    let (_stop, shutdown) = shutdown_channel();
    let report = replicate(plan, shutdown).await.unwrap();

    assert_eq!(report.successes(), 2);
    assert_eq!(report.failures(), 1);
    assert!(!report.all_succeeded());
    assert!(report.outcomes[0].is_success());
    assert!(matches!(
        report.outcomes[1].result,
        Err(Error::RetransmissionLimit { .. })
    ));
    assert!(report.outcomes[2].is_success());

    for outcome in report.outcomes.iter().filter(|o| o.is_success()) {
        let session = outcome.result.as_ref().unwrap();
        assert_eq!(session.frames_acked, 14);
        assert_eq!(session.crc32, crc32fast::hash(&data));
    }

    assert_eq!(std::fs::read(first.output("replica.bin")).unwrap(), data);
    assert_eq!(std::fs::read(second.output("replica.bin")).unwrap(), data);

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn test_replication_invalid_port_only_fails_that_destination() {
    let harness = Harness::lossless().await;
    let input_dir = tempfile::tempdir().unwrap();
    let data = payload(500);
    let input = write_input(input_dir.path(), &data);

    let list = format!("127.0.0.1 80\n127.0.0.1 {}\n", harness.addr.port());
    let destinations = arqcast::replicate::parse_destinations(&list).unwrap();

    let plan = ReplicationPlan {
        config: loopback(100, 2),
        input_path: input,
        output_path: "copy.bin".into(),
        destinations,
    };

    let (_stop, shutdown) = shutdown_channel();
    let report = replicate(plan, shutdown).await.unwrap();

    assert_eq!(report.successes(), 1);
    assert!(matches!(
        report.outcomes[0].result,
        Err(Error::InvalidPort { port: 80 })
    ));
    assert_eq!(std::fs::read(harness.output("copy.bin")).unwrap(), data);

    harness.shutdown().await;
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_shutdown_cancels_in_progress_session() {
    let harness = Harness::start(LossSimulator::new(100)).await;
    let input_dir = tempfile::tempdir().unwrap();
    let input = write_input(input_dir.path(), &payload(100));
    let (stop, shutdown) = shutdown_channel();

    let config = Config {
        retransmit_timeout_ms: 50,
        max_retransmissions: 10_000,
        ..Config::new(10, 2)
    };
    let addr = harness.addr;
    let session = tokio::spawn(async move {
        send_file(config, addr, input, "cancelled.bin", shutdown).await
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    stop.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), session)
        .await
        .expect("session did not stop after shutdown")
        .unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_before_start_cancels_replication() {
    let harness = Harness::lossless().await;
    let input_dir = tempfile::tempdir().unwrap();
    let input = write_input(input_dir.path(), &payload(100));

    let (stop, shutdown) = shutdown_channel();
    stop.send(true).unwrap();

    let plan = ReplicationPlan {
        config: loopback(10, 2),
        input_path: input,
        output_path: "never.bin".into(),
        destinations: vec![Destination::new("127.0.0.1", harness.addr.port() as i64)],
    };
    let report = replicate(plan, shutdown).await.unwrap();

    assert_eq!(report.failures(), 1);
    assert!(matches!(report.outcomes[0].result, Err(Error::Cancelled)));

    harness.shutdown().await;
}
