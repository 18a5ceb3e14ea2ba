//! # arqcast
//!
//! UDP 기반 Go-Back-N 슬라이딩 윈도우 파일 전송 및 복제
//!
//! ## 핵심 특징
//! - **슬라이딩 윈도우**: 고정 크기 W만큼 ACK 없이 연속 전송
//! - **누적 ACK**: base와 같은 시퀀스의 ACK만 윈도우를 이동
//! - **패킷별 재전송 타이머**: 가장 오래된 프레임 만료 시 base부터 재전송, 횟수 제한
//! - **손실 시뮬레이션**: 수신측 확률적 드롭으로 장애 주입
//! - **팬아웃 복제**: 입력 파일 하나를 여러 수신자에게 동시에 전송

pub mod config;
pub mod error;
pub mod frame;
pub mod loss;
pub mod receiver;
pub mod replicate;
pub mod sender;
pub mod stats;

pub use config::{validate_drop_percent, validate_port, Config, ReceiverConfig};
pub use error::{Error, Result};
pub use frame::{Frame, FrameKind, Seq};
pub use loss::LossSimulator;
pub use receiver::{Receiver, ReceiverSession};
pub use replicate::{replicate, Destination, ReplicationPlan, ReplicationReport};
pub use sender::{send_file, SenderSession, SessionReport, SessionState};
pub use stats::{ReceiveStats, TransferStats};

use tokio::sync::watch;

/// 기본 MTU (DATA 프레임당 페이로드 바이트)
pub const DEFAULT_MTU: usize = 1024;

/// 기본 윈도우 크기
pub const DEFAULT_WINDOW_SIZE: usize = 4;

/// 기본 재전송 타이머 (밀리초)
pub const DEFAULT_RETRANSMIT_TIMEOUT_MS: u64 = 1000;

/// 기본 최대 재전송 횟수
pub const DEFAULT_MAX_RETRANSMISSIONS: u32 = 10;

/// UDP 페이로드 최대 크기 (IPv4)
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// 허용되는 최대 MTU
pub const MAX_MTU: usize = MAX_DATAGRAM_SIZE - frame::DATA_HEADER_LEN;

/// 종료 신호 채널 생성
///
/// `true`를 보내면 진행 중인 세션과 수신 루프가 정리 후 종료한다.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// 종료 신호가 올 때까지 대기
///
/// 송신측이 사라지면 영원히 대기한다.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
