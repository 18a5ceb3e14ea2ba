//! 에러 타입 정의

use std::net::SocketAddr;

use thiserror::Error;

/// arqcast 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("유효하지 않은 포트: {port} (허용 범위 1024-65535)")]
    InvalidPort { port: i64 },

    #[error("유효하지 않은 MTU: {mtu} (허용 범위 1-{max})")]
    InvalidMtu { mtu: usize, max: usize },

    #[error("유효하지 않은 윈도우 크기: {0} (최소 1)")]
    InvalidWindow(usize),

    #[error("유효하지 않은 드롭 비율: {0} (허용 범위 0-100)")]
    InvalidDropPercent(i64),

    #[error("설정 에러: {0}")]
    InvalidConfig(String),

    #[error("유효하지 않은 경로: {0}")]
    InvalidPath(String),

    #[error("프레임 크기 초과: payload {len} bytes > MTU {mtu}")]
    FrameTooLarge { len: usize, mtu: usize },

    #[error("잘못된 프레임: {0}")]
    MalformedFrame(String),

    #[error("목적지 목록 {line}번째 줄 파싱 실패: {reason}")]
    InvalidDestination { line: usize, reason: String },

    #[error("목적지 목록이 비어 있음")]
    EmptyDestinationList,

    #[error("주소 해석 실패: {0}")]
    AddressResolution(String),

    #[error("최대 재전송 횟수 초과: peer={peer}, seq={seq}, attempts={attempts}")]
    RetransmissionLimit {
        peer: SocketAddr,
        seq: u32,
        attempts: u32,
    },

    #[error("전송 취소됨")]
    Cancelled,

    #[error("채널 에러")]
    ChannelError,
}

impl Error {
    /// 네트워크 활동 이전에 보고되어야 하는 설정 에러인지 여부
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidPort { .. }
                | Error::InvalidMtu { .. }
                | Error::InvalidWindow(_)
                | Error::InvalidDropPercent(_)
                | Error::InvalidConfig(_)
                | Error::InvalidDestination { .. }
                | Error::EmptyDestinationList
        )
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
