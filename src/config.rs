//! 전송 설정

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::{
    Error, Result, DEFAULT_MAX_RETRANSMISSIONS, DEFAULT_MTU, DEFAULT_RETRANSMIT_TIMEOUT_MS,
    DEFAULT_WINDOW_SIZE, MAX_MTU,
};

/// 가장 작은 비-well-known 포트
pub const MIN_PORT: i64 = 1024;

/// 가장 큰 포트
pub const MAX_PORT: i64 = 65535;

/// 수신 세션 유휴 제거 기본값 (초)
pub const DEFAULT_SESSION_IDLE_TIMEOUT_SECS: u64 = 300;

/// 송신 세션 설정
///
/// 복제 모드에서는 모든 목적지가 같은 설정을 공유한다.
#[derive(Debug, Clone)]
pub struct Config {
    /// DATA 프레임당 최대 페이로드 (바이트)
    pub mtu: usize,

    /// 동시에 ACK 대기 가능한 DATA 프레임 수 (W)
    pub window_size: usize,

    /// 재전송 타이머 (밀리초)
    pub retransmit_timeout_ms: u64,

    /// 세션당 최대 재전송 횟수, 도달하면 세션 실패
    pub max_retransmissions: u32,

    /// 수신 버퍼 크기
    pub recv_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            window_size: DEFAULT_WINDOW_SIZE,
            retransmit_timeout_ms: DEFAULT_RETRANSMIT_TIMEOUT_MS,
            max_retransmissions: DEFAULT_MAX_RETRANSMISSIONS,
            recv_buffer_size: 64 * 1024,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new(mtu: usize, window_size: usize) -> Self {
        Self {
            mtu,
            window_size,
            ..Self::default()
        }
    }

    /// 루프백 테스트용 설정 (짧은 타이머)
    pub fn local_test() -> Self {
        Self {
            retransmit_timeout_ms: 50,
            max_retransmissions: 5,
            ..Self::default()
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            mtu: 512,
            window_size: 8,
            retransmit_timeout_ms: 2000,
            max_retransmissions: 50,
            recv_buffer_size: 64 * 1024,
        }
    }

    /// 재전송 타이머 Duration
    pub fn retransmit_timeout(&self) -> Duration {
        Duration::from_millis(self.retransmit_timeout_ms)
    }

    /// 설정 검증
    ///
    /// 소켓을 만들기 전에 호출되어야 한다.
    pub fn validate(&self) -> Result<()> {
        if self.mtu == 0 || self.mtu > MAX_MTU {
            return Err(Error::InvalidMtu {
                mtu: self.mtu,
                max: MAX_MTU,
            });
        }
        if self.window_size == 0 {
            return Err(Error::InvalidWindow(self.window_size));
        }
        if self.window_size > u32::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "window_size {} exceeds sequence space",
                self.window_size
            )));
        }
        if self.retransmit_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "retransmit_timeout_ms must be positive".into(),
            ));
        }
        if self.max_retransmissions == 0 {
            return Err(Error::InvalidConfig(
                "max_retransmissions must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// 수신 서버 설정
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// 바인드 IP
    pub bind_ip: IpAddr,

    /// 수신 포트 (0이면 OS 할당, 테스트 전용)
    pub port: u16,

    /// 손실 시뮬레이션 드롭 비율 (0 ~ 100)
    pub drop_percent: u8,

    /// 공지된 출력 경로가 해석되는 루트 디렉토리
    pub root_dir: PathBuf,

    /// 이 시간 동안 데이터그램이 없는 세션은 맵에서 제거
    pub session_idle_timeout: Duration,

    /// 수신 버퍼 크기
    pub recv_buffer_size: usize,
}

impl ReceiverConfig {
    pub fn new(port: u16, drop_percent: u8, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            drop_percent,
            root_dir: root_dir.into(),
            session_idle_timeout: Duration::from_secs(DEFAULT_SESSION_IDLE_TIMEOUT_SECS),
            recv_buffer_size: 64 * 1024,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_drop_percent(self.drop_percent as i64)?;
        if self.root_dir.as_os_str().is_empty() {
            return Err(Error::InvalidPath("root directory is empty".into()));
        }
        if self.session_idle_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "session_idle_timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// 포트 검증: well-known 포트(0-1023)와 범위 밖 값을 거부
pub fn validate_port(port: i64) -> Result<u16> {
    if !(MIN_PORT..=MAX_PORT).contains(&port) {
        return Err(Error::InvalidPort { port });
    }
    Ok(port as u16)
}

/// 드롭 비율 검증 (0-100)
pub fn validate_drop_percent(percent: i64) -> Result<u8> {
    if !(0..=100).contains(&percent) {
        return Err(Error::InvalidDropPercent(percent));
    }
    Ok(percent as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_validation() {
        assert!(validate_port(0).is_err());
        assert!(validate_port(80).is_err());
        assert!(validate_port(1023).is_err());
        assert!(validate_port(-1).is_err());
        assert!(validate_port(65536).is_err());

        assert_eq!(validate_port(1024).unwrap(), 1024);
        assert_eq!(validate_port(65535).unwrap(), 65535);
    }

    #[test]
    fn test_drop_percent_validation() {
        assert!(validate_drop_percent(-1).is_err());
        assert!(validate_drop_percent(101).is_err());
        assert_eq!(validate_drop_percent(0).unwrap(), 0);
        assert_eq!(validate_drop_percent(100).unwrap(), 100);
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::local_test().validate().is_ok());
        assert!(Config::unstable_network().validate().is_ok());

        assert!(matches!(
            Config::new(0, 4).validate(),
            Err(Error::InvalidMtu { .. })
        ));
        assert!(matches!(
            Config::new(MAX_MTU + 1, 4).validate(),
            Err(Error::InvalidMtu { .. })
        ));
        assert!(matches!(
            Config::new(10, 0).validate(),
            Err(Error::InvalidWindow(0))
        ));
        assert!(Config::new(1, 1).validate().is_ok());
    }

    #[test]
    fn test_receiver_config_validation() {
        let config = ReceiverConfig::new(9000, 10, "/tmp/arqcast");
        assert!(config.validate().is_ok());
        assert_eq!(
            config.session_idle_timeout,
            Duration::from_secs(DEFAULT_SESSION_IDLE_TIMEOUT_SECS)
        );

        let mut idle = config.clone();
        idle.session_idle_timeout = Duration::ZERO;
        assert!(matches!(idle.validate(), Err(Error::InvalidConfig(_))));

        let mut root = config;
        root.root_dir = PathBuf::new();
        assert!(matches!(root.validate(), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn test_config_errors_are_classified() {
        let err = Config::new(10, 0).validate().unwrap_err();
        assert!(err.is_config_error());
        assert!(!Error::Cancelled.is_config_error());
    }
}
