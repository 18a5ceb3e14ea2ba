//! 송신 세션
//!
//! - 목적지 하나에 대한 Go-Back-N 슬라이딩 윈도우 전송
//! - 패킷별 재전송 데드라인, 누적 ACK (base와 같은 ACK만 윈도우 이동)
//! - ACK / 타이머 / 종료 신호를 하나의 `select!`에서 대기

use std::collections::VecDeque;
use std::io::{self, SeekFrom};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, info, warn};

use crate::frame::{encode_control, encode_data, Frame, Seq};
use crate::stats::TransferStats;
use crate::{wait_for_shutdown, Config, Error, Result};

/// 송신 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// CONTROL 프레임 전송 및 CONTROL-ACK 대기
    Announcing,

    /// 윈도우 채우기
    Sending,

    /// ACK 또는 타이머 대기
    WaitingAcks,

    /// 입력 소진 + 모든 프레임 ACK 완료
    Done,

    /// 재전송 한도 초과 또는 전송 에러
    Failed,

    /// 종료 신호로 중단
    Cancelled,
}

/// 전송 후 ACK를 기다리는 프레임
#[derive(Debug, Clone, Copy)]
struct InFlight {
    seq: Seq,
    len: usize,
    deadline: Instant,
}

/// 송신 윈도우 (I/O 없음)
///
/// ```text
///  base            next
///   │               │
/// ──┼───────────────┼──────────▶ seq
///   │<─ in flight ─>│<─ sendable (base + W까지) ─>
/// ```
#[derive(Debug)]
pub struct SendWindow {
    base: Seq,
    next: Seq,
    window_size: u32,
    in_flight: VecDeque<InFlight>,
}

impl SendWindow {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.clamp(1, u32::MAX as usize) as u32;
        Self {
            base: 0,
            next: 0,
            window_size,
            in_flight: VecDeque::with_capacity(window_size.min(1024) as usize),
        }
    }

    /// 가장 오래된 미확인 시퀀스
    pub fn base(&self) -> Seq {
        self.base
    }

    /// 다음에 전송할 시퀀스
    pub fn next(&self) -> Seq {
        self.next
    }

    /// 윈도우 상한 (base + W), 로그용
    pub fn limit(&self) -> u64 {
        self.base as u64 + self.window_size as u64
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn can_send(&self) -> bool {
        self.next - self.base < self.window_size
    }

    /// 모든 전송 프레임이 ACK됨
    pub fn is_drained(&self) -> bool {
        self.base == self.next
    }

    /// 방금 보낸 프레임을 기록하고 next를 증가. 할당된 시퀀스를 반환.
    pub fn push(&mut self, len: usize, deadline: Instant) -> Result<Seq> {
        debug_assert!(self.can_send(), "push on a full window");
        let seq = self.next;
        self.next = seq
            .checked_add(1)
            .ok_or_else(|| Error::InvalidConfig("sequence space exhausted".into()))?;
        self.in_flight.push_back(InFlight { seq, len, deadline });
        Ok(seq)
    }

    /// 누적 ACK 처리
    ///
    /// `seq == base`일 때만 base를 1 증가시키고 확인된 페이로드 길이를 반환한다.
    /// 그 외의 ACK는 윈도우를 움직이지 않는다.
    pub fn on_ack(&mut self, seq: Seq) -> Option<usize> {
        if seq != self.base || self.is_drained() {
            return None;
        }
        let entry = self.in_flight.pop_front()?;
        debug_assert_eq!(entry.seq, seq);
        self.base += 1;
        Some(entry.len)
    }

    /// 가장 오래된 미확인 프레임의 재전송 데드라인
    pub fn oldest_deadline(&self) -> Option<Instant> {
        self.in_flight.front().map(|entry| entry.deadline)
    }

    /// base부터 다시 전송하도록 되감기
    pub fn go_back(&mut self) {
        self.next = self.base;
        self.in_flight.clear();
    }
}

/// 세션 종료 보고
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// 목적지 주소
    pub peer: SocketAddr,

    /// 공지한 출력 경로
    pub output_path: String,

    /// ACK 완료 프레임 수 (완료 시 base == next)
    pub frames_acked: Seq,

    /// ACK 완료 바이트
    pub bytes_acked: u64,

    /// 재전송 타이머 만료 횟수
    pub retransmissions: u32,

    /// 전송한 입력 전체의 CRC32
    pub crc32: u32,

    /// 세부 통계
    pub stats: TransferStats,
}

impl SessionReport {
    pub fn elapsed(&self) -> Duration {
        self.stats.elapsed()
    }
}

/// 목적지 하나에 대한 송신 세션
///
/// 소켓과 입력 파일 핸들을 독점한다. 세션이 끝나면 둘 다 닫힌다.
pub struct SenderSession {
    config: Config,
    socket: UdpSocket,
    local: SocketAddr,
    peer: SocketAddr,
    input: File,
    output_path: String,
    window: SendWindow,
    state: SessionState,
    exhausted: bool,
    retransmissions: u32,
    /// 한 번이라도 전송된 적 없는 첫 시퀀스
    high_water: Seq,
    hasher: crc32fast::Hasher,
    stats: TransferStats,
    read_buf: Vec<u8>,
    recv_buf: Vec<u8>,
}

impl SenderSession {
    /// 설정 검증, 입력 파일 열기, 소켓 바인딩 및 connect
    pub async fn connect(
        config: Config,
        peer: SocketAddr,
        input_path: impl AsRef<Path>,
        output_path: impl Into<String>,
    ) -> Result<Self> {
        config.validate()?;
        let output_path = output_path.into();
        // 경로 검증만 수행, 실제 프레임은 announce에서 만든다
        encode_control(&output_path)?;

        let input = File::open(input_path.as_ref()).await?;

        let bind_addr: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(peer).await?;
        let local = socket.local_addr()?;

        debug!(
            "세션 생성: local={}, peer={}, mtu={}, window={}",
            local,
            peer,
            config.mtu,
            config.window_size
        );

        Ok(Self {
            window: SendWindow::new(config.window_size),
            read_buf: vec![0u8; config.mtu],
            recv_buf: vec![0u8; config.recv_buffer_size.max(64)],
            config,
            socket,
            local,
            peer,
            input,
            output_path,
            state: SessionState::Announcing,
            exhausted: false,
            retransmissions: 0,
            high_water: 0,
            hasher: crc32fast::Hasher::new(),
            stats: TransferStats::new(),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 세션 실행
    ///
    /// 완료되면 보고서를, 실패하거나 취소되면 에러를 반환한다.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<SessionReport> {
        let result = self.drive(&mut shutdown).await;

        match &result {
            Ok(()) => {
                self.state = SessionState::Done;
                info!(
                    peer = %self.peer,
                    frames = self.window.base(),
                    retransmissions = self.retransmissions,
                    "transfer complete: {}",
                    self.stats.summary()
                );
            }
            Err(Error::Cancelled) => {
                self.state = SessionState::Cancelled;
                info!(peer = %self.peer, base = self.window.base(), "transfer cancelled");
            }
            Err(e) => {
                self.state = SessionState::Failed;
                warn!(peer = %self.peer, base = self.window.base(), "transfer failed: {}", e);
            }
        }

        result.map(|()| self.report())
    }

    fn report(&self) -> SessionReport {
        SessionReport {
            peer: self.peer,
            output_path: self.output_path.clone(),
            frames_acked: self.window.base(),
            bytes_acked: self.stats.bytes_acked,
            retransmissions: self.retransmissions,
            crc32: self.hasher.clone().finalize(),
            stats: self.stats.clone(),
        }
    }

    async fn drive(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        if *shutdown.borrow() {
            return Err(Error::Cancelled);
        }

        self.state = SessionState::Announcing;
        self.announce(shutdown).await?;

        loop {
            self.state = SessionState::Sending;
            self.fill_window().await?;

            if self.exhausted && self.window.is_drained() {
                return Ok(());
            }

            self.state = SessionState::WaitingAcks;
            self.wait_for_event(shutdown).await?;
        }
    }

    /// CONTROL 전송 후 CONTROL-ACK 대기, 타임아웃마다 재전송
    async fn announce(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let frame = encode_control(&self.output_path)?;

        loop {
            self.send_datagram(&frame).await?;
            info!(local = %self.local, peer = %self.peer, kind = "CONTROL", path = %self.output_path, "frame sent");

            let deadline = Instant::now() + self.config.retransmit_timeout();
            loop {
                tokio::select! {
                    res = self.socket.recv(&mut self.recv_buf) => {
                        match res {
                            Ok(len) => match Frame::decode(&self.recv_buf[..len]) {
                                Ok(Frame::ControlAck) => {
                                    info!(peer = %self.peer, kind = "CONTROL-ACK", "announce acknowledged");
                                    return Ok(());
                                }
                                Ok(other) => debug!(peer = %self.peer, kind = %other.kind(), "ignored while announcing"),
                                Err(e) => debug!(peer = %self.peer, "malformed frame: {}", e),
                            },
                            Err(e) if is_soft_error(&e) => {
                                debug!(peer = %self.peer, "peer unreachable: {}", e);
                            }
                            Err(e) => return Err(e.into()),
                        }
                    }
                    _ = sleep_until(deadline) => break,
                    _ = wait_for_shutdown(shutdown) => return Err(Error::Cancelled),
                }
            }

            self.stats.timeouts += 1;
            self.register_retransmission(0)?;
            warn!(
                peer = %self.peer,
                kind = "CONTROL",
                attempt = self.retransmissions,
                "announce timed out, resending"
            );
        }
    }

    /// 윈도우에 여유가 있고 입력이 남아 있는 동안 DATA 전송
    async fn fill_window(&mut self) -> Result<()> {
        let mtu = self.config.mtu;

        while self.window.can_send() && !self.exhausted {
            let len = read_chunk(&mut self.input, &mut self.read_buf[..mtu]).await?;
            if len == 0 {
                self.exhausted = true;
                debug!(peer = %self.peer, next = self.window.next(), "input exhausted");
                break;
            }

            let seq = self.window.next();
            let payload = &self.read_buf[..len];
            let retransmit = seq < self.high_water;
            if seq == self.high_water {
                self.hasher.update(payload);
                self.high_water += 1;
            }

            let frame = encode_data(seq, payload, mtu)?;
            self.send_datagram(&frame).await?;

            let deadline = Instant::now() + self.config.retransmit_timeout();
            self.window.push(len, deadline)?;
            self.stats.record_send(len, retransmit);

            info!(
                local = %self.local,
                peer = %self.peer,
                kind = "DATA",
                seq,
                base = self.window.base(),
                next = self.window.next(),
                limit = self.window.limit(),
                len,
                retransmit,
                "frame sent"
            );
        }

        Ok(())
    }

    /// ACK, 가장 오래된 데드라인, 종료 신호 중 먼저 오는 것 하나를 처리
    async fn wait_for_event(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let deadline = match self.window.oldest_deadline() {
            Some(deadline) => deadline,
            None => return Ok(()),
        };

        tokio::select! {
            res = self.socket.recv(&mut self.recv_buf) => {
                match res {
                    Ok(len) => {
                        self.handle_datagram(len);
                        Ok(())
                    }
                    Err(e) if is_soft_error(&e) => {
                        debug!(peer = %self.peer, "peer unreachable: {}", e);
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            _ = sleep_until(deadline) => self.on_timeout().await,
            _ = wait_for_shutdown(shutdown) => Err(Error::Cancelled),
        }
    }

    fn handle_datagram(&mut self, len: usize) {
        match Frame::decode(&self.recv_buf[..len]) {
            Ok(Frame::Ack { seq }) => self.on_ack(seq),
            Ok(Frame::ControlAck) => {
                debug!(peer = %self.peer, kind = "CONTROL-ACK", "duplicate announce ack")
            }
            Ok(other) => debug!(peer = %self.peer, kind = %other.kind(), "unexpected frame"),
            Err(e) => debug!(peer = %self.peer, "malformed frame: {}", e),
        }
    }

    fn on_ack(&mut self, seq: Seq) {
        let acked = self.window.on_ack(seq);
        self.stats.record_ack(acked);

        match acked {
            Some(_) => info!(
                local = %self.local,
                peer = %self.peer,
                kind = "ACK",
                seq,
                base = self.window.base(),
                next = self.window.next(),
                limit = self.window.limit(),
                "window advanced"
            ),
            None => info!(
                local = %self.local,
                peer = %self.peer,
                kind = "ACK",
                seq,
                base = self.window.base(),
                next = self.window.next(),
                limit = self.window.limit(),
                "ack ignored, not window base"
            ),
        }
    }

    /// base 프레임의 타이머 만료: 입력을 base 위치로 되감고 윈도우를 다시 채운다
    async fn on_timeout(&mut self) -> Result<()> {
        let seq = self.window.base();
        self.stats.timeouts += 1;
        self.register_retransmission(seq)?;

        warn!(
            local = %self.local,
            peer = %self.peer,
            kind = "TIMEOUT",
            seq,
            base = self.window.base(),
            next = self.window.next(),
            limit = self.window.limit(),
            attempt = self.retransmissions,
            "retransmission timer expired, going back to base"
        );

        let offset = seq as u64 * self.config.mtu as u64;
        self.input.seek(SeekFrom::Start(offset)).await?;
        self.window.go_back();
        self.exhausted = false;
        Ok(())
    }

    fn register_retransmission(&mut self, seq: Seq) -> Result<()> {
        self.retransmissions += 1;
        if self.retransmissions >= self.config.max_retransmissions {
            self.state = SessionState::Failed;
            return Err(Error::RetransmissionLimit {
                peer: self.peer,
                seq,
                attempts: self.retransmissions,
            });
        }
        Ok(())
    }

    async fn send_datagram(&self, frame: &[u8]) -> Result<()> {
        match self.socket.send(frame).await {
            Ok(_) => Ok(()),
            // 이전 전송에 대한 ICMP unreachable, 손실로 취급
            Err(e) if is_soft_error(&e) => {
                debug!(peer = %self.peer, "send reported unreachable peer: {}", e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// 단일 목적지 전송
pub async fn send_file(
    config: Config,
    peer: SocketAddr,
    input_path: impl AsRef<Path>,
    output_path: impl Into<String>,
    shutdown: watch::Receiver<bool>,
) -> Result<SessionReport> {
    let session = SenderSession::connect(config, peer, input_path, output_path).await?;
    session.run(shutdown).await
}

/// MTU만큼 채우거나 EOF까지 읽기
///
/// 청크 경계가 항상 `seq * MTU`에 맞아야 되감기가 정확하다.
async fn read_chunk(input: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = input.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn is_soft_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}
