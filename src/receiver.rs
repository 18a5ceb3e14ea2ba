//! 수신자
//!
//! - 피어 주소별 세션 (DashMap), 단일 recv 루프에서 직렬 처리
//! - 첫 프레임으로 출력 경로 학습, 이후 프레임은 손실 시뮬레이터를 거친다
//! - 순서대로 도착한 DATA만 기록, 재전송 중복은 ACK만 다시 보낸다

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::frame::{decode_control, encode_ack, encode_control_ack, Frame, FrameKind, Seq};
use crate::loss::LossSimulator;
use crate::stats::ReceiveStats;
use crate::{wait_for_shutdown, Error, ReceiverConfig, Result};

/// 수신 세션 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverPhase {
    /// 첫 프레임(CONTROL) 대기
    AwaitingPath,

    /// DATA 처리 중
    Processing,
}

/// 프레임 처리 결과 (I/O는 서버가 수행)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameAction {
    /// 출력 파일 생성/truncate 후 CONTROL-ACK
    Begin { path: PathBuf },

    /// 출력 파일에 append 후 ACK
    Append {
        path: PathBuf,
        seq: Seq,
        payload: Bytes,
    },

    /// 이미 기록된 시퀀스, ACK만 재전송
    Ack { seq: Seq },

    /// 중복 CONTROL, CONTROL-ACK만 재전송
    ControlAck,

    /// 손실 시뮬레이터가 버림 (ACK 없음)
    Drop { kind: Option<FrameKind> },

    /// 처리하지 않음
    Ignore,
}

/// 피어 하나에 대한 수신 세션 상태
#[derive(Debug)]
pub struct ReceiverSession {
    peer: SocketAddr,
    phase: ReceiverPhase,
    announced: Option<String>,
    output_path: Option<PathBuf>,
    /// 다음에 기록할 DATA 시퀀스
    expected: Seq,
    /// 수신 프레임 카운터
    frames: u64,
    /// 마지막 데이터그램 수신 시각
    last_seen: Instant,
    stats: ReceiveStats,
}

impl ReceiverSession {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            phase: ReceiverPhase::AwaitingPath,
            announced: None,
            output_path: None,
            expected: 0,
            frames: 0,
            last_seen: Instant::now(),
            stats: ReceiveStats::default(),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn phase(&self) -> ReceiverPhase {
        self.phase
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    pub fn expected(&self) -> Seq {
        self.expected
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn stats(&self) -> &ReceiveStats {
        &self.stats
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// `now` 기준으로 `timeout` 이상 데이터그램이 없었는지
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) >= timeout
    }

    /// 데이터그램 하나 처리
    ///
    /// 첫 프레임은 단계 상태로 CONTROL로 취급하며 손실 시뮬레이터를 거치지 않는다.
    pub fn on_datagram(
        &mut self,
        datagram: &[u8],
        root: &Path,
        loss: &mut LossSimulator,
    ) -> FrameAction {
        self.stats.frames_received += 1;
        self.last_seen = Instant::now();
        let n = self.frames;
        self.frames += 1;

        if self.phase == ReceiverPhase::AwaitingPath {
            return match decode_control(datagram) {
                Ok(path) => self.begin(path, root),
                Err(e) => {
                    warn!(peer = %self.peer, frame = n, "first frame rejected: {}", e);
                    self.stats.malformed_frames += 1;
                    FrameAction::Ignore
                }
            };
        }

        if loss.should_drop() {
            self.stats.frames_dropped += 1;
            return FrameAction::Drop {
                kind: FrameKind::of(datagram),
            };
        }

        match Frame::decode(datagram) {
            Ok(Frame::Data { seq, payload }) => self.on_data(seq, payload),
            Ok(Frame::Control { path }) => {
                // 송신자는 CONTROL-ACK 이후에만 DATA를 보내므로 기록 이후의 CONTROL은 새 전송
                if self.expected == 0 && self.announced.as_deref() == Some(path.as_str()) {
                    debug!(peer = %self.peer, frame = n, "duplicate CONTROL, re-acknowledging");
                    FrameAction::ControlAck
                } else {
                    info!(peer = %self.peer, path = %path, "new announcement, restarting session");
                    self.begin(path, root)
                }
            }
            Ok(other) => {
                debug!(peer = %self.peer, kind = %other.kind(), "unexpected frame on receiver");
                FrameAction::Ignore
            }
            Err(e) => {
                debug!(peer = %self.peer, frame = n, "malformed frame: {}", e);
                self.stats.malformed_frames += 1;
                FrameAction::Ignore
            }
        }
    }

    fn begin(&mut self, announced: String, root: &Path) -> FrameAction {
        let path = match resolve_output_path(root, &announced) {
            Ok(path) => path,
            Err(e) => {
                warn!(peer = %self.peer, "rejected announced path {:?}: {}", announced, e);
                self.stats.malformed_frames += 1;
                return FrameAction::Ignore;
            }
        };

        self.phase = ReceiverPhase::Processing;
        self.announced = Some(announced);
        self.output_path = Some(path.clone());
        self.expected = 0;
        self.stats.sessions_started += 1;
        FrameAction::Begin { path }
    }

    fn on_data(&mut self, seq: Seq, payload: Bytes) -> FrameAction {
        if seq == self.expected {
            match &self.output_path {
                Some(path) => FrameAction::Append {
                    path: path.clone(),
                    seq,
                    payload,
                },
                None => FrameAction::Ignore,
            }
        } else if seq < self.expected {
            self.stats.duplicate_frames += 1;
            debug!(peer = %self.peer, seq, expected = self.expected, "duplicate DATA, not written");
            FrameAction::Ack { seq }
        } else {
            self.stats.out_of_order_frames += 1;
            debug!(peer = %self.peer, seq, expected = self.expected, "DATA ahead of expected, discarded");
            FrameAction::Ignore
        }
    }

    /// append 성공 후 호출
    pub fn mark_written(&mut self, seq: Seq, len: usize) {
        if seq == self.expected {
            self.expected += 1;
            self.stats.bytes_written += len as u64;
        }
    }

    /// 출력 파일 준비 실패 시 처음 상태로
    pub fn reset(&mut self) {
        self.phase = ReceiverPhase::AwaitingPath;
        self.announced = None;
        self.output_path = None;
        self.expected = 0;
    }
}

/// 공지된 경로를 루트 디렉토리 아래로 해석
///
/// 절대 경로는 루트 기준으로 바뀌고 `..`는 거부된다.
pub fn resolve_output_path(root: &Path, announced: &str) -> Result<PathBuf> {
    let mut resolved = root.to_path_buf();
    let mut has_name = false;

    for component in Path::new(announced).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                has_name = true;
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                return Err(Error::InvalidPath(format!(
                    "{:?} escapes the root directory",
                    announced
                )))
            }
        }
    }

    if !has_name {
        return Err(Error::InvalidPath(format!("{:?} names no file", announced)));
    }
    Ok(resolved)
}

/// 수신 서버
pub struct Receiver {
    config: ReceiverConfig,
    socket: UdpSocket,
    local: SocketAddr,
    sessions: DashMap<SocketAddr, ReceiverSession>,
    /// 제거된 세션들의 통계 합계
    retired: Mutex<ReceiveStats>,
    loss: Mutex<LossSimulator>,
}

impl Receiver {
    /// 설정 검증, 루트 디렉토리 생성, 소켓 바인딩
    pub async fn bind(config: ReceiverConfig) -> Result<Self> {
        let loss = LossSimulator::new(config.drop_percent);
        Self::bind_with_loss(config, loss).await
    }

    /// 손실 시뮬레이터를 직접 지정 (시드 고정 테스트용)
    pub async fn bind_with_loss(config: ReceiverConfig, loss: LossSimulator) -> Result<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.root_dir).await?;

        let socket = UdpSocket::bind(SocketAddr::new(config.bind_ip, config.port)).await?;
        let local = socket.local_addr()?;

        Ok(Self {
            config,
            socket,
            local,
            sessions: DashMap::new(),
            retired: Mutex::new(ReceiveStats::default()),
            loss: Mutex::new(loss),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// 피어 세션의 출력 경로
    pub fn session_output(&self, peer: &SocketAddr) -> Option<PathBuf> {
        self.sessions
            .get(peer)
            .and_then(|session| session.output_path().map(Path::to_path_buf))
    }

    /// 전체 세션 통계 합계 (제거된 세션 포함)
    pub fn stats(&self) -> ReceiveStats {
        let mut total = self.retired.lock().clone();
        for session in self.sessions.iter() {
            total.absorb(session.stats());
        }
        total
    }

    /// 유휴 세션 제거, 제거한 수를 반환
    ///
    /// 제거된 세션의 통계는 합계에 남는다.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let timeout = self.config.session_idle_timeout;
        let mut evicted = 0;

        self.sessions.retain(|peer, session| {
            if !session.is_idle(now, timeout) {
                return true;
            }
            self.retired.lock().absorb(session.stats());
            evicted += 1;
            debug!(local = %self.local, peer = %peer, frames = session.frames(), "idle session evicted");
            false
        });

        if evicted > 0 {
            info!(local = %self.local, evicted, remaining = self.sessions.len(), "idle sessions evicted");
        }
        evicted
    }

    /// 수신 루프, 종료 신호까지 실행
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let mut sweep = interval(self.config.session_idle_timeout);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "arqcast receiver listening on {} (drop {}%, root {:?})",
            self.local_addr()?,
            self.config.drop_percent,
            self.config.root_dir
        );

        loop {
            tokio::select! {
                res = self.socket.recv_from(&mut buf) => {
                    match res {
                        Ok((len, peer)) => self.handle_datagram(&buf[..len], peer).await,
                        Err(e) => warn!("수신 에러: {}", e),
                    }
                }
                _ = sweep.tick() => {
                    self.evict_idle(Instant::now());
                }
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("receiver shutting down: {}", self.stats().summary());
                    return Ok(());
                }
            }
        }
    }

    async fn handle_datagram(&self, datagram: &[u8], peer: SocketAddr) {
        let (action, frame_no) = {
            let mut session = self
                .sessions
                .entry(peer)
                .or_insert_with(|| ReceiverSession::new(peer));
            let mut loss = self.loss.lock();
            let action = session.on_datagram(datagram, &self.config.root_dir, &mut loss);
            (action, session.frames().saturating_sub(1))
        };

        match action {
            FrameAction::Begin { path } => match prepare_output(&path).await {
                Ok(()) => {
                    info!(local = %self.local, peer = %peer, kind = "CONTROL", frame = frame_no, path = %path.display(), "session started");
                    self.reply(&encode_control_ack(), peer).await;
                }
                Err(e) => {
                    warn!(peer = %peer, "출력 파일 준비 실패 {:?}: {}", path, e);
                    if let Some(mut session) = self.sessions.get_mut(&peer) {
                        session.reset();
                    }
                }
            },

            FrameAction::Append { path, seq, payload } => {
                match append_output(&path, &payload).await {
                    Ok(()) => {
                        if let Some(mut session) = self.sessions.get_mut(&peer) {
                            session.mark_written(seq, payload.len());
                        }
                        info!(local = %self.local, peer = %peer, kind = "DATA", frame = frame_no, seq, len = payload.len(), "frame written");
                        self.reply(&encode_ack(seq), peer).await;
                        info!(local = %self.local, peer = %peer, kind = "ACK", seq, "frame sent");
                    }
                    Err(e) => warn!(peer = %peer, seq, "출력 파일 기록 실패 {:?}: {}", path, e),
                }
            }

            FrameAction::Ack { seq } => {
                self.reply(&encode_ack(seq), peer).await;
                info!(local = %self.local, peer = %peer, kind = "ACK", seq, "duplicate re-acknowledged");
            }

            FrameAction::ControlAck => {
                self.reply(&encode_control_ack(), peer).await;
            }

            FrameAction::Drop { kind } => {
                let label = kind.map(|k| k.as_str()).unwrap_or("UNKNOWN");
                info!(local = %self.local, peer = %peer, kind = label, frame = frame_no, "DROP {}", label);
            }

            FrameAction::Ignore => {}
        }
    }

    async fn reply(&self, frame: &[u8], peer: SocketAddr) {
        if let Err(e) = self.socket.send_to(frame, peer).await {
            warn!(peer = %peer, "응답 전송 실패: {}", e);
        }
    }
}

/// 출력 파일 생성 또는 truncate
async fn prepare_output(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = tokio::fs::File::create(path).await?;
    file.sync_all().await?;
    Ok(())
}

/// 프레임마다 열고, 붙이고, 닫는다
async fn append_output(path: &Path, payload: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(payload).await?;
    file.flush().await?;
    Ok(())
}
