//! 전송 통계

use std::time::{Duration, Instant};

/// 송신 세션 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 전송한 DATA 프레임 수 (재전송 포함)
    pub data_frames_sent: u64,

    /// 재전송된 DATA 프레임 수
    pub retransmitted_frames: u64,

    /// 재전송 타이머 만료 횟수
    pub timeouts: u64,

    /// 수신한 ACK 수
    pub acks_received: u64,

    /// base가 아니어서 무시된 ACK 수
    pub ignored_acks: u64,

    /// 전송 바이트 (재전송 포함)
    pub bytes_sent: u64,

    /// ACK 확인된 바이트
    pub bytes_acked: u64,

    /// 마지막 ACK 시간
    pub last_ack_time: Option<Instant>,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            data_frames_sent: 0,
            retransmitted_frames: 0,
            timeouts: 0,
            acks_received: 0,
            ignored_acks: 0,
            bytes_sent: 0,
            bytes_acked: 0,
            last_ack_time: None,
        }
    }

    pub fn record_send(&mut self, len: usize, retransmit: bool) {
        self.data_frames_sent += 1;
        self.bytes_sent += len as u64;
        if retransmit {
            self.retransmitted_frames += 1;
        }
    }

    pub fn record_ack(&mut self, acked_len: Option<usize>) {
        self.acks_received += 1;
        self.last_ack_time = Some(Instant::now());
        match acked_len {
            Some(len) => self.bytes_acked += len as u64,
            None => self.ignored_acks += 1,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 실효 처리율 (bytes/sec, ACK 기준)
    pub fn effective_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_acked as f64 / elapsed
    }

    /// 재전송 비율
    pub fn retransmit_ratio(&self) -> f64 {
        if self.data_frames_sent == 0 {
            return 0.0;
        }
        self.retransmitted_frames as f64 / self.data_frames_sent as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Frames: {} (retx {}) | ACKs: {} (ignored {}) | Acked: {} bytes | Throughput: {:.2} KB/s | Timeouts: {}",
            self.elapsed().as_secs_f64(),
            self.data_frames_sent,
            self.retransmitted_frames,
            self.acks_received,
            self.ignored_acks,
            self.bytes_acked,
            self.effective_throughput() / 1_000.0,
            self.timeouts,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 수신측 통계
#[derive(Debug, Clone, Default)]
pub struct ReceiveStats {
    /// 수신 프레임 수 (드롭 포함)
    pub frames_received: u64,

    /// 손실 시뮬레이터가 버린 프레임 수
    pub frames_dropped: u64,

    /// 이미 기록된 시퀀스의 재전송 프레임
    pub duplicate_frames: u64,

    /// 기대 시퀀스보다 앞선 프레임
    pub out_of_order_frames: u64,

    /// 디코딩 실패 프레임
    pub malformed_frames: u64,

    /// 출력 파일에 기록한 바이트
    pub bytes_written: u64,

    /// 시작된 세션 수
    pub sessions_started: u64,
}

impl ReceiveStats {
    /// 다른 세션 통계 합산
    pub fn absorb(&mut self, other: &ReceiveStats) {
        self.frames_received += other.frames_received;
        self.frames_dropped += other.frames_dropped;
        self.duplicate_frames += other.duplicate_frames;
        self.out_of_order_frames += other.out_of_order_frames;
        self.malformed_frames += other.malformed_frames;
        self.bytes_written += other.bytes_written;
        self.sessions_started += other.sessions_started;
    }

    /// 관측된 드롭 비율
    pub fn drop_rate(&self) -> f64 {
        if self.frames_received == 0 {
            return 0.0;
        }
        self.frames_dropped as f64 / self.frames_received as f64
    }

    pub fn summary(&self) -> String {
        format!(
            "Sessions: {} | Frames: {} | Dropped: {} ({:.1}%) | Duplicates: {} | Out-of-order: {} | Written: {} bytes",
            self.sessions_started,
            self.frames_received,
            self.frames_dropped,
            self.drop_rate() * 100.0,
            self.duplicate_frames,
            self.out_of_order_frames,
            self.bytes_written,
        )
    }
}
