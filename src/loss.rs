//! 손실 시뮬레이터
//!
//! 수신측이 프레임을 처리하기 전에 확률적으로 버린다. 장애 주입 테스트 전용.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// `drop_percent / 100` 확률로 true (스레드 전역 난수원 사용)
pub fn should_drop(drop_percent: u8) -> bool {
    roll(&mut rand::thread_rng(), drop_percent)
}

fn roll<R: Rng + ?Sized>(rng: &mut R, drop_percent: u8) -> bool {
    match drop_percent {
        0 => false,
        p if p >= 100 => true,
        p => rng.gen_range(0..100u8) < p,
    }
}

/// 수신 서버가 소유하는 손실 게이트
#[derive(Debug)]
pub struct LossSimulator {
    drop_percent: u8,
    rng: StdRng,
}

impl LossSimulator {
    /// OS 엔트로피로 시드
    pub fn new(drop_percent: u8) -> Self {
        Self {
            drop_percent,
            rng: StdRng::from_entropy(),
        }
    }

    /// 재현 가능한 테스트용
    pub fn with_seed(drop_percent: u8, seed: u64) -> Self {
        Self {
            drop_percent,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn drop_percent(&self) -> u8 {
        self.drop_percent
    }

    pub fn should_drop(&mut self) -> bool {
        roll(&mut self.rng, self.drop_percent)
    }
}
