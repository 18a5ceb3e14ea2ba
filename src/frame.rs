//! 와이어 프레임 코덱
//!
//! 모든 프레임은 1바이트 태그로 시작한다. 정수는 big-endian.
//!
//! ```text
//! CONTROL     : 0x01 | path bytes | 0x00
//! DATA        : 0x02 | seq (u32)  | payload (<= MTU)
//! ACK         : 0x03 | seq (u32)
//! CONTROL-ACK : 0x04
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result, MAX_DATAGRAM_SIZE};

/// 세션 내 DATA 시퀀스 번호 (0부터 시작, 세션마다 독립)
pub type Seq = u32;

/// DATA 프레임 헤더 길이 (tag + seq)
pub const DATA_HEADER_LEN: usize = 1 + 4;

/// ACK 프레임 길이
pub const ACK_FRAME_LEN: usize = 1 + 4;

/// 프레임 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// 출력 경로 공지
    Control = 0x01,

    /// 파일 데이터
    Data = 0x02,

    /// DATA 확인 응답
    Ack = 0x03,

    /// CONTROL 확인 응답
    ControlAck = 0x04,
}

impl FrameKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(FrameKind::Control),
            0x02 => Some(FrameKind::Data),
            0x03 => Some(FrameKind::Ack),
            0x04 => Some(FrameKind::ControlAck),
            _ => None,
        }
    }

    /// 데이터그램 첫 바이트로 종류 판별 (드롭 로그용)
    pub fn of(datagram: &[u8]) -> Option<Self> {
        datagram.first().copied().and_then(Self::from_tag)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Control => "CONTROL",
            FrameKind::Data => "DATA",
            FrameKind::Ack => "ACK",
            FrameKind::ControlAck => "CONTROL-ACK",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 디코딩된 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Control { path: String },
    Data { seq: Seq, payload: Bytes },
    Ack { seq: Seq },
    ControlAck,
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Control { .. } => FrameKind::Control,
            Frame::Data { .. } => FrameKind::Data,
            Frame::Ack { .. } => FrameKind::Ack,
            Frame::ControlAck => FrameKind::ControlAck,
        }
    }

    /// 데이터그램 하나를 프레임으로 디코딩
    pub fn decode(datagram: &[u8]) -> Result<Frame> {
        let mut buf = datagram;
        if !buf.has_remaining() {
            return Err(Error::MalformedFrame("empty datagram".into()));
        }

        let tag = buf.get_u8();
        let kind = FrameKind::from_tag(tag)
            .ok_or_else(|| Error::MalformedFrame(format!("unknown tag 0x{:02X}", tag)))?;

        match kind {
            FrameKind::Control => Ok(Frame::Control {
                path: parse_path(buf)?,
            }),
            FrameKind::Data => {
                if buf.remaining() < 4 {
                    return Err(Error::MalformedFrame("truncated DATA header".into()));
                }
                let seq = buf.get_u32();
                Ok(Frame::Data {
                    seq,
                    payload: Bytes::copy_from_slice(buf),
                })
            }
            FrameKind::Ack => {
                if buf.remaining() != 4 {
                    return Err(Error::MalformedFrame(format!(
                        "ACK body must be 4 bytes, got {}",
                        buf.remaining()
                    )));
                }
                Ok(Frame::Ack { seq: buf.get_u32() })
            }
            FrameKind::ControlAck => {
                if buf.has_remaining() {
                    return Err(Error::MalformedFrame("CONTROL-ACK carries a body".into()));
                }
                Ok(Frame::ControlAck)
            }
        }
    }
}

/// CONTROL 프레임 인코딩
pub fn encode_control(path: &str) -> Result<Bytes> {
    if path.is_empty() {
        return Err(Error::InvalidPath("announced path is empty".into()));
    }
    if path.as_bytes().contains(&0) {
        return Err(Error::InvalidPath(format!("{:?} contains NUL", path)));
    }
    let len = 1 + path.len() + 1;
    if len > MAX_DATAGRAM_SIZE {
        return Err(Error::InvalidPath(format!(
            "announced path too long: {} bytes",
            path.len()
        )));
    }

    let mut buf = BytesMut::with_capacity(len);
    buf.put_u8(FrameKind::Control as u8);
    buf.put_slice(path.as_bytes());
    buf.put_u8(0);
    Ok(buf.freeze())
}

/// DATA 프레임 인코딩
///
/// payload가 MTU보다 크면 `FrameTooLarge`.
pub fn encode_data(seq: Seq, payload: &[u8], mtu: usize) -> Result<Bytes> {
    if payload.len() > mtu {
        return Err(Error::FrameTooLarge {
            len: payload.len(),
            mtu,
        });
    }

    let mut buf = BytesMut::with_capacity(DATA_HEADER_LEN + payload.len());
    buf.put_u8(FrameKind::Data as u8);
    buf.put_u32(seq);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// ACK 프레임 인코딩
pub fn encode_ack(seq: Seq) -> Bytes {
    let mut buf = BytesMut::with_capacity(ACK_FRAME_LEN);
    buf.put_u8(FrameKind::Ack as u8);
    buf.put_u32(seq);
    buf.freeze()
}

/// CONTROL-ACK 프레임 인코딩
pub fn encode_control_ack() -> Bytes {
    Bytes::from_static(&[FrameKind::ControlAck as u8])
}

/// 세션의 첫 프레임을 CONTROL로 디코딩
///
/// 수신측은 프레임 내용이 아닌 세션 단계로 첫 프레임을 판별하므로
/// 다른 태그가 오면 에러로 돌려준다.
pub fn decode_control(datagram: &[u8]) -> Result<String> {
    match datagram.split_first() {
        Some((&tag, body)) if tag == FrameKind::Control as u8 => parse_path(body),
        Some((&tag, _)) => Err(Error::MalformedFrame(format!(
            "expected CONTROL as first frame, got tag 0x{:02X}",
            tag
        ))),
        None => Err(Error::MalformedFrame("empty datagram".into())),
    }
}

fn parse_path(body: &[u8]) -> Result<String> {
    let (last, path) = body
        .split_last()
        .ok_or_else(|| Error::MalformedFrame("empty CONTROL body".into()))?;
    if *last != 0 {
        return Err(Error::MalformedFrame("CONTROL path is not NUL-terminated".into()));
    }
    if path.is_empty() || path.contains(&0) {
        return Err(Error::MalformedFrame("CONTROL path is empty or has inner NUL".into()));
    }
    String::from_utf8(path.to_vec())
        .map_err(|_| Error::MalformedFrame("CONTROL path is not UTF-8".into()))
}
