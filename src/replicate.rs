//! 팬아웃 복제
//!
//! 목적지 목록을 한 번 읽고, 목적지마다 독립된 송신 세션을 동시에 실행한다.
//! 세션마다 자기 소켓과 자기 파일 핸들을 가지므로 읽기 커서를 공유하지 않는다.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::frame::encode_control;
use crate::sender::{SenderSession, SessionReport};
use crate::{validate_port, Config, Error, Result};

/// 복제 목적지
///
/// 포트 범위 검증과 주소 해석은 세션 시작 시 수행되어 실패가 해당 목적지에 한정된다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: i64,
    /// 목적지 목록 파일의 줄 번호 (1부터)
    pub line: usize,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: i64) -> Self {
        Self {
            host: host.into(),
            port,
            line: 0,
        }
    }

    /// 포트 검증 후 주소 해석 (IPv4 우선)
    pub async fn resolve(&self) -> Result<SocketAddr> {
        let port = validate_port(self.port)?;
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), port))
            .await
            .map_err(|e| Error::AddressResolution(format!("{}: {}", self, e)))?
            .collect();

        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| Error::AddressResolution(format!("{}: no addresses", self)))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// 목적지 목록 파싱
///
/// 한 줄에 "주소 포트" 한 쌍. 빈 줄과 `#` 주석은 건너뛴다.
/// 형식이 틀린 줄이 있거나 목록이 비어 있으면 전체가 실패한다.
pub fn parse_destinations(text: &str) -> Result<Vec<Destination>> {
    let mut destinations = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let content = raw.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }

        let tokens: Vec<&str> = content.split_whitespace().collect();
        let (host, port) = match tokens.as_slice() {
            [host, port] => (*host, *port),
            _ => {
                return Err(Error::InvalidDestination {
                    line,
                    reason: format!("expected \"address port\", got {:?}", content),
                })
            }
        };

        let port: i64 = port.parse().map_err(|_| Error::InvalidDestination {
            line,
            reason: format!("port {:?} is not an integer", port),
        })?;

        destinations.push(Destination {
            host: host.to_string(),
            port,
            line,
        });
    }

    if destinations.is_empty() {
        return Err(Error::EmptyDestinationList);
    }
    Ok(destinations)
}

/// 목적지 목록 파일 읽기
pub async fn load_destinations(path: impl AsRef<Path>) -> Result<Vec<Destination>> {
    let text = tokio::fs::read_to_string(path.as_ref()).await?;
    parse_destinations(&text)
}

/// 복제 계획 (실행 중 불변)
#[derive(Debug, Clone)]
pub struct ReplicationPlan {
    /// 모든 목적지가 공유하는 MTU / 윈도우 / 타이머
    pub config: Config,
    pub input_path: PathBuf,
    pub output_path: String,
    pub destinations: Vec<Destination>,
}

/// 목적지 하나의 결과
#[derive(Debug)]
pub struct DestinationOutcome {
    pub destination: Destination,
    pub result: Result<SessionReport>,
}

impl DestinationOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// 복제 결과 (목적지 목록 순서)
#[derive(Debug)]
pub struct ReplicationReport {
    pub outcomes: Vec<DestinationOutcome>,
}

impl ReplicationReport {
    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.len() - self.successes()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures() == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "Destinations: {} | Succeeded: {} | Failed: {}",
            self.outcomes.len(),
            self.successes(),
            self.failures()
        )
    }
}

/// 입력 파일을 모든 목적지로 동시에 복제
///
/// 목록이 비었거나 설정/입력 파일이 잘못되면 세션 시작 전에 에러를 반환한다.
/// 그 외의 실패는 해당 목적지의 결과로만 기록된다.
pub async fn replicate(
    plan: ReplicationPlan,
    shutdown: watch::Receiver<bool>,
) -> Result<ReplicationReport> {
    if plan.destinations.is_empty() {
        return Err(Error::EmptyDestinationList);
    }
    plan.config.validate()?;
    encode_control(&plan.output_path)?;
    // 읽을 수 없는 입력은 전체 실패
    drop(tokio::fs::File::open(&plan.input_path).await?);

    info!(
        "replicating {:?} -> {:?} to {} destinations (mtu={}, window={})",
        plan.input_path,
        plan.output_path,
        plan.destinations.len(),
        plan.config.mtu,
        plan.config.window_size
    );

    let mut tasks = JoinSet::new();
    for (index, destination) in plan.destinations.iter().cloned().enumerate() {
        let config = plan.config.clone();
        let input_path = plan.input_path.clone();
        let output_path = plan.output_path.clone();
        let shutdown = shutdown.clone();

        tasks.spawn(async move {
            let result =
                run_destination(&destination, config, &input_path, output_path, shutdown).await;
            (index, result)
        });
    }

    let mut results: Vec<Option<Result<SessionReport>>> =
        plan.destinations.iter().map(|_| None).collect();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, result)) => results[index] = Some(result),
            Err(e) => warn!("replication task aborted: {}", e),
        }
    }

    let outcomes = plan
        .destinations
        .into_iter()
        .zip(results)
        .map(|(destination, result)| DestinationOutcome {
            destination,
            result: result.unwrap_or(Err(Error::ChannelError)),
        })
        .collect();

    let report = ReplicationReport { outcomes };
    info!("replication finished: {}", report.summary());
    Ok(report)
}

async fn run_destination(
    destination: &Destination,
    config: Config,
    input_path: &Path,
    output_path: String,
    shutdown: watch::Receiver<bool>,
) -> Result<SessionReport> {
    let result = async {
        let peer = destination.resolve().await?;
        info!(destination = %destination, peer = %peer, "replication session starting");
        let session = SenderSession::connect(config, peer, input_path, output_path).await?;
        session.run(shutdown).await
    }
    .await;

    if let Err(e) = &result {
        warn!(destination = %destination, line = destination.line, "destination failed: {}", e);
    }
    result
}
