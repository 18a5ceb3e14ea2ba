//! arqcast 클라이언트 (송신자)
//!
//! Go-Back-N 슬라이딩 윈도우로 파일 하나를 수신 서버에 전송한다.
//! `--servers`를 주면 목록의 모든 서버에 동시에 복제한다.
//!
//! 사용법:
//!   cargo run --release --bin arqcast-client -- [OPTIONS]
//!
//! 예시:
//!   # 단일 전송
//!   cargo run --release --bin arqcast-client -- --server 127.0.0.1 --port 9000 \
//!       --mtu 1024 --window 8 --input data.bin --output backup/data.bin
//!
//!   # 복제
//!   cargo run --release --bin arqcast-client -- --servers servers.txt \
//!       --mtu 512 --window 4 --input data.bin --output data.bin

use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use arqcast::replicate::load_destinations;
use arqcast::{
    replicate, send_file, shutdown_channel, validate_port, Config, Destination, Error,
    ReplicationPlan, Result,
};

/// 전송 대상
enum Target {
    Single(Destination),
    List(PathBuf),
}

/// 클라이언트 설정
struct ClientConfig {
    target: Target,
    input_path: PathBuf,
    output_path: String,
    config: Config,
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| Error::InvalidConfig(format!("{} requires a value", flag)))
}

fn number<T: std::str::FromStr>(raw: &str, flag: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::InvalidConfig(format!("{} expects a number, got {:?}", flag, raw)))
}

fn print_usage() {
    println!(
        r#"arqcast client - Go-Back-N 파일 전송 / 복제

사용법:
  arqcast-client --server <ADDR> --port <PORT> --mtu <N> --window <N> --input <PATH> --output <PATH>
  arqcast-client --servers <FILE> --mtu <N> --window <N> --input <PATH> --output <PATH>

옵션:
  -s, --server <ADDR>            수신 서버 주소
  -p, --port <PORT>              수신 서버 포트 (1024-65535)
      --servers <FILE>           복제 대상 목록 (한 줄에 "주소 포트")
  -m, --mtu <N>                  DATA 프레임당 최대 페이로드 (기본: 1024)
  -w, --window <N>               윈도우 크기 (기본: 4)
  -i, --input <PATH>             보낼 로컬 파일
  -o, --output <PATH>            서버 루트 기준 출력 경로
      --timeout-ms <MS>          재전송 타이머 (기본: 1000)
      --max-retransmissions <N>  세션당 재전송 한도 (기본: 10)
  -h, --help                     이 도움말 출력

로그 레벨은 RUST_LOG로 조절한다 (기본: info).
"#
    );
}

fn parse_args() -> Result<ClientConfig> {
    let args: Vec<String> = std::env::args().collect();

    let mut server: Option<String> = None;
    let mut port: Option<i64> = None;
    let mut servers: Option<PathBuf> = None;
    let mut input: Option<PathBuf> = None;
    let mut output: Option<String> = None;
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--server" | "-s" => {
                server = Some(value(&args, i, flag)?.to_string());
                i += 1;
            }
            "--port" | "-p" => {
                port = Some(number(value(&args, i, flag)?, flag)?);
                i += 1;
            }
            "--servers" => {
                servers = Some(PathBuf::from(value(&args, i, flag)?));
                i += 1;
            }
            "--mtu" | "-m" => {
                config.mtu = number(value(&args, i, flag)?, flag)?;
                i += 1;
            }
            "--window" | "-w" => {
                config.window_size = number(value(&args, i, flag)?, flag)?;
                i += 1;
            }
            "--input" | "-i" => {
                input = Some(PathBuf::from(value(&args, i, flag)?));
                i += 1;
            }
            "--output" | "-o" => {
                output = Some(value(&args, i, flag)?.to_string());
                i += 1;
            }
            "--timeout-ms" => {
                config.retransmit_timeout_ms = number(value(&args, i, flag)?, flag)?;
                i += 1;
            }
            "--max-retransmissions" => {
                config.max_retransmissions = number(value(&args, i, flag)?, flag)?;
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                return Err(Error::InvalidConfig(format!("unknown option {:?}", other)));
            }
        }
        i += 1;
    }

    let target = match (server, port, servers) {
        (Some(host), Some(port), None) => {
            validate_port(port)?;
            Target::Single(Destination::new(host, port))
        }
        (None, None, Some(list)) => Target::List(list),
        (None, None, None) => {
            return Err(Error::InvalidConfig(
                "either --server/--port or --servers is required".into(),
            ))
        }
        (_, _, Some(_)) => {
            return Err(Error::InvalidConfig(
                "--servers cannot be combined with --server/--port".into(),
            ))
        }
        _ => {
            return Err(Error::InvalidConfig(
                "--server and --port must be given together".into(),
            ))
        }
    };

    config.validate()?;

    Ok(ClientConfig {
        target,
        input_path: input.ok_or_else(|| Error::InvalidConfig("--input is required".into()))?,
        output_path: output.ok_or_else(|| Error::InvalidConfig("--output is required".into()))?,
        config,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    // 로깅 설정
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let client_config = match parse_args() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("arqcast-client: {}", e);
            eprintln!("try --help for usage");
            return ExitCode::from(2);
        }
    };

    match run(client_config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            if e.is_config_error() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

/// 전송 실행. 모든 목적지가 성공하면 `true`.
async fn run(client_config: ClientConfig) -> Result<bool> {
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping transfers");
            let _ = shutdown_tx.send(true);
        }
    });

    let ClientConfig {
        target,
        input_path,
        output_path,
        config,
    } = client_config;

    info!("arqcast client starting...");
    info!("MTU: {} bytes, window: {}", config.mtu, config.window_size);
    info!(
        "Retransmit timeout: {}ms, limit: {}",
        config.retransmit_timeout_ms, config.max_retransmissions
    );

    match target {
        Target::Single(destination) => {
            let peer = destination.resolve().await?;
            info!("Sending {:?} to {} as {:?}", input_path, peer, output_path);

            let report = send_file(config, peer, &input_path, output_path, shutdown_rx).await?;

            info!("Transfer complete!");
            info!("  Frames: {}", report.frames_acked);
            info!("  Bytes: {}", report.bytes_acked);
            info!("  Retransmissions: {}", report.retransmissions);
            info!("  CRC32: {:08x}", report.crc32);
            info!("  {}", report.stats.summary());
            Ok(true)
        }
        Target::List(list) => {
            let destinations = load_destinations(&list).await?;
            info!("Loaded {} destinations from {:?}", destinations.len(), list);

            let plan = ReplicationPlan {
                config,
                input_path,
                output_path,
                destinations,
            };
            let report = replicate(plan, shutdown_rx).await?;

            for outcome in &report.outcomes {
                match &outcome.result {
                    Ok(session) => info!(
                        "  {} ok: {} frames, {} bytes, {} retransmissions, crc32 {:08x}",
                        outcome.destination,
                        session.frames_acked,
                        session.bytes_acked,
                        session.retransmissions,
                        session.crc32
                    ),
                    Err(e) => warn!("  {} failed: {}", outcome.destination, e),
                }
            }
            info!("{}", report.summary());
            Ok(report.all_succeeded())
        }
    }
}
