//! arqcast 서버 (수신자)
//!
//! 클라이언트마다 공지된 출력 파일에 DATA를 순서대로 이어 쓰고 ACK한다.
//! `--drop`으로 수신 프레임을 확률적으로 버려 손실을 흉내낸다.
//!
//! 사용법:
//!   cargo run --release --bin arqcast-server -- --port 9000 --drop 10 --root ./received

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use arqcast::{
    shutdown_channel, validate_drop_percent, validate_port, Error, Receiver, ReceiverConfig,
    Result,
};

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| Error::InvalidConfig(format!("{} requires a value", flag)))
}

fn integer(raw: &str, flag: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| Error::InvalidConfig(format!("{} expects an integer, got {:?}", flag, raw)))
}

fn parse_args() -> Result<ReceiverConfig> {
    let args: Vec<String> = std::env::args().collect();

    let mut port: Option<u16> = None;
    let mut drop_percent = 0u8;
    let mut root_dir = PathBuf::from(".");
    let mut idle_timeout: Option<Duration> = None;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--port" | "-p" => {
                port = Some(validate_port(integer(value(&args, i, flag)?, flag)?)?);
                i += 1;
            }
            "--drop" | "-d" => {
                drop_percent = validate_drop_percent(integer(value(&args, i, flag)?, flag)?)?;
                i += 1;
            }
            "--root" | "-r" => {
                root_dir = PathBuf::from(value(&args, i, flag)?);
                i += 1;
            }
            "--idle-timeout" => {
                let secs = integer(value(&args, i, flag)?, flag)?;
                if secs <= 0 {
                    return Err(Error::InvalidConfig(format!(
                        "{} must be positive, got {}",
                        flag, secs
                    )));
                }
                idle_timeout = Some(Duration::from_secs(secs as u64));
                i += 1;
            }
            "--help" | "-h" => {
                println!(
                    r#"arqcast server - Go-Back-N 파일 수신

사용법:
  arqcast-server --port <PORT> --drop <0-100> --root <DIR>

옵션:
  -p, --port <PORT>     수신 포트 (1024-65535)
  -d, --drop <0-100>    수신 프레임 드롭 비율 % (기본: 0)
  -r, --root <DIR>      출력 파일 루트 디렉토리 (기본: .)
      --idle-timeout <SECS>  유휴 세션 제거 시간 (기본: 300)
  -h, --help            이 도움말 출력

로그 레벨은 RUST_LOG로 조절한다 (기본: info).
"#
                );
                std::process::exit(0);
            }
            other => {
                return Err(Error::InvalidConfig(format!("unknown option {:?}", other)));
            }
        }
        i += 1;
    }

    let port = port.ok_or_else(|| Error::InvalidConfig("--port is required".into()))?;
    let mut config = ReceiverConfig::new(port, drop_percent, root_dir);
    if let Some(idle) = idle_timeout {
        config.session_idle_timeout = idle;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    // 로깅 설정
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match parse_args() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("arqcast-server: {}", e);
            eprintln!("try --help for usage");
            return ExitCode::from(2);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ReceiverConfig) -> Result<()> {
    info!("arqcast server starting...");
    info!("Port: {}", config.port);
    info!("Drop rate: {}%", config.drop_percent);
    info!("Root directory: {:?}", config.root_dir);
    info!("Session idle timeout: {}s", config.session_idle_timeout.as_secs());

    let receiver = Receiver::bind(config).await?;

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    receiver.run(shutdown_rx).await?;

    let stats = receiver.stats();
    info!("Sessions seen: {}", receiver.session_count());
    info!("{}", stats.summary());
    Ok(())
}
