//! MQTT 回放工具
//!
//! 读取事件日志，按时间戳排序后以原始（或按 `--speed` 缩放的）间隔重新发布。

use clap::Parser;
use mqtt_replay_rs::config::{
    BrokerConfig, DEFAULT_BROKER_HOST, DEFAULT_BROKER_PORT, DEFAULT_LOG_DIR, ReplayConfig,
};
use mqtt_replay_rs::error::{ConfigError, ReplayError};
use mqtt_replay_rs::replay::{ReplayOutcome, replay_log};
use mqtt_replay_rs::transport::MqttClient;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "mqtt_sender", about = "按原始时间间隔回放事件日志中的 MQTT 消息")]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = DEFAULT_BROKER_HOST)]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = DEFAULT_BROKER_PORT)]
    port: u16,

    /// 事件日志；默认取 `--log-dir` 中最新的 `mqtt_messages_*.json`
    #[arg(long)]
    log: Option<PathBuf>,

    #[arg(long, env = "MQTT_LOG_DIR", default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    /// 速度倍数：>1 加速，<1 减速
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    #[arg(long, env = "MQTT_CLIENT_ID")]
    client_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum SenderError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Replay(#[from] ReplayError),
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("收到 Ctrl-C，停止回放");
            child.cancel();
        }
    });
    token
}

async fn run(args: Args) -> Result<(), SenderError> {
    let mut broker = BrokerConfig::default();
    broker.host = args.broker.clone();
    broker.port = args.port;
    if let Some(id) = &args.client_id {
        broker.client_id = id.clone();
    }

    let config = match &args.log {
        Some(path) => ReplayConfig::new(broker, path.clone(), args.speed)?,
        None => ReplayConfig::from_latest(broker, &args.log_dir, args.speed)?,
    };
    let log_path = config.log_path.clone();
    info!(log = %log_path.display(), speed = config.speed_factor, "使用日志文件");

    let mut client = MqttClient::new(config.broker.clone());
    let cancel = cancel_on_ctrl_c();
    match replay_log(config, &mut client, &cancel).await {
        Ok(ReplayOutcome::Completed { published }) => {
            println!("done: published={published}");
            Ok(())
        }
        Ok(ReplayOutcome::Cancelled { published, total }) => {
            println!("cancelled: published={published}, total={total}");
            Ok(())
        }
        Err(e) if !e.is_fatal() => {
            warn!(error = %e, "没有可回放的消息");
            println!("no messages: {}", log_path.display());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
