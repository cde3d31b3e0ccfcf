//! MQTT 捕获工具
//!
//! 订阅 channel，把每条消息带时间戳追加到事件日志；Ctrl-C 时做最后一次保存后退出。

use chrono::Local;
use clap::Parser;
use mqtt_replay_rs::capture::CaptureRecorder;
use mqtt_replay_rs::config::{
    BrokerConfig, CaptureConfig, DEFAULT_BROKER_HOST, DEFAULT_BROKER_PORT, DEFAULT_CHANNEL,
    DEFAULT_LOG_DIR,
};
use mqtt_replay_rs::error::{CaptureError, ConfigError};
use mqtt_replay_rs::transport::MqttClient;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "mqtt_sniffer", about = "捕获 MQTT 消息并保存为带时间戳的事件日志")]
struct Args {
    /// Broker 主机名
    #[arg(long, env = "MQTT_BROKER", default_value = DEFAULT_BROKER_HOST)]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = DEFAULT_BROKER_PORT)]
    port: u16,

    /// 订阅的 channel，可重复；支持 `+`/`#` 通配符
    #[arg(long = "topic", env = "MQTT_TOPICS", value_delimiter = ',', default_value = DEFAULT_CHANNEL)]
    topics: Vec<String>,

    /// 输出文件；默认 `<log-dir>/mqtt_messages_<YYYYmmdd_HHMMSS>.json`
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, env = "MQTT_LOG_DIR", default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    /// MQTT keep-alive（秒），0 为关闭
    #[arg(long, default_value_t = 60)]
    keep_alive_secs: u64,

    #[arg(long, env = "MQTT_CLIENT_ID")]
    client_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum SnifferError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Capture(#[from] CaptureError),
}

fn broker_config(args: &Args) -> BrokerConfig {
    let mut broker = BrokerConfig::default();
    broker.host = args.broker.clone();
    broker.port = args.port;
    broker.keep_alive = Duration::from_secs(args.keep_alive_secs);
    if let Some(id) = &args.client_id {
        broker.client_id = id.clone();
    }
    broker
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("收到 Ctrl-C，停止捕获");
            child.cancel();
        }
    });
    token
}

async fn run(args: Args) -> Result<(), SnifferError> {
    let broker = broker_config(&args);
    let config = match &args.output {
        Some(path) => CaptureConfig::new(broker, args.topics.clone(), path.clone())?,
        None => CaptureConfig::with_default_output(
            broker,
            args.topics.clone(),
            &args.log_dir,
            Local::now(),
        )?,
    };

    let mut client = MqttClient::new(config.broker.clone());
    let mut recorder = CaptureRecorder::new(config)?;
    info!(output = %recorder.output().display(), "日志文件");

    let summary = recorder.run(&mut client, cancel_on_ctrl_c()).await?;
    println!(
        "captured: records={}, persist_failures={}, output={}",
        summary.records,
        summary.persist_failures,
        summary.output.display()
    );
    Ok(())
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
