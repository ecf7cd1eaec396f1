use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod commands;
mod shutdown;

use app::{Application, StoreBackend};
use serpfarm_core::AppConfig;
use shutdown::ShutdownManager;

fn cli() -> Command {
    let device_arg = Arg::new("device")
        .long("device")
        .value_name("DEVICE")
        .help("设备类型")
        .value_parser(["desktop", "mobile", "tablet"])
        .default_value("desktop");
    let operator_arg = Arg::new("by")
        .long("by")
        .value_name("WHO")
        .help("操作人标识，写入审计字段")
        .default_value("cli");

    Command::new("serpfarm")
        .version("1.0.0")
        .about("SERP浏览器农场的任务调度与调试会话系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("store")
                .long("store")
                .value_name("BACKEND")
                .help("任务存储后端")
                .value_parser(["postgres", "memory"])
                .default_value("postgres"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
        .subcommand_required(true)
        .subcommand(Command::new("run").about("启动Worker进程"))
        .subcommand(
            Command::new("list")
                .about("列出任务")
                .arg(
                    Arg::new("status")
                        .long("status")
                        .value_name("STATUS")
                        .help("按状态过滤: pending/running/completed/failed"),
                )
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .value_name("N")
                        .help("返回数量上限")
                        .default_value("20"),
                ),
        )
        .subcommand(
            Command::new("enable-debug")
                .about("为任务打开调试模式")
                .arg(Arg::new("task_id").required(true))
                .arg(device_arg.clone())
                .arg(operator_arg.clone()),
        )
        .subcommand(
            Command::new("disable-debug")
                .about("关闭任务的调试模式并停止会话")
                .arg(Arg::new("task_id").required(true))
                .arg(operator_arg.clone()),
        )
        .subcommand(
            Command::new("restart-debug")
                .about("重置任务为 pending 并重新进入调试模式")
                .arg(Arg::new("task_id").required(true))
                .arg(device_arg.clone())
                .arg(operator_arg),
        )
        .subcommand(Command::new("sessions").about("列出活跃的调试会话"))
        .subcommand(
            Command::new("cleanup")
                .about("强制回收所有调试会话")
                .arg(
                    Arg::new("reason")
                        .long("reason")
                        .value_name("R")
                        .default_value("manual_cleanup"),
                ),
        )
        .subcommand(
            Command::new("create-parse")
                .about("创建SERP解析任务")
                .arg(Arg::new("keyword").required(true))
                .arg(device_arg.clone())
                .arg(
                    Arg::new("pages")
                        .long("pages")
                        .value_name("N")
                        .default_value("10"),
                )
                .arg(
                    Arg::new("region")
                        .long("region")
                        .value_name("CODE")
                        .default_value("213"),
                ),
        )
        .subcommand(
            Command::new("create-warmup")
                .about("创建Profile暖场任务")
                .arg(device_arg),
        )
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    if let Err(e) = run(&matches).await {
        error!("{e:#}");
        eprintln!("错误: {e:#}");
        std::process::exit(1);
    }
}

async fn run(matches: &ArgMatches) -> Result<()> {
    let log_level = matches.get_one::<String>("log-level").unwrap();
    let log_format = matches.get_one::<String>("log-format").unwrap();
    init_logging(log_level, log_format)?;

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let config = AppConfig::load(config_path).context("加载配置失败")?;
    config.validate().context("配置验证失败")?;

    let backend = match matches.get_one::<String>("store").unwrap().as_str() {
        "memory" => StoreBackend::Memory,
        _ => StoreBackend::Postgres,
    };

    let app = Application::new(config, backend).await?;

    match matches.subcommand() {
        Some(("run", _)) => run_worker(app).await,
        Some(("list", sub)) => {
            let status = sub.get_one::<String>("status").map(String::as_str);
            let limit: i64 = sub
                .get_one::<String>("limit")
                .unwrap()
                .parse()
                .context("--limit 必须是整数")?;
            commands::list_tasks(&app, status, limit).await
        }
        Some(("enable-debug", sub)) => {
            commands::enable_debug(
                &app,
                sub.get_one::<String>("task_id").unwrap(),
                sub.get_one::<String>("device").unwrap(),
                sub.get_one::<String>("by").unwrap(),
            )
            .await
        }
        Some(("disable-debug", sub)) => {
            commands::disable_debug(
                &app,
                sub.get_one::<String>("task_id").unwrap(),
                sub.get_one::<String>("by").unwrap(),
            )
            .await
        }
        Some(("restart-debug", sub)) => {
            commands::restart_debug(
                &app,
                sub.get_one::<String>("task_id").unwrap(),
                sub.get_one::<String>("device").unwrap(),
                sub.get_one::<String>("by").unwrap(),
            )
            .await
        }
        Some(("sessions", _)) => commands::show_sessions(&app).await,
        Some(("cleanup", sub)) => {
            commands::cleanup_sessions(&app, sub.get_one::<String>("reason").unwrap()).await
        }
        Some(("create-parse", sub)) => {
            let pages: u32 = sub
                .get_one::<String>("pages")
                .unwrap()
                .parse()
                .context("--pages 必须是整数")?;
            commands::create_parse_task(
                &app,
                sub.get_one::<String>("keyword").unwrap(),
                sub.get_one::<String>("device").unwrap(),
                pages,
                sub.get_one::<String>("region").unwrap(),
            )
            .await
        }
        Some(("create-warmup", sub)) => {
            commands::create_warmup_task(&app, sub.get_one::<String>("device").unwrap()).await
        }
        _ => unreachable!("subcommand required"),
    }
}

async fn run_worker(app: Application) -> Result<()> {
    info!("启动SERP农场Worker");

    let shutdown_manager = ShutdownManager::new();

    let worker_handle = {
        let app = std::sync::Arc::new(app);
        let app_clone = std::sync::Arc::clone(&app);
        let shutdown = std::sync::Arc::new(shutdown_manager);

        let shutdown_for_worker = std::sync::Arc::clone(&shutdown);
        let handle = tokio::spawn(async move {
            if let Err(e) = app_clone.run_worker(&shutdown_for_worker).await {
                error!("Worker运行失败: {e:#}");
            }
        });

        wait_for_shutdown_signal().await;
        info!("收到关闭信号，开始优雅关闭...");
        shutdown.shutdown().await;
        handle
    };

    match tokio::time::timeout(Duration::from_secs(30), worker_handle).await {
        Ok(result) => {
            if let Err(e) = result {
                error!("Worker关闭时发生错误: {e}");
            } else {
                info!("Worker已优雅关闭");
            }
        }
        Err(_) => {
            warn!("Worker关闭超时，强制退出");
        }
    }

    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("安装Ctrl+C信号处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("安装SIGTERM信号处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
