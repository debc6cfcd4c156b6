use anyhow::{bail, Context};
use clap::Parser;
use mappack_tasks::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

/// 汇总行刷新的防抖窗口
const SUMMARY_DEBOUNCE: Duration = Duration::from_millis(200);

// mappack 命令行参数
#[derive(Parser, Debug)]
#[command(version, about = "Download map tiles for a region, one task per kind and zoom level", long_about = None)]
struct Args {
    /// 配置文件路径 (不存在时使用默认配置)
    #[arg(short, long, default_value_t = String::from("./mappack.toml"))]
    config: String,
    /// 区域西边界经度
    #[arg(long, allow_hyphen_values = true)]
    west: f64,
    /// 区域南边界纬度
    #[arg(long, allow_hyphen_values = true)]
    south: f64,
    /// 区域东边界经度
    #[arg(long, allow_hyphen_values = true)]
    east: f64,
    /// 区域北边界纬度
    #[arg(long, allow_hyphen_values = true)]
    north: f64,
    /// 瓦片类型 img|vec，可重复指定
    #[arg(short, long = "kind")]
    kinds: Vec<TileKind>,
    /// 缩放级别，可重复指定
    #[arg(short, long = "level")]
    levels: Vec<u8>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::load(&args.config).with_context(|| format!("加载配置失败: {}", args.config))?;

    let region = Region::from_bounds(
        LngLat::new(args.west, args.south),
        LngLat::new(args.east, args.north),
    );
    if !region.is_valid() {
        bail!("无效区域: 东北角必须位于西南角的东北方向");
    }

    let downloader = Arc::new(HttpDownloader::from_config(&config.downloader)?);
    let controller = TaskController::new(config.controller.clone(), downloader);
    controller.select_region(region).await;
    println!("📡 下载服务: {}", config.downloader.base_url);

    // 先订阅，避免漏掉第一批事件
    let mut events = controller.subscribe();

    let outcomes = controller.start_batch(&args.kinds, &args.levels).await?;
    let mut started = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(id) => {
                started += 1;
                println!("✅ {} 级别 {}: 任务 {}", outcome.kind, outcome.level, id);
            }
            Err(e) => println!("❌ {} 级别 {}: {}", outcome.kind, outcome.level, e),
        }
    }
    if started == 0 {
        bail!("没有任务启动成功");
    }

    let printer = Debounce::new(print_summary, SUMMARY_DEBOUNCE, true);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ProgressEvent::Removed { id, state }) => {
                    match state {
                        Some(state) => println!("🏁 任务 {} 结束: {}", id, state),
                        None => println!("🏁 任务 {} 已移除", id),
                    }
                    if controller.tasks().await.is_empty() {
                        break;
                    }
                }
                Ok(_) => printer.call(controller.summary().await),
                Err(RecvError::Lagged(skipped)) => log::debug!("skipped {} progress events", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\n⏸️  正在暂停所有任务...");
                let paused = controller.cancel_all().await;
                println!("⏸️  已暂停 {} 个任务", paused.len());
                break;
            }
        }
    }

    printer.cancel();
    controller.shutdown().await;
    print_summary(controller.summary().await);
    println!("🛑 已退出");

    Ok(())
}

fn print_summary(progress: AggregatedProgress) {
    let percent = progress.fraction().map(|f| f * 100.0).unwrap_or(0.0);
    println!(
        "📊 {} 个任务 (运行 {}, 暂停 {}): {}/{} 瓦片 {:.1}%, 失败 {}",
        progress.tasks,
        progress.running,
        progress.paused,
        progress.current_tiles,
        progress.total_tiles,
        percent,
        progress.failed_tiles
    );
}
