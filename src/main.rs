use anyhow::{Context, Result};
use log::{debug, info, warn};
use myy_playback::core::{PlayerConfig, SyncAction, VideoFrame};
use myy_playback::player::{PipelineOrchestrator, PlayerEvent, QueuedOutput};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

mod demo;

/// 演示时长（毫秒）
const DEMO_DURATION_MS: i64 = 3000;

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("🎬 MYY Playback - 无界面演示启动");

    // 第一个参数是可选的 JSON 配置文件
    let config = match std::env::args().nth(1) {
        Some(path) => PlayerConfig::from_file(&path)
            .with_context(|| format!("读取配置失败: {}", path))?,
        None => PlayerConfig {
            audio_outputs: vec!["cpal".to_string(), "null".to_string()],
            ..Default::default()
        },
    };

    let source = demo::SyntheticSource::new(DEMO_DURATION_MS);
    let mut player = PipelineOrchestrator::with_builtin_codecs(config, Box::new(source))
        .context("播放器初始化失败")?;

    // 模拟渲染方：从队列取帧，按主时钟决定显示或丢弃
    let preview = Arc::new(QueuedOutput::<VideoFrame>::new("preview", 8));
    player.add_video_output(preview.clone());
    let events = player.events();

    player.start().context("启动播放失败")?;

    let deadline = Instant::now() + Duration::from_millis(DEMO_DURATION_MS as u64 + 500);
    let (mut presented, mut late) = (0usize, 0usize);
    while Instant::now() < deadline {
        while let Some(frame) = preview.pop() {
            match player.clock().sync_action(frame.pts, 40) {
                SyncAction::Drop => late += 1,
                SyncAction::Present | SyncAction::Hold(_) => presented += 1,
            }
        }
        for event in events.try_iter() {
            match event {
                PlayerEvent::Error(err) => warn!("⚠️ {:?}: {}", err.kind, err.message),
                other => debug!("事件: {:?}", other),
            }
        }
        thread::sleep(Duration::from_millis(10));
    }

    info!(
        "🖼️ 显示 {} 帧，迟到 {} 帧，预览队列丢弃 {} 帧",
        presented,
        late,
        preview.dropped()
    );
    info!("📊 统计信息:\n{}", player.statistics().to_json()?);

    player.stop();
    Ok(())
}
