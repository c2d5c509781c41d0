//! 播放核心：包队列、解码器选择、音频格式协商与音视频解码线程编排
//!
//! 容器解析、渲染和界面都不在这里，由 [`player::DemuxerSource`] 和
//! [`player::FrameSink`] 的实现方提供。

pub mod core;
pub mod player;

#[cfg(test)]
mod testing;

pub use crate::core::{PlayerConfig, PlayerError, Result};
pub use crate::player::{PipelineOrchestrator, PlayerEvent, SetupOutcome};
