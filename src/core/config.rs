use crate::core::error::{PlayerError, Result};
use crate::player::hw_decoder::BackendId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// 解码器选项（键值对，原样传给解码器）
pub type DecoderOptions = BTreeMap<String, String>;

/// 包队列水位计算参数
///
/// 经验值：低水位 ≈ 0.618 × 帧率，高水位 ≈ 1.618 × 低水位，约合 1 秒数据。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSizing {
    pub threshold_ratio: f64,
    pub capacity_ratio: f64,
    /// 帧率未知或过低时使用的帧率下限
    pub min_frame_rate: f64,
}

impl Default for QueueSizing {
    fn default() -> Self {
        Self {
            threshold_ratio: 0.61803,
            capacity_ratio: 1.61803,
            min_frame_rate: 24.0,
        }
    }
}

/// 播放器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 读取卡住时的中断超时（毫秒），由解封装方执行
    pub interrupt_timeout_ms: u64,
    pub audio_output_enabled: bool,
    /// 未显式设置音频输出时按顺序尝试的输出标识
    pub audio_outputs: Vec<String>,
    /// 视频解码后端顺序：硬件加速在前，软件解码在最后
    pub video_backends: Vec<BackendId>,
    pub video_decoder_options: DecoderOptions,
    pub audio_decoder_options: DecoderOptions,
    pub brightness: i32,
    pub contrast: i32,
    pub saturation: i32,
    pub queue: QueueSizing,
    /// 事件通道容量
    pub event_capacity: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            interrupt_timeout_ms: 30_000,
            audio_output_enabled: true,
            audio_outputs: Vec::new(),
            video_backends: BackendId::detect_available(),
            video_decoder_options: DecoderOptions::new(),
            audio_decoder_options: DecoderOptions::new(),
            brightness: 0,
            contrast: 0,
            saturation: 0,
            queue: QueueSizing::default(),
            event_capacity: 64,
        }
    }
}

impl PlayerConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let q = &self.queue;
        if !q.threshold_ratio.is_finite() || q.threshold_ratio <= 0.0 {
            return Err(PlayerError::InvalidConfig(format!(
                "queue.threshold_ratio 必须为正数: {}",
                q.threshold_ratio
            )));
        }
        if !q.capacity_ratio.is_finite() || q.capacity_ratio < 1.0 {
            return Err(PlayerError::InvalidConfig(format!(
                "queue.capacity_ratio 不能小于 1: {}",
                q.capacity_ratio
            )));
        }
        if !q.min_frame_rate.is_finite() || q.min_frame_rate <= 0.0 {
            return Err(PlayerError::InvalidConfig(format!(
                "queue.min_frame_rate 必须为正数: {}",
                q.min_frame_rate
            )));
        }
        for (name, value) in [
            ("brightness", self.brightness),
            ("contrast", self.contrast),
            ("saturation", self.saturation),
        ] {
            if !(-100..=100).contains(&value) {
                return Err(PlayerError::InvalidConfig(format!(
                    "{} 超出范围 [-100, 100]: {}",
                    name, value
                )));
            }
        }
        if self.video_backends.is_empty() {
            return Err(PlayerError::InvalidConfig("video_backends 不能为空".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(PlayerError::InvalidConfig("event_capacity 不能为 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PlayerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.interrupt_timeout_ms, 30_000);
        assert_eq!(config.video_backends.last(), Some(&BackendId::Software));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PlayerConfig::from_json_str(
            r#"{ "brightness": 20, "video_backends": ["VAAPI", "Software"], "queue": { "min_frame_rate": 30.0 } }"#,
        )
        .unwrap();
        assert_eq!(config.brightness, 20);
        assert_eq!(config.video_backends, vec![BackendId::VAAPI, BackendId::Software]);
        assert_eq!(config.queue.min_frame_rate, 30.0);
        assert_eq!(config.queue.threshold_ratio, 0.61803);
        assert!(config.audio_output_enabled);
    }

    #[test]
    fn test_rejects_out_of_range_adjustment() {
        let err = PlayerConfig::from_json_str(r#"{ "contrast": 150 }"#).unwrap_err();
        assert!(matches!(err, PlayerError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_empty_backend_list() {
        let err = PlayerConfig::from_json_str(r#"{ "video_backends": [] }"#).unwrap_err();
        assert!(matches!(err, PlayerError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = PlayerConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, PlayerError::JsonError(_)));
    }
}
