use crate::core::types::StreamKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置解析失败: {0}")]
    JsonError(#[from] serde_json::Error),

    /// 所有视频解码后端都无法打开
    #[error("没有可用的视频解码器: {codec}（已尝试: {tried}）")]
    NoDecoderAvailable { codec: String, tried: String },

    #[error("无法打开音频解码器: {0}")]
    AudioCodecNotFound(String),

    #[error("音频输出不可用: {0}")]
    AudioOutputUnavailable(String),

    /// 媒体源不包含该类型的流（提示信息，不是故障）
    #[error("媒体源没有{0}流")]
    StreamAbsent(StreamKind),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("配置无效: {0}")]
    InvalidConfig(String),

    #[error("状态错误: {0}")]
    InvalidState(String),

    #[error("其他错误: {0}")]
    Other(String),
}

impl PlayerError {
    /// 仅影响单个流、会话其余部分可以继续的错误
    pub fn is_stream_local(&self) -> bool {
        matches!(
            self,
            PlayerError::NoDecoderAvailable { .. }
                | PlayerError::AudioCodecNotFound(_)
                | PlayerError::AudioOutputUnavailable(_)
                | PlayerError::StreamAbsent(_)
                | PlayerError::DecodeError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
