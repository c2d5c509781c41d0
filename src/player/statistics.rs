use crate::core::{CodecParameters, FormatInfo, Result, StreamInfo};
use serde::Serialize;
use std::collections::BTreeMap;

/// 音视频流共有的统计信息
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamStatistics {
    pub available: bool,
    pub codec: String,
    pub codec_long: String,
    pub decoder: String,
    pub total_time_ms: i64,
    pub start_time_ms: i64,
    pub bit_rate: i64,
    pub frames: i64,
    pub metadata: BTreeMap<String, String>,
}

impl StreamStatistics {
    fn from_stream(info: &StreamInfo, params: &CodecParameters) -> Self {
        Self {
            available: true,
            codec: params.codec_id.clone(),
            codec_long: info.codec_long_name.clone(),
            decoder: String::new(),
            total_time_ms: info.duration_ms.unwrap_or(0),
            start_time_ms: info.start_time_ms.unwrap_or(0),
            bit_rate: params.bit_rate,
            frames: info.frames,
            metadata: info.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AudioOnlyStatistics {
    pub block_align: u32,
    pub channels: u16,
    pub channel_layout: String,
    pub sample_format: String,
    pub frame_size: u32,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VideoOnlyStatistics {
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    pub coded_width: u32,
    pub coded_height: u32,
    pub gop_size: u32,
    pub pixel_format: String,
}

/// 播放统计快照，每次建立流时整体重建
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaybackStatistics {
    pub url: String,
    pub format: String,
    pub bit_rate: i64,
    pub start_time_ms: i64,
    pub duration_ms: i64,
    pub metadata: BTreeMap<String, String>,
    pub audio: StreamStatistics,
    pub video: StreamStatistics,
    pub audio_only: AudioOnlyStatistics,
    pub video_only: VideoOnlyStatistics,
}

impl PlaybackStatistics {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// 容器级信息
    pub fn init_base(&mut self, format: &FormatInfo, duration_ms: i64, start_time_ms: i64) {
        self.reset();
        self.url = format.url.clone();
        self.format = format.name.clone();
        self.bit_rate = format.bit_rate;
        self.start_time_ms = start_time_ms;
        self.duration_ms = duration_ms;
        self.metadata = format.metadata.clone();
    }

    pub fn init_audio(&mut self, info: &StreamInfo, params: &CodecParameters) {
        self.audio = StreamStatistics::from_stream(info, params);
        self.audio_only = AudioOnlyStatistics {
            block_align: params.block_align,
            channels: params.channels,
            channel_layout: params.channel_layout.map(|l| l.name()).unwrap_or_default(),
            sample_format: params
                .sample_format
                .map(|f| f.name().to_string())
                .unwrap_or_default(),
            frame_size: params.frame_size,
            sample_rate: params.sample_rate,
        };
    }

    pub fn init_video(&mut self, info: &StreamInfo, params: &CodecParameters) {
        self.video = StreamStatistics::from_stream(info, params);
        self.video_only = VideoOnlyStatistics {
            frame_rate: params.known_frame_rate().unwrap_or(0.0),
            width: params.width,
            height: params.height,
            coded_width: params.coded_width,
            coded_height: params.coded_height,
            gop_size: params.gop_size,
            pixel_format: params
                .pixel_format
                .map(|f| f.name().to_string())
                .unwrap_or_default(),
        };
    }

    pub fn reset_audio(&mut self) {
        self.audio = StreamStatistics::default();
        self.audio_only = AudioOnlyStatistics::default();
    }

    pub fn reset_video(&mut self) {
        self.video = StreamStatistics::default();
        self.video_only = VideoOnlyStatistics::default();
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
