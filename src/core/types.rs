use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Audio,
    Video,
    /// 字幕流：仅作标识，核心不处理
    Subtitle,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Audio => "audio",
            StreamKind::Video => "video",
            StreamKind::Subtitle => "subtitle",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    RGB,
    YUV420P,
    NV12,
}

impl PixelFormat {
    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::RGBA => "rgba",
            PixelFormat::RGB => "rgb24",
            PixelFormat::YUV420P => "yuv420p",
            PixelFormat::NV12 => "nv12",
        }
    }
}

/// 音频采样格式（packed = 交错，planar = 平面）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    F32,
    F64,
    U8P,
    S16P,
    S32P,
    F32P,
    F64P,
}

impl SampleFormat {
    pub fn is_planar(&self) -> bool {
        matches!(
            self,
            SampleFormat::U8P
                | SampleFormat::S16P
                | SampleFormat::S32P
                | SampleFormat::F32P
                | SampleFormat::F64P
        )
    }

    /// 对应的交错格式
    pub fn packed(&self) -> SampleFormat {
        match self {
            SampleFormat::U8P => SampleFormat::U8,
            SampleFormat::S16P => SampleFormat::S16,
            SampleFormat::S32P => SampleFormat::S32,
            SampleFormat::F32P => SampleFormat::F32,
            SampleFormat::F64P => SampleFormat::F64,
            other => *other,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self.packed() {
            SampleFormat::U8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::F32 => 4,
            _ => 8,
        }
    }

    /// FFmpeg 风格的格式名
    pub fn name(&self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16 => "s16",
            SampleFormat::S32 => "s32",
            SampleFormat::F32 => "flt",
            SampleFormat::F64 => "dbl",
            SampleFormat::U8P => "u8p",
            SampleFormat::S16P => "s16p",
            SampleFormat::S32P => "s32p",
            SampleFormat::F32P => "fltp",
            SampleFormat::F64P => "dblp",
        }
    }
}

/// 声道布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelLayout {
    Mono,
    Stereo,
    Surround2_1,
    Quad,
    Surround5_0,
    Surround5_1,
    Surround6_1,
    Surround7_1,
    /// 没有标准布局的声道数
    Unknown(u16),
}

impl ChannelLayout {
    pub fn channels(&self) -> u16 {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
            ChannelLayout::Surround2_1 => 3,
            ChannelLayout::Quad => 4,
            ChannelLayout::Surround5_0 => 5,
            ChannelLayout::Surround5_1 => 6,
            ChannelLayout::Surround6_1 => 7,
            ChannelLayout::Surround7_1 => 8,
            ChannelLayout::Unknown(n) => *n,
        }
    }

    /// 给定声道数的默认布局
    pub fn default_for(channels: u16) -> ChannelLayout {
        match channels {
            1 => ChannelLayout::Mono,
            2 => ChannelLayout::Stereo,
            3 => ChannelLayout::Surround2_1,
            4 => ChannelLayout::Quad,
            5 => ChannelLayout::Surround5_0,
            6 => ChannelLayout::Surround5_1,
            7 => ChannelLayout::Surround6_1,
            8 => ChannelLayout::Surround7_1,
            n => ChannelLayout::Unknown(n),
        }
    }

    pub fn name(&self) -> String {
        match self {
            ChannelLayout::Mono => "mono".to_string(),
            ChannelLayout::Stereo => "stereo".to_string(),
            ChannelLayout::Surround2_1 => "2.1".to_string(),
            ChannelLayout::Quad => "quad".to_string(),
            ChannelLayout::Surround5_0 => "5.0".to_string(),
            ChannelLayout::Surround5_1 => "5.1".to_string(),
            ChannelLayout::Surround6_1 => "6.1".to_string(),
            ChannelLayout::Surround7_1 => "7.1".to_string(),
            ChannelLayout::Unknown(n) => format!("{} channels", n),
        }
    }
}

/// 音频格式，按结构比较
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    pub channels: u16,
    pub channel_layout: ChannelLayout,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, sample_format: SampleFormat, channel_layout: ChannelLayout) -> Self {
        Self {
            sample_rate,
            sample_format,
            channels: channel_layout.channels(),
            channel_layout,
        }
    }

    /// 设置布局的同时同步声道数
    pub fn set_channel_layout(&mut self, layout: ChannelLayout) {
        self.channel_layout = layout;
        self.channels = layout.channels();
    }

    pub fn set_sample_format(&mut self, format: SampleFormat) {
        self.sample_format = format;
    }

    pub fn is_planar(&self) -> bool {
        self.sample_format.is_planar()
    }

    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(48000, SampleFormat::F32, ChannelLayout::Stereo)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz/{}/{}ch({})",
            self.sample_rate,
            self.sample_format.name(),
            self.channels,
            self.channel_layout.name()
        )
    }
}

/// 编解码参数（由解封装方提供，核心只读）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodecParameters {
    /// 编解码器标识，例如 "h264"、"aac"、"pcm_f32le"
    pub codec_id: String,
    pub bit_rate: i64,
    /// 编解码器私有数据（如 avcC），原样交给解码器
    #[serde(default)]
    pub extradata: Vec<u8>,

    // 音频
    pub channels: u16,
    pub channel_layout: Option<ChannelLayout>,
    pub sample_format: Option<SampleFormat>,
    pub sample_rate: u32,
    pub frame_size: u32,
    pub block_align: u32,

    // 视频
    pub width: u32,
    pub height: u32,
    pub coded_width: u32,
    pub coded_height: u32,
    pub pixel_format: Option<PixelFormat>,
    /// 平均帧率，未知时为 0
    pub frame_rate: f64,
    pub gop_size: u32,
}

impl CodecParameters {
    pub fn audio(codec_id: &str, sample_rate: u32, sample_format: SampleFormat, channels: u16) -> Self {
        Self {
            codec_id: codec_id.to_string(),
            sample_rate,
            sample_format: Some(sample_format),
            channels,
            ..Default::default()
        }
    }

    pub fn video(codec_id: &str, width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            codec_id: codec_id.to_string(),
            width,
            height,
            coded_width: width,
            coded_height: height,
            frame_rate,
            ..Default::default()
        }
    }

    /// 修正声道数与声道布局的一致性
    ///
    /// 声道数为 0 但有布局时从布局推导；有声道数但没有布局时取默认布局。
    /// 两者最终都有效才返回 true。
    pub fn correct_audio_channels(&mut self) -> bool {
        if self.channels == 0 {
            if let Some(layout) = self.channel_layout {
                self.channels = layout.channels();
            }
        } else if self.channel_layout.is_none() {
            self.channel_layout = Some(ChannelLayout::default_for(self.channels));
        }
        self.channels > 0 && self.channel_layout.map(|l| l.channels() > 0).unwrap_or(false)
    }

    /// 帧率是否可用
    pub fn known_frame_rate(&self) -> Option<f64> {
        if self.frame_rate.is_finite() && self.frame_rate > 0.0 {
            Some(self.frame_rate)
        } else {
            None
        }
    }
}

/// 单个流的元信息（统计用）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: usize,
    pub codec_long_name: String,
    /// 流时长（毫秒），未知时为 None
    pub duration_ms: Option<i64>,
    pub start_time_ms: Option<i64>,
    pub frames: i64,
    pub metadata: BTreeMap<String, String>,
}

/// 容器级信息（统计用）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatInfo {
    pub url: String,
    pub name: String,
    pub long_name: String,
    pub bit_rate: i64,
    pub metadata: BTreeMap<String, String>,
}

/// 视频帧数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFrame {
    pub pts: i64,           // 显示时间戳（毫秒）
    pub duration: i64,      // 帧持续时间（毫秒）
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,      // CPU 内存数据
}

/// 音频帧数据
///
/// 样本统一以交错 f32 存放，`format` 描述这些样本所代表的格式。
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub pts: i64,           // 显示时间戳（毫秒）
    pub format: AudioFormat,
    pub data: Vec<f32>,
}

impl AudioFrame {
    /// 每个声道的采样数
    pub fn samples(&self) -> usize {
        if self.format.channels == 0 {
            0
        } else {
            self.data.len() / self.format.channels as usize
        }
    }

    /// 帧时长（毫秒）
    pub fn duration_ms(&self) -> i64 {
        if self.format.sample_rate == 0 {
            return 0;
        }
        (self.samples() as i64 * 1000) / self.format.sample_rate as i64
    }
}

/// 流线程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Running,
    Paused,
    Stopped,
}
