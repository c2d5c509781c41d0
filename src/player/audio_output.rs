use crate::core::{AudioFormat, AudioFrame, ChannelLayout, PlayerError, Result, SampleFormat};
use crate::player::audio_format::SinkCapabilities;
use crate::player::output::FrameSink;
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;

/// 音频输出设备
///
/// 先 `set_audio_format()` 再 `open()`；格式变化时需关闭后重新打开。
pub trait AudioSink: SinkCapabilities + Send {
    fn name(&self) -> String;

    fn audio_format(&self) -> AudioFormat;

    fn set_audio_format(&mut self, format: AudioFormat);

    fn open(&mut self) -> Result<()>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn write(&mut self, frame: &AudioFrame) -> Result<()>;
}

/// 多个线程共用的音频设备（编排方协商格式，音频线程写入）
pub type SharedAudioSink = Arc<Mutex<Box<dyn AudioSink>>>;

pub fn share_sink(sink: Box<dyn AudioSink>) -> SharedAudioSink {
    Arc::new(Mutex::new(sink))
}

/// 把共享音频设备接入音频输出集合
pub struct AudioSinkOutput {
    sink: SharedAudioSink,
}

impl AudioSinkOutput {
    pub fn new(sink: SharedAudioSink) -> Self {
        Self { sink }
    }
}

impl FrameSink<AudioFrame> for AudioSinkOutput {
    fn name(&self) -> String {
        self.sink.lock().name()
    }

    fn send(&self, frame: &AudioFrame) -> Result<()> {
        let mut sink = self.sink.lock();
        if !sink.is_open() {
            return Err(PlayerError::AudioOutputUnavailable(format!("{} 未打开", sink.name())));
        }
        sink.write(frame)
    }
}

/// 按标识创建音频输出，用于按顺序探测可用设备
pub trait AudioOutputFactory: Send + Sync {
    fn create(&self, id: &str) -> Option<Box<dyn AudioSink>>;
}

/// 内置输出："null"，以及启用 `cpal-output` 时的 "cpal"
pub struct DefaultAudioOutputFactory;

impl AudioOutputFactory for DefaultAudioOutputFactory {
    fn create(&self, id: &str) -> Option<Box<dyn AudioSink>> {
        match id {
            "null" => Some(Box::new(NullAudioSink::new())),
            #[cfg(feature = "cpal-output")]
            "cpal" => match CpalAudioSink::new() {
                Ok(sink) => Some(Box::new(sink)),
                Err(e) => {
                    debug!("cpal 音频输出不可用: {}", e);
                    None
                }
            },
            _ => None,
        }
    }
}

/// 依次尝试 `ids`，返回第一个能创建的输出
pub fn probe_audio_output(factory: &dyn AudioOutputFactory, ids: &[String]) -> Option<Box<dyn AudioSink>> {
    for id in ids {
        if let Some(sink) = factory.create(id) {
            info!("🔊 使用音频输出: {}", sink.name());
            return Some(sink);
        }
        debug!("音频输出 {} 不可用", id);
    }
    None
}

/// 丢弃所有样本的输出，无声卡环境与测试使用
pub struct NullAudioSink {
    format: AudioFormat,
    open: bool,
    samples_written: u64,
}

impl NullAudioSink {
    pub fn new() -> Self {
        Self {
            format: AudioFormat::default(),
            open: false,
            samples_written: 0,
        }
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }
}

impl Default for NullAudioSink {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkCapabilities for NullAudioSink {
    fn is_supported(&self, format: &AudioFormat) -> bool {
        format.is_valid()
            && self.is_sample_format_supported(format.sample_format)
            && self.is_channel_layout_supported(format.channel_layout)
    }

    fn is_sample_format_supported(&self, format: SampleFormat) -> bool {
        !format.is_planar()
    }

    fn is_channel_layout_supported(&self, layout: ChannelLayout) -> bool {
        matches!(layout, ChannelLayout::Mono | ChannelLayout::Stereo)
    }

    fn preferred_sample_format(&self) -> SampleFormat {
        SampleFormat::F32
    }

    fn preferred_channel_layout(&self) -> ChannelLayout {
        ChannelLayout::Stereo
    }
}

impl AudioSink for NullAudioSink {
    fn name(&self) -> String {
        "null".to_string()
    }

    fn audio_format(&self) -> AudioFormat {
        self.format
    }

    fn set_audio_format(&mut self, format: AudioFormat) {
        self.format = format;
    }

    fn open(&mut self) -> Result<()> {
        if !self.is_supported(&self.format) {
            return Err(PlayerError::AudioOutputUnavailable(format!("不支持的格式 {}", self.format)));
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write(&mut self, frame: &AudioFrame) -> Result<()> {
        self.samples_written += frame.data.len() as u64;
        Ok(())
    }
}

#[cfg(feature = "cpal-output")]
pub use self::cpal_sink::CpalAudioSink;

#[cfg(feature = "cpal-output")]
mod cpal_sink {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
    use crossbeam::queue::SegQueue;
    use log::{error, warn};

    /// 音频输出 - 使用 cpal 播放音频（流固定为交错 f32）
    pub struct CpalAudioSink {
        device: Device,
        device_name: String,
        format: AudioFormat,
        stream: Option<Stream>,
        buffer: Arc<SegQueue<f32>>,
        volume: Arc<Mutex<f32>>,
    }

    // cpal::Stream 本身不是 Send；设备只在持有 SharedAudioSink 锁时访问，
    // stream 在 open()/close() 所在的线程创建与销毁
    unsafe impl Send for CpalAudioSink {}

    impl CpalAudioSink {
        pub fn new() -> Result<Self> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| PlayerError::AudioOutputUnavailable("无法找到音频输出设备".to_string()))?;
            let device_name = device.name().unwrap_or_default();
            debug!("使用音频设备: {}", device_name);

            Ok(Self {
                device,
                device_name,
                format: AudioFormat::default(),
                stream: None,
                buffer: Arc::new(SegQueue::new()),
                volume: Arc::new(Mutex::new(1.0)),
            })
        }

        /// 检查配置是否兼容
        fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
            let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
                && config.sample_rate.0 <= supported.max_sample_rate().0;

            rate_in_range && config.channels == supported.channels()
        }

        fn stream_config(format: &AudioFormat) -> StreamConfig {
            StreamConfig {
                channels: format.channels,
                sample_rate: cpal::SampleRate(format.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            }
        }

        fn supports_channels(&self, channels: u16) -> bool {
            match self.device.supported_output_configs() {
                Ok(mut configs) => configs.any(|c| c.channels() == channels),
                Err(e) => {
                    warn!("⚠️  无法获取支持的音频配置: {}", e);
                    false
                }
            }
        }

        /// 设置音量 (0.0 - 1.0)
        pub fn set_volume(&self, volume: f32) {
            *self.volume.lock() = volume.clamp(0.0, 1.0);
        }

        /// 获取缓冲区大小（采样数）
        pub fn buffer_size(&self) -> usize {
            self.buffer.len()
        }

        /// 清空缓冲区
        pub fn clear_buffer(&self) {
            while self.buffer.pop().is_some() {}
        }
    }

    impl SinkCapabilities for CpalAudioSink {
        fn is_supported(&self, format: &AudioFormat) -> bool {
            if format.sample_format != SampleFormat::F32 {
                return false;
            }
            let config = Self::stream_config(format);
            match self.device.supported_output_configs() {
                Ok(mut configs) => configs.any(|c| Self::is_config_compatible(&config, &c)),
                Err(_) => false,
            }
        }

        fn is_sample_format_supported(&self, format: SampleFormat) -> bool {
            format == SampleFormat::F32
        }

        fn is_channel_layout_supported(&self, layout: ChannelLayout) -> bool {
            self.supports_channels(layout.channels())
        }

        fn preferred_sample_format(&self) -> SampleFormat {
            SampleFormat::F32
        }

        fn preferred_channel_layout(&self) -> ChannelLayout {
            if self.supports_channels(2) {
                ChannelLayout::Stereo
            } else {
                ChannelLayout::Mono
            }
        }

        fn preferred_sample_rate(&self) -> Option<u32> {
            self.device
                .default_output_config()
                .ok()
                .map(|config| config.sample_rate().0)
        }
    }

    impl AudioSink for CpalAudioSink {
        fn name(&self) -> String {
            format!("cpal({})", self.device_name)
        }

        fn audio_format(&self) -> AudioFormat {
            self.format
        }

        fn set_audio_format(&mut self, format: AudioFormat) {
            self.format = format;
        }

        fn open(&mut self) -> Result<()> {
            if self.stream.is_some() {
                return Ok(());
            }
            if !self.is_supported(&self.format) {
                return Err(PlayerError::AudioOutputUnavailable(format!(
                    "音频设备不支持 {}",
                    self.format
                )));
            }

            let buffer = self.buffer.clone();
            let volume = self.volume.clone();

            let stream = self
                .device
                .build_output_stream(
                    &Self::stream_config(&self.format),
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let vol = *volume.lock();
                        for sample in data.iter_mut() {
                            *sample = buffer.pop().map(|v| v * vol).unwrap_or(0.0);
                        }
                    },
                    move |err| {
                        error!("音频流错误: {}", err);
                    },
                    None,
                )
                .map_err(|e| PlayerError::AudioOutputUnavailable(format!("创建音频流失败: {}", e)))?;

            stream
                .play()
                .map_err(|e| PlayerError::AudioOutputUnavailable(format!("启动音频流失败: {}", e)))?;

            self.stream = Some(stream);
            info!("音频输出已启动: {}", self.format);
            Ok(())
        }

        fn close(&mut self) {
            if let Some(stream) = self.stream.take() {
                drop(stream);
                self.clear_buffer();
                info!("音频输出已停止");
            }
        }

        fn is_open(&self) -> bool {
            self.stream.is_some()
        }

        fn write(&mut self, frame: &AudioFrame) -> Result<()> {
            for sample in &frame.data {
                self.buffer.push(*sample);
            }
            Ok(())
        }
    }

    impl Drop for CpalAudioSink {
        fn drop(&mut self) {
            self.close();
        }
    }
}
