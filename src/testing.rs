//! 测试用的假解码器、假输出和假数据源

use crate::core::{
    AudioFormat, AudioFrame, ChannelLayout, CodecParameters, DecoderOptions, FormatInfo,
    PixelFormat, PlayerError, Result, SampleFormat, StreamInfo, StreamKind, VideoFrame,
};
use crate::player::audio_format::{native_format, SinkCapabilities};
use crate::player::audio_output::AudioSink;
use crate::player::decoder::{AudioDecoder, AudioDecoderFactory, Decoder, VideoDecoder, VideoDecoderFactory};
use crate::player::demuxer_source::{DemuxerSource, MediaPacket};
use crate::player::hw_decoder::BackendId;
use crate::player::output::FrameSink;
use crate::player::packet::Packet;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 轮询直到条件成立，最多 2 秒
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// 记录解码器的调用次数
#[derive(Default)]
pub struct DecoderProbe {
    opened: AtomicUsize,
    closed: AtomicUsize,
    decoded: AtomicUsize,
    flushed: AtomicUsize,
    decoded_after_close: AtomicBool,
}

impl DecoderProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn decoded(&self) -> usize {
        self.decoded.load(Ordering::SeqCst)
    }

    pub fn flushed(&self) -> usize {
        self.flushed.load(Ordering::SeqCst)
    }

    pub fn decoded_after_close(&self) -> bool {
        self.decoded_after_close.load(Ordering::SeqCst)
    }

    fn on_decode(&self) {
        if self.closed() > 0 {
            self.decoded_after_close.store(true, Ordering::SeqCst);
        }
        self.decoded.fetch_add(1, Ordering::SeqCst);
    }
}

/// 工厂共享的调用日志
#[derive(Default)]
struct FactoryLog {
    entries: Mutex<Vec<String>>,
    options: Mutex<Option<DecoderOptions>>,
}

impl FactoryLog {
    fn push(&self, entry: String) {
        self.entries.lock().push(entry);
    }
}

/// 每个包解出一帧 2x2 RGBA，`corrupt` 包返回解码错误
pub struct FakeVideoDecoder {
    name: String,
    probe: Arc<DecoderProbe>,
    fail_open: bool,
    log: Option<Arc<FactoryLog>>,
}

impl FakeVideoDecoder {
    pub fn new(name: &str, probe: Arc<DecoderProbe>) -> Self {
        Self {
            name: name.to_string(),
            probe,
            fail_open: false,
            log: None,
        }
    }

    fn record(&self, action: &str) {
        if let Some(log) = &self.log {
            log.push(format!("{} {}", action, self.name));
        }
    }
}

impl Decoder for FakeVideoDecoder {
    type Frame = VideoFrame;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn set_codec_parameters(&mut self, _params: &CodecParameters) {}

    fn set_options(&mut self, options: &DecoderOptions) {
        if let Some(log) = &self.log {
            *log.options.lock() = Some(options.clone());
        }
    }

    fn open(&mut self) -> Result<()> {
        self.record("open");
        if self.fail_open {
            return Err(PlayerError::DecodeError(format!("{} 打开失败", self.name)));
        }
        self.probe.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<VideoFrame>> {
        self.probe.on_decode();
        if packet.corrupt {
            return Err(PlayerError::DecodeError(format!("损坏的包 pts={}", packet.pts)));
        }
        Ok(vec![VideoFrame {
            pts: packet.pts,
            duration: 40,
            width: 2,
            height: 2,
            format: PixelFormat::RGBA,
            data: vec![packet.data.first().copied().unwrap_or(0); 16],
        }])
    }

    fn flush(&mut self) -> Result<Vec<VideoFrame>> {
        self.probe.flushed.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    fn close(&mut self) {
        self.record("close");
        self.probe.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for FakeVideoDecoder {
    fn drop(&mut self) {
        self.record("drop");
    }
}

/// 按后端决定创建结果的视频解码器工厂
pub struct FakeVideoDecoderFactory {
    failing: HashSet<BackendId>,
    working: HashSet<BackendId>,
    log: Arc<FactoryLog>,
    probe: Arc<DecoderProbe>,
}

impl FakeVideoDecoderFactory {
    pub fn new() -> Self {
        Self {
            failing: HashSet::new(),
            working: HashSet::new(),
            log: Arc::new(FactoryLog::default()),
            probe: DecoderProbe::new(),
        }
    }

    /// 能创建但打开失败
    pub fn failing(mut self, backend: BackendId) -> Self {
        self.failing.insert(backend);
        self
    }

    pub fn working(mut self, backend: BackendId) -> Self {
        self.working.insert(backend);
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.log.entries.lock().clone()
    }

    pub fn last_options(&self) -> Option<DecoderOptions> {
        self.log.options.lock().clone()
    }
}

impl VideoDecoderFactory for FakeVideoDecoderFactory {
    fn create(&self, backend: BackendId) -> Option<Box<VideoDecoder>> {
        let fail_open = self.failing.contains(&backend);
        if !fail_open && !self.working.contains(&backend) {
            return None;
        }
        self.log.push(format!("create {}", backend.name()));
        Some(Box::new(FakeVideoDecoder {
            name: backend.name().to_string(),
            probe: self.probe.clone(),
            fail_open,
            log: Some(self.log.clone()),
        }))
    }
}

/// 输出编解码参数对应的原生格式，每个包 4 个采样点
pub struct FakeAudioDecoder {
    name: String,
    probe: Arc<DecoderProbe>,
    params: CodecParameters,
    format: Option<AudioFormat>,
    fail_open: bool,
}

impl FakeAudioDecoder {
    pub fn new(name: &str, probe: Arc<DecoderProbe>) -> Self {
        Self {
            name: name.to_string(),
            probe,
            params: CodecParameters::default(),
            format: None,
            fail_open: false,
        }
    }
}

impl Decoder for FakeAudioDecoder {
    type Frame = AudioFrame;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn set_codec_parameters(&mut self, params: &CodecParameters) {
        self.params = params.clone();
    }

    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(PlayerError::DecodeError(format!("{} 打开失败", self.name)));
        }
        self.format = Some(native_format(&self.params).unwrap_or_default());
        self.probe.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<AudioFrame>> {
        self.probe.on_decode();
        if packet.corrupt {
            return Err(PlayerError::DecodeError(format!("损坏的包 pts={}", packet.pts)));
        }
        let format = self.format.unwrap_or_default();
        Ok(vec![AudioFrame {
            pts: packet.pts,
            format,
            data: vec![0.0; 4 * format.channels as usize],
        }])
    }

    fn flush(&mut self) -> Result<Vec<AudioFrame>> {
        self.probe.flushed.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    fn close(&mut self) {
        self.format = None;
        self.probe.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeAudioDecoderFactory {
    fail_open: bool,
    probe: Arc<DecoderProbe>,
}

impl FakeAudioDecoderFactory {
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            probe: DecoderProbe::new(),
        }
    }
}

impl AudioDecoderFactory for FakeAudioDecoderFactory {
    fn create(&self) -> Option<Box<AudioDecoder>> {
        let mut decoder = FakeAudioDecoder::new("fake-audio", self.probe.clone());
        decoder.fail_open = self.fail_open;
        Some(Box::new(decoder))
    }
}

/// 只接受交错的单声道/立体声 F32 或 S16
pub struct FakeAudioSink {
    format: AudioFormat,
    open: bool,
    fail_open: bool,
    /// 只支持这一个采样率
    fixed_rate: Option<u32>,
    open_count: Arc<AtomicUsize>,
    written: Arc<AtomicUsize>,
}

impl FakeAudioSink {
    pub fn stereo_f32() -> Self {
        Self {
            format: AudioFormat::new(48000, SampleFormat::F32, ChannelLayout::Stereo),
            open: false,
            fail_open: false,
            fixed_rate: None,
            open_count: Arc::new(AtomicUsize::new(0)),
            written: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn fixed_rate(mut self, rate: u32) -> Self {
        self.fixed_rate = Some(rate);
        self
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    /// 装箱之后仍可观察的写入帧数
    pub fn written_counter(&self) -> Arc<AtomicUsize> {
        self.written.clone()
    }
}

impl SinkCapabilities for FakeAudioSink {
    fn is_supported(&self, format: &AudioFormat) -> bool {
        self.is_sample_format_supported(format.sample_format)
            && self.is_channel_layout_supported(format.channel_layout)
            && self.fixed_rate.map_or(true, |rate| rate == format.sample_rate)
    }

    fn is_sample_format_supported(&self, format: SampleFormat) -> bool {
        matches!(format, SampleFormat::F32 | SampleFormat::S16)
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

    fn preferred_sample_rate(&self) -> Option<u32> {
        self.fixed_rate
    }
}

impl AudioSink for FakeAudioSink {
    fn name(&self) -> String {
        "fake".to_string()
    }

    fn audio_format(&self) -> AudioFormat {
        self.format
    }

    fn set_audio_format(&mut self, format: AudioFormat) {
        self.format = format;
    }

    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(PlayerError::Other("设备不存在".to_string()));
        }
        self.open = true;
        self.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write(&mut self, _frame: &AudioFrame) -> Result<()> {
        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 收集所有送达的帧
pub struct CollectingOutput<T> {
    name: String,
    frames: Mutex<Vec<T>>,
}

impl<T: Clone + Send> CollectingOutput<T> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            frames: Mutex::new(Vec::new()),
        }
    }

    pub fn frames(&self) -> Vec<T> {
        self.frames.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }
}

impl<T: Clone + Send> FrameSink<T> for CollectingOutput<T> {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn send(&self, frame: &T) -> Result<()> {
        self.frames.lock().push(frame.clone());
        Ok(())
    }
}

struct FakeTrack {
    kind: StreamKind,
    index: usize,
    params: CodecParameters,
}

/// 内存中的数据源：包按时间戳交错排列
pub struct FakeDemuxer {
    tracks: Vec<FakeTrack>,
    selected: HashMap<StreamKind, usize>,
    packets: Vec<MediaPacket>,
    cursor: usize,
    seeks: Arc<Mutex<Vec<i64>>>,
}

impl FakeDemuxer {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            selected: HashMap::new(),
            packets: Vec::new(),
            cursor: 0,
            seeks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 48kHz 立体声 pcm_f32le，每包 20ms 的时间戳
    pub fn pcm_params() -> CodecParameters {
        CodecParameters::audio("pcm_f32le", 48000, SampleFormat::F32, 2)
    }

    /// 2x2 rawvideo，25fps
    pub fn rawvideo_params() -> CodecParameters {
        CodecParameters::video("rawvideo", 2, 2, 25.0)
    }

    /// 视频流索引 0，音频流索引 1；数量为 0 的类型不建流
    pub fn audio_video(audio_packets: usize, video_packets: usize) -> Self {
        let mut demuxer = Self::new();
        if video_packets > 0 {
            demuxer = demuxer.with_stream(StreamKind::Video, 0, Self::rawvideo_params(), video_packets);
        }
        if audio_packets > 0 {
            demuxer = demuxer.with_stream(StreamKind::Audio, 1, Self::pcm_params(), audio_packets);
        }
        demuxer
    }

    /// 增加一条流；同类型的第一条流默认选中
    pub fn with_stream(mut self, kind: StreamKind, index: usize, params: CodecParameters, packets: usize) -> Self {
        let step = match kind {
            StreamKind::Video => 40,
            _ => 20,
        };
        let size = match kind {
            StreamKind::Video => params.width as usize * params.height as usize * 4,
            _ => 4 * params.channels.max(1) as usize * 4,
        };
        for i in 0..packets {
            let mut packet = Packet::new(vec![0; size], i as i64 * step);
            packet.duration = step;
            self.packets.push(MediaPacket {
                packet,
                kind,
                stream_index: index,
            });
        }
        // 稳定排序，同一时间戳视频在前
        self.packets.sort_by_key(|p| (p.packet.pts, p.kind != StreamKind::Video));
        self.selected.entry(kind).or_insert(index);
        self.tracks.push(FakeTrack { kind, index, params });
        self
    }

    pub fn seeks(&self) -> Arc<Mutex<Vec<i64>>> {
        self.seeks.clone()
    }

    fn track(&self, kind: StreamKind) -> Option<&FakeTrack> {
        let index = *self.selected.get(&kind)?;
        self.tracks.iter().find(|t| t.kind == kind && t.index == index)
    }
}

impl DemuxerSource for FakeDemuxer {
    fn current_stream_index(&self, kind: StreamKind) -> Option<usize> {
        self.track(kind).map(|t| t.index)
    }

    fn stream_indices(&self, kind: StreamKind) -> Vec<usize> {
        self.tracks.iter().filter(|t| t.kind == kind).map(|t| t.index).collect()
    }

    fn set_stream_index(&mut self, kind: StreamKind, index: usize) -> Result<()> {
        if !self.tracks.iter().any(|t| t.kind == kind && t.index == index) {
            return Err(PlayerError::InvalidState(format!("没有{}流 #{}", kind, index)));
        }
        self.selected.insert(kind, index);
        Ok(())
    }

    fn codec_parameters(&self, kind: StreamKind) -> Option<CodecParameters> {
        self.track(kind).map(|t| t.params.clone())
    }

    fn stream_info(&self, kind: StreamKind) -> Option<StreamInfo> {
        let track = self.track(kind)?;
        let frames = self
            .packets
            .iter()
            .filter(|p| p.kind == kind && p.stream_index == track.index)
            .count() as i64;
        Some(StreamInfo {
            index: track.index,
            codec_long_name: format!("fake {}", track.params.codec_id),
            duration_ms: Some(self.duration()),
            start_time_ms: Some(0),
            frames,
            ..Default::default()
        })
    }

    fn format_info(&self) -> FormatInfo {
        FormatInfo {
            url: "memory://fake".to_string(),
            name: "fake".to_string(),
            long_name: "fake demuxer".to_string(),
            ..Default::default()
        }
    }

    fn duration(&self) -> i64 {
        self.packets
            .iter()
            .map(|p| p.packet.pts + p.packet.duration)
            .max()
            .unwrap_or(0)
    }

    fn start_time(&self) -> i64 {
        0
    }

    fn frame_rate(&self) -> Option<f64> {
        self.codec_parameters(StreamKind::Video)
            .and_then(|p| p.known_frame_rate())
    }

    fn set_interrupt_timeout(&mut self, _timeout_ms: u64) {}

    fn read_packet(&mut self) -> Result<Option<MediaPacket>> {
        while let Some(packet) = self.packets.get(self.cursor) {
            self.cursor += 1;
            // 未选中的音轨不输出
            if self.selected.get(&packet.kind) == Some(&packet.stream_index) {
                return Ok(Some(packet.clone()));
            }
        }
        Ok(None)
    }

    fn seek(&mut self, timestamp_ms: i64) -> Result<()> {
        self.seeks.lock().push(timestamp_ms);
        self.cursor = self
            .packets
            .iter()
            .position(|p| p.packet.pts >= timestamp_ms)
            .unwrap_or(self.packets.len());
        Ok(())
    }

    fn description(&self) -> String {
        format!("FakeDemuxer({} 条流)", self.tracks.len())
    }
}
