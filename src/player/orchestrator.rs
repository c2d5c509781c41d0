use crate::core::{
    compute_notify_interval, AudioFrame, ClockType, CodecParameters, PlaybackClock, PlayerConfig,
    PlayerError, Result, StreamInfo, StreamKind, VideoFrame, WorkerState,
};
use crate::player::audio_format::{self, native_format};
use crate::player::audio_output::{
    probe_audio_output, share_sink, AudioOutputFactory, AudioSink, AudioSinkOutput,
    DefaultAudioOutputFactory, SharedAudioSink,
};
use crate::player::decoder::{AudioDecoderFactory, DecoderSlot, VideoDecoderFactory};
use crate::player::decoder_selector::{open_audio_decoder, DecoderSelector};
use crate::player::demuxer_source::{share_demuxer, DemuxerSource, SharedDemuxer};
use crate::player::demuxer_thread::{DemuxerThread, PacketTargets};
use crate::player::events::{event_channel, EventSender, PlayerEvent};
use crate::player::filter::{Filter, VideoEqualizer};
use crate::player::output::{FrameSink, OutputSet};
use crate::player::packet_queue::{PacketQueue, QueueBounds};
use crate::player::raw_codec::BuiltinDecoderFactory;
use crate::player::statistics::PlaybackStatistics;
use crate::player::worker::{
    AudioPostProcess, AudioWorker, PostDecode, StreamWorker, VideoPostProcess, VideoWorker,
};
use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};
use std::sync::Arc;

/// 单个流类型的建立结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    /// 解码器已就绪，包开始流动
    Ready { decoder: String },
    /// 媒体源没有这类流，不算错误
    Absent,
}

impl SetupOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, SetupOutcome::Ready { .. })
    }
}

/// 播放编排
///
/// 持有解封装线程、音视频解码线程、解码器槽位、输出集合与主时钟，
/// 负责首次播放和切换音轨/视频轨时的建立流程。
/// 所有方法都在同一条控制路径上调用（`&mut self`），建立流程执行期间
/// 解封装线程处于暂停状态。
pub struct PipelineOrchestrator {
    config: PlayerConfig,
    demuxer: SharedDemuxer,
    clock: PlaybackClock,
    events: EventSender,
    event_rx: Receiver<PlayerEvent>,
    statistics: PlaybackStatistics,

    selector: DecoderSelector,
    audio_decoders: Arc<dyn AudioDecoderFactory>,
    audio_output_factory: Arc<dyn AudioOutputFactory>,

    /// 显式设置或探测得到的音频设备
    audio_sink: Option<SharedAudioSink>,
    /// `audio_sink` 在输出集合中的登记项
    sink_output: Option<Arc<dyn FrameSink<AudioFrame>>>,
    /// 设备打开失败后到 stop() 之前不再探测或重开
    audio_output_failed: bool,
    audio_outputs: Arc<OutputSet<AudioFrame>>,
    video_outputs: Arc<OutputSet<VideoFrame>>,
    audio_filters: Vec<Arc<dyn Filter<AudioFrame>>>,
    video_filters: Vec<Arc<dyn Filter<VideoFrame>>>,
    equalizer: Arc<VideoEqualizer>,

    targets: Arc<PacketTargets>,
    audio_slot: Arc<DecoderSlot<AudioFrame>>,
    video_slot: Arc<DecoderSlot<VideoFrame>>,
    audio_worker: Option<AudioWorker>,
    video_worker: Option<VideoWorker>,
    producer: Option<DemuxerThread>,

    notify_interval: u32,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PlayerConfig,
        demuxer: Box<dyn DemuxerSource>,
        video_decoders: Arc<dyn VideoDecoderFactory>,
        audio_decoders: Arc<dyn AudioDecoderFactory>,
    ) -> Result<Self> {
        config.validate()?;

        let mut demuxer = demuxer;
        demuxer.set_interrupt_timeout(config.interrupt_timeout_ms);
        info!("📂 媒体源: {}", demuxer.description());

        let (events, event_rx) = event_channel(config.event_capacity);
        let bounds = QueueBounds::from_frame_rate(None, &config.queue);
        let targets = PacketTargets::new(
            Arc::new(PacketQueue::new(bounds)),
            Arc::new(PacketQueue::new(bounds)),
        );
        let equalizer = Arc::new(VideoEqualizer::new(
            config.brightness,
            config.contrast,
            config.saturation,
        ));

        Ok(Self {
            selector: DecoderSelector::new(config.video_backends.clone(), video_decoders),
            config,
            demuxer: share_demuxer(demuxer),
            clock: PlaybackClock::new(ClockType::AudioDriven),
            events,
            event_rx,
            statistics: PlaybackStatistics::default(),
            audio_decoders,
            audio_output_factory: Arc::new(DefaultAudioOutputFactory),
            audio_sink: None,
            sink_output: None,
            audio_output_failed: false,
            audio_outputs: Arc::new(OutputSet::new()),
            video_outputs: Arc::new(OutputSet::new()),
            audio_filters: Vec::new(),
            video_filters: Vec::new(),
            equalizer,
            targets: Arc::new(targets),
            audio_slot: Arc::new(DecoderSlot::new("audio")),
            video_slot: Arc::new(DecoderSlot::new("video")),
            audio_worker: None,
            video_worker: None,
            producer: None,
            notify_interval: compute_notify_interval(0, 0.0),
        })
    }

    /// 使用内置的 rawvideo / PCM 解码器
    pub fn with_builtin_codecs(config: PlayerConfig, demuxer: Box<dyn DemuxerSource>) -> Result<Self> {
        let factory = Arc::new(BuiltinDecoderFactory);
        Self::new(config, demuxer, factory.clone(), factory)
    }

    /// 使用 FFmpeg 解码器
    #[cfg(feature = "ffmpeg")]
    pub fn with_ffmpeg_codecs(config: PlayerConfig, demuxer: Box<dyn DemuxerSource>) -> Result<Self> {
        let factory = Arc::new(crate::player::ffmpeg_codec::FfmpegDecoderFactory::new()?);
        Self::new(config, demuxer, factory.clone(), factory)
    }

    // ========== 输出与滤镜 ==========

    /// 显式指定音频设备，None 表示之后按配置探测
    ///
    /// 音频已建立时立即重新协商格式。
    pub fn set_audio_output(&mut self, sink: Option<Box<dyn AudioSink>>) {
        self.detach_audio_sink();
        self.audio_sink = sink.map(share_sink);
        self.audio_output_failed = false;
        if self.audio_worker.is_some() {
            let paused = self.pause_producer();
            self.configure_audio_sink();
            self.resume_producer(paused);
        }
    }

    pub fn set_audio_output_factory(&mut self, factory: Arc<dyn AudioOutputFactory>) {
        self.audio_output_factory = factory;
    }

    pub fn add_video_output(&self, output: Arc<dyn FrameSink<VideoFrame>>) -> bool {
        self.video_outputs.add_output(output)
    }

    pub fn remove_video_output(&self, output: &Arc<dyn FrameSink<VideoFrame>>) -> bool {
        self.video_outputs.remove_output(output)
    }

    pub fn add_audio_output(&self, output: Arc<dyn FrameSink<AudioFrame>>) -> bool {
        self.audio_outputs.add_output(output)
    }

    pub fn remove_audio_output(&self, output: &Arc<dyn FrameSink<AudioFrame>>) -> bool {
        self.audio_outputs.remove_output(output)
    }

    /// 登记后的滤镜在之后创建的解码线程中也会生效
    pub fn install_video_filter(&mut self, filter: Arc<dyn Filter<VideoFrame>>) {
        if let Some(worker) = &self.video_worker {
            worker.install_filter(filter.clone());
        }
        self.video_filters.push(filter);
    }

    pub fn install_audio_filter(&mut self, filter: Arc<dyn Filter<AudioFrame>>) {
        if let Some(worker) = &self.audio_worker {
            worker.install_filter(filter.clone());
        }
        self.audio_filters.push(filter);
    }

    // ========== 画面调节 ==========

    pub fn set_brightness(&mut self, value: i32) {
        self.equalizer.set_brightness(value);
        self.config.brightness = self.equalizer.brightness();
    }

    pub fn set_contrast(&mut self, value: i32) {
        self.equalizer.set_contrast(value);
        self.config.contrast = self.equalizer.contrast();
    }

    pub fn set_saturation(&mut self, value: i32) {
        self.equalizer.set_saturation(value);
        self.config.saturation = self.equalizer.saturation();
    }

    // ========== 播放控制 ==========

    /// 初始化统计、建立音视频流并启动解封装线程
    ///
    /// 单个流失败不影响另一个；两个流都没有就绪时返回错误。
    pub fn start(&mut self) -> Result<()> {
        if self.producer.is_some() {
            return Err(PlayerError::InvalidState("已经在播放".to_string()));
        }

        let (format, duration, start_time) = {
            let demuxer = self.demuxer.lock();
            (demuxer.format_info(), demuxer.duration(), demuxer.start_time())
        };
        self.statistics.init_base(&format, duration, start_time);

        let audio = self.setup_audio_inner();
        let video = self.setup_video_inner();
        let ready = matches!(audio, Ok(SetupOutcome::Ready { .. }))
            || matches!(video, Ok(SetupOutcome::Ready { .. }));
        info!("🎬 流建立完成: 音频 {:?}, 视频 {:?}", audio, video);
        self.events.emit(PlayerEvent::StatisticsChanged);

        if !ready {
            error!("❌ 没有可播放的流");
            return Err(PlayerError::InvalidState("没有可播放的流".to_string()));
        }

        let interval = compute_notify_interval(duration, self.resolve_frame_rate().unwrap_or(0.0));
        if interval != self.notify_interval {
            self.notify_interval = interval;
            self.events.emit(PlayerEvent::NotifyIntervalChanged(interval));
        }

        self.producer = Some(DemuxerThread::start(self.demuxer.clone(), self.targets.clone())?);
        self.clock.play();
        info!("▶️ 开始播放");
        Ok(())
    }

    /// true 暂停，false 继续
    pub fn pause(&mut self, paused: bool) {
        if paused {
            self.clock.pause();
            if let Some(producer) = &self.producer {
                producer.pause();
            }
            if let Some(worker) = &self.audio_worker {
                worker.pause();
            }
            if let Some(worker) = &self.video_worker {
                worker.pause();
            }
            info!("⏸️ 暂停");
        } else {
            if let Some(worker) = &self.audio_worker {
                worker.resume();
            }
            if let Some(worker) = &self.video_worker {
                worker.resume();
            }
            if let Some(producer) = &self.producer {
                producer.resume();
            }
            self.clock.play();
            info!("▶️ 继续");
        }
    }

    /// 跳转到指定位置（毫秒）
    ///
    /// 解封装线程暂停期间完成跳转并清空队列，等解码线程丢弃旧包后再移动时钟，
    /// 旧位置的音频不会再推进时钟。
    pub fn seek(&mut self, timestamp_ms: i64) -> Result<()> {
        let timestamp_ms = timestamp_ms.max(0);
        let paused = self.pause_producer();
        let result = self.demuxer.lock().seek(timestamp_ms);
        if result.is_ok() {
            self.discard_queued(StreamKind::Audio);
            self.discard_queued(StreamKind::Video);
            self.clock.seek(timestamp_ms);
        }
        self.resume_producer(paused);
        result?;
        info!("⏩ Seek 到 {}ms", timestamp_ms);
        Ok(())
    }

    /// 停止所有线程、关闭解码器，时钟归零
    pub fn stop(&mut self) {
        if let Some(mut producer) = self.producer.take() {
            producer.stop();
        }
        self.teardown(StreamKind::Audio);
        self.teardown(StreamKind::Video);
        self.clock.reset();
        self.statistics.reset();
        self.audio_output_failed = false;
        info!("⏹️ 停止播放");
    }

    // ========== 音轨 / 视频轨 ==========

    pub fn set_audio_track(&mut self, index: usize) -> Result<SetupOutcome> {
        self.change_track(StreamKind::Audio, index)
    }

    pub fn set_video_track(&mut self, index: usize) -> Result<SetupOutcome> {
        self.change_track(StreamKind::Video, index)
    }

    fn change_track(&mut self, kind: StreamKind, index: usize) -> Result<SetupOutcome> {
        let paused = self.pause_producer();
        let selected = self.demuxer.lock().set_stream_index(kind, index);
        let result = selected.and_then(|_| match kind {
            StreamKind::Audio => self.setup_audio_inner(),
            _ => self.setup_video_inner(),
        });
        self.resume_producer(paused);
        info!("🔀 切换{}轨到 #{}: {:?}", kind, index, result);
        self.events.emit(PlayerEvent::StatisticsChanged);
        result
    }

    // ========== 建立流程 ==========

    /// 建立（或重建）音频流
    pub fn setup_audio_thread(&mut self) -> Result<SetupOutcome> {
        let paused = self.pause_producer();
        let result = self.setup_audio_inner();
        self.resume_producer(paused);
        result
    }

    /// 建立（或重建）视频流
    pub fn setup_video_thread(&mut self) -> Result<SetupOutcome> {
        let paused = self.pause_producer();
        let result = self.setup_video_inner();
        self.resume_producer(paused);
        result
    }

    fn setup_audio_inner(&mut self) -> Result<SetupOutcome> {
        let (params, info) = match self.selected_stream(StreamKind::Audio) {
            Some(selected) => selected,
            None => {
                info!("{}", PlayerError::StreamAbsent(StreamKind::Audio));
                self.teardown(StreamKind::Audio);
                self.statistics.reset_audio();
                self.set_clock_type(ClockType::Free);
                return Ok(SetupOutcome::Absent);
            }
        };

        // 断开旧解码器前先清空队列，正在解码的旧包处理完才关闭
        self.targets.set_enabled(StreamKind::Audio, false);
        self.discard_queued(StreamKind::Audio);
        self.audio_slot.close();
        let mut params = params;
        if !params.correct_audio_channels() {
            warn!("⚠️ 音频声道信息不完整: {} 声道", params.channels);
        }
        self.statistics.init_audio(&info, &params);

        self.audio_slot.begin_open()?;
        let handle = match open_audio_decoder(
            self.audio_decoders.as_ref(),
            &params,
            &self.config.audio_decoder_options,
        ) {
            Ok(handle) => handle,
            Err(e) => {
                self.audio_slot.abort_open();
                error!("❌ 音频解码器打开失败: {}", e);
                self.events.error(Some(StreamKind::Audio), &e);
                self.set_clock_type(ClockType::Free);
                return Err(e);
            }
        };
        let decoder = handle.name().to_string();
        self.audio_slot.install(handle)?;
        self.statistics.audio.decoder = decoder.clone();

        if self.audio_worker.is_none() {
            let worker = AudioWorker::new(
                self.audio_slot.clone(),
                self.targets.audio().clone(),
                self.clock.clone(),
                self.audio_outputs.clone(),
                AudioPostProcess::new(),
                self.events.clone(),
            );
            for filter in &self.audio_filters {
                worker.install_filter(filter.clone());
            }
            self.audio_worker = Some(worker);
        }

        // 重采样目标设在解码线程上，所以先建线程再协商设备
        self.configure_audio_sink();
        self.apply_queue_bounds();

        self.targets.set_enabled(StreamKind::Audio, true);
        self.run_worker(StreamKind::Audio)?;
        Ok(SetupOutcome::Ready { decoder })
    }

    fn setup_video_inner(&mut self) -> Result<SetupOutcome> {
        let (params, info) = match self.selected_stream(StreamKind::Video) {
            Some(selected) => selected,
            None => {
                info!("{}", PlayerError::StreamAbsent(StreamKind::Video));
                self.teardown(StreamKind::Video);
                self.statistics.reset_video();
                return Ok(SetupOutcome::Absent);
            }
        };

        self.targets.set_enabled(StreamKind::Video, false);
        self.discard_queued(StreamKind::Video);
        self.video_slot.close();
        self.statistics.init_video(&info, &params);

        // 按后端顺序尝试
        self.video_slot.begin_open()?;
        let handle = match self.selector.select(&params, &self.config.video_decoder_options) {
            Ok(handle) => handle,
            Err(e) => {
                self.video_slot.abort_open();
                error!("❌ 视频解码器打开失败: {}", e);
                self.events.error(Some(StreamKind::Video), &e);
                return Err(e);
            }
        };
        let decoder = handle.name().to_string();
        info!("🎞️ 视频解码器: {} ({})", decoder, handle.backend());
        self.video_slot.install(handle)?;
        self.statistics.video.decoder = decoder.clone();

        if self.video_worker.is_none() {
            let worker = VideoWorker::new(
                self.video_slot.clone(),
                self.targets.video().clone(),
                self.clock.clone(),
                self.video_outputs.clone(),
                VideoPostProcess::new(self.equalizer.clone()),
                self.events.clone(),
            );
            for filter in &self.video_filters {
                worker.install_filter(filter.clone());
            }
            self.video_worker = Some(worker);
        }

        self.apply_queue_bounds();
        self.targets.set_enabled(StreamKind::Video, true);
        self.run_worker(StreamKind::Video)?;
        Ok(SetupOutcome::Ready { decoder })
    }

    /// 当前选中流的编解码参数与元信息
    fn selected_stream(&self, kind: StreamKind) -> Option<(CodecParameters, StreamInfo)> {
        let demuxer = self.demuxer.lock();
        let index = demuxer.current_stream_index(kind)?;
        let params = demuxer.codec_parameters(kind)?;
        debug!("{}流 #{}: {}", kind, index, params.codec_id);
        let info = demuxer.stream_info(kind).unwrap_or_default();
        Some((params, info))
    }

    /// 音频设备协商；失败时只关闭音频输出，解码继续，时钟改为自由运行
    fn configure_audio_sink(&mut self) {
        let native = self
            .audio_slot
            .with_decoder(|d| native_format(d.params()))
            .flatten();

        if self.audio_sink.is_none() && self.config.audio_output_enabled && !self.audio_output_failed {
            self.audio_sink = probe_audio_output(
                self.audio_output_factory.as_ref(),
                &self.config.audio_outputs,
            )
            .map(share_sink);
        }

        let negotiated = match (&self.audio_sink, native) {
            (Some(sink), Some(native)) if self.config.audio_output_enabled => {
                let mut sink = sink.lock();
                let target = audio_format::negotiate(&native, &**sink);
                Some(audio_format::apply(&mut **sink, &target).map(|()| target))
            }
            _ => None,
        };

        let target = match negotiated {
            Some(Ok(target)) => Some(target),
            Some(Err(e)) => {
                error!("❌ {}", e);
                self.events.error(Some(StreamKind::Audio), &e);
                self.detach_audio_sink();
                self.audio_output_failed = true;
                None
            }
            None => None,
        };

        match (&target, &self.audio_sink) {
            (Some(_), Some(sink)) => {
                if self.sink_output.is_none() {
                    let output: Arc<dyn FrameSink<AudioFrame>> =
                        Arc::new(AudioSinkOutput::new(sink.clone()));
                    self.audio_outputs.add_output(output.clone());
                    self.sink_output = Some(output);
                }
                self.set_clock_type(ClockType::AudioDriven);
            }
            _ => {
                if let Some(output) = self.sink_output.take() {
                    self.audio_outputs.remove_output(&output);
                }
                debug!("没有可用的音频输出，时钟自由运行");
                self.set_clock_type(ClockType::Free);
            }
        }

        if let Some(worker) = &self.audio_worker {
            worker.with_post_process(|post| post.set_target_format(target));
        }
    }

    fn detach_audio_sink(&mut self) {
        if let Some(output) = self.sink_output.take() {
            self.audio_outputs.remove_output(&output);
        }
        if let Some(sink) = self.audio_sink.take() {
            sink.lock().close();
        }
    }

    /// 帧率显式取自视频流参数，其次是解封装方给出的平均帧率
    fn resolve_frame_rate(&self) -> Option<f64> {
        let demuxer = self.demuxer.lock();
        demuxer
            .codec_parameters(StreamKind::Video)
            .and_then(|p| p.known_frame_rate())
            .or_else(|| demuxer.frame_rate())
    }

    fn apply_queue_bounds(&self) {
        let bounds = QueueBounds::from_frame_rate(self.resolve_frame_rate(), &self.config.queue);
        self.targets.audio().set_bounds(bounds);
        self.targets.video().set_bounds(bounds);
        debug!("队列水位: {} / {}", bounds.threshold, bounds.capacity);
    }

    /// 清空该类型的包队列；解码线程存在时等它丢弃手头的旧包
    fn discard_queued(&self, kind: StreamKind) {
        let worker_done = match kind {
            StreamKind::Audio => self.audio_worker.as_ref().map(|w| w.discard_queued()),
            _ => self.video_worker.as_ref().map(|w| w.discard_queued()),
        };
        if worker_done.is_none() {
            match kind {
                StreamKind::Audio => self.targets.audio().clear(),
                _ => self.targets.video().clear(),
            };
        }
    }

    /// 未运行的线程启动；被用户暂停的线程保持暂停
    fn run_worker(&self, kind: StreamKind) -> Result<()> {
        match kind {
            StreamKind::Audio => self.audio_worker.as_ref().map_or(Ok(()), ensure_started),
            _ => self.video_worker.as_ref().map_or(Ok(()), ensure_started),
        }
    }

    /// 停掉该类型的解码线程、关闭解码器并停止向其队列投递
    fn teardown(&mut self, kind: StreamKind) {
        self.targets.set_enabled(kind, false);
        match kind {
            StreamKind::Audio => {
                if let Some(worker) = self.audio_worker.take() {
                    worker.stop();
                }
                self.audio_slot.close();
                self.targets.audio().clear();
            }
            _ => {
                if let Some(worker) = self.video_worker.take() {
                    worker.stop();
                }
                self.video_slot.close();
                self.targets.video().clear();
            }
        }
    }

    fn set_clock_type(&self, clock_type: ClockType) {
        if self.clock.clock_type() != clock_type {
            info!("⏱️ 时钟类型: {:?}", clock_type);
            self.clock.set_clock_type(clock_type);
            self.events.emit(PlayerEvent::ClockTypeChanged(clock_type));
        }
    }

    /// 返回是否由本次调用暂停
    fn pause_producer(&self) -> bool {
        match &self.producer {
            Some(producer) if !producer.is_paused() => {
                producer.pause();
                true
            }
            _ => false,
        }
    }

    fn resume_producer(&self, paused: bool) {
        if paused {
            if let Some(producer) = &self.producer {
                producer.resume();
            }
        }
    }

    // ========== 查询 ==========

    pub fn statistics(&self) -> &PlaybackStatistics {
        &self.statistics
    }

    /// 事件接收端（可多次克隆，事件只会被其中一个接收）
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.event_rx.clone()
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    pub fn notify_interval(&self) -> u32 {
        self.notify_interval
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn equalizer(&self) -> &Arc<VideoEqualizer> {
        &self.equalizer
    }

    pub fn audio_worker(&self) -> Option<&AudioWorker> {
        self.audio_worker.as_ref()
    }

    pub fn video_worker(&self) -> Option<&VideoWorker> {
        self.video_worker.as_ref()
    }

    pub fn packet_targets(&self) -> &Arc<PacketTargets> {
        &self.targets
    }

    pub fn is_playing(&self) -> bool {
        self.producer.is_some() && !self.clock.is_paused()
    }
}

fn ensure_started<P: PostDecode>(worker: &StreamWorker<P>) -> Result<()> {
    match worker.state() {
        WorkerState::Running | WorkerState::Paused => Ok(()),
        _ => worker.start(),
    }
}

impl Drop for PipelineOrchestrator {
    fn drop(&mut self) {
        self.stop();
        if let Some(sink) = self.audio_sink.take() {
            sink.lock().close();
        }
    }
}
