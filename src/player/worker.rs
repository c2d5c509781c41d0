use crate::core::{
    log_ctx, AudioFormat, AudioFrame, PlaybackClock, PlayerError, Result, StreamKind, VideoFrame,
    WorkerState,
};
use crate::player::decoder::DecoderSlot;
use crate::player::events::{EventSender, PlayerEvent};
use crate::player::filter::{Filter, VideoEqualizer};
use crate::player::output::OutputSet;
use crate::player::packet::Packet;
use crate::player::packet_queue::PacketQueue;
use crate::player::resampler::{AudioResampler, PolynomialResampler};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 取包等待上限，超时后重新检查暂停/停止状态
const POP_TIMEOUT: Duration = Duration::from_millis(50);

/// 流类型相关的解码后处理
pub trait PostDecode: Send + 'static {
    type Frame: Send + 'static;

    fn kind(&self) -> StreamKind;

    fn process(&mut self, frame: Self::Frame, clock: &PlaybackClock) -> Result<Self::Frame>;

    /// 队列被清空（切换/跳转）后调用
    fn reset(&mut self) {}
}

/// 音频：重采样到协商后的格式，并用帧时间戳推进主时钟
pub struct AudioPostProcess {
    resampler: Option<Box<dyn AudioResampler>>,
}

impl AudioPostProcess {
    pub fn new() -> Self {
        Self { resampler: None }
    }

    pub fn set_resampler(&mut self, resampler: Box<dyn AudioResampler>) {
        self.resampler = Some(resampler);
    }

    /// None 表示不做转换（例如没有音频输出）
    pub fn set_target_format(&mut self, target: Option<AudioFormat>) {
        match (target, self.resampler.as_mut()) {
            (Some(format), Some(resampler)) => resampler.set_out_format(format),
            (Some(format), None) => self.resampler = Some(Box::new(PolynomialResampler::new(format))),
            (None, _) => self.resampler = None,
        }
    }

    pub fn target_format(&self) -> Option<AudioFormat> {
        self.resampler.as_ref().map(|r| r.out_format())
    }
}

impl Default for AudioPostProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl PostDecode for AudioPostProcess {
    type Frame = AudioFrame;

    fn kind(&self) -> StreamKind {
        StreamKind::Audio
    }

    fn process(&mut self, frame: AudioFrame, clock: &PlaybackClock) -> Result<AudioFrame> {
        let frame = match self.resampler.as_mut() {
            Some(resampler) => resampler.convert(&frame)?,
            None => frame,
        };
        clock.update_audio(frame.pts);
        Ok(frame)
    }

    fn reset(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}

/// 视频：亮度/对比度/饱和度
pub struct VideoPostProcess {
    equalizer: Arc<VideoEqualizer>,
}

impl VideoPostProcess {
    pub fn new(equalizer: Arc<VideoEqualizer>) -> Self {
        Self { equalizer }
    }

    pub fn equalizer(&self) -> &Arc<VideoEqualizer> {
        &self.equalizer
    }
}

impl PostDecode for VideoPostProcess {
    type Frame = VideoFrame;

    fn kind(&self) -> StreamKind {
        StreamKind::Video
    }

    fn process(&mut self, mut frame: VideoFrame, _clock: &PlaybackClock) -> Result<VideoFrame> {
        if self.equalizer.is_enabled() {
            self.equalizer.apply(&mut frame);
        }
        Ok(frame)
    }
}

struct WorkerShared<P: PostDecode> {
    kind: StreamKind,
    slot: Arc<DecoderSlot<P::Frame>>,
    queue: Arc<PacketQueue>,
    clock: PlaybackClock,
    outputs: Arc<OutputSet<P::Frame>>,
    filters: RwLock<Vec<Arc<dyn Filter<P::Frame>>>>,
    post: Mutex<P>,
    events: EventSender,
    state: Mutex<WorkerState>,
    state_changed: Condvar,
    /// 处理一个包（解码到输出）期间持有
    busy: Mutex<()>,
    frames_decoded: AtomicU64,
    decode_errors: AtomicU64,
}

impl<P: PostDecode> WorkerShared<P> {
    /// 等待暂停结束；返回 false 表示应退出
    fn wait_runnable(&self) -> bool {
        let mut state = self.state.lock();
        while *state == WorkerState::Paused {
            self.state_changed.wait(&mut state);
        }
        *state == WorkerState::Running
    }

    fn flush(&self) {
        let discarded = self
            .slot
            .with_decoder(|d| d.flush().map(|frames| frames.len()))
            .and_then(|r| r.ok())
            .unwrap_or(0);
        self.post.lock().reset();
        debug!("{} {} 解码器已刷新，丢弃 {} 帧", log_ctx(), self.kind, discarded);
    }

    /// `generation` 是取包时的队列代号；解码后队列已被清空则丢弃输出
    fn decode_packet(&self, packet: &Packet, generation: u64) {
        match self.slot.with_decoder(|d| d.decode(packet)) {
            None => debug!("{} 解码器未就绪，丢弃包 pts={}ms", self.kind, packet.pts),
            Some(Err(e)) => self.report_decode_error(packet.pts, &e),
            Some(Ok(frames)) => {
                for frame in frames {
                    if self.queue.generation() != generation {
                        debug!("{} 队列已清空，丢弃旧帧 pts={}ms", self.kind, packet.pts);
                        return;
                    }
                    self.deliver(frame, packet.pts);
                }
            }
        }
    }

    fn deliver(&self, mut frame: P::Frame, pts: i64) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);

        for filter in self.filters.read().iter() {
            if filter.is_enabled() {
                filter.apply(&mut frame);
            }
        }

        let frame = match self.post.lock().process(frame, &self.clock) {
            Ok(frame) => frame,
            Err(e) => {
                self.report_decode_error(pts, &e);
                return;
            }
        };
        self.outputs.send(&frame);
    }

    fn report_decode_error(&self, pts: i64, err: &PlayerError) {
        let count = self.decode_errors.fetch_add(1, Ordering::Relaxed) + 1;
        warn!("⚠️ {} 解码失败 (pts={}ms, 第 {} 次): {}", self.kind, pts, count, err);
        self.events.emit(PlayerEvent::DecodeError {
            stream: self.kind,
            pts,
            message: err.to_string(),
        });
    }
}

/// 流解码线程：取包 → 解码 → 滤镜 → 后处理 → 输出
///
/// 与一个解码器槽、一个包队列绑定。队列被清空时刷新解码器并丢弃其输出。
pub struct StreamWorker<P: PostDecode> {
    shared: Arc<WorkerShared<P>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

pub type AudioWorker = StreamWorker<AudioPostProcess>;
pub type VideoWorker = StreamWorker<VideoPostProcess>;

impl<P: PostDecode> StreamWorker<P> {
    pub fn new(
        slot: Arc<DecoderSlot<P::Frame>>,
        queue: Arc<PacketQueue>,
        clock: PlaybackClock,
        outputs: Arc<OutputSet<P::Frame>>,
        post: P,
        events: EventSender,
    ) -> Self {
        let kind = post.kind();
        Self {
            shared: Arc::new(WorkerShared {
                kind,
                slot,
                queue,
                clock,
                outputs,
                filters: RwLock::new(Vec::new()),
                post: Mutex::new(post),
                events,
                state: Mutex::new(WorkerState::Idle),
                state_changed: Condvar::new(),
                busy: Mutex::new(()),
                frames_decoded: AtomicU64::new(0),
                decode_errors: AtomicU64::new(0),
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.shared.kind
    }

    pub fn state(&self) -> WorkerState {
        *self.shared.state.lock()
    }

    pub fn slot(&self) -> &Arc<DecoderSlot<P::Frame>> {
        &self.shared.slot
    }

    pub fn queue(&self) -> &Arc<PacketQueue> {
        &self.shared.queue
    }

    pub fn outputs(&self) -> &Arc<OutputSet<P::Frame>> {
        &self.shared.outputs
    }

    pub fn frames_decoded(&self) -> u64 {
        self.shared.frames_decoded.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.shared.decode_errors.load(Ordering::Relaxed)
    }

    pub fn install_filter(&self, filter: Arc<dyn Filter<P::Frame>>) {
        self.shared.filters.write().push(filter);
    }

    pub fn uninstall_filter(&self, name: &str) -> bool {
        let mut filters = self.shared.filters.write();
        let before = filters.len();
        filters.retain(|f| f.name() != name);
        filters.len() != before
    }

    /// 清空包队列，并等待正在处理的包结束
    ///
    /// 返回后不会再有清空前取出的包被解码或输出，可以安全地更换解码器或跳转时钟。
    pub fn discard_queued(&self) -> usize {
        let dropped = self.shared.queue.clear();
        drop(self.shared.busy.lock());
        dropped
    }

    /// 修改后处理参数（例如新的音频目标格式）
    pub fn with_post_process<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        f(&mut self.shared.post.lock())
    }

    /// 从 Idle 或 Stopped 启动新的一轮；已在运行时不做任何事
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                WorkerState::Running | WorkerState::Paused => return Ok(()),
                WorkerState::Idle | WorkerState::Stopped => *state = WorkerState::Running,
            }
        }
        self.join();
        self.shared.frames_decoded.store(0, Ordering::Relaxed);
        self.shared.decode_errors.store(0, Ordering::Relaxed);

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-worker", self.shared.kind))
            .spawn(move || Self::run(shared));

        match spawned {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                *self.shared.state.lock() = WorkerState::Stopped;
                Err(e.into())
            }
        }
    }

    pub fn pause(&self) {
        let mut state = self.shared.state.lock();
        if *state == WorkerState::Running {
            *state = WorkerState::Paused;
            debug!("{} 解码线程暂停", self.shared.kind);
        }
    }

    pub fn resume(&self) {
        let mut state = self.shared.state.lock();
        if *state == WorkerState::Paused {
            *state = WorkerState::Running;
            self.shared.state_changed.notify_all();
            debug!("{} 解码线程恢复", self.shared.kind);
        }
    }

    /// 停止并等待线程退出
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state == WorkerState::Idle {
                return;
            }
            *state = WorkerState::Stopped;
            self.shared.state_changed.notify_all();
        }
        self.join();
    }

    fn join(&self) {
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("{} 解码线程异常退出", self.shared.kind);
            }
        }
    }

    fn run(shared: Arc<WorkerShared<P>>) {
        info!("{} 🎬 {} 解码线程启动", log_ctx(), shared.kind);
        let mut generation = shared.queue.generation();

        while shared.wait_runnable() {
            // 超时或被清空：回到循环开头检查状态
            let popped = shared.queue.pop_timeout_tagged(POP_TIMEOUT).ok();

            let _busy = shared.busy.lock();
            let current = shared.queue.generation();
            if current != generation {
                generation = current;
                shared.flush();
            }

            match popped {
                Some((packet, taken)) if taken == current => shared.decode_packet(&packet, current),
                Some((packet, _)) => debug!("{} 丢弃清空前取出的包 pts={}ms", shared.kind, packet.pts),
                None => {}
            }
        }

        info!(
            "{} ✅ {} 解码线程退出 (帧: {}, 错误: {})",
            log_ctx(),
            shared.kind,
            shared.frames_decoded.load(Ordering::Relaxed),
            shared.decode_errors.load(Ordering::Relaxed)
        );
    }
}

impl<P: PostDecode> Drop for StreamWorker<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ChannelLayout, ClockType, CodecParameters, PixelFormat, SampleFormat};
    use crate::player::decoder::{Decoder, DecoderHandle, VideoDecoder};
    use crate::player::events::event_channel;
    use crate::player::hw_decoder::BackendId;
    use crate::player::packet_queue::QueueBounds;
    use crate::testing::{wait_until, CollectingOutput, DecoderProbe, FakeAudioDecoder, FakeVideoDecoder};

    fn install_decoder(slot: &DecoderSlot<VideoFrame>, decoder: Box<VideoDecoder>) {
        slot.begin_open().unwrap();
        slot.install(DecoderHandle::new(decoder, BackendId::Software, CodecParameters::default()))
            .unwrap();
    }

    fn install_video(slot: &DecoderSlot<VideoFrame>, name: &str, probe: &Arc<DecoderProbe>) {
        let mut decoder = FakeVideoDecoder::new(name, probe.clone());
        decoder.open().unwrap();
        install_decoder(slot, Box::new(decoder));
    }

    /// 记录收到的包内容；带闸门时第一个包阻塞到测试放行
    struct GatedDecoder {
        seen: Arc<Mutex<Vec<u8>>>,
        gate: Option<(crossbeam_channel::Sender<()>, crossbeam_channel::Receiver<()>)>,
    }

    impl GatedDecoder {
        fn new(seen: &Arc<Mutex<Vec<u8>>>) -> Self {
            Self {
                seen: seen.clone(),
                gate: None,
            }
        }
    }

    impl Decoder for GatedDecoder {
        type Frame = VideoFrame;

        fn name(&self) -> String {
            "gated".to_string()
        }

        fn set_codec_parameters(&mut self, _params: &CodecParameters) {}

        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn decode(&mut self, packet: &Packet) -> Result<Vec<VideoFrame>> {
            self.seen.lock().push(packet.data[0]);
            if let Some((entered, release)) = self.gate.take() {
                let _ = entered.send(());
                let _ = release.recv_timeout(Duration::from_secs(2));
            }
            Ok(vec![VideoFrame {
                pts: packet.pts,
                duration: 40,
                width: 1,
                height: 1,
                format: PixelFormat::RGBA,
                data: packet.data.clone(),
            }])
        }

        fn close(&mut self) {}
    }

    struct VideoRig {
        worker: VideoWorker,
        queue: Arc<PacketQueue>,
        output: Arc<CollectingOutput<VideoFrame>>,
        events: crossbeam_channel::Receiver<PlayerEvent>,
    }

    fn video_rig(probe: &Arc<DecoderProbe>) -> VideoRig {
        let slot = Arc::new(DecoderSlot::new("video"));
        install_video(&slot, "v", probe);
        let queue = Arc::new(PacketQueue::new(QueueBounds { threshold: 50, capacity: 100 }));
        let outputs = Arc::new(OutputSet::new());
        let output = Arc::new(CollectingOutput::<VideoFrame>::new("collect"));
        outputs.add_output(output.clone());
        let (tx, events) = event_channel(16);
        let worker = StreamWorker::new(
            slot,
            queue.clone(),
            PlaybackClock::new(ClockType::Free),
            outputs,
            VideoPostProcess::new(Arc::new(VideoEqualizer::default())),
            tx,
        );
        VideoRig { worker, queue, output, events }
    }

    #[test]
    fn test_frames_delivered_in_order() {
        let probe = DecoderProbe::new();
        let rig = video_rig(&probe);
        rig.worker.start().unwrap();
        for pts in 0..10 {
            rig.queue.try_push(Packet::new(vec![1; 4], pts * 40)).unwrap();
        }
        assert!(wait_until(|| rig.output.len() == 10));
        let pts: Vec<i64> = rig.output.frames().iter().map(|f| f.pts).collect();
        assert_eq!(pts, (0..10).map(|p| p * 40).collect::<Vec<_>>());
        assert_eq!(rig.worker.frames_decoded(), 10);
        rig.worker.stop();
        assert_eq!(rig.worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_decode_error_reported_and_worker_continues() {
        let probe = DecoderProbe::new();
        let rig = video_rig(&probe);
        rig.worker.start().unwrap();
        let mut bad = Packet::new(vec![1; 4], 40);
        bad.corrupt = true;
        rig.queue.try_push(Packet::new(vec![1; 4], 0)).unwrap();
        rig.queue.try_push(bad).unwrap();
        rig.queue.try_push(Packet::new(vec![1; 4], 80)).unwrap();

        assert!(wait_until(|| rig.output.len() == 2));
        assert_eq!(rig.worker.decode_errors(), 1);
        match rig.events.try_recv().unwrap() {
            PlayerEvent::DecodeError { stream, pts, .. } => {
                assert_eq!(stream, StreamKind::Video);
                assert_eq!(pts, 40);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_paused_worker_does_not_consume() {
        let probe = DecoderProbe::new();
        let rig = video_rig(&probe);
        rig.worker.start().unwrap();
        rig.worker.pause();
        // 暂停前可能已经进入一次取包等待
        thread::sleep(POP_TIMEOUT * 2);
        rig.queue.try_push(Packet::new(vec![1; 4], 0)).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(rig.queue.len(), 1);

        rig.worker.resume();
        assert!(wait_until(|| rig.output.len() == 1));
    }

    #[test]
    fn test_clear_flushes_decoder() {
        let probe = DecoderProbe::new();
        let rig = video_rig(&probe);
        rig.worker.start().unwrap();
        rig.queue.try_push(Packet::new(vec![1; 4], 0)).unwrap();
        assert!(wait_until(|| rig.output.len() == 1));
        rig.queue.clear();
        assert!(wait_until(|| probe.flushed() == 1));
    }

    #[test]
    fn test_swapped_decoder_handles_later_packets() {
        let old_probe = DecoderProbe::new();
        let new_probe = DecoderProbe::new();
        let rig = video_rig(&old_probe);
        rig.worker.start().unwrap();
        rig.queue.try_push(Packet::new(vec![1; 4], 0)).unwrap();
        assert!(wait_until(|| rig.output.len() == 1));

        rig.worker.slot().close();
        install_video(rig.worker.slot(), "v2", &new_probe);
        rig.queue.try_push(Packet::new(vec![1; 4], 40)).unwrap();
        assert!(wait_until(|| rig.output.len() == 2));
        assert_eq!(old_probe.decoded(), 1);
        assert_eq!(new_probe.decoded(), 1);
        assert!(!old_probe.decoded_after_close());
    }

    #[test]
    fn test_packet_in_flight_during_clear_is_discarded() {
        let probe = DecoderProbe::new();
        let rig = video_rig(&probe);
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        let old_seen = Arc::new(Mutex::new(Vec::new()));
        let mut gated = GatedDecoder::new(&old_seen);
        gated.gate = Some((entered_tx, release_rx));
        rig.worker.slot().close();
        install_decoder(rig.worker.slot(), Box::new(gated));
        rig.worker.start().unwrap();

        rig.queue.try_push(Packet::new(vec![1; 4], 0)).unwrap();
        rig.queue.try_push(Packet::new(vec![1; 4], 40)).unwrap();
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let _ = release_tx.send(());
        });
        // 返回时正在解码的包已处理完，其输出被丢弃
        assert_eq!(rig.worker.discard_queued(), 1);
        releaser.join().unwrap();
        assert_eq!(rig.output.len(), 0);

        let new_seen = Arc::new(Mutex::new(Vec::new()));
        rig.worker.slot().close();
        install_decoder(rig.worker.slot(), Box::new(GatedDecoder::new(&new_seen)));
        rig.queue.try_push(Packet::new(vec![2; 4], 80)).unwrap();

        assert!(wait_until(|| rig.output.len() == 1));
        assert_eq!(rig.output.frames()[0].pts, 80);
        assert_eq!(*old_seen.lock(), vec![1]);
        assert_eq!(*new_seen.lock(), vec![2]);
    }

    #[test]
    fn test_restart_after_stop() {
        let probe = DecoderProbe::new();
        let rig = video_rig(&probe);
        rig.worker.start().unwrap();
        rig.worker.stop();
        rig.worker.start().unwrap();
        assert_eq!(rig.worker.state(), WorkerState::Running);
        rig.queue.try_push(Packet::new(vec![1; 4], 0)).unwrap();
        assert!(wait_until(|| rig.output.len() == 1));
    }

    #[test]
    fn test_audio_worker_drives_clock_and_resamples() {
        let params = CodecParameters::audio("pcm", 48000, SampleFormat::F32P, 6);
        let probe = DecoderProbe::new();
        let mut decoder = FakeAudioDecoder::new("a", probe.clone());
        decoder.set_codec_parameters(&params);
        decoder.open().unwrap();
        let slot = Arc::new(DecoderSlot::new("audio"));
        slot.begin_open().unwrap();
        slot.install(DecoderHandle::new(Box::new(decoder), BackendId::Software, params))
            .unwrap();

        let queue = Arc::new(PacketQueue::new(QueueBounds { threshold: 50, capacity: 100 }));
        let outputs = Arc::new(OutputSet::new());
        let output = Arc::new(CollectingOutput::<AudioFrame>::new("collect"));
        outputs.add_output(output.clone());
        let clock = PlaybackClock::new(ClockType::AudioDriven);
        let (tx, _events) = event_channel(16);

        let mut post = AudioPostProcess::new();
        post.set_target_format(Some(AudioFormat::new(48000, SampleFormat::F32, ChannelLayout::Stereo)));
        let worker = StreamWorker::new(slot, queue.clone(), clock.clone(), outputs, post, tx);
        worker.start().unwrap();

        queue.try_push(Packet::new(vec![0; 16], 1000)).unwrap();
        queue.try_push(Packet::new(vec![0; 16], 1020)).unwrap();
        assert!(wait_until(|| output.len() == 2));
        assert_eq!(clock.now(), 1020);
        let frame = &output.frames()[0];
        assert_eq!(frame.format.channels, 2);
        assert_eq!(frame.format.sample_format, SampleFormat::F32);
    }
}
