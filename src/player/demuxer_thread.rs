use crate::core::{log_ctx, PlayerError, Result, StreamKind};
use crate::player::demuxer_source::SharedDemuxer;
use crate::player::packet::Packet;
use crate::player::packet_queue::{PacketQueue, QueueSignal};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 队列满时每次等待的时长，之后检查是否需要让出
const PUSH_TIMEOUT: Duration = Duration::from_millis(20);
/// 到达 EOF 后等待命令的间隔
const EOF_IDLE: Duration = Duration::from_millis(100);
/// 日志：每种流只详细打印前 N 个包
const LOG_FIRST_N: usize = 5;

/// Demuxer 线程命令
pub enum DemuxerCommand {
    Seek(i64), // ms
    Stop,
}

/// 解封装线程写入的目标队列，每种流可单独启用
///
/// 未启用的流（不存在或解码器打开失败）的包直接丢弃，避免其队列写满后卡住其他流。
pub struct PacketTargets {
    audio: Arc<PacketQueue>,
    video: Arc<PacketQueue>,
    audio_enabled: AtomicBool,
    video_enabled: AtomicBool,
}

impl PacketTargets {
    pub fn new(audio: Arc<PacketQueue>, video: Arc<PacketQueue>) -> Self {
        Self {
            audio,
            video,
            audio_enabled: AtomicBool::new(false),
            video_enabled: AtomicBool::new(false),
        }
    }

    pub fn set_enabled(&self, kind: StreamKind, enabled: bool) {
        match kind {
            StreamKind::Audio => self.audio_enabled.store(enabled, Ordering::SeqCst),
            StreamKind::Video => self.video_enabled.store(enabled, Ordering::SeqCst),
            StreamKind::Subtitle => {}
        }
    }

    pub fn is_enabled(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Audio => self.audio_enabled.load(Ordering::SeqCst),
            StreamKind::Video => self.video_enabled.load(Ordering::SeqCst),
            StreamKind::Subtitle => false,
        }
    }

    pub fn audio(&self) -> &Arc<PacketQueue> {
        &self.audio
    }

    pub fn video(&self) -> &Arc<PacketQueue> {
        &self.video
    }

    /// 已启用流的队列
    pub fn queue(&self, kind: StreamKind) -> Option<&Arc<PacketQueue>> {
        if !self.is_enabled(kind) {
            return None;
        }
        match kind {
            StreamKind::Audio => Some(&self.audio),
            StreamKind::Video => Some(&self.video),
            StreamKind::Subtitle => None,
        }
    }

    pub fn clear_all(&self) {
        self.audio.clear();
        self.video.clear();
    }
}

struct GateState {
    pause_requested: bool,
    busy: bool,
    stopped: bool,
}

/// 暂停闸门：`pause()` 返回时解封装线程一定处于空闲（没有正在读或写的包）
struct ProducerGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl ProducerGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                pause_requested: false,
                busy: false,
                stopped: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// 进入工作区；返回 false 表示应退出
    fn acquire(&self) -> bool {
        let mut state = self.state.lock();
        while state.pause_requested && !state.stopped {
            self.cond.wait(&mut state);
        }
        if state.stopped {
            return false;
        }
        state.busy = true;
        true
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.busy = false;
        self.cond.notify_all();
    }

    fn should_yield(&self) -> bool {
        let state = self.state.lock();
        state.pause_requested || state.stopped
    }

    fn pause(&self) {
        let mut state = self.state.lock();
        state.pause_requested = true;
        while state.busy && !state.stopped {
            self.cond.wait(&mut state);
        }
    }

    fn resume(&self) {
        let mut state = self.state.lock();
        state.pause_requested = false;
        self.cond.notify_all();
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        self.cond.notify_all();
    }

    fn is_paused(&self) -> bool {
        self.state.lock().pause_requested
    }
}

/// 因队列满而暂存的包，连同读取时所属队列的代号
struct Pending {
    kind: StreamKind,
    packet: Packet,
    generation: u64,
}

enum Step {
    Progress,
    Eof,
    Failed,
}

#[derive(Default)]
struct Counters {
    total: usize,
    video: usize,
    audio: usize,
}

struct Producer {
    demuxer: SharedDemuxer,
    targets: Arc<PacketTargets>,
    gate: Arc<ProducerGate>,
    pending: Option<Pending>,
    counters: Counters,
}

impl Producer {
    /// 返回 false 表示收到停止命令
    fn handle_command(&mut self, cmd: DemuxerCommand) -> bool {
        match cmd {
            DemuxerCommand::Seek(timestamp_ms) => {
                info!("{} ⏩ Demuxer 线程收到 Seek 命令: {}ms", log_ctx(), timestamp_ms);
                if let Err(e) = self.demuxer.lock().seek(timestamp_ms) {
                    error!("{} ❌ Seek 失败: {}", log_ctx(), e);
                }
                self.pending = None;
                self.targets.clear_all();
                true
            }
            DemuxerCommand::Stop => {
                info!("{} ⏹ Demuxer 线程收到停止命令", log_ctx());
                false
            }
        }
    }

    fn step(&mut self, command_rx: &Receiver<DemuxerCommand>) -> Step {
        let pending = match self.pending.take() {
            Some(pending) => pending,
            None => match self.read() {
                Ok(Some(pending)) => pending,
                Ok(None) => return Step::Eof,
                Err(e) => {
                    error!("{} ❌ 读取包失败: {}", log_ctx(), e);
                    return Step::Failed;
                }
            },
        };
        self.push(pending, command_rx);
        Step::Progress
    }

    /// 读取下一个属于已选中流的包
    fn read(&mut self) -> Result<Option<Pending>> {
        let mut demuxer = self.demuxer.lock();
        loop {
            let Some(media) = demuxer.read_packet()? else {
                return Ok(None);
            };
            if demuxer.current_stream_index(media.kind) != Some(media.stream_index) {
                continue;
            }
            let Some(queue) = self.targets.queue(media.kind) else {
                continue;
            };

            self.counters.total += 1;
            let count = match media.kind {
                StreamKind::Video => {
                    self.counters.video += 1;
                    self.counters.video
                }
                _ => {
                    self.counters.audio += 1;
                    self.counters.audio
                }
            };
            if count <= LOG_FIRST_N || count % 100 == 0 {
                debug!(
                    "{} 📦 Demuxer 读取{}包 #{}（total packets {}）",
                    log_ctx(),
                    media.kind,
                    count,
                    self.counters.total
                );
            }

            return Ok(Some(Pending {
                kind: media.kind,
                packet: media.packet,
                generation: queue.generation(),
            }));
        }
    }

    /// 写入队列；队列满且需要让出（暂停/停止/有命令）时暂存该包
    fn push(&mut self, mut pending: Pending, command_rx: &Receiver<DemuxerCommand>) {
        let Some(queue) = self.targets.queue(pending.kind).cloned() else {
            return;
        };
        loop {
            if queue.generation() != pending.generation {
                debug!("{} 队列已清空，丢弃旧包 pts={}ms", pending.kind, pending.packet.pts);
                return;
            }
            match queue.push_timeout(pending.packet, PUSH_TIMEOUT) {
                Ok(()) => return,
                Err(e) if e.signal == QueueSignal::Cleared => return,
                Err(e) => {
                    pending.packet = e.into_inner();
                    if self.gate.should_yield() || !command_rx.is_empty() {
                        self.pending = Some(pending);
                        return;
                    }
                }
            }
        }
    }

    fn run(mut self, command_rx: Receiver<DemuxerCommand>) {
        info!("{} 🎬 Demuxer 线程启动: {}", log_ctx(), self.demuxer.lock().description());

        'outer: loop {
            for cmd in command_rx.try_iter() {
                if !self.handle_command(cmd) {
                    break 'outer;
                }
            }

            if !self.gate.acquire() {
                break;
            }
            let step = self.step(&command_rx);
            self.gate.release();

            match step {
                Step::Progress => {}
                Step::Eof => {
                    // 到达 EOF：保持线程存活，等待 Seek/Stop
                    debug!("{} 📄 Demuxer 到达文件末尾，等待命令（Seek/Stop）...", log_ctx());
                    match command_rx.recv_timeout(EOF_IDLE) {
                        Ok(cmd) => {
                            if !self.handle_command(cmd) {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                Step::Failed => break,
            }
        }

        info!(
            "{} 🛑 Demuxer 线程退出（共读取 {} 个包：{} 视频，{} 音频）",
            log_ctx(),
            self.counters.total,
            self.counters.video,
            self.counters.audio
        );
    }
}

/// Demuxer 线程管理器
///
/// 读包并按流类型写入各自的有界队列，队列满时自然背压。
pub struct DemuxerThread {
    thread_handle: Option<JoinHandle<()>>,
    command_tx: Sender<DemuxerCommand>,
    gate: Arc<ProducerGate>,
}

impl DemuxerThread {
    /// 启动 Demuxer 线程
    pub fn start(demuxer: SharedDemuxer, targets: Arc<PacketTargets>) -> Result<Self> {
        // 命令通道（unbounded 足够）
        let (command_tx, command_rx) = unbounded::<DemuxerCommand>();
        let gate = Arc::new(ProducerGate::new());

        let producer = Producer {
            demuxer,
            targets,
            gate: gate.clone(),
            pending: None,
            counters: Counters::default(),
        };
        let thread_handle = thread::Builder::new()
            .name("demuxer".to_string())
            .spawn(move || producer.run(command_rx))?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            command_tx,
            gate,
        })
    }

    /// 发送 Seek 命令
    pub fn seek(&self, timestamp_ms: i64) -> Result<()> {
        self.command_tx
            .send(DemuxerCommand::Seek(timestamp_ms))
            .map_err(|e| PlayerError::Other(format!("发送 Seek 命令失败: {}", e)))
    }

    /// 暂停读取，返回时线程已空闲
    pub fn pause(&self) {
        self.gate.pause();
    }

    /// 恢复读取
    pub fn resume(&self) {
        self.gate.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// 停止线程
    /// - 发送 Stop 命令
    /// - 打开暂停闸门
    /// - join 线程
    pub fn stop(&mut self) {
        info!("{} 🛑 DemuxerThread::stop() called", log_ctx());
        let _ = self.command_tx.send(DemuxerCommand::Stop);
        self.gate.stop();

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("{} ⚠ Demuxer 线程异常退出", log_ctx());
            }
        }
    }
}

impl Drop for DemuxerThread {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            warn!("{} ⚠ DemuxerThread 被 drop，但可能未调用 stop()，正在尝试优雅停止", log_ctx());
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::demuxer_source::share_demuxer;
    use crate::player::packet_queue::QueueBounds;
    use crate::testing::{wait_until, FakeDemuxer};

    fn targets(threshold: usize, capacity: usize) -> Arc<PacketTargets> {
        let bounds = QueueBounds { threshold, capacity };
        let targets = PacketTargets::new(
            Arc::new(PacketQueue::new(bounds)),
            Arc::new(PacketQueue::new(bounds)),
        );
        targets.set_enabled(StreamKind::Audio, true);
        targets.set_enabled(StreamKind::Video, true);
        Arc::new(targets)
    }

    fn drain_pts(queue: &PacketQueue) -> Vec<i64> {
        let mut out = Vec::new();
        while let Ok(p) = queue.try_pop() {
            out.push(p.pts);
        }
        out
    }

    #[test]
    fn test_packets_routed_by_kind_in_order() {
        let demuxer = share_demuxer(Box::new(FakeDemuxer::audio_video(5, 5)));
        let targets = targets(50, 100);
        let mut producer = DemuxerThread::start(demuxer, targets.clone()).unwrap();

        assert!(wait_until(|| targets.audio.len() == 5 && targets.video.len() == 5));
        producer.stop();
        assert_eq!(drain_pts(&targets.video), vec![0, 40, 80, 120, 160]);
        assert_eq!(drain_pts(&targets.audio), vec![0, 20, 40, 60, 80]);
    }

    #[test]
    fn test_disabled_kind_is_dropped() {
        let demuxer = share_demuxer(Box::new(FakeDemuxer::audio_video(5, 5)));
        let targets = targets(50, 100);
        targets.set_enabled(StreamKind::Audio, false);
        let mut producer = DemuxerThread::start(demuxer, targets.clone()).unwrap();

        assert!(wait_until(|| targets.video.len() == 5));
        thread::sleep(Duration::from_millis(50));
        producer.stop();
        assert!(targets.audio.is_empty());
    }

    #[test]
    fn test_pause_is_synchronous() {
        let demuxer = share_demuxer(Box::new(FakeDemuxer::audio_video(0, 20)));
        let targets = targets(2, 4);
        let mut producer = DemuxerThread::start(demuxer, targets.clone()).unwrap();
        assert!(wait_until(|| targets.video.is_capped()));

        producer.pause();
        assert!(producer.is_paused());
        drain_pts(&targets.video);
        thread::sleep(Duration::from_millis(100));
        assert!(targets.video.is_empty());

        producer.resume();
        assert!(wait_until(|| !targets.video.is_empty()));
        producer.stop();
    }

    #[test]
    fn test_parked_packet_dropped_after_clear() {
        let demuxer = share_demuxer(Box::new(FakeDemuxer::audio_video(0, 10)));
        let targets = targets(1, 2);
        let mut producer = DemuxerThread::start(demuxer, targets.clone()).unwrap();
        assert!(wait_until(|| targets.video.is_capped()));

        // 第 3 个包 (pts=80) 因队列满被暂存
        producer.pause();
        targets.video.clear();
        producer.resume();

        assert!(wait_until(|| targets.video.len() == 2));
        producer.stop();
        assert_eq!(drain_pts(&targets.video), vec![120, 160]);
    }

    #[test]
    fn test_seek_clears_queues() {
        let fake = FakeDemuxer::audio_video(0, 10);
        let seeks = fake.seeks();
        let demuxer = share_demuxer(Box::new(fake));
        let targets = targets(50, 100);
        let mut producer = DemuxerThread::start(demuxer, targets.clone()).unwrap();
        assert!(wait_until(|| targets.video.len() == 10));

        let generation = targets.video.generation();
        producer.seek(200).unwrap();
        assert!(wait_until(|| targets.video.generation() != generation && targets.video.len() == 5));
        producer.stop();
        assert_eq!(*seeks.lock(), vec![200]);
        assert_eq!(drain_pts(&targets.video), vec![200, 240, 280, 320, 360]);
    }

    #[test]
    fn test_stop_while_blocked_on_full_queue() {
        let demuxer = share_demuxer(Box::new(FakeDemuxer::audio_video(0, 50)));
        let targets = targets(1, 2);
        let mut producer = DemuxerThread::start(demuxer, targets.clone()).unwrap();
        assert!(wait_until(|| targets.video.is_capped()));
        producer.stop();
        assert!(!producer.is_running());
    }
}
