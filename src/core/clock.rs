use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// 主时钟类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockType {
    /// 由解码后的音频时间戳驱动
    AudioDriven,
    /// 没有音频驱动，按系统时间自由运行
    Free,
}

/// 视频帧相对主时钟的处理建议（视频节奏控制方读取）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Present,
    Hold(i64),
    Drop,
}

/// 播放时钟 - 用于音视频同步
///
/// 音频线程是唯一的写入方，视频侧可任意读取。
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    clock_type: ClockType,
    base_pts: i64,              // 基准 PTS（毫秒）
    base_instant: Instant,      // 基准时刻
    playback_rate: f64,         // 播放速率（1.0 = 正常）
    paused: bool,
    paused_at: i64,             // 暂停时的位置
    last_audio_pts: Option<i64>,
}

impl ClockInner {
    fn now(&self) -> i64 {
        if self.paused {
            self.paused_at
        } else {
            let elapsed = self.base_instant.elapsed().as_millis() as i64;
            self.base_pts + (elapsed as f64 * self.playback_rate) as i64
        }
    }

    fn anchor(&mut self, pts: i64) {
        self.base_pts = pts;
        self.base_instant = Instant::now();
        self.paused_at = pts;
    }
}

impl PlaybackClock {
    pub fn new(clock_type: ClockType) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                clock_type,
                base_pts: 0,
                base_instant: Instant::now(),
                playback_rate: 1.0,
                paused: true,
                paused_at: 0,
                last_audio_pts: None,
            })),
        }
    }

    /// 获取当前播放时间（毫秒）
    pub fn now(&self) -> i64 {
        self.inner.lock().now()
    }

    pub fn clock_type(&self) -> ClockType {
        self.inner.lock().clock_type
    }

    /// 切换时钟类型；切到 Free 时从当前位置继续走
    pub fn set_clock_type(&self, clock_type: ClockType) {
        let mut inner = self.inner.lock();
        if inner.clock_type == clock_type {
            return;
        }
        let current = inner.now();
        inner.anchor(current);
        inner.clock_type = clock_type;
        inner.last_audio_pts = None;
    }

    /// 用音频帧时间戳推进时钟
    ///
    /// 只在 AudioDriven 模式下生效；时间不会倒退，比上一次更早的时间戳被忽略。
    pub fn update_audio(&self, pts: i64) -> bool {
        let mut inner = self.inner.lock();
        if inner.clock_type != ClockType::AudioDriven {
            return false;
        }
        if let Some(last) = inner.last_audio_pts {
            if pts < last {
                return false;
            }
        }
        inner.last_audio_pts = Some(pts);
        inner.anchor(pts);
        true
    }

    /// 显式跳转（seek），允许时间倒退
    pub fn seek(&self, pts: i64) {
        let mut inner = self.inner.lock();
        inner.anchor(pts);
        inner.last_audio_pts = None;
    }

    /// 停止时重置：回到 0 并暂停
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.anchor(0);
        inner.paused = true;
        inner.last_audio_pts = None;
    }

    /// 开始播放
    pub fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.paused {
            inner.base_pts = inner.paused_at;
            inner.base_instant = Instant::now();
            inner.paused = false;
        }
    }

    /// 暂停播放
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.paused_at = inner.now();
            inner.paused = true;
        }
    }

    /// 设置播放速率
    pub fn set_rate(&self, rate: f64) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            let current_time = inner.now();
            inner.base_pts = current_time;
            inner.base_instant = Instant::now();
        }
        inner.playback_rate = rate;
    }

    /// 是否暂停
    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    /// 视频帧相对时钟的处理建议
    ///
    /// 帧比时钟晚超过 `threshold_ms` 丢弃，早于时钟则等待差值，否则立即显示。
    pub fn sync_action(&self, frame_pts: i64, threshold_ms: i64) -> SyncAction {
        let diff = frame_pts - self.now();
        if diff < -threshold_ms {
            SyncAction::Drop
        } else if diff > threshold_ms {
            SyncAction::Hold(diff)
        } else {
            SyncAction::Present
        }
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new(ClockType::AudioDriven)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_updates_do_not_regress() {
        let clock = PlaybackClock::new(ClockType::AudioDriven);
        assert!(clock.update_audio(1000));
        assert!(!clock.update_audio(900));
        assert_eq!(clock.now(), 1000);
        assert!(clock.update_audio(1040));
        assert_eq!(clock.now(), 1040);
    }

    #[test]
    fn test_seek_allows_regress() {
        let clock = PlaybackClock::new(ClockType::AudioDriven);
        clock.update_audio(5000);
        clock.seek(1000);
        assert_eq!(clock.now(), 1000);
        assert!(clock.update_audio(1020));
    }

    #[test]
    fn test_free_clock_ignores_audio() {
        let clock = PlaybackClock::new(ClockType::Free);
        assert!(!clock.update_audio(3000));
        assert_eq!(clock.now(), 0);
    }

    #[test]
    fn test_reset_returns_to_zero_and_pauses() {
        let clock = PlaybackClock::new(ClockType::AudioDriven);
        clock.play();
        clock.update_audio(2000);
        clock.reset();
        assert!(clock.is_paused());
        assert_eq!(clock.now(), 0);
        assert!(clock.update_audio(10));
    }

    #[test]
    fn test_sync_action() {
        let clock = PlaybackClock::new(ClockType::AudioDriven);
        clock.update_audio(1000);
        assert_eq!(clock.sync_action(1010, 40), SyncAction::Present);
        assert_eq!(clock.sync_action(900, 40), SyncAction::Drop);
        assert_eq!(clock.sync_action(1100, 40), SyncAction::Hold(100));
    }

    #[test]
    fn test_set_clock_type_keeps_position() {
        let clock = PlaybackClock::new(ClockType::AudioDriven);
        clock.update_audio(750);
        clock.set_clock_type(ClockType::Free);
        assert_eq!(clock.clock_type(), ClockType::Free);
        assert_eq!(clock.now(), 750);
    }
}
