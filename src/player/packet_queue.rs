use crate::core::QueueSizing;
use crate::player::packet::Packet;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// 队列流控信号（不是面向用户的错误）
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSignal {
    #[error("队列已满")]
    Full,
    #[error("队列为空")]
    Empty,
    #[error("队列已被清空")]
    Cleared,
}

/// 入队失败，交还未入队的元素
pub struct PushError<T> {
    pub signal: QueueSignal,
    pub item: T,
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        self.item
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushError").field("signal", &self.signal).finish_non_exhaustive()
    }
}

/// 低水位 / 高水位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueBounds {
    pub threshold: usize,
    pub capacity: usize,
}

impl QueueBounds {
    /// 根据帧率计算水位，帧率未知或低于下限时按下限计算
    pub fn from_frame_rate(frame_rate: Option<f64>, sizing: &QueueSizing) -> Self {
        let fps = match frame_rate {
            Some(fps) if fps.is_finite() && fps > sizing.min_frame_rate => fps,
            _ => sizing.min_frame_rate,
        };
        let threshold = (sizing.threshold_ratio * fps).floor() as usize;
        let capacity = (sizing.capacity_ratio * threshold as f64).floor() as usize;
        Self {
            threshold,
            capacity: capacity.max(threshold),
        }
    }
}

impl Default for QueueBounds {
    fn default() -> Self {
        Self::from_frame_rate(None, &QueueSizing::default())
    }
}

struct QueueState<T> {
    items: VecDeque<T>,
    threshold: usize,
    capacity: usize,
    /// 曾经满过，需等到降到低水位以下才允许继续写入
    capped: bool,
    /// 每次 clear() 加一，用于唤醒等待方并让消费方感知切换
    generation: u64,
}

impl<T> QueueState<T> {
    fn has_room(&mut self) -> bool {
        if self.capped {
            if self.items.len() <= self.threshold {
                self.capped = false;
            } else {
                return false;
            }
        }
        if self.items.len() >= self.capacity {
            self.capped = true;
            return false;
        }
        true
    }
}

/// 有界包队列：解封装线程写入，解码线程读取，先进先出
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

pub type PacketQueue = BoundedQueue<Packet>;

impl<T> BoundedQueue<T> {
    pub fn new(bounds: QueueBounds) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(bounds.capacity),
                threshold: bounds.threshold.min(bounds.capacity),
                capacity: bounds.capacity,
                capped: false,
                generation: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// 非阻塞写入；已满时返回 Full
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.state.lock();
        if !state.has_room() {
            return Err(PushError {
                signal: QueueSignal::Full,
                item,
            });
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// 阻塞写入，直到有空间或队列被清空
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        self.push_until(item, None)
    }

    /// 限时写入，超时返回 Full
    pub fn push_timeout(&self, item: T, timeout: Duration) -> Result<(), PushError<T>> {
        self.push_until(item, Some(Instant::now() + timeout))
    }

    fn push_until(&self, item: T, deadline: Option<Instant>) -> Result<(), PushError<T>> {
        let mut state = self.state.lock();
        let generation = state.generation;
        let mut timed_out = false;
        loop {
            if state.generation != generation {
                return Err(PushError {
                    signal: QueueSignal::Cleared,
                    item,
                });
            }
            if state.has_room() {
                state.items.push_back(item);
                drop(state);
                self.not_empty.notify_one();
                return Ok(());
            }
            if timed_out {
                return Err(PushError {
                    signal: QueueSignal::Full,
                    item,
                });
            }
            match deadline {
                Some(deadline) => {
                    timed_out = self.not_full.wait_until(&mut state, deadline).timed_out();
                }
                None => self.not_full.wait(&mut state),
            }
        }
    }

    /// 非阻塞读取；为空时返回 Empty
    pub fn try_pop(&self) -> Result<T, QueueSignal> {
        let mut state = self.state.lock();
        match state.items.pop_front() {
            Some(item) => {
                drop(state);
                self.not_full.notify_all();
                Ok(item)
            }
            None => Err(QueueSignal::Empty),
        }
    }

    /// 阻塞读取，直到有数据或队列被清空
    pub fn pop(&self) -> Result<T, QueueSignal> {
        self.pop_until(None).map(|(item, _)| item)
    }

    /// 限时读取，超时返回 Empty
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, QueueSignal> {
        self.pop_until(Some(Instant::now() + timeout)).map(|(item, _)| item)
    }

    /// 同 `pop_timeout`，同时返回取出时的代号
    ///
    /// 消费方处理前与 `generation()` 比较，不同说明取出后队列被清空过。
    pub fn pop_timeout_tagged(&self, timeout: Duration) -> Result<(T, u64), QueueSignal> {
        self.pop_until(Some(Instant::now() + timeout))
    }

    fn pop_until(&self, deadline: Option<Instant>) -> Result<(T, u64), QueueSignal> {
        let mut state = self.state.lock();
        let generation = state.generation;
        let mut timed_out = false;
        loop {
            if state.generation != generation {
                return Err(QueueSignal::Cleared);
            }
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_all();
                return Ok((item, generation));
            }
            if timed_out {
                return Err(QueueSignal::Empty);
            }
            match deadline {
                Some(deadline) => {
                    timed_out = self.not_empty.wait_until(&mut state, deadline).timed_out();
                }
                None => self.not_empty.wait(&mut state),
            }
        }
    }

    /// 丢弃所有缓存的元素并唤醒所有等待方，返回丢弃的数量
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.items.len();
        state.items.clear();
        state.capped = false;
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
        dropped
    }

    /// 修改低水位；超过高水位时高水位随之抬高
    pub fn set_threshold(&self, threshold: usize) {
        let mut state = self.state.lock();
        state.threshold = threshold;
        if state.capacity < threshold {
            state.capacity = threshold;
        }
        drop(state);
        self.not_full.notify_all();
    }

    /// 修改高水位；不会丢弃已缓存的元素，低水位超过高水位时随之降低
    pub fn set_capacity(&self, capacity: usize) {
        let mut state = self.state.lock();
        state.capacity = capacity;
        if state.threshold > capacity {
            state.threshold = capacity;
        }
        drop(state);
        self.not_full.notify_all();
    }

    pub fn set_bounds(&self, bounds: QueueBounds) {
        self.set_capacity(bounds.capacity);
        self.set_threshold(bounds.threshold.min(bounds.capacity));
    }

    pub fn bounds(&self) -> QueueBounds {
        let state = self.state.lock();
        QueueBounds {
            threshold: state.threshold,
            capacity: state.capacity,
        }
    }

    pub fn threshold(&self) -> usize {
        self.state.lock().threshold
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// 是否处于“满后等待回落”状态
    pub fn is_capped(&self) -> bool {
        self.state.lock().capped
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}

impl<T> Default for BoundedQueue<T> {
    fn default() -> Self {
        Self::new(QueueBounds::default())
    }
}
