use crate::core::{ClockType, PlayerError, StreamKind};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::warn;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

/// 面向用户的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AvErrorKind {
    NoDecoderAvailable,
    AudioCodecNotFound,
    AudioOutputUnavailable,
    DecodeError,
    Other,
}

/// 一次失败对应一条错误
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvError {
    pub kind: AvErrorKind,
    pub stream: Option<StreamKind>,
    pub message: String,
}

impl AvError {
    pub fn from_player_error(stream: Option<StreamKind>, err: &PlayerError) -> Self {
        let kind = match err {
            PlayerError::NoDecoderAvailable { .. } => AvErrorKind::NoDecoderAvailable,
            PlayerError::AudioCodecNotFound(_) => AvErrorKind::AudioCodecNotFound,
            PlayerError::AudioOutputUnavailable(_) => AvErrorKind::AudioOutputUnavailable,
            PlayerError::DecodeError(_) => AvErrorKind::DecodeError,
            _ => AvErrorKind::Other,
        };
        Self {
            kind,
            stream,
            message: err.to_string(),
        }
    }
}

/// 播放事件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlayerEvent {
    /// 建立流时的失败，每次失败只发一条
    Error(AvError),
    /// 播放中单个包解码失败，解码线程会继续
    DecodeError { stream: StreamKind, pts: i64, message: String },
    StatisticsChanged,
    ClockTypeChanged(ClockType),
    NotifyIntervalChanged(u32),
}

impl PlayerEvent {
    /// 通道满时可以丢弃的事件
    pub fn is_droppable(&self) -> bool {
        matches!(self, PlayerEvent::DecodeError { .. } | PlayerEvent::StatisticsChanged)
    }
}

/// 有界事件通道的发送端，从不阻塞解码线程
///
/// 通道满时丢弃可丢弃的新事件；其他事件（建立失败、时钟切换）挤掉最早的可丢弃事件。
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<PlayerEvent>,
    /// 用于腾出空间
    rx: Receiver<PlayerEvent>,
    send_lock: Arc<Mutex<()>>,
}

impl EventSender {
    pub fn emit(&self, event: PlayerEvent) {
        let _guard = self.send_lock.lock();
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) if event.is_droppable() => {
                warn!("事件通道已满，丢弃: {:?}", event)
            }
            Err(TrySendError::Full(event)) => self.evict_for(event),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// 去掉最早的一个可丢弃事件，其余事件保持顺序
    fn evict_for(&self, event: PlayerEvent) {
        let mut queued: Vec<PlayerEvent> = self.rx.try_iter().collect();
        match queued.iter().position(PlayerEvent::is_droppable) {
            Some(index) => {
                let dropped = queued.remove(index);
                warn!("事件通道已满，丢弃: {:?}", dropped);
            }
            None => warn!("事件通道已满且没有可丢弃的事件"),
        }
        queued.push(event);
        for event in queued {
            if let Err(e) = self.tx.try_send(event) {
                warn!("事件通道已满，丢弃: {:?}", e.into_inner());
            }
        }
    }

    pub fn error(&self, stream: Option<StreamKind>, err: &PlayerError) {
        self.emit(PlayerEvent::Error(AvError::from_player_error(stream, err)));
    }
}

pub fn event_channel(capacity: usize) -> (EventSender, Receiver<PlayerEvent>) {
    let (tx, rx) = bounded(capacity.max(1));
    let sender = EventSender {
        tx,
        rx: rx.clone(),
        send_lock: Arc::new(Mutex::new(())),
    };
    (sender, rx)
}
