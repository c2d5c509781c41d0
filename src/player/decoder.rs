use crate::core::{AudioFrame, CodecParameters, DecoderOptions, PlayerError, Result, VideoFrame};
use crate::player::hw_decoder::BackendId;
use crate::player::packet::Packet;
use log::{debug, info};
use parking_lot::Mutex;

/// 解码器接口
///
/// 打开流程分两步：`prepare()` 做与编解码参数无关的准备（如硬件上下文），
/// `open()` 真正打开解码器。打开失败时不要自行上报错误，由调用方统一上报一次。
pub trait Decoder: Send {
    type Frame;

    fn name(&self) -> String;

    fn set_codec_parameters(&mut self, params: &CodecParameters);

    fn set_options(&mut self, _options: &DecoderOptions) {}

    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    fn open(&mut self) -> Result<()>;

    /// 解码一个包，输出 0~n 帧
    fn decode(&mut self, packet: &Packet) -> Result<Vec<Self::Frame>>;

    /// 刷新内部缓存（切换/跳转后调用）
    fn flush(&mut self) -> Result<Vec<Self::Frame>> {
        Ok(Vec::new())
    }

    fn close(&mut self);
}

pub type VideoDecoder = dyn Decoder<Frame = VideoFrame>;
pub type AudioDecoder = dyn Decoder<Frame = AudioFrame>;

/// 按后端标识创建视频解码器；不支持的后端返回 None
pub trait VideoDecoderFactory: Send + Sync {
    fn create(&self, backend: BackendId) -> Option<Box<VideoDecoder>>;
}

/// 音频只有一种解码器类型
pub trait AudioDecoderFactory: Send + Sync {
    fn create(&self) -> Option<Box<AudioDecoder>>;
}

/// 已打开的解码器，绑定一份编解码参数快照与一个后端
///
/// 由 DecoderSlot 独占持有；关闭后不可再用。
pub struct DecoderHandle<F> {
    decoder: Box<dyn Decoder<Frame = F>>,
    backend: BackendId,
    params: CodecParameters,
    name: String,
    open: bool,
}

impl<F> DecoderHandle<F> {
    /// 包装一个已经 open 成功的解码器
    pub fn new(decoder: Box<dyn Decoder<Frame = F>>, backend: BackendId, params: CodecParameters) -> Self {
        let name = decoder.name();
        Self {
            decoder,
            backend,
            params,
            name,
            open: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> BackendId {
        self.backend
    }

    pub fn params(&self) -> &CodecParameters {
        &self.params
    }

    pub fn decode(&mut self, packet: &Packet) -> Result<Vec<F>> {
        self.decoder.decode(packet)
    }

    pub fn flush(&mut self) -> Result<Vec<F>> {
        self.decoder.flush()
    }

    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.open {
            debug!("关闭解码器: {} ({})", self.name, self.backend);
            self.decoder.close();
            self.open = false;
        }
    }
}

impl<F> Drop for DecoderHandle<F> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 解码器槽状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Closed,
    Opening,
    Open,
    Closing,
}

struct SlotInner<F> {
    state: SlotState,
    handle: Option<DecoderHandle<F>>,
}

/// 每个流类型最多一个活动解码器
///
/// 解码在槽锁内进行：`close()`/`install()` 返回后，旧解码器不会再处理任何包。
pub struct DecoderSlot<F> {
    kind: &'static str,
    inner: Mutex<SlotInner<F>>,
}

impl<F> DecoderSlot<F> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            inner: Mutex::new(SlotInner {
                state: SlotState::Closed,
                handle: None,
            }),
        }
    }

    pub fn state(&self) -> SlotState {
        self.inner.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == SlotState::Open
    }

    /// Closed → Opening
    pub fn begin_open(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            SlotState::Closed => {
                inner.state = SlotState::Opening;
                Ok(())
            }
            state => Err(PlayerError::InvalidState(format!(
                "{} 解码器槽处于 {:?}，不能开始打开",
                self.kind, state
            ))),
        }
    }

    /// Opening → Open；状态不符时丢弃（并关闭）传入的解码器
    pub fn install(&self, handle: DecoderHandle<F>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != SlotState::Opening {
            let state = inner.state;
            drop(inner);
            handle.close();
            return Err(PlayerError::InvalidState(format!(
                "{} 解码器槽处于 {:?}，不能安装解码器",
                self.kind, state
            )));
        }
        info!("{} 解码器就绪: {} ({})", self.kind, handle.name(), handle.backend());
        inner.handle = Some(handle);
        inner.state = SlotState::Open;
        Ok(())
    }

    /// Opening → Closed
    pub fn abort_open(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SlotState::Opening {
            inner.state = SlotState::Closed;
        }
    }

    /// 卸下并关闭当前解码器，返回是否确实关闭了一个解码器
    pub fn close(&self) -> bool {
        let handle = {
            let mut inner = self.inner.lock();
            match inner.state {
                SlotState::Open => {
                    inner.state = SlotState::Closing;
                    inner.handle.take()
                }
                SlotState::Opening => {
                    inner.state = SlotState::Closed;
                    return false;
                }
                SlotState::Closed | SlotState::Closing => return false,
            }
        };
        let closed = handle.is_some();
        if let Some(handle) = handle {
            handle.close();
        }
        self.inner.lock().state = SlotState::Closed;
        closed
    }

    /// 在槽锁内使用当前解码器；未打开时返回 None
    pub fn with_decoder<R>(&self, f: impl FnOnce(&mut DecoderHandle<F>) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        if inner.state != SlotState::Open {
            return None;
        }
        inner.handle.as_mut().map(f)
    }

    pub fn decoder_name(&self) -> Option<String> {
        self.inner.lock().handle.as_ref().map(|h| h.name().to_string())
    }

    pub fn backend(&self) -> Option<BackendId> {
        self.inner.lock().handle.as_ref().map(|h| h.backend())
    }
}
