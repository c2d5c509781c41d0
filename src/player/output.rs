use crate::core::Result;
use crossbeam::queue::SegQueue;
use log::debug;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 解码后帧的接收方（渲染器、音频设备、录制等）
pub trait FrameSink<F>: Send + Sync {
    fn name(&self) -> String;

    fn send(&self, frame: &F) -> Result<()>;
}

fn same_sink<F>(a: &Arc<dyn FrameSink<F>>, b: &Arc<dyn FrameSink<F>>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// 一个流类型的输出集合，帧按添加顺序分发给所有输出
pub struct OutputSet<F> {
    outputs: RwLock<Vec<Arc<dyn FrameSink<F>>>>,
}

impl<F> OutputSet<F> {
    pub fn new() -> Self {
        Self {
            outputs: RwLock::new(Vec::new()),
        }
    }

    /// 同一个输出只会被添加一次
    pub fn add_output(&self, output: Arc<dyn FrameSink<F>>) -> bool {
        let mut outputs = self.outputs.write();
        if outputs.iter().any(|o| same_sink(o, &output)) {
            return false;
        }
        outputs.push(output);
        true
    }

    pub fn remove_output(&self, output: &Arc<dyn FrameSink<F>>) -> bool {
        let mut outputs = self.outputs.write();
        let before = outputs.len();
        outputs.retain(|o| !same_sink(o, output));
        outputs.len() != before
    }

    pub fn clear_outputs(&self) {
        self.outputs.write().clear();
    }

    /// 分发一帧，返回成功接收的输出数
    pub fn send(&self, frame: &F) -> usize {
        let outputs = self.outputs.read();
        let mut delivered = 0;
        for output in outputs.iter() {
            match output.send(frame) {
                Ok(()) => delivered += 1,
                Err(e) => debug!("输出 {} 拒绝帧: {}", output.name(), e),
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.outputs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.read().is_empty()
    }
}

impl<F> Default for OutputSet<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// 把帧交给另一个线程（例如渲染线程）消费的输出
///
/// 超过最大长度时丢弃最旧的帧。
pub struct QueuedOutput<F> {
    name: String,
    queue: SegQueue<F>,
    max_len: usize,
    dropped: AtomicUsize,
}

impl<F: Clone + Send> QueuedOutput<F> {
    pub fn new(name: &str, max_len: usize) -> Self {
        Self {
            name: name.to_string(),
            queue: SegQueue::new(),
            max_len: max_len.max(1),
            dropped: AtomicUsize::new(0),
        }
    }

    pub fn pop(&self) -> Option<F> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// 因积压而丢弃的帧数
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }
}

impl<F: Clone + Send> FrameSink<F> for QueuedOutput<F> {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn send(&self, frame: &F) -> Result<()> {
        self.queue.push(frame.clone());
        while self.queue.len() > self.max_len {
            if self.queue.pop().is_some() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}
