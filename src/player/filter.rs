use crate::core::{PixelFormat, VideoFrame};
use std::sync::atomic::{AtomicI32, Ordering};

/// 解码后处理滤镜，按安装顺序依次作用于每一帧
pub trait Filter<F>: Send + Sync {
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool {
        true
    }

    fn apply(&self, frame: &mut F);
}

/// 亮度 / 对比度 / 饱和度调节，取值范围 [-100, 100]，全为 0 时不处理
///
/// 参数可在解码线程运行时修改。
pub struct VideoEqualizer {
    brightness: AtomicI32,
    contrast: AtomicI32,
    saturation: AtomicI32,
}

impl VideoEqualizer {
    pub fn new(brightness: i32, contrast: i32, saturation: i32) -> Self {
        Self {
            brightness: AtomicI32::new(brightness.clamp(-100, 100)),
            contrast: AtomicI32::new(contrast.clamp(-100, 100)),
            saturation: AtomicI32::new(saturation.clamp(-100, 100)),
        }
    }

    pub fn set_brightness(&self, value: i32) {
        self.brightness.store(value.clamp(-100, 100), Ordering::Relaxed);
    }

    pub fn set_contrast(&self, value: i32) {
        self.contrast.store(value.clamp(-100, 100), Ordering::Relaxed);
    }

    pub fn set_saturation(&self, value: i32) {
        self.saturation.store(value.clamp(-100, 100), Ordering::Relaxed);
    }

    pub fn brightness(&self) -> i32 {
        self.brightness.load(Ordering::Relaxed)
    }

    pub fn contrast(&self) -> i32 {
        self.contrast.load(Ordering::Relaxed)
    }

    pub fn saturation(&self) -> i32 {
        self.saturation.load(Ordering::Relaxed)
    }
}

impl Default for VideoEqualizer {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

impl Filter<VideoFrame> for VideoEqualizer {
    fn name(&self) -> &str {
        "equalizer"
    }

    fn is_enabled(&self) -> bool {
        self.brightness() != 0 || self.contrast() != 0 || self.saturation() != 0
    }

    fn apply(&self, frame: &mut VideoFrame) {
        let stride = match frame.format {
            PixelFormat::RGBA => 4,
            PixelFormat::RGB => 3,
            // YUV 由渲染端的着色器处理
            PixelFormat::YUV420P | PixelFormat::NV12 => return,
        };

        let offset = self.brightness() as f32 * 128.0 / 100.0;
        let contrast = (100 + self.contrast()) as f32 / 100.0;
        let saturation = (100 + self.saturation()) as f32 / 100.0;

        for px in frame.data.chunks_exact_mut(stride) {
            let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
            let luma = 0.299 * r + 0.587 * g + 0.114 * b;
            for c in px.iter_mut().take(3) {
                let v = luma + (*c as f32 - luma) * saturation;
                let v = (v - 128.0) * contrast + 128.0 + offset;
                *c = v.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}
