use crate::core::{AudioFormat, AudioFrame, PlayerError, Result};
use log::debug;
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};

/// 音频重采样：声道混合 + 采样率转换
///
/// 样本统一是交错 f32，采样格式只作为输出帧的格式标签。
pub trait AudioResampler: Send {
    fn in_format(&self) -> AudioFormat;

    fn out_format(&self) -> AudioFormat;

    fn set_in_format(&mut self, format: AudioFormat);

    fn set_out_format(&mut self, format: AudioFormat);

    fn prepare(&mut self) -> Result<()>;

    /// 丢弃跨帧缓存（跳转/切换后调用）
    fn reset(&mut self) {}

    fn convert(&mut self, frame: &AudioFrame) -> Result<AudioFrame>;
}

/// 每次送入 rubato 的输入帧数
const CHUNK_FRAMES: usize = 1024;

/// 声道混合 + rubato 多项式插值的采样率转换
///
/// 采样率相同时只做声道混合。转换器跨帧保留状态，不足一块的输入留到下一帧。
pub struct PolynomialResampler {
    in_format: AudioFormat,
    out_format: AudioFormat,
    prepared: bool,
    rate: Option<FastFixedIn<f32>>,
    /// 按声道缓存、尚未送入转换器的输入
    pending: Vec<Vec<f32>>,
}

impl PolynomialResampler {
    pub fn new(out_format: AudioFormat) -> Self {
        Self {
            in_format: out_format,
            out_format,
            prepared: false,
            rate: None,
            pending: Vec::new(),
        }
    }

    /// 缓存中尚未转换的输入帧数
    pub fn pending_frames(&self) -> usize {
        self.pending.first().map_or(0, Vec::len)
    }

    fn mix_channels(&self, data: &[f32]) -> Vec<f32> {
        let in_ch = self.in_format.channels as usize;
        let out_ch = self.out_format.channels as usize;
        if in_ch == out_ch {
            return data.to_vec();
        }

        let frames = data.len() / in_ch;
        let mut out = Vec::with_capacity(frames * out_ch);
        for frame in data.chunks_exact(in_ch) {
            if in_ch > out_ch {
                // 下混：声道 i 并入 i % out_ch
                for c in 0..out_ch {
                    let (sum, n) = frame
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| i % out_ch == c)
                        .fold((0.0f32, 0u32), |(s, n), (_, v)| (s + v, n + 1));
                    out.push(if n > 0 { sum / n as f32 } else { 0.0 });
                }
            } else {
                for c in 0..out_ch {
                    out.push(frame[c % in_ch]);
                }
            }
        }
        out
    }

    fn convert_rate(&mut self, data: Vec<f32>) -> Result<Vec<f32>> {
        let Some(rate) = self.rate.as_mut() else {
            return Ok(data);
        };
        let ch = self.pending.len();
        for frame in data.chunks_exact(ch) {
            for (c, sample) in frame.iter().enumerate() {
                self.pending[c].push(*sample);
            }
        }

        let mut planar: Vec<Vec<f32>> = vec![Vec::new(); ch];
        loop {
            let needed = rate.input_frames_next();
            if self.pending.first().map_or(0, Vec::len) < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|c| c.drain(..needed).collect())
                .collect();
            let converted = rate
                .process(&chunk, None)
                .map_err(|e| PlayerError::DecodeError(format!("重采样失败: {}", e)))?;
            for (dst, src) in planar.iter_mut().zip(converted) {
                dst.extend(src);
            }
        }

        let frames = planar.first().map_or(0, Vec::len);
        let mut out = Vec::with_capacity(frames * ch);
        for i in 0..frames {
            for c in &planar {
                out.push(c[i]);
            }
        }
        Ok(out)
    }
}

impl AudioResampler for PolynomialResampler {
    fn in_format(&self) -> AudioFormat {
        self.in_format
    }

    fn out_format(&self) -> AudioFormat {
        self.out_format
    }

    fn set_in_format(&mut self, format: AudioFormat) {
        if format != self.in_format {
            self.in_format = format;
            self.prepared = false;
        }
    }

    fn set_out_format(&mut self, format: AudioFormat) {
        if format != self.out_format {
            self.out_format = format;
            self.prepared = false;
        }
    }

    fn prepare(&mut self) -> Result<()> {
        if !self.in_format.is_valid() || !self.out_format.is_valid() {
            return Err(PlayerError::InvalidState(format!(
                "重采样格式无效: {} → {}",
                self.in_format, self.out_format
            )));
        }
        let channels = self.out_format.channels as usize;
        self.pending = vec![Vec::new(); channels];
        self.rate = if self.in_format.sample_rate == self.out_format.sample_rate {
            None
        } else {
            let ratio = self.out_format.sample_rate as f64 / self.in_format.sample_rate as f64;
            let rate = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, CHUNK_FRAMES, channels)
                .map_err(|e| PlayerError::InvalidState(format!("创建重采样器失败: {}", e)))?;
            Some(rate)
        };
        debug!("重采样: {} → {}", self.in_format, self.out_format);
        self.prepared = true;
        Ok(())
    }

    fn reset(&mut self) {
        for channel in &mut self.pending {
            channel.clear();
        }
        if let Some(rate) = self.rate.as_mut() {
            rate.reset();
        }
    }

    fn convert(&mut self, frame: &AudioFrame) -> Result<AudioFrame> {
        self.set_in_format(frame.format);
        if !self.prepared {
            self.prepare()?;
        }

        // 输出从缓存中最早的输入开始
        let buffered = self.pending_frames() as i64;
        let pts = frame.pts - buffered * 1000 / self.in_format.sample_rate.max(1) as i64;
        let data = self.mix_channels(&frame.data);
        let data = self.convert_rate(data)?;
        Ok(AudioFrame {
            pts,
            format: self.out_format,
            data,
        })
    }
}
