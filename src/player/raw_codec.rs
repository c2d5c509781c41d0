use crate::core::{
    AudioFormat, AudioFrame, CodecParameters, PixelFormat, PlayerError, Result, SampleFormat,
    VideoFrame,
};
use crate::player::audio_format::native_format;
use crate::player::decoder::{AudioDecoder, AudioDecoderFactory, Decoder, VideoDecoder, VideoDecoderFactory};
use crate::player::hw_decoder::BackendId;
use crate::player::packet::Packet;

/// 未压缩 RGBA 视频
pub struct RawVideoDecoder {
    params: CodecParameters,
    open: bool,
}

impl RawVideoDecoder {
    pub fn new() -> Self {
        Self {
            params: CodecParameters::default(),
            open: false,
        }
    }

    fn frame_size(&self) -> usize {
        self.params.width as usize * self.params.height as usize * 4
    }
}

impl Default for RawVideoDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RawVideoDecoder {
    type Frame = VideoFrame;

    fn name(&self) -> String {
        "rawvideo".to_string()
    }

    fn set_codec_parameters(&mut self, params: &CodecParameters) {
        self.params = params.clone();
    }

    fn open(&mut self) -> Result<()> {
        if self.params.codec_id != "rawvideo" {
            return Err(PlayerError::DecodeError(format!(
                "rawvideo 不支持 {}",
                self.params.codec_id
            )));
        }
        if self.params.width == 0 || self.params.height == 0 {
            return Err(PlayerError::DecodeError("rawvideo 缺少画面尺寸".to_string()));
        }
        self.open = true;
        Ok(())
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<VideoFrame>> {
        if packet.data.len() != self.frame_size() {
            return Err(PlayerError::DecodeError(format!(
                "rawvideo 包大小 {} 与 {}x{} 不符",
                packet.data.len(),
                self.params.width,
                self.params.height
            )));
        }
        let duration = match (packet.duration, self.params.known_frame_rate()) {
            (d, _) if d > 0 => d,
            (_, Some(fps)) => (1000.0 / fps).round() as i64,
            _ => 0,
        };
        Ok(vec![VideoFrame {
            pts: packet.pts,
            duration,
            width: self.params.width,
            height: self.params.height,
            format: PixelFormat::RGBA,
            data: packet.data.clone(),
        }])
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// 小端 PCM（pcm_f32le / pcm_s16le），输出交错 f32
pub struct PcmDecoder {
    format: Option<AudioFormat>,
    params: CodecParameters,
}

impl PcmDecoder {
    pub fn new() -> Self {
        Self {
            format: None,
            params: CodecParameters::default(),
        }
    }

    fn sample_format(codec_id: &str) -> Option<SampleFormat> {
        match codec_id {
            "pcm_f32le" => Some(SampleFormat::F32),
            "pcm_s16le" => Some(SampleFormat::S16),
            _ => None,
        }
    }
}

impl Default for PcmDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PcmDecoder {
    type Frame = AudioFrame;

    fn name(&self) -> String {
        self.params.codec_id.clone()
    }

    fn set_codec_parameters(&mut self, params: &CodecParameters) {
        self.params = params.clone();
    }

    fn open(&mut self) -> Result<()> {
        let sample_format = Self::sample_format(&self.params.codec_id).ok_or_else(|| {
            PlayerError::DecodeError(format!("不支持的 PCM 格式 {}", self.params.codec_id))
        })?;
        let mut params = self.params.clone();
        params.sample_format = Some(sample_format);
        let format = native_format(&params)
            .ok_or_else(|| PlayerError::DecodeError("PCM 缺少采样率或声道".to_string()))?;
        self.format = Some(format);
        Ok(())
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<AudioFrame>> {
        let format = self
            .format
            .ok_or_else(|| PlayerError::InvalidState("PCM 解码器未打开".to_string()))?;
        let block = format.sample_format.bytes_per_sample() * format.channels as usize;
        if packet.data.len() % block != 0 {
            return Err(PlayerError::DecodeError(format!(
                "PCM 包大小 {} 不是 {} 的整数倍",
                packet.data.len(),
                block
            )));
        }

        let data: Vec<f32> = match format.sample_format {
            SampleFormat::S16 => packet
                .data
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
                .collect(),
            _ => packet
                .data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        };

        Ok(vec![AudioFrame {
            pts: packet.pts,
            format,
            data,
        }])
    }

    fn close(&mut self) {
        self.format = None;
    }
}

/// 内置解码器：视频只提供软件后端
pub struct BuiltinDecoderFactory;

impl VideoDecoderFactory for BuiltinDecoderFactory {
    fn create(&self, backend: BackendId) -> Option<Box<VideoDecoder>> {
        match backend {
            BackendId::Software => Some(Box::new(RawVideoDecoder::new())),
            _ => None,
        }
    }
}

impl AudioDecoderFactory for BuiltinDecoderFactory {
    fn create(&self) -> Option<Box<AudioDecoder>> {
        Some(Box::new(PcmDecoder::new()))
    }
}
