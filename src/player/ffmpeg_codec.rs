use crate::core::{
    AudioFormat, AudioFrame, CodecParameters, DecoderOptions, PixelFormat, PlayerError, Result,
    SampleFormat, VideoFrame,
};
use crate::player::audio_format::native_format;
use crate::player::decoder::{AudioDecoder, AudioDecoderFactory, Decoder, VideoDecoder, VideoDecoderFactory};
use crate::player::hw_decoder::BackendId;
use crate::player::packet::Packet;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, ffi, software, util};
use log::{debug, warn};
use std::ptr;

/// 按编解码参数构造解码上下文，时间基固定为毫秒
fn build_context(params: &CodecParameters) -> Result<codec::context::Context> {
    let codec = ffmpeg::decoder::find_by_name(&params.codec_id).ok_or_else(|| {
        PlayerError::DecodeError(format!("FFmpeg 不支持编解码器 {}", params.codec_id))
    })?;
    let mut context = codec::context::Context::new_with_codec(codec);

    // 参数直接写入 AVCodecContext；extradata 需用 av_malloc 分配，由 FFmpeg 释放
    unsafe {
        let raw = context.as_mut_ptr();
        (*raw).pkt_timebase = ffi::AVRational { num: 1, den: 1000 };
        (*raw).bit_rate = params.bit_rate;
        if !params.extradata.is_empty() {
            let size = params.extradata.len();
            let buf = ffi::av_mallocz(size + ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize) as *mut u8;
            if !buf.is_null() {
                ptr::copy_nonoverlapping(params.extradata.as_ptr(), buf, size);
                (*raw).extradata = buf;
                (*raw).extradata_size = size as i32;
            }
        }
    }
    Ok(context)
}

fn apply_options(context: &mut codec::context::Context, options: &DecoderOptions) {
    if let Some(threads) = options.get("threads").and_then(|v| v.parse::<usize>().ok()) {
        context.set_threading(codec::threading::Config::count(threads));
    }
}

fn make_packet(packet: &Packet) -> ffmpeg::Packet {
    let mut av_packet = ffmpeg::Packet::copy(&packet.data);
    av_packet.set_pts(Some(packet.pts));
    av_packet.set_dts(Some(packet.dts));
    av_packet.set_duration(packet.duration);
    av_packet
}

/// FFmpeg 软件视频解码器（输出 RGBA）
pub struct FfmpegVideoDecoder {
    params: CodecParameters,
    options: DecoderOptions,
    decoder: Option<codec::decoder::Video>,
    scaler: Option<software::scaling::Context>,
}

// SwsContext 本身不是 Send，但我们确保只在单个线程中使用它
// 解码器实例由 DecoderSlot 独占，任意时刻只有持锁的一个线程访问
unsafe impl Send for FfmpegVideoDecoder {}

impl FfmpegVideoDecoder {
    pub fn new() -> Self {
        Self {
            params: CodecParameters::default(),
            options: DecoderOptions::new(),
            decoder: None,
            scaler: None,
        }
    }

    fn receive_frames(&mut self) -> Result<Vec<VideoFrame>> {
        let mut frames = Vec::new();
        loop {
            let mut decoded_frame = util::frame::Video::empty();
            let received = match self.decoder.as_mut() {
                Some(decoder) => decoder.receive_frame(&mut decoded_frame),
                None => break,
            };
            match received {
                Ok(()) => frames.push(self.convert_frame(&decoded_frame)?),
                Err(ffmpeg::Error::Other { errno: 11 }) => break, // EAGAIN
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    warn!("解码错误（已跳过）: {}", e);
                    break;
                }
            }
        }
        Ok(frames)
    }

    /// 转换帧格式为 RGBA
    fn convert_frame(&mut self, frame: &util::frame::Video) -> Result<VideoFrame> {
        let width = frame.width();
        let height = frame.height();

        // 初始化 scaler（YUV -> RGBA）
        if self.scaler.is_none() {
            self.scaler = Some(software::scaling::Context::get(
                frame.format(),
                width,
                height,
                util::format::Pixel::RGBA,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )?);
        }
        let Some(scaler) = self.scaler.as_mut() else {
            return Err(PlayerError::InvalidState("scaler 未初始化".to_string()));
        };

        let mut rgba_frame = util::frame::Video::empty();
        scaler.run(frame, &mut rgba_frame)?;

        // 复制数据到连续内存
        let row_size = width as usize * 4;
        let stride = rgba_frame.stride(0);
        let frame_data = rgba_frame.data(0);
        let mut data = vec![0u8; row_size * height as usize];
        for (y, row) in data.chunks_exact_mut(row_size).enumerate() {
            let src_offset = y * stride;
            row.copy_from_slice(&frame_data[src_offset..src_offset + row_size]);
        }

        let duration = self
            .params
            .known_frame_rate()
            .map(|fps| (1000.0 / fps).round() as i64)
            .unwrap_or(0);

        Ok(VideoFrame {
            pts: frame.timestamp().unwrap_or(0),
            duration,
            width,
            height,
            format: PixelFormat::RGBA,
            data,
        })
    }
}

impl Default for FfmpegVideoDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FfmpegVideoDecoder {
    type Frame = VideoFrame;

    fn name(&self) -> String {
        format!("FFmpeg({})", self.params.codec_id)
    }

    fn set_codec_parameters(&mut self, params: &CodecParameters) {
        self.params = params.clone();
    }

    fn set_options(&mut self, options: &DecoderOptions) {
        self.options = options.clone();
    }

    fn open(&mut self) -> Result<()> {
        let mut context = build_context(&self.params)?;
        unsafe {
            let raw = context.as_mut_ptr();
            (*raw).width = self.params.width as i32;
            (*raw).height = self.params.height as i32;
            (*raw).coded_width = self.params.coded_width as i32;
            (*raw).coded_height = self.params.coded_height as i32;
        }
        apply_options(&mut context, &self.options);

        let decoder = context.decoder().video()?;
        debug!(
            "软件解码器: {}x{}, 格式: {:?}",
            decoder.width(),
            decoder.height(),
            decoder.format()
        );
        self.decoder = Some(decoder);
        Ok(())
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<VideoFrame>> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(PlayerError::InvalidState("视频解码器未打开".to_string()));
        };
        match decoder.send_packet(&make_packet(packet)) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                debug!("视频解码器收到 EOF（send_packet），执行 flush 并忽略本次包");
                decoder.flush();
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        }
        self.receive_frames()
    }

    fn flush(&mut self) -> Result<Vec<VideoFrame>> {
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.send_eof()?;
        }
        let frames = self.receive_frames()?;
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.flush();
        }
        Ok(frames)
    }

    fn close(&mut self) {
        self.decoder = None;
        self.scaler = None;
    }
}

/// FFmpeg 音频解码器（输出交错 f32，格式标签为流的原始格式）
pub struct FfmpegAudioDecoder {
    params: CodecParameters,
    options: DecoderOptions,
    format: Option<AudioFormat>,
    decoder: Option<codec::decoder::Audio>,
    resampler: Option<software::resampling::Context>,
}

// SwrContext 同上，只在持有解码器槽锁的线程中使用
unsafe impl Send for FfmpegAudioDecoder {}

impl FfmpegAudioDecoder {
    pub fn new() -> Self {
        Self {
            params: CodecParameters::default(),
            options: DecoderOptions::new(),
            format: None,
            decoder: None,
            resampler: None,
        }
    }

    fn receive_frames(&mut self) -> Result<Vec<AudioFrame>> {
        let mut frames = Vec::new();
        loop {
            let mut decoded_frame = util::frame::Audio::empty();
            let received = match self.decoder.as_mut() {
                Some(decoder) => decoder.receive_frame(&mut decoded_frame),
                None => break,
            };
            match received {
                Ok(()) => frames.push(self.convert_frame(&decoded_frame)?),
                Err(ffmpeg::Error::Other { errno: 11 }) => break, // EAGAIN
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(frames)
    }

    /// 转换为交错 f32，不改变采样率和声道
    fn convert_frame(&mut self, frame: &util::frame::Audio) -> Result<AudioFrame> {
        let format = self
            .format
            .ok_or_else(|| PlayerError::InvalidState("音频解码器未打开".to_string()))?;

        if self.resampler.is_none() {
            self.resampler = Some(software::resampling::Context::get(
                frame.format(),
                frame.channel_layout(),
                frame.rate(),
                util::format::Sample::F32(util::format::sample::Type::Packed),
                frame.channel_layout(),
                frame.rate(),
            )?);
        }
        let Some(resampler) = self.resampler.as_mut() else {
            return Err(PlayerError::InvalidState("resampler 未初始化".to_string()));
        };

        let mut resampled = util::frame::Audio::empty();
        resampler.run(frame, &mut resampled)?;

        let len = resampled.samples() * resampled.channels() as usize * 4;
        let data: Vec<f32> = resampled.data(0)[..len]
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let mut frame_format = format;
        frame_format.sample_rate = frame.rate();
        Ok(AudioFrame {
            pts: frame.timestamp().unwrap_or(0),
            format: frame_format,
            data,
        })
    }
}

impl Default for FfmpegAudioDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FfmpegAudioDecoder {
    type Frame = AudioFrame;

    fn name(&self) -> String {
        format!("FFmpeg({})", self.params.codec_id)
    }

    fn set_codec_parameters(&mut self, params: &CodecParameters) {
        self.params = params.clone();
    }

    fn set_options(&mut self, options: &DecoderOptions) {
        self.options = options.clone();
    }

    fn open(&mut self) -> Result<()> {
        let format = native_format(&self.params)
            .ok_or_else(|| PlayerError::AudioCodecNotFound(format!("{}: 声道信息无效", self.params.codec_id)))?;

        let mut context = build_context(&self.params)?;
        unsafe {
            let raw = context.as_mut_ptr();
            (*raw).sample_rate = format.sample_rate as i32;
            (*raw).block_align = self.params.block_align as i32;
            (*raw).frame_size = self.params.frame_size as i32;
            ffi::av_channel_layout_default(&mut (*raw).ch_layout, format.channels as i32);
        }
        apply_options(&mut context, &self.options);

        let decoder = context.decoder().audio()?;
        self.format = Some(AudioFormat {
            sample_format: self.params.sample_format.unwrap_or(SampleFormat::F32P),
            ..format
        });
        self.decoder = Some(decoder);
        Ok(())
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<AudioFrame>> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(PlayerError::InvalidState("音频解码器未打开".to_string()));
        };
        match decoder.send_packet(&make_packet(packet)) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                debug!("音频解码器收到 EOF（send_packet），执行 flush 并忽略本次包");
                decoder.flush();
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        }
        self.receive_frames()
    }

    fn flush(&mut self) -> Result<Vec<AudioFrame>> {
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.send_eof()?;
        }
        let frames = self.receive_frames()?;
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.flush();
        }
        Ok(frames)
    }

    fn close(&mut self) {
        self.decoder = None;
        self.resampler = None;
        self.format = None;
    }
}

/// FFmpeg 解码器工厂：视频只支持软件后端，硬件后端返回 None
pub struct FfmpegDecoderFactory;

impl FfmpegDecoderFactory {
    pub fn new() -> Result<Self> {
        ffmpeg::init()?;
        Ok(Self)
    }
}

impl VideoDecoderFactory for FfmpegDecoderFactory {
    fn create(&self, backend: BackendId) -> Option<Box<VideoDecoder>> {
        match backend {
            BackendId::Software => Some(Box::new(FfmpegVideoDecoder::new())),
            _ => None,
        }
    }
}

impl AudioDecoderFactory for FfmpegDecoderFactory {
    fn create(&self) -> Option<Box<AudioDecoder>> {
        Some(Box::new(FfmpegAudioDecoder::new()))
    }
}
