use myy_playback::core::{
    ChannelLayout, CodecParameters, FormatInfo, PixelFormat, Result, SampleFormat, StreamInfo,
    StreamKind,
};
use myy_playback::player::{DemuxerSource, MediaPacket, Packet};
use std::collections::BTreeMap;

const SAMPLE_RATE: u32 = 48000;
const AUDIO_PACKET_MS: i64 = 20;
const FRAME_RATE: f64 = 25.0;
const VIDEO_PACKET_MS: i64 = 40;
const WIDTH: u32 = 64;
const HEIGHT: u32 = 36;

const VIDEO_INDEX: usize = 0;
const AUDIO_INDEX: usize = 1;

/// 演示用数据源：440Hz 正弦波 pcm_f32le + 滚动渐变 rawvideo
pub struct SyntheticSource {
    duration_ms: i64,
    next_audio: i64,
    next_video: i64,
    interrupt_timeout_ms: u64,
}

impl SyntheticSource {
    pub fn new(duration_ms: i64) -> Self {
        Self {
            duration_ms,
            next_audio: 0,
            next_video: 0,
            interrupt_timeout_ms: 0,
        }
    }

    fn audio_packet(&self, pts: i64) -> Packet {
        let samples = (SAMPLE_RATE as i64 * AUDIO_PACKET_MS / 1000) as usize;
        let start = (pts * SAMPLE_RATE as i64 / 1000) as usize;
        let mut data = Vec::with_capacity(samples * 2 * 4);
        for i in 0..samples {
            let t = (start + i) as f32 / SAMPLE_RATE as f32;
            let v = (t * 440.0 * std::f32::consts::TAU).sin() * 0.2;
            // 左右声道相同
            data.extend_from_slice(&v.to_le_bytes());
            data.extend_from_slice(&v.to_le_bytes());
        }
        let mut packet = Packet::new(data, pts);
        packet.duration = AUDIO_PACKET_MS;
        packet.key_frame = true;
        packet
    }

    fn video_packet(&self, pts: i64) -> Packet {
        let shift = (pts / VIDEO_PACKET_MS) as u32;
        let mut data = Vec::with_capacity((WIDTH * HEIGHT * 4) as usize);
        for y in 0..HEIGHT {
            for x in 0..WIDTH {
                data.push(((x + shift) * 4 % 256) as u8);
                data.push((y * 7 % 256) as u8);
                data.push(128);
                data.push(255);
            }
        }
        let mut packet = Packet::new(data, pts);
        packet.duration = VIDEO_PACKET_MS;
        packet.key_frame = true;
        packet
    }
}

impl DemuxerSource for SyntheticSource {
    fn current_stream_index(&self, kind: StreamKind) -> Option<usize> {
        match kind {
            StreamKind::Video => Some(VIDEO_INDEX),
            StreamKind::Audio => Some(AUDIO_INDEX),
            StreamKind::Subtitle => None,
        }
    }

    fn stream_indices(&self, kind: StreamKind) -> Vec<usize> {
        self.current_stream_index(kind).into_iter().collect()
    }

    fn set_stream_index(&mut self, kind: StreamKind, index: usize) -> Result<()> {
        if self.current_stream_index(kind) == Some(index) {
            Ok(())
        } else {
            Err(myy_playback::PlayerError::InvalidState(format!(
                "没有{}流 #{}",
                kind, index
            )))
        }
    }

    fn codec_parameters(&self, kind: StreamKind) -> Option<CodecParameters> {
        match kind {
            StreamKind::Video => {
                let mut params = CodecParameters::video("rawvideo", WIDTH, HEIGHT, FRAME_RATE);
                params.pixel_format = Some(PixelFormat::RGBA);
                params.bit_rate = (WIDTH * HEIGHT * 32) as i64 * FRAME_RATE as i64;
                Some(params)
            }
            StreamKind::Audio => {
                let mut params = CodecParameters::audio("pcm_f32le", SAMPLE_RATE, SampleFormat::F32, 2);
                params.channel_layout = Some(ChannelLayout::Stereo);
                params.block_align = 8;
                params.bit_rate = SAMPLE_RATE as i64 * 64;
                Some(params)
            }
            StreamKind::Subtitle => None,
        }
    }

    fn stream_info(&self, kind: StreamKind) -> Option<StreamInfo> {
        let (index, long_name, step) = match kind {
            StreamKind::Video => (VIDEO_INDEX, "raw video", VIDEO_PACKET_MS),
            StreamKind::Audio => (AUDIO_INDEX, "PCM 32-bit floating point little-endian", AUDIO_PACKET_MS),
            StreamKind::Subtitle => return None,
        };
        Some(StreamInfo {
            index,
            codec_long_name: long_name.to_string(),
            duration_ms: Some(self.duration_ms),
            start_time_ms: Some(0),
            frames: self.duration_ms / step,
            metadata: BTreeMap::new(),
        })
    }

    fn format_info(&self) -> FormatInfo {
        let mut metadata = BTreeMap::new();
        metadata.insert("title".to_string(), "synthetic".to_string());
        FormatInfo {
            url: "synthetic://sine-gradient".to_string(),
            name: "synthetic".to_string(),
            long_name: "合成音视频".to_string(),
            bit_rate: 0,
            metadata,
        }
    }

    fn duration(&self) -> i64 {
        self.duration_ms
    }

    fn start_time(&self) -> i64 {
        0
    }

    fn frame_rate(&self) -> Option<f64> {
        Some(FRAME_RATE)
    }

    fn set_interrupt_timeout(&mut self, timeout_ms: u64) {
        self.interrupt_timeout_ms = timeout_ms;
    }

    fn read_packet(&mut self) -> Result<Option<MediaPacket>> {
        let audio_left = self.next_audio < self.duration_ms;
        let video_left = self.next_video < self.duration_ms;
        let media = if video_left && (!audio_left || self.next_video <= self.next_audio) {
            let packet = self.video_packet(self.next_video);
            self.next_video += VIDEO_PACKET_MS;
            MediaPacket { packet, kind: StreamKind::Video, stream_index: VIDEO_INDEX }
        } else if audio_left {
            let packet = self.audio_packet(self.next_audio);
            self.next_audio += AUDIO_PACKET_MS;
            MediaPacket { packet, kind: StreamKind::Audio, stream_index: AUDIO_INDEX }
        } else {
            return Ok(None);
        };
        Ok(Some(media))
    }

    fn seek(&mut self, timestamp_ms: i64) -> Result<()> {
        let ts = timestamp_ms.clamp(0, self.duration_ms);
        self.next_audio = ts / AUDIO_PACKET_MS * AUDIO_PACKET_MS;
        self.next_video = ts / VIDEO_PACKET_MS * VIDEO_PACKET_MS;
        Ok(())
    }

    fn description(&self) -> String {
        format!("SyntheticSource({}ms, {}x{} @ {}fps)", self.duration_ms, WIDTH, HEIGHT, FRAME_RATE)
    }
}
