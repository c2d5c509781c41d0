use crate::core::{AudioFormat, ChannelLayout, CodecParameters, PlayerError, Result, SampleFormat};
use crate::player::audio_output::AudioSink;
use log::{info, warn};

/// 音频输出设备的能力描述
pub trait SinkCapabilities {
    fn is_supported(&self, format: &AudioFormat) -> bool;

    fn is_sample_format_supported(&self, format: SampleFormat) -> bool;

    fn is_channel_layout_supported(&self, layout: ChannelLayout) -> bool;

    fn preferred_sample_format(&self) -> SampleFormat;

    fn preferred_channel_layout(&self) -> ChannelLayout;

    /// 设备不支持源采样率时改用的采样率；None 表示不做采样率转换
    fn preferred_sample_rate(&self) -> Option<u32> {
        None
    }
}

/// 解码器输出的原始音频格式（先修正声道数与布局）
///
/// 声道或采样率无效时返回 None。
pub fn native_format(params: &CodecParameters) -> Option<AudioFormat> {
    let mut params = params.clone();
    if !params.correct_audio_channels() || params.sample_rate == 0 {
        return None;
    }
    let layout = params.channel_layout?;
    let sample_format = params.sample_format.unwrap_or(SampleFormat::F32);
    Some(AudioFormat::new(params.sample_rate, sample_format, layout))
}

/// 根据设备能力协商目标格式
///
/// 多声道强制改用设备首选布局；平面格式强制改用设备首选采样格式；
/// 设备仍不支持时，分别替换不支持的采样格式和布局。
pub fn negotiate<C: SinkCapabilities + ?Sized>(native: &AudioFormat, caps: &C) -> AudioFormat {
    let mut target = *native;

    if target.channels > 2 {
        target.set_channel_layout(caps.preferred_channel_layout());
    }
    if target.is_planar() {
        target.set_sample_format(caps.preferred_sample_format());
    }

    if !caps.is_supported(&target) {
        if !caps.is_sample_format_supported(target.sample_format) {
            target.set_sample_format(caps.preferred_sample_format());
        }
        if !caps.is_channel_layout_supported(target.channel_layout) {
            target.set_channel_layout(caps.preferred_channel_layout());
        }
    }
    if !caps.is_supported(&target) {
        if let Some(rate) = caps.preferred_sample_rate() {
            target.sample_rate = rate;
        }
    }

    if target != *native {
        info!("音频格式协商: {} → {}", native, target);
    }
    target
}

/// 让设备以目标格式打开；格式不同或设备未打开时重新打开
pub fn apply(sink: &mut dyn AudioSink, target: &AudioFormat) -> Result<()> {
    if sink.is_open() && sink.audio_format() == *target {
        return Ok(());
    }

    if sink.is_open() {
        sink.close();
    }
    sink.set_audio_format(*target);
    sink.open().map_err(|e| {
        warn!("❌ 音频输出 {} 无法以 {} 打开: {}", sink.name(), target, e);
        PlayerError::AudioOutputUnavailable(format!("{}: {}", sink.name(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAudioSink;

    #[test]
    fn test_multichannel_planar_forced_to_preferred() {
        let sink = FakeAudioSink::stereo_f32();
        let native = AudioFormat::new(48000, SampleFormat::F32P, ChannelLayout::Surround5_1);
        let target = negotiate(&native, &sink);
        assert_eq!(target.sample_format, SampleFormat::F32);
        assert_eq!(target.channel_layout, ChannelLayout::Stereo);
        assert_eq!(target.channels, 2);
        assert_eq!(target.sample_rate, 48000);
    }

    #[test]
    fn test_supported_native_is_kept() {
        let sink = FakeAudioSink::stereo_f32();
        let native = AudioFormat::new(44100, SampleFormat::F32, ChannelLayout::Mono);
        assert_eq!(negotiate(&native, &sink), native);
    }

    #[test]
    fn test_unsupported_sample_format_substituted() {
        let sink = FakeAudioSink::stereo_f32();
        let native = AudioFormat::new(44100, SampleFormat::S32, ChannelLayout::Stereo);
        let target = negotiate(&native, &sink);
        assert_eq!(target.sample_format, SampleFormat::F32);
        assert_eq!(target.channel_layout, ChannelLayout::Stereo);
    }

    #[test]
    fn test_unsupported_rate_uses_preferred_rate() {
        let sink = FakeAudioSink::stereo_f32().fixed_rate(48000);
        let native = AudioFormat::new(44100, SampleFormat::F32, ChannelLayout::Stereo);
        let target = negotiate(&native, &sink);
        assert_eq!(target.sample_rate, 48000);
        assert_eq!(target.channel_layout, ChannelLayout::Stereo);
        assert!(sink.is_supported(&target));
    }

    #[test]
    fn test_native_format_corrects_channels() {
        let mut params = CodecParameters::audio("aac", 48000, SampleFormat::F32P, 0);
        params.channel_layout = Some(ChannelLayout::Surround5_1);
        let format = native_format(&params).unwrap();
        assert_eq!(format.channels, 6);
        assert!(native_format(&CodecParameters::audio("aac", 48000, SampleFormat::F32P, 0)).is_none());
    }

    #[test]
    fn test_apply_reopens_only_on_change() {
        let mut sink = FakeAudioSink::stereo_f32();
        let target = AudioFormat::new(48000, SampleFormat::F32, ChannelLayout::Stereo);
        apply(&mut sink, &target).unwrap();
        apply(&mut sink, &target).unwrap();
        assert_eq!(sink.open_count(), 1);

        let other = AudioFormat::new(44100, SampleFormat::F32, ChannelLayout::Stereo);
        apply(&mut sink, &other).unwrap();
        assert_eq!(sink.open_count(), 2);
        assert_eq!(sink.audio_format(), other);
    }

    #[test]
    fn test_apply_failure_is_output_unavailable() {
        let mut sink = FakeAudioSink::stereo_f32().failing_open();
        let target = AudioFormat::new(48000, SampleFormat::F32, ChannelLayout::Stereo);
        assert!(matches!(
            apply(&mut sink, &target),
            Err(PlayerError::AudioOutputUnavailable(_))
        ));
        assert!(!sink.is_open());
    }
}
