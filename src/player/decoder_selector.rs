use crate::core::{AudioFrame, CodecParameters, DecoderOptions, PlayerError, Result, VideoFrame};
use crate::player::decoder::{AudioDecoderFactory, DecoderHandle, VideoDecoderFactory};
use crate::player::hw_decoder::BackendId;
use log::{debug, info, warn};
use std::sync::Arc;

/// 视频解码器选择器
///
/// 后端顺序在构造时给定，依次尝试 `prepare()` + `open()`，第一个成功的胜出。
/// 失败的后端在尝试下一个之前已关闭并释放。
pub struct DecoderSelector {
    backends: Vec<BackendId>,
    factory: Arc<dyn VideoDecoderFactory>,
}

impl DecoderSelector {
    pub fn new(backends: Vec<BackendId>, factory: Arc<dyn VideoDecoderFactory>) -> Self {
        Self { backends, factory }
    }

    pub fn backends(&self) -> &[BackendId] {
        &self.backends
    }

    pub fn select(
        &self,
        params: &CodecParameters,
        options: &DecoderOptions,
    ) -> Result<DecoderHandle<VideoFrame>> {
        let mut tried = Vec::with_capacity(self.backends.len());

        for &backend in &self.backends {
            let Some(mut decoder) = self.factory.create(backend) else {
                debug!("后端 {} 不可用，跳过", backend);
                tried.push(format!("{}(不可用)", backend));
                continue;
            };

            decoder.set_codec_parameters(params);
            decoder.set_options(options);

            match decoder.prepare().and_then(|_| decoder.open()) {
                Ok(()) => {
                    info!("✅ 视频解码器打开成功: {} ({})", decoder.name(), backend);
                    return Ok(DecoderHandle::new(decoder, backend, params.clone()));
                }
                Err(e) => {
                    warn!("⚠️ 视频解码后端 {} 打开失败: {}", backend, e);
                    decoder.close();
                    drop(decoder);
                    tried.push(backend.name().to_string());
                }
            }
        }

        Err(PlayerError::NoDecoderAvailable {
            codec: params.codec_id.clone(),
            tried: tried.join(", "),
        })
    }
}

/// 打开音频解码器（只有一种解码器类型，没有后备）
pub fn open_audio_decoder(
    factory: &dyn AudioDecoderFactory,
    params: &CodecParameters,
    options: &DecoderOptions,
) -> Result<DecoderHandle<AudioFrame>> {
    let Some(mut decoder) = factory.create() else {
        return Err(PlayerError::AudioCodecNotFound(params.codec_id.clone()));
    };

    decoder.set_codec_parameters(params);
    decoder.set_options(options);

    match decoder.prepare().and_then(|_| decoder.open()) {
        Ok(()) => {
            info!("✅ 音频解码器打开成功: {}", decoder.name());
            Ok(DecoderHandle::new(decoder, BackendId::Software, params.clone()))
        }
        Err(e) => {
            decoder.close();
            Err(PlayerError::AudioCodecNotFound(format!("{}: {}", params.codec_id, e)))
        }
    }
}
