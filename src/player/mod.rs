// 播放器核心模块

pub mod packet;
pub mod packet_queue;
pub mod demuxer_source;  // Demuxer 抽象接口
pub mod demuxer_thread;  // Demuxer 线程管理
pub mod decoder;
pub mod decoder_selector;
pub mod hw_decoder;
pub mod raw_codec;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_codec;
pub mod audio_format;
pub mod audio_output;
pub mod resampler;
pub mod filter;
pub mod output;
pub mod events;
pub mod statistics;
pub mod worker;
pub mod orchestrator;

pub use packet::Packet;
pub use packet_queue::{PacketQueue, QueueBounds};
pub use demuxer_source::{DemuxerSource, MediaPacket};
pub use demuxer_thread::DemuxerThread;
pub use decoder::{AudioDecoderFactory, Decoder, DecoderSlot, VideoDecoderFactory};
pub use decoder_selector::DecoderSelector;
pub use hw_decoder::BackendId;
pub use audio_output::{AudioSink, NullAudioSink};
pub use output::{FrameSink, OutputSet, QueuedOutput};
pub use events::{AvError, AvErrorKind, PlayerEvent};
pub use statistics::PlaybackStatistics;
pub use worker::{AudioWorker, VideoWorker};
pub use orchestrator::{PipelineOrchestrator, SetupOutcome};
