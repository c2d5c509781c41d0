use crate::core::{CodecParameters, FormatInfo, Result, StreamInfo, StreamKind};
use crate::player::packet::Packet;
use parking_lot::Mutex;
use std::sync::Arc;

/// 媒体包（可跨线程传递）
#[derive(Debug, Clone)]
pub struct MediaPacket {
    pub packet: Packet,
    pub kind: StreamKind,
    pub stream_index: usize,
}

/// Demuxer 数据源抽象接口
///
/// 容器解析由实现方负责，播放核心只消费已解封装的包和已识别的编解码参数。
/// 不同的媒体源（本地文件、网络流、内存流等）可以实现这个接口。
pub trait DemuxerSource: Send {
    /// 当前选中的流索引，没有该类型的流时返回 None
    fn current_stream_index(&self, kind: StreamKind) -> Option<usize>;

    /// 该类型可选的所有流索引
    fn stream_indices(&self, kind: StreamKind) -> Vec<usize>;

    /// 切换音轨/视频轨
    fn set_stream_index(&mut self, kind: StreamKind, index: usize) -> Result<()>;

    /// 当前选中流的编解码参数
    fn codec_parameters(&self, kind: StreamKind) -> Option<CodecParameters>;

    fn stream_info(&self, kind: StreamKind) -> Option<StreamInfo>;

    fn format_info(&self) -> FormatInfo;

    /// 总时长（毫秒），未知时为 0
    fn duration(&self) -> i64;

    fn start_time(&self) -> i64;

    /// 视频平均帧率，未知时为 None
    fn frame_rate(&self) -> Option<f64>;

    /// 读取卡住时的中断超时，由实现方执行
    fn set_interrupt_timeout(&mut self, timeout_ms: u64);

    /// 读取下一个媒体包
    ///
    /// 返回：
    /// - Ok(Some(packet)): 成功读取一个包
    /// - Ok(None): 到达文件末尾
    /// - Err(e): 读取错误
    fn read_packet(&mut self) -> Result<Option<MediaPacket>>;

    /// Seek 到指定位置（毫秒）
    fn seek(&mut self, timestamp_ms: i64) -> Result<()>;

    /// 是否支持 seek
    fn is_seekable(&self) -> bool {
        true
    }

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}

/// 解封装线程与编排方共用的数据源
pub type SharedDemuxer = Arc<Mutex<Box<dyn DemuxerSource>>>;

pub fn share_demuxer(source: Box<dyn DemuxerSource>) -> SharedDemuxer {
    Arc::new(Mutex::new(source))
}
