/// 超过该时长（毫秒）视为长媒体，进度通知用最粗的间隔
const LONG_MEDIA_MS: i64 = 60 * 1000;
const MEDIUM_MEDIA_MS: i64 = 20 * 1000;

const COARSE_INTERVAL: u32 = 500;
const MEDIUM_INTERVAL: u32 = 250;
const MIN_INTERVAL: u32 = 20;

/// 计算进度通知间隔（毫秒）
///
/// 时长未知或超过一分钟返回 500，20 秒以上返回 250；更短的媒体按帧率细化，
/// 帧率越高间隔越小，帧率未知时取 `duration / 80`。结果不小于 20。
pub fn compute_notify_interval(duration_ms: i64, frame_rate: f64) -> u32 {
    if duration_ms <= 0 || duration_ms > LONG_MEDIA_MS {
        return COARSE_INTERVAL;
    }
    if duration_ms > MEDIUM_MEDIA_MS {
        return MEDIUM_INTERVAL;
    }
    let dt = if frame_rate.is_finite() && frame_rate > 1.0 {
        let by_fps = (f64::from(COARSE_INTERVAL) * 2.0 / frame_rate) as u32;
        by_fps.min(MEDIUM_INTERVAL)
    } else {
        // duration <= 20s，结果不会超过 250
        (duration_ms / 80) as u32
    };
    dt.max(MIN_INTERVAL)
}
