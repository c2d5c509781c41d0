use log::debug;

/// 解封装方给出的原始包时间信息（以流时间基为单位）
#[derive(Debug, Clone, Default)]
pub struct RawPacket {
    pub data: Vec<u8>,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub convergence_duration: i64,
    pub position: i64,
    pub key_frame: bool,
    pub corrupt: bool,
}

/// 已解封装的编码包，时间统一为毫秒
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Packet {
    pub data: Vec<u8>,
    pub pts: i64,
    pub dts: i64,
    pub duration: i64,
    /// 在源中的字节位置，未知时为 -1
    pub position: i64,
    pub key_frame: bool,
    pub corrupt: bool,
}

impl Packet {
    pub fn new(data: Vec<u8>, pts: i64) -> Self {
        Self {
            data,
            pts,
            dts: pts,
            duration: 0,
            position: -1,
            key_frame: false,
            corrupt: false,
        }
    }

    /// 从原始包构造，`time_base` 为流时间基（秒/单位）
    ///
    /// pts 缺失时退回 dts，再退回 0；dts 缺失时取 pts；两者都不小于 0。
    /// 关键帧优先使用 convergence_duration 作为时长。
    pub fn from_raw(raw: RawPacket, time_base: f64) -> Self {
        let to_ms = |v: i64| (v as f64 * time_base * 1000.0).round() as i64;

        let pts = match (raw.pts, raw.dts) {
            (Some(pts), _) => to_ms(pts),
            (None, Some(dts)) => to_ms(dts),
            (None, None) => 0,
        };
        let dts = raw.dts.map(to_ms).unwrap_or(pts);

        let duration = if raw.convergence_duration > 0 && raw.key_frame {
            to_ms(raw.convergence_duration)
        } else if raw.duration > 0 {
            to_ms(raw.duration)
        } else {
            0
        };

        if raw.corrupt {
            debug!("损坏的包: pts={}ms", pts);
        }

        Self {
            data: raw.data,
            pts: pts.max(0),
            dts: dts.max(0),
            duration,
            position: raw.position,
            key_frame: raw.key_frame,
            corrupt: raw.corrupt,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}
