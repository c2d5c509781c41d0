use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 视频解码后端标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendId {
    /// CPU 软解，任何平台都可用
    Software,
    DXVA2,          // Windows DirectX Video Acceleration 2
    D3D11VA,        // Windows Direct3D 11 (推荐)
    VAAPI,          // Linux Video Acceleration API
    VideoToolbox,   // macOS VideoToolbox
    CUDA,           // NVIDIA CUDA
    QSV,            // Intel Quick Sync Video
    Cedarv,         // Allwinner CedarX
}

impl BackendId {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            BackendId::Software => "FFmpeg",
            BackendId::DXVA2 => "DXVA2",
            BackendId::D3D11VA => "D3D11VA",
            BackendId::VAAPI => "VAAPI",
            BackendId::VideoToolbox => "VideoToolbox",
            BackendId::CUDA => "CUDA",
            BackendId::QSV => "QSV",
            BackendId::Cedarv => "Cedarv",
        }
    }

    pub fn is_hardware(&self) -> bool {
        *self != BackendId::Software
    }

    /// 按平台与编译特性给出默认后端顺序（硬件在前，软解在最后）
    pub fn detect_available() -> Vec<BackendId> {
        let mut available = Vec::new();

        // Windows 平台
        #[cfg(all(target_os = "windows", feature = "hwaccel-dx11"))]
        {
            available.push(BackendId::D3D11VA);
            available.push(BackendId::DXVA2);
        }

        // macOS 平台
        #[cfg(all(target_os = "macos", feature = "hwaccel-videotoolbox"))]
        available.push(BackendId::VideoToolbox);

        // Linux 平台
        #[cfg(all(target_os = "linux", feature = "hwaccel-vaapi"))]
        available.push(BackendId::VAAPI);

        #[cfg(all(target_os = "linux", feature = "hwaccel-cedarv"))]
        available.push(BackendId::Cedarv);

        // 跨平台硬件加速
        #[cfg(feature = "hwaccel-cuda")]
        available.push(BackendId::CUDA);

        #[cfg(feature = "hwaccel-qsv")]
        available.push(BackendId::QSV);

        // CPU 软解始终可用
        available.push(BackendId::Software);

        if available.len() == 1 {
            info!("未启用硬件加速后端，将使用 CPU 软解");
        } else {
            info!(
                "视频解码后端顺序: {}",
                available.iter().map(|b| b.name()).collect::<Vec<_>>().join(" → ")
            );
        }

        available
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
