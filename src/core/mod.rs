// 核心数据结构和类型定义

pub mod types;
pub mod clock;
pub mod error;
pub mod config;
pub mod notify;

pub use types::*;
pub use clock::*;
pub use error::*;
pub use config::*;
pub use notify::compute_notify_interval;

use std::process;
use std::thread;

/// 日志前缀：进程号 + 线程号
pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}
