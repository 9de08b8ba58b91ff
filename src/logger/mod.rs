//! 日志模块，作为 `log` 门面的后端，支持在不同环境下的日志打印
//! - QEMU环境：使用cortex-m-semihosting的hprint
//! - 测试环境：使用标准库的print
//! - 其他环境：丢弃输出
//!
//! 核心各子系统统一通过 `log::{debug, info, warn, error}` 输出，
//! 调用 [`init`] 后由 [`KernelLogger`] 负责格式化和落地。

use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record};

use crate::error::{DeviceError, Result};

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(usize)]
pub enum LogLevel {
    /// 错误级别
    Error = 0,
    /// 警告级别
    Warn = 1,
    /// 信息级别
    Info = 2,
    /// 调试级别
    Debug = 3,
    /// 跟踪级别
    Trace = 4,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl From<LevelFilter> for LogLevel {
    fn from(filter: LevelFilter) -> Self {
        match filter {
            LevelFilter::Off | LevelFilter::Error => LogLevel::Error,
            LevelFilter::Warn => LogLevel::Warn,
            LevelFilter::Info => LogLevel::Info,
            LevelFilter::Debug => LogLevel::Debug,
            LevelFilter::Trace => LogLevel::Trace,
        }
    }
}

/// 设置全局日志级别
pub fn set_log_level(level: LogLevel) {
    log::set_max_level(level.into());
}

/// 获取全局日志级别
pub fn get_log_level() -> LogLevel {
    log::max_level().into()
}

/// QEMU环境下打印日志
#[cfg(all(feature = "cortex_m3", not(test)))]
#[inline(always)]
pub fn log_write(s: &str) -> fmt::Result {
    cortex_m_semihosting::hprint!("{}", s);
    Ok(())
}

/// 测试环境下打印日志（包括单元测试和集成测试）
#[cfg(any(test, not(feature = "cortex_m3")))]
#[inline(always)]
pub fn log_write(_s: &str) -> fmt::Result {
    #[cfg(test)]
    print!("{}", _s);
    Ok(())
}

/// 日志写入器
pub struct LogWriter;

impl Write for LogWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        log_write(s)
    }
}

/// `log` 门面的内核后端
pub struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut writer = LogWriter;
        let _ = writeln!(
            writer,
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// 安装内核日志后端，默认级别为 Info
///
/// 重复调用返回 `AlreadyInitialized`。
pub fn init() -> Result<()> {
    log::set_logger(&LOGGER).map_err(|_| DeviceError::AlreadyInitialized)?;
    set_log_level(LogLevel::Info);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_log_level_setting() {
        set_log_level(LogLevel::Debug);
        assert_eq!(get_log_level(), LogLevel::Debug);

        set_log_level(LogLevel::Error);
        assert_eq!(get_log_level(), LogLevel::Error);

        set_log_level(LogLevel::Info);
    }

    #[test]
    fn test_log_writer() {
        let mut writer = LogWriter;
        let result = writer.write_str("测试日志");
        assert!(result.is_ok());
    }

    #[test]
    fn test_log_level_comparison() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn test_level_filter_mapping() {
        assert_eq!(LogLevel::from(LevelFilter::Off), LogLevel::Error);
        assert_eq!(LevelFilter::from(LogLevel::Trace), LevelFilter::Trace);
    }

    #[test]
    #[serial]
    fn test_init_twice() {
        // 同一进程里其他测试可能已经安装过后端
        let _ = init();
        assert_eq!(init(), Err(DeviceError::AlreadyInitialized));
        log::info!(target: "logger", "日志后端已安装");
    }
}
