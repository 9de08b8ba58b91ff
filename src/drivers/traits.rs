//! # 设备驱动 Trait 定义
//!
//! 寄存器级的外设操作接口。设备管理核心不关心这些接口，
//! 它们由驱动的 [`DeviceOps`](crate::device::DeviceOps) 实现在内部使用。
//!
//! ## Trait 层次结构
//!
//! ```text
//! Device (基础设备)
//!    ├── Read (可读设备)
//!    ├── Write (可写设备)
//!    │      └── ReadWrite = Read + Write
//!    │             └── Uart
//!    └── TimerDevice (硬件定时器)
//! ```

use crate::error::DeviceError;

// ============================================================================
// 基础设备 Trait
// ============================================================================

/// 基础设备 trait
///
/// # 关联类型
///
/// - `Error`: 设备特定的错误类型
pub trait Device {
    /// 设备错误类型
    type Error;

    /// 初始化设备
    fn init(&mut self) -> Result<(), Self::Error>;

    /// 获取设备名称
    fn name(&self) -> &'static str;

    /// 检查设备是否就绪
    ///
    /// 默认实现返回 `true`，子类可以覆盖此方法。
    fn is_ready(&self) -> bool {
        true
    }

    /// 重置设备
    ///
    /// 将设备恢复到初始状态。默认实现调用 `init()`。
    fn reset(&mut self) -> Result<(), Self::Error> {
        self.init()
    }
}

// ============================================================================
// 读写 Trait
// ============================================================================

/// 可读设备 trait
pub trait Read: Device {
    /// 读取数据到缓冲区，返回实际读取的字节数
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// 读取单个字节
    fn read_byte(&mut self) -> Result<u8, Self::Error> {
        let mut buf = [0u8; 1];
        self.read(&mut buf)?;
        Ok(buf[0])
    }
}

/// 可写设备 trait
pub trait Write: Device {
    /// 写入数据，返回实际写入的字节数
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;

    /// 刷新缓冲区
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// 写入单个字节
    fn write_byte(&mut self, byte: u8) -> Result<(), Self::Error> {
        self.write(&[byte])?;
        Ok(())
    }
}

/// 可读写设备 trait
pub trait ReadWrite: Read + Write {}

impl<T: Read + Write> ReadWrite for T {}

// ============================================================================
// 串行通信 Trait
// ============================================================================

/// 串行通信配置
///
/// 也是 UART 设备描述符的运行时配置类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    /// 波特率
    pub baudrate: u32,
    /// 数据位
    pub data_bits: DataBits,
    /// 停止位
    pub stop_bits: StopBits,
    /// 校验位
    pub parity: Parity,
}

impl SerialConfig {
    /// 115200 8N1
    pub const DEFAULT: SerialConfig = SerialConfig {
        baudrate: 115200,
        data_bits: DataBits::Eight,
        stop_bits: StopBits::One,
        parity: Parity::None,
    };

    pub const fn with_baudrate(mut self, baudrate: u32) -> Self {
        self.baudrate = baudrate;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// 数据位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Five = 5,
    Six = 6,
    Seven = 7,
    Eight = 8,
    Nine = 9,
}

/// 停止位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

/// 校验位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// UART 设备 trait
pub trait Uart: Read + Write {
    /// 配置 UART
    fn configure(&mut self, config: SerialConfig) -> Result<(), Self::Error>;

    /// 获取当前波特率
    fn baudrate(&self) -> u32;

    /// 检查是否有数据可读
    fn is_rx_ready(&self) -> bool;
}

// ============================================================================
// 定时器 Trait
// ============================================================================

/// 定时器设备 trait
pub trait TimerDevice: Device {
    /// 启动定时器
    fn start(&mut self) -> Result<(), Self::Error>;

    /// 停止定时器
    fn stop(&mut self) -> Result<(), Self::Error>;

    /// 设置周期（微秒）
    fn set_period_us(&mut self, period: u32) -> Result<(), Self::Error>;

    /// 获取当前计数值
    fn count(&self) -> u32;

    /// 检查定时器是否运行中
    fn is_running(&self) -> bool;
}

/// 寄存器级操作失败时统一映射为核心错误
pub type DriverResult<T> = Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;

    struct Loopback {
        initialized: bool,
        data: [u8; 16],
        pos: usize,
    }

    impl Device for Loopback {
        type Error = DeviceError;

        fn init(&mut self) -> DriverResult<()> {
            self.initialized = true;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "loopback"
        }

        fn is_ready(&self) -> bool {
            self.initialized
        }
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> DriverResult<usize> {
            if !self.initialized {
                return Err(DeviceError::NotInitialized);
            }
            let len = buf.len().min(self.pos);
            buf[..len].copy_from_slice(&self.data[..len]);
            Ok(len)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> DriverResult<usize> {
            if !self.initialized {
                return Err(DeviceError::NotInitialized);
            }
            let len = buf.len().min(self.data.len() - self.pos);
            self.data[self.pos..self.pos + len].copy_from_slice(&buf[..len]);
            self.pos += len;
            Ok(len)
        }

        fn flush(&mut self) -> DriverResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_methods() {
        let mut dev = Loopback {
            initialized: false,
            data: [0; 16],
            pos: 0,
        };
        assert_eq!(dev.write_byte(1), Err(DeviceError::NotInitialized));

        dev.reset().unwrap();
        assert!(dev.is_ready());
        dev.write_byte(0x5A).unwrap();
        assert_eq!(dev.read_byte().unwrap(), 0x5A);
    }

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baudrate, 115200);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.with_baudrate(9600).baudrate, 9600);
    }
}
