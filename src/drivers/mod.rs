//! # 设备驱动框架
//!
//! 寄存器级驱动接口，以及接入设备管理核心的参考驱动。
//!
//! ## 模块结构
//!
//! - [`traits`]: 设备驱动 trait 定义
//! - [`examples`]: Mock 驱动，实现了 `DeviceOps`
//!
//! ## 支持的设备类型
//!
//! | 设备类型 | Trait | 说明 |
//! |---------|-------|------|
//! | 基础设备 | `Device` | 所有设备的基础 trait |
//! | 可读设备 | `Read` | 支持读取数据 |
//! | 可写设备 | `Write` | 支持写入数据 |
//! | UART | `Uart` | 串行通信 |
//! | 定时器 | `TimerDevice` | 硬件定时器 |

pub mod examples;
pub mod traits;

// 重新导出常用类型
pub use traits::{
    // 基础 trait
    Device,
    Read,
    Write,
    ReadWrite,
    DriverResult,

    // 串行通信
    Uart,
    SerialConfig,
    DataBits,
    StopBits,
    Parity,

    // 定时器
    TimerDevice,
};
