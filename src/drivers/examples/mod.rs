//! # 示例驱动实现
//!
//! 基于 drivers traits 的 Mock 驱动，同时实现 `DeviceOps`，用于：
//! - 演示驱动如何在 `init` / `deinit` 中申请和归还 DMA 通道、中断回调
//! - 单元测试和集成测试
//!
//! ## 可用驱动
//!
//! | 驱动 | 钩子表 | 占用资源 |
//! |------|--------|----------|
//! | [`MockUart`] | [`UartPort`] | 1 个 DMA 通道 + 1 个中断回调 |
//! | [`MockTimer`] | [`TimerPort`] | 1 个中断回调 |

mod mock_timer;
mod mock_uart;

pub use mock_timer::{MockTimer, TIMER_IRQ_PRIORITY, TimerConfig, TimerPort};
pub use mock_uart::{MockUart, UART_IRQ_PRIORITY, UartPort};
