//! 硬件抽象层 (HAL)
//!
//! 提供中断控制器抽象和各架构的临界区实现。

pub mod traits;

#[cfg(all(feature = "cortex_m3", not(test), target_arch = "arm"))]
pub mod cortex_m3;
pub mod mock;

// 重新导出 traits
pub use traits::InterruptControl;

#[cfg(all(feature = "cortex_m3", not(test), target_arch = "arm"))]
pub use cortex_m3::Nvic;
pub use mock::MockInterruptController;
