//! 硬件抽象层 Trait 定义
//!
//! 设备管理核心只需要硬件提供一种能力：按中断号屏蔽/解除屏蔽中断线。
//! 临界区由 `critical-section` crate 提供，不在这里定义。

/// 中断控制器 trait
///
/// ISR 管理器在 `enable` / `disable` 时同步调用它，
/// 让软件回调链的开关和硬件中断屏蔽保持一致。
///
/// 所有方法都可能在中断上下文中被调用，实现不能阻塞。
pub trait InterruptControl: Sync {
    /// 解除中断线屏蔽
    fn enable_irq(&self, irq: u16);

    /// 屏蔽中断线
    fn disable_irq(&self, irq: u16);

    /// 中断线当前是否已解除屏蔽
    fn is_irq_enabled(&self, irq: u16) -> bool;
}
