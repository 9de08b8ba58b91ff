//! Cortex-M3 架构支持
//!
//! - 基于 PRIMASK 的 `critical_section::Impl`，支持嵌套
//! - 基于 NVIC 的 [`InterruptControl`] 实现

use cortex_m::interrupt::InterruptNumber;
use cortex_m::peripheral::NVIC;
use critical_section::RawRestoreState;

use super::traits::InterruptControl;

// ============================================================================
// 临界区
// ============================================================================

struct CriticalSection;
critical_section::set_impl!(CriticalSection);

unsafe impl critical_section::Impl for CriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let was_active = cortex_m::register::primask::read().is_active();
        cortex_m::interrupt::disable();
        was_active
    }

    unsafe fn release(was_active: RawRestoreState) {
        // 只恢复进入临界区之前的状态，嵌套时内层退出不会打开中断
        if was_active {
            unsafe {
                cortex_m::interrupt::enable();
            }
        }
    }
}

// ============================================================================
// NVIC
// ============================================================================

/// 外设中断号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqNumber(pub u16);

unsafe impl InterruptNumber for IrqNumber {
    fn number(self) -> u16 {
        self.0
    }
}

/// NVIC 中断控制器
pub struct Nvic;

impl InterruptControl for Nvic {
    fn enable_irq(&self, irq: u16) {
        // Safety: 回调链已经就绪，解除屏蔽不会破坏临界区
        unsafe { NVIC::unmask(IrqNumber(irq)) }
    }

    fn disable_irq(&self, irq: u16) {
        NVIC::mask(IrqNumber(irq));
    }

    fn is_irq_enabled(&self, irq: u16) -> bool {
        NVIC::is_enabled(IrqNumber(irq))
    }
}
