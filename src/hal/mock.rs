//! 宿主机上的中断控制器模拟
//!
//! 用位图记录每条中断线的屏蔽状态，供测试和非嵌入式构建使用。

use core::sync::atomic::{AtomicU64, Ordering};

use super::traits::InterruptControl;

/// 模拟中断控制器，支持 0..128 号中断
pub struct MockInterruptController {
    enabled: [AtomicU64; 2],
}

impl MockInterruptController {
    pub const fn new() -> Self {
        Self {
            enabled: [AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    fn word(&self, irq: u16) -> Option<(&AtomicU64, u64)> {
        let word = self.enabled.get(irq as usize / 64)?;
        Some((word, 1u64 << (irq % 64)))
    }
}

impl Default for MockInterruptController {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptControl for MockInterruptController {
    fn enable_irq(&self, irq: u16) {
        if let Some((word, bit)) = self.word(irq) {
            word.fetch_or(bit, Ordering::SeqCst);
        }
    }

    fn disable_irq(&self, irq: u16) {
        if let Some((word, bit)) = self.word(irq) {
            word.fetch_and(!bit, Ordering::SeqCst);
        }
    }

    fn is_irq_enabled(&self, irq: u16) -> bool {
        self.word(irq)
            .is_some_and(|(word, bit)| word.load(Ordering::SeqCst) & bit != 0)
    }
}
