//! # 中断回调链管理
//!
//! 一条物理中断线可以挂多个互不相关子系统的回调。
//! [`IsrManager::dispatch`] 在中断上下文中按优先级从高到低调用
//! 该线上所有已使能的回调，优先级相同时按注册顺序调用。
//!
//! ## 节点状态
//!
//! ```text
//!   register()        unregister()        下一次 dispatch / 节点耗尽时的 register
//!  Free ───────► Live ─────────────► Dead ──────────────────────────────────► Free
//! ```
//!
//! 每个节点有一个原子标签 `(generation << 2) | state`。
//! `unregister` 只用一次 CAS 把 Live 改成 Dead（墓碑），从不在遍历中原地删除；
//! `dispatch` 调用每个回调之前都重新比较一次标签，
//! 所以在回调里注销同一条线上的其他节点是安全的，被注销的节点不会再被调用。
//!
//! ## 中断线
//!
//! 中断线初始为关闭状态，关闭的线上的回调链不会被执行。
//! 配置了 [`InterruptControl`] 时，`enable` / `disable` 同步到硬件。

use core::cell::RefCell;
use core::cmp::Reverse;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use critical_section::Mutex;

use crate::config::{MAX_IRQ_LINES, MAX_ISR_CALLBACKS};
use crate::device::ResourceReclaim;
use crate::error::{DeviceError, Result};
use crate::hal::InterruptControl;

/// 中断回调：`(中断号, 注册时的上下文)`
pub type IsrCallback = fn(u16, usize);

const STATE_FREE: u32 = 0;
const STATE_LIVE: u32 = 1;
const STATE_DEAD: u32 = 2;
const STATE_MASK: u32 = 0b11;

const fn tag(generation: u32, state: u32) -> u32 {
    (generation << 2) | state
}

/// 注册句柄
///
/// 节点被回收复用后代数会变化，旧句柄随之失效。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsrHandle {
    index: u16,
    irq: u16,
    generation: u32,
}

impl IsrHandle {
    /// 注册的中断号
    pub const fn irq(&self) -> u16 {
        self.irq
    }

    const fn live_tag(&self) -> u32 {
        tag(self.generation, STATE_LIVE)
    }
}

#[derive(Clone, Copy)]
struct Node {
    irq: u16,
    priority: u8,
    seq: u32,
    callback: Option<IsrCallback>,
    ctx: usize,
    owner: Option<&'static str>,
}

impl Node {
    const EMPTY: Node = Node {
        irq: 0,
        priority: 0,
        seq: 0,
        callback: None,
        ctx: 0,
        owner: None,
    };
}

struct NodeTable<const NODES: usize> {
    nodes: [Node; NODES],
    next_seq: u32,
}

/// dispatch 时的回调快照
#[derive(Clone, Copy)]
struct Pending {
    index: usize,
    tag: u32,
    priority: u8,
    seq: u32,
    callback: IsrCallback,
    ctx: usize,
}

fn noop(_irq: u16, _ctx: usize) {}

impl Pending {
    const EMPTY: Pending = Pending {
        index: 0,
        tag: 0,
        priority: 0,
        seq: 0,
        callback: noop,
        ctx: 0,
    };
}

/// 中断回调链管理器
///
/// `LINES` 为中断线数量，`NODES` 为所有线共享的回调节点数量。
pub struct IsrManager<const LINES: usize, const NODES: usize> {
    tags: [AtomicU32; NODES],
    callback_enabled: [AtomicBool; NODES],
    table: Mutex<RefCell<NodeTable<NODES>>>,
    line_enabled: [AtomicBool; LINES],
    dispatches: [AtomicU32; LINES],
    spurious: AtomicU32,
    controller: Option<&'static dyn InterruptControl>,
}

/// 按系统配置确定大小的 ISR 管理器
pub type SystemIsr = IsrManager<MAX_IRQ_LINES, MAX_ISR_CALLBACKS>;

/// 系统全局 ISR 管理器
#[cfg(not(all(feature = "cortex_m3", not(test), target_arch = "arm")))]
pub static SYSTEM_ISR: SystemIsr = SystemIsr::new();

/// 系统全局 ISR 管理器，开关同步到 NVIC
#[cfg(all(feature = "cortex_m3", not(test), target_arch = "arm"))]
pub static SYSTEM_ISR: SystemIsr = SystemIsr::new().with_controller(&crate::hal::Nvic);

impl<const LINES: usize, const NODES: usize> IsrManager<LINES, NODES> {
    pub const fn new() -> Self {
        Self {
            tags: [const { AtomicU32::new(0) }; NODES],
            callback_enabled: [const { AtomicBool::new(false) }; NODES],
            table: Mutex::new(RefCell::new(NodeTable {
                nodes: [Node::EMPTY; NODES],
                next_seq: 0,
            })),
            line_enabled: [const { AtomicBool::new(false) }; LINES],
            dispatches: [const { AtomicU32::new(0) }; LINES],
            spurious: AtomicU32::new(0),
            controller: None,
        }
    }

    /// 挂接硬件中断控制器
    pub const fn with_controller(mut self, controller: &'static dyn InterruptControl) -> Self {
        self.controller = Some(controller);
        self
    }

    /// 注册回调
    pub fn register(
        &self,
        irq: u16,
        callback: IsrCallback,
        ctx: usize,
        priority: u8,
    ) -> Result<IsrHandle> {
        self.insert(None, irq, callback, ctx, priority)
    }

    /// 以设备名为所有者注册回调，设备 `deinit` 后可被 [`ResourceReclaim`] 回收
    pub fn register_owned(
        &self,
        owner: &'static str,
        irq: u16,
        callback: IsrCallback,
        ctx: usize,
        priority: u8,
    ) -> Result<IsrHandle> {
        self.insert(Some(owner), irq, callback, ctx, priority)
    }

    /// 注销回调
    ///
    /// 只打墓碑，节点在下一次 dispatch 时回收。可以在回调中调用。
    pub fn unregister(&self, handle: IsrHandle) -> Result<()> {
        let index = handle.index as usize;
        let tag = self.tags.get(index).ok_or(DeviceError::NotFound)?;
        tag.compare_exchange(
            handle.live_tag(),
            tag_dead(handle.generation),
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .map_err(|_| DeviceError::NotFound)?;
        log::trace!(target: "isr", "irq{} node {} unregistered", handle.irq, index);
        Ok(())
    }

    /// 使能或禁用单个回调，不影响同一条线上的其他回调
    pub fn set_callback_enabled(&self, handle: IsrHandle, enabled: bool) -> Result<()> {
        let index = handle.index as usize;
        if self.tags.get(index).map(|t| t.load(Ordering::Acquire)) != Some(handle.live_tag()) {
            return Err(DeviceError::NotFound);
        }
        self.callback_enabled[index].store(enabled, Ordering::Release);
        Ok(())
    }

    /// 打开中断线
    pub fn enable(&self, irq: u16) -> Result<()> {
        let line = self.line(irq)?;
        line.store(true, Ordering::Release);
        if let Some(ctrl) = self.controller {
            ctrl.enable_irq(irq);
        }
        Ok(())
    }

    /// 关闭中断线
    pub fn disable(&self, irq: u16) -> Result<()> {
        let line = self.line(irq)?;
        if let Some(ctrl) = self.controller {
            ctrl.disable_irq(irq);
        }
        line.store(false, Ordering::Release);
        Ok(())
    }

    /// 中断线是否打开
    pub fn is_enabled(&self, irq: u16) -> bool {
        self.line(irq).is_ok_and(|line| line.load(Ordering::Acquire))
    }

    /// 分发一次中断，返回调用的回调数
    ///
    /// 在中断上下文中调用。线号越界或线上没有存活的回调时计为一次虚假中断；
    /// 关闭的线直接忽略。
    pub fn dispatch(&self, irq: u16) -> usize {
        let Ok(line) = self.line(irq) else {
            self.spurious.fetch_add(1, Ordering::Relaxed);
            return 0;
        };
        if !line.load(Ordering::Acquire) {
            return 0;
        }
        self.dispatches[irq as usize].fetch_add(1, Ordering::Relaxed);

        let mut chain = [Pending::EMPTY; NODES];
        let len = critical_section::with(|cs| {
            let table = self.table.borrow_ref(cs);
            let mut len = 0;
            for (index, node) in table.nodes.iter().enumerate() {
                if node.irq != irq {
                    continue;
                }
                let current = self.tags[index].load(Ordering::Acquire);
                match (current & STATE_MASK, node.callback) {
                    (STATE_DEAD, _) => {
                        self.tags[index].store(current & !STATE_MASK, Ordering::Release);
                    }
                    (STATE_LIVE, Some(callback)) => {
                        chain[len] = Pending {
                            index,
                            tag: current,
                            priority: node.priority,
                            seq: node.seq,
                            callback,
                            ctx: node.ctx,
                        };
                        len += 1;
                    }
                    _ => {}
                }
            }
            len
        });

        if len == 0 {
            self.spurious.fetch_add(1, Ordering::Relaxed);
            return 0;
        }

        let chain = &mut chain[..len];
        chain.sort_unstable_by_key(|p| (Reverse(p.priority), p.seq));

        let mut invoked = 0;
        for pending in chain.iter() {
            if self.tags[pending.index].load(Ordering::Acquire) != pending.tag
                || !self.callback_enabled[pending.index].load(Ordering::Acquire)
            {
                continue;
            }
            (pending.callback)(irq, pending.ctx);
            invoked += 1;
        }
        invoked
    }

    /// 线上存活的回调数
    pub fn callback_count(&self, irq: u16) -> usize {
        critical_section::with(|cs| {
            let table = self.table.borrow_ref(cs);
            table
                .nodes
                .iter()
                .enumerate()
                .filter(|(index, node)| {
                    node.irq == irq
                        && self.tags[*index].load(Ordering::Acquire) & STATE_MASK == STATE_LIVE
                })
                .count()
        })
    }

    /// 线上的分发次数（关闭时的中断不计）
    pub fn dispatch_count(&self, irq: u16) -> u32 {
        self.dispatches
            .get(irq as usize)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// 虚假中断次数
    pub fn spurious_count(&self) -> u32 {
        self.spurious.load(Ordering::Relaxed)
    }

    /// 清空所有注册并关闭所有中断线（测试用）
    pub fn reset(&self) {
        critical_section::with(|cs| {
            let mut table = self.table.borrow_ref_mut(cs);
            for (index, tag) in self.tags.iter().enumerate() {
                let generation = tag.load(Ordering::Acquire) >> 2;
                tag.store(self::tag(generation, STATE_FREE), Ordering::Release);
                table.nodes[index] = Node::EMPTY;
            }
            table.next_seq = 0;
        });
        for (irq, line) in self.line_enabled.iter().enumerate() {
            if line.swap(false, Ordering::AcqRel) {
                if let Some(ctrl) = self.controller {
                    ctrl.disable_irq(irq as u16);
                }
            }
        }
        for count in &self.dispatches {
            count.store(0, Ordering::Relaxed);
        }
        self.spurious.store(0, Ordering::Relaxed);
    }

    // ========================================================================
    // 内部实现
    // ========================================================================

    fn line(&self, irq: u16) -> Result<&AtomicBool> {
        self.line_enabled
            .get(irq as usize)
            .ok_or(DeviceError::InvalidParameter)
    }

    fn insert(
        &self,
        owner: Option<&'static str>,
        irq: u16,
        callback: IsrCallback,
        ctx: usize,
        priority: u8,
    ) -> Result<IsrHandle> {
        self.line(irq)?;

        let handle = critical_section::with(|cs| -> Result<IsrHandle> {
            let mut table = self.table.borrow_ref_mut(cs);
            let index = match self.find_free() {
                Some(index) => index,
                None => {
                    self.reap_all();
                    self.find_free().ok_or(DeviceError::Exhausted)?
                }
            };

            let generation = (self.tags[index].load(Ordering::Acquire) >> 2).wrapping_add(1) & (u32::MAX >> 2);
            let seq = table.next_seq;
            table.next_seq = seq.wrapping_add(1);
            table.nodes[index] = Node {
                irq,
                priority,
                seq,
                callback: Some(callback),
                ctx,
                owner,
            };
            self.callback_enabled[index].store(true, Ordering::Release);
            self.tags[index].store(tag(generation, STATE_LIVE), Ordering::Release);

            Ok(IsrHandle {
                index: index as u16,
                irq,
                generation,
            })
        });

        match handle {
            Ok(h) => log::trace!(target: "isr", "irq{} node {} registered, priority {}", irq, h.index, priority),
            Err(e) => log::warn!(target: "isr", "irq{} register failed: {}", irq, e),
        }
        handle
    }

    fn find_free(&self) -> Option<usize> {
        self.tags
            .iter()
            .position(|t| t.load(Ordering::Acquire) & STATE_MASK == STATE_FREE)
    }

    /// 回收所有墓碑节点，调用者必须处于临界区内
    fn reap_all(&self) {
        for tag in &self.tags {
            let current = tag.load(Ordering::Acquire);
            if current & STATE_MASK == STATE_DEAD {
                tag.store(current & !STATE_MASK, Ordering::Release);
            }
        }
    }
}

const fn tag_dead(generation: u32) -> u32 {
    tag(generation, STATE_DEAD)
}

impl<const LINES: usize, const NODES: usize> Default for IsrManager<LINES, NODES> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const LINES: usize, const NODES: usize> ResourceReclaim for IsrManager<LINES, NODES> {
    fn reclaim(&self, owner: &'static str) -> usize {
        let count = critical_section::with(|cs| {
            let table = self.table.borrow_ref(cs);
            let mut count = 0;
            for (index, node) in table.nodes.iter().enumerate() {
                if node.owner != Some(owner) {
                    continue;
                }
                let current = self.tags[index].load(Ordering::Acquire);
                if current & STATE_MASK == STATE_LIVE {
                    self.tags[index].store(tag_dead(current >> 2), Ordering::Release);
                    count += 1;
                }
            }
            count
        });
        if count > 0 {
            log::debug!(target: "isr", "reclaimed {} callbacks from {}", count, owner);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockInterruptController;
    use std::sync::Mutex as StdMutex;
    use std::vec::Vec;

    type Isr = IsrManager<16, 8>;

    #[test]
    fn test_priority_order() {
        static ORDER: StdMutex<Vec<usize>> = StdMutex::new(Vec::new());
        fn record(_irq: u16, ctx: usize) {
            ORDER.lock().unwrap().push(ctx);
        }

        let isr = Isr::new();
        isr.register(5, record, 10, 10).unwrap();
        isr.register(5, record, 5, 5).unwrap();
        isr.register(5, record, 20, 20).unwrap();
        isr.enable(5).unwrap();

        assert_eq!(isr.dispatch(5), 3);
        assert_eq!(*ORDER.lock().unwrap(), [20, 10, 5]);
        assert_eq!(isr.dispatch_count(5), 1);
    }

    #[test]
    fn test_equal_priority_keeps_registration_order() {
        static ORDER: StdMutex<Vec<usize>> = StdMutex::new(Vec::new());
        fn record(_irq: u16, ctx: usize) {
            ORDER.lock().unwrap().push(ctx);
        }

        let isr = Isr::new();
        isr.register(3, record, 1, 7).unwrap();
        isr.register(3, record, 2, 9).unwrap();
        isr.register(3, record, 3, 7).unwrap();
        isr.register(3, record, 4, 7).unwrap();
        isr.enable(3).unwrap();

        isr.dispatch(3);
        assert_eq!(*ORDER.lock().unwrap(), [2, 1, 3, 4]);
    }

    #[test]
    fn test_disabled_line_is_inert() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        fn count(_irq: u16, _ctx: usize) {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let isr = Isr::new();
        isr.register(2, count, 0, 1).unwrap();
        assert!(!isr.is_enabled(2));
        assert_eq!(isr.dispatch(2), 0);
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);

        isr.enable(2).unwrap();
        assert_eq!(isr.dispatch(2), 1);
        isr.disable(2).unwrap();
        assert_eq!(isr.dispatch(2), 0);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(isr.spurious_count(), 0);
    }

    #[test]
    fn test_spurious_dispatch() {
        let isr = Isr::new();
        isr.enable(9).unwrap();
        assert_eq!(isr.dispatch(9), 0);
        assert_eq!(isr.dispatch(200), 0);
        assert_eq!(isr.spurious_count(), 2);
        assert_eq!(isr.enable(16), Err(DeviceError::InvalidParameter));
    }

    #[test]
    fn test_unregister_during_dispatch() {
        static ISR: Isr = Isr::new();
        static VICTIM: StdMutex<Option<IsrHandle>> = StdMutex::new(None);
        static ORDER: StdMutex<Vec<usize>> = StdMutex::new(Vec::new());

        fn killer(_irq: u16, ctx: usize) {
            ORDER.lock().unwrap().push(ctx);
            if let Some(victim) = VICTIM.lock().unwrap().take() {
                ISR.unregister(victim).unwrap();
            }
        }
        fn victim(_irq: u16, ctx: usize) {
            ORDER.lock().unwrap().push(ctx);
        }

        ISR.register(4, killer, 1, 20).unwrap();
        let handle = ISR.register(4, victim, 2, 10).unwrap();
        *VICTIM.lock().unwrap() = Some(handle);
        ISR.enable(4).unwrap();

        assert_eq!(ISR.dispatch(4), 1);
        assert_eq!(*ORDER.lock().unwrap(), [1]);
        assert_eq!(ISR.callback_count(4), 1);

        // 墓碑在下一次 dispatch 中被回收，旧句柄失效
        assert_eq!(ISR.dispatch(4), 1);
        assert_eq!(ISR.unregister(handle), Err(DeviceError::NotFound));
    }

    #[test]
    fn test_exhaustion_reaps_tombstones() {
        let isr = IsrManager::<4, 2>::new();
        let a = isr.register(1, noop, 0, 1).unwrap();
        isr.register(1, noop, 0, 1).unwrap();
        assert_eq!(isr.register(1, noop, 0, 1), Err(DeviceError::Exhausted));

        isr.unregister(a).unwrap();
        assert_eq!(isr.unregister(a), Err(DeviceError::NotFound));
        let c = isr.register(2, noop, 0, 1).unwrap();
        assert_eq!(c.irq(), 2);
        assert_ne!(c, a);
        assert_eq!(isr.set_callback_enabled(a, false), Err(DeviceError::NotFound));
    }

    #[test]
    fn test_callback_enable_flag() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        fn count(_irq: u16, _ctx: usize) {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let isr = Isr::new();
        let h = isr.register(6, count, 0, 1).unwrap();
        isr.register(6, count, 0, 2).unwrap();
        isr.enable(6).unwrap();

        isr.set_callback_enabled(h, false).unwrap();
        assert_eq!(isr.dispatch(6), 1);
        isr.set_callback_enabled(h, true).unwrap();
        assert_eq!(isr.dispatch(6), 2);
        assert_eq!(CALLS.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_reclaim_by_owner() {
        let isr = Isr::new();
        isr.register_owned("uart0", 1, noop, 0, 1).unwrap();
        isr.register_owned("uart0", 2, noop, 0, 1).unwrap();
        isr.register_owned("timer0", 2, noop, 0, 1).unwrap();
        isr.register(2, noop, 0, 1).unwrap();

        assert_eq!(isr.reclaim("uart0"), 2);
        assert_eq!(isr.reclaim("uart0"), 0);
        assert_eq!(isr.callback_count(1), 0);
        assert_eq!(isr.callback_count(2), 2);
    }

    #[test]
    fn test_controller_mirrors_line_state() {
        static CTRL: MockInterruptController = MockInterruptController::new();
        let isr = Isr::new().with_controller(&CTRL);

        isr.enable(7).unwrap();
        assert!(CTRL.is_irq_enabled(7));
        isr.disable(7).unwrap();
        assert!(!CTRL.is_irq_enabled(7));

        isr.enable(8).unwrap();
        isr.reset();
        assert!(!CTRL.is_irq_enabled(8));
        assert!(!isr.is_enabled(8));
    }
}
