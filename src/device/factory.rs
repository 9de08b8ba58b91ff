//! # 设备工厂与引用计数
//!
//! 把名称查找转换为带引用计数的 [`DeviceHandle`]。这是应用和中间件
//! 获取外设句柄的唯一正规途径。
//!
//! ## 语义
//!
//! - 第一次 `acquire` 时懒调用 `init`，之后只增加引用计数
//! - 引用计数归零的 `release` 调用 `deinit`，且只调用一次
//! - 完整释放后再次 `acquire` 从描述符的默认配置重新 `init`
//! - `init` 失败时引用计数回滚为 0，不保留任何句柄，
//!   并让已挂接的资源回收器（DMA / ISR 管理器）清掉该设备名下的资源
//!
//! ## 并发
//!
//! 每个设备实例有一把自己的 `spin::Mutex`，引用计数和状态转换都在锁内完成。
//! 锁的自旋次数上限为 [`FACTORY_LOCK_SPINS`]，超时返回 `Timeout`。
//! 不同设备的锁互不影响，所以一个设备的 `init` 可以去 `acquire` 另一个设备。
//!
//! 工厂的所有操作只能在任务上下文中调用，禁止在中断中调用。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! static FACTORY: DeviceFactory = DeviceFactory::new(&DEVICES)
//!     .with_reclaimers(&[&SYSTEM_DMA, &SYSTEM_ISR]);
//!
//! let uart = FACTORY.acquire("uart0")?;
//! uart.suspend()?;
//! uart.resume()?;
//! FACTORY.release(uart)?;
//! ```

use core::fmt;

use spin::{Mutex, MutexGuard};

use super::descriptor::{DeviceDescriptor, DeviceInstance};
use super::lifecycle::{DeviceState, Transition};
use super::registry::DeviceRegistry;
use crate::config::{FACTORY_LOCK_SPINS, MAX_DEVICES};
use crate::error::{DeviceError, Result};

// ============================================================================
// 资源回收
// ============================================================================

/// 按所有者回收资源
///
/// DMA 和 ISR 管理器实现此 trait。工厂在 `init` 失败和 `deinit`
/// 之后以设备名为所有者调用它，保证失败的 `acquire` 不留下任何资源。
pub trait ResourceReclaim: Sync {
    /// 释放 `owner` 名下的所有资源，返回释放的数量
    fn reclaim(&self, owner: &'static str) -> usize;
}

// ============================================================================
// 实例槽
// ============================================================================

/// 单个设备实例的运行时状态，下标与注册表一一对应
#[derive(Clone, Copy)]
struct Slot {
    instance: Option<DeviceInstance>,
    ref_count: u32,
    state: DeviceState,
    last_error: Option<DeviceError>,
}

impl Slot {
    const EMPTY: Slot = Slot {
        instance: None,
        ref_count: 0,
        state: DeviceState::Uninitialized,
        last_error: None,
    };
}

// ============================================================================
// 设备工厂
// ============================================================================

/// 带引用计数的设备工厂
///
/// `N` 为可同时管理的设备数量上限，注册表中下标不小于 `N` 的设备无法获取。
pub struct DeviceFactory<const N: usize = MAX_DEVICES> {
    registry: &'static DeviceRegistry,
    slots: [Mutex<Slot>; N],
    reclaimers: &'static [&'static dyn ResourceReclaim],
}

impl<const N: usize> DeviceFactory<N> {
    /// 创建工厂
    pub const fn new(registry: &'static DeviceRegistry) -> Self {
        Self {
            registry,
            slots: [const { Mutex::new(Slot::EMPTY) }; N],
            reclaimers: &[],
        }
    }

    /// 挂接资源回收器
    pub const fn with_reclaimers(
        mut self,
        reclaimers: &'static [&'static dyn ResourceReclaim],
    ) -> Self {
        self.reclaimers = reclaimers;
        self
    }

    /// 关联的注册表
    pub fn registry(&self) -> &'static DeviceRegistry {
        self.registry
    }

    /// 获取设备句柄，第一次获取时调用 `init`
    pub fn acquire(&self, name: &str) -> Result<DeviceHandle<'_, N>> {
        let (index, dev) = self.lookup(name)?;
        let mut slot = self.lock_slot(index)?;

        if slot.state.is_live() {
            slot.ref_count += 1;
            log::trace!(target: "factory", "{} ref_count -> {}", dev.name(), slot.ref_count);
            return self.handle(index, dev, &slot);
        }

        dev.reset_config();
        self.bring_up(dev, &mut slot)?;
        self.handle(index, dev, &slot)
    }

    /// 使用覆盖的配置获取设备句柄
    ///
    /// 只有在设备没有活动实例时合法，否则返回 `AlreadyInitialized`；
    /// 配置类型与描述符不匹配时返回 `InvalidParameter`。
    pub fn acquire_with_config<T>(&self, name: &str, config: T) -> Result<DeviceHandle<'_, N>>
    where
        T: Copy + Send + Sync + 'static,
    {
        let (index, dev) = self.lookup(name)?;
        let mut slot = self.lock_slot(index)?;

        slot.state.transition(Transition::Init)?;
        dev.config_slot::<T>()?.set(config);
        self.bring_up(dev, &mut slot)?;
        self.handle(index, dev, &slot)
    }

    /// 释放句柄，引用计数归零时调用 `deinit`
    ///
    /// 引用没有被消耗就失败时（句柄不属于本工厂、锁超时、句柄已失效），
    /// 句柄随错误一起被丢弃，这个引用再也无法释放。
    /// 需要重试时使用 [`DeviceFactory::try_release`]。
    pub fn release(&self, handle: DeviceHandle<'_, N>) -> Result<()> {
        self.try_release(handle).unwrap_or_else(|(_, e)| Err(e))
    }

    /// 释放句柄，引用没有被消耗时把句柄交还
    ///
    /// 外层 `Err` 带回原句柄，可以稍后重试；
    /// 外层 `Ok` 表示引用已经减一，内层是 `deinit` 的结果。
    pub fn try_release<'h>(
        &self,
        handle: DeviceHandle<'h, N>,
    ) -> core::result::Result<Result<()>, (DeviceHandle<'h, N>, DeviceError)> {
        if !core::ptr::eq(handle.factory, self) {
            return Err((handle, DeviceError::InvalidParameter));
        }
        let dev = handle.descriptor;
        let mut slot = match self.lock_slot(handle.index) {
            Ok(slot) => slot,
            Err(e) => return Err((handle, e)),
        };

        if slot.ref_count == 0 {
            return Err((handle, DeviceError::NotInitialized));
        }
        slot.ref_count -= 1;
        if slot.ref_count > 0 {
            log::trace!(target: "factory", "{} ref_count -> {}", dev.name(), slot.ref_count);
            return Ok(Ok(()));
        }

        let next = match slot.state.transition(Transition::Deinit) {
            Ok(next) => next,
            Err(e) => return Ok(Err(e)),
        };
        let Some(instance) = slot.instance.take() else {
            return Ok(Err(DeviceError::NotInitialized));
        };
        let result = dev.ops().deinit(dev, instance);
        slot.state = next;

        let reclaimed = self.reclaim(dev.name());
        if reclaimed > 0 {
            log::warn!(target: "factory", "{} left {} resources behind after deinit", dev.name(), reclaimed);
        }

        Ok(match result {
            Ok(()) => {
                log::debug!(target: "factory", "{} deinitialized", dev.name());
                Ok(())
            }
            Err(e) => {
                slot.last_error = Some(e);
                log::error!(target: "factory", "{} deinit failed: {}", dev.name(), e);
                Err(e)
            }
        })
    }

    /// 遍历当前所有活动设备
    pub fn enumerate(&self) -> LiveDevices<'_, N> {
        LiveDevices {
            factory: self,
            index: 0,
        }
    }

    /// 当前引用计数，未初始化时为 0
    pub fn ref_count(&self, name: &str) -> Result<u32> {
        let (index, _) = self.lookup(name)?;
        Ok(self.lock_slot(index)?.ref_count)
    }

    /// 当前生命周期状态
    pub fn state(&self, name: &str) -> Result<DeviceState> {
        let (index, _) = self.lookup(name)?;
        Ok(self.lock_slot(index)?.state)
    }

    /// 最近一次钩子失败的错误
    pub fn last_error(&self, name: &str) -> Result<Option<DeviceError>> {
        let (index, _) = self.lookup(name)?;
        Ok(self.lock_slot(index)?.last_error)
    }

    /// 按名称挂起设备
    pub fn suspend(&self, name: &str) -> Result<()> {
        let (index, _) = self.lookup(name)?;
        self.apply(index, Transition::Suspend)
    }

    /// 按名称恢复设备
    pub fn resume(&self, name: &str) -> Result<()> {
        let (index, _) = self.lookup(name)?;
        self.apply(index, Transition::Resume)
    }

    /// 按注册表逆序挂起所有运行中的设备
    ///
    /// 尽力而为：单个设备失败不影响其他设备，全部尝试后返回第一个错误。
    pub fn suspend_all(&self) -> Result<usize> {
        let mut count = 0;
        let mut first_error = None;
        for index in (0..self.capacity()).rev() {
            if self.lock_slot(index)?.state != DeviceState::Running {
                continue;
            }
            match self.apply(index, Transition::Suspend) {
                Ok(()) => count += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(count), Err)
    }

    /// 按注册表顺序恢复所有已挂起的设备
    pub fn resume_all(&self) -> Result<usize> {
        let mut count = 0;
        let mut first_error = None;
        for index in 0..self.capacity() {
            if self.lock_slot(index)?.state != DeviceState::Suspended {
                continue;
            }
            match self.apply(index, Transition::Resume) {
                Ok(()) => count += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(count), Err)
    }

    // ========================================================================
    // 内部实现
    // ========================================================================

    /// 注册表中可由本工厂管理的设备数
    fn capacity(&self) -> usize {
        self.registry.count().min(N)
    }

    fn lookup(&self, name: &str) -> Result<(usize, &'static DeviceDescriptor)> {
        let index = self.registry.index_of(name)?;
        if index >= N {
            log::warn!(target: "factory", "{} is beyond factory capacity {}", name, N);
            return Err(DeviceError::Exhausted);
        }
        Ok((index, self.registry.get(index)?))
    }

    fn lock_slot(&self, index: usize) -> Result<MutexGuard<'_, Slot>> {
        let slot = self.slots.get(index).ok_or(DeviceError::OutOfRange)?;
        for _ in 0..FACTORY_LOCK_SPINS {
            if let Some(guard) = slot.try_lock() {
                return Ok(guard);
            }
            core::hint::spin_loop();
        }
        Err(DeviceError::Timeout)
    }

    fn handle(
        &self,
        index: usize,
        dev: &'static DeviceDescriptor,
        slot: &Slot,
    ) -> Result<DeviceHandle<'_, N>> {
        Ok(DeviceHandle {
            factory: self,
            index,
            descriptor: dev,
            instance: slot.instance.ok_or(DeviceError::NotInitialized)?,
        })
    }

    /// 调用 `init`，失败时回滚
    fn bring_up(&self, dev: &'static DeviceDescriptor, slot: &mut Slot) -> Result<()> {
        let next = slot.state.transition(Transition::Init)?;
        slot.ref_count = 1;

        match dev.ops().init(dev) {
            Ok(instance) => {
                slot.instance = Some(instance);
                slot.state = next;
                log::debug!(target: "factory", "{} initialized", dev.name());
                Ok(())
            }
            Err(e) => {
                *slot = Slot {
                    last_error: Some(e),
                    ..Slot::EMPTY
                };
                dev.reset_config();
                let reclaimed = self.reclaim(dev.name());
                log::warn!(
                    target: "factory",
                    "{} init failed: {}, rolled back ({} resources reclaimed)",
                    dev.name(),
                    e,
                    reclaimed
                );
                Err(e)
            }
        }
    }

    /// 对活动实例执行 suspend / resume / reinit
    fn apply(&self, index: usize, op: Transition) -> Result<()> {
        let dev = self.registry.get(index)?;
        let mut slot = self.lock_slot(index)?;
        let next = slot.state.transition(op)?;
        let instance = slot.instance.ok_or(DeviceError::NotInitialized)?;

        let ops = dev.ops();
        let result = match op {
            Transition::Suspend => ops.suspend(dev, instance),
            Transition::Resume => ops.resume(dev, instance),
            Transition::Reinit => ops.reinit(dev, instance),
            Transition::Init | Transition::Deinit => Err(DeviceError::InvalidParameter),
        };

        match result {
            Ok(()) => {
                log::debug!(target: "factory", "{} {:?} -> {:?}", dev.name(), op, next);
                slot.state = next;
                Ok(())
            }
            Err(e) => {
                log::warn!(target: "factory", "{} {:?} failed: {}", dev.name(), op, e);
                slot.state = DeviceState::Error;
                slot.last_error = Some(e);
                Err(e)
            }
        }
    }

    fn reclaim(&self, owner: &'static str) -> usize {
        self.reclaimers.iter().map(|r| r.reclaim(owner)).sum()
    }
}

// ============================================================================
// 设备句柄
// ============================================================================

/// 带引用计数的设备句柄
///
/// 每次成功的 `acquire` 产生一个句柄，对应一个引用。
/// 句柄不可克隆；用完必须交还给 [`DeviceFactory::release`]，
/// 直接丢弃会泄漏一个引用，设备将永远不会 `deinit`。
#[must_use = "a dropped handle leaks a reference; pass it to DeviceFactory::release"]
pub struct DeviceHandle<'a, const N: usize = MAX_DEVICES> {
    factory: &'a DeviceFactory<N>,
    index: usize,
    descriptor: &'static DeviceDescriptor,
    instance: DeviceInstance,
}

impl<'a, const N: usize> DeviceHandle<'a, N> {
    /// 设备名称
    pub fn name(&self) -> &'static str {
        self.descriptor.name()
    }

    /// 所属描述符
    pub fn descriptor(&self) -> &'static DeviceDescriptor {
        self.descriptor
    }

    /// 驱动实例
    pub fn instance(&self) -> DeviceInstance {
        self.instance
    }

    /// 当前生命周期状态
    pub fn state(&self) -> Result<DeviceState> {
        Ok(self.factory.lock_slot(self.index)?.state)
    }

    /// 当前引用计数
    pub fn ref_count(&self) -> Result<u32> {
        Ok(self.factory.lock_slot(self.index)?.ref_count)
    }

    /// 当前运行时配置
    pub fn config<T: Copy + Send + Sync + 'static>(&self) -> Result<T> {
        self.descriptor.config::<T>()
    }

    /// 挂起（Running -> Suspended）
    pub fn suspend(&self) -> Result<()> {
        self.factory.apply(self.index, Transition::Suspend)
    }

    /// 恢复（Suspended -> Running）
    pub fn resume(&self) -> Result<()> {
        self.factory.apply(self.index, Transition::Resume)
    }

    /// 重新应用当前配置（Running -> Running）
    pub fn reinit(&self) -> Result<()> {
        self.factory.apply(self.index, Transition::Reinit)
    }

    /// 写入新配置并重新应用，不释放句柄
    pub fn reconfigure<T: Copy + Send + Sync + 'static>(&self, config: T) -> Result<()> {
        let slot = self.descriptor.config_slot::<T>()?;
        let state = self.state()?;
        state.transition(Transition::Reinit)?;
        let previous = slot.get();
        slot.set(config);
        self.reinit().inspect_err(|_| slot.set(previous))
    }

    /// 把句柄交还给工厂
    pub fn release(self) -> Result<()> {
        let factory = self.factory;
        factory.release(self)
    }
}

impl<const N: usize> fmt::Debug for DeviceHandle<'_, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("name", &self.name())
            .field("index", &self.index)
            .field("instance", &self.instance)
            .finish()
    }
}

// ============================================================================
// 活动设备枚举
// ============================================================================

/// 活动设备快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveDevice {
    pub name: &'static str,
    pub state: DeviceState,
    pub ref_count: u32,
    pub instance: DeviceInstance,
}

/// [`DeviceFactory::enumerate`] 返回的迭代器
///
/// 逐个锁住实例槽取快照，拿不到锁（超时）的槽会被跳过。
pub struct LiveDevices<'a, const N: usize> {
    factory: &'a DeviceFactory<N>,
    index: usize,
}

impl<const N: usize> Iterator for LiveDevices<'_, N> {
    type Item = LiveDevice;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.factory.capacity() {
            let index = self.index;
            self.index += 1;

            let Ok(dev) = self.factory.registry.get(index) else {
                continue;
            };
            let Ok(slot) = self.factory.lock_slot(index) else {
                continue;
            };
            if let (true, Some(instance)) = (slot.state.is_live(), slot.instance) {
                return Some(LiveDevice {
                    name: dev.name(),
                    state: slot.state,
                    ref_count: slot.ref_count,
                    instance,
                });
            }
        }
        None
    }
}
