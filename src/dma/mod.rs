//! # DMA 通道管理
//!
//! 在多个互不相关的驱动之间仲裁每个控制器上固定数量的传输通道。
//!
//! ## 规则
//!
//! | 操作 | 结果 |
//! |------|------|
//! | `allocate(c, Channel(n), owner)` | 通道空闲则分配，已被占用返回 `Busy` |
//! | `allocate(c, Any, owner)` | 分配下标最小的空闲通道，全部占用返回 `Exhausted` |
//! | `free(ch)` | 释放通道；重复释放返回 `NotAllocated`，状态不变 |
//! | `notify_complete(ch)` | 中断上下文调用，每次传输最多触发一次完成回调 |
//!
//! 所有修改都在 `critical_section::with` 内完成，
//! 所以任务上下文和中断上下文都可以调用；完成回调在临界区之外执行。
//!
//! `allocate` 返回的 [`DmaChannel`] 带有分配代数，`free` / `arm` / `set_completion`
//! 只接受当前这次分配的令牌：通道被释放并重新分配给别人之后，
//! 旧令牌的所有操作都返回 `NotAllocated`，不会影响新的所有者。
//!
//! 通道的所有者是设备名，是一个不持有所有权的弱引用。
//! 设备 `deinit` 时应自行释放通道，工厂在 `deinit` 之后还会通过
//! [`ResourceReclaim`] 回收遗留的通道。

use core::cell::RefCell;

use critical_section::Mutex;

use crate::config::{DMA_CHANNELS_PER_CONTROLLER, DMA_CONTROLLERS};
use crate::device::ResourceReclaim;
use crate::error::{DeviceError, Result};

/// 完成回调：`(通道, 注册时的上下文)`
pub type DmaCallback = fn(DmaChannel, usize);

/// (控制器, 通道) 标识
///
/// 由 `allocate` 返回时同时是这次分配的令牌。相等比较只看物理通道；
/// 用 [`DmaChannel::new`] 构造的值只能用于查询。
#[derive(Debug, Clone, Copy)]
pub struct DmaChannel {
    controller: u8,
    channel: u8,
    generation: u32,
}

impl DmaChannel {
    pub const fn new(controller: u8, channel: u8) -> Self {
        Self {
            controller,
            channel,
            generation: 0,
        }
    }

    pub const fn controller(&self) -> u8 {
        self.controller
    }

    pub const fn channel(&self) -> u8 {
        self.channel
    }
}

impl PartialEq for DmaChannel {
    fn eq(&self, other: &Self) -> bool {
        self.controller == other.controller && self.channel == other.channel
    }
}

impl Eq for DmaChannel {}

/// 通道申请方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaRequest {
    /// 任意空闲通道（下标最小者）
    Any,
    /// 指定通道
    Channel(u8),
}

#[derive(Clone, Copy)]
struct ChannelState {
    owner: Option<&'static str>,
    completion: Option<(DmaCallback, usize)>,
    armed: bool,
    // 每次分配加一，从 1 开始，释放后保留
    generation: u32,
}

impl ChannelState {
    const FREE: ChannelState = ChannelState {
        owner: None,
        completion: None,
        armed: false,
        generation: 0,
    };

    /// 释放，只保留代数
    fn clear(&mut self) {
        *self = ChannelState {
            generation: self.generation,
            ..ChannelState::FREE
        };
    }

    fn held_by(&self, channel: DmaChannel) -> bool {
        self.owner.is_some() && self.generation == channel.generation
    }
}

/// DMA 通道管理器
///
/// `C` 为控制器数量，`CH` 为每个控制器的通道数。
pub struct DmaManager<const C: usize, const CH: usize> {
    channels: Mutex<RefCell<[[ChannelState; CH]; C]>>,
}

/// 按系统配置确定大小的 DMA 管理器
pub type SystemDma = DmaManager<DMA_CONTROLLERS, DMA_CHANNELS_PER_CONTROLLER>;

/// 系统全局 DMA 管理器
pub static SYSTEM_DMA: SystemDma = SystemDma::new();

impl<const C: usize, const CH: usize> DmaManager<C, CH> {
    pub const fn new() -> Self {
        const { assert!(C <= 256 && CH <= 256, "DMA channel ids are u8") };
        Self {
            channels: Mutex::new(RefCell::new([[ChannelState::FREE; CH]; C])),
        }
    }

    /// 申请通道
    pub fn allocate(
        &self,
        controller: u8,
        request: DmaRequest,
        owner: &'static str,
    ) -> Result<DmaChannel> {
        let c = controller as usize;
        if c >= C {
            return Err(DeviceError::InvalidParameter);
        }

        let channel = critical_section::with(|cs| -> Result<DmaChannel> {
            let mut table = self.channels.borrow_ref_mut(cs);
            let row = &mut table[c];

            let index = match request {
                DmaRequest::Channel(n) => {
                    let state = row.get(n as usize).ok_or(DeviceError::InvalidParameter)?;
                    if state.owner.is_some() {
                        return Err(DeviceError::Busy);
                    }
                    n as usize
                }
                DmaRequest::Any => row
                    .iter()
                    .position(|s| s.owner.is_none())
                    .ok_or(DeviceError::Exhausted)?,
            };

            let generation = match row[index].generation.wrapping_add(1) {
                0 => 1,
                g => g,
            };
            row[index] = ChannelState {
                owner: Some(owner),
                generation,
                ..ChannelState::FREE
            };
            Ok(DmaChannel {
                controller,
                channel: index as u8,
                generation,
            })
        });

        match channel {
            Ok(ch) => log::debug!(target: "dma", "{} allocated dma{}.{}", owner, ch.controller, ch.channel),
            Err(e) => log::debug!(target: "dma", "{} dma{} {:?}: {}", owner, controller, request, e),
        }
        channel
    }

    /// 释放通道
    ///
    /// 令牌不是当前这次分配的（重复释放、通道已转给别人）返回 `NotAllocated`。
    pub fn free(&self, channel: DmaChannel) -> Result<()> {
        self.with_allocated(channel, ChannelState::clear)
    }

    /// 设置完成回调
    pub fn set_completion(&self, channel: DmaChannel, callback: DmaCallback, ctx: usize) -> Result<()> {
        self.with_allocated(channel, |state| state.completion = Some((callback, ctx)))
    }

    /// 清除完成回调
    pub fn clear_completion(&self, channel: DmaChannel) -> Result<()> {
        self.with_allocated(channel, |state| state.completion = None)
    }

    /// 标记一次传输开始
    pub fn arm(&self, channel: DmaChannel) -> Result<()> {
        self.with_allocated(channel, |state| state.armed = true)
    }

    /// 传输完成通知，由 DMA 中断调用
    ///
    /// 只有已分配、已 `arm` 的通道才会触发回调，触发后自动解除 `arm`。
    /// 返回是否调用了回调。
    pub fn notify_complete(&self, channel: DmaChannel) -> bool {
        let completion = critical_section::with(|cs| -> Option<(DmaCallback, usize)> {
            let mut table = self.channels.borrow_ref_mut(cs);
            let state = Self::slot(&mut table, channel).ok()?;
            if state.owner.is_none() || !state.armed {
                return None;
            }
            state.armed = false;
            state.completion
        });

        match completion {
            Some((callback, ctx)) => {
                callback(channel, ctx);
                true
            }
            None => false,
        }
    }

    /// 通道是否已分配
    pub fn is_allocated(&self, channel: DmaChannel) -> bool {
        self.owner(channel).is_some()
    }

    /// 通道的所有者
    pub fn owner(&self, channel: DmaChannel) -> Option<&'static str> {
        critical_section::with(|cs| {
            let mut table = self.channels.borrow_ref_mut(cs);
            Self::slot(&mut table, channel).ok().and_then(|s| s.owner)
        })
    }

    /// 控制器上的空闲通道数
    pub fn free_count(&self, controller: u8) -> usize {
        critical_section::with(|cs| {
            self.channels
                .borrow_ref(cs)
                .get(controller as usize)
                .map_or(0, |row| row.iter().filter(|s| s.owner.is_none()).count())
        })
    }

    /// 所有控制器上已分配的通道总数
    pub fn allocated_count(&self) -> usize {
        critical_section::with(|cs| {
            self.channels
                .borrow_ref(cs)
                .iter()
                .flatten()
                .filter(|s| s.owner.is_some())
                .count()
        })
    }

    /// 遍历已分配的通道（诊断用）
    ///
    /// 回调在临界区内执行，不能再调用本管理器。
    pub fn for_each_allocated<F: FnMut(DmaChannel, &'static str)>(&self, mut f: F) {
        critical_section::with(|cs| {
            let table = self.channels.borrow_ref(cs);
            for (c, row) in table.iter().enumerate() {
                for (n, state) in row.iter().enumerate() {
                    if let Some(owner) = state.owner {
                        f(DmaChannel::new(c as u8, n as u8), owner);
                    }
                }
            }
        });
    }

    /// 释放所有通道（测试用），旧令牌随之失效
    pub fn reset(&self) {
        critical_section::with(|cs| {
            for state in self.channels.borrow_ref_mut(cs).iter_mut().flatten() {
                state.clear();
            }
        });
    }

    fn slot(table: &mut [[ChannelState; CH]; C], channel: DmaChannel) -> Result<&mut ChannelState> {
        table
            .get_mut(channel.controller as usize)
            .and_then(|row| row.get_mut(channel.channel as usize))
            .ok_or(DeviceError::InvalidParameter)
    }

    fn with_allocated(&self, channel: DmaChannel, f: impl FnOnce(&mut ChannelState)) -> Result<()> {
        critical_section::with(|cs| {
            let mut table = self.channels.borrow_ref_mut(cs);
            let state = Self::slot(&mut table, channel)?;
            if !state.held_by(channel) {
                return Err(DeviceError::NotAllocated);
            }
            f(state);
            Ok(())
        })
    }
}

impl<const C: usize, const CH: usize> Default for DmaManager<C, CH> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const C: usize, const CH: usize> ResourceReclaim for DmaManager<C, CH> {
    fn reclaim(&self, owner: &'static str) -> usize {
        let count = critical_section::with(|cs| {
            let mut table = self.channels.borrow_ref_mut(cs);
            let mut count = 0;
            for state in table.iter_mut().flatten() {
                if state.owner == Some(owner) {
                    state.clear();
                    count += 1;
                }
            }
            count
        });
        if count > 0 {
            log::debug!(target: "dma", "reclaimed {} channels from {}", count, owner);
        }
        count
    }
}
