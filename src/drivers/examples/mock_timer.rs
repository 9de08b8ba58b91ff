//! # Mock Timer 驱动
//!
//! 模拟硬件定时器。[`MockTimer`] 是寄存器级模拟，
//! [`TimerPort`] 把它接入设备管理核心：`init` 注册溢出中断回调，
//! 每次溢出通过 ISR 管理器分发一次中断。

use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::device::{DeviceDescriptor, DeviceInstance, DeviceOps};
use crate::drivers::{Device, TimerDevice};
use crate::error::{DeviceError, Result};
use crate::isr::{IsrHandle, SystemIsr};

/// 定时器中断回调优先级
pub const TIMER_IRQ_PRIORITY: u8 = 16;

/// 定时器运行时配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    /// 周期（微秒）
    pub period_us: u32,
    /// 初始化后立即启动
    pub auto_start: bool,
}

impl TimerConfig {
    pub const DEFAULT: TimerConfig = TimerConfig {
        period_us: 1000,
        auto_start: true,
    };
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// ============================================================================
// 寄存器级模拟
// ============================================================================

/// Mock Timer 外设
///
/// 使用内部计数器模拟定时器计数，通过 [`MockTimer::mock_tick`] 模拟时间流逝。
pub struct MockTimer {
    /// 周期（微秒）
    period_us: u32,
    /// 当前计数值
    counter: u32,
    running: bool,
    initialized: bool,
    overflow_count: usize,
}

impl MockTimer {
    pub const fn new() -> Self {
        Self {
            period_us: 1000,
            counter: 0,
            running: false,
            initialized: false,
            overflow_count: 0,
        }
    }

    /// 模拟时间流逝，返回本次产生的溢出次数
    pub fn mock_tick(&mut self, ticks: u32) -> usize {
        if !self.running {
            return 0;
        }

        self.counter = self.counter.wrapping_add(ticks);
        let mut overflows = 0;
        while self.counter >= self.period_us {
            self.counter -= self.period_us;
            overflows += 1;
        }
        self.overflow_count += overflows;
        overflows
    }

    /// 累计溢出次数
    pub fn overflow_count(&self) -> usize {
        self.overflow_count
    }

    /// 当前周期（微秒）
    pub fn period_us(&self) -> u32 {
        self.period_us
    }

    /// 关闭外设
    pub fn shutdown(&mut self) {
        self.running = false;
        self.initialized = false;
    }
}

impl Default for MockTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for MockTimer {
    type Error = DeviceError;

    fn init(&mut self) -> Result<()> {
        self.counter = 0;
        self.running = false;
        self.overflow_count = 0;
        self.initialized = true;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "MockTimer"
    }

    fn is_ready(&self) -> bool {
        self.initialized
    }
}

impl TimerDevice for MockTimer {
    fn start(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(DeviceError::NotInitialized);
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(DeviceError::NotInitialized);
        }
        self.running = false;
        Ok(())
    }

    fn set_period_us(&mut self, period: u32) -> Result<()> {
        if !self.initialized {
            return Err(DeviceError::NotInitialized);
        }
        if period == 0 {
            return Err(DeviceError::InvalidParameter);
        }
        self.period_us = period;
        Ok(())
    }

    fn count(&self) -> u32 {
        self.counter
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

// ============================================================================
// 设备管理接入
// ============================================================================

/// 一个定时器通道：外设模拟 + 溢出中断
pub struct TimerPort {
    timer: Mutex<MockTimer>,
    isr: &'static SystemIsr,
    irq: u16,
    handle: Mutex<Option<IsrHandle>>,
    expirations: AtomicU32,
}

impl TimerPort {
    pub const fn new(isr: &'static SystemIsr, irq: u16) -> Self {
        Self {
            timer: Mutex::new(MockTimer::new()),
            isr,
            irq,
            handle: Mutex::new(None),
            expirations: AtomicU32::new(0),
        }
    }

    /// 模拟时间流逝，每次溢出分发一次中断
    pub fn advance(&self, ticks: u32) -> usize {
        let overflows = self.timer.lock().mock_tick(ticks);
        for _ in 0..overflows {
            self.isr.dispatch(self.irq);
        }
        overflows
    }

    /// 中断回调观察到的溢出次数
    pub fn expirations(&self) -> u32 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// 在锁内访问外设
    pub fn with_timer<R>(&self, f: impl FnOnce(&mut MockTimer) -> R) -> R {
        f(&mut self.timer.lock())
    }

    /// 注销回调，线上没有其他回调时关闭中断线
    fn detach(&self, handle: IsrHandle) -> Result<()> {
        self.isr.unregister(handle)?;
        if self.isr.callback_count(self.irq) == 0 {
            self.isr.disable(self.irq)?;
        }
        Ok(())
    }

    fn apply(&self, timer: &mut MockTimer, config: TimerConfig) -> Result<()> {
        timer.set_period_us(config.period_us)?;
        if config.auto_start {
            timer.start()
        } else {
            timer.stop()
        }
    }
}

fn on_timer_irq(_irq: u16, ctx: usize) {
    // Safety: ctx 是 TimerPort::init 注册的 'static 钩子表地址
    let port = unsafe { &*(ctx as *const TimerPort) };
    port.expirations.fetch_add(1, Ordering::Relaxed);
}

impl DeviceOps for TimerPort {
    fn init(&self, dev: &'static DeviceDescriptor) -> Result<DeviceInstance> {
        let config = dev.config::<TimerConfig>()?;
        let instance = DeviceInstance::new(ptr::from_ref(self).cast_mut())?;
        {
            let mut timer = self.timer.lock();
            timer.init()?;
            if let Err(e) = self.apply(&mut timer, config) {
                timer.shutdown();
                return Err(e);
            }
        }

        let ctx = ptr::from_ref(self) as usize;
        let registered = self
            .isr
            .register_owned(dev.name(), self.irq, on_timer_irq, ctx, TIMER_IRQ_PRIORITY)
            .and_then(|handle| match self.isr.enable(self.irq) {
                Ok(()) => Ok(handle),
                Err(e) => {
                    let _ = self.detach(handle);
                    Err(e)
                }
            });
        match registered {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                Ok(instance)
            }
            Err(e) => {
                self.timer.lock().shutdown();
                Err(e)
            }
        }
    }

    fn deinit(&self, _dev: &'static DeviceDescriptor, _instance: DeviceInstance) -> Result<()> {
        self.timer.lock().shutdown();
        let handle = self.handle.lock().take().ok_or(DeviceError::NotInitialized)?;
        self.detach(handle)
    }

    fn suspend(&self, _dev: &'static DeviceDescriptor, _instance: DeviceInstance) -> Result<()> {
        self.timer.lock().stop()
    }

    fn resume(&self, dev: &'static DeviceDescriptor, _instance: DeviceInstance) -> Result<()> {
        if dev.config::<TimerConfig>()?.auto_start {
            self.timer.lock().start()?;
        }
        Ok(())
    }

    fn reinit(&self, dev: &'static DeviceDescriptor, _instance: DeviceInstance) -> Result<()> {
        let config = dev.config::<TimerConfig>()?;
        let mut timer = self.timer.lock();
        self.apply(&mut timer, config)
    }
}

// ============================================================================
// 单元测试
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ConfigSlot, DeviceFactory};

    #[test]
    fn test_mock_timer_count_and_overflow() {
        let mut timer = MockTimer::new();
        timer.init().unwrap();
        timer.set_period_us(100).unwrap();

        // 未启动时不计数
        assert_eq!(timer.mock_tick(500), 0);
        assert_eq!(timer.count(), 0);

        timer.start().unwrap();
        assert_eq!(timer.mock_tick(350), 3);
        assert_eq!(timer.count(), 50);
        assert_eq!(timer.overflow_count(), 3);
    }

    #[test]
    fn test_mock_timer_errors() {
        let mut timer = MockTimer::new();
        assert_eq!(timer.start(), Err(DeviceError::NotInitialized));
        timer.init().unwrap();
        assert_eq!(timer.set_period_us(0), Err(DeviceError::InvalidParameter));
    }

    static ISR: SystemIsr = SystemIsr::new();
    static PORT: TimerPort = TimerPort::new(&ISR, 3);
    static CONFIG: ConfigSlot<TimerConfig> = ConfigSlot::new(TimerConfig {
        period_us: 100,
        auto_start: true,
    });

    crate::device_table! {
        static DEVICES = [DeviceDescriptor::new("timer0", &PORT).with_config(&CONFIG)];
    }

    #[test]
    fn test_port_interrupts() {
        let factory: DeviceFactory<1> = DeviceFactory::new(&DEVICES);
        let timer = factory.acquire("timer0").unwrap();

        assert_eq!(PORT.advance(250), 2);
        assert_eq!(PORT.expirations(), 2);

        // 挂起时停止计数，恢复后继续
        timer.suspend().unwrap();
        assert_eq!(PORT.advance(1000), 0);
        timer.resume().unwrap();
        assert_eq!(PORT.advance(50), 1);
        assert_eq!(PORT.expirations(), 3);

        timer
            .reconfigure(TimerConfig {
                period_us: 1000,
                auto_start: true,
            })
            .unwrap();
        assert_eq!(PORT.with_timer(|t| t.period_us()), 1000);

        factory.release(timer).unwrap();
        assert_eq!(ISR.callback_count(3), 0);
        assert!(!ISR.is_enabled(3));
        assert_eq!(PORT.advance(5000), 0);
    }

    static BARE_ISR: SystemIsr = SystemIsr::new();
    static BARE_PORT: TimerPort = TimerPort::new(&BARE_ISR, 4);
    static BARE_CONFIG: ConfigSlot<TimerConfig> = ConfigSlot::new(TimerConfig::DEFAULT);

    crate::device_table! {
        static BARE_DEVICES = [DeviceDescriptor::new("timer1", &BARE_PORT).with_config(&BARE_CONFIG)];
    }

    #[test]
    fn test_failed_init_unwinds() {
        let factory: DeviceFactory<1> = DeviceFactory::new(&BARE_DEVICES);
        let zero_period = TimerConfig {
            period_us: 0,
            auto_start: true,
        };
        assert_eq!(
            factory.acquire_with_config("timer1", zero_period).err(),
            Some(DeviceError::InvalidParameter)
        );
        assert_eq!(BARE_ISR.callback_count(4), 0);
        assert!(!BARE_ISR.is_enabled(4));
        assert!(!BARE_PORT.with_timer(|t| t.is_ready()));
        assert_eq!(BARE_PORT.advance(5000), 0);
    }
}
