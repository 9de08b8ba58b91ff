//! # Mock UART 驱动
//!
//! 模拟 UART 串口驱动，演示一个完整驱动如何接入设备管理核心。
//!
//! ## 功能特性
//!
//! - [`MockUart`]：寄存器级模拟，实现 `Device`, `Read`, `Write`, `Uart` trait，
//!   内部环形缓冲区模拟收发
//! - [`UartPort`]：`DeviceOps` 实现
//!   - `init`：按运行时配置初始化，申请一个 TX DMA 通道，注册并打开中断
//!   - `deinit`：注销中断、释放 DMA 通道
//!   - `suspend` / `resume`：门控时钟，屏蔽本驱动的中断回调，配置保持不变
//!   - `reinit`：重新应用运行时配置
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! static UART0_PORT: UartPort = UartPort::new(&SYSTEM_DMA, &SYSTEM_ISR, 37, 0);
//! static UART0_CONFIG: ConfigSlot<SerialConfig> = ConfigSlot::new(SerialConfig::DEFAULT);
//!
//! neon_devcore::device_table! {
//!     pub static DEVICES = [
//!         DeviceDescriptor::new("uart0", &UART0_PORT).with_config(&UART0_CONFIG),
//!     ];
//! }
//!
//! let uart = FACTORY.acquire("uart0")?;
//! UART0_PORT.send(b"hello")?;
//! ```

use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::device::{DeviceDescriptor, DeviceInstance, DeviceOps};
use crate::dma::{DmaChannel, DmaRequest, SystemDma};
use crate::drivers::{DataBits, Device, Read, SerialConfig, Uart, Write};
use crate::error::{DeviceError, Result};
use crate::isr::{IsrHandle, SystemIsr};

/// Mock UART 缓冲区大小
const BUFFER_SIZE: usize = 256;

/// UART 中断回调优先级
pub const UART_IRQ_PRIORITY: u8 = 8;

// ============================================================================
// 寄存器级模拟
// ============================================================================

/// Mock UART 外设
///
/// 使用环形缓冲区存储收发数据；时钟关闭时所有收发操作返回 `InvalidState`。
pub struct MockUart {
    config: SerialConfig,
    tx_buffer: [u8; BUFFER_SIZE],
    rx_buffer: [u8; BUFFER_SIZE],
    tx_head: usize,
    tx_tail: usize,
    rx_head: usize,
    rx_tail: usize,
    initialized: bool,
    clock_enabled: bool,
    tx_count: usize,
    rx_count: usize,
}

impl MockUart {
    pub const fn new() -> Self {
        Self {
            config: SerialConfig::DEFAULT,
            tx_buffer: [0; BUFFER_SIZE],
            rx_buffer: [0; BUFFER_SIZE],
            tx_head: 0,
            tx_tail: 0,
            rx_head: 0,
            rx_tail: 0,
            initialized: false,
            clock_enabled: false,
            tx_count: 0,
            rx_count: 0,
        }
    }

    /// 模拟接收数据（测试用），返回实际放入缓冲区的字节数
    pub fn mock_receive(&mut self, data: &[u8]) -> usize {
        let mut count = 0;
        for &byte in data {
            let next = (self.rx_head + 1) % BUFFER_SIZE;
            if next == self.rx_tail {
                break; // 缓冲区满
            }
            self.rx_buffer[self.rx_head] = byte;
            self.rx_head = next;
            count += 1;
        }
        count
    }

    /// 取出已发送的数据到固定缓冲区（测试用）
    pub fn mock_get_transmitted_to(&mut self, buf: &mut [u8]) -> usize {
        let mut count = 0;
        while self.tx_tail != self.tx_head && count < buf.len() {
            buf[count] = self.tx_buffer[self.tx_tail];
            self.tx_tail = (self.tx_tail + 1) % BUFFER_SIZE;
            count += 1;
        }
        count
    }

    /// 清空所有缓冲区
    pub fn clear_buffers(&mut self) {
        self.tx_head = 0;
        self.tx_tail = 0;
        self.rx_head = 0;
        self.rx_tail = 0;
    }

    /// 打开或关闭外设时钟
    pub fn set_clock(&mut self, enabled: bool) {
        self.clock_enabled = enabled;
    }

    pub fn is_clock_enabled(&self) -> bool {
        self.clock_enabled
    }

    /// 关闭外设
    pub fn shutdown(&mut self) {
        self.clear_buffers();
        self.clock_enabled = false;
        self.initialized = false;
    }

    pub fn tx_count(&self) -> usize {
        self.tx_count
    }

    pub fn rx_count(&self) -> usize {
        self.rx_count
    }

    /// 发送缓冲区中的数据量
    pub fn tx_pending(&self) -> usize {
        (self.tx_head + BUFFER_SIZE - self.tx_tail) % BUFFER_SIZE
    }

    /// 当前配置
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn check_active(&self) -> Result<()> {
        if !self.initialized {
            return Err(DeviceError::NotInitialized);
        }
        if !self.clock_enabled {
            return Err(DeviceError::InvalidState);
        }
        Ok(())
    }
}

impl Default for MockUart {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for MockUart {
    type Error = DeviceError;

    fn init(&mut self) -> Result<()> {
        self.clear_buffers();
        self.tx_count = 0;
        self.rx_count = 0;
        self.clock_enabled = true;
        self.initialized = true;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "MockUART"
    }

    fn is_ready(&self) -> bool {
        self.initialized && self.clock_enabled
    }
}

impl Read for MockUart {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_active()?;

        let mut count = 0;
        while count < buf.len() && self.rx_tail != self.rx_head {
            buf[count] = self.rx_buffer[self.rx_tail];
            self.rx_tail = (self.rx_tail + 1) % BUFFER_SIZE;
            count += 1;
        }
        self.rx_count += count;
        Ok(count)
    }
}

impl Write for MockUart {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_active()?;

        let mut count = 0;
        for &byte in buf {
            let next = (self.tx_head + 1) % BUFFER_SIZE;
            if next == self.tx_tail {
                break; // 缓冲区满
            }
            self.tx_buffer[self.tx_head] = byte;
            self.tx_head = next;
            count += 1;
        }
        self.tx_count += count;
        Ok(count)
    }

    fn flush(&mut self) -> Result<()> {
        self.check_active()
    }
}

impl Uart for MockUart {
    fn configure(&mut self, config: SerialConfig) -> Result<()> {
        if !self.initialized {
            return Err(DeviceError::NotInitialized);
        }
        if config.baudrate == 0 || config.data_bits == DataBits::Nine {
            return Err(DeviceError::InvalidParameter);
        }
        self.config = config;
        Ok(())
    }

    fn baudrate(&self) -> u32 {
        self.config.baudrate
    }

    fn is_rx_ready(&self) -> bool {
        self.rx_tail != self.rx_head
    }
}

// ============================================================================
// 设备管理接入
// ============================================================================

/// 一个 UART 端口：外设模拟 + 该端口使用的 DMA / ISR 资源
///
/// 必须放在 `static` 中，作为设备描述符的钩子表使用。
pub struct UartPort {
    uart: Mutex<MockUart>,
    dma: &'static SystemDma,
    isr: &'static SystemIsr,
    irq: u16,
    dma_controller: u8,
    resources: Mutex<Option<(DmaChannel, IsrHandle)>>,
    tx_complete: AtomicU32,
    irq_count: AtomicU32,
}

impl UartPort {
    pub const fn new(
        dma: &'static SystemDma,
        isr: &'static SystemIsr,
        irq: u16,
        dma_controller: u8,
    ) -> Self {
        Self {
            uart: Mutex::new(MockUart::new()),
            dma,
            isr,
            irq,
            dma_controller,
            resources: Mutex::new(None),
            tx_complete: AtomicU32::new(0),
            irq_count: AtomicU32::new(0),
        }
    }

    /// 在锁内访问外设
    pub fn with_uart<R>(&self, f: impl FnOnce(&mut MockUart) -> R) -> R {
        f(&mut self.uart.lock())
    }

    /// 通过 DMA 发送
    ///
    /// 数据写入发送缓冲区后启动一次 DMA 传输，完成通知由 DMA 中断送达。
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        let (channel, _) = self.resources.lock().ok_or(DeviceError::NotInitialized)?;
        let written = self.uart.lock().write(data)?;
        self.dma.arm(channel)?;
        Ok(written)
    }

    /// 本端口占用的 DMA 通道
    pub fn dma_channel(&self) -> Option<DmaChannel> {
        self.resources.lock().map(|(channel, _)| channel)
    }

    /// DMA 发送完成次数
    pub fn tx_complete_count(&self) -> u32 {
        self.tx_complete.load(Ordering::Relaxed)
    }

    /// 本驱动处理过的中断次数
    pub fn irq_count(&self) -> u32 {
        self.irq_count.load(Ordering::Relaxed)
    }

    fn context(&self) -> usize {
        ptr::from_ref(self) as usize
    }

    /// # Safety
    ///
    /// `ctx` 必须是 `init` 时由 [`UartPort::context`] 得到的值。
    /// 钩子表在描述符中以 `'static` 引用存放，所以地址一直有效。
    unsafe fn from_context(ctx: usize) -> &'static UartPort {
        unsafe { &*(ctx as *const UartPort) }
    }
}

fn on_tx_complete(_channel: DmaChannel, ctx: usize) {
    // Safety: ctx 由 UartPort::init 注册
    let port = unsafe { UartPort::from_context(ctx) };
    port.tx_complete.fetch_add(1, Ordering::Relaxed);
}

fn on_uart_irq(_irq: u16, ctx: usize) {
    // Safety: ctx 由 UartPort::init 注册
    let port = unsafe { UartPort::from_context(ctx) };
    port.irq_count.fetch_add(1, Ordering::Relaxed);
}

impl UartPort {
    /// 申请 TX DMA 通道、注册并打开中断，任一步失败都撤销之前的步骤
    fn claim(&self, owner: &'static str) -> Result<(DmaChannel, IsrHandle)> {
        let channel = self.dma.allocate(self.dma_controller, DmaRequest::Any, owner)?;
        let handle = match self
            .isr
            .register_owned(owner, self.irq, on_uart_irq, self.context(), UART_IRQ_PRIORITY)
        {
            Ok(handle) => handle,
            Err(e) => {
                let _ = self.dma.free(channel);
                return Err(e);
            }
        };

        let armed = self
            .dma
            .set_completion(channel, on_tx_complete, self.context())
            .and_then(|()| self.isr.enable(self.irq));
        if let Err(e) = armed {
            let _ = self.unclaim(channel, handle);
            return Err(e);
        }
        Ok((channel, handle))
    }

    /// 注销中断回调，线上没有其他回调时关闭中断线，释放 DMA 通道
    fn unclaim(&self, channel: DmaChannel, handle: IsrHandle) -> Result<()> {
        let unregistered = self.isr.unregister(handle);
        let disabled = match self.isr.callback_count(self.irq) {
            0 => self.isr.disable(self.irq),
            _ => Ok(()),
        };
        let freed = self.dma.free(channel);
        unregistered.and(disabled).and(freed)
    }
}

impl DeviceOps for UartPort {
    fn init(&self, dev: &'static DeviceDescriptor) -> Result<DeviceInstance> {
        let config = dev.config::<SerialConfig>()?;
        let instance = DeviceInstance::new(ptr::from_ref(self).cast_mut())?;

        // 先在外设上校验配置，失败时还没有占用任何共享资源
        {
            let mut uart = self.uart.lock();
            uart.init()?;
            if let Err(e) = uart.configure(config) {
                uart.shutdown();
                return Err(e);
            }
        }

        match self.claim(dev.name()) {
            Ok(resources) => {
                *self.resources.lock() = Some(resources);
                Ok(instance)
            }
            Err(e) => {
                self.uart.lock().shutdown();
                Err(e)
            }
        }
    }

    fn deinit(&self, _dev: &'static DeviceDescriptor, _instance: DeviceInstance) -> Result<()> {
        self.uart.lock().shutdown();

        let (channel, handle) = self.resources.lock().take().ok_or(DeviceError::NotInitialized)?;
        self.unclaim(channel, handle)
    }

    fn suspend(&self, _dev: &'static DeviceDescriptor, _instance: DeviceInstance) -> Result<()> {
        let (_, handle) = self.resources.lock().ok_or(DeviceError::NotInitialized)?;
        self.isr.set_callback_enabled(handle, false)?;
        self.uart.lock().set_clock(false);
        Ok(())
    }

    fn resume(&self, _dev: &'static DeviceDescriptor, _instance: DeviceInstance) -> Result<()> {
        let (_, handle) = self.resources.lock().ok_or(DeviceError::NotInitialized)?;
        self.uart.lock().set_clock(true);
        self.isr.set_callback_enabled(handle, true)
    }

    fn reinit(&self, dev: &'static DeviceDescriptor, _instance: DeviceInstance) -> Result<()> {
        let config = dev.config::<SerialConfig>()?;
        let mut uart = self.uart.lock();
        uart.set_clock(true);
        uart.configure(config)
    }
}

// ============================================================================
// 单元测试
// ============================================================================
