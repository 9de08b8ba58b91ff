//! # 设备描述符
//!
//! 每个驱动在编译期贡献一个 [`DeviceDescriptor`]：唯一名称、配置存储
//! （默认配置 + 运行时配置缓冲区）以及生命周期钩子表 [`DeviceOps`]。
//!
//! 描述符在整个程序运行期间存在，从不销毁，只读。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use neon_devcore::device::{ConfigSlot, DeviceDescriptor, DeviceInstance, DeviceOps};
//! use neon_devcore::error::Result;
//!
//! #[derive(Clone, Copy)]
//! struct LedConfig { pin: u8 }
//!
//! struct LedOps;
//!
//! impl DeviceOps for LedOps {
//!     fn init(&self, dev: &'static DeviceDescriptor) -> Result<DeviceInstance> {
//!         let cfg = dev.config::<LedConfig>()?;
//!         // 根据 cfg.pin 配置硬件 ...
//!         Ok(DeviceInstance::from_static(&LED_STATE))
//!     }
//!
//!     fn deinit(&self, _dev: &'static DeviceDescriptor, _inst: DeviceInstance) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! static LED_CONFIG: ConfigSlot<LedConfig> = ConfigSlot::new(LedConfig { pin: 5 });
//! static LED_OPS: LedOps = LedOps;
//!
//! neon_devcore::device_table! {
//!     pub static DEVICES = [
//!         DeviceDescriptor::new("led0", &LED_OPS).with_config(&LED_CONFIG),
//!     ];
//! }
//! ```

use core::any::Any;
use core::fmt;
use core::mem::{align_of, size_of};
use core::ptr::NonNull;

use crate::error::{DeviceError, Result};

// ============================================================================
// 实例指针
// ============================================================================

/// 驱动 `init` 钩子返回的不透明实例指针
///
/// 核心不解释它指向什么，只负责在生命周期钩子之间传递。
/// 驱动通常把实例状态放在自己的 `static` 存储里，
/// 通过 [`DeviceInstance::from_static`] 构造。
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DeviceInstance(NonNull<()>);

// Safety: 实例指针只是一个地址，访问其指向的数据由驱动自行同步
unsafe impl Send for DeviceInstance {}
unsafe impl Sync for DeviceInstance {}

impl DeviceInstance {
    /// 从原始指针创建实例，空指针返回 `NullPointer`
    pub fn new<T>(ptr: *mut T) -> Result<Self> {
        NonNull::new(ptr.cast::<()>())
            .map(Self)
            .ok_or(DeviceError::NullPointer)
    }

    /// 从静态存储创建实例
    pub fn from_static<T: Sync>(state: &'static T) -> Self {
        Self(NonNull::from(state).cast())
    }

    /// 获取原始地址
    pub fn as_ptr(&self) -> *mut () {
        self.0.as_ptr()
    }

    /// 把实例还原为驱动的状态引用
    ///
    /// # Safety
    ///
    /// `T` 必须与构造实例时使用的类型一致，且指向的存储为 `'static`。
    pub unsafe fn as_static<T>(&self) -> &'static T {
        unsafe { self.0.cast::<T>().as_ref() }
    }
}

impl fmt::Debug for DeviceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceInstance({:p})", self.0)
    }
}

// ============================================================================
// 生命周期钩子
// ============================================================================

/// 设备生命周期钩子表
///
/// 对应驱动的 init / deinit / suspend / resume 四个钩子，
/// 外加 `reinit` 用于在不释放句柄的情况下重新应用配置。
///
/// 钩子只在任务上下文中、持有该设备实例锁时被调用。
pub trait DeviceOps: Sync {
    /// 初始化设备，返回实例指针
    ///
    /// 运行时配置缓冲区已经在调用前写好（默认配置或调用者覆盖的配置）。
    fn init(&self, dev: &'static DeviceDescriptor) -> Result<DeviceInstance>;

    /// 反初始化设备
    ///
    /// 必须释放 init 期间申请的 DMA 通道和 ISR 注册。
    fn deinit(&self, dev: &'static DeviceDescriptor, instance: DeviceInstance) -> Result<()>;

    /// 挂起设备：关闭时钟/电源，保留配置和可观察状态
    fn suspend(&self, _dev: &'static DeviceDescriptor, _instance: DeviceInstance) -> Result<()> {
        Ok(())
    }

    /// 恢复设备：恢复时钟/电源
    fn resume(&self, _dev: &'static DeviceDescriptor, _instance: DeviceInstance) -> Result<()> {
        Ok(())
    }

    /// 重新应用运行时配置
    fn reinit(&self, _dev: &'static DeviceDescriptor, _instance: DeviceInstance) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// 配置存储
// ============================================================================

/// 类型擦除后的配置存储
///
/// 由 [`ConfigSlot`] 实现，描述符通过 `&'static dyn ConfigStore` 持有。
pub trait ConfigStore: Sync {
    /// 配置大小（字节）
    fn size(&self) -> usize;

    /// 用默认配置覆盖运行时缓冲区
    fn reset(&self);

    /// 用于向下转型为具体的 `ConfigSlot<T>`
    fn as_any(&self) -> &dyn Any;
}

/// 默认配置 + 运行时配置缓冲区
pub struct ConfigSlot<T: Copy + Send + Sync + 'static> {
    default: T,
    current: spin::Mutex<T>,
}

impl<T: Copy + Send + Sync + 'static> ConfigSlot<T> {
    /// 创建配置存储，运行时缓冲区初始为默认值
    pub const fn new(default: T) -> Self {
        Self {
            default,
            current: spin::Mutex::new(default),
        }
    }

    /// 获取默认配置
    pub fn default_config(&self) -> T {
        self.default
    }

    /// 获取当前运行时配置
    pub fn get(&self) -> T {
        *self.current.lock()
    }

    /// 写入运行时配置
    pub fn set(&self, config: T) {
        *self.current.lock() = config;
    }
}

impl<T: Copy + Send + Sync + 'static> ConfigStore for ConfigSlot<T> {
    fn size(&self) -> usize {
        size_of::<T>()
    }

    fn reset(&self) {
        self.set(self.default);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// 设备描述符
// ============================================================================

/// 设备描述符
///
/// 编译期创建、只读、`'static`。描述符按值存放在连续的注册表区域中，
/// 地址至少按指针大小对齐，以便按边界指针安全遍历。
#[repr(C)]
pub struct DeviceDescriptor {
    name: &'static str,
    config: Option<&'static dyn ConfigStore>,
    ops: &'static dyn DeviceOps,
}

const _: () = assert!(align_of::<DeviceDescriptor>() >= align_of::<usize>());

impl DeviceDescriptor {
    /// 创建没有配置的描述符
    pub const fn new(name: &'static str, ops: &'static dyn DeviceOps) -> Self {
        Self {
            name,
            config: None,
            ops,
        }
    }

    /// 附加配置存储
    pub const fn with_config(mut self, config: &'static dyn ConfigStore) -> Self {
        self.config = Some(config);
        self
    }

    /// 设备名称
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 钩子表
    pub fn ops(&self) -> &'static dyn DeviceOps {
        self.ops
    }

    /// 配置大小（字节），没有配置时为 0
    pub fn config_size(&self) -> usize {
        self.config.map_or(0, |c| c.size())
    }

    /// 类型擦除的配置存储
    pub fn config_store(&self) -> Option<&'static dyn ConfigStore> {
        self.config
    }

    /// 获取具体类型的配置存储
    ///
    /// 没有配置或类型不匹配时返回 `InvalidParameter`。
    pub fn config_slot<T: Copy + Send + Sync + 'static>(&self) -> Result<&'static ConfigSlot<T>> {
        let store: &'static dyn ConfigStore = self.config.ok_or(DeviceError::InvalidParameter)?;
        store
            .as_any()
            .downcast_ref::<ConfigSlot<T>>()
            .ok_or(DeviceError::InvalidParameter)
    }

    /// 读取当前运行时配置
    pub fn config<T: Copy + Send + Sync + 'static>(&self) -> Result<T> {
        Ok(self.config_slot::<T>()?.get())
    }

    /// 用默认配置覆盖运行时缓冲区
    pub(crate) fn reset_config(&self) {
        if let Some(store) = self.config {
            store.reset();
        }
    }
}

impl fmt::Debug for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceDescriptor")
            .field("name", &self.name)
            .field("config_size", &self.config_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct TestConfig {
        speed: u32,
        mode: u8,
    }

    struct NopOps;

    static NOP_STATE: u32 = 0;

    impl DeviceOps for NopOps {
        fn init(&self, _dev: &'static DeviceDescriptor) -> Result<DeviceInstance> {
            Ok(DeviceInstance::from_static(&NOP_STATE))
        }

        fn deinit(&self, _dev: &'static DeviceDescriptor, _instance: DeviceInstance) -> Result<()> {
            Ok(())
        }
    }

    static NOP_OPS: NopOps = NopOps;
    static TEST_CONFIG: ConfigSlot<TestConfig> = ConfigSlot::new(TestConfig { speed: 100, mode: 1 });
    static WITH_CONFIG: DeviceDescriptor =
        DeviceDescriptor::new("cfg_dev", &NOP_OPS).with_config(&TEST_CONFIG);
    static WITHOUT_CONFIG: DeviceDescriptor = DeviceDescriptor::new("plain_dev", &NOP_OPS);

    #[test]
    fn test_descriptor_alignment() {
        let addr = &WITH_CONFIG as *const DeviceDescriptor as usize;
        assert_eq!(addr % align_of::<usize>(), 0);
    }

    #[test]
    fn test_config_roundtrip_and_reset() {
        assert_eq!(WITH_CONFIG.config_size(), size_of::<TestConfig>());
        assert_eq!(WITH_CONFIG.config::<TestConfig>().unwrap().speed, 100);

        let slot = WITH_CONFIG.config_slot::<TestConfig>().unwrap();
        slot.set(TestConfig { speed: 9, mode: 2 });
        assert_eq!(WITH_CONFIG.config::<TestConfig>().unwrap().speed, 9);

        WITH_CONFIG.reset_config();
        assert_eq!(WITH_CONFIG.config::<TestConfig>().unwrap(), slot.default_config());
    }

    #[test]
    fn test_config_type_mismatch() {
        assert_eq!(WITH_CONFIG.config::<u64>().err(), Some(DeviceError::InvalidParameter));
        assert_eq!(WITHOUT_CONFIG.config::<TestConfig>().err(), Some(DeviceError::InvalidParameter));
        assert_eq!(WITHOUT_CONFIG.config_size(), 0);
    }

    #[test]
    fn test_instance_null_pointer() {
        let null: *mut u32 = core::ptr::null_mut();
        assert_eq!(DeviceInstance::new(null).err(), Some(DeviceError::NullPointer));

        let inst = DeviceInstance::from_static(&NOP_STATE);
        assert_eq!(inst.as_ptr() as usize, &NOP_STATE as *const u32 as usize);
        assert_eq!(unsafe { *inst.as_static::<u32>() }, 0);
    }
}
