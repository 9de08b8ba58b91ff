//! # 静态设备注册表
//!
//! 所有设备描述符在编译期被放进一段连续的只读存储区，
//! 注册表只保存这段区域的起止边界，"发现设备"就是指针区间遍历，
//! 运行时零初始化开销，不依赖任何堆分配。
//!
//! 两种构造方式：
//!
//! | 方式 | 宏 | 构造函数 |
//! |------|----|----------|
//! | 构建期生成的静态表 | [`device_table!`](crate::device_table) | [`DeviceRegistry::from_slice`] |
//! | 链接段 `neon_devices`（feature `link-section`） | [`device_define!`](crate::device_define) | [`DeviceRegistry::linked`] |
//!
//! 注册表在链接之后只读，没有插入或删除接口。

use core::iter::FusedIterator;
use core::mem::size_of;

use super::descriptor::DeviceDescriptor;
use crate::error::{DeviceError, Result};

/// 静态设备注册表
///
/// 按链接顺序保存所有描述符，`[start, end)` 为连续区间。
#[derive(Clone, Copy)]
pub struct DeviceRegistry {
    start: *const DeviceDescriptor,
    end: *const DeviceDescriptor,
}

// Safety: 区间内的描述符是 'static 且只读的
unsafe impl Send for DeviceRegistry {}
unsafe impl Sync for DeviceRegistry {}

impl DeviceRegistry {
    /// 从构建期生成的静态表创建注册表
    pub const fn from_slice(table: &'static [DeviceDescriptor]) -> Self {
        let range = table.as_ptr_range();
        Self {
            start: range.start,
            end: range.end,
        }
    }

    /// 从一对边界指针创建注册表
    ///
    /// # Safety
    ///
    /// `[start, end)` 必须是一段连续、对齐、已初始化的 `DeviceDescriptor`
    /// 数组，并且在程序运行期间一直有效且不被修改。
    pub const unsafe fn from_bounds(
        start: *const DeviceDescriptor,
        end: *const DeviceDescriptor,
    ) -> Self {
        Self { start, end }
    }

    /// 使用链接段 `neon_devices` 的边界创建注册表
    #[cfg(feature = "link-section")]
    pub fn linked() -> Self {
        unsafe extern "Rust" {
            #[link_name = "__start_neon_devices"]
            static DEVICES_START: DeviceDescriptor;
            #[link_name = "__stop_neon_devices"]
            static DEVICES_STOP: DeviceDescriptor;
        }
        // Safety: 链接器保证段内只有 device_define! 放入的描述符
        unsafe { Self::from_bounds(&raw const DEVICES_START, &raw const DEVICES_STOP) }
    }

    /// 注册的描述符数量
    pub fn count(&self) -> usize {
        (self.end as usize - self.start as usize) / size_of::<DeviceDescriptor>()
    }

    /// 注册表是否为空
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// 按链接顺序遍历所有描述符
    pub fn iter(&self) -> DeviceIter {
        DeviceIter {
            cur: self.start,
            end: self.end,
        }
    }

    /// 按下标获取描述符
    pub fn get(&self, index: usize) -> Result<&'static DeviceDescriptor> {
        if index >= self.count() {
            return Err(DeviceError::OutOfRange);
        }
        // Safety: index 在区间内
        Ok(unsafe { &*self.start.add(index) })
    }

    /// 按名称查找描述符（精确、大小写敏感）
    pub fn find(&self, name: &str) -> Result<&'static DeviceDescriptor> {
        self.iter()
            .find(|dev| dev.name() == name)
            .ok_or(DeviceError::NotFound)
    }

    /// 按名称查找描述符的下标
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.iter()
            .position(|dev| dev.name() == name)
            .ok_or(DeviceError::NotFound)
    }

    /// 检查名称唯一性
    ///
    /// 发现重复名称时返回 `InvalidParameter`。
    pub fn validate(&self) -> Result<()> {
        for (i, dev) in self.iter().enumerate() {
            if self.iter().skip(i + 1).any(|other| other.name() == dev.name()) {
                log::error!(target: "registry", "duplicate device name {}", dev.name());
                return Err(DeviceError::InvalidParameter);
            }
        }
        Ok(())
    }
}

impl IntoIterator for &DeviceRegistry {
    type Item = &'static DeviceDescriptor;
    type IntoIter = DeviceIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// 注册表迭代器，直接在边界指针之间移动
pub struct DeviceIter {
    cur: *const DeviceDescriptor,
    end: *const DeviceDescriptor,
}

impl Iterator for DeviceIter {
    type Item = &'static DeviceDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == self.end {
            return None;
        }
        // Safety: cur 在 [start, end) 内
        let dev = unsafe { &*self.cur };
        self.cur = unsafe { self.cur.add(1) };
        Some(dev)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = (self.end as usize - self.cur as usize) / size_of::<DeviceDescriptor>();
        (len, Some(len))
    }
}

impl DoubleEndedIterator for DeviceIter {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.cur == self.end {
            return None;
        }
        self.end = unsafe { self.end.sub(1) };
        Some(unsafe { &*self.end })
    }
}

impl ExactSizeIterator for DeviceIter {}
impl FusedIterator for DeviceIter {}

// ============================================================================
// 注册宏
// ============================================================================

#[doc(hidden)]
#[macro_export]
macro_rules! __count_items {
    () => { 0usize };
    ($head:expr $(, $tail:expr)*) => { 1usize + $crate::__count_items!($($tail),*) };
}

/// 定义构建期生成的设备表
///
/// 生成一个连续的描述符数组和指向它的 [`DeviceRegistry`]。
///
/// # 示例
///
/// ```rust,ignore
/// neon_devcore::device_table! {
///     pub static DEVICES = [
///         DeviceDescriptor::new("uart0", &UART0_OPS).with_config(&UART0_CONFIG),
///         DeviceDescriptor::new("timer0", &TIMER0_OPS),
///     ];
/// }
///
/// assert_eq!(DEVICES.count(), 2);
/// ```
#[macro_export]
macro_rules! device_table {
    (
        $(#[$meta:meta])*
        $vis:vis static $name:ident = [ $($desc:expr),* $(,)? ];
    ) => {
        $crate::paste::paste! {
            static [<$name _TABLE>]: [$crate::device::DeviceDescriptor; $crate::__count_items!($($desc),*)] = [
                $($desc),*
            ];

            $(#[$meta])*
            $vis static $name: $crate::device::DeviceRegistry =
                $crate::device::DeviceRegistry::from_slice(&[<$name _TABLE>]);
        }
    };
}

/// 把一个描述符放进 `neon_devices` 链接段
///
/// # 示例
///
/// ```rust,ignore
/// neon_devcore::device_define!(UART0, DeviceDescriptor::new("uart0", &UART0_OPS));
///
/// let registry = DeviceRegistry::linked();
/// ```
#[cfg(feature = "link-section")]
#[macro_export]
macro_rules! device_define {
    ($name:ident, $desc:expr) => {
        #[used]
        #[unsafe(link_section = "neon_devices")]
        static $name: $crate::device::DeviceDescriptor = $desc;
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceInstance, DeviceOps};

    struct NopOps;

    static NOP_STATE: u8 = 0;

    impl DeviceOps for NopOps {
        fn init(&self, _dev: &'static DeviceDescriptor) -> Result<DeviceInstance> {
            Ok(DeviceInstance::from_static(&NOP_STATE))
        }

        fn deinit(&self, _dev: &'static DeviceDescriptor, _instance: DeviceInstance) -> Result<()> {
            Ok(())
        }
    }

    static NOP_OPS: NopOps = NopOps;

    crate::device_table! {
        static UARTS = [
            DeviceDescriptor::new("uartA", &NOP_OPS),
            DeviceDescriptor::new("uartB", &NOP_OPS),
        ];
    }

    crate::device_table! {
        static DUPLICATES = [
            DeviceDescriptor::new("spi0", &NOP_OPS),
            DeviceDescriptor::new("i2c0", &NOP_OPS),
            DeviceDescriptor::new("spi0", &NOP_OPS),
        ];
    }

    crate::device_table! {
        static EMPTY = [];
    }

    #[test]
    fn test_count_and_find() {
        assert_eq!(UARTS.count(), 2);
        assert_eq!(UARTS.find("uartB").unwrap().name(), "uartB");
        assert_eq!(UARTS.find("uartC").err(), Some(DeviceError::NotFound));
    }

    #[test]
    fn test_find_is_case_sensitive() {
        assert_eq!(UARTS.find("UARTA").err(), Some(DeviceError::NotFound));
        assert_eq!(UARTS.find("uart").err(), Some(DeviceError::NotFound));
        assert!(UARTS.find("uartA").is_ok());
    }

    #[test]
    fn test_iteration_visits_each_once() {
        let mut visited = 0;
        for (i, dev) in UARTS.iter().enumerate() {
            assert_eq!(UARTS.index_of(dev.name()).unwrap(), i);
            visited += 1;
        }
        assert_eq!(visited, UARTS.count());
        assert_eq!(UARTS.iter().len(), 2);

        let names: [&str; 2] = [UARTS.get(0).unwrap().name(), UARTS.get(1).unwrap().name()];
        assert_eq!(names, ["uartA", "uartB"]);
    }

    #[test]
    fn test_reverse_iteration() {
        let mut it = UARTS.iter().rev();
        assert_eq!(it.next().unwrap().name(), "uartB");
        assert_eq!(it.next().unwrap().name(), "uartA");
        assert!(it.next().is_none());
    }

    #[test]
    fn test_get_out_of_range() {
        assert_eq!(UARTS.get(2).err(), Some(DeviceError::OutOfRange));
        assert_eq!(EMPTY.get(0).err(), Some(DeviceError::OutOfRange));
    }

    #[test]
    fn test_empty_registry() {
        assert!(EMPTY.is_empty());
        assert_eq!(EMPTY.count(), 0);
        assert!(EMPTY.iter().next().is_none());
        assert_eq!(EMPTY.find("anything").err(), Some(DeviceError::NotFound));
    }

    #[test]
    fn test_validate_duplicates() {
        assert!(UARTS.validate().is_ok());
        assert_eq!(DUPLICATES.validate(), Err(DeviceError::InvalidParameter));
        // 查找返回链接顺序中的第一个
        assert_eq!(DUPLICATES.index_of("spi0").unwrap(), 0);
    }
}
