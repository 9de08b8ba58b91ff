//! # 分级初始化
//!
//! 启动时按依赖层级逐级执行初始化函数，在进入应用入口之前调用一次。
//!
//! | 级别 | 名称 | 典型内容 |
//! |------|------|----------|
//! | 0 | `PowerClock` | 电源、时钟树 |
//! | 1 | `Early` | 日志、调试口 |
//! | 2 | `Board` | 板级引脚复用 |
//! | 3 | `Driver` | 外设驱动（通常调用 `DeviceFactory::acquire`） |
//! | 4 | `Middleware` | 协议栈、文件系统 |
//! | 5 | `Application` | 应用服务 |
//!
//! 同一级别内按链接顺序执行。单个函数失败只会被记录（级别、名称、错误码），
//! 后续函数照常执行；调用者在 `run()` 之后通过 `get_stats()` 检查结果。

use core::fmt;
use core::iter::FusedIterator;
use core::mem::size_of;

use spin::Mutex;

use crate::config::INIT_LEVELS;
use crate::error::{DeviceError, Result};

/// 初始化函数
pub type InitFn = fn() -> Result<()>;

/// 初始化级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum InitLevel {
    PowerClock = 0,
    Early = 1,
    Board = 2,
    Driver = 3,
    Middleware = 4,
    Application = 5,
}

impl InitLevel {
    /// 按执行顺序排列的所有级别
    pub const ALL: [InitLevel; INIT_LEVELS] = [
        InitLevel::PowerClock,
        InitLevel::Early,
        InitLevel::Board,
        InitLevel::Driver,
        InitLevel::Middleware,
        InitLevel::Application,
    ];

    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for InitLevel {
    type Error = DeviceError;

    fn try_from(value: u8) -> Result<Self> {
        InitLevel::ALL
            .get(value as usize)
            .copied()
            .ok_or(DeviceError::InvalidParameter)
    }
}

/// 初始化表项
#[repr(C)]
pub struct InitEntry {
    name: &'static str,
    level: InitLevel,
    func: InitFn,
}

impl InitEntry {
    pub const fn new(name: &'static str, level: InitLevel, func: InitFn) -> Self {
        Self { name, level, func }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn level(&self) -> InitLevel {
        self.level
    }
}

impl fmt::Debug for InitEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitEntry")
            .field("name", &self.name)
            .field("level", &self.level)
            .finish()
    }
}

/// 一次失败记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitFailure {
    pub level: InitLevel,
    pub name: &'static str,
    pub code: i32,
}

/// 执行统计，始终满足 `total == success + fail`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitStats {
    pub total: u32,
    pub success: u32,
    pub fail: u32,
    pub last_failure: Option<InitFailure>,
}

impl InitStats {
    pub const ZERO: InitStats = InitStats {
        total: 0,
        success: 0,
        fail: 0,
        last_failure: None,
    };
}

/// 分级初始化执行器
pub struct InitRunner {
    start: *const InitEntry,
    end: *const InitEntry,
    stats: Mutex<InitStats>,
}

// Safety: 表项区间是 'static 且只读的，统计信息由锁保护
unsafe impl Send for InitRunner {}
unsafe impl Sync for InitRunner {}

impl InitRunner {
    /// 从构建期生成的静态表创建
    pub const fn from_slice(table: &'static [InitEntry]) -> Self {
        let range = table.as_ptr_range();
        Self {
            start: range.start,
            end: range.end,
            stats: Mutex::new(InitStats::ZERO),
        }
    }

    /// 从一对边界指针创建
    ///
    /// # Safety
    ///
    /// `[start, end)` 必须是一段连续、已初始化的 `InitEntry` 数组，
    /// 在程序运行期间一直有效且不被修改。
    pub const unsafe fn from_bounds(start: *const InitEntry, end: *const InitEntry) -> Self {
        Self {
            start,
            end,
            stats: Mutex::new(InitStats::ZERO),
        }
    }

    /// 使用链接段 `neon_initcalls` 的边界创建
    #[cfg(feature = "link-section")]
    pub fn linked() -> Self {
        unsafe extern "Rust" {
            #[link_name = "__start_neon_initcalls"]
            static INITCALLS_START: InitEntry;
            #[link_name = "__stop_neon_initcalls"]
            static INITCALLS_STOP: InitEntry;
        }
        // Safety: 链接器保证段内只有 init_entry! 放入的表项
        unsafe { Self::from_bounds(&raw const INITCALLS_START, &raw const INITCALLS_STOP) }
    }

    /// 表项数量
    pub fn count(&self) -> usize {
        (self.end as usize - self.start as usize) / size_of::<InitEntry>()
    }

    /// 按链接顺序遍历表项
    pub fn entries(&self) -> InitEntries {
        InitEntries {
            cur: self.start,
            end: self.end,
        }
    }

    /// 清零统计后按级别执行所有表项
    ///
    /// 没有重入保护：再次调用会重新执行全部函数。
    pub fn run(&self) -> InitStats {
        *self.stats.lock() = InitStats::ZERO;
        for level in InitLevel::ALL {
            self.execute(level);
        }

        let stats = self.get_stats();
        if stats.fail > 0 {
            log::warn!(target: "init", "{} of {} init functions failed", stats.fail, stats.total);
        } else {
            log::info!(target: "init", "{} init functions done", stats.total);
        }
        stats
    }

    /// 只执行一个级别，统计累加到当前结果上
    pub fn run_level(&self, level: InitLevel) -> InitStats {
        self.execute(level);
        self.get_stats()
    }

    /// 当前统计
    pub fn get_stats(&self) -> InitStats {
        *self.stats.lock()
    }

    fn execute(&self, level: InitLevel) {
        for entry in self.entries().filter(|e| e.level == level) {
            let result = (entry.func)();

            let mut stats = self.stats.lock();
            stats.total += 1;
            match result {
                Ok(()) => {
                    stats.success += 1;
                    log::debug!(target: "init", "[{:?}] {} ok", level, entry.name);
                }
                Err(e) => {
                    stats.fail += 1;
                    stats.last_failure = Some(InitFailure {
                        level,
                        name: entry.name,
                        code: e.code(),
                    });
                    log::error!(target: "init", "[{:?}] {} failed: {}", level, entry.name, e);
                }
            }
        }
    }
}

/// 初始化表迭代器
pub struct InitEntries {
    cur: *const InitEntry,
    end: *const InitEntry,
}

impl Iterator for InitEntries {
    type Item = &'static InitEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == self.end {
            return None;
        }
        // Safety: cur 在 [start, end) 内
        let entry = unsafe { &*self.cur };
        self.cur = unsafe { self.cur.add(1) };
        Some(entry)
    }
}

impl FusedIterator for InitEntries {}

// ============================================================================
// 注册宏
// ============================================================================

/// 定义构建期生成的初始化表
///
/// ```rust,ignore
/// neon_devcore::init_table! {
///     pub static INIT = [
///         InitEntry::new("clock", InitLevel::PowerClock, clock_init),
///         InitEntry::new("uart0", InitLevel::Driver, uart_bring_up),
///     ];
/// }
///
/// let stats = INIT.run();
/// ```
#[macro_export]
macro_rules! init_table {
    (
        $(#[$meta:meta])*
        $vis:vis static $name:ident = [ $($entry:expr),* $(,)? ];
    ) => {
        $crate::paste::paste! {
            static [<$name _ENTRIES>]: [$crate::init::InitEntry; $crate::__count_items!($($entry),*)] = [
                $($entry),*
            ];

            $(#[$meta])*
            $vis static $name: $crate::init::InitRunner =
                $crate::init::InitRunner::from_slice(&[<$name _ENTRIES>]);
        }
    };
}

/// 把一个初始化函数放进 `neon_initcalls` 链接段
///
/// ```rust,ignore
/// neon_devcore::init_entry!(InitLevel::Driver, uart_bring_up);
///
/// let stats = InitRunner::linked().run();
/// ```
#[cfg(feature = "link-section")]
#[macro_export]
macro_rules! init_entry {
    ($level:expr, $func:ident) => {
        $crate::paste::paste! {
            #[used]
            #[unsafe(link_section = "neon_initcalls")]
            static [<__INITCALL_ $func:upper>]: $crate::init::InitEntry =
                $crate::init::InitEntry::new(stringify!($func), $level, $func);
        }
    };
}
