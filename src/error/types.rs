#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    // 注册表 / 工厂
    NotFound,
    OutOfRange,
    AlreadyInitialized,
    NotInitialized,
    InvalidState,

    // 资源相关 - DMA
    Busy,
    Exhausted,
    NotAllocated,

    // 通用错误
    NullPointer,
    InvalidParameter,
    Timeout,

    // 驱动钩子返回的私有错误码
    Driver(i32),
}

impl DeviceError {
    /// 获取稳定的数值错误码
    ///
    /// 错误码均为负数，初始化运行器用它记录失败原因。
    pub const fn code(&self) -> i32 {
        match self {
            DeviceError::NotFound => -1,
            DeviceError::OutOfRange => -2,
            DeviceError::AlreadyInitialized => -3,
            DeviceError::NotInitialized => -4,
            DeviceError::InvalidState => -5,
            DeviceError::Busy => -6,
            DeviceError::Exhausted => -7,
            DeviceError::NotAllocated => -8,
            DeviceError::NullPointer => -9,
            DeviceError::InvalidParameter => -10,
            DeviceError::Timeout => -11,
            DeviceError::Driver(code) => {
                if *code < 0 {
                    *code
                } else {
                    -1000 - *code
                }
            }
        }
    }
}

impl core::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            // 注册表 / 工厂
            DeviceError::NotFound => write!(f, "Device not found"),
            DeviceError::OutOfRange => write!(f, "Index out of range"),
            DeviceError::AlreadyInitialized => write!(f, "Device already initialized"),
            DeviceError::NotInitialized => write!(f, "Device not initialized"),
            DeviceError::InvalidState => write!(f, "Invalid device state"),

            // DMA
            DeviceError::Busy => write!(f, "Resource busy"),
            DeviceError::Exhausted => write!(f, "No free resource left"),
            DeviceError::NotAllocated => write!(f, "Resource not allocated"),

            // Generic
            DeviceError::NullPointer => write!(f, "Null pointer"),
            DeviceError::InvalidParameter => write!(f, "Invalid parameter"),
            DeviceError::Timeout => write!(f, "Operation timed out"),

            DeviceError::Driver(code) => write!(f, "Driver error {}", code),
        }
    }
}

pub type Result<T> = core::result::Result<T, DeviceError>;
