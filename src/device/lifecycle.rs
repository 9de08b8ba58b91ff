//! # 设备生命周期状态机
//!
//! 每个设备实例的状态由一个封闭的枚举表示，每次操作都先查显式的
//! 转换表，再调用驱动钩子。钩子失败时实例进入 `Error` 状态。
//!
//! ## 状态转换图
//!
//! ```text
//!                    ┌───────────────┐
//!          ┌────────►│ Uninitialized │◄──────────────┐
//!          │         └───────┬───────┘               │
//!          │                 │ init()                │
//!          │                 ▼                       │
//!          │  reinit()  ┌─────────┐                  │
//!          │  ┌────────►│ Running │──────┐           │ deinit()
//!          │  │         └──┬───▲──┘      │           │ (ref == 0)
//!  deinit()│  │  suspend() │   │ resume()│ 钩子失败  │
//!          │  │            ▼   │         ▼           │
//!          │  │       ┌───────────┐  ┌───────┐       │
//!          │  │       │ Suspended │  │ Error │───────┘
//!          │  │       └─────┬─────┘  └───┬───┘
//!          │  │             │            │
//!          │  └─────────────┼────────────┘
//!          └────────────────┘
//! ```
//!
//! ## 规则
//!
//! - 对 `Uninitialized` 实例执行 `init` 以外的任何操作都返回 `NotInitialized`
//! - 对非 `Running` 实例 `suspend` 返回 `InvalidState`
//! - 对非 `Suspended` 实例 `resume` 返回 `InvalidState`
//! - 重复 `init` 返回 `AlreadyInitialized`
//! - `deinit` 只有在引用计数归零时由工厂触发

use crate::error::{DeviceError, Result};

/// 设备实例状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceState {
    /// 未初始化，没有实例
    Uninitialized = 0,
    /// 运行中
    Running = 1,
    /// 已挂起：时钟/电源关闭，配置保留
    Suspended = 2,
    /// 某个钩子失败
    Error = 3,
}

/// 生命周期操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Init,
    Deinit,
    Suspend,
    Resume,
    Reinit,
}

impl DeviceState {
    /// 查转换表，返回操作成功后的目标状态
    pub const fn transition(self, op: Transition) -> Result<DeviceState> {
        use DeviceState::*;
        use Transition::*;

        match (self, op) {
            (Uninitialized, Init) => Ok(Running),
            (Uninitialized, _) => Err(DeviceError::NotInitialized),
            (_, Init) => Err(DeviceError::AlreadyInitialized),

            (Running | Suspended | Error, Deinit) => Ok(Uninitialized),

            (Running, Suspend) => Ok(Suspended),
            (_, Suspend) => Err(DeviceError::InvalidState),

            (Suspended, Resume) => Ok(Running),
            (_, Resume) => Err(DeviceError::InvalidState),

            (Running | Error, Reinit) => Ok(Running),
            (Suspended, Reinit) => Err(DeviceError::InvalidState),
        }
    }

    /// 是否存在活动实例
    pub const fn is_live(self) -> bool {
        !matches!(self, DeviceState::Uninitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [DeviceState; 4] = [
        DeviceState::Uninitialized,
        DeviceState::Running,
        DeviceState::Suspended,
        DeviceState::Error,
    ];

    #[test]
    fn test_init_only_from_uninitialized() {
        assert_eq!(
            DeviceState::Uninitialized.transition(Transition::Init),
            Ok(DeviceState::Running)
        );
        for state in &ALL_STATES[1..] {
            assert_eq!(
                state.transition(Transition::Init),
                Err(DeviceError::AlreadyInitialized)
            );
        }
    }

    #[test]
    fn test_uninitialized_rejects_everything_but_init() {
        for op in [
            Transition::Deinit,
            Transition::Suspend,
            Transition::Resume,
            Transition::Reinit,
        ] {
            assert_eq!(
                DeviceState::Uninitialized.transition(op),
                Err(DeviceError::NotInitialized)
            );
        }
    }

    #[test]
    fn test_suspend_resume() {
        assert_eq!(
            DeviceState::Running.transition(Transition::Suspend),
            Ok(DeviceState::Suspended)
        );
        assert_eq!(
            DeviceState::Suspended.transition(Transition::Resume),
            Ok(DeviceState::Running)
        );
        assert_eq!(
            DeviceState::Suspended.transition(Transition::Suspend),
            Err(DeviceError::InvalidState)
        );
        assert_eq!(
            DeviceState::Running.transition(Transition::Resume),
            Err(DeviceError::InvalidState)
        );
        assert_eq!(
            DeviceState::Error.transition(Transition::Resume),
            Err(DeviceError::InvalidState)
        );
    }

    #[test]
    fn test_deinit_and_reinit() {
        for state in &ALL_STATES[1..] {
            assert_eq!(
                state.transition(Transition::Deinit),
                Ok(DeviceState::Uninitialized)
            );
        }
        assert_eq!(
            DeviceState::Running.transition(Transition::Reinit),
            Ok(DeviceState::Running)
        );
        assert_eq!(
            DeviceState::Error.transition(Transition::Reinit),
            Ok(DeviceState::Running)
        );
        assert_eq!(
            DeviceState::Suspended.transition(Transition::Reinit),
            Err(DeviceError::InvalidState)
        );
    }
}
