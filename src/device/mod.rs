//! # 设备管理核心
//!
//! - [`descriptor`]: 设备描述符、配置存储、生命周期钩子
//! - [`registry`]: 编译期静态注册表
//! - [`lifecycle`]: 生命周期状态机
//! - [`factory`]: 带引用计数的设备工厂

pub mod descriptor;
pub mod factory;
pub mod lifecycle;
pub mod registry;

pub use descriptor::{ConfigSlot, ConfigStore, DeviceDescriptor, DeviceInstance, DeviceOps};
pub use factory::{DeviceFactory, DeviceHandle, LiveDevice, LiveDevices, ResourceReclaim};
pub use lifecycle::{DeviceState, Transition};
pub use registry::{DeviceIter, DeviceRegistry};
