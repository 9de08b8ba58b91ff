#![cfg_attr(not(test), no_std)]
#[cfg(test)]
extern crate std;

pub mod error;
pub mod config;
pub mod logger;
pub mod hal;
pub mod device;
pub mod dma;
pub mod isr;
pub mod init;
pub mod drivers;

pub use paste;
