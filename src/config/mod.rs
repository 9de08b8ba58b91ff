// 设备管理核心的编译期配置
pub const MAX_DEVICES: usize = 32;
pub const DMA_CONTROLLERS: usize = 2;
pub const DMA_CHANNELS_PER_CONTROLLER: usize = 8;
pub const MAX_IRQ_LINES: usize = 64;
pub const MAX_ISR_CALLBACKS: usize = 32;
pub const INIT_LEVELS: usize = 6;
// 工厂单实例锁的自旋上限，超过后返回 Timeout
pub const FACTORY_LOCK_SPINS: usize = 1_000_000;
