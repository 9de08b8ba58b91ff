use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use neon_devcore::device::{DeviceDescriptor, DeviceFactory, DeviceInstance, DeviceOps, DeviceState};
use neon_devcore::dma::{DmaChannel, DmaManager, DmaRequest};
use neon_devcore::error::{DeviceError, Result};
use neon_devcore::init::{InitEntry, InitLevel};
use neon_devcore::isr::IsrManager;
use neon_devcore::{device_table, init_table};

struct CountingOps {
    inits: AtomicU32,
    deinits: AtomicU32,
}

impl CountingOps {
    const fn new() -> Self {
        Self {
            inits: AtomicU32::new(0),
            deinits: AtomicU32::new(0),
        }
    }
}

static INSTANCE: u8 = 0;

impl DeviceOps for CountingOps {
    fn init(&self, _dev: &'static DeviceDescriptor) -> Result<DeviceInstance> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceInstance::from_static(&INSTANCE))
    }

    fn deinit(&self, _dev: &'static DeviceDescriptor, _instance: DeviceInstance) -> Result<()> {
        self.deinits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

static UART_A: CountingOps = CountingOps::new();
static UART_B: CountingOps = CountingOps::new();

device_table! {
    static DEVICES = [
        DeviceDescriptor::new("uartA", &UART_A),
        DeviceDescriptor::new("uartB", &UART_B),
    ];
}

#[test]
fn registry_lookup() {
    assert_eq!(DEVICES.count(), 2);
    assert_eq!(DEVICES.iter().count(), DEVICES.count());
    assert_eq!(DEVICES.find("uartB").unwrap().name(), "uartB");
    assert_eq!(DEVICES.find("uartC").err(), Some(DeviceError::NotFound));
    assert!(DEVICES.validate().is_ok());
}

#[test]
fn factory_reference_counting() {
    let factory: DeviceFactory<2> = DeviceFactory::new(&DEVICES);

    let first = factory.acquire("uartA").unwrap();
    let second = factory.acquire("uartA").unwrap();
    assert_eq!(factory.ref_count("uartA"), Ok(2));
    assert_eq!(UART_A.inits.load(Ordering::SeqCst), 1);

    factory.release(first).unwrap();
    factory.release(second).unwrap();
    assert_eq!(factory.ref_count("uartA"), Ok(0));
    assert_eq!(UART_A.deinits.load(Ordering::SeqCst), 1);
    assert_eq!(factory.state("uartA"), Ok(DeviceState::Uninitialized));

    let third = factory.acquire("uartA").unwrap();
    assert_eq!(UART_A.inits.load(Ordering::SeqCst), 2);
    factory.release(third).unwrap();

    assert_eq!(UART_B.inits.load(Ordering::SeqCst), 0);
}

#[test]
fn dma_exhaustion_and_reuse() {
    let dma = DmaManager::<1, 4>::new();
    let channels: Vec<DmaChannel> = (0..4)
        .map(|_| dma.allocate(0, DmaRequest::Any, "spi0").unwrap())
        .collect();
    for (n, ch) in channels.iter().enumerate() {
        assert_eq!(*ch, DmaChannel::new(0, n as u8));
    }
    assert_eq!(dma.allocate(0, DmaRequest::Any, "spi0"), Err(DeviceError::Exhausted));

    dma.free(channels[1]).unwrap();
    assert_eq!(dma.allocate(0, DmaRequest::Any, "spi0"), Ok(DmaChannel::new(0, 1)));
}

static IRQ5_ORDER: Mutex<Vec<usize>> = Mutex::new(Vec::new());

fn record_priority(_irq: u16, ctx: usize) {
    IRQ5_ORDER.lock().unwrap().push(ctx);
}

#[test]
fn isr_descending_priority() {
    let isr = IsrManager::<8, 8>::new();
    for priority in [10u8, 5, 20] {
        isr.register(5, record_priority, priority as usize, priority).unwrap();
    }
    isr.enable(5).unwrap();

    assert_eq!(isr.dispatch(5), 3);
    assert_eq!(*IRQ5_ORDER.lock().unwrap(), [20, 10, 5]);
}

static LEVEL_LOG: Mutex<Vec<u8>> = Mutex::new(Vec::new());

fn level0_ok() -> Result<()> {
    LEVEL_LOG.lock().unwrap().push(0);
    Ok(())
}

fn level0_fail() -> Result<()> {
    LEVEL_LOG.lock().unwrap().push(0);
    Err(DeviceError::Timeout)
}

fn level1_ok() -> Result<()> {
    LEVEL_LOG.lock().unwrap().push(1);
    Ok(())
}

init_table! {
    static RUNNER = [
        InitEntry::new("l1_a", InitLevel::Early, level1_ok),
        InitEntry::new("l0_a", InitLevel::PowerClock, level0_ok),
        InitEntry::new("l0_b", InitLevel::PowerClock, level0_fail),
        InitEntry::new("l1_b", InitLevel::Early, level1_ok),
        InitEntry::new("l0_c", InitLevel::PowerClock, level0_ok),
    ];
}

#[test]
fn init_runner_continues_after_failure() {
    let stats = RUNNER.run();
    assert_eq!((stats.total, stats.success, stats.fail), (5, 4, 1));
    assert_eq!(stats.total, stats.success + stats.fail);
    assert_eq!(*LEVEL_LOG.lock().unwrap(), [0, 0, 0, 1, 1]);

    let failure = stats.last_failure.unwrap();
    assert_eq!(failure.level, InitLevel::PowerClock);
    assert_eq!(failure.name, "l0_b");
    assert_eq!(failure.code, DeviceError::Timeout.code());
}
