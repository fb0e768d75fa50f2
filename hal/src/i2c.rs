//! I2C master bus manager

use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{DriverError, HalError, HalResult};

/// Number of I2C controllers.
pub const I2C_PORT_COUNT: usize = 2;
/// Number of GPIO pins that can carry SDA or SCL.
pub const GPIO_PIN_COUNT: u8 = 49;

/// I2C address (7-bit or 10-bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cAddress {
    SevenBit(u8),
    TenBit(u16),
}

impl I2cAddress {
    pub fn raw(self) -> u16 {
        match self {
            Self::SevenBit(addr) => u16::from(addr),
            Self::TenBit(addr) => addr,
        }
    }
}

/// I2C speed mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cSpeed {
    /// Standard mode (100 kHz)
    Standard,
    /// Fast mode (400 kHz)
    Fast,
    /// Fast mode plus (1 MHz)
    FastPlus,
    /// High speed mode (3.4 MHz)
    HighSpeed,
}

impl I2cSpeed {
    pub fn hz(self) -> u32 {
        match self {
            Self::Standard => 100_000,
            Self::Fast => 400_000,
            Self::FastPlus => 1_000_000,
            Self::HighSpeed => 3_400_000,
        }
    }
}

/// SDA/SCL pin pair latched by [`I2cManager::configure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cPins {
    pub sda: u8,
    pub scl: u8,
}

/// Logical device added to a live bus
#[derive(Debug, Clone)]
pub struct I2cDeviceConfig {
    pub address: I2cAddress,
    pub speed: I2cSpeed,
}

impl I2cDeviceConfig {
    pub fn new(address: I2cAddress) -> Self {
        Self {
            address,
            speed: I2cSpeed::Standard,
        }
    }

    pub fn with_speed(mut self, speed: I2cSpeed) -> Self {
        self.speed = speed;
        self
    }
}

/// Opens bus handles for a platform.
pub trait I2cDriver: Send {
    fn open(&mut self, port: u8, pins: I2cPins) -> Result<Box<dyn I2cBus>, DriverError>;
}

/// A live bus handle.
pub trait I2cBus: Send {
    /// Checks whether a device acknowledges `address`. `None` uses the
    /// driver's default timeout.
    fn probe(&mut self, address: u16, timeout: Option<Duration>) -> Result<(), DriverError>;

    fn add_device(&mut self, config: &I2cDeviceConfig) -> Result<Box<dyn I2cDevice>, DriverError>;

    /// Tears the bus down.
    fn close(self: Box<Self>) -> Result<(), DriverError>;
}

/// I2C device (bus + address)
pub trait I2cDevice: Send + Sync {
    /// Get device address
    fn address(&self) -> I2cAddress;

    /// Write data to this device
    fn write(&mut self, data: &[u8]) -> HalResult<()>;

    /// Read data from this device
    fn read(&mut self, buffer: &mut [u8]) -> HalResult<()>;

    /// Write then read from this device
    fn write_read(&mut self, write_data: &[u8], read_buffer: &mut [u8]) -> HalResult<()>;
}

#[derive(Default)]
struct PortState {
    pins: Option<I2cPins>,
    count: u16,
    bus: Option<Box<dyn I2cBus>>,
}

struct Inner<D> {
    driver: D,
    ports: [PortState; I2C_PORT_COUNT],
}

/// Reference-counted owner of every I2C port.
///
/// Pins are latched once per port; the first [`take`](Self::take) opens the
/// bus and the last [`release`](Self::release) closes it. All operations
/// serialize on one lock and must not be called from interrupt context.
pub struct I2cManager<D: I2cDriver> {
    inner: Mutex<Inner<D>>,
}

fn port_index(port: u8) -> HalResult<usize> {
    let index = usize::from(port);
    if index < I2C_PORT_COUNT {
        Ok(index)
    } else {
        Err(HalError::InvalidParameter)
    }
}

impl<D: I2cDriver> I2cManager<D> {
    pub fn new(driver: D) -> Self {
        Self {
            inner: Mutex::new(Inner {
                driver,
                ports: std::array::from_fn(|_| PortState::default()),
            }),
        }
    }

    /// Latches the pin pair for `port`.
    pub fn configure(&self, port: u8, sda: u8, scl: u8) -> HalResult<()> {
        let index = port_index(port)?;
        if sda >= GPIO_PIN_COUNT || scl >= GPIO_PIN_COUNT {
            return Err(HalError::InvalidParameter);
        }
        let mut inner = self.inner.lock();
        let state = &mut inner.ports[index];
        if state.pins.is_some() {
            return Err(HalError::AlreadyConfigured);
        }
        state.pins = Some(I2cPins { sda, scl });
        state.count = 0;
        log::debug!("I2C{port}: pins sda={sda} scl={scl}");
        Ok(())
    }

    /// Acquires `port`, opening the bus on first use. Fails with
    /// `InvalidParameter` once the reference count is saturated.
    pub fn take(&self, port: u8) -> HalResult<()> {
        let index = port_index(port)?;
        let mut inner = self.inner.lock();
        let Inner { driver, ports } = &mut *inner;
        let state = &mut ports[index];
        let pins = state.pins.ok_or(HalError::NotConfigured)?;

        let count = state.count.checked_add(1).ok_or(HalError::InvalidParameter)?;
        if state.count == 0 {
            let bus = driver.open(port, pins).map_err(|err| {
                log::error!("Init I2C{port} failed: {err}");
                HalError::from(err)
            })?;
            state.bus = Some(bus);
        }
        state.count = count;
        Ok(())
    }

    /// True if a device answers at `address`. False whenever the port is not
    /// acquired.
    pub fn probe(&self, port: u8, address: u16) -> bool {
        let Ok(index) = port_index(port) else {
            return false;
        };
        let mut inner = self.inner.lock();
        match inner.ports[index].bus.as_mut() {
            Some(bus) => bus.probe(address, None).is_ok(),
            None => false,
        }
    }

    /// Adds a logical device on an acquired port.
    pub fn add_device(&self, port: u8, config: &I2cDeviceConfig) -> HalResult<Box<dyn I2cDevice>> {
        let index = port_index(port)?;
        let mut inner = self.inner.lock();
        let state = &mut inner.ports[index];
        if state.pins.is_none() {
            return Err(HalError::NotConfigured);
        }
        let bus = state.bus.as_mut().ok_or(HalError::NotAcquired)?;
        log::debug!(
            "I2C{port}: add device {:#x} at {} Hz",
            config.address.raw(),
            config.speed.hz()
        );
        bus.add_device(config).map_err(|err| {
            log::error!("I2C{port}: add device {:#x} failed: {err}", config.address.raw());
            HalError::from(err)
        })
    }

    /// Drops one reference; the last one closes the bus. The pins stay
    /// latched.
    pub fn release(&self, port: u8) -> HalResult<()> {
        let index = port_index(port)?;
        let mut inner = self.inner.lock();
        let state = &mut inner.ports[index];
        if state.count == 0 {
            return Err(HalError::NotAcquired);
        }
        state.count -= 1;
        if state.count == 0 {
            close_bus(port, state);
        }
        Ok(())
    }

    pub fn refcount(&self, port: u8) -> u16 {
        port_index(port)
            .map(|index| self.inner.lock().ports[index].count)
            .unwrap_or(0)
    }

    pub fn is_configured(&self, port: u8) -> bool {
        port_index(port).is_ok_and(|index| self.inner.lock().ports[index].pins.is_some())
    }

    /// Closes every bus and forgets the pins so ports can be configured again.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        for (port, state) in (0u8..).zip(inner.ports.iter_mut()) {
            if state.count != 0 {
                log::debug!("I2C{port}: shutdown with {} users", state.count);
            }
            close_bus(port, state);
            state.count = 0;
            state.pins = None;
        }
    }
}

fn close_bus(port: u8, state: &mut PortState) {
    if let Some(bus) = state.bus.take() {
        if let Err(err) = bus.close() {
            log::error!("Delete I2C{port} failed: {err}");
        }
    }
}

impl<D: I2cDriver> Drop for I2cManager<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
