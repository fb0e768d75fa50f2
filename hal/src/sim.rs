//! In-memory drivers for host runs and tests.
//!
//! Each driver hands out a cloneable observer handle sharing its state, so a
//! test can keep observing the driver after moving it into a manager.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::adc::{AdcChannelConfig, AdcDriver, AdcUnit};
use crate::error::{DriverError, HalError, HalResult};
use crate::i2c::{I2cAddress, I2cBus, I2cDevice, I2cDeviceConfig, I2cDriver, I2cPins};

/// Code reported when no device acknowledges a probe.
pub const NOT_FOUND: i32 = 0x105;

#[derive(Default)]
struct I2cState {
    devices: BTreeSet<u16>,
    opens: usize,
    closes: usize,
    live: BTreeSet<u8>,
    fail_open: bool,
    memory: HashMap<u16, Vec<u8>>,
    speeds: HashMap<u16, u32>,
}

/// Simulated I2C controller.
#[derive(Clone, Default)]
pub struct SimI2cDriver {
    state: Arc<Mutex<I2cState>>,
}

impl SimI2cDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a device at `address` answer probes on every port.
    pub fn with_device(self, address: u16) -> Self {
        self.state.lock().devices.insert(address);
        self
    }

    /// Makes subsequent bus opens fail.
    pub fn fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    /// True while a bus handle for `port` is open.
    pub fn is_live(&self, port: u8) -> bool {
        self.state.lock().live.contains(&port)
    }

    /// Clock rate in Hz of the last device added at `address`.
    pub fn device_speed(&self, address: u16) -> Option<u32> {
        self.state.lock().speeds.get(&address).copied()
    }
}

impl I2cDriver for SimI2cDriver {
    fn open(&mut self, port: u8, pins: I2cPins) -> Result<Box<dyn I2cBus>, DriverError> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(DriverError::Other(-1));
        }
        state.opens += 1;
        state.live.insert(port);
        log::trace!("sim I2C{port} open on {pins:?}");
        Ok(Box::new(SimBus {
            port,
            state: self.state.clone(),
        }))
    }
}

struct SimBus {
    port: u8,
    state: Arc<Mutex<I2cState>>,
}

impl I2cBus for SimBus {
    fn probe(&mut self, address: u16, _timeout: Option<Duration>) -> Result<(), DriverError> {
        if self.state.lock().devices.contains(&address) {
            Ok(())
        } else {
            Err(DriverError::Other(NOT_FOUND))
        }
    }

    fn add_device(&mut self, config: &I2cDeviceConfig) -> Result<Box<dyn I2cDevice>, DriverError> {
        self.state
            .lock()
            .speeds
            .insert(config.address.raw(), config.speed.hz());
        Ok(Box::new(SimDevice {
            address: config.address,
            state: self.state.clone(),
        }))
    }

    fn close(self: Box<Self>) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        state.closes += 1;
        state.live.remove(&self.port);
        Ok(())
    }
}

/// Loopback device: reads return the bytes last written.
struct SimDevice {
    address: I2cAddress,
    state: Arc<Mutex<I2cState>>,
}

impl SimDevice {
    fn present(&self, state: &I2cState) -> HalResult<()> {
        if state.devices.contains(&self.address.raw()) {
            Ok(())
        } else {
            Err(HalError::Driver(NOT_FOUND))
        }
    }
}

impl I2cDevice for SimDevice {
    fn address(&self) -> I2cAddress {
        self.address
    }

    fn write(&mut self, data: &[u8]) -> HalResult<()> {
        let mut state = self.state.lock();
        self.present(&state)?;
        state.memory.insert(self.address.raw(), data.to_vec());
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> HalResult<()> {
        let state = self.state.lock();
        self.present(&state)?;
        let stored = state
            .memory
            .get(&self.address.raw())
            .map(Vec::as_slice)
            .unwrap_or_default();
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = stored.get(i).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn write_read(&mut self, write_data: &[u8], read_buffer: &mut [u8]) -> HalResult<()> {
        self.write(write_data)?;
        self.read(read_buffer)
    }
}

#[derive(Default)]
struct AdcState {
    opens: usize,
    closes: usize,
    reads: usize,
    values: HashMap<(u8, u8), u16>,
    configured: HashMap<(u8, u8), AdcChannelConfig>,
    errors: VecDeque<DriverError>,
}

/// Simulated ADC with settable readings and scripted read failures.
///
/// Readings saturate at the largest value of the channel's resolution.
#[derive(Clone, Default)]
pub struct SimAdcDriver {
    state: Arc<Mutex<AdcState>>,
}

impl SimAdcDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_value(&self, unit: u8, channel: u8, value: u16) {
        self.state.lock().values.insert((unit, channel), value);
    }

    /// Queues errors returned by the next reads, in order.
    pub fn push_read_errors(&self, errors: impl IntoIterator<Item = DriverError>) {
        self.state.lock().errors.extend(errors);
    }

    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    /// Read attempts, including failed ones.
    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }

    pub fn is_configured(&self, unit: u8, channel: u8) -> bool {
        self.state.lock().configured.contains_key(&(unit, channel))
    }
}

impl AdcDriver for SimAdcDriver {
    fn open(&mut self, unit: u8) -> Result<Box<dyn AdcUnit>, DriverError> {
        self.state.lock().opens += 1;
        Ok(Box::new(SimAdcUnit {
            unit,
            state: self.state.clone(),
        }))
    }
}

struct SimAdcUnit {
    unit: u8,
    state: Arc<Mutex<AdcState>>,
}

impl AdcUnit for SimAdcUnit {
    fn configure_channel(&mut self, channel: u8, config: &AdcChannelConfig) -> Result<(), DriverError> {
        log::trace!("sim ADC{} channel {channel}: {config:?}", self.unit);
        self.state.lock().configured.insert((self.unit, channel), *config);
        Ok(())
    }

    fn read(&mut self, channel: u8) -> Result<u16, DriverError> {
        let mut state = self.state.lock();
        state.reads += 1;
        if let Some(err) = state.errors.pop_front() {
            return Err(err);
        }
        let key = (self.unit, channel);
        let value = state.values.get(&key).copied().unwrap_or(0);
        let max = state
            .configured
            .get(&key)
            .map_or(u16::MAX, |config| config.resolution.max_value());
        Ok(value.min(max))
    }

    fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.state.lock().closes += 1;
        Ok(())
    }
}
