//! One-shot ADC unit manager

use parking_lot::Mutex;

use crate::error::{DriverError, HalError, HalResult};

/// Number of ADC units.
pub const ADC_UNIT_COUNT: usize = 2;

/// ADC resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcResolution {
    Bits9,
    Bits10,
    Bits11,
    Bits12,
}

impl AdcResolution {
    /// Largest raw reading at this resolution.
    pub fn max_value(self) -> u16 {
        match self {
            Self::Bits9 => 511,
            Self::Bits10 => 1023,
            Self::Bits11 => 2047,
            Self::Bits12 => 4095,
        }
    }
}

/// Input attenuation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcAttenuation {
    Db0,
    Db2_5,
    Db6,
    Db12,
}

/// Per-channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcChannelConfig {
    pub resolution: AdcResolution,
    pub attenuation: AdcAttenuation,
}

impl Default for AdcChannelConfig {
    fn default() -> Self {
        Self {
            resolution: AdcResolution::Bits12,
            attenuation: AdcAttenuation::Db12,
        }
    }
}

/// Manager configuration
#[derive(Debug, Clone, Default)]
pub struct AdcConfig {
    /// Applied by [`AdcManager::take_channel`].
    pub channel: AdcChannelConfig,
    /// Retries allowed for a busy or timed-out read. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl AdcConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn with_channel(mut self, channel: AdcChannelConfig) -> Self {
        self.channel = channel;
        self
    }
}

/// Opens unit handles for a platform.
pub trait AdcDriver: Send {
    fn open(&mut self, unit: u8) -> Result<Box<dyn AdcUnit>, DriverError>;
}

/// A live one-shot unit handle.
pub trait AdcUnit: Send {
    fn configure_channel(&mut self, channel: u8, config: &AdcChannelConfig) -> Result<(), DriverError>;

    fn read(&mut self, channel: u8) -> Result<u16, DriverError>;

    fn close(self: Box<Self>) -> Result<(), DriverError>;
}

#[derive(Default)]
struct UnitState {
    count: u16,
    handle: Option<Box<dyn AdcUnit>>,
}

struct Inner<D> {
    driver: D,
    units: [UnitState; ADC_UNIT_COUNT],
}

/// Reference-counted owner of the ADC units.
pub struct AdcManager<D: AdcDriver> {
    inner: Mutex<Inner<D>>,
    config: AdcConfig,
}

fn unit_index(unit: u8) -> HalResult<usize> {
    let index = usize::from(unit);
    if index < ADC_UNIT_COUNT {
        Ok(index)
    } else {
        Err(HalError::InvalidParameter)
    }
}

impl<D: AdcDriver> AdcManager<D> {
    pub fn new(driver: D) -> Self {
        Self::with_config(driver, AdcConfig::default())
    }

    pub fn with_config(driver: D, config: AdcConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                driver,
                units: std::array::from_fn(|_| UnitState::default()),
            }),
            config,
        }
    }

    pub fn config(&self) -> &AdcConfig {
        &self.config
    }

    /// Acquires `unit` and configures `channel` on it.
    pub fn take_channel(&self, unit: u8, channel: u8) -> HalResult<()> {
        let index = unit_index(unit)?;
        let mut inner = self.inner.lock();
        let Inner { driver, units } = &mut *inner;
        let state = &mut units[index];
        let count = state.count.checked_add(1).ok_or(HalError::InvalidParameter)?;
        let opened = open_if_idle(driver, unit, state)?;

        let configured = match state.handle.as_mut() {
            Some(handle) => handle.configure_channel(channel, &self.config.channel),
            None => return Err(HalError::NotAcquired),
        };
        if let Err(err) = configured {
            log::error!("ADC{unit}: configure channel {channel} failed: {err}");
            if opened {
                close_unit(unit, state);
            }
            return Err(err.into());
        }
        state.count = count;
        Ok(())
    }

    /// Acquires `unit` without touching its channels.
    pub fn take(&self, unit: u8) -> HalResult<()> {
        let index = unit_index(unit)?;
        let mut inner = self.inner.lock();
        let Inner { driver, units } = &mut *inner;
        let state = &mut units[index];
        let count = state.count.checked_add(1).ok_or(HalError::InvalidParameter)?;
        open_if_idle(driver, unit, state)?;
        state.count = count;
        Ok(())
    }

    /// Reads one raw sample, retrying while the driver is busy.
    pub fn read(&self, unit: u8, channel: u8) -> HalResult<u16> {
        let index = unit_index(unit)?;
        let mut inner = self.inner.lock();
        let handle = inner.units[index]
            .handle
            .as_mut()
            .ok_or(HalError::NotAcquired)?;

        let mut retries = 0u32;
        loop {
            match handle.read(channel) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    if self.config.max_retries.is_some_and(|max| retries >= max) {
                        log::error!("ADC{unit}: read channel {channel} gave up after {retries} retries");
                        return Err(err.into());
                    }
                    log::warn!("ADC{unit}: read channel {channel}: {err}, retrying");
                    retries += 1;
                    std::hint::spin_loop();
                }
                Err(err) => {
                    log::error!("ADC{unit}: read channel {channel}: {err}");
                    return Err(err.into());
                }
            }
        }
    }

    /// Drops one reference; the last one deletes the unit.
    pub fn release(&self, unit: u8) -> HalResult<()> {
        let index = unit_index(unit)?;
        let mut inner = self.inner.lock();
        let state = &mut inner.units[index];
        if state.count == 0 {
            return Err(HalError::NotAcquired);
        }
        state.count -= 1;
        if state.count == 0 {
            close_unit(unit, state);
        }
        Ok(())
    }

    pub fn refcount(&self, unit: u8) -> u16 {
        unit_index(unit)
            .map(|index| self.inner.lock().units[index].count)
            .unwrap_or(0)
    }

    /// Deletes every unit regardless of outstanding references.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        for (unit, state) in (0u8..).zip(inner.units.iter_mut()) {
            close_unit(unit, state);
            state.count = 0;
        }
    }
}

fn open_if_idle<D: AdcDriver>(driver: &mut D, unit: u8, state: &mut UnitState) -> HalResult<bool> {
    if state.count != 0 {
        return Ok(false);
    }
    let handle = driver.open(unit).map_err(|err| {
        log::error!("ADC{unit}: open failed: {err}");
        HalError::from(err)
    })?;
    state.handle = Some(handle);
    Ok(true)
}

fn close_unit(unit: u8, state: &mut UnitState) {
    if let Some(handle) = state.handle.take() {
        if let Err(err) = handle.close() {
            log::error!("ADC{unit}: delete failed: {err}");
        }
    }
}

impl<D: AdcDriver> Drop for AdcManager<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
