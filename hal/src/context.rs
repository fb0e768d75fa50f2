//! Process-wide peripheral context

use std::sync::Arc;

use crate::adc::{AdcConfig, AdcDriver, AdcManager};
use crate::i2c::{I2cDriver, I2cManager};

/// Owns the one I2C manager and the one ADC manager of the application.
///
/// Build it once at startup and hand clones of the `Arc` to the components
/// that use the buses.
pub struct Peripherals<I: I2cDriver, A: AdcDriver> {
    i2c: I2cManager<I>,
    adc: AdcManager<A>,
}

impl<I: I2cDriver, A: AdcDriver> Peripherals<I, A> {
    pub fn new(i2c: I, adc: A) -> Arc<Self> {
        Self::with_adc_config(i2c, adc, AdcConfig::default())
    }

    pub fn with_adc_config(i2c: I, adc: A, config: AdcConfig) -> Arc<Self> {
        Arc::new(Self {
            i2c: I2cManager::new(i2c),
            adc: AdcManager::with_config(adc, config),
        })
    }

    pub fn i2c(&self) -> &I2cManager<I> {
        &self.i2c
    }

    pub fn adc(&self) -> &AdcManager<A> {
        &self.adc
    }

    /// Releases every bus and unit.
    pub fn shutdown(&self) {
        self.i2c.shutdown();
        self.adc.shutdown();
    }
}
