//! Reference-counted bus managers for I2C and one-shot ADC.
//!
//! Platform access goes through the driver traits in [`i2c`] and [`adc`];
//! the [`sim`] module provides in-memory drivers for host builds. One
//! [`Peripherals`] context owns both managers for the whole application.

pub mod adc;
pub mod context;
pub mod error;
pub mod i2c;
pub mod sim;

// Re-export commonly used types
pub use adc::{
    AdcAttenuation, AdcChannelConfig, AdcConfig, AdcDriver, AdcManager, AdcResolution, AdcUnit,
};
pub use context::Peripherals;
pub use error::{DriverError, HalError, HalResult};
pub use i2c::{I2cAddress, I2cBus, I2cDevice, I2cDeviceConfig, I2cDriver, I2cManager, I2cPins, I2cSpeed};
