//! cpal backed devices
//!
//! cpal can enumerate output devices and their supported stream ranges on
//! every host, but it cannot change a device's nominal rate. On macOS the
//! rate is written through CoreAudio; other hosts report `Unsupported`.

use super::{DeviceError, DeviceProvider, OutputDevice};
use crate::format::catalog::AudioFormat;
use crate::COMMON_SAMPLE_RATES;
use cpal::traits::{DeviceTrait, HostTrait};
use std::sync::Arc;

/// Enumerates output devices of the default cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDeviceProvider;

impl DeviceProvider for CpalDeviceProvider {
    fn output_devices(&self) -> Result<Vec<Arc<dyn OutputDevice>>, DeviceError> {
        let host = cpal::default_host();
        let devices = host.output_devices().map_err(|e| DeviceError::Query {
            device: "host".to_string(),
            reason: e.to_string(),
        })?;

        let mut out: Vec<Arc<dyn OutputDevice>> = Vec::new();
        for device in devices {
            match CpalOutputDevice::new(device) {
                Some(d) => out.push(Arc::new(d)),
                None => tracing::debug!("skipping output device without a description"),
            }
        }
        Ok(out)
    }

    fn default_output_device(&self) -> Option<Arc<dyn OutputDevice>> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;
        CpalOutputDevice::new(device).map(|d| Arc::new(d) as Arc<dyn OutputDevice>)
    }
}

/// One cpal output device
pub struct CpalOutputDevice {
    name: String,
    device: cpal::Device,
}

impl CpalOutputDevice {
    fn new(device: cpal::Device) -> Option<Self> {
        let name = device.description().ok()?.to_string();
        Some(Self { name, device })
    }

    fn query_error(&self, reason: impl ToString) -> DeviceError {
        DeviceError::Query {
            device: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    /// Common rates covered by each supported range, with the range's bit depth
    fn probe_formats(&self) -> Result<Vec<AudioFormat>, DeviceError> {
        let ranges = self
            .device
            .supported_output_configs()
            .map_err(|e| self.query_error(e))?;

        let mut formats: Vec<AudioFormat> = Vec::new();
        for range in ranges {
            let bit_depth = (range.sample_format().sample_size() * 8) as u32;
            let min = range.min_sample_rate();
            let max = range.max_sample_rate();
            for &rate in &COMMON_SAMPLE_RATES {
                if !(min..=max).contains(&rate) {
                    continue;
                }
                let format = AudioFormat::new(rate as f64, bit_depth);
                if !formats.iter().any(|f| f.matches(&format)) {
                    formats.push(format);
                }
            }
        }
        Ok(formats)
    }
}

impl OutputDevice for CpalOutputDevice {
    fn id(&self) -> &str {
        &self.name
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn nominal_sample_rate(&self) -> Result<f64, DeviceError> {
        let config = self
            .device
            .default_output_config()
            .map_err(|e| self.query_error(e))?;
        Ok(config.sample_rate() as f64)
    }

    fn supported_sample_rates(&self) -> Result<Vec<f64>, DeviceError> {
        let mut rates: Vec<f64> = Vec::new();
        for format in self.probe_formats()? {
            if !rates.contains(&format.sample_rate) {
                rates.push(format.sample_rate);
            }
        }
        rates.sort_by(f64::total_cmp);
        Ok(rates)
    }

    fn output_stream_formats(&self) -> Option<Vec<AudioFormat>> {
        match self.probe_formats() {
            Ok(formats) if !formats.is_empty() => Some(formats),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(device = %self.name, error = %e, "failed to read stream formats");
                None
            }
        }
    }

    fn set_nominal_sample_rate(&self, rate: f64) -> Result<(), DeviceError> {
        platform::set_nominal_sample_rate(&self.name, rate)
    }

    fn set_physical_format(&self, format: AudioFormat) -> Result<(), DeviceError> {
        // The shared mixer picks the bit depth; only the rate reaches the hardware
        tracing::debug!(device = %self.name, %format, "writing physical format as nominal rate");
        platform::set_nominal_sample_rate(&self.name, format.sample_rate)
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use super::DeviceError;
    use coreaudio::audio_unit::macos_helpers::{get_device_id_from_name, set_device_sample_rate};

    pub fn set_nominal_sample_rate(name: &str, rate: f64) -> Result<(), DeviceError> {
        let device_id = get_device_id_from_name(name, false)
            .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string()))?;
        set_device_sample_rate(device_id, rate).map_err(|e| DeviceError::Write {
            device: name.to_string(),
            what: "nominal sample rate".to_string(),
            reason: format!("{e:?}"),
        })
    }
}

#[cfg(not(target_os = "macos"))]
mod platform {
    use super::DeviceError;

    pub fn set_nominal_sample_rate(_name: &str, _rate: f64) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("nominal sample rate"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices() {
        // May find nothing on CI without audio hardware, but shouldn't panic
        match CpalDeviceProvider.output_devices() {
            Ok(devices) => {
                for device in &devices {
                    println!("  - {}: {:?}", device.name(), device.supported_sample_rates());
                }
            }
            Err(e) => println!("No audio devices available: {}", e),
        }
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_rate_writes_unsupported_off_macos() {
        let err = platform::set_nominal_sample_rate("any", 96000.0).unwrap_err();
        assert!(matches!(err, DeviceError::Unsupported(_)));
    }
}
