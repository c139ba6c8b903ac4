//! Active device tracking
//!
//! The active device is the explicitly selected one when it is present,
//! otherwise the host default. The context also remembers the last format
//! known to be on the active device, so repeated passes with the same answer
//! never touch the hardware again, and separately the last rate this process
//! committed, which external rate changes never overwrite.

use super::{matches_device_name, DeviceError, DeviceSummary, OutputDevice};
use crate::format::catalog::{same_rate, AudioFormat};
use std::sync::Arc;

/// Format last written to (or observed on) the active device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppliedFormat {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Bit depth, when a full physical format was written
    pub bit_depth: Option<u32>,
}

/// Selected/default device and last-applied format
pub struct DeviceContext {
    selection: Option<String>,
    devices: Vec<Arc<dyn OutputDevice>>,
    default_device: Option<Arc<dyn OutputDevice>>,
    active_id: Option<String>,
    last_applied: Option<AppliedFormat>,
    /// Rate last written or confirmed by this process
    committed: Option<f64>,
}

impl DeviceContext {
    /// Create a context with an optional explicit selection (name substring)
    pub fn new(selection: Option<String>) -> Self {
        Self {
            selection: normalize_selection(selection),
            devices: Vec::new(),
            default_device: None,
            active_id: None,
            last_applied: None,
            committed: None,
        }
    }

    /// Replace the known devices and the host default
    ///
    /// # Returns
    /// `true` when the active device changed
    pub fn update_devices(
        &mut self,
        devices: Vec<Arc<dyn OutputDevice>>,
        default_device: Option<Arc<dyn OutputDevice>>,
    ) -> bool {
        self.devices = devices;
        self.default_device = default_device;
        self.sync_active()
    }

    /// Set or clear the explicit selection
    ///
    /// # Returns
    /// `true` when the active device changed
    pub fn select(&mut self, selection: Option<String>) -> bool {
        self.selection = normalize_selection(selection);
        tracing::info!(selection = ?self.selection, "output device selection changed");
        self.sync_active()
    }

    /// Explicit selection, if any
    pub fn selection(&self) -> Option<&str> {
        self.selection.as_deref()
    }

    /// Selected device if present, else the default device
    pub fn active_device(&self) -> Option<Arc<dyn OutputDevice>> {
        self.selected_device().or_else(|| self.default_device.clone())
    }

    /// Host default output device
    pub fn default_device(&self) -> Option<&Arc<dyn OutputDevice>> {
        self.default_device.as_ref()
    }

    /// Known devices for publishing
    pub fn summaries(&self) -> Vec<DeviceSummary> {
        let default_id = self.default_device.as_ref().map(|d| d.id().to_string());
        self.devices
            .iter()
            .map(|d| DeviceSummary {
                id: d.id().to_string(),
                name: d.name().to_string(),
                is_default: default_id.as_deref() == Some(d.id()),
            })
            .collect()
    }

    /// Last format written to the active device
    pub fn last_applied(&self) -> Option<AppliedFormat> {
        self.last_applied
    }

    /// Rate of the last format written to the active device
    pub fn last_applied_rate(&self) -> Option<f64> {
        self.last_applied.map(|a| a.sample_rate)
    }

    /// Rate this process last wrote or confirmed on the active device
    ///
    /// Unlike [`last_applied_rate`](Self::last_applied_rate) this ignores
    /// rates observed from outside.
    pub fn committed_rate(&self) -> Option<f64> {
        self.committed
    }

    /// Record a nominal rate change made outside this process
    ///
    /// The committed rate is kept.
    ///
    /// # Returns
    /// `true` when the rate differs from the last-applied one
    pub fn observe_nominal_rate(&mut self, rate: f64) -> bool {
        if self
            .last_applied
            .is_some_and(|a| same_rate(a.sample_rate, rate))
        {
            return false;
        }
        tracing::info!(rate, "active device rate changed externally");
        self.last_applied = Some(AppliedFormat {
            sample_rate: rate,
            bit_depth: None,
        });
        true
    }

    /// Write a full physical format unless it is already applied
    ///
    /// # Returns
    /// `true` when the device was written
    pub fn apply_format(
        &mut self,
        device: &dyn OutputDevice,
        format: AudioFormat,
    ) -> Result<bool, DeviceError> {
        if let Some(last) = self.last_applied {
            if same_rate(last.sample_rate, format.sample_rate)
                && last.bit_depth == Some(format.bit_depth)
            {
                self.committed = Some(format.sample_rate);
                return Ok(false);
            }
        }

        device.set_physical_format(format)?;
        tracing::info!(device = device.name(), %format, "physical format applied");
        self.last_applied = Some(AppliedFormat {
            sample_rate: format.sample_rate,
            bit_depth: Some(format.bit_depth),
        });
        self.committed = Some(format.sample_rate);
        Ok(true)
    }

    /// Write the nominal sample rate unless it equals the last-applied rate
    ///
    /// # Returns
    /// `true` when the device was written
    pub fn apply_sample_rate(
        &mut self,
        device: &dyn OutputDevice,
        rate: f64,
    ) -> Result<bool, DeviceError> {
        if self
            .last_applied_rate()
            .is_some_and(|last| same_rate(last, rate))
        {
            self.committed = Some(rate);
            return Ok(false);
        }

        device.set_nominal_sample_rate(rate)?;
        tracing::info!(device = device.name(), rate, "nominal sample rate applied");
        self.last_applied = Some(AppliedFormat {
            sample_rate: rate,
            bit_depth: None,
        });
        self.committed = Some(rate);
        Ok(true)
    }

    fn selected_device(&self) -> Option<Arc<dyn OutputDevice>> {
        let needle = self.selection.as_deref()?;
        let found = self
            .devices
            .iter()
            .find(|d| matches_device_name(d.name(), needle))
            .cloned();
        if found.is_none() {
            tracing::debug!(selection = needle, "selected device not present, using default");
        }
        found
    }

    /// Forget applied and committed rates when the active device changes
    fn sync_active(&mut self) -> bool {
        let active_id = self.active_device().map(|d| d.id().to_string());
        if active_id == self.active_id {
            return false;
        }
        tracing::info!(from = ?self.active_id, to = ?active_id, "active output device changed");
        self.active_id = active_id;
        self.last_applied = None;
        self.committed = None;
        true
    }
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self::new(None)
    }
}

fn normalize_selection(selection: Option<String>) -> Option<String> {
    selection.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct TestDevice {
        id: String,
        writes: Mutex<Vec<String>>,
    }

    impl TestDevice {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                writes: Mutex::new(Vec::new()),
            })
        }
    }

    impl OutputDevice for TestDevice {
        fn id(&self) -> &str {
            &self.id
        }
        fn name(&self) -> &str {
            &self.id
        }
        fn nominal_sample_rate(&self) -> Result<f64, DeviceError> {
            Ok(44100.0)
        }
        fn supported_sample_rates(&self) -> Result<Vec<f64>, DeviceError> {
            Ok(vec![44100.0, 96000.0])
        }
        fn output_stream_formats(&self) -> Option<Vec<AudioFormat>> {
            None
        }
        fn set_nominal_sample_rate(&self, rate: f64) -> Result<(), DeviceError> {
            self.writes.lock().unwrap().push(format!("rate {rate}"));
            Ok(())
        }
        fn set_physical_format(&self, format: AudioFormat) -> Result<(), DeviceError> {
            self.writes.lock().unwrap().push(format!("format {format}"));
            Ok(())
        }
    }

    fn context_with(devices: &[Arc<TestDevice>], default: usize) -> DeviceContext {
        let mut ctx = DeviceContext::default();
        let list: Vec<Arc<dyn OutputDevice>> = devices
            .iter()
            .map(|d| d.clone() as Arc<dyn OutputDevice>)
            .collect();
        ctx.update_devices(list, Some(devices[default].clone()));
        ctx
    }

    #[test]
    fn test_active_is_default_without_selection() {
        let speakers = TestDevice::new("Speakers");
        let dac = TestDevice::new("USB DAC");
        let ctx = context_with(&[speakers, dac], 0);
        assert_eq!(ctx.active_device().unwrap().id(), "Speakers");
    }

    #[test]
    fn test_selection_overrides_default() {
        let speakers = TestDevice::new("Speakers");
        let dac = TestDevice::new("USB DAC");
        let mut ctx = context_with(&[speakers, dac], 0);
        assert!(ctx.select(Some("dac".to_string())));
        assert_eq!(ctx.active_device().unwrap().id(), "USB DAC");

        assert!(ctx.select(None));
        assert_eq!(ctx.active_device().unwrap().id(), "Speakers");
    }

    #[test]
    fn test_missing_selection_falls_back_to_default() {
        let speakers = TestDevice::new("Speakers");
        let mut ctx = context_with(&[speakers], 0);
        assert!(!ctx.select(Some("Headphones".to_string())));
        assert_eq!(ctx.active_device().unwrap().id(), "Speakers");
    }

    #[test]
    fn test_blank_selection_is_none() {
        let mut ctx = DeviceContext::new(Some("   ".to_string()));
        assert_eq!(ctx.selection(), None);
        ctx.select(Some(" DAC ".to_string()));
        assert_eq!(ctx.selection(), Some("DAC"));
    }

    #[test]
    fn test_no_devices() {
        let ctx = DeviceContext::default();
        assert!(ctx.active_device().is_none());
        assert!(ctx.summaries().is_empty());
    }

    #[test]
    fn test_apply_sample_rate_deduplicates() {
        let dac = TestDevice::new("DAC");
        let mut ctx = context_with(&[dac.clone()], 0);

        assert!(ctx.apply_sample_rate(dac.as_ref(), 96000.0).unwrap());
        assert!(!ctx.apply_sample_rate(dac.as_ref(), 96000.0).unwrap());
        assert!(ctx.apply_sample_rate(dac.as_ref(), 44100.0).unwrap());
        assert_eq!(dac.writes.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_apply_format_deduplicates_on_rate_and_depth() {
        let dac = TestDevice::new("DAC");
        let mut ctx = context_with(&[dac.clone()], 0);

        assert!(ctx.apply_format(dac.as_ref(), AudioFormat::new(96000.0, 24)).unwrap());
        assert!(!ctx.apply_format(dac.as_ref(), AudioFormat::new(96000.0, 24)).unwrap());
        assert!(ctx.apply_format(dac.as_ref(), AudioFormat::new(96000.0, 16)).unwrap());
        assert_eq!(dac.writes.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_device_switch_forgets_last_applied() {
        let speakers = TestDevice::new("Speakers");
        let dac = TestDevice::new("DAC");
        let mut ctx = context_with(&[speakers.clone(), dac], 0);
        ctx.apply_sample_rate(speakers.as_ref(), 96000.0).unwrap();
        assert_eq!(ctx.last_applied_rate(), Some(96000.0));
        assert_eq!(ctx.committed_rate(), Some(96000.0));

        ctx.select(Some("DAC".to_string()));
        assert_eq!(ctx.last_applied_rate(), None);
        assert_eq!(ctx.committed_rate(), None);
    }

    #[test]
    fn test_observed_rate_replaces_last_applied() {
        let dac = TestDevice::new("DAC");
        let mut ctx = context_with(&[dac.clone()], 0);
        ctx.apply_format(dac.as_ref(), AudioFormat::new(96000.0, 24)).unwrap();

        assert!(!ctx.observe_nominal_rate(96000.0));
        assert!(ctx.observe_nominal_rate(44100.0));
        assert_eq!(
            ctx.last_applied(),
            Some(AppliedFormat {
                sample_rate: 44100.0,
                bit_depth: None
            })
        );

        assert_eq!(ctx.committed_rate(), Some(96000.0));

        // Writing 96k again is no longer suppressed
        assert!(ctx.apply_sample_rate(dac.as_ref(), 96000.0).unwrap());
    }

    #[test]
    fn test_external_rate_does_not_move_committed_rate() {
        let dac = TestDevice::new("DAC");
        let mut ctx = context_with(&[dac.clone()], 0);
        ctx.apply_sample_rate(dac.as_ref(), 96000.0).unwrap();

        assert!(ctx.observe_nominal_rate(192000.0));
        assert_eq!(ctx.last_applied_rate(), Some(192000.0));
        assert_eq!(ctx.committed_rate(), Some(96000.0));

        assert!(ctx.apply_sample_rate(dac.as_ref(), 96000.0).unwrap());
        assert_eq!(ctx.committed_rate(), Some(96000.0));
        assert_eq!(dac.writes.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_confirmed_rate_is_committed() {
        let dac = TestDevice::new("DAC");
        let mut ctx = context_with(&[dac.clone()], 0);
        ctx.observe_nominal_rate(44100.0);
        assert_eq!(ctx.committed_rate(), None);

        // Already on the device: no write, but now ours
        assert!(!ctx.apply_sample_rate(dac.as_ref(), 44100.0).unwrap());
        assert_eq!(ctx.committed_rate(), Some(44100.0));
        assert!(dac.writes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_summaries_mark_default() {
        let speakers = TestDevice::new("Speakers");
        let dac = TestDevice::new("DAC");
        let ctx = context_with(&[speakers, dac], 1);
        let summaries = ctx.summaries();
        assert_eq!(summaries.len(), 2);
        assert!(!summaries[0].is_default);
        assert!(summaries[1].is_default);
    }
}
