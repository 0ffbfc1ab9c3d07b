//! Mock driver for testing without hardware.
//!
//! [`MockLoader`] and the driver instances it hands out let the full
//! controller lifecycle run in CI: negotiation, buffer creation, buffer
//! switches, and out-of-band messages are all driven from the test through
//! a [`MockDriverHandle`].

use std::sync::{Arc, Mutex};

use super::{
    BufferRequest, BufferSizes, ChannelDescriptor, Driver, DriverCallError, DriverCallbacks,
    DriverDescriptor, DriverLoader, IoFormat, RtServices, SampleType, TimeInfo, TimeInfoFlags,
};
use crate::buffer::BufferView;
use crate::format::AudioFormat;

const STATUS_NOT_PRESENT: i32 = -1000;
const STATUS_INVALID_PARAMETER: i32 = -998;
const STATUS_INVALID_MODE: i32 = -997;
const STATUS_NO_CLOCK: i32 = -995;

/// Behavior of a mock driver instance.
#[derive(Debug, Clone)]
pub struct MockDriverConfig {
    /// Display name reported by the loader.
    pub name: String,
    /// Input channel count.
    pub inputs: u32,
    /// Output channel count.
    pub outputs: u32,
    /// Sample layout of every channel.
    pub sample_type: SampleType,
    /// Buffer size bounds.
    pub sizes: BufferSizes,
    /// Sample rates the driver accepts.
    pub supported_rates: Vec<f64>,
    /// Rate reported before any negotiation.
    pub initial_rate: f64,
    /// Whether the driver wants output-ready notifications.
    pub supports_output_ready: bool,
    /// Whether the driver can switch to DSD transport.
    pub supports_dsd: bool,
}

impl Default for MockDriverConfig {
    fn default() -> Self {
        Self {
            name: "Mock Driver".to_string(),
            inputs: 2,
            outputs: 2,
            sample_type: SampleType::Int32Lsb,
            sizes: BufferSizes {
                min: 64,
                max: 4096,
                preferred: 256,
                granularity: 64,
            },
            supported_rates: vec![44_100.0, 48_000.0, 88_200.0, 96_000.0],
            initial_rate: 48_000.0,
            supports_output_ready: true,
            supports_dsd: false,
        }
    }
}

/// Shared state behind both the [`Driver`] instance and the test handle.
struct MockState {
    config: MockDriverConfig,
    rate: f64,
    io_format: IoFormat,
    callbacks: Option<Arc<dyn DriverCallbacks>>,
    /// Double buffers of the created output channels, in request order.
    output_buffers: Vec<[Vec<u8>; 2]>,
    created_frames: u32,
    started: bool,
    position: i64,
    switch_count: u64,
    init_calls: u32,
    dispose_calls: u32,
    start_calls: u32,
    stop_calls: u32,
    output_ready_calls: u32,
}

impl MockState {
    fn new(config: MockDriverConfig) -> Self {
        let rate = config.initial_rate;
        Self {
            config,
            rate,
            io_format: IoFormat::Pcm,
            callbacks: None,
            output_buffers: Vec::new(),
            created_frames: 0,
            started: false,
            position: 0,
            switch_count: 0,
            init_calls: 0,
            dispose_calls: 0,
            start_calls: 0,
            stop_calls: 0,
            output_ready_calls: 0,
        }
    }

    fn bytes_per_channel_buffer(&self, frames: u32) -> usize {
        let format = AudioFormat::from(self.config.sample_type);
        (frames as usize * format.bytes_per_packet as usize) / format.frames_per_packet as usize
    }

    /// Runs one buffer switch against the installed callbacks.
    fn pump_once(&mut self, with_time: bool) {
        let Some(callbacks) = self.callbacks.clone() else {
            return;
        };
        if !self.started {
            return;
        }

        let index = (self.switch_count % 2) as usize;
        let frames = i64::from(self.created_frames);
        let system_time = (self.position as f64 / self.rate * 1e9) as i64;

        let mut rt = MockRt {
            position: self.position,
            system_time,
            ready_calls: 0,
        };

        let mut views: Vec<BufferView<'_, u8>> = self
            .output_buffers
            .iter_mut()
            .map(|halves| BufferView::new(&mut halves[index], 1))
            .collect();

        if with_time {
            let time = TimeInfo {
                system_time,
                sample_position: self.position,
                flags: TimeInfoFlags::SYSTEM_TIME_VALID | TimeInfoFlags::SAMPLE_POSITION_VALID,
            };
            callbacks.buffer_switch_time_info(&mut rt, &time, &mut views, index, true);
        } else {
            callbacks.buffer_switch(&mut rt, &mut views, index, true);
        }
        drop(views);

        self.output_ready_calls += rt.ready_calls;
        self.position += frames;
        self.switch_count += 1;
    }
}

/// Driver-side view of the switch-time services.
struct MockRt {
    position: i64,
    system_time: i64,
    ready_calls: u32,
}

impl RtServices for MockRt {
    fn sample_position(&mut self) -> Result<(i64, i64), DriverCallError> {
        Ok((self.position, self.system_time))
    }

    fn output_ready(&mut self) -> Result<(), DriverCallError> {
        self.ready_calls += 1;
        Ok(())
    }
}

/// The [`Driver`] instance a [`MockLoader`] hands to the controller.
struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl Driver for MockDriver {
    fn init(&mut self, protocol_version: u32) -> Result<(), DriverCallError> {
        if protocol_version != super::PROTOCOL_VERSION {
            return Err(DriverCallError::new(STATUS_INVALID_PARAMETER));
        }
        let mut state = self.state.lock().unwrap();
        state.init_calls += 1;
        Ok(())
    }

    fn output_ready(&mut self) -> Result<(), DriverCallError> {
        let state = self.state.lock().unwrap();
        if state.config.supports_output_ready {
            Ok(())
        } else {
            Err(DriverCallError::new(STATUS_NOT_PRESENT))
        }
    }

    fn channel_counts(&mut self) -> Result<(u32, u32), DriverCallError> {
        let state = self.state.lock().unwrap();
        Ok((state.config.inputs, state.config.outputs))
    }

    fn buffer_sizes(&mut self) -> Result<BufferSizes, DriverCallError> {
        Ok(self.state.lock().unwrap().config.sizes)
    }

    fn create_buffers(
        &mut self,
        requests: &[BufferRequest],
        frames: u32,
        callbacks: Arc<dyn DriverCallbacks>,
    ) -> Result<(), DriverCallError> {
        let mut state = self.state.lock().unwrap();

        for request in requests {
            let limit = if request.is_input {
                state.config.inputs
            } else {
                state.config.outputs
            };
            if request.channel >= limit {
                return Err(DriverCallError::new(STATUS_INVALID_PARAMETER));
            }
        }

        let bytes = state.bytes_per_channel_buffer(frames);
        state.output_buffers = requests
            .iter()
            .filter(|request| !request.is_input)
            .map(|_| [vec![0u8; bytes], vec![0u8; bytes]])
            .collect();
        state.created_frames = frames;
        state.callbacks = Some(callbacks);
        Ok(())
    }

    fn dispose_buffers(&mut self) -> Result<(), DriverCallError> {
        let mut state = self.state.lock().unwrap();
        state.output_buffers.clear();
        state.callbacks = None;
        state.created_frames = 0;
        state.dispose_calls += 1;
        Ok(())
    }

    fn channel_descriptor(
        &mut self,
        channel: u32,
        is_input: bool,
    ) -> Result<ChannelDescriptor, DriverCallError> {
        let state = self.state.lock().unwrap();
        let limit = if is_input {
            state.config.inputs
        } else {
            state.config.outputs
        };
        if channel >= limit {
            return Err(DriverCallError::new(STATUS_INVALID_PARAMETER));
        }
        let direction = if is_input { "In" } else { "Out" };
        Ok(ChannelDescriptor {
            channel,
            is_input,
            sample_type: state.config.sample_type,
            name: format!("Mock {direction} {channel}"),
        })
    }

    fn latencies(&mut self) -> Result<(u32, u32), DriverCallError> {
        let state = self.state.lock().unwrap();
        if state.callbacks.is_none() {
            return Err(DriverCallError::new(STATUS_INVALID_MODE));
        }
        let preferred = state.config.sizes.preferred;
        Ok((preferred, 2 * preferred))
    }

    fn sample_position(&mut self) -> Result<(i64, i64), DriverCallError> {
        let state = self.state.lock().unwrap();
        let system_time = (state.position as f64 / state.rate * 1e9) as i64;
        Ok((state.position, system_time))
    }

    fn sample_rate(&mut self) -> Result<f64, DriverCallError> {
        Ok(self.state.lock().unwrap().rate)
    }

    fn set_sample_rate(&mut self, rate: f64) -> Result<(), DriverCallError> {
        let mut state = self.state.lock().unwrap();
        if state.config.supported_rates.contains(&rate) {
            state.rate = rate;
            Ok(())
        } else {
            Err(DriverCallError::new(STATUS_NO_CLOCK))
        }
    }

    fn can_sample_rate(&mut self, rate: f64) -> Result<(), DriverCallError> {
        let state = self.state.lock().unwrap();
        if state.config.supported_rates.contains(&rate) {
            Ok(())
        } else {
            Err(DriverCallError::new(STATUS_NO_CLOCK))
        }
    }

    fn start(&mut self) -> Result<(), DriverCallError> {
        let mut state = self.state.lock().unwrap();
        if state.callbacks.is_none() {
            return Err(DriverCallError::new(STATUS_INVALID_MODE));
        }
        state.started = true;
        state.start_calls += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverCallError> {
        let mut state = self.state.lock().unwrap();
        state.started = false;
        state.stop_calls += 1;
        Ok(())
    }

    fn io_format(&mut self) -> Result<IoFormat, DriverCallError> {
        Ok(self.state.lock().unwrap().io_format)
    }

    fn set_io_format(&mut self, format: IoFormat) -> Result<(), DriverCallError> {
        let mut state = self.state.lock().unwrap();
        if format == IoFormat::Dsd && !state.config.supports_dsd {
            return Err(DriverCallError::new(STATUS_NOT_PRESENT));
        }
        state.io_format = format;
        Ok(())
    }
}

/// Test-side handle onto a mock driver.
///
/// Lets a test play the roles the hardware would: driving buffer switches,
/// posting out-of-band messages, and inspecting what the controller did.
#[derive(Clone)]
pub struct MockDriverHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockDriverHandle {
    /// Runs `switches` buffer switches through the time-info callback form.
    pub fn pump(&self, switches: usize) {
        for _ in 0..switches {
            self.state.lock().unwrap().pump_once(true);
        }
    }

    /// Runs `switches` buffer switches through the legacy callback form.
    pub fn pump_legacy(&self, switches: usize) {
        for _ in 0..switches {
            self.state.lock().unwrap().pump_once(false);
        }
    }

    /// Posts an out-of-band message to the installed callbacks.
    ///
    /// Returns 0 when no callbacks are installed.
    pub fn send_message(&self, selector: i32, value: i32) -> i32 {
        let callbacks = self.state.lock().unwrap().callbacks.clone();
        callbacks.map_or(0, |callbacks| callbacks.message(selector, value))
    }

    /// Announces a sample rate change to the installed callbacks.
    pub fn send_sample_rate_change(&self, rate: f64) {
        let callbacks = self.state.lock().unwrap().callbacks.clone();
        if let Some(callbacks) = callbacks {
            callbacks.sample_rate_did_change(rate);
        }
    }

    /// Bytes currently in one half of an output channel's double buffer.
    pub fn output_bytes(&self, channel: usize, half: usize) -> Vec<u8> {
        self.state.lock().unwrap().output_buffers[channel][half].clone()
    }

    /// Whether the transport is running.
    pub fn is_started(&self) -> bool {
        self.state.lock().unwrap().started
    }

    /// Sample rate the driver currently runs at.
    pub fn current_rate(&self) -> f64 {
        self.state.lock().unwrap().rate
    }

    /// Number of `init` calls seen.
    pub fn init_calls(&self) -> u32 {
        self.state.lock().unwrap().init_calls
    }

    /// Number of `dispose_buffers` calls seen.
    pub fn dispose_calls(&self) -> u32 {
        self.state.lock().unwrap().dispose_calls
    }

    /// Number of `start` calls seen.
    pub fn start_calls(&self) -> u32 {
        self.state.lock().unwrap().start_calls
    }

    /// Number of `stop` calls seen.
    pub fn stop_calls(&self) -> u32 {
        self.state.lock().unwrap().stop_calls
    }

    /// Number of output-ready notifications seen during switches.
    pub fn output_ready_calls(&self) -> u32 {
        self.state.lock().unwrap().output_ready_calls
    }
}

/// Entry tracked by a [`MockLoader`].
struct MockEntry {
    name: String,
    state: Arc<Mutex<MockState>>,
}

/// A [`DriverLoader`] over mock drivers.
#[derive(Default)]
pub struct MockLoader {
    entries: Vec<MockEntry>,
}

impl MockLoader {
    /// Creates an empty loader. Enumeration reports nothing until drivers
    /// are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mock driver and returns its test handle.
    pub fn add(&mut self, config: MockDriverConfig) -> MockDriverHandle {
        let name = config.name.clone();
        let state = Arc::new(Mutex::new(MockState::new(config)));
        self.entries.push(MockEntry {
            name,
            state: Arc::clone(&state),
        });
        MockDriverHandle { state }
    }

    /// Convenience for the common one-driver setup.
    pub fn single(config: MockDriverConfig) -> (Self, MockDriverHandle) {
        let mut loader = Self::new();
        let handle = loader.add(config);
        (loader, handle)
    }
}

impl DriverLoader for MockLoader {
    fn enumerate(&self) -> Vec<DriverDescriptor> {
        self.entries
            .iter()
            .enumerate()
            .map(|(id, entry)| DriverDescriptor {
                name: entry.name.clone(),
                id: id as u32,
            })
            .collect()
    }

    fn instantiate(
        &self,
        descriptor: &DriverDescriptor,
    ) -> Result<Box<dyn Driver>, DriverCallError> {
        let entry = self
            .entries
            .get(descriptor.id as usize)
            .ok_or(DriverCallError::new(STATUS_NOT_PRESENT))?;
        Ok(Box::new(MockDriver {
            state: Arc::clone(&entry.state),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::PROTOCOL_VERSION;
    use super::*;

    fn create_driver() -> (Box<dyn Driver>, MockDriverHandle) {
        let (loader, handle) = MockLoader::single(MockDriverConfig::default());
        let descriptor = loader.enumerate().remove(0);
        let driver = loader.instantiate(&descriptor).unwrap();
        (driver, handle)
    }

    struct NullCallbacks;

    impl DriverCallbacks for NullCallbacks {
        fn buffer_switch(
            &self,
            _rt: &mut dyn RtServices,
            _outputs: &mut [BufferView<'_, u8>],
            _index: usize,
            _direct: bool,
        ) {
        }

        fn buffer_switch_time_info(
            &self,
            _rt: &mut dyn RtServices,
            _time: &TimeInfo,
            _outputs: &mut [BufferView<'_, u8>],
            _index: usize,
            _direct: bool,
        ) {
        }

        fn sample_rate_did_change(&self, _rate: f64) {}

        fn message(&self, _selector: i32, _value: i32) -> i32 {
            0
        }
    }

    #[test]
    fn test_enumerate_lists_registered_drivers() {
        let mut loader = MockLoader::new();
        assert!(loader.enumerate().is_empty());

        loader.add(MockDriverConfig::default());
        loader.add(MockDriverConfig {
            name: "Second".to_string(),
            ..Default::default()
        });

        let entries = loader.enumerate();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Mock Driver");
        assert_eq!(entries[1].name, "Second");
        assert_eq!(entries[1].id, 1);
    }

    #[test]
    fn test_init_rejects_wrong_protocol_version() {
        let (mut driver, _handle) = create_driver();
        assert!(driver.init(1).is_err());
        assert!(driver.init(PROTOCOL_VERSION).is_ok());
    }

    #[test]
    fn test_rate_negotiation() {
        let (mut driver, _handle) = create_driver();
        assert!(driver.can_sample_rate(44_100.0).is_ok());
        assert!(driver.can_sample_rate(11_025.0).is_err());

        driver.set_sample_rate(44_100.0).unwrap();
        assert_eq!(driver.sample_rate().unwrap(), 44_100.0);
    }

    #[test]
    fn test_start_requires_created_buffers() {
        let (mut driver, _handle) = create_driver();
        driver.init(PROTOCOL_VERSION).unwrap();
        assert!(driver.start().is_err());

        let requests = [
            BufferRequest {
                channel: 0,
                is_input: false,
            },
            BufferRequest {
                channel: 1,
                is_input: false,
            },
        ];
        driver
            .create_buffers(&requests, 256, Arc::new(NullCallbacks))
            .unwrap();
        assert!(driver.start().is_ok());
    }

    #[test]
    fn test_create_buffers_sizes_output_halves() {
        let (mut driver, handle) = create_driver();
        driver.init(PROTOCOL_VERSION).unwrap();
        let requests = [BufferRequest {
            channel: 0,
            is_input: false,
        }];
        driver
            .create_buffers(&requests, 128, Arc::new(NullCallbacks))
            .unwrap();

        // Int32Lsb is four bytes per frame.
        assert_eq!(handle.output_bytes(0, 0).len(), 512);
        assert_eq!(handle.output_bytes(0, 1).len(), 512);
    }

    #[test]
    fn test_latencies_invalid_before_create() {
        let (mut driver, _handle) = create_driver();
        driver.init(PROTOCOL_VERSION).unwrap();
        assert!(driver.latencies().is_err());
    }

    #[test]
    fn test_dsd_rejected_unless_supported() {
        let (mut driver, _handle) = create_driver();
        assert!(driver.set_io_format(IoFormat::Dsd).is_err());
        assert!(driver.set_io_format(IoFormat::Pcm).is_ok());

        let (loader, _handle) = MockLoader::single(MockDriverConfig {
            supports_dsd: true,
            ..Default::default()
        });
        let descriptor = loader.enumerate().remove(0);
        let mut dsd_driver = loader.instantiate(&descriptor).unwrap();
        assert!(dsd_driver.set_io_format(IoFormat::Dsd).is_ok());
        assert_eq!(dsd_driver.io_format().unwrap(), IoFormat::Dsd);
    }
}
