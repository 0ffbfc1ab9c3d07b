//! Output controller.
//!
//! [`AsioOutput`] owns the driver lifecycle: it loads a driver, negotiates
//! buffer sizes, rate, and channel layout for a decoder, installs the
//! real-time callback bridge, and serves the transport controls. A
//! housekeeping task drains the driver's out-of-band control events (stop,
//! reset, overload) at a low frequency so the heavyweight reactions never
//! run on the audio thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::callback::CallbackBridge;
use crate::config::{DriverSelection, OutputConfig};
use crate::driver::{
    BufferRequest, BufferSizes, ChannelDescriptor, Driver, DriverCallError, DriverLoader, IoFormat,
    PROTOCOL_VERSION,
};
use crate::error::OutputError;
use crate::events::{self, ControlEvent, EventReceiver, EventSender, RecvError};
use crate::format::{AudioFormat, ChannelLayout};
use crate::player::{Decoder, Player};

/// The player's ring must hold at least this many switches worth of audio.
const RING_CAPACITY_SWITCHES: u32 = 4;

/// At most one live controller may own the transport at a time: driver
/// callbacks are process-wide, so the owner is too.
static ACTIVE_OUTPUT: AtomicBool = AtomicBool::new(false);

/// Lifecycle state of an [`AsioOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// No driver loaded.
    Closed,
    /// Driver loaded and initialized, no buffers.
    Open,
    /// Buffers created for a decoder; ready to start.
    Configured,
    /// Transport running; buffer switches are being serviced.
    Running,
}

/// Configuration negotiated with the driver.
///
/// Owned by the controller and mutated only outside the real-time callback;
/// between `start` and `stop` it is immutable.
#[derive(Debug, Default)]
struct DriverInfo {
    sizes: BufferSizes,
    input_latency: u32,
    output_latency: u32,
    sample_rate: f64,
    io_format: Option<IoFormat>,
    post_output: bool,
    input_channels: u32,
    output_channels: u32,
    /// Created buffer channels, inputs first. Input buffers are never
    /// created by this controller, so in practice these are the outputs.
    channels: Vec<ChannelDescriptor>,
}

struct Inner {
    loader: Box<dyn DriverLoader>,
    driver: Option<Box<dyn Driver>>,
    player: Arc<dyn Player>,
    config: OutputConfig,
    info: DriverInfo,
    state: OutputState,
    events: EventSender,
}

/// Audio output over an ASIO-style low-latency driver.
///
/// # Lifecycle
///
/// ```text
/// Closed --open()--> Open --configure_for_decoder()--> Configured --start()--> Running
///    ^                 |                                   |                     |
///    +---- close() ----+----------- close() ---------------+------ stop() ------+
/// ```
///
/// `reset` (driver-initiated or explicit) stops the transport and tears the
/// buffers down; the controller returns to `Open` and needs another
/// `configure_for_decoder` before it can start again.
///
/// Must be created inside a tokio runtime: construction spawns the
/// housekeeping task that drains driver control events.
pub struct AsioOutput {
    inner: Arc<Mutex<Inner>>,
    events: EventSender,
    housekeeping: JoinHandle<()>,
}

impl AsioOutput {
    /// Creates a controller over `loader`, feeding from `player`.
    pub fn new(loader: Box<dyn DriverLoader>, player: Arc<dyn Player>, config: OutputConfig) -> Self {
        let (sender, receiver) = events::channel(config.event_capacity);
        let drain_interval = config.drain_interval;

        let inner = Arc::new(Mutex::new(Inner {
            loader,
            driver: None,
            player,
            config,
            info: DriverInfo::default(),
            state: OutputState::Closed,
            events: sender.clone(),
        }));

        let housekeeping = tokio::spawn(run_housekeeping(
            Arc::downgrade(&inner),
            receiver,
            drain_interval,
        ));

        Self {
            inner,
            events: sender,
            housekeeping,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OutputState {
        self.inner.lock().unwrap().state
    }

    /// Whether the transport is running.
    pub fn is_running(&self) -> bool {
        self.state() == OutputState::Running
    }

    /// Enumerates, loads, and initializes a driver.
    ///
    /// Which driver is taken follows [`OutputConfig::driver`]. On failure
    /// the state remains `Closed`.
    pub fn open(&self) -> Result<(), OutputError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != OutputState::Closed {
            return Err(OutputError::StateViolation {
                operation: "open",
                state: inner.state,
            });
        }

        let entries = inner.loader.enumerate();
        if entries.is_empty() {
            tracing::error!("no drivers enumerated");
            return Err(OutputError::driver_unavailable("no drivers installed"));
        }

        let descriptor = match &inner.config.driver {
            DriverSelection::First => entries[0].clone(),
            DriverSelection::ByName(name) => entries
                .iter()
                .find(|entry| &entry.name == name)
                .cloned()
                .ok_or_else(|| {
                    tracing::error!(name = %name, "requested driver not in enumerated list");
                    OutputError::driver_unavailable(format!("driver {name:?} not found"))
                })?,
        };

        let mut driver = inner.loader.instantiate(&descriptor).map_err(|err| {
            tracing::error!(driver = %descriptor.name, code = err.code, "unable to instantiate driver");
            OutputError::driver_unavailable(format!(
                "instantiating {:?} failed with status {}",
                descriptor.name, err.code
            ))
        })?;

        driver.init(PROTOCOL_VERSION).map_err(|err| {
            tracing::error!(driver = %descriptor.name, code = err.code, "driver init failed");
            OutputError::driver_unavailable(format!(
                "init of {:?} failed with status {}",
                descriptor.name, err.code
            ))
        })?;

        // Determine whether to post output-ready notifications.
        inner.info.post_output = driver.output_ready().is_ok();
        inner.driver = Some(driver);
        inner.state = OutputState::Open;
        tracing::info!(driver = %descriptor.name, "driver opened");
        Ok(())
    }

    /// Disposes buffers, destroys the driver instance, and clears the
    /// negotiated state.
    ///
    /// Returns `false` once already closed.
    pub fn close(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(mut driver) = inner.driver.take() else {
            return false;
        };

        if inner.state == OutputState::Running {
            let _ = driver.stop();
            release_ownership();
        }
        let _ = driver.dispose_buffers();
        inner.info = DriverInfo::default();
        inner.state = OutputState::Closed;
        tracing::info!("driver closed");
        true
    }

    /// Negotiates driver buffers for a decoder's stream.
    ///
    /// Tears down any previously created buffers, switches the driver to the
    /// decoder's transport (PCM or DSD), applies the decoder's sample rate
    /// where the driver accepts it, creates the output double buffers, and
    /// sizes the player's ring. Returns the format the player's ring must
    /// adopt (derived from the first output channel) together with the
    /// decoder's channel layout.
    ///
    /// A rejected sample rate is logged and negotiation continues at the
    /// driver's own rate; the returned ring format carries the rate actually
    /// in effect. Use [`AsioOutput::set_device_sample_rate`] for a strict
    /// rate change.
    pub fn configure_for_decoder(
        &self,
        decoder: &dyn Decoder,
    ) -> Result<(AudioFormat, ChannelLayout), OutputError> {
        let mut inner = self.inner.lock().unwrap();
        if !matches!(inner.state, OutputState::Open | OutputState::Configured) {
            return Err(OutputError::StateViolation {
                operation: "configure_for_decoder",
                state: inner.state,
            });
        }

        let decoder_format = *decoder.format();
        let inner = &mut *inner;
        let driver = inner.driver.as_mut().ok_or(OutputError::StateViolation {
            operation: "configure_for_decoder",
            state: inner.state,
        })?;

        // Clean up whatever the previous decoder negotiated.
        let _ = driver.dispose_buffers();
        inner.info.channels.clear();

        let io_format = if decoder_format.is_dsd() {
            IoFormat::Dsd
        } else {
            IoFormat::Pcm
        };
        driver.set_io_format(io_format).map_err(|err| {
            tracing::error!(?io_format, code = err.code, "unable to set driver IO format");
            OutputError::format_unsupported(format!(
                "driver rejected {io_format:?} transport (status {})",
                err.code
            ))
        })?;

        // Best effort: a rate the driver cannot run at falls through to
        // whatever the driver negotiates, surfaced in the returned format.
        match driver.can_sample_rate(decoder_format.sample_rate) {
            Ok(()) => {
                driver
                    .set_sample_rate(decoder_format.sample_rate)
                    .map_err(|err| {
                        tracing::error!(
                            rate = decoder_format.sample_rate,
                            code = err.code,
                            "unable to set sample rate"
                        );
                        OutputError::DriverCall {
                            call: "setSampleRate",
                            code: err.code,
                        }
                    })?;
            }
            Err(err) => {
                tracing::warn!(
                    rate = decoder_format.sample_rate,
                    code = err.code,
                    "sample rate not supported, keeping driver rate"
                );
            }
        }

        inner.info.io_format = Some(driver.io_format().map_err(|err| {
            tracing::error!(code = err.code, "unable to read driver IO format");
            OutputError::DriverCall {
                call: "getIoFormat",
                code: err.code,
            }
        })?);
        inner.info.sample_rate = driver.sample_rate().map_err(|err| driver_call("getSampleRate", err))?;

        let (inputs, outputs) = driver
            .channel_counts()
            .map_err(|err| driver_call("getChannels", err))?;
        inner.info.input_channels = inputs;
        inner.info.output_channels = outputs;

        inner.info.sizes = driver
            .buffer_sizes()
            .map_err(|err| driver_call("getBufferSize", err))?;

        // Inputs are never rendered to; outputs are capped by the stream.
        let output_count = outputs.min(decoder_format.channels_per_frame);
        if output_count == 0 {
            tracing::error!("no output channels available");
            return Err(OutputError::format_unsupported("no output channels"));
        }

        // The ring carries the first output channel's wire format at the
        // negotiated rate, one buffer per rendered channel.
        let first_output = driver
            .channel_descriptor(0, false)
            .map_err(|err| driver_call("getChannelInfo", err))?;
        let mut ring_format = AudioFormat::from(first_output.sample_type);
        ring_format.sample_rate = inner.info.sample_rate;
        ring_format.channels_per_frame = output_count;

        let requests: Vec<BufferRequest> = (0..output_count)
            .map(|channel| BufferRequest {
                channel,
                is_input: false,
            })
            .collect();

        let bridge = Arc::new(CallbackBridge::new(
            inner.info.sizes.preferred,
            ring_format.bytes_per_frame,
            inner.info.post_output,
            Arc::clone(&inner.player),
            inner.events.clone(),
        ));
        driver
            .create_buffers(&requests, inner.info.sizes.preferred, bridge)
            .map_err(|err| {
                tracing::error!(code = err.code, "unable to create driver buffers");
                driver_call("createBuffers", err)
            })?;

        // Channel details; a failure here degrades the table, not the setup.
        inner.info.channels = Vec::with_capacity(requests.len());
        for request in &requests {
            match driver.channel_descriptor(request.channel, request.is_input) {
                Ok(descriptor) => inner.info.channels.push(descriptor),
                Err(err) => {
                    tracing::error!(
                        channel = request.channel,
                        code = err.code,
                        "unable to read channel information"
                    );
                    break;
                }
            }
        }

        // Latencies are only valid once buffers exist.
        match driver.latencies() {
            Ok((input_latency, output_latency)) => {
                inner.info.input_latency = input_latency;
                inner.info.output_latency = output_latency;
            }
            Err(err) => {
                tracing::error!(code = err.code, "unable to read driver latencies");
            }
        }

        // The ring must absorb several switches of scheduling jitter.
        let needed = RING_CAPACITY_SWITCHES * inner.info.sizes.preferred;
        if inner.player.ring_capacity() < needed {
            inner.player.set_ring_capacity(needed);
        }

        inner.state = OutputState::Configured;
        tracing::info!(
            io_format = ?inner.info.io_format,
            rate = inner.info.sample_rate,
            channels = output_count,
            frames = inner.info.sizes.preferred,
            "configured for decoder"
        );
        Ok((ring_format, decoder.channel_layout()))
    }

    /// Starts the transport.
    ///
    /// Requires a configured controller and no other live controller in the
    /// process.
    pub fn start(&self) -> Result<(), OutputError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != OutputState::Configured {
            return Err(OutputError::StateViolation {
                operation: "start",
                state: inner.state,
            });
        }
        if ACTIVE_OUTPUT
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::error!("another output is already running");
            return Err(OutputError::StateViolation {
                operation: "start",
                state: inner.state,
            });
        }

        let inner = &mut *inner;
        let Some(driver) = inner.driver.as_mut() else {
            release_ownership();
            return Err(OutputError::StateViolation {
                operation: "start",
                state: inner.state,
            });
        };
        if let Err(err) = driver.start() {
            release_ownership();
            tracing::error!(code = err.code, "driver start failed");
            return Err(driver_call("start", err));
        }

        inner.state = OutputState::Running;
        tracing::info!("transport started");
        Ok(())
    }

    /// Stops the transport synchronously.
    pub fn stop(&self) -> Result<(), OutputError> {
        self.inner.lock().unwrap().stop_transport()
    }

    /// Requests an asynchronous stop.
    ///
    /// Non-blocking from any thread; the housekeeping task performs the
    /// actual stop within one drain cycle.
    pub fn request_stop(&self) {
        let _ = self.events.post(ControlEvent::StopPlayback);
    }

    /// Stops the transport, tears the driver buffers down, and reinitializes
    /// the driver.
    ///
    /// The controller returns to `Open`; buffers stay absent until the next
    /// [`AsioOutput::configure_for_decoder`]. This is the recovery path the
    /// driver itself triggers through a reset request.
    pub fn reset(&self) -> Result<(), OutputError> {
        self.inner.lock().unwrap().reset_driver()
    }

    /// Reads the driver's current IO format.
    pub fn device_io_format(&self) -> Result<IoFormat, OutputError> {
        self.with_driver("device_io_format", |driver| {
            driver.io_format().map_err(|err| driver_call("getIoFormat", err))
        })
    }

    /// Switches the driver's IO format.
    pub fn set_device_io_format(&self, format: IoFormat) -> Result<(), OutputError> {
        self.with_driver("set_device_io_format", |driver| {
            driver
                .set_io_format(format)
                .map_err(|err| driver_call("setIoFormat", err))
        })
    }

    /// Reads the driver's current sample rate.
    pub fn device_sample_rate(&self) -> Result<f64, OutputError> {
        self.with_driver("device_sample_rate", |driver| {
            driver.sample_rate().map_err(|err| driver_call("getSampleRate", err))
        })
    }

    /// Sets the driver's sample rate, strictly.
    ///
    /// Unlike configuration, a rate the driver rejects surfaces as
    /// [`OutputError::RateUnsupported`].
    pub fn set_device_sample_rate(&self, rate: f64) -> Result<(), OutputError> {
        self.with_driver("set_device_sample_rate", |driver| {
            driver.can_sample_rate(rate).map_err(|err| {
                tracing::error!(rate, code = err.code, "sample rate not supported");
                OutputError::RateUnsupported { rate }
            })?;
            driver
                .set_sample_rate(rate)
                .map_err(|err| driver_call("setSampleRate", err))
        })
    }

    /// Frames per buffer switch, as negotiated.
    pub fn preferred_buffer_size(&self) -> u32 {
        self.inner.lock().unwrap().info.sizes.preferred
    }

    /// Input and output latencies in frames, valid once configured.
    pub fn latencies(&self) -> (u32, u32) {
        let inner = self.inner.lock().unwrap();
        (inner.info.input_latency, inner.info.output_latency)
    }

    /// Channels the driver reported as `(inputs, outputs)`, valid once
    /// configured.
    pub fn channel_counts(&self) -> (u32, u32) {
        let inner = self.inner.lock().unwrap();
        (inner.info.input_channels, inner.info.output_channels)
    }

    /// Descriptions of the created buffer channels, valid once configured.
    pub fn channel_descriptors(&self) -> Vec<ChannelDescriptor> {
        self.inner.lock().unwrap().info.channels.clone()
    }

    fn with_driver<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut (dyn Driver + '_)) -> Result<T, OutputError>,
    ) -> Result<T, OutputError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.state;
        match inner.driver.as_mut() {
            Some(driver) => f(driver.as_mut()),
            None => Err(OutputError::StateViolation { operation, state }),
        }
    }
}

impl Drop for AsioOutput {
    fn drop(&mut self) {
        self.housekeeping.abort();
        let mut inner = self.inner.lock().unwrap();
        if inner.state == OutputState::Running {
            if let Some(driver) = inner.driver.as_mut() {
                let _ = driver.stop();
            }
            release_ownership();
            inner.state = OutputState::Configured;
        }
    }
}

impl Inner {
    fn stop_transport(&mut self) -> Result<(), OutputError> {
        if self.state != OutputState::Running {
            return Err(OutputError::StateViolation {
                operation: "stop",
                state: self.state,
            });
        }

        let Some(driver) = self.driver.as_mut() else {
            return Err(OutputError::StateViolation {
                operation: "stop",
                state: self.state,
            });
        };
        driver.stop().map_err(|err| {
            tracing::error!(code = err.code, "driver stop failed");
            driver_call("stop", err)
        })?;

        release_ownership();
        self.state = OutputState::Configured;
        tracing::info!("transport stopped");
        Ok(())
    }

    fn reset_driver(&mut self) -> Result<(), OutputError> {
        if self.state == OutputState::Running {
            self.stop_transport()?;
        }

        let driver = self.driver.as_mut().ok_or(OutputError::StateViolation {
            operation: "reset",
            state: self.state,
        })?;

        let _ = driver.dispose_buffers();
        self.info.channels.clear();

        driver.init(PROTOCOL_VERSION).map_err(|err| {
            tracing::error!(code = err.code, "driver reinit failed");
            driver_call("init", err)
        })?;
        self.info.post_output = driver.output_ready().is_ok();

        // Buffers stay absent until the next decoder configuration.
        self.state = OutputState::Open;
        tracing::info!("driver reset");
        Ok(())
    }
}

fn driver_call(call: &'static str, err: DriverCallError) -> OutputError {
    OutputError::DriverCall {
        call,
        code: err.code,
    }
}

fn release_ownership() {
    ACTIVE_OUTPUT.store(false, Ordering::SeqCst);
}

/// Periodic drain of the driver's control events.
///
/// Runs until the controller is dropped. Events are handled in FIFO order;
/// repeated reset requests collapse to one reset per drain cycle, and a
/// truncated record abandons the cycle.
async fn run_housekeeping(
    inner: Weak<Mutex<Inner>>,
    mut receiver: EventReceiver,
    drain_interval: Duration,
) {
    let mut ticker = tokio::time::interval(drain_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };

        let mut reset_done = false;
        loop {
            match receiver.try_recv() {
                Ok(None) => break,

                Ok(Some(ControlEvent::StopPlayback)) => {
                    if let Err(err) = inner.lock().unwrap().stop_transport() {
                        tracing::debug!(%err, "stop request ignored");
                    }
                }

                Ok(Some(ControlEvent::ResetNeeded)) => {
                    if reset_done {
                        continue;
                    }
                    match inner.lock().unwrap().reset_driver() {
                        Ok(()) => reset_done = true,
                        Err(err) => tracing::error!(%err, "driver reset failed"),
                    }
                }

                Ok(Some(ControlEvent::Overload)) => {
                    tracing::info!("driver overload");
                }

                Err(RecvError::UnknownCode(code)) => {
                    tracing::warn!(code, "unknown control event, skipping");
                }

                Err(RecvError::Truncated) => {
                    tracing::error!("truncated control event, abandoning drain cycle");
                    break;
                }
            }
        }
    }
}
