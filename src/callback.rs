//! Driver callback adapter.
//!
//! [`CallbackBridge`] is installed into the driver at buffer creation and
//! services the buffer switches. Its switch path is the hard real-time
//! section of the crate: no allocation, no locks another thread may hold,
//! no logging. It rebinds byte lengths on the driver's views, pulls one
//! switch worth of frames from the player, and optionally tells the driver
//! the output is ready.

use std::sync::Arc;

use crate::buffer::BufferView;
use crate::driver::{selector, DriverCallbacks, RtServices, TimeInfo, TimeInfoFlags};
use crate::events::{ControlEvent, EventSender};
use crate::player::Player;

/// Adapts driver callbacks onto the player's ring pull.
pub(crate) struct CallbackBridge {
    /// Frames per buffer switch, as negotiated.
    frames: u32,
    /// Bytes per frame of one ring channel.
    ring_bytes_per_frame: u32,
    /// Whether the driver asked for output-ready notifications.
    post_output: bool,
    player: Arc<dyn Player>,
    events: EventSender,
}

impl CallbackBridge {
    pub(crate) fn new(
        frames: u32,
        ring_bytes_per_frame: u32,
        post_output: bool,
        player: Arc<dyn Player>,
        events: EventSender,
    ) -> Self {
        Self {
            frames,
            ring_bytes_per_frame,
            post_output,
            player,
            events,
        }
    }
}

impl DriverCallbacks for CallbackBridge {
    fn buffer_switch(
        &self,
        rt: &mut dyn RtServices,
        outputs: &mut [BufferView<'_, u8>],
        index: usize,
        direct: bool,
    ) {
        // Legacy entry: synthesize the timing snapshot the preferred form
        // would have carried.
        let mut time = TimeInfo::default();
        if let Ok((sample_position, system_time)) = rt.sample_position() {
            time.sample_position = sample_position;
            time.system_time = system_time;
            time.flags = TimeInfoFlags::SYSTEM_TIME_VALID | TimeInfoFlags::SAMPLE_POSITION_VALID;
        }

        self.buffer_switch_time_info(rt, &time, outputs, index, direct);
    }

    fn buffer_switch_time_info(
        &self,
        rt: &mut dyn RtServices,
        _time: &TimeInfo,
        outputs: &mut [BufferView<'_, u8>],
        _index: usize,
        _direct: bool,
    ) {
        let byte_len = (self.frames * self.ring_bytes_per_frame) as usize;
        for view in outputs.iter_mut() {
            view.set_byte_len(byte_len.min(view.data().len()));
            view.set_channels(1);
        }

        self.player.provide_audio(outputs, self.frames);

        if self.post_output {
            let _ = rt.output_ready();
        }
    }

    fn sample_rate_did_change(&self, rate: f64) {
        tracing::info!(rate, "driver sample rate changed");
    }

    fn message(&self, selector: i32, value: i32) -> i32 {
        match selector {
            selector::SELECTOR_SUPPORTED => match value {
                selector::RESET_REQUEST
                | selector::ENGINE_VERSION
                | selector::RESYNC_REQUEST
                | selector::LATENCIES_CHANGED
                | selector::SUPPORTS_TIME_INFO
                | selector::SUPPORTS_TIME_CODE
                | selector::SUPPORTS_INPUT_MONITOR => 1,
                _ => 0,
            },

            selector::RESET_REQUEST => {
                // A dropped post is recovered by the driver re-requesting.
                let _ = self.events.post(ControlEvent::ResetNeeded);
                1
            }

            selector::OVERLOAD => {
                let _ = self.events.post(ControlEvent::Overload);
                1
            }

            selector::RESYNC_REQUEST
            | selector::LATENCIES_CHANGED
            | selector::SUPPORTS_TIME_INFO => 1,

            selector::ENGINE_VERSION => 2,

            _ => 0,
        }
    }
}
