//! Integration tests for asio-output.
//!
//! The full controller lifecycle runs against the mock driver, so no audio
//! hardware is required. Tests that reach the running state serialize on a
//! process-wide lock because only one output may own the transport at a
//! time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use asio_output::driver::{selector, MockDriverConfig, MockDriverHandle, MockLoader, SampleType};
use asio_output::{
    AsioOutput, AudioFormat, ChannelLayout, DecodedStream, FormatKind, MockPlayer, OutputConfig,
    OutputError, OutputState, Player, RingBufferPlayer,
};

static LIFECYCLE: Mutex<()> = Mutex::new(());

fn lifecycle_guard() -> std::sync::MutexGuard<'static, ()> {
    LIFECYCLE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn pcm_decoder(rate: f64, channels: u32) -> DecodedStream {
    let format = AudioFormat {
        kind: FormatKind::Pcm,
        sample_rate: rate,
        channels_per_frame: channels,
        ..Default::default()
    };
    DecodedStream::new(format, ChannelLayout::channels(channels))
}

fn mock_output(
    config: MockDriverConfig,
    player: Arc<dyn Player>,
) -> (AsioOutput, MockDriverHandle) {
    let (loader, handle) = MockLoader::single(config);
    let output = AsioOutput::new(Box::new(loader), player, OutputConfig::default());
    (output, handle)
}

#[tokio::test]
async fn test_playback_lifecycle_with_ten_switches() {
    let _guard = lifecycle_guard();

    let player = Arc::new(MockPlayer::new());
    let (output, handle) = mock_output(MockDriverConfig::default(), Arc::clone(&player) as _);

    output.open().unwrap();
    let (ring_format, layout) = output
        .configure_for_decoder(&pcm_decoder(44_100.0, 2))
        .unwrap();
    player.set_ring_format(ring_format);
    assert_eq!(layout.channel_count(), 2);
    assert_eq!(ring_format.sample_rate, 44_100.0);

    output.start().unwrap();
    assert!(output.is_running());
    assert!(handle.is_started());

    handle.pump(10);
    assert_eq!(player.provide_calls(), vec![256; 10]);

    // Asynchronous stop: effective within one drain cycle.
    output.request_stop();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(!output.is_running());
    assert_eq!(output.state(), OutputState::Configured);
    assert!(!handle.is_started());
}

#[tokio::test]
async fn test_reset_under_overload() {
    let _guard = lifecycle_guard();

    let player = Arc::new(MockPlayer::new());
    let (output, handle) = mock_output(MockDriverConfig::default(), Arc::clone(&player) as _);

    output.open().unwrap();
    output
        .configure_for_decoder(&pcm_decoder(44_100.0, 2))
        .unwrap();
    output.start().unwrap();

    assert_eq!(handle.send_message(selector::OVERLOAD, 0), 1);
    assert_eq!(handle.send_message(selector::RESET_REQUEST, 0), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;

    // The overload was advisory; the reset ran exactly once: one stop, a
    // second dispose (the first was configuration cleanup), a second init.
    assert_eq!(handle.stop_calls(), 1);
    assert_eq!(handle.dispose_calls(), 2);
    assert_eq!(handle.init_calls(), 2);
    assert!(!handle.is_started());

    // Buffers are gone until the next decoder configuration.
    assert_eq!(output.state(), OutputState::Open);
    assert!(matches!(
        output.start(),
        Err(OutputError::StateViolation { .. })
    ));
}

#[tokio::test]
async fn test_repeated_reset_requests_collapse() {
    let _guard = lifecycle_guard();

    let player = Arc::new(MockPlayer::new());
    let (output, handle) = mock_output(MockDriverConfig::default(), Arc::clone(&player) as _);

    output.open().unwrap();
    output
        .configure_for_decoder(&pcm_decoder(44_100.0, 2))
        .unwrap();
    output.start().unwrap();

    assert_eq!(handle.send_message(selector::RESET_REQUEST, 0), 1);
    assert_eq!(handle.send_message(selector::RESET_REQUEST, 0), 1);
    assert_eq!(handle.send_message(selector::RESET_REQUEST, 0), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;

    // One effective reset for the whole burst.
    assert_eq!(handle.init_calls(), 2);
    assert_eq!(handle.stop_calls(), 1);
}

#[tokio::test]
async fn test_audio_flows_from_ring_to_driver_buffers() {
    let _guard = lifecycle_guard();

    let player = Arc::new(RingBufferPlayer::new());
    let (output, handle) = mock_output(
        MockDriverConfig {
            sample_type: SampleType::Int16Lsb,
            ..Default::default()
        },
        Arc::clone(&player) as _,
    );

    output.open().unwrap();
    let (ring_format, _) = output
        .configure_for_decoder(&pcm_decoder(44_100.0, 2))
        .unwrap();
    player.set_ring_format(ring_format);
    assert_eq!(ring_format.bytes_per_frame, 2);

    // 256 interleaved frames: ch0 counts up, ch1 counts down.
    let mut frames = Vec::new();
    for i in 0..256u16 {
        frames.extend_from_slice(&i.to_le_bytes());
        frames.extend_from_slice(&(0x8000 + i).to_le_bytes());
    }
    assert_eq!(player.write_frames(&frames), frames.len());

    output.start().unwrap();
    handle.pump(1);

    let mut expected_ch0 = Vec::new();
    let mut expected_ch1 = Vec::new();
    for i in 0..256u16 {
        expected_ch0.extend_from_slice(&i.to_le_bytes());
        expected_ch1.extend_from_slice(&(0x8000 + i).to_le_bytes());
    }
    assert_eq!(handle.output_bytes(0, 0), expected_ch0);
    assert_eq!(handle.output_bytes(1, 0), expected_ch1);

    output.stop().unwrap();
}

#[tokio::test]
async fn test_underrun_renders_silence() {
    let _guard = lifecycle_guard();

    let player = Arc::new(RingBufferPlayer::new());
    let (output, handle) = mock_output(
        MockDriverConfig {
            sample_type: SampleType::Int16Lsb,
            ..Default::default()
        },
        Arc::clone(&player) as _,
    );

    output.open().unwrap();
    let (ring_format, _) = output
        .configure_for_decoder(&pcm_decoder(44_100.0, 2))
        .unwrap();
    player.set_ring_format(ring_format);

    // Only 8 of 256 frames buffered.
    let mut frames = Vec::new();
    for _ in 0..8 {
        frames.extend_from_slice(&[0x11, 0x22, 0x33, 0x44]);
    }
    player.write_frames(&frames);

    output.start().unwrap();
    handle.pump(1);

    let ch0 = handle.output_bytes(0, 0);
    assert_eq!(&ch0[..16], [0x11, 0x22].repeat(8).as_slice());
    assert!(ch0[16..].iter().all(|&byte| byte == 0));

    output.stop().unwrap();
}

#[tokio::test]
async fn test_legacy_switch_form_and_output_ready() {
    let _guard = lifecycle_guard();

    let player = Arc::new(MockPlayer::new());
    let (output, handle) = mock_output(MockDriverConfig::default(), Arc::clone(&player) as _);

    output.open().unwrap();
    output
        .configure_for_decoder(&pcm_decoder(44_100.0, 2))
        .unwrap();
    output.start().unwrap();

    handle.pump_legacy(4);
    assert_eq!(player.provide_calls(), vec![256; 4]);
    // The driver asked for ready notifications; one per switch.
    assert_eq!(handle.output_ready_calls(), 4);

    output.stop().unwrap();
}

#[tokio::test]
async fn test_double_buffer_halves_alternate() {
    let _guard = lifecycle_guard();

    let player = Arc::new(MockPlayer::new());
    let (output, handle) = mock_output(MockDriverConfig::default(), Arc::clone(&player) as _);

    output.open().unwrap();
    output
        .configure_for_decoder(&pcm_decoder(44_100.0, 2))
        .unwrap();
    output.start().unwrap();

    // MockPlayer stamps each pull with its ordinal.
    handle.pump(2);
    assert!(handle.output_bytes(0, 0).iter().all(|&byte| byte == 1));
    assert!(handle.output_bytes(0, 1).iter().all(|&byte| byte == 2));

    output.stop().unwrap();
}

#[tokio::test]
async fn test_only_one_output_may_run() {
    let _guard = lifecycle_guard();

    let first_player = Arc::new(MockPlayer::new());
    let (first, _first_handle) =
        mock_output(MockDriverConfig::default(), Arc::clone(&first_player) as _);
    first.open().unwrap();
    first
        .configure_for_decoder(&pcm_decoder(44_100.0, 2))
        .unwrap();
    first.start().unwrap();

    let second_player = Arc::new(MockPlayer::new());
    let (second, _second_handle) =
        mock_output(MockDriverConfig::default(), Arc::clone(&second_player) as _);
    second.open().unwrap();
    second
        .configure_for_decoder(&pcm_decoder(44_100.0, 2))
        .unwrap();
    assert!(matches!(
        second.start(),
        Err(OutputError::StateViolation { .. })
    ));

    first.stop().unwrap();
    second.start().unwrap();
    second.stop().unwrap();
}

#[tokio::test]
async fn test_stop_and_restart() {
    let _guard = lifecycle_guard();

    let player = Arc::new(MockPlayer::new());
    let (output, handle) = mock_output(MockDriverConfig::default(), Arc::clone(&player) as _);

    output.open().unwrap();
    output
        .configure_for_decoder(&pcm_decoder(44_100.0, 2))
        .unwrap();

    output.start().unwrap();
    handle.pump(2);
    output.stop().unwrap();
    assert_eq!(output.state(), OutputState::Configured);

    output.start().unwrap();
    handle.pump(3);
    output.stop().unwrap();

    assert_eq!(player.provide_calls().len(), 5);
}

#[tokio::test]
async fn test_reconfigure_after_reset() {
    let _guard = lifecycle_guard();

    let player = Arc::new(MockPlayer::new());
    let (output, handle) = mock_output(MockDriverConfig::default(), Arc::clone(&player) as _);

    output.open().unwrap();
    output
        .configure_for_decoder(&pcm_decoder(44_100.0, 2))
        .unwrap();
    output.start().unwrap();

    output.reset().unwrap();
    assert_eq!(output.state(), OutputState::Open);

    // A fresh configuration brings the controller back to startable state.
    output
        .configure_for_decoder(&pcm_decoder(48_000.0, 2))
        .unwrap();
    output.start().unwrap();
    handle.pump(1);
    assert_eq!(player.provide_calls(), vec![256]);
    output.stop().unwrap();
}

#[tokio::test]
async fn test_close_while_running_releases_ownership() {
    let _guard = lifecycle_guard();

    let player = Arc::new(MockPlayer::new());
    let (output, handle) = mock_output(MockDriverConfig::default(), Arc::clone(&player) as _);
    output.open().unwrap();
    output
        .configure_for_decoder(&pcm_decoder(44_100.0, 2))
        .unwrap();
    output.start().unwrap();

    assert!(output.close());
    assert!(!handle.is_started());
    assert_eq!(output.state(), OutputState::Closed);

    // Ownership was released: another output may run.
    let other_player = Arc::new(MockPlayer::new());
    let (other, _other_handle) =
        mock_output(MockDriverConfig::default(), Arc::clone(&other_player) as _);
    other.open().unwrap();
    other
        .configure_for_decoder(&pcm_decoder(44_100.0, 2))
        .unwrap();
    other.start().unwrap();
    other.stop().unwrap();
}
