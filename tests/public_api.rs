use ble_joystick::config::types::{Config, Preset};
use ble_joystick::device::codec::{Decoder, FrameCodec};
use ble_joystick::device::controller::Controller;
use ble_joystick::device::types::{Field, Fields, PeripheralId, Telemetry};
use ble_joystick::error::DecodeError;

#[test]
fn joystick_frame_decodes_to_a_pressed_button() {
    let fields = FrameCodec::joystick().decode(&[0x00, 0x80, 0xff, 0xff, 0x00]).unwrap();

    let mut telemetry = Telemetry::default();
    telemetry.apply(&fields);

    assert_eq!((telemetry.axis_x, telemetry.axis_y, telemetry.button), (0x8000, 0xffff, 0));
    assert!(telemetry.button_pressed());
}

#[test]
fn partial_frames_only_touch_their_fields() {
    let fields = FrameCodec::x_axis().decode(&[0x34, 0x12]).unwrap();
    assert_eq!(fields, Fields { axis_x: Some(0x1234), axis_y: None, button: None });

    let mut telemetry = Telemetry::default();
    telemetry.apply(&fields);
    assert_eq!(telemetry.axis_y, 32768);
    assert!(!telemetry.button_pressed());
}

#[test]
fn short_frames_are_rejected() {
    assert_eq!(
        FrameCodec::y_button().decode(&[0x01, 0x02]),
        Err(DecodeError::LengthMismatch { expected: 3, actual: 2 }),
    );
}

#[test]
fn custom_layouts_are_built_from_config() {
    let mut config = Config::preset(Preset::PicoPair);
    config.peripherals[1].layout = vec![Field::AxisX];

    let subscriptions = config.subscriptions().unwrap();
    assert_eq!(subscriptions[1].decoder.fields(), &[Field::AxisX]);
}

#[test]
fn idle_controller_reports_defaults() {
    let mut controller = Controller::new(Config::preset(Preset::PicoPair)).unwrap();

    let state = controller.get_state();
    assert_eq!((state.axis_x, state.axis_y, state.button_pressed), (32768, 32768, false));
    assert_eq!(state.peripherals.len(), 2);
    assert!(!controller.is_connected());
    assert!(!controller.snapshot(PeripheralId(7)).connected);

    controller.stop();
    assert!(!controller.is_running());
}
