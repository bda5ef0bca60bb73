use std::collections::HashSet;

use crate::device::types::{Field, Fields};
use crate::error::{ConfigError, DecodeError};

/// Turns the raw bytes of one notification into typed fields.
pub trait Decoder: Send + Sync + 'static {
    fn decode(&self, bytes: &[u8]) -> Result<Fields, DecodeError>;

    /// Fields this decoder can produce.
    fn fields(&self) -> &[Field];
}

/// Fixed-length little-endian frame, laid out as the fields in the given order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCodec {
    layout: Vec<Field>,
    frame_len: usize,
}

impl FrameCodec {
    pub fn new(layout: Vec<Field>) -> Result<Self, ConfigError> {
        if layout.is_empty() {
            return Err(ConfigError::InvalidLayout { reason: String::from("layout has no fields") });
        }

        let mut seen = HashSet::new();
        for field in &layout {
            if !seen.insert(*field) {
                return Err(ConfigError::InvalidLayout {
                    reason: format!("field {} appears more than once", field),
                });
            }
        }

        let frame_len = layout.iter().map(Field::width).sum();
        Ok(FrameCodec { layout, frame_len })
    }

    /// `<HHB`: x, y, button
    pub fn joystick() -> Self {
        FrameCodec { layout: vec![Field::AxisX, Field::AxisY, Field::Button], frame_len: 5 }
    }

    /// `<HB`: y, button
    pub fn y_button() -> Self {
        FrameCodec { layout: vec![Field::AxisY, Field::Button], frame_len: 3 }
    }

    /// `<H`: x
    pub fn x_axis() -> Self {
        FrameCodec { layout: vec![Field::AxisX], frame_len: 2 }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }
}

impl Decoder for FrameCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Fields, DecodeError> {
        if bytes.len() != self.frame_len {
            return Err(DecodeError::LengthMismatch { expected: self.frame_len, actual: bytes.len() });
        }

        let mut fields = Fields::default();
        let mut offset = 0;

        for field in &self.layout {
            match field {
                Field::AxisX => fields.axis_x = Some(u16::from_le_bytes([bytes[offset], bytes[offset + 1]])),
                Field::AxisY => fields.axis_y = Some(u16::from_le_bytes([bytes[offset], bytes[offset + 1]])),
                Field::Button => fields.button = Some(bytes[offset]),
            }
            offset += field.width();
        }

        Ok(fields)
    }

    fn fields(&self) -> &[Field] {
        &self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_joystick_frame() {
        let codec = FrameCodec::joystick();
        let fields = codec.decode(&[100, 0, 200, 0, 0]).unwrap();

        assert_eq!(fields, Fields { axis_x: Some(100), axis_y: Some(200), button: Some(0) });
    }

    #[test]
    fn decodes_little_endian() {
        let codec = FrameCodec::x_axis();
        assert_eq!(codec.decode(&[0x34, 0x12]).unwrap().axis_x, Some(0x1234));
        assert_eq!(codec.decode(&[0xFF, 0xFF]).unwrap().axis_x, Some(u16::MAX));
    }

    #[test]
    fn y_button_variant_leaves_x_untouched() {
        let codec = FrameCodec::y_button();
        let fields = codec.decode(&[0x00, 0x80, 0x01]).unwrap();

        assert_eq!(fields.axis_x, None);
        assert_eq!(fields.axis_y, Some(32768));
        assert_eq!(fields.button, Some(1));
    }

    #[test]
    fn rejects_wrong_length() {
        let codec = FrameCodec::joystick();

        assert_eq!(
            codec.decode(&[1, 2, 3]),
            Err(DecodeError::LengthMismatch { expected: 5, actual: 3 }),
        );
        assert!(codec.decode(&[]).is_err());
        assert!(codec.decode(&[0; 6]).is_err());
    }

    #[test]
    fn decoding_is_deterministic_over_the_value_domain() {
        let codec = FrameCodec::y_button();

        for y in (0..=u16::MAX).step_by(257) {
            for button in [0u8, 1, 127, 255] {
                let [lo, hi] = y.to_le_bytes();
                let frame = [lo, hi, button];
                let first = codec.decode(&frame).unwrap();
                assert_eq!(first, codec.decode(&frame).unwrap());
                assert_eq!(first.axis_y, Some(y));
                assert_eq!(first.button, Some(button));
            }
        }
    }

    #[test]
    fn custom_layout_matches_presets() {
        assert_eq!(FrameCodec::new(vec![Field::AxisX, Field::AxisY, Field::Button]).unwrap(), FrameCodec::joystick());
        assert_eq!(FrameCodec::new(vec![Field::AxisY, Field::Button]).unwrap(), FrameCodec::y_button());
        assert_eq!(FrameCodec::new(vec![Field::AxisX]).unwrap().frame_len(), 2);
    }

    #[test]
    fn invalid_layouts_are_rejected() {
        assert!(matches!(FrameCodec::new(vec![]), Err(ConfigError::InvalidLayout { .. })));
        assert!(matches!(
            FrameCodec::new(vec![Field::Button, Field::Button]),
            Err(ConfigError::InvalidLayout { .. }),
        ));
    }
}
