//! Binary frame encoder for the robot controller.
//!
//! Every frame is a tag byte followed by fixed-width fields, packed without
//! padding. Multi-byte integers and floats are little-endian (the AVR
//! controller's native order). Values that do not fit their wire width are
//! rejected here so nothing out of range ever reaches the serial line.

use crate::error::{Result, TunerError};
use crate::globals::GlobalConfig;
use crate::schema::{FieldSource, Field, FrameKind, FrameLayout, ProtocolVersion, Value, Wire};
use crate::stage::{IndexedStage, PidGains, StageRecord};

/// Encode `source` into the given frame layout.
pub fn encode(layout: &FrameLayout, source: &impl FieldSource) -> Result<Vec<u8>> {
    let mut buf: Vec<u8> = Vec::with_capacity(layout.len());
    buf.push(layout.tag());
    for &(field, wire) in layout.fields {
        let value = source.value(field).ok_or(TunerError::EncodingRange {
            field: field.name(),
            value: "<unset>".to_string(),
            wire,
        })?;
        put_field(&mut buf, field, wire, value)?;
    }
    debug_assert_eq!(buf.len(), layout.len());
    Ok(buf)
}

/// Stage command frame (`c`) for `record` sent as stage `index`.
pub fn encode_stage(version: ProtocolVersion, index: usize, record: &StageRecord) -> Result<Vec<u8>> {
    let layout = layout_for(version, FrameKind::Stage)?;
    encode(layout, &IndexedStage { index, record })
}

/// Global parameters frame (`g`).
pub fn encode_globals(version: ProtocolVersion, config: &GlobalConfig) -> Result<Vec<u8>> {
    let layout = layout_for(version, FrameKind::Globals)?;
    encode(layout, config)
}

/// Live PID tuning frame (`d`). Only the legacy firmware accepts it.
pub fn encode_live_pid(version: ProtocolVersion, gains: &PidGains) -> Result<Vec<u8>> {
    let layout = layout_for(version, FrameKind::LivePid)?;
    encode(layout, gains)
}

fn layout_for(version: ProtocolVersion, kind: FrameKind) -> Result<&'static FrameLayout> {
    version.frame(kind).ok_or(TunerError::FrameUnsupported {
        tag: kind.tag() as char,
        version,
    })
}

fn put_field(buf: &mut Vec<u8>, field: Field, wire: Wire, value: Value) -> Result<()> {
    let out_of_range = || TunerError::EncodingRange {
        field: field.name(),
        value: value.to_string(),
        wire,
    };
    match (wire, value) {
        (Wire::F32, Value::Float(v)) if v.is_finite() => buf.extend_from_slice(&v.to_le_bytes()),
        (Wire::U8, Value::Int(v)) => buf.push(u8::try_from(v).map_err(|_| out_of_range())?),
        (Wire::I8, Value::Int(v)) => {
            let v = i8::try_from(v).map_err(|_| out_of_range())?;
            buf.extend_from_slice(&v.to_le_bytes());
        }
        (Wire::I16, Value::Int(v)) => {
            let v = i16::try_from(v).map_err(|_| out_of_range())?;
            buf.extend_from_slice(&v.to_le_bytes());
        }
        // enum index sent as its decimal character, e.g. 2 -> b'2'
        (Wire::Digit, Value::Int(v)) if (0..=9).contains(&v) => buf.push(b'0' + v as u8),
        _ => return Err(out_of_range()),
    }
    Ok(())
}

/// Render a frame as space-separated hex bytes for the operator.
pub fn to_hex(frame: &[u8]) -> String {
    frame.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{FollowMode, TerminationAction, TerminationCondition};

    fn f32_at(frame: &[u8], offset: usize) -> f32 {
        f32::from_le_bytes([frame[offset], frame[offset + 1], frame[offset + 2], frame[offset + 3]])
    }

    fn sample_record() -> StageRecord {
        StageRecord {
            follow_mode: FollowMode::EncoderDriven,
            termination: TerminationCondition::Intersection,
            termination_action: TerminationAction::Turn,
            left_amount: 10,
            right_amount: -5,
            speed: 80,
            turn_speed: 40,
            center_offset: 0,
            gains: PidGains::new(1.5, 0.2, 0.05),
            termination_clicks: 0,
        }
    }

    #[test]
    fn test_extended_stage_frame_layout() {
        let frame = encode_stage(ProtocolVersion::Extended, 7, &sample_record()).unwrap();
        assert_eq!(frame.len(), 22);
        assert_eq!(frame[0], b'c');
        assert_eq!(frame[1], 7);
        assert_eq!(&frame[2..10], &[1, 2, 1, 10, (-5i8) as u8, 80, 40, 0]);
        assert_eq!(f32_at(&frame, 10), 1.5);
        assert_eq!(f32_at(&frame, 14), 0.2);
        assert_eq!(f32_at(&frame, 18), 0.05);
    }

    #[test]
    fn test_stage_index_beyond_u8_rejected() {
        let err = encode_stage(ProtocolVersion::Extended, 300, &sample_record()).unwrap_err();
        match err {
            TunerError::EncodingRange { field, wire, .. } => {
                assert_eq!(field, "stage");
                assert_eq!(wire, Wire::U8);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_extended_amounts_must_fit_i8() {
        let record = StageRecord { left_amount: 128, ..sample_record() };
        assert!(matches!(
            encode_stage(ProtocolVersion::Extended, 0, &record),
            Err(TunerError::EncodingRange { field: "left_amount", .. })
        ));
        let record = StageRecord { speed: -1, ..sample_record() };
        assert!(matches!(
            encode_stage(ProtocolVersion::Extended, 0, &record),
            Err(TunerError::EncodingRange { field: "speed", .. })
        ));
    }

    #[test]
    fn test_non_finite_gain_rejected() {
        let record = StageRecord { gains: PidGains::new(f32::NAN, 0.0, 0.0), ..sample_record() };
        assert!(matches!(
            encode_stage(ProtocolVersion::Extended, 0, &record),
            Err(TunerError::EncodingRange { field: "p_gain", .. })
        ));
    }

    #[test]
    fn test_legacy_stage_frame_layout() {
        let record = StageRecord { left_amount: 300, right_amount: -2, ..sample_record() };
        let frame = encode_stage(ProtocolVersion::Legacy, 37, &record).unwrap();
        assert_eq!(frame.len(), 10);
        assert_eq!(&frame[..4], b"c121");
        assert_eq!(i16::from_le_bytes([frame[4], frame[5]]), 37);
        assert_eq!(i16::from_le_bytes([frame[6], frame[7]]), 300);
        assert_eq!(i16::from_le_bytes([frame[8], frame[9]]), -2);
    }

    #[test]
    fn test_legacy_amount_beyond_i16_rejected() {
        let record = StageRecord { right_amount: 40_000, ..sample_record() };
        assert!(matches!(
            encode_stage(ProtocolVersion::Legacy, 0, &record),
            Err(TunerError::EncodingRange { field: "right_amount", wire: Wire::I16, .. })
        ));
    }

    #[test]
    fn test_live_pid_frame() {
        let frame = encode_live_pid(ProtocolVersion::Legacy, &PidGains::new(2.0, 0.5, -0.25)).unwrap();
        assert_eq!(frame.len(), 13);
        assert_eq!(frame[0], b'd');
        assert_eq!(f32_at(&frame, 1), 2.0);
        assert_eq!(f32_at(&frame, 5), 0.5);
        assert_eq!(f32_at(&frame, 9), -0.25);
    }

    #[test]
    fn test_live_pid_not_in_extended_protocol() {
        let err = encode_live_pid(ProtocolVersion::Extended, &PidGains::default()).unwrap_err();
        assert!(matches!(err, TunerError::FrameUnsupported { tag: 'd', .. }));
    }

    #[test]
    fn test_globals_frames() {
        let config = GlobalConfig { start_position: 5, gains: Some(PidGains::new(1.0, 0.0, 0.5)) };
        let legacy = encode_globals(ProtocolVersion::Legacy, &config).unwrap();
        assert_eq!(legacy.len(), 15);
        assert_eq!(legacy[0], b'g');
        assert_eq!(f32_at(&legacy, 1), 1.0);
        assert_eq!(f32_at(&legacy, 9), 0.5);
        assert_eq!(i16::from_le_bytes([legacy[13], legacy[14]]), 5);

        let extended = encode_globals(ProtocolVersion::Extended, &config).unwrap();
        assert_eq!(extended, vec![b'g', 5]);
    }

    #[test]
    fn test_legacy_globals_need_gains() {
        let config = GlobalConfig { start_position: 1, gains: None };
        assert!(matches!(
            encode_globals(ProtocolVersion::Legacy, &config),
            Err(TunerError::EncodingRange { field: "p_gain", .. })
        ));
    }

    #[test]
    fn test_hex_rendering() {
        assert_eq!(to_hex(&[b'g', 5, 0xff]), "67 05 ff");
    }
}
