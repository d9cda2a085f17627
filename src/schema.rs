//! Versioned field schema shared by the stores and the frame encoder.
//!
//! A protocol version fixes three things at once: how many stages the course
//! has, the positional field order of the text files, and the byte layout of
//! every frame. Nothing outside this module decides field order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Firmware protocol generation the tool talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// 38 stages, 5-field stage lines, global PID gains, live PID frame.
    Legacy,
    /// 40 stages, 12-field stage lines with per-stage motion and PID.
    Extended,
}

impl ProtocolVersion {
    pub fn stage_count(self) -> usize {
        match self {
            ProtocolVersion::Legacy => 38,
            ProtocolVersion::Extended => 40,
        }
    }

    /// Positional fields of one stage store line.
    pub fn stage_fields(self) -> &'static [Field] {
        match self {
            ProtocolVersion::Legacy => LEGACY_STAGE_FIELDS,
            ProtocolVersion::Extended => EXTENDED_STAGE_FIELDS,
        }
    }

    /// Positional fields of the global config line.
    pub fn global_fields(self) -> &'static [Field] {
        match self {
            ProtocolVersion::Legacy => LEGACY_GLOBAL_FIELDS,
            ProtocolVersion::Extended => EXTENDED_GLOBAL_FIELDS,
        }
    }

    /// Frame layout for `kind`, or None when this version has no such frame.
    pub fn frame(self, kind: FrameKind) -> Option<&'static FrameLayout> {
        match (self, kind) {
            (ProtocolVersion::Legacy, FrameKind::LivePid) => Some(&LEGACY_PID_FRAME),
            (ProtocolVersion::Legacy, FrameKind::Globals) => Some(&LEGACY_GLOBALS_FRAME),
            (ProtocolVersion::Legacy, FrameKind::Stage) => Some(&LEGACY_STAGE_FRAME),
            (ProtocolVersion::Extended, FrameKind::LivePid) => None,
            (ProtocolVersion::Extended, FrameKind::Globals) => Some(&EXTENDED_GLOBALS_FRAME),
            (ProtocolVersion::Extended, FrameKind::Stage) => Some(&EXTENDED_STAGE_FRAME),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::Legacy => write!(f, "legacy"),
            ProtocolVersion::Extended => write!(f, "extended"),
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" | "v1" => Ok(ProtocolVersion::Legacy),
            "extended" | "v5" => Ok(ProtocolVersion::Extended),
            other => Err(format!("unknown protocol version '{}'", other)),
        }
    }
}

/// Message kinds the receiver switches on by tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    LivePid,
    Globals,
    Stage,
}

impl FrameKind {
    pub fn tag(self) -> u8 {
        match self {
            FrameKind::LivePid => b'd',
            FrameKind::Globals => b'g',
            FrameKind::Stage => b'c',
        }
    }
}

/// Every named value that can appear in a file line or a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    StageIndex,
    FollowMode,
    Termination,
    Action,
    LeftAmount,
    RightAmount,
    Speed,
    TurnSpeed,
    CenterOffset,
    PGain,
    IGain,
    DGain,
    TerminationClicks,
    StartPosition,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::StageIndex => "stage",
            Field::FollowMode => "follow_mode",
            Field::Termination => "termination",
            Field::Action => "termination_action",
            Field::LeftAmount => "left_amount",
            Field::RightAmount => "right_amount",
            Field::Speed => "speed",
            Field::TurnSpeed => "turn_speed",
            Field::CenterOffset => "center_offset",
            Field::PGain => "p_gain",
            Field::IGain => "i_gain",
            Field::DGain => "d_gain",
            Field::TerminationClicks => "termination_clicks",
            Field::StartPosition => "start_position",
        }
    }

    pub fn kind(self) -> Kind {
        match self {
            Field::PGain | Field::IGain | Field::DGain => Kind::Float,
            _ => Kind::Int,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Int,
    Float,
}

/// On-the-wire representation of one frame field. Multi-byte values are
/// little-endian, floats are IEEE-754 binary32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wire {
    U8,
    I8,
    I16,
    F32,
    /// Single ASCII decimal digit '0'..='9'.
    Digit,
}

impl Wire {
    pub fn width(self) -> usize {
        match self {
            Wire::U8 | Wire::I8 | Wire::Digit => 1,
            Wire::I16 => 2,
            Wire::F32 => 4,
        }
    }
}

impl fmt::Display for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Wire::U8 => "u8",
            Wire::I8 => "i8",
            Wire::I16 => "i16",
            Wire::F32 => "f32",
            Wire::Digit => "ascii digit",
        };
        write!(f, "{}", s)
    }
}

/// A field value as it travels between records, files and frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f32),
}

impl Value {
    /// Parse one whitespace-separated token according to the field kind.
    pub fn parse(kind: Kind, token: &str) -> Option<Value> {
        match kind {
            Kind::Int => token.parse::<i64>().ok().map(Value::Int),
            Kind::Float => token.parse::<f32>().ok().map(Value::Float),
        }
    }
}

impl fmt::Display for Value {
    // f32 Display is the shortest string that parses back to the same bits
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Read access to named fields, used by the line writer and the encoder.
pub trait FieldSource {
    fn value(&self, field: Field) -> Option<Value>;
}

/// Write access to named fields, used by the line parser.
pub trait FieldSink {
    fn set_value(&mut self, field: Field, value: Value) -> Result<(), String>;
}

/// Render `fields` of `source` as one whitespace-separated line (no newline).
/// Returns the name of the first field the source cannot supply.
pub fn format_line(fields: &[Field], source: &impl FieldSource) -> Result<String, &'static str> {
    let mut tokens = Vec::with_capacity(fields.len());
    for &field in fields {
        let value = source.value(field).ok_or(field.name())?;
        tokens.push(value.to_string());
    }
    Ok(tokens.join(" "))
}

/// Parse one positional line into `sink`.
pub fn parse_line(fields: &[Field], line: &str, sink: &mut impl FieldSink) -> Result<(), String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != fields.len() {
        return Err(format!("expected {} fields, found {}", fields.len(), tokens.len()));
    }
    for (&field, token) in fields.iter().zip(tokens) {
        let value = Value::parse(field.kind(), token)
            .ok_or_else(|| format!("{} '{}' is not a valid {:?}", field.name(), token, field.kind()))?;
        sink.set_value(field, value)?;
    }
    Ok(())
}

/// Fixed frame layout: tag byte followed by the listed fields in order.
#[derive(Debug)]
pub struct FrameLayout {
    pub kind: FrameKind,
    pub fields: &'static [(Field, Wire)],
}

impl FrameLayout {
    pub fn tag(&self) -> u8 {
        self.kind.tag()
    }

    /// Total frame length in bytes, tag included.
    pub fn len(&self) -> usize {
        1 + self.fields.iter().map(|(_, w)| w.width()).sum::<usize>()
    }
}

const LEGACY_STAGE_FIELDS: &[Field] = &[
    Field::FollowMode,
    Field::Termination,
    Field::Action,
    Field::LeftAmount,
    Field::RightAmount,
];

const EXTENDED_STAGE_FIELDS: &[Field] = &[
    Field::FollowMode,
    Field::Termination,
    Field::Action,
    Field::LeftAmount,
    Field::RightAmount,
    Field::Speed,
    Field::TurnSpeed,
    Field::CenterOffset,
    Field::PGain,
    Field::IGain,
    Field::DGain,
    Field::TerminationClicks,
];

const LEGACY_GLOBAL_FIELDS: &[Field] = &[Field::PGain, Field::IGain, Field::DGain, Field::StartPosition];

const EXTENDED_GLOBAL_FIELDS: &[Field] = &[Field::StartPosition];

static LEGACY_PID_FRAME: FrameLayout = FrameLayout {
    kind: FrameKind::LivePid,
    fields: &[(Field::PGain, Wire::F32), (Field::IGain, Wire::F32), (Field::DGain, Wire::F32)],
};

static LEGACY_GLOBALS_FRAME: FrameLayout = FrameLayout {
    kind: FrameKind::Globals,
    fields: &[
        (Field::PGain, Wire::F32),
        (Field::IGain, Wire::F32),
        (Field::DGain, Wire::F32),
        (Field::StartPosition, Wire::I16),
    ],
};

static LEGACY_STAGE_FRAME: FrameLayout = FrameLayout {
    kind: FrameKind::Stage,
    fields: &[
        (Field::FollowMode, Wire::Digit),
        (Field::Termination, Wire::Digit),
        (Field::Action, Wire::Digit),
        (Field::StageIndex, Wire::I16),
        (Field::LeftAmount, Wire::I16),
        (Field::RightAmount, Wire::I16),
    ],
};

static EXTENDED_GLOBALS_FRAME: FrameLayout = FrameLayout {
    kind: FrameKind::Globals,
    fields: &[(Field::StartPosition, Wire::U8)],
};

static EXTENDED_STAGE_FRAME: FrameLayout = FrameLayout {
    kind: FrameKind::Stage,
    fields: &[
        (Field::StageIndex, Wire::U8),
        (Field::FollowMode, Wire::U8),
        (Field::Termination, Wire::U8),
        (Field::Action, Wire::U8),
        (Field::LeftAmount, Wire::I8),
        (Field::RightAmount, Wire::I8),
        (Field::Speed, Wire::U8),
        (Field::TurnSpeed, Wire::U8),
        (Field::CenterOffset, Wire::I8),
        (Field::PGain, Wire::F32),
        (Field::IGain, Wire::F32),
        (Field::DGain, Wire::F32),
    ],
};
