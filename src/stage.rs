//! Stage record data model.
//!
//! One `StageRecord` describes one segment of the course: how the robot
//! drives it, what ends it, what it does when it ends, and the tuning used
//! while driving it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::schema::{Field, FieldSink, FieldSource, Value};

/// Closed, ordered set of choices stored on disk and on the wire by index.
trait Choice: Copy + 'static {
    const ALL: &'static [Self];
    const WHAT: &'static str;
    fn name(self) -> &'static str;
}

fn choice_from_index<T: Choice>(index: i64) -> Option<T> {
    usize::try_from(index).ok().and_then(|i| T::ALL.get(i).copied())
}

fn choice_from_str<T: Choice>(s: &str) -> Result<T, String> {
    let s = s.trim();
    if let Ok(index) = s.parse::<i64>() {
        return choice_from_index(index)
            .ok_or_else(|| format!("{} index {} out of range (0..{})", T::WHAT, index, T::ALL.len()));
    }
    let wanted = s.replace(['-', '_'], "").to_ascii_lowercase();
    T::ALL
        .iter()
        .copied()
        .find(|c| c.name().replace('_', "").eq_ignore_ascii_case(&wanted))
        .ok_or_else(|| format!("unknown {} '{}'", T::WHAT, s))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum FollowMode {
    #[default]
    LineFollowing = 0,
    EncoderDriven = 1,
}

impl Choice for FollowMode {
    const ALL: &'static [Self] = &[FollowMode::LineFollowing, FollowMode::EncoderDriven];
    const WHAT: &'static str = "follow mode";

    fn name(self) -> &'static str {
        match self {
            FollowMode::LineFollowing => "line_following",
            FollowMode::EncoderDriven => "encoder_driven",
        }
    }
}

/// Sensed event that ends a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum TerminationCondition {
    #[default]
    EncoderClicks = 0,
    LineLost = 1,
    Intersection = 2,
    LeftBranch = 3,
    RightBranch = 4,
    HitSwitch = 5,
}

impl Choice for TerminationCondition {
    const ALL: &'static [Self] = &[
        TerminationCondition::EncoderClicks,
        TerminationCondition::LineLost,
        TerminationCondition::Intersection,
        TerminationCondition::LeftBranch,
        TerminationCondition::RightBranch,
        TerminationCondition::HitSwitch,
    ];
    const WHAT: &'static str = "termination condition";

    fn name(self) -> &'static str {
        match self {
            TerminationCondition::EncoderClicks => "encoder_clicks",
            TerminationCondition::LineLost => "line_lost",
            TerminationCondition::Intersection => "intersection",
            TerminationCondition::LeftBranch => "left_branch",
            TerminationCondition::RightBranch => "right_branch",
            TerminationCondition::HitSwitch => "hit_switch",
        }
    }
}

/// Maneuver executed once the termination condition fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum TerminationAction {
    #[default]
    Stop = 0,
    Turn = 1,
    Pivot = 2,
    Continue = 3,
    Reverse = 4,
}

impl Choice for TerminationAction {
    const ALL: &'static [Self] = &[
        TerminationAction::Stop,
        TerminationAction::Turn,
        TerminationAction::Pivot,
        TerminationAction::Continue,
        TerminationAction::Reverse,
    ];
    const WHAT: &'static str = "termination action";

    fn name(self) -> &'static str {
        match self {
            TerminationAction::Stop => "stop",
            TerminationAction::Turn => "turn",
            TerminationAction::Pivot => "pivot",
            TerminationAction::Continue => "continue",
            TerminationAction::Reverse => "reverse",
        }
    }
}

macro_rules! impl_choice_traits {
    ($($t:ty),*) => {$(
        impl $t {
            pub fn index(self) -> u8 {
                self as u8
            }

            pub fn from_index(index: i64) -> Option<Self> {
                choice_from_index(index)
            }

            pub fn all() -> &'static [Self] {
                <Self as Choice>::ALL
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(Choice::name(*self))
            }
        }

        impl FromStr for $t {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                choice_from_str(s)
            }
        }
    )*};
}

impl_choice_traits!(FollowMode, TerminationCondition, TerminationAction);

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidGains {
    pub p: f32,
    pub i: f32,
    pub d: f32,
}

impl PidGains {
    pub fn new(p: f32, i: f32, d: f32) -> Self {
        Self { p, i, d }
    }
}

impl FieldSource for PidGains {
    fn value(&self, field: Field) -> Option<Value> {
        match field {
            Field::PGain => Some(Value::Float(self.p)),
            Field::IGain => Some(Value::Float(self.i)),
            Field::DGain => Some(Value::Float(self.d)),
            _ => None,
        }
    }
}

/// Configuration of one course stage.
///
/// Fields the active protocol version does not persist keep their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StageRecord {
    pub follow_mode: FollowMode,
    pub termination: TerminationCondition,
    pub termination_action: TerminationAction,
    /// Left wheel encoder clicks for the termination action.
    pub left_amount: i32,
    /// Right wheel encoder clicks for the termination action.
    pub right_amount: i32,
    pub speed: i32,
    pub turn_speed: i32,
    pub center_offset: i32,
    pub gains: PidGains,
    /// Click count used by `TerminationCondition::EncoderClicks`.
    pub termination_clicks: i32,
}

impl FieldSource for StageRecord {
    fn value(&self, field: Field) -> Option<Value> {
        let int = |v: i64| Some(Value::Int(v));
        match field {
            Field::FollowMode => int(self.follow_mode.index().into()),
            Field::Termination => int(self.termination.index().into()),
            Field::Action => int(self.termination_action.index().into()),
            Field::LeftAmount => int(self.left_amount.into()),
            Field::RightAmount => int(self.right_amount.into()),
            Field::Speed => int(self.speed.into()),
            Field::TurnSpeed => int(self.turn_speed.into()),
            Field::CenterOffset => int(self.center_offset.into()),
            Field::TerminationClicks => int(self.termination_clicks.into()),
            Field::PGain | Field::IGain | Field::DGain => self.gains.value(field),
            Field::StageIndex | Field::StartPosition => None,
        }
    }
}

impl FieldSink for StageRecord {
    fn set_value(&mut self, field: Field, value: Value) -> Result<(), String> {
        match (field, value) {
            (Field::PGain, Value::Float(v)) => self.gains.p = v,
            (Field::IGain, Value::Float(v)) => self.gains.i = v,
            (Field::DGain, Value::Float(v)) => self.gains.d = v,
            (Field::FollowMode, Value::Int(v)) => {
                self.follow_mode = FollowMode::from_index(v)
                    .ok_or_else(|| format!("follow mode {} is not a known mode", v))?;
            }
            (Field::Termination, Value::Int(v)) => {
                self.termination = TerminationCondition::from_index(v)
                    .ok_or_else(|| format!("termination {} is not a known condition", v))?;
            }
            (Field::Action, Value::Int(v)) => {
                self.termination_action = TerminationAction::from_index(v)
                    .ok_or_else(|| format!("action {} is not a known action", v))?;
            }
            (field, Value::Int(v)) => {
                let v = i32::try_from(v).map_err(|_| format!("{} {} exceeds 32 bits", field.name(), v))?;
                match field {
                    Field::LeftAmount => self.left_amount = v,
                    Field::RightAmount => self.right_amount = v,
                    Field::Speed => self.speed = v,
                    Field::TurnSpeed => self.turn_speed = v,
                    Field::CenterOffset => self.center_offset = v,
                    Field::TerminationClicks => self.termination_clicks = v,
                    _ => return Err(format!("{} is not a stage field", field.name())),
                }
            }
            (field, value) => return Err(format!("{} cannot hold {:?}", field.name(), value)),
        }
        Ok(())
    }
}

/// A record paired with the stage index it is sent as.
pub struct IndexedStage<'a> {
    pub index: usize,
    pub record: &'a StageRecord,
}

impl FieldSource for IndexedStage<'_> {
    fn value(&self, field: Field) -> Option<Value> {
        match field {
            Field::StageIndex => i64::try_from(self.index).ok().map(Value::Int),
            _ => self.record.value(field),
        }
    }
}
