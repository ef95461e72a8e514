//! Cell state snapshot
//!
//! [`Snapshot`] is the complete state of the cell at one instant. Each polled
//! address is bound to exactly one [`Field`]; fields are named in snake_case,
//! axis members as `<axis>.<member>` (for example
//! `arm1_horizontal.current_position`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, MonitorResult};
use crate::value::RegisterValue;

/// Limit switches, configured bounds, and live readings of one positioning axis.
///
/// Vertical axes report their upper/lower switches as forward/backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AxisState {
    pub forward_limit: bool,
    pub backward_limit: bool,
    pub origin_limit: bool,
    pub upper_bound: i32,
    pub lower_bound: i32,
    pub origin_position: i32,
    pub current_position: i32,
    pub current_speed: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FurnaceState {
    pub running: bool,
    pub temperature: f64,
    pub pressure: f64,
}

/// Full cell state with the instant it was taken.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,

    pub door1_lock: bool,
    pub door2_lock: bool,

    pub furnace_vertical_cylinder: bool,
    pub furnace_horizontal_cylinder: bool,

    pub small_car_has_material: bool,
    pub buffer1_has_material: bool,
    pub buffer2_has_material: bool,
    pub clamp_has_material: bool,

    pub arm1_horizontal: AxisState,
    pub arm2_horizontal: AxisState,
    pub arm_vertical: AxisState,
    pub clamp_horizontal: AxisState,
    pub clamp_vertical: AxisState,

    pub furnace: FurnaceState,
}

/// Positioning axes of the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Arm1Horizontal,
    Arm2Horizontal,
    ArmVertical,
    ClampHorizontal,
    ClampVertical,
}

impl Axis {
    pub const ALL: [Axis; 5] = [
        Axis::Arm1Horizontal,
        Axis::Arm2Horizontal,
        Axis::ArmVertical,
        Axis::ClampHorizontal,
        Axis::ClampVertical,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Axis::Arm1Horizontal => "arm1_horizontal",
            Axis::Arm2Horizontal => "arm2_horizontal",
            Axis::ArmVertical => "arm_vertical",
            Axis::ClampHorizontal => "clamp_horizontal",
            Axis::ClampVertical => "clamp_vertical",
        }
    }
}

/// Members of an [`AxisState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisMember {
    ForwardLimit,
    BackwardLimit,
    OriginLimit,
    UpperBound,
    LowerBound,
    OriginPosition,
    CurrentPosition,
    CurrentSpeed,
}

impl AxisMember {
    pub const ALL: [AxisMember; 8] = [
        AxisMember::ForwardLimit,
        AxisMember::BackwardLimit,
        AxisMember::OriginLimit,
        AxisMember::UpperBound,
        AxisMember::LowerBound,
        AxisMember::OriginPosition,
        AxisMember::CurrentPosition,
        AxisMember::CurrentSpeed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AxisMember::ForwardLimit => "forward_limit",
            AxisMember::BackwardLimit => "backward_limit",
            AxisMember::OriginLimit => "origin_limit",
            AxisMember::UpperBound => "upper_bound",
            AxisMember::LowerBound => "lower_bound",
            AxisMember::OriginPosition => "origin_position",
            AxisMember::CurrentPosition => "current_position",
            AxisMember::CurrentSpeed => "current_speed",
        }
    }

    fn is_flag(&self) -> bool {
        matches!(
            self,
            AxisMember::ForwardLimit | AxisMember::BackwardLimit | AxisMember::OriginLimit
        )
    }
}

/// Storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Int,
    Float,
}

/// A single value read back from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i32),
    Float(f64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Snapshot field a polled address is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Door1Lock,
    Door2Lock,
    FurnaceVerticalCylinder,
    FurnaceHorizontalCylinder,
    SmallCarHasMaterial,
    Buffer1HasMaterial,
    Buffer2HasMaterial,
    ClampHasMaterial,
    Axis(Axis, AxisMember),
    FurnaceStatus,
    FurnaceTemperature,
    FurnacePressure,
}

const SIMPLE_FIELDS: [(Field, &str); 11] = [
    (Field::Door1Lock, "door1_lock"),
    (Field::Door2Lock, "door2_lock"),
    (Field::FurnaceVerticalCylinder, "furnace_vertical_cylinder"),
    (Field::FurnaceHorizontalCylinder, "furnace_horizontal_cylinder"),
    (Field::SmallCarHasMaterial, "small_car_has_material"),
    (Field::Buffer1HasMaterial, "buffer1_has_material"),
    (Field::Buffer2HasMaterial, "buffer2_has_material"),
    (Field::ClampHasMaterial, "clamp_has_material"),
    (Field::FurnaceStatus, "furnace_status"),
    (Field::FurnaceTemperature, "furnace_temperature"),
    (Field::FurnacePressure, "furnace_pressure"),
];

impl Field {
    /// Every field of the snapshot, in declaration order.
    pub fn all() -> Vec<Field> {
        let mut fields: Vec<Field> = SIMPLE_FIELDS[..8].iter().map(|(f, _)| *f).collect();
        for axis in Axis::ALL {
            fields.extend(AxisMember::ALL.iter().map(|m| Field::Axis(axis, *m)));
        }
        fields.extend(SIMPLE_FIELDS[8..].iter().map(|(f, _)| *f));
        fields
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Axis(_, member) if member.is_flag() => FieldKind::Bool,
            Field::Axis(_, _) => FieldKind::Int,
            Field::FurnaceTemperature | Field::FurnacePressure => FieldKind::Float,
            _ => FieldKind::Bool,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Axis(axis, member) => write!(f, "{}.{}", axis.name(), member.name()),
            simple => {
                let name = SIMPLE_FIELDS
                    .iter()
                    .find(|(field, _)| field == simple)
                    .map(|(_, name)| *name)
                    .unwrap_or("unknown");
                f.write_str(name)
            }
        }
    }
}

impl FromStr for Field {
    type Err = MonitorError;

    fn from_str(s: &str) -> MonitorResult<Self> {
        let name = s.trim();
        if let Some((axis, member)) = name.split_once('.') {
            let axis = Axis::ALL.iter().find(|a| a.name() == axis);
            let member = AxisMember::ALL.iter().find(|m| m.name() == member);
            if let (Some(axis), Some(member)) = (axis, member) {
                return Ok(Field::Axis(*axis, *member));
            }
        } else if let Some((field, _)) = SIMPLE_FIELDS.iter().find(|(_, n)| *n == name) {
            return Ok(*field);
        }
        Err(MonitorError::configuration(format!(
            "unknown snapshot field '{}'",
            s
        )))
    }
}

impl Serialize for Field {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Snapshot {
    fn axis(&self, axis: Axis) -> &AxisState {
        match axis {
            Axis::Arm1Horizontal => &self.arm1_horizontal,
            Axis::Arm2Horizontal => &self.arm2_horizontal,
            Axis::ArmVertical => &self.arm_vertical,
            Axis::ClampHorizontal => &self.clamp_horizontal,
            Axis::ClampVertical => &self.clamp_vertical,
        }
    }

    fn axis_mut(&mut self, axis: Axis) -> &mut AxisState {
        match axis {
            Axis::Arm1Horizontal => &mut self.arm1_horizontal,
            Axis::Arm2Horizontal => &mut self.arm2_horizontal,
            Axis::ArmVertical => &mut self.arm_vertical,
            Axis::ClampHorizontal => &mut self.clamp_horizontal,
            Axis::ClampVertical => &mut self.clamp_vertical,
        }
    }

    fn flag_mut(&mut self, field: Field) -> Option<&mut bool> {
        Some(match field {
            Field::Door1Lock => &mut self.door1_lock,
            Field::Door2Lock => &mut self.door2_lock,
            Field::FurnaceVerticalCylinder => &mut self.furnace_vertical_cylinder,
            Field::FurnaceHorizontalCylinder => &mut self.furnace_horizontal_cylinder,
            Field::SmallCarHasMaterial => &mut self.small_car_has_material,
            Field::Buffer1HasMaterial => &mut self.buffer1_has_material,
            Field::Buffer2HasMaterial => &mut self.buffer2_has_material,
            Field::ClampHasMaterial => &mut self.clamp_has_material,
            Field::FurnaceStatus => &mut self.furnace.running,
            Field::Axis(axis, AxisMember::ForwardLimit) => &mut self.axis_mut(axis).forward_limit,
            Field::Axis(axis, AxisMember::BackwardLimit) => &mut self.axis_mut(axis).backward_limit,
            Field::Axis(axis, AxisMember::OriginLimit) => &mut self.axis_mut(axis).origin_limit,
            _ => return None,
        })
    }

    /// Store `value` into `field`, converted to the field's kind.
    pub fn set(&mut self, field: Field, value: RegisterValue) {
        if let Some(flag) = self.flag_mut(field) {
            *flag = value.as_bool();
            return;
        }
        match field {
            Field::FurnaceTemperature => self.furnace.temperature = value.as_f64(),
            Field::FurnacePressure => self.furnace.pressure = value.as_f64(),
            Field::Axis(axis, member) => {
                let word = i32::from(value.as_i16());
                let state = self.axis_mut(axis);
                match member {
                    AxisMember::UpperBound => state.upper_bound = word,
                    AxisMember::LowerBound => state.lower_bound = word,
                    AxisMember::OriginPosition => state.origin_position = word,
                    AxisMember::CurrentPosition => state.current_position = word,
                    AxisMember::CurrentSpeed => state.current_speed = word,
                    // flags handled above
                    _ => {}
                }
            }
            _ => {}
        }
    }

    pub fn get(&self, field: Field) -> FieldValue {
        match field {
            Field::Door1Lock => FieldValue::Bool(self.door1_lock),
            Field::Door2Lock => FieldValue::Bool(self.door2_lock),
            Field::FurnaceVerticalCylinder => FieldValue::Bool(self.furnace_vertical_cylinder),
            Field::FurnaceHorizontalCylinder => FieldValue::Bool(self.furnace_horizontal_cylinder),
            Field::SmallCarHasMaterial => FieldValue::Bool(self.small_car_has_material),
            Field::Buffer1HasMaterial => FieldValue::Bool(self.buffer1_has_material),
            Field::Buffer2HasMaterial => FieldValue::Bool(self.buffer2_has_material),
            Field::ClampHasMaterial => FieldValue::Bool(self.clamp_has_material),
            Field::FurnaceStatus => FieldValue::Bool(self.furnace.running),
            Field::FurnaceTemperature => FieldValue::Float(self.furnace.temperature),
            Field::FurnacePressure => FieldValue::Float(self.furnace.pressure),
            Field::Axis(axis, member) => {
                let state = self.axis(axis);
                match member {
                    AxisMember::ForwardLimit => FieldValue::Bool(state.forward_limit),
                    AxisMember::BackwardLimit => FieldValue::Bool(state.backward_limit),
                    AxisMember::OriginLimit => FieldValue::Bool(state.origin_limit),
                    AxisMember::UpperBound => FieldValue::Int(state.upper_bound),
                    AxisMember::LowerBound => FieldValue::Int(state.lower_bound),
                    AxisMember::OriginPosition => FieldValue::Int(state.origin_position),
                    AxisMember::CurrentPosition => FieldValue::Int(state.current_position),
                    AxisMember::CurrentSpeed => FieldValue::Int(state.current_speed),
                }
            }
        }
    }
}
