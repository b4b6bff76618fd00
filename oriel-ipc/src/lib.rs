//! Types for communicating display configuration changes to oriel.
//!
//! The concrete transport (D-Bus, a socket, an in-process call) is up to the
//! embedder; these types describe the requests and replies themselves, plus
//! the geometry primitives shared with the core.
#![warn(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// A point in logical screen coordinates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate.
    pub y: i32,
}

/// A size in logical pixels.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    /// Width.
    pub width: i32,
    /// Height.
    pub height: i32,
}

/// A rectangle in logical screen coordinates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    /// X coordinate of the top-left corner.
    pub x: i32,
    /// Y coordinate of the top-left corner.
    pub y: i32,
    /// Width.
    pub width: i32,
    /// Height.
    pub height: i32,
}

impl Rect {
    /// Creates a rectangle from position and size.
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Creates a rectangle at the origin with the given size.
    pub fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// X coordinate one past the right edge.
    pub fn x2(&self) -> i32 {
        self.x + self.width
    }

    /// Y coordinate one past the bottom edge.
    pub fn y2(&self) -> i32 {
        self.y + self.height
    }

    /// Area in square logical pixels.
    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    /// The center point, rounded towards the top-left.
    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2,
            y: self.y + self.height / 2,
        }
    }

    /// Whether the point lies within the rectangle.
    pub fn contains_point(&self, point: Point) -> bool {
        point.x >= self.x && point.x < self.x2() && point.y >= self.y && point.y < self.y2()
    }

    /// Whether `other` lies entirely within this rectangle.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x2() <= self.x2()
            && other.y2() <= self.y2()
    }

    /// Whether this rectangle is large enough to hold `other`, ignoring position.
    pub fn could_fit_rect(&self, other: &Rect) -> bool {
        self.width >= other.width && self.height >= other.height
    }

    /// Whether the two rectangles overlap.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.x2() && other.x < self.x2() && self.y < other.y2() && other.y < self.y2()
    }

    /// The overlapping region, if any.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let x2 = self.x2().min(other.x2());
        let y2 = self.y2().min(other.y2());
        if x < x2 && y < y2 {
            Some(Rect::new(x, y, x2 - x, y2 - y))
        } else {
            None
        }
    }

    /// The smallest rectangle containing both.
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let x2 = self.x2().max(other.x2());
        let y2 = self.y2().max(other.y2());
        Rect::new(x, y, x2 - x, y2 - y)
    }

    /// Whether the rectangles share an edge segment (touch without overlapping).
    pub fn is_adjacent_to(&self, other: &Rect) -> bool {
        let horiz_overlap = self.x < other.x2() && other.x < self.x2();
        let vert_overlap = self.y < other.y2() && other.y < self.y2();
        let horiz_touch = self.x == other.x2() || other.x == self.x2();
        let vert_touch = self.y == other.y2() || other.y == self.y2();
        (horiz_touch && vert_overlap) || (vert_touch && horiz_overlap)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{} {}x{}", self.x, self.y, self.width, self.height)
    }
}

/// Output transform, which goes counter-clockwise.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transform {
    /// Untransformed.
    #[default]
    Normal,
    /// Rotated by 90°.
    Rotate90,
    /// Rotated by 180°.
    Rotate180,
    /// Rotated by 270°.
    Rotate270,
    /// Flipped horizontally.
    Flipped,
    /// Rotated by 90° and flipped.
    Flipped90,
    /// Rotated by 180° and flipped.
    Flipped180,
    /// Rotated by 270° and flipped.
    Flipped270,
}

impl Transform {
    /// Whether the transform swaps width and height.
    pub fn is_rotated(self) -> bool {
        matches!(
            self,
            Self::Rotate90 | Self::Rotate270 | Self::Flipped90 | Self::Flipped270
        )
    }

    /// The next rotation in the normal → 90 → 180 → 270 cycle, dropping any flip.
    pub fn rotated_clockwise(self) -> Self {
        match self {
            Self::Normal | Self::Flipped => Self::Rotate90,
            Self::Rotate90 | Self::Flipped90 => Self::Rotate180,
            Self::Rotate180 | Self::Flipped180 => Self::Rotate270,
            Self::Rotate270 | Self::Flipped270 => Self::Normal,
        }
    }
}

/// Reference point kept in place when a window is resized.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gravity {
    /// Top-left corner stays fixed.
    NorthWest,
    /// Top edge midpoint stays fixed.
    North,
    /// Top-right corner stays fixed.
    NorthEast,
    /// Left edge midpoint stays fixed.
    West,
    /// Center stays fixed.
    #[default]
    Center,
    /// Right edge midpoint stays fixed.
    East,
    /// Bottom-left corner stays fixed.
    SouthWest,
    /// Bottom edge midpoint stays fixed.
    South,
    /// Bottom-right corner stays fixed.
    SouthEast,
    /// The client-area position stays fixed regardless of frame size.
    Static,
}

/// How logical monitor coordinates relate to physical pixels.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayoutMode {
    /// Logical monitor sizes are divided by the scale factor.
    #[default]
    Logical,
    /// Logical monitor sizes are in physical pixels; scales must be integral.
    Physical,
}

/// How a configuration should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyMethod {
    /// Apply now, do not save.
    Temporary,
    /// Apply now and save once confirmed.
    Persistent,
    /// Fully validate, including a backend dry run, without changing state.
    VerifyOnly,
}

/// Identity of a physical monitor: connector plus EDID-derived fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonitorSelector {
    /// Connector name, e.g. `DP-1`.
    pub connector: String,
    /// Vendor string.
    pub vendor: String,
    /// Product string.
    pub product: String,
    /// Serial string.
    pub serial: String,
}

/// RGB range of an output.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RgbRange {
    /// Backend decides.
    #[default]
    Auto,
    /// Full range.
    Full,
    /// Limited (16-235) range.
    Limited,
}

/// Color mode of an output.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMode {
    /// Default (typically sRGB) signaling.
    #[default]
    Default,
    /// BT.2100 (HDR) signaling.
    Bt2100,
}

/// Per-monitor properties inside a configuration request.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorPropertiesDescriptor {
    /// Enable underscanning.
    pub underscanning: Option<bool>,
    /// Maximum bits per color component.
    pub max_bpc: Option<u32>,
    /// RGB range.
    pub rgb_range: Option<RgbRange>,
    /// Color mode.
    pub color_mode: Option<ColorMode>,
}

/// One monitor assignment inside a logical monitor descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorDescriptor {
    /// Connector of the monitor to assign.
    pub connector: String,
    /// Id of the mode to set, as advertised in [`CurrentState`].
    pub mode_id: String,
    /// Extra properties.
    #[serde(default)]
    pub properties: MonitorPropertiesDescriptor,
}

/// One logical monitor inside a configuration request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalMonitorDescriptor {
    /// X position of the layout rectangle.
    pub x: i32,
    /// Y position of the layout rectangle.
    pub y: i32,
    /// Scale factor.
    pub scale: f64,
    /// Transform.
    pub transform: Transform,
    /// Whether this is the primary logical monitor.
    pub primary: bool,
    /// Monitors rendering this region; more than one means mirroring.
    pub monitors: Vec<MonitorDescriptor>,
}

/// A request to change the display configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyConfigRequest {
    /// Serial of the hardware state the request was computed against.
    ///
    /// Must match the serial last reported in [`CurrentState`]; requests based
    /// on stale state are rejected.
    pub serial: u32,
    /// How to apply the configuration.
    pub method: ApplyMethod,
    /// Requested layout mode, if the backend supports selecting one.
    pub layout_mode: Option<LayoutMode>,
    /// The logical monitors to configure. Connected monitors not listed are
    /// disabled.
    pub logical_monitors: Vec<LogicalMonitorDescriptor>,
    /// Monitors to keep available for drm leasing; must not be assigned.
    #[serde(default)]
    pub monitors_for_lease: Vec<MonitorSelector>,
}

/// Error returned for an invalid configuration or geometry request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ConfigError {
    /// The request was well-formed but referenced unknown or unsupported
    /// entities, or violated a precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The request may not be performed at all in the current state.
    #[error("access denied: {0}")]
    AccessDenied(String),
}

/// A mode of a monitor as advertised to configuration clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeInfo {
    /// Stable id, usable in [`MonitorDescriptor::mode_id`].
    pub id: String,
    /// Width in physical pixels.
    pub width: i32,
    /// Height in physical pixels.
    pub height: i32,
    /// Refresh rate in Hz.
    pub refresh_rate: f64,
    /// Scale the compositor would pick for this mode.
    pub preferred_scale: f64,
    /// All scales valid for this mode.
    pub supported_scales: Vec<f64>,
    /// Whether this is the monitor's preferred mode.
    pub is_preferred: bool,
    /// Whether this is the monitor's current mode.
    pub is_current: bool,
}

/// A physical monitor as advertised to configuration clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorInfo {
    /// Identity of the monitor.
    pub spec: MonitorSelector,
    /// Human-readable name.
    pub display_name: String,
    /// Available modes.
    pub modes: Vec<ModeInfo>,
    /// Whether this is a laptop panel.
    pub is_builtin: bool,
    /// Whether the monitor is reserved for drm leasing.
    pub is_for_lease: bool,
}

/// A logical monitor as advertised to configuration clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalMonitorInfo {
    /// X position.
    pub x: i32,
    /// Y position.
    pub y: i32,
    /// Scale factor.
    pub scale: f64,
    /// Transform.
    pub transform: Transform,
    /// Whether this is the primary logical monitor.
    pub primary: bool,
    /// Monitors assigned to this region.
    pub monitors: Vec<MonitorSelector>,
}

/// Snapshot of the current display state, for configuration clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentState {
    /// Hardware generation serial; echo it back in [`ApplyConfigRequest`].
    pub serial: u32,
    /// Connected monitors.
    pub monitors: Vec<MonitorInfo>,
    /// Active logical monitors.
    pub logical_monitors: Vec<LogicalMonitorInfo>,
    /// Whether the layout mode can be chosen per request.
    pub supports_changing_layout_mode: bool,
    /// Whether all logical monitors must share one scale.
    pub global_scale_required: bool,
    /// The layout mode in effect.
    pub layout_mode: LayoutMode,
}

/// Reply to an [`ApplyConfigRequest`].
pub type ApplyConfigReply = Result<(), ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_algebra() {
        let a = Rect::new(0, 0, 100, 100);
        let b = Rect::new(50, 50, 100, 100);
        assert!(a.overlaps(&b));
        assert_eq!(a.intersection(&b), Some(Rect::new(50, 50, 50, 50)));
        assert_eq!(a.union(&b), Rect::new(0, 0, 150, 150));
        assert!(!a.contains_rect(&b));
        assert!(a.contains_rect(&Rect::new(10, 10, 50, 50)));

        let c = Rect::new(100, 0, 100, 100);
        assert!(!a.overlaps(&c));
        assert!(a.is_adjacent_to(&c));
        assert!(!a.is_adjacent_to(&Rect::new(101, 0, 10, 10)));
    }

    #[test]
    fn transform_rotation() {
        assert!(Transform::Rotate90.is_rotated());
        assert!(!Transform::Flipped180.is_rotated());
        assert_eq!(Transform::Rotate270.rotated_clockwise(), Transform::Normal);
        assert_eq!(Transform::Flipped.rotated_clockwise(), Transform::Rotate90);
    }

    #[test]
    fn request_round_trips_through_json() {
        let request = ApplyConfigRequest {
            serial: 3,
            method: ApplyMethod::Persistent,
            layout_mode: Some(LayoutMode::Logical),
            logical_monitors: vec![LogicalMonitorDescriptor {
                x: 0,
                y: 0,
                scale: 2.0,
                transform: Transform::Normal,
                primary: true,
                monitors: vec![MonitorDescriptor {
                    connector: "eDP-1".to_owned(),
                    mode_id: "2560x1600@60.000".to_owned(),
                    properties: Default::default(),
                }],
            }],
            monitors_for_lease: Vec::new(),
        };

        let json = serde_json::to_string(&request).unwrap();
        let parsed: ApplyConfigRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request, parsed);
    }
}
