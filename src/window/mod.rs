//! Window metadata consumed by the placement engine and the constraint
//! solver.
//!
//! This is deliberately not a full window object: titles, WM class, focus and
//! stacking live with the surrounding window manager. What lives here is
//! everything the geometry code reads or updates: size hints, frame insets,
//! maximize/tile/fullscreen state, the remembered on-screen requirements, and
//! the positioner-rule state machine for popup-style transients.

use oriel_ipc::{Point, Rect, Size};

pub mod constraints;
pub mod place;

/// Height of the titlebar strip that the solver keeps on screen, and the
/// cascade step.
pub const TITLEBAR_HEIGHT: i32 = 50;

/// Fraction of the work area above which a freshly placed window is
/// auto-maximized instead.
pub const MAX_UNMAXIMIZED_WINDOW_AREA: f64 = 0.8;

/// Semantic type of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowType {
    Normal,
    Dialog,
    ModalDialog,
    Utility,
    Toolbar,
    Menu,
    Splashscreen,
    Dock,
    Desktop,
    // Override-redirect kinds; never placed or constrained.
    DropdownMenu,
    PopupMenu,
    Tooltip,
    Notification,
    Combo,
    Dnd,
    OverrideOther,
}

impl WindowType {
    /// Types the placement algorithm runs on at all.
    pub(crate) fn is_placeable(self) -> bool {
        matches!(
            self,
            Self::Normal | Self::Dialog | Self::ModalDialog | Self::Splashscreen
        )
    }

    /// Types that count as "in the way" when looking for free space.
    pub(crate) fn obstructs_placement(self) -> bool {
        matches!(
            self,
            Self::Normal | Self::Utility | Self::Toolbar | Self::Menu
        )
    }
}

/// Client-provided sizing constraints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeHints {
    /// Minimum client-area size.
    pub min_size: Size,
    /// Maximum client-area size.
    pub max_size: Size,
    /// Base size for the increment grid.
    pub base_size: Size,
    /// Resize increments; 1 means unconstrained.
    pub size_increments: Size,
    /// Minimum width:height ratio as a fraction.
    pub min_aspect: (i32, i32),
    /// Maximum width:height ratio as a fraction.
    pub max_aspect: (i32, i32),
    /// The user specified the position (e.g. -geometry).
    pub user_position_set: bool,
    /// The program specified the position.
    pub program_position_set: bool,
}

impl Default for SizeHints {
    fn default() -> Self {
        Self {
            min_size: Size {
                width: 1,
                height: 1,
            },
            max_size: Size {
                width: i32::MAX,
                height: i32::MAX,
            },
            base_size: Size {
                width: 0,
                height: 0,
            },
            size_increments: Size {
                width: 1,
                height: 1,
            },
            min_aspect: (1, i32::MAX),
            max_aspect: (i32::MAX, 1),
            user_position_set: false,
            program_position_set: false,
        }
    }
}

/// Visible frame border widths around the client area.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameInsets {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

impl FrameInsets {
    pub fn client_rect_to_frame_rect(&self, rect: Rect) -> Rect {
        Rect {
            x: rect.x - self.left,
            y: rect.y - self.top,
            width: rect.width.saturating_add(self.left + self.right),
            height: rect.height.saturating_add(self.top + self.bottom),
        }
    }

    pub fn frame_rect_to_client_rect(&self, rect: Rect) -> Rect {
        Rect {
            x: rect.x + self.left,
            y: rect.y + self.top,
            width: (rect.width - self.left - self.right).max(0),
            height: (rect.height - self.top - self.bottom).max(0),
        }
    }
}

/// Docked-to-half-screen layout state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TileMode {
    #[default]
    None,
    Left,
    Right,
    /// Tiled variant of maximized; uses the whole tile area.
    Maximized,
}

bitflags::bitflags! {
    /// Edge of the anchor rectangle a positioner attaches to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PlacementAnchor: u8 {
        const TOP = 1;
        const BOTTOM = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
    }
}

bitflags::bitflags! {
    /// Direction the placed window extends from the anchor point.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PlacementGravity: u8 {
        const TOP = 1;
        const BOTTOM = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
    }
}

bitflags::bitflags! {
    /// Adjustments a positioner allows when its placement overflows.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConstraintAdjustment: u8 {
        const SLIDE_X = 1;
        const SLIDE_Y = 1 << 1;
        const FLIP_X = 1 << 2;
        const FLIP_Y = 1 << 3;
        const RESIZE_X = 1 << 4;
        const RESIZE_Y = 1 << 5;
    }
}

/// Anchor/gravity/offset description for positioner-style transient windows.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementRule {
    /// Anchor rectangle, relative to the parent.
    pub anchor_rect: Rect,
    /// Parent position snapshot the rule was computed against.
    pub parent_rect: Rect,
    pub anchor: PlacementAnchor,
    pub gravity: PlacementGravity,
    pub constraint_adjustment: ConstraintAdjustment,
    pub offset: Point,
    pub width: i32,
    pub height: i32,
    /// Whether the rule re-resolves when the parent moves.
    pub is_reactive: bool,
}

impl PlacementRule {
    pub(crate) fn flip_horizontally(&mut self) {
        if self.anchor.contains(PlacementAnchor::LEFT) {
            self.anchor.remove(PlacementAnchor::LEFT);
            self.anchor.insert(PlacementAnchor::RIGHT);
        } else if self.anchor.contains(PlacementAnchor::RIGHT) {
            self.anchor.remove(PlacementAnchor::RIGHT);
            self.anchor.insert(PlacementAnchor::LEFT);
        }

        if self.gravity.contains(PlacementGravity::LEFT) {
            self.gravity.remove(PlacementGravity::LEFT);
            self.gravity.insert(PlacementGravity::RIGHT);
        } else if self.gravity.contains(PlacementGravity::RIGHT) {
            self.gravity.remove(PlacementGravity::RIGHT);
            self.gravity.insert(PlacementGravity::LEFT);
        }
    }

    pub(crate) fn flip_vertically(&mut self) {
        if self.anchor.contains(PlacementAnchor::TOP) {
            self.anchor.remove(PlacementAnchor::TOP);
            self.anchor.insert(PlacementAnchor::BOTTOM);
        } else if self.anchor.contains(PlacementAnchor::BOTTOM) {
            self.anchor.remove(PlacementAnchor::BOTTOM);
            self.anchor.insert(PlacementAnchor::TOP);
        }

        if self.gravity.contains(PlacementGravity::TOP) {
            self.gravity.remove(PlacementGravity::TOP);
            self.gravity.insert(PlacementGravity::BOTTOM);
        } else if self.gravity.contains(PlacementGravity::BOTTOM) {
            self.gravity.remove(PlacementGravity::BOTTOM);
            self.gravity.insert(PlacementGravity::TOP);
        }
    }
}

/// Lifecycle of a positioner-ruled placement. The client applies constrained
/// positions asynchronously, so the solver records where it is in the
/// handshake instead of blocking.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PlacementState {
    /// No constrained position computed yet.
    #[default]
    Unconstrained,
    /// A constrained position was computed and awaits sending.
    ConstrainedPending,
    /// The constrained position was sent to the client.
    ConstrainedConfigured,
    /// The client acknowledged and committed the position.
    ConstrainedFinished,
    /// Something changed; the position must be recomputed.
    Invalidated,
}

/// Positioner state attached to a window.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WindowPlacement {
    pub rule: Option<PlacementRule>,
    pub state: PlacementState,
    /// Next position, relative to the parent and absolute.
    pub pending_rel: Point,
    pub pending_pos: Point,
    /// Committed position relative to the parent.
    pub current_rel: Point,
}

/// Logical monitors a fullscreen window spans, by logical monitor number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullscreenMonitors {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

/// Compositor preferences the geometry code depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefs {
    /// Place new normal windows centered instead of first-fit.
    pub center_new_windows: bool,
    /// Auto-maximize windows that nearly fill the work area.
    pub auto_maximize: bool,
    /// Disable workarounds for broken applications.
    pub disable_workarounds: bool,
}

impl Default for Prefs {
    fn default() -> Self {
        Self {
            center_new_windows: false,
            auto_maximize: true,
            disable_workarounds: false,
        }
    }
}

/// Geometry-relevant state of one window.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub window_type: WindowType,
    pub size_hints: SizeHints,
    pub frame_insets: FrameInsets,
    pub decorated: bool,
    /// Current frame rectangle.
    pub rect: Rect,
    /// Logical monitor number the window is on, if known.
    pub monitor: Option<usize>,
    pub maximized_horizontally: bool,
    pub maximized_vertically: bool,
    pub tile_mode: TileMode,
    /// Fraction of the work area a side tile occupies.
    pub tile_hfraction: f64,
    pub fullscreen: bool,
    /// Spanned monitors for multi-monitor fullscreen.
    pub fullscreen_monitors: Option<FullscreenMonitors>,
    pub minimized: bool,
    /// Whether initial placement already ran.
    pub placed: bool,
    pub showing_for_first_time: bool,
    pub has_maximize_func: bool,
    /// Modal dialog attached to its parent, kept centered over it.
    pub attached: bool,
    // The require_* flags gate the containment rules and are updated after
    // every solve from where the window actually ended up, so a deliberate
    // partially-offscreen position is not fought on the next call.
    pub require_fully_onscreen: bool,
    pub require_on_single_monitor: bool,
    pub require_titlebar_visible: bool,
    pub placement: WindowPlacement,
}

impl Window {
    pub fn new(window_type: WindowType, rect: Rect) -> Self {
        Self {
            window_type,
            size_hints: SizeHints::default(),
            frame_insets: FrameInsets::default(),
            decorated: false,
            rect,
            monitor: None,
            maximized_horizontally: false,
            maximized_vertically: false,
            tile_mode: TileMode::None,
            tile_hfraction: 0.5,
            fullscreen: false,
            fullscreen_monitors: None,
            minimized: false,
            placed: false,
            showing_for_first_time: true,
            has_maximize_func: true,
            attached: false,
            require_fully_onscreen: true,
            require_on_single_monitor: true,
            require_titlebar_visible: true,
            placement: WindowPlacement::default(),
        }
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn is_maximized(&self) -> bool {
        self.maximized_horizontally && self.maximized_vertically
    }

    pub fn is_any_maximized(&self) -> bool {
        self.maximized_horizontally || self.maximized_vertically
    }

    pub fn is_tiled_side_by_side(&self) -> bool {
        matches!(self.tile_mode, TileMode::Left | TileMode::Right)
    }

    pub fn placement_rule(&self) -> Option<&PlacementRule> {
        self.placement.rule.as_ref()
    }

    /// Visible titlebar height, when the window has one.
    pub fn titlebar_height(&self) -> Option<i32> {
        (self.decorated && self.frame_insets.top > 0).then_some(self.frame_insets.top)
    }

    pub fn client_rect_to_frame_rect(&self, rect: Rect) -> Rect {
        self.frame_insets.client_rect_to_frame_rect(rect)
    }

    pub fn frame_rect_to_client_rect(&self, rect: Rect) -> Rect {
        self.frame_insets.frame_rect_to_client_rect(rect)
    }

    /// Min and max frame sizes derived from the client-area size hints.
    pub fn size_limits(&self) -> (Size, Size) {
        let min = self.client_rect_to_frame_rect(Rect::new(
            0,
            0,
            self.size_hints.min_size.width,
            self.size_hints.min_size.height,
        ));
        let max = self.client_rect_to_frame_rect(Rect::new(
            0,
            0,
            self.size_hints.max_size.width,
            self.size_hints.max_size.height,
        ));
        (
            Size {
                width: min.width,
                height: min.height,
            },
            Size {
                width: max.width,
                height: max.height,
            },
        )
    }

    /// The rectangle a tile of `tile_mode` occupies within `work_area`.
    pub fn tile_area(&self, tile_mode: TileMode, work_area: Rect) -> Rect {
        let fraction = match tile_mode {
            TileMode::None => return work_area,
            TileMode::Left | TileMode::Right => self.tile_hfraction,
            TileMode::Maximized => 1.,
        };

        let mut tile_area = work_area;
        tile_area.width = (work_area.width as f64 * fraction).round() as i32;
        if tile_mode == TileMode::Right {
            tile_area.x += work_area.width - tile_area.width;
        }
        tile_area
    }

    /// Marks the pending constrained position as sent to the client.
    pub fn notify_placement_configured(&mut self) {
        if self.placement.state == PlacementState::ConstrainedPending {
            self.placement.state = PlacementState::ConstrainedConfigured;
        }
    }

    /// Commits the acknowledged position.
    pub fn finish_placement(&mut self) {
        if self.placement.state == PlacementState::ConstrainedConfigured {
            self.placement.current_rel = self.placement.pending_rel;
            self.placement.state = PlacementState::ConstrainedFinished;
        }
    }

    /// Forces the next solve to recompute the ruled position.
    pub fn invalidate_placement(&mut self) {
        if self.placement.rule.is_some() {
            self.placement.state = PlacementState::Invalidated;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_insets_round_trip() {
        let insets = FrameInsets {
            left: 2,
            right: 2,
            top: 30,
            bottom: 2,
        };
        let client = Rect::new(100, 100, 400, 300);
        let frame = insets.client_rect_to_frame_rect(client);
        assert_eq!(frame, Rect::new(98, 70, 404, 332));
        assert_eq!(insets.frame_rect_to_client_rect(frame), client);
    }

    #[test]
    fn size_limits_do_not_overflow() {
        let mut window = Window::new(WindowType::Normal, Rect::from_size(100, 100));
        window.frame_insets = FrameInsets {
            left: 5,
            right: 5,
            top: 30,
            bottom: 5,
        };
        let (_, max) = window.size_limits();
        assert_eq!(max.width, i32::MAX);
        assert_eq!(max.height, i32::MAX);
    }

    #[test]
    fn tile_area_splits_work_area() {
        let mut window = Window::new(WindowType::Normal, Rect::from_size(100, 100));
        window.tile_hfraction = 0.5;
        let work_area = Rect::new(0, 32, 1920, 1048);

        assert_eq!(
            window.tile_area(TileMode::Left, work_area),
            Rect::new(0, 32, 960, 1048),
        );
        assert_eq!(
            window.tile_area(TileMode::Right, work_area),
            Rect::new(960, 32, 960, 1048),
        );
        assert_eq!(window.tile_area(TileMode::Maximized, work_area), work_area);
    }

    #[test]
    fn placement_handshake_walks_the_states() {
        let mut window = Window::new(WindowType::PopupMenu, Rect::from_size(200, 100));
        window.placement.rule = Some(PlacementRule {
            anchor_rect: Rect::from_size(10, 10),
            parent_rect: Rect::from_size(500, 500),
            anchor: PlacementAnchor::BOTTOM,
            gravity: PlacementGravity::BOTTOM,
            constraint_adjustment: ConstraintAdjustment::empty(),
            offset: Point::default(),
            width: 200,
            height: 100,
            is_reactive: false,
        });

        window.placement.state = PlacementState::ConstrainedPending;
        window.placement.pending_rel = Point { x: 10, y: 20 };
        window.notify_placement_configured();
        assert_eq!(window.placement.state, PlacementState::ConstrainedConfigured);
        window.finish_placement();
        assert_eq!(window.placement.state, PlacementState::ConstrainedFinished);
        assert_eq!(window.placement.current_rel, Point { x: 10, y: 20 });

        window.invalidate_placement();
        assert_eq!(window.placement.state, PlacementState::Invalidated);
    }

    #[test]
    fn rule_flipping_swaps_edges() {
        let mut rule = PlacementRule {
            anchor_rect: Rect::from_size(10, 10),
            parent_rect: Rect::from_size(500, 500),
            anchor: PlacementAnchor::BOTTOM | PlacementAnchor::RIGHT,
            gravity: PlacementGravity::BOTTOM | PlacementGravity::LEFT,
            constraint_adjustment: ConstraintAdjustment::empty(),
            offset: Point::default(),
            width: 200,
            height: 100,
            is_reactive: false,
        };

        rule.flip_horizontally();
        assert_eq!(rule.anchor, PlacementAnchor::BOTTOM | PlacementAnchor::LEFT);
        assert_eq!(rule.gravity, PlacementGravity::BOTTOM | PlacementGravity::RIGHT);

        rule.flip_vertically();
        assert_eq!(rule.anchor, PlacementAnchor::TOP | PlacementAnchor::LEFT);
        assert_eq!(rule.gravity, PlacementGravity::TOP | PlacementGravity::RIGHT);
    }
}
