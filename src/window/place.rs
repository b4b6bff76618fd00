//! Initial window placement.
//!
//! Decides where a window being shown for the first time goes: centered for
//! dialogs and splash screens, first-fit for normal windows, a fuzzy cascade
//! when nothing fits, and most-free-space next to the focus window for
//! windows denied focus. The constraint solver then refines the result.

use oriel_ipc::{Point, Rect};

use super::{
    PlacementAnchor, PlacementGravity, PlacementRule, Window, WindowType,
    MAX_UNMAXIMIZED_WINDOW_AREA, TITLEBAR_HEIGHT,
};
use crate::utils::distance_sq;

/// Honors user attempts to manually cascade.
const CASCADE_FUZZ: i32 = 15;
/// Space between cascade runs.
const CASCADE_INTERVAL: i32 = 50;

bitflags::bitflags! {
    /// Flags for one placement request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PlaceFlags: u8 {
        /// Compute an initial position; without this, placement is a no-op.
        const CALCULATE = 1;
        /// The window was denied focus and is not transient to the focus
        /// window; keep it from covering the focus window.
        const DENIED_FOCUS_AND_NOT_TRANSIENT = 1 << 1;
    }
}

/// Another window relevant for placement: visible, on the right workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingWindow {
    /// Frame rectangle.
    pub rect: Rect,
    pub window_type: WindowType,
}

/// Everything placement reads besides the window itself.
#[derive(Debug, Clone, Copy)]
pub struct PlacementContext<'a> {
    /// Visible windows on the relevant workspaces.
    pub windows: &'a [ExistingWindow],
    pub focus_window: Option<&'a ExistingWindow>,
    /// Work area of the monitor holding the focus window.
    pub focus_work_area: Rect,
    /// Frame rect of the transient parent, if any.
    pub parent_rect: Option<Rect>,
    pub prefs: super::Prefs,
    /// Left-to-right text direction.
    pub ltr: bool,
}

/// Result of a placement request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: i32,
    pub y: i32,
    /// The placed size nearly fills the work area; maximize instead.
    pub auto_maximize: bool,
}

/// Computes the initial frame position for `window` at `new_width` ×
/// `new_height`, starting from the requested `(x, y)`.
pub fn place_window(
    window: &Window,
    ctx: &PlacementContext,
    monitor_rect: Rect,
    work_area: Rect,
    flags: PlaceFlags,
    x: i32,
    y: i32,
    new_width: i32,
    new_height: i32,
) -> Placement {
    let auto_maximize = |x: i32, y: i32| {
        let window_area = new_width as i64 * new_height as i64;
        let work_area_area = work_area.width as i64 * work_area.height as i64;
        Placement {
            x,
            y,
            auto_maximize: ctx.prefs.auto_maximize
                && window.showing_for_first_time
                && window.has_maximize_func
                && window_area as f64 > work_area_area as f64 * MAX_UNMAXIMIZED_WINDOW_AREA,
        }
    };
    let as_is = |x: i32, y: i32| Placement {
        x,
        y,
        auto_maximize: false,
    };

    trace!("placing {:?} window", window.window_type);

    if !window.window_type.is_placeable() {
        // The app knows best how to place these.
        return as_is(x, y);
    }

    let hints = &window.size_hints;
    if ctx.prefs.disable_workarounds {
        // Only honor USER_POSITION on normal windows; apps claim the user set
        // -geometry for dialogs and docks all the time.
        if window.window_type == WindowType::Normal && hints.user_position_set {
            trace!("honoring user position instead of placing");
            return as_is(x, y);
        }
    } else if hints.program_position_set || hints.user_position_set {
        let (x, y) = avoid_being_obscured_as_second_modal_dialog(
            window, ctx, flags, x, y, new_width, new_height,
        );
        return as_is(x, y);
    }

    if matches!(
        window.window_type,
        WindowType::Dialog | WindowType::ModalDialog
    ) || (window.window_type == WindowType::Normal && ctx.parent_rect.is_some())
    {
        if let Some(parent) = ctx.parent_rect {
            // Center over the parent, leaving twice as much space below as on
            // top.
            let mut x = parent.x + parent.width / 2 - new_width / 2;
            let mut y = parent.y + (parent.height - new_height) / 3;
            (x, y) = avoid_being_obscured_as_second_modal_dialog(
                window, ctx, flags, x, y, new_width, new_height,
            );
            return auto_maximize(x, y);
        }
    }

    let place_centered = window_place_centered(window, ctx);

    let (mut x, mut y) = if place_centered {
        find_next_cascade(
            work_area,
            ctx.windows,
            new_width,
            new_height,
            true,
            ctx.ltr,
        )
    } else {
        match find_first_fit(ctx.windows, work_area, ctx.ltr, new_width, new_height) {
            Some(pos) => pos,
            None => find_next_cascade(
                work_area,
                ctx.windows,
                new_width,
                new_height,
                false,
                ctx.ltr,
            ),
        }
    };

    // A window denied focus should not cover the focus window if at all
    // possible.
    if flags.contains(PlaceFlags::DENIED_FOCUS_AND_NOT_TRANSIENT) {
        if let Some(focus) = ctx.focus_window {
            let mut found_fit = !rects_overlap(x, y, new_width, new_height, focus.rect);

            if !found_fit {
                // First fit against just the focus window.
                x = monitor_rect.x;
                y = monitor_rect.y;
                match find_first_fit(
                    std::slice::from_ref(focus),
                    work_area,
                    ctx.ltr,
                    new_width,
                    new_height,
                ) {
                    Some(pos) => {
                        (x, y) = pos;
                        found_fit = true;
                    }
                    None => found_fit = false,
                }
            }

            if !found_fit {
                (x, y) = find_most_freespace(
                    new_width,
                    new_height,
                    focus,
                    ctx.focus_work_area,
                    x,
                    y,
                );
            }
        }
    }

    auto_maximize(x, y)
}

fn window_place_centered(window: &Window, ctx: &PlacementContext) -> bool {
    matches!(
        window.window_type,
        WindowType::Dialog | WindowType::ModalDialog | WindowType::Splashscreen
    ) || (window.window_type == WindowType::Normal && ctx.prefs.center_new_windows)
}

fn rects_overlap(x: i32, y: i32, width: i32, height: i32, other: Rect) -> bool {
    Rect::new(x, y, width, height).overlaps(&other)
}

/// A second modal dialog denied focus must not sit on top of the first one
/// (the focus window); move it to the freest side instead.
fn avoid_being_obscured_as_second_modal_dialog(
    window: &Window,
    ctx: &PlacementContext,
    flags: PlaceFlags,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
) -> (i32, i32) {
    let Some(focus) = ctx.focus_window else {
        return (x, y);
    };

    if flags.contains(PlaceFlags::DENIED_FOCUS_AND_NOT_TRANSIENT)
        && window.window_type == WindowType::ModalDialog
        && rects_overlap(x, y, width, height, focus.rect)
    {
        trace!("denied-focus modal dialog moved out of the focus window's way");
        return find_most_freespace(width, height, focus, ctx.focus_work_area, x, y);
    }

    (x, y)
}

/// Places the window on the side of the focus window with the most free
/// area, adjacent if it fits, clamped to the work area edge if not.
fn find_most_freespace(
    width: i32,
    height: i32,
    focus: &ExistingWindow,
    work_area: Rect,
    x: i32,
    y: i32,
) -> (i32, i32) {
    let avoid = focus.rect;

    let max_width = avoid.width.min(width);
    let max_height = avoid.height.min(height);
    let left_space = avoid.x - work_area.x;
    let right_space = work_area.width - (avoid.x + avoid.width - work_area.x);
    let top_space = avoid.y - work_area.y;
    let bottom_space = work_area.height - (avoid.y + avoid.height - work_area.y);
    let left = left_space.min(width);
    let right = right_space.min(width);
    let top = top_space.min(height);
    let bottom = bottom_space.min(height);

    #[derive(Clone, Copy, PartialEq)]
    enum Side {
        Left,
        Right,
        Top,
        Bottom,
    }

    let mut side = Side::Left;
    let mut max_area = left as i64 * max_height as i64;
    if right as i64 * max_height as i64 > max_area {
        side = Side::Right;
        max_area = right as i64 * max_height as i64;
    }
    if top as i64 * max_width as i64 > max_area {
        side = Side::Top;
        max_area = top as i64 * max_width as i64;
    }
    if bottom as i64 * max_width as i64 > max_area {
        side = Side::Bottom;
        max_area = bottom as i64 * max_width as i64;
    }

    // Nowhere to put it (e.g. the focus window is maximized).
    if max_area == 0 {
        return (x, y);
    }

    match side {
        Side::Left => (
            if left_space > width {
                avoid.x - width
            } else {
                work_area.x
            },
            avoid.y,
        ),
        Side::Right => (
            if right_space > width {
                avoid.x + avoid.width
            } else {
                work_area.x + work_area.width - width
            },
            avoid.y,
        ),
        Side::Top => (
            avoid.x,
            if top_space > height {
                avoid.y - height
            } else {
                work_area.y
            },
        ),
        Side::Bottom => (
            avoid.x,
            if bottom_space > height {
                avoid.y + avoid.height
            } else {
                work_area.y + work_area.height - height
            },
        ),
    }
}

fn rectangle_overlaps_some_window(rect: &Rect, windows: &[&ExistingWindow]) -> bool {
    windows
        .iter()
        .filter(|w| w.window_type.obstructs_placement())
        .any(|w| rect.overlaps(&w.rect))
}

/// Tiles a window such that the extra space is equal on either side, so a
/// full screen of windows tiled this way comes out centered as a group.
fn center_tile_rect_in_area(rect: &mut Rect, work_area: Rect, ltr: bool) {
    let fluff = (work_area.width % (rect.width + 1)) / 2;
    rect.x = if ltr {
        work_area.x + fluff
    } else {
        work_area.x + work_area.width - rect.width - fluff
    };
    let fluff = (work_area.height % (rect.height + 1)) / 3;
    rect.y = work_area.y + fluff;
}

/// Finds an empty spot aligned with existing windows: the centered tile
/// position, below each window, then to the right (left in RTL) of each
/// window. Brute force, but the candidate list is small.
fn find_first_fit(
    windows: &[ExistingWindow],
    work_area: Rect,
    ltr: bool,
    width: i32,
    height: i32,
) -> Option<(i32, i32)> {
    let mut rect = Rect::from_size(width, height);

    // Below each window: sorted top-to-bottom, then reading order.
    let mut below_sorted: Vec<&ExistingWindow> = windows.iter().collect();
    below_sorted.sort_by_key(|w| if ltr { w.rect.x } else { -w.rect.x });
    below_sorted.sort_by_key(|w| w.rect.y);

    // Beside each window: sorted in reading order, then top-to-bottom.
    let mut end_sorted: Vec<&ExistingWindow> = windows.iter().collect();
    end_sorted.sort_by_key(|w| w.rect.y);
    end_sorted.sort_by_key(|w| if ltr { w.rect.x } else { -w.rect.x });

    center_tile_rect_in_area(&mut rect, work_area, ltr);
    if work_area.contains_rect(&rect) && !rectangle_overlaps_some_window(&rect, &below_sorted) {
        return Some((rect.x, rect.y));
    }

    for w in &below_sorted {
        rect.x = w.rect.x;
        rect.y = w.rect.y2();
        if work_area.contains_rect(&rect) && !rectangle_overlaps_some_window(&rect, &below_sorted) {
            return Some((rect.x, rect.y));
        }
    }

    for w in &end_sorted {
        rect.x = if ltr { w.rect.x2() } else { w.rect.x - rect.width };
        rect.y = w.rect.y;
        if work_area.contains_rect(&rect) && !rectangle_overlaps_some_window(&rect, &end_sorted) {
            return Some((rect.x, rect.y));
        }
    }

    None
}

/// Fuzzy cascade: walk the existing windows sorted from the leading corner
/// (or the center, for centered placement); whenever one sits close to the
/// current candidate position, step down the diagonal. Start a new run,
/// shifted by [`CASCADE_INTERVAL`], when a run would leave the work area.
fn find_next_cascade(
    work_area: Rect,
    windows: &[ExistingWindow],
    width: i32,
    height: i32,
    place_centered: bool,
    ltr: bool,
) -> (i32, i32) {
    let mut sorted: Vec<&ExistingWindow> = windows.iter().collect();
    if place_centered {
        let corner_x = work_area.width / 2 + (if ltr { -1 } else { 1 }) * width / 2;
        let corner_y = work_area.height / 2 - height / 2;
        sorted.sort_by_key(|w| {
            distance_sq(
                corner_x,
                corner_y,
                w.rect.x - work_area.x,
                w.rect.y - work_area.y,
            )
        });
    } else if ltr {
        sorted.sort_by_key(|w| {
            distance_sq(0, 0, w.rect.x - work_area.x, w.rect.y - work_area.y)
        });
    } else {
        sorted.sort_by_key(|w| {
            distance_sq(0, 0, work_area.x2() - w.rect.x2(), w.rect.y - work_area.y)
        });
    }

    let adjusted_center_x = work_area.x + work_area.width / 2 - width / 2;
    let adjusted_center_y = work_area.y + work_area.height / 2 - height / 2;

    let cascade_origin_x = if place_centered {
        adjusted_center_x
    } else if ltr {
        work_area.x.max(0)
    } else {
        work_area.x + work_area.width - width
    };
    let origin_y = if place_centered {
        adjusted_center_y
    } else {
        work_area.y
    }
    .max(0);

    let mut cascade_x = cascade_origin_x;
    let mut cascade_y = origin_y;
    let mut cascade_stage = 0;

    let mut i = 0;
    while i < sorted.len() {
        let w = sorted[i];
        let (wx, wy, ww) = (w.rect.x, w.rect.y, w.rect.width);

        let nearby = if ltr {
            (wx - cascade_x).abs() < CASCADE_FUZZ && (wy - cascade_y).abs() < CASCADE_FUZZ
        } else {
            ((wx + ww) - (cascade_x + width)).abs() < CASCADE_FUZZ
                && (wy - cascade_y).abs() < CASCADE_FUZZ
        };

        if nearby {
            // Step down the diagonal by the titlebar height.
            cascade_x = if ltr {
                wx + TITLEBAR_HEIGHT
            } else {
                wx + ww - TITLEBAR_HEIGHT - width
            };
            cascade_y = wy + TITLEBAR_HEIGHT;

            if cascade_x + width > work_area.x2()
                || cascade_x < work_area.x
                || cascade_y + height > work_area.y2()
            {
                cascade_x = cascade_origin_x;
                cascade_y = origin_y;

                cascade_stage += 1;
                if ltr {
                    cascade_x += CASCADE_INTERVAL * cascade_stage;
                } else {
                    cascade_x -= CASCADE_INTERVAL * cascade_stage;
                }

                if cascade_x + width < work_area.x2() && cascade_x >= work_area.x {
                    // Restart the scan against the translated run.
                    i = 0;
                    continue;
                } else {
                    // Out of space; the original origin will have to do.
                    cascade_x = cascade_origin_x;
                    break;
                }
            }
        }

        i += 1;
    }

    (cascade_x, cascade_y)
}

/// Resolves a positioner rule to a position relative to the parent.
pub fn resolve_placement_rule(rule: &PlacementRule) -> Point {
    let anchor_rect = rule.anchor_rect;

    // Anchor point on the anchor rectangle.
    let mut x = if rule.anchor.contains(PlacementAnchor::LEFT) {
        anchor_rect.x
    } else if rule.anchor.contains(PlacementAnchor::RIGHT) {
        anchor_rect.x2()
    } else {
        anchor_rect.x + anchor_rect.width / 2
    };
    let mut y = if rule.anchor.contains(PlacementAnchor::TOP) {
        anchor_rect.y
    } else if rule.anchor.contains(PlacementAnchor::BOTTOM) {
        anchor_rect.y2()
    } else {
        anchor_rect.y + anchor_rect.height / 2
    };

    // Shift according to gravity.
    if rule.gravity.contains(PlacementGravity::LEFT) {
        x -= rule.width;
    } else if !rule.gravity.contains(PlacementGravity::RIGHT) {
        x -= rule.width / 2;
    }
    if rule.gravity.contains(PlacementGravity::TOP) {
        y -= rule.height;
    } else if !rule.gravity.contains(PlacementGravity::BOTTOM) {
        y -= rule.height / 2;
    }

    Point {
        x: x + rule.offset.x,
        y: y + rule.offset.y,
    }
}
