//! The window constraint solver.
//!
//! Every move/resize request runs through a fixed, ordered list of named
//! rules. Each rule is tagged with a [`Tier`]; the solver enforces all rules
//! at or above the current tier, checks whether they are simultaneously
//! satisfied, and if not raises the tier, sacrificing the least essential
//! rules first. An unsatisfiable set degrades to best effort; the solver
//! never reports failure.
//!
//! To add a rule: give it a tier in [`ALL_CONSTRAINTS`] (or `None` for
//! unconditional), and write a function in the shape of the existing ones —
//! early-return `true` when the rule does not apply *or cannot possibly be
//! satisfied* (otherwise every lower-tier rule gets dropped along with it),
//! return the satisfaction state under `check_only`, and enforce otherwise.

use oriel_ipc::{Gravity, Point, Rect};

use super::place::{self, ExistingWindow, PlaceFlags, PlacementContext};
use super::{
    ConstraintAdjustment, PlacementState, Prefs, TileMode, Window, WindowType, TITLEBAR_HEIGHT,
};
use crate::monitor::LogicalMonitor;
use crate::region::{
    clamp_rect_to_region, clip_rect_to_region, expand_region_conditionally,
    expand_to_avoiding_struts, merge_regions, region_contains_rect, region_could_fit_rect,
    region_overlaps_rect, resize_with_gravity, shove_rect_into_region, spanning_rects,
    ExpandDirection, FixedDirections, Strut,
};
use crate::utils::line_point_closest_to_point;

bitflags::bitflags! {
    /// What a geometry request does.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MoveResizeFlags: u8 {
        const MOVE_ACTION = 1;
        const RESIZE_ACTION = 1 << 1;
        /// The request came from the user, not the program.
        const USER_ACTION = 1 << 2;
        /// The requested rectangle position is meaningless; don't derive the
        /// target monitor from it.
        const RECT_INVALID = 1 << 3;
        /// Completion of an interactive move/resize.
        const FINISH_MOVE_RESIZE = 1 << 4;
    }
}

/// State of an ongoing interactive drag, as far as the solver cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragState {
    /// The grab explicitly allows dragging the titlebar offscreen.
    pub unconstrained: bool,
    /// The grab is a resize.
    pub resizing: bool,
}

/// Read-only snapshot of the world a solve runs against.
#[derive(Clone, Copy)]
pub struct ConstraintEnv<'a> {
    pub logical_monitors: &'a [LogicalMonitor],
    /// Index of the primary logical monitor.
    pub primary_monitor: Option<usize>,
    pub struts: &'a [Strut],
    /// Visible windows relevant for placement.
    pub windows: &'a [ExistingWindow],
    pub focus_window: Option<&'a ExistingWindow>,
    /// Frame rect of the window's transient parent.
    pub parent_rect: Option<Rect>,
    /// Index of the logical monitor holding the pointer.
    pub pointer_monitor: Option<usize>,
    pub drag: Option<DragState>,
    pub prefs: Prefs,
    pub ltr: bool,
}

impl ConstraintEnv<'_> {
    /// The monitor rectangle minus struts.
    pub fn work_area_for(&self, monitor_rect: Rect) -> Rect {
        let mut x1 = monitor_rect.x;
        let mut y1 = monitor_rect.y;
        let mut x2 = monitor_rect.x2();
        let mut y2 = monitor_rect.y2();

        for strut in self.struts {
            if !strut.rect.overlaps(&monitor_rect) {
                continue;
            }
            match strut.side {
                crate::region::Side::Left => x1 = x1.max(strut.rect.x2()),
                crate::region::Side::Right => x2 = x2.min(strut.rect.x),
                crate::region::Side::Top => y1 = y1.max(strut.rect.y2()),
                crate::region::Side::Bottom => y2 = y2.min(strut.rect.y),
            }
        }

        Rect::new(x1, y1, (x2 - x1).max(0), (y2 - y1).max(0))
    }

    fn usable_screen_region(&self) -> Vec<Rect> {
        merge_regions(
            self.logical_monitors
                .iter()
                .map(|monitor| spanning_rects(monitor.rect, self.struts)),
        )
    }

    fn usable_monitor_region(&self, monitor_rect: Rect) -> Vec<Rect> {
        spanning_rects(monitor_rect, self.struts)
    }

    fn monitor_index_at(&self, rect: &Rect) -> Option<usize> {
        if rect.width == 0 || rect.height == 0 {
            let point = Point {
                x: rect.x,
                y: rect.y,
            };
            return self
                .logical_monitors
                .iter()
                .position(|l| l.rect.contains_point(point));
        }

        self.logical_monitors
            .iter()
            .enumerate()
            .filter_map(|(idx, l)| Some((idx, l.rect.intersection(rect)?.area())))
            .max_by_key(|(_, area)| *area)
            .map(|(idx, _)| idx)
    }

    fn monitor_index_by_number(&self, number: usize) -> Option<usize> {
        self.logical_monitors.iter().position(|l| l.number == number)
    }
}

/// Priority tier of a constraint rule. Lower tiers are sacrificed first when
/// the rules cannot all hold at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    /// Nice-to-haves: aspect ratio, staying on one monitor.
    Cosmetic = 0,
    /// Comfortable containment: fully on the work area, size increments.
    Comfort = 1,
    /// The window's mode: maximized, tiled, fullscreen.
    Mode = 2,
    /// Client size limits.
    Limits = 3,
    /// Kept whenever at all possible: titlebar visibility, minimal
    /// visibility, positioner rules.
    Essential = 4,
}

const TIER_MAX: u8 = Tier::Essential as u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionType {
    Move,
    Resize,
    MoveAndResize,
}

/// Working state of one solve.
struct ConstraintInfo {
    orig: Rect,
    current: Rect,
    /// Position applied while an asynchronous reposition is in flight.
    temporary: Rect,
    rel: Point,
    action: ActionType,
    is_user_action: bool,
    gravity: Gravity,
    fixed: FixedDirections,
    work_area_monitor: Rect,
    entire_monitor: Rect,
    usable_screen_region: Vec<Rect>,
    usable_monitor_region: Vec<Rect>,
}

/// Output of the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constrained {
    /// The final constrained rectangle.
    pub rect: Rect,
    /// Rectangle to apply while the final position awaits the client's
    /// acknowledgement.
    pub temporary: Rect,
    /// Position relative to the parent, for positioner-ruled windows.
    pub rel: Point,
    /// Initial placement found the window oversized; maximize it.
    pub auto_maximize: bool,
}

type ConstraintFn = fn(&mut Window, &ConstraintEnv, &mut ConstraintInfo, bool) -> bool;

struct ConstraintDef {
    name: &'static str,
    /// `None` runs unconditionally at every tier.
    tier: Option<Tier>,
    func: ConstraintFn,
}

/// All rules, in evaluation order. Later rules act on earlier results.
const ALL_CONSTRAINTS: &[ConstraintDef] = &[
    ConstraintDef {
        name: "custom_rule",
        tier: Some(Tier::Essential),
        func: constrain_custom_rule,
    },
    ConstraintDef {
        name: "modal_dialog",
        tier: None,
        func: constrain_modal_dialog,
    },
    ConstraintDef {
        name: "maximization",
        tier: Some(Tier::Mode),
        func: constrain_maximization,
    },
    ConstraintDef {
        name: "tiling",
        tier: Some(Tier::Mode),
        func: constrain_tiling,
    },
    ConstraintDef {
        name: "fullscreen",
        tier: Some(Tier::Mode),
        func: constrain_fullscreen,
    },
    ConstraintDef {
        name: "size_increments",
        tier: Some(Tier::Comfort),
        func: constrain_size_increments,
    },
    ConstraintDef {
        name: "size_limits",
        tier: Some(Tier::Limits),
        func: constrain_size_limits,
    },
    ConstraintDef {
        name: "aspect_ratio",
        tier: Some(Tier::Cosmetic),
        func: constrain_aspect_ratio,
    },
    ConstraintDef {
        name: "to_single_monitor",
        tier: Some(Tier::Cosmetic),
        func: constrain_to_single_monitor,
    },
    ConstraintDef {
        name: "fully_onscreen",
        tier: Some(Tier::Comfort),
        func: constrain_fully_onscreen,
    },
    ConstraintDef {
        name: "titlebar_visible",
        tier: Some(Tier::Essential),
        func: constrain_titlebar_visible,
    },
    ConstraintDef {
        name: "partially_onscreen",
        tier: Some(Tier::Essential),
        func: constrain_partially_onscreen,
    },
];

/// Constrains a move/resize of `window` from `orig` to `new`.
///
/// Also computes initial placement when `place_flags` asks for it and the
/// window has not been placed yet, and afterwards re-learns the window's
/// on-screen requirement flags from where the request wanted it.
pub fn constrain(
    window: &mut Window,
    env: &ConstraintEnv,
    flags: MoveResizeFlags,
    place_flags: PlaceFlags,
    gravity: Gravity,
    orig: Rect,
    new: Rect,
) -> Constrained {
    trace!(
        "constraining in move from {} to {}",
        orig,
        new,
    );

    if env.logical_monitors.is_empty() {
        // Headless; nothing to constrain against.
        return Constrained {
            rect: new,
            temporary: new,
            rel: Point::default(),
            auto_maximize: false,
        };
    }

    let mut info = setup_constraint_info(window, env, flags, gravity, orig, new);
    let auto_maximize = place_window_if_needed(window, env, place_flags, &mut info);

    let mut tier = 0u8;
    let mut satisfied = false;
    while !satisfied && tier <= TIER_MAX {
        // Individually enforce all the still-active rules, then check whether
        // they hold simultaneously.
        do_all_constraints(window, env, &mut info, tier, false);
        satisfied = do_all_constraints(window, env, &mut info, tier, true);

        // Drop the least essential rules if they can't all be satisfied.
        tier += 1;
    }

    update_onscreen_requirements(window, &info);

    Constrained {
        rect: info.current,
        temporary: info.temporary,
        rel: info.rel,
        auto_maximize,
    }
}

fn do_all_constraints(
    window: &mut Window,
    env: &ConstraintEnv,
    info: &mut ConstraintInfo,
    tier: u8,
    check_only: bool,
) -> bool {
    let mut satisfied = true;
    for def in ALL_CONSTRAINTS {
        if def.tier.is_some_and(|t| (t as u8) < tier) {
            continue;
        }

        satisfied = satisfied && (def.func)(window, env, info, check_only);

        if !check_only {
            trace!("current is {} after {}", info.current, def.name);
        } else if !satisfied {
            trace!("constraint {} not satisfied", def.name);
            return false;
        }
    }

    satisfied
}

fn setup_constraint_info(
    window: &Window,
    env: &ConstraintEnv,
    flags: MoveResizeFlags,
    gravity: Gravity,
    orig: Rect,
    new: Rect,
) -> ConstraintInfo {
    let mut current = new;
    current.width = current.width.max(1);
    current.height = current.height.max(1);

    let action = if flags.contains(MoveResizeFlags::MOVE_ACTION | MoveResizeFlags::RESIZE_ACTION) {
        ActionType::MoveAndResize
    } else if flags.contains(MoveResizeFlags::RESIZE_ACTION) {
        ActionType::Resize
    } else {
        ActionType::Move
    };

    let is_user_action = flags.contains(MoveResizeFlags::USER_ACTION);

    // "Move to the nearest valid position" is a poorer choice than "move to
    // the nearest valid position along the axis the user is changing".
    let mut fixed = FixedDirections::empty();
    if orig.x == new.x
        && orig.x2() == new.x2()
        && (orig.y != new.y || orig.y2() != new.y2())
    {
        fixed = FixedDirections::X;
    }
    if orig.y == new.y
        && orig.y2() == new.y2()
        && (orig.x != new.x || orig.x2() != new.x2())
    {
        fixed = FixedDirections::Y;
    }
    if !is_user_action {
        fixed = FixedDirections::empty();
    }

    let monitor_idx = if let Some(rule) = window.placement_rule() {
        let mut anchor = rule.anchor_rect;
        anchor.x += rule.parent_rect.x;
        anchor.y += rule.parent_rect.y;
        env.monitor_index_at(&anchor)
            .or_else(|| env.monitor_index_at(&rule.parent_rect))
    } else {
        let mut idx = None;
        if !flags.contains(MoveResizeFlags::RECT_INVALID) {
            idx = env.monitor_index_at(&current);
        }
        idx.or_else(|| window.monitor.and_then(|n| env.monitor_index_by_number(n)))
    };
    let monitor_idx = match monitor_idx.or(env.primary_monitor) {
        Some(idx) => idx,
        None => {
            warn!("no sensible logical monitor could be used for constraining");
            0
        }
    };
    let logical_monitor = &env.logical_monitors[monitor_idx];

    let work_area_monitor = env.work_area_for(logical_monitor.rect);

    let entire_monitor = match (window.is_fullscreen(), window.fullscreen_monitors) {
        (true, Some(spanned)) => {
            let mut rect = logical_monitor.rect;
            for number in [spanned.top, spanned.bottom, spanned.left, spanned.right] {
                if let Some(idx) = env.monitor_index_by_number(number) {
                    rect = rect.union(&env.logical_monitors[idx].rect);
                }
            }
            rect
        }
        _ => logical_monitor.rect,
    };

    ConstraintInfo {
        orig,
        current,
        temporary: orig,
        rel: Point::default(),
        action,
        is_user_action,
        gravity,
        fixed,
        work_area_monitor,
        entire_monitor,
        usable_screen_region: env.usable_screen_region(),
        usable_monitor_region: env.usable_monitor_region(logical_monitor.rect),
    }
}

/// Runs initial placement, so position constraints apply even in a move-only
/// context. Maximized, minimized and fullscreen windows wait until they leave
/// that state.
fn place_window_if_needed(
    window: &mut Window,
    env: &ConstraintEnv,
    place_flags: PlaceFlags,
    info: &mut ConstraintInfo,
) -> bool {
    let mut auto_maximize = false;

    if window.placed
        || !place_flags.contains(PlaceFlags::CALCULATE)
        || window.is_any_maximized()
        || window.minimized
        || window.is_fullscreen()
    {
        return auto_maximize;
    }

    let mut placed_rect = Rect::new(
        window.rect.x,
        window.rect.y,
        info.current.width,
        info.current.height,
    );

    if let Some(rule) = window.placement.rule.clone() {
        let rel = place::resolve_placement_rule(&rule);
        info.rel = rel;
        placed_rect.x = rule.parent_rect.x + rel.x;
        placed_rect.y = rule.parent_rect.y + rel.y;
    } else {
        let monitor_idx = if window.showing_for_first_time {
            env.pointer_monitor
        } else {
            window.monitor.and_then(|n| env.monitor_index_by_number(n))
        };
        let monitor_idx = monitor_idx.or(env.primary_monitor).unwrap_or(0);
        let logical_monitor = &env.logical_monitors[monitor_idx];
        let work_area = env.work_area_for(logical_monitor.rect);

        let focus_work_area = env
            .focus_window
            .and_then(|focus| env.monitor_index_at(&focus.rect))
            .map(|idx| env.work_area_for(env.logical_monitors[idx].rect))
            .unwrap_or(work_area);

        let ctx = PlacementContext {
            windows: env.windows,
            focus_window: env.focus_window,
            focus_work_area,
            parent_rect: env.parent_rect,
            prefs: env.prefs,
            ltr: env.ltr,
        };
        let placement = place::place_window(
            window,
            &ctx,
            logical_monitor.rect,
            work_area,
            place_flags,
            info.orig.x,
            info.orig.y,
            info.current.width,
            info.current.height,
        );
        placed_rect.x = placement.x;
        placed_rect.y = placement.y;
        auto_maximize = placement.auto_maximize;

        // Placing the window may have changed the monitor.
        if let Some(idx) = env.monitor_index_at(&placed_rect) {
            let logical_monitor = &env.logical_monitors[idx];
            info.entire_monitor = logical_monitor.rect;
            info.work_area_monitor = env.work_area_for(logical_monitor.rect);
            info.usable_monitor_region = env.usable_monitor_region(logical_monitor.rect);
        }
    }

    window.placed = true;
    info.current.x = placed_rect.x;
    info.current.y = placed_rect.y;

    // The window was just placed; no direction is fixed.
    info.fixed = FixedDirections::empty();

    auto_maximize
}

fn update_onscreen_requirements(window: &mut Window, info: &ConstraintInfo) {
    // Only normal-ish windows have on-screen requirements, and fullscreen is
    // handled specially; updating the flags when entering fullscreen messes
    // up the handling when leaving it.
    if matches!(window.window_type, WindowType::Desktop | WindowType::Dock) {
        return;
    }
    if window.is_fullscreen() {
        return;
    }

    let old = window.require_fully_onscreen;
    window.require_fully_onscreen =
        region_contains_rect(&info.usable_screen_region, &info.current);
    if old != window.require_fully_onscreen {
        trace!(
            "require_fully_onscreen toggled to {}",
            window.require_fully_onscreen,
        );
    }

    let old = window.require_on_single_monitor;
    window.require_on_single_monitor =
        region_contains_rect(&info.usable_monitor_region, &info.current);
    if old != window.require_on_single_monitor {
        trace!(
            "require_on_single_monitor toggled to {}",
            window.require_on_single_monitor,
        );
    }

    if window.decorated {
        let mut titlebar_rect = info.current;
        titlebar_rect.height = TITLEBAR_HEIGHT;
        window.require_titlebar_visible =
            region_overlaps_rect(&info.usable_screen_region, &titlebar_rect);
    }
}

fn get_start_rect_for_resize(info: &ConstraintInfo) -> Rect {
    if !info.is_user_action && info.action == ActionType::MoveAndResize {
        info.current
    } else {
        info.orig
    }
}

fn intersection_or_empty(a: &Rect, b: &Rect) -> Rect {
    a.intersection(b).unwrap_or(Rect::new(a.x, a.y, 0, 0))
}

fn is_custom_rule_satisfied(
    rect: &Rect,
    adjustment: ConstraintAdjustment,
    intersection: &Rect,
) -> bool {
    let x_actions = ConstraintAdjustment::SLIDE_X | ConstraintAdjustment::FLIP_X;
    let y_actions = ConstraintAdjustment::SLIDE_Y | ConstraintAdjustment::FLIP_Y;

    !((adjustment.intersects(x_actions) && rect.width != intersection.width)
        || (adjustment.intersects(y_actions) && rect.height != intersection.height))
}

enum FlipAxis {
    X,
    Y,
}

fn try_flip_window_position(
    info: &mut ConstraintInfo,
    rule: &mut super::PlacementRule,
    axis: FlipAxis,
    parent_x: i32,
    parent_y: i32,
    intersection: &mut Rect,
) {
    let mut flipped_rule = rule.clone();
    match axis {
        FlipAxis::X => flipped_rule.flip_horizontally(),
        FlipAxis::Y => flipped_rule.flip_vertically(),
    }

    let flipped_rel = place::resolve_placement_rule(&flipped_rule);
    let mut flipped_rect = info.current;
    flipped_rect.x = parent_x + flipped_rel.x;
    flipped_rect.y = parent_y + flipped_rel.y;
    let flipped_intersection = intersection_or_empty(&flipped_rect, &info.work_area_monitor);

    let resolved = match axis {
        FlipAxis::X => flipped_intersection.width == flipped_rect.width,
        FlipAxis::Y => flipped_intersection.height == flipped_rect.height,
    };
    if resolved {
        *rule = flipped_rule;
        info.current = flipped_rect;
        info.rel = flipped_rel;
        *intersection = flipped_intersection;
    }
}

/// Resolve a positioner rule: place at the anchor, and on overflow try flip,
/// then slide, then clamp-resize, per the rule's allowed adjustments. Tracks
/// the pending placement for the asynchronous client handshake.
fn constrain_custom_rule(
    window: &mut Window,
    env: &ConstraintEnv,
    info: &mut ConstraintInfo,
    check_only: bool,
) -> bool {
    let Some(mut rule) = window.placement.rule.clone() else {
        return true;
    };

    let parent_rect = env.parent_rect.unwrap_or(rule.parent_rect);
    if window.placement.state == PlacementState::ConstrainedFinished {
        rule.parent_rect.x = parent_rect.x;
        rule.parent_rect.y = parent_rect.y;
    }
    let parent_x = rule.parent_rect.x;
    let parent_y = rule.parent_rect.y;

    // The temporary position is what gets applied if the newly constrained
    // position needs asynchronous configuration — e.g. the parent moved, so
    // this window's absolute position changes only once the client
    // acknowledges the new relative position.
    let temporary_rect = match window.placement.state {
        PlacementState::Unconstrained => info.current,
        _ => Rect::new(
            parent_rect.x + window.placement.current_rel.x,
            parent_rect.y + window.placement.current_rel.y,
            info.current.width,
            info.current.height,
        ),
    };

    let mut adjusted_unconstrained = temporary_rect;
    let adjusted_rel;
    match window.placement.state {
        PlacementState::Invalidated | PlacementState::Unconstrained => {
            adjusted_rel = place::resolve_placement_rule(&rule);
            adjusted_unconstrained.x = parent_x + adjusted_rel.x;
            adjusted_unconstrained.y = parent_y + adjusted_rel.y;
        }
        PlacementState::ConstrainedFinished if rule.is_reactive => {
            adjusted_rel = place::resolve_placement_rule(&rule);
            adjusted_unconstrained.x = parent_x + adjusted_rel.x;
            adjusted_unconstrained.y = parent_y + adjusted_rel.y;
        }
        PlacementState::ConstrainedPending => {
            adjusted_rel = window.placement.pending_rel;
            adjusted_unconstrained.x = window.placement.pending_pos.x;
            adjusted_unconstrained.y = window.placement.pending_pos.y;
        }
        _ => {
            adjusted_rel = window.placement.current_rel;
        }
    }

    let mut intersection =
        intersection_or_empty(&adjusted_unconstrained, &info.work_area_monitor);

    let mut constraint_satisfied = info.current == adjusted_unconstrained
        && is_custom_rule_satisfied(
            &adjusted_unconstrained,
            rule.constraint_adjustment,
            &intersection,
        );

    if check_only {
        return constraint_satisfied;
    }

    info.current = adjusted_unconstrained;
    info.rel = adjusted_rel;
    info.temporary = temporary_rect;

    // Keep the stored rule in sync (the parent position may have been
    // refreshed above) even on the early-out paths.
    window.placement.rule = Some(rule.clone());

    match window.placement.state {
        PlacementState::ConstrainedFinished if !rule.is_reactive => return true,
        PlacementState::ConstrainedPending | PlacementState::ConstrainedConfigured => {
            return true;
        }
        _ => (),
    }

    if !constraint_satisfied {
        let adjustment = rule.constraint_adjustment;

        if info.current.width != intersection.width
            && adjustment.contains(ConstraintAdjustment::FLIP_X)
        {
            try_flip_window_position(
                info,
                &mut rule,
                FlipAxis::X,
                parent_x,
                parent_y,
                &mut intersection,
            );
        }
        if info.current.height != intersection.height
            && adjustment.contains(ConstraintAdjustment::FLIP_Y)
        {
            try_flip_window_position(
                info,
                &mut rule,
                FlipAxis::Y,
                parent_x,
                parent_y,
                &mut intersection,
            );
        }

        intersection = intersection_or_empty(&info.current, &info.work_area_monitor);
        constraint_satisfied =
            is_custom_rule_satisfied(&info.current, rule.constraint_adjustment, &intersection);

        if !constraint_satisfied {
            if adjustment.contains(ConstraintAdjustment::SLIDE_X) {
                let work_area_x2 = info.work_area_monitor.x2();
                let new_x = if info.current.x2() > work_area_x2 {
                    info.work_area_monitor
                        .x
                        .max(work_area_x2 - info.current.width)
                } else if info.current.x < info.work_area_monitor.x {
                    info.work_area_monitor.x
                } else {
                    info.current.x
                };
                info.rel.x += new_x - info.current.x;
                info.current.x = new_x;
            }
            if adjustment.contains(ConstraintAdjustment::SLIDE_Y) {
                let work_area_y2 = info.work_area_monitor.y2();
                let new_y = if info.current.y2() > work_area_y2 {
                    info.work_area_monitor
                        .y
                        .max(work_area_y2 - info.current.height)
                } else if info.current.y < info.work_area_monitor.y {
                    info.work_area_monitor.y
                } else {
                    info.current.y
                };
                info.rel.y += new_y - info.current.y;
                info.current.y = new_y;
            }

            intersection = intersection_or_empty(&info.current, &info.work_area_monitor);
            constraint_satisfied = is_custom_rule_satisfied(
                &info.current,
                rule.constraint_adjustment,
                &intersection,
            );

            if !constraint_satisfied {
                if adjustment.contains(ConstraintAdjustment::RESIZE_X) {
                    let new_x = intersection.x;
                    info.current.width = intersection.width;
                    info.rel.x += new_x - info.current.x;
                    info.current.x = new_x;
                }
                if adjustment.contains(ConstraintAdjustment::RESIZE_Y) {
                    let new_y = intersection.y;
                    info.current.height = intersection.height;
                    info.rel.y += new_y - info.current.y;
                    info.current.y = new_y;
                }
            }
        }
    }

    window.placement.rule = Some(rule);
    window.placement.state = PlacementState::ConstrainedPending;
    window.placement.pending_rel = info.rel;
    window.placement.pending_pos = Point {
        x: info.current.x,
        y: info.current.y,
    };

    true
}

/// Center an attached modal dialog over its parent, then keep it on screen.
/// Unconditional: runs at every tier.
fn constrain_modal_dialog(
    window: &mut Window,
    env: &ConstraintEnv,
    info: &mut ConstraintInfo,
    check_only: bool,
) -> bool {
    let Some(parent_rect) = env.parent_rect else {
        return true;
    };
    if !window.attached || window.placement_rule().is_some() {
        return true;
    }
    if window.is_fullscreen() {
        return true;
    }

    let x = parent_rect.x + (parent_rect.width / 2 - info.current.width / 2);
    let y = parent_rect.y + (parent_rect.height / 2 - info.current.height / 2);

    let constraint_already_satisfied = x == info.current.x && y == info.current.y;
    if check_only || constraint_already_satisfied {
        return constraint_already_satisfied;
    }

    info.current.x = x;
    info.current.y = y;

    // The centered position may hang off screen; reapply the screen-relative
    // clamp.
    let region = info.usable_screen_region.clone();
    do_screen_and_monitor_relative_constraints(window, &region, info, false)
}

fn constrain_maximization(
    window: &mut Window,
    env: &ConstraintEnv,
    info: &mut ConstraintInfo,
    check_only: bool,
) -> bool {
    if !window.is_any_maximized() || window.is_tiled_side_by_side() {
        return true;
    }

    let target_size = if window.is_maximized() && window.tile_mode == TileMode::Maximized {
        window.tile_area(TileMode::Maximized, info.work_area_monitor)
    } else if window.is_maximized() {
        info.work_area_monitor
    } else {
        // How far one axis can maximize depends on which struts could occlude
        // the window at its current position in the other axis.
        let direction = if window.maximized_horizontally {
            ExpandDirection::Horizontal
        } else {
            ExpandDirection::Vertical
        };
        let mut target_size = info.current;
        expand_to_avoiding_struts(&mut target_size, &info.entire_monitor, direction, env.struts);
        target_size
    };

    // Minimum size beats maximization; maximum size is ignored for maximized
    // windows.
    let (min_size, _) = window.size_limits();
    let hminbad = target_size.width < min_size.width && window.maximized_horizontally;
    let vminbad = target_size.height < min_size.height && window.maximized_vertically;
    if hminbad || vminbad {
        return true;
    }

    let horiz_equal =
        target_size.x == info.current.x && target_size.width == info.current.width;
    let vert_equal =
        target_size.y == info.current.y && target_size.height == info.current.height;
    let constraint_already_satisfied = (horiz_equal || !window.maximized_horizontally)
        && (vert_equal || !window.maximized_vertically);
    if check_only || constraint_already_satisfied {
        return constraint_already_satisfied;
    }

    if window.maximized_horizontally {
        info.current.x = target_size.x;
        info.current.width = target_size.width;
    }
    if window.maximized_vertically {
        info.current.y = target_size.y;
        info.current.height = target_size.height;
    }
    true
}

fn constrain_tiling(
    window: &mut Window,
    _env: &ConstraintEnv,
    info: &mut ConstraintInfo,
    check_only: bool,
) -> bool {
    if !window.is_tiled_side_by_side() {
        return true;
    }

    let target_size = window.tile_area(window.tile_mode, info.work_area_monitor);

    let (min_size, _) = window.size_limits();
    if target_size.width < min_size.width || target_size.height < min_size.height {
        return true;
    }

    let constraint_already_satisfied = target_size == info.current;
    if check_only || constraint_already_satisfied {
        return constraint_already_satisfied;
    }

    info.current = target_size;
    true
}

fn constrain_fullscreen(
    window: &mut Window,
    _env: &ConstraintEnv,
    info: &mut ConstraintInfo,
    check_only: bool,
) -> bool {
    if !window.is_fullscreen() {
        return true;
    }

    let monitor = info.entire_monitor;

    let (min_size, max_size) = window.size_limits();
    let too_big = monitor.width < min_size.width || monitor.height < min_size.height;
    let too_small = max_size.width < monitor.width || max_size.height < monitor.height;
    if too_big || too_small {
        return true;
    }

    let constraint_already_satisfied = info.current == monitor;
    if check_only || constraint_already_satisfied {
        return constraint_already_satisfied;
    }

    info.current = monitor;
    true
}

fn constrain_size_increments(
    window: &mut Window,
    _env: &ConstraintEnv,
    info: &mut ConstraintInfo,
    check_only: bool,
) -> bool {
    if window.is_maximized()
        || window.is_fullscreen()
        || window.is_tiled_side_by_side()
        || info.action == ActionType::Move
    {
        return true;
    }

    let client_rect = window.frame_rect_to_client_rect(info.current);

    let hints = &window.size_hints;
    let bh = hints.base_size.height;
    let hi = hints.size_increments.height.max(1);
    let bw = hints.base_size.width;
    let wi = hints.size_increments.width.max(1);
    let mut extra_height = (client_rect.height - bh) % hi;
    let mut extra_width = (client_rect.width - bw) % wi;
    if window.maximized_horizontally {
        extra_width = 0;
    }
    if window.maximized_vertically {
        extra_height = 0;
    }

    let constraint_already_satisfied = extra_height == 0 && extra_width == 0;
    if check_only || constraint_already_satisfied {
        return constraint_already_satisfied;
    }

    let mut new_width = client_rect.width - extra_width;
    let mut new_height = client_rect.height - extra_height;

    // Adjusting down may violate the minimum size; bump back up by whole
    // increments.
    if new_width < hints.min_size.width {
        new_width += ((hints.min_size.width - new_width) / wi + 1) * wi;
    }
    if new_height < hints.min_size.height {
        new_height += ((hints.min_size.height - new_height) / hi + 1) * hi;
    }

    let frame = window.client_rect_to_frame_rect(Rect::from_size(new_width, new_height));

    let start_rect = get_start_rect_for_resize(info);
    info.current = resize_with_gravity(&start_rect, info.gravity, frame.width, frame.height);
    true
}

fn constrain_size_limits(
    window: &mut Window,
    _env: &ConstraintEnv,
    info: &mut ConstraintInfo,
    check_only: bool,
) -> bool {
    if info.action == ActionType::Move {
        return true;
    }

    let (min_size, mut max_size) = window.size_limits();
    // Max size limits are ignored on the maximized axis.
    if window.maximized_horizontally {
        max_size.width = max_size.width.max(info.current.width);
    }
    if window.maximized_vertically {
        max_size.height = max_size.height.max(info.current.height);
    }

    let too_small =
        info.current.width < min_size.width || info.current.height < min_size.height;
    let too_big = info.current.width > max_size.width || info.current.height > max_size.height;
    let constraint_already_satisfied = !too_big && !too_small;
    if check_only || constraint_already_satisfied {
        return constraint_already_satisfied;
    }

    let new_width = info.current.width.max(min_size.width).min(max_size.width);
    let new_height = info.current.height.max(min_size.height).min(max_size.height);

    let start_rect = get_start_rect_for_resize(info);
    info.current = resize_with_gravity(&start_rect, info.gravity, new_width, new_height);
    true
}

fn constrain_aspect_ratio(
    window: &mut Window,
    _env: &ConstraintEnv,
    info: &mut ConstraintInfo,
    check_only: bool,
) -> bool {
    let hints = &window.size_hints;
    let minr = hints.min_aspect.0 as f64 / hints.min_aspect.1 as f64;
    let maxr = hints.max_aspect.0 as f64 / hints.max_aspect.1 as f64;
    let constraints_are_inconsistent = minr > maxr;

    if constraints_are_inconsistent
        || window.is_maximized()
        || window.is_fullscreen()
        || window.is_tiled_side_by_side()
        || info.action == ActionType::Move
    {
        return true;
    }

    // Need minr <= width/height <= maxr, with slack since width and height
    // are integers. One-sided resizes get a bigger fudge because of how
    // gravity-anchored resizing rounds.
    let fudge = match info.gravity {
        Gravity::West | Gravity::North | Gravity::South | Gravity::East => 2.,
        _ => 1.,
    };

    let client_rect = window.frame_rect_to_client_rect(info.current);
    let width = client_rect.width as f64;
    let height = client_rect.height as f64;

    let constraint_already_satisfied =
        width - height * minr > -minr * fudge && width - height * maxr < maxr * fudge;
    if check_only || constraint_already_satisfied {
        return constraint_already_satisfied;
    }

    let mut new_width = width;
    let mut new_height = height;

    match info.gravity {
        Gravity::West | Gravity::East => {
            new_height = f64::clamp(new_height, new_width / maxr, new_width / minr);
        }
        Gravity::North | Gravity::South => {
            new_width = f64::clamp(new_width, new_height * minr, new_height * maxr);
        }
        _ => {
            // The line from (alt_width, new_height) to (new_width,
            // alt_height) spans the valid sizes; take the point on it closest
            // to what was requested.
            let alt_width = f64::clamp(new_width, new_height * minr, new_height * maxr);
            let alt_height = f64::clamp(new_height, new_width / maxr, new_width / minr);
            (new_width, new_height) = line_point_closest_to_point(
                alt_width, new_height, new_width, alt_height, new_width, new_height,
            );
        }
    }

    let frame = window
        .client_rect_to_frame_rect(Rect::from_size(new_width as i32, new_height as i32));

    let start_rect = get_start_rect_for_resize(info);
    info.current = resize_with_gravity(&start_rect, info.gravity, frame.width, frame.height);
    true
}

fn do_screen_and_monitor_relative_constraints(
    window: &mut Window,
    region: &[Rect],
    info: &mut ConstraintInfo,
    check_only: bool,
) -> bool {
    let (min_size, _) = window.size_limits();

    // If the window can't fit the region even smushed down to its minimum
    // size, don't apply — dropping this rule alone beats dropping every rule
    // below it too.
    let mut how_far_it_can_be_smushed = info.current;
    if info.action != ActionType::Move {
        if !info.fixed.contains(FixedDirections::X) {
            how_far_it_can_be_smushed.width = min_size.width;
        }
        if !info.fixed.contains(FixedDirections::Y) {
            how_far_it_can_be_smushed.height = min_size.height;
        }
    }
    let exit_early = !region_could_fit_rect(region, &how_far_it_can_be_smushed);

    let constraint_satisfied = region_contains_rect(region, &info.current);
    if exit_early || constraint_satisfied || check_only {
        return constraint_satisfied;
    }

    if info.action != ActionType::Move {
        clamp_rect_to_region(region, info.fixed, &mut info.current, min_size);
    }

    if info.is_user_action && info.action == ActionType::Resize {
        // For user resize, clip to the relevant region.
        clip_rect_to_region(region, info.fixed, &mut info.current);
    } else {
        // For everything else, shove the rectangle into the relevant region.
        shove_rect_into_region(region, info.fixed, &mut info.current);
    }

    true
}

fn constrain_to_single_monitor(
    window: &mut Window,
    env: &ConstraintEnv,
    info: &mut ConstraintInfo,
    check_only: bool,
) -> bool {
    // Frameless windows move themselves during interactive moves; shoving
    // them around makes it impossible to cross monitors.
    let client_driven_interactive_move = !window.decorated;

    if matches!(window.window_type, WindowType::Desktop | WindowType::Dock)
        || env.logical_monitors.len() == 1
        || !window.require_on_single_monitor
        || client_driven_interactive_move
        || info.is_user_action
        || window.placement_rule().is_some()
    {
        return true;
    }

    let region = info.usable_monitor_region.clone();
    do_screen_and_monitor_relative_constraints(window, &region, info, check_only)
}

fn constrain_fully_onscreen(
    window: &mut Window,
    _env: &ConstraintEnv,
    info: &mut ConstraintInfo,
    check_only: bool,
) -> bool {
    // Docks would be shoved "onscreen" by their own strut.
    if matches!(window.window_type, WindowType::Desktop | WindowType::Dock)
        || window.is_fullscreen()
        || !window.require_fully_onscreen
        || info.is_user_action
        || window.placement_rule().is_some()
    {
        return true;
    }

    let region = info.usable_screen_region.clone();
    do_screen_and_monitor_relative_constraints(window, &region, info, check_only)
}

/// How much of the window must stay on screen: 25% of each dimension, clamped
/// to 10–75 pixels.
fn onscreen_amounts(rect: &Rect) -> (i32, i32, i32, i32) {
    let horiz_amount_onscreen = (rect.width / 4).clamp(10, 75);
    let vert_amount_onscreen = (rect.height / 4).clamp(10, 75);
    let horiz_amount_offscreen = (rect.width - horiz_amount_onscreen).max(0);
    let vert_amount_offscreen = (rect.height - vert_amount_onscreen).max(0);
    (
        horiz_amount_onscreen,
        vert_amount_onscreen,
        horiz_amount_offscreen,
        vert_amount_offscreen,
    )
}

fn constrain_titlebar_visible(
    window: &mut Window,
    env: &ConstraintEnv,
    info: &mut ConstraintInfo,
    check_only: bool,
) -> bool {
    // Allow the titlebar past the top only if the user wasn't dragging the
    // frame itself.
    let unconstrained_user_action =
        info.is_user_action && env.drag.map_or(true, |d| d.unconstrained);

    // A resize that leaves the top edge alone may immediately follow an
    // unconstrained move that put the titlebar above the screen; don't make
    // it pop back.
    let user_nonnorthern_resize = info.is_user_action
        && env.drag.is_some_and(|d| d.resizing)
        && info.orig.y == info.current.y;

    if matches!(window.window_type, WindowType::Desktop | WindowType::Dock)
        || window.is_fullscreen()
        || !window.require_titlebar_visible
        || unconstrained_user_action
        || user_nonnorthern_resize
        || window.placement_rule().is_some()
    {
        return true;
    }

    let (horiz_on, mut vert_on, horiz_off, vert_off) = onscreen_amounts(&info.current);
    let mut bottom_amount = vert_off;
    // The titlebar may touch the bottom panel; without a titlebar the normal
    // vertical amount must remain on screen.
    if let Some(titlebar_height) = window.titlebar_height() {
        bottom_amount = info.current.height - titlebar_height;
        vert_on = titlebar_height;
    }

    // Extra slack below and to the sides, none above.
    let region = expand_region_conditionally(
        &info.usable_screen_region,
        horiz_off,
        horiz_off,
        0,
        bottom_amount,
        horiz_on,
        vert_on,
    );
    do_screen_and_monitor_relative_constraints(window, &region, info, check_only)
}

fn constrain_partially_onscreen(
    window: &mut Window,
    _env: &ConstraintEnv,
    info: &mut ConstraintInfo,
    check_only: bool,
) -> bool {
    if matches!(window.window_type, WindowType::Desktop | WindowType::Dock)
        || window.placement_rule().is_some()
    {
        return true;
    }

    let (horiz_on, mut vert_on, horiz_off, vert_off) = onscreen_amounts(&info.current);
    let top_amount = vert_off;
    let mut bottom_amount = vert_off;
    if let Some(titlebar_height) = window.titlebar_height() {
        bottom_amount = info.current.height - titlebar_height;
        vert_on = titlebar_height;
    }

    let region = expand_region_conditionally(
        &info.usable_screen_region,
        horiz_off,
        horiz_off,
        top_amount,
        bottom_amount,
        horiz_on,
        vert_on,
    );
    do_screen_and_monitor_relative_constraints(window, &region, info, check_only)
}

#[cfg(test)]
mod tests {
    use oriel_ipc::Size;
    use proptest::prelude::*;

    use super::super::{FrameInsets, FullscreenMonitors, SizeHints};
    use super::*;
    use crate::monitor::MonitorSpec;
    use crate::region::Side;

    fn logical_monitor(number: usize, rect: Rect) -> LogicalMonitor {
        LogicalMonitor {
            number,
            rect,
            scale: 1.,
            transform: Default::default(),
            is_primary: number == 0,
            is_presentation: false,
            monitors: vec![MonitorSpec::new("DP-1", "ACME", "Display 3000", "1")],
        }
    }

    fn env<'a>(monitors: &'a [LogicalMonitor], struts: &'a [Strut]) -> ConstraintEnv<'a> {
        ConstraintEnv {
            logical_monitors: monitors,
            primary_monitor: Some(0),
            struts,
            windows: &[],
            focus_window: None,
            parent_rect: None,
            pointer_monitor: Some(0),
            drag: None,
            prefs: Prefs::default(),
            ltr: true,
        }
    }

    fn placed_window(rect: Rect) -> Window {
        let mut window = Window::new(WindowType::Normal, rect);
        window.placed = true;
        window.showing_for_first_time = false;
        window
    }

    fn move_resize(
        window: &mut Window,
        env: &ConstraintEnv,
        orig: Rect,
        new: Rect,
    ) -> Constrained {
        constrain(
            window,
            env,
            MoveResizeFlags::MOVE_ACTION | MoveResizeFlags::RESIZE_ACTION,
            PlaceFlags::empty(),
            Gravity::NorthWest,
            orig,
            new,
        )
    }

    #[test]
    fn solver_is_idempotent() {
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
        let struts = [Strut {
            side: Side::Top,
            rect: Rect::new(0, 0, 1920, 32),
        }];
        let env = env(&monitors, &struts);

        let mut window = placed_window(Rect::new(100, 100, 400, 300));
        let orig = window.rect;
        let first = move_resize(&mut window, &env, orig, Rect::new(-350, -100, 400, 300));
        let second = move_resize(&mut window, &env, first.rect, first.rect);
        assert_eq!(first.rect, second.rect);
    }

    proptest! {
        #[test]
        fn solver_is_idempotent_for_arbitrary_rects(
            x in -2500i32..2500,
            y in -2500i32..2500,
            width in 1i32..3000,
            height in 1i32..3000,
        ) {
            let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
            let env = env(&monitors, &[]);

            let mut window = placed_window(Rect::new(0, 0, 400, 300));
            let requested = Rect::new(x, y, width, height);
            let orig = window.rect;
            let first = move_resize(&mut window, &env, orig, requested);
            let second = move_resize(&mut window, &env, first.rect, first.rect);
            prop_assert_eq!(first.rect, second.rect);
        }
    }

    #[test]
    fn satisfiable_request_passes_through_unchanged() {
        // Tier monotonicity: when everything holds at tier 0 the solver must
        // return the tier-0 result untouched.
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
        let env = env(&monitors, &[]);

        let mut window = placed_window(Rect::new(100, 100, 400, 300));
        let orig = window.rect;
        let result = move_resize(&mut window, &env, orig, Rect::new(200, 150, 500, 400));
        assert_eq!(result.rect, Rect::new(200, 150, 500, 400));
    }

    #[test]
    fn program_move_is_kept_fully_onscreen() {
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
        let env = env(&monitors, &[]);

        let mut window = placed_window(Rect::new(100, 100, 400, 300));
        assert!(window.require_fully_onscreen);

        let orig = window.rect;
        let result = move_resize(&mut window, &env, orig, Rect::new(1800, 1000, 400, 300));
        assert!(
            Rect::new(0, 0, 1920, 1080).contains_rect(&result.rect),
            "result {} must stay onscreen",
            result.rect,
        );
    }

    #[test]
    fn user_move_offscreen_is_remembered() {
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
        let env = env(&monitors, &[]);

        let mut window = placed_window(Rect::new(100, 100, 400, 300));
        let orig = window.rect;
        let result = constrain(
            &mut window,
            &env,
            MoveResizeFlags::MOVE_ACTION | MoveResizeFlags::USER_ACTION,
            PlaceFlags::empty(),
            Gravity::NorthWest,
            orig,
            Rect::new(1700, 100, 400, 300),
        );

        // Partially offscreen is allowed for user moves, and remembered:
        // the fully-onscreen requirement must now be off, so a later program
        // move doesn't yank the window back.
        assert_eq!(result.rect.x, 1700);
        assert!(!window.require_fully_onscreen);

        window.rect = result.rect;
        let orig = window.rect;
        let result = move_resize(&mut window, &env, orig, orig);
        assert_eq!(result.rect.x, 1700);
    }

    #[test]
    fn fullscreen_snaps_to_monitor() {
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
        let env = env(&monitors, &[]);

        let mut window = placed_window(Rect::new(100, 100, 400, 300));
        window.fullscreen = true;
        let orig = window.rect;
        let result = move_resize(&mut window, &env, orig, orig);
        assert_eq!(result.rect, Rect::new(0, 0, 1920, 1080));
    }

    #[test]
    fn fullscreen_with_oversized_minimum_keeps_its_size() {
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
        let env = env(&monitors, &[]);

        let mut window = placed_window(Rect::new(0, 0, 2000, 2000));
        window.fullscreen = true;
        window.size_hints.min_size = Size {
            width: 2000,
            height: 2000,
        };

        // The fullscreen rule can't be satisfied (the monitor is smaller than
        // the minimum size), so it bows out and size limits keep the window
        // at its minimum.
        let orig = window.rect;
        let result = move_resize(&mut window, &env, orig, Rect::new(0, 0, 1920, 1080));
        assert_eq!(result.rect.width, 2000);
        assert_eq!(result.rect.height, 2000);
    }

    #[test]
    fn fullscreen_spans_configured_monitors() {
        let monitors = [
            logical_monitor(0, Rect::new(0, 0, 1920, 1080)),
            logical_monitor(1, Rect::new(1920, 0, 1920, 1080)),
        ];
        let env = env(&monitors, &[]);

        let mut window = placed_window(Rect::new(100, 100, 400, 300));
        window.fullscreen = true;
        window.fullscreen_monitors = Some(FullscreenMonitors {
            top: 0,
            bottom: 1,
            left: 0,
            right: 1,
        });

        let orig = window.rect;
        let result = move_resize(&mut window, &env, orig, orig);
        assert_eq!(result.rect, Rect::new(0, 0, 3840, 1080));
    }

    #[test]
    fn maximized_window_fills_work_area() {
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
        let struts = [Strut {
            side: Side::Top,
            rect: Rect::new(0, 0, 1920, 32),
        }];
        let env = env(&monitors, &struts);

        let mut window = placed_window(Rect::new(100, 100, 400, 300));
        window.maximized_horizontally = true;
        window.maximized_vertically = true;
        let orig = window.rect;
        let result = move_resize(&mut window, &env, orig, orig);
        assert_eq!(result.rect, Rect::new(0, 32, 1920, 1048));
    }

    #[test]
    fn horizontal_maximization_avoids_side_struts() {
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
        let struts = [Strut {
            side: Side::Right,
            rect: Rect::new(1870, 0, 50, 1080),
        }];
        let env = env(&monitors, &struts);

        let mut window = placed_window(Rect::new(300, 200, 400, 300));
        window.maximized_horizontally = true;
        let orig = window.rect;
        let result = move_resize(&mut window, &env, orig, orig);
        assert_eq!(result.rect, Rect::new(0, 200, 1870, 300));
    }

    #[test]
    fn tiled_window_takes_its_half() {
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
        let env = env(&monitors, &[]);

        let mut window = placed_window(Rect::new(100, 100, 400, 300));
        window.tile_mode = TileMode::Right;
        let orig = window.rect;
        let result = move_resize(&mut window, &env, orig, orig);
        assert_eq!(result.rect, Rect::new(960, 0, 960, 1080));
    }

    #[test]
    fn aspect_ratio_follows_east_drag() {
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
        let env = env(&monitors, &[]);

        let mut window = placed_window(Rect::new(100, 100, 800, 450));
        window.size_hints.min_aspect = (16, 9);
        window.size_hints.max_aspect = (16, 9);

        // Drag the east edge out to width 1000: height must follow to
        // 1000 * 9 / 16.
        let orig = window.rect;
        let result = constrain(
            &mut window,
            &env,
            MoveResizeFlags::RESIZE_ACTION | MoveResizeFlags::USER_ACTION,
            PlaceFlags::empty(),
            Gravity::West,
            orig,
            Rect::new(100, 100, 1000, 450),
        );
        assert_eq!(result.rect.width, 1000);
        assert_eq!(result.rect.height, 562);
        assert_eq!(result.rect.x, 100);
    }

    #[test]
    fn size_increments_snap_down() {
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
        let env = env(&monitors, &[]);

        let mut window = placed_window(Rect::new(100, 100, 400, 300));
        window.size_hints = SizeHints {
            base_size: Size {
                width: 20,
                height: 10,
            },
            size_increments: Size {
                width: 9,
                height: 17,
            },
            ..Default::default()
        };

        let orig = window.rect;
        let result = move_resize(&mut window, &env, orig, Rect::new(100, 100, 403, 300));
        // width: 20 + 42*9 = 398; height: 10 + 17*17 = 299.
        assert_eq!(result.rect.width, 398);
        assert_eq!(result.rect.height, 299);
    }

    #[test]
    fn increments_respect_minimum_size() {
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
        let env = env(&monitors, &[]);

        let mut window = placed_window(Rect::new(100, 100, 400, 300));
        window.size_hints = SizeHints {
            min_size: Size {
                width: 100,
                height: 100,
            },
            size_increments: Size {
                width: 30,
                height: 30,
            },
            ..Default::default()
        };

        let orig = window.rect;
        let result = move_resize(&mut window, &env, orig, Rect::new(100, 100, 95, 95));
        // Snapping down would give 90 < min 100; bump up one increment.
        assert_eq!(result.rect.width, 120);
        assert_eq!(result.rect.height, 120);
    }

    #[test]
    fn modal_dialog_centers_over_parent() {
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
        let mut env = env(&monitors, &[]);
        env.parent_rect = Some(Rect::new(400, 200, 800, 600));

        let mut window = placed_window(Rect::new(0, 0, 300, 200));
        window.window_type = WindowType::ModalDialog;
        window.attached = true;

        let orig = window.rect;
        let result = move_resize(&mut window, &env, orig, orig);
        assert_eq!(result.rect.x, 400 + 400 - 150);
        assert_eq!(result.rect.y, 200 + 300 - 100);
    }

    #[test]
    fn titlebar_cannot_leave_the_top_of_the_screen() {
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
        let mut env = env(&monitors, &[]);
        env.drag = Some(DragState {
            unconstrained: false,
            resizing: false,
        });

        let mut window = placed_window(Rect::new(100, 100, 400, 300));
        window.decorated = true;
        window.frame_insets = FrameInsets {
            left: 0,
            right: 0,
            top: 30,
            bottom: 0,
        };
        // A user move can put a window mostly offscreen sideways, but never
        // the titlebar above the screen top.
        window.require_fully_onscreen = false;

        let orig = window.rect;
        let result = constrain(
            &mut window,
            &env,
            MoveResizeFlags::MOVE_ACTION | MoveResizeFlags::USER_ACTION,
            PlaceFlags::empty(),
            Gravity::NorthWest,
            orig,
            Rect::new(100, -200, 400, 300),
        );
        assert_eq!(result.rect.y, 0);
    }

    #[test]
    fn catch_all_keeps_a_margin_visible() {
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
        let env = env(&monitors, &[]);

        let mut window = placed_window(Rect::new(100, 100, 400, 300));
        window.require_fully_onscreen = false;
        window.require_titlebar_visible = false;

        let orig = window.rect;
        let result = constrain(
            &mut window,
            &env,
            MoveResizeFlags::MOVE_ACTION | MoveResizeFlags::USER_ACTION,
            PlaceFlags::empty(),
            Gravity::NorthWest,
            orig,
            Rect::new(5000, 5000, 400, 300),
        );

        // At least clamp(25%, 10..75) = 75x75 must remain within the screen.
        assert!(result.rect.x <= 1920 - 75);
        assert!(result.rect.y <= 1080 - 75);
    }

    #[test]
    fn first_show_places_and_constrains() {
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
        let env = env(&monitors, &[]);

        let mut window = Window::new(WindowType::Normal, Rect::from_size(400, 300));
        let result = constrain(
            &mut window,
            &env,
            MoveResizeFlags::MOVE_ACTION | MoveResizeFlags::RESIZE_ACTION,
            PlaceFlags::CALCULATE,
            Gravity::NorthWest,
            Rect::from_size(400, 300),
            Rect::from_size(400, 300),
        );

        assert!(window.placed);
        assert!(Rect::new(0, 0, 1920, 1080).contains_rect(&result.rect));
        assert!(!result.auto_maximize);
    }

    #[test]
    fn positioner_flips_against_monitor_edge() {
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
        let env = {
            let mut e = env(&monitors, &[]);
            e.parent_rect = Some(Rect::new(1500, 100, 400, 400));
            e
        };

        let mut window = Window::new(WindowType::PopupMenu, Rect::from_size(300, 200));
        window.placement.rule = Some(super::super::PlacementRule {
            anchor_rect: Rect::new(380, 50, 20, 20),
            parent_rect: Rect::new(1500, 100, 400, 400),
            anchor: super::super::PlacementAnchor::RIGHT,
            gravity: super::super::PlacementGravity::RIGHT,
            constraint_adjustment: ConstraintAdjustment::FLIP_X,
            offset: Point::default(),
            width: 300,
            height: 200,
            is_reactive: false,
        });

        let result = move_resize(
            &mut window,
            &env,
            Rect::from_size(300, 200),
            Rect::from_size(300, 200),
        );

        // Unflipped the popup would hang off the right edge of the monitor
        // (x = 1500 + 400 = 1900, width 300). Flipping anchors it to the
        // left side of the anchor rect instead.
        assert!(result.rect.x2() <= 1920);
        assert_eq!(window.placement.state, PlacementState::ConstrainedPending);
        assert_eq!(result.rect.x, 1500 + 380 - 300);
    }

    #[test]
    fn positioner_slides_into_work_area() {
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];
        let env = {
            let mut e = env(&monitors, &[]);
            e.parent_rect = Some(Rect::new(1500, 100, 400, 400));
            e
        };

        let mut window = Window::new(WindowType::PopupMenu, Rect::from_size(300, 200));
        window.placement.rule = Some(super::super::PlacementRule {
            anchor_rect: Rect::new(380, 50, 20, 20),
            parent_rect: Rect::new(1500, 100, 400, 400),
            anchor: super::super::PlacementAnchor::RIGHT,
            gravity: super::super::PlacementGravity::RIGHT,
            constraint_adjustment: ConstraintAdjustment::SLIDE_X,
            offset: Point::default(),
            width: 300,
            height: 200,
            is_reactive: false,
        });

        let result = move_resize(
            &mut window,
            &env,
            Rect::from_size(300, 200),
            Rect::from_size(300, 200),
        );

        assert_eq!(result.rect.x, 1920 - 300);
        assert_eq!(result.rect.x2(), 1920);
    }

    #[test]
    fn finished_placement_follows_parent_moves() {
        let monitors = [logical_monitor(0, Rect::new(0, 0, 1920, 1080))];

        let rule = super::super::PlacementRule {
            anchor_rect: Rect::new(100, 100, 20, 20),
            parent_rect: Rect::new(200, 200, 400, 400),
            anchor: super::super::PlacementAnchor::BOTTOM | super::super::PlacementAnchor::RIGHT,
            gravity: super::super::PlacementGravity::BOTTOM
                | super::super::PlacementGravity::RIGHT,
            constraint_adjustment: ConstraintAdjustment::empty(),
            offset: Point::default(),
            width: 300,
            height: 200,
            is_reactive: false,
        };

        let mut window = Window::new(WindowType::PopupMenu, Rect::from_size(300, 200));
        window.placement.rule = Some(rule);

        let env1 = {
            let mut e = env(&monitors, &[]);
            e.parent_rect = Some(Rect::new(200, 200, 400, 400));
            e
        };
        let result = move_resize(
            &mut window,
            &env1,
            Rect::from_size(300, 200),
            Rect::from_size(300, 200),
        );
        assert_eq!(result.rel, Point { x: 120, y: 120 });
        window.notify_placement_configured();
        window.finish_placement();

        // The parent moved. The already-finished placement keeps its relative
        // offset; the temporary rectangle tracks the parent synchronously.
        let env2 = {
            let mut e = env(&monitors, &[]);
            e.parent_rect = Some(Rect::new(500, 300, 400, 400));
            e
        };
        let result = move_resize(
            &mut window,
            &env2,
            result.rect,
            Rect::new(result.rect.x, result.rect.y, 300, 200),
        );
        assert_eq!(result.temporary.x, 500 + 120);
        assert_eq!(result.temporary.y, 300 + 120);
    }
}
