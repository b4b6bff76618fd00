//! Spanning-rectangle region arithmetic.
//!
//! The usable area of the screen (or of one monitor) is "everything minus the
//! struts". We represent such a region as a flat vector of possibly
//! overlapping *maximal* rectangles: every rectangle that fits inside the
//! region fits inside at least one element of the vector. Containment, fitting
//! and shoving then become plain scans over the vector.

use oriel_ipc::{Gravity, Rect, Size};

bitflags::bitflags! {
    /// Axes that must not move while resolving a constraint.
    ///
    /// When the user resizes only one axis, "nearest valid position" is a
    /// worse answer than "nearest valid position along the axis being
    /// changed". Cleared for non-user actions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FixedDirections: u8 {
        /// The horizontal position and extent are fixed.
        const X = 1;
        /// The vertical position and extent are fixed.
        const Y = 1 << 1;
    }
}

/// Screen edge a strut is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
    Top,
    Bottom,
}

/// A reserved edge region claimed by a panel-like window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strut {
    pub side: Side,
    pub rect: Rect,
}

/// Axis along which a rectangle is grown by
/// [`expand_to_avoiding_struts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandDirection {
    Horizontal,
    Vertical,
}

/// Computes the maximal spanning rectangles of `base` minus all `struts`.
///
/// Each strut splits every rectangle it overlaps into up to four full-width /
/// full-height complements; those overlap each other, which is what makes the
/// result spanning rather than a partition. Rectangles contained in another
/// are pruned at the end.
pub fn spanning_rects(base: Rect, struts: &[Strut]) -> Vec<Rect> {
    let mut rects = vec![base];

    for strut in struts {
        let Some(hole) = strut.rect.intersection(&base) else {
            continue;
        };

        let mut split = Vec::with_capacity(rects.len() + 3);
        for rect in rects {
            if !rect.overlaps(&hole) {
                split.push(rect);
                continue;
            }

            if hole.x > rect.x {
                split.push(Rect::new(rect.x, rect.y, hole.x - rect.x, rect.height));
            }
            if hole.x2() < rect.x2() {
                split.push(Rect::new(hole.x2(), rect.y, rect.x2() - hole.x2(), rect.height));
            }
            if hole.y > rect.y {
                split.push(Rect::new(rect.x, rect.y, rect.width, hole.y - rect.y));
            }
            if hole.y2() < rect.y2() {
                split.push(Rect::new(rect.x, hole.y2(), rect.width, rect.y2() - hole.y2()));
            }
        }
        rects = split;
    }

    prune_contained(&mut rects);
    rects
}

/// Merges several spanning sets (e.g. one per monitor) into one, pruning
/// rectangles contained in another.
pub fn merge_regions(regions: impl IntoIterator<Item = Vec<Rect>>) -> Vec<Rect> {
    let mut rects: Vec<Rect> = regions.into_iter().flatten().collect();
    prune_contained(&mut rects);
    rects
}

fn prune_contained(rects: &mut Vec<Rect>) {
    let snapshot = rects.clone();
    let mut idx = 0;
    rects.retain(|rect| {
        let i = idx;
        idx += 1;
        !snapshot
            .iter()
            .enumerate()
            .any(|(j, other)| j != i && other.contains_rect(rect) && !(other == rect && j > i))
    });
}

/// Whether `rect` lies entirely within the region.
pub fn region_contains_rect(region: &[Rect], rect: &Rect) -> bool {
    region.iter().any(|r| r.contains_rect(rect))
}

/// Whether a rectangle of `rect`'s size could be positioned somewhere inside
/// the region.
pub fn region_could_fit_rect(region: &[Rect], rect: &Rect) -> bool {
    region.iter().any(|r| r.could_fit_rect(rect))
}

/// Whether `rect` overlaps the region at all.
pub fn region_overlaps_rect(region: &[Rect], rect: &Rect) -> bool {
    region.iter().any(|r| r.overlaps(rect))
}

/// Whether `rect` touches at least one rectangle of the region edge-to-edge.
pub fn region_is_adjacent_to_rect(region: &[Rect], rect: &Rect) -> bool {
    region.iter().any(|r| r != rect && r.is_adjacent_to(rect))
}

/// Expands every rectangle of the region by the given edge amounts, skipping
/// the horizontal (resp. vertical) expansion of rectangles narrower than
/// `min_width` (resp. shorter than `min_height`).
pub fn expand_region_conditionally(
    region: &[Rect],
    left: i32,
    right: i32,
    top: i32,
    bottom: i32,
    min_width: i32,
    min_height: i32,
) -> Vec<Rect> {
    region
        .iter()
        .map(|rect| {
            let mut rect = *rect;
            if rect.width >= min_width {
                rect.x -= left;
                rect.width += left + right;
            }
            if rect.height >= min_height {
                rect.y -= top;
                rect.height += top + bottom;
            }
            rect
        })
        .collect()
}

fn spans_horizontally(outer: &Rect, inner: &Rect) -> bool {
    outer.x <= inner.x && inner.x2() <= outer.x2()
}

fn spans_vertically(outer: &Rect, inner: &Rect) -> bool {
    outer.y <= inner.y && inner.y2() <= outer.y2()
}

fn candidate_respects_fixed(candidate: &Rect, rect: &Rect, fixed: FixedDirections) -> bool {
    (!fixed.contains(FixedDirections::X) || spans_horizontally(candidate, rect))
        && (!fixed.contains(FixedDirections::Y) || spans_vertically(candidate, rect))
}

/// Shrinks `rect` so that some position inside the region could hold it, never
/// below `min_size`, preferring the spanning rectangle that preserves the most
/// of the rectangle's area.
pub fn clamp_rect_to_region(
    region: &[Rect],
    fixed: FixedDirections,
    rect: &mut Rect,
    min_size: Size,
) {
    let mut best: Option<&Rect> = None;
    let mut best_overlap = -1i64;

    for candidate in region {
        if !candidate_respects_fixed(candidate, rect, fixed) {
            continue;
        }
        if candidate.width < min_size.width || candidate.height < min_size.height {
            continue;
        }

        let overlap = candidate.width.min(rect.width) as i64 * candidate.height.min(rect.height) as i64;
        if overlap > best_overlap {
            best_overlap = overlap;
            best = Some(candidate);
        }
    }

    if let Some(best) = best {
        rect.width = rect.width.min(best.width);
        rect.height = rect.height.min(best.height);
    }
}

/// Clips `rect` into the spanning rectangle it overlaps the most.
pub fn clip_rect_to_region(region: &[Rect], fixed: FixedDirections, rect: &mut Rect) {
    let mut best: Option<&Rect> = None;
    let mut best_overlap = 0i64;

    for candidate in region {
        if !candidate_respects_fixed(candidate, rect, fixed) {
            continue;
        }
        let overlap = candidate.intersection(rect).map_or(0, |i| i.area());
        if overlap > best_overlap || best.is_none() {
            best_overlap = overlap;
            best = Some(candidate);
        }
    }

    if let Some(best) = best {
        if rect.x < best.x {
            rect.width = (rect.width - (best.x - rect.x)).max(0);
            rect.x = best.x;
        }
        if rect.x2() > best.x2() {
            rect.width = (rect.width - (rect.x2() - best.x2())).max(0);
        }
        if rect.y < best.y {
            rect.height = (rect.height - (best.y - rect.y)).max(0);
            rect.y = best.y;
        }
        if rect.y2() > best.y2() {
            rect.height = (rect.height - (rect.y2() - best.y2())).max(0);
        }
    }
}

/// Moves `rect` the smallest distance that puts it inside a spanning rectangle
/// large enough to hold it.
pub fn shove_rect_into_region(region: &[Rect], fixed: FixedDirections, rect: &mut Rect) {
    let mut best: Option<&Rect> = None;
    let mut best_distance = i64::MAX;

    for candidate in region {
        if !candidate_respects_fixed(candidate, rect, fixed) {
            continue;
        }
        if !candidate.could_fit_rect(rect) {
            continue;
        }

        let mut distance = 0i64;
        if rect.x < candidate.x {
            distance += (candidate.x - rect.x) as i64;
        } else if rect.x2() > candidate.x2() {
            distance += (rect.x2() - candidate.x2()) as i64;
        }
        if rect.y < candidate.y {
            distance += (candidate.y - rect.y) as i64;
        } else if rect.y2() > candidate.y2() {
            distance += (rect.y2() - candidate.y2()) as i64;
        }

        if distance < best_distance {
            best_distance = distance;
            best = Some(candidate);
        }
    }

    if let Some(best) = best {
        rect.x = rect.x.clamp(best.x, best.x2() - rect.width);
        rect.y = rect.y.clamp(best.y, best.y2() - rect.height);
    }
}

/// Grows `rect` along one axis to the extent of `expand_to`, then pulls the
/// grown edges back in front of any strut that overlaps the rectangle in the
/// perpendicular axis.
pub fn expand_to_avoiding_struts(
    rect: &mut Rect,
    expand_to: &Rect,
    direction: ExpandDirection,
    struts: &[Strut],
) {
    match direction {
        ExpandDirection::Horizontal => {
            rect.x = expand_to.x;
            rect.width = expand_to.width;
        }
        ExpandDirection::Vertical => {
            rect.y = expand_to.y;
            rect.height = expand_to.height;
        }
    }

    for strut in struts {
        match (direction, strut.side) {
            (ExpandDirection::Horizontal, Side::Left) => {
                if rect.y < strut.rect.y2() && strut.rect.y < rect.y2() {
                    let new_x = rect.x.max(strut.rect.x2());
                    rect.width = (rect.x2() - new_x).max(0);
                    rect.x = new_x;
                }
            }
            (ExpandDirection::Horizontal, Side::Right) => {
                if rect.y < strut.rect.y2() && strut.rect.y < rect.y2() {
                    let new_x2 = rect.x2().min(strut.rect.x);
                    rect.width = (new_x2 - rect.x).max(0);
                }
            }
            (ExpandDirection::Vertical, Side::Top) => {
                if rect.x < strut.rect.x2() && strut.rect.x < rect.x2() {
                    let new_y = rect.y.max(strut.rect.y2());
                    rect.height = (rect.y2() - new_y).max(0);
                    rect.y = new_y;
                }
            }
            (ExpandDirection::Vertical, Side::Bottom) => {
                if rect.x < strut.rect.x2() && strut.rect.x < rect.x2() {
                    let new_y2 = rect.y2().min(strut.rect.y);
                    rect.height = (new_y2 - rect.y).max(0);
                }
            }
            _ => (),
        }
    }
}

/// Resizes `rect` to the new size, keeping the reference point chosen by
/// `gravity` from `start` in place.
pub fn resize_with_gravity(start: &Rect, gravity: Gravity, new_width: i32, new_height: i32) -> Rect {
    let x = match gravity {
        Gravity::NorthWest | Gravity::West | Gravity::SouthWest | Gravity::Static => start.x,
        Gravity::North | Gravity::Center | Gravity::South => {
            start.x + (start.width - new_width) / 2
        }
        Gravity::NorthEast | Gravity::East | Gravity::SouthEast => {
            start.x + start.width - new_width
        }
    };
    let y = match gravity {
        Gravity::NorthWest | Gravity::North | Gravity::NorthEast | Gravity::Static => start.y,
        Gravity::West | Gravity::Center | Gravity::East => {
            start.y + (start.height - new_height) / 2
        }
        Gravity::SouthWest | Gravity::South | Gravity::SouthEast => {
            start.y + start.height - new_height
        }
    };

    Rect::new(x, y, new_width, new_height)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn top_strut(x: i32, width: i32, height: i32) -> Strut {
        Strut {
            side: Side::Top,
            rect: Rect::new(x, 0, width, height),
        }
    }

    #[test]
    fn no_struts_spans_whole_base() {
        let base = Rect::new(0, 0, 1920, 1080);
        assert_eq!(spanning_rects(base, &[]), vec![base]);
    }

    #[test]
    fn full_width_panel_leaves_one_rect() {
        let base = Rect::new(0, 0, 1920, 1080);
        let region = spanning_rects(base, &[top_strut(0, 1920, 32)]);
        assert_eq!(region, vec![Rect::new(0, 32, 1920, 1048)]);
    }

    #[test]
    fn partial_panel_leaves_overlapping_spans() {
        let base = Rect::new(0, 0, 100, 100);
        let region = spanning_rects(base, &[top_strut(40, 20, 10)]);

        // Left of, right of, and below the strut; all maximal.
        assert_eq!(region.len(), 3);
        assert!(region.contains(&Rect::new(0, 0, 40, 100)));
        assert!(region.contains(&Rect::new(60, 0, 40, 100)));
        assert!(region.contains(&Rect::new(0, 10, 100, 90)));

        assert!(region_contains_rect(&region, &Rect::new(0, 50, 100, 50)));
        assert!(!region_contains_rect(&region, &Rect::new(35, 0, 30, 30)));
    }

    #[test]
    fn shove_picks_nearest_span() {
        let region = vec![Rect::new(0, 0, 100, 100)];
        let mut rect = Rect::new(-30, 20, 50, 50);
        shove_rect_into_region(&region, FixedDirections::empty(), &mut rect);
        assert_eq!(rect, Rect::new(0, 20, 50, 50));

        let mut rect = Rect::new(80, 90, 50, 50);
        shove_rect_into_region(&region, FixedDirections::empty(), &mut rect);
        assert_eq!(rect, Rect::new(50, 50, 50, 50));
    }

    #[test]
    fn shove_respects_fixed_direction() {
        let region = vec![Rect::new(0, 0, 100, 100)];
        let mut rect = Rect::new(10, -30, 50, 50);
        shove_rect_into_region(&region, FixedDirections::X, &mut rect);
        assert_eq!(rect, Rect::new(10, 0, 50, 50));
    }

    #[test]
    fn clamp_shrinks_to_fit() {
        let region = vec![Rect::new(0, 0, 100, 100)];
        let mut rect = Rect::new(10, 10, 300, 50);
        clamp_rect_to_region(
            &region,
            FixedDirections::empty(),
            &mut rect,
            Size {
                width: 20,
                height: 20,
            },
        );
        assert_eq!(rect, Rect::new(10, 10, 100, 50));
    }

    #[test]
    fn clip_cuts_rect_into_best_span() {
        let region = vec![Rect::new(0, 0, 100, 100)];
        let mut rect = Rect::new(-20, 30, 60, 200);
        clip_rect_to_region(&region, FixedDirections::empty(), &mut rect);
        assert_eq!(rect, Rect::new(0, 30, 40, 70));
    }

    #[test]
    fn gravity_resize_keeps_anchor() {
        let start = Rect::new(100, 100, 200, 100);
        assert_eq!(
            resize_with_gravity(&start, Gravity::NorthWest, 100, 50),
            Rect::new(100, 100, 100, 50),
        );
        assert_eq!(
            resize_with_gravity(&start, Gravity::SouthEast, 100, 50),
            Rect::new(200, 150, 100, 50),
        );
        assert_eq!(
            resize_with_gravity(&start, Gravity::Center, 100, 50),
            Rect::new(150, 125, 100, 50),
        );
    }

    #[test]
    fn strut_avoiding_expansion_stops_at_struts() {
        let monitor = Rect::new(0, 0, 1920, 1080);
        let struts = [Strut {
            side: Side::Right,
            rect: Rect::new(1870, 0, 50, 1080),
        }];

        let mut rect = Rect::new(100, 100, 400, 300);
        expand_to_avoiding_struts(&mut rect, &monitor, ExpandDirection::Horizontal, &struts);
        assert_eq!(rect, Rect::new(0, 100, 1870, 300));
    }
}
