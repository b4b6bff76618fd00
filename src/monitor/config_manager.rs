//! Creation, storage and history of monitor configurations.
//!
//! The configuration manager owns the global mutable configuration state: the
//! in-memory store of saved configurations keyed by hardware state, the
//! current configuration, and a short history used for "restore previous".
//! It also knows how to build every kind of candidate configuration the
//! selector's fallback chain tries.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::rc::Rc;

use oriel_ipc::{ColorMode, LayoutMode, Point, Rect, Transform};

use super::config::{
    ConfigFlags, ConfigKey, LogicalMonitorConfig, ModeSpec, MonitorConfig, MonitorsConfig,
    SwitchConfigType,
};
use super::{Monitor, ScalesConstraint};
use crate::region::{region_is_adjacent_to_rect, region_overlaps_rect};

const CONFIG_HISTORY_MAX_SIZE: usize = 3;

/// Snapshot of the monitor-manager state the configuration builders need.
#[derive(Clone, Copy)]
pub struct MonitorsContext<'a> {
    pub monitors: &'a [Monitor],
    pub lid_is_closed: bool,
    pub global_scale_required: bool,
    pub layout_mode: LayoutMode,
    /// Transform the builtin panel should get, when panel orientation is
    /// managed by an orientation sensor.
    pub panel_transform: Option<Transform>,
}

impl<'a> MonitorsContext<'a> {
    fn scales_constraint(&self) -> ScalesConstraint {
        match self.layout_mode {
            LayoutMode::Logical => ScalesConstraint::empty(),
            LayoutMode::Physical => ScalesConstraint::NO_FRAC,
        }
    }

    fn builtin_monitor(&self) -> Option<&'a Monitor> {
        self.monitors.iter().find(|m| m.is_builtin())
    }

    fn monitor_transform(&self, monitor: &Monitor) -> Transform {
        if monitor.is_builtin() {
            self.panel_transform.unwrap_or_default()
        } else {
            Transform::Normal
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct MonitorMatchRule: u8 {
        const EXTERNAL = 1;
        const BUILTIN = 1 << 1;
        const VISIBLE = 1 << 2;
        const WITH_SUGGESTED_POSITION = 1 << 3;
        const PRIMARY = 1 << 4;
        const ALLOW_FALLBACK = 1 << 5;
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PositioningMode {
    Linear,
    Suggested,
}

/// Owns the stored / current / previous configuration state.
#[derive(Default)]
pub struct ConfigManager {
    stored: HashMap<ConfigKey, Rc<MonitorsConfig>>,
    current: Option<Rc<MonitorsConfig>>,
    history: VecDeque<Rc<MonitorsConfig>>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The key describing the present hardware: all connected monitors except
    /// a builtin panel behind a closed lid — unless that panel is all there
    /// is.
    pub fn key_for_current_state(ctx: &MonitorsContext) -> Option<ConfigKey> {
        let mut laptop_spec = None;
        let mut specs = Vec::new();
        for monitor in ctx.monitors {
            if monitor.is_builtin() {
                laptop_spec = Some(monitor.spec().clone());
                if ctx.lid_is_closed {
                    continue;
                }
            }
            specs.push(monitor.spec().clone());
        }

        if specs.is_empty() {
            specs.extend(laptop_spec);
        }
        if specs.is_empty() {
            return None;
        }

        Some(ConfigKey::new(specs, ctx.layout_mode))
    }

    /// Looks up a stored configuration matching the present hardware.
    pub fn get_stored(&self, ctx: &MonitorsContext) -> Option<Rc<MonitorsConfig>> {
        let key = Self::key_for_current_state(ctx)?;
        self.stored.get(&key).cloned()
    }

    /// Saves the current configuration for its hardware key.
    pub fn save_current(&mut self) {
        let Some(current) = self.current.clone() else {
            warn!("no current configuration to save");
            return;
        };
        self.stored.insert(current.key.clone(), current);
    }

    pub fn current(&self) -> Option<&Rc<MonitorsConfig>> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&Rc<MonitorsConfig>> {
        self.history.front()
    }

    pub fn pop_previous(&mut self) -> Option<Rc<MonitorsConfig>> {
        self.history.pop_front()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Makes `config` current. The replaced configuration goes into the
    /// history, except when the new one is a re-derivation of it for the same
    /// hardware (same root and same key), in which case restoring "previous"
    /// should skip it.
    pub fn set_current(&mut self, config: Option<Rc<MonitorsConfig>>) {
        let overrides_current = match (&config, &self.current) {
            (Some(new), Some(current)) => {
                Rc::ptr_eq(new.root(), current.root()) && new.key == current.key
            }
            _ => false,
        };

        if let Some(current) = self.current.take() {
            if !overrides_current {
                self.history.push_front(current);
                self.history.truncate(CONFIG_HISTORY_MAX_SIZE);
            }
        }

        self.current = config;
    }

    /// Side-by-side layout of all visible monitors, primary first.
    pub fn create_linear(&self, ctx: &MonitorsContext) -> Option<Rc<MonitorsConfig>> {
        self.create_monitors_config(
            ctx,
            MonitorMatchRule::VISIBLE | MonitorMatchRule::ALLOW_FALLBACK,
            PositioningMode::Linear,
            ConfigFlags::empty(),
        )
        .map(Rc::new)
    }

    /// Last-resort single-monitor layout.
    pub fn create_fallback(&self, ctx: &MonitorsContext) -> Option<Rc<MonitorsConfig>> {
        self.create_monitors_config(
            ctx,
            MonitorMatchRule::PRIMARY | MonitorMatchRule::ALLOW_FALLBACK,
            PositioningMode::Linear,
            ConfigFlags::empty(),
        )
        .map(Rc::new)
    }

    /// Layout honoring the per-output hotplug position hints. `None` unless
    /// at least one monitor carries a hint and the hinted layout is sane.
    pub fn create_suggested(&self, ctx: &MonitorsContext) -> Option<Rc<MonitorsConfig>> {
        self.create_monitors_config(
            ctx,
            MonitorMatchRule::WITH_SUGGESTED_POSITION,
            PositioningMode::Suggested,
            ConfigFlags::empty(),
        )
        .map(Rc::new)
    }

    fn create_monitors_config(
        &self,
        ctx: &MonitorsContext,
        match_rule: MonitorMatchRule,
        positioning: PositioningMode,
        flags: ConfigFlags,
    ) -> Option<MonitorsConfig> {
        let primary = find_primary_monitor(ctx, match_rule | MonitorMatchRule::VISIBLE)?;

        let mut monitors: Vec<&Monitor> = vec![primary];
        if !match_rule.contains(MonitorMatchRule::PRIMARY) {
            monitors.extend(find_monitors(ctx, match_rule, Some(primary)));
        }

        let mut logical_monitor_configs = Vec::new();
        let mut x = 0;
        for monitor in monitors {
            let position = match positioning {
                PositioningMode::Linear => Point { x, y: 0 },
                PositioningMode::Suggested => monitor
                    .suggested_position()
                    .expect("matched monitor without suggested position"),
            };

            let scale = self.compute_scale_for_monitor(ctx, monitor, Some(primary));
            let color_mode = self
                .last_color_mode_for_monitor(monitor)
                .unwrap_or_default();

            let mut logical_monitor_config =
                create_preferred_logical_monitor_config(ctx, monitor, position, scale, color_mode);
            logical_monitor_config.is_primary = std::ptr::eq(monitor, primary);
            x += logical_monitor_config.layout.width;
            logical_monitor_configs.push(logical_monitor_config);
        }

        if positioning == PositioningMode::Suggested
            && !verify_suggested_monitors_config(&logical_monitor_configs)
        {
            return None;
        }

        Some(new_config_for_monitors(ctx, logical_monitor_configs, flags))
    }

    /// Re-derives `base` with the builtin panel at the sensor-reported
    /// orientation. `None` when there is nothing to change.
    pub fn create_for_builtin_orientation(
        &self,
        ctx: &MonitorsContext,
        base: &Rc<MonitorsConfig>,
    ) -> Option<Rc<MonitorsConfig>> {
        let transform = ctx.panel_transform?;
        self.create_for_builtin_display_rotation(ctx, base, false, transform)
    }

    /// Rotates the builtin panel one step clockwise from the current
    /// configuration.
    pub fn create_for_rotate_monitor(
        &self,
        ctx: &MonitorsContext,
    ) -> Option<Rc<MonitorsConfig>> {
        let current = self.current.clone()?;
        self.create_for_builtin_display_rotation(ctx, &current, true, Transform::Normal)
    }

    fn create_for_builtin_display_rotation(
        &self,
        ctx: &MonitorsContext,
        base: &Rc<MonitorsConfig>,
        rotate: bool,
        transform: Transform,
    ) -> Option<Rc<MonitorsConfig>> {
        let current_logical_idx =
            find_logical_config_for_builtin_monitor(ctx, &base.logical_monitor_configs)?;
        let current_transform = base.logical_monitor_configs[current_logical_idx].transform;

        let transform = if rotate {
            current_transform.rotated_clockwise()
        } else {
            transform
        };
        if current_transform == transform {
            return None;
        }

        let mut logical_monitor_configs = base.logical_monitor_configs.clone();
        let logical_monitor_config = &mut logical_monitor_configs[current_logical_idx];
        logical_monitor_config.transform = transform;

        if current_transform.is_rotated() != transform.is_rotated() {
            let layout = &mut logical_monitor_config.layout;
            std::mem::swap(&mut layout.width, &mut layout.height);
        }

        let config = MonitorsConfig::new(
            logical_monitor_configs,
            base.disabled_monitor_specs.clone(),
            base.for_lease_monitor_specs.clone(),
            base.layout_mode,
            ConfigFlags::empty(),
        )
        .with_parent(base.clone());

        Some(Rc::new(config))
    }

    /// Builds the configuration for one display-switch action.
    pub fn create_for_switch_config(
        &self,
        ctx: &MonitorsContext,
        switch_config: SwitchConfigType,
    ) -> Option<Rc<MonitorsConfig>> {
        let config = match switch_config {
            SwitchConfigType::AllMirror => return self.create_for_switch_config_all_mirror(ctx),
            SwitchConfigType::AllLinear => self.create_monitors_config(
                ctx,
                MonitorMatchRule::VISIBLE | MonitorMatchRule::ALLOW_FALLBACK,
                PositioningMode::Linear,
                ConfigFlags::empty(),
            ),
            SwitchConfigType::External => self.create_monitors_config(
                ctx,
                MonitorMatchRule::EXTERNAL,
                PositioningMode::Linear,
                ConfigFlags::empty(),
            ),
            SwitchConfigType::Builtin => self.create_monitors_config(
                ctx,
                MonitorMatchRule::BUILTIN,
                PositioningMode::Linear,
                ConfigFlags::empty(),
            ),
            SwitchConfigType::Unknown => {
                warn!("unknown switch config requested");
                return None;
            }
        };

        config.map(|config| Rc::new(config.with_switch_config(switch_config)))
    }

    /// Mirrors every monitor at the largest mode size they all share.
    fn create_for_switch_config_all_mirror(
        &self,
        ctx: &MonitorsContext,
    ) -> Option<Rc<MonitorsConfig>> {
        let primary = find_primary_monitor(ctx, MonitorMatchRule::ALLOW_FALLBACK)?;
        let first = ctx.monitors.first()?;

        let mut common_size: Option<(i32, i32)> = None;
        for mode in first.modes() {
            let (width, height) = (mode.spec.width, mode.spec.height);
            let all_have_it = ctx.monitors[1..].iter().all(|monitor| {
                monitor
                    .modes()
                    .iter()
                    .any(|m| m.spec.width == width && m.spec.height == height)
            });
            if all_have_it && common_size.map_or(0, |(w, h)| w * h) < width * height {
                common_size = Some((width, height));
            }
        }
        let (common_width, common_height) = common_size?;

        let mut best_scale = 1.0f64;
        let mut monitor_configs = Vec::new();
        for monitor in ctx.monitors {
            let Some(mode) = monitor
                .modes()
                .iter()
                .find(|m| m.spec.width == common_width && m.spec.height == common_height)
            else {
                continue;
            };

            best_scale = best_scale.max(self.compute_scale_for_monitor(ctx, monitor, Some(primary)));
            let color_mode = self
                .last_color_mode_for_monitor(monitor)
                .unwrap_or_default();
            monitor_configs.push(create_monitor_config(monitor, &mode.spec, color_mode));
        }

        let (width, height) = scale_logical_monitor_size(
            ctx.layout_mode,
            best_scale,
            common_width,
            common_height,
        );
        let logical_monitor_config = LogicalMonitorConfig {
            layout: Rect::new(0, 0, width, height),
            scale: best_scale,
            transform: Transform::Normal,
            is_primary: true,
            is_presentation: false,
            monitor_configs,
        };

        let config =
            new_config_for_monitors(ctx, vec![logical_monitor_config], ConfigFlags::empty());
        Some(Rc::new(config.with_switch_config(SwitchConfigType::AllMirror)))
    }

    /// The scale to use for `monitor`: the last one chosen for the same
    /// monitor at the same resolution in the current or a recent
    /// configuration, else a freshly computed one. Under a global-scale
    /// backend the primary monitor's choice wins.
    fn compute_scale_for_monitor(
        &self,
        ctx: &MonitorsContext,
        monitor: &Monitor,
        primary: Option<&Monitor>,
    ) -> f64 {
        let target = match (ctx.global_scale_required, primary) {
            (true, Some(primary)) => primary,
            _ => monitor,
        };
        let mode = target.preferred_mode().spec;

        if let Some(scale) = self.last_scale_for_monitor(target, &mode) {
            return scale;
        }

        target.calculate_mode_scale(&mode, ctx.scales_constraint())
    }

    fn relevant_configs(&self) -> impl Iterator<Item = &Rc<MonitorsConfig>> {
        self.current.iter().chain(self.history.iter())
    }

    fn last_scale_for_monitor(&self, monitor: &Monitor, mode: &ModeSpec) -> Option<f64> {
        self.relevant_configs().find_map(|config| {
            config
                .find_logical_monitor_config(monitor.spec(), mode)
                .map(|l| l.scale)
        })
    }

    fn last_color_mode_for_monitor(&self, monitor: &Monitor) -> Option<ColorMode> {
        self.relevant_configs().find_map(|config| {
            config
                .find_monitor_config(monitor.spec())
                .map(|m| m.color_mode)
                .filter(|color_mode| monitor.is_color_mode_supported(*color_mode))
        })
    }
}

fn monitor_matches_rule(
    monitor: &Monitor,
    ctx: &MonitorsContext,
    match_rule: MonitorMatchRule,
) -> bool {
    if match_rule.contains(MonitorMatchRule::BUILTIN) {
        if !monitor.is_builtin() {
            return false;
        }
    } else if match_rule.contains(MonitorMatchRule::EXTERNAL) && monitor.is_builtin() {
        return false;
    }

    if match_rule.contains(MonitorMatchRule::VISIBLE)
        && monitor.is_builtin()
        && ctx.lid_is_closed
    {
        return false;
    }

    if match_rule.contains(MonitorMatchRule::WITH_SUGGESTED_POSITION)
        && monitor.suggested_position().is_none()
    {
        return false;
    }

    true
}

fn find_monitors<'a>(
    ctx: &MonitorsContext<'a>,
    match_rule: MonitorMatchRule,
    not_this_one: Option<&Monitor>,
) -> Vec<&'a Monitor> {
    ctx.monitors
        .iter()
        .filter(|monitor| {
            not_this_one.map_or(true, |excluded| !std::ptr::eq(*monitor, excluded))
                && monitor_matches_rule(monitor, ctx, match_rule)
        })
        .collect()
}

fn find_monitor_with_highest_preferred_resolution<'a>(
    ctx: &MonitorsContext<'a>,
    match_rule: MonitorMatchRule,
) -> Option<&'a Monitor> {
    find_monitors(ctx, match_rule, None)
        .into_iter()
        .max_by_key(|monitor| {
            let spec = &monitor.preferred_mode().spec;
            spec.width as i64 * spec.height as i64
        })
}

/// Primary selection order: the system-designated primary, then the laptop
/// panel, then the external monitor with the highest preferred resolution,
/// then (when allowed) any monitor at all.
fn find_primary_monitor<'a>(
    ctx: &MonitorsContext<'a>,
    match_rule: MonitorMatchRule,
) -> Option<&'a Monitor> {
    if let Some(primary) = ctx.monitors.iter().find(|m| m.is_primary()) {
        if monitor_matches_rule(primary, ctx, match_rule) {
            return Some(primary);
        }
    }

    if let Some(builtin) = ctx.builtin_monitor() {
        if monitor_matches_rule(builtin, ctx, match_rule) {
            return Some(builtin);
        }
    }

    if let Some(monitor) = find_monitor_with_highest_preferred_resolution(ctx, match_rule) {
        return Some(monitor);
    }

    if match_rule.contains(MonitorMatchRule::ALLOW_FALLBACK) {
        return find_monitor_with_highest_preferred_resolution(ctx, MonitorMatchRule::empty());
    }

    None
}

fn scale_logical_monitor_size(
    layout_mode: LayoutMode,
    scale: f64,
    mode_width: i32,
    mode_height: i32,
) -> (i32, i32) {
    match layout_mode {
        LayoutMode::Logical => (
            (mode_width as f64 / scale).round() as i32,
            (mode_height as f64 / scale).round() as i32,
        ),
        LayoutMode::Physical => (mode_width, mode_height),
    }
}

fn create_monitor_config(
    monitor: &Monitor,
    mode_spec: &ModeSpec,
    color_mode: ColorMode,
) -> MonitorConfig {
    MonitorConfig {
        monitor_spec: monitor.spec().clone(),
        mode_spec: *mode_spec,
        enable_underscanning: monitor.is_underscanning(),
        max_bpc: monitor.max_bpc(),
        rgb_range: monitor.rgb_range(),
        color_mode,
    }
}

fn create_preferred_logical_monitor_config(
    ctx: &MonitorsContext,
    monitor: &Monitor,
    position: Point,
    scale: f64,
    color_mode: ColorMode,
) -> LogicalMonitorConfig {
    let mode_spec = monitor.preferred_mode().spec;
    let (mut width, mut height) =
        scale_logical_monitor_size(ctx.layout_mode, scale, mode_spec.width, mode_spec.height);

    let transform = ctx.monitor_transform(monitor);
    if transform.is_rotated() {
        std::mem::swap(&mut width, &mut height);
    }

    LogicalMonitorConfig {
        layout: Rect::new(position.x, position.y, width, height),
        scale,
        transform,
        is_primary: false,
        is_presentation: false,
        monitor_configs: vec![create_monitor_config(monitor, &mode_spec, color_mode)],
    }
}

fn find_logical_config_for_builtin_monitor(
    ctx: &MonitorsContext,
    logical_monitor_configs: &[LogicalMonitorConfig],
) -> Option<usize> {
    let builtin = ctx.builtin_monitor()?;

    logical_monitor_configs.iter().position(|config| {
        // Skip configs with clones; the panel must be configured on its own.
        config.monitor_configs.len() == 1
            && config.monitor_configs[0].monitor_spec == *builtin.spec()
            && builtin
                .mode_from_spec(&config.monitor_configs[0].mode_spec)
                .is_some()
    })
}

/// A suggested layout is only acceptable when no monitors overlap and every
/// monitor touches at least one other.
fn verify_suggested_monitors_config(logical_monitor_configs: &[LogicalMonitorConfig]) -> bool {
    let mut region: Vec<Rect> = Vec::new();
    for config in logical_monitor_configs {
        if region_overlaps_rect(&region, &config.layout) {
            warn!("suggested monitor config has overlapping region, rejecting");
            return false;
        }
        region.push(config.layout);
    }

    if region.len() > 1 {
        for rect in &region {
            if !region_is_adjacent_to_rect(&region, rect) {
                warn!("suggested monitor config has monitors with no neighbors, rejecting");
                return false;
            }
        }
    }

    true
}

/// Wraps logical monitor configs into a full configuration, recording every
/// present-but-unassigned monitor as disabled (and for-lease monitors as
/// such).
fn new_config_for_monitors(
    ctx: &MonitorsContext,
    logical_monitor_configs: Vec<LogicalMonitorConfig>,
    flags: ConfigFlags,
) -> MonitorsConfig {
    let mut disabled = Vec::new();
    let mut for_lease = Vec::new();
    for monitor in ctx.monitors {
        let visible = monitor_matches_rule(monitor, ctx, MonitorMatchRule::VISIBLE);
        let assigned = logical_monitor_configs
            .iter()
            .flat_map(|l| l.monitor_configs.iter())
            .any(|m| &m.monitor_spec == monitor.spec());
        if visible && assigned {
            continue;
        }

        disabled.push(monitor.spec().clone());
        if monitor.is_for_lease() {
            for_lease.push(monitor.spec().clone());
        }
    }

    MonitorsConfig::new(
        logical_monitor_configs,
        disabled,
        for_lease,
        ctx.layout_mode,
        flags,
    )
}
