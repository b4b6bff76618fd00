//! Monitor inventory and the logical monitor layout.
//!
//! The platform backend enumerates outputs and their modes; this module turns
//! that inventory into [`Monitor`] objects with a derived native layout, mode
//! bookkeeping and scale-factor support, and defines the [`LogicalMonitor`]
//! runtime type that the rest of the compositor consumes.

use oriel_ipc::{ColorMode, LayoutMode, Point, Rect, RgbRange, Size, Transform};

pub mod config;
pub mod config_manager;
pub mod manager;

pub use config::{
    ConfigKey, LogicalMonitorConfig, ModeSpec, MonitorConfig, MonitorSpec, MonitorsConfig,
};
pub use config_manager::ConfigManager;
pub use manager::{Capabilities, HeadlessBackend, MonitorBackend, MonitorManager};

/// Fractional scale steps per integer (1.0, 1.25, 1.5, …).
const SCALE_FACTORS_PER_INTEGER: i32 = 4;
const SCALE_FACTORS_STEP: f64 = 1. / SCALE_FACTORS_PER_INTEGER as f64;
const MINIMUM_SCALE_FACTOR: f64 = 1.;
const MAXIMUM_SCALE_FACTOR: f64 = 4.;

/// Smallest usable logical resolution; scales that would shrink a mode below
/// this are not offered.
const MINIMUM_LOGICAL_AREA: i32 = 800 * 480;

/// Target DPI for mobile-sized panels, chosen to line up with the UI sizes
/// other operating systems default to.
const UI_SCALE_MOBILE_TARGET_DPI: f64 = 135.;
/// Target DPI for stationary displays, which are viewed from further away.
const UI_SCALE_LARGE_TARGET_DPI: f64 = 110.;
const UI_SCALE_LARGE_MIN_SIZE_INCHES: f64 = 20.;

bitflags::bitflags! {
    /// Constraints on which scale factors may be offered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ScalesConstraint: u8 {
        /// Only integer scales (physical layout mode backends).
        const NO_FRAC = 1;
    }
}

/// A mode of one output as reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CrtcMode {
    pub spec: ModeSpec,
    pub is_preferred: bool,
}

/// A physical connector as reported by the backend.
///
/// Immutable for one hotplug generation.
#[derive(Debug, Clone)]
pub struct Output {
    pub spec: MonitorSpec,
    pub modes: Vec<CrtcMode>,
    /// Physical dimensions in millimeters, if the EDID reports any.
    pub physical_size_mm: Option<Size>,
    /// Position hint delivered with the hotplug event, if any.
    pub suggested_position: Option<Point>,
    /// Native (unscaled) position of the output in the layout.
    pub position: Point,
    pub is_builtin: bool,
    pub is_primary: bool,
    pub is_for_lease: bool,
    pub is_underscanning: bool,
    pub supports_underscanning: bool,
    pub max_bpc: Option<u32>,
    pub rgb_range: RgbRange,
    pub supported_color_modes: Vec<ColorMode>,
    pub privacy_screen_enabled: Option<bool>,
    pub backlight: Option<i32>,
}

impl Output {
    /// A minimal output description; good enough for most tests and headless
    /// setups.
    pub fn with_modes(spec: MonitorSpec, modes: Vec<CrtcMode>) -> Self {
        Self {
            spec,
            modes,
            physical_size_mm: None,
            suggested_position: None,
            position: Point::default(),
            is_builtin: false,
            is_primary: false,
            is_for_lease: false,
            is_underscanning: false,
            supports_underscanning: false,
            max_bpc: None,
            rgb_range: RgbRange::Auto,
            supported_color_modes: vec![ColorMode::Default],
            privacy_screen_enabled: None,
            backlight: None,
        }
    }
}

/// A mode of a monitor, with its advertised id.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorMode {
    pub id: String,
    pub spec: ModeSpec,
}

/// One or more tiled outputs presented as a single physical display.
#[derive(Debug, Clone)]
pub struct Monitor {
    spec: MonitorSpec,
    modes: Vec<MonitorMode>,
    preferred_mode: usize,
    /// `Some` iff the monitor is active.
    current_mode: Option<usize>,
    /// Native (unscaled-pixel … or logical, depending on the backend's layout
    /// mode) rectangle of the monitor, as realized by the last applied
    /// configuration.
    layout: Rect,
    physical_size_mm: Option<Size>,
    suggested_position: Option<Point>,
    is_builtin: bool,
    is_primary: bool,
    is_for_lease: bool,
    is_underscanning: bool,
    supports_underscanning: bool,
    max_bpc: Option<u32>,
    rgb_range: RgbRange,
    supported_color_modes: Vec<ColorMode>,
    privacy_screen_enabled: Option<bool>,
    backlight: Option<i32>,
    display_name: String,
}

impl Monitor {
    /// Builds a monitor from one backend output.
    pub fn from_output(output: &Output) -> Self {
        let modes: Vec<MonitorMode> = output
            .modes
            .iter()
            .map(|m| MonitorMode {
                id: m.spec.to_string(),
                spec: m.spec,
            })
            .collect();
        let preferred_mode = output
            .modes
            .iter()
            .position(|m| m.is_preferred)
            .unwrap_or(0);
        let preferred_spec = modes[preferred_mode].spec;
        let display_name = if output.spec.vendor.is_empty() {
            output.spec.connector.clone()
        } else {
            format!("{} {}", output.spec.vendor, output.spec.product)
        };

        Self {
            spec: output.spec.clone(),
            modes,
            preferred_mode,
            current_mode: None,
            layout: Rect::new(
                output.position.x,
                output.position.y,
                preferred_spec.width,
                preferred_spec.height,
            ),
            physical_size_mm: output.physical_size_mm,
            suggested_position: output.suggested_position,
            is_builtin: output.is_builtin,
            is_primary: output.is_primary,
            is_for_lease: output.is_for_lease,
            is_underscanning: output.is_underscanning,
            supports_underscanning: output.supports_underscanning,
            max_bpc: output.max_bpc,
            rgb_range: output.rgb_range,
            supported_color_modes: output.supported_color_modes.clone(),
            privacy_screen_enabled: output.privacy_screen_enabled,
            backlight: output.backlight,
            display_name,
        }
    }

    pub fn spec(&self) -> &MonitorSpec {
        &self.spec
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn is_builtin(&self) -> bool {
        self.is_builtin
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    pub fn is_for_lease(&self) -> bool {
        self.is_for_lease
    }

    pub fn is_underscanning(&self) -> bool {
        self.is_underscanning
    }

    pub fn supports_underscanning(&self) -> bool {
        self.supports_underscanning
    }

    pub fn max_bpc(&self) -> Option<u32> {
        self.max_bpc
    }

    pub fn rgb_range(&self) -> RgbRange {
        self.rgb_range
    }

    pub fn is_color_mode_supported(&self, color_mode: ColorMode) -> bool {
        self.supported_color_modes.contains(&color_mode)
    }

    /// `None` when the panel has no privacy screen.
    pub fn privacy_screen_enabled(&self) -> Option<bool> {
        self.privacy_screen_enabled
    }

    /// Normalized backlight level, if the panel has one.
    pub fn backlight(&self) -> Option<i32> {
        self.backlight
    }

    pub fn is_active(&self) -> bool {
        self.current_mode.is_some()
    }

    pub fn modes(&self) -> &[MonitorMode] {
        &self.modes
    }

    pub fn preferred_mode(&self) -> &MonitorMode {
        &self.modes[self.preferred_mode]
    }

    pub fn current_mode(&self) -> Option<&MonitorMode> {
        self.current_mode.map(|idx| &self.modes[idx])
    }

    pub fn mode_from_spec(&self, mode_spec: &ModeSpec) -> Option<&MonitorMode> {
        self.modes.iter().find(|m| m.spec.matches(mode_spec))
    }

    pub fn mode_from_id(&self, id: &str) -> Option<&MonitorMode> {
        self.modes.iter().find(|m| m.id == id)
    }

    pub fn suggested_position(&self) -> Option<Point> {
        self.suggested_position
    }

    pub fn physical_size_mm(&self) -> Option<Size> {
        self.physical_size_mm
    }

    /// The native layout rectangle realized by the last applied
    /// configuration.
    pub fn derive_layout(&self) -> Rect {
        self.layout
    }

    pub(crate) fn set_current_mode(&mut self, mode_spec: Option<ModeSpec>) {
        self.current_mode =
            mode_spec.and_then(|spec| self.modes.iter().position(|m| m.spec.matches(&spec)));
    }

    pub(crate) fn set_layout(&mut self, layout: Rect) {
        self.layout = layout;
    }

    /// Whether the EDID encoded the aspect ratio instead of the physical
    /// size, making DPI math meaningless.
    fn has_aspect_as_size(&self) -> bool {
        matches!(
            self.physical_size_mm,
            Some(Size {
                width: 1600,
                height: 900,
            }) | Some(Size {
                width: 1600,
                height: 1000,
            })
        )
    }

    /// All scale factors usable for `mode` under `constraints`.
    ///
    /// Fractional candidates are snapped to the closest value that divides the
    /// mode width into an integral number of logical pixels; candidates that
    /// would leave less than the minimum logical area are dropped. Never
    /// empty: falls back to `[1.0]`.
    pub fn calculate_supported_scales(
        &self,
        mode: &ModeSpec,
        constraints: ScalesConstraint,
    ) -> Vec<f64> {
        let width = mode.width;
        let height = mode.height;
        let mut supported_scales = Vec::new();

        let mut i = MINIMUM_SCALE_FACTOR.floor() as i32;
        while i <= MAXIMUM_SCALE_FACTOR.ceil() as i32 {
            if constraints.contains(ScalesConstraint::NO_FRAC) {
                if is_scale_valid_for_size(width, height, i as f64) {
                    supported_scales.push(i as f64);
                }
            } else {
                let max_bound = if i == MINIMUM_SCALE_FACTOR.floor() as i32
                    || i == MAXIMUM_SCALE_FACTOR.ceil() as i32
                {
                    SCALE_FACTORS_STEP
                } else {
                    SCALE_FACTORS_STEP / 2.
                };

                for j in 0..SCALE_FACTORS_PER_INTEGER {
                    let scale_value = i as f64 + j as f64 * SCALE_FACTORS_STEP;
                    if !is_scale_valid_for_size(width, height, scale_value) {
                        continue;
                    }

                    let scale = closest_scale_factor_for_resolution(
                        width as f64,
                        height as f64,
                        scale_value,
                        max_bound,
                    );
                    if scale > 0. {
                        supported_scales.push(scale);
                    }
                }
            }
            i += 1;
        }

        if supported_scales.is_empty() {
            supported_scales.push(1.);
        }

        supported_scales
    }

    /// The scale the compositor would pick for `mode`: the supported scale
    /// closest to the DPI-derived ideal.
    pub fn calculate_mode_scale(&self, mode: &ModeSpec, constraints: ScalesConstraint) -> f64 {
        if self.has_aspect_as_size() {
            return 1.;
        }

        let Some(size_mm) = self.physical_size_mm else {
            return 1.;
        };
        if size_mm.width == 0 || size_mm.height == 0 {
            return 1.;
        }

        let width_mm = size_mm.width as f64;
        let height_mm = size_mm.height as f64;
        let diag_inches = (width_mm * width_mm + height_mm * height_mm).sqrt() / 25.4;

        let target_dpi = if diag_inches < UI_SCALE_LARGE_MIN_SIZE_INCHES {
            UI_SCALE_MOBILE_TARGET_DPI
        } else {
            UI_SCALE_LARGE_TARGET_DPI
        };

        let width_px = mode.width as f64;
        let height_px = mode.height as f64;
        let physical_dpi = (width_px * width_px + height_px * height_px).sqrt() / diag_inches;
        let mut perfect_scale = physical_dpi / target_dpi;

        if constraints.contains(ScalesConstraint::NO_FRAC) {
            perfect_scale -= 0.125;
        }

        let scales = self.calculate_supported_scales(mode, constraints);
        let mut best_scale = scales[0];
        let mut best_error = f64::INFINITY;
        for scale in scales {
            let error = (scale - perfect_scale).abs();
            if error < best_error {
                best_scale = scale;
                best_error = error;
            }
        }

        best_scale
    }

    /// Whether `scale` is one of the supported scales for `mode`.
    pub fn is_scale_supported(
        &self,
        mode: &ModeSpec,
        constraints: ScalesConstraint,
        scale: f64,
    ) -> bool {
        self.calculate_supported_scales(mode, constraints)
            .iter()
            .any(|s| crate::utils::scales_equal(*s, scale))
    }
}

fn is_logical_size_large_enough(width: i32, height: i32) -> bool {
    width * height >= MINIMUM_LOGICAL_AREA
}

fn is_scale_valid_for_size(width: i32, height: i32, scale: f64) -> bool {
    if !(MINIMUM_SCALE_FACTOR..=MAXIMUM_SCALE_FACTOR).contains(&scale) {
        return false;
    }

    is_logical_size_large_enough(
        (width as f64 / scale).floor() as i32,
        (height as f64 / scale).floor() as i32,
    )
}

/// Snaps `scale` to the closest value within `threshold` that divides `width`
/// into an integral logical width with an integral logical height, or 0 if
/// there is none.
fn closest_scale_factor_for_resolution(
    width: f64,
    height: f64,
    scale: f64,
    threshold: f64,
) -> f64 {
    if width % scale == 0. && height % scale == 0. {
        return scale;
    }

    let base_scaled_w = (width / scale).floor();
    let mut best_scale = 0.;
    let mut i = 0;
    let mut found_one = false;

    'outer: while !found_one {
        for j in 0..2 {
            let offset = i as f64 * if j == 1 { 1. } else { -1. };
            let scaled_w = base_scaled_w + offset;
            let current_scale = width / scaled_w;
            let scaled_h = height / current_scale;

            if current_scale >= scale + threshold
                || current_scale <= scale - threshold
                || current_scale < MINIMUM_SCALE_FACTOR
                || current_scale > MAXIMUM_SCALE_FACTOR
            {
                break 'outer;
            }

            if scaled_h.floor() == scaled_h {
                found_one = true;
                if (current_scale - scale).abs() < (best_scale - scale).abs() {
                    best_scale = current_scale;
                }
            }
        }

        i += 1;
    }

    best_scale
}

/// A region of unified screen space, possibly backed by more than one
/// physical monitor (mirroring).
///
/// Rebuilt wholesale on every configuration change; holders of a previous
/// epoch's instance observe a stale but coherent snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalMonitor {
    /// Sequential number within the current configuration epoch.
    pub number: usize,
    pub rect: Rect,
    pub scale: f64,
    pub transform: Transform,
    pub is_primary: bool,
    pub is_presentation: bool,
    /// Specs of the monitors assigned to this region.
    pub monitors: Vec<MonitorSpec>,
}

impl LogicalMonitor {
    pub(crate) fn from_config(config: &LogicalMonitorConfig, number: usize) -> Self {
        Self {
            number,
            rect: config.layout,
            scale: config.scale,
            transform: config.transform,
            is_primary: config.is_primary,
            is_presentation: config.is_presentation,
            monitors: config
                .monitor_configs
                .iter()
                .map(|m| m.monitor_spec.clone())
                .collect(),
        }
    }

    pub(crate) fn new_derived(monitor: &Monitor, layout: Rect, scale: f64, number: usize) -> Self {
        Self {
            number,
            rect: layout,
            scale,
            transform: Transform::Normal,
            is_primary: false,
            is_presentation: false,
            monitors: vec![monitor.spec().clone()],
        }
    }

    pub fn has_monitor(&self, spec: &MonitorSpec) -> bool {
        self.monitors.contains(spec)
    }
}

/// The default layout mode for a set of capabilities: physical when every
/// logical monitor must share one scale, logical otherwise.
pub fn default_layout_mode_for(capabilities: Capabilities) -> LayoutMode {
    if capabilities.contains(Capabilities::LAYOUT_MODE) {
        LayoutMode::Logical
    } else {
        LayoutMode::Physical
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn monitor_1080p() -> Monitor {
        let spec = MonitorSpec::new("DP-1", "ACME", "Display 3000", "0x1234");
        let mode = CrtcMode {
            spec: ModeSpec {
                width: 1920,
                height: 1080,
                refresh_rate: 60.,
            },
            is_preferred: true,
        };
        Monitor::from_output(&Output::with_modes(spec, vec![mode]))
    }

    fn monitor_hidpi_laptop() -> Monitor {
        let spec = MonitorSpec::new("eDP-1", "ACME", "Laptop Panel", "0x0001");
        let mode = CrtcMode {
            spec: ModeSpec {
                width: 2560,
                height: 1600,
                refresh_rate: 60.,
            },
            is_preferred: true,
        };
        let mut output = Output::with_modes(spec, vec![mode]);
        output.is_builtin = true;
        output.physical_size_mm = Some(Size {
            width: 290,
            height: 180,
        });
        Monitor::from_output(&output)
    }

    #[test]
    fn supported_scales_always_include_one() {
        let monitor = monitor_1080p();
        let scales =
            monitor.calculate_supported_scales(&monitor.preferred_mode().spec, Default::default());
        assert_abs_diff_eq!(scales[0], 1.0);
        assert!(scales.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn integer_only_constraint_drops_fractions() {
        let monitor = monitor_hidpi_laptop();
        let scales = monitor
            .calculate_supported_scales(&monitor.preferred_mode().spec, ScalesConstraint::NO_FRAC);
        assert!(scales.iter().all(|s| s.fract() == 0.));
        assert!(scales.contains(&2.0));
    }

    #[test]
    fn supported_scales_shrink_no_smaller_than_minimum_area() {
        let monitor = monitor_1080p();
        let scales =
            monitor.calculate_supported_scales(&monitor.preferred_mode().spec, Default::default());
        for scale in scales {
            let w = (1920. / scale).floor() as i32;
            let h = (1080. / scale).floor() as i32;
            assert!(w * h >= MINIMUM_LOGICAL_AREA, "scale {scale} too large");
        }
    }

    #[test]
    fn every_supported_scale_is_reported_supported() {
        let monitor = monitor_hidpi_laptop();
        let mode = monitor.preferred_mode().spec;
        for scale in monitor.calculate_supported_scales(&mode, Default::default()) {
            assert!(monitor.is_scale_supported(&mode, Default::default(), scale));
        }
        assert!(!monitor.is_scale_supported(&mode, Default::default(), 0.75));
    }

    #[test]
    fn hidpi_laptop_prefers_upscaling() {
        let monitor = monitor_hidpi_laptop();
        let scale =
            monitor.calculate_mode_scale(&monitor.preferred_mode().spec, Default::default());
        assert!(scale > 1.0, "expected hidpi scale, got {scale}");
    }

    #[test]
    fn missing_physical_size_means_scale_one() {
        let monitor = monitor_1080p();
        let scale =
            monitor.calculate_mode_scale(&monitor.preferred_mode().spec, Default::default());
        assert_abs_diff_eq!(scale, 1.0);
    }

    #[test]
    fn active_iff_current_mode() {
        let mut monitor = monitor_1080p();
        assert!(!monitor.is_active());
        let spec = monitor.preferred_mode().spec;
        monitor.set_current_mode(Some(spec));
        assert!(monitor.is_active());
        monitor.set_current_mode(None);
        assert!(!monitor.is_active());
    }
}
