//! Monitor configuration model.
//!
//! A [`MonitorsConfig`] describes one complete target state of the display
//! hardware: which monitors render which logical region at which mode, scale
//! and transform. Configurations are immutable once built; derived
//! configurations (e.g. re-derived for panel orientation) reference the
//! configuration they came from through a parent handle.

use std::fmt;
use std::rc::Rc;

use oriel_ipc::{ColorMode, LayoutMode, Rect, RgbRange, Transform};
use serde::{Deserialize, Serialize};

use crate::utils::scales_equal;

/// Stable identity of a physical monitor across hotplugs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonitorSpec {
    pub connector: String,
    pub vendor: String,
    pub product: String,
    pub serial: String,
}

impl MonitorSpec {
    pub fn new(connector: &str, vendor: &str, product: &str, serial: &str) -> Self {
        Self {
            connector: connector.to_owned(),
            vendor: vendor.to_owned(),
            product: product.to_owned(),
            serial: serial.to_owned(),
        }
    }
}

impl fmt::Display for MonitorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {})", self.connector, self.vendor, self.product)
    }
}

/// Resolution and refresh rate identifying a monitor mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeSpec {
    pub width: i32,
    pub height: i32,
    pub refresh_rate: f64,
}

impl ModeSpec {
    /// Exact match, with float tolerance on the refresh rate.
    pub fn matches(&self, other: &ModeSpec) -> bool {
        self.width == other.width
            && self.height == other.height
            && (self.refresh_rate - other.refresh_rate).abs() < 0.001
    }

    /// Same resolution, any refresh rate. Used when carrying a scale choice
    /// over from an earlier configuration of the same monitor.
    pub fn has_similar_size(&self, other: &ModeSpec) -> bool {
        self.width == other.width && self.height == other.height
    }
}

impl fmt::Display for ModeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{:.3}", self.width, self.height, self.refresh_rate)
    }
}

/// One monitor's assignment inside a logical monitor: identity, mode, and
/// output properties.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub monitor_spec: MonitorSpec,
    pub mode_spec: ModeSpec,
    pub enable_underscanning: bool,
    pub max_bpc: Option<u32>,
    pub rgb_range: RgbRange,
    pub color_mode: ColorMode,
}

/// One logical region of the screen and the monitors that render it.
///
/// More than one monitor config means mirroring: all of them must render the
/// identical region and must therefore share a mode size.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalMonitorConfig {
    pub layout: Rect,
    pub scale: f64,
    pub transform: Transform,
    pub is_primary: bool,
    pub is_presentation: bool,
    pub monitor_configs: Vec<MonitorConfig>,
}

bitflags::bitflags! {
    /// Flags attached to a whole configuration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConfigFlags: u8 {
        /// The configuration came from the system rather than the user.
        const SYSTEM_CONFIG = 1;
    }
}

/// Classification of configurations produced by the display-switch action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwitchConfigType {
    #[default]
    Unknown,
    AllMirror,
    AllLinear,
    External,
    Builtin,
}

/// Identifies which hardware state a configuration applies to: the set of
/// monitor specs (enabled and disabled alike) plus the layout mode.
///
/// Spec order does not matter; the constructor sorts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigKey {
    monitor_specs: Vec<MonitorSpec>,
    layout_mode: LayoutMode,
}

impl ConfigKey {
    pub fn new(mut monitor_specs: Vec<MonitorSpec>, layout_mode: LayoutMode) -> Self {
        monitor_specs.sort();
        Self {
            monitor_specs,
            layout_mode,
        }
    }

    pub fn monitor_specs(&self) -> &[MonitorSpec] {
        &self.monitor_specs
    }

    pub fn layout_mode(&self) -> LayoutMode {
        self.layout_mode
    }
}

/// A complete target display configuration.
#[derive(Debug, Clone)]
pub struct MonitorsConfig {
    pub logical_monitor_configs: Vec<LogicalMonitorConfig>,
    pub disabled_monitor_specs: Vec<MonitorSpec>,
    pub for_lease_monitor_specs: Vec<MonitorSpec>,
    pub layout_mode: LayoutMode,
    pub flags: ConfigFlags,
    pub switch_config: SwitchConfigType,
    pub key: ConfigKey,
    /// Configuration this one was derived from, if any (e.g. by rotation).
    pub parent: Option<Rc<MonitorsConfig>>,
}

impl MonitorsConfig {
    pub fn new(
        logical_monitor_configs: Vec<LogicalMonitorConfig>,
        disabled_monitor_specs: Vec<MonitorSpec>,
        for_lease_monitor_specs: Vec<MonitorSpec>,
        layout_mode: LayoutMode,
        flags: ConfigFlags,
    ) -> Self {
        let mut key_specs: Vec<MonitorSpec> = logical_monitor_configs
            .iter()
            .flat_map(|l| l.monitor_configs.iter())
            .map(|m| m.monitor_spec.clone())
            .collect();
        // For-lease monitors must be disabled, so including the disabled set
        // covers them too.
        key_specs.extend(disabled_monitor_specs.iter().cloned());
        let key = ConfigKey::new(key_specs, layout_mode);

        Self {
            logical_monitor_configs,
            disabled_monitor_specs,
            for_lease_monitor_specs,
            layout_mode,
            flags,
            switch_config: SwitchConfigType::Unknown,
            key,
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: Rc<MonitorsConfig>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_switch_config(mut self, switch_config: SwitchConfigType) -> Self {
        self.switch_config = switch_config;
        self
    }

    /// The root of the parent chain (self if underived).
    pub fn root<'a>(self: &'a Rc<Self>) -> &'a Rc<MonitorsConfig> {
        let mut config = self;
        while let Some(parent) = &config.parent {
            config = parent;
        }
        config
    }

    pub fn has_monitor(&self, monitor_spec: &MonitorSpec) -> bool {
        self.logical_monitor_configs
            .iter()
            .flat_map(|l| l.monitor_configs.iter())
            .any(|m| &m.monitor_spec == monitor_spec)
    }

    pub fn find_monitor_config(&self, monitor_spec: &MonitorSpec) -> Option<&MonitorConfig> {
        self.logical_monitor_configs
            .iter()
            .flat_map(|l| l.monitor_configs.iter())
            .find(|m| &m.monitor_spec == monitor_spec)
    }

    /// Finds the logical monitor config driving `monitor_spec` at a mode of
    /// the same resolution.
    pub fn find_logical_monitor_config(
        &self,
        monitor_spec: &MonitorSpec,
        mode_spec: &ModeSpec,
    ) -> Option<&LogicalMonitorConfig> {
        self.logical_monitor_configs.iter().find(|l| {
            l.monitor_configs.iter().any(|m| {
                &m.monitor_spec == monitor_spec && m.mode_spec.has_similar_size(mode_spec)
            })
        })
    }

    /// The scale shared by every logical monitor config, if there is one.
    pub fn global_scale(&self) -> Option<f64> {
        let first = self.logical_monitor_configs.first()?.scale;
        self.logical_monitor_configs
            .iter()
            .all(|l| scales_equal(l.scale, first))
            .then_some(first)
    }
}

/// Checks structural validity of a mode spec.
pub fn verify_monitor_mode_spec(mode_spec: &ModeSpec) -> Result<(), String> {
    if mode_spec.width > 0 && mode_spec.height > 0 && mode_spec.refresh_rate > 0. {
        Ok(())
    } else {
        Err("monitor mode invalid".to_owned())
    }
}

/// Checks structural validity of a logical monitor config against the layout
/// mode.
pub fn verify_logical_monitor_config(
    logical_monitor_config: &LogicalMonitorConfig,
    layout_mode: LayoutMode,
) -> Result<(), String> {
    let layout = &logical_monitor_config.layout;
    if layout.x < 0 || layout.y < 0 {
        return Err(format!(
            "invalid logical monitor position ({}, {})",
            layout.x, layout.y
        ));
    }

    let Some(first) = logical_monitor_config.monitor_configs.first() else {
        return Err("logical monitor is empty".to_owned());
    };

    let mode_width = first.mode_spec.width;
    let mode_height = first.mode_spec.height;
    for monitor_config in &logical_monitor_config.monitor_configs {
        verify_monitor_mode_spec(&monitor_config.mode_spec)?;
        if monitor_config.mode_spec.width != mode_width
            || monitor_config.mode_spec.height != mode_height
        {
            return Err("monitor modes in logical monitor not equal".to_owned());
        }
    }

    let scale = logical_monitor_config.scale;
    if scale <= 0. {
        return Err(format!("invalid logical monitor scale {scale}"));
    }

    let (layout_width, layout_height) = if logical_monitor_config.transform.is_rotated() {
        (layout.height, layout.width)
    } else {
        (layout.width, layout.height)
    };

    let (expected_width, expected_height) = match layout_mode {
        LayoutMode::Logical => {
            let scaled_width = mode_width as f64 / scale;
            let scaled_height = mode_height as f64 / scale;
            if scaled_width.floor() != scaled_width || scaled_height.floor() != scaled_height {
                return Err("scaled logical monitor size is fractional".to_owned());
            }
            (
                (layout_width as f64 * scale).round() as i32,
                (layout_height as f64 * scale).round() as i32,
            )
        }
        LayoutMode::Physical => {
            if !scales_equal(scale, scale.round()) {
                return Err("a fractional scale with physical layout mode not allowed".to_owned());
            }
            (layout_width, layout_height)
        }
    };

    if mode_width != expected_width || mode_height != expected_height {
        return Err("monitor mode size doesn't match scaled monitor layout".to_owned());
    }

    Ok(())
}

/// Checks the whole configuration: each logical monitor config, plus the
/// disabled / for-lease bookkeeping.
pub fn verify_monitors_config(config: &MonitorsConfig) -> Result<(), String> {
    for logical_monitor_config in &config.logical_monitor_configs {
        verify_logical_monitor_config(logical_monitor_config, config.layout_mode)?;
    }

    for monitor_spec in &config.disabled_monitor_specs {
        if config.has_monitor(monitor_spec) {
            return Err("assigned monitor explicitly disabled".to_owned());
        }
    }

    for monitor_spec in &config.for_lease_monitor_specs {
        if !config.disabled_monitor_specs.contains(monitor_spec) {
            return Err("for lease monitor must be explicitly disabled".to_owned());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn spec(connector: &str) -> MonitorSpec {
        MonitorSpec::new(connector, "ACME", "Display 3000", "0x1234")
    }

    fn monitor_config(connector: &str, width: i32, height: i32) -> MonitorConfig {
        MonitorConfig {
            monitor_spec: spec(connector),
            mode_spec: ModeSpec {
                width,
                height,
                refresh_rate: 60.,
            },
            enable_underscanning: false,
            max_bpc: None,
            rgb_range: RgbRange::Auto,
            color_mode: ColorMode::Default,
        }
    }

    fn logical(connector: &str, x: i32, width: i32, height: i32) -> LogicalMonitorConfig {
        LogicalMonitorConfig {
            layout: Rect::new(x, 0, width, height),
            scale: 1.,
            transform: Transform::Normal,
            is_primary: x == 0,
            is_presentation: false,
            monitor_configs: vec![monitor_config(connector, width, height)],
        }
    }

    #[test]
    fn key_ignores_monitor_order() {
        let a = ConfigKey::new(vec![spec("DP-1"), spec("DP-2")], LayoutMode::Logical);
        let b = ConfigKey::new(vec![spec("DP-2"), spec("DP-1")], LayoutMode::Logical);
        assert_eq!(a, b);

        let c = ConfigKey::new(vec![spec("DP-1"), spec("DP-2")], LayoutMode::Physical);
        assert_ne!(a, c);
    }

    proptest! {
        #[test]
        fn key_equality_is_permutation_invariant(permutation in proptest::sample::subsequence(
            vec!["DP-1", "DP-2", "HDMI-1", "eDP-1", "DVI-0"], 1..5,
        ), seed in any::<u64>()) {
            let specs: Vec<_> = permutation.iter().map(|c| spec(c)).collect();

            let mut shuffled = specs.clone();
            // Cheap deterministic shuffle driven by the seed.
            let len = shuffled.len();
            for i in 0..len {
                let j = (seed as usize).wrapping_mul(i + 1) % len;
                shuffled.swap(i, j);
            }

            let a = ConfigKey::new(specs, LayoutMode::Logical);
            let b = ConfigKey::new(shuffled, LayoutMode::Logical);
            prop_assert_eq!(a, b);
        }
    }

    #[test]
    fn verify_rejects_mismatched_mirror_modes() {
        let mut config = logical("DP-1", 0, 1920, 1080);
        config.monitor_configs.push(monitor_config("DP-2", 1280, 720));
        let err = verify_logical_monitor_config(&config, LayoutMode::Logical).unwrap_err();
        assert!(err.contains("not equal"));
    }

    #[test]
    fn verify_rejects_layout_not_matching_mode() {
        let mut config = logical("DP-1", 0, 1920, 1080);
        config.layout.width = 1000;
        assert!(verify_logical_monitor_config(&config, LayoutMode::Logical).is_err());
    }

    #[test]
    fn verify_rejects_fractional_scale_in_physical_mode() {
        let mut config = logical("DP-1", 0, 1920, 1080);
        config.scale = 1.5;
        let err = verify_logical_monitor_config(&config, LayoutMode::Physical).unwrap_err();
        assert!(err.contains("fractional"));
    }

    #[test]
    fn verify_config_catches_enabled_but_disabled_monitor() {
        let mut config = MonitorsConfig::new(
            vec![logical("DP-1", 0, 1920, 1080)],
            vec![spec("DP-1")],
            Vec::new(),
            LayoutMode::Logical,
            ConfigFlags::empty(),
        );
        assert!(verify_monitors_config(&config).is_err());

        config.disabled_monitor_specs.clear();
        config.for_lease_monitor_specs.push(spec("DP-9"));
        assert!(verify_monitors_config(&config).is_err());
    }

    #[test]
    fn root_walks_parent_chain() {
        let base = Rc::new(MonitorsConfig::new(
            vec![logical("DP-1", 0, 1920, 1080)],
            Vec::new(),
            Vec::new(),
            LayoutMode::Logical,
            ConfigFlags::empty(),
        ));
        let derived = Rc::new(
            MonitorsConfig::new(
                vec![logical("DP-1", 0, 1920, 1080)],
                Vec::new(),
                Vec::new(),
                LayoutMode::Logical,
                ConfigFlags::empty(),
            )
            .with_parent(base.clone()),
        );

        assert!(Rc::ptr_eq(derived.root(), &base));
        assert!(Rc::ptr_eq(base.root(), &base));
    }
}
