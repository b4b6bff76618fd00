//! The monitor manager: selector fallback chain, logical monitor rebuilds,
//! and the configuration request surface.
//!
//! Backend-specific behavior (can layouts be chosen logically, is one global
//! scale required, does the hardware accept a configuration) sits behind the
//! [`MonitorBackend`] trait; everything else is capability-flag driven.

use std::rc::Rc;
use std::time::Duration;

use anyhow::Context as _;
use oriel_ipc::{
    ApplyConfigRequest, ApplyMethod, ConfigError, CurrentState, LayoutMode, LogicalMonitorInfo,
    ModeInfo, MonitorInfo, MonitorSelector, Rect, Size, Transform,
};

use super::config::{
    ConfigFlags, LogicalMonitorConfig, MonitorConfig, MonitorSpec, MonitorsConfig,
    SwitchConfigType, verify_logical_monitor_config, verify_monitors_config,
};
use super::config_manager::{ConfigManager, MonitorsContext};
use super::{LogicalMonitor, Monitor, Output, ScalesConstraint};
use crate::utils::scales_equal;

/// How long an unconfirmed persistent configuration stays before the previous
/// one is restored.
pub const DISPLAY_CONFIGURATION_TIMEOUT: Duration = Duration::from_secs(20);

bitflags::bitflags! {
    /// Capabilities of a monitor backend.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Capabilities: u8 {
        /// Every logical monitor must use one common scale.
        const GLOBAL_SCALE_REQUIRED = 1;
        /// Clients may choose the layout mode per request.
        const LAYOUT_MODE = 1 << 1;
    }
}

/// The platform side of monitor configuration.
pub trait MonitorBackend {
    fn capabilities(&self) -> Capabilities;

    fn is_lid_closed(&self) -> bool;

    fn max_screen_size(&self) -> Option<Size>;

    /// Whether a hotplug event may change the set of modes, making stored
    /// configurations unreliable outside of startup.
    fn has_hotplug_mode_update(&self) -> bool {
        false
    }

    /// Realizes `config` on the hardware. `None` means headless. With
    /// [`ApplyMethod::VerifyOnly`] this must be a dry run.
    fn apply(&mut self, config: Option<&MonitorsConfig>, method: ApplyMethod)
        -> anyhow::Result<()>;
}

/// A backend with no hardware behind it; accepts everything.
///
/// Used headless and as the test backend.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    pub capabilities: Capabilities,
    pub lid_is_closed: bool,
    pub max_screen_size: Option<Size>,
    /// Makes the next N `apply` calls fail, for exercising the fallback
    /// chain.
    pub fail_applies: u32,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self {
            capabilities: Capabilities::LAYOUT_MODE,
            ..Default::default()
        }
    }
}

impl MonitorBackend for HeadlessBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn is_lid_closed(&self) -> bool {
        self.lid_is_closed
    }

    fn max_screen_size(&self) -> Option<Size> {
        self.max_screen_size
    }

    fn apply(
        &mut self,
        _config: Option<&MonitorsConfig>,
        method: ApplyMethod,
    ) -> anyhow::Result<()> {
        if self.fail_applies > 0 {
            if method != ApplyMethod::VerifyOnly {
                self.fail_applies -= 1;
            }
            anyhow::bail!("backend rejected configuration");
        }
        Ok(())
    }
}

struct PendingConfirmation {
    deadline: Duration,
}

/// Owns the monitor inventory, the logical monitor list and all configuration
/// state. One per compositor instance, passed by reference to the solver and
/// placement entry points.
pub struct MonitorManager {
    backend: Box<dyn MonitorBackend>,
    monitors: Vec<Monitor>,
    logical_monitors: Vec<LogicalMonitor>,
    primary_logical_monitor: Option<usize>,
    layout_mode: LayoutMode,
    /// Hardware generation; bumped on every inventory read. Configuration
    /// requests must quote it.
    serial: u32,
    in_init: bool,
    panel_orientation_managed: bool,
    panel_transform: Option<Transform>,
    config_manager: ConfigManager,
    current_switch_config: SwitchConfigType,
    pending_switch_config: Option<SwitchConfigType>,
    pending_confirmation: Option<PendingConfirmation>,
    monitors_changed_hook: Option<Box<dyn FnMut(&[LogicalMonitor])>>,
}

impl MonitorManager {
    pub fn new(backend: Box<dyn MonitorBackend>) -> Self {
        let layout_mode = super::default_layout_mode_for(backend.capabilities());
        Self {
            backend,
            monitors: Vec::new(),
            logical_monitors: Vec::new(),
            primary_logical_monitor: None,
            layout_mode,
            serial: 0,
            in_init: true,
            panel_orientation_managed: false,
            panel_transform: None,
            config_manager: ConfigManager::new(),
            current_switch_config: SwitchConfigType::Unknown,
            pending_switch_config: None,
            pending_confirmation: None,
            monitors_changed_hook: None,
        }
    }

    pub fn monitors(&self) -> &[Monitor] {
        &self.monitors
    }

    pub fn logical_monitors(&self) -> &[LogicalMonitor] {
        &self.logical_monitors
    }

    pub fn primary_logical_monitor(&self) -> Option<&LogicalMonitor> {
        self.primary_logical_monitor
            .map(|idx| &self.logical_monitors[idx])
    }

    pub fn is_headless(&self) -> bool {
        self.logical_monitors.is_empty()
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn layout_mode(&self) -> LayoutMode {
        self.layout_mode
    }

    pub fn config_manager(&self) -> &ConfigManager {
        &self.config_manager
    }

    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    /// Registers a hook fired once per logical monitor rebuild, after the new
    /// list is in place and before the previous one is released.
    pub fn set_monitors_changed_hook(&mut self, hook: Box<dyn FnMut(&[LogicalMonitor])>) {
        self.monitors_changed_hook = Some(hook);
    }

    /// Enables sensor-driven panel orientation and sets the current sensor
    /// transform.
    pub fn set_panel_orientation(&mut self, transform: Option<Transform>) {
        self.panel_orientation_managed = transform.is_some();
        self.panel_transform = transform;
    }

    /// The logical monitor overlapping most of `rect`, or containing it when
    /// zero-sized.
    pub fn logical_monitor_at(&self, rect: &Rect) -> Option<&LogicalMonitor> {
        if rect.width == 0 || rect.height == 0 {
            let point = oriel_ipc::Point {
                x: rect.x,
                y: rect.y,
            };
            return self
                .logical_monitors
                .iter()
                .find(|l| l.rect.contains_point(point));
        }

        self.logical_monitors
            .iter()
            .filter_map(|l| Some((l, l.rect.intersection(rect)?.area())))
            .max_by_key(|(_, area)| *area)
            .map(|(l, _)| l)
    }

    pub fn monitor_from_spec(&self, spec: &MonitorSpec) -> Option<&Monitor> {
        self.monitors.iter().find(|m| m.spec() == spec)
    }

    pub fn monitor_from_connector(&self, connector: &str) -> Option<&Monitor> {
        self.monitors.iter().find(|m| m.spec().connector == connector)
    }

    fn scales_constraint(&self) -> ScalesConstraint {
        match self.layout_mode {
            LayoutMode::Logical => ScalesConstraint::empty(),
            LayoutMode::Physical => ScalesConstraint::NO_FRAC,
        }
    }

    /// Replaces the monitor inventory from a fresh backend enumeration and
    /// bumps the hardware serial. Call [`Self::ensure_configured`] afterwards.
    pub fn read_current_state(&mut self, outputs: &[Output]) {
        self.monitors = outputs.iter().map(Monitor::from_output).collect();
        self.serial = self.serial.wrapping_add(1);
    }

    /// Selects and applies a configuration for the present hardware.
    ///
    /// Tries, in order: the stored configuration (startup or
    /// non-mode-updating hotplugs only), the current configuration re-derived
    /// for panel orientation, a configuration from hotplug position hints,
    /// the most recent previous configuration, a linear layout, and a
    /// single-monitor fallback. Every candidate the backend rejects is logged
    /// and skipped; if everything fails the manager ends up explicitly
    /// headless.
    pub fn ensure_configured(&mut self) -> Option<Rc<MonitorsConfig>> {
        let use_stored = self.in_init || !self.backend.has_hotplug_mode_update();
        let method = if use_stored {
            ApplyMethod::Persistent
        } else {
            ApplyMethod::Temporary
        };
        let fallback_method = ApplyMethod::Temporary;
        self.in_init = false;

        if use_stored {
            if let Some(config) = self.stored_config_for_orientation() {
                let config = self.amend_color_modes_if_needed(config);
                match self.apply_monitors_config(Some(config.clone()), method) {
                    Ok(()) => return Some(config),
                    Err(err) => warn!("failed to use stored monitor configuration: {err:#}"),
                }
            }
        }

        if self.panel_orientation_managed {
            if let Some(config) = self.current_config_for_orientation() {
                if self.is_config_complete(&config) {
                    match self.apply_monitors_config(Some(config.clone()), method) {
                        Ok(()) => return Some(config),
                        Err(err) => warn!("failed to use current monitor configuration: {err:#}"),
                    }
                }
            }
        }

        let suggested = self.config_manager.create_suggested(&self.context());
        if let Some(config) = suggested {
            match self.apply_monitors_config(Some(config.clone()), method) {
                Ok(()) => return Some(config),
                Err(err) => warn!("failed to use suggested monitor configuration: {err:#}"),
            }
        }

        if let Some(config) = self.previous_config_for_orientation() {
            if self.is_config_complete(&config) {
                let config = self.amend_color_modes_if_needed(config);
                match self.apply_monitors_config(Some(config.clone()), method) {
                    Ok(()) => return Some(config),
                    Err(err) => warn!("failed to use previous monitor configuration: {err:#}"),
                }
            }
        }

        let linear = self.config_manager.create_linear(&self.context());
        if let Some(config) = linear {
            match self.apply_monitors_config(Some(config.clone()), method) {
                Ok(()) => return Some(config),
                Err(err) => warn!("failed to use linear monitor configuration: {err:#}"),
            }
        }

        let fallback = self.config_manager.create_fallback(&self.context());
        if let Some(config) = fallback {
            match self.apply_monitors_config(Some(config.clone()), fallback_method) {
                Ok(()) => return Some(config),
                Err(err) => warn!("failed to use fallback monitor configuration: {err:#}"),
            }
        }

        if let Err(err) = self.apply_monitors_config(None, fallback_method) {
            warn!("failed to configure headless: {err:#}");
        }
        None
    }

    fn context(&self) -> MonitorsContext<'_> {
        MonitorsContext {
            monitors: &self.monitors,
            lid_is_closed: self.backend.is_lid_closed(),
            global_scale_required: self
                .backend
                .capabilities()
                .contains(Capabilities::GLOBAL_SCALE_REQUIRED),
            layout_mode: self.layout_mode,
            panel_transform: self
                .panel_orientation_managed
                .then_some(self.panel_transform.unwrap_or_default()),
        }
    }

    fn stored_config_for_orientation(&self) -> Option<Rc<MonitorsConfig>> {
        let ctx = self.context();
        let config = self.config_manager.get_stored(&ctx)?;
        if self.panel_orientation_managed {
            if let Some(oriented) = self
                .config_manager
                .create_for_builtin_orientation(&ctx, &config)
            {
                return Some(oriented);
            }
        }
        Some(config)
    }

    fn current_config_for_orientation(&self) -> Option<Rc<MonitorsConfig>> {
        let ctx = self.context();
        let current = self.config_manager.current()?.clone();
        self.config_manager
            .create_for_builtin_orientation(&ctx, &current)
    }

    fn previous_config_for_orientation(&self) -> Option<Rc<MonitorsConfig>> {
        let ctx = self.context();
        let config = self.config_manager.previous()?.clone();
        if self.panel_orientation_managed {
            if let Some(oriented) = self
                .config_manager
                .create_for_builtin_orientation(&ctx, &config)
            {
                return Some(oriented);
            }
        }
        Some(config)
    }

    /// Replaces unsupported per-monitor color modes with the default, keeping
    /// the original configuration as the parent.
    fn amend_color_modes_if_needed(&self, config: Rc<MonitorsConfig>) -> Rc<MonitorsConfig> {
        let amend_needed = config
            .logical_monitor_configs
            .iter()
            .flat_map(|l| l.monitor_configs.iter())
            .any(|m| {
                self.monitor_from_spec(&m.monitor_spec)
                    .is_some_and(|monitor| !monitor.is_color_mode_supported(m.color_mode))
            });
        if !amend_needed {
            return config;
        }

        let mut amended = (*config).clone();
        for logical_monitor_config in &mut amended.logical_monitor_configs {
            for monitor_config in &mut logical_monitor_config.monitor_configs {
                let supported = self
                    .monitor_from_spec(&monitor_config.monitor_spec)
                    .is_some_and(|m| m.is_color_mode_supported(monitor_config.color_mode));
                if !supported {
                    monitor_config.color_mode = Default::default();
                }
            }
        }
        Rc::new(amended.with_parent(config))
    }

    /// A configuration is applicable iff every referenced monitor and mode
    /// still exist, every scale is supported (and globally consistent where
    /// required), and no closed laptop panel is targeted.
    pub fn is_config_applicable(&self, config: &MonitorsConfig) -> Result<(), String> {
        for logical_monitor_config in &config.logical_monitor_configs {
            let scale = logical_monitor_config.scale;

            for monitor_config in &logical_monitor_config.monitor_configs {
                let monitor = self
                    .monitor_from_spec(&monitor_config.monitor_spec)
                    .ok_or_else(|| "specified monitor not found".to_owned())?;

                let mode = monitor
                    .mode_from_spec(&monitor_config.mode_spec)
                    .ok_or_else(|| "specified monitor mode not available".to_owned())?;

                if !self.is_scale_supported_for_config(config, monitor, &mode.spec, scale) {
                    return Err("scale not supported by backend".to_owned());
                }

                if monitor.is_builtin() && self.backend.is_lid_closed() {
                    return Err("refusing to activate a closed laptop panel".to_owned());
                }
            }
        }

        Ok(())
    }

    fn is_scale_supported_for_config(
        &self,
        config: &MonitorsConfig,
        monitor: &Monitor,
        mode_spec: &super::ModeSpec,
        scale: f64,
    ) -> bool {
        let constraint = match config.layout_mode {
            LayoutMode::Logical => ScalesConstraint::empty(),
            LayoutMode::Physical => ScalesConstraint::NO_FRAC,
        };
        if !monitor.is_scale_supported(mode_spec, constraint, scale) {
            return false;
        }

        if self
            .backend
            .capabilities()
            .contains(Capabilities::GLOBAL_SCALE_REQUIRED)
        {
            return config
                .logical_monitor_configs
                .iter()
                .all(|l| scales_equal(l.scale, scale));
        }

        true
    }

    /// Complete means: the key matches the present hardware and the
    /// configuration is applicable.
    pub fn is_config_complete(&self, config: &MonitorsConfig) -> bool {
        let Some(current_key) = ConfigManager::key_for_current_state(&self.context()) else {
            return false;
        };
        if current_key != config.key {
            return false;
        }

        self.is_config_applicable(config).is_ok()
    }

    /// Applies a configuration through the backend and, for non-verify
    /// methods, commits it: monitor modes and layouts update, the
    /// configuration becomes current, and the logical monitor list is rebuilt
    /// atomically.
    pub fn apply_monitors_config(
        &mut self,
        config: Option<Rc<MonitorsConfig>>,
        method: ApplyMethod,
    ) -> anyhow::Result<()> {
        self.backend
            .apply(config.as_deref(), method)
            .context("applying monitor configuration")?;

        if method == ApplyMethod::VerifyOnly {
            return Ok(());
        }

        self.update_monitors_from_config(config.as_deref());
        self.config_manager.set_current(config.clone());
        self.current_switch_config = config
            .as_deref()
            .map(|c| c.switch_config)
            .unwrap_or(SwitchConfigType::Unknown);
        self.rebuild_logical_monitors(config.as_deref());

        Ok(())
    }

    fn update_monitors_from_config(&mut self, config: Option<&MonitorsConfig>) {
        for monitor in &mut self.monitors {
            let assignment = config.and_then(|config| {
                config.logical_monitor_configs.iter().find_map(|l| {
                    l.monitor_configs
                        .iter()
                        .find(|m| &m.monitor_spec == monitor.spec())
                        .map(|m| (l, m))
                })
            });

            match assignment {
                Some((logical_monitor_config, monitor_config)) => {
                    monitor.set_current_mode(Some(monitor_config.mode_spec));
                    monitor.set_layout(logical_monitor_config.layout);
                }
                None => monitor.set_current_mode(None),
            }
        }
    }

    /// Rebuilds the logical monitor list. The new list replaces the old one
    /// atomically; the monitors-changed hook fires exactly once, after the
    /// swap and before the old list is dropped.
    fn rebuild_logical_monitors(&mut self, config: Option<&MonitorsConfig>) {
        let old_logical_monitors = std::mem::take(&mut self.logical_monitors);

        let (logical_monitors, primary) = if self
            .backend
            .capabilities()
            .contains(Capabilities::GLOBAL_SCALE_REQUIRED)
        {
            self.build_logical_monitors_derived(config)
        } else {
            self.build_logical_monitors_explicit(config)
        };

        self.logical_monitors = logical_monitors;
        self.primary_logical_monitor = primary;
        if let Some(idx) = primary {
            self.logical_monitors[idx].is_primary = true;
        }

        debug!(
            "rebuilt {} logical monitors (primary: {:?})",
            self.logical_monitors.len(),
            primary,
        );
        if let Some(hook) = &mut self.monitors_changed_hook {
            hook(&self.logical_monitors);
        }

        drop(old_logical_monitors);
    }

    /// One logical monitor per logical monitor config, numbered in config
    /// order. Primary is the flagged config, else logical monitor #0.
    fn build_logical_monitors_explicit(
        &self,
        config: Option<&MonitorsConfig>,
    ) -> (Vec<LogicalMonitor>, Option<usize>) {
        let Some(config) = config else {
            return (Vec::new(), None);
        };

        let mut logical_monitors = Vec::new();
        let mut primary = None;
        for (number, logical_monitor_config) in config.logical_monitor_configs.iter().enumerate() {
            if logical_monitor_config.is_primary {
                primary = Some(number);
            }
            logical_monitors.push(LogicalMonitor::from_config(logical_monitor_config, number));
        }

        if primary.is_none() && !logical_monitors.is_empty() {
            primary = Some(0);
        }

        (logical_monitors, primary)
    }

    /// Iterates active monitors; monitors sharing an identical derived
    /// rectangle merge into one (mirroring) logical monitor. All of them get
    /// the single global scale.
    fn build_logical_monitors_derived(
        &self,
        config: Option<&MonitorsConfig>,
    ) -> (Vec<LogicalMonitor>, Option<usize>) {
        let global_scale = match config {
            Some(config) => self.derive_configured_global_scale(config),
            None => self.derive_calculated_global_scale(),
        };

        let mut logical_monitors: Vec<LogicalMonitor> = Vec::new();
        let mut primary = None;
        for monitor in &self.monitors {
            if !monitor.is_active() {
                continue;
            }

            let layout = monitor.derive_layout();
            let number = match logical_monitors.iter_mut().find(|l| l.rect == layout) {
                Some(logical_monitor) => {
                    logical_monitor.monitors.push(monitor.spec().clone());
                    logical_monitor.number
                }
                None => {
                    let number = logical_monitors.len();
                    logical_monitors.push(LogicalMonitor::new_derived(
                        monitor,
                        layout,
                        global_scale,
                        number,
                    ));
                    number
                }
            };

            if monitor.is_primary() {
                primary = Some(number);
            }
        }

        if primary.is_none() && !logical_monitors.is_empty() {
            primary = Some(0);
        }

        (logical_monitors, primary)
    }

    /// The single scale every logical monitor config agrees on. Falling back
    /// to 1.0 is an explicit degradation, not business as usual.
    fn derive_configured_global_scale(&self, config: &MonitorsConfig) -> f64 {
        match config.global_scale() {
            Some(scale) => scale,
            None => {
                warn!(
                    "no consistent global scale in the configuration, \
                     degrading to scale 1.0",
                );
                1.0
            }
        }
    }

    fn calculate_monitor_scale(&self, monitor: &Monitor) -> f64 {
        let mode_spec = monitor
            .current_mode()
            .unwrap_or_else(|| monitor.preferred_mode())
            .spec;
        monitor.calculate_mode_scale(&mode_spec, self.scales_constraint())
    }

    fn is_scale_supported_by_other_monitors(&self, except: &Monitor, scale: f64) -> bool {
        self.monitors
            .iter()
            .filter(|m| !std::ptr::eq(*m, except) && m.is_active())
            .all(|m| {
                let mode_spec = m.current_mode().unwrap_or_else(|| m.preferred_mode()).spec;
                m.is_scale_supported(&mode_spec, self.scales_constraint(), scale)
            })
    }

    /// Prefers the primary monitor's best-supported scale when every other
    /// active monitor can use it, else the maximum individually supportable
    /// scale among the rest.
    fn derive_calculated_global_scale(&self) -> f64 {
        let primary = self.monitors.iter().find(|m| m.is_primary());

        if let Some(primary) = primary.filter(|m| m.is_active()) {
            let scale = self.calculate_monitor_scale(primary);
            if self.is_scale_supported_by_other_monitors(primary, scale) {
                return scale;
            }
        }

        let mut scale = 1.0f64;
        for monitor in &self.monitors {
            if primary.is_some_and(|p| std::ptr::eq(p, monitor)) || !monitor.is_active() {
                continue;
            }

            let monitor_scale = self.calculate_monitor_scale(monitor);
            if self.is_scale_supported_by_other_monitors(monitor, monitor_scale) {
                scale = scale.max(monitor_scale);
            }
        }

        scale
    }

    /// Confirms or rejects the pending persistent configuration.
    pub fn confirm_configuration(&mut self, ok: bool) {
        if self.pending_confirmation.take().is_none() {
            return;
        }

        if ok {
            self.config_manager.save_current();
        } else {
            self.restore_previous_config();
        }
    }

    /// Restores the previous configuration if the confirmation window has
    /// expired.
    pub fn check_confirmation_timeout(&mut self, now: Duration) {
        let expired = self
            .pending_confirmation
            .as_ref()
            .is_some_and(|p| now >= p.deadline);
        if expired {
            self.pending_confirmation = None;
            warn!("configuration not confirmed in time, restoring previous");
            self.restore_previous_config();
        }
    }

    pub fn has_pending_confirmation(&self) -> bool {
        self.pending_confirmation.is_some()
    }

    fn restore_previous_config(&mut self) {
        if let Some(previous) = self.config_manager.pop_previous() {
            let config = if self.panel_orientation_managed {
                self.config_manager
                    .create_for_builtin_orientation(&self.context(), &previous)
                    .unwrap_or(previous)
            } else {
                previous
            };

            match self.apply_monitors_config(Some(config), ApplyMethod::Temporary) {
                Ok(()) => return,
                Err(err) => warn!("failed to restore previous configuration: {err:#}"),
            }
        }

        self.ensure_configured();
    }

    pub fn can_switch_config(&self) -> bool {
        !self.backend.is_lid_closed() && self.monitors.len() > 1
    }

    pub fn current_switch_config(&self) -> SwitchConfigType {
        self.current_switch_config
    }

    /// Requests a display-switch configuration. A newly requested switch
    /// cancels and replaces an unapplied pending one.
    pub fn request_switch_config(&mut self, switch_config: SwitchConfigType) {
        if !self.can_switch_config() {
            return;
        }
        if self.pending_switch_config.is_some() {
            debug!("coalescing pending switch config request");
        }
        self.pending_switch_config = Some(switch_config);
    }

    /// Applies the pending switch request, if any.
    pub fn apply_pending_switch_config(&mut self) -> bool {
        let Some(switch_config) = self.pending_switch_config.take() else {
            return false;
        };

        let Some(config) = self
            .config_manager
            .create_for_switch_config(&self.context(), switch_config)
        else {
            return false;
        };

        match self.apply_monitors_config(Some(config), ApplyMethod::Temporary) {
            Ok(()) => true,
            Err(err) => {
                warn!("failed to apply switch configuration: {err:#}");
                false
            }
        }
    }

    /// Snapshot of the current state for configuration clients.
    pub fn current_state(&self) -> CurrentState {
        let constraint = self.scales_constraint();
        let monitors = self
            .monitors
            .iter()
            .map(|monitor| {
                let current_mode_id = monitor.current_mode().map(|m| m.id.clone());
                let preferred_mode_id = monitor.preferred_mode().id.clone();
                let modes = monitor
                    .modes()
                    .iter()
                    .map(|mode| ModeInfo {
                        id: mode.id.clone(),
                        width: mode.spec.width,
                        height: mode.spec.height,
                        refresh_rate: mode.spec.refresh_rate,
                        preferred_scale: monitor.calculate_mode_scale(&mode.spec, constraint),
                        supported_scales: monitor
                            .calculate_supported_scales(&mode.spec, constraint),
                        is_preferred: mode.id == preferred_mode_id,
                        is_current: Some(&mode.id) == current_mode_id.as_ref(),
                    })
                    .collect();

                MonitorInfo {
                    spec: selector_from_spec(monitor.spec()),
                    display_name: monitor.display_name().to_owned(),
                    modes,
                    is_builtin: monitor.is_builtin(),
                    is_for_lease: monitor.is_for_lease(),
                }
            })
            .collect();

        let logical_monitors = self
            .logical_monitors
            .iter()
            .map(|logical_monitor| LogicalMonitorInfo {
                x: logical_monitor.rect.x,
                y: logical_monitor.rect.y,
                scale: logical_monitor.scale,
                transform: logical_monitor.transform,
                primary: logical_monitor.is_primary,
                monitors: logical_monitor
                    .monitors
                    .iter()
                    .map(selector_from_spec)
                    .collect(),
            })
            .collect();

        CurrentState {
            serial: self.serial,
            monitors,
            logical_monitors,
            supports_changing_layout_mode: self
                .backend
                .capabilities()
                .contains(Capabilities::LAYOUT_MODE),
            global_scale_required: self
                .backend
                .capabilities()
                .contains(Capabilities::GLOBAL_SCALE_REQUIRED),
            layout_mode: self.layout_mode,
        }
    }

    /// Validates and applies a client configuration request.
    ///
    /// State is left untouched on any error. `now` stamps the confirmation
    /// window for persistent requests.
    pub fn handle_apply_config_request(
        &mut self,
        request: &ApplyConfigRequest,
        now: Duration,
    ) -> Result<(), ConfigError> {
        if request.serial != self.serial {
            return Err(ConfigError::AccessDenied(
                "the requested configuration is based on stale information".to_owned(),
            ));
        }

        let layout_mode = match request.layout_mode {
            Some(layout_mode) => {
                if !self
                    .backend
                    .capabilities()
                    .contains(Capabilities::LAYOUT_MODE)
                {
                    return Err(ConfigError::InvalidArgument(
                        "can't set layout mode".to_owned(),
                    ));
                }
                layout_mode
            }
            None => self.layout_mode,
        };

        let mut logical_monitor_configs = Vec::new();
        for descriptor in &request.logical_monitors {
            logical_monitor_configs
                .push(self.logical_monitor_config_from_descriptor(descriptor, layout_mode)?);
        }

        if let Some(max_size) = self.backend.max_screen_size() {
            let extent = logical_monitor_configs
                .iter()
                .fold(Rect::default(), |extent, l: &LogicalMonitorConfig| {
                    extent.union(&l.layout)
                });
            if extent.width > max_size.width || extent.height > max_size.height {
                return Err(ConfigError::InvalidArgument(format!(
                    "layout of {}x{} exceeds the max screen size {}x{}",
                    extent.width, extent.height, max_size.width, max_size.height,
                )));
            }
        }

        let disabled = self
            .monitors
            .iter()
            .filter(|monitor| {
                let visible = !(monitor.is_builtin() && self.backend.is_lid_closed());
                let assigned = logical_monitor_configs
                    .iter()
                    .flat_map(|l: &LogicalMonitorConfig| l.monitor_configs.iter())
                    .any(|m| &m.monitor_spec == monitor.spec());
                !(visible && assigned)
            })
            .map(|m| m.spec().clone())
            .collect();

        let for_lease = request
            .monitors_for_lease
            .iter()
            .map(spec_from_selector)
            .collect();

        let config = MonitorsConfig::new(
            logical_monitor_configs,
            disabled,
            for_lease,
            layout_mode,
            ConfigFlags::empty(),
        );

        verify_monitors_config(&config).map_err(ConfigError::InvalidArgument)?;
        self.is_config_applicable(&config)
            .map_err(ConfigError::InvalidArgument)?;

        let config = Rc::new(config);

        if request.method != ApplyMethod::VerifyOnly {
            // A newer request supersedes any pending confirmation.
            self.pending_confirmation = None;
        }

        self.apply_monitors_config(Some(config), request.method)
            .map_err(|err| ConfigError::InvalidArgument(format!("{err:#}")))?;

        if request.method == ApplyMethod::Persistent {
            self.pending_confirmation = Some(PendingConfirmation {
                deadline: now + DISPLAY_CONFIGURATION_TIMEOUT,
            });
        }

        Ok(())
    }

    fn logical_monitor_config_from_descriptor(
        &self,
        descriptor: &oriel_ipc::LogicalMonitorDescriptor,
        layout_mode: LayoutMode,
    ) -> Result<LogicalMonitorConfig, ConfigError> {
        let mut monitor_configs = Vec::new();
        for monitor_descriptor in &descriptor.monitors {
            let monitor = self
                .monitor_from_connector(&monitor_descriptor.connector)
                .ok_or_else(|| {
                    ConfigError::InvalidArgument(format!(
                        "invalid connector '{}' specified",
                        monitor_descriptor.connector,
                    ))
                })?;

            let mode = monitor
                .mode_from_id(&monitor_descriptor.mode_id)
                .ok_or_else(|| {
                    ConfigError::InvalidArgument(format!(
                        "invalid mode '{}' specified",
                        monitor_descriptor.mode_id,
                    ))
                })?;

            let properties = &monitor_descriptor.properties;
            if properties.underscanning == Some(true) && !monitor.supports_underscanning() {
                return Err(ConfigError::InvalidArgument(
                    "underscanning requested but unsupported".to_owned(),
                ));
            }

            monitor_configs.push(MonitorConfig {
                monitor_spec: monitor.spec().clone(),
                mode_spec: mode.spec,
                enable_underscanning: properties.underscanning.unwrap_or(false),
                max_bpc: properties.max_bpc,
                rgb_range: properties.rgb_range.unwrap_or_default(),
                color_mode: properties.color_mode.unwrap_or_default(),
            });
        }

        let first = monitor_configs.first().ok_or_else(|| {
            ConfigError::InvalidArgument("empty logical monitor".to_owned())
        })?;

        // Snap the requested scale to the exactly-supported value.
        let monitor = self.monitor_from_spec(&first.monitor_spec).ok_or_else(|| {
            ConfigError::InvalidArgument("specified monitor not found".to_owned())
        })?;
        let constraint = match layout_mode {
            LayoutMode::Logical => ScalesConstraint::empty(),
            LayoutMode::Physical => ScalesConstraint::NO_FRAC,
        };
        let scale = monitor
            .calculate_supported_scales(&first.mode_spec, constraint)
            .into_iter()
            .find(|s| scales_equal(*s, descriptor.scale))
            .ok_or_else(|| {
                ConfigError::InvalidArgument(format!(
                    "scale {} not valid for resolution {}x{}",
                    descriptor.scale, first.mode_spec.width, first.mode_spec.height,
                ))
            })?;

        let (mut width, mut height) = if descriptor.transform.is_rotated() {
            (first.mode_spec.height, first.mode_spec.width)
        } else {
            (first.mode_spec.width, first.mode_spec.height)
        };
        if layout_mode == LayoutMode::Logical {
            width = (width as f64 / scale).round() as i32;
            height = (height as f64 / scale).round() as i32;
        }

        let logical_monitor_config = LogicalMonitorConfig {
            layout: Rect::new(descriptor.x, descriptor.y, width, height),
            scale,
            transform: descriptor.transform,
            is_primary: descriptor.primary,
            is_presentation: false,
            monitor_configs,
        };

        verify_logical_monitor_config(&logical_monitor_config, layout_mode)
            .map_err(ConfigError::InvalidArgument)?;

        Ok(logical_monitor_config)
    }
}

fn selector_from_spec(spec: &MonitorSpec) -> MonitorSelector {
    MonitorSelector {
        connector: spec.connector.clone(),
        vendor: spec.vendor.clone(),
        product: spec.product.clone(),
        serial: spec.serial.clone(),
    }
}

fn spec_from_selector(selector: &MonitorSelector) -> MonitorSpec {
    MonitorSpec {
        connector: selector.connector.clone(),
        vendor: selector.vendor.clone(),
        product: selector.product.clone(),
        serial: selector.serial.clone(),
    }
}

#[cfg(test)]
mod tests {
    use oriel_ipc::{LogicalMonitorDescriptor, MonitorDescriptor};

    use super::super::config::ModeSpec;
    use super::super::CrtcMode;
    use super::*;

    fn mode(width: i32, height: i32) -> CrtcMode {
        CrtcMode {
            spec: ModeSpec {
                width,
                height,
                refresh_rate: 60.,
            },
            is_preferred: true,
        }
    }

    fn output(connector: &str, width: i32, height: i32) -> Output {
        let spec = MonitorSpec::new(connector, "ACME", "Display 3000", connector);
        Output::with_modes(spec, vec![mode(width, height)])
    }

    fn manager_with_outputs(outputs: &[Output]) -> MonitorManager {
        let mut manager = MonitorManager::new(Box::new(HeadlessBackend::new()));
        manager.read_current_state(outputs);
        manager
    }

    #[test]
    fn two_monitors_no_saved_config_get_linear_layout() {
        let outputs = [output("DP-1", 1920, 1080), output("DP-2", 1920, 1080)];
        let mut manager = manager_with_outputs(&outputs);
        let config = manager.ensure_configured().unwrap();

        assert_eq!(config.logical_monitor_configs.len(), 2);
        let logical_monitors = manager.logical_monitors();
        assert_eq!(logical_monitors.len(), 2);
        assert_eq!(logical_monitors[0].rect, Rect::new(0, 0, 1920, 1080));
        assert_eq!(logical_monitors[1].rect, Rect::new(1920, 0, 1920, 1080));
        assert_eq!(logical_monitors[0].scale, 1.0);
        assert!(logical_monitors[0].is_primary);
        assert!(!logical_monitors[1].is_primary);
    }

    #[test]
    fn backend_rejections_walk_the_chain_to_headless() {
        let outputs = [output("DP-1", 1920, 1080)];
        let mut backend = HeadlessBackend::new();
        // Fail everything except the final headless apply.
        backend.fail_applies = u32::MAX;
        let mut manager = MonitorManager::new(Box::new(backend));
        manager.read_current_state(&outputs);

        // Every candidate fails, including headless; the manager must not
        // panic and must end up with no logical monitors.
        assert!(manager.ensure_configured().is_none());
        assert!(manager.is_headless());
    }

    #[test]
    fn one_rejection_falls_through_to_next_candidate() {
        let outputs = [output("DP-1", 1920, 1080)];
        let mut backend = HeadlessBackend::new();
        backend.fail_applies = 1;
        let mut manager = MonitorManager::new(Box::new(backend));
        manager.read_current_state(&outputs);

        let config = manager.ensure_configured().unwrap();
        assert_eq!(config.logical_monitor_configs.len(), 1);
        assert!(!manager.is_headless());
    }

    #[test]
    fn stored_config_wins_on_startup() {
        let outputs = [output("DP-1", 1920, 1080), output("DP-2", 1920, 1080)];
        let mut manager = manager_with_outputs(&outputs);

        // Establish and save a non-default (mirrored) configuration.
        manager.request_switch_config(SwitchConfigType::AllMirror);
        assert!(manager.apply_pending_switch_config());
        manager.config_manager.save_current();
        let saved_key = manager.config_manager.current().unwrap().key.clone();

        // Fresh manager, same hardware: stored config should be selected.
        let mut manager = manager_with_outputs(&outputs);
        // Seed the store the way a config file would.
        let stored = {
            let ctx = manager.context();
            let config = manager
                .config_manager
                .create_for_switch_config(&ctx, SwitchConfigType::AllMirror)
                .unwrap();
            config
        };
        assert_eq!(stored.key, saved_key);
        manager.config_manager.set_current(Some(stored));
        manager.config_manager.save_current();
        manager.config_manager.set_current(None);
        manager.config_manager.clear_history();

        let config = manager.ensure_configured().unwrap();
        assert_eq!(config.logical_monitor_configs.len(), 1);
        assert_eq!(config.logical_monitor_configs[0].monitor_configs.len(), 2);
    }

    #[test]
    fn suggested_positions_build_the_layout() {
        let mut left = output("DP-1", 1920, 1080);
        left.suggested_position = Some(oriel_ipc::Point { x: 0, y: 0 });
        let mut right = output("DP-2", 1920, 1080);
        right.suggested_position = Some(oriel_ipc::Point { x: 1920, y: 0 });

        let mut manager = manager_with_outputs(&[left, right]);
        let config = manager.ensure_configured().unwrap();
        let rects: Vec<Rect> = config
            .logical_monitor_configs
            .iter()
            .map(|l| l.layout)
            .collect();
        assert!(rects.contains(&Rect::new(0, 0, 1920, 1080)));
        assert!(rects.contains(&Rect::new(1920, 0, 1920, 1080)));
    }

    #[test]
    fn closed_lid_panel_is_not_activated() {
        let mut panel = output("eDP-1", 1920, 1080);
        panel.is_builtin = true;
        let external = output("DP-1", 2560, 1440);

        let mut backend = HeadlessBackend::new();
        backend.lid_is_closed = true;
        let mut manager = MonitorManager::new(Box::new(backend));
        manager.read_current_state(&[panel, external]);

        let config = manager.ensure_configured().unwrap();
        assert_eq!(config.logical_monitor_configs.len(), 1);
        assert_eq!(
            config.logical_monitor_configs[0].monitor_configs[0]
                .monitor_spec
                .connector,
            "DP-1",
        );
    }

    #[test]
    fn derived_rebuild_merges_mirrors() {
        let outputs = [output("DP-1", 1920, 1080), output("DP-2", 1920, 1080)];
        let mut backend = HeadlessBackend::new();
        backend.capabilities = Capabilities::GLOBAL_SCALE_REQUIRED;
        let mut manager = MonitorManager::new(Box::new(backend));
        manager.read_current_state(&outputs);

        manager.request_switch_config(SwitchConfigType::AllMirror);
        assert!(manager.apply_pending_switch_config());

        // Both monitors share the derived rectangle, so they merge into one
        // logical monitor.
        assert_eq!(manager.logical_monitors().len(), 1);
        assert_eq!(manager.logical_monitors()[0].monitors.len(), 2);
    }

    fn request_for(manager: &MonitorManager) -> ApplyConfigRequest {
        ApplyConfigRequest {
            serial: manager.serial(),
            method: ApplyMethod::Temporary,
            layout_mode: None,
            logical_monitors: vec![LogicalMonitorDescriptor {
                x: 0,
                y: 0,
                scale: 1.0,
                transform: Transform::Normal,
                primary: true,
                monitors: vec![MonitorDescriptor {
                    connector: "DP-1".to_owned(),
                    mode_id: "1920x1080@60.000".to_owned(),
                    properties: Default::default(),
                }],
            }],
            monitors_for_lease: Vec::new(),
        }
    }

    #[test]
    fn stale_serial_is_access_denied() {
        let outputs = [output("DP-1", 1920, 1080)];
        let mut manager = manager_with_outputs(&outputs);
        manager.ensure_configured();

        let mut request = request_for(&manager);
        request.serial = request.serial.wrapping_add(1);
        let err = manager
            .handle_apply_config_request(&request, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, ConfigError::AccessDenied(_)));
    }

    #[test]
    fn unknown_connector_and_mode_are_invalid_arguments() {
        let outputs = [output("DP-1", 1920, 1080)];
        let mut manager = manager_with_outputs(&outputs);
        manager.ensure_configured();

        let mut request = request_for(&manager);
        request.logical_monitors[0].monitors[0].connector = "DP-9".to_owned();
        let err = manager
            .handle_apply_config_request(&request, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidArgument(_)));

        let mut request = request_for(&manager);
        request.logical_monitors[0].monitors[0].mode_id = "640x480@60.000".to_owned();
        let err = manager
            .handle_apply_config_request(&request, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidArgument(_)));
    }

    #[test]
    fn unsupported_scale_is_invalid_argument() {
        let outputs = [output("DP-1", 1920, 1080)];
        let mut manager = manager_with_outputs(&outputs);
        manager.ensure_configured();

        let mut request = request_for(&manager);
        request.logical_monitors[0].scale = 0.5;
        let err = manager
            .handle_apply_config_request(&request, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidArgument(_)));
    }

    #[test]
    fn verify_only_leaves_state_untouched() {
        let outputs = [output("DP-1", 1920, 1080), output("DP-2", 1920, 1080)];
        let mut manager = manager_with_outputs(&outputs);
        manager.ensure_configured();
        let before: Vec<Rect> = manager.logical_monitors().iter().map(|l| l.rect).collect();

        let mut request = request_for(&manager);
        request.method = ApplyMethod::VerifyOnly;
        manager
            .handle_apply_config_request(&request, Duration::ZERO)
            .unwrap();

        let after: Vec<Rect> = manager.logical_monitors().iter().map(|l| l.rect).collect();
        assert_eq!(before, after);
        assert!(!manager.has_pending_confirmation());
    }

    #[test]
    fn persistent_apply_times_out_and_restores() {
        let outputs = [output("DP-1", 1920, 1080), output("DP-2", 1920, 1080)];
        let mut manager = manager_with_outputs(&outputs);
        manager.ensure_configured();
        assert_eq!(manager.logical_monitors().len(), 2);

        let mut request = request_for(&manager);
        request.method = ApplyMethod::Persistent;
        manager
            .handle_apply_config_request(&request, Duration::ZERO)
            .unwrap();
        assert!(manager.has_pending_confirmation());
        assert_eq!(manager.logical_monitors().len(), 1);

        // Not expired yet.
        manager.check_confirmation_timeout(Duration::from_secs(5));
        assert!(manager.has_pending_confirmation());
        assert_eq!(manager.logical_monitors().len(), 1);

        manager.check_confirmation_timeout(Duration::from_secs(30));
        assert!(!manager.has_pending_confirmation());
        assert_eq!(manager.logical_monitors().len(), 2);
    }

    #[test]
    fn confirmed_persistent_apply_is_saved() {
        let outputs = [output("DP-1", 1920, 1080), output("DP-2", 1920, 1080)];
        let mut manager = manager_with_outputs(&outputs);
        manager.ensure_configured();

        let mut request = request_for(&manager);
        request.method = ApplyMethod::Persistent;
        manager
            .handle_apply_config_request(&request, Duration::ZERO)
            .unwrap();
        manager.confirm_configuration(true);
        assert!(!manager.has_pending_confirmation());

        let stored = manager.config_manager.get_stored(&manager.context());
        assert!(stored.is_some());
        assert_eq!(stored.unwrap().logical_monitor_configs.len(), 1);
    }

    #[test]
    fn monitors_changed_fires_once_per_rebuild() {
        use std::cell::Cell;
        use std::rc::Rc as StdRc;

        let outputs = [output("DP-1", 1920, 1080)];
        let mut manager = manager_with_outputs(&outputs);
        let count = StdRc::new(Cell::new(0));
        let hook_count = count.clone();
        manager.set_monitors_changed_hook(Box::new(move |_| {
            hook_count.set(hook_count.get() + 1);
        }));

        manager.ensure_configured();
        assert_eq!(count.get(), 1);

        let request = request_for(&manager);
        manager
            .handle_apply_config_request(&request, Duration::ZERO)
            .unwrap();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn switch_requests_coalesce() {
        let outputs = [output("DP-1", 1920, 1080), output("DP-2", 1920, 1080)];
        let mut manager = manager_with_outputs(&outputs);
        manager.ensure_configured();

        manager.request_switch_config(SwitchConfigType::External);
        manager.request_switch_config(SwitchConfigType::AllMirror);
        assert!(manager.apply_pending_switch_config());
        assert_eq!(
            manager.current_switch_config(),
            SwitchConfigType::AllMirror,
        );

        // The superseded request is gone.
        assert!(!manager.apply_pending_switch_config());
    }

    #[test]
    fn current_state_advertises_modes_and_scales() {
        let outputs = [output("DP-1", 1920, 1080)];
        let mut manager = manager_with_outputs(&outputs);
        manager.ensure_configured();

        let state = manager.current_state();
        assert_eq!(state.serial, manager.serial());
        assert_eq!(state.monitors.len(), 1);
        let mode = &state.monitors[0].modes[0];
        assert!(mode.is_preferred);
        assert!(mode.is_current);
        assert!(mode.supported_scales.contains(&1.0));
        assert_eq!(state.logical_monitors.len(), 1);
        assert!(state.logical_monitors[0].primary);
    }
}
