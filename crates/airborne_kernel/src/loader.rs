//! Plugin loading and lifecycle management.
//!
//! The loader owns every plugin instance. Instances are built through a
//! name -> constructor registry, initialized in dependency order, and then
//! driven by the game loop through [`PluginLoader::update_physics`] and the
//! [`MessageSink`] implementation. Every state change goes through
//! [`PluginState::can_transition_to`] and is announced on the event bus as a
//! [`PluginStateChanged`] event.

use crate::builder::PluginSpec;
use crate::context::{ConfigMap, PluginContext, Services};
use crate::dependency::{resolve_load_order, DependencyNode};
use crate::error::{ConfigError, DependencyError, PluginError};
use crate::event::{Event, EventBus};
use crate::messaging::{Message, MessageData, MessagePriority, MessageSink, MessageTopic};
use crate::plugin::{Plugin, PluginInfo, PluginMetadata, PluginState, PluginStatus};
use crate::utils::{current_timestamp, panic_message};
use crate::Result;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Sender id used for messages the kernel publishes itself
pub const KERNEL_SENDER: &str = "kernel";

/// Builds plugin instances by name
pub trait PluginFactory: Send + Sync {
    /// Create a new plugin instance
    fn create(&self) -> Result<Box<dyn Plugin>, PluginError>;

    /// Name specs refer to in their `plugin` field
    fn plugin_name(&self) -> &str;
}

/// Plugin factory wrapping a constructor closure
pub struct SimplePluginFactory<F> {
    name: String,
    constructor: F,
}

impl<F> SimplePluginFactory<F>
where
    F: Fn() -> Box<dyn Plugin> + Send + Sync,
{
    pub fn new(name: impl Into<String>, constructor: F) -> Self {
        Self {
            name: name.into(),
            constructor,
        }
    }
}

impl<F> PluginFactory for SimplePluginFactory<F>
where
    F: Fn() -> Box<dyn Plugin> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn Plugin>, PluginError> {
        Ok((self.constructor)())
    }

    fn plugin_name(&self) -> &str {
        &self.name
    }
}

/// Published on the event bus whenever a plugin changes state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginStateChanged {
    pub instance_id: String,
    pub from: PluginState,
    pub to: PluginState,
    pub timestamp: u64,
}

impl Event for PluginStateChanged {
    fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

/// Run plugin code, turning a panic into [`PluginError::Panicked`]
fn guarded<T>(call: impl FnOnce() -> Result<T, PluginError>) -> Result<T, PluginError> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(panic_info) => Err(PluginError::Panicked(panic_message(panic_info.as_ref()))),
    }
}

/// Whether a plugin with `instance_id` and `metadata` satisfies `dependency`
fn satisfies(instance_id: &str, metadata: &PluginMetadata, dependency: &str) -> bool {
    instance_id == dependency
        || metadata.name() == dependency
        || metadata.provides().iter().any(|p| p == dependency)
}

struct Candidate {
    spec: PluginSpec,
    plugin: Box<dyn Plugin>,
    optional: bool,
}

/// Owns plugin instances and drives their lifecycle
pub struct PluginLoader {
    services: Services,
    global_config: ConfigMap,
    factories: HashMap<String, Arc<dyn PluginFactory>>,
    /// Records in load order
    plugins: Vec<PluginInfo>,
    specs: HashMap<String, PluginSpec>,
    /// Indices into `plugins`, ascending (update_priority, load_order)
    schedule: Vec<usize>,
    next_load_order: usize,
}

impl PluginLoader {
    pub fn new(services: Services, global_config: ConfigMap) -> Self {
        Self {
            services,
            global_config,
            factories: HashMap::new(),
            plugins: Vec::new(),
            specs: HashMap::new(),
            schedule: Vec::new(),
            next_load_order: 0,
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn global_config(&self) -> &ConfigMap {
        &self.global_config
    }

    /// Register a constructor. Fails if the name is taken.
    pub fn register_factory(&mut self, factory: impl PluginFactory + 'static) -> Result<(), PluginError> {
        let name = factory.plugin_name().to_string();
        if self.factories.contains_key(&name) {
            return Err(PluginError::FactoryAlreadyRegistered(name));
        }
        debug!("🏭 Registered plugin factory: {}", name);
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    /// Register a constructor closure under `name`
    pub fn register_fn<F>(&mut self, name: &str, constructor: F) -> Result<(), PluginError>
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.register_factory(SimplePluginFactory::new(name, constructor))
    }

    pub fn has_factory(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered factory names, sorted
    pub fn factory_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    fn index_of(&self, instance_id: &str) -> Option<usize> {
        self.plugins.iter().position(|p| p.instance_id() == instance_id)
    }

    /// Whether a loaded or running plugin satisfies `dependency`
    fn is_available(&self, dependency: &str) -> bool {
        self.plugins.iter().any(|p| {
            matches!(p.state(), PluginState::Loaded | PluginState::Running)
                && satisfies(p.instance_id(), p.metadata(), dependency)
        })
    }

    fn advance_state(bus: &EventBus, info: &mut PluginInfo, next: PluginState) -> Result<(), PluginError> {
        let previous = info.transition(next)?;
        debug!("🔁 {}: {} -> {}", info.instance_id(), previous, next);

        let event = PluginStateChanged {
            instance_id: info.instance_id().to_string(),
            from: previous,
            to: next,
            timestamp: current_timestamp(),
        };
        if let Err(e) = bus.publish(&event) {
            warn!("⚠️ State change handler failed for {}: {}", info.instance_id(), e);
        }
        Ok(())
    }

    fn rebuild_schedule(&mut self) {
        let mut schedule: Vec<usize> = (0..self.plugins.len()).collect();
        schedule.sort_by_key(|&i| {
            let info = &self.plugins[i];
            (info.metadata().update_priority(), info.load_order())
        });
        self.schedule = schedule;
    }

    fn validate_specs(&self, specs: &[PluginSpec]) -> Result<(), ConfigError> {
        let mut seen: HashSet<&str> = HashSet::new();
        for spec in specs {
            spec.validate()?;
            if self.index_of(&spec.instance_id).is_some() || !seen.insert(spec.instance_id.as_str()) {
                return Err(ConfigError::DuplicateInstance(spec.instance_id.clone()));
            }
        }
        Ok(())
    }

    fn instantiate(&self, spec: &PluginSpec) -> Result<Box<dyn Plugin>, PluginError> {
        let factory = self
            .factories
            .get(&spec.plugin)
            .cloned()
            .ok_or_else(|| PluginError::PluginNotFound(spec.plugin.clone()))?;
        guarded(|| factory.create())
    }

    /// Load one plugin from its spec. The plugin ends up `Loaded`.
    pub fn load(&mut self, spec: PluginSpec) -> Result<()> {
        self.load_all(std::slice::from_ref(&spec)).map(|_| ())
    }

    /// Instantiate and initialize `specs` in dependency order.
    ///
    /// Optional plugins that cannot be built, resolved or initialized are
    /// logged and skipped. A required plugin failing aborts the batch: plugins
    /// already loaded from it are unloaded again and the error is returned.
    /// Returns the instance ids that reached `Loaded`, in load order.
    pub fn load_all(&mut self, specs: &[PluginSpec]) -> Result<Vec<String>> {
        self.validate_specs(specs)?;
        info!("🔌 Loading {} plugin(s)", specs.len());

        let mut candidates = Vec::with_capacity(specs.len());
        for spec in specs {
            match self.instantiate(spec) {
                Ok(plugin) => {
                    let optional = spec.optional.unwrap_or_else(|| plugin.metadata().optional());
                    candidates.push(Candidate {
                        spec: spec.clone(),
                        plugin,
                        optional,
                    });
                }
                Err(e) if spec.optional.unwrap_or(false) => {
                    warn!("⚠️ Skipping optional plugin {}: {}", spec.instance_id, e);
                }
                Err(e) => {
                    error!("❌ Failed to create plugin {}: {}", spec.instance_id, e);
                    return Err(e.into());
                }
            }
        }

        let order = self.resolve(&mut candidates)?;
        let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
        let mut loaded: Vec<String> = Vec::new();

        for index in order {
            let Some(candidate) = slots[index].take() else {
                continue;
            };
            let instance_id = candidate.spec.instance_id.clone();
            let optional = candidate.optional;

            match self.load_candidate(candidate) {
                Ok(()) => {
                    info!("✅ Successfully loaded plugin: {}", instance_id);
                    loaded.push(instance_id);
                }
                Err(e) if optional => {
                    warn!("⚠️ Skipping optional plugin {}: {}", instance_id, e);
                }
                Err(e) => {
                    error!("❌ Failed to load required plugin {}: {}", instance_id, e);
                    for done in loaded.iter().rev() {
                        if let Err(unload_err) = self.unload(done) {
                            error!("❌ Rollback of {} failed: {}", done, unload_err);
                        }
                    }
                    return Err(e);
                }
            }
        }

        info!(
            "🎉 Plugin loading complete: {}/{} plugins loaded successfully",
            loaded.len(),
            specs.len()
        );
        Ok(loaded)
    }

    /// Topologically sort candidates, dropping optional ones whose
    /// dependencies cannot be met
    fn resolve(&self, candidates: &mut Vec<Candidate>) -> Result<Vec<usize>> {
        loop {
            let result = {
                let nodes: Vec<DependencyNode<'_>> = candidates
                    .iter()
                    .map(|c| DependencyNode {
                        instance_id: &c.spec.instance_id,
                        name: c.plugin.metadata().name(),
                        provides: c.plugin.metadata().provides(),
                        dependencies: c.plugin.metadata().dependencies(),
                    })
                    .collect();
                resolve_load_order(&nodes, |dep| self.is_available(dep))
            };

            match result {
                Ok(order) => return Ok(order),
                Err(DependencyError::Missing { plugin, dependency }) => {
                    match candidates
                        .iter()
                        .position(|c| c.spec.instance_id == plugin && c.optional)
                    {
                        Some(position) => {
                            warn!(
                                "⚠️ Skipping optional plugin {}: missing dependency {}",
                                plugin, dependency
                            );
                            candidates.remove(position);
                        }
                        None => {
                            error!("❌ Plugin {} depends on missing {}", plugin, dependency);
                            return Err(DependencyError::Missing { plugin, dependency }.into());
                        }
                    }
                }
                Err(cycle) => {
                    error!("❌ {}", cycle);
                    return Err(cycle.into());
                }
            }
        }
    }

    fn load_candidate(&mut self, candidate: Candidate) -> Result<()> {
        let Candidate {
            spec,
            plugin,
            optional,
        } = candidate;
        let instance_id = spec.instance_id.clone();

        // An optional provider may have been skipped after sorting.
        if let Some(missing) = plugin
            .metadata()
            .dependencies()
            .iter()
            .find(|dep| !satisfies(&instance_id, plugin.metadata(), dep) && !self.is_available(dep))
        {
            return Err(DependencyError::Missing {
                plugin: instance_id,
                dependency: missing.clone(),
            }
            .into());
        }

        let mut info = PluginInfo::new(plugin, spec.plugin.clone(), instance_id.clone(), optional, self.next_load_order);
        self.next_load_order += 1;
        Self::advance_state(&self.services.event_bus, &mut info, PluginState::Loading)?;

        info!("🔧 Initializing plugin: {} ({})", instance_id, spec.plugin);
        let context = Arc::new(PluginContext::new(
            instance_id.clone(),
            self.services.clone(),
            &self.global_config,
            &spec.config,
        ));

        match guarded(|| info.plugin_mut().initialize(context)) {
            Ok(()) => {
                Self::advance_state(&self.services.event_bus, &mut info, PluginState::Loaded)?;
                self.plugins.push(info);
                self.specs.insert(instance_id, spec);
                self.rebuild_schedule();
                Ok(())
            }
            Err(e) => {
                info.record_error(e.to_string());
                Self::advance_state(&self.services.event_bus, &mut info, PluginState::Error)?;
                self.services.message_queue.unsubscribe_all(&instance_id);
                Err(PluginError::InitializationFailed {
                    plugin: instance_id,
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }

    /// Move a loaded plugin into the update set
    pub fn start(&mut self, instance_id: &str) -> Result<()> {
        let index = self
            .index_of(instance_id)
            .ok_or_else(|| PluginError::NotLoaded(instance_id.to_string()))?;
        Self::advance_state(&self.services.event_bus, &mut self.plugins[index], PluginState::Running)?;
        info!("▶️ Plugin running: {}", instance_id);
        Ok(())
    }

    /// Start every plugin currently `Loaded`, returning how many started
    pub fn start_all(&mut self) -> usize {
        let mut started = 0;
        for info in self.plugins.iter_mut() {
            if info.state() == PluginState::Loaded
                && Self::advance_state(&self.services.event_bus, info, PluginState::Running).is_ok()
            {
                started += 1;
            }
        }
        info!("▶️ {} plugin(s) running", started);
        started
    }

    /// One fixed physics step: `update(dt)` on every running plugin that
    /// requires physics, ascending `update_priority`, ties in load order.
    /// Failures are isolated per plugin.
    pub fn update_physics(&mut self, dt: f64) {
        for position in 0..self.schedule.len() {
            let index = self.schedule[position];
            let info = &mut self.plugins[index];
            if !info.state().is_active() || !info.metadata().requires_physics() {
                continue;
            }

            if let Err(e) = guarded(|| info.plugin_mut().update(dt)) {
                self.handle_failure(index, e);
            }
        }
    }

    /// Apply the runtime failure policy to `plugins[index]`
    fn handle_failure(&mut self, index: usize, err: PluginError) {
        let bus = self.services.event_bus.clone();
        let info = &mut self.plugins[index];
        let instance_id = info.instance_id().to_string();
        error!("❌ Plugin {} failed: {}", instance_id, err);

        if let Err(hook_err) = guarded(|| {
            info.plugin_mut().on_error(&err);
            Ok(())
        }) {
            error!("❌ Plugin {} on_error hook failed: {}", instance_id, hook_err);
        }
        info.record_error(err.to_string());

        let (topic, state, priority) = if info.optional() {
            warn!("⚠️ Optional plugin {} degraded, keeping it running", instance_id);
            (MessageTopic::KernelWarning, PluginState::Running, MessagePriority::High)
        } else {
            if let Err(e) = Self::advance_state(&bus, info, PluginState::Error) {
                error!("❌ {}", e);
            }
            (MessageTopic::KernelFailure, PluginState::Error, MessagePriority::Critical)
        };

        let alert = Message::new(
            KERNEL_SENDER,
            topic,
            MessageData::Alert {
                plugin: instance_id,
                state: state.to_string(),
                reason: err.to_string(),
            },
        )
        .with_priority(priority);
        self.services.message_queue.publish(alert);
    }

    /// Forward a configuration change to one plugin
    pub fn notify_config_changed(&mut self, instance_id: &str, config: &ConfigMap) -> Result<()> {
        let index = self
            .index_of(instance_id)
            .ok_or_else(|| PluginError::NotLoaded(instance_id.to_string()))?;
        let info = &mut self.plugins[index];
        guarded(|| {
            info.plugin_mut().on_config_changed(config);
            Ok(())
        })?;
        Ok(())
    }

    fn warn_dependents(&self, index: usize) {
        let target = &self.plugins[index];
        for other in &self.plugins {
            if other.instance_id() == target.instance_id()
                || !matches!(other.state(), PluginState::Loaded | PluginState::Running)
            {
                continue;
            }
            let depends = other
                .metadata()
                .dependencies()
                .iter()
                .any(|dep| satisfies(target.instance_id(), target.metadata(), dep));
            if depends {
                warn!(
                    "⚠️ Plugin {} depends on {}, which is being unloaded",
                    other.instance_id(),
                    target.instance_id()
                );
            }
        }
    }

    /// Shut a plugin down and remove it.
    ///
    /// If `shutdown` fails the record stays in `Error` so a later unload can
    /// retry.
    pub fn unload(&mut self, instance_id: &str) -> Result<()> {
        let index = self
            .index_of(instance_id)
            .ok_or_else(|| PluginError::NotLoaded(instance_id.to_string()))?;
        info!("🛑 Unloading plugin: {}", instance_id);
        self.warn_dependents(index);

        let bus = self.services.event_bus.clone();
        let info = &mut self.plugins[index];
        Self::advance_state(&bus, info, PluginState::Unloading)?;
        self.services.message_queue.unsubscribe_all(instance_id);

        if let Err(e) = guarded(|| info.plugin_mut().shutdown()) {
            error!("❌ Plugin shutdown failed for {}: {}", instance_id, e);
            info.record_error(e.to_string());
            Self::advance_state(&bus, info, PluginState::Error)?;
            return Err(e.into());
        }

        Self::advance_state(&bus, info, PluginState::Unloaded)?;
        self.plugins.remove(index);
        self.specs.remove(instance_id);
        self.rebuild_schedule();
        info!("✅ Plugin unloaded successfully: {}", instance_id);
        Ok(())
    }

    /// Permanently retire a running plugin. The record stays in
    /// `UnloadedAfterRun` and is never updated again.
    pub fn retire(&mut self, instance_id: &str) -> Result<()> {
        let index = self
            .index_of(instance_id)
            .ok_or_else(|| PluginError::NotLoaded(instance_id.to_string()))?;
        let bus = self.services.event_bus.clone();
        let info = &mut self.plugins[index];

        if !info.state().can_transition_to(PluginState::UnloadedAfterRun) {
            return Err(PluginError::InvalidTransition {
                plugin: instance_id.to_string(),
                from: info.state(),
                to: PluginState::UnloadedAfterRun,
            }
            .into());
        }

        self.services.message_queue.unsubscribe_all(instance_id);
        if let Err(e) = guarded(|| info.plugin_mut().shutdown()) {
            warn!("⚠️ Shutdown of retired plugin {} failed: {}", instance_id, e);
            info.record_error(e.to_string());
        }
        Self::advance_state(&bus, info, PluginState::UnloadedAfterRun)?;
        info!("🏁 Plugin retired: {}", instance_id);
        Ok(())
    }

    /// Unload and load again from the same spec, restarting it if it was running
    pub fn reload(&mut self, instance_id: &str) -> Result<()> {
        let spec = self
            .specs
            .get(instance_id)
            .cloned()
            .ok_or_else(|| PluginError::NotLoaded(instance_id.to_string()))?;
        let was_running = self.state(instance_id) == Some(PluginState::Running);

        info!("🔄 Reloading plugin: {}", instance_id);
        self.unload(instance_id)?;
        self.load(spec)?;
        if was_running {
            self.start(instance_id)?;
        }
        Ok(())
    }

    /// Unload everything in reverse load order
    pub fn shutdown_all(&mut self) {
        info!("🛑 Shutting down {} plugins", self.plugins.len());
        let ids: Vec<String> = self
            .plugins
            .iter()
            .rev()
            .map(|p| p.instance_id().to_string())
            .collect();

        for id in ids {
            let Some(index) = self.index_of(&id) else {
                continue;
            };
            if self.plugins[index].state() == PluginState::UnloadedAfterRun {
                self.plugins.remove(index);
                self.specs.remove(&id);
                continue;
            }
            if let Err(e) = self.unload(&id) {
                error!("❌ Failed to unload {}: {}", id, e);
            }
        }
        self.rebuild_schedule();
        info!("🧹 Plugin cleanup completed");
    }

    pub fn get_info(&self, instance_id: &str) -> Option<&PluginInfo> {
        self.plugins.iter().find(|p| p.instance_id() == instance_id)
    }

    pub fn state(&self, instance_id: &str) -> Option<PluginState> {
        self.get_info(instance_id).map(PluginInfo::state)
    }

    /// Snapshots of every record, in load order
    pub fn list_loaded(&self) -> Vec<PluginStatus> {
        self.plugins.iter().map(PluginInfo::status).collect()
    }

    /// Instance ids in physics update order
    pub fn plugins_by_priority(&self) -> Vec<String> {
        self.schedule
            .iter()
            .map(|&i| self.plugins[i].instance_id().to_string())
            .collect()
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    pub fn running_count(&self) -> usize {
        self.plugins.iter().filter(|p| p.state().is_active()).count()
    }
}

impl MessageSink for PluginLoader {
    fn deliver(&mut self, subscriber: &str, message: &Message) {
        let Some(index) = self.index_of(subscriber) else {
            debug!("📭 {} is not loaded, dropping {}", subscriber, message.topic);
            return;
        };
        let info = &mut self.plugins[index];
        if !info.state().is_active() {
            debug!("📭 {} is {}, dropping {}", subscriber, info.state(), message.topic);
            return;
        }

        if let Err(e) = guarded(|| info.plugin_mut().handle_message(message)) {
            self.handle_failure(index, e);
        }
    }
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader")
            .field("factories", &self.factory_names())
            .field("plugins", &self.plugins)
            .finish()
    }
}
