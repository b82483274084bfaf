//! Built-in plugin that reports kernel alerts and simulation progress.

use airborne_kernel::{
    Message, MessageData, MessageTopic, Plugin, PluginContext, PluginError, PluginFactory, PluginMetadata,
    PluginType, MAX_UPDATE_PRIORITY,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const PLUGIN_NAME: &str = "diagnostics";

const DEFAULT_REPORT_INTERVAL_S: f64 = 10.0;

pub struct DiagnosticsPlugin {
    metadata: PluginMetadata,
    report_interval_s: f64,
    since_report_s: f64,
    simulated_s: f64,
    warnings: u64,
    failures: u64,
}

impl DiagnosticsPlugin {
    pub fn new() -> Result<Self, PluginError> {
        let metadata = PluginMetadata::builder(PLUGIN_NAME, env!("CARGO_PKG_VERSION"), "Airborne Team")
            .plugin_type(PluginType::Core)
            .description("Logs kernel warnings and failures")
            .optional(true)
            .update_priority(MAX_UPDATE_PRIORITY)
            .build()
            .map_err(|e| PluginError::RuntimeError(e.to_string()))?;

        Ok(Self {
            metadata,
            report_interval_s: DEFAULT_REPORT_INTERVAL_S,
            since_report_s: 0.0,
            simulated_s: 0.0,
            warnings: 0,
            failures: 0,
        })
    }

    pub fn warnings(&self) -> u64 {
        self.warnings
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }
}

/// Registers [`DiagnosticsPlugin`] under [`PLUGIN_NAME`]
pub struct DiagnosticsFactory;

impl PluginFactory for DiagnosticsFactory {
    fn create(&self) -> Result<Box<dyn Plugin>, PluginError> {
        Ok(Box::new(DiagnosticsPlugin::new()?))
    }

    fn plugin_name(&self) -> &str {
        PLUGIN_NAME
    }
}

impl Plugin for DiagnosticsPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn initialize(&mut self, context: Arc<PluginContext>) -> Result<(), PluginError> {
        let interval = context
            .config_as::<f64>("report_interval_s")
            .map_err(|e| PluginError::RuntimeError(e.to_string()))?
            .unwrap_or(DEFAULT_REPORT_INTERVAL_S);
        if !(interval.is_finite() && interval > 0.0) {
            return Err(PluginError::RuntimeError(format!(
                "report_interval_s must be positive, got {interval}"
            )));
        }
        self.report_interval_s = interval;

        context.subscribe_messages(MessageTopic::KernelWarning);
        context.subscribe_messages(MessageTopic::KernelFailure);
        info!("🩺 Diagnostics reporting every {:.1}s", interval);
        Ok(())
    }

    fn update(&mut self, dt: f64) -> Result<(), PluginError> {
        self.simulated_s += dt;
        self.since_report_s += dt;
        if self.since_report_s >= self.report_interval_s {
            self.since_report_s -= self.report_interval_s;
            info!(
                "📊 {:.1}s simulated | {} warning(s) | {} failure(s)",
                self.simulated_s, self.warnings, self.failures
            );
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), PluginError> {
        info!(
            "📊 Final: {:.1}s simulated, {} warning(s), {} failure(s)",
            self.simulated_s, self.warnings, self.failures
        );
        Ok(())
    }

    fn handle_message(&mut self, message: &Message) -> Result<(), PluginError> {
        let MessageData::Alert { plugin, state, reason } = &message.data else {
            return Ok(());
        };
        match message.topic {
            MessageTopic::KernelFailure => {
                self.failures += 1;
                error!("🚨 Plugin {} is {}: {}", plugin, state, reason);
            }
            _ => {
                self.warnings += 1;
                warn!("⚠️ Plugin {} degraded: {}", plugin, reason);
            }
        }
        Ok(())
    }
}
