//! Main application logic and lifecycle management.
//!
//! `Application` turns a validated configuration into a running kernel,
//! drives the game loop on a blocking thread and tears everything down when a
//! termination signal arrives or the frame limit is reached.

use crate::cli::CliArgs;
use crate::config::AppConfig;
use crate::diagnostics::DiagnosticsFactory;
use crate::logging::display_banner;
use crate::signals::{wait_for_shutdown_signal, wait_for_shutdown_signal_silent};
use airborne_kernel::{ActionInputHandler, GameLoop, InputHandlerManager, Services, SimulationBuilder};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Component name under which the cockpit input chain is shared with plugins
pub const INPUT_COMPONENT: &str = "input.manager";

/// Name of the input handler built from `[[bindings]]`
pub const COCKPIT_HANDLER: &str = "cockpit";

pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// Frame limit from the command line
    frames: Option<u64>,
}

impl Application {
    /// Loads configuration, applies command-line overrides and validates the
    /// result.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if let Some(target_fps) = args.target_fps {
            config.simulation.target_fps = target_fps;
        }
        if let Some(physics_hz) = args.physics_hz {
            config.simulation.physics_hz = physics_hz;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();

        Ok(Self::from_config(config, args.frames))
    }

    /// Wraps an already validated configuration.
    pub fn from_config(config: AppConfig, frames: Option<u64>) -> Self {
        Self { config, frames }
    }

    /// Builds the kernel: shared services, the cockpit input chain, built-in
    /// factories and every configured plugin in dependency order.
    pub fn build_kernel(&self) -> Result<GameLoop, Box<dyn std::error::Error>> {
        let services = Services::new();

        let bindings = self.config.binding_registry()?;
        let mut input = InputHandlerManager::new();
        if !bindings.is_empty() {
            info!("🎮 {} action binding(s) configured", bindings.len());
            let handler = ActionInputHandler::new(COCKPIT_HANDLER, bindings, services.message_queue.clone())
                .with_priority(self.config.input.handler_priority(COCKPIT_HANDLER));
            input.register(Box::new(handler))?;
        }
        services.registry.provide(INPUT_COMPONENT, Mutex::new(input))?;

        let game_loop = SimulationBuilder::new()
            .services(services)
            .global_config(&self.config.global)
            .settings(self.config.to_loop_settings())
            .factory(DiagnosticsFactory)
            .plugins(self.config.plugins.iter().cloned())
            .build()?;
        Ok(game_loop)
    }

    /// Runs the simulation until a shutdown signal or the frame limit, then
    /// unloads every plugin.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Airborne");
        self.log_configuration_summary();

        let mut game_loop = self.build_kernel()?;
        info!(
            "🔌 {} plugin(s) running: {}",
            game_loop.loader().running_count(),
            game_loop.loader().plugins_by_priority().join(", ")
        );

        let handle = game_loop.handle();
        let frames = self.frames;
        let mut loop_task = tokio::task::spawn_blocking(move || {
            let frames_run = game_loop.run_for(frames);
            (game_loop, frames_run)
        });

        match frames {
            Some(limit) => info!("✅ Simulation running for {} frame(s)", limit),
            None => info!("✅ Simulation running"),
        }
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        let finished = tokio::select! {
            result = &mut loop_task => Some(result),
            signal = wait_for_shutdown_signal() => {
                if let Err(e) = signal {
                    error!("❌ Signal handling failed: {}", e);
                }
                None
            }
        };

        let (mut game_loop, frames_run) = match finished {
            Some(result) => result?,
            None => {
                handle.stop();

                // A second signal skips the graceful path
                tokio::spawn(async move {
                    if let Err(e) = wait_for_shutdown_signal_silent().await {
                        error!("Failed to set up merciless shutdown signal handler: {e}");
                        return;
                    }
                    warn!("Shutdown handler received again! I'll make this quick.");
                    std::process::exit(1);
                });

                loop_task.await?
            }
        };

        info!("🧹 Unloading plugins...");
        game_loop.shutdown();

        info!("📊 Final Statistics:");
        info!("  - Frames: {}", frames_run);
        info!("  - Simulated time: {:.2}s", game_loop.simulated_time());
        info!("  - Last measured rate: {:.1} fps", game_loop.fps());
        info!("✅ Airborne shutdown complete");

        Ok(())
    }

    fn log_configuration_summary(&self) {
        let simulation = &self.config.simulation;
        info!("📋 Configuration Summary:");
        if simulation.target_fps > 0.0 {
            info!("  🎞️ Target frame rate: {} fps", simulation.target_fps);
        } else {
            info!("  🎞️ Target frame rate: uncapped");
        }
        info!("  ⏱️ Physics rate: {} Hz", simulation.physics_hz);
        info!("  📬 Message budget: {} per frame", simulation.message_budget);
        info!("  🔌 Plugins configured: {}", self.config.plugins.len());
        info!("  🎮 Action bindings: {}", self.config.bindings.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airborne_kernel::{
        ActionBinding, InputBinding, InputEvent, MessageData, MessageTopic, PluginSpec, PluginState,
    };
    use std::sync::Arc;

    fn gear_binding() -> ActionBinding {
        ActionBinding::new("gear_toggle").with_input(InputBinding::Network {
            command: "gear_toggle".into(),
        })
    }

    #[test]
    fn test_build_kernel_from_default_config() {
        let app = Application::from_config(AppConfig::default(), Some(1));
        let mut game_loop = app.build_kernel().unwrap();

        assert_eq!(game_loop.loader().state("diagnostics"), Some(PluginState::Running));
        assert!(game_loop.services().registry.is_registered(INPUT_COMPONENT));

        game_loop.shutdown();
        assert_eq!(game_loop.loader().plugin_count(), 0);
    }

    #[test]
    fn test_shared_input_chain_publishes_actions() {
        let mut config = AppConfig::default();
        config.bindings.push(gear_binding());
        let app = Application::from_config(config, None);
        let game_loop = app.build_kernel().unwrap();
        let services = game_loop.services();

        let input = services
            .registry
            .get::<Mutex<InputHandlerManager>>(INPUT_COMPONENT)
            .unwrap();
        assert_eq!(input.lock().unwrap().handler_names(), vec![COCKPIT_HANDLER]);
        assert_eq!(
            input.lock().unwrap().handler_info()[0].priority,
            crate::config::UNCONFIGURED_HANDLER_PRIORITY
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        services
            .message_queue
            .subscribe(MessageTopic::ControlInput, "test", move |m| {
                sink.lock().unwrap().push(m.data.clone());
                Ok(())
            });

        let event = InputEvent::network("gear_toggle", Default::default());
        assert!(input.lock().unwrap().process_input(&event));
        assert_eq!(services.message_queue.process(10), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![MessageData::ControlInput {
                control: "gear_toggle".into(),
                value: 1.0
            }]
        );
    }

    #[test]
    fn test_cockpit_priority_from_config() {
        let mut config = AppConfig::default();
        config.bindings.push(gear_binding());
        config.input.priorities.insert(COCKPIT_HANDLER.into(), 150);
        let app = Application::from_config(config, None);
        let game_loop = app.build_kernel().unwrap();

        let input = game_loop
            .services()
            .registry
            .get::<Mutex<InputHandlerManager>>(INPUT_COMPONENT)
            .unwrap();
        assert_eq!(input.lock().unwrap().handler_info()[0].priority, 150);
    }

    #[test]
    fn test_unknown_plugin_fails_build() {
        let mut config = AppConfig::default();
        config.plugins.push(PluginSpec::new("weather_radar", "wx"));
        let app = Application::from_config(config, None);

        let err = app.build_kernel().unwrap_err();
        assert!(err.to_string().contains("weather_radar"));
    }

    #[tokio::test]
    async fn test_run_with_frame_limit() {
        let mut config = AppConfig::default();
        config.simulation.target_fps = 0.0;
        let app = Application::from_config(config, Some(30));

        app.run().await.unwrap();
    }
}
