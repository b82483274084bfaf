//! Landing gear plugin driven by a key binding, run for two simulated seconds

use airborne_kernel::*;
use std::sync::Arc;
use tracing::info;

const KEY_G: u32 = 71;

#[derive(Debug, Clone)]
pub struct GearMoved {
    pub down: bool,
    pub timestamp: u64,
}

impl Event for GearMoved {
    fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

pub struct LandingGear {
    metadata: PluginMetadata,
    context: Option<Arc<PluginContext>>,
    down: bool,
    /// 0.0 = retracted, 1.0 = extended
    extension: f64,
    transit_s: f64,
}

impl LandingGear {
    pub fn new() -> Self {
        Self {
            metadata: PluginMetadata::builder("landing_gear", "1.0.0", "Airborne Team")
                .plugin_type(PluginType::AircraftSystem)
                .description("Hydraulic tricycle gear")
                .build()
                .expect("static metadata is valid"),
            context: None,
            down: true,
            extension: 1.0,
            transit_s: 6.0,
        }
    }
}

impl Plugin for LandingGear {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn initialize(&mut self, context: Arc<PluginContext>) -> Result<(), PluginError> {
        if let Some(transit) = context
            .config_as::<f64>("transit_s")
            .map_err(|e| PluginError::RuntimeError(e.to_string()))?
        {
            self.transit_s = transit;
        }
        context.subscribe_messages(MessageTopic::ControlInput);
        self.context = Some(context);
        Ok(())
    }

    fn update(&mut self, dt: f64) -> Result<(), PluginError> {
        let target = if self.down { 1.0 } else { 0.0 };
        let step = dt / self.transit_s;
        self.extension = if self.extension < target {
            (self.extension + step).min(target)
        } else {
            (self.extension - step).max(target)
        };
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), PluginError> {
        info!("🛬 Gear {:.0}% extended at shutdown", self.extension * 100.0);
        Ok(())
    }

    fn handle_message(&mut self, message: &Message) -> Result<(), PluginError> {
        let MessageData::ControlInput { control, .. } = &message.data else {
            return Ok(());
        };
        if control != "gear_toggle" {
            return Ok(());
        }

        self.down = !self.down;
        if let Some(context) = &self.context {
            context
                .event_bus()
                .publish(&GearMoved {
                    down: self.down,
                    timestamp: utils::current_timestamp(),
                })
                .map_err(|e| PluginError::RuntimeError(e.to_string()))?;
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let mut gear_config = ConfigMap::new();
    gear_config.insert("transit_s".into(), serde_json::json!(1.5));

    let mut game_loop = SimulationBuilder::new()
        .register_fn("landing_gear", || Box::new(LandingGear::new()))
        .plugin(PluginSpec::new("landing_gear", "gear").with_config(gear_config))
        .build()?;

    let services = game_loop.services().clone();
    services.event_bus.subscribe(
        |event: &GearMoved| {
            info!("🛞 Gear selected {}", if event.down { "DOWN" } else { "UP" });
            Ok(())
        },
        EventPriority::Normal,
    );

    let bindings = ActionBindingRegistry::from_bindings([ActionBinding::new("gear_toggle").with_input(
        InputBinding::Key {
            key: KEY_G,
            modifiers: KeyModifiers::NONE,
        },
    )])?;
    let mut input = InputHandlerManager::new();
    input.register(Box::new(ActionInputHandler::new(
        "cockpit",
        bindings,
        services.message_queue.clone(),
    )))?;

    input.process_input(&InputEvent::keyboard(KEY_G, KeyModifiers::NONE));
    // Fixed 60 Hz frames so the run covers two simulated seconds regardless of wall time
    for _ in 0..120 {
        game_loop.advance(1.0 / 60.0);
    }
    info!("⏱️ {} frames, {:.2}s simulated", game_loop.frame_count(), game_loop.simulated_time());

    game_loop.shutdown();
    Ok(())
}
