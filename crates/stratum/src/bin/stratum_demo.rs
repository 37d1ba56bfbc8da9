//! # STRATUM Demo
//!
//! Headless run of a small state tree: a menu that times out into a game
//! whose arena scene flies a ship through the physics system.
//!
//! ```bash
//! # Built-in configuration
//! ./stratum_demo
//!
//! # Custom configuration and tick count
//! ./stratum_demo my_engine.toml 120
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use stratum::core::{
    ActionRequest, CoreResult, Entity, Extension, ExtensionContext, SystemId, Value,
};
use stratum::states::{StateBehavior, StateContext, StateNode, StateRegistry, StateResult};
use stratum::{EngineConfig, EngineEvent, EngineResult, Heartbeat};

const DEMO_CONFIG: &str = r#"
initial = "menu"

[heartbeat]
tick_interval_ms = 16

[[state]]
path = "menu"
kind = "menu"

[[state]]
path = "game"
kind = "arena"
scene = "arena"
initial = "play"

[[state.entity]]
name = "ship"
attributes = { fuel = 12 }

[[state]]
path = "game/play"
kind = "round"
"#;

const DEFAULT_TICKS: u64 = 24;

/// Moves along x, one fuel unit per thrust.
struct Engine {
    position: [f32; 3],
    velocity: [f32; 3],
    fuel: i64,
}

impl Extension for Engine {
    fn name(&self) -> &str {
        "engine"
    }

    fn system(&self) -> SystemId {
        SystemId::new("physics")
    }

    fn action_keys(&self) -> Vec<String> {
        vec!["thrust".into()]
    }

    fn publish(&mut self, ctx: &ExtensionContext<'_>) -> CoreResult<()> {
        ctx.publicize("position", self.position)?;
        ctx.publicize("fuel", self.fuel)
    }

    fn handle_action(&mut self, request: &ActionRequest, _ctx: &ExtensionContext<'_>) -> CoreResult<()> {
        if self.fuel > 0 {
            let dv = request.param(0).and_then(Value::as_float).unwrap_or(1.0);
            self.velocity[0] += dv as f32;
            self.fuel -= 1;
        }
        Ok(())
    }

    fn update(&mut self, _ctx: &ExtensionContext<'_>) -> CoreResult<()> {
        for (p, v) in self.position.iter_mut().zip(self.velocity) {
            *p += v;
        }
        Ok(())
    }
}

/// Requests `target` after spending `ticks` ticks in the state.
struct Timer {
    ticks: u32,
    remaining: u32,
    target: &'static str,
}

impl Timer {
    fn node(name: &str, ticks: u32, target: &'static str) -> StateNode {
        StateNode::with_behavior(
            name,
            Box::new(Self {
                ticks,
                remaining: ticks,
                target,
            }),
        )
    }
}

impl StateBehavior for Timer {
    fn build_up(&mut self, _ctx: &StateContext<'_>) {
        self.remaining = self.ticks;
    }

    fn update(&mut self, ctx: &StateContext<'_>) -> StateResult<()> {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            ctx.request_transition(self.target);
        }
        Ok(())
    }
}

/// Fits every ship with an engine and keeps the throttle open.
struct Arena;

impl Arena {
    fn fit(entity: &Arc<Entity>) -> CoreResult<()> {
        if entity.has_extension("engine") {
            return Ok(());
        }
        let fuel = entity
            .get_attribute("fuel")
            .and_then(|v| v.as_int())
            .unwrap_or(0);
        entity.add_extension(Box::new(Engine {
            position: [0.0; 3],
            velocity: [0.0; 3],
            fuel,
        }))?;
        Ok(())
    }
}

impl StateBehavior for Arena {
    fn build_up(&mut self, ctx: &StateContext<'_>) {
        let Some(scene) = ctx.scene() else {
            return;
        };
        for entity in scene.entities() {
            if let Err(e) = Self::fit(&entity) {
                tracing::warn!(entity = entity.name(), error = %e, "could not fit engine");
            }
        }
    }

    fn update(&mut self, ctx: &StateContext<'_>) -> StateResult<()> {
        if let Some(scene) = ctx.scene() {
            for entity in scene.entities() {
                entity.request_action(ctx.path(), "thrust", vec![Value::Float(0.5)])?;
            }
        }
        Ok(())
    }
}

fn registry() -> StateResult<StateRegistry> {
    let mut registry = StateRegistry::new();
    registry.register("menu", |name: &str| Timer::node(name, 3, "game"))?;
    registry.register("round", |name: &str| Timer::node(name, 8, "menu"))?;
    registry.register("arena", |name: &str| StateNode::with_behavior(name, Box::new(Arena)))?;
    Ok(registry)
}

fn run() -> EngineResult<()> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_toml_str(DEMO_CONFIG)?,
    };
    let ticks = args
        .next()
        .and_then(|t| t.parse().ok())
        .unwrap_or(DEFAULT_TICKS);

    println!("═══════════════════════════════════════════════════════════════════");
    println!("                       STRATUM DEMO v0.1.0");
    println!("═══════════════════════════════════════════════════════════════════");
    println!("States:  {}", config.states.len());
    println!("Ticks:   {ticks}");
    println!();

    let mut heartbeat = Heartbeat::from_config(&config, &registry()?)?;
    let events = heartbeat.events();
    let completed = heartbeat.run_for(ticks)?;

    for event in events.drain() {
        match event {
            EngineEvent::Machine(stratum::states::MachineEvent::Transitioned { from, to }) => {
                println!("  transition  {from} -> {to}");
            }
            EngineEvent::TickFailed { tick, error, .. } => {
                println!("  tick {tick:>4} failed: {error}");
            }
            _ => {}
        }
    }

    let arena = heartbeat.machine().with_tree(|tree| {
        tree.resolve("game")
            .ok()
            .and_then(|id| tree.get(id))
            .and_then(|node| node.scene_ref().cloned())
    });
    if let Some(ship) = arena.and_then(|scene| scene.entity("ship")) {
        println!();
        println!("Ship position: {:?}", ship.get_attribute("position"));
        println!("Ship fuel:     {:?}", ship.get_attribute("fuel"));
    }

    println!();
    println!("Completed {completed} of {ticks} ticks, ending in {}", heartbeat.machine().active_path());
    println!("{}", heartbeat.stats());

    heartbeat.shutdown(true)?;
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("stratum_demo: {e}");
            ExitCode::FAILURE
        }
    }
}
