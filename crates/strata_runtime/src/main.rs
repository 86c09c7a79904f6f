//! Strata Engine Runtime
//!
//! Minimal binary that boots a world, registers a small simulation and
//! drives the tick loop.

mod settings;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use strata_core::ecs::{IncomingCommand, Match, Phase, World};

use settings::Settings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Position {
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Velocity {
    dx: f64,
    dy: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Health {
    current: i64,
    max: i64,
}

/// External request to damage every entity that has health.
#[derive(Debug, Clone, Deserialize)]
struct ApplyDamage {
    amount: i64,
}

/// Announced when a damage pass drops an entity to zero health.
#[derive(Debug, Clone)]
struct EntityDied {
    entity: u64,
}

fn build_world(settings: &Settings) -> Result<World> {
    let world = World::new();

    world.register_component::<Position>("position")?;
    world.register_component::<Velocity>("velocity")?;
    world.register_component::<Health>("health")?;

    world.register_command::<ApplyDamage>("apply_damage")?;
    world.register_event::<EntityDied>("entity_died")?;

    world.register_system(
        Phase::Update,
        "movement",
        |scope| {
            scope.reads::<Velocity>()?;
            scope.writes::<Position>()
        },
        |world| {
            let search = world.search::<(Position, Velocity)>(Match::Contains)?;
            for entity in search.iter(world) {
                let pos = entity.get::<Position>()?;
                let vel = entity.get::<Velocity>()?;
                entity.set(Position {
                    x: pos.x + vel.dx,
                    y: pos.y + vel.dy,
                })?;
            }
            Ok(())
        },
    )?;

    world.register_system(
        Phase::Update,
        "damage",
        |scope| {
            scope.receives_command::<ApplyDamage>()?;
            scope.writes::<Health>()?;
            scope.emits_event::<EntityDied>()
        },
        |world| {
            let total: i64 = world
                .commands()
                .read::<ApplyDamage>()?
                .iter()
                .map(|(cmd, _sender)| cmd.amount)
                .sum();
            if total == 0 {
                return Ok(());
            }
            let search = world.search::<(Health,)>(Match::Contains)?;
            for entity in search.iter(world) {
                let health = entity.get::<Health>()?;
                let current = (health.current - total).max(0);
                entity.set(Health { current, ..health })?;
                if current == 0 {
                    world.events().emit(EntityDied { entity: entity.id() })?;
                }
            }
            Ok(())
        },
    )?;

    world.register_system(
        Phase::PostUpdate,
        "reaper",
        |scope| scope.reads_event::<EntityDied>(),
        |world| {
            for died in world.events().read::<EntityDied>()? {
                tracing::info!(entity = died.entity, "entity died, despawning");
                world.destroy_entity(died.entity);
            }
            Ok(())
        },
    )?;

    for i in 0..settings.simulation.spawn_count {
        let angle = i as f64 * 0.1;
        world.create_entity((
            Position { x: 0.0, y: 0.0 },
            Velocity {
                dx: angle.cos(),
                dy: angle.sin(),
            },
            Health {
                current: 100,
                max: 100,
            },
        ))?;
    }

    Ok(world)
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    tracing::info!("Strata Engine v{}", strata_core::VERSION);

    let settings_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "strata.json".to_string());
    let settings = Settings::load(Path::new(&settings_path))?;
    tracing::info!(?settings, "loaded settings");

    let world = build_world(&settings)?;
    tracing::info!(
        entities = world.entity_count(),
        archetypes = world.archetype_count(),
        "world ready"
    );

    let mut counters = strata_metrics::Counter::new();
    for tick in 0..settings.simulation.ticks {
        // Halfway through, stage an encoded damage command the way an
        // external frontend would.
        if tick == settings.simulation.ticks / 2 {
            world.inject_commands(&[IncomingCommand {
                name: "apply_damage".to_string(),
                payload: serde_json::to_vec(&serde_json::json!({ "amount": 100 }))?,
                sender: "console".to_string(),
            }])?;
            counters.increment("commands_injected", 1);
        }
        world.tick()?;
        counters.increment("ticks", 1);
    }

    tracing::info!(
        ticks = counters.get("ticks"),
        entities = world.entity_count(),
        avg_tick_ms = world.average_tick().as_secs_f64() * 1000.0,
        "simulation finished"
    );
    for (name, spent) in world.system_timings() {
        tracing::info!(system = %name, total_ms = spent.as_secs_f64() * 1000.0, "system time");
    }

    if settings.snapshot.write_on_exit {
        let bytes = world.snapshot()?;
        std::fs::write(&settings.snapshot.path, &bytes)?;
        tracing::info!(
            path = %settings.snapshot.path,
            bytes = bytes.len(),
            "wrote snapshot"
        );
    }

    Ok(())
}
