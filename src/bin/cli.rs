//! Spatial domain CLI - run scenes headless and inspect what observers see

use clap::{Parser, Subcommand};
use nalgebra::{Point3, Quaternion, UnitQuaternion, Vector3};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use spatial_domain::config::DomainConfig;
use spatial_domain::domain::{
    BBox, EntityId, EntityRef, LocatedEntity, Notification, PhysicalDomain, PropertyValue,
};

#[derive(Parser)]
#[command(name = "spatial-domain")]
#[command(about = "Headless spatial simulation and visibility", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a scene and print every notification as a JSON line
    Simulate {
        /// Path to the scene JSON file
        scene: PathBuf,
        /// Domain configuration (TOML). Defaults are used when omitted.
        #[arg(short, long, env = "SPATIAL_DOMAIN_CONFIG")]
        config: Option<PathBuf>,
        /// Number of ticks to run
        #[arg(short, long, default_value = "60")]
        ticks: u32,
        /// Seconds simulated per tick
        #[arg(long, default_value = "0.1")]
        tick_size: f64,
    },
    /// Validate a configuration file and print the effective settings
    CheckConfig {
        /// Path to the configuration file
        path: PathBuf,
    },
}

/// One entity as written in a scene file.
#[derive(Debug, Deserialize)]
struct SceneEntity {
    id: EntityId,
    #[serde(default)]
    seq: i64,
    pos: Option<[f32; 3]>,
    /// Quaternion as `[x, y, z, w]`
    orientation: Option<[f32; 4]>,
    velocity: Option<[f32; 3]>,
    /// `[low, high]`
    bbox: Option<[[f32; 3]; 2]>,
    #[serde(default)]
    perceptive: bool,
    #[serde(default)]
    properties: BTreeMap<String, PropertyValue>,
}

/// A location change applied at the start of a tick.
#[derive(Debug, Deserialize)]
struct SceneEvent {
    tick: u32,
    entity: EntityId,
    pos: Option<[f32; 3]>,
    velocity: Option<[f32; 3]>,
    #[serde(default)]
    remove: bool,
}

#[derive(Debug, Deserialize)]
struct Scene {
    container: SceneEntity,
    #[serde(default)]
    entities: Vec<SceneEntity>,
    #[serde(default)]
    events: Vec<SceneEvent>,
}

impl SceneEntity {
    fn into_entity(self) -> EntityRef {
        let mut entity = LocatedEntity::new(self.id);
        entity.seq = self.seq;
        entity.perceptive = self.perceptive;
        entity.location.pos = self.pos.map(Point3::from);
        entity.location.orientation = self
            .orientation
            .map(|[x, y, z, w]| UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)));
        entity.location.velocity = self.velocity.map(Vector3::from);
        if let Some([low, high]) = self.bbox {
            entity.set_bbox(BBox::new(Point3::from(low), Point3::from(high)));
        }
        for (name, value) in self.properties {
            entity.set_property(&name, value);
        }
        entity.into_ref()
    }
}

fn main() {
    spatial_domain::init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            scene,
            config,
            ticks,
            tick_size,
        } => simulate(&scene, config.as_deref(), ticks, tick_size),
        Commands::CheckConfig { path } => check_config(&path),
    }
}

// =============================================================================
// Simulate Command
// =============================================================================

fn load_config(path: Option<&Path>) -> DomainConfig {
    let Some(path) = path else {
        return DomainConfig::default();
    };
    match DomainConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn load_scene(path: &Path) -> Scene {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: Failed to read '{}': {}", path.display(), e);
            std::process::exit(1);
        }
    };
    match serde_json::from_str(&content) {
        Ok(scene) => scene,
        Err(e) => {
            eprintln!("Error: Invalid scene '{}': {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn print_notifications(tick: u32, notifications: Vec<Notification>) {
    for notification in notifications {
        match serde_json::to_string(&notification) {
            Ok(json) => println!("{{\"tick\":{},\"notification\":{}}}", tick, json),
            Err(e) => eprintln!("Warning: Failed to encode notification: {}", e),
        }
    }
}

fn simulate(scene_path: &Path, config_path: Option<&Path>, ticks: u32, tick_size: f64) {
    if !(tick_size > 0.0) {
        eprintln!("Error: --tick-size must be positive");
        std::process::exit(1);
    }
    let config = load_config(config_path);
    let scene = load_scene(scene_path);

    let container = scene.container.into_entity();
    let mut domain = PhysicalDomain::new(&container, config);

    // The domain only holds weak references; the scene keeps entities alive
    let mut entities: BTreeMap<EntityId, EntityRef> = BTreeMap::new();
    for child in scene.entities {
        if child.id == domain.domain_id() || entities.contains_key(&child.id) {
            eprintln!("Error: Duplicate entity id {}", child.id);
            std::process::exit(1);
        }
        let entity = child.into_entity();
        domain.add_entity(&entity);
        let id = entity.borrow().id;
        entities.insert(id, entity);
    }
    print_notifications(0, domain.drain_notifications());

    let mut events = scene.events;
    events.sort_by_key(|e| e.tick);
    let mut events = events.into_iter().peekable();

    for tick in 1..=ticks {
        while let Some(event) = events.next_if(|e| e.tick <= tick) {
            if !entities.contains_key(&event.entity) {
                eprintln!("Warning: Event for unknown entity {}, skipping", event.entity);
                continue;
            }
            if event.remove {
                domain.remove_entity(event.entity);
                entities.remove(&event.entity);
                continue;
            }
            domain.apply_transform(
                event.entity,
                None,
                event.pos.map(Point3::from),
                event.velocity.map(Vector3::from),
            );
        }

        domain.tick(tick_size);
        print_notifications(tick, domain.drain_notifications());
    }

    eprintln!(
        "Simulated {} ticks ({:.2}s) with {} entities",
        ticks,
        ticks as f64 * tick_size,
        entities.len()
    );
}

// =============================================================================
// Check Config Command
// =============================================================================

fn check_config(path: &Path) {
    let config = load_config(Some(path));
    println!("Config OK: {}", path.display());
    println!(
        "  physics: gravity {}, timestep {}s, max {} sub-steps",
        config.physics.gravity, config.physics.fixed_timestep, config.physics.max_substeps
    );
    println!(
        "  visibility: every {}s, scaling factor {}",
        config.visibility.check_interval, config.visibility.scaling_factor
    );
    println!(
        "  water level {}, world height {}",
        config.water_level, config.world_height
    );
    if let Some(dir) = &config.mesh_asset_dir {
        println!("  mesh assets: {}", dir.display());
    }
}
