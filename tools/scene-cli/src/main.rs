//! nether-scene - glTF scene inspection tool
//!
//! Loads a glTF/GLB asset through the nether-scene runtime on a host-memory
//! device, then prints its node tree, simulates frames or only validates it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glam::Vec3;

use nether_scene::config::{self, SceneConfig};
use nether_scene::vertex::describe;
use nether_scene::{
    AssetRegistry, DrawCommand, HostDevice, HostRenderFactory, NodeId, NodeRole, Scene,
};

#[derive(Parser)]
#[command(name = "nether-scene")]
#[command(about = "Inspect, simulate and validate glTF scenes")]
#[command(version)]
struct Cli {
    /// Path to scene.toml
    #[arg(short, long, global = true, default_value = "scene.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the node tree, meshes and materials of a scene
    Inspect {
        /// Input glTF/GLB file
        input: PathBuf,
    },

    /// Run animation and transform updates for a number of frames
    Simulate {
        /// Input glTF/GLB file
        input: PathBuf,

        /// Number of frames to run
        #[arg(short, long, default_value_t = 60)]
        frames: u32,

        /// Seconds per frame
        #[arg(long, default_value_t = 1.0 / 60.0)]
        dt: f32,

        /// Layer mask to draw (default: from config)
        #[arg(short, long)]
        layers: Option<u32>,
    },

    /// Import a scene and report whether it loads
    Validate {
        /// Input glTF/GLB file
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load(&cli.config)?;
    for warning in config::validate(&config) {
        tracing::warn!("{}: {}", cli.config.display(), warning);
    }

    let factory = HostRenderFactory::new(HostDevice::new(), config.runtime.buffer_count);
    let mut registry = AssetRegistry::new();

    match cli.command {
        Commands::Inspect { input } => {
            let scene = load(&input, &mut registry, &factory, &config)?;
            print_scene(&scene, &registry);
        }

        Commands::Simulate {
            input,
            frames,
            dt,
            layers,
        } => {
            let mut scene = load(&input, &mut registry, &factory, &config)?;
            let layers = layers.unwrap_or(config.runtime.default_layers);
            let buffer_count = scene.buffer_count() as usize;

            let mut commands: Vec<DrawCommand> = Vec::new();
            for frame in 0..frames {
                let slot = frame as usize % buffer_count;
                scene.update(dt, slot, &[]);
                commands.clear();
                let recorded = scene.draw(slot, layers, &mut commands, &[]);
                tracing::debug!("Frame {} (slot {}): {} draw commands", frame, slot, recorded);
            }

            println!("Simulated {} frames of {:.4}s", frames, dt);
            println!("Draw commands per frame: {}", commands.len());
            for object in scene.objects() {
                for id in scene.graph.descendants(object.root()) {
                    let Some(node) = scene.graph.get(id) else {
                        continue;
                    };
                    if node.animations().is_empty() {
                        continue;
                    }
                    let (_, _, translation) = node.world_matrix().to_scale_rotation_translation();
                    println!("  {} -> {}", node.name, format_vec3(translation));
                }
            }
            println!(
                "Device memory in use: {} bytes",
                factory.host_device().allocated()
            );
        }

        Commands::Validate { input } => {
            let scene = load(&input, &mut registry, &factory, &config)?;
            let stats = registry.stats();
            println!(
                "{}: OK ({} objects, {} nodes, {} meshes, {} materials, {} animations)",
                input.display(),
                scene.objects().len(),
                scene.graph.len(),
                stats.meshes,
                stats.materials,
                stats.animations
            );
        }
    }

    Ok(())
}

fn load(
    input: &Path,
    registry: &mut AssetRegistry,
    factory: &HostRenderFactory,
    config: &SceneConfig,
) -> Result<Scene> {
    tracing::info!("Loading {:?}", input);
    nether_scene::load(input, registry, factory, &config.import)
        .with_context(|| format!("Failed to import {}", input.display()))
}

fn print_scene(scene: &Scene, registry: &AssetRegistry) {
    println!("Scene: {}", scene.name);
    for object in scene.objects() {
        println!("Object: {}", object.name);
        print_node(scene, object.root(), 1);
    }

    println!();
    println!("Meshes:");
    for mesh in registry.meshes() {
        println!("  {} ({} submeshes)", mesh.name, mesh.submeshes().len());
        for submesh in mesh.submeshes() {
            println!(
                "    {}: {} vertices, {} indices, {:?}, stride {} [{}], material {}",
                submesh.name,
                submesh.number_vertices,
                submesh.number_indices,
                submesh.topology,
                submesh.layout.stride(),
                describe(submesh.vertex_buffer_type()),
                submesh.material.name
            );
        }
    }

    println!();
    println!("Materials:");
    for material in registry.materials() {
        println!(
            "  {}: {:?}, {:?}, shader {}",
            material.name, material.workflow, material.alpha_mode, material.fragment_shader.name
        );
    }

    let cameras = scene.cameras();
    if !cameras.is_empty() {
        println!();
        println!("Cameras:");
        for (id, camera) in cameras {
            println!("  {} on node {:?}: {:?}", camera.name, id, camera.projection);
        }
    }

    let lights = scene.lights();
    if !lights.is_empty() {
        println!();
        println!("Lights:");
        for (id, light) in lights {
            println!(
                "  {} on node {:?}: {:?}, intensity {}, color {}",
                light.name,
                id,
                light.kind,
                light.intensity,
                format_vec3(light.color)
            );
        }
    }
}

fn print_node(scene: &Scene, id: NodeId, depth: usize) {
    let Some(node) = scene.graph.get(id) else {
        return;
    };
    let role = match node.role() {
        NodeRole::Plain => String::new(),
        NodeRole::Armature { joint_count } => format!(" [armature, {} joints]", joint_count),
        NodeRole::Joint { joint_index, .. } => format!(" [joint {}]", joint_index),
    };
    let meshes = if node.meshes().is_empty() {
        String::new()
    } else {
        let names: Vec<&str> = node.meshes().iter().map(|m| m.name.as_str()).collect();
        format!(" meshes: {}", names.join(", "))
    };
    let animations = if node.animations().is_empty() {
        String::new()
    } else {
        format!(" ({} animations)", node.animations().len())
    };
    println!(
        "{}{} t={}{}{}{}",
        "  ".repeat(depth),
        node.name,
        format_vec3(node.translate()),
        role,
        meshes,
        animations
    );
    for &child in node.children() {
        print_node(scene, child, depth + 1);
    }
}

fn format_vec3(v: Vec3) -> String {
    format!("({:.3}, {:.3}, {:.3})", v.x, v.y, v.z)
}
