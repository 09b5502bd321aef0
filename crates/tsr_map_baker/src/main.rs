use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tsr_core::config::EngineConfig;
use tsr_core::resources::hash_bytes;
use tsr_core::time::TickClock;
use tsr_core::VirtualResourcePack;
use tsr_tiles::{Tilemap, TilesheetStore};

#[derive(Debug, Serialize, Deserialize)]
struct BakeManifest {
    version: String,
    map: String,
    elapsed_ms: u64,
    steps: u64,
    size_px: [u32; 2],
    size_tiles: [u32; 2],
    tile_size: [u32; 2],
    composite: BakedImage,
    layers: Vec<BakedLayer>,
    resources: Vec<PackedResource>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BakedImage {
    path: String,
    pixel_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct BakedLayer {
    index: usize,
    pixel_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PackedResource {
    path: String,
    bytes: usize,
    content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BakeArgs {
    resource_dir: PathBuf,
    map_name: String,
    png_output: PathBuf,
    manifest_output: PathBuf,
    elapsed_ms: u64,
    config_path: Option<PathBuf>,
}

fn usage() -> String {
    concat!(
        "Usage: cargo run -p tsr_map_baker -- <resource_dir> <map_name> <png_output> ",
        "<manifest_output> [elapsed_ms] [config.ini]\n",
        "Example: cargo run -p tsr_map_baker -- assets overworld out/overworld.png ",
        "out/overworld.json 1000",
    )
    .to_string()
}

fn parse_args(args: &[String]) -> Result<BakeArgs, String> {
    if args.len() < 5 || args.len() > 7 {
        return Err(usage());
    }
    let elapsed_ms = match args.get(5) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|e| format!("Invalid elapsed_ms '{raw}': {e}"))?,
        None => 0,
    };
    Ok(BakeArgs {
        resource_dir: PathBuf::from(&args[1]),
        map_name: args[2].clone(),
        png_output: PathBuf::from(&args[3]),
        manifest_output: PathBuf::from(&args[4]),
        elapsed_ms,
        config_path: args.get(6).map(PathBuf::from),
    })
}

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let args = parse_args(&args)?;
    let manifest = bake(&args)?;

    println!(
        "Baked map '{}' ({} layers, {} steps) -> {} and {}",
        manifest.map,
        manifest.layers.len(),
        manifest.steps,
        args.png_output.display(),
        args.manifest_output.display()
    );
    Ok(())
}

fn bake(args: &BakeArgs) -> Result<BakeManifest, String> {
    let config = match &args.config_path {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::default(),
    };
    let pack = VirtualResourcePack::from_directory(&args.resource_dir).map_err(|e| {
        format!(
            "Failed to import resource dir '{}': {e}",
            args.resource_dir.display()
        )
    })?;
    let mut store = TilesheetStore::new();
    let mut map = Tilemap::from_resource_pack(&pack, &config.layout, &mut store, &args.map_name)
        .map_err(|e| format!("Failed to load map '{}': {e}", args.map_name))?;

    let steps = simulate(&mut map, &config, args.elapsed_ms);
    let layers = map
        .surfaces()
        .iter()
        .enumerate()
        .map(|(index, surface)| BakedLayer {
            index,
            pixel_hash: hash_bytes(surface.as_raw()),
        })
        .collect();
    let composite = map.composite();

    for path in [&args.png_output, &args.manifest_output] {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                format!("Failed to create output dir '{}': {e}", parent.display())
            })?;
        }
    }

    let png = StagedOutput::for_target(&args.png_output);
    composite
        .save_with_format(&png.staged, image::ImageFormat::Png)
        .map_err(|e| format!("Failed to write '{}': {e}", png.staged.display()))?;

    let (tile_width, tile_height) = map.tile_size();
    let manifest = BakeManifest {
        version: "0.1".to_string(),
        map: args.map_name.clone(),
        elapsed_ms: args.elapsed_ms,
        steps,
        size_px: [map.width_in_pixels(), map.height_in_pixels()],
        size_tiles: [map.width_in_tiles(), map.height_in_tiles()],
        tile_size: [tile_width, tile_height],
        composite: BakedImage {
            path: manifest_path(&args.png_output),
            pixel_hash: hash_bytes(composite.as_raw()),
        },
        layers,
        resources: pack
            .files()
            .into_iter()
            .map(|(path, bytes)| PackedResource {
                path,
                bytes: bytes.len(),
                content_hash: hash_bytes(bytes),
            })
            .collect(),
    };
    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| format!("Failed to serialize bake manifest: {e}"))?;
    let manifest_file = StagedOutput::for_target(&args.manifest_output);
    manifest_file.write(json.as_bytes())?;

    publish(&[png, manifest_file])?;
    Ok(manifest)
}

/// Run the fixed-step loop for `elapsed_ms` of simulated time, fed in frames
/// no longer than the clock's cap. Returns the number of steps taken.
fn simulate(map: &mut Tilemap, config: &EngineConfig, elapsed_ms: u64) -> u64 {
    let mut clock = TickClock::from_config(config);
    map.update(0);

    let frame_ms = config.max_frame_ms.max(clock.tick_ms);
    let mut remaining = elapsed_ms;
    while remaining > 0 {
        let dt = remaining.min(frame_ms);
        remaining -= dt;
        clock.begin_frame(dt);
        while clock.should_step() {
            map.update(clock.tick_ms);
        }
    }
    if clock.pending_ms() > 0 {
        log::debug!(
            "{}ms left unsimulated after {} steps",
            clock.pending_ms(),
            clock.step_count
        );
    }
    clock.step_count
}

/// Output paths are recorded with forward slashes on every platform.
fn manifest_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// A baked file written beside its destination, waiting to replace it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StagedOutput {
    staged: PathBuf,
    target: PathBuf,
}

impl StagedOutput {
    fn for_target(target: &Path) -> Self {
        Self {
            staged: sibling(target, "partial"),
            target: target.to_path_buf(),
        }
    }

    /// Where the previous bake is parked while this one moves in.
    fn previous(&self) -> PathBuf {
        sibling(&self.target, "prev")
    }

    fn write(&self, bytes: &[u8]) -> Result<(), String> {
        fs::write(&self.staged, bytes)
            .map_err(|e| format!("Failed to write '{}': {e}", self.staged.display()))
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "baked".into(), |name| name.to_string_lossy());
    path.with_file_name(format!("{name}.{suffix}"))
}

/// Move every staged output over its target, or none of them.
///
/// An existing target is parked as `<file>.prev` before its replacement moves
/// in. On failure the published files are removed, the parked ones restored
/// and the staged ones discarded.
fn publish(outputs: &[StagedOutput]) -> Result<(), String> {
    let mut parked = Vec::new();
    let mut published = Vec::new();
    let result = outputs.iter().try_for_each(|output| -> Result<(), String> {
        if output.target.exists() {
            fs::rename(&output.target, output.previous()).map_err(|e| {
                format!(
                    "Failed to park previous bake '{}': {e}",
                    output.target.display()
                )
            })?;
            parked.push(output);
        }
        fs::rename(&output.staged, &output.target).map_err(|e| {
            format!(
                "Failed to publish '{}' -> '{}': {e}",
                output.staged.display(),
                output.target.display()
            )
        })?;
        published.push(output);
        Ok(())
    });

    match result {
        Ok(()) => {
            for output in parked {
                let _ = fs::remove_file(output.previous());
            }
            Ok(())
        }
        Err(err) => {
            log::warn!("Rolling back {} published outputs", published.len());
            for output in published.iter().rev() {
                let _ = fs::remove_file(&output.target);
            }
            for output in parked.iter().rev() {
                let _ = fs::rename(output.previous(), &output.target);
            }
            for output in outputs {
                let _ = fs::remove_file(&output.staged);
            }
            Err(err)
        }
    }
}
