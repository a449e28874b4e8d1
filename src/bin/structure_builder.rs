use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use structure_builder::config::BuildConfig;
use structure_builder::executor::BuildEvent;
use structure_builder::session::{compile_scene, BuildSession};
use structure_builder::state::StateManager;
use structure_builder::target::{bind_socket, serve_simulated, RemoteTarget, SimulatedWorld, WorldTarget};
use structure_plan::{to_legacy_ops, BlockPos, Scene};

#[derive(Parser)]
#[command(name = "structure-builder")]
#[command(about = "Compile structure scenes and build them in a world with resumable progress")]
struct Cli {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Build records directory
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a scene and print the plan summary and hash
    Compile {
        scene: PathBuf,
        #[arg(long, default_value_t = 0)]
        seed: u32,
    },
    /// Print the placement plan for a scene
    Plan {
        scene: PathBuf,
        #[arg(long, default_value_t = 0)]
        seed: u32,
        /// Flattened operation list instead of the placement plan
        #[arg(long)]
        legacy: bool,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Build one scene, or several side by side
    Build {
        #[arg(required = true)]
        scenes: Vec<PathBuf>,
        /// Random when omitted; recorded with the build
        #[arg(long)]
        seed: Option<u32>,
        #[arg(long)]
        socket: Option<PathBuf>,
        /// Build into an in-memory world
        #[arg(long, conflicts_with = "socket")]
        dry_run: bool,
        /// Start position as x,y,z
        #[arg(long, value_delimiter = ',', num_args = 3, default_values_t = [0, 0, 0], allow_negative_numbers = true)]
        at: Vec<i32>,
    },
    /// Continue an interrupted build
    Resume {
        #[arg(required = true)]
        scenes: Vec<PathBuf>,
        #[arg(long)]
        build_id: Option<String>,
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Revert the most recent placements of an in-progress build
    Undo {
        #[arg(long)]
        build_id: Option<String>,
        #[arg(long, default_value_t = 1)]
        count: usize,
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// List build records
    Builds,
    /// Serve an in-memory world on a socket
    Simulate {
        #[arg(long)]
        socket: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
        }
        Err(e) => {
            let err = json!({"success": false, "error": e.to_string()});
            println!("{}", serde_json::to_string_pretty(&err).unwrap_or_default());
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<Value, Box<dyn std::error::Error>> {
    let mut config = BuildConfig::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = cli.state_dir {
        config.state_dir = Some(dir);
    }

    match cli.command {
        Commands::Compile { scene, seed } => {
            let compiled = compile_scene(&load_scene(&scene)?, seed, &config)?;
            let plan = &compiled.build_plan;
            Ok(json!({
                "scene_id": plan.scene_id,
                "seed": plan.seed,
                "hash": plan.hash,
                "bounds": plan.bounds,
                "stats": plan.stats,
                "warnings": plan.warnings,
                "placement": {
                    "plan_id": compiled.placement.plan_id,
                    "hash": compiled.placement.hash,
                    "strategy": compiled.placement.strategy,
                    "stats": compiled.placement.stats,
                },
            }))
        }
        Commands::Plan { scene, seed, legacy, out } => {
            let compiled = compile_scene(&load_scene(&scene)?, seed, &config)?;
            let body = if legacy {
                serde_json::to_value(to_legacy_ops(&compiled.placement))?
            } else {
                serde_json::to_value(&compiled.placement)?
            };
            match out {
                Some(path) => {
                    std::fs::write(&path, serde_json::to_vec_pretty(&body)?)?;
                    Ok(json!({"success": true, "written": path, "hash": compiled.placement.hash}))
                }
                None => Ok(body),
            }
        }
        Commands::Build { scenes, seed, socket, dry_run, at } => {
            let scenes = load_scenes(&scenes)?;
            let seed = seed.unwrap_or_else(random_seed);
            let start = BlockPos::new(at[0], at[1], at[2]);
            if dry_run {
                let (report, world) = build(SimulatedWorld::new(), &config, scenes, seed, start).await?;
                Ok(json!({"seed": seed, "report": report, "blocks": world.blocks().len()}))
            } else {
                let target = connect(&config, socket.as_deref()).await?;
                let (report, _) = build(target, &config, scenes, seed, start).await?;
                Ok(json!({"seed": seed, "report": report}))
            }
        }
        Commands::Resume { scenes, build_id, socket } => {
            let scenes = load_scenes(&scenes)?;
            let target = connect(&config, socket.as_deref()).await?;
            let mut session = BuildSession::new(target, config.clone());
            let _ctrl_c = cancel_on_ctrl_c(&session);
            let report = session.resume(scenes, build_id.as_deref(), &mut progress_printer).await?;
            Ok(json!({"report": report}))
        }
        Commands::Undo { build_id, count, socket } => {
            let target = connect(&config, socket.as_deref()).await?;
            let mut session = BuildSession::new(target, config.clone());
            let restored = session.undo(build_id.as_deref(), count).await?;
            Ok(json!({"success": true, "restored": restored}))
        }
        Commands::Builds => {
            let state = StateManager::open(config.state_dir());
            let builds: Vec<Value> = state
                .list_builds()?
                .iter()
                .map(|b| {
                    json!({
                        "build_id": b.build_id,
                        "status": b.status,
                        "scenes": b.blueprint_summary.scene_ids,
                        "seed": b.blueprint_summary.seed,
                        "steps": format!("{}/{}", b.progress.completed_steps.len(), b.blueprint_summary.total_steps),
                        "placed": b.progress.blocks_placed,
                        "failed": b.progress.blocks_failed,
                        "failure_reason": b.failure_reason,
                    })
                })
                .collect();
            Ok(json!({"builds": builds}))
        }
        Commands::Simulate { socket } => {
            let path = socket.unwrap_or_else(|| config.socket_path());
            let listener = bind_socket(&path)?;
            eprintln!("Simulated world on {:?}", path);
            let result = serve_simulated(listener, SimulatedWorld::new()).await;
            let _ = std::fs::remove_file(&path);
            result?;
            Ok(json!({"success": true}))
        }
    }
}

async fn build<T: WorldTarget>(
    target: T,
    config: &BuildConfig,
    scenes: Vec<Scene>,
    seed: u32,
    start: BlockPos,
) -> Result<(structure_builder::BuildReport, T), Box<dyn std::error::Error>> {
    let mut session = BuildSession::new(target, config.clone());
    let _ctrl_c = cancel_on_ctrl_c(&session);
    let report = session.build(scenes, seed, start, &mut progress_printer).await?;
    Ok((report, session.into_target()))
}

/// Stop the build at the next placement boundary on Ctrl-C.
fn cancel_on_ctrl_c<T: WorldTarget>(session: &BuildSession<T>) -> AbortOnDrop {
    let cancel = session.cancel_handle();
    AbortOnDrop(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling after the current placement...");
            cancel.cancel();
        }
    }))
}

struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn progress_printer(event: BuildEvent) {
    match event {
        BuildEvent::Started { build_id, total_steps, resume_from_step } => {
            eprintln!("Build {} ({} steps, starting at {})", build_id, total_steps, resume_from_step);
        }
        BuildEvent::StepCompleted { index, placed, failed } => {
            eprintln!("Step {} done: {} placed, {} failed", index, placed, failed);
        }
        BuildEvent::Cancelled { step } => {
            eprintln!("Cancelled before step {}; resume to continue", step);
        }
        _ => {}
    }
}

async fn connect(config: &BuildConfig, socket: Option<&Path>) -> structure_builder::Result<RemoteTarget> {
    let path = socket.map(Path::to_path_buf).unwrap_or_else(|| config.socket_path());
    RemoteTarget::connect(&path, config.request_timeout()).await
}

fn load_scene(path: &Path) -> Result<Scene, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    Ok(Scene::from_json(&raw)?)
}

fn load_scenes(paths: &[PathBuf]) -> Result<Vec<Scene>, Box<dyn std::error::Error>> {
    paths.iter().map(|p| load_scene(p)).collect()
}

fn random_seed() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0)
    }
}
