//! Build sessions
//!
//! A session owns one target, one executor and the state manager for a build
//! directory. It compiles scenes, records the build, runs the executor and
//! picks interrupted builds back up.

use std::time::Instant;

use structure_plan::compiler::WarningKind;
use structure_plan::{compile_placement, BlockPos, BuildPlan, PlacementPlan, PlanCompiler, Scene};
use tracing::{debug, info};

use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::executor::{BuildReport, BuildWarning, CancelHandle, ErrorClass, EventHandler, Executor};
use crate::state::{BlueprintSummary, StateManager};
use crate::target::WorldTarget;

/// Build plan and the placement plan derived from it
#[derive(Debug, Clone)]
pub struct CompiledBuild {
    pub scene_ids: Vec<String>,
    pub build_plan: BuildPlan,
    pub placement: PlacementPlan,
}

impl CompiledBuild {
    pub fn summary(&self) -> BlueprintSummary {
        BlueprintSummary {
            scene_ids: self.scene_ids.clone(),
            seed: self.build_plan.seed,
            plan_id: self.placement.plan_id.clone(),
            plan_hash: self.placement.hash.clone(),
            total_steps: self.placement.checkpoints.len(),
            total_items: self.placement.total_items(),
        }
    }
}

/// Materials the target would refuse are validation problems; names that
/// did not resolve are resolution problems.
fn warning_class(kind: WarningKind) -> ErrorClass {
    match kind {
        WarningKind::InvalidMaterial => ErrorClass::Validation,
        WarningKind::UnknownTheme | WarningKind::UnknownComponent | WarningKind::UnknownMaterial => {
            ErrorClass::Resolution
        }
    }
}

/// Compile one scene with the built-in themes and material catalog.
pub fn compile_scene(scene: &Scene, seed: u32, config: &BuildConfig) -> Result<CompiledBuild> {
    let started = Instant::now();
    let build_plan = PlanCompiler::default().compile(scene, seed, &config.server_context())?;
    let placement = compile_placement(&build_plan, &config.placement)?;
    info!(
        scene = %scene.id,
        seed,
        hash = %placement.hash,
        bulk_ops = placement.stats.bulk_ops,
        placements = placement.stats.discrete_placements,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "compiled scene"
    );
    Ok(CompiledBuild {
        scene_ids: vec![scene.id.clone()],
        build_plan,
        placement,
    })
}

/// Compile several scenes in parallel and merge them into one plan. Scene `i`
/// uses `seed + i`; structures are laid out along +x with `batch_gap` empty
/// columns between them.
pub async fn compile_batch(scenes: Vec<Scene>, seed: u32, config: &BuildConfig) -> Result<CompiledBuild> {
    if scenes.len() == 1 {
        return compile_scene(&scenes[0], seed, config);
    }
    let scene_ids: Vec<String> = scenes.iter().map(|s| s.id.clone()).collect();
    let ctx = config.server_context();

    let handles: Vec<_> = scenes
        .into_iter()
        .enumerate()
        .map(|(i, scene)| {
            let ctx = ctx.clone();
            let seed = seed.wrapping_add(i as u32);
            tokio::task::spawn_blocking(move || PlanCompiler::default().compile(&scene, seed, &ctx))
        })
        .collect();

    let mut plans = Vec::with_capacity(handles.len());
    for handle in handles {
        let plan = handle.await.map_err(|e| Error::Task(e.to_string()))??;
        plans.push(plan);
    }

    let parts = layout_along_x(plans, config.batch_gap);
    let batch_id = format!("batch-{}", scene_ids.join("+"));
    let build_plan = BuildPlan::merge(&batch_id, parts)?;
    let placement = compile_placement(&build_plan, &config.placement)?;
    info!(
        batch = %batch_id,
        structures = scene_ids.len(),
        hash = %placement.hash,
        "compiled batch"
    );
    Ok(CompiledBuild {
        scene_ids,
        build_plan,
        placement,
    })
}

/// Offsets that put each plan's footprint after the previous one along x.
fn layout_along_x(plans: Vec<BuildPlan>, gap: i32) -> Vec<(BuildPlan, BlockPos)> {
    let mut cursor = 0i32;
    plans
        .into_iter()
        .map(|plan| {
            let (min_x, width) = match plan.bounds {
                Some(b) => (b.min.x, b.size().0 as i32),
                None => (0, 0),
            };
            let origin = BlockPos::new(cursor - min_x, 0, 0);
            debug!(scene = %plan.scene_id, x = origin.x, width, "batch slot");
            cursor += width + gap;
            (plan, origin)
        })
        .collect()
}

pub struct BuildSession<T> {
    executor: Executor<T>,
    state: StateManager,
    config: BuildConfig,
}

impl<T: WorldTarget> BuildSession<T> {
    pub fn new(target: T, config: BuildConfig) -> Self {
        let state = StateManager::open(config.state_dir()).with_flush_every(config.executor.progress_flush_every);
        Self::with_state(target, config, state)
    }

    pub fn with_state(target: T, config: BuildConfig, state: StateManager) -> Self {
        Self {
            executor: Executor::new(target, config.executor.clone()),
            state,
            config,
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn target(&self) -> &T {
        self.executor.target()
    }

    pub fn into_target(self) -> T {
        self.executor.into_target()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.executor.cancel_handle()
    }

    /// Compile `scenes` (one structure, or a batch) and build them at `start_pos`.
    pub async fn build<H: EventHandler>(
        &mut self,
        scenes: Vec<Scene>,
        seed: u32,
        start_pos: BlockPos,
        events: &mut H,
    ) -> Result<BuildReport> {
        let compiled = compile_batch(scenes, seed, &self.config).await?;
        let build_id = self.state.start_build(compiled.summary(), start_pos);
        info!(build_id = %build_id, x = start_pos.x, y = start_pos.y, z = start_pos.z, "starting build");
        self.run(&compiled, None, events).await
    }

    /// Continue an in-progress build: the named one, or the most recent.
    /// `scenes` must be the scenes the build was started from; they are
    /// recompiled with the recorded seed and the plan hash is checked before
    /// anything is placed.
    pub async fn resume<H: EventHandler>(
        &mut self,
        scenes: Vec<Scene>,
        build_id: Option<&str>,
        events: &mut H,
    ) -> Result<BuildReport> {
        let resume = self.state.prepare_resume(build_id)?.ok_or(Error::NoActiveBuild)?;
        let expected = &resume.blueprint_summary.scene_ids;
        let actual: Vec<String> = scenes.iter().map(|s| s.id.clone()).collect();
        if *expected != actual {
            return Err(Error::SceneMismatch {
                build_id: resume.build_id.clone(),
                expected: expected.clone(),
                actual,
            });
        }
        let compiled = compile_batch(scenes, resume.blueprint_summary.seed, &self.config).await?;
        self.run(&compiled, Some(&resume), events).await
    }

    async fn run<H: EventHandler>(
        &mut self,
        compiled: &CompiledBuild,
        resume: Option<&crate::state::ResumeDescriptor>,
        events: &mut H,
    ) -> Result<BuildReport> {
        match self
            .executor
            .execute(&compiled.placement, &mut self.state, resume, events)
            .await
        {
            Ok(mut report) => {
                let mut warnings: Vec<BuildWarning> = compiled
                    .build_plan
                    .warnings
                    .iter()
                    .map(|w| BuildWarning {
                        step: None,
                        class: warning_class(w.kind),
                        message: format!("{}: {}", w.subject, w.message),
                    })
                    .collect();
                warnings.append(&mut report.warnings);
                report.warnings = warnings;
                Ok(report)
            }
            Err(e) => {
                // keep whatever progress was made resumable
                self.state.flush();
                Err(e)
            }
        }
    }

    /// Revert the `count` most recent placements of the active build.
    pub async fn undo(&mut self, build_id: Option<&str>, count: usize) -> Result<usize> {
        if self.state.active().is_none() || build_id.is_some() {
            self.state.prepare_resume(build_id)?.ok_or(Error::NoActiveBuild)?;
        }
        self.executor.undo(&mut self.state, count).await
    }
}
