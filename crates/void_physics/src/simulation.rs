//! Simulation context - owns the world, its lock and the step entry point
//!
//! Lock order is always world lock, then dynamics mutex, then broadphase (scene)
//! mutex. Steps and queries hold the world lock for reading; flushes and immediate
//! clears hold it for writing.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use void_memory::PoolRegistry;

use crate::body::{BodyDesc, RigidBodyComponent};
use crate::collider::{StaticColliderComponent, StaticDesc};
use crate::config::PhysicsConfig;
use crate::error::Result;
use crate::hooks::ContactHooks;
use crate::mutation::{self, FlushReport, PendingMutations, PhysicsObject};
use crate::registry::BodyRegistry;
use crate::shape::Triangle;
use crate::store::ShapeStore;
use crate::world::{PhysicsWorld, QueryScene};

/// One-shot closure run around a step, given the step's delta time
pub type StepAction = Box<dyn FnOnce(&SimulationContext, f32) + Send>;

const CLEAR_NONE: u8 = 0;
const CLEAR_KEEP_BUFFERS: u8 = 1;
const CLEAR_DISPOSE_BUFFERS: u8 = 2;

/// Everything guarded by the world lock
struct WorldState {
    registry: BodyRegistry,
    dynamics: Mutex<PhysicsWorld>,
    scene: Mutex<QueryScene>,
}

/// Values that may change between steps
#[derive(Debug, Clone, Copy)]
struct StepSettings {
    gravity: [f32; 3],
    time_scale: f32,
    max_substeps: u32,
}

/// Statistics for one `step` call
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepStats {
    /// Substeps taken (0 when the step was skipped)
    pub substeps: u32,
    /// Length of each substep
    pub substep_dt: f32,
    /// Bodies awake after the step
    pub active_bodies: usize,
}

/// A physics world together with the machinery to mutate, step and query it
/// from many threads
pub struct SimulationContext {
    config: PhysicsConfig,
    world: RwLock<WorldState>,
    pending: Mutex<PendingMutations>,
    pending_clear: AtomicU8,
    disabled: AtomicBool,
    settings: RwLock<StepSettings>,
    dispatcher: rayon::ThreadPool,
    before_step: (Sender<StepAction>, Receiver<StepAction>),
    after_step: (Sender<StepAction>, Receiver<StepAction>),
    pools: Arc<PoolRegistry<Triangle>>,
    shapes: ShapeStore,
}

impl SimulationContext {
    /// Create an empty simulation
    pub fn new(config: PhysicsConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(|index| format!("physics-worker-{}", index));
        if config.worker_threads > 0 {
            builder = builder.num_threads(config.worker_threads);
        }
        let dispatcher = builder.build()?;

        log::info!(
            "Physics simulation created: timestep {:.4}s, {} substeps max, {} workers",
            config.timestep,
            config.max_substeps,
            dispatcher.current_num_threads()
        );

        Ok(Self {
            world: RwLock::new(WorldState {
                registry: BodyRegistry::new(),
                dynamics: Mutex::new(PhysicsWorld::new(&config)),
                scene: Mutex::new(QueryScene::default()),
            }),
            pending: Mutex::new(PendingMutations::default()),
            pending_clear: AtomicU8::new(CLEAR_NONE),
            disabled: AtomicBool::new(config.simulation_disabled),
            settings: RwLock::new(StepSettings {
                gravity: config.gravity,
                time_scale: config.time_scale,
                max_substeps: config.max_substeps,
            }),
            dispatcher,
            before_step: crossbeam_channel::unbounded(),
            after_step: crossbeam_channel::unbounded(),
            pools: Arc::new(PoolRegistry::new()),
            shapes: ShapeStore::new(),
            config,
        })
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    /// Triangle pools used by mesh builders for this simulation
    pub fn pools(&self) -> &Arc<PoolRegistry<Triangle>> {
        &self.pools
    }

    /// Shapes stored for sharing between bodies
    pub fn shapes(&self) -> &ShapeStore {
        &self.shapes
    }

    // ==================== Objects ====================

    /// Create a body, using the configured contact capacity unless `desc` sets one
    ///
    /// The body is not simulated until it has been requested and flushed in.
    pub fn create_body(&self, desc: BodyDesc) -> Result<Arc<RigidBodyComponent>> {
        let capacity = desc
            .contact_capacity
            .unwrap_or(self.config.default_contact_capacity);
        RigidBodyComponent::with_capacity(desc, capacity)
    }

    pub fn create_static(&self, desc: StaticDesc) -> Result<Arc<StaticColliderComponent>> {
        StaticColliderComponent::new(desc)
    }

    /// Queue an object for insertion at the next flush
    ///
    /// Safe from any thread. Objects whose shape is no longer usable are rejected
    /// here and never enqueued.
    pub fn request_add(&self, object: impl Into<PhysicsObject>) -> Result<()> {
        let object = object.into();
        object.validate()?;
        self.pending.lock().request_add(object);
        Ok(())
    }

    /// Queue an object for removal at the next flush
    pub fn request_remove(&self, object: impl Into<PhysicsObject>) {
        self.pending.lock().request_remove(object.into());
    }

    /// Number of queued (adds, removes)
    pub fn pending_count(&self) -> (usize, usize) {
        let pending = self.pending.lock();
        (pending.pending_adds(), pending.pending_removes())
    }

    /// Apply every queued add under the write lock
    pub fn flush_adds(&self) -> FlushReport {
        let objects = self.pending.lock().take_adds();
        if objects.is_empty() {
            return FlushReport::default();
        }
        let mut guard = self.world.write();
        let state = &mut *guard;
        let report = mutation::flush_adds(objects, state.dynamics.get_mut(), &mut state.registry);
        *state.scene.get_mut() = state.dynamics.get_mut().snapshot();
        log::debug!(
            "Flushed adds: {} applied, {} skipped, {} failed",
            report.applied,
            report.skipped,
            report.failures.len()
        );
        report
    }

    /// Apply every queued remove under the write lock
    pub fn flush_removes(&self) -> FlushReport {
        let objects = self.pending.lock().take_removes();
        if objects.is_empty() {
            return FlushReport::default();
        }
        let mut guard = self.world.write();
        let state = &mut *guard;
        let report =
            mutation::flush_removes(objects, state.dynamics.get_mut(), &mut state.registry);
        *state.scene.get_mut() = state.dynamics.get_mut().snapshot();
        log::debug!(
            "Flushed removes: {} applied, {} skipped",
            report.applied,
            report.skipped
        );
        report
    }

    /// Remove everything from the world
    ///
    /// With `immediate` the world is emptied now under the write lock; otherwise a
    /// clear is recorded and performed by the next [`update`](Self::update). A
    /// recorded clear that disposes buffers is never downgraded.
    pub fn clear(&self, dispose_buffers: bool, immediate: bool) {
        let level = if dispose_buffers {
            CLEAR_DISPOSE_BUFFERS
        } else {
            CLEAR_KEEP_BUFFERS
        };
        if !immediate {
            self.pending_clear.fetch_max(level, Ordering::AcqRel);
            return;
        }
        self.pending_clear.store(CLEAR_NONE, Ordering::Release);

        let mut guard = self.world.write();
        let state = &mut *guard;
        let removed = state.registry.clear(dispose_buffers);
        *state.dynamics.get_mut() = PhysicsWorld::new(&self.config);
        *state.scene.get_mut() = QueryScene::default();
        drop(guard);

        let pools = if dispose_buffers {
            self.pools.clear_all()
        } else {
            0
        };
        log::info!(
            "Physics simulation cleared: {} objects removed, {} pools emptied",
            removed,
            pools
        );
    }

    /// Whether a deferred clear is waiting for the next update
    pub fn clear_pending(&self) -> bool {
        self.pending_clear.load(Ordering::Acquire) != CLEAR_NONE
    }

    // ==================== Stepping ====================

    pub fn gravity(&self) -> [f32; 3] {
        self.settings.read().gravity
    }

    pub fn set_gravity(&self, gravity: [f32; 3]) {
        self.settings.write().gravity = gravity;
    }

    pub fn time_scale(&self) -> f32 {
        self.settings.read().time_scale
    }

    /// Set the multiplier for every step's delta time (negative values clamp to 0)
    pub fn set_time_scale(&self, time_scale: f32) {
        self.settings.write().time_scale = time_scale.max(0.0);
    }

    pub fn max_substeps(&self) -> u32 {
        self.settings.read().max_substeps
    }

    pub fn set_max_substeps(&self, max_substeps: u32) {
        self.settings.write().max_substeps = max_substeps.max(1);
    }

    /// Turn stepping off or back on; flushes and queries keep working
    pub fn disable_simulation(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Release);
    }

    pub fn is_simulation_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Run `action` before the next step inside [`update`](Self::update)
    pub fn enqueue_before_step(&self, action: impl FnOnce(&SimulationContext, f32) + Send + 'static) {
        self.send_action(&self.before_step.0, Box::new(action));
    }

    /// Run `action` after the next step inside [`update`](Self::update)
    pub fn enqueue_after_step(&self, action: impl FnOnce(&SimulationContext, f32) + Send + 'static) {
        self.send_action(&self.after_step.0, Box::new(action));
    }

    fn send_action(&self, sender: &Sender<StepAction>, action: StepAction) {
        if sender.send(action).is_err() {
            log::warn!("Dropped step action: queue disconnected");
        }
    }

    /// Run the actions queued so far; ones they enqueue wait for the next update
    fn run_actions(&self, receiver: &Receiver<StepAction>, dt: f32) -> usize {
        let queued = receiver.len();
        let mut ran = 0;
        for action in receiver.try_iter().take(queued) {
            action(self, dt);
            ran += 1;
        }
        ran
    }

    /// Advance the simulation by `dt` seconds (scaled by the time scale)
    ///
    /// Holds the world lock for reading, so queries may run concurrently.
    pub fn step(&self, dt: f32) -> StepStats {
        if self.is_simulation_disabled() {
            return StepStats::default();
        }
        let settings = *self.settings.read();
        let scaled = dt * settings.time_scale;
        if !(scaled > 0.0 && scaled.is_finite()) {
            return StepStats::default();
        }
        let ratio = scaled / self.config.timestep;
        let substeps = ((ratio - 1e-4).ceil().max(1.0) as u32).min(settings.max_substeps);
        let substep_dt = scaled / substeps as f32;

        let state = self.world.read();
        let mut dynamics = state.dynamics.lock();

        for (_, body) in state.registry.bodies() {
            body.contact_buffer().reset();
        }
        dynamics.apply_body_commands(&state.registry);

        for substep in 0..substeps {
            let hooks = ContactHooks::new(&state.registry, substep + 1 == substeps);
            dynamics.integrate_velocities(
                &state.registry,
                settings.gravity,
                substep_dt,
                &self.dispatcher,
            );
            dynamics.step(substep_dt, &hooks);
        }
        dynamics.publish_states(&state.registry);

        let stats = StepStats {
            substeps,
            substep_dt,
            active_bodies: dynamics.active_body_count(),
        };
        let republished = dynamics.refresh_scene(&mut state.scene.lock());
        drop(dynamics);

        log::trace!(
            "Stepped {} x {:.4}s, {} active bodies, {} colliders republished",
            stats.substeps,
            stats.substep_dt,
            stats.active_bodies,
            republished
        );
        stats
    }

    /// One frame at a safe point: pending clear, removes, adds, before-step
    /// actions, the step, then after-step actions
    pub fn update(&self, dt: f32) -> StepStats {
        match self.pending_clear.swap(CLEAR_NONE, Ordering::AcqRel) {
            CLEAR_NONE => {}
            level => self.clear(level == CLEAR_DISPOSE_BUFFERS, true),
        }

        self.flush_removes();
        self.flush_adds();

        self.run_actions(&self.before_step.1, dt);
        let stats = self.step(dt);
        self.run_actions(&self.after_step.1, dt);
        stats
    }

    // ==================== Introspection ====================

    /// Number of live bodies
    pub fn body_count(&self) -> usize {
        self.world.read().registry.body_count()
    }

    /// Number of live static colliders
    pub fn static_count(&self) -> usize {
        self.world.read().registry.static_count()
    }

    /// Number of live handles of either kind
    pub fn live_handle_count(&self) -> usize {
        self.world.read().registry.len()
    }

    /// Run `f` against the query scene, waiting for the locks
    pub(crate) fn with_scene<R>(&self, f: impl FnOnce(&BodyRegistry, &QueryScene) -> R) -> R {
        let state = self.world.read();
        let scene = state.scene.lock();
        f(&state.registry, &scene)
    }

    /// Run `f` against the query scene only if both locks are free right now
    pub(crate) fn try_with_scene<R>(
        &self,
        f: impl FnOnce(&BodyRegistry, &QueryScene) -> R,
    ) -> Option<R> {
        let state = self.world.try_read()?;
        let scene = state.scene.try_lock()?;
        Some(f(&state.registry, &scene))
    }

    /// Hold the broadphase lock while `f` runs
    #[cfg(test)]
    pub(crate) fn hold_scene_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let state = self.world.read();
        let _scene = state.scene.lock();
        f()
    }
}

impl std::fmt::Debug for SimulationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationContext")
            .field("config", &self.config)
            .field("disabled", &self.is_simulation_disabled())
            .field("shapes", &self.shapes.len())
            .finish()
    }
}
