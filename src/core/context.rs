//! Explicit owner of every registry: environments, players, textures.
//!
//! One `PlayerContext` is created at startup and shared by reference. Its
//! `shutdown()` runs once, in a fixed order: management queue, players,
//! event queue, environments, textures.

use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use super::bridge::EventBridge;
use super::dispatcher::AffinityDispatcher;
use super::engine::{Engine, EngineFactory};
use super::player::Player;
use super::registry::ResourceRegistry;
use super::workers::TaskQueue;
use crate::config::CoreConfig;
use crate::error::PlayerError;
use crate::video::gpu::GpuDevice;
use crate::video::handoff::FrameHandoffChannel;
use crate::video::texture_registry::{Compositor, TextureRegistry};

static NEXT_ENVIRONMENT_ID: AtomicI64 = AtomicI64::new(1);

/// Engine factory plus the arguments every engine it creates receives.
pub struct Environment {
    id: i64,
    factory: Arc<dyn EngineFactory>,
    args: Vec<String>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.id)
            .field("factory", &self.factory.name())
            .field("args", &self.args)
            .finish()
    }
}

impl Environment {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        self.factory.name()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn create_engine(&self) -> Result<Box<dyn Engine>, PlayerError> {
        self.factory.create(&self.args)
    }
}

/// Player plus the bridge republishing its events.
#[derive(Clone)]
pub struct PlayerEntry {
    pub player: Arc<Player>,
    pub bridge: Arc<EventBridge>,
}

pub struct PlayerContext {
    config: CoreConfig,
    environments: ResourceRegistry<i64, Arc<Environment>>,
    players: ResourceRegistry<i64, PlayerEntry>,
    textures: TextureRegistry,
    events: Arc<TaskQueue>,
    workers: TaskQueue,
    shut_down: AtomicBool,
    weak_self: Weak<PlayerContext>,
}

impl PlayerContext {
    pub fn new(config: CoreConfig, compositor: Arc<dyn Compositor>) -> Arc<Self> {
        info!(
            "PlayerContext: {} management workers, event backlog {}",
            config.worker_threads, config.event_queue_capacity
        );
        Arc::new_cyclic(|weak| Self {
            workers: TaskQueue::new(config.worker_threads, "framewire-worker"),
            events: Arc::new(TaskQueue::serial("framewire-events")),
            environments: ResourceRegistry::new(),
            players: ResourceRegistry::new(),
            textures: TextureRegistry::new(compositor),
            shut_down: AtomicBool::new(false),
            weak_self: weak.clone(),
            config,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn textures(&self) -> &TextureRegistry {
        &self.textures
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn check_alive(&self) -> Result<(), PlayerError> {
        if self.is_shut_down() {
            return Err(PlayerError::Terminated);
        }
        Ok(())
    }

    // ========== Environments ==========

    /// Register an environment; `args` are appended to the configured engine args.
    pub fn create_environment(
        &self,
        factory: Arc<dyn EngineFactory>,
        args: &[String],
    ) -> Result<i64, PlayerError> {
        self.check_alive()?;
        let id = NEXT_ENVIRONMENT_ID.fetch_add(1, Ordering::Relaxed);
        let args: Vec<String> = self.config.engine_args.iter().chain(args).cloned().collect();
        debug!("Environment {} ({}) created, args {:?}", id, factory.name(), args);
        self.environments.insert(id, Arc::new(Environment { id, factory, args }));
        Ok(id)
    }

    /// Same as [`create_environment`](Self::create_environment) on the management queue.
    pub fn create_environment_async(
        &self,
        factory: Arc<dyn EngineFactory>,
        args: Vec<String>,
    ) -> Receiver<Result<i64, PlayerError>> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let reply = tx.clone();
        let context = self.weak_self.clone();
        let queued = self.workers.enqueue(move || {
            let result = match context.upgrade() {
                Some(context) => context.create_environment(factory, &args),
                None => Err(PlayerError::Terminated),
            };
            let _ = reply.send(result);
        });
        if !queued {
            let _ = tx.send(Err(PlayerError::Terminated));
        }
        rx
    }

    pub fn environment(&self, id: i64) -> Option<Arc<Environment>> {
        self.environments.get(&id)
    }

    /// Players already created keep their engines.
    pub fn dispose_environment(&self, id: i64) -> bool {
        let removed = self.environments.remove(&id).is_some();
        if removed {
            debug!("Environment {} disposed", id);
        }
        removed
    }

    // ========== Players ==========

    /// Create a player bound to `dispatcher`, with its event bridge attached.
    pub fn create_player(
        &self,
        environment_id: i64,
        dispatcher: Arc<AffinityDispatcher>,
    ) -> Result<Arc<Player>, PlayerError> {
        self.check_alive()?;
        let environment = self
            .environment(environment_id)
            .ok_or_else(|| PlayerError::InvalidArgument(format!("unknown environment {}", environment_id)))?;
        let engine = environment.create_engine()?;

        let player = Player::new(engine, dispatcher);
        let bridge = EventBridge::new(player.id(), Arc::clone(&self.events), self.config.event_queue_capacity);
        player.set_event_delegate(Some(bridge.clone()));
        self.players.insert(
            player.id(),
            PlayerEntry {
                player: Arc::clone(&player),
                bridge,
            },
        );
        info!("Player {} created in environment {}", player.id(), environment_id);
        Ok(player)
    }

    pub fn player(&self, id: i64) -> Option<Arc<Player>> {
        self.players.with(&id, |entry| Arc::clone(&entry.player))
    }

    pub fn bridge(&self, id: i64) -> Option<Arc<EventBridge>> {
        self.players.with(&id, |entry| Arc::clone(&entry.bridge))
    }

    pub fn player_ids(&self) -> Vec<i64> {
        let mut ids = self.players.keys();
        ids.sort_unstable();
        ids
    }

    /// Remove and tear down one player. `false` for unknown ids.
    pub fn dispose_player(&self, id: i64) -> bool {
        match self.players.remove(&id) {
            Some(entry) => {
                self.teardown_player(entry);
                true
            }
            None => false,
        }
    }

    /// Shutdown on the player's affinity thread, then close its bridge.
    ///
    /// Waits at most `stop_timeout` when called off that thread.
    fn teardown_player(&self, entry: PlayerEntry) {
        let PlayerEntry { player, bridge } = entry;
        let id = player.id();
        let dispatcher = Arc::clone(player.dispatcher());
        let inline = dispatcher.runs_on_current_thread();

        let (tx, rx) = crossbeam_channel::bounded(1);
        let queued = dispatcher.dispatch(move |token| {
            let _ = tx.send(player.shutdown(token));
        });

        if !queued {
            warn!("Player {}: dispatcher already terminated, skipping engine shutdown", id);
        } else {
            let result = if inline {
                rx.try_recv().ok()
            } else {
                rx.recv_timeout(self.config.stop_timeout()).ok()
            };
            match result {
                Some(Ok(())) => debug!("Player {} disposed", id),
                Some(Err(e)) => warn!("Player {}: shutdown failed: {}", id, e),
                None => warn!("Player {}: affinity thread did not run shutdown in time", id),
            }
        }
        bridge.terminate();
    }

    // ========== Video ==========

    /// New frame channel registered with this context's compositor.
    pub fn create_frame_channel(
        &self,
        decode_device: Arc<dyn GpuDevice>,
        compositor_device: Arc<dyn GpuDevice>,
    ) -> Result<FrameHandoffChannel, PlayerError> {
        self.check_alive()?;
        Ok(FrameHandoffChannel::new(
            decode_device,
            compositor_device,
            &self.textures,
            self.config.handoff_config(),
        ))
    }

    // ========== Shutdown ==========

    /// Ordered teardown. Only the first call does anything.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("PlayerContext shutting down");

        self.workers.terminate();

        // Entries are owned by the visitor; teardown runs without the registry lock
        let mut entries = Vec::new();
        self.players.remove_all(|_, entry| entries.push(entry));
        let players = entries.len();
        for entry in entries {
            self.teardown_player(entry);
        }

        self.events.terminate();
        let environments = self.environments.clear();

        let stuck = self.textures.drain(self.config.handoff_config().unregister_timeout);
        info!(
            "PlayerContext shut down: {} players, {} environments, {} textures stuck",
            players, environments, stuck
        );
    }
}

impl Drop for PlayerContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
