//! Grain type registry.
//!
//! Maps grain type names to factories that build and spawn activations, so
//! the catalog can activate any registered grain without knowing its type.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use ractor::concurrency::JoinHandle;
use ractor::{Actor, ActorCell, ActorRef, SpawnErr};
use silo_core::{GrainId, GrainType};

use crate::activation::{ActivationArgs, ActivationSeed, GrainActivation};
use crate::grain::Grain;
use crate::messages::GrainMessage;
use crate::placement::PlacementStrategy;

/// Result of spawning an activation.
pub(crate) type SpawnResult = Result<(ActorRef<GrainMessage>, JoinHandle<()>), SpawnErr>;

/// Builds activations of one grain type.
pub(crate) trait GrainFactory: Send + Sync + 'static {
    /// Placement strategy declared by the grain type.
    fn placement(&self) -> PlacementStrategy;

    /// Construct the grain and spawn its activation under `supervisor`.
    fn spawn(&self, seed: ActivationSeed, supervisor: ActorCell) -> BoxFuture<'static, SpawnResult>;
}

/// A factory backed by a constructor function.
struct FnFactory<G, F> {
    make: F,
    _grain: PhantomData<fn() -> G>,
}

impl<G, F> GrainFactory for FnFactory<G, F>
where
    G: Grain,
    F: Fn(&GrainId) -> G + Send + Sync + 'static,
{
    fn placement(&self) -> PlacementStrategy {
        G::placement()
    }

    fn spawn(&self, seed: ActivationSeed, supervisor: ActorCell) -> BoxFuture<'static, SpawnResult> {
        let grain = (self.make)(&seed.address.grain);
        let args = ActivationArgs { grain, seed };
        Box::pin(async move {
            Actor::spawn_linked(None, GrainActivation::<G>::new(), args, supervisor).await
        })
    }
}

/// Registry of grain types hosted by a silo.
#[derive(Default, Clone)]
pub struct GrainRegistry {
    factories: HashMap<GrainType, Arc<dyn GrainFactory>>,
}

impl GrainRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a grain type with a constructor.
    ///
    /// The constructor runs once per activation, before `on_activate`.
    pub fn register<G, F>(&mut self, make: F)
    where
        G: Grain,
        F: Fn(&GrainId) -> G + Send + Sync + 'static,
    {
        let grain_type = GrainType::new(G::grain_type());
        tracing::debug!("Registered grain type {}", grain_type);
        self.factories.insert(
            grain_type,
            Arc::new(FnFactory {
                make,
                _grain: PhantomData,
            }),
        );
    }

    /// Register a grain type built with `Default`.
    pub fn register_default<G: Grain + Default>(&mut self) {
        self.register::<G, _>(|_| G::default());
    }

    pub(crate) fn get(&self, grain_type: &GrainType) -> Option<Arc<dyn GrainFactory>> {
        self.factories.get(grain_type).cloned()
    }

    /// Check if a grain type is registered.
    pub fn contains(&self, grain_type: &GrainType) -> bool {
        self.factories.contains_key(grain_type)
    }

    /// Placement strategy of a registered grain type.
    pub fn placement(&self, grain_type: &GrainType) -> Option<PlacementStrategy> {
        self.factories.get(grain_type).map(|f| f.placement())
    }

    /// List all registered grain types.
    pub fn grain_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        types
    }
}
