use db::repositories::DirectoryRepository;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use silo_core::{GrainAddress, GrainId, SiloAddress};

use super::GrainDirectory;
use crate::error::GrainError;

/// Grain directory stored in the `grain_directory` table.
///
/// Requires `db::init` to have been called.
#[derive(Debug, Default, Clone, Copy)]
pub struct SurrealGrainDirectory;

impl SurrealGrainDirectory {
    pub fn new() -> Self {
        Self
    }
}

fn directory_error(err: db::DbError) -> GrainError {
    GrainError::Directory(err.to_string())
}

impl GrainDirectory for SurrealGrainDirectory {
    fn register<'a>(
        &'a self,
        address: &'a GrainAddress,
    ) -> BoxFuture<'a, Result<GrainAddress, GrainError>> {
        async move {
            DirectoryRepository::register(address)
                .await
                .map_err(directory_error)
        }
        .boxed()
    }

    fn lookup<'a>(
        &'a self,
        grain: &'a GrainId,
    ) -> BoxFuture<'a, Result<Option<GrainAddress>, GrainError>> {
        async move { DirectoryRepository::lookup(grain).await.map_err(directory_error) }.boxed()
    }

    fn unregister<'a>(&'a self, address: &'a GrainAddress) -> BoxFuture<'a, Result<bool, GrainError>> {
        async move {
            DirectoryRepository::unregister(address)
                .await
                .map_err(directory_error)
        }
        .boxed()
    }

    fn unregister_silo<'a>(
        &'a self,
        silo: &'a SiloAddress,
    ) -> BoxFuture<'a, Result<usize, GrainError>> {
        async move {
            DirectoryRepository::unregister_silo(silo)
                .await
                .map_err(directory_error)
        }
        .boxed()
    }
}
