//! Pins block references to exact versions before execution.

use cascade_core::{BlockMetadata, BlockPackage, BlockRef, CoreError, EngineToken, FlowVersion, PackageType};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::api::EngineApi;
use crate::error::{WorkerError, WorkerResult};

/// Resolves block references against the control plane's catalog
#[derive(Clone)]
pub struct BlockResolver {
    api: Arc<dyn EngineApi>,
}

impl BlockResolver {
    pub fn new(api: Arc<dyn EngineApi>) -> Self {
        Self { api }
    }

    /// Resolve one reference to an exact package.
    ///
    /// Archive blocks always fetch metadata and content. Registry blocks that
    /// already name an exact version make no call at all.
    #[instrument(skip(self, token, block_ref), fields(block = %block_ref.name, requested = %block_ref.version))]
    pub async fn resolve_exact(&self, token: &EngineToken, block_ref: &BlockRef) -> WorkerResult<BlockPackage> {
        match block_ref.package_type {
            PackageType::Archive => {
                let metadata = self.metadata(token, block_ref).await?;
                let archive_id = metadata.archive_id.as_deref().ok_or_else(|| {
                    WorkerError::InvalidPayload(format!(
                        "Archive block {}@{} has no archive id",
                        metadata.name, metadata.version
                    ))
                })?;
                let archive = self
                    .api
                    .get_file(token, archive_id)
                    .await?
                    .ok_or_else(|| WorkerError::NotFound(format!("Archive {}", archive_id)))?;

                debug!(resolved = %metadata.version, "Resolved archive block");
                Ok(BlockPackage::Archive {
                    name: block_ref.name.clone(),
                    version: metadata.version,
                    block_type: metadata.block_type,
                    archive,
                })
            }
            PackageType::Registry if block_ref.is_exact_version() => Ok(BlockPackage::Registry {
                name: block_ref.name.clone(),
                version: block_ref.version.trim().to_string(),
                block_type: block_ref.block_type,
            }),
            PackageType::Registry => {
                let metadata = self.metadata(token, block_ref).await?;
                debug!(resolved = %metadata.version, "Resolved registry block");
                Ok(BlockPackage::Registry {
                    name: block_ref.name.clone(),
                    version: metadata.version,
                    block_type: metadata.block_type,
                })
            }
        }
    }

    async fn metadata(&self, token: &EngineToken, block_ref: &BlockRef) -> WorkerResult<BlockMetadata> {
        self.api
            .get_block_metadata(token, &block_ref.name, &block_ref.version)
            .await?
            .ok_or_else(|| WorkerError::NotFound(format!("Block {}@{}", block_ref.name, block_ref.version)))
    }

    /// Copy of `flow_version` with `step_name`'s block pinned to its exact version.
    ///
    /// A step without a block reference comes back unchanged.
    pub async fn lock_flow_version(
        &self,
        token: &EngineToken,
        flow_version: &FlowVersion,
        step_name: &str,
    ) -> WorkerResult<FlowVersion> {
        let step = flow_version
            .get_step(step_name)
            .ok_or_else(|| CoreError::StepNotFound(step_name.to_string()))?;

        let Some(block_ref) = step.settings.block_ref() else {
            return Ok(flow_version.clone());
        };

        let package = self.resolve_exact(token, &block_ref).await?;
        Ok(flow_version.with_block_version(step_name, package.version())?)
    }

    /// Resolve every block step of `flow_version` concurrently
    pub async fn extract_flow_blocks(
        &self,
        token: &EngineToken,
        flow_version: &FlowVersion,
    ) -> WorkerResult<Vec<BlockPackage>> {
        let refs: Vec<BlockRef> = flow_version
            .steps()
            .into_iter()
            .filter_map(|step| step.settings.block_ref())
            .collect();

        try_join_all(refs.iter().map(|block_ref| self.resolve_exact(token, block_ref))).await
    }
}
