use std::sync::Arc;

use tracing::{debug, info};

use crate::analytics::{AnalyticsLogger, HitEvent};
use crate::config::LinkConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::models::Link;
use crate::storage::{unix_now, Storage, StorageError};
use crate::validation::{validate_short_code, validate_target_url};

/// Short-code allocation and redirect resolution.
pub struct LinkRegistry {
    storage: Arc<dyn Storage>,
    analytics: Arc<AnalyticsLogger>,
    short_code_max_length: usize,
}

impl LinkRegistry {
    pub fn new(
        storage: Arc<dyn Storage>,
        analytics: Arc<AnalyticsLogger>,
        config: &LinkConfig,
    ) -> Self {
        Self {
            storage,
            analytics,
            short_code_max_length: config.short_code_max_length,
        }
    }

    /// Claim `short_code` for `target_url`.
    ///
    /// The claim is a single conditional insert, so of any number of
    /// concurrent callers asking for the same code exactly one succeeds.
    pub async fn create_link(
        &self,
        target_url: &str,
        short_code: &str,
        owner_account_id: i64,
    ) -> ServiceResult<Link> {
        validate_target_url(target_url)?;
        validate_short_code(short_code, self.short_code_max_length)?;

        match self
            .storage
            .create_link(short_code, target_url, owner_account_id)
            .await
        {
            Ok(link) => {
                info!(short_code, owner_account_id, "Link created");
                Ok(link)
            }
            Err(StorageError::Conflict) => Err(ServiceError::Conflict("short code".to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a short code to its target.
    ///
    /// The hit is queued for the analytics logger and not awaited; its
    /// outcome never affects the result.
    pub async fn get_link(&self, short_code: &str, queried_by: i64) -> ServiceResult<String> {
        let link = self.lookup(short_code).await?;

        self.analytics.record(HitEvent {
            link_id: link.id,
            short_code: link.short_code,
            queried_by,
            queried_at: unix_now(),
        });

        debug!(short_code, queried_by, "Link resolved");
        Ok(link.target_url)
    }

    /// Look up a link without recording a hit.
    pub async fn describe_link(&self, short_code: &str) -> ServiceResult<Link> {
        self.lookup(short_code).await
    }

    async fn lookup(&self, short_code: &str) -> ServiceResult<Link> {
        self.storage
            .get_link(short_code)
            .await?
            .ok_or_else(|| ServiceError::NotFound("short code".to_string()))
    }
}
