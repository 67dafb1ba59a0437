use async_trait::async_trait;
use pinmonl_common::{Error, PinlId, Result, Target, TargetKind};
use pinmonl_db::models::JobRecord;
use tracing::{debug, info};

use super::{target_id, MonlCrawler};
use crate::monler::normalize_url;
use crate::queue::job::{Job, JobContext};

/// A bookmark was created or its URL changed: link it to the monl for its
/// canonical URL, and crawl that monl if it has never been crawled.
///
/// The monl may have been created by an earlier attempt of this job that
/// failed before returning its crawl, so "never crawled" is checked rather
/// than "just created". Crawl dedup keeps repeats from stacking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinlUpdated {
    pub pinl_id: PinlId,
}

impl PinlUpdated {
    pub const NAME: &'static str = "pinl_updated";

    pub fn new(pinl_id: PinlId) -> Self {
        Self { pinl_id }
    }

    pub fn from_record(record: &JobRecord) -> Result<Self> {
        Ok(Self::new(target_id(record, TargetKind::Pinl)?))
    }

    async fn url(&self, ctx: &JobContext) -> Result<String> {
        ctx.resolver
            .pinl_url(self.pinl_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("pinl {}", self.pinl_id)))
    }
}

#[async_trait]
impl Job for PinlUpdated {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn target(&self) -> Target {
        Target::new(TargetKind::Pinl, self.pinl_id)
    }

    async fn validate(&self, ctx: &JobContext) -> Result<()> {
        self.url(ctx).await.map(|_| ())
    }

    async fn execute(&self, ctx: &JobContext) -> Result<Vec<Box<dyn Job>>> {
        let url = normalize_url(&self.url(ctx).await?)?;
        let (monl_id, created) = ctx.resolver.find_or_create_monl(&url).await?;
        ctx.resolver.attach_monl(self.pinl_id, monl_id).await?;

        if created {
            info!(pinl_id = %self.pinl_id, monl_id = %monl_id, url = %url, "Tracking new monl");
        } else if ctx.resolver.monl_fetched_at(monl_id).await?.is_some() {
            debug!(pinl_id = %self.pinl_id, monl_id = %monl_id, "Pinl linked to existing monl");
            return Ok(Vec::new());
        } else {
            debug!(pinl_id = %self.pinl_id, monl_id = %monl_id, "Linked monl has not been crawled yet");
        }

        Ok(vec![Box::new(MonlCrawler::new(monl_id))])
    }
}
