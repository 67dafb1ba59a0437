use async_trait::async_trait;
use chrono::Utc;
use pinmonl_common::{Error, MonlId, Result, Target, TargetKind};
use pinmonl_db::models::JobRecord;
use tracing::info;

use super::target_id;
use crate::queue::job::{Job, JobContext};

/// Fetch a report from every provider that recognizes the monl's URL and
/// store them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonlCrawler {
    pub monl_id: MonlId,
}

impl MonlCrawler {
    pub const NAME: &'static str = "monl_crawler";

    pub fn new(monl_id: MonlId) -> Self {
        Self { monl_id }
    }

    pub fn from_record(record: &JobRecord) -> Result<Self> {
        Ok(Self::new(target_id(record, TargetKind::Monl)?))
    }

    async fn url(&self, ctx: &JobContext) -> Result<String> {
        ctx.resolver
            .monl_url(self.monl_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("monl {}", self.monl_id)))
    }
}

#[async_trait]
impl Job for MonlCrawler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn target(&self) -> Target {
        Target::new(TargetKind::Monl, self.monl_id)
    }

    async fn validate(&self, ctx: &JobContext) -> Result<()> {
        self.url(ctx).await.map(|_| ())
    }

    async fn execute(&self, ctx: &JobContext) -> Result<Vec<Box<dyn Job>>> {
        let url = self.url(ctx).await?;
        let handles = ctx.providers.guess(&url).await?;

        let fetched_at = Utc::now();
        for handle in &handles {
            ctx.reports.save_report(self.monl_id, handle, fetched_at).await?;
        }
        ctx.reports.mark_fetched(self.monl_id, fetched_at).await?;

        info!(monl_id = %self.monl_id, reports = handles.len(), "Crawled monl");
        Ok(Vec::new())
    }
}
