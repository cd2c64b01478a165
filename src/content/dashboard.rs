use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ContentResult, ContentService, news::NEWS_TABLE, photos::PHOTOS_TABLE};
use crate::{
    cache::CacheKey,
    gateway::{GatewayError, GatewayResult, Order},
    moderation::{
        ModerationStatus, ReviewStatus, grievances::GRIEVANCES_TABLE, payments::PAYMENTS_TABLE,
    },
};

/// Headline numbers for the console landing page. Status totals are for tax payments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCounts {
    pub news: i64,
    pub grievances: i64,
    pub tax_payments: i64,
    pub photos: i64,
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
}

impl DashboardCounts {
    fn tally_payments(&mut self, payments: &[Value]) {
        self.tax_payments = payments.len() as i64;
        for payment in payments {
            let status = payment
                .get("status")
                .and_then(Value::as_str)
                .and_then(ReviewStatus::parse);
            match status {
                Some(ReviewStatus::Pending) => self.pending += 1,
                Some(ReviewStatus::Approved) => self.approved += 1,
                Some(ReviewStatus::Rejected) => self.rejected += 1,
                _ => {}
            }
        }
    }
}

impl ContentService {
    pub async fn dashboard(&self) -> ContentResult<DashboardCounts> {
        let value = self
            .cache
            .get_or_load(CacheKey::Dashboard, || async {
                let counts = self.load_counts().await?;
                serde_json::to_value(counts).map_err(GatewayError::from)
            })
            .await?;
        Ok(serde_json::from_value(value.as_ref().clone()).map_err(GatewayError::from)?)
    }

    async fn load_counts(&self) -> GatewayResult<DashboardCounts> {
        let mut counts = DashboardCounts {
            news: self.rows.count(NEWS_TABLE).await?,
            grievances: self.rows.count(GRIEVANCES_TABLE).await?,
            photos: self.rows.count(PHOTOS_TABLE).await?,
            ..DashboardCounts::default()
        };
        let payments = self
            .rows
            .select(PAYMENTS_TABLE, Order::desc("created_at"))
            .await?;
        counts.tally_payments(&payments);
        Ok(counts)
    }
}
