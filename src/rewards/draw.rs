//! Garden reward draws, issued in bounded batches

use crate::auth::AuthSession;
use crate::backend::BackendApi;
use crate::error::RelayerResult;

use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrawSummary {
    pub requested: u64,
    pub batches: u32,
    pub cards: usize,
}

/// Spends every available reward action in batches of at most `batch_limit`
pub struct DrawRunner {
    api: Arc<dyn BackendApi>,
    batch_limit: u32,
}

impl DrawRunner {
    pub fn new(api: Arc<dyn BackendApi>, batch_limit: u32) -> Self {
        Self {
            api,
            batch_limit: batch_limit.max(1),
        }
    }

    pub async fn run(&self, session: &AuthSession) -> RelayerResult<DrawSummary> {
        let status = self.api.garden_status(session).await?;
        let total = status.garden_reward_action_count;
        info!("Garden reward action count: {}", total);

        let mut summary = DrawSummary {
            requested: total,
            ..Default::default()
        };
        let mut remaining = total;

        for limit in draw_batches(total, self.batch_limit) {
            let cards = match self.api.execute_draw(session, limit).await {
                Ok(cards) => cards,
                Err(e) => {
                    crate::metrics::record_reward_action("draw", false);
                    return Err(e);
                }
            };
            crate::metrics::record_reward_action("draw", true);
            for card in &cards {
                debug!(
                    "Drew card {} ({}){}",
                    card.data.card_id,
                    card.data.group,
                    if card.is_new { " [new]" } else { "" }
                );
            }

            remaining -= u64::from(limit);
            summary.batches += 1;
            summary.cards += cards.len();
            info!("Executed draw for {} cards. Draws left: {}", limit, remaining);
        }

        info!("All draws completed");
        Ok(summary)
    }
}

/// Batch sizes covering `total` draws
fn draw_batches(total: u64, limit: u32) -> Vec<u32> {
    let limit = u64::from(limit.max(1));
    let mut batches = Vec::new();
    let mut remaining = total;
    while remaining > 0 {
        let size = remaining.min(limit);
        batches.push(size as u32);
        remaining -= size;
    }
    batches
}
