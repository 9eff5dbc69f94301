//! In-memory order venue. Orders rest until cancelled; nothing ever fills.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use crate::error::{AppError, Result};
use crate::fetcher::short_id;
use crate::intent::OrderIntent;
use crate::types::OrderId;
use crate::venue::OrderVenue;

#[derive(Default)]
pub struct PaperVenue {
    orders: DashMap<OrderId, OrderIntent>,
    next_id: AtomicU64,
}

impl PaperVenue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resting orders, oldest first.
    pub fn open_orders(&self) -> Vec<(OrderId, OrderIntent)> {
        let mut orders: Vec<_> = self
            .orders
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        orders.sort_by(|a, b| a.1.created_at().cmp(&b.1.created_at()).then_with(|| a.0.cmp(&b.0)));
        orders
    }
}

#[async_trait]
impl OrderVenue for PaperVenue {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderId> {
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = OrderId(format!("paper-{seq:06}"));
        info!(
            "[Paper] {id} {intent} on {} (market {})",
            short_id(intent.token_id()),
            intent.market_id()
        );
        self.orders.insert(id.clone(), intent.clone());
        Ok(id)
    }

    async fn cancel(&self, order_id: &OrderId) -> Result<()> {
        match self.orders.remove(order_id) {
            Some(_) => {
                info!("[Paper] cancelled {order_id}");
                Ok(())
            }
            None => Err(AppError::OrderNotFound(order_id.to_string())),
        }
    }

    async fn cancel_all(&self) -> Result<usize> {
        let ids: Vec<OrderId> = self.orders.iter().map(|e| e.key().clone()).collect();
        let cancelled = ids.iter().filter(|id| self.orders.remove(*id).is_some()).count();
        info!("[Paper] cancelled {cancelled} open orders");
        Ok(cancelled)
    }

    fn venue_name(&self) -> &'static str {
        "paper"
    }
}
