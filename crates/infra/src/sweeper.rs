//! Reservation expiry sweeper.
//!
//! A background pass that finds overdue active holds and expires them,
//! returning their quantity to available. Expiry is cooperative: holds stay
//! confirmable only until either the sweeper or a lazy check at confirm time
//! gets to them, and the store's status compare-and-swap makes a sweep racing
//! a confirm/release a no-op on the losing side.

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::store::StockLedger;

/// Sweeper configuration.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often to look for overdue holds
    pub poll_interval: Duration,
    /// Maximum holds expired per pass
    pub batch_size: usize,
    /// Name for logging
    pub name: String,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            batch_size: 100,
            name: "reservation-sweeper".to_string(),
        }
    }
}

impl SweeperConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Sweeper runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SweeperStats {
    pub passes: u64,
    pub reservations_expired: u64,
    pub errors: u64,
    pub uptime_secs: u64,
}

/// Handle to control a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<SweeperStats>>,
}

impl SweeperHandle {
    /// Request graceful shutdown.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    /// Get current sweeper statistics.
    pub fn stats(&self) -> SweeperStats {
        self.stats.lock().unwrap().clone()
    }
}

/// Background reservation sweeper.
///
/// Polls the ledger for overdue active holds and expires them in batches.
pub struct ReservationSweeper<S: StockLedger> {
    ledger: S,
    config: SweeperConfig,
}

impl<S: StockLedger + 'static> ReservationSweeper<S> {
    pub fn new(ledger: S) -> Self {
        Self {
            ledger,
            config: SweeperConfig::default(),
        }
    }

    pub fn with_config(ledger: S, config: SweeperConfig) -> Self {
        Self { ledger, config }
    }

    /// Start the sweeper on its own thread.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(SweeperStats::default()));
        let thread_stats = stats.clone();

        let join = thread::spawn(move || {
            let started = Instant::now();
            info!(name = %self.config.name, "reservation sweeper started");

            loop {
                match shutdown_rx.recv_timeout(self.config.poll_interval) {
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                }

                match self.ledger.sweep_expired(Utc::now(), self.config.batch_size) {
                    Ok(expired) => {
                        if let Ok(mut s) = thread_stats.lock() {
                            s.passes += 1;
                            s.reservations_expired += expired.len() as u64;
                            s.uptime_secs = started.elapsed().as_secs();
                        }
                        if expired.is_empty() {
                            debug!(name = %self.config.name, "sweep pass found nothing overdue");
                        } else {
                            info!(
                                name = %self.config.name,
                                count = expired.len(),
                                "expired overdue reservations"
                            );
                        }
                    }
                    Err(e) => {
                        if let Ok(mut s) = thread_stats.lock() {
                            s.passes += 1;
                            s.errors += 1;
                            s.uptime_secs = started.elapsed().as_secs();
                        }
                        warn!(name = %self.config.name, error = %e, "reservation sweep failed");
                    }
                }
            }

            info!(name = %self.config.name, "reservation sweeper stopped");
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use stockforge_core::{ActorId, Money, ProductId, Quantity, TenantId};
    use stockforge_ledger::{ApplyMovement, MovementKind, MovementReference, ReferenceKind, StockKey};
    use stockforge_reservations::ReserveStock;
    use uuid::Uuid;

    use crate::store::InMemoryStockLedger;

    #[test]
    fn sweeper_expires_overdue_holds_in_the_background() {
        let ledger = Arc::new(InMemoryStockLedger::new());
        let tenant = TenantId::new();
        let key = StockKey::product(ProductId::new());

        ledger
            .apply_movement(ApplyMovement {
                tenant_id: tenant,
                key: key.clone(),
                kind: MovementKind::Purchase,
                quantity: Quantity::from(5),
                unit_cost: Some(Money::parse("2.00").unwrap()),
                reference: MovementReference::new(ReferenceKind::Purchase, Uuid::now_v7()),
                actor_id: ActorId::new(),
                occurred_at: Utc::now(),
            })
            .unwrap();

        ledger
            .reserve(ReserveStock {
                tenant_id: tenant,
                key: key.clone(),
                quantity: Quantity::from(3),
                reference: MovementReference::new(ReferenceKind::Sale, Uuid::now_v7()),
                ttl: StdDuration::from_millis(10),
                occurred_at: Utc::now(),
            })
            .unwrap();

        let config = SweeperConfig::default()
            .with_poll_interval(StdDuration::from_millis(20))
            .with_batch_size(10);
        let handle = ReservationSweeper::with_config(ledger.clone(), config).spawn();

        // Give the sweeper a few passes to notice the overdue hold.
        thread::sleep(StdDuration::from_millis(300));

        let record = ledger.current_stock(tenant, &key).unwrap().unwrap();
        assert_eq!(record.available_quantity, Quantity::from(5));
        assert_eq!(record.reserved_quantity, Quantity::ZERO);

        let stats = handle.stats();
        assert!(stats.passes >= 1);
        assert_eq!(stats.reservations_expired, 1);
        assert_eq!(stats.errors, 0);

        handle.shutdown();
    }
}
