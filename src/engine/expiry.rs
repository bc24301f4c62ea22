use async_channel::{Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::Engine;
use crate::error::Error;

impl Engine {
    /// Ids of `Pending` bookings that have waited out the timeout as of now.
    pub async fn stale_booking_ids(&self) -> Result<Vec<Uuid>, Error> {
        let cutoff = self.now() - self.config.pending_timeout;

        let bookings = self.store.list_pending_since(cutoff).await?;

        Ok(bookings.into_iter().map(|booking| booking.id).collect())
    }
}

/// Periodically expires stale requests so they drop out of driver searches even when nobody
/// touches them. Reads already expire lazily; this only bounds how long that can take.
pub struct ExpirySweeper {
    engine: Arc<Engine>,
    interval: Duration,
    workers: usize,
}

impl ExpirySweeper {
    pub fn new(engine: Arc<Engine>, interval: Duration, workers: usize) -> Self {
        Self {
            engine,
            interval,
            workers: workers.max(1),
        }
    }

    /// Expires every stale booking once and returns how many this pass moved to `Expired`.
    #[tracing::instrument(name = "ExpirySweeper::sweep_once", skip(self))]
    pub async fn sweep_once(&self) -> Result<usize, Error> {
        let ids = self.engine.stale_booking_ids().await?;

        if ids.is_empty() {
            return Ok(0);
        }

        let (tx, rx): (Sender<Uuid>, Receiver<Uuid>) = async_channel::unbounded();

        let mut handles = vec![];
        for _ in 0..self.workers.min(ids.len()) {
            let rx = rx.clone();
            let engine = self.engine.clone();

            let handle: JoinHandle<usize> = tokio::spawn(async move {
                let mut expired = 0;

                while let Ok(id) = rx.recv().await {
                    match engine.expire(id).await {
                        Ok(Some(_)) => expired += 1,
                        Ok(None) => {}
                        Err(err) => tracing::warn!(booking_id = %id, "failed to expire: {}", err),
                    }
                }

                expired
            });

            handles.push(handle);
        }

        for id in ids {
            // receivers only go away once the channel is closed below
            if tx.send(id).await.is_err() {
                break;
            }
        }
        tx.close();

        let mut total = 0;
        for result in futures::future::join_all(handles).await {
            match result {
                Ok(expired) => total += expired,
                Err(err) => tracing::error!("expiry worker failed: {}", err),
            }
        }

        if total > 0 {
            tracing::info!("expired {} bookings", total);
        }

        Ok(total)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);

            loop {
                ticker.tick().await;

                if let Err(err) = self.sweep_once().await {
                    tracing::warn!("expiry sweep failed: {}", err);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{engine, open_booking};
    use super::super::DriverResponse;
    use super::*;
    use crate::entities::{EventKind, Status};
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn sweep_expires_only_stale_pending_bookings() {
        let (engine, clock) = engine();

        let mut stale = vec![];
        for _ in 0..5 {
            stale.push(open_booking(&engine).await);
        }

        let claimed = open_booking(&engine).await;
        engine
            .driver_respond(
                Uuid::new_v4(),
                claimed.id,
                DriverResponse {
                    accept: true,
                    counter_offer: None,
                    message: None,
                },
            )
            .await
            .unwrap();

        clock.advance(ChronoDuration::minutes(20));
        let fresh = open_booking(&engine).await;
        clock.advance(ChronoDuration::minutes(10));

        let mut events = engine.subscribe();
        let sweeper = ExpirySweeper::new(engine.clone(), Duration::from_secs(60), 3);

        assert_eq!(sweeper.sweep_once().await.unwrap(), 5);

        for booking in &stale {
            let stored = engine.find_booking(booking.id).await.unwrap();
            assert_eq!(stored.status, Status::Expired);
            assert_eq!(events.try_recv().unwrap().kind, EventKind::Expired);
        }

        assert_eq!(
            engine.find_booking(claimed.id).await.unwrap().status,
            Status::Accepted
        );
        assert!(engine.find_booking(fresh.id).await.unwrap().is_pending());

        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sweep_with_nothing_to_do() {
        let (engine, _) = engine();
        open_booking(&engine).await;

        let sweeper = ExpirySweeper::new(engine, Duration::from_secs(60), 0);

        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }
}
