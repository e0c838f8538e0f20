use crate::matches::service::PvpService;
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Periodically closes overdue async matches until the service is dropped.
///
/// Returns `None` when `interval` is zero; expiry then only happens lazily on access.
pub fn spawn_expiry_ticker(service: &Arc<PvpService>, interval: Duration) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        info!("Async expiry sweep disabled");
        return None;
    }

    let service_ref = Arc::downgrade(service);

    Some(tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            match service_ref.upgrade() {
                None => break,
                Some(service) => tick(&service),
            }
        }

        debug!("Expiry ticker stopped");
    }))
}

fn tick(service: &PvpService) {
    match service.expire_overdue() {
        Ok(0) => debug!("Expiry sweep found nothing overdue"),
        Ok(closed) => info!("Expiry sweep closed {} async matches", closed),
        Err(err) => error!("Expiry sweep failed: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::ids::ChallengeId;
    use crate::matches::match_types::{AsyncMatch, AsyncMatchStatus};
    use crate::matches::service::test_support::{harness, player};
    use crate::store::paths;

    #[tokio::test]
    async fn test_ticker_sweeps_and_stops_with_service() {
        let h = harness();
        let now = h.clock.now();
        let overdue = AsyncMatch::from_challenge(
            ChallengeId::new(),
            &player("alice"),
            &player("bob"),
            Vec::new(),
            now - chrono::Duration::hours(50),
            now - chrono::Duration::hours(2),
        );
        h.service
            .store()
            .set(&paths::async_match(&overdue.id), &overdue)
            .unwrap();
        let store = h.service.store().clone();

        let handle = spawn_expiry_ticker(&h.service, Duration::from_millis(10)).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let swept: AsyncMatch = store.get(&paths::async_match(&overdue.id)).unwrap().unwrap();
        assert_eq!(swept.status, AsyncMatchStatus::Expired);

        drop(h);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_disables_ticker() {
        let h = harness();

        assert!(spawn_expiry_ticker(&h.service, Duration::ZERO).is_none());
    }
}
