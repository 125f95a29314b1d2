//! Follower evolution against the last recorded observation.

use tracing::warn;

use crate::models::Observation;
use crate::store::ObservationStore;

/// Delta between `new_followers` and the latest prior observation in `history`.
///
/// "Latest" is the maximum `date`; among equal dates the last one in `history` wins,
/// which is the last one inserted. A previous count of zero or less (including the
/// unparsed marker) gives no evolution.
pub fn evolution_from_history(history: &[Observation], new_followers: i64) -> Option<i64> {
    let previous = history.iter().max_by_key(|o| o.date)?;
    if previous.followers <= 0 {
        return None;
    }
    Some(new_followers - previous.followers)
}

/// Look up the prior observations for `(account, identity)` and compute the evolution.
///
/// A store failure is logged and treated as "no prior observation".
///
/// The read and the caller's later append are not atomic. Two submissions for the same
/// pair running at once can both measure against the same previous observation; that
/// stale read is accepted and not locked against.
pub async fn reconcile(
    store: &dyn ObservationStore,
    account: &str,
    identity: &str,
    new_followers: i64,
) -> Option<i64> {
    match store.query_by_identity(account, identity).await {
        Ok(history) => evolution_from_history(&history, new_followers),
        Err(e) => {
            warn!(
                account = %account,
                identity = %identity,
                store = store.name(),
                error = %e,
                "History lookup failed, evolution unknown"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AudienceError;
    use crate::models::Platform;
    use crate::store::InMemoryObservationStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn obs(date: NaiveDate, followers: i64) -> Observation {
        Observation::new(date, "Lea", Platform::TikTok, "@brand", followers, None)
    }

    struct BrokenStore;

    #[async_trait]
    impl ObservationStore for BrokenStore {
        async fn append(&self, _observation: &Observation) -> Result<(), AudienceError> {
            Err(AudienceError::StoreUnavailable("down".into()))
        }

        async fn query_by_identity(
            &self,
            _account: &str,
            _identity: &str,
        ) -> Result<Vec<Observation>, AudienceError> {
            Err(AudienceError::StoreUnavailable("down".into()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    #[test]
    fn test_growth_against_previous() {
        assert_eq!(evolution_from_history(&[obs(day(1), 500)], 600), Some(100));
    }

    #[test]
    fn test_loss_is_negative() {
        assert_eq!(evolution_from_history(&[obs(day(1), 500)], 450), Some(-50));
    }

    #[test]
    fn test_no_history_is_unknown_not_zero() {
        assert_eq!(evolution_from_history(&[], 600), None);
    }

    #[test]
    fn test_non_positive_previous_is_unknown() {
        assert_eq!(evolution_from_history(&[obs(day(1), 0)], 600), None);
        assert_eq!(evolution_from_history(&[obs(day(1), -1)], 600), None);
    }

    #[test]
    fn test_latest_date_wins_regardless_of_order() {
        let history = vec![obs(day(9), 900), obs(day(3), 300)];
        assert_eq!(evolution_from_history(&history, 1000), Some(100));
    }

    #[test]
    fn test_same_date_last_insert_wins() {
        let history = vec![obs(day(4), 400), obs(day(4), 450)];
        assert_eq!(evolution_from_history(&history, 500), Some(50));
    }

    #[tokio::test]
    async fn test_reconcile_reads_matching_pair_only() {
        let store = InMemoryObservationStore::with_observations(vec![
            obs(day(1), 500),
            Observation::new(day(2), "Other", Platform::TikTok, "@brand", 9000, None),
        ]);
        assert_eq!(reconcile(&store, "@brand", "Lea", 600).await, Some(100));
        assert_eq!(reconcile(&store, "@brand", "Nobody", 600).await, None);
    }

    #[tokio::test]
    async fn test_concurrent_reads_share_previous_snapshot() {
        let store = InMemoryObservationStore::with_observations(vec![obs(day(1), 500)]);

        let (first, second) = tokio::join!(
            reconcile(&store, "@brand", "Lea", 600),
            reconcile(&store, "@brand", "Lea", 700),
        );
        store.append(&obs(day(2), 600)).await.unwrap();
        store.append(&obs(day(2), 700)).await.unwrap();

        assert_eq!(first, Some(100));
        assert_eq!(second, Some(200));
    }

    #[tokio::test]
    async fn test_store_failure_is_unknown() {
        assert_eq!(reconcile(&BrokenStore, "@brand", "Lea", 600).await, None);
    }
}
