use futures::future::try_join_all;
use tally_core::{Address, BlockHeight, Snapshots};
use tally_sidecar::{SidecarApi, SidecarResult};
use tracing::warn;

/// Fetch the balances of every address at `at`, concurrently.
///
/// An address the sidecar reports as not found is left out of the returned
/// map so the comparator can flag it. Any other failure fails the whole batch.
pub async fn fetch_snapshots(
    api: &dyn SidecarApi,
    addresses: &[Address],
    at: BlockHeight,
) -> SidecarResult<Snapshots> {
    let fetches = addresses.iter().map(|address| async move {
        match api.balance_info(address, Some(at)).await {
            Ok(info) => Ok(Some(info.into_snapshot(address.clone()))),
            Err(err) if err.is_not_found() => {
                warn!(%address, height = %at, "sidecar has no balance snapshot for account");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    });
    let snapshots = try_join_all(fetches).await?;
    Ok(snapshots
        .into_iter()
        .flatten()
        .map(|snapshot| (snapshot.address.clone(), snapshot))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemorySidecar;
    use tally_core::Amount;

    #[tokio::test]
    async fn collects_found_accounts_and_omits_missing_ones() {
        let sidecar = InMemorySidecar::default()
            .with_balance("alice", 4, "100")
            .with_balance("bob", 4, "7");
        let addresses = vec![
            Address::from("alice"),
            Address::from("ghost"),
            Address::from("bob"),
        ];
        let snapshots = fetch_snapshots(&sidecar, &addresses, BlockHeight::new(4))
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[&Address::from("alice")].free, Amount::from(100u64));
        assert_eq!(snapshots[&Address::from("bob")].free, Amount::from(7u64));
        assert!(!snapshots.contains_key(&Address::from("ghost")));
    }

    #[tokio::test]
    async fn any_transport_failure_fails_the_batch() {
        let sidecar = InMemorySidecar::default()
            .with_balance("alice", 4, "100")
            .with_broken_account("bob");
        let addresses = vec![Address::from("alice"), Address::from("bob")];
        let err = fetch_snapshots(&sidecar, &addresses, BlockHeight::new(4))
            .await
            .unwrap_err();
        assert!(!err.is_not_found());
    }
}
