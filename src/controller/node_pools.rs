//! Node-pool reconciliation
//!
//! Compares the live pool listing of a cluster against the desired
//! type → count map, issues the minimal set of pool mutations, and blocks until
//! every pool reports all of its nodes ready.

use std::collections::{BTreeMap, BTreeSet};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::poll::{poll_until, PollPolicy};
use crate::provider::types::{NodePool, NodePoolCreateOptions, NodePoolUpdateOptions};
use crate::provider::LinodeApi;
use crate::Error;

/// A remote pool scheduled for deletion
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolDeletion {
    /// Provider-assigned pool id
    pub pool_id: u64,
    /// Linode type of the pool
    pub pool_type: String,
}

/// A remote pool whose count differs from the desired count
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolResize {
    /// Provider-assigned pool id
    pub pool_id: u64,
    /// Linode type of the pool
    pub pool_type: String,
    /// Count reported by the API
    pub from: u32,
    /// Desired count
    pub to: u32,
}

impl PoolResize {
    /// True when the pool grows
    pub fn is_scale_up(&self) -> bool {
        self.to > self.from
    }
}

/// Mutations needed to bring the remote pools to the desired map
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodePoolDiff {
    /// Remote pools whose type is no longer desired
    pub to_delete: Vec<PoolDeletion>,
    /// Desired types with no remote pool
    pub to_create: Vec<NodePoolCreateOptions>,
    /// Remote pools with the wrong count
    pub to_resize: Vec<PoolResize>,
}

impl NodePoolDiff {
    /// True when the remote pools already match
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_create.is_empty() && self.to_resize.is_empty()
    }
}

/// Compute the pool mutations for `desired` against the `remote` listing.
///
/// Only the first remote pool of each type is matched against the desired
/// count. Further pools of an already matched type are left alone.
pub fn diff_node_pools(remote: &[NodePool], desired: &BTreeMap<String, u32>) -> NodePoolDiff {
    let mut diff = NodePoolDiff::default();
    let mut seen: BTreeSet<&str> = BTreeSet::new();

    for pool in remote {
        let Some(&want) = desired.get(&pool.pool_type) else {
            diff.to_delete.push(PoolDeletion {
                pool_id: pool.id,
                pool_type: pool.pool_type.clone(),
            });
            continue;
        };
        if !seen.insert(pool.pool_type.as_str()) {
            continue;
        }
        if pool.count != want {
            diff.to_resize.push(PoolResize {
                pool_id: pool.id,
                pool_type: pool.pool_type.clone(),
                from: pool.count,
                to: want,
            });
        }
    }

    for (pool_type, &count) in desired {
        if !seen.contains(pool_type.as_str()) {
            diff.to_create.push(NodePoolCreateOptions {
                pool_type: pool_type.clone(),
                count,
            });
        }
    }

    diff
}

/// Issue the mutations of `diff` in order: deletes, creates, resizes.
///
/// Stops at the first failure; mutations already issued are not rolled back.
pub async fn apply_node_pool_diff(
    api: &dyn LinodeApi,
    cluster_id: u64,
    diff: &NodePoolDiff,
) -> Result<(), Error> {
    for pool in &diff.to_delete {
        info!(cluster_id, pool_id = pool.pool_id, pool_type = %pool.pool_type, "deleting node pool");
        api.delete_node_pool(cluster_id, pool.pool_id)
            .await
            .map_err(|e| {
                Error::linode(
                    format!(
                        "deleting node pool {} ({}) of cluster {}",
                        pool.pool_id, pool.pool_type, cluster_id
                    ),
                    e,
                )
            })?;
    }

    for opts in &diff.to_create {
        info!(cluster_id, pool_type = %opts.pool_type, count = opts.count, "creating node pool");
        api.create_node_pool(cluster_id, opts).await.map_err(|e| {
            Error::linode(
                format!(
                    "creating node pool {} in cluster {}",
                    opts.pool_type, cluster_id
                ),
                e,
            )
        })?;
    }

    for resize in &diff.to_resize {
        info!(
            cluster_id,
            pool_id = resize.pool_id,
            pool_type = %resize.pool_type,
            from = resize.from,
            to = resize.to,
            "resizing node pool"
        );
        api.update_node_pool(
            cluster_id,
            resize.pool_id,
            &NodePoolUpdateOptions { count: resize.to },
        )
        .await
        .map_err(|e| {
            Error::linode(
                format!(
                    "resizing node pool {} ({}) of cluster {}",
                    resize.pool_id, resize.pool_type, cluster_id
                ),
                e,
            )
        })?;
    }

    Ok(())
}

/// List every pool of a cluster
pub async fn list_node_pools(api: &dyn LinodeApi, cluster_id: u64) -> Result<Vec<NodePool>, Error> {
    api.list_node_pools(cluster_id)
        .await
        .map_err(|e| Error::linode(format!("listing node pools of cluster {}", cluster_id), e))
}

/// Block until every node of the pool reports ready
///
/// The pool is re-fetched on every tick.
pub async fn wait_until_pool_ready(
    api: &dyn LinodeApi,
    cluster_id: u64,
    pool_id: u64,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let operation = format!("node pool {} of cluster {} to become ready", pool_id, cluster_id);
    poll_until(policy, cancel, &operation, move || async move {
        let pool = api.get_node_pool(cluster_id, pool_id).await.map_err(|e| {
            Error::linode(
                format!("getting node pool {} of cluster {}", pool_id, cluster_id),
                e,
            )
        })?;
        Ok(pool.is_ready())
    })
    .await
}

/// Converge the pools of `cluster_id` to `desired` and wait for readiness.
///
/// Returns the type → total count map observed after all mutations, which is
/// what the caller should persist.
#[instrument(skip(api, desired, policy, cancel))]
pub async fn reconcile_node_pools(
    api: &dyn LinodeApi,
    cluster_id: u64,
    desired: &BTreeMap<String, u32>,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<BTreeMap<String, u32>, Error> {
    let remote = list_node_pools(api, cluster_id).await?;
    let diff = diff_node_pools(&remote, desired);

    if diff.is_empty() {
        debug!("node pools already match");
    } else {
        info!(
            deletes = diff.to_delete.len(),
            creates = diff.to_create.len(),
            resizes = diff.to_resize.len(),
            "applying node pool changes"
        );
        apply_node_pool_diff(api, cluster_id, &diff).await?;
    }

    let pools = list_node_pools(api, cluster_id).await?;
    for pool in &pools {
        wait_until_pool_ready(api, cluster_id, pool.id, policy, cancel).await?;
    }

    Ok(observed_counts(&pools))
}

/// Sum of pool counts per pool type
pub fn observed_counts(pools: &[NodePool]) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for pool in pools {
        *counts.entry(pool.pool_type.clone()).or_insert(0u32) += pool.count;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::{NodeStatus, PoolNode};
    use crate::provider::{LinodeError, MockLinodeApi};
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::time::Duration;

    fn pool(id: u64, pool_type: &str, count: u32) -> NodePool {
        pool_with_status(id, pool_type, count, NodeStatus::Ready)
    }

    fn pool_with_status(id: u64, pool_type: &str, count: u32, status: NodeStatus) -> NodePool {
        NodePool {
            id,
            pool_type: pool_type.to_string(),
            count,
            nodes: (0..count)
                .map(|i| PoolNode {
                    id: format!("{}-{}", id, i),
                    instance_id: Some(u64::from(i) + 1000),
                    status: status.clone(),
                })
                .collect(),
        }
    }

    fn desired(entries: &[(&str, u32)]) -> BTreeMap<String, u32> {
        entries
            .iter()
            .map(|(t, c)| (t.to_string(), *c))
            .collect()
    }

    fn policy() -> PollPolicy {
        PollPolicy::unbounded(Duration::from_secs(5))
    }

    #[test]
    fn diff_deletes_removed_types_and_creates_new_ones() {
        let remote = vec![pool(1, "a", 2), pool(2, "b", 3)];
        let diff = diff_node_pools(&remote, &desired(&[("a", 2), ("c", 1)]));

        assert_eq!(
            diff.to_delete,
            vec![PoolDeletion {
                pool_id: 2,
                pool_type: "b".to_string()
            }]
        );
        assert_eq!(
            diff.to_create,
            vec![NodePoolCreateOptions {
                pool_type: "c".to_string(),
                count: 1
            }]
        );
        assert!(diff.to_resize.is_empty());
    }

    #[test]
    fn diff_resizes_changed_counts() {
        let diff = diff_node_pools(&[pool(1, "a", 2)], &desired(&[("a", 5)]));

        assert!(diff.to_delete.is_empty());
        assert!(diff.to_create.is_empty());
        assert_eq!(
            diff.to_resize,
            vec![PoolResize {
                pool_id: 1,
                pool_type: "a".to_string(),
                from: 2,
                to: 5
            }]
        );
        assert!(diff.to_resize[0].is_scale_up());
    }

    #[test]
    fn diff_is_empty_when_converged() {
        let remote = vec![pool(1, "a", 2), pool(2, "b", 1)];
        assert!(diff_node_pools(&remote, &desired(&[("a", 2), ("b", 1)])).is_empty());
    }

    #[test]
    fn duplicate_pools_of_a_type_are_left_alone() {
        let remote = vec![pool(1, "a", 2), pool(2, "a", 7)];
        let diff = diff_node_pools(&remote, &desired(&[("a", 2)]));
        assert!(diff.is_empty());

        let diff = diff_node_pools(&remote, &desired(&[("a", 3)]));
        assert_eq!(diff.to_resize.len(), 1);
        assert_eq!(diff.to_resize[0].pool_id, 1);
    }

    #[test]
    fn every_remote_type_lands_in_exactly_one_bucket() {
        let remote = vec![pool(1, "a", 1), pool(2, "b", 2), pool(3, "c", 3)];
        let want = desired(&[("a", 1), ("b", 4), ("d", 2)]);
        let diff = diff_node_pools(&remote, &want);

        let deleted: BTreeSet<_> = diff.to_delete.iter().map(|d| d.pool_type.as_str()).collect();
        let resized: BTreeSet<_> = diff.to_resize.iter().map(|r| r.pool_type.as_str()).collect();
        let created: BTreeSet<_> = diff.to_create.iter().map(|c| c.pool_type.as_str()).collect();

        assert_eq!(deleted, BTreeSet::from(["c"]));
        assert_eq!(resized, BTreeSet::from(["b"]));
        assert_eq!(created, BTreeSet::from(["d"]));
    }

    #[test]
    fn observed_counts_sum_pools_of_the_same_type() {
        let counts = observed_counts(&[pool(1, "a", 2), pool(2, "a", 1), pool(3, "b", 4)]);
        assert_eq!(counts, desired(&[("a", 3), ("b", 4)]));
    }

    #[tokio::test]
    async fn apply_issues_deletes_then_creates_then_resizes() {
        let mut api = MockLinodeApi::new();
        let mut seq = Sequence::new();

        api.expect_delete_node_pool()
            .with(eq(10), eq(2))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        api.expect_create_node_pool()
            .withf(|id, opts| *id == 10 && opts.pool_type == "c" && opts.count == 1)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, opts| Ok(pool(3, &opts.pool_type, opts.count)));
        api.expect_update_node_pool()
            .withf(|id, pool_id, opts| *id == 10 && *pool_id == 1 && opts.count == 4)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, pool_id, opts| Ok(pool(pool_id, "a", opts.count)));

        let diff = diff_node_pools(
            &[pool(1, "a", 2), pool(2, "b", 3)],
            &desired(&[("a", 4), ("c", 1)]),
        );
        apply_node_pool_diff(&api, 10, &diff).await.unwrap();
    }

    #[tokio::test]
    async fn apply_stops_at_first_failure_with_pool_context() {
        let mut api = MockLinodeApi::new();
        api.expect_delete_node_pool().times(1).returning(|_, _| {
            Err(LinodeError::Api {
                status: 400,
                reasons: vec!["cannot delete last pool".to_string()],
            })
        });
        api.expect_create_node_pool().never();
        api.expect_update_node_pool().never();

        let diff = diff_node_pools(
            &[pool(1, "a", 2), pool(2, "b", 3)],
            &desired(&[("a", 4), ("c", 1)]),
        );
        let err = apply_node_pool_diff(&api, 10, &diff).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("node pool 2"));
        assert!(msg.contains("cluster 10"));
    }

    #[tokio::test]
    async fn failed_create_after_successful_delete_stops_the_pass() {
        let mut api = MockLinodeApi::new();
        api.expect_list_node_pools()
            .times(1)
            .returning(|_| Ok(vec![pool(1, "a", 2), pool(2, "b", 3)]));
        api.expect_delete_node_pool()
            .with(eq(10), eq(2))
            .times(1)
            .returning(|_, _| Ok(()));
        api.expect_create_node_pool().times(1).returning(|_, _| {
            Err(LinodeError::Api {
                status: 400,
                reasons: vec!["type: invalid Linode type".to_string()],
            })
        });
        api.expect_update_node_pool().never();
        api.expect_get_node_pool().never();

        let err = reconcile_node_pools(
            &api,
            10,
            &desired(&[("a", 4), ("c", 1)]),
            &policy(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("creating node pool c"), "{}", msg);
        assert!(msg.contains("cluster 10"));
        assert!(msg.contains("invalid Linode type"));
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_waits_for_every_pool_and_returns_observed_counts() {
        let mut api = MockLinodeApi::new();
        let mut seq = Sequence::new();

        api.expect_list_node_pools()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![pool(1, "a", 2)]));
        api.expect_update_node_pool()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, opts| Ok(pool(1, "a", opts.count)));
        api.expect_list_node_pools()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![pool_with_status(1, "a", 5, NodeStatus::NotReady)]));

        let mut polls = 0;
        api.expect_get_node_pool()
            .with(eq(7), eq(1))
            .times(3)
            .returning(move |_, _| {
                polls += 1;
                if polls < 3 {
                    Ok(pool_with_status(1, "a", 5, NodeStatus::NotReady))
                } else {
                    Ok(pool(1, "a", 5))
                }
            });

        let observed = reconcile_node_pools(
            &api,
            7,
            &desired(&[("a", 5)]),
            &policy(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(observed, desired(&[("a", 5)]));
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_with_no_changes_issues_no_mutations() {
        let mut api = MockLinodeApi::new();
        api.expect_list_node_pools()
            .times(2)
            .returning(|_| Ok(vec![pool(1, "a", 2)]));
        api.expect_get_node_pool()
            .times(1)
            .returning(|_, _| Ok(pool(1, "a", 2)));
        api.expect_delete_node_pool().never();
        api.expect_create_node_pool().never();
        api.expect_update_node_pool().never();

        let observed = reconcile_node_pools(
            &api,
            7,
            &desired(&[("a", 2)]),
            &policy(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(observed["a"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pool_wait_retries_transient_errors() {
        let mut api = MockLinodeApi::new();
        let mut calls = 0;
        api.expect_get_node_pool().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Err(LinodeError::Api {
                    status: 502,
                    reasons: vec![],
                })
            } else {
                Ok(pool(4, "a", 1))
            }
        });

        wait_until_pool_ready(&api, 1, 4, &policy(), &CancellationToken::new())
            .await
            .unwrap();
    }
}
