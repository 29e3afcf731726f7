//! Cluster Module Tests
//!
//! Exercises the coordination-store CAS semantics, lease acquisition and
//! takeover, the leader's fan-out round, and the follower tick, all over
//! the in-memory store.

#[cfg(test)]
mod tests {
    use crate::cluster::distributor::TaskDistributor;
    use crate::cluster::election::{LeaderElection, LeaseConfig};
    use crate::cluster::store::{CoordinationStore, MemoryStore};
    use crate::cluster::types::{
        lease_name, ClaimRecord, DistributedTask, LeaseState, ReplicaInfo,
        ASSIGNED_TO_LABEL, IN_PROGRESS_ANNOTATION, PROCESSED_ANNOTATION,
        PROCESSED_AT_ANNOTATION, PROCESSED_BY_ANNOTATION, TASK_DATA_ANNOTATION,
    };
    use crate::cluster::worker::TaskWorker;
    use crate::config::{Config, Context};
    use crate::notify::LogNotifier;
    use crate::pipeline::types::{WorkItem, WorkKind};

    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_context() -> Arc<Context> {
        let mut config = Config::default();
        config.apply_defaults();
        Context::new(&config, Arc::new(LogNotifier)).unwrap()
    }

    fn running_replica(name: &str) -> ReplicaInfo {
        let mut labels = BTreeMap::new();
        labels.insert("project".to_string(), "mcall".to_string());
        ReplicaInfo {
            name: name.to_string(),
            phase: "Running".to_string(),
            labels,
        }
    }

    fn short_lease() -> LeaseConfig {
        LeaseConfig {
            lease_duration: Duration::from_secs(0),
            renew_deadline: Duration::from_millis(100),
            retry_period: Duration::from_millis(20),
        }
    }

    // ============================================================
    // Store CAS semantics
    // ============================================================

    #[tokio::test]
    async fn test_lease_create_is_exclusive() {
        let store = MemoryStore::new();
        let lease = LeaseState::new("replica-a", 15, Utc::now());

        assert!(store.create_lease("lock", &lease).await.unwrap());
        assert!(!store.create_lease("lock", &lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_lease_update_rejects_stale_version() {
        let store = MemoryStore::new();
        let lease = LeaseState::new("replica-a", 15, Utc::now());
        store.create_lease("lock", &lease).await.unwrap();

        let current = store.get_lease("lock").await.unwrap().unwrap();
        let stale = "not-the-version";
        assert!(!store.update_lease("lock", &current, stale).await.unwrap());
        assert!(store
            .update_lease("lock", &current, &current.resource_version)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_claim_update_cas() {
        let store = MemoryStore::new();
        let task = DistributedTask {
            id: "task-1".to_string(),
            item: WorkItem::command("echo x"),
        };
        let claim = ClaimRecord::for_task("f1", &task, Utc::now()).unwrap();
        store.create_claim(&claim).await.unwrap();

        let stored = store
            .list_claims("project=mcall,task=true")
            .await
            .unwrap()
            .pop()
            .unwrap();

        // first CAS wins, replay with the old version loses
        let mut updated = stored.clone();
        updated
            .annotations
            .insert(IN_PROGRESS_ANNOTATION.to_string(), "true".to_string());
        assert!(store
            .update_claim(&updated, &stored.resource_version)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .update_claim(&updated, &stored.resource_version)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_claim_create_fails() {
        let store = MemoryStore::new();
        let task = DistributedTask {
            id: "task-1".to_string(),
            item: WorkItem::command("echo x"),
        };
        let now = Utc::now();
        let claim = ClaimRecord::for_task("f1", &task, now).unwrap();

        store.create_claim(&claim).await.unwrap();
        assert!(store.create_claim(&claim).await.is_err());
    }

    // ============================================================
    // Task-data round trip
    // ============================================================

    #[test]
    fn test_distributed_task_round_trip() {
        let mut item = WorkItem::command("echo hello");
        item.expect = "hello".to_string();
        item.notify = vec!["ops".to_string()];
        let task = DistributedTask {
            id: "task-3".to_string(),
            item,
        };

        let json = serde_json::to_string(&task).unwrap();
        let restored: DistributedTask = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, task);
    }

    #[test]
    fn test_lease_name_from_branch_env() {
        std::env::remove_var("GIT_BRANCH");
        std::env::remove_var("GIT-BRANCH");
        assert_eq!(lease_name(), "mcall-leader");

        std::env::set_var("GIT_BRANCH", "feature_x");
        assert_eq!(lease_name(), "mcall-leader-feature-x");
        std::env::remove_var("GIT_BRANCH");
    }

    // ============================================================
    // Leader election
    // ============================================================

    #[tokio::test]
    async fn test_only_one_replica_acquires_the_lease() {
        let store = MemoryStore::new();
        let config = LeaseConfig::default();
        let a = LeaderElection::new(
            store.clone(),
            "lock".to_string(),
            "replica-a".to_string(),
            config,
        );
        let b = LeaderElection::new(
            store.clone(),
            "lock".to_string(),
            "replica-b".to_string(),
            config,
        );

        assert!(a.try_acquire().await.unwrap());
        assert!(!b.try_acquire().await.unwrap());

        let lease = store.get_lease("lock").await.unwrap().unwrap();
        assert_eq!(lease.holder, "replica-a");
        assert_eq!(lease.acquire_seq, 1);
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over_with_bumped_seq() {
        let store = MemoryStore::new();
        let a = LeaderElection::new(
            store.clone(),
            "lock".to_string(),
            "replica-a".to_string(),
            short_lease(),
        );
        let b = LeaderElection::new(
            store.clone(),
            "lock".to_string(),
            "replica-b".to_string(),
            short_lease(),
        );

        assert!(a.try_acquire().await.unwrap());
        // zero-second lease: expired as soon as the clock moves
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(b.try_acquire().await.unwrap());

        let lease = store.get_lease("lock").await.unwrap().unwrap();
        assert_eq!(lease.holder, "replica-b");
        assert_eq!(lease.acquire_seq, 2);
    }

    #[tokio::test]
    async fn test_election_loop_publishes_leadership() {
        let store = MemoryStore::new();
        let election = LeaderElection::new(
            store.clone(),
            "lock".to_string(),
            "replica-a".to_string(),
            short_lease(),
        );
        let mut is_leader = election.subscribe();
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let handle = tokio::spawn(election.run(shutdown_rx));

        tokio::time::timeout(Duration::from_secs(2), is_leader.wait_for(|leader| *leader))
            .await
            .expect("never became leader")
            .unwrap();

        shutdown_tx.send_replace(true);
        handle.await.unwrap();
    }

    // ============================================================
    // Distributed fan-out (leader round + follower ticks)
    // ============================================================

    fn three_task_descriptor() -> String {
        r#"{"inputs":[
            {"input":"echo t1","name":"first"},
            {"input":"echo t2","name":"second"},
            {"input":"echo t3","name":"third"}
        ]}"#
        .to_string()
    }

    #[tokio::test]
    async fn test_leader_round_assigns_tasks_round_robin() {
        let store = MemoryStore::new();
        for name in ["f1", "f2", "f3"] {
            store.register_replica(running_replica(name));
        }
        // the leader itself is not a follower
        store.register_replica(running_replica("leader-0"));

        let distributor = TaskDistributor::new(
            store.clone(),
            "leader-0".to_string(),
            three_task_descriptor(),
            WorkKind::Command,
            "batch".to_string(),
        );

        distributor.distribute_round().await.unwrap();

        let claims = store.list_claims("project=mcall,task=true").await.unwrap();
        assert_eq!(claims.len(), 3);

        let mut assigned: Vec<(String, String)> = claims
            .iter()
            .map(|claim| {
                let task: DistributedTask =
                    serde_json::from_str(claim.annotation(TASK_DATA_ANNOTATION).unwrap()).unwrap();
                (
                    task.id,
                    claim.labels.get(ASSIGNED_TO_LABEL).unwrap().clone(),
                )
            })
            .collect();
        assigned.sort();

        assert_eq!(
            assigned,
            vec![
                ("task-1".to_string(), "f1".to_string()),
                ("task-2".to_string(), "f2".to_string()),
                ("task-3".to_string(), "f3".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_follower_ticks_process_their_claims() {
        let store = MemoryStore::new();
        for name in ["f1", "f2", "f3"] {
            store.register_replica(running_replica(name));
        }

        let distributor = TaskDistributor::new(
            store.clone(),
            "leader-0".to_string(),
            three_task_descriptor(),
            WorkKind::Command,
            "batch".to_string(),
        );
        distributor.distribute_round().await.unwrap();

        let ctx = test_context();
        for name in ["f1", "f2", "f3"] {
            let worker = TaskWorker::new(store.clone(), ctx.clone(), name.to_string());
            worker.process_assigned().await.unwrap();
        }

        let claims = store.list_claims("project=mcall,task=true").await.unwrap();
        assert_eq!(claims.len(), 3);
        for claim in claims {
            assert_eq!(claim.annotation(PROCESSED_ANNOTATION), Some("true"));
            assert_eq!(
                claim.annotation(PROCESSED_BY_ANNOTATION),
                claim.labels.get(ASSIGNED_TO_LABEL).map(String::as_str)
            );
            assert!(claim.processed_at().is_some());
        }
    }

    #[tokio::test]
    async fn test_round_without_followers_is_a_noop() {
        let store = MemoryStore::new();
        store.register_replica(running_replica("leader-0"));

        let distributor = TaskDistributor::new(
            store.clone(),
            "leader-0".to_string(),
            three_task_descriptor(),
            WorkKind::Command,
            "batch".to_string(),
        );
        distributor.distribute_round().await.unwrap();

        let claims = store.list_claims("project=mcall,task=true").await.unwrap();
        assert!(claims.is_empty());
    }

    #[tokio::test]
    async fn test_non_running_replicas_are_not_followers() {
        let store = MemoryStore::new();
        store.register_replica(running_replica("f1"));
        let mut pending = running_replica("f2");
        pending.phase = "Pending".to_string();
        store.register_replica(pending);

        let distributor = TaskDistributor::new(
            store.clone(),
            "leader-0".to_string(),
            three_task_descriptor(),
            WorkKind::Command,
            "batch".to_string(),
        );
        distributor.distribute_round().await.unwrap();

        let claims = store.list_claims("project=mcall,task=true").await.unwrap();
        assert!(!claims.is_empty());
        for claim in claims {
            assert_eq!(claim.labels.get(ASSIGNED_TO_LABEL).unwrap(), "f1");
        }
    }

    #[tokio::test]
    async fn test_follower_skips_in_progress_and_processed_claims() {
        let store = MemoryStore::new();
        let task = DistributedTask {
            id: "task-1".to_string(),
            item: WorkItem::command("echo once"),
        };

        let mut executing = ClaimRecord::for_task("f1", &task, Utc::now()).unwrap();
        executing
            .annotations
            .insert(IN_PROGRESS_ANNOTATION.to_string(), "true".to_string());
        store.create_claim(&executing).await.unwrap();

        let worker = TaskWorker::new(store.clone(), test_context(), "f1".to_string());
        worker.process_assigned().await.unwrap();

        let claims = store.list_claims("project=mcall,task=true").await.unwrap();
        // untouched: still in progress, not processed
        assert_eq!(claims[0].annotation(PROCESSED_ANNOTATION), None);
    }

    #[tokio::test]
    async fn test_follower_parks_poisoned_task_data() {
        let store = MemoryStore::new();
        let task = DistributedTask {
            id: "task-1".to_string(),
            item: WorkItem::command("echo x"),
        };
        let mut claim = ClaimRecord::for_task("f1", &task, Utc::now()).unwrap();
        claim
            .annotations
            .insert(TASK_DATA_ANNOTATION.to_string(), "{broken".to_string());
        store.create_claim(&claim).await.unwrap();

        let worker = TaskWorker::new(store.clone(), test_context(), "f1".to_string());
        worker.process_assigned().await.unwrap();

        let claims = store.list_claims("project=mcall,task=true").await.unwrap();
        assert_eq!(claims[0].annotation(PROCESSED_ANNOTATION), Some("true"));
    }

    // ============================================================
    // Claim retention
    // ============================================================

    #[tokio::test]
    async fn test_round_reaps_old_processed_claims() {
        let store = MemoryStore::new();
        let task = DistributedTask {
            id: "task-1".to_string(),
            item: WorkItem::command("echo x"),
        };

        let mut old = ClaimRecord::for_task("f1", &task, Utc::now()).unwrap();
        old.id = "task-f1-old".to_string();
        old.annotations
            .insert(PROCESSED_ANNOTATION.to_string(), "true".to_string());
        old.annotations.insert(
            PROCESSED_AT_ANNOTATION.to_string(),
            (Utc::now() - chrono::Duration::hours(25)).to_rfc3339(),
        );
        store.create_claim(&old).await.unwrap();

        let mut fresh = ClaimRecord::for_task("f1", &task, Utc::now()).unwrap();
        fresh.id = "task-f1-fresh".to_string();
        fresh
            .annotations
            .insert(PROCESSED_ANNOTATION.to_string(), "true".to_string());
        fresh.annotations.insert(
            PROCESSED_AT_ANNOTATION.to_string(),
            Utc::now().to_rfc3339(),
        );
        store.create_claim(&fresh).await.unwrap();

        let distributor = TaskDistributor::new(
            store.clone(),
            "leader-0".to_string(),
            String::new(),
            WorkKind::Command,
            String::new(),
        );
        distributor.distribute_round().await.unwrap();

        let remaining = store.list_claims("project=mcall,task=true").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "task-f1-fresh");
    }
}
