use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::oneshot;

use crate::broker::info::BROKER_INFO_PROPERTY;
use crate::broker::{BrokerInfo, PartitionHealth, Term, TopologyPartitionListener};
use crate::error::Result;
use crate::membership::{Member, Membership, MembershipEvent};
use crate::topology::{MemberId, PartitionId};
use crate::util::Shutdown;

/// Capacity of the manager's inbox.
const INBOX_CAPACITY: usize = 256;

enum Command {
    BecomeLeader {
        partition_id: PartitionId,
        term: Term,
        tx: oneshot::Sender<Result<()>>,
    },
    BecomeFollower {
        partition_id: PartitionId,
        term: Term,
        tx: oneshot::Sender<Result<()>>,
    },
    BecomeInactive {
        partition_id: PartitionId,
        tx: oneshot::Sender<Result<()>>,
    },
    HealthChanged {
        partition_id: PartitionId,
        health: PartitionHealth,
        tx: oneshot::Sender<Result<()>>,
    },
    AddListener {
        listener: Arc<dyn TopologyPartitionListener>,
        tx: oneshot::Sender<()>,
    },
    RemoveListener {
        listener: Arc<dyn TopologyPartitionListener>,
        tx: oneshot::Sender<()>,
    },
    GetLeader {
        partition_id: PartitionId,
        tx: oneshot::Sender<Option<BrokerInfo>>,
    },
    GetLocalBroker {
        tx: oneshot::Sender<BrokerInfo>,
    },
}

/// Handle to the actor tracking who leads each partition.
///
/// The replication layer reports the local node's role changes through the `on_becoming_*`
/// calls; peers' roles arrive as membership events. All of it is applied on the actor in the
/// order it was received, and every call completes once the actor ran it.
#[derive(Clone, Debug)]
pub struct TopologyManager {
    tx: mpsc::Sender<Command>,
}

impl TopologyManager {
    /// Creates the handle and its actor. The actor subscribes to membership events right away so
    /// nothing is missed before it runs.
    pub fn new(
        local: BrokerInfo,
        membership: Arc<dyn Membership>,
    ) -> Result<(Self, TopologyManagerActor)> {
        let events = membership.subscribe()?;
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let actor = TopologyManagerActor {
            rx,
            events,
            membership,
            local,
            partition_leaders: BTreeMap::new(),
            listeners: vec![],
        };
        Ok((Self { tx }, actor))
    }

    pub async fn on_becoming_leader(&self, partition_id: PartitionId, term: Term) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::BecomeLeader {
            partition_id,
            term,
            tx,
        })
        .await?;
        rx.await?
    }

    pub async fn on_becoming_follower(&self, partition_id: PartitionId, term: Term) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::BecomeFollower {
            partition_id,
            term,
            tx,
        })
        .await?;
        rx.await?
    }

    pub async fn on_becoming_inactive(&self, partition_id: PartitionId) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::BecomeInactive { partition_id, tx })
            .await?;
        rx.await?
    }

    /// Flips the health flag advertised for a partition. Purely informational.
    pub async fn on_health_changed(
        &self,
        partition_id: PartitionId,
        health: PartitionHealth,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::HealthChanged {
            partition_id,
            health,
            tx,
        })
        .await?;
        rx.await?
    }

    /// Registers a listener. Before this returns, the listener is called once for every
    /// partition whose leader is already known.
    pub async fn add_topology_partition_listener(
        &self,
        listener: Arc<dyn TopologyPartitionListener>,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::AddListener { listener, tx }).await?;
        Ok(rx.await?)
    }

    pub async fn remove_topology_partition_listener(
        &self,
        listener: Arc<dyn TopologyPartitionListener>,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::RemoveListener { listener, tx })
            .await?;
        Ok(rx.await?)
    }

    pub async fn get_partition_leader(
        &self,
        partition_id: PartitionId,
    ) -> Result<Option<BrokerInfo>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::GetLeader { partition_id, tx }).await?;
        Ok(rx.await?)
    }

    pub async fn get_local_broker(&self) -> Result<BrokerInfo> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::GetLocalBroker { tx }).await?;
        Ok(rx.await?)
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).await?;
        Ok(())
    }
}

/// Leader of a partition as currently known, with the member that advertised it.
#[derive(Clone, Debug)]
struct PartitionLeader {
    member_id: MemberId,
    broker: BrokerInfo,
}

#[derive(Debug, PartialEq, Eq)]
enum Arbitration {
    /// The claim supersedes what is cached.
    Replace,
    /// The cached leader has an equal or higher term.
    Stale { current: Term },
    /// The cached leader has no term recorded for the partition.
    UnknownTerm,
}

/// Decides whether a leadership claim at `term` replaces the `current` cached leader.
fn arbitrate(current: Option<&BrokerInfo>, partition_id: PartitionId, term: Term) -> Arbitration {
    match current {
        None => Arbitration::Replace,
        Some(current) => match current.leader_term(partition_id) {
            None => Arbitration::UnknownTerm,
            Some(current) if current >= term => Arbitration::Stale { current },
            Some(_) => Arbitration::Replace,
        },
    }
}

pub struct TopologyManagerActor {
    rx: mpsc::Receiver<Command>,
    events: UnboundedReceiver<MembershipEvent>,
    membership: Arc<dyn Membership>,
    local: BrokerInfo,
    partition_leaders: BTreeMap<PartitionId, PartitionLeader>,
    listeners: Vec<Arc<dyn TopologyPartitionListener>>,
}

impl Debug for TopologyManagerActor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TopologyManagerActor {{ node_id: {}, leaders: {} }}",
            self.local.node_id,
            self.partition_leaders.len()
        )
    }
}

impl TopologyManagerActor {
    pub async fn run(mut self, mut shutdown: Shutdown) -> Result<()> {
        if let Err(err) = self.publish() {
            tracing::error!(%err, "could not publish initial broker info");
        }

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,

                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },

                Some(event) = self.events.recv() => self.on_membership_event(event),
            }
        }

        tracing::debug!(node_id = self.local.node_id, "topology manager stopped");
        Ok(())
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::BecomeLeader {
                partition_id,
                term,
                tx,
            } => {
                tracing::debug!(%partition_id, term, "became leader");
                self.local.set_leader(partition_id, term);
                let res = self.publish();
                let local_id = self.membership.local_member_id().clone();
                let local = self.local.clone();
                self.update_partition_leader(partition_id, term, &local_id, &local);
                let _ = tx.send(res);
            }
            Command::BecomeFollower {
                partition_id,
                term,
                tx,
            } => {
                tracing::debug!(%partition_id, term, "became follower");
                self.local.set_follower(partition_id);
                let _ = tx.send(self.publish());
            }
            Command::BecomeInactive { partition_id, tx } => {
                tracing::debug!(%partition_id, "became inactive");
                self.local.set_inactive(partition_id);
                let _ = tx.send(self.publish());
            }
            Command::HealthChanged {
                partition_id,
                health,
                tx,
            } => {
                tracing::debug!(%partition_id, ?health, "partition health changed");
                self.local.set_health(partition_id, health);
                let _ = tx.send(self.publish());
            }
            Command::AddListener { listener, tx } => {
                for (partition_id, leader) in &self.partition_leaders {
                    notify(&listener, *partition_id, &leader.broker);
                }
                self.listeners.push(listener);
                let _ = tx.send(());
            }
            Command::RemoveListener { listener, tx } => {
                self.listeners.retain(|l| !Arc::ptr_eq(l, &listener));
                let _ = tx.send(());
            }
            Command::GetLeader { partition_id, tx } => {
                let leader = self
                    .partition_leaders
                    .get(&partition_id)
                    .map(|leader| leader.broker.clone());
                let _ = tx.send(leader);
            }
            Command::GetLocalBroker { tx } => {
                let _ = tx.send(self.local.clone());
            }
        }
    }

    /// Replicates the local broker info to peers through the membership metadata.
    fn publish(&self) -> Result<()> {
        let payload = self.local.encode()?;
        self.membership
            .set_local_property(BROKER_INFO_PROPERTY, payload)
    }

    #[tracing::instrument(skip_all, fields(member = %event.member().id))]
    fn on_membership_event(&mut self, event: MembershipEvent) {
        if &event.member().id == self.membership.local_member_id() {
            return;
        }

        match event {
            MembershipEvent::MemberAdded(member) | MembershipEvent::MetadataChanged(member) => {
                if let Some(broker) = self.read_broker_info(&member) {
                    for (partition_id, term) in broker.leader_partitions() {
                        self.update_partition_leader(partition_id, term, &member.id, &broker);
                    }
                }
            }
            MembershipEvent::MemberRemoved(member) => self.remove_member(&member.id),
            MembershipEvent::ReachabilityChanged { reachable, .. } => {
                tracing::debug!(reachable, "reachability changed");
            }
        }
    }

    fn read_broker_info(&self, member: &Member) -> Option<BrokerInfo> {
        match BrokerInfo::from_member(member) {
            Ok(Some(broker)) if self.is_compatible(&broker) => Some(broker),
            Ok(Some(_)) => None,
            Ok(None) => {
                tracing::trace!("member does not advertise broker info");
                None
            }
            Err(err) => {
                tracing::warn!(%err, "could not decode broker info");
                None
            }
        }
    }

    /// Peers with different static cluster parameters cannot work with this node, their claims
    /// are dropped.
    fn is_compatible(&self, remote: &BrokerInfo) -> bool {
        let local = &self.local;
        if remote.node_id < 0 || remote.node_id >= local.cluster_size {
            tracing::error!(
                remote.node_id,
                local.cluster_size,
                "configuration error: node id of remote broker is out of range for the cluster size"
            );
            return false;
        }

        if remote.cluster_size != local.cluster_size
            || remote.partitions_count != local.partitions_count
            || remote.replication_factor != local.replication_factor
        {
            tracing::error!(
                remote.node_id,
                remote.cluster_size,
                remote.partitions_count,
                remote.replication_factor,
                local.cluster_size,
                local.partitions_count,
                local.replication_factor,
                "configuration error: remote broker has a different cluster configuration"
            );
            return false;
        }

        true
    }

    fn update_partition_leader(
        &mut self,
        partition_id: PartitionId,
        term: Term,
        member_id: &MemberId,
        broker: &BrokerInfo,
    ) {
        let current = self
            .partition_leaders
            .get(&partition_id)
            .map(|leader| &leader.broker);
        match arbitrate(current, partition_id, term) {
            Arbitration::Replace => {
                tracing::debug!(%partition_id, term, leader = broker.node_id, "partition leader updated");
                self.partition_leaders.insert(
                    partition_id,
                    PartitionLeader {
                        member_id: member_id.clone(),
                        broker: broker.clone(),
                    },
                );
                for listener in &self.listeners {
                    notify(listener, partition_id, broker);
                }
            }
            Arbitration::Stale { current } => {
                tracing::trace!(%partition_id, term, current, "ignoring stale leadership claim");
            }
            Arbitration::UnknownTerm => {
                tracing::error!(
                    %partition_id,
                    term,
                    "no term known for the current leader, refusing to replace it"
                );
            }
        }
    }

    fn remove_member(&mut self, member_id: &MemberId) {
        self.partition_leaders.retain(|partition_id, leader| {
            let led = &leader.member_id == member_id;
            if led {
                tracing::debug!(%partition_id, "leader left the cluster");
            }
            !led
        });
    }
}

fn notify(
    listener: &Arc<dyn TopologyPartitionListener>,
    partition_id: PartitionId,
    leader: &BrokerInfo,
) {
    let res = catch_unwind(AssertUnwindSafe(|| {
        listener.on_partition_leader_updated(partition_id, leader)
    }));
    match res {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::error!(%partition_id, %err, "partition listener failed");
        }
        Err(_) => {
            tracing::error!(%partition_id, "partition listener panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use super::{arbitrate, Arbitration, TopologyManager};
    use crate::broker::info::BROKER_INFO_PROPERTY;
    use crate::broker::{BrokerInfo, PartitionHealth, TopologyPartitionListener};
    use crate::membership::local::{LocalCluster, LocalMembership};
    use crate::membership::{Membership, MembershipEvent};
    use crate::topology::{MemberId, PartitionId};
    use crate::util::Shutdown;

    const CLUSTER_SIZE: i32 = 4;

    fn broker(node_id: i32) -> BrokerInfo {
        BrokerInfo::new(node_id, CLUSTER_SIZE, 4, 3)
    }

    fn leader(node_id: i32, partition: i32, term: u64) -> BrokerInfo {
        let mut info = broker(node_id);
        info.set_leader(PartitionId(partition), term);
        info
    }

    struct Harness {
        shutdown: Shutdown,
        cluster: LocalCluster,
        manager: TopologyManager,
    }

    impl Harness {
        async fn new() -> Self {
            let shutdown = Shutdown::new();
            let cluster = LocalCluster::start(shutdown.clone());
            let membership = Arc::new(cluster.member(MemberId::from("0")));
            let (manager, actor) = TopologyManager::new(broker(0), membership.clone()).unwrap();
            tokio::spawn(actor.run(shutdown.clone()));
            membership.join(vec![]).await.unwrap();
            Self {
                shutdown,
                cluster,
                manager,
            }
        }

        async fn peer(&self, id: &str) -> LocalMembership {
            let peer = self.cluster.member(MemberId::from(id));
            peer.join(vec![]).await.unwrap();
            peer
        }

        /// Waits until the manager has `node_id` cached as leader of `partition`.
        async fn await_leader(&self, partition: i32, node_id: i32) {
            for _ in 0..200 {
                let leader = self
                    .manager
                    .get_partition_leader(PartitionId(partition))
                    .await
                    .unwrap();
                if leader.map(|l| l.node_id) == Some(node_id) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("node {} never became leader of {}", node_id, partition);
        }

        /// Waits until the manager has no leader cached for `partition`.
        async fn await_no_leader(&self, partition: i32) {
            for _ in 0..200 {
                let leader = self
                    .manager
                    .get_partition_leader(PartitionId(partition))
                    .await
                    .unwrap();
                if leader.is_none() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("partition {} still has a leader", partition);
        }
    }

    fn claim(peer: &LocalMembership, info: &BrokerInfo) {
        peer.set_local_property(BROKER_INFO_PROPERTY, info.encode().unwrap())
            .unwrap();
    }

    fn recorder() -> (
        Arc<dyn TopologyPartitionListener>,
        UnboundedReceiver<(PartitionId, i32)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = move |partition_id: PartitionId, leader: &BrokerInfo| -> anyhow::Result<()> {
            tx.send((partition_id, leader.node_id))?;
            Ok(())
        };
        (Arc::new(listener), rx)
    }

    #[test]
    fn arbitration() {
        let current = leader(1, 1, 5);
        assert_eq!(arbitrate(None, PartitionId(1), 1), Arbitration::Replace);
        assert_eq!(
            arbitrate(Some(&current), PartitionId(1), 4),
            Arbitration::Stale { current: 5 }
        );
        assert_eq!(
            arbitrate(Some(&current), PartitionId(1), 5),
            Arbitration::Stale { current: 5 }
        );
        assert_eq!(arbitrate(Some(&current), PartitionId(1), 6), Arbitration::Replace);
        assert_eq!(
            arbitrate(Some(&current), PartitionId(2), 6),
            Arbitration::UnknownTerm
        );
    }

    #[tokio::test]
    async fn higher_term_replaces_leader() {
        let harness = Harness::new().await;
        let (listener, mut updates) = recorder();
        harness
            .manager
            .add_topology_partition_listener(listener)
            .await
            .unwrap();

        let one = harness.peer("1").await;
        let two = harness.peer("2").await;

        claim(&one, &leader(1, 1, 5));
        harness.await_leader(1, 1).await;
        assert_eq!(updates.recv().await, Some((PartitionId(1), 1)));

        // stale and equal terms are ignored, a claim on another partition fences them
        claim(&two, &leader(2, 1, 4));
        claim(&two, &leader(2, 1, 5));
        let mut fence = leader(2, 1, 5);
        fence.set_leader(PartitionId(2), 1);
        claim(&two, &fence);
        harness.await_leader(2, 2).await;
        assert_eq!(updates.recv().await, Some((PartitionId(2), 2)));
        assert_eq!(
            harness
                .manager
                .get_partition_leader(PartitionId(1))
                .await
                .unwrap()
                .map(|l| l.node_id),
            Some(1)
        );

        claim(&two, &leader(2, 1, 6));
        harness.await_leader(1, 2).await;
        assert_eq!(updates.recv().await, Some((PartitionId(1), 2)));
        assert!(updates.try_recv().is_err());
        harness.shutdown.shutdown();
    }

    #[tokio::test]
    async fn other_subscribers_do_not_starve_the_manager() {
        let harness = Harness::new().await;
        let local = harness.cluster.member(MemberId::from("0"));
        let mut events = local.subscribe().unwrap();

        let one = harness.peer("1").await;
        claim(&one, &leader(1, 1, 1));
        harness.await_leader(1, 1).await;

        assert!(matches!(events.recv().await, Some(MembershipEvent::MemberAdded(_))));
        assert!(matches!(events.recv().await, Some(MembershipEvent::MetadataChanged(_))));
        harness.shutdown.shutdown();
    }

    #[tokio::test]
    async fn listener_replays_known_leaders() {
        let harness = Harness::new().await;
        let one = harness.peer("1").await;
        let two = harness.peer("2").await;
        let three = harness.peer("3").await;

        claim(&one, &leader(1, 1, 1));
        claim(&two, &leader(2, 2, 1));
        claim(&three, &leader(3, 3, 1));
        harness.await_leader(1, 1).await;
        harness.await_leader(2, 2).await;
        harness.await_leader(3, 3).await;

        let (listener, mut updates) = recorder();
        harness
            .manager
            .add_topology_partition_listener(listener)
            .await
            .unwrap();

        let mut replayed = vec![];
        while let Ok(update) = updates.try_recv() {
            replayed.push(update);
        }
        assert_eq!(
            replayed,
            vec![
                (PartitionId(1), 1),
                (PartitionId(2), 2),
                (PartitionId(3), 3)
            ]
        );

        claim(&one, &leader(1, 4, 1));
        harness.await_leader(4, 1).await;
        assert_eq!(updates.recv().await, Some((PartitionId(4), 1)));
        harness.shutdown.shutdown();
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn misconfigured_peer_is_ignored() {
        let harness = Harness::new().await;
        let outsider = harness.peer("4").await;
        let other_sizes = harness.peer("2").await;
        let fence = harness.peer("3").await;

        claim(&outsider, &leader(CLUSTER_SIZE, 1, 1));
        let mut mismatched = leader(2, 2, 1);
        mismatched.partitions_count = 8;
        claim(&other_sizes, &mismatched);

        claim(&fence, &leader(3, 3, 1));
        harness.await_leader(3, 3).await;

        let manager = &harness.manager;
        assert!(manager.get_partition_leader(PartitionId(1)).await.unwrap().is_none());
        assert!(manager.get_partition_leader(PartitionId(2)).await.unwrap().is_none());
        assert!(logs_contain("node id of remote broker is out of range"));
        assert!(logs_contain("different cluster configuration"));
        harness.shutdown.shutdown();
    }

    #[tokio::test]
    async fn removed_leader_is_forgotten() {
        let harness = Harness::new().await;
        let one = harness.peer("1").await;
        let two = harness.peer("2").await;

        let mut info = leader(1, 1, 3);
        info.set_leader(PartitionId(2), 3);
        claim(&one, &info);
        claim(&two, &leader(2, 3, 1));
        harness.await_leader(1, 1).await;
        harness.await_leader(2, 1).await;
        harness.await_leader(3, 2).await;

        one.leave().await.unwrap();
        harness.await_no_leader(1).await;
        harness.await_no_leader(2).await;
        harness.await_leader(3, 2).await;
        harness.shutdown.shutdown();
    }

    #[tokio::test]
    async fn local_roles_are_published() {
        let harness = Harness::new().await;
        let observer = harness.cluster.member(MemberId::from("1"));
        let mut events = observer.subscribe().unwrap();
        observer.join(vec![]).await.unwrap();

        let (listener, mut updates) = recorder();
        harness
            .manager
            .add_topology_partition_listener(listener)
            .await
            .unwrap();

        harness
            .manager
            .on_becoming_leader(PartitionId(1), 2)
            .await
            .unwrap();
        assert_eq!(updates.recv().await, Some((PartitionId(1), 0)));

        harness
            .manager
            .on_health_changed(PartitionId(1), PartitionHealth::Unhealthy)
            .await
            .unwrap();
        harness
            .manager
            .on_becoming_follower(PartitionId(2), 1)
            .await
            .unwrap();
        harness
            .manager
            .on_becoming_inactive(PartitionId(3))
            .await
            .unwrap();

        let local = harness.manager.get_local_broker().await.unwrap();
        assert_eq!(local.leader_term(PartitionId(1)), Some(2));
        assert!(!local.is_healthy(PartitionId(1)));

        // the observer sees every republished version, the last one carries all changes
        let mut seen = None;
        while seen.as_ref() != Some(&local) {
            match events.recv().await {
                Some(MembershipEvent::MemberAdded(member))
                | Some(MembershipEvent::MetadataChanged(member)) => {
                    seen = BrokerInfo::from_member(&member).unwrap();
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        harness.shutdown.shutdown();
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn failing_listeners_are_isolated() {
        let harness = Harness::new().await;

        let panicking: Arc<dyn TopologyPartitionListener> =
            Arc::new(|_: PartitionId, _: &BrokerInfo| -> anyhow::Result<()> {
                panic!("listener bug")
            });
        let failing: Arc<dyn TopologyPartitionListener> =
            Arc::new(|_: PartitionId, _: &BrokerInfo| -> anyhow::Result<()> {
                Err(anyhow::anyhow!("listener error"))
            });
        let (recording, mut updates) = recorder();

        let manager = &harness.manager;
        manager.add_topology_partition_listener(panicking).await.unwrap();
        manager.add_topology_partition_listener(failing.clone()).await.unwrap();
        manager.add_topology_partition_listener(recording).await.unwrap();

        manager.on_becoming_leader(PartitionId(1), 1).await.unwrap();
        assert_eq!(updates.recv().await, Some((PartitionId(1), 0)));
        assert!(logs_contain("partition listener panicked"));
        assert!(logs_contain("partition listener failed"));

        manager.remove_topology_partition_listener(failing).await.unwrap();
        manager.on_becoming_leader(PartitionId(2), 1).await.unwrap();
        assert_eq!(updates.recv().await, Some((PartitionId(2), 0)));
        assert!(manager.get_local_broker().await.is_ok());
        harness.shutdown.shutdown();
    }
}
