use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

use crate::error::Result;
use crate::membership::{GossipEvent, Member, Membership, MembershipEvent};
use crate::topology::MemberId;
use crate::util::Shutdown;

#[derive(Debug)]
enum HubCommand {
    Subscribe {
        id: MemberId,
        tx: UnboundedSender<MembershipEvent>,
    },
    SubscribeGossip {
        id: MemberId,
        event_type: String,
        tx: UnboundedSender<GossipEvent>,
    },
    SetProperty {
        id: MemberId,
        key: String,
        value: Bytes,
    },
    Publish {
        id: MemberId,
        event_type: String,
        payload: Bytes,
        done: oneshot::Sender<()>,
    },
    Join {
        id: MemberId,
        done: oneshot::Sender<()>,
    },
    Leave {
        id: MemberId,
        done: oneshot::Sender<()>,
    },
    SetReachable {
        id: MemberId,
        reachable: bool,
    },
    Members {
        tx: oneshot::Sender<Vec<MemberId>>,
    },
}

/// In-process gossip cluster. Every node of a process gets its own [`LocalMembership`] from the
/// same `LocalCluster` and sees the others through membership events, the same way it would
/// through a networked protocol.
#[derive(Clone, Debug)]
pub struct LocalCluster {
    tx: UnboundedSender<HubCommand>,
}

impl LocalCluster {
    /// Spawns the cluster onto the current runtime. It runs until `shutdown` fires.
    pub fn start(shutdown: Shutdown) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Hub {
            rx,
            members: BTreeMap::new(),
        };
        tokio::spawn(hub.run(shutdown));
        Self { tx }
    }

    pub fn member(&self, id: MemberId) -> LocalMembership {
        LocalMembership {
            id,
            tx: self.tx.clone(),
        }
    }

    /// Marks a member reachable or unreachable for every other member.
    pub fn set_reachable(&self, id: MemberId, reachable: bool) -> Result<()> {
        self.tx.send(HubCommand::SetReachable { id, reachable })?;
        Ok(())
    }

    /// Ids of all members currently joined.
    pub async fn members(&self) -> Result<Vec<MemberId>> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(HubCommand::Members { tx })?;
        Ok(rx.await?)
    }
}

#[derive(Debug)]
pub struct LocalMembership {
    id: MemberId,
    tx: UnboundedSender<HubCommand>,
}

#[async_trait]
impl Membership for LocalMembership {
    fn local_member_id(&self) -> &MemberId {
        &self.id
    }

    fn subscribe(&self) -> Result<UnboundedReceiver<MembershipEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx.send(HubCommand::Subscribe {
            id: self.id.clone(),
            tx,
        })?;
        Ok(rx)
    }

    fn subscribe_gossip(&self, event_type: &str) -> Result<UnboundedReceiver<GossipEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx.send(HubCommand::SubscribeGossip {
            id: self.id.clone(),
            event_type: event_type.to_string(),
            tx,
        })?;
        Ok(rx)
    }

    fn set_local_property(&self, key: &str, value: Bytes) -> Result<()> {
        self.tx.send(HubCommand::SetProperty {
            id: self.id.clone(),
            key: key.to_string(),
            value,
        })?;
        Ok(())
    }

    async fn publish(&self, event_type: &str, payload: Bytes) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.tx.send(HubCommand::Publish {
            id: self.id.clone(),
            event_type: event_type.to_string(),
            payload,
            done,
        })?;
        Ok(rx.await?)
    }

    async fn join(&self, contact_points: Vec<String>) -> Result<()> {
        tracing::debug!(member = %self.id, ?contact_points, "joining local cluster");
        let (done, rx) = oneshot::channel();
        self.tx.send(HubCommand::Join {
            id: self.id.clone(),
            done,
        })?;
        Ok(rx.await?)
    }

    async fn leave(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.tx.send(HubCommand::Leave {
            id: self.id.clone(),
            done,
        })?;
        Ok(rx.await?)
    }
}

#[derive(Debug)]
struct MemberEntry {
    member: Member,
    joined: bool,
    events: Vec<UnboundedSender<MembershipEvent>>,
    gossip: HashMap<String, Vec<UnboundedSender<GossipEvent>>>,
    /// Latest payload per custom event type, handed to members that join later.
    published: BTreeMap<String, Bytes>,
}

impl MemberEntry {
    fn new(id: MemberId) -> Self {
        Self {
            member: Member::new(id),
            joined: false,
            events: vec![],
            gossip: HashMap::new(),
            published: BTreeMap::new(),
        }
    }

    fn notify(&mut self, event: MembershipEvent) {
        // a dropped receiver only means that subscriber stopped listening
        self.events.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Whether anything on the member's side still listens for events.
    fn has_subscribers(&self) -> bool {
        self.events.iter().any(|tx| !tx.is_closed())
            || self
                .gossip
                .values()
                .flatten()
                .any(|tx| !tx.is_closed())
    }

    fn deliver(&mut self, event_type: &str, event: GossipEvent) {
        if let Some(subscribers) = self.gossip.get_mut(event_type) {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

struct Hub {
    rx: UnboundedReceiver<HubCommand>,
    members: BTreeMap<MemberId, MemberEntry>,
}

impl Hub {
    async fn run(mut self, mut shutdown: Shutdown) {
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,

                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
            }
        }
        tracing::debug!("local cluster stopped");
    }

    fn entry(&mut self, id: &MemberId) -> &mut MemberEntry {
        self.members
            .entry(id.clone())
            .or_insert_with(|| MemberEntry::new(id.clone()))
    }

    fn handle(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Subscribe { id, tx } => {
                let existing = self.joined_peers(&id);
                let entry = self.entry(&id);
                if entry.joined {
                    for member in existing {
                        let _ = tx.send(MembershipEvent::MemberAdded(member));
                    }
                }
                entry.events.push(tx);
            }
            HubCommand::SubscribeGossip { id, event_type, tx } => {
                let retained: Vec<GossipEvent> = if self.entry(&id).joined {
                    self.retained(&id, &event_type)
                } else {
                    vec![]
                };
                for event in retained {
                    let _ = tx.send(event);
                }
                self.entry(&id).gossip.entry(event_type).or_default().push(tx);
            }
            HubCommand::SetProperty { id, key, value } => {
                let entry = self.entry(&id);
                entry.member.properties.insert(key, value);
                if entry.joined {
                    let member = entry.member.clone();
                    self.broadcast(&id, MembershipEvent::MetadataChanged(member));
                }
            }
            HubCommand::Publish {
                id,
                event_type,
                payload,
                done,
            } => {
                let entry = self.entry(&id);
                entry.published.insert(event_type.clone(), payload.clone());
                if entry.joined {
                    let event = GossipEvent { from: id.clone(), payload };
                    self.gossip(&id, &event_type, event);
                }
                let _ = done.send(());
            }
            HubCommand::Join { id, done } => {
                if !self.entry(&id).joined {
                    self.join(&id);
                }
                let _ = done.send(());
            }
            HubCommand::Leave { id, done } => {
                if let Some(entry) = self.members.get_mut(&id) {
                    let left = entry.joined.then(|| entry.member.clone());
                    entry.joined = false;
                    if !entry.has_subscribers() {
                        self.members.remove(&id);
                    }
                    if let Some(member) = left {
                        tracing::debug!(member = %id, "member left local cluster");
                        self.broadcast(&id, MembershipEvent::MemberRemoved(member));
                    }
                }
                let _ = done.send(());
            }
            HubCommand::SetReachable { id, reachable } => {
                let member = self
                    .members
                    .get(&id)
                    .filter(|entry| entry.joined)
                    .map(|entry| entry.member.clone());
                match member {
                    Some(member) => self.broadcast(
                        &id,
                        MembershipEvent::ReachabilityChanged { member, reachable },
                    ),
                    None => tracing::debug!(member = %id, "reachability of unknown member ignored"),
                }
            }
            HubCommand::Members { tx } => {
                let joined = self
                    .members
                    .values()
                    .filter(|entry| entry.joined)
                    .map(|entry| entry.member.id.clone())
                    .collect();
                let _ = tx.send(joined);
            }
        }
    }

    fn join(&mut self, id: &MemberId) {
        tracing::debug!(member = %id, "member joined local cluster");
        let peers = self.joined_peers(id);
        let entry = self.entry(id);
        entry.joined = true;
        let member = entry.member.clone();
        let published = entry.published.clone();

        for peer in peers {
            entry.notify(MembershipEvent::MemberAdded(peer));
        }
        self.broadcast(id, MembershipEvent::MemberAdded(member));

        // exchange retained gossip in both directions
        for (event_type, payload) in published {
            let event = GossipEvent {
                from: id.clone(),
                payload,
            };
            self.gossip(id, &event_type, event);
        }
        let event_types: Vec<String> = self.entry(id).gossip.keys().cloned().collect();
        for event_type in event_types {
            for event in self.retained(id, &event_type) {
                self.entry(id).deliver(&event_type, event);
            }
        }
    }

    fn joined_peers(&self, id: &MemberId) -> Vec<Member> {
        self.members
            .values()
            .filter(|entry| entry.joined && &entry.member.id != id)
            .map(|entry| entry.member.clone())
            .collect()
    }

    fn retained(&self, id: &MemberId, event_type: &str) -> Vec<GossipEvent> {
        self.members
            .values()
            .filter(|entry| entry.joined && &entry.member.id != id)
            .filter_map(|entry| {
                entry.published.get(event_type).map(|payload| GossipEvent {
                    from: entry.member.id.clone(),
                    payload: payload.clone(),
                })
            })
            .collect()
    }

    fn broadcast(&mut self, from: &MemberId, event: MembershipEvent) {
        self.members
            .values_mut()
            .filter(|entry| entry.joined && &entry.member.id != from)
            .for_each(|entry| entry.notify(event.clone()));
    }

    fn gossip(&mut self, from: &MemberId, event_type: &str, event: GossipEvent) {
        self.members
            .values_mut()
            .filter(|entry| entry.joined && &entry.member.id != from)
            .for_each(|entry| entry.deliver(event_type, event.clone()));
    }
}
