// LNP Gossip Daemon Library: lightning network routing graph, gossip store
// and path finding.
//
// Written in 2022 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! Routing state: admission of gossip messages into the network view.
//!
//! Messages from peers go through the `handle_*` entry points, which fully
//! validate before mutating, so every call either commits or leaves the
//! graph unchanged. The `routing_add_*` entry points trust their input and
//! skip signature and funding checks; they exist for replaying the gossip
//! store.

pub mod graph;

use std::collections::{BTreeMap, BTreeSet};

use amplify::Slice32;
use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::Builder;
use bitcoin::Script;

use crate::p2p::{
    ChannelAnnouncement, ChannelUpdate, LocalAddChannel, NodeAnnouncement,
    NodeId, ShortChannelId, Timestamp,
};
use crate::store::{Store, StoreMessage};
pub use graph::{
    Adjacency, Broadcastable, Channel, HalfChannel, Node, NUM_IMMEDIATE_CHANS,
};

/// Errors returned by the untrusted admission entry points. The rendered
/// message is the protocol-error payload forwarded to the offending peer.
#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Error {
    /// invalid gossip message encoding: {0}
    #[from]
    Encoding(lightning_encoding::Error),

    /// message of type {0} passed where a gossip message was expected
    UnexpectedMessage(u16),

    /// channel announcement for {0} connects node {1} to itself
    ChannelToSelf(ShortChannelId, NodeId),

    /// node ids of channel announcement for {0} are not in ascending order
    UnorderedNodeIds(ShortChannelId),

    /// chain hash {0} does not match the chain of this network view
    ChainHashMismatch(Slice32),

    /// invalid signature or public key in {msg} message: {err}
    InvalidSignature {
        /// Kind of the offending message
        msg: &'static str,
        /// Underlying verification failure
        err: secp256k1::Error,
    },

    /// channel {0} was re-announced with different content
    AnnouncementConflict(ShortChannelId),

    /// channel update for {scid} direction {direction} carries timestamp
    /// {timestamp} identical to a different known update
    UpdateConflict {
        /// Channel the update refers to
        scid: ShortChannelId,
        /// Direction of the colliding update
        direction: u8,
        /// The colliding timestamp
        timestamp: Timestamp,
    },

    /// node announcement for {node} carries timestamp {timestamp} identical
    /// to a different known announcement
    NodeAnnouncementConflict {
        /// The announced node
        node: NodeId,
        /// The colliding timestamp
        timestamp: Timestamp,
    },
}

/// A `channel_announcement` which passed all checks but whose funding output
/// the oracle has not confirmed yet. Gossip referencing the channel or its
/// endpoints is buffered here until the lookup completes.
#[derive(Clone, Debug)]
pub struct PendingAnnouncement {
    /// Original announcement wire bytes
    pub announce: Vec<u8>,
    /// Lesser endpoint id
    pub node_id_1: NodeId,
    /// Greater endpoint id
    pub node_id_2: NodeId,
    bitcoin_key_1: NodeId,
    bitcoin_key_2: NodeId,
    /// Buffered `channel_update`s for this channel, in arrival order
    updates: Vec<Vec<u8>>,
    /// Latest buffered `node_announcement` per endpoint
    node_announcements: [Option<Vec<u8>>; 2],
    /// Peers which offered this announcement; the pending entry dies with
    /// the last of them
    offerers: BTreeSet<NodeId>,
}

/// Developer-mode overrides, present only in builds with the `dev` feature.
#[cfg(feature = "dev")]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct DevOptions {
    /// Canned gossip time, letting recorded (stale) gossip replay without
    /// being pruned
    pub gossip_time: Option<Timestamp>,
    /// Treat unknown channels as valid with this capacity instead of going
    /// through the funding oracle
    pub unknown_channel_satoshis: Option<u64>,
}

/// Bookkeeping of the broadcastable set backing the store rewrite trigger.
///
/// `count` tracks the number of live broadcastable entities (channel
/// announcements, half-channel updates, node announcements with a store
/// record); the gossip store compares it against the number of records ever
/// appended to decide when compaction is worthwhile. When no store is
/// attached, indices are synthesized so the announcement state machine works
/// the same in memory-only operation.
#[derive(Debug, Default)]
pub(crate) struct Broadcast {
    store: Option<Store>,
    count: usize,
    next_index: u32,
}

impl Broadcast {
    fn append(&mut self, msg: &StoreMessage) -> u32 {
        let live = self.count;
        match self.store.as_mut().and_then(|store| store.append(msg, live)) {
            Some(index) => index,
            None => {
                self.next_index += 1;
                self.next_index
            }
        }
    }

    /// Appends a broadcastable entity record, superseding its previous one.
    fn insert(&mut self, msg: &StoreMessage, prev_index: u32) -> u32 {
        if prev_index == 0 {
            self.count += 1;
        }
        self.append(msg)
    }

    /// Accounts for an entity restored from the store during replay.
    fn restore(&mut self) {
        self.count += 1;
    }

    /// Drops a broadcastable entity (index 0 means it never had a record).
    fn forget(&mut self, index: u32) {
        if index != 0 {
            self.count = self.count.saturating_sub(1);
        }
    }

    /// Appends a record which is not part of the broadcastable set (deletion
    /// tombstones, local private channels).
    fn append_out_of_band(&mut self, msg: &StoreMessage) {
        let live = self.count;
        if let Some(store) = self.store.as_mut() {
            store.append(msg, live);
        }
    }

    fn rewrite_due(&self) -> bool {
        self.store
            .as_ref()
            .map(Store::rewrite_due)
            .unwrap_or(false)
    }

    pub(crate) fn live(&self) -> usize {
        self.count
    }
}

/// The network view: all known nodes and channels, indices for lookup and
/// the staging areas for gossip that cannot be applied yet.
#[derive(Debug)]
pub struct RoutingState {
    /// Which chain we are on
    pub(crate) chain_hash: Slice32,
    /// Our own id, so we can identify local channels
    pub(crate) local_id: NodeId,
    /// How old a channel has to be before we prune it, in seconds
    prune_timeout: u32,
    /// All known nodes
    pub(crate) nodes: BTreeMap<NodeId, Node>,
    /// All known channels, indexed by short channel id
    pub(crate) chans: BTreeMap<ShortChannelId, Channel>,
    /// Public channels which have not got a `channel_update` yet; not
    /// broadcastable and not usable for routing
    unupdated: BTreeSet<ShortChannelId>,
    /// `channel_announcement`s awaiting the funding oracle
    pending: BTreeMap<ShortChannelId, PendingAnnouncement>,
    /// Broadcastable-set bookkeeping and the attached gossip store
    pub(crate) broadcast: Broadcast,
    /// Whether one of our own channels has been announced
    local_channel_announced: bool,
    #[cfg(feature = "dev")]
    dev: DevOptions,
}

/// The BOLT-3 funding output script: P2WSH over the 2-of-2
/// `OP_CHECKMULTISIG` of the two announced bitcoin keys, in announcement
/// order.
pub fn funding_script(
    bitcoin_key_1: &NodeId,
    bitcoin_key_2: &NodeId,
) -> Result<Script, secp256k1::Error> {
    let key_1 = bitcoin_key_1.public_key()?;
    let key_2 = bitcoin_key_2.public_key()?;
    let multisig = Builder::new()
        .push_opcode(opcodes::all::OP_PUSHNUM_2)
        .push_slice(&key_1.serialize())
        .push_slice(&key_2.serialize())
        .push_opcode(opcodes::all::OP_PUSHNUM_2)
        .push_opcode(opcodes::all::OP_CHECKMULTISIG)
        .into_script();
    Ok(multisig.to_v0_p2wsh())
}

impl RoutingState {
    /// Constructs an empty network view.
    pub fn new(
        chain_hash: Slice32,
        local_id: NodeId,
        prune_timeout: u32,
    ) -> RoutingState {
        RoutingState {
            chain_hash,
            local_id,
            prune_timeout,
            nodes: BTreeMap::new(),
            chans: BTreeMap::new(),
            unupdated: BTreeSet::new(),
            pending: BTreeMap::new(),
            broadcast: Broadcast::default(),
            local_channel_announced: false,
            #[cfg(feature = "dev")]
            dev: DevOptions::default(),
        }
    }

    /// Constructs an empty network view with developer-mode overrides.
    #[cfg(feature = "dev")]
    pub fn with_dev_options(
        chain_hash: Slice32,
        local_id: NodeId,
        prune_timeout: u32,
        dev: DevOptions,
    ) -> RoutingState {
        let mut rstate = RoutingState::new(chain_hash, local_id, prune_timeout);
        rstate.dev = dev;
        rstate
    }

    /// Attaches an (already loaded) gossip store; subsequent admissions are
    /// persisted into it.
    pub fn attach_store(&mut self, store: Store) {
        self.broadcast.store = Some(store);
    }

    /// Current gossip time; the developer override substitutes a canned
    /// value to replay recorded data.
    pub fn gossip_time_now(&self) -> Timestamp {
        #[cfg(feature = "dev")]
        if let Some(canned) = self.dev.gossip_time {
            return canned;
        }
        Timestamp::now()
    }

    #[inline]
    pub fn get_channel(&self, scid: &ShortChannelId) -> Option<&Channel> {
        self.chans.get(scid)
    }

    #[inline]
    pub fn get_node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    #[inline]
    pub fn pending_announcement(
        &self,
        scid: &ShortChannelId,
    ) -> Option<&PendingAnnouncement> {
        self.pending.get(scid)
    }

    /// Number of entities currently eligible for rebroadcast.
    #[inline]
    pub fn broadcastable_count(&self) -> usize {
        self.broadcast.live()
    }

    /// Whether one of our own channels has been announced.
    #[inline]
    pub fn local_channel_announced(&self) -> bool {
        self.local_channel_announced
    }

    // Admission of remote messages
    // ----------------------------

    /// Checks a `channel_announcement` received from a peer.
    ///
    /// On success returns the short channel id the caller must resolve
    /// through the funding oracle (`Some`), or `None` when the message was
    /// absorbed without needing a lookup (idempotent replay, or dev-mode
    /// synthetic capacity). The channel becomes visible only after
    /// [`RoutingState::handle_pending_cannouncement`].
    pub fn handle_channel_announcement(
        &mut self,
        source_peer: Option<NodeId>,
        announce: &[u8],
    ) -> Result<Option<ShortChannelId>, Error> {
        let msg = ChannelAnnouncement::from_wire(announce)?;
        let scid = msg.short_channel_id;

        if msg.node_id_1 == msg.node_id_2 {
            return Err(Error::ChannelToSelf(scid, msg.node_id_1));
        }
        if msg.node_id_1 > msg.node_id_2 {
            return Err(Error::UnorderedNodeIds(scid));
        }
        if msg.chain_hash != self.chain_hash {
            return Err(Error::ChainHashMismatch(msg.chain_hash));
        }
        msg.verify_signatures(announce).map_err(|err| {
            Error::InvalidSignature {
                msg: "channel_announcement",
                err,
            }
        })?;

        if let Some(chan) = self.chans.get(&scid) {
            return if chan.channel_announce.as_deref() == Some(announce) {
                trace!("ignoring duplicate channel_announcement for {}", scid);
                Ok(None)
            } else {
                Err(Error::AnnouncementConflict(scid))
            };
        }
        if let Some(pending) = self.pending.get_mut(&scid) {
            return if pending.announce.as_slice() == announce {
                if let Some(peer) = source_peer {
                    pending.offerers.insert(peer);
                }
                Ok(None)
            } else {
                Err(Error::AnnouncementConflict(scid))
            };
        }

        #[cfg(feature = "dev")]
        if let Some(satoshis) = self.dev.unknown_channel_satoshis {
            self.routing_add_channel_announcement(announce, satoshis, 0);
            return Ok(None);
        }

        let mut offerers = BTreeSet::new();
        if let Some(peer) = source_peer {
            offerers.insert(peer);
        }
        self.pending.insert(scid, PendingAnnouncement {
            announce: announce.to_vec(),
            node_id_1: msg.node_id_1,
            node_id_2: msg.node_id_2,
            bitcoin_key_1: msg.bitcoin_key_1,
            bitcoin_key_2: msg.bitcoin_key_2,
            updates: vec![],
            node_announcements: [None, None],
            offerers,
        });
        debug!(
            "channel_announcement for {} awaits funding output confirmation",
            scid
        );
        Ok(Some(scid))
    }

    /// Completes a pending `channel_announcement` once the funding oracle
    /// confirmed the on-chain output.
    ///
    /// Verifies that the output script matches the 2-of-2 multisig of the
    /// announced bitcoin keys, inserts the channel and replays the buffered
    /// follower messages. Returns `false` when the pending entry is gone or
    /// the script does not match (the entry and its followers are dropped).
    pub fn handle_pending_cannouncement(
        &mut self,
        scid: ShortChannelId,
        satoshis: u64,
        script: &Script,
    ) -> bool {
        let pending = match self.pending.remove(&scid) {
            Some(pending) => pending,
            None => {
                trace!("no pending channel_announcement for {}", scid);
                return false;
            }
        };

        let expected =
            match funding_script(&pending.bitcoin_key_1, &pending.bitcoin_key_2)
            {
                Ok(script) => script,
                Err(err) => {
                    warn!(
                        "invalid bitcoin keys in pending announcement for {}: \
                         {}",
                        scid, err
                    );
                    return false;
                }
            };
        if &expected != script {
            warn!(
                "funding output of {} does not match the announced bitcoin \
                 keys; dropping the announcement",
                scid
            );
            return false;
        }

        if !self.routing_add_channel_announcement(
            &pending.announce,
            satoshis,
            0,
        ) {
            return false;
        }
        if let Some(chan) = self.chans.get_mut(&scid) {
            chan.funding_script = Some(script.clone());
        }

        // buffered messages go through the full untrusted checks; a bad
        // follower must not poison the now-valid channel
        for update in &pending.updates {
            if let Err(err) = self.handle_channel_update(update) {
                warn!("buffered channel_update for {} rejected: {}", scid, err);
            }
        }
        for announcement in pending.node_announcements.iter().flatten() {
            if let Err(err) = self.handle_node_announcement(announcement) {
                warn!("buffered node_announcement rejected: {}", err);
            }
        }
        true
    }

    /// Checks a `channel_update` received from a peer and applies it to the
    /// corresponding half-channel.
    pub fn handle_channel_update(&mut self, update: &[u8]) -> Result<(), Error> {
        let msg = ChannelUpdate::from_wire(update)?;
        let scid = msg.short_channel_id;
        if msg.chain_hash != self.chain_hash {
            return Err(Error::ChainHashMismatch(msg.chain_hash));
        }

        if let Some(pending) = self.pending.get_mut(&scid) {
            trace!("buffering channel_update for pending channel {}", scid);
            pending.updates.push(update.to_vec());
            return Ok(());
        }

        let direction = msg.direction();
        let chan = match self.chans.get(&scid) {
            Some(chan) => chan,
            None => {
                trace!(
                    "dropping channel_update for unknown channel {}",
                    scid
                );
                return Ok(());
            }
        };

        let half = &chan.half[direction];
        if half.is_defined() {
            if half.bcast.timestamp > msg.timestamp {
                trace!(
                    "dropping stale channel_update for {}/{} ({} < {})",
                    scid,
                    direction,
                    msg.timestamp,
                    half.bcast.timestamp
                );
                return Ok(());
            }
            if half.bcast.timestamp == msg.timestamp {
                return if half.channel_update.as_deref() == Some(update) {
                    trace!(
                        "ignoring duplicate channel_update for {}/{}",
                        scid,
                        direction
                    );
                    Ok(())
                } else {
                    Err(Error::UpdateConflict {
                        scid,
                        direction: direction as u8,
                        timestamp: msg.timestamp,
                    })
                };
            }
        }

        msg.verify_signature(update, &chan.nodes[direction]).map_err(
            |err| Error::InvalidSignature {
                msg: "channel_update",
                err,
            },
        )?;

        self.routing_add_channel_update(update, 0);
        Ok(())
    }

    /// Checks a `node_announcement` received from a peer.
    pub fn handle_node_announcement(
        &mut self,
        announcement: &[u8],
    ) -> Result<(), Error> {
        let msg = NodeAnnouncement::from_wire(announcement)?;
        let id = msg.node_id;

        match self.nodes.get(&id) {
            None => {
                // a node we will learn about once a pending channel
                // resolves gets its announcement buffered; everything else
                // is noise
                let mut interested = false;
                for pending in self.pending.values_mut() {
                    if pending.node_id_1 == id {
                        pending.node_announcements[0] =
                            Some(announcement.to_vec());
                        interested = true;
                    } else if pending.node_id_2 == id {
                        pending.node_announcements[1] =
                            Some(announcement.to_vec());
                        interested = true;
                    }
                }
                if interested {
                    trace!(
                        "buffering node_announcement for pending node {}",
                        id
                    );
                } else {
                    trace!(
                        "dropping node_announcement for unknown node {}",
                        id
                    );
                }
                return Ok(());
            }
            Some(node) if node.is_announced() => {
                if node.bcast.timestamp > msg.timestamp {
                    trace!("dropping stale node_announcement for {}", id);
                    return Ok(());
                }
                if node.bcast.timestamp == msg.timestamp {
                    return if node.node_announcement.as_deref()
                        == Some(announcement)
                    {
                        trace!(
                            "ignoring duplicate node_announcement for {}",
                            id
                        );
                        Ok(())
                    } else {
                        Err(Error::NodeAnnouncementConflict {
                            node: id,
                            timestamp: msg.timestamp,
                        })
                    };
                }
            }
            Some(_) => {}
        }

        msg.verify_signature(announcement).map_err(|err| {
            Error::InvalidSignature {
                msg: "node_announcement",
                err,
            }
        })?;

        self.routing_add_node_announcement(announcement, 0);
        Ok(())
    }

    // Local channels, deletion, pruning
    // ---------------------------------

    /// Adds a local private channel learned from the channel daemon rather
    /// than from gossip, and persists it so it survives restart. Never
    /// propagated to peers.
    pub fn handle_local_add_channel(&mut self, msg: &[u8]) -> bool {
        if !self.routing_add_local_channel(msg) {
            return false;
        }
        self.broadcast
            .append_out_of_band(&StoreMessage::LocalAddChannel(msg.to_vec()));
        true
    }

    /// Removes a channel from the network view and writes a deletion record
    /// for it. Deleting an unknown channel is a no-op.
    pub fn channel_delete(&mut self, scid: &ShortChannelId) {
        match self.remove_channel(scid) {
            Some(chan) => {
                // only channels with a store record leave a tombstone, so
                // replay never sees a delete for a channel it cannot know
                if chan.bcast.index != 0 || !chan.is_public() {
                    self.broadcast.append_out_of_band(
                        &StoreMessage::ChannelDelete(*scid),
                    );
                }
                debug!("channel {} removed from the network view", scid);
            }
            None => trace!("delete of unknown channel {} ignored", scid),
        }
    }

    /// Deletes every public channel whose freshest `channel_update` is older
    /// than the prune timeout. Channels with no update yet carry no
    /// staleness evidence and are left alone, as are private channels.
    /// Returns the number of channels pruned.
    pub fn route_prune(&mut self) -> usize {
        let cutoff =
            self.gossip_time_now().saturating_sub(self.prune_timeout);
        let mut stale = Vec::new();
        for (scid, chan) in &self.chans {
            if !chan.is_public() {
                continue;
            }
            let freshest = chan
                .half
                .iter()
                .filter(|half| half.is_defined())
                .map(|half| half.bcast.timestamp)
                .max();
            if let Some(timestamp) = freshest {
                if timestamp < cutoff {
                    stale.push(*scid);
                }
            }
        }
        let pruned = stale.len();
        for scid in stale {
            debug!("pruning channel {} with no recent updates", scid);
            self.channel_delete(&scid);
        }
        pruned
    }

    /// Drops a pending announcement (failed or cancelled oracle lookup)
    /// together with its buffered followers.
    pub fn drop_pending(&mut self, scid: &ShortChannelId) -> bool {
        match self.pending.remove(scid) {
            Some(_) => {
                debug!("dropping pending channel_announcement for {}", scid);
                true
            }
            None => false,
        }
    }

    /// Removes a disconnected peer from all pending-announcement offerer
    /// sets; entries nobody vouches for anymore are dropped with their
    /// buffered followers.
    pub fn forget_peer(&mut self, peer: &NodeId) {
        self.pending.retain(|scid, pending| {
            if pending.offerers.remove(peer) && pending.offerers.is_empty() {
                debug!(
                    "dropping pending channel_announcement for {}: last \
                     offering peer disconnected",
                    scid
                );
                false
            } else {
                true
            }
        });
    }

    /// Flags or unflags all direct channels with the given peer as locally
    /// disabled.
    pub fn set_local_disabled(&mut self, peer: &NodeId, disabled: bool) {
        let local_id = self.local_id;
        let scids: Vec<ShortChannelId> = match self.nodes.get(&local_id) {
            Some(node) => node.chans.iter().collect(),
            None => return,
        };
        for scid in scids {
            if let Some(chan) = self.chans.get_mut(&scid) {
                if chan.other_node(&local_id) == Some(*peer) {
                    chan.local_disabled = disabled;
                }
            }
        }
    }

    // Trusted insertion
    // -----------------

    /// Adds a `channel_announcement` to the network view without checking
    /// it. Use only for messages from trusted sources (the gossip store);
    /// untrusted input goes through
    /// [`RoutingState::handle_channel_announcement`].
    ///
    /// `index` is the store offset of the record when replaying; 0 means
    /// the record will be written (and the index assigned) once the channel
    /// gets its first update.
    pub fn routing_add_channel_announcement(
        &mut self,
        announce: &[u8],
        satoshis: u64,
        index: u32,
    ) -> bool {
        let msg = match ChannelAnnouncement::from_wire(announce) {
            Ok(msg) => msg,
            Err(_) => return false,
        };
        let scid = msg.short_channel_id;
        if msg.node_id_1 >= msg.node_id_2 {
            return false;
        }
        if self.chans.contains_key(&scid) {
            return false;
        }

        let mut chan =
            Channel::new(scid, msg.node_id_1, msg.node_id_2, satoshis);
        chan.channel_announce = Some(announce.to_vec());
        chan.bcast.index = index;
        if index != 0 {
            self.broadcast.restore();
        } else {
            self.unupdated.insert(scid);
        }
        self.add_channel(chan);
        true
    }

    /// Adds a `channel_update` without signature verification; the entry
    /// point for trusted sources. Assigns the store record when `index` is
    /// 0, and promotes a not-yet-updated channel into announceability on
    /// its first update.
    pub fn routing_add_channel_update(
        &mut self,
        update: &[u8],
        index: u32,
    ) -> bool {
        let msg = match ChannelUpdate::from_wire(update) {
            Ok(msg) => msg,
            Err(_) => return false,
        };
        let scid = msg.short_channel_id;
        let direction = msg.direction();

        let (is_public, prev_half_index, announce, capacity, endpoints) =
            match self.chans.get(&scid) {
                Some(chan) => (
                    chan.is_public(),
                    chan.half[direction].bcast.index,
                    chan.channel_announce.clone(),
                    chan.capacity_sat,
                    chan.nodes,
                ),
                None => return false,
            };

        // the first update makes a public channel broadcastable: persist
        // its announcement, then any node announcements deferred behind it
        if index == 0 && self.unupdated.remove(&scid) {
            if let Some(announce) = announce {
                let ann_index = self.broadcast.insert(
                    &StoreMessage::ChannelAnnouncement {
                        announce,
                        satoshis: capacity,
                    },
                    0,
                );
                if let Some(chan) = self.chans.get_mut(&scid) {
                    chan.bcast.timestamp = msg.timestamp;
                    chan.bcast.index = ann_index;
                }
                if endpoints.contains(&self.local_id) {
                    self.local_channel_announced = true;
                }
                for id in endpoints {
                    let deferred = self.nodes.get(&id).and_then(|node| {
                        if node.bcast.index == 0 {
                            node.node_announcement.clone()
                        } else {
                            None
                        }
                    });
                    if let Some(bytes) = deferred {
                        let node_index = self
                            .broadcast
                            .insert(&StoreMessage::NodeAnnouncement(bytes), 0);
                        if let Some(node) = self.nodes.get_mut(&id) {
                            node.bcast.index = node_index;
                        }
                    }
                }
            }
        }

        let new_index = if index != 0 {
            if prev_half_index == 0 {
                self.broadcast.restore();
            }
            index
        } else if is_public {
            self.broadcast.insert(
                &StoreMessage::ChannelUpdate(update.to_vec()),
                prev_half_index,
            )
        } else {
            // private channels are not broadcast and their updates are
            // re-announced by the channel daemon after restart
            0
        };

        match self.chans.get_mut(&scid) {
            Some(chan) => {
                let half = &mut chan.half[direction];
                half.channel_update = Some(update.to_vec());
                half.bcast = Broadcastable {
                    timestamp: msg.timestamp,
                    index: new_index,
                };
                half.base_fee = msg.fee_base_msat;
                half.proportional_fee = msg.fee_proportional_millionths;
                half.delay = msg.cltv_expiry_delta;
                half.htlc_minimum_msat = msg.htlc_minimum_msat;
                half.htlc_maximum_msat = msg.htlc_maximum_msat;
                half.channel_flags = msg.channel_flags;
                half.message_flags = msg.message_flags;
                chan.local_disabled = false;
                true
            }
            None => false,
        }
    }

    /// Adds a `node_announcement` without signature verification; the entry
    /// point for trusted sources. The node must already be known through at
    /// least one channel.
    pub fn routing_add_node_announcement(
        &mut self,
        announcement: &[u8],
        index: u32,
    ) -> bool {
        let msg = match NodeAnnouncement::from_wire(announcement) {
            Ok(msg) => msg,
            Err(_) => return false,
        };
        let id = msg.node_id;
        let prev_index = match self.nodes.get(&id) {
            Some(node) => node.bcast.index,
            None => return false,
        };

        let new_index = if index != 0 {
            if prev_index == 0 {
                self.broadcast.restore();
            }
            index
        } else if self.node_persistable(&id) {
            self.broadcast.insert(
                &StoreMessage::NodeAnnouncement(announcement.to_vec()),
                prev_index,
            )
        } else {
            // no adjacent channel is in the store yet; the record is
            // written when the first one is promoted
            0
        };

        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.alias = msg.alias;
                node.rgb_color = msg.rgb_color;
                node.addresses = msg.addresses;
                node.features = msg.features;
                node.node_announcement = Some(announcement.to_vec());
                node.bcast = Broadcastable {
                    timestamp: msg.timestamp,
                    index: new_index,
                };
                true
            }
            None => false,
        }
    }

    /// Inserts a local private channel; shared by the live path and the
    /// store replay (which must not persist it a second time).
    pub(crate) fn routing_add_local_channel(&mut self, msg: &[u8]) -> bool {
        let parsed = match LocalAddChannel::from_wire(msg) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("invalid local_add_channel message: {}", err);
                return false;
            }
        };
        if parsed.chain_hash != self.chain_hash {
            warn!(
                "local_add_channel for foreign chain {} ignored",
                parsed.chain_hash
            );
            return false;
        }
        let scid = parsed.short_channel_id;
        if self.chans.contains_key(&scid) {
            warn!("attempted to local_add_channel known channel {}", scid);
            return false;
        }
        if parsed.remote_node_id == self.local_id {
            warn!("local_add_channel connects the local node to itself");
            return false;
        }
        let (node_1, node_2) = if self.local_id < parsed.remote_node_id {
            (self.local_id, parsed.remote_node_id)
        } else {
            (parsed.remote_node_id, self.local_id)
        };
        self.add_channel(Channel::new(scid, node_1, node_2, parsed.satoshis));
        true
    }

    /// Graph-only channel removal used when replaying deletion records.
    pub(crate) fn del_channel(&mut self, scid: &ShortChannelId) -> bool {
        self.remove_channel(scid).is_some()
    }

    // Internals
    // ---------

    fn add_channel(&mut self, chan: Channel) {
        for id in chan.nodes {
            self.nodes
                .entry(id)
                .or_insert_with(|| Node::new(id))
                .chans
                .insert(chan.short_channel_id);
        }
        self.chans.insert(chan.short_channel_id, chan);
    }

    /// Cascading removal: the channel, its half-channels, the adjacency
    /// entries, and finally any endpoint left with no channels and no
    /// standalone announcement.
    fn remove_channel(&mut self, scid: &ShortChannelId) -> Option<Channel> {
        let chan = self.chans.remove(scid)?;
        self.unupdated.remove(scid);
        self.broadcast.forget(chan.bcast.index);
        for half in &chan.half {
            self.broadcast.forget(half.bcast.index);
        }
        for id in chan.nodes {
            let collapse = match self.nodes.get_mut(&id) {
                Some(node) => {
                    node.chans.remove(scid);
                    node.chans.is_empty() && !node.is_announced()
                }
                None => false,
            };
            if collapse {
                if let Some(node) = self.nodes.remove(&id) {
                    self.broadcast.forget(node.bcast.index);
                }
            }
        }
        Some(chan)
    }

    /// A node announcement may be written to the store only once at least
    /// one adjacent channel has a record there (otherwise replay would see
    /// an announcement for a node nothing has created yet).
    fn node_persistable(&self, id: &NodeId) -> bool {
        match self.nodes.get(id) {
            Some(node) => node.chans.iter().any(|scid| {
                self.chans
                    .get(&scid)
                    .map(|chan| chan.is_announced() || !chan.is_public())
                    .unwrap_or(false)
            }),
            None => false,
        }
    }

    /// Runs the latched store compaction, if the staleness trigger fired.
    pub fn maybe_rewrite_store(&mut self) {
        if !self.broadcast.rewrite_due() {
            return;
        }
        if let Some(mut store) = self.broadcast.store.take() {
            if let Err(err) = store.rewrite(self) {
                error!("gossip store compaction failed: {}", err);
            }
            self.broadcast.store = Some(store);
        }
    }
}

#[cfg(test)]
mod test {
    use amplify::Wrapper;
    use secp256k1::ecdsa::Signature;
    use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};

    use super::*;
    use crate::p2p::{
        AddressList, Alias, NodeColor, CHANNEL_FLAGS_DIRECTION,
    };

    struct Actor {
        sk: SecretKey,
        id: NodeId,
    }

    fn actor(seed: u8) -> Actor {
        let sk = SecretKey::from_slice(&[seed; 32]).unwrap();
        let id = NodeId::from(PublicKey::from_secret_key(SECP256K1, &sk));
        Actor { sk, id }
    }

    fn chain() -> Slice32 {
        Slice32::from_inner([0x43; 32])
    }

    fn dummy_sig() -> Signature {
        Signature::from_compact(&[0u8; 64]).unwrap()
    }

    fn sign(sk: &SecretKey, digest: Message) -> Signature {
        SECP256K1.sign_ecdsa(&digest, sk)
    }

    fn scid(n: u32) -> ShortChannelId {
        ShortChannelId::new(600_000 + n, n, 0).unwrap()
    }

    /// Fully signed channel_announcement between `a` and `b`, funded by the
    /// bitcoin keys of `fund_1`/`fund_2`.
    fn announcement(
        scid: ShortChannelId,
        a: &Actor,
        b: &Actor,
        fund_1: &Actor,
        fund_2: &Actor,
    ) -> Vec<u8> {
        let (first, second) = if a.id < b.id { (a, b) } else { (b, a) };
        let mut msg = ChannelAnnouncement {
            node_signature_1: dummy_sig(),
            node_signature_2: dummy_sig(),
            bitcoin_signature_1: dummy_sig(),
            bitcoin_signature_2: dummy_sig(),
            features: vec![],
            chain_hash: chain(),
            short_channel_id: scid,
            node_id_1: first.id,
            node_id_2: second.id,
            bitcoin_key_1: fund_1.id,
            bitcoin_key_2: fund_2.id,
        };
        let digest =
            ChannelAnnouncement::signed_digest(&msg.to_wire().unwrap())
                .unwrap();
        msg.node_signature_1 = sign(&first.sk, digest);
        msg.node_signature_2 = sign(&second.sk, digest);
        msg.bitcoin_signature_1 = sign(&fund_1.sk, digest);
        msg.bitcoin_signature_2 = sign(&fund_2.sk, digest);
        msg.to_wire().unwrap()
    }

    /// Signed channel_update announced by `signer` for its direction of the
    /// channel between `a` and `b`.
    fn update(
        scid: ShortChannelId,
        a: &Actor,
        b: &Actor,
        signer: &Actor,
        timestamp: u32,
        fee_base_msat: u32,
    ) -> Vec<u8> {
        let lesser = if a.id < b.id { a } else { b };
        let direction = if signer.id == lesser.id { 0 } else { 1 };
        let mut msg = ChannelUpdate {
            signature: dummy_sig(),
            chain_hash: chain(),
            short_channel_id: scid,
            timestamp: Timestamp::from(timestamp),
            message_flags: 0,
            channel_flags: direction & CHANNEL_FLAGS_DIRECTION,
            cltv_expiry_delta: 40,
            htlc_minimum_msat: 0,
            fee_base_msat,
            fee_proportional_millionths: 1,
            htlc_maximum_msat: None,
        };
        let digest =
            ChannelUpdate::signed_digest(&msg.to_wire().unwrap()).unwrap();
        msg.signature = sign(&signer.sk, digest);
        msg.to_wire().unwrap()
    }

    fn node_announcement(signer: &Actor, timestamp: u32) -> Vec<u8> {
        let mut msg = NodeAnnouncement {
            signature: dummy_sig(),
            features: vec![],
            timestamp: Timestamp::from(timestamp),
            node_id: signer.id,
            rgb_color: NodeColor::from([1, 2, 3]),
            alias: Alias::from(Slice32::from_inner([b'x'; 32])),
            addresses: AddressList::default(),
        };
        let digest =
            NodeAnnouncement::signed_digest(&msg.to_wire().unwrap()).unwrap();
        msg.signature = sign(&signer.sk, digest);
        msg.to_wire().unwrap()
    }

    fn new_rstate() -> RoutingState {
        RoutingState::new(chain(), actor(99).id, 3600)
    }

    /// Announce + resolve a channel and feed one update so it is fully
    /// live.
    fn live_channel(
        rstate: &mut RoutingState,
        scid: ShortChannelId,
        a: &Actor,
        b: &Actor,
    ) {
        let (f1, f2) = (actor(41), actor(42));
        let ann = announcement(scid, a, b, &f1, &f2);
        assert_eq!(
            rstate.handle_channel_announcement(None, &ann),
            Ok(Some(scid))
        );
        let script = funding_script(&f1.id, &f2.id).unwrap();
        assert!(rstate.handle_pending_cannouncement(scid, 1_000_000, &script));
        rstate
            .handle_channel_update(&update(scid, a, b, a, 100, 1000))
            .unwrap();
    }

    #[test]
    fn pending_then_resolved() {
        let (a, b, f1, f2) = (actor(1), actor(2), actor(3), actor(4));
        let mut rstate = new_rstate();
        let chan_id = scid(1);

        let ann = announcement(chan_id, &a, &b, &f1, &f2);
        assert_eq!(
            rstate.handle_channel_announcement(Some(actor(50).id), &ann),
            Ok(Some(chan_id))
        );
        assert!(rstate.get_channel(&chan_id).is_none());
        assert!(rstate.pending_announcement(&chan_id).is_some());

        // update and node announcement arriving early are buffered
        let upd = update(chan_id, &a, &b, &a, 100, 1000);
        rstate.handle_channel_update(&upd).unwrap();
        rstate
            .handle_node_announcement(&node_announcement(&a, 100))
            .unwrap();
        assert!(rstate.get_channel(&chan_id).is_none());

        let script = funding_script(&f1.id, &f2.id).unwrap();
        assert!(rstate.handle_pending_cannouncement(
            chan_id,
            1_000_000,
            &script
        ));

        let chan = rstate.get_channel(&chan_id).unwrap();
        assert!(chan.is_public());
        assert!(chan.is_announced());
        assert_eq!(chan.capacity_sat, 1_000_000);
        let direction = if a.id < b.id { 0 } else { 1 };
        assert!(chan.half[direction].is_defined());
        assert_eq!(
            chan.half[direction].bcast.timestamp,
            Timestamp::from(100u32)
        );
        assert!(rstate.get_node(&a.id).unwrap().is_announced());
        assert!(rstate.pending_announcement(&chan_id).is_none());
    }

    #[test]
    fn oracle_script_mismatch_drops_pending() {
        let (a, b, f1, f2) = (actor(1), actor(2), actor(3), actor(4));
        let mut rstate = new_rstate();
        let chan_id = scid(1);

        let ann = announcement(chan_id, &a, &b, &f1, &f2);
        rstate.handle_channel_announcement(None, &ann).unwrap();

        // swapped funding keys give a different multisig
        let wrong = funding_script(&f2.id, &f1.id).unwrap();
        assert!(!rstate.handle_pending_cannouncement(
            chan_id, 1_000_000, &wrong
        ));
        assert!(rstate.get_channel(&chan_id).is_none());
        assert!(rstate.pending_announcement(&chan_id).is_none());
    }

    #[test]
    fn update_supersede_monotonicity() {
        let (a, b) = (actor(1), actor(2));
        let mut rstate = new_rstate();
        let chan_id = scid(1);
        live_channel(&mut rstate, chan_id, &a, &b);
        let direction = if a.id < b.id { 0 } else { 1 };

        // older timestamp: absorbed without error, nothing changes
        let stale = update(chan_id, &a, &b, &a, 99, 2000);
        assert_eq!(rstate.handle_channel_update(&stale), Ok(()));
        let half = &rstate.get_channel(&chan_id).unwrap().half[direction];
        assert_eq!(half.bcast.timestamp, Timestamp::from(100u32));
        assert_eq!(half.base_fee, 1000);

        // same timestamp, different payload: protocol error
        let conflict = update(chan_id, &a, &b, &a, 100, 3000);
        assert_eq!(
            rstate.handle_channel_update(&conflict),
            Err(Error::UpdateConflict {
                scid: chan_id,
                direction: direction as u8,
                timestamp: Timestamp::from(100u32),
            })
        );

        // same timestamp, identical payload: idempotent
        let replay = update(chan_id, &a, &b, &a, 100, 1000);
        assert_eq!(rstate.handle_channel_update(&replay), Ok(()));

        // newer timestamp supersedes
        let fresh = update(chan_id, &a, &b, &a, 101, 5000);
        assert_eq!(rstate.handle_channel_update(&fresh), Ok(()));
        let half = &rstate.get_channel(&chan_id).unwrap().half[direction];
        assert_eq!(half.bcast.timestamp, Timestamp::from(101u32));
        assert_eq!(half.base_fee, 5000);
    }

    #[test]
    fn announcement_rejections() {
        let (a, b, f1, f2) = (actor(1), actor(2), actor(3), actor(4));
        let mut rstate = new_rstate();
        let chan_id = scid(1);

        // a channel from a node to itself
        let mut own = ChannelAnnouncement::from_wire(&announcement(
            chan_id, &a, &b, &f1, &f2,
        ))
        .unwrap();
        own.node_id_2 = own.node_id_1;
        assert_eq!(
            rstate.handle_channel_announcement(None, &own.to_wire().unwrap()),
            Err(Error::ChannelToSelf(chan_id, own.node_id_1))
        );

        // endpoints out of order
        let mut unsorted = ChannelAnnouncement::from_wire(&announcement(
            chan_id, &a, &b, &f1, &f2,
        ))
        .unwrap();
        std::mem::swap(&mut unsorted.node_id_1, &mut unsorted.node_id_2);
        assert_eq!(
            rstate
                .handle_channel_announcement(None, &unsorted.to_wire().unwrap()),
            Err(Error::UnorderedNodeIds(chan_id))
        );

        // wrong chain
        let mut foreign = RoutingState::new(
            Slice32::from_inner([0xEE; 32]),
            actor(99).id,
            3600,
        );
        assert!(matches!(
            foreign.handle_channel_announcement(
                None,
                &announcement(chan_id, &a, &b, &f1, &f2)
            ),
            Err(Error::ChainHashMismatch(_))
        ));

        // tampered signature
        let mut forged = ChannelAnnouncement::from_wire(&announcement(
            chan_id, &a, &b, &f1, &f2,
        ))
        .unwrap();
        forged.node_signature_1 = dummy_sig();
        assert!(matches!(
            rstate
                .handle_channel_announcement(None, &forged.to_wire().unwrap()),
            Err(Error::InvalidSignature { .. })
        ));

        // nothing of the above left any trace
        assert!(rstate.get_channel(&chan_id).is_none());
        assert!(rstate.pending_announcement(&chan_id).is_none());
        assert!(rstate.nodes.is_empty());
    }

    #[test]
    fn reannounce_idempotency_and_conflict() {
        let (a, b, f1, f2) = (actor(1), actor(2), actor(3), actor(4));
        let mut rstate = new_rstate();
        let chan_id = scid(1);

        let ann = announcement(chan_id, &a, &b, &f1, &f2);
        assert_eq!(
            rstate.handle_channel_announcement(Some(actor(50).id), &ann),
            Ok(Some(chan_id))
        );
        // identical re-announce while pending: absorbed, second offerer
        // recorded
        assert_eq!(
            rstate.handle_channel_announcement(Some(actor(51).id), &ann),
            Ok(None)
        );
        // different bytes for the same scid: protocol violation
        let other = announcement(chan_id, &a, &b, &f2, &f1);
        assert_eq!(
            rstate.handle_channel_announcement(None, &other),
            Err(Error::AnnouncementConflict(chan_id))
        );

        // resolved channel behaves the same way
        let script = funding_script(&f1.id, &f2.id).unwrap();
        assert!(rstate.handle_pending_cannouncement(
            chan_id,
            1_000_000,
            &script
        ));
        assert_eq!(rstate.handle_channel_announcement(None, &ann), Ok(None));
        assert_eq!(
            rstate.handle_channel_announcement(None, &other),
            Err(Error::AnnouncementConflict(chan_id))
        );
    }

    #[test]
    fn disconnecting_last_offerer_cancels_pending() {
        let (a, b, f1, f2) = (actor(1), actor(2), actor(3), actor(4));
        let (peer_1, peer_2) = (actor(50), actor(51));
        let mut rstate = new_rstate();
        let chan_id = scid(1);

        let ann = announcement(chan_id, &a, &b, &f1, &f2);
        rstate
            .handle_channel_announcement(Some(peer_1.id), &ann)
            .unwrap();
        rstate
            .handle_channel_announcement(Some(peer_2.id), &ann)
            .unwrap();

        rstate.forget_peer(&peer_1.id);
        assert!(rstate.pending_announcement(&chan_id).is_some());
        rstate.forget_peer(&peer_2.id);
        assert!(rstate.pending_announcement(&chan_id).is_none());
    }

    #[test]
    fn node_announcement_rules() {
        let (a, b) = (actor(1), actor(2));
        let mut rstate = new_rstate();

        // unknown node, nothing pending: silently dropped
        assert_eq!(
            rstate.handle_node_announcement(&node_announcement(&a, 100)),
            Ok(())
        );
        assert!(rstate.get_node(&a.id).is_none());

        let chan_id = scid(1);
        live_channel(&mut rstate, chan_id, &a, &b);

        assert_eq!(
            rstate.handle_node_announcement(&node_announcement(&a, 200)),
            Ok(())
        );
        let node = rstate.get_node(&a.id).unwrap();
        assert!(node.is_announced());
        assert_eq!(node.bcast.timestamp, Timestamp::from(200u32));
        assert_eq!(node.alias, Alias::from(Slice32::from_inner([b'x'; 32])));

        // stale one is absorbed
        assert_eq!(
            rstate.handle_node_announcement(&node_announcement(&a, 150)),
            Ok(())
        );
        assert_eq!(
            rstate.get_node(&a.id).unwrap().bcast.timestamp,
            Timestamp::from(200u32)
        );

        // same timestamp, different content: protocol error
        let mut conflict = NodeAnnouncement::from_wire(&node_announcement(
            &a, 200,
        ))
        .unwrap();
        conflict.rgb_color = NodeColor::from([9, 9, 9]);
        let digest =
            NodeAnnouncement::signed_digest(&conflict.to_wire().unwrap())
                .unwrap();
        conflict.signature = sign(&a.sk, digest);
        assert_eq!(
            rstate.handle_node_announcement(&conflict.to_wire().unwrap()),
            Err(Error::NodeAnnouncementConflict {
                node: a.id,
                timestamp: Timestamp::from(200u32),
            })
        );
    }

    #[test]
    fn deletion_cascades_and_is_idempotent() {
        let (a, b) = (actor(1), actor(2));
        let mut rstate = new_rstate();
        let chan_id = scid(1);
        live_channel(&mut rstate, chan_id, &a, &b);
        // announce node `a` so it survives the channel
        rstate
            .handle_node_announcement(&node_announcement(&a, 200))
            .unwrap();

        let live_before = rstate.broadcastable_count();
        rstate.channel_delete(&chan_id);
        assert!(rstate.get_channel(&chan_id).is_none());
        // `b` had nothing but the channel; `a` is kept by its announcement
        assert!(rstate.get_node(&b.id).is_none());
        assert!(rstate.get_node(&a.id).is_some());
        assert!(rstate.broadcastable_count() < live_before);

        // deleting again must not disturb anything
        let nodes_before = rstate.nodes.len();
        rstate.channel_delete(&chan_id);
        assert_eq!(rstate.nodes.len(), nodes_before);
    }

    #[test]
    fn prune_removes_stale_channels() {
        let (a, b) = (actor(1), actor(2));
        let mut rstate = new_rstate(); // prune_timeout = 3600
        let chan_id = scid(1);
        let (f1, f2) = (actor(41), actor(42));

        let ann = announcement(chan_id, &a, &b, &f1, &f2);
        rstate.handle_channel_announcement(None, &ann).unwrap();
        let script = funding_script(&f1.id, &f2.id).unwrap();
        assert!(rstate.handle_pending_cannouncement(
            chan_id,
            1_000_000,
            &script
        ));

        let now = *rstate.gossip_time_now().as_inner();
        rstate
            .handle_channel_update(&update(
                chan_id,
                &a,
                &b,
                &a,
                now - 7200,
                1000,
            ))
            .unwrap();
        rstate
            .handle_channel_update(&update(
                chan_id,
                &a,
                &b,
                &b,
                now - 7100,
                1000,
            ))
            .unwrap();

        assert_eq!(rstate.route_prune(), 1);
        assert!(rstate.get_channel(&chan_id).is_none());
        assert!(rstate.get_node(&a.id).is_none());
        assert!(rstate.get_node(&b.id).is_none());
    }

    #[test]
    fn prune_spares_fresh_and_unupdated() {
        let (a, b, c) = (actor(1), actor(2), actor(5));
        let mut rstate = new_rstate();
        let fresh_chan = scid(1);
        live_channel(&mut rstate, fresh_chan, &a, &b);
        let now = *rstate.gossip_time_now().as_inner();
        rstate
            .handle_channel_update(&update(
                fresh_chan, &a, &b, &a, now, 1000,
            ))
            .unwrap();

        // announced but never updated: no staleness evidence
        let quiet_chan = scid(2);
        let (f1, f2) = (actor(41), actor(42));
        let ann = announcement(quiet_chan, &b, &c, &f1, &f2);
        rstate.handle_channel_announcement(None, &ann).unwrap();
        let script = funding_script(&f1.id, &f2.id).unwrap();
        assert!(rstate.handle_pending_cannouncement(
            quiet_chan, 500_000, &script
        ));

        assert_eq!(rstate.route_prune(), 0);
        assert!(rstate.get_channel(&fresh_chan).is_some());
        assert!(rstate.get_channel(&quiet_chan).is_some());
    }

    #[test]
    fn local_channels_stay_private() {
        let local = actor(99);
        let remote = actor(7);
        let mut rstate = new_rstate();
        let chan_id = scid(1);

        let msg = LocalAddChannel {
            chain_hash: chain(),
            short_channel_id: chan_id,
            remote_node_id: remote.id,
            satoshis: 250_000,
        }
        .to_wire()
        .unwrap();
        assert!(rstate.handle_local_add_channel(&msg));
        let chan = rstate.get_channel(&chan_id).unwrap();
        assert!(!chan.is_public());
        assert!(!chan.is_announced());
        assert_eq!(chan.other_node(&local.id), Some(remote.id));
        assert_eq!(rstate.broadcastable_count(), 0);

        // duplicate local add is refused
        assert!(!rstate.handle_local_add_channel(&msg));

        // peer lifecycle flips the local-disabled gate
        rstate.set_local_disabled(&remote.id, true);
        assert!(rstate.get_channel(&chan_id).unwrap().local_disabled);
        rstate.set_local_disabled(&remote.id, false);
        assert!(!rstate.get_channel(&chan_id).unwrap().local_disabled);
    }
}
