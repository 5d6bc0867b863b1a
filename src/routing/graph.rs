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

//! Entities of the routing graph: nodes, bidirectional channels and
//! direction-specific half-channels.
//!
//! The graph is an annotated multigraph kept as two id-keyed maps (nodes by
//! [`NodeId`], channels by [`ShortChannelId`]); channels reference their
//! endpoints by id and nodes keep an adjacency set of channel ids, so no
//! cyclic ownership arises.

use std::collections::btree_set;
use std::collections::BTreeSet;

use bitcoin::Script;

use crate::p2p::{
    AddressList, Alias, NodeColor, NodeId, ShortChannelId, Timestamp,
    CHANNEL_FLAGS_DISABLED,
};

/// Broadcast descriptor attached to every broadcastable entity: the gossip
/// timestamp of the retained message and the byte offset of its record in
/// the gossip store. A zero index means "not written to the store yet".
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Broadcastable {
    /// Timestamp of the message this descriptor belongs to
    pub timestamp: Timestamp,
    /// Byte offset of the record in the gossip store; 0 = not yet announced
    pub index: u32,
}

/// Number of channels kept inline in a node adjacency set before it spills
/// into a heap-allocated ordered set.
pub const NUM_IMMEDIATE_CHANS: usize = 4;

/// Per-node set of adjacent channel ids.
///
/// Most nodes have a handful of channels, so the set starts as an inline
/// fixed-size array and is promoted into a [`BTreeSet`] only when it
/// overflows. Demotion never happens; a node busy enough to overflow once is
/// likely to do it again.
#[derive(Clone, Debug)]
pub enum Adjacency {
    /// Inline storage for the common small case
    Immediate {
        /// Number of used slots
        len: u8,
        /// Channel ids; only the first `len` entries are meaningful
        scids: [ShortChannelId; NUM_IMMEDIATE_CHANS],
    },
    /// Overflow storage
    Spilled(BTreeSet<ShortChannelId>),
}

impl Default for Adjacency {
    fn default() -> Self {
        Adjacency::Immediate {
            len: 0,
            scids: [ShortChannelId::default(); NUM_IMMEDIATE_CHANS],
        }
    }
}

impl Adjacency {
    pub fn len(&self) -> usize {
        match self {
            Adjacency::Immediate { len, .. } => *len as usize,
            Adjacency::Spilled(set) => set.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, scid: &ShortChannelId) -> bool {
        match self {
            Adjacency::Immediate { len, scids } => {
                scids[..*len as usize].contains(scid)
            }
            Adjacency::Spilled(set) => set.contains(scid),
        }
    }

    /// Adds a channel id; returns `false` if it was already present.
    pub fn insert(&mut self, scid: ShortChannelId) -> bool {
        let spilled = match self {
            Adjacency::Immediate { len, scids } => {
                if scids[..*len as usize].contains(&scid) {
                    return false;
                }
                if (*len as usize) < NUM_IMMEDIATE_CHANS {
                    scids[*len as usize] = scid;
                    *len += 1;
                    return true;
                }
                let mut set: BTreeSet<ShortChannelId> =
                    scids.iter().copied().collect();
                set.insert(scid);
                set
            }
            Adjacency::Spilled(set) => return set.insert(scid),
        };
        *self = Adjacency::Spilled(spilled);
        true
    }

    /// Removes a channel id; returns `false` if it was not present.
    pub fn remove(&mut self, scid: &ShortChannelId) -> bool {
        match self {
            Adjacency::Immediate { len, scids } => {
                match scids[..*len as usize].iter().position(|s| s == scid) {
                    Some(pos) => {
                        scids[pos] = scids[*len as usize - 1];
                        *len -= 1;
                        true
                    }
                    None => false,
                }
            }
            Adjacency::Spilled(set) => set.remove(scid),
        }
    }

    pub fn iter(&self) -> AdjacencyIter {
        match self {
            Adjacency::Immediate { len, scids } => {
                AdjacencyIter::Immediate(scids[..*len as usize].iter())
            }
            Adjacency::Spilled(set) => AdjacencyIter::Spilled(set.iter()),
        }
    }
}

/// Iterator over the channel ids adjacent to a node.
pub enum AdjacencyIter<'a> {
    Immediate(std::slice::Iter<'a, ShortChannelId>),
    Spilled(btree_set::Iter<'a, ShortChannelId>),
}

impl<'a> Iterator for AdjacencyIter<'a> {
    type Item = ShortChannelId;

    fn next(&mut self) -> Option<ShortChannelId> {
        match self {
            AdjacencyIter::Immediate(iter) => iter.next().copied(),
            AdjacencyIter::Spilled(iter) => iter.next().copied(),
        }
    }
}

/// A node of the network view.
///
/// Nodes come into existence when the first channel referencing them is
/// added and are destroyed when the last channel is removed, unless a
/// standalone `node_announcement` keeps them alive.
#[derive(Clone, Debug)]
pub struct Node {
    /// Node identity
    pub id: NodeId,

    /// Timestamp and index of the retained `node_announcement` in the store
    pub bcast: Broadcastable,

    /// UTF-8 encoded alias, not zero terminated
    pub alias: Alias,

    /// Color to be used when displaying the name
    pub rgb_color: NodeColor,

    /// Addresses this node may be reached at
    pub addresses: AddressList,

    /// Feature bytes from the announcement
    pub features: Vec<u8>,

    /// Cached `node_announcement` we might forward to new peers
    pub node_announcement: Option<Vec<u8>>,

    /// Channels connecting this node to the rest of the graph
    pub chans: Adjacency,
}

impl Node {
    pub(crate) fn new(id: NodeId) -> Node {
        Node {
            id,
            bcast: Broadcastable::default(),
            alias: Alias::default(),
            rgb_color: NodeColor::default(),
            addresses: AddressList::default(),
            features: vec![],
            node_announcement: None,
            chans: Adjacency::default(),
        }
    }

    /// A node is announced once a valid `node_announcement` was accepted
    /// for it.
    #[inline]
    pub fn is_announced(&self) -> bool {
        self.node_announcement.is_some()
    }
}

/// Direction-specific policy of a channel.
///
/// `half[i]` of a [`Channel`] describes the direction from `nodes[i]` to
/// `nodes[1 - i]`. Policy fields are meaningful only once the first
/// `channel_update` was accepted for the direction.
#[derive(Clone, Debug, Default)]
pub struct HalfChannel {
    /// Cached latest accepted `channel_update`, `None` until the first
    /// update is seen
    pub channel_update: Option<Vec<u8>>,

    /// Timestamp and store index of the retained update
    pub bcast: Broadcastable,

    /// Base fee in millisatoshi
    pub base_fee: u32,

    /// Proportional fee in parts per million
    pub proportional_fee: u32,

    /// Delay for HTLCs in blocks
    pub delay: u16,

    /// Minimum HTLC amount in millisatoshi
    pub htlc_minimum_msat: u64,

    /// Maximum HTLC amount in millisatoshi, advertised only when the
    /// `option_channel_htlc_max` message flag is set
    pub htlc_maximum_msat: Option<u64>,

    /// Flags as specified by the `channel_update`s, among other things
    /// indicating direction wrt the channel endpoints
    pub channel_flags: u8,

    /// Flags as specified by the `channel_update`s, indicating optional
    /// fields
    pub message_flags: u8,
}

impl HalfChannel {
    /// The direction exists for routing purposes only once an update was
    /// accepted for it.
    #[inline]
    pub fn is_defined(&self) -> bool {
        self.channel_update.is_some()
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.is_defined() && self.channel_flags & CHANNEL_FLAGS_DISABLED == 0
    }
}

/// A bidirectional channel of the network view.
#[derive(Clone, Debug)]
pub struct Channel {
    /// Channel identity
    pub short_channel_id: ShortChannelId,

    /// Endpoint nodes; invariant: `nodes[0] < nodes[1]`
    pub nodes: [NodeId; 2],

    /// Capacity of the funding output, in satoshis
    pub capacity_sat: u64,

    /// Funding output script, when the funding oracle resolved it; absent
    /// for replayed and local channels
    pub funding_script: Option<Script>,

    /// Directional policies; `half[i]` runs from `nodes[i]` to
    /// `nodes[1 - i]`
    pub half: [HalfChannel; 2],

    /// Original `channel_announcement` bytes; `None` for local private
    /// channels
    pub channel_announce: Option<Vec<u8>>,

    /// Timestamp and store index of the announcement record
    pub bcast: Broadcastable,

    /// Disabled locally (due to peer disconnect)
    pub local_disabled: bool,
}

impl Channel {
    pub(crate) fn new(
        short_channel_id: ShortChannelId,
        node_1: NodeId,
        node_2: NodeId,
        capacity_sat: u64,
    ) -> Channel {
        debug_assert!(node_1 < node_2);
        Channel {
            short_channel_id,
            nodes: [node_1, node_2],
            capacity_sat,
            funding_script: None,
            half: [HalfChannel::default(), HalfChannel::default()],
            channel_announce: None,
            bcast: Broadcastable::default(),
            local_disabled: false,
        }
    }

    /// A local channel can exist which is not announcable; a channel is
    /// public iff its announcement is known.
    #[inline]
    pub fn is_public(&self) -> bool {
        self.channel_announce.is_some()
    }

    /// A channel is only announced once its announcement record made it
    /// into the gossip store, which happens together with the first
    /// `channel_update`.
    #[inline]
    pub fn is_announced(&self) -> bool {
        self.bcast.index != 0
    }

    /// The opposite endpoint, if `id` is one of the two.
    pub fn other_node(&self, id: &NodeId) -> Option<NodeId> {
        if &self.nodes[0] == id {
            Some(self.nodes[1])
        } else if &self.nodes[1] == id {
            Some(self.nodes[0])
        } else {
            None
        }
    }
}
