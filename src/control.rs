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

//! Daemon control: wiring of gossip receipt, funding-oracle round-trips,
//! peer lifecycle and persistence into a single component.
//!
//! The daemon is single-threaded cooperative: all graph and store mutations
//! happen on the caller's event loop; the only suspension points are the
//! funding oracle (modelled as a fire-and-forget query answered later
//! through [`GossipDaemon::funding_found`]) and peer I/O, which stays
//! outside this crate.

use std::path::Path;

use bitcoin::Script;

use crate::p2p::{
    peek_type, NodeId, ShortChannelId, MSG_TYPE_CHANNEL_ANNOUNCEMENT,
    MSG_TYPE_CHANNEL_UPDATE, MSG_TYPE_LOCAL_ADD_CHANNEL,
    MSG_TYPE_NODE_ANNOUNCEMENT,
};
use crate::routing::{Error, RoutingState};
use crate::store::{self, LoadStats, Store};

/// Contract of the blockchain lookup collaborator: given a short channel
/// id, eventually report the funding output back through
/// [`GossipDaemon::funding_found`] or [`GossipDaemon::funding_missing`].
pub trait FundingOracle {
    /// Requests confirmation of the funding output for a channel. The
    /// request is fire-and-forget; the answer arrives asynchronously.
    fn query_funding(&mut self, short_channel_id: ShortChannelId);
}

/// The gossip daemon core: routing state, gossip store and the funding
/// oracle, orchestrated for the receipt → validate → stage → resolve →
/// insert → persist flow.
pub struct GossipDaemon<O: FundingOracle> {
    rstate: RoutingState,
    oracle: O,
    load_stats: LoadStats,
}

impl<O: FundingOracle> GossipDaemon<O> {
    /// Brings up the daemon: opens the gossip store at `store_path`,
    /// replays it into the given routing state and attaches it for
    /// subsequent persistence.
    pub fn with<P: AsRef<Path>>(
        mut rstate: RoutingState,
        store_path: P,
        oracle: O,
    ) -> Result<Self, store::Error> {
        let mut store = Store::open(store_path)?;
        let load_stats = store.load(&mut rstate);
        info!("gossip store: read {} from store", load_stats);
        rstate.attach_store(store);
        Ok(GossipDaemon {
            rstate,
            oracle,
            load_stats,
        })
    }

    /// Per-type record counts of the startup replay.
    #[inline]
    pub fn load_stats(&self) -> LoadStats {
        self.load_stats
    }

    #[inline]
    pub fn routing_state(&self) -> &RoutingState {
        &self.rstate
    }

    #[inline]
    pub fn routing_state_mut(&mut self) -> &mut RoutingState {
        &mut self.rstate
    }

    /// Routes a decoded-but-unverified gossip message from a peer (or the
    /// local channel daemon, for `local_add_channel`) into the network
    /// view. The returned error is the protocol-error payload for the
    /// sending peer.
    pub fn process_gossip(
        &mut self,
        source_peer: Option<NodeId>,
        msg: &[u8],
    ) -> Result<(), Error> {
        let result = match peek_type(msg) {
            Some(MSG_TYPE_CHANNEL_ANNOUNCEMENT) => self
                .rstate
                .handle_channel_announcement(source_peer, msg)
                .map(|pending| {
                    if let Some(scid) = pending {
                        self.oracle.query_funding(scid);
                    }
                }),
            Some(MSG_TYPE_CHANNEL_UPDATE) => {
                self.rstate.handle_channel_update(msg)
            }
            Some(MSG_TYPE_NODE_ANNOUNCEMENT) => {
                self.rstate.handle_node_announcement(msg)
            }
            Some(MSG_TYPE_LOCAL_ADD_CHANNEL) => {
                self.rstate.handle_local_add_channel(msg);
                Ok(())
            }
            Some(other) => Err(Error::UnexpectedMessage(other)),
            None => Err(Error::Encoding(
                lightning_encoding::Error::DataIntegrityError(s!(
                    "message too short to carry a type"
                )),
            )),
        };
        self.rstate.maybe_rewrite_store();
        result
    }

    /// Oracle response: the funding output of a pending announcement was
    /// found on-chain. Returns whether the channel was inserted.
    pub fn funding_found(
        &mut self,
        short_channel_id: ShortChannelId,
        satoshis: u64,
        script: &Script,
    ) -> bool {
        let inserted = self.rstate.handle_pending_cannouncement(
            short_channel_id,
            satoshis,
            script,
        );
        self.rstate.maybe_rewrite_store();
        inserted
    }

    /// Oracle response: no such funding output. The pending announcement
    /// and its buffered followers are dropped.
    pub fn funding_missing(&mut self, short_channel_id: ShortChannelId) {
        warn!(
            "funding output for {} not found on-chain; dropping the \
             announcement",
            short_channel_id
        );
        self.rstate.drop_pending(&short_channel_id);
    }

    /// A peer connected (or reconnected): direct channels with it become
    /// routable again.
    pub fn peer_connected(&mut self, peer: &NodeId) {
        self.rstate.set_local_disabled(peer, false);
    }

    /// A peer disconnected: direct channels with it are locally disabled
    /// and pending funding lookups nobody else vouches for are cancelled.
    pub fn peer_disconnected(&mut self, peer: &NodeId) {
        self.rstate.forget_peer(peer);
        self.rstate.set_local_disabled(peer, true);
    }

    /// A local channel was closed or abandoned.
    pub fn channel_close(&mut self, short_channel_id: &ShortChannelId) {
        self.rstate.channel_delete(short_channel_id);
        self.rstate.maybe_rewrite_store();
    }

    /// Periodic tick: prunes channels whose gossip went stale. Returns the
    /// number of channels removed.
    pub fn prune_tick(&mut self) -> usize {
        let pruned = self.rstate.route_prune();
        self.rstate.maybe_rewrite_store();
        pruned
    }
}

#[cfg(test)]
mod test {
    use amplify::{Slice32, Wrapper};
    use secp256k1::{PublicKey, SecretKey, SECP256K1};

    use super::*;
    use crate::p2p::LocalAddChannel;

    #[derive(Default)]
    struct NullOracle;

    impl FundingOracle for NullOracle {
        fn query_funding(&mut self, _short_channel_id: ShortChannelId) {}
    }

    fn node(seed: u8) -> NodeId {
        let sk = SecretKey::from_slice(&[seed; 32]).unwrap();
        NodeId::from(PublicKey::from_secret_key(SECP256K1, &sk))
    }

    fn daemon() -> (GossipDaemon<NullOracle>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let rstate = RoutingState::new(
            Slice32::from_inner([0x43; 32]),
            node(99),
            1209600,
        );
        let daemon = GossipDaemon::with(
            rstate,
            dir.path().join("gossip_store"),
            NullOracle::default(),
        )
        .unwrap();
        (daemon, dir)
    }

    #[test]
    fn fresh_store_loads_empty() {
        let (daemon, _dir) = daemon();
        assert_eq!(daemon.load_stats(), LoadStats::default());
        assert_eq!(daemon.routing_state().broadcastable_count(), 0);
    }

    #[test]
    fn non_gossip_messages_are_rejected() {
        let (mut daemon, _dir) = daemon();
        // init message (type 16) is not gossip
        let err = daemon.process_gossip(None, &[0x00, 0x10, 0x00]);
        assert_eq!(err, Err(Error::UnexpectedMessage(16)));
        assert!(daemon.process_gossip(None, &[0x01]).is_err());
    }

    #[test]
    fn local_add_channel_is_persisted() {
        let (mut daemon, dir) = daemon();
        let scid = crate::p2p::ShortChannelId::new(100, 1, 0).unwrap();
        let msg = LocalAddChannel {
            chain_hash: Slice32::from_inner([0x43; 32]),
            short_channel_id: scid,
            remote_node_id: node(7),
            satoshis: 250_000,
        }
        .to_wire()
        .unwrap();
        daemon.process_gossip(None, &msg).unwrap();
        let chan = daemon.routing_state().get_channel(&scid).unwrap();
        assert!(!chan.is_public());
        assert_eq!(chan.capacity_sat, 250_000);

        // a fresh daemon over the same store rehydrates the channel
        drop(daemon);
        let rstate = RoutingState::new(
            Slice32::from_inner([0x43; 32]),
            node(99),
            1209600,
        );
        let daemon = GossipDaemon::with(
            rstate,
            dir.path().join("gossip_store"),
            NullOracle::default(),
        )
        .unwrap();
        assert_eq!(daemon.load_stats().local_channels, 1);
        assert!(daemon.routing_state().get_channel(&scid).is_some());
    }
}
