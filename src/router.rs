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

//! Least-cost path finding over the routing graph and reaction to payment
//! failures reported from the onion layer.

use std::collections::BTreeMap;

use bitcoin::hashes::siphash24;

use crate::p2p::{NodeId, ShortChannelId, CHANNEL_FLAGS_DISABLED};
use crate::routing::{HalfChannel, RoutingState};

/// Hard cap on route length; also the default number of relaxation rounds.
pub const ROUTING_MAX_HOPS: usize = 20;

/// Onion failure code flag: the failure is unparseable onion data
pub const FAILCODE_BADONION: u16 = 0x8000;
/// Onion failure code flag: the failure is permanent
pub const FAILCODE_PERM: u16 = 0x4000;
/// Onion failure code flag: the failure concerns a node, not a channel
pub const FAILCODE_NODE: u16 = 0x2000;
/// Onion failure code flag: the failure carries a `channel_update`
pub const FAILCODE_UPDATE: u16 = 0x1000;

/// A directed half of a channel, as used in routing exclusion lists.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display,
)]
#[display("{short_channel_id}/{direction}")]
pub struct ShortChannelIdDir {
    /// The channel
    pub short_channel_id: ShortChannelId,
    /// Direction: the index of the sending endpoint
    pub direction: u8,
}

/// One hop of a computed route.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[display("{channel_id}/{direction} -> {node_id}")]
pub struct RouteHop {
    /// Channel to forward over
    pub channel_id: ShortChannelId,
    /// Direction of the half-channel used
    pub direction: u8,
    /// Node the hop delivers to
    pub node_id: NodeId,
    /// Amount handed to that node, fees for the remaining hops included
    pub amount_msat: u64,
    /// CLTV value at that node: the final CLTV plus all remaining deltas
    pub delay: u32,
}

/// Per-node relaxation label: cost of reaching the destination from here.
#[derive(Clone, Copy, Debug)]
struct CostLabel {
    /// Amount this node must forward (destination amount plus downstream
    /// fees)
    msat: u64,
    /// Accumulated risk premium
    risk: u64,
    /// Accumulated CLTV, final CLTV included
    delay: u32,
    /// Next channel towards the destination
    next: Option<(ShortChannelId, u8)>,
}

fn fee_msat(half: &HalfChannel, amount_msat: u64) -> u64 {
    half.base_fee as u64
        + (amount_msat as u128 * half.proportional_fee as u128 / 1_000_000)
            as u64
}

/// Deterministic fee perturbation: scales the fee by `1 + fuzz * r` with
/// `r` in `[-1, 1]` keyed by the seed and the channel id, so identical
/// queries see identical routes while near-equal routes tie-break
/// diversely across seeds.
fn fuzzed_fee(fee: u64, fuzz: f64, seed: u64, scid: ShortChannelId) -> u64 {
    if fuzz == 0.0 {
        return fee;
    }
    let hash = siphash24::Hash::hash_with_keys(
        seed,
        seed,
        &scid.to_u64().to_be_bytes(),
    );
    let unit = hash.as_u64() as f64 / u64::MAX as f64;
    let scale = 1.0 + fuzz * (2.0 * unit - 1.0);
    (fee as f64 * scale) as u64
}

fn risk_msat(amount_msat: u64, delay: u32, riskfactor: f64) -> u64 {
    (amount_msat as f64 * delay as f64 * riskfactor) as u64
}

impl RoutingState {
    /// Computes the least-cost route delivering `msat` from `source` to
    /// `destination`.
    ///
    /// A bounded Bellman-Ford relaxation run backwards from the
    /// destination, at most `max_hops` rounds. Edge cost is the forwarding
    /// fee plus a risk premium proportional to the carried amount, the
    /// CLTV delta and `riskfactor`; `fuzz`/`seed` perturb fees
    /// deterministically to diversify tie-breaking. Edges in `excluded`,
    /// disabled directions, locally disabled channels and edges whose HTLC
    /// or capacity limits reject the amount are skipped.
    ///
    /// Returns `None` when no route within `max_hops` exists.
    #[allow(clippy::too_many_arguments)]
    pub fn get_route(
        &self,
        source: &NodeId,
        destination: &NodeId,
        msat: u64,
        riskfactor: f64,
        final_cltv: u32,
        fuzz: f64,
        seed: u64,
        excluded: &[ShortChannelIdDir],
        max_hops: usize,
    ) -> Option<Vec<RouteHop>> {
        if source == destination
            || !self.nodes.contains_key(source)
            || !self.nodes.contains_key(destination)
        {
            return None;
        }
        let max_hops = max_hops.min(ROUTING_MAX_HOPS);

        let mut labels: BTreeMap<NodeId, CostLabel> = BTreeMap::new();
        labels.insert(*destination, CostLabel {
            msat,
            risk: 0,
            delay: final_cltv,
            next: None,
        });

        for _round in 0..max_hops {
            let mut improved = false;
            for (scid, chan) in &self.chans {
                if chan.local_disabled {
                    continue;
                }
                for direction in 0..2 {
                    let half = &chan.half[direction];
                    if !half.is_enabled() {
                        continue;
                    }
                    if excluded.iter().any(|excl| {
                        excl.short_channel_id == *scid
                            && excl.direction == direction as u8
                    }) {
                        continue;
                    }
                    let from = chan.nodes[direction];
                    let to = chan.nodes[1 - direction];
                    let to_label = match labels.get(&to) {
                        Some(label) => *label,
                        None => continue,
                    };

                    let amount = to_label.msat;
                    if amount < half.htlc_minimum_msat {
                        continue;
                    }
                    if let Some(maximum) = half.htlc_maximum_msat {
                        if amount > maximum {
                            continue;
                        }
                    }
                    if amount > chan.capacity_sat.saturating_mul(1000) {
                        continue;
                    }

                    let fee =
                        fuzzed_fee(fee_msat(half, amount), fuzz, seed, *scid);
                    let last_hop_cltv = if &to == destination {
                        final_cltv
                    } else {
                        0
                    };
                    let risk = risk_msat(
                        amount,
                        half.delay as u32 + last_hop_cltv,
                        riskfactor,
                    );

                    let cand_msat = amount.saturating_add(fee);
                    let cand_risk = to_label.risk.saturating_add(risk);
                    let total = cand_msat.saturating_add(cand_risk);
                    let current = labels
                        .get(&from)
                        .map(|label| label.msat.saturating_add(label.risk))
                        .unwrap_or(u64::MAX);
                    if total < current {
                        labels.insert(from, CostLabel {
                            msat: cand_msat,
                            risk: cand_risk,
                            delay: to_label.delay + half.delay as u32,
                            next: Some((*scid, direction as u8)),
                        });
                        improved = true;
                    }
                }
            }
            if !improved {
                break;
            }
        }

        let mut hops = Vec::new();
        let mut cursor = *source;
        while &cursor != destination {
            let label = labels.get(&cursor)?;
            let (scid, direction) = label.next?;
            let chan = self.chans.get(&scid)?;
            let next_node = chan.nodes[1 - direction as usize];
            let next_label = labels.get(&next_node)?;
            hops.push(RouteHop {
                channel_id: scid,
                direction,
                node_id: next_node,
                amount_msat: next_label.msat,
                delay: next_label.delay,
            });
            if hops.len() > max_hops {
                return None;
            }
            cursor = next_node;
        }
        Some(hops)
    }

    /// Digests a routing failure reported for a payment attempt.
    ///
    /// A `channel_update` piggybacked inside the failure is admitted first
    /// (through the regular untrusted path). Node-scoped failures act on
    /// every channel of the erring node. Permanent failures remove
    /// channels; transient ones disable the affected direction until the
    /// next genuine update arrives.
    pub fn routing_failure(
        &mut self,
        erring_node: &NodeId,
        erring_channel: &ShortChannelId,
        erring_direction: u8,
        failcode: u16,
        channel_update: Option<&[u8]>,
    ) {
        if let Some(update) = channel_update {
            if let Err(err) = self.handle_channel_update(update) {
                warn!(
                    "channel_update piggybacked on routing failure rejected: \
                     {}",
                    err
                );
            }
        }

        if failcode & FAILCODE_NODE != 0 {
            let scids: Vec<ShortChannelId> = match self.nodes.get(erring_node)
            {
                Some(node) => node.chans.iter().collect(),
                None => {
                    trace!(
                        "routing failure for unknown node {} ignored",
                        erring_node
                    );
                    return;
                }
            };
            if failcode & FAILCODE_PERM != 0 {
                debug!(
                    "removing node {} and all its channels after permanent \
                     failure {:#06x}",
                    erring_node, failcode
                );
                for scid in scids {
                    self.channel_delete(&scid);
                }
            } else {
                debug!(
                    "transiently disabling channels of node {} after failure \
                     {:#06x}",
                    erring_node, failcode
                );
                for scid in scids {
                    if let Some(chan) = self.chans.get_mut(&scid) {
                        for half in &mut chan.half {
                            if half.is_defined() {
                                half.channel_flags |= CHANNEL_FLAGS_DISABLED;
                            }
                        }
                    }
                }
            }
        } else if failcode & FAILCODE_PERM != 0 {
            debug!(
                "removing channel {} after permanent failure {:#06x}",
                erring_channel, failcode
            );
            self.channel_delete(erring_channel);
        } else if let Some(chan) = self.chans.get_mut(erring_channel) {
            let half = &mut chan.half[(erring_direction & 1) as usize];
            if half.is_defined() {
                half.channel_flags |= CHANNEL_FLAGS_DISABLED;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use amplify::{Slice32, Wrapper};
    use secp256k1::ecdsa::Signature;
    use secp256k1::{PublicKey, SecretKey, SECP256K1};

    use super::*;
    use crate::p2p::{
        ChannelAnnouncement, ChannelUpdate, Timestamp,
        CHANNEL_FLAGS_DIRECTION, MESSAGE_FLAGS_OPTION_CHANNEL_HTLC_MAX,
    };

    fn chain() -> Slice32 {
        Slice32::from_inner([0x43u8; 32])
    }

    fn node(seed: u8) -> NodeId {
        let sk = SecretKey::from_slice(&[seed; 32]).unwrap();
        NodeId::from(PublicKey::from_secret_key(SECP256K1, &sk))
    }

    fn dummy_sig() -> Signature {
        Signature::from_compact(&[0u8; 64]).unwrap()
    }

    fn scid(n: u32) -> ShortChannelId {
        ShortChannelId::new(500_000 + n, n, 0).unwrap()
    }

    // the trusted insertion path skips signature checks, so test graphs
    // can carry placeholder signatures
    fn announce(
        rstate: &mut RoutingState,
        scid: ShortChannelId,
        a: NodeId,
        b: NodeId,
        capacity_sat: u64,
    ) {
        let (node_id_1, node_id_2) = if a < b { (a, b) } else { (b, a) };
        let wire = ChannelAnnouncement {
            node_signature_1: dummy_sig(),
            node_signature_2: dummy_sig(),
            bitcoin_signature_1: dummy_sig(),
            bitcoin_signature_2: dummy_sig(),
            features: vec![],
            chain_hash: chain(),
            short_channel_id: scid,
            node_id_1,
            node_id_2,
            bitcoin_key_1: node(101),
            bitcoin_key_2: node(102),
        }
        .to_wire()
        .unwrap();
        assert!(rstate.routing_add_channel_announcement(
            &wire,
            capacity_sat,
            0
        ));
    }

    #[allow(clippy::too_many_arguments)]
    fn update(
        rstate: &mut RoutingState,
        scid: ShortChannelId,
        direction: u8,
        base_fee: u32,
        proportional_fee: u32,
        delay: u16,
        htlc_minimum_msat: u64,
        htlc_maximum_msat: Option<u64>,
        disabled: bool,
    ) {
        let mut channel_flags = direction & CHANNEL_FLAGS_DIRECTION;
        if disabled {
            channel_flags |= CHANNEL_FLAGS_DISABLED;
        }
        let message_flags = match htlc_maximum_msat {
            Some(_) => MESSAGE_FLAGS_OPTION_CHANNEL_HTLC_MAX,
            None => 0,
        };
        let wire = ChannelUpdate {
            signature: dummy_sig(),
            chain_hash: chain(),
            short_channel_id: scid,
            timestamp: Timestamp::from(1_000u32),
            message_flags,
            channel_flags,
            cltv_expiry_delta: delay,
            htlc_minimum_msat,
            fee_base_msat: base_fee,
            fee_proportional_millionths: proportional_fee,
            htlc_maximum_msat,
        }
        .to_wire()
        .unwrap();
        assert!(rstate.routing_add_channel_update(&wire, 0));
    }

    /// A — C1 — B — C2 — D, all capacities 10^9 sat, both directions
    /// enabled with base 1000 msat, 1 ppm, delta 40.
    fn line() -> (RoutingState, [NodeId; 3], [ShortChannelId; 2]) {
        let (a, b, d) = (node(1), node(2), node(3));
        let mut rstate = RoutingState::new(chain(), node(99), 3600);
        let (c1, c2) = (scid(1), scid(2));
        announce(&mut rstate, c1, a, b, 1_000_000_000);
        announce(&mut rstate, c2, b, d, 1_000_000_000);
        for chan in [c1, c2] {
            for dir in 0..2u8 {
                update(&mut rstate, chan, dir, 1000, 1, 40, 0, None, false);
            }
        }
        (rstate, [a, b, d], [c1, c2])
    }

    fn direction_from(
        rstate: &RoutingState,
        scid: &ShortChannelId,
        from: &NodeId,
    ) -> u8 {
        let chan = rstate.get_channel(scid).unwrap();
        if &chan.nodes[0] == from {
            0
        } else {
            1
        }
    }

    #[test]
    fn three_hop_line_route() {
        let (rstate, [a, b, d], [c1, c2]) = line();
        let route = rstate
            .get_route(&a, &d, 10_000_000, 10.0, 9, 0.0, 0, &[], 20)
            .unwrap();

        assert_eq!(route.len(), 2);
        assert_eq!(route[0].channel_id, c1);
        assert_eq!(route[0].direction, direction_from(&rstate, &c1, &a));
        assert_eq!(route[0].node_id, b);
        // amount at the first hop covers the fee of the second channel:
        // 1000 msat base + 10^7 * 1 / 10^6 proportional
        assert_eq!(route[0].amount_msat, 10_000_000 + 1000 + 10);
        assert_eq!(route[0].delay, 9 + 40);

        assert_eq!(route[1].channel_id, c2);
        assert_eq!(route[1].direction, direction_from(&rstate, &c2, &b));
        assert_eq!(route[1].node_id, d);
        assert_eq!(route[1].amount_msat, 10_000_000);
        assert_eq!(route[1].delay, 9);
    }

    #[test]
    fn route_is_deterministic() {
        let (rstate, [a, _, d], _) = line();
        let r1 = rstate.get_route(&a, &d, 10_000_000, 10.0, 9, 0.0, 7, &[], 20);
        let r2 = rstate.get_route(&a, &d, 10_000_000, 10.0, 9, 0.0, 7, &[], 20);
        assert!(r1.is_some());
        assert_eq!(r1, r2);
    }

    #[test]
    fn unusable_edges_are_skipped() {
        // amount below the minimum
        let (rstate, [a, _, d], _) = line();
        assert!(rstate
            .get_route(&a, &d, 10, 10.0, 9, 0.0, 0, &[], 20)
            .is_some());
        let (mut rstate, [a, _, d], [c1, _]) = line();
        let dir = direction_from(&rstate, &c1, &a);
        update(
            &mut rstate,
            c1,
            dir,
            1000,
            1,
            40,
            1_000_000,
            None,
            false,
        );
        // the only first hop now requires at least 1M msat
        assert!(rstate
            .get_route(&a, &d, 10, 10.0, 9, 0.0, 0, &[], 20)
            .is_none());

        // amount above the advertised maximum
        let (mut rstate, [a, _, d], [c1, _]) = line();
        let dir = direction_from(&rstate, &c1, &a);
        update(
            &mut rstate,
            c1,
            dir,
            1000,
            1,
            40,
            0,
            Some(1_000_000),
            false,
        );
        assert!(rstate
            .get_route(&a, &d, 10_000_000, 10.0, 9, 0.0, 0, &[], 20)
            .is_none());

        // disabled direction
        let (mut rstate, [a, _, d], [c1, _]) = line();
        let dir = direction_from(&rstate, &c1, &a);
        update(&mut rstate, c1, dir, 1000, 1, 40, 0, None, true);
        assert!(rstate
            .get_route(&a, &d, 10_000_000, 10.0, 9, 0.0, 0, &[], 20)
            .is_none());

        // amount beyond the channel capacity (10^9 sat = 10^12 msat)
        let (rstate, [a, _, d], _) = line();
        assert!(rstate
            .get_route(&a, &d, 2_000_000_000_000, 10.0, 9, 0.0, 0, &[], 20)
            .is_none());
    }

    #[test]
    fn exclusion_list() {
        let (rstate, [a, _, d], [c1, _]) = line();
        let excluded = [ShortChannelIdDir {
            short_channel_id: c1,
            direction: direction_from(&rstate, &c1, &a),
        }];
        assert!(rstate
            .get_route(&a, &d, 10_000_000, 10.0, 9, 0.0, 0, &excluded, 20)
            .is_none());
        // excluding the opposite direction changes nothing
        let excluded = [ShortChannelIdDir {
            short_channel_id: c1,
            direction: 1 - excluded[0].direction,
        }];
        assert!(rstate
            .get_route(&a, &d, 10_000_000, 10.0, 9, 0.0, 0, &excluded, 20)
            .is_some());
    }

    #[test]
    fn max_hops_bounds_route_length() {
        let (rstate, [a, _, d], _) = line();
        assert!(rstate
            .get_route(&a, &d, 10_000_000, 10.0, 9, 0.0, 0, &[], 1)
            .is_none());
        assert!(rstate
            .get_route(&a, &d, 10_000_000, 10.0, 9, 0.0, 0, &[], 2)
            .is_some());
    }

    #[test]
    fn local_disabled_gates_routing() {
        let (mut rstate, [a, _, d], [c1, _]) = line();
        {
            let chan = rstate.chans.get_mut(&c1).unwrap();
            chan.local_disabled = true;
        }
        assert!(rstate
            .get_route(&a, &d, 10_000_000, 10.0, 9, 0.0, 0, &[], 20)
            .is_none());
    }

    #[test]
    fn cheaper_of_two_paths_wins() {
        // A connects to D over B (cheap) and over E (expensive)
        let (a, b, d, e) = (node(1), node(2), node(3), node(4));
        let mut rstate = RoutingState::new(chain(), node(99), 3600);
        let (c1, c2, c3, c4) = (scid(1), scid(2), scid(3), scid(4));
        announce(&mut rstate, c1, a, b, 1_000_000_000);
        announce(&mut rstate, c2, b, d, 1_000_000_000);
        announce(&mut rstate, c3, a, e, 1_000_000_000);
        announce(&mut rstate, c4, e, d, 1_000_000_000);
        for chan in [c1, c2] {
            for dir in 0..2u8 {
                update(&mut rstate, chan, dir, 1000, 1, 40, 0, None, false);
            }
        }
        for chan in [c3, c4] {
            for dir in 0..2u8 {
                update(&mut rstate, chan, dir, 50_000, 100, 40, 0, None, false);
            }
        }

        let route = rstate
            .get_route(&a, &d, 10_000_000, 10.0, 9, 0.0, 0, &[], 20)
            .unwrap();
        assert_eq!(route[0].node_id, b);

        // kill the cheap path: the expensive one takes over
        let excluded = [ShortChannelIdDir {
            short_channel_id: c1,
            direction: direction_from(&rstate, &c1, &a),
        }];
        let route = rstate
            .get_route(&a, &d, 10_000_000, 10.0, 9, 0.0, 0, &excluded, 20)
            .unwrap();
        assert_eq!(route[0].node_id, e);
    }

    #[test]
    fn failure_disables_and_removes() {
        // transient channel failure disables one direction
        let (mut rstate, [a, b, d], [c1, _]) = line();
        let dir = direction_from(&rstate, &c1, &a);
        rstate.routing_failure(&b, &c1, dir, 0x1007, None);
        assert!(rstate.get_channel(&c1).is_some());
        assert!(!rstate.get_channel(&c1).unwrap().half[dir as usize]
            .is_enabled());
        assert!(rstate
            .get_route(&a, &d, 10_000_000, 10.0, 9, 0.0, 0, &[], 20)
            .is_none());

        // permanent channel failure removes the channel
        let (mut rstate, [a, b, _], [c1, _]) = line();
        let dir = direction_from(&rstate, &c1, &a);
        rstate.routing_failure(&b, &c1, dir, FAILCODE_PERM | 8, None);
        assert!(rstate.get_channel(&c1).is_none());

        // permanent node failure removes all its channels
        let (mut rstate, [_, b, _], [c1, c2]) = line();
        rstate.routing_failure(
            &b,
            &c1,
            0,
            FAILCODE_PERM | FAILCODE_NODE | 2,
            None,
        );
        assert!(rstate.get_channel(&c1).is_none());
        assert!(rstate.get_channel(&c2).is_none());
        assert!(rstate.get_node(&b).is_none());
    }
}
