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

//! Bolt 7 gossip messages

use std::io;

use amplify::Slice32;
use bitcoin::hashes::{sha256d, Hash};
use lightning_encoding::{LightningDecode, LightningEncode};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, SECP256K1};

use super::{AddressList, Alias, NodeColor, NodeId, ShortChannelId, Timestamp};

/// Wire type of `channel_announcement`
pub const MSG_TYPE_CHANNEL_ANNOUNCEMENT: u16 = 256;
/// Wire type of `node_announcement`
pub const MSG_TYPE_NODE_ANNOUNCEMENT: u16 = 257;
/// Wire type of `channel_update`
pub const MSG_TYPE_CHANNEL_UPDATE: u16 = 258;
/// Type of the internal local-add-channel message injected by the channel
/// daemon for private channels
pub const MSG_TYPE_LOCAL_ADD_CHANNEL: u16 = 3503;

/// Bit of `channel_flags` carrying the direction of a `channel_update`
pub const CHANNEL_FLAGS_DIRECTION: u8 = 1;
/// Bit of `channel_flags` marking the direction as disabled
pub const CHANNEL_FLAGS_DISABLED: u8 = 1 << 1;
/// Bit of `message_flags` indicating presence of `htlc_maximum_msat`
pub const MESSAGE_FLAGS_OPTION_CHANNEL_HTLC_MAX: u8 = 1;

/// Offset of the signed body within a `channel_announcement` wire message:
/// 2 bytes of type plus four 64-byte signatures.
const CHANNEL_ANNOUNCEMENT_SIGNED_BODY: usize = 2 + 4 * 64;
/// Offset of the signed body within `node_announcement` and `channel_update`:
/// 2 bytes of type plus one 64-byte signature.
const SINGLE_SIG_SIGNED_BODY: usize = 2 + 64;

/// Reads the big-endian message type from the first two bytes of a wire
/// message.
pub fn peek_type(wire: &[u8]) -> Option<u16> {
    if wire.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([wire[0], wire[1]]))
}

fn expect_type(
    wire: &[u8],
    msg_type: u16,
) -> Result<&[u8], lightning_encoding::Error> {
    match peek_type(wire) {
        Some(found) if found == msg_type => Ok(&wire[2..]),
        found => Err(lightning_encoding::Error::DataIntegrityError(format!(
            "expected message type {}, found {:?}",
            msg_type, found
        ))),
    }
}

fn signed_digest(
    wire: &[u8],
    offset: usize,
) -> Result<Message, secp256k1::Error> {
    if wire.len() < offset {
        return Err(secp256k1::Error::InvalidMessage);
    }
    Message::from_slice(&sha256d::Hash::hash(&wire[offset..]).into_inner())
}

/// Proof that a channel exists and who owns it: four signatures bind the
/// two lightning node keys to the two bitcoin keys controlling the funding
/// output named by the short channel id. Until one of the endpoints also
/// publishes a `channel_update` with its forwarding policy, the channel
/// cannot carry payments.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[display("channel_announcement({chain_hash}, {short_channel_id}, ...)")]
pub struct ChannelAnnouncement {
    /// Node Signature 1
    pub node_signature_1: Signature,

    /// Node Signature 2
    pub node_signature_2: Signature,

    /// Bitcoin Signature 1
    pub bitcoin_signature_1: Signature,

    /// Bitcoin Signature 2
    pub bitcoin_signature_2: Signature,

    /// feature bytes
    pub features: Vec<u8>,

    /// chain hash
    pub chain_hash: Slice32,

    /// Short channel ID
    pub short_channel_id: ShortChannelId,

    /// Node Id 1
    pub node_id_1: NodeId,

    /// Node Id 2
    pub node_id_2: NodeId,

    /// Bitcoin key 1
    pub bitcoin_key_1: NodeId,

    /// Bitcoin key 2
    pub bitcoin_key_2: NodeId,
}

impl ChannelAnnouncement {
    pub fn from_wire(
        wire: &[u8],
    ) -> Result<Self, lightning_encoding::Error> {
        Self::lightning_deserialize(&expect_type(
            wire,
            MSG_TYPE_CHANNEL_ANNOUNCEMENT,
        )?)
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, lightning_encoding::Error> {
        let mut wire = MSG_TYPE_CHANNEL_ANNOUNCEMENT.to_be_bytes().to_vec();
        wire.extend(self.lightning_serialize()?);
        Ok(wire)
    }

    /// Double-SHA256 of the announcement body past the four signatures,
    /// computed over the original wire bytes.
    pub fn signed_digest(wire: &[u8]) -> Result<Message, secp256k1::Error> {
        signed_digest(wire, CHANNEL_ANNOUNCEMENT_SIGNED_BODY)
    }

    /// Verifies all four signatures (two node keys, two bitcoin keys)
    /// against the original wire bytes.
    pub fn verify_signatures(
        &self,
        wire: &[u8],
    ) -> Result<(), secp256k1::Error> {
        let digest = Self::signed_digest(wire)?;
        for (sig, id) in [
            (&self.node_signature_1, &self.node_id_1),
            (&self.node_signature_2, &self.node_id_2),
            (&self.bitcoin_signature_1, &self.bitcoin_key_1),
            (&self.bitcoin_signature_2, &self.bitcoin_key_2),
        ] {
            SECP256K1.verify_ecdsa(&digest, sig, &id.public_key()?)?;
        }
        Ok(())
    }
}

/// Metadata a node attaches to its public key: alias, display color,
/// feature bits and the network addresses it can be reached at. Receivers
/// only accept it for nodes already referenced by some known channel, and
/// keep whichever announcement carries the highest timestamp.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[display("node_announcement({node_id}, {alias}, ...)")]
pub struct NodeAnnouncement {
    /// Signature
    pub signature: Signature,

    /// feature bytes
    pub features: Vec<u8>,

    /// Time stamp
    pub timestamp: Timestamp,

    /// Node Id
    pub node_id: NodeId,

    /// RGB colour code
    pub rgb_color: NodeColor,

    /// Node Alias
    pub alias: Alias,

    /// Node addresses
    pub addresses: AddressList,
}

impl NodeAnnouncement {
    pub fn from_wire(
        wire: &[u8],
    ) -> Result<Self, lightning_encoding::Error> {
        Self::lightning_deserialize(&expect_type(
            wire,
            MSG_TYPE_NODE_ANNOUNCEMENT,
        )?)
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, lightning_encoding::Error> {
        let mut wire = MSG_TYPE_NODE_ANNOUNCEMENT.to_be_bytes().to_vec();
        wire.extend(self.lightning_serialize()?);
        Ok(wire)
    }

    pub fn signed_digest(wire: &[u8]) -> Result<Message, secp256k1::Error> {
        signed_digest(wire, SINGLE_SIG_SIGNED_BODY)
    }

    pub fn verify_signature(
        &self,
        wire: &[u8],
    ) -> Result<(), secp256k1::Error> {
        let digest = Self::signed_digest(wire)?;
        SECP256K1.verify_ecdsa(
            &digest,
            &self.signature,
            &self.node_id.public_key()?,
        )
    }
}

/// Forwarding policy one endpoint advertises for its direction of a
/// channel: fee schedule, CLTV delta and HTLC amount limits. The direction
/// bit of `channel_flags` tells which end of the channel is speaking, and a
/// later update with a fresher timestamp replaces the policy wholesale, so
/// fee changes are just re-announcements.
///
/// The type implements the wire codec manually: `htlc_maximum_msat` is
/// present on the wire only when the corresponding `message_flags` bit is
/// set, which the derivation cannot express.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[display("channel_update({chain_hash}, {short_channel_id}, {timestamp}, ...)")]
pub struct ChannelUpdate {
    /// Signature
    pub signature: Signature,

    /// Chainhash
    pub chain_hash: Slice32,

    /// Short Channel Id
    pub short_channel_id: ShortChannelId,

    /// Time stamp
    pub timestamp: Timestamp,

    /// message flags, indicating presence of the optional fields
    pub message_flags: u8,

    /// channel flags, carrying the direction and disabled bits
    pub channel_flags: u8,

    /// CLTV expiry delta
    pub cltv_expiry_delta: u16,

    /// minimum HTLC in msat
    pub htlc_minimum_msat: u64,

    /// base fee in msat
    pub fee_base_msat: u32,

    /// fee proportional millionth
    pub fee_proportional_millionths: u32,

    /// Maximum HTLC in msat; on the wire only when `option_channel_htlc_max`
    /// bit of `message_flags` is set
    pub htlc_maximum_msat: Option<u64>,
}

impl ChannelUpdate {
    pub fn from_wire(
        wire: &[u8],
    ) -> Result<Self, lightning_encoding::Error> {
        Self::lightning_deserialize(&expect_type(
            wire,
            MSG_TYPE_CHANNEL_UPDATE,
        )?)
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, lightning_encoding::Error> {
        let mut wire = MSG_TYPE_CHANNEL_UPDATE.to_be_bytes().to_vec();
        wire.extend(self.lightning_serialize()?);
        Ok(wire)
    }

    pub fn signed_digest(wire: &[u8]) -> Result<Message, secp256k1::Error> {
        signed_digest(wire, SINGLE_SIG_SIGNED_BODY)
    }

    /// Verifies the update signature against the node owning the announced
    /// direction.
    pub fn verify_signature(
        &self,
        wire: &[u8],
        node_id: &NodeId,
    ) -> Result<(), secp256k1::Error> {
        let digest = Self::signed_digest(wire)?;
        SECP256K1.verify_ecdsa(&digest, &self.signature, &node_id.public_key()?)
    }

    /// Index of the half-channel this update describes: 0 when announced by
    /// the lexicographically lesser endpoint, 1 otherwise.
    #[inline]
    pub fn direction(&self) -> usize {
        (self.channel_flags & CHANNEL_FLAGS_DIRECTION) as usize
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.channel_flags & CHANNEL_FLAGS_DISABLED != 0
    }
}

impl LightningEncode for ChannelUpdate {
    fn lightning_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        let mut len = self.signature.lightning_encode(&mut e)?;
        len += self.chain_hash.lightning_encode(&mut e)?;
        len += self.short_channel_id.lightning_encode(&mut e)?;
        len += self.timestamp.lightning_encode(&mut e)?;
        len += self.message_flags.lightning_encode(&mut e)?;
        len += self.channel_flags.lightning_encode(&mut e)?;
        len += self.cltv_expiry_delta.lightning_encode(&mut e)?;
        len += self.htlc_minimum_msat.lightning_encode(&mut e)?;
        len += self.fee_base_msat.lightning_encode(&mut e)?;
        len += self.fee_proportional_millionths.lightning_encode(&mut e)?;
        match (
            self.message_flags & MESSAGE_FLAGS_OPTION_CHANNEL_HTLC_MAX != 0,
            self.htlc_maximum_msat,
        ) {
            (true, Some(max)) => len += max.lightning_encode(&mut e)?,
            (false, None) => {}
            _ => {
                return Err(lightning_encoding::Error::DataIntegrityError(s!(
                    "channel_update message flags do not match the presence \
                     of htlc_maximum_msat"
                )))
            }
        }
        Ok(len)
    }
}

impl LightningDecode for ChannelUpdate {
    fn lightning_decode<D: io::Read>(
        mut d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        let signature = Signature::lightning_decode(&mut d)?;
        let chain_hash = Slice32::lightning_decode(&mut d)?;
        let short_channel_id = ShortChannelId::lightning_decode(&mut d)?;
        let timestamp = Timestamp::lightning_decode(&mut d)?;
        let message_flags = u8::lightning_decode(&mut d)?;
        let channel_flags = u8::lightning_decode(&mut d)?;
        let cltv_expiry_delta = u16::lightning_decode(&mut d)?;
        let htlc_minimum_msat = u64::lightning_decode(&mut d)?;
        let fee_base_msat = u32::lightning_decode(&mut d)?;
        let fee_proportional_millionths = u32::lightning_decode(&mut d)?;
        let htlc_maximum_msat =
            if message_flags & MESSAGE_FLAGS_OPTION_CHANNEL_HTLC_MAX != 0 {
                Some(u64::lightning_decode(&mut d)?)
            } else {
                None
            };
        Ok(ChannelUpdate {
            signature,
            chain_hash,
            short_channel_id,
            timestamp,
            message_flags,
            channel_flags,
            cltv_expiry_delta,
            htlc_minimum_msat,
            fee_base_msat,
            fee_proportional_millionths,
            htlc_maximum_msat,
        })
    }
}

/// Internal message adding a local private channel to the network view. Not
/// a peer message: it originates from the local channel daemon, carries no
/// signatures and is never forwarded.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[display("local_add_channel({chain_hash}, {short_channel_id}, {satoshis})")]
pub struct LocalAddChannel {
    /// chain hash
    pub chain_hash: Slice32,

    /// Short channel ID
    pub short_channel_id: ShortChannelId,

    /// Identity of the remote channel peer
    pub remote_node_id: NodeId,

    /// Locally known channel capacity
    pub satoshis: u64,
}

impl LocalAddChannel {
    pub fn from_wire(
        wire: &[u8],
    ) -> Result<Self, lightning_encoding::Error> {
        Self::lightning_deserialize(&expect_type(
            wire,
            MSG_TYPE_LOCAL_ADD_CHANNEL,
        )?)
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, lightning_encoding::Error> {
        let mut wire = MSG_TYPE_LOCAL_ADD_CHANNEL.to_be_bytes().to_vec();
        wire.extend(self.lightning_serialize()?);
        Ok(wire)
    }
}
