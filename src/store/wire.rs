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

//! Store wrapper messages.
//!
//! Every record payload in the gossip store is one of these wrappers; the
//! first two bytes are a big-endian type tag drawn from the range reserved
//! for store wrappers. Inner gossip messages are embedded as the exact bytes
//! that appeared on the wire, length-prefixed.

use std::io;

use lightning_encoding::{LightningDecode, LightningEncode};

use crate::p2p::ShortChannelId;

/// Wrapper tag for a `channel_announcement` with its resolved capacity
pub const STORE_TYPE_CHANNEL_ANNOUNCEMENT: u16 = 4096;
/// Wrapper tag for a `channel_update`
pub const STORE_TYPE_CHANNEL_UPDATE: u16 = 4097;
/// Wrapper tag for a `node_announcement`
pub const STORE_TYPE_NODE_ANNOUNCEMENT: u16 = 4098;
/// Wrapper tag for a channel deletion marker
pub const STORE_TYPE_CHANNEL_DELETE: u16 = 4099;
/// Wrapper tag for a local private channel
pub const STORE_TYPE_LOCAL_ADD_CHANNEL: u16 = 4100;

/// A single record payload of the gossip store.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display(Debug)]
pub enum StoreMessage {
    /// Wire bytes of a `channel_announcement` together with the on-chain
    /// capacity the funding oracle resolved for it (the announcement itself
    /// does not carry the amount)
    ChannelAnnouncement {
        /// Original wire bytes of the announcement
        announce: Vec<u8>,
        /// Funding output value
        satoshis: u64,
    },

    /// Wire bytes of a `channel_update`
    ChannelUpdate(Vec<u8>),

    /// Wire bytes of a `node_announcement`
    NodeAnnouncement(Vec<u8>),

    /// Marker that the channel was removed from the network view
    ChannelDelete(ShortChannelId),

    /// Wire bytes of a `local_add_channel` internal message
    LocalAddChannel(Vec<u8>),
}

impl StoreMessage {
    fn type_tag(&self) -> u16 {
        match self {
            StoreMessage::ChannelAnnouncement { .. } => {
                STORE_TYPE_CHANNEL_ANNOUNCEMENT
            }
            StoreMessage::ChannelUpdate(_) => STORE_TYPE_CHANNEL_UPDATE,
            StoreMessage::NodeAnnouncement(_) => STORE_TYPE_NODE_ANNOUNCEMENT,
            StoreMessage::ChannelDelete(_) => STORE_TYPE_CHANNEL_DELETE,
            StoreMessage::LocalAddChannel(_) => STORE_TYPE_LOCAL_ADD_CHANNEL,
        }
    }
}

impl LightningEncode for StoreMessage {
    fn lightning_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        let mut len = self.type_tag().lightning_encode(&mut e)?;
        match self {
            StoreMessage::ChannelAnnouncement { announce, satoshis } => {
                len += announce.lightning_encode(&mut e)?;
                len += satoshis.lightning_encode(&mut e)?;
            }
            StoreMessage::ChannelUpdate(update) => {
                len += update.lightning_encode(&mut e)?;
            }
            StoreMessage::NodeAnnouncement(announcement) => {
                len += announcement.lightning_encode(&mut e)?;
            }
            StoreMessage::ChannelDelete(scid) => {
                len += scid.lightning_encode(&mut e)?;
            }
            StoreMessage::LocalAddChannel(msg) => {
                len += msg.lightning_encode(&mut e)?;
            }
        }
        Ok(len)
    }
}

impl LightningDecode for StoreMessage {
    fn lightning_decode<D: io::Read>(
        mut d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        let tag = u16::lightning_decode(&mut d)?;
        match tag {
            STORE_TYPE_CHANNEL_ANNOUNCEMENT => {
                Ok(StoreMessage::ChannelAnnouncement {
                    announce: Vec::lightning_decode(&mut d)?,
                    satoshis: u64::lightning_decode(&mut d)?,
                })
            }
            STORE_TYPE_CHANNEL_UPDATE => {
                Ok(StoreMessage::ChannelUpdate(Vec::lightning_decode(&mut d)?))
            }
            STORE_TYPE_NODE_ANNOUNCEMENT => Ok(StoreMessage::NodeAnnouncement(
                Vec::lightning_decode(&mut d)?,
            )),
            STORE_TYPE_CHANNEL_DELETE => Ok(StoreMessage::ChannelDelete(
                ShortChannelId::lightning_decode(&mut d)?,
            )),
            STORE_TYPE_LOCAL_ADD_CHANNEL => Ok(StoreMessage::LocalAddChannel(
                Vec::lightning_decode(&mut d)?,
            )),
            unknown => Err(lightning_encoding::Error::DataIntegrityError(
                format!("unknown gossip store message type {}", unknown),
            )),
        }
    }
}
