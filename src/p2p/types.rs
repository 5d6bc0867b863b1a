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

use std::fmt::{self, Display, Formatter};
use std::io;
use std::str::FromStr;

use amplify::{Slice32, Wrapper};
use chrono::{DateTime, TimeZone, Utc};
use lightning_encoding::{LightningDecode, LightningEncode};
use secp256k1::PublicKey;

/// Node identity: a compressed secp256k1 public key in its 33-byte serialized
/// form.
///
/// Node ids are kept in serialized form since the gossip protocol orders them
/// by lexicographic byte comparison (`node_id_1 < node_id_2` in
/// `channel_announcement`), which the derived [`Ord`] provides. Conversion
/// into a [`PublicKey`] happens only at the points where signatures are
/// verified.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId([u8; 33]);

impl NodeId {
    #[inline]
    pub fn from_public_key(key: PublicKey) -> NodeId {
        NodeId(key.serialize())
    }

    /// Parses the inner bytes as a secp256k1 public key.
    #[inline]
    pub fn public_key(&self) -> Result<PublicKey, secp256k1::Error> {
        PublicKey::from_slice(&self.0)
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<PublicKey> for NodeId {
    fn from(key: PublicKey) -> Self {
        NodeId::from_public_key(key)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl LightningEncode for NodeId {
    fn lightning_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        e.write_all(&self.0)?;
        Ok(self.0.len())
    }
}

impl LightningDecode for NodeId {
    fn lightning_decode<D: io::Read>(
        mut d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        let mut buf = [0u8; 33];
        d.read_exact(&mut buf)?;
        Ok(NodeId(buf))
    }
}

/// Lightning network short channel Id as per BOLT7
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Display,
    Default,
    From,
    Getters,
)]
#[display("{block_height}x{tx_index}x{output_index}")]
pub struct ShortChannelId {
    block_height: u32,
    tx_index: u32,
    output_index: u16,
}

impl ShortChannelId {
    pub fn new(
        block_height: u32,
        tx_index: u32,
        output_index: u16,
    ) -> Option<Self> {
        if block_height >= 1 << 24 || tx_index >= 1 << 24 {
            return None;
        }
        Some(Self {
            block_height,
            tx_index,
            output_index,
        })
    }

    /// Packed numeric form: 24 bits of block height, 24 bits of transaction
    /// index and 16 bits of output index. Numeric order of the packed value
    /// equals the derived lexicographic order of the triple.
    pub fn to_u64(self) -> u64 {
        (self.block_height as u64) << 40
            | (self.tx_index as u64) << 16
            | self.output_index as u64
    }

    pub fn from_u64(value: u64) -> Self {
        Self {
            block_height: (value >> 40) as u32 & 0x00FF_FFFF,
            tx_index: (value >> 16) as u32 & 0x00FF_FFFF,
            output_index: value as u16,
        }
    }
}

#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error,
)]
#[display(doc_comments)]
pub enum ShortChannelIdParseError {
    /// Wrong block height data
    WrongBlockHeight,
    /// Wrong transaction index number
    WrongTxIndex,
    /// Wrong output index number
    WrongOutputIndex,
    /// too many short channel id components; expected three (block height,
    /// tx index and output index)
    ExessiveComponents,
}

impl FromStr for ShortChannelId {
    type Err = ShortChannelIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut split = s.split('x');
        match (split.next(), split.next(), split.next(), split.next()) {
            (Some(block_height), Some(tx_index), Some(output_index), None) => {
                Ok(ShortChannelId {
                    block_height: block_height.parse().map_err(|_| {
                        ShortChannelIdParseError::WrongBlockHeight
                    })?,
                    tx_index: tx_index
                        .parse()
                        .map_err(|_| ShortChannelIdParseError::WrongTxIndex)?,
                    output_index: output_index.parse().map_err(|_| {
                        ShortChannelIdParseError::WrongOutputIndex
                    })?,
                })
            }
            _ => Err(ShortChannelIdParseError::ExessiveComponents),
        }
    }
}

impl LightningEncode for ShortChannelId {
    fn lightning_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        e.write_all(&self.to_u64().to_be_bytes())?;
        Ok(8)
    }
}

impl LightningDecode for ShortChannelId {
    fn lightning_decode<D: io::Read>(
        mut d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        let mut buf = [0u8; 8];
        d.read_exact(&mut buf)?;
        Ok(ShortChannelId::from_u64(u64::from_be_bytes(buf)))
    }
}

/// UTF-8 node alias, always 32 bytes on the wire, not NUL-terminated.
#[derive(
    Wrapper,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Display,
    Default,
    From,
    LightningEncode,
    LightningDecode,
)]
#[display(LowerHex)]
#[wrapper(FromStr, LowerHex, UpperHex)]
pub struct Alias(Slice32);

/// Color to be used when displaying the node name
#[derive(
    Wrapper, Clone, Copy, PartialEq, Eq, Hash, Debug, Default, From,
)]
pub struct NodeColor([u8; 3]);

impl LightningEncode for NodeColor {
    #[inline]
    fn lightning_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        e.write_all(self.as_inner())?;
        Ok(3)
    }
}

impl LightningDecode for NodeColor {
    #[inline]
    fn lightning_decode<D: io::Read>(
        mut d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        let mut buf = [0u8; 3];
        d.read_exact(&mut buf)?;
        Ok(Self::from_inner(buf))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, From)]
pub enum AnnouncedNodeAddr {
    /// An IPv4 address/port on which the peer is listening.
    IpV4 {
        /// The 4-byte IPv4 address
        addr: [u8; 4],
        /// The port on which the node is listening
        port: u16,
    },
    /// An IPv6 address/port on which the peer is listening.
    IpV6 {
        /// The 16-byte IPv6 address
        addr: [u8; 16],
        /// The port on which the node is listening
        port: u16,
    },
    /// An old-style Tor onion address/port on which the peer is listening.
    OnionV2 {
        /// The bytes (usually encoded in base32 with ".onion" appended)
        addr: [u8; 10],
        /// The port on which the node is listening
        port: u16,
    },
    /// A new-style Tor onion address/port on which the peer is listening.
    /// To create the human-readable "hostname", concatenate ed25519_pubkey,
    /// checksum, and version, wrap as base32 and append ".onion".
    OnionV3 {
        /// The ed25519 long-term public key of the peer
        ed25519_pubkey: [u8; 32],
        /// The checksum of the pubkey and version, as included in the onion
        /// address
        checksum: u16,
        /// The version byte, as defined by the Tor Onion v3 spec.
        version: u8,
        /// The port on which the node is listening
        port: u16,
    },
}

impl AnnouncedNodeAddr {
    fn type_byte(&self) -> u8 {
        match self {
            AnnouncedNodeAddr::IpV4 { .. } => 1,
            AnnouncedNodeAddr::IpV6 { .. } => 2,
            AnnouncedNodeAddr::OnionV2 { .. } => 3,
            AnnouncedNodeAddr::OnionV3 { .. } => 4,
        }
    }

    /// Length of the wire representation, including the type byte.
    fn encoded_len(&self) -> usize {
        match self {
            AnnouncedNodeAddr::IpV4 { .. } => 1 + 4 + 2,
            AnnouncedNodeAddr::IpV6 { .. } => 1 + 16 + 2,
            AnnouncedNodeAddr::OnionV2 { .. } => 1 + 10 + 2,
            AnnouncedNodeAddr::OnionV3 { .. } => 1 + 32 + 2 + 1 + 2,
        }
    }
}

impl LightningEncode for AnnouncedNodeAddr {
    fn lightning_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        e.write_all(&[self.type_byte()])?;
        match self {
            AnnouncedNodeAddr::IpV4 { addr, port } => {
                e.write_all(&addr[..])?;
                e.write_all(&port.to_be_bytes())?;
            }
            AnnouncedNodeAddr::IpV6 { addr, port } => {
                e.write_all(&addr[..])?;
                e.write_all(&port.to_be_bytes())?;
            }
            AnnouncedNodeAddr::OnionV2 { addr, port } => {
                e.write_all(&addr[..])?;
                e.write_all(&port.to_be_bytes())?;
            }
            AnnouncedNodeAddr::OnionV3 {
                ed25519_pubkey,
                checksum,
                version,
                port,
            } => {
                e.write_all(&ed25519_pubkey[..])?;
                e.write_all(&checksum.to_be_bytes())?;
                e.write_all(&version.to_be_bytes())?;
                e.write_all(&port.to_be_bytes())?;
            }
        }
        Ok(self.encoded_len())
    }
}

impl LightningDecode for AnnouncedNodeAddr {
    fn lightning_decode<D: io::Read>(
        mut d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        let mut type_byte = [0u8; 1];
        d.read_exact(&mut type_byte)?;

        match type_byte[0] {
            1 => {
                let mut addr = [0u8; 4];
                let mut port = [0u8; 2];
                d.read_exact(&mut addr)?;
                d.read_exact(&mut port)?;
                Ok(AnnouncedNodeAddr::IpV4 {
                    addr,
                    port: u16::from_be_bytes(port),
                })
            }
            2 => {
                let mut addr = [0u8; 16];
                let mut port = [0u8; 2];
                d.read_exact(&mut addr)?;
                d.read_exact(&mut port)?;
                Ok(AnnouncedNodeAddr::IpV6 {
                    addr,
                    port: u16::from_be_bytes(port),
                })
            }
            3 => {
                let mut addr = [0u8; 10];
                let mut port = [0u8; 2];
                d.read_exact(&mut addr)?;
                d.read_exact(&mut port)?;
                Ok(AnnouncedNodeAddr::OnionV2 {
                    addr,
                    port: u16::from_be_bytes(port),
                })
            }
            4 => {
                let mut ed25519_pubkey = [0u8; 32];
                let mut checksum = [0u8; 2];
                let mut version = [0u8; 1];
                let mut port = [0u8; 2];
                d.read_exact(&mut ed25519_pubkey)?;
                d.read_exact(&mut checksum)?;
                d.read_exact(&mut version)?;
                d.read_exact(&mut port)?;
                Ok(AnnouncedNodeAddr::OnionV3 {
                    ed25519_pubkey,
                    checksum: u16::from_be_bytes(checksum),
                    version: version[0],
                    port: u16::from_be_bytes(port),
                })
            }
            wrong => Err(lightning_encoding::Error::DataIntegrityError(
                format!("unknown network address format {}", wrong),
            )),
        }
    }
}

/// Node address list from `node_announcement`, prefixed on the wire with its
/// total byte length (not the number of entries).
#[derive(
    Wrapper, Clone, PartialEq, Eq, Hash, Debug, Display, Default, From,
)]
#[display(Debug)]
pub struct AddressList(Vec<AnnouncedNodeAddr>);

impl LightningEncode for AddressList {
    fn lightning_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        let len: usize =
            self.0.iter().map(AnnouncedNodeAddr::encoded_len).sum();
        if len > u16::MAX as usize {
            return Err(lightning_encoding::Error::TooLargeData(len));
        }
        e.write_all(&(len as u16).to_be_bytes())?;
        for addr in &self.0 {
            addr.lightning_encode(&mut e)?;
        }
        Ok(2 + len)
    }
}

impl LightningDecode for AddressList {
    fn lightning_decode<D: io::Read>(
        mut d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        let mut len = [0u8; 2];
        d.read_exact(&mut len)?;
        let mut remaining = u16::from_be_bytes(len) as usize;
        let mut data = Vec::new();
        while remaining > 0 {
            let addr = AnnouncedNodeAddr::lightning_decode(&mut d)?;
            let encoded = addr.encoded_len();
            if encoded > remaining {
                return Err(lightning_encoding::Error::DataIntegrityError(
                    s!("address list length prefix does not match content"),
                ));
            }
            remaining -= encoded;
            data.push(addr);
        }
        Ok(AddressList(data))
    }
}

/// Gossip timestamp: seconds since UNIX epoch, `u32` on the wire.
#[derive(
    Wrapper,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Display,
    Default,
    From,
    LightningEncode,
    LightningDecode,
)]
#[display("{0} sec")]
pub struct Timestamp(u32);

impl<T> From<DateTime<T>> for Timestamp
where
    T: TimeZone,
{
    fn from(dt: DateTime<T>) -> Timestamp {
        Timestamp(dt.timestamp() as u32)
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(ts: Timestamp) -> DateTime<Utc> {
        Utc.timestamp(ts.0 as i64, 0)
    }
}

impl Timestamp {
    pub fn now() -> Timestamp {
        Timestamp::from(Utc::now())
    }

    pub fn checked_add(self, rhs: Timestamp) -> Option<Timestamp> {
        self.0.checked_add(rhs.0).map(Timestamp)
    }

    pub fn checked_sub(self, rhs: Timestamp) -> Option<Timestamp> {
        self.0.checked_sub(rhs.0).map(Timestamp)
    }

    pub fn saturating_sub(self, secs: u32) -> Timestamp {
        Timestamp(self.0.saturating_sub(secs))
    }
}
