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

//! The gossip store: an append-only, CRC-checked, versioned log of validated
//! gossip messages, letting the routing graph rehydrate across restarts.
//!
//! File layout: a single version byte, then records of
//! `u32 BE length | u32 BE crc32c(payload) | payload`. The CRC covers the
//! payload only. Payloads are [`StoreMessage`] wrappers.
//!
//! The store is deliberately forgiving: all corruption truncates the tail
//! and all write failures switch the store into an inert mode, since the
//! in-memory graph remains the source of truth while the daemon runs.

mod wire;

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use lightning_encoding::{LightningDecode, LightningEncode};

use crate::p2p::{LocalAddChannel, NodeId, ShortChannelId};
use crate::routing::RoutingState;
pub use wire::{
    StoreMessage, STORE_TYPE_CHANNEL_ANNOUNCEMENT, STORE_TYPE_CHANNEL_DELETE,
    STORE_TYPE_CHANNEL_UPDATE, STORE_TYPE_LOCAL_ADD_CHANNEL,
    STORE_TYPE_NODE_ANNOUNCEMENT,
};

/// Current gossip store version, the first byte of the file.
pub const GOSSIP_STORE_VERSION: u8 = 0x02;

/// Minimum number of records before a rewrite is considered.
const MIN_RECORDS_FOR_REWRITE: usize = 100;
/// Rewrite once more than every tenth record is stale.
const MAX_COUNT_TO_STALE_RATE: usize = 10;
/// Upper bound of a sane record payload; anything longer means the length
/// header itself is damaged.
const MAX_RECORD_LEN: usize = 1 << 20;

/// Store failures. Only [`Store::open`] and [`Store::rewrite`] surface them;
/// append failures are latched internally instead.
#[derive(Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Error {
    /// gossip store I/O failure: {0}
    #[from]
    Io(io::Error),

    /// gossip store record encoding failure: {0}
    #[from]
    Encoding(lightning_encoding::Error),
}

/// Per-type record counts reported by [`Store::load`].
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Display)]
#[display(
    "{channel_announcements}/{channel_updates}/{node_announcements}/\
     {channel_deletes} cannounce/cupdate/nannounce/cdelete"
)]
pub struct LoadStats {
    /// Channel announcements replayed
    pub channel_announcements: usize,
    /// Channel updates replayed
    pub channel_updates: usize,
    /// Node announcements replayed
    pub node_announcements: usize,
    /// Channel deletions replayed
    pub channel_deletes: usize,
    /// Local private channels replayed
    pub local_channels: usize,
}

/// The on-disk gossip store.
///
/// The file descriptor is owned by the store and closed on drop whatever the
/// exit path; after a write failure the handle is dropped early and the
/// store keeps running as a no-op sink.
#[derive(Debug)]
pub struct Store {
    /// Live file handle; `None` once a write failure disabled the store
    file: Option<File>,
    path: PathBuf,
    /// Records written since open, including replayed ones
    count: usize,
    /// Byte offset the next record will land at
    write_pos: u64,
    /// Latched compaction trigger
    rewrite_due: bool,
}

impl Store {
    /// Opens or creates the gossip store at `path`.
    ///
    /// An empty file receives the version byte; a file with a foreign
    /// version byte is discarded and re-initialized. Fails only on
    /// unrecoverable I/O errors.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Store, Error> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        file.seek(SeekFrom::Start(0))?;
        let mut version = [0u8; 1];
        match file.read(&mut version)? {
            1 if version[0] == GOSSIP_STORE_VERSION => {}
            1 => {
                warn!(
                    "gossip store version {} not {}: removing",
                    version[0], GOSSIP_STORE_VERSION
                );
                file.set_len(0)?;
                file.write_all(&[GOSSIP_STORE_VERSION])?;
            }
            _ => {
                // empty (or fresh) file, write the version byte
                file.write_all(&[GOSSIP_STORE_VERSION])?;
            }
        }

        let write_pos = file.metadata()?.len();
        Ok(Store {
            file: Some(file),
            path,
            count: 0,
            write_pos,
            rewrite_due: false,
        })
    }

    /// Number of records written since the store was opened.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether the staleness trigger has fired and a rewrite is due.
    #[inline]
    pub fn rewrite_due(&self) -> bool {
        self.rewrite_due
    }

    /// Appends one wrapper record and returns the byte offset of the new
    /// record, which becomes the broadcast index of the entity it carries.
    ///
    /// `live` is the current size of the broadcastable set, used for the
    /// staleness trigger. The first failed write disables the store; later
    /// calls are silent no-ops returning `None`.
    pub fn append(&mut self, msg: &StoreMessage, live: usize) -> Option<u32> {
        let payload = match msg.lightning_serialize() {
            Ok(payload) => payload,
            Err(err) => {
                error!("cannot encode gossip store record: {}", err);
                return None;
            }
        };

        let file = self.file.as_mut()?;
        let mut record = Vec::with_capacity(8 + payload.len());
        record.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        record.extend_from_slice(&crc32c::crc32c(&payload).to_be_bytes());
        record.extend_from_slice(&payload);

        if let Err(err) = file.write_all(&record) {
            error!(
                "failed writing to gossip store: {}; no further records will \
                 be persisted",
                err
            );
            self.file = None;
            return None;
        }

        let index = self.write_pos as u32;
        self.write_pos += record.len() as u64;
        self.count += 1;

        let stale = self.count.saturating_sub(live);
        if self.count >= MIN_RECORDS_FOR_REWRITE
            && stale * MAX_COUNT_TO_STALE_RATE > self.count
        {
            self.rewrite_due = true;
        }
        Some(index)
    }

    /// Replays the store into a routing state through the trusted insertion
    /// entry points.
    ///
    /// Stops at the first corrupt or rejected record, truncating the file
    /// back to the version byte: deletion records further down could not be
    /// replayed correctly against a partially restored graph anyway.
    pub fn load(&mut self, rstate: &mut RoutingState) -> LoadStats {
        let mut stats = LoadStats::default();
        let mut known_good: u64 = 1;
        let mut records = 0usize;
        let mut corrupt: Option<String> = None;

        match self.file.as_mut() {
            None => return stats,
            Some(file) => {
                if let Err(err) = file.seek(SeekFrom::Start(1)) {
                    corrupt = Some(format!("seek failure: {}", err));
                } else {
                    let mut reader = BufReader::new(file);
                    loop {
                        let mut header = [0u8; 8];
                        match read_full(&mut reader, &mut header) {
                            Ok(0) => break,
                            Ok(8) => {}
                            Ok(_) => {
                                corrupt = Some(s!("truncated record header"));
                                break;
                            }
                            Err(err) => {
                                corrupt =
                                    Some(format!("read failure: {}", err));
                                break;
                            }
                        }
                        let len = u32::from_be_bytes([
                            header[0], header[1], header[2], header[3],
                        ]) as usize;
                        let checksum = u32::from_be_bytes([
                            header[4], header[5], header[6], header[7],
                        ]);
                        if len > MAX_RECORD_LEN {
                            corrupt =
                                Some(format!("oversized record ({})", len));
                            break;
                        }
                        let mut payload = vec![0u8; len];
                        if reader.read_exact(&mut payload).is_err() {
                            corrupt = Some(s!("truncated file?"));
                            break;
                        }
                        if crc32c::crc32c(&payload) != checksum {
                            corrupt = Some(s!("Checksum verification failed"));
                            break;
                        }
                        let msg =
                            match StoreMessage::lightning_deserialize(&payload)
                            {
                                Ok(msg) => msg,
                                Err(err) => {
                                    corrupt = Some(format!(
                                        "unknown store record: {}",
                                        err
                                    ));
                                    break;
                                }
                            };

                        let index = known_good as u32;
                        let applied = match msg {
                            StoreMessage::ChannelAnnouncement {
                                announce,
                                satoshis,
                            } => {
                                let ok = rstate
                                    .routing_add_channel_announcement(
                                        &announce, satoshis, index,
                                    );
                                if ok {
                                    stats.channel_announcements += 1;
                                }
                                ok
                            }
                            StoreMessage::ChannelUpdate(update) => {
                                let ok = rstate
                                    .routing_add_channel_update(&update, index);
                                if ok {
                                    stats.channel_updates += 1;
                                }
                                ok
                            }
                            StoreMessage::NodeAnnouncement(announcement) => {
                                let ok = rstate.routing_add_node_announcement(
                                    &announcement,
                                    index,
                                );
                                if ok {
                                    stats.node_announcements += 1;
                                }
                                ok
                            }
                            StoreMessage::ChannelDelete(scid) => {
                                let ok = rstate.del_channel(&scid);
                                if ok {
                                    stats.channel_deletes += 1;
                                }
                                ok
                            }
                            StoreMessage::LocalAddChannel(msg) => {
                                let ok = rstate.routing_add_local_channel(&msg);
                                if ok {
                                    stats.local_channels += 1;
                                }
                                ok
                            }
                        };
                        if !applied {
                            corrupt = Some(s!("rejected store record"));
                            break;
                        }

                        known_good += 8 + len as u64;
                        records += 1;
                    }
                }
            }
        }

        self.count += records;
        match corrupt {
            Some(reason) => {
                warn!("gossip store: {}; truncating to byte 1", reason);
                let truncated = match self.file.as_mut() {
                    Some(file) => file.set_len(1).is_ok(),
                    None => false,
                };
                if !truncated {
                    error!(
                        "failed truncating corrupt gossip store; disabling it"
                    );
                    self.file = None;
                }
                self.write_pos = 1;
            }
            None => self.write_pos = known_good,
        }
        debug!(
            "gossip store: read {} from store in {} bytes",
            stats, self.write_pos
        );
        stats
    }

    /// Rebuilds the store from the current broadcastable set: every
    /// announced channel with its updates and endpoint node announcements,
    /// plus a local-add record per private channel. The new file replaces
    /// the live one atomically and all broadcast indices are rewritten to
    /// the fresh offsets.
    pub fn rewrite(&mut self, rstate: &mut RoutingState) -> Result<(), Error> {
        self.rewrite_due = false;

        let mut plan: Vec<(Option<RecordOwner>, StoreMessage)> = Vec::new();
        let mut written_nodes: BTreeSet<NodeId> = BTreeSet::new();
        for (scid, chan) in &rstate.chans {
            match &chan.channel_announce {
                Some(announce) => {
                    if chan.bcast.index == 0 {
                        // no update yet, nothing of it is in the store
                        continue;
                    }
                    plan.push((
                        Some(RecordOwner::Channel(*scid)),
                        StoreMessage::ChannelAnnouncement {
                            announce: announce.clone(),
                            satoshis: chan.capacity_sat,
                        },
                    ));
                    for (direction, half) in chan.half.iter().enumerate() {
                        if let Some(update) = &half.channel_update {
                            plan.push((
                                Some(RecordOwner::Half(*scid, direction)),
                                StoreMessage::ChannelUpdate(update.clone()),
                            ));
                        }
                    }
                    for id in chan.nodes {
                        if !written_nodes.insert(id) {
                            continue;
                        }
                        if let Some(node) = rstate.nodes.get(&id) {
                            if node.bcast.index != 0 {
                                if let Some(announcement) =
                                    &node.node_announcement
                                {
                                    plan.push((
                                        Some(RecordOwner::Node(id)),
                                        StoreMessage::NodeAnnouncement(
                                            announcement.clone(),
                                        ),
                                    ));
                                }
                            }
                        }
                    }
                }
                None => {
                    if let Some(remote_node_id) =
                        chan.other_node(&rstate.local_id)
                    {
                        let local_add = LocalAddChannel {
                            chain_hash: rstate.chain_hash,
                            short_channel_id: *scid,
                            remote_node_id,
                            satoshis: chan.capacity_sat,
                        };
                        plan.push((
                            None,
                            StoreMessage::LocalAddChannel(
                                local_add.to_wire()?,
                            ),
                        ));
                    }
                }
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&[GOSSIP_STORE_VERSION])?;

        let mut offset: u64 = 1;
        let mut records = 0usize;
        let mut assignments: Vec<(RecordOwner, u32)> = Vec::new();
        for (owner, msg) in plan {
            let payload = msg.lightning_serialize()?;
            tmp.write_all(&(payload.len() as u32).to_be_bytes())?;
            tmp.write_all(&crc32c::crc32c(&payload).to_be_bytes())?;
            tmp.write_all(&payload)?;
            if let Some(owner) = owner {
                assignments.push((owner, offset as u32));
            }
            offset += 8 + payload.len() as u64;
            records += 1;
        }
        tmp.sync_all()?;
        drop(tmp);
        fs::rename(&tmp_path, &self.path)?;

        self.file = Some(
            OpenOptions::new().read(true).append(true).open(&self.path)?,
        );
        self.count = records;
        self.write_pos = offset;

        // index write-back happens only after the rename made the new file
        // live, so a failed rewrite leaves all descriptors untouched
        for (owner, index) in assignments {
            match owner {
                RecordOwner::Channel(scid) => {
                    if let Some(chan) = rstate.chans.get_mut(&scid) {
                        chan.bcast.index = index;
                    }
                }
                RecordOwner::Half(scid, direction) => {
                    if let Some(chan) = rstate.chans.get_mut(&scid) {
                        chan.half[direction].bcast.index = index;
                    }
                }
                RecordOwner::Node(id) => {
                    if let Some(node) = rstate.nodes.get_mut(&id) {
                        node.bcast.index = index;
                    }
                }
            }
        }

        debug!(
            "gossip store compacted to {} records in {} bytes",
            records, offset
        );
        Ok(())
    }
}

/// Which graph entity a rewritten record belongs to, for broadcast-index
/// write-back.
enum RecordOwner {
    Channel(ShortChannelId),
    Half(ShortChannelId, usize),
    Node(NodeId),
}

/// `read_exact` that reports a clean EOF at a record boundary as 0 bytes
/// instead of an error.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        match reader.read(&mut buf[done..]) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(done)
}
