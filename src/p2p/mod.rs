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

//! Gossip P2P data types and wire messages.
//!
//! Wire parsing itself is delegated to the `lightning_encoding` codec; this
//! module defines the decoded message structures, the per-message signature
//! digests and the small set of primitive types they are built from.

mod bolt7;
mod types;

pub use bolt7::*;
pub use types::*;
