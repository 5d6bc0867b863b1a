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

#![recursion_limit = "256"]
// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code,
    //missing_docs
)]

#[macro_use]
extern crate amplify;
extern crate lightning_encoding;
#[macro_use]
extern crate log;

pub mod control;
pub mod p2p;
pub mod router;
pub mod routing;
pub mod store;

pub use control::{FundingOracle, GossipDaemon};
pub use router::{RouteHop, ShortChannelIdDir, ROUTING_MAX_HOPS};
pub use routing::RoutingState;
pub use store::{LoadStats, Store, GOSSIP_STORE_VERSION};
