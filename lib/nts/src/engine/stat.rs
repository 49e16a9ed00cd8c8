// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Receive stack statistics.
//!
//! Every drop in the stack is silent on the wire; these counters are
//! the only record of why traffic went missing. Each stage keeps its
//! own [`RxStats`] and only touches the counters it owns; the stack
//! sums them on demand.

use serde::Deserialize;
use serde::Serialize;

macro_rules! rx_stats {
    ($($(#[$doc:meta])* $name:ident),+ $(,)?) => {
        /// Counters of the receive stack, one per accept or drop
        /// reason.
        #[derive(
            Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
        )]
        pub struct RxStats {
            $($(#[$doc])* pub $name: u64,)+
        }

        impl RxStats {
            /// Name and value of every counter, in declaration order.
            pub fn entries(&self) -> Vec<(&'static str, u64)> {
                vec![$((stringify!($name), self.$name),)+]
            }
        }

        impl core::ops::AddAssign<&RxStats> for RxStats {
            fn add_assign(&mut self, other: &RxStats) {
                $(self.$name += other.$name;)+
            }
        }
    };
}

rx_stats! {
    /// Frames handed to the stack.
    frames_in,
    /// Frames whose destination MAC is neither ours nor broadcast.
    mac_mismatch,
    /// Frames with an EtherType other than ARP or IPv4.
    ethertype_unknown,
    /// Frames too short to carry an EtherType.
    runt_frame,
    arp_frames,
    ipv4_frames,
    /// Datagrams whose Total-Length exceeds the configured maximum.
    oversize,
    /// Frames too short to carry a Total-Length.
    length_runt,
    /// Datagrams that ended before their IPv4 header did.
    ip_hdr_truncated,
    ip_csum_bad,
    /// Datagrams for an address that is not ours.
    ip_not_local,
    /// Bad version, IHL, or Total-Length.
    ip_hdr_bad,
    ip_fragment,
    ip_accepted,
    /// Datagrams trimmed back to their Total-Length.
    ip_trimmed,
    ttl_expired,
    icmp_in,
    udp_in,
    tcp_in,
    proto_unknown,
    icmp_csum_bad,
    /// ICMP messages other than an option-less Echo Request.
    icmp_not_echo,
    echo_replies,
    ttl_exceeded_sent,
    port_unreach_sent,
    /// ICMP error triggers too short to quote.
    icmp_trigger_runt,
    udp_runt,
    udp_csum_bad,
    udp_port_closed,
    udp_empty,
    udp_delivered,
    /// Outgoing datagrams with no known next-hop MAC.
    neighbor_miss,
    frames_out,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sum_and_list() {
        let mut a =
            RxStats { frames_in: 2, udp_delivered: 1, ..Default::default() };
        let b = RxStats { frames_in: 3, ..Default::default() };
        a += &b;
        assert_eq!(a.frames_in, 5);

        let entries = a.entries();
        assert_eq!(entries[0], ("frames_in", 5));
        assert!(entries.contains(&("udp_delivered", 1)));
    }
}
