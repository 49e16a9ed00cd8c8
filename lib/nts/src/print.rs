// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Print stack state in a human-friendly manner.

use crate::engine::RxStats;
use crate::engine::fifo::ChannelUsage;
use nts_api::NtsCfg;
use std::io::Write;
use tabwriter::TabWriter;

/// Print a horizontal rule in bold.
pub fn write_hrb(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:=<70}", "=")
}

/// Print a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}

/// Print an [`NtsCfg`].
pub fn print_cfg_into(
    writer: &mut impl Write,
    cfg: &NtsCfg,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "MAC\tIP\tNETMASK\tMAX DATAGRAM\tENABLED")?;
    writeln!(
        t,
        "{}\t{}\t{}\t{}\t{}",
        cfg.mac, cfg.ip, cfg.netmask, cfg.max_datagram_size, cfg.enabled,
    )?;
    t.flush()
}

/// Print [`RxStats`], skipping zero counters unless `all` is set.
pub fn print_stats_into(
    writer: &mut impl Write,
    stats: &RxStats,
    all: bool,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "Receive Stats")?;
    write_hrb(&mut t)?;
    writeln!(t, "COUNTER\tVALUE")?;
    write_hr(&mut t)?;
    for (name, val) in stats.entries() {
        if all || val != 0 {
            writeln!(t, "{name}\t{val}")?;
        }
    }
    t.flush()
}

/// Print the [`ChannelUsage`] of every channel.
pub fn print_channels_into(
    writer: &mut impl Write,
    usage: &[ChannelUsage],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "Channels")?;
    write_hrb(&mut t)?;
    writeln!(t, "CHANNEL\tDEPTH\tHIGH WATER")?;
    write_hr(&mut t)?;
    for u in usage {
        writeln!(t, "{}\t{}\t{}", u.name, u.depth, u.high_water)?;
    }
    t.flush()
}

/// Print [`RxStats`] to stdout.
pub fn print_stats(stats: &RxStats, all: bool) -> std::io::Result<()> {
    print_stats_into(&mut std::io::stdout(), stats, all)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stats_table() {
        let stats =
            RxStats { frames_in: 12, echo_replies: 3, ..Default::default() };

        let mut out = vec![];
        print_stats_into(&mut out, &stats, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        let rows: Vec<&str> = text.lines().skip(4).collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("frames_in"));
        assert!(rows[0].ends_with("12"));
        assert!(rows[1].starts_with("echo_replies"));

        let mut out = vec![];
        print_stats_into(&mut out, &stats, true).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 4 + stats.entries().len());
    }

    #[test]
    fn channel_table() {
        let usage = [
            ChannelUsage { name: "ingress", depth: 2048, high_water: 8 },
            ChannelUsage { name: "app meta", depth: 16, high_water: 16 },
        ];

        let mut out = vec![];
        print_channels_into(&mut out, &usage).unwrap();
        let text = String::from_utf8(out).unwrap();
        let rows: Vec<&str> = text.lines().skip(4).collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("ingress"));
        assert!(rows[1].starts_with("app meta"));
        assert!(rows[1].ends_with("16"));
    }
}
