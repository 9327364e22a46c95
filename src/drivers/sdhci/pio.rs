//! PIO data movement through the 32-bit data port
//!
//! Bytes are packed least significant first. A block always starts on a
//! fresh data port word; a trailing partial word is flushed at the end of
//! the block.

use super::io::SdhciIo;
use super::regs::*;
use super::request::{Data, Segment};
use super::HostState;
use crate::hal::{Mmio, Platform};
use crate::time::Delay;

/// Position in a scatter list, carried across blocks and interrupts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct SgCursor {
    seg: usize,
    off: usize,
}

impl SgCursor {
    /// Claim the next run of at most `max` bytes: (segment, offset, length)
    fn next_run(&mut self, sg: &[Segment], max: usize) -> Option<(usize, usize, usize)> {
        while let Some(seg) = sg.get(self.seg) {
            let left = seg.len() - self.off;
            if left == 0 {
                self.seg += 1;
                self.off = 0;
                continue;
            }
            let len = left.min(max);
            let run = (self.seg, self.off, len);
            self.off += len;
            return Some(run);
        }
        None
    }
}

fn read_block<M: Mmio, D: Delay>(
    io: &SdhciIo<M, D>,
    sg: &mut [Segment],
    cursor: &mut SgCursor,
    blksz: usize,
) {
    let mut remaining = blksz;
    let mut scratch = 0u32;
    let mut chunk = 0;

    while remaining > 0 {
        let Some((seg, off, len)) = cursor.next_run(sg, remaining) else {
            log::error!("SDHCI: scatter list ends inside a block");
            return;
        };
        remaining -= len;

        for byte in &mut sg[seg].as_mut_slice()[off..off + len] {
            if chunk == 0 {
                scratch = io.read32(SDHCI_BUFFER);
                chunk = 4;
            }
            *byte = scratch as u8;
            scratch >>= 8;
            chunk -= 1;
        }
    }
}

fn write_block<M: Mmio, D: Delay>(
    io: &mut SdhciIo<M, D>,
    sg: &[Segment],
    cursor: &mut SgCursor,
    blksz: usize,
) {
    let mut remaining = blksz;
    let mut scratch = 0u32;
    let mut chunk = 0;

    while remaining > 0 {
        let Some((seg, off, len)) = cursor.next_run(sg, remaining) else {
            log::error!("SDHCI: scatter list ends inside a block");
            return;
        };
        remaining -= len;

        let bytes = &sg[seg].as_slice()[off..off + len];
        for (i, byte) in bytes.iter().enumerate() {
            scratch |= (*byte as u32) << (chunk * 8);
            chunk += 1;

            let last = remaining == 0 && i + 1 == len;
            if chunk == 4 || last {
                io.write32_raw(SDHCI_BUFFER, scratch);
                scratch = 0;
                chunk = 0;
            }
        }
    }
}

/// Move whole blocks while the controller has data or space for them
///
/// `blocks` counts the blocks still owed and is decremented per block.
pub(super) fn transfer<M: Mmio, D: Delay>(
    io: &mut SdhciIo<M, D>,
    data: &mut Data,
    cursor: &mut SgCursor,
    blocks: &mut u32,
) {
    let ready = if data.is_read() {
        SDHCI_DATA_AVAILABLE
    } else {
        SDHCI_SPACE_AVAILABLE
    };
    let blksz = data.blksz as usize;

    while *blocks > 0 && io.read32(SDHCI_PRESENT_STATE) & ready != 0 {
        if data.is_read() {
            read_block(io, &mut data.sg, cursor, blksz);
        } else {
            write_block(io, &data.sg, cursor, blksz);
        }
        *blocks -= 1;
    }
}

impl<P: Platform> HostState<P> {
    pub(super) fn transfer_pio(&mut self) {
        let Some(data) = self.mrq.as_mut().and_then(|r| r.data.as_mut()) else {
            return;
        };
        transfer(&mut self.io, data, &mut self.cursor, &mut self.blocks);
    }
}

#[cfg(test)]
mod tests {
    use super::super::fake::{self, Fake, FakeDelay, FakeMmio};
    use super::super::request::Direction;
    use super::*;
    use crate::config::DebugFlags;
    use std::vec::Vec;

    fn io(fake: &Fake) -> SdhciIo<FakeMmio, FakeDelay> {
        SdhciIo::new(fake.mmio(), fake.delay(), DebugFlags::empty())
    }

    #[test]
    fn write_flushes_partial_word_at_block_end() {
        let fake = Fake::new();
        let mut io = io(&fake);

        let payload = fake::pattern(7);
        let sg = [fake::segment(&payload[..3]), fake::segment(&payload[3..])];
        let mut cursor = SgCursor::default();
        write_block(&mut io, &sg, &mut cursor, 7);

        assert_eq!(fake.take_tx(), fake::words(&payload));
        // Data port writes skip the settle delay
        assert_eq!(fake.delayed_us(), 0);
    }

    #[test]
    fn read_restarts_packing_per_block() {
        let fake = Fake::new();
        let io = io(&fake);

        let payload = fake::pattern(12);
        let mut rx = fake::words(&payload[..6]);
        rx.extend(fake::words(&payload[6..]));
        fake.push_rx(&rx);

        let mut sg = [fake::segment(&[0u8; 4]), fake::segment(&[0u8; 8])];
        let mut cursor = SgCursor::default();
        read_block(&io, &mut sg, &mut cursor, 6);
        read_block(&io, &mut sg, &mut cursor, 6);

        assert_eq!(fake.rx_len(), 0);
        let got: Vec<u8> = sg.iter().flat_map(|s| s.as_slice().iter().copied()).collect();
        assert_eq!(got, payload);
    }

    #[test]
    fn every_block_size_survives_the_data_port() {
        let fake = Fake::new();
        let mut io = io(&fake);

        for blksz in 1..=512usize {
            let payload = fake::pattern(blksz);
            let split = blksz / 3;
            let sg = [
                fake::segment(&payload[..split]),
                fake::segment(&payload[split..]),
            ];
            write_block(&mut io, &sg, &mut SgCursor::default(), blksz);

            fake.push_rx(&fake.take_tx());
            let mut back = [fake::segment(&std::vec![0u8; blksz])];
            read_block(&io, &mut back, &mut SgCursor::default(), blksz);

            assert_eq!(back[0].as_slice(), &payload[..], "block size {}", blksz);
        }
    }

    #[test]
    fn transfer_stops_when_fifo_runs_dry() {
        let fake = Fake::new();
        let mut io = io(&fake);

        let mut data = Data::new(Direction::Read, 16, 4)
            .with_segment(fake::segment(&[0u8; 64]))
            .unwrap();
        let payload = fake::pattern(64);
        let mut cursor = SgCursor::default();
        let mut blocks = 4;

        fake.push_rx(&fake::words(&payload[..32]));
        transfer(&mut io, &mut data, &mut cursor, &mut blocks);
        assert_eq!(blocks, 2);

        fake.push_rx(&fake::words(&payload[32..]));
        transfer(&mut io, &mut data, &mut cursor, &mut blocks);
        assert_eq!(blocks, 0);
        assert_eq!(data.sg[0].as_slice(), &payload[..]);
    }
}
