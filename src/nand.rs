use std::cmp::max;
use std::sync::{Arc, Mutex};

use crate::address::Ppa;
use crate::buffer::WriteBuffer;
use crate::config::SsdParams;

// ---------------------------------------------------------------------------
// NAND array state
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PageStatus {
    Free,
    Valid,
    Invalid,
}

/// Per-block bookkeeping. `ipc + vpc + free pages == pgs_per_blk` at all
/// times; an erase resets both counts and bumps `erase_cnt`.
#[derive(Clone, Debug)]
pub struct NandBlock {
    pub ipc: usize,
    pub vpc: usize,
    pub erase_cnt: u64,
}

/// Availability clock of one LUN (die). `gc_endtime` mirrors the clock at
/// the moment GC last touched the LUN, as an observability hook.
#[derive(Clone, Default, Debug)]
pub struct NandLun {
    pub next_avail_time: u64,
    pub gc_endtime: u64,
}

#[derive(Clone, Default, Debug)]
pub struct NandChannel {
    pub next_avail_time: u64,
}

// ---------------------------------------------------------------------------
// Timing model
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IoKind {
    User,
    Gc,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NandOp {
    Read,
    Write,
    Erase,
    /// Charges channel transfer (if any) without a program pulse; used by
    /// GC for the non-final pages of a wordline.
    Nop,
}

pub struct NandCmd {
    pub kind: IoKind,
    pub op: NandOp,
    pub stime: u64,
    pub xfer_size: usize,
    /// Overlap the channel transfer with PCIe DMA toward the host.
    pub interleave_pcie_dma: bool,
    pub ppa: Ppa,
}

#[derive(Default, Clone, Debug)]
pub struct NandStats {
    pub user_reads: usize,
    pub gc_reads: usize,
    pub user_programs: usize,
    pub gc_programs: usize,
    pub nops: usize,
    pub erases: usize,
}

/// PCIe transfer clock, shared by all partitions of a namespace.
pub struct Pcie {
    bandwidth_mbps: u64,
    next_avail_time: Mutex<u64>,
}

impl Pcie {
    pub fn new(bandwidth_mbps: u64) -> Self {
        Pcie {
            bandwidth_mbps,
            next_avail_time: Mutex::new(0),
        }
    }

    pub fn advance(&self, stime: u64, bytes: usize) -> u64 {
        let mut clock = self.next_avail_time.lock().unwrap();
        let start = max(stime, *clock);
        let end = start + SsdParams::xfer_ns(bytes, self.bandwidth_mbps);
        *clock = end;
        end
    }
}

/// Resources shared by every partition of a namespace. Owned by the
/// namespace and handed to each partition explicitly; there are no
/// process-wide singletons.
pub struct SharedCtx {
    pub write_buffer: WriteBuffer,
    pub pcie: Pcie,
}

impl SharedCtx {
    pub fn new(sp: &SsdParams) -> Arc<Self> {
        Arc::new(SharedCtx {
            write_buffer: WriteBuffer::new(sp.write_buffer_size),
            pcie: Pcie::new(sp.pcie_bandwidth_mbps),
        })
    }
}

/// One partition's NAND array plus its latency model: per-LUN and
/// per-channel availability clocks advanced by every modelled operation.
/// Nothing is stored; operations always succeed and only cost time.
pub struct Ssd {
    pub sp: Arc<SsdParams>,
    pages: Vec<PageStatus>,
    blocks: Vec<NandBlock>,
    luns: Vec<NandLun>,
    chs: Vec<NandChannel>,
    pub shared: Arc<SharedCtx>,
    pub stats: NandStats,
}

impl Ssd {
    pub fn new(sp: Arc<SsdParams>, shared: Arc<SharedCtx>) -> Self {
        let pages = vec![PageStatus::Free; sp.tt_pgs];
        let blocks = (0..sp.tt_blks)
            .map(|_| NandBlock {
                ipc: 0,
                vpc: 0,
                erase_cnt: 0,
            })
            .collect();
        let luns = vec![NandLun::default(); sp.luns_per_ssd];
        let chs = vec![NandChannel::default(); sp.nchs];
        Ssd {
            sp,
            pages,
            blocks,
            luns,
            chs,
            shared,
            stats: NandStats::default(),
        }
    }

    pub fn page(&self, ppa: &Ppa) -> PageStatus {
        self.pages[self.sp.pg_idx(ppa)]
    }

    pub fn set_page(&mut self, ppa: &Ppa, status: PageStatus) {
        let idx = self.sp.pg_idx(ppa);
        self.pages[idx] = status;
    }

    pub fn blk(&self, ppa: &Ppa) -> &NandBlock {
        &self.blocks[self.sp.blk_idx(ppa)]
    }

    pub fn blk_mut(&mut self, ppa: &Ppa) -> &mut NandBlock {
        let idx = self.sp.blk_idx(ppa);
        &mut self.blocks[idx]
    }

    pub fn lun(&self, ppa: &Ppa) -> &NandLun {
        &self.luns[self.sp.lun_idx(ppa)]
    }

    pub fn lun_mut(&mut self, ppa: &Ppa) -> &mut NandLun {
        let idx = self.sp.lun_idx(ppa);
        &mut self.luns[idx]
    }

    fn count(&mut self, cmd: &NandCmd) {
        match (cmd.op, cmd.kind) {
            (NandOp::Read, IoKind::User) => self.stats.user_reads += 1,
            (NandOp::Read, IoKind::Gc) => self.stats.gc_reads += 1,
            (NandOp::Write, IoKind::User) => self.stats.user_programs += 1,
            (NandOp::Write, IoKind::Gc) => self.stats.gc_programs += 1,
            (NandOp::Nop, _) => self.stats.nops += 1,
            (NandOp::Erase, _) => self.stats.erases += 1,
        }
    }

    /// Moves the data of a command across the channel in
    /// `max_ch_xfer_size` chunks, optionally interleaving each chunk with
    /// PCIe DMA. Returns the completion time of the last chunk.
    fn advance_channel(&mut self, ch: usize, stime: u64, bytes: usize, interleave: bool) -> u64 {
        let sp = &self.sp;
        let mut remaining = bytes;
        let mut chunk_stime = stime;
        let mut completed = stime;
        while remaining > 0 {
            let sz = remaining.min(sp.max_ch_xfer_size);
            let start = max(chunk_stime, self.chs[ch].next_avail_time);
            let end = start + sp.fw_ch_xfer_lat + SsdParams::xfer_ns(sz, sp.ch_bandwidth_mbps);
            self.chs[ch].next_avail_time = end;
            completed = if interleave {
                self.shared.pcie.advance(end, sz)
            } else {
                end
            };
            chunk_stime = end;
            remaining -= sz;
        }
        completed
    }

    /// Advances the NAND clocks for one modelled operation and returns its
    /// absolute completion time in nanoseconds.
    pub fn advance_nand(&mut self, cmd: &NandCmd) -> u64 {
        debug_assert!(self.sp.valid_ppa(&cmd.ppa) || cmd.op == NandOp::Nop);
        self.count(cmd);
        let ch = cmd.ppa.ch() as usize;
        let lun = self.sp.lun_idx(&cmd.ppa);
        match cmd.op {
            NandOp::Read => {
                let read_lat = if cmd.xfer_size <= 4 * crate::config::KB {
                    self.sp.pg_4kb_rd_lat
                } else {
                    self.sp.pg_rd_lat
                };
                let cmd_stime = max(cmd.stime, self.luns[lun].next_avail_time);
                let nand_ready = cmd_stime + read_lat;
                self.luns[lun].next_avail_time = nand_ready;
                self.advance_channel(ch, nand_ready, cmd.xfer_size, cmd.interleave_pcie_dma)
            }
            NandOp::Write => {
                let cmd_stime = max(cmd.stime, self.luns[lun].next_avail_time);
                let chnl_etime = self.advance_channel(ch, cmd_stime, cmd.xfer_size, false);
                let completed = chnl_etime + self.sp.pg_wr_lat;
                self.luns[lun].next_avail_time = completed;
                completed
            }
            NandOp::Erase => {
                let cmd_stime = max(cmd.stime, self.luns[lun].next_avail_time);
                let completed = cmd_stime + self.sp.blk_er_lat;
                self.luns[lun].next_avail_time = completed;
                completed
            }
            NandOp::Nop => {
                if cmd.xfer_size > 0 {
                    self.advance_channel(ch, cmd.stime, cmd.xfer_size, cmd.interleave_pcie_dma)
                } else {
                    cmd.stime
                }
            }
        }
    }

    /// Firmware buffered-write cost plus the PCIe transfer of the payload
    /// from the host into the write buffer.
    pub fn advance_write_buffer(&mut self, stime: u64, bytes: usize) -> u64 {
        let sp = &self.sp;
        let wbuf_lat =
            sp.fw_wbuf_lat0 + (bytes as u64).div_ceil(4 * crate::config::KB as u64) * sp.fw_wbuf_lat1;
        self.shared.pcie.advance(stime + wbuf_lat, bytes)
    }

    /// The time at which every LUN and channel of this partition is idle.
    pub fn next_idle_time(&self) -> u64 {
        let lun_idle = self.luns.iter().map(|l| l.next_avail_time).max().unwrap_or(0);
        let ch_idle = self.chs.iter().map(|c| c.next_avail_time).max().unwrap_or(0);
        max(lun_idle, ch_idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Geometry;

    fn make_ssd() -> Ssd {
        let sp = Arc::new(SsdParams::new(&Geometry {
            nchs: 2,
            luns_per_ch: 2,
            pls_per_lun: 1,
            blks_per_pl: 4,
            pgs_per_blk: 8,
            pgs_per_oneshotpg: 2,
            pgs_per_flashpg: 2,
        }));
        let shared = SharedCtx::new(&sp);
        Ssd::new(sp, shared)
    }

    fn read_cmd(ppa: Ppa, stime: u64, xfer_size: usize) -> NandCmd {
        NandCmd {
            kind: IoKind::User,
            op: NandOp::Read,
            stime,
            xfer_size,
            interleave_pcie_dma: false,
            ppa,
        }
    }

    #[test]
    fn test_read_latency_composition() {
        let mut ssd = make_ssd();
        let ppa = Ppa::new(0, 0, 0, 0, 0);
        let done = ssd.advance_nand(&read_cmd(ppa, 1000, 4096));
        let expect = 1000
            + ssd.sp.pg_4kb_rd_lat
            + SsdParams::xfer_ns(4096, ssd.sp.ch_bandwidth_mbps);
        assert_eq!(done, expect);
        assert_eq!(ssd.stats.user_reads, 1);
    }

    #[test]
    fn test_reads_serialise_on_one_lun() {
        let mut ssd = make_ssd();
        let ppa = Ppa::new(0, 0, 0, 0, 0);
        let first = ssd.advance_nand(&read_cmd(ppa, 0, 4096));
        // Same LUN: the second sense waits for the first to vacate the die.
        let second = ssd.advance_nand(&read_cmd(ppa, 0, 4096));
        assert!(second > first);
        // Different LUN on the other channel: senses overlap fully.
        let other = ssd.advance_nand(&read_cmd(Ppa::new(1, 0, 0, 0, 0), 0, 4096));
        assert_eq!(other, first);
    }

    #[test]
    fn test_write_programs_after_channel_xfer() {
        let mut ssd = make_ssd();
        let ppa = Ppa::new(0, 1, 0, 2, 1);
        let xfer = ssd.sp.pgsz * ssd.sp.pgs_per_oneshotpg;
        let done = ssd.advance_nand(&NandCmd {
            kind: IoKind::User,
            op: NandOp::Write,
            stime: 500,
            xfer_size: xfer,
            interleave_pcie_dma: false,
            ppa,
        });
        let expect =
            500 + SsdParams::xfer_ns(xfer, ssd.sp.ch_bandwidth_mbps) + ssd.sp.pg_wr_lat;
        assert_eq!(done, expect);
        assert_eq!(ssd.lun(&ppa).next_avail_time, done);
    }

    #[test]
    fn test_nop_without_payload_is_free() {
        let mut ssd = make_ssd();
        let done = ssd.advance_nand(&NandCmd {
            kind: IoKind::Gc,
            op: NandOp::Nop,
            stime: 777,
            xfer_size: 0,
            interleave_pcie_dma: false,
            ppa: Ppa::new(0, 0, 0, 0, 0),
        });
        assert_eq!(done, 777);
        assert_eq!(ssd.stats.nops, 1);
        assert_eq!(ssd.next_idle_time(), 0);
    }

    #[test]
    fn test_erase_occupies_lun() {
        let mut ssd = make_ssd();
        let ppa = Ppa::new(1, 1, 0, 0, 0);
        let done = ssd.advance_nand(&NandCmd {
            kind: IoKind::Gc,
            op: NandOp::Erase,
            stime: 100,
            xfer_size: 0,
            interleave_pcie_dma: false,
            ppa,
        });
        assert_eq!(done, 100 + ssd.sp.blk_er_lat);
        assert_eq!(ssd.stats.erases, 1);
        assert_eq!(ssd.next_idle_time(), done);
    }

    #[test]
    fn test_write_buffer_advance() {
        let mut ssd = make_ssd();
        let done = ssd.advance_write_buffer(0, 8192);
        let expect = ssd.sp.fw_wbuf_lat0
            + 2 * ssd.sp.fw_wbuf_lat1
            + SsdParams::xfer_ns(8192, ssd.sp.pcie_bandwidth_mbps);
        assert_eq!(done, expect);
    }

    #[test]
    fn test_interleaved_read_pays_pcie() {
        let mut ssd = make_ssd();
        let mut cmd = read_cmd(Ppa::new(0, 0, 0, 0, 0), 0, 4096);
        cmd.interleave_pcie_dma = true;
        let done = ssd.advance_nand(&cmd);
        let chnl = ssd.sp.pg_4kb_rd_lat + SsdParams::xfer_ns(4096, ssd.sp.ch_bandwidth_mbps);
        assert_eq!(
            done,
            chnl + SsdParams::xfer_ns(4096, ssd.sp.pcie_bandwidth_mbps)
        );
    }
}
