pub mod gc;
pub mod line;
pub mod wp;

use std::cmp::max;
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::address::{Ppa, INVALID_LPN};
use crate::config::{lba_to_byte, ConvParams, SsdParams, KB};
use crate::nand::{IoKind, NandCmd, NandOp, SharedCtx, Ssd};
use crate::worker::InternalOpQueue;

use self::gc::WriteFlowControl;
use self::line::LineMgmt;
use self::wp::WritePointer;

// NVMe I/O opcodes handled here.
pub const NVME_CMD_FLUSH: u8 = 0x00;
pub const NVME_CMD_WRITE: u8 = 0x01;
pub const NVME_CMD_READ: u8 = 0x02;

/// One host I/O command, as handed over by the dispatcher.
#[derive(Clone, Copy, Debug)]
pub struct IoRequest {
    pub opcode: u8,
    pub sqid: u16,
    pub slba: u64,
    /// Number of logical blocks, 0-based as on the wire.
    pub nlb: u64,
    /// Force Unit Access: never complete early out of the write buffer.
    pub fua: bool,
    /// Wall-clock (virtual) start of the command, in nanoseconds.
    pub nsecs_start: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum IoStatus {
    #[default]
    Incomplete,
    Success,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct IoResult {
    pub status: IoStatus,
    /// Absolute completion time of the command, in nanoseconds.
    pub nsecs_target: u64,
}

// ---------------------------------------------------------------------------
// One FTL partition
// ---------------------------------------------------------------------------

/// One partition's translation state. Logical page `lpn` of the namespace
/// is owned by partition `lpn % nr_parts` and addressed here by
/// `lpn / nr_parts`; partitions share no mutable FTL state.
pub struct ConvFtl {
    pub ssd: Ssd,
    pub cp: ConvParams,
    /// Forward map: partition-local LPN -> PPA.
    pub(crate) maptbl: Vec<Ppa>,
    /// Reverse map: flat page index -> LPN (modelled OOB area).
    pub(crate) rmap: Vec<u64>,
    pub(crate) wp: WritePointer,
    pub(crate) gc_wp: WritePointer,
    pub lm: LineMgmt,
    pub(crate) wfc: WriteFlowControl,
    pub(crate) rng: SmallRng,

    /// GC cycles completed.
    pub gc_cnt: u64,
    /// 4 KiB pages copied out of victims.
    pub pg_cnt: u64,
}

impl ConvFtl {
    pub fn new(sp: Arc<SsdParams>, cp: ConvParams, shared: Arc<SharedCtx>, seed: u64) -> Self {
        let ssd = Ssd::new(sp.clone(), shared);
        let maptbl = vec![Ppa::UNMAPPED; sp.tt_pgs];
        let rmap = vec![INVALID_LPN; sp.tt_pgs];
        let mut lm = LineMgmt::new(&sp);
        let wp = WritePointer::prepare(&mut lm);
        let gc_wp = WritePointer::prepare(&mut lm);
        let wfc = WriteFlowControl::new(&sp);
        info!(
            "init FTL instance with {} channels ({} pages)",
            sp.nchs, sp.tt_pgs
        );
        ConvFtl {
            ssd,
            cp,
            maptbl,
            rmap,
            wp,
            gc_wp,
            lm,
            wfc,
            rng: SmallRng::seed_from_u64(seed),
            gc_cnt: 0,
            pg_cnt: 0,
        }
    }

    pub fn sp(&self) -> &SsdParams {
        &self.ssd.sp
    }

    pub fn maptbl_ent(&self, lpn: u64) -> Ppa {
        self.maptbl[lpn as usize]
    }

    pub fn set_maptbl_ent(&mut self, lpn: u64, ppa: &Ppa) {
        assert!(lpn < self.ssd.sp.tt_pgs as u64);
        self.maptbl[lpn as usize] = *ppa;
    }

    pub fn rmap_ent(&self, ppa: &Ppa) -> u64 {
        self.rmap[self.ssd.sp.pg_idx(ppa)]
    }

    /// rmap[page_no(ppa)] -> lpn
    pub fn set_rmap_ent(&mut self, lpn: u64, ppa: &Ppa) {
        let pgidx = self.ssd.sp.pg_idx(ppa);
        self.rmap[pgidx] = lpn;
    }

    fn wp_ref(&self, kind: IoKind) -> &WritePointer {
        match kind {
            IoKind::User => &self.wp,
            IoKind::Gc => &self.gc_wp,
        }
    }

    /// The next free PPA under the given write pointer; does not advance.
    pub fn get_new_page(&self, kind: IoKind) -> Ppa {
        self.wp_ref(kind).cur_page()
    }

    pub fn advance_write_pointer(&mut self, kind: IoKind) {
        let sp = self.ssd.sp.clone();
        match kind {
            IoKind::User => self.wp.advance(&sp, &mut self.lm),
            IoKind::Gc => self.gc_wp.advance(&sp, &mut self.lm),
        }
    }
}

// ---------------------------------------------------------------------------
// Namespace: the partition array plus shared device context
// ---------------------------------------------------------------------------

pub struct Namespace {
    pub id: u32,
    pub nr_parts: usize,
    pub ftls: Vec<ConvFtl>,
    pub sp: Arc<SsdParams>,
    pub cp: ConvParams,
    pub shared: Arc<SharedCtx>,
    /// Deferred buffer releases produced by the write path.
    pub worker: InternalOpQueue,
    /// Advertised logical capacity in bytes (physical minus OP headroom).
    pub size: u64,
}

impl Namespace {
    pub fn new(id: u32, sp: Arc<SsdParams>, cp: ConvParams, nr_parts: usize) -> Self {
        let shared = SharedCtx::new(&sp);
        let ftls: Vec<ConvFtl> = (0..nr_parts)
            .map(|i| ConvFtl::new(sp.clone(), cp, shared.clone(), 0x55d_50f7 + i as u64))
            .collect();
        let physical = (sp.tt_pgs * sp.pgsz * nr_parts) as u64;
        let size = physical * 100 / cp.pba_pcent as u64;
        info!(
            "FTL physical space: {}, logical space: {} (physical/logical * 100 = {})",
            physical, size, cp.pba_pcent
        );
        Namespace {
            id,
            nr_parts,
            ftls,
            sp,
            cp,
            shared,
            worker: InternalOpQueue::new(),
            size,
        }
    }

    /// Host-visible logical page count.
    pub fn logical_pgs(&self) -> u64 {
        self.size / self.sp.pgsz as u64
    }

    /// Applies every scheduled internal operation due at `now`.
    pub fn drain_internal(&mut self, now: u64) -> usize {
        self.worker.drain_until(now, &self.shared.write_buffer)
    }

    /// Reclamation opportunity while the dispatcher is idle: any partition
    /// below the low watermark runs one non-forced GC cycle.
    pub fn background_gc(&mut self, now: u64) {
        for ftl in &mut self.ftls {
            if ftl.should_gc() {
                ftl.do_gc(false, now);
            }
        }
    }

    /// Entry point per NVMe command. Returns false when the command is
    /// rejected at admission (range error or buffer backpressure).
    pub fn proc_io_cmd(&mut self, req: &IoRequest, ret: &mut IoResult) -> bool {
        match req.opcode {
            NVME_CMD_WRITE => {
                if !self.write(req, ret) {
                    return false;
                }
            }
            NVME_CMD_READ => {
                if !self.read(req, ret) {
                    return false;
                }
            }
            NVME_CMD_FLUSH => self.flush(req, ret),
            opcode => {
                error!("command not implemented: {:#04x}", opcode);
            }
        }
        true
    }

    fn read(&mut self, req: &IoRequest, ret: &mut IoResult) -> bool {
        let sp = self.sp.clone();
        let nr_parts = self.nr_parts as u64;
        let nr_lba = req.nlb + 1;
        let mut start_lpn = req.slba / sp.secs_per_pg as u64;
        let end_lpn = (req.slba + nr_lba - 1) / sp.secs_per_pg as u64;
        debug!(
            "read: start_lpn={}, len={}, end_lpn={}",
            start_lpn, nr_lba, end_lpn
        );

        if end_lpn / nr_parts >= sp.tt_pgs as u64 {
            error!(
                "read: lpn passed FTL range (start_lpn={} > tt_pgs={})",
                start_lpn, sp.tt_pgs
            );
            return false;
        }

        // Small requests clear the firmware faster.
        let fw_lat = if lba_to_byte(nr_lba) <= (4 * KB) as u64 * nr_parts {
            sp.fw_4kb_rd_lat
        } else {
            sp.fw_rd_lat
        };

        let mut nsecs_latest = req.nsecs_start;

        // One pass per partition; within a partition, consecutive pages
        // landing in the same flash page coalesce into one NAND read.
        let mut i = 0;
        while i < nr_parts && start_lpn <= end_lpn {
            let ftl = &mut self.ftls[(start_lpn % nr_parts) as usize];
            let mut xfer_size = 0usize;
            let mut prev_ppa = ftl.maptbl_ent(start_lpn / nr_parts);

            let mut lpn = start_lpn;
            while lpn <= end_lpn {
                let local_lpn = lpn / nr_parts;
                let cur_ppa = ftl.maptbl_ent(local_lpn);
                if !cur_ppa.is_mapped() || !sp.valid_ppa(&cur_ppa) {
                    debug!("lpn {:#x} not mapped to a valid ppa", local_lpn);
                    lpn += nr_parts;
                    continue;
                }

                if prev_ppa.is_mapped() && sp.same_flash_page(&cur_ppa, &prev_ppa) {
                    xfer_size += sp.pgsz;
                    lpn += nr_parts;
                    continue;
                }

                if xfer_size > 0 {
                    let completed = ftl.ssd.advance_nand(&NandCmd {
                        kind: IoKind::User,
                        op: NandOp::Read,
                        stime: req.nsecs_start,
                        xfer_size,
                        interleave_pcie_dma: true,
                        ppa: prev_ppa,
                    });
                    nsecs_latest = max(completed, nsecs_latest);
                }
                xfer_size = sp.pgsz;
                prev_ppa = cur_ppa;
                lpn += nr_parts;
            }

            // Issue the trailing run.
            if xfer_size > 0 {
                let completed = ftl.ssd.advance_nand(&NandCmd {
                    kind: IoKind::User,
                    op: NandOp::Read,
                    stime: req.nsecs_start,
                    xfer_size,
                    interleave_pcie_dma: true,
                    ppa: prev_ppa,
                });
                nsecs_latest = max(completed, nsecs_latest);
            }

            i += 1;
            start_lpn += 1;
        }

        ret.nsecs_target = nsecs_latest + fw_lat;
        ret.status = IoStatus::Success;
        true
    }

    fn write(&mut self, req: &IoRequest, ret: &mut IoResult) -> bool {
        let sp = self.sp.clone();
        let nr_parts = self.nr_parts as u64;
        let nr_lba = req.nlb + 1;
        let start_lpn = req.slba / sp.secs_per_pg as u64;
        let end_lpn = (req.slba + nr_lba - 1) / sp.secs_per_pg as u64;
        debug!(
            "write: start_lpn={}, len={}, end_lpn={}",
            start_lpn, nr_lba, end_lpn
        );

        if end_lpn / nr_parts >= sp.tt_pgs as u64 {
            error!(
                "write: lpn passed FTL range (start_lpn={} > tt_pgs={})",
                start_lpn, sp.tt_pgs
            );
            return false;
        }

        // Admit into the shared write buffer, or push back on the host.
        let bytes = lba_to_byte(nr_lba) as usize;
        if self.shared.write_buffer.allocate(bytes) < bytes {
            return false;
        }

        // DMA from the host into the buffer; NAND programs start after it.
        let mut nsecs_latest = self.ftls[0].ssd.advance_write_buffer(req.nsecs_start, bytes);
        let nsecs_xfer_completed = nsecs_latest;
        let program_stime = nsecs_latest;

        for lpn in start_lpn..=end_lpn {
            let program_completed = {
                let ftl = &mut self.ftls[(lpn % nr_parts) as usize];
                let local_lpn = lpn / nr_parts;

                let ppa = ftl.maptbl_ent(local_lpn);
                if ppa.is_mapped() {
                    // Overwrite: retire the old copy first. The line's age
                    // stamp feeds cost-benefit victim selection.
                    ftl.lm.line_of_mut(&ppa).age = req.nsecs_start;
                    ftl.lm.mark_page_invalid(&mut ftl.ssd, &ppa);
                    ftl.set_rmap_ent(INVALID_LPN, &ppa);
                    debug!("write: {} is invalid", ftl.ssd.sp.pg_idx(&ppa));
                }

                let new_ppa = ftl.get_new_page(IoKind::User);
                ftl.set_maptbl_ent(local_lpn, &new_ppa);
                ftl.set_rmap_ent(local_lpn, &new_ppa);
                ftl.lm.mark_page_valid(&mut ftl.ssd, &new_ppa);
                ftl.advance_write_pointer(IoKind::User);

                // The wordline program fires once its last page arrives.
                let completed = if sp.last_pg_in_wordline(&new_ppa) {
                    Some(ftl.ssd.advance_nand(&NandCmd {
                        kind: IoKind::User,
                        op: NandOp::Write,
                        stime: program_stime,
                        xfer_size: sp.pgsz * sp.pgs_per_oneshotpg,
                        interleave_pcie_dma: false,
                        ppa: new_ppa,
                    }))
                } else {
                    None
                };

                ftl.consume_write_credit();
                ftl.check_and_refill_write_credit(req.nsecs_start);
                completed
            };

            if let Some(completed) = program_completed {
                nsecs_latest = max(completed, nsecs_latest);
                // Free the buffered wordline once its program settles.
                self.worker
                    .schedule(req.sqid, completed, sp.pgs_per_oneshotpg * sp.pgsz);
            }
        }

        ret.nsecs_target = if req.fua || !sp.write_early_completion {
            nsecs_latest
        } else {
            nsecs_xfer_completed
        };
        ret.status = IoStatus::Success;
        true
    }

    fn flush(&mut self, req: &IoRequest, ret: &mut IoResult) {
        let start = req.nsecs_start;
        let mut latest = start;
        for ftl in &self.ftls {
            latest = max(latest, ftl.ssd.next_idle_time());
        }
        debug!("flush: latency={}", latest - start);

        let gc_cnts: u64 = self.ftls.iter().map(|f| f.gc_cnt).sum();
        let pg_cnts: u64 = self.ftls.iter().map(|f| f.pg_cnt).sum();
        info!("GC count: {}\tcopy page(4KiB) count: {}", gc_cnts, pg_cnts);

        ret.status = IoStatus::Success;
        ret.nsecs_target = latest;
    }
}
