use clap::ValueEnum;
use rand::Rng;

use crate::address::Ppa;
use crate::config::SsdParams;
use crate::nand::{IoKind, NandCmd, NandOp, PageStatus};

use super::line::LineId;
use super::ConvFtl;

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum, Debug)]
#[clap(rename_all = "verbatim")]
pub enum GcPolicyChoice {
    Greedy,
    CostBenefit,
    Random,
}

impl std::fmt::Display for GcPolicyChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            GcPolicyChoice::Greedy => "Greedy",
            GcPolicyChoice::CostBenefit => "CostBenefit",
            GcPolicyChoice::Random => "Random",
        })
    }
}

/// Couples host writes to reclamation: one credit per page written; each
/// GC cycle sets the refill quantum to the number of pages it reclaimed,
/// bounding the write rate by the reclamation rate.
#[derive(Clone, Copy, Debug)]
pub struct WriteFlowControl {
    pub write_credits: i64,
    pub credits_to_refill: usize,
}

impl WriteFlowControl {
    pub fn new(sp: &SsdParams) -> Self {
        WriteFlowControl {
            write_credits: sp.pgs_per_line as i64,
            credits_to_refill: sp.pgs_per_line,
        }
    }
}

// Age buckets for cost-benefit scoring, in seconds since the last
// overwrite touched the line.
fn age_level(age_secs: u64) -> u64 {
    match age_secs {
        0..=10 => 1,
        11..=20 => 2,
        21..=45 => 3,
        46..=90 => 4,
        91..=180 => 5,
        181..=360 => 6,
        _ => 7,
    }
}

impl ConvFtl {
    /// Background reclamation predicate (low watermark).
    pub fn should_gc(&self) -> bool {
        self.lm.free_line_cnt <= self.cp.gc_thres_lines
    }

    fn should_gc_high(&self) -> bool {
        self.lm.free_line_cnt <= self.cp.gc_thres_lines_high
    }

    pub(crate) fn consume_write_credit(&mut self) {
        self.wfc.write_credits -= 1;
    }

    pub(crate) fn check_and_refill_write_credit(&mut self, now: u64) {
        if self.wfc.write_credits <= 0 {
            self.foreground_gc(now);
            self.wfc.write_credits += self.wfc.credits_to_refill as i64;
        }
    }

    pub fn foreground_gc(&mut self, now: u64) {
        if self.should_gc_high() {
            debug!("foreground GC with {} free lines", self.lm.free_line_cnt);
            self.do_gc(true, now);
        }
    }

    fn cost_benefit_select(&self, now: u64) -> Option<LineId> {
        let mut min_line = None;
        let mut min_res = u64::MAX;
        for &id in self.lm.victim_line_pq.ids() {
            let line = &self.lm.lines[id];
            debug_assert!(line.ipc > 0);
            let age_secs = now.saturating_sub(line.age) / 1_000_000_000;
            let res = ((line.vpc as u64) << 10) / (line.ipc as u64 * age_level(age_secs));
            if res < min_res {
                min_res = res;
                min_line = Some(id);
            }
        }
        min_line
    }

    fn random_select(&mut self) -> Option<LineId> {
        let ids = self.lm.victim_line_pq.ids();
        if ids.is_empty() {
            return None;
        }
        Some(ids[self.rng.gen_range(0..ids.len())])
    }

    /// Picks and detaches the next reclamation victim. A non-forced call
    /// refuses a victim still holding more than an eighth of a line of
    /// live data.
    pub(crate) fn select_victim_line(&mut self, force: bool, now: u64) -> Option<LineId> {
        let policy = self.cp.gc_policy;
        let victim = match policy {
            GcPolicyChoice::Greedy => self.lm.victim_line_pq.peek(),
            GcPolicyChoice::CostBenefit => self.cost_benefit_select(now),
            GcPolicyChoice::Random => self.random_select(),
        }?;

        if !force && self.lm.lines[victim].vpc > self.ssd.sp.pgs_per_line / 8 {
            return None;
        }

        match policy {
            GcPolicyChoice::Greedy => {
                let popped = self.lm.victim_line_pq.pop(&mut self.lm.lines);
                debug_assert_eq!(popped, Some(victim));
            }
            // The winner is generally not at the root.
            GcPolicyChoice::CostBenefit | GcPolicyChoice::Random => {
                self.lm.victim_line_pq.remove(&mut self.lm.lines, victim);
            }
        }
        self.lm.lines[victim].pos = 0;
        self.lm.victim_line_cnt -= 1;

        // The line dangles now; GC hands it back to the free pool.
        Some(victim)
    }

    /// Relocates one valid page (already read into DRAM) through the GC
    /// write pointer; the map update rides along with the copy-back.
    fn gc_write_page(&mut self, old_ppa: &Ppa) {
        let sp = self.ssd.sp.clone();
        let lpn = self.rmap_ent(old_ppa);
        assert!(sp.valid_lpn(lpn));

        let new_ppa = self.get_new_page(IoKind::Gc);
        self.set_maptbl_ent(lpn, &new_ppa);
        self.set_rmap_ent(lpn, &new_ppa);
        self.lm.mark_page_valid(&mut self.ssd, &new_ppa);
        self.advance_write_pointer(IoKind::Gc);

        if self.cp.enable_gc_delay {
            // Only a completed wordline costs a program; pages before it
            // ride for free.
            let (op, xfer_size) = if sp.last_pg_in_wordline(&new_ppa) {
                (NandOp::Write, sp.pgsz * sp.pgs_per_oneshotpg)
            } else {
                (NandOp::Nop, 0)
            };
            self.ssd.advance_nand(&NandCmd {
                kind: IoKind::Gc,
                op,
                stime: 0,
                xfer_size,
                interleave_pcie_dma: false,
                ppa: new_ppa,
            });
        }
    }

    /// Scans one flash-page group of a victim block and copies out every
    /// VALID 4 KiB page, charging a single NAND read for the group.
    fn clean_one_flashpg(&mut self, ppa: &Ppa) {
        let sp = self.ssd.sp.clone();
        let mut cnt = 0;
        let mut p = *ppa;
        for i in 0..sp.pgs_per_flashpg {
            p.set_pg(ppa.pg() + i as u32);
            // There shouldn't be any free page in victim blocks.
            assert_ne!(self.ssd.page(&p), PageStatus::Free);
            if self.ssd.page(&p) == PageStatus::Valid {
                cnt += 1;
            }
        }
        if cnt == 0 {
            return;
        }

        if self.cp.enable_gc_delay {
            self.ssd.advance_nand(&NandCmd {
                kind: IoKind::Gc,
                op: NandOp::Read,
                stime: 0,
                xfer_size: sp.pgsz * cnt,
                interleave_pcie_dma: false,
                ppa: *ppa,
            });
        }

        for i in 0..sp.pgs_per_flashpg {
            p.set_pg(ppa.pg() + i as u32);
            if self.ssd.page(&p) == PageStatus::Valid {
                self.gc_write_page(&p);
                self.pg_cnt += 1;
            }
        }
    }

    /// One full GC cycle: select a victim, copy its live pages, erase its
    /// blocks across every (channel, LUN), and return the line to the
    /// free pool. Returns false when no victim qualifies.
    pub fn do_gc(&mut self, force: bool, now: u64) -> bool {
        let Some(victim) = self.select_victim_line(force, now) else {
            return false;
        };
        let sp = self.ssd.sp.clone();
        self.gc_cnt += 1;
        debug!(
            "GC-ing line:{}, ipc={} ({}), victim={}, full={}, free={}",
            victim,
            self.lm.lines[victim].ipc,
            self.lm.lines[victim].vpc,
            self.lm.victim_line_cnt,
            self.lm.full_line_cnt,
            self.lm.free_line_cnt
        );

        // Reclaimed pages become the next credit refill.
        self.wfc.credits_to_refill = self.lm.lines[victim].ipc;

        for flashpg in 0..sp.flashpgs_per_blk {
            let pg = flashpg * sp.pgs_per_flashpg;
            for ch in 0..sp.nchs {
                for lun in 0..sp.luns_per_ch {
                    let ppa = Ppa::new(ch, lun, 0, victim, pg);
                    self.clean_one_flashpg(&ppa);

                    if flashpg == sp.flashpgs_per_blk - 1 {
                        self.lm.mark_block_free(&mut self.ssd, &ppa);
                        if self.cp.enable_gc_delay {
                            self.ssd.advance_nand(&NandCmd {
                                kind: IoKind::Gc,
                                op: NandOp::Erase,
                                stime: 0,
                                xfer_size: 0,
                                interleave_pcie_dma: false,
                                ppa,
                            });
                        }
                        let lunp = self.ssd.lun_mut(&ppa);
                        lunp.gc_endtime = lunp.next_avail_time;
                    }
                }
            }
        }

        self.lm.mark_line_free(victim);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::INVALID_LPN;
    use crate::config::{ConvParams, Geometry};
    use crate::nand::SharedCtx;
    use crate::sanity::check_ftl;
    use std::sync::Arc;

    fn make_ftl(geo: &Geometry, policy: GcPolicyChoice) -> ConvFtl {
        let sp = Arc::new(SsdParams::new(geo));
        let shared = SharedCtx::new(&sp);
        let cp = ConvParams {
            gc_policy: policy,
            ..ConvParams::default()
        };
        ConvFtl::new(sp, cp, shared, 0xf7_1)
    }

    fn small_geo(blks_per_pl: usize, pgs_per_blk: usize) -> Geometry {
        Geometry {
            nchs: 1,
            luns_per_ch: 1,
            pls_per_lun: 1,
            blks_per_pl,
            pgs_per_blk,
            pgs_per_oneshotpg: 1,
            pgs_per_flashpg: 1,
        }
    }

    /// The mapping half of the host write path, without buffering or
    /// credit accounting, so tests control GC timing directly.
    fn host_write(ftl: &mut ConvFtl, lpn: u64, now: u64) {
        let ppa = ftl.maptbl_ent(lpn);
        if ppa.is_mapped() {
            ftl.lm.line_of_mut(&ppa).age = now;
            ftl.lm.mark_page_invalid(&mut ftl.ssd, &ppa);
            ftl.set_rmap_ent(INVALID_LPN, &ppa);
        }
        let new_ppa = ftl.get_new_page(IoKind::User);
        ftl.set_maptbl_ent(lpn, &new_ppa);
        ftl.set_rmap_ent(lpn, &new_ppa);
        ftl.lm.mark_page_valid(&mut ftl.ssd, &new_ppa);
        ftl.advance_write_pointer(IoKind::User);
    }

    #[test]
    fn test_forced_gc_reclaims_high_vpc_victim() {
        let mut ftl = make_ftl(&small_geo(6, 4), GcPolicyChoice::Greedy);
        for lpn in 0..4 {
            host_write(&mut ftl, lpn, 0);
        }
        host_write(&mut ftl, 0, 0);
        // One victim with vpc = pgs_per_line - 1: too live to pick freely.
        assert_eq!(ftl.lm.victim_line_cnt, 1);
        assert!(!ftl.do_gc(false, 0));
        assert_eq!(ftl.lm.victim_line_cnt, 1);

        let free_before = ftl.lm.free_line_cnt;
        assert!(ftl.do_gc(true, 0));
        assert_eq!(ftl.gc_cnt, 1);
        assert_eq!(ftl.pg_cnt, 3);
        assert_eq!(ftl.ssd.stats.erases, 1);
        assert_eq!(ftl.wfc.credits_to_refill, 1);
        // One line net back in the pool.
        assert_eq!(ftl.lm.free_line_cnt, free_before + 1);
        assert_eq!(ftl.lm.victim_line_cnt, 0);
        // The survivors moved into the GC write pointer's line.
        for lpn in 1..4 {
            let ppa = ftl.maptbl_ent(lpn);
            assert_eq!(ppa.blk() as usize, ftl.gc_wp.curline);
            assert_eq!(ftl.rmap_ent(&ppa), lpn);
        }
        check_ftl(&ftl);
    }

    #[test]
    fn test_greedy_picks_lowest_vpc() {
        let mut ftl = make_ftl(&small_geo(6, 4), GcPolicyChoice::Greedy);
        for lpn in 0..8 {
            host_write(&mut ftl, lpn, 0);
        }
        // Line 0 down to vpc 1, line 2 down to vpc 3.
        for lpn in 0..3 {
            host_write(&mut ftl, lpn, 0);
        }
        host_write(&mut ftl, 4, 0);
        assert_eq!(ftl.lm.victim_line_cnt, 2);

        let victim = ftl.select_victim_line(true, 0).unwrap();
        assert_eq!(victim, 0);
        assert_eq!(ftl.lm.lines[victim].vpc, 1);
        assert_eq!(ftl.lm.lines[victim].pos, 0);
        assert_eq!(ftl.lm.victim_line_cnt, 1);
        assert!(ftl.lm.victim_line_pq.is_valid(&ftl.lm.lines));
    }

    #[test]
    fn test_cost_benefit_prefers_older_line() {
        let mut ftl = make_ftl(&small_geo(6, 4), GcPolicyChoice::CostBenefit);
        for lpn in 0..8 {
            host_write(&mut ftl, lpn, 0);
        }
        // Both victims end at vpc 2, ipc 2; line 0 aged long ago, line 2
        // touched moments before selection.
        for lpn in 0..2 {
            host_write(&mut ftl, lpn, 0);
        }
        let now = 400_000_000_000;
        for lpn in 4..6 {
            host_write(&mut ftl, lpn, now - 10_000_000_000);
        }
        assert_eq!(ftl.lm.lines[0].vpc, 2);
        assert_eq!(ftl.lm.lines[2].vpc, 2);

        // Equal VPC/IPC: the older line scores lower and wins.
        let victim = ftl.select_victim_line(true, now).unwrap();
        assert_eq!(victim, 0);
        assert!(ftl.lm.victim_line_pq.is_valid(&ftl.lm.lines));
    }

    #[test]
    fn test_random_select_detaches_a_victim() {
        let mut ftl = make_ftl(&small_geo(6, 4), GcPolicyChoice::Random);
        for lpn in 0..8 {
            host_write(&mut ftl, lpn, 0);
        }
        for lpn in 0..4 {
            host_write(&mut ftl, lpn, 0);
        }
        host_write(&mut ftl, 4, 0);
        assert_eq!(ftl.lm.victim_line_cnt, 2);

        let free_before = ftl.lm.free_line_cnt;
        assert!(ftl.do_gc(true, 0));
        assert_eq!(ftl.lm.victim_line_cnt, 1);
        assert_eq!(ftl.lm.free_line_cnt, free_before + 1);
        assert!(ftl.lm.victim_line_pq.is_valid(&ftl.lm.lines));
        check_ftl(&ftl);
    }

    #[test]
    fn test_gc_coalesces_copies_into_wordlines() {
        // One-shot pages of three: six survivors span two wordlines, so
        // the copy-back costs exactly two programs and four no-ops.
        let geo = Geometry {
            nchs: 1,
            luns_per_ch: 1,
            pls_per_lun: 1,
            blks_per_pl: 4,
            pgs_per_blk: 9,
            pgs_per_oneshotpg: 3,
            pgs_per_flashpg: 3,
        };
        let mut ftl = make_ftl(&geo, GcPolicyChoice::Greedy);
        for lpn in 0..9 {
            host_write(&mut ftl, lpn, 0);
        }
        // Kill the first wordline of line 0.
        for lpn in 0..3 {
            host_write(&mut ftl, lpn, 0);
        }
        assert_eq!(ftl.lm.lines[0].vpc, 6);

        assert!(ftl.do_gc(true, 0));
        assert_eq!(ftl.pg_cnt, 6);
        assert_eq!(ftl.ssd.stats.gc_programs, 2);
        assert_eq!(ftl.ssd.stats.nops, 4);
        // The dead flash-page group is never read; the two live groups
        // cost one group read each.
        assert_eq!(ftl.ssd.stats.gc_reads, 2);
        check_ftl(&ftl);
    }

    #[test]
    fn test_gc_without_delay_skips_nand_accounting() {
        let mut ftl = make_ftl(&small_geo(6, 4), GcPolicyChoice::Greedy);
        ftl.cp.enable_gc_delay = false;
        for lpn in 0..4 {
            host_write(&mut ftl, lpn, 0);
        }
        host_write(&mut ftl, 0, 0);
        assert!(ftl.do_gc(true, 0));
        assert_eq!(ftl.ssd.stats.gc_reads, 0);
        assert_eq!(ftl.ssd.stats.gc_programs, 0);
        assert_eq!(ftl.ssd.stats.nops, 0);
        assert_eq!(ftl.ssd.stats.erases, 0);
        assert_eq!(ftl.pg_cnt, 3);
        check_ftl(&ftl);
    }

    #[test]
    fn test_gc_with_no_victims_reports_failure() {
        let mut ftl = make_ftl(&small_geo(6, 4), GcPolicyChoice::Greedy);
        assert!(!ftl.do_gc(true, 0));
        assert_eq!(ftl.gc_cnt, 0);
    }
}
