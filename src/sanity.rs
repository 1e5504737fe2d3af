//! Independent re-computation of the FTL's bookkeeping, used as ground
//! truth by tests (and by the workload driver in debug builds). Walks the
//! mapping tables, the NAND page array, and the line collections, and
//! asserts every cross-structure invariant.

use std::collections::HashSet;

use crate::address::{Ppa, INVALID_LPN};
use crate::ftl::ConvFtl;
use crate::nand::PageStatus;

/// Panics on the first violated invariant.
pub fn check_ftl(ftl: &ConvFtl) {
    let sp = ftl.sp().clone();

    // Forward/reverse consistency, and: a page is VALID iff some logical
    // page maps to it.
    let mut mapped_pgidx = HashSet::new();
    for lpn in 0..sp.tt_pgs as u64 {
        let ppa = ftl.maptbl_ent(lpn);
        if !ppa.is_mapped() {
            continue;
        }
        assert!(sp.valid_ppa(&ppa), "fwd[{}] out of range", lpn);
        let pgidx = sp.pg_idx(&ppa);
        assert_eq!(
            ftl.rmap_ent(&ppa),
            lpn,
            "rmap disagrees with maptbl at lpn {}",
            lpn
        );
        assert_eq!(
            ftl.ssd.page(&ppa),
            PageStatus::Valid,
            "mapped page {} not VALID",
            pgidx
        );
        mapped_pgidx.insert(pgidx);
    }
    for pgidx in 0..sp.tt_pgs {
        let lpn = ftl.rmap[pgidx];
        if lpn != INVALID_LPN {
            let ppa = ftl.maptbl_ent(lpn);
            assert!(ppa.is_mapped() && sp.pg_idx(&ppa) == pgidx);
        } else {
            assert!(!mapped_pgidx.contains(&pgidx));
        }
    }

    // Per-line and per-block counts against a page-status recount.
    for id in 0..ftl.lm.tt_lines {
        let line = &ftl.lm.lines[id];
        let mut vpc = 0;
        let mut ipc = 0;
        for ch in 0..sp.nchs {
            for lun in 0..sp.luns_per_ch {
                let mut blk_vpc = 0;
                let mut blk_ipc = 0;
                for pg in 0..sp.pgs_per_blk {
                    let ppa = Ppa::new(ch, lun, 0, id, pg);
                    match ftl.ssd.page(&ppa) {
                        PageStatus::Valid => blk_vpc += 1,
                        PageStatus::Invalid => blk_ipc += 1,
                        PageStatus::Free => {}
                    }
                }
                let blk = ftl.ssd.blk(&Ppa::new(ch, lun, 0, id, 0));
                assert_eq!(blk.vpc, blk_vpc, "block vpc drift in line {}", id);
                assert_eq!(blk.ipc, blk_ipc, "block ipc drift in line {}", id);
                vpc += blk_vpc;
                ipc += blk_ipc;
            }
        }
        assert_eq!(line.vpc, vpc, "line {} vpc drift", id);
        assert_eq!(line.ipc, ipc, "line {} ipc drift", id);
        assert!(line.vpc + line.ipc <= sp.pgs_per_line);
    }

    // Each line sits in exactly one of: free list, full list, victim
    // queue, or under an open write pointer.
    let lm = &ftl.lm;
    let free: HashSet<_> = lm.free_line_list.iter().copied().collect();
    let full: HashSet<_> = lm.full_line_list.iter().copied().collect();
    let victims: HashSet<_> = lm.victim_line_pq.ids().iter().copied().collect();
    let open = [ftl.wp.curline, ftl.gc_wp.curline];

    assert_eq!(free.len(), lm.free_line_cnt);
    assert_eq!(full.len(), lm.full_line_cnt);
    assert_eq!(victims.len(), lm.victim_line_cnt);
    assert_eq!(
        lm.free_line_cnt + lm.full_line_cnt + lm.victim_line_cnt + open.len(),
        lm.tt_lines,
        "line count identity broken"
    );

    for id in 0..lm.tt_lines {
        let memberships = free.contains(&id) as usize
            + full.contains(&id) as usize
            + victims.contains(&id) as usize
            + open.contains(&id) as usize;
        assert_eq!(memberships, 1, "line {} in {} places", id, memberships);

        let line = &lm.lines[id];
        if free.contains(&id) {
            assert_eq!(line.vpc, 0);
            assert_eq!(line.ipc, 0);
        }
        if full.contains(&id) {
            assert_eq!(line.vpc, sp.pgs_per_line);
            assert_eq!(line.ipc, 0);
        }
        // pos is nonzero exactly for enqueued lines, and points at the
        // heap slot that actually stores the line.
        if victims.contains(&id) {
            assert!(line.pos > 0);
            assert_eq!(lm.victim_line_pq.ids()[line.pos - 1], id);
            assert!(line.ipc > 0);
        } else {
            assert_eq!(line.pos, 0, "stale pos on line {}", id);
        }
    }

    assert!(lm.victim_line_pq.is_valid(&lm.lines), "heap property broken");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConvParams, Geometry, SsdParams};
    use crate::nand::SharedCtx;
    use std::sync::Arc;

    fn make_ftl() -> ConvFtl {
        let sp = Arc::new(SsdParams::new(&Geometry {
            nchs: 1,
            luns_per_ch: 1,
            pls_per_lun: 1,
            blks_per_pl: 4,
            pgs_per_blk: 4,
            pgs_per_oneshotpg: 1,
            pgs_per_flashpg: 1,
        }));
        let shared = SharedCtx::new(&sp);
        ConvFtl::new(sp, ConvParams::default(), shared, 7)
    }

    #[test]
    fn test_fresh_ftl_is_consistent() {
        let ftl = make_ftl();
        check_ftl(&ftl);
    }

    #[test]
    #[should_panic(expected = "rmap disagrees")]
    fn test_detects_forward_reverse_drift() {
        let mut ftl = make_ftl();
        let ppa = ftl.get_new_page(crate::nand::IoKind::User);
        ftl.set_maptbl_ent(3, &ppa);
        ftl.set_rmap_ent(2, &ppa);
        ftl.lm.mark_page_valid(&mut ftl.ssd, &ppa);
        check_ftl(&ftl);
    }

    #[test]
    #[should_panic(expected = "vpc drift")]
    fn test_detects_count_drift() {
        let mut ftl = make_ftl();
        ftl.lm.lines[0].vpc = 1;
        check_ftl(&ftl);
    }
}
