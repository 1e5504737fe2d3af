use crate::address::Ppa;
use crate::config::SsdParams;

use super::line::{LineId, LineMgmt};

fn check_addr(a: usize, max: usize) {
    assert!(a < max);
}

/// A per-purpose allocation cursor (one for user writes, one for GC
/// copies). Holds the open line plus the position of the next free page
/// within it.
#[derive(Clone, Debug)]
pub struct WritePointer {
    /// The open line; always the next-to-write super-block.
    pub curline: LineId,
    pub ch: usize,
    pub lun: usize,
    pub pg: usize,
    pub blk: usize,
    pub pl: usize,
}

impl WritePointer {
    /// Draws a free line and parks the cursor at its first page.
    pub fn prepare(lm: &mut LineMgmt) -> Self {
        let curline = lm
            .get_next_free_line()
            .expect("no free line to open a write pointer");
        WritePointer {
            curline,
            ch: 0,
            lun: 0,
            pg: 0,
            blk: curline,
            pl: 0,
        }
    }

    /// The PPA under the cursor; does not advance.
    pub fn cur_page(&self) -> Ppa {
        assert_eq!(self.pl, 0);
        Ppa::new(self.ch, self.lun, self.pl, self.blk, self.pg)
    }

    /// Steps the cursor in striping order: fill one wordline, then walk
    /// channels, then LUNs, then descend to the next wordline of the
    /// block. When the line is used up it is classified full/victim and a
    /// fresh free line is opened; running out of free lines here is an
    /// internal bug.
    pub fn advance(&mut self, sp: &SsdParams, lm: &mut LineMgmt) {
        check_addr(self.pg, sp.pgs_per_blk);
        self.pg += 1;
        if self.pg % sp.pgs_per_oneshotpg != 0 {
            return;
        }

        // Wordline filled: rewind and stripe across channels.
        self.pg -= sp.pgs_per_oneshotpg;
        check_addr(self.ch, sp.nchs);
        self.ch += 1;
        if self.ch != sp.nchs {
            return;
        }

        self.ch = 0;
        check_addr(self.lun, sp.luns_per_ch);
        self.lun += 1;
        if self.lun != sp.luns_per_ch {
            return;
        }

        // All LUNs visited: go to the next wordline in the block.
        self.lun = 0;
        self.pg += sp.pgs_per_oneshotpg;
        if self.pg != sp.pgs_per_blk {
            return;
        }

        self.pg = 0;
        // Current line is used up; classify it.
        let vpc = lm.lines[self.curline].vpc;
        let ipc = lm.lines[self.curline].ipc;
        if vpc == sp.pgs_per_line {
            assert_eq!(ipc, 0);
            lm.full_line_list.push_back(self.curline);
            lm.full_line_cnt += 1;
            debug!("wpp: line {} moved to full_line_list", self.curline);
        } else {
            // There must be some invalid pages in this line.
            assert!(vpc < sp.pgs_per_line);
            assert!(ipc > 0);
            lm.victim_line_pq.insert(&mut lm.lines, self.curline);
            lm.victim_line_cnt += 1;
            debug!("wpp: line {} moved to victim queue", self.curline);
        }

        check_addr(self.blk, sp.blks_per_pl);
        self.curline = lm
            .get_next_free_line()
            .expect("write pointer ran out of free lines");
        debug!("wpp: got new clean line {}", self.curline);
        self.blk = self.curline;
        check_addr(self.blk, sp.blks_per_pl);

        assert_eq!(self.pg, 0);
        assert_eq!(self.lun, 0);
        assert_eq!(self.ch, 0);
        assert_eq!(self.pl, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Geometry;
    use crate::nand::{SharedCtx, Ssd};
    use std::sync::Arc;

    fn setup() -> (Ssd, LineMgmt, Arc<SsdParams>) {
        let sp = Arc::new(SsdParams::new(&Geometry {
            nchs: 2,
            luns_per_ch: 2,
            pls_per_lun: 1,
            blks_per_pl: 2,
            pgs_per_blk: 4,
            pgs_per_oneshotpg: 2,
            pgs_per_flashpg: 2,
        }));
        let shared = SharedCtx::new(&sp);
        let ssd = Ssd::new(sp.clone(), shared);
        let lm = LineMgmt::new(&sp);
        (ssd, lm, sp)
    }

    #[test]
    fn test_prepare_parks_at_line_start() {
        let (_, mut lm, _) = setup();
        let wp = WritePointer::prepare(&mut lm);
        assert_eq!(wp.curline, 0);
        assert_eq!(wp.blk, 0);
        assert_eq!((wp.ch, wp.lun, wp.pg), (0, 0, 0));
        assert_eq!(lm.free_line_cnt, 1);
    }

    #[test]
    fn test_striping_order() {
        let (mut ssd, mut lm, sp) = setup();
        let mut wp = WritePointer::prepare(&mut lm);
        let mut seq = vec![];
        for _ in 0..sp.pgs_per_line {
            let ppa = wp.cur_page();
            seq.push((ppa.ch(), ppa.lun(), ppa.pg()));
            lm.mark_page_valid(&mut ssd, &ppa);
            wp.advance(&sp, &mut lm);
        }
        // Wordline first, then channels, then LUNs, then the next wordline.
        assert_eq!(
            seq,
            vec![
                (0, 0, 0),
                (0, 0, 1),
                (1, 0, 0),
                (1, 0, 1),
                (0, 1, 0),
                (0, 1, 1),
                (1, 1, 0),
                (1, 1, 1),
                (0, 0, 2),
                (0, 0, 3),
                (1, 0, 2),
                (1, 0, 3),
                (0, 1, 2),
                (0, 1, 3),
                (1, 1, 2),
                (1, 1, 3),
            ]
        );
        // The fully-valid line went to the full list and a fresh line
        // opened at page 0.
        assert_eq!(lm.full_line_cnt, 1);
        assert_eq!(wp.curline, 1);
        assert_eq!((wp.ch, wp.lun, wp.pg), (0, 0, 0));
        assert_eq!(wp.blk, 1);
    }

    #[test]
    fn test_line_with_invalidations_goes_to_victim_queue() {
        let (mut ssd, mut lm, sp) = setup();
        let mut wp = WritePointer::prepare(&mut lm);
        let first = wp.cur_page();
        for _ in 0..sp.pgs_per_line {
            let ppa = wp.cur_page();
            lm.mark_page_valid(&mut ssd, &ppa);
            if ppa != first {
                wp.advance(&sp, &mut lm);
            } else {
                // Invalidate the first page before the line closes.
                lm.mark_page_invalid(&mut ssd, &ppa);
                wp.advance(&sp, &mut lm);
            }
        }
        assert_eq!(lm.full_line_cnt, 0);
        assert_eq!(lm.victim_line_cnt, 1);
        assert_ne!(lm.lines[0].pos, 0);
    }

    #[test]
    #[should_panic]
    fn test_exhausting_free_lines_is_fatal() {
        let (mut ssd, mut lm, sp) = setup();
        let mut wp = WritePointer::prepare(&mut lm);
        // Second line goes to the other pointer's pool; writing through
        // both lines leaves nothing to open next.
        let _gc_wp = WritePointer::prepare(&mut lm);
        for _ in 0..sp.pgs_per_line {
            let ppa = wp.cur_page();
            lm.mark_page_valid(&mut ssd, &ppa);
            wp.advance(&sp, &mut lm);
        }
    }
}
