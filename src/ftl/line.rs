use std::collections::VecDeque;

use crate::address::Ppa;
use crate::config::SsdParams;
use crate::nand::{PageStatus, Ssd};
use crate::pqueue::{IndexedPq, Pri, QueueItem};

pub type LineId = usize;

/// The reclamation unit: one same-indexed block across every
/// channel/LUN/plane. A line is in exactly one of four places: the free
/// list, the full list, the victim queue, or open under a write pointer.
#[derive(Clone, Debug)]
pub struct Line {
    pub id: LineId,
    /// Invalid page count across the whole line.
    pub ipc: usize,
    /// Valid page count across the whole line; doubles as the victim-queue
    /// priority.
    pub vpc: usize,
    /// Virtual-time stamp of the last overwrite that invalidated a page of
    /// this line; consumed by cost-benefit victim selection.
    pub age: u64,
    /// Heap index in the victim queue; 0 means "not enqueued".
    pub pos: usize,
}

impl QueueItem for Line {
    fn pri(&self) -> Pri {
        self.vpc as Pri
    }
    // The queue stores the priority back into the line, so a
    // change_priority(vpc - 1) call performs the VPC decrement itself.
    fn set_pri(&mut self, pri: Pri) {
        self.vpc = pri as usize;
    }
    fn pos(&self) -> usize {
        self.pos
    }
    fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }
}

pub struct LineMgmt {
    pub lines: Vec<Line>,
    pub free_line_list: VecDeque<LineId>,
    pub full_line_list: VecDeque<LineId>,
    /// Victims ordered by VPC; the root is the emptiest (greediest) line.
    pub victim_line_pq: IndexedPq,

    pub tt_lines: usize,
    pub free_line_cnt: usize,
    pub victim_line_cnt: usize,
    pub full_line_cnt: usize,
}

impl LineMgmt {
    pub fn new(sp: &SsdParams) -> Self {
        let tt_lines = sp.tt_lines;
        assert_eq!(tt_lines, sp.blks_per_pl);
        let lines = (0..tt_lines)
            .map(|id| Line {
                id,
                ipc: 0,
                vpc: 0,
                age: 0,
                pos: 0,
            })
            .collect();
        // All lines start free.
        let free_line_list: VecDeque<LineId> = (0..tt_lines).collect();
        LineMgmt {
            lines,
            free_line_list,
            full_line_list: VecDeque::new(),
            victim_line_pq: IndexedPq::new(tt_lines, |next, curr| next > curr),
            tt_lines,
            free_line_cnt: tt_lines,
            victim_line_cnt: 0,
            full_line_cnt: 0,
        }
    }

    pub fn line_of(&self, ppa: &Ppa) -> &Line {
        &self.lines[ppa.blk() as usize]
    }

    pub fn line_of_mut(&mut self, ppa: &Ppa) -> &mut Line {
        &mut self.lines[ppa.blk() as usize]
    }

    /// Detaches the head of the free list; the caller owns the line until
    /// it is classified full/victim or freed again.
    pub fn get_next_free_line(&mut self) -> Option<LineId> {
        let Some(id) = self.free_line_list.pop_front() else {
            error!("no free line left");
            return None;
        };
        self.free_line_cnt -= 1;
        debug!("get_next_free_line: free_line_cnt {}", self.free_line_cnt);
        Some(id)
    }

    pub fn mark_page_valid(&mut self, ssd: &mut Ssd, ppa: &Ppa) {
        let sp = ssd.sp.clone();

        // Page: must be a fresh page of an open line.
        assert_eq!(ssd.page(ppa), PageStatus::Free);
        ssd.set_page(ppa, PageStatus::Valid);

        let blk = ssd.blk_mut(ppa);
        assert!(blk.vpc < sp.pgs_per_blk);
        blk.vpc += 1;

        let line = self.line_of_mut(ppa);
        assert!(line.vpc < sp.pgs_per_line);
        line.vpc += 1;
    }

    /// Flips a VALID page to INVALID and propagates the count changes to
    /// its block and line, moving the line full → victim on the first
    /// invalidation after closure.
    pub fn mark_page_invalid(&mut self, ssd: &mut Ssd, ppa: &Ppa) {
        let sp = ssd.sp.clone();

        assert_eq!(ssd.page(ppa), PageStatus::Valid);
        ssd.set_page(ppa, PageStatus::Invalid);

        let blk = ssd.blk_mut(ppa);
        assert!(blk.ipc < sp.pgs_per_blk);
        blk.ipc += 1;
        assert!(blk.vpc > 0 && blk.vpc <= sp.pgs_per_blk);
        blk.vpc -= 1;

        let id = ppa.blk() as usize;
        let line = &mut self.lines[id];
        assert!(line.ipc < sp.pgs_per_line);
        let was_full_line = line.vpc == sp.pgs_per_line;
        if was_full_line {
            assert_eq!(line.ipc, 0);
        }
        line.ipc += 1;
        assert!(line.vpc > 0 && line.vpc <= sp.pgs_per_line);

        // Exactly one VPC decrement, whether the line is queued or not:
        // the queue's priority update stores vpc - 1 into the line while
        // re-sifting it in place.
        if self.lines[id].pos != 0 {
            let new_pri = (self.lines[id].vpc - 1) as Pri;
            self.victim_line_pq
                .change_priority(&mut self.lines, new_pri, id);
        } else {
            self.lines[id].vpc -= 1;
        }

        if was_full_line {
            self.full_line_list.retain(|&l| l != id);
            self.full_line_cnt -= 1;
            self.victim_line_pq.insert(&mut self.lines, id);
            self.victim_line_cnt += 1;
        }
    }

    /// Models a block erase: every page back to FREE, counts zeroed, erase
    /// counter bumped.
    pub fn mark_block_free(&mut self, ssd: &mut Ssd, ppa: &Ppa) {
        let pgs_per_blk = ssd.sp.pgs_per_blk;
        let mut p = *ppa;
        for pg in 0..pgs_per_blk {
            p.set_pg(pg as u32);
            ssd.set_page(&p, PageStatus::Free);
        }
        let blk = ssd.blk_mut(ppa);
        blk.ipc = 0;
        blk.vpc = 0;
        blk.erase_cnt += 1;
    }

    /// Returns a reclaimed line to the free pool.
    pub fn mark_line_free(&mut self, id: LineId) {
        let line = &mut self.lines[id];
        line.ipc = 0;
        line.vpc = 0;
        self.free_line_list.push_back(id);
        self.free_line_cnt += 1;
    }
}
