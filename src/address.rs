use bitfield::bitfield;

use crate::config::SsdParams;

/// Reserved sentinel: an all-ones PPA denotes "never written".
pub const UNMAPPED_PPA: u64 = u64::MAX;
/// Reserved sentinel for reverse-map entries whose page holds no live data.
pub const INVALID_LPN: u64 = u64::MAX;

// pg sits in the low bits so that a sequentially advancing write pointer
// produces monotonically increasing raw values within a wordline.
// ch      lun     pl      blk      pg
// [51:44] [43:36] [35:32] [31:16]  [15:0]
bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Ppa(u64);
    impl Debug;
    pub u32, pg, set_pg: 15, 0;
    pub u32, blk, set_blk: 31, 16;
    pub u32, pl, set_pl: 35, 32;
    pub u32, lun, set_lun: 43, 36;
    pub u32, ch, set_ch: 51, 44;
    pub u32, rsv, set_rsv: 63, 52;
}

impl Ppa {
    pub const UNMAPPED: Ppa = Ppa(UNMAPPED_PPA);

    pub fn new(ch: usize, lun: usize, pl: usize, blk: usize, pg: usize) -> Self {
        let mut ppa = Ppa(0);
        ppa.set_ch(ch as u32);
        ppa.set_lun(lun as u32);
        ppa.set_pl(pl as u32);
        ppa.set_blk(blk as u32);
        ppa.set_pg(pg as u32);
        ppa
    }

    pub fn is_mapped(&self) -> bool {
        self.0 != UNMAPPED_PPA
    }
}

impl SsdParams {
    /// Mixed-radix flat page index of a PPA.
    pub fn pg_idx(&self, ppa: &Ppa) -> usize {
        let pgidx = ppa.ch() as usize * self.pgs_per_ch
            + ppa.lun() as usize * self.pgs_per_lun
            + ppa.pl() as usize * self.pgs_per_pl
            + ppa.blk() as usize * self.pgs_per_blk
            + ppa.pg() as usize;
        assert!(pgidx < self.tt_pgs);
        pgidx
    }

    /// Flat block index of a PPA, for the per-block state arena.
    pub fn blk_idx(&self, ppa: &Ppa) -> usize {
        ppa.ch() as usize * self.blks_per_ch
            + ppa.lun() as usize * self.blks_per_lun
            + ppa.pl() as usize * self.blks_per_pl
            + ppa.blk() as usize
    }

    /// Flat LUN index of a PPA, for the per-LUN availability clocks.
    pub fn lun_idx(&self, ppa: &Ppa) -> usize {
        ppa.ch() as usize * self.luns_per_ch + ppa.lun() as usize
    }

    pub fn valid_ppa(&self, ppa: &Ppa) -> bool {
        (ppa.ch() as usize) < self.nchs
            && (ppa.lun() as usize) < self.luns_per_ch
            && (ppa.pl() as usize) < self.pls_per_lun
            && (ppa.blk() as usize) < self.blks_per_pl
            && (ppa.pg() as usize) < self.pgs_per_blk
    }

    pub fn valid_lpn(&self, lpn: u64) -> bool {
        lpn < self.tt_pgs as u64
    }

    /// True when `ppa` is the final 4 KiB page of its one-shot (wordline)
    /// program group; the NAND program fires only at this page.
    pub fn last_pg_in_wordline(&self, ppa: &Ppa) -> bool {
        ppa.pg() as usize % self.pgs_per_oneshotpg == self.pgs_per_oneshotpg - 1
    }

    /// Whether two PPAs land in the same flash page (the NAND read unit),
    /// in which case one NAND read covers both.
    pub fn same_flash_page(&self, a: &Ppa, b: &Ppa) -> bool {
        let same_blk = a.ch() == b.ch() && a.lun() == b.lun() && a.pl() == b.pl()
            && a.blk() == b.blk();
        same_blk
            && a.pg() as usize / self.pgs_per_flashpg == b.pg() as usize / self.pgs_per_flashpg
    }
}
