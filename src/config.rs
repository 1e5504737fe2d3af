use crate::ftl::gc::GcPolicyChoice;

pub const KB: usize = 1 << 10;
pub const MB: usize = 1 << 20;

/// Host-visible sector size (LBA granularity).
pub const LBA_BITS: u32 = 9;
pub const LBA_SIZE: usize = 1 << LBA_BITS;

pub fn lba_to_byte(nr_lba: u64) -> u64 {
    nr_lba << LBA_BITS
}

// ---------------------------------------------------------------------------
// NAND geometry
// ---------------------------------------------------------------------------

/// Raw geometry of one SSD partition, before derived counts.
///
/// The defaults follow a Samsung 970 PRO-like layout (TLC, 16 KiB flash
/// pages, three flash pages programmed per one-shot pulse), scaled down in
/// block count so that the default binary workload stays memory-friendly.
#[derive(Clone, Copy, Debug)]
pub struct Geometry {
    pub nchs: usize,
    pub luns_per_ch: usize,
    pub pls_per_lun: usize,
    pub blks_per_pl: usize,
    pub pgs_per_blk: usize,
    /// 4 KiB pages per one-shot (wordline) program pulse.
    pub pgs_per_oneshotpg: usize,
    /// 4 KiB pages per flash page (the NAND read unit).
    pub pgs_per_flashpg: usize,
}

impl Default for Geometry {
    fn default() -> Self {
        Geometry {
            nchs: 4,
            luns_per_ch: 4,
            pls_per_lun: 1,
            blks_per_pl: 128,
            pgs_per_blk: 384,
            pgs_per_oneshotpg: 12,
            pgs_per_flashpg: 4,
        }
    }
}

// ---------------------------------------------------------------------------
// SSD parameters
// (latency numbers from a Samsung 970 PRO profile)
// ---------------------------------------------------------------------------

/// Fully derived SSD parameters. Everything the FTL and the timing model
/// need is precomputed here once, at namespace bring-up.
#[derive(Clone, Debug)]
pub struct SsdParams {
    pub secsz: usize,
    pub secs_per_pg: usize,
    pub pgsz: usize,

    pub nchs: usize,
    pub luns_per_ch: usize,
    pub pls_per_lun: usize,
    pub blks_per_pl: usize,
    pub pgs_per_blk: usize,
    pub pgs_per_oneshotpg: usize,
    pub pgs_per_flashpg: usize,

    pub flashpgs_per_blk: usize,
    pub oneshotpgs_per_blk: usize,

    pub pgs_per_pl: usize,
    pub pgs_per_lun: usize,
    pub pgs_per_ch: usize,
    pub tt_pgs: usize,

    pub blks_per_lun: usize,
    pub blks_per_ch: usize,
    pub tt_blks: usize,

    pub luns_per_ssd: usize,

    /// A line groups the same-indexed block across every channel/LUN/plane.
    pub blks_per_line: usize,
    pub pgs_per_line: usize,
    pub tt_lines: usize,

    // NAND latencies, in nanoseconds.
    pub pg_4kb_rd_lat: u64,
    pub pg_rd_lat: u64,
    pub pg_wr_lat: u64,
    pub blk_er_lat: u64,

    pub max_ch_xfer_size: usize,
    pub ch_bandwidth_mbps: u64,
    pub pcie_bandwidth_mbps: u64,

    // Firmware overheads, in nanoseconds.
    pub fw_4kb_rd_lat: u64,
    pub fw_rd_lat: u64,
    pub fw_wbuf_lat0: u64,
    pub fw_wbuf_lat1: u64,
    pub fw_ch_xfer_lat: u64,

    pub write_buffer_size: usize,
    pub write_early_completion: bool,
}

impl SsdParams {
    pub fn new(geo: &Geometry) -> Self {
        assert!(geo.pgs_per_oneshotpg % geo.pgs_per_flashpg == 0);
        assert!(geo.pgs_per_blk % geo.pgs_per_oneshotpg == 0);
        assert_eq!(geo.pls_per_lun, 1, "multi-plane LUNs are not modelled");

        let secsz = 512;
        let secs_per_pg = 8;
        let pgsz = secsz * secs_per_pg;

        let pgs_per_pl = geo.pgs_per_blk * geo.blks_per_pl;
        let pgs_per_lun = pgs_per_pl * geo.pls_per_lun;
        let pgs_per_ch = pgs_per_lun * geo.luns_per_ch;
        let tt_pgs = pgs_per_ch * geo.nchs;

        let blks_per_lun = geo.blks_per_pl * geo.pls_per_lun;
        let blks_per_ch = blks_per_lun * geo.luns_per_ch;
        let tt_blks = blks_per_ch * geo.nchs;

        let blks_per_line = geo.nchs * geo.luns_per_ch * geo.pls_per_lun;
        let pgs_per_line = blks_per_line * geo.pgs_per_blk;

        SsdParams {
            secsz,
            secs_per_pg,
            pgsz,
            nchs: geo.nchs,
            luns_per_ch: geo.luns_per_ch,
            pls_per_lun: geo.pls_per_lun,
            blks_per_pl: geo.blks_per_pl,
            pgs_per_blk: geo.pgs_per_blk,
            pgs_per_oneshotpg: geo.pgs_per_oneshotpg,
            pgs_per_flashpg: geo.pgs_per_flashpg,
            flashpgs_per_blk: geo.pgs_per_blk / geo.pgs_per_flashpg,
            oneshotpgs_per_blk: geo.pgs_per_blk / geo.pgs_per_oneshotpg,
            pgs_per_pl,
            pgs_per_lun,
            pgs_per_ch,
            tt_pgs,
            blks_per_lun,
            blks_per_ch,
            tt_blks,
            luns_per_ssd: geo.nchs * geo.luns_per_ch,
            blks_per_line,
            pgs_per_line,
            // one line per block index in a plane
            tt_lines: geo.blks_per_pl,
            pg_4kb_rd_lat: 35760,
            pg_rd_lat: 36013,
            pg_wr_lat: 185000,
            blk_er_lat: 0,
            max_ch_xfer_size: 16 * KB,
            ch_bandwidth_mbps: 800,
            pcie_bandwidth_mbps: 3360,
            fw_4kb_rd_lat: 21500,
            fw_rd_lat: 30490,
            fw_wbuf_lat0: 4000,
            fw_wbuf_lat1: 460,
            fw_ch_xfer_lat: 0,
            write_buffer_size: geo.nchs
                * geo.luns_per_ch
                * geo.pgs_per_oneshotpg
                * pgsz
                * 2,
            write_early_completion: true,
        }
    }

    /// Transfer time of `bytes` over a link of `mbps` MB/s, in nanoseconds.
    /// 1 MB/s is one byte per microsecond.
    pub fn xfer_ns(bytes: usize, mbps: u64) -> u64 {
        (bytes as u64 * 1000).div_ceil(mbps)
    }
}

// ---------------------------------------------------------------------------
// FTL parameters
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct ConvParams {
    /// Free-line watermark for background reclamation.
    pub gc_thres_lines: usize,
    /// Free-line watermark for foreground (forced) reclamation.
    pub gc_thres_lines_high: usize,
    /// Charge NAND latency for GC traffic.
    pub enable_gc_delay: bool,

    pub op_area_pcent: f64,
    /// (physical space / logical space) * 100.
    pub pba_pcent: u32,

    pub gc_policy: GcPolicyChoice,
}

impl Default for ConvParams {
    fn default() -> Self {
        let op_area_pcent = 0.07;
        ConvParams {
            // Need only two lines (host write, gc).
            gc_thres_lines: 2,
            gc_thres_lines_high: 2,
            enable_gc_delay: true,
            op_area_pcent,
            pba_pcent: ((1.0 + op_area_pcent) * 100.0) as u32,
            gc_policy: GcPolicyChoice::Greedy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_geometry() {
        let spp = SsdParams::new(&Geometry::default());
        assert_eq!(spp.pgsz, 4096);
        assert_eq!(spp.tt_pgs, 4 * 4 * 1 * 128 * 384);
        assert_eq!(spp.tt_lines, 128);
        assert_eq!(spp.blks_per_line, 16);
        assert_eq!(spp.pgs_per_line, 16 * 384);
        assert_eq!(spp.flashpgs_per_blk, 96);
        assert_eq!(spp.oneshotpgs_per_blk, 32);
    }

    #[test]
    fn test_xfer_ns() {
        // 4 KiB over an 800 MB/s channel: 4096 bytes at 0.8 bytes/ns.
        assert_eq!(SsdParams::xfer_ns(4096, 800), 5120);
        // Rounds up.
        assert_eq!(SsdParams::xfer_ns(1, 800), 1);
    }

    #[test]
    fn test_conv_params_defaults() {
        let cp = ConvParams::default();
        assert_eq!(cp.pba_pcent, 107);
        assert_eq!(cp.gc_thres_lines_high, 2);
    }
}
