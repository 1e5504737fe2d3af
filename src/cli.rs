use clap::{Parser, Subcommand};

use crate::config::Geometry;
use crate::ftl::gc::GcPolicyChoice;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, default_value_t = 4)]
    pub channels: usize,

    #[arg(long, default_value_t = 4)]
    pub luns_per_channel: usize,

    #[arg(long, default_value_t = 128)]
    pub blocks_per_plane: usize,

    #[arg(long, default_value_t = 384)]
    pub pages_per_block: usize,

    /// 4 KiB pages programmed per one-shot (wordline) pulse.
    #[arg(long, default_value_t = 12)]
    pub oneshot_pages: usize,

    /// 4 KiB pages per flash page (the NAND read unit).
    #[arg(long, default_value_t = 4)]
    pub flashpg_pages: usize,

    /// Independent FTL partitions; logical page n belongs to partition
    /// n mod partitions.
    #[arg(short, long, default_value_t = 4)]
    pub partitions: usize,

    #[arg(short, long, value_enum, default_value_t = GcPolicyChoice::Greedy)]
    pub gc_policy: GcPolicyChoice,

    #[command(subcommand)]
    pub command: Commands,
}

impl Args {
    pub fn geometry(&self) -> Geometry {
        Geometry {
            nchs: self.channels,
            luns_per_ch: self.luns_per_channel,
            pls_per_lun: 1,
            blks_per_pl: self.blocks_per_plane,
            pgs_per_blk: self.pages_per_block,
            pgs_per_oneshotpg: self.oneshot_pages,
            pgs_per_flashpg: self.flashpg_pages,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sequentially fill the logical space once.
    Fill(FillArgs),
    /// Fill, then churn with random overwrites to exercise GC.
    Churn(ChurnArgs),
}

#[derive(Parser, Debug, Clone, Copy)]
pub struct FillArgs {
    /// Pages per write command.
    #[arg(long, default_value_t = 8)]
    pub io_pages: usize,
}

#[derive(Parser, Debug, Clone, Copy)]
pub struct ChurnArgs {
    #[arg(long, default_value_t = 8)]
    pub io_pages: usize,

    /// Overwrite volume after the fill, as a multiple of the logical
    /// space.
    #[arg(long, default_value_t = 2.0)]
    pub overwrite_ratio: f64,

    #[arg(short, long, default_value_t = 42)]
    pub seed: u64,

    /// Read a sample back afterwards and check the mappings.
    #[arg(long, default_value_t = false)]
    pub read_check: bool,
}
