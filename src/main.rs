#[macro_use]
extern crate log;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::Parser;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use ssd_soft::*;

fn write_cmd(lpn: u64, pages: u64, secs_per_pg: u64) -> IoRequest {
    IoRequest {
        opcode: NVME_CMD_WRITE,
        sqid: 1,
        slba: lpn * secs_per_pg,
        nlb: pages * secs_per_pg - 1,
        fua: false,
        nsecs_start: 0,
    }
}

fn read_cmd(lpn: u64, pages: u64, secs_per_pg: u64) -> IoRequest {
    IoRequest {
        opcode: NVME_CMD_READ,
        sqid: 1,
        slba: lpn * secs_per_pg,
        nlb: pages * secs_per_pg - 1,
        fua: false,
        nsecs_start: 0,
    }
}

/// Queue-depth-1 submission against the virtual clock. A rejection means
/// write-buffer backpressure: wait until the next scheduled buffer
/// release and try again.
fn submit(ns: &mut Namespace, mut req: IoRequest, clock: &mut u64) -> Result<IoResult> {
    loop {
        req.nsecs_start = *clock;
        ns.drain_internal(*clock);
        let mut ret = IoResult::default();
        if ns.proc_io_cmd(&req, &mut ret) {
            *clock = (*clock).max(ret.nsecs_target);
            return Ok(ret);
        }
        match ns.worker.next_target() {
            Some(t) => *clock = (*clock).max(t),
            None => bail!(
                "request rejected with nothing in flight (slba={}, len={})",
                req.slba,
                req.nlb + 1
            ),
        }
    }
}

fn fill(ns: &mut Namespace, io_pages: u64, clock: &mut u64) -> Result<u64> {
    let secs_per_pg = ns.sp.secs_per_pg as u64;
    let total = ns.logical_pgs();
    let mut reqs = 0;
    let mut lpn = 0;
    while lpn < total {
        let pages = io_pages.min(total - lpn);
        submit(ns, write_cmd(lpn, pages, secs_per_pg), clock)?;
        lpn += pages;
        reqs += 1;
    }
    info!("filled {} logical pages in {} commands", total, reqs);
    Ok(reqs)
}

fn churn(ns: &mut Namespace, args: &ChurnArgs, clock: &mut u64) -> Result<u64> {
    let secs_per_pg = ns.sp.secs_per_pg as u64;
    let total = ns.logical_pgs();
    let io_pages = args.io_pages as u64;
    let overwrites = (total as f64 * args.overwrite_ratio) as u64 / io_pages;
    let mut rng = SmallRng::seed_from_u64(args.seed);
    for _ in 0..overwrites {
        let lpn = rng.gen_range(0..total.saturating_sub(io_pages) + 1);
        submit(ns, write_cmd(lpn, io_pages, secs_per_pg), clock)?;
        // The dispatcher is idle between commands; give background
        // reclamation a chance.
        ns.background_gc(*clock);
    }
    info!("churned {} overwrite commands", overwrites);
    Ok(overwrites)
}

fn read_check(ns: &mut Namespace, args: &ChurnArgs, clock: &mut u64) -> Result<()> {
    let secs_per_pg = ns.sp.secs_per_pg as u64;
    let total = ns.logical_pgs();
    let nr_parts = ns.nr_parts as u64;
    let mut rng = SmallRng::seed_from_u64(args.seed ^ 0xdead);
    for _ in 0..100 {
        let lpn = rng.gen_range(0..total);
        let ret = submit(ns, read_cmd(lpn, 1, secs_per_pg), clock)?;
        if ret.status != IoStatus::Success {
            bail!("read of lpn {} did not complete", lpn);
        }
        let ftl = &ns.ftls[(lpn % nr_parts) as usize];
        let ppa = ftl.maptbl_ent(lpn / nr_parts);
        if ppa.is_mapped() && ftl.rmap_ent(&ppa) != lpn / nr_parts {
            bail!("mapping mismatch at lpn {}", lpn);
        }
    }
    info!("read check passed");
    Ok(())
}

fn tabulate(ns: &Namespace, reqs: u64, clock: u64, wall_ms: f64) {
    let gc_cnt: u64 = ns.ftls.iter().map(|f| f.gc_cnt).sum();
    let pg_cnt: u64 = ns.ftls.iter().map(|f| f.pg_cnt).sum();
    let mut user_reads = 0;
    let mut gc_reads = 0;
    let mut user_programs = 0;
    let mut gc_programs = 0;
    let mut erases = 0;
    for ftl in &ns.ftls {
        user_reads += ftl.ssd.stats.user_reads;
        gc_reads += ftl.ssd.stats.gc_reads;
        user_programs += ftl.ssd.stats.user_programs;
        gc_programs += ftl.ssd.stats.gc_programs;
        erases += ftl.ssd.stats.erases;
    }
    println!("============================ Tabulate Statistics ============================");
    println!("reqs\tvtime_ms\tgc\tcopied\trd\tgc_rd\tprog\tgc_prog\terase\twall_ms");
    println!(
        "{}\t{:.3}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.1}",
        reqs,
        clock as f64 / 1e6,
        gc_cnt,
        pg_cnt,
        user_reads,
        gc_reads,
        user_programs,
        gc_programs,
        erases,
        wall_ms
    );
    println!("-------------------------- End Tabulate Statistics --------------------------");
}

pub fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let sp = Arc::new(SsdParams::new(&args.geometry()));
    let cp = ConvParams {
        gc_policy: args.gc_policy,
        ..ConvParams::default()
    };
    let mut ns = Namespace::new(1, sp, cp, args.partitions);
    info!(
        "namespace: {} partitions, {} logical pages, policy {:?}",
        ns.nr_parts,
        ns.logical_pgs(),
        args.gc_policy
    );

    let start = Instant::now();
    let mut clock = 0u64;
    let reqs = match &args.command {
        Commands::Fill(f) => fill(&mut ns, f.io_pages as u64, &mut clock)?,
        Commands::Churn(c) => {
            let mut reqs = fill(&mut ns, c.io_pages as u64, &mut clock)?;
            reqs += churn(&mut ns, c, &mut clock)?;
            if c.read_check {
                read_check(&mut ns, c, &mut clock)?;
            }
            reqs
        }
    };

    // Let every in-flight program settle, then report device idle time.
    ns.drain_internal(u64::MAX);
    let mut ret = IoResult::default();
    let flush = IoRequest {
        opcode: NVME_CMD_FLUSH,
        sqid: 1,
        slba: 0,
        nlb: 0,
        fua: false,
        nsecs_start: clock,
    };
    ns.proc_io_cmd(&flush, &mut ret);
    clock = clock.max(ret.nsecs_target);

    if cfg!(debug_assertions) {
        for ftl in &ns.ftls {
            check_ftl(ftl);
        }
        info!("sanity check passed on {} partitions", ns.nr_parts);
    }

    let wall_ms = start.elapsed().as_micros() as f64 / 1000f64;
    tabulate(&ns, reqs, clock, wall_ms);
    Ok(())
}
