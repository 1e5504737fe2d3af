#[macro_use]
extern crate log;

pub mod address;
pub mod buffer;
pub mod cli;
pub mod config;
pub mod ftl;
pub mod nand;
pub mod pqueue;
pub mod sanity;
pub mod worker;

pub use crate::address::{Ppa, INVALID_LPN, UNMAPPED_PPA};
pub use crate::cli::*;
pub use crate::config::{ConvParams, Geometry, SsdParams};
pub use crate::ftl::gc::GcPolicyChoice;
pub use crate::ftl::{
    ConvFtl, IoRequest, IoResult, IoStatus, Namespace, NVME_CMD_FLUSH, NVME_CMD_READ,
    NVME_CMD_WRITE,
};
pub use crate::sanity::check_ftl;
