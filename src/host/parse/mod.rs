//! Text parsers for host tool output
//!
//! Each parser owns one tool's output grammar and is tested against captured
//! output, so format drift in a tool breaks exactly one module.

pub mod lsblk;
pub mod lvm;
pub mod mdstat;
pub mod targetcli;

pub use lsblk::{parse_lsblk, BlockDeviceRow};
pub use lvm::{parse_lvs, parse_pvs, parse_vgs, LvRow, PvRow, VgRow};
pub use mdstat::{parse_mdstat, MdArray};
pub use targetcli::{parse_acl_listing, parse_lun_listing, target_exists, LunBinding};
