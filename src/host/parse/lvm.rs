//! Parsers for `vgs`, `lvs` and `pvs` report output
//!
//! All reports are requested with `--noheadings --nosuffix --units b
//! --separator |` so every row is one line of `|`-separated fields with
//! sizes in plain bytes.

use crate::error::{Error, Result};

/// Field separator requested from the LVM report commands
pub const SEPARATOR: &str = "|";

/// Arguments for a `vgs` report of name, size and free bytes
pub const VGS_ARGS: &[&str] = &[
    "--noheadings",
    "--nosuffix",
    "--units",
    "b",
    "--separator",
    SEPARATOR,
    "-o",
    "vg_name,vg_size,vg_free",
];

/// Arguments for an `lvs` report of volume group, name, path, size and data percent
pub const LVS_ARGS: &[&str] = &[
    "--noheadings",
    "--nosuffix",
    "--units",
    "b",
    "--separator",
    SEPARATOR,
    "-o",
    "vg_name,lv_name,lv_path,lv_size,data_percent",
];

/// Arguments for a `pvs` report of device and owning volume group
pub const PVS_ARGS: &[&str] = &[
    "--noheadings",
    "--separator",
    SEPARATOR,
    "-o",
    "pv_name,vg_name",
];

/// One `vgs` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VgRow {
    pub name: String,
    pub size: u64,
    pub free: u64,
}

/// One `lvs` row
#[derive(Debug, Clone, PartialEq)]
pub struct LvRow {
    pub vg: String,
    pub name: String,
    pub path: String,
    pub size: u64,
    pub data_percent: Option<f64>,
}

/// One `pvs` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PvRow {
    pub device: String,
    pub vg: Option<String>,
}

fn rows(text: &str) -> impl Iterator<Item = Vec<&str>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.split(SEPARATOR).map(str::trim).collect())
}

fn bytes(tool: &str, field: &str) -> Result<u64> {
    // Some lvm2 builds keep a trailing "B" even with --nosuffix
    let digits = field.trim_end_matches(['B', 'b']);
    digits
        .parse::<u64>()
        .or_else(|_| digits.parse::<f64>().map(|v| v as u64))
        .map_err(|_| Error::OutputParse {
            tool: tool.to_string(),
            reason: format!("invalid byte count '{}'", field),
        })
}

/// Parse a `vgs` report
pub fn parse_vgs(text: &str) -> Result<Vec<VgRow>> {
    rows(text)
        .map(|fields| match fields.as_slice() {
            [name, size, free, ..] => Ok(VgRow {
                name: name.to_string(),
                size: bytes("vgs", size)?,
                free: bytes("vgs", free)?,
            }),
            _ => Err(Error::OutputParse {
                tool: "vgs".into(),
                reason: format!("expected 3 fields, got {:?}", fields),
            }),
        })
        .collect()
}

/// Parse an `lvs` report
pub fn parse_lvs(text: &str) -> Result<Vec<LvRow>> {
    rows(text)
        .map(|fields| match fields.as_slice() {
            [vg, name, path, size, rest @ ..] => Ok(LvRow {
                vg: vg.to_string(),
                name: name.to_string(),
                path: path.to_string(),
                size: bytes("lvs", size)?,
                data_percent: rest.first().and_then(|p| p.parse::<f64>().ok()),
            }),
            _ => Err(Error::OutputParse {
                tool: "lvs".into(),
                reason: format!("expected 5 fields, got {:?}", fields),
            }),
        })
        .collect()
}

/// Parse a `pvs` report
pub fn parse_pvs(text: &str) -> Vec<PvRow> {
    rows(text)
        .filter_map(|fields| {
            let device = fields.first()?.to_string();
            let vg = fields
                .get(1)
                .filter(|vg| !vg.is_empty())
                .map(|vg| vg.to_string());
            Some(PvRow { device, vg })
        })
        .collect()
}
