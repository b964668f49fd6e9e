//! Parsers for `targetcli ls` tree output
//!
//! targetcli renders its object tree as lines of the form
//!
//! ```text
//! o- luns ........................................................ [LUNs: 2]
//!   o- lun0 .......... [block/bs_lun0 (/dev/R0/client1) (default_tg_pt_gp)]
//!   o- lun1 ...... [fileio/bs_lun1 (/var/lib/x/lun_a_1.img) (default_tg_pt_gp)]
//! ```
//!
//! Only the node name after `o- ` and the bracketed summary are used.

use crate::domain::ports::{AclEntry, AclMapping};

/// A LUN binding reported under a portal group's `luns` node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LunBinding {
    pub number: u32,
    /// `block` or `fileio`
    pub backstore_type: String,
    /// e.g. `bs_lun0`
    pub backstore_name: String,
    /// Device or file the backstore points at
    pub device: Option<String>,
}

impl LunBinding {
    /// Backstore object path, e.g. `/backstores/block/bs_lun0`
    pub fn backstore_path(&self) -> String {
        format!("/backstores/{}/{}", self.backstore_type, self.backstore_name)
    }
}

/// Split a tree line into its node name and bracketed summary
fn node(line: &str) -> Option<(&str, Option<&str>)> {
    let rest = line
        .trim_start_matches(|c: char| c.is_whitespace() || c == '|')
        .strip_prefix("o- ")?;
    let name = rest.split_whitespace().next()?;
    let summary = match (rest.find('['), rest.rfind(']')) {
        (Some(start), Some(end)) if end > start => Some(&rest[start + 1..end]),
        _ => None,
    };
    Some((name, summary))
}

/// Parse the numeric suffix of a `<prefix><N>` node name
fn numbered(name: &str, prefix: &str) -> Option<u32> {
    let digits = name.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Whether a target with this IQN appears in `/iscsi ls` output
pub fn target_exists(text: &str, iqn: &str) -> bool {
    text.lines()
        .filter_map(node)
        .any(|(name, _)| name == iqn)
}

/// Parse `<tpg>/luns ls` output into bindings
pub fn parse_lun_listing(text: &str) -> Vec<LunBinding> {
    text.lines()
        .filter_map(node)
        .filter_map(|(name, summary)| {
            let number = numbered(name, "lun")?;
            let mut parts = summary.unwrap_or("").split_whitespace();
            let (backstore_type, backstore_name) = parts
                .next()
                .and_then(|object| object.split_once('/'))
                .map(|(t, n)| (t.to_string(), n.to_string()))
                .unwrap_or_default();
            let device = parts
                .next()
                .map(|p| p.trim_matches(|c| c == '(' || c == ')'))
                .filter(|p| p.starts_with('/'))
                .map(str::to_string);
            Some(LunBinding {
                number,
                backstore_type,
                backstore_name,
                device,
            })
        })
        .collect()
}

fn is_initiator_name(name: &str) -> bool {
    ["iqn.", "eui.", "naa."].iter().any(|p| name.starts_with(p))
}

/// Parse `<tpg>/acls ls` (or a single ACL's `ls`) into entries
///
/// `mapped_lunN` lines belong to the initiator line above them.
pub fn parse_acl_listing(text: &str) -> Vec<AclEntry> {
    let mut acls: Vec<AclEntry> = Vec::new();
    for (name, summary) in text.lines().filter_map(node) {
        if is_initiator_name(name) {
            acls.push(AclEntry {
                initiator: name.to_string(),
                mapped_luns: Vec::new(),
            });
        } else if let Some(mapped_lun) = numbered(name, "mapped_lun") {
            let target_lun = summary
                .and_then(|s| s.split_whitespace().next())
                .and_then(|first| numbered(first, "lun"));
            if let Some(acl) = acls.last_mut() {
                acl.mapped_luns.push(AclMapping {
                    mapped_lun,
                    target_lun,
                });
            }
        }
    }
    acls
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISCSI_LS: &str = "\
o- iscsi .............................................. [Targets: 1]
  o- iqn.2024-01.com.nas:storage ......................... [TPGs: 1]
";

    const LUNS_LS: &str = "\
o- luns ............................................................ [LUNs: 3]
  o- lun0 ............ [block/bs_lun0 (/dev/R0/client1) (default_tg_pt_gp)]
  o- lun1 .... [fileio/bs_lun1 (/var/lib/arcanas/iscsi/lun_test_disk_1700000000.img) (default_tg_pt_gp)]
  o- lun3 .................. [block/bs_lun3 (/dev/md0) (default_tg_pt_gp)]
";

    const ACLS_LS: &str = "\
o- acls ............................................................ [ACLs: 2]
  o- iqn.1993-08.org.debian:01:abc123 ....................... [Mapped LUNs: 2]
  | o- mapped_lun0 .......................... [lun0 block/bs_lun0 (rw)]
  | o- mapped_lun5 .......................... [lun1 fileio/bs_lun1 (rw)]
  o- iqn.2016-04.com.open-iscsi:c8e34e60ec9 ................. [Mapped LUNs: 0]
";

    #[test]
    fn test_target_exists() {
        assert!(target_exists(ISCSI_LS, "iqn.2024-01.com.nas:storage"));
        assert!(!target_exists(ISCSI_LS, "iqn.2024-01.com.nas"));
        assert!(!target_exists("o- iscsi ..... [Targets: 0]", "iqn.2024-01.com.nas:storage"));
    }

    #[test]
    fn test_parse_lun_listing() {
        let luns = parse_lun_listing(LUNS_LS);
        assert_eq!(luns.len(), 3);
        assert_eq!(
            luns[0],
            LunBinding {
                number: 0,
                backstore_type: "block".into(),
                backstore_name: "bs_lun0".into(),
                device: Some("/dev/R0/client1".into()),
            }
        );
        assert_eq!(luns[0].backstore_path(), "/backstores/block/bs_lun0");
        assert_eq!(luns[1].backstore_type, "fileio");
        assert_eq!(
            luns[1].device.as_deref(),
            Some("/var/lib/arcanas/iscsi/lun_test_disk_1700000000.img")
        );
        let numbers: Vec<u32> = luns.iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![0, 1, 3]);
    }

    #[test]
    fn test_lun_listing_skips_header_and_noise() {
        assert!(parse_lun_listing("o- luns ..... [LUNs: 0]\n").is_empty());
        assert!(parse_lun_listing("").is_empty());
        assert!(parse_lun_listing("o- lunx ..... [block/bs (x)]").is_empty());
    }

    #[test]
    fn test_parse_acl_listing() {
        let acls = parse_acl_listing(ACLS_LS);
        assert_eq!(acls.len(), 2);
        assert_eq!(acls[0].initiator, "iqn.1993-08.org.debian:01:abc123");
        assert_eq!(
            acls[0].mapped_luns,
            vec![
                AclMapping {
                    mapped_lun: 0,
                    target_lun: Some(0)
                },
                AclMapping {
                    mapped_lun: 5,
                    target_lun: Some(1)
                },
            ]
        );
        assert!(acls[0].maps_lun(1));
        assert!(!acls[0].maps_lun(5));
        assert!(acls[1].mapped_luns.is_empty());
    }

    #[test]
    fn test_single_acl_listing() {
        let text = "o- iqn.1993-08.org.debian:01:abc123 .... [Mapped LUNs: 1]\n  o- mapped_lun2 .... [lun2 block/bs_lun2 (rw)]\n";
        let acls = parse_acl_listing(text);
        assert_eq!(acls.len(), 1);
        assert_eq!(acls[0].mapped_luns[0].mapped_lun, 2);
    }
}
