//! Parser for `lsblk -P` key/value output

/// Arguments for the block device listing
pub const LSBLK_ARGS: &[&str] = &["-P", "-o", "NAME,TYPE,PKNAME,MOUNTPOINT,FSTYPE"];

/// One block device row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockDeviceRow {
    /// Kernel name without the `/dev/` prefix
    pub name: String,
    /// `disk`, `part`, `raid1`, `lvm`, ...
    pub dev_type: String,
    /// Parent kernel name
    pub parent: Option<String>,
    pub mount_point: Option<String>,
    pub fstype: Option<String>,
}

impl BlockDeviceRow {
    pub fn is_disk(&self) -> bool {
        self.dev_type == "disk"
    }

    pub fn is_raid(&self) -> bool {
        self.dev_type.starts_with("raid") || self.dev_type == "md"
    }
}

/// Split one `KEY="value" KEY2="value 2"` line into pairs
fn pairs(line: &str) -> Vec<(&str, &str)> {
    let mut out = Vec::new();
    let mut rest = line.trim();
    while let Some(eq) = rest.find("=\"") {
        let key = rest[..eq].trim();
        let value_start = eq + 2;
        let Some(len) = rest[value_start..].find('"') else {
            break;
        };
        out.push((key, &rest[value_start..value_start + len]));
        rest = &rest[value_start + len + 1..];
    }
    out
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Parse `lsblk -P` output
pub fn parse_lsblk(text: &str) -> Vec<BlockDeviceRow> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut row = BlockDeviceRow::default();
            for (key, value) in pairs(line) {
                match key {
                    "NAME" => row.name = value.to_string(),
                    "TYPE" => row.dev_type = value.to_string(),
                    "PKNAME" => row.parent = non_empty(value),
                    "MOUNTPOINT" => row.mount_point = non_empty(value),
                    "FSTYPE" => row.fstype = non_empty(value),
                    _ => {}
                }
            }
            (!row.name.is_empty()).then_some(row)
        })
        .collect()
}
