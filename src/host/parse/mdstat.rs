//! Parser for `/proc/mdstat`

/// An active md RAID array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdArray {
    /// e.g. `md0`
    pub name: String,
    /// e.g. `raid1`
    pub level: String,
    /// Member kernel names with role and flag suffixes stripped
    pub members: Vec<String>,
}

/// Parse the active arrays out of `/proc/mdstat`
///
/// Array lines look like `md0 : active raid1 sdc[0] sdb[1](F)`.
pub fn parse_mdstat(text: &str) -> Vec<MdArray> {
    text.lines()
        .filter_map(|line| {
            let (name, rest) = line.split_once(" : ")?;
            let name = name.trim();
            if !name.starts_with("md") {
                return None;
            }
            let mut words = rest.split_whitespace();
            if words.next()? != "active" {
                return None;
            }
            let mut level = String::new();
            let mut members = Vec::new();
            for word in words {
                if word.starts_with('(') {
                    // "(auto-read-only)" style state markers
                    continue;
                }
                match word.find('[') {
                    Some(idx) => members.push(word[..idx].to_string()),
                    None if level.is_empty() => level = word.to_string(),
                    None => {}
                }
            }
            Some(MdArray {
                name: name.to_string(),
                level,
                members,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MDSTAT: &str = "\
Personalities : [raid1] [raid6] [raid5] [raid4]
md0 : active raid1 sdc[0] sdb[1]
      976630464 blocks super 1.2 [2/2] [UU]
      bitmap: 0/8 pages [0KB], 65536KB chunk

md1 : active (auto-read-only) raid5 sdf[2] sde[1](F) sdd[0]
      1953260928 blocks super 1.2 level 5, 512k chunk

md2 : inactive sdg[0](S)

unused devices: <none>
";

    #[test]
    fn test_parse_mdstat() {
        let arrays = parse_mdstat(MDSTAT);
        assert_eq!(arrays.len(), 2);
        assert_eq!(
            arrays[0],
            MdArray {
                name: "md0".into(),
                level: "raid1".into(),
                members: vec!["sdc".into(), "sdb".into()],
            }
        );
        assert_eq!(arrays[1].level, "raid5");
        assert_eq!(arrays[1].members, vec!["sdf", "sde", "sdd"]);
    }

    #[test]
    fn test_parse_empty_mdstat() {
        assert!(parse_mdstat("Personalities : \nunused devices: <none>\n").is_empty());
    }
}
