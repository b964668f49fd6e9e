//! In-memory storage stack for tests
//!
//! `SimulatedHost` implements `CommandExecutor` by interpreting the exact
//! command lines the orchestrator issues against a model of LVM, block
//! devices, files and the target subsystem. Failures can be injected for any
//! command line containing a given substring, and matching commands can be
//! slowed down to open interleaving windows for concurrency tests.

use crate::config::TargetConfig;
use crate::domain::ports::{command_line, CommandExecutor, CommandOutput};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

const MIB: u64 = 1024 * 1024;
const DEFAULT_DEVICE_SIZE: u64 = 100 * 1024 * MIB;

struct Vg {
    size: u64,
    free: u64,
    pvs: Vec<String>,
}

struct Failure {
    pattern: String,
    remaining: Option<usize>,
}

/// Observable state for before/after comparisons
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSnapshot {
    pub lvs: BTreeSet<String>,
    pub backstores: BTreeSet<String>,
    pub luns: BTreeSet<u32>,
    pub files: BTreeSet<String>,
    pub acls: BTreeMap<String, BTreeMap<u32, u32>>,
}

struct HostState {
    iqn: String,
    tpg: String,
    vgs: BTreeMap<String, Vg>,
    lvs: BTreeMap<(String, String), u64>,
    pvs: BTreeSet<String>,
    devices: BTreeMap<String, u64>,
    mounts: BTreeMap<String, String>,
    lsblk: String,
    mdstat: String,
    formatted: BTreeSet<String>,
    target: bool,
    tpg_attributes: BTreeMap<String, String>,
    backstores: BTreeMap<String, String>,
    luns: BTreeMap<u32, String>,
    acls: BTreeMap<String, BTreeMap<u32, u32>>,
    auto_map_acls: bool,
    files: BTreeMap<String, u64>,
    dirs: BTreeSet<String>,
    writes: Vec<(String, String)>,
    log: Vec<String>,
    failures: Vec<Failure>,
    delays: Vec<(String, Duration)>,
}

/// Scriptable stand-in for the host's storage tools
pub struct SimulatedHost {
    state: Mutex<HostState>,
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHost {
    pub fn new() -> Self {
        let target = TargetConfig::default();
        Self {
            state: Mutex::new(HostState {
                iqn: target.iqn,
                tpg: target.tpg,
                vgs: BTreeMap::new(),
                lvs: BTreeMap::new(),
                pvs: BTreeSet::new(),
                devices: BTreeMap::new(),
                mounts: BTreeMap::new(),
                lsblk: String::new(),
                mdstat: String::new(),
                formatted: BTreeSet::new(),
                target: false,
                tpg_attributes: BTreeMap::new(),
                backstores: BTreeMap::new(),
                luns: BTreeMap::new(),
                acls: BTreeMap::new(),
                auto_map_acls: true,
                files: BTreeMap::new(),
                dirs: BTreeSet::new(),
                writes: Vec::new(),
                log: Vec::new(),
                failures: Vec::new(),
                delays: Vec::new(),
            }),
        }
    }

    // =========================================================================
    // Setup
    // =========================================================================

    pub fn add_device(&self, path: &str, size: u64) {
        self.state.lock().devices.insert(path.to_string(), size);
    }

    pub fn add_volume_group(&self, name: &str, size: u64, pvs: &[&str]) {
        let mut state = self.state.lock();
        for pv in pvs {
            state.pvs.insert(pv.to_string());
            state.devices.entry(pv.to_string()).or_insert(size);
        }
        state.vgs.insert(
            name.to_string(),
            Vg {
                size,
                free: size,
                pvs: pvs.iter().map(|s| s.to_string()).collect(),
            },
        );
    }

    pub fn add_logical_volume(&self, vg: &str, name: &str, size: u64) {
        let mut state = self.state.lock();
        if let Some(group) = state.vgs.get_mut(vg) {
            group.free = group.free.saturating_sub(size);
        }
        state.lvs.insert((vg.to_string(), name.to_string()), size);
    }

    pub fn mount(&self, device: &str, mount_point: &str) {
        self.state
            .lock()
            .mounts
            .insert(device.to_string(), mount_point.to_string());
    }

    pub fn set_lsblk(&self, text: &str) {
        self.state.lock().lsblk = text.to_string();
    }

    pub fn set_mdstat(&self, text: &str) {
        self.state.lock().mdstat = text.to_string();
    }

    pub fn create_target(&self) {
        self.state.lock().target = true;
    }

    /// Bind an existing LUN `number` to `device` through `bs_lun<number>`
    pub fn add_lun(&self, number: u32, backstore_type: &str, device: &str) {
        let mut state = self.state.lock();
        state.target = true;
        let backstore = format!("/backstores/{}/bs_lun{}", backstore_type, number);
        state.backstores.insert(backstore.clone(), device.to_string());
        state.luns.insert(number, backstore);
    }

    pub fn add_acl(&self, initiator: &str, mappings: &[(u32, u32)]) {
        self.state
            .lock()
            .acls
            .insert(initiator.to_string(), mappings.iter().copied().collect());
    }

    /// New ACLs start empty instead of mapping every LUN
    pub fn disable_acl_auto_mapping(&self) {
        self.state.lock().auto_map_acls = false;
    }

    /// Fail every command line containing `pattern`
    pub fn fail_on(&self, pattern: &str) {
        self.state.lock().failures.push(Failure {
            pattern: pattern.to_string(),
            remaining: None,
        });
    }

    /// Fail the next command line containing `pattern`
    pub fn fail_once(&self, pattern: &str) {
        self.state.lock().failures.push(Failure {
            pattern: pattern.to_string(),
            remaining: Some(1),
        });
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Sleep before running every command line containing `pattern`
    pub fn delay_on(&self, pattern: &str, delay: Duration) {
        self.state
            .lock()
            .delays
            .push((pattern.to_string(), delay));
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub fn has_command(&self, line: &str) -> bool {
        self.state.lock().log.iter().any(|l| l == line)
    }

    pub fn count_commands(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|l| l.starts_with(prefix))
            .count()
    }

    pub fn vg_free(&self, name: &str) -> Option<u64> {
        self.state.lock().vgs.get(name).map(|vg| vg.free)
    }

    pub fn lv_exists(&self, vg: &str, name: &str) -> bool {
        self.state
            .lock()
            .lvs
            .contains_key(&(vg.to_string(), name.to_string()))
    }

    pub fn is_physical_volume(&self, device: &str) -> bool {
        self.state.lock().pvs.contains(device)
    }

    pub fn is_formatted(&self, path: &str) -> bool {
        self.state.lock().formatted.contains(path)
    }

    pub fn target_exists(&self) -> bool {
        self.state.lock().target
    }

    pub fn tpg_attribute(&self, key: &str) -> Option<String> {
        self.state.lock().tpg_attributes.get(key).cloned()
    }

    pub fn lun_numbers(&self) -> Vec<u32> {
        self.state.lock().luns.keys().copied().collect()
    }

    pub fn lun_backstore(&self, number: u32) -> Option<String> {
        self.state.lock().luns.get(&number).cloned()
    }

    pub fn backstore_device(&self, backstore: &str) -> Option<String> {
        self.state.lock().backstores.get(backstore).cloned()
    }

    pub fn file_size(&self, path: &str) -> Option<u64> {
        self.state.lock().files.get(path).copied()
    }

    pub fn files(&self) -> Vec<String> {
        self.state.lock().files.keys().cloned().collect()
    }

    pub fn acl_mappings(&self, initiator: &str) -> Option<BTreeMap<u32, u32>> {
        self.state.lock().acls.get(initiator).cloned()
    }

    /// Values written through `tee`, in order
    pub fn writes(&self) -> Vec<(String, String)> {
        self.state.lock().writes.clone()
    }

    pub fn snapshot(&self) -> HostSnapshot {
        let state = self.state.lock();
        HostSnapshot {
            lvs: state
                .lvs
                .keys()
                .map(|(vg, lv)| format!("{}/{}", vg, lv))
                .collect(),
            backstores: state.backstores.keys().cloned().collect(),
            luns: state.luns.keys().copied().collect(),
            files: state.files.keys().cloned().collect(),
            acls: state.acls.clone(),
        }
    }
}

#[async_trait]
impl CommandExecutor for SimulatedHost {
    async fn execute(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<CommandOutput> {
        let line = command_line(program, args);
        let delay = {
            let mut state = self.state.lock();
            state.log.push(line.clone());
            state
                .delays
                .iter()
                .find(|(pattern, _)| line.contains(pattern.as_str()))
                .map(|(_, delay)| *delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();

        if let Some(idx) = state
            .failures
            .iter()
            .position(|f| line.contains(&f.pattern))
        {
            let output = format!("simulated failure: {}", state.failures[idx].pattern);
            match state.failures[idx].remaining {
                Some(n) if n <= 1 => {
                    state.failures.remove(idx);
                }
                Some(n) => state.failures[idx].remaining = Some(n - 1),
                None => {}
            }
            return Ok(CommandOutput::failure(1, output));
        }

        state.handle(program, args, stdin)
    }
}

// =============================================================================
// Command Interpretation
// =============================================================================

fn ok() -> CommandOutput {
    CommandOutput::success("")
}

fn fail(status: i32, output: impl Into<String>) -> CommandOutput {
    CommandOutput::failure(status, output)
}

fn parse_megabytes(arg: &str) -> Option<u64> {
    arg.trim_end_matches(['M', 'm']).parse::<u64>().ok().map(|mb| mb * MIB)
}

fn split_lv(path: &str) -> Option<(String, String)> {
    let rest = path.strip_prefix("/dev/").unwrap_or(path);
    let (vg, lv) = rest.split_once('/')?;
    Some((vg.to_string(), lv.to_string()))
}

impl HostState {
    fn handle(&mut self, program: &str, args: &[&str], stdin: Option<&str>) -> Result<CommandOutput> {
        let last = args.last().copied().unwrap_or("");
        let out = match program {
            "vgs" => CommandOutput::success(self.render_vgs()),
            "lvs" => self.lvs(args),
            "pvs" => CommandOutput::success(self.render_pvs()),
            "findmnt" => match self.mounts.get(last) {
                Some(mp) => CommandOutput::success(format!("{}\n", mp)),
                None => fail(1, ""),
            },
            "umount" => {
                let device = self
                    .mounts
                    .iter()
                    .find(|(_, mp)| mp.as_str() == last)
                    .map(|(dev, _)| dev.clone());
                match device {
                    Some(dev) => {
                        self.mounts.remove(&dev);
                        ok()
                    }
                    None => fail(32, format!("umount: {}: not mounted.", last)),
                }
            }
            "pvremove" => {
                if !self.pvs.contains(last) {
                    fail(5, format!("No physical volume label read from {}.", last))
                } else if self.vgs.values().any(|vg| vg.pvs.iter().any(|pv| pv == last)) {
                    fail(5, format!("PV {} is used by a VG", last))
                } else {
                    self.pvs.remove(last);
                    ok()
                }
            }
            "pvcreate" => {
                self.pvs.insert(last.to_string());
                CommandOutput::success(format!("Physical volume \"{}\" successfully created.", last))
            }
            "vgcreate" => self.vgcreate(args),
            "vgremove" => {
                if !self.vgs.contains_key(last) {
                    fail(5, format!("Volume group \"{}\" not found", last))
                } else if self.lvs.keys().any(|(vg, _)| vg == last) {
                    fail(5, format!("Volume group \"{}\" still contains logical volumes", last))
                } else {
                    self.vgs.remove(last);
                    ok()
                }
            }
            "lvcreate" => self.lvcreate(args),
            "lvremove" => match split_lv(last) {
                Some(key) if self.lvs.contains_key(&key) => {
                    let size = self.lvs.remove(&key).unwrap_or(0);
                    if let Some(vg) = self.vgs.get_mut(&key.0) {
                        vg.free += size;
                    }
                    self.formatted.remove(last);
                    ok()
                }
                _ => fail(5, format!("Failed to find logical volume \"{}\"", last)),
            },
            "lvresize" => self.lvresize(args),
            "resize2fs" => {
                let path = args.iter().find(|a| a.starts_with('/')).copied().unwrap_or("");
                match split_lv(path) {
                    Some(key) if self.lvs.contains_key(&key) => ok(),
                    _ => fail(1, format!("resize2fs: No such file or directory while trying to open {}", path)),
                }
            }
            p if p.starts_with("mkfs.") => {
                match split_lv(last) {
                    Some(key) if self.lvs.contains_key(&key) => {
                        self.formatted.insert(last.to_string());
                        ok()
                    }
                    _ => fail(1, format!("The file {} does not exist", last)),
                }
            }
            "lsblk" => CommandOutput::success(self.lsblk.clone()),
            "cat" if last == "/proc/mdstat" => CommandOutput::success(self.mdstat.clone()),
            "blockdev" => {
                let size = self.devices.get(last).copied().or_else(|| {
                    split_lv(last).and_then(|key| self.lvs.get(&key).copied())
                });
                match size {
                    Some(size) => CommandOutput::success(format!("{}\n", size)),
                    None => fail(1, format!("blockdev: cannot open {}", last)),
                }
            }
            "stat" => match self.files.get(last) {
                Some(size) => CommandOutput::success(format!("{}\n", size)),
                None => fail(1, format!("stat: cannot stat '{}'", last)),
            },
            "mkdir" => {
                self.dirs.insert(last.to_string());
                ok()
            }
            "test" => {
                if self.files.contains_key(last) || self.dirs.contains(last) {
                    ok()
                } else {
                    fail(1, "")
                }
            }
            "dd" => {
                let of = args.iter().find_map(|a| a.strip_prefix("of="));
                let seek = args
                    .iter()
                    .find_map(|a| a.strip_prefix("seek="))
                    .and_then(|s| s.parse::<u64>().ok());
                match (of, seek) {
                    (Some(path), Some(mb)) => {
                        self.files.insert(path.to_string(), mb * MIB);
                        ok()
                    }
                    _ => fail(1, "dd: missing operand"),
                }
            }
            "rm" => {
                self.files.remove(last);
                ok()
            }
            "tee" => {
                let value = stdin.unwrap_or("").trim().to_string();
                self.writes.push((last.to_string(), value.clone()));
                CommandOutput::success(value)
            }
            "targetcli" => self.targetcli(args),
            other => {
                return Err(Error::ToolUnavailable {
                    tool: other.to_string(),
                })
            }
        };
        Ok(out)
    }

    fn render_vgs(&self) -> String {
        self.vgs
            .iter()
            .map(|(name, vg)| format!("  {}|{}|{}\n", name, vg.size, vg.free))
            .collect()
    }

    fn render_pvs(&self) -> String {
        self.pvs
            .iter()
            .map(|pv| {
                let owner = self
                    .vgs
                    .iter()
                    .find(|(_, vg)| vg.pvs.contains(pv))
                    .map(|(name, _)| name.as_str())
                    .unwrap_or("");
                format!("  {}|{}\n", pv, owner)
            })
            .collect()
    }

    fn lvs(&self, args: &[&str]) -> CommandOutput {
        let filter = if args.len() > crate::host::parse::lvm::LVS_ARGS.len() {
            args.last().copied()
        } else {
            None
        };
        if let Some(vg) = filter {
            if !self.vgs.contains_key(vg) {
                return fail(5, format!("Volume group \"{}\" not found", vg));
            }
        }
        CommandOutput::success(
            self.lvs
                .iter()
                .filter(|((vg, _), _)| filter.map_or(true, |f| f == vg.as_str()))
                .map(|((vg, lv), size)| format!("  {}|{}|/dev/{}/{}|{}|\n", vg, lv, vg, lv, size))
                .collect::<String>(),
        )
    }

    fn vgcreate(&mut self, args: &[&str]) -> CommandOutput {
        let Some((name, devices)) = args.split_first() else {
            return fail(3, "Please provide a volume group name");
        };
        if self.vgs.contains_key(*name) {
            return fail(5, format!("A volume group called {} already exists.", name));
        }
        if let Some(missing) = devices.iter().find(|d| !self.pvs.contains(**d)) {
            return fail(5, format!("Device {} not found.", missing));
        }
        let size = devices
            .iter()
            .map(|d| self.devices.get(*d).copied().unwrap_or(DEFAULT_DEVICE_SIZE))
            .sum();
        self.vgs.insert(
            name.to_string(),
            Vg {
                size,
                free: size,
                pvs: devices.iter().map(|d| d.to_string()).collect(),
            },
        );
        ok()
    }

    fn lvcreate(&mut self, args: &[&str]) -> CommandOutput {
        let mut size = None;
        let mut name = None;
        let mut positional = Vec::new();
        let mut i = 0;
        while i < args.len() {
            match args[i] {
                "-L" => {
                    size = args.get(i + 1).and_then(|s| parse_megabytes(s));
                    i += 2;
                }
                "-n" => {
                    name = args.get(i + 1).copied();
                    i += 2;
                }
                "-W" => i += 2,
                flag if flag.starts_with('-') => i += 1,
                value => {
                    positional.push(value);
                    i += 1;
                }
            }
        }
        let (Some(size), Some(name), Some(vg)) = (size, name, positional.last().copied()) else {
            return fail(3, "lvcreate: invalid arguments");
        };
        let key = (vg.to_string(), name.to_string());
        if self.lvs.contains_key(&key) {
            return fail(5, format!("Logical Volume \"{}\" already exists in volume group \"{}\"", name, vg));
        }
        let Some(group) = self.vgs.get_mut(vg) else {
            return fail(5, format!("Volume group \"{}\" not found", vg));
        };
        if size > group.free {
            return fail(5, format!("Volume group \"{}\" has insufficient free space", vg));
        }
        group.free -= size;
        self.lvs.insert(key, size);
        CommandOutput::success(format!("Logical volume \"{}\" created.", name))
    }

    fn lvresize(&mut self, args: &[&str]) -> CommandOutput {
        let size = args
            .iter()
            .position(|a| *a == "-L")
            .and_then(|i| args.get(i + 1))
            .and_then(|s| parse_megabytes(s));
        let target = args.last().and_then(|t| t.split_once('/'));
        let (Some(size), Some((vg, lv))) = (size, target) else {
            return fail(3, "lvresize: invalid arguments");
        };
        let key = (vg.to_string(), lv.to_string());
        let Some(current) = self.lvs.get(&key).copied() else {
            return fail(5, format!("Failed to find logical volume \"{}/{}\"", vg, lv));
        };
        let Some(group) = self.vgs.get_mut(vg) else {
            return fail(5, format!("Volume group \"{}\" not found", vg));
        };
        if size > current && size - current > group.free {
            return fail(5, "Insufficient free space");
        }
        group.free = group.free + current - size;
        self.lvs.insert(key, size);
        ok()
    }

    // =========================================================================
    // targetcli
    // =========================================================================

    fn tpg_path(&self) -> String {
        format!("/iscsi/{}/{}", self.iqn, self.tpg)
    }

    fn render_binding(&self, backstore: &str) -> String {
        let object = backstore.trim_start_matches("/backstores/");
        let device = self.backstores.get(backstore).cloned().unwrap_or_default();
        format!("[{} ({}) (default_tg_pt_gp)]", object, device)
    }

    fn render_acl(&self, initiator: &str, indent: &str) -> String {
        let Some(mappings) = self.acls.get(initiator) else {
            return String::new();
        };
        let mut text = format!(
            "{}o- {} ...... [Mapped LUNs: {}]\n",
            indent,
            initiator,
            mappings.len()
        );
        for (mapped, target) in mappings {
            let object = self
                .luns
                .get(target)
                .map(|b| b.trim_start_matches("/backstores/").to_string())
                .unwrap_or_default();
            text.push_str(&format!(
                "{}| o- mapped_lun{} ...... [lun{} {} (rw)]\n",
                indent, mapped, target, object
            ));
        }
        text
    }

    fn unmap_target_lun(&mut self, number: u32) {
        for mappings in self.acls.values_mut() {
            mappings.retain(|_, target| *target != number);
        }
    }

    fn targetcli(&mut self, args: &[&str]) -> CommandOutput {
        let Some((path, rest)) = args.split_first() else {
            return fail(1, "targetcli: missing path");
        };
        let tpg = self.tpg_path();
        let luns_path = format!("{}/luns", tpg);
        let acls_path = format!("{}/acls", tpg);

        if *path == "/iscsi" {
            return match rest {
                ["ls"] => {
                    let mut text = format!(
                        "o- iscsi ...... [Targets: {}]\n",
                        usize::from(self.target)
                    );
                    if self.target {
                        text.push_str(&format!("  o- {} ...... [TPGs: 1]\n", self.iqn));
                    }
                    CommandOutput::success(text)
                }
                ["create", iqn] if *iqn == self.iqn => {
                    if self.target {
                        fail(1, "This Target already exists in configFS")
                    } else {
                        self.target = true;
                        CommandOutput::success(format!("Created target {}.", iqn))
                    }
                }
                _ => fail(1, "Unsupported /iscsi command"),
            };
        }

        if let Some(kind) = path.strip_prefix("/backstores/") {
            return match rest {
                ["create", name, device] => {
                    let key = format!("/backstores/{}/{}", kind, name);
                    if self.backstores.contains_key(&key) {
                        fail(1, format!("Storage object {}/{} exists", kind, name))
                    } else {
                        self.backstores.insert(key, device.to_string());
                        CommandOutput::success(format!("Created {} storage object {}.", kind, name))
                    }
                }
                ["delete", name] => {
                    let key = format!("/backstores/{}/{}", kind, name);
                    if self.backstores.remove(&key).is_none() {
                        return fail(1, format!("No storage object named {}.", name));
                    }
                    let orphaned: Vec<u32> = self
                        .luns
                        .iter()
                        .filter(|(_, b)| **b == key)
                        .map(|(n, _)| *n)
                        .collect();
                    for number in orphaned {
                        self.luns.remove(&number);
                        self.unmap_target_lun(number);
                    }
                    CommandOutput::success(format!("Deleted storage object {}.", name))
                }
                _ => fail(1, "Unsupported backstore command"),
            };
        }

        if path.starts_with("/iscsi/") && !self.target {
            return fail(1, format!("No such path {}", path));
        }

        if *path == tpg {
            return match rest {
                ["set", "attribute", pairs @ ..] => {
                    for pair in pairs {
                        if let Some((k, v)) = pair.split_once('=') {
                            self.tpg_attributes.insert(k.to_string(), v.to_string());
                        }
                    }
                    ok()
                }
                _ => fail(1, "Unsupported tpg command"),
            };
        }

        if *path == luns_path {
            return match rest {
                ["ls"] => {
                    let mut text = format!("o- luns ...... [LUNs: {}]\n", self.luns.len());
                    for (number, backstore) in &self.luns {
                        text.push_str(&format!(
                            "  o- lun{} ...... {}\n",
                            number,
                            self.render_binding(backstore)
                        ));
                    }
                    CommandOutput::success(text)
                }
                ["create", backstore, options @ ..] => {
                    if !self.backstores.contains_key(*backstore) {
                        return fail(1, format!("No such storage object {}", backstore));
                    }
                    let number = options
                        .iter()
                        .find_map(|o| o.strip_prefix("lun="))
                        .and_then(|n| n.parse::<u32>().ok())
                        .unwrap_or_else(|| (0..).find(|n| !self.luns.contains_key(n)).unwrap_or(0));
                    if self.luns.contains_key(&number) {
                        return fail(1, format!("LUN {} already exists", number));
                    }
                    self.luns.insert(number, backstore.to_string());
                    CommandOutput::success(format!("Created LUN {}.", number))
                }
                ["delete", name] => {
                    let number = name
                        .strip_prefix("lun")
                        .and_then(|n| n.parse::<u32>().ok());
                    match number {
                        Some(n) if self.luns.remove(&n).is_some() => {
                            self.unmap_target_lun(n);
                            CommandOutput::success(format!("Deleted LUN {}.", n))
                        }
                        _ => fail(1, format!("No such LUN: {}", name)),
                    }
                }
                _ => fail(1, "Unsupported luns command"),
            };
        }

        if *path == acls_path {
            return match rest {
                ["ls"] => {
                    let mut text = format!("o- acls ...... [ACLs: {}]\n", self.acls.len());
                    for initiator in self.acls.keys() {
                        text.push_str(&self.render_acl(initiator, "  "));
                    }
                    CommandOutput::success(text)
                }
                ["create", initiator] => {
                    if self.acls.contains_key(*initiator) {
                        return fail(1, "This NodeACL already exists in configFS");
                    }
                    let mappings = if self.auto_map_acls {
                        self.luns.keys().map(|n| (*n, *n)).collect()
                    } else {
                        BTreeMap::new()
                    };
                    self.acls.insert(initiator.to_string(), mappings);
                    CommandOutput::success(format!("Created Node ACL for {}", initiator))
                }
                ["delete", initiator] => {
                    if self.acls.remove(*initiator).is_some() {
                        CommandOutput::success(format!("Deleted Node ACL {}.", initiator))
                    } else {
                        fail(1, format!("No such NodeACL in configfs: {}", initiator))
                    }
                }
                _ => fail(1, "Unsupported acls command"),
            };
        }

        if let Some(initiator) = path.strip_prefix(&format!("{}/", acls_path)) {
            if !self.acls.contains_key(initiator) {
                return fail(1, format!("No such path {}", path));
            }
            return match rest {
                ["ls"] => CommandOutput::success(self.render_acl(initiator, "")),
                ["create", mapped, target] => {
                    let mapped = mapped
                        .strip_prefix("mapped_lun=")
                        .and_then(|m| m.parse::<u32>().ok());
                    let target = target
                        .strip_prefix("tpg_lun_or_backstore=lun")
                        .and_then(|t| t.parse::<u32>().ok());
                    let (Some(mapped), Some(target)) = (mapped, target) else {
                        return fail(1, "Invalid mapped LUN parameters");
                    };
                    if !self.luns.contains_key(&target) {
                        return fail(1, format!("No such LUN lun{}", target));
                    }
                    let mappings = self.acls.entry(initiator.to_string()).or_default();
                    if mappings.contains_key(&mapped) {
                        return fail(1, format!("Mapped LUN {} already exists", mapped));
                    }
                    mappings.insert(mapped, target);
                    CommandOutput::success(format!("Created Mapped LUN {}.", mapped))
                }
                ["delete", mapped] => {
                    let removed = mapped
                        .parse::<u32>()
                        .ok()
                        .and_then(|m| self.acls.get_mut(initiator).and_then(|acl| acl.remove(&m)));
                    match removed {
                        Some(_) => CommandOutput::success(format!("Deleted Mapped LUN {}.", mapped)),
                        None => fail(1, format!("Mapped LUN {} not found", mapped)),
                    }
                }
                _ => fail(1, "Unsupported acl command"),
            };
        }

        fail(1, format!("No such path {}", path))
    }
}
