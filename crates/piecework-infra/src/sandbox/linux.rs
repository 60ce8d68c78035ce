//! Linux restrictions for the sandbox child: Landlock rules and an
//! address-space rlimit.
//!
//! Applied by the child to itself before any connector code runs. Landlock uses the
//! best-effort compatibility mode of the `landlock` crate: on kernels without
//! Landlock (or with an older ABI) the rules degrade and a warning is logged.

use std::path::Path;

use landlock::{
    ABI, Access, AccessFs, AccessNet, Ruleset, RulesetAttr, RulesetCreatedAttr, RulesetStatus,
    path_beneath_rules,
};

use nix::sys::resource::{Resource, setrlimit};

use super::SandboxPolicy;

/// Read-only system locations needed by the runtime, TLS and DNS.
const SYSTEM_READ_PATHS: [&str; 8] = [
    "/usr/lib",
    "/lib",
    "/lib64",
    "/etc/ssl",
    "/etc/ca-certificates",
    "/etc/resolv.conf",
    "/etc/hosts",
    "/etc/nsswitch.conf",
];

pub fn apply_landlock(policy: &SandboxPolicy) -> anyhow::Result<()> {
    let abi = ABI::V4;
    let read_access = AccessFs::from_read(abi);
    let write_access = AccessFs::from_all(abi);

    let mut ruleset = Ruleset::default().handle_access(AccessFs::from_all(abi))?;
    if !policy.allow_network {
        // Handled with no rules: every TCP bind/connect is denied.
        ruleset = ruleset.handle_access(AccessNet::from_all(abi))?;
    }
    let mut ruleset = ruleset.create()?;

    let system_paths = SYSTEM_READ_PATHS.iter().map(Path::new);
    let configured = policy.readable_paths.iter().map(|p| p.as_path());
    for path in system_paths.chain(configured).filter(|p| p.exists()) {
        for rule in path_beneath_rules([path], read_access) {
            ruleset = ruleset.add_rule(rule?)?;
        }
    }

    if policy.temp_dir.exists() {
        for rule in path_beneath_rules([&policy.temp_dir], write_access) {
            ruleset = ruleset.add_rule(rule?)?;
        }
    }

    let status = ruleset.restrict_self()?;
    match status.ruleset {
        RulesetStatus::FullyEnforced => tracing::debug!("landlock sandbox fully enforced"),
        RulesetStatus::PartiallyEnforced => {
            tracing::warn!("landlock sandbox partially enforced (older kernel ABI)")
        }
        RulesetStatus::NotEnforced => {
            tracing::warn!("landlock sandbox not enforced (kernel may lack Landlock support)")
        }
    }
    Ok(())
}

/// Cap the child's address space. Allocations past the limit fail inside the
/// child and surface as a crash, never as host memory pressure.
pub fn apply_memory_limit(policy: &SandboxPolicy) -> anyhow::Result<()> {
    if policy.max_memory_bytes == 0 {
        return Ok(());
    }
    let limit = policy.max_memory_bytes as nix::libc::rlim_t;
    setrlimit(Resource::RLIMIT_AS, limit, limit)?;
    tracing::debug!(max_memory_bytes = policy.max_memory_bytes, "sandbox memory limit applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn zero_memory_limit_leaves_process_untouched() {
        let policy = SandboxPolicy {
            readable_paths: Vec::new(),
            temp_dir: PathBuf::from("/tmp"),
            allow_network: true,
            max_memory_bytes: 0,
        };
        let before = nix::sys::resource::getrlimit(Resource::RLIMIT_AS).unwrap();
        apply_memory_limit(&policy).unwrap();
        let after = nix::sys::resource::getrlimit(Resource::RLIMIT_AS).unwrap();
        assert_eq!(before, after);
    }
}
