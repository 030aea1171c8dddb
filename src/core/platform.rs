//! Build platform
//!
//! Which architectures a run targets, which names the build environment
//! already provides, and what the packaging scriptlets need.

use std::collections::HashSet;

use super::resolvable::ResolvableExpression;
use crate::config::defaults;

/// Machine triple used for cross tool names
pub fn machine_triple(architecture: &str) -> Option<&'static str> {
    Some(match architecture {
        "arm" => "arm-unknown-haiku",
        "arm64" => "aarch64-unknown-haiku",
        "m68k" => "m68k-unknown-haiku",
        "ppc" => "powerpc-apple-haiku",
        "riscv64" => "riscv64-unknown-haiku",
        "sparc" => "sparc64-unknown-haiku",
        "x86" | "x86_gcc2" => "i586-pc-haiku",
        "x86_64" => "x86_64-unknown-haiku",
        _ => return None,
    })
}

const HOST_TOOLS: &[&str] = &[
    "coreutils",
    "diffutils",
    "cmd:aclocal",
    "cmd:autoconf",
    "cmd:autoheader",
    "cmd:automake",
    "cmd:autoreconf",
    "cmd:awk",
    "cmd:bash",
    "cmd:cat",
    "cmd:cmake",
    "cmd:cmp",
    "cmd:find",
    "cmd:flex",
    "cmd:gcc",
    "cmd:grep",
    "cmd:gunzip",
    "cmd:ld",
    "cmd:libtool",
    "cmd:libtoolize",
    "cmd:login",
    "cmd:m4",
    "cmd:make",
    "cmd:makeinfo",
    "cmd:nm",
    "cmd:objcopy",
    "cmd:passwd",
    "cmd:perl",
    "cmd:ranlib",
    "cmd:readelf",
    "cmd:sed",
    "cmd:strip",
    "cmd:tar",
    "cmd:xargs",
    "cmd:xres",
    "cmd:zcat",
];

const TARGET_TOOLS: &[&str] = &[
    "coreutils",
    "diffutils",
    "cmd:awk",
    "cmd:cat",
    "cmd:cmp",
    "cmd:gunzip",
    "cmd:less",
    "cmd:login",
    "cmd:passwd",
    "cmd:bash",
    "cmd:zcat",
];

/// Target architectures and implicit provides of a run
#[derive(Debug, Clone)]
pub struct BuildPlatform {
    target_architecture: String,
    secondary_architectures: Vec<String>,
    host_provides: HashSet<String>,
    target_provides: HashSet<String>,
}

impl BuildPlatform {
    /// Build the platform description for the given architectures
    pub fn new(target_architecture: &str, secondary_architectures: &[String]) -> Self {
        let mut host_provides: HashSet<String> = HOST_TOOLS.iter().map(|s| (*s).to_string()).collect();
        let mut target_provides: HashSet<String> =
            TARGET_TOOLS.iter().map(|s| (*s).to_string()).collect();

        for provides in ["haiku", "haiku_devel"] {
            host_provides.insert(provides.to_string());
            target_provides.insert(provides.to_string());
        }
        host_provides.insert(format!("binutils_cross_{target_architecture}"));
        host_provides.insert(format!("gcc_cross_{target_architecture}"));

        let prefix = triple_prefix(target_architecture);
        for tool in ["objcopy", "readelf", "strip"] {
            host_provides.insert(format!("cmd:{prefix}{tool}"));
        }

        for secondary in secondary_architectures {
            for provides in [format!("haiku_{secondary}"), format!("haiku_{secondary}_devel")] {
                host_provides.insert(provides.clone());
                target_provides.insert(provides);
            }
            host_provides.insert(format!("binutils_cross_{secondary}"));
            host_provides.insert(format!("gcc_cross_{secondary}"));
        }

        Self {
            target_architecture: target_architecture.to_string(),
            secondary_architectures: secondary_architectures.to_vec(),
            host_provides,
            target_provides,
        }
    }

    /// Primary target architecture
    pub fn target_architecture(&self) -> &str {
        &self.target_architecture
    }

    /// Secondary target architectures
    pub fn secondary_architectures(&self) -> &[String] {
        &self.secondary_architectures
    }

    /// Whether packages of this architecture take part in resolution
    pub fn accepts_architecture(&self, architecture: &str) -> bool {
        architecture == self.target_architecture
            || architecture == defaults::ANY_ARCHITECTURE
            || architecture == defaults::SOURCE_ARCHITECTURE
            || self.secondary_architectures.iter().any(|a| a == architecture)
    }

    /// Names satisfied by the build environment itself
    pub fn is_implicit(&self, name: &str, for_build_host: bool) -> bool {
        if for_build_host {
            self.host_provides.contains(name)
        } else {
            self.target_provides.contains(name)
        }
    }

    /// Requires of the packaging scriptlets, resolved for the build host
    pub fn scriptlet_prerequires(&self) -> Vec<ResolvableExpression> {
        let prefix = triple_prefix(&self.target_architecture);
        [
            "coreutils".to_string(),
            "cmd:bash".to_string(),
            "cmd:grep".to_string(),
            format!("cmd:{prefix}objcopy"),
            format!("cmd:{prefix}readelf"),
            "cmd:sed".to_string(),
            format!("cmd:{prefix}strip"),
            "cmd:xres".to_string(),
        ]
        .into_iter()
        .map(ResolvableExpression::named)
        .collect()
    }
}

/// `<triple with '_' for '-'>_` or empty for unknown architectures
fn triple_prefix(architecture: &str) -> String {
    machine_triple(architecture)
        .map(|triple| format!("{}_", triple.replace('-', "_")))
        .unwrap_or_default()
}
