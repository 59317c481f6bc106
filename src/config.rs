use std::path::PathBuf;

pub const DEFAULT_POCKY_ROOT: &str = "/var/pocky";

pub const DEFAULT_CPU_SHARES: i64 = 512;
pub const MB_TO_BYTES: i64 = 1_000_000;
pub const DEFAULT_MEMORY_BYTES: i64 = 512 * MB_TO_BYTES;
pub const DEFAULT_PIDS_MAX: i64 = 512;

/// Process-wide configuration passed explicitly rather than read from
/// globals, so tests can redirect the pocky root to a scratch directory.
#[derive(Debug, Clone)]
pub struct PockyConfig {
    pub root: PathBuf,
}

impl Default for PockyConfig {
    fn default() -> Self {
        PockyConfig {
            root: PathBuf::from(DEFAULT_POCKY_ROOT),
        }
    }
}

impl PockyConfig {
    pub fn new(root: PathBuf) -> Self {
        PockyConfig { root }
    }
}

/// Resolved cgroup limits for a container. `Option` fields on the CLI side
/// collapse to these concrete values before the launcher ever forks.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub cpu_shares: i64,
    pub memory_bytes: i64,
    pub pids_max: i64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        ResourceLimits {
            cpu_shares: DEFAULT_CPU_SHARES,
            memory_bytes: DEFAULT_MEMORY_BYTES,
            pids_max: DEFAULT_PIDS_MAX,
        }
    }
}

/// Blank input keeps the default; non-numeric input also keeps the
/// default; an integer is used verbatim. This clarifies the muddled
/// double-call validation in the original source's `handle_num_input`.
pub fn parse_num_input(input: &str) -> Option<i64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_input_keeps_default() {
        assert_eq!(parse_num_input(""), None);
        assert_eq!(parse_num_input("   "), None);
    }

    #[test]
    fn non_numeric_input_keeps_default() {
        assert_eq!(parse_num_input("abc"), None);
    }

    #[test]
    fn numeric_input_is_used_verbatim() {
        assert_eq!(parse_num_input("256"), Some(256));
        assert_eq!(parse_num_input(" 256 "), Some(256));
    }

    #[test]
    fn memory_prompt_multiplies_by_1e6() {
        let mb = parse_num_input("1").unwrap_or(DEFAULT_MEMORY_BYTES / MB_TO_BYTES);
        assert_eq!(mb * MB_TO_BYTES, 1_000_000);
    }
}
