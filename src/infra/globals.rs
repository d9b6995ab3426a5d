//! # Global Leak Detection / 全局泄漏检测
//!
//! The process environment is the closest thing a Rust process has to a
//! global namespace that test bodies can pollute. With leak checking on, the
//! runner snapshots the variable names at run start and reports any new name
//! that is not allow-listed. A trailing `*` in an allow-list entry matches by
//! prefix.
//!
//! 进程环境变量是 Rust 进程中最接近“全局命名空间”的东西。开启泄漏检查时，
//! 运行器在开始时记录变量名快照，并报告任何未列入允许列表的新名称。
//! 允许列表条目末尾的 `*` 表示按前缀匹配。

use std::env;

/// Names of all variables currently in the process environment.
pub fn env_names() -> Vec<String> {
    let mut names: Vec<String> = env::vars_os()
        .map(|(key, _)| key.to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Whether `name` is covered by one of `patterns`.
pub fn is_allowed(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| match pattern.split_once('*') {
        Some((prefix, _)) => name.starts_with(prefix),
        None => name == pattern,
    })
}

/// Names in `current` not covered by `allowed`.
pub fn filter_leaks(allowed: &[String], current: &[String]) -> Vec<String> {
    current
        .iter()
        .filter(|name| !name.starts_with(|c: char| c.is_ascii_digit()))
        .filter(|name| !is_allowed(name, allowed))
        .cloned()
        .collect()
}

/// Tracks known names across a run so that each leak is reported once.
/// 在整个运行期间跟踪已知名称，使每个泄漏只报告一次。
#[derive(Debug, Clone, Default)]
pub struct LeakDetector {
    known: Vec<String>,
    prev_len: usize,
}

impl LeakDetector {
    /// Snapshots the environment; `allow` is added to the known names.
    pub fn new(allow: &[String]) -> Self {
        let mut known = env_names();
        let prev_len = known.len();
        known.extend(allow.iter().cloned());
        Self { known, prev_len }
    }

    /// Returns names leaked since the last check, with `extra` also allowed.
    pub fn check(&mut self, extra: &[String]) -> Vec<String> {
        self.check_names(&env_names(), extra)
    }

    fn check_names(&mut self, current: &[String], extra: &[String]) -> Vec<String> {
        if current.len() == self.prev_len {
            return Vec::new();
        }
        self.prev_len = current.len();
        let mut allowed = self.known.clone();
        allowed.extend(extra.iter().cloned());
        let leaks = filter_leaks(&allowed, current);
        self.known.extend(leaks.iter().cloned());
        leaks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn wildcard_matches_prefix() {
        let allow = names(&["HOME", "CARGO_*"]);
        assert!(is_allowed("HOME", &allow));
        assert!(is_allowed("CARGO_PKG_NAME", &allow));
        assert!(!is_allowed("HOMEPAGE", &allow));
    }

    #[test]
    fn leaks_are_reported_once() {
        let mut detector = LeakDetector {
            known: names(&["PATH", "HOME"]),
            prev_len: 2,
        };
        assert!(detector.check_names(&names(&["HOME", "PATH"]), &[]).is_empty());

        let leaks = detector.check_names(&names(&["HOME", "PATH", "LEAKED"]), &[]);
        assert_eq!(leaks, names(&["LEAKED"]));

        let leaks = detector.check_names(&names(&["HOME", "PATH", "LEAKED", "OTHER"]), &[]);
        assert_eq!(leaks, names(&["OTHER"]));
    }

    #[test]
    fn per_test_allow_list() {
        let mut detector = LeakDetector {
            known: names(&["PATH"]),
            prev_len: 1,
        };
        let leaks = detector.check_names(&names(&["PATH", "SESSION_ID"]), &names(&["SESSION_*"]));
        assert!(leaks.is_empty());
    }
}
