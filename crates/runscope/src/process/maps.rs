use crate::error::{Error, Result};
use std::fs;
use std::path::PathBuf;

/// A parsed memory mapping from /proc/[pid]/maps
#[derive(Debug, Clone)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    pub perms: String,
    pub offset: u64,
    pub pathname: Option<String>,
}

impl MemoryMapping {
    pub fn is_executable(&self) -> bool {
        self.perms.contains('x')
    }

    /// File-backed, as opposed to [heap], [stack], [vdso] or anonymous.
    fn is_file_backed(&self) -> bool {
        self.pathname.as_deref().is_some_and(|p| p.starts_with('/'))
    }
}

/// A file mapped with at least one executable segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub path: PathBuf,
    /// Load bias candidate: start - offset of the file's first mapping
    pub base: u64,
    /// Executable address ranges of this file
    pub text: Vec<(u64, u64)>,
}

impl Module {
    pub fn contains(&self, addr: u64) -> bool {
        self.text.iter().any(|&(start, end)| addr >= start && addr < end)
    }
}

/// Collection of memory mappings for a process
pub struct MemoryMaps {
    mappings: Vec<MemoryMapping>,
}

impl MemoryMaps {
    /// Parse /proc/[pid]/maps
    pub fn for_pid(pid: u32) -> Result<Self> {
        let path = format!("/proc/{}/maps", pid);
        let content = fs::read_to_string(&path).map_err(|e| {
            Error::ProcessNotFound(format!("Cannot read maps for PID {}: {}", pid, e))
        })?;

        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        MemoryMaps {
            mappings: content.lines().filter_map(Self::parse_line).collect(),
        }
    }

    fn parse_line(line: &str) -> Option<MemoryMapping> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 {
            return None;
        }

        // Parse address range "start-end"
        let (start, end) = parts[0].split_once('-')?;
        let start = u64::from_str_radix(start, 16).ok()?;
        let end = u64::from_str_radix(end, 16).ok()?;
        let perms = parts[1].to_string();
        let offset = u64::from_str_radix(parts[2], 16).ok()?;

        // Pathname is the last field (if present)
        let pathname = if parts.len() >= 6 {
            Some(parts[5..].join(" "))
        } else {
            None
        };

        Some(MemoryMapping {
            start,
            end,
            perms,
            offset,
            pathname,
        })
    }

    pub fn mappings(&self) -> &[MemoryMapping] {
        &self.mappings
    }

    /// Group executable file mappings by file, in address order.
    ///
    /// The base uses the FIRST mapping of each file (any permission): it
    /// normally has file offset 0, so `start - offset` is the load address
    /// of the whole image. The r-x segment alone would give a wrong base
    /// because its file offset is non-zero.
    pub fn modules(&self) -> Vec<Module> {
        let mut modules: Vec<Module> = Vec::new();

        for mapping in self.mappings.iter().filter(|m| m.is_file_backed()) {
            let Some(pathname) = mapping.pathname.as_deref() else {
                continue;
            };
            let path = PathBuf::from(pathname.trim_end_matches(" (deleted)"));

            let index = match modules.iter().position(|m| m.path == path) {
                Some(index) => index,
                None => {
                    modules.push(Module {
                        path,
                        base: mapping.start.saturating_sub(mapping.offset),
                        text: Vec::new(),
                    });
                    modules.len() - 1
                }
            };

            if mapping.is_executable() {
                modules[index].text.push((mapping.start, mapping.end));
            }
        }

        modules.retain(|m| !m.text.is_empty());
        modules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPS: &str = "\
5581a0c00000-5581a0c05000 r--p 00000000 fd:01 131 /usr/bin/target
5581a0c05000-5581a0c20000 r-xp 00005000 fd:01 131 /usr/bin/target
5581a0c20000-5581a0c28000 r--p 00020000 fd:01 131 /usr/bin/target
5581a2000000-5581a2021000 rw-p 00000000 00:00 0 [heap]
7f10a0000000-7f10a0028000 r--p 00000000 fd:01 200 /usr/lib/libc.so.6
7f10a0028000-7f10a01bd000 r-xp 00028000 fd:01 200 /usr/lib/libc.so.6
7f10a0400000-7f10a0401000 r-xp 00000000 00:00 0
7ffc1e9f0000-7ffc1e9f2000 r-xp 00000000 00:00 0 [vdso]
";

    #[test]
    fn test_parse_lines() {
        let maps = MemoryMaps::parse(MAPS);
        assert_eq!(maps.mappings().len(), 8);

        let heap = &maps.mappings()[3];
        assert_eq!(heap.pathname.as_deref(), Some("[heap]"));
        assert!(!heap.is_executable());
        assert_eq!(maps.mappings()[6].pathname, None);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let maps = MemoryMaps::parse("garbage\nzz-10 r-xp 0 00:00 0\n");
        assert!(maps.mappings().is_empty());
    }

    #[test]
    fn test_modules_group_by_file() {
        let maps = MemoryMaps::parse(MAPS);
        let modules = maps.modules();
        assert_eq!(modules.len(), 2);

        let exe = &modules[0];
        assert_eq!(exe.path, PathBuf::from("/usr/bin/target"));
        assert_eq!(exe.base, 0x5581a0c00000);
        assert_eq!(exe.text, vec![(0x5581a0c05000, 0x5581a0c20000)]);
        assert!(exe.contains(0x5581a0c05010));
        assert!(!exe.contains(0x5581a0c00010));

        assert_eq!(modules[1].path, PathBuf::from("/usr/lib/libc.so.6"));
        assert_eq!(modules[1].base, 0x7f10a0000000);
    }
}
