use super::elf::SymbolTable;
#[cfg(target_os = "linux")]
use crate::process::{MemoryMaps, Module};
use std::collections::HashMap;
use std::ffi::CStr;

/// Cached resolutions kept before the cache starts over
pub const CACHE_CAPACITY: usize = 4096;

#[cfg(target_os = "linux")]
enum TableState {
    Unloaded,
    Loaded(SymbolTable),
    Unavailable,
}

#[cfg(target_os = "linux")]
struct TargetModule {
    module: Module,
    table: TableState,
}

/// Best-effort address-to-name resolution for one target.
///
/// Lookup order: the target's own ELF symbol tables (Linux, loaded lazily
/// per module), then `dladdr` in the profiler's address space, then the
/// hex address. Resolution never fails. Results are cached per address, up
/// to [`CACHE_CAPACITY`] entries.
#[derive(Default)]
pub struct SymbolResolver {
    #[cfg(target_os = "linux")]
    modules: Vec<TargetModule>,
    cache: HashMap<u64, String>,
}

impl SymbolResolver {
    /// A resolver with no target-side symbol tables
    pub fn new() -> Self {
        Self::default()
    }

    /// A resolver for the executable mappings of `pid`. Unreadable maps only
    /// cost the target-side lookup step.
    pub fn for_process(pid: u32) -> Self {
        #[cfg(target_os = "linux")]
        {
            let modules = match MemoryMaps::for_pid(pid) {
                Ok(maps) => maps
                    .modules()
                    .into_iter()
                    .map(|module| TargetModule {
                        module,
                        table: TableState::Unloaded,
                    })
                    .collect(),
                Err(e) => {
                    log::warn!("no target symbol tables for PID {}: {}", pid, e);
                    Vec::new()
                }
            };
            log::debug!("found {} executable modules in PID {}", modules.len(), pid);
            SymbolResolver {
                modules,
                cache: HashMap::new(),
            }
        }
        #[cfg(not(target_os = "linux"))]
        {
            log::debug!("target symbol tables unsupported here, PID {} uses dladdr", pid);
            Self::new()
        }
    }

    /// Number of executable modules known in the target
    pub fn module_count(&self) -> usize {
        #[cfg(target_os = "linux")]
        {
            self.modules.len()
        }
        #[cfg(not(target_os = "linux"))]
        {
            0
        }
    }

    /// Number of cached resolutions
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// Resolve an address to a demangled function name or `0x<hex>`.
    pub fn resolve(&mut self, addr: u64) -> String {
        if let Some(name) = self.cache.get(&addr) {
            return name.clone();
        }

        let name = self
            .target_lookup(addr)
            .or_else(|| dladdr_lookup(addr))
            .unwrap_or_else(|| format_address(addr));
        if self.cache.len() >= CACHE_CAPACITY {
            log::debug!("symbol cache full, dropping {} entries", self.cache.len());
            self.cache.clear();
        }
        self.cache.insert(addr, name.clone());
        name
    }

    #[cfg(target_os = "linux")]
    fn target_lookup(&mut self, addr: u64) -> Option<String> {
        let target = self.modules.iter_mut().find(|m| m.module.contains(addr))?;

        if matches!(target.table, TableState::Unloaded) {
            target.table = match SymbolTable::load(&target.module.path) {
                Ok(table) => {
                    log::debug!(
                        "loaded {} symbols from {}",
                        table.len(),
                        target.module.path.display()
                    );
                    TableState::Loaded(table)
                }
                Err(e) => {
                    log::warn!("cannot read symbols of {}: {}", target.module.path.display(), e);
                    TableState::Unavailable
                }
            };
        }

        let TableState::Loaded(table) = &target.table else {
            return None;
        };
        let bias = if table.is_relocatable() {
            target.module.base
        } else {
            0
        };
        table.lookup(addr.wrapping_sub(bias)).map(str::to_string)
    }

    #[cfg(not(target_os = "linux"))]
    fn target_lookup(&mut self, _addr: u64) -> Option<String> {
        None
    }
}

/// Name of the symbol containing `addr` in this process, via `dladdr`
fn dladdr_lookup(addr: u64) -> Option<String> {
    let ptr = usize::try_from(addr).ok()? as *const libc::c_void;
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    // SAFETY: dladdr only inspects loader bookkeeping, never dereferences addr.
    let found = unsafe { libc::dladdr(ptr, &mut info) };
    if found == 0 || info.dli_sname.is_null() {
        return None;
    }
    // SAFETY: dli_sname is a NUL-terminated string owned by the loader.
    let raw = unsafe { CStr::from_ptr(info.dli_sname) }.to_string_lossy();
    Some(demangle(&raw))
}

/// Demangle a Rust symbol without its hash; other names pass through.
pub fn demangle(name: &str) -> String {
    format!("{:#}", rustc_demangle::demangle(name))
}

/// Fallback name for an unresolved address
pub fn format_address(addr: u64) -> String {
    format!("0x{:x}", addr)
}
