use crate::error::{Error, Result};
use object::{Object, ObjectKind, ObjectSymbol, SymbolKind};
use std::fs::File;
use std::path::Path;

#[derive(Debug, Clone)]
struct Symbol {
    address: u64,
    size: u64,
    name: String,
}

/// Function symbols of one object file, sorted by address
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    relocatable: bool,
}

impl SymbolTable {
    /// Read `.symtab` and `.dynsym` function symbols from an object file
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { memmap2::Mmap::map(&file) }?;

        let object = object::File::parse(&*mmap).map_err(|e| {
            Error::SymbolResolution(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        let entries = object
            .symbols()
            .chain(object.dynamic_symbols())
            .filter(|s| s.kind() == SymbolKind::Text && s.address() != 0)
            .filter_map(|s| {
                let name = s.name().ok()?;
                (!name.is_empty()).then(|| (s.address(), s.size(), super::demangle(name)))
            });

        let mut table = Self::from_entries(entries);
        // Shared objects and PIE executables are ET_DYN and get relocated.
        table.relocatable = object.kind() == ObjectKind::Dynamic;
        Ok(table)
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (u64, u64, String)>) -> Self {
        let mut symbols: Vec<Symbol> = entries
            .into_iter()
            .map(|(address, size, name)| Symbol {
                address,
                size,
                name,
            })
            .collect();

        // .symtab and .dynsym overlap; keep one name per address, preferring
        // the entry that knows its size.
        symbols.sort_by(|a, b| a.address.cmp(&b.address).then(b.size.cmp(&a.size)));
        symbols.dedup_by_key(|s| s.address);

        SymbolTable {
            symbols,
            relocatable: false,
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Whether runtime addresses must have the load bias subtracted
    pub fn is_relocatable(&self) -> bool {
        self.relocatable
    }

    /// Nearest symbol at or below `addr` that covers it. Symbols without a
    /// recorded size match anything up to the next symbol.
    pub fn lookup(&self, addr: u64) -> Option<&str> {
        let idx = self.symbols.partition_point(|s| s.address <= addr);
        let symbol = self.symbols.get(idx.checked_sub(1)?)?;
        if symbol.size > 0 && addr >= symbol.address.saturating_add(symbol.size) {
            return None;
        }
        Some(&symbol.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SymbolTable {
        SymbolTable::from_entries(vec![
            (0x2000, 0x40, "beta".to_string()),
            (0x1000, 0x100, "alpha".to_string()),
            (0x3000, 0, "gamma".to_string()),
            (0x1000, 0, "alpha_alias".to_string()),
        ])
    }

    #[test]
    fn test_lookup_within_size() {
        let table = table();
        assert_eq!(table.len(), 3);
        assert_eq!(table.lookup(0x1000), Some("alpha"));
        assert_eq!(table.lookup(0x10ff), Some("alpha"));
        assert_eq!(table.lookup(0x2010), Some("beta"));
    }

    #[test]
    fn test_lookup_gaps() {
        let table = table();
        assert_eq!(table.lookup(0xfff), None);
        // Past the end of alpha but before beta
        assert_eq!(table.lookup(0x1100), None);
        assert_eq!(table.lookup(0x2040), None);
    }

    #[test]
    fn test_unsized_symbol_extends_to_next() {
        let table = table();
        assert_eq!(table.lookup(0x3000), Some("gamma"));
        assert_eq!(table.lookup(0x9000), Some("gamma"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_load_own_executable() {
        let exe = std::env::current_exe().unwrap();
        let table = SymbolTable::load(&exe).unwrap();
        assert!(!table.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let err = SymbolTable::load(Path::new("/nonexistent/runscope-binary")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
