mod elf;
mod resolver;

pub use elf::SymbolTable;
pub use resolver::{SymbolResolver, demangle, format_address};
