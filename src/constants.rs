//! Core constants used in validation.

/// The maximum number of pages of a linear memory, declared or imported.
/// A page is 64KiB, so this bounds memories to 4GiB.
pub const MAX_MEMORY_PAGES: u64 = 65536;

/// Ceiling for the size of a table defined by the module itself.
pub const MAX_TABLE_ELEMS: u64 = u32::MAX as u64;

/// Ceiling for the size of an imported table. Imported tables are backed by
/// host storage and are only bounded by the address space.
pub const MAX_IMPORTED_TABLE_ELEMS: u64 = usize::MAX as u64;
