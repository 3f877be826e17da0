// Rewind Kernel
//
// Compensating rollback for schema operations executed against a
// non-transactional, distributed table store.

pub mod backend;
pub mod config;
pub mod ctx;
pub mod diagnostics;
pub mod log;
pub mod names;
pub mod simulate;
