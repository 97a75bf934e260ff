//! Metadata containers and file I/O.

pub mod loaders;
pub mod npy;
pub mod writers;

pub use loaders::{load_cs, load_star, parse_star, StarBlock, StarDocument, StarError, StarTable};
pub use npy::{CsDataset, NpyError};
pub use writers::{make_backup, persist_cs, write_groups_csv, write_star, WriteError};
