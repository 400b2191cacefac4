//! CLI commands implementation

pub mod init;
pub mod inspect;
pub mod run;
pub mod summary;

pub use init::*;
pub use inspect::*;
pub use run::*;
pub use summary::*;
