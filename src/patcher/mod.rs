//! The patch orchestrator.
//!
//! A [`PatchSession`] drives one run against one game folder:
//!
//! 1. discover the [`GameLayout`] and create the working folders
//! 2. back up the primary binary on the first run ([`BackupStore`])
//! 3. load the primary binary and parse and compile every patch source, in parallel
//! 4. apply the compiled patches grouped by target binary, secondary binaries loaded lazily
//!    and backed up on first touch
//! 5. write every changed binary through the [`crate::module::WriteGate`]
//!
//! Per-patch failures end up in the [`PatchReport`] without stopping the run.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cilpatch::prelude::*;
//! use std::path::Path;
//!
//! # fn run(store: &dyn ModuleStore) -> cilpatch::Result<()> {
//! let compiler = CommandCompiler::new(CompilerKind::Mcs);
//! let session = PatchSession::new(PatcherConfig::default(), store, &compiler);
//!
//! let report = session.patch(Path::new("/games/Demo"))?;
//! println!("{} patches injected", report.injected_count());
//! # Ok(())
//! # }
//! ```

mod backup;
mod config;
mod layout;
mod report;
mod session;

pub use backup::BackupStore;
pub use config::PatcherConfig;
pub use layout::GameLayout;
pub use report::{Failure, PatchOutcome, PatchRecord, PatchReport};
pub use session::PatchSession;
