//! Multi-step workflows built from coordinator primitives. Calls are issued
//! one after another; nothing here is transactional.

pub mod backup;
pub mod diff_patch;
pub mod edit_run;
pub mod find_replace;
pub mod script;

pub use backup::BackupOutcome;
pub use diff_patch::{DiffSource, LineChanges, PatchOutcome, PatchTarget};
pub use edit_run::EditRunOutcome;
pub use find_replace::{FindReplace, FindReplaceReport, SkipReason, SkippedFile};
pub use script::{ScriptOutcome, ScriptRequest};
