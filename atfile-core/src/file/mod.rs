//! The file module is the host side's only window onto the file system.
//!
//! ## Architecture
//!
//! ### ignore.rs
//! Compiles gitignore-style globs into an [`ignore::IgnoreMatcher`]:
//! - User rules come from the workspace `.gitignore` plus configured extras
//! - A fixed built-in set (dependencies, build output, VCS/IDE metadata,
//!   lockfiles, archives, minified files) is always appended and cannot be
//!   negated
//! - Malformed globs degrade to rules that never match
//!
//! ### workspace.rs
//! Enumerates and resolves files for one workspace root:
//! - Listings are ignore-filtered, sorted and capped snapshots
//! - Reads and writes are keyed by a bare or partial file name; the first
//!   match in listing order wins, `matches` exposes the whole set
//! - A write with no match creates the file at the workspace root
//! - Files in ignored locations appear non-existent
//!
//! ### error.rs
//! The `FileError` taxonomy shared by reads and writes.

pub mod error;
pub mod ignore;
pub mod workspace;

pub use error::FileError;
pub use ignore::IgnoreMatcher;
pub use workspace::{Workspace, WorkspaceFile, WriteOutcome};
