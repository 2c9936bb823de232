//! # mavenize
//!
//! Turn an assembled JAR into one that looks like Maven built it.
//!
//! The input JAR is copied byte for byte to the output path, then two
//! entries are appended to the copy without rewriting anything before
//! the archive's central directory:
//!
//! - `META-INF/maven/<groupId>/<artifactId>/pom.xml`, the descriptor verbatim
//! - `META-INF/maven/<groupId>/<artifactId>/pom.properties`, a generated
//!   stamp with the coordinates
//!
//! Coordinates come from the second, third and fourth child elements of
//! the descriptor's root.
//!
//! ## Example
//!
//! ```no_run
//! use mavenize::{HostClock, RepackConfig, Repackager};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RepackConfig::new("lib-maven.jar", "lib.jar", "pom.xml")?;
//!     let summary = Repackager::new(HostClock::new()).run(&config).await?;
//!     println!("added {}", summary.pom_entry);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod clock;
pub mod io;
pub mod pom;
pub mod repack;
pub mod zip;

pub use cli::Cli;
pub use clock::{Clock, FixedClock, HostClock};
pub use io::{LocalFileReader, ReadAt};
pub use pom::{Coordinates, PomDescriptor};
pub use repack::{RepackConfig, RepackSummary, Repackager, pom_properties};
pub use crate::zip::{ZipAppender, ZipFileEntry};
