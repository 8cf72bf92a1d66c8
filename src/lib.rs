//! # iris-meta
//!
//! Metadata store for iris photographs. Annotations (overlay position, view
//! position, image adjustments, comments, person) live inside the JPEG itself,
//! in its XMP packet and mirrored into standard EXIF tags, so they travel with
//! the file.
//!
//! ## Quick Start
//!
//! All reads and writes go through one [`sync::SyncCoordinator`]. Writes are
//! fire-and-forget; the coordinator rewrites files in the background, merges
//! bursts of edits to the same photo, and never leaves a half-written file.
//!
//! ```rust,no_run
//! use iris_meta::config::Config;
//! use iris_meta::sync::{SyncCoordinator, SyncEvent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Some("config.json".as_ref()))?;
//!     let coordinator = SyncCoordinator::builder().from_config(&config).build()?;
//!     let mut events = coordinator.subscribe();
//!
//!     let mut metadata = coordinator.get("photos/right.jpg")?;
//!     metadata.x_center = Some(0.51);
//!     metadata.y_center = Some(0.47);
//!     metadata.overlay_scale_factor = Some(0.88);
//!     coordinator.store("photos/right.jpg", metadata);
//!
//!     // Reads see the new value right away, before it is on disk
//!     assert_eq!(coordinator.get("photos/right.jpg")?.x_center, Some(0.51));
//!
//!     match events.recv().await? {
//!         SyncEvent::Stored { path } => println!("Saved {}", path.display()),
//!         SyncEvent::Failed { path, reason } => eprintln!("{}: {reason}", path.display()),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Lower-Level Usage
//!
//! The codec can be used on its own. It only produces bytes; it never
//! touches the file:
//!
//! ```rust,no_run
//! use iris_meta::config::StoreOption;
//! use iris_meta::exif::{JpegCodec, MetadataCodec, WriteStrategy};
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let codec = JpegCodec::new(StoreOption::XmpOnly);
//!     let path = Path::new("photos/left.jpg");
//!
//!     let mut metadata = codec.read(path)?;
//!     metadata.comment = Some("lacuna at 2 o'clock".into());
//!     let bytes = codec.write(path, &metadata, WriteStrategy::Lossless)?;
//!     std::fs::write("photos/left-annotated.jpg", bytes)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration types and loading/saving
//! - [`error`]: Error types of the codec and the sync engine
//! - [`exif`]: EXIF/XMP reading and writing
//! - [`files`]: Image collection and path normalization
//! - [`metadata`]: The metadata record
//! - [`sync`]: Coalesced, crash-safe background rewrites

pub mod config;
pub mod error;
pub mod exif;
pub mod files;
pub mod metadata;
pub mod sync;
