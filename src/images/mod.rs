//! Image seeding and refresh.
//!
//! | Module      | Responsibility                                        |
//! |-------------|-------------------------------------------------------|
//! | `manifest`  | `images.json` descriptors and derived [`ImageSpec`]s  |
//! | `reference` | Splitting and re-tagging image references             |
//! | `transfer`  | Per-layer byte aggregation and pull backends          |
//! | `sync`      | The seed and refresh passes                           |

pub mod manifest;
pub mod reference;
pub mod sync;
pub mod transfer;

pub use manifest::{ImageDescriptor, ImageManifest, ImageSpec, MANIFEST_FILE};
pub use sync::{ImageReport, ImageSynchronizer, SyncDecision, SyncReport, SyncSettings};
pub use transfer::{ApiPull, CliPull, PullBackend, TransferCallback, TransferTracker};
