//! Background worker queues (spec §2 "Worker queues", §4.9-§4.10):
//! the data importer, data-item indexer, background verification, and
//! offset repair workers, all built on a shared cancellable
//! polling-queue scaffold.

pub mod background_verification;
pub mod data_importer;
pub mod data_item_indexer;
pub mod offset_repair;
pub mod scaffold;
pub mod writer;

pub use background_verification::{FsCacheVerificationQueue, VerificationProcessor};
pub use data_importer::{DataImporterProcessor, PendingImport, PendingImportQueue};
pub use data_item_indexer::{DataItemIndexerProcessor, PendingBundleIndex, PendingIndexQueue};
pub use offset_repair::{OffsetRepairProcessor, PendingOffsetRepair, PendingRepairQueue};
pub use scaffold::{ItemProcessor, PollingQueue, PollingWorker, WorkerConfig, WorkerError};
pub use writer::RootTxIndexWriter;
