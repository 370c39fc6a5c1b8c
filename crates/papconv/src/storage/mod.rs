pub mod artifacts;
pub mod uploads;

pub use artifacts::{ArtifactFile, ArtifactStore, ChunkRecord, ImageRecord, TableRecord};
pub use uploads::{FileStore, StoredFile, UploadStore};
