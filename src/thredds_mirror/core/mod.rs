pub use self::dataset::DatasetEntry;
pub use self::definition::{
    CatalogueSource, DownloadDefinition, FilenameFilter, Output, SinkKind,
};
pub use self::metadata::{DatasetMetadata, Status};

pub mod dataset;
pub mod definition;
pub mod metadata;
