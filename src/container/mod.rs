//! Typed dataset container format: fixed header, image or table sub-header,
//! row-major f32 payload.

pub mod file;
pub mod layout;

pub use file::{decode_values, encode_values, DatasetFile, IMAGE_INPUT_COLUMN, IMAGE_OUTPUT_COLUMN};
pub use layout::{
    ColumnEntry, ContainerHeader, DatasetKind, ImageHeader, TableHeader, TypeHeader,
};
