pub mod images;
pub mod metadata;

pub use images::{IMAGE_EXT, ImageLocation, ImageStore};
pub use metadata::{ImageListing, MetadataStore};
