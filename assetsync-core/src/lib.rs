mod client;
mod rows;

pub use client::{ApiErrorClass, RemoteError, RemoteStoreClient};
pub use rows::{AssetRow, FolderRow, LicensingRow, OwnerRow, ProjectRow};
