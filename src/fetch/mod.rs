pub mod files;
pub mod urls;

pub use files::{download_file, download_file_with_policy, ArtifactClass, DownloadPolicy};
pub use urls::resolve_direct_url;
