//! filelu-fs: hierarchical paths over FileLu's flat, id-addressed storage
//!
//! ```no_run
//! use filelu_fs::providers::{FileLuConfig, FileLuProvider};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), filelu_fs::providers::ProviderError> {
//! let fs = FileLuProvider::new(FileLuConfig::new("my-key"))?;
//! let cancel = CancellationToken::new();
//! for entry in fs.list("docs", &cancel).await? {
//!     println!("{}", entry.path);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod providers;

pub use providers::{FileLuProvider, ProviderError, StorageProvider};

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
/// Library code only emits events; binaries call this once at startup.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
