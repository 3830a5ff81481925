//! Construct-once client cell.

use crate::client::{ClientFactory, SecretSource};
use crate::config::InfisicalOptions;
use crate::error::ProviderError;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Builds the client on first use and hands out the same instance afterwards.
///
/// Concurrent first callers race on a single compare-and-initialize; exactly
/// one runs the factory and the rest wait for its result. A failed
/// construction leaves the cell empty so the next use retries.
pub(crate) struct LazyClient {
    options: InfisicalOptions,
    factory: ClientFactory,
    cell: OnceCell<Arc<dyn SecretSource>>,
    released: AtomicBool,
}

impl LazyClient {
    pub(crate) fn new(options: InfisicalOptions, factory: ClientFactory) -> Self {
        Self {
            options,
            factory,
            cell: OnceCell::new(),
            released: AtomicBool::new(false),
        }
    }

    pub(crate) fn get(&self) -> Result<Arc<dyn SecretSource>, ProviderError> {
        self.cell
            .get_or_try_init(|| {
                debug!("Constructing Infisical client for {}", self.options.site_url);
                (self.factory)(&self.options)
            })
            .map(Arc::clone)
    }

    /// The client if it was constructed. Never constructs one.
    pub(crate) fn created(&self) -> Option<&Arc<dyn SecretSource>> {
        self.cell.get()
    }

    /// Close the client if it was constructed. At most one call closes it;
    /// returns whether this call did.
    pub(crate) fn release(&self) -> bool {
        let Some(client) = self.cell.get() else {
            return false;
        };
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        client.close();
        true
    }
}
