use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use tracing::debug;

use crate::{BoxError, IngestError, RowSource};

/// Named parameters passed to a [RowSourceFactory].
pub type SourceParams = ahash::HashMap<String, String>;

/// Creates row sources from a set of parameters.
pub trait RowSourceFactory: Send + Sync {
    fn create(&self, params: &SourceParams) -> Result<Box<dyn RowSource>, BoxError>;
}

impl<F> RowSourceFactory for F
where
    F: Fn(&SourceParams) -> Result<Box<dyn RowSource>, BoxError> + Send + Sync,
{
    fn create(&self, params: &SourceParams) -> Result<Box<dyn RowSource>, BoxError> {
        (self)(params)
    }
}

#[derive(Default, Clone)]
/// A set of row source factories looked up by name.
///
/// The registry is an ordinary value, callers build it once and hand it to
/// whatever needs to create sources.
pub struct SourceRegistry {
    factories: ahash::HashMap<String, Arc<dyn RowSourceFactory>>,
}

impl Debug for SourceRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.names())
            .finish()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under the given name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl RowSourceFactory + 'static,
    ) -> Result<(), IngestError> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(IngestError::DuplicateSource(name));
        }

        debug!(source = %name, "Registered row source");
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    /// Creates a new row source using the factory registered as `name`.
    pub fn create(
        &self,
        name: &str,
        params: &SourceParams,
    ) -> Result<Box<dyn RowSource>, IngestError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| IngestError::UnknownSource(name.to_string()))?;
        factory.create(params).map_err(IngestError::Source)
    }

    /// The registered source names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
