use crate::StorageBackend;

/// Routes storage paths to registered backends.
///
/// Backends are held in ascending [`StorageBackend::priority`] order; ties keep
/// registration order. [`BackendRegistry::route`] walks that order and picks the
/// first backend whose prefix starts the path, so a lower-priority backend shadows
/// higher-priority ones for the prefixes it claims.
#[derive(Default)]
pub struct BackendRegistry {
    backends: Vec<Box<dyn StorageBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `backend`, keeping the priority order.
    pub fn register(&mut self, backend: Box<dyn StorageBackend>) {
        let at = self
            .backends
            .partition_point(|b| b.priority() <= backend.priority());
        self.backends.insert(at, backend);
    }

    /// Resolves `path` to a backend, returning it with the prefix stripped.
    pub fn route<'a, 'p>(
        &'a mut self,
        path: &'p str,
    ) -> Option<(&'a mut dyn StorageBackend, &'p str)> {
        self.backends.iter_mut().find_map(|backend| {
            path.strip_prefix(backend.prefix())
                .map(move |rest| (&mut **backend as &mut dyn StorageBackend, rest))
        })
    }

    /// Backends in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn StorageBackend> {
        self.backends.iter().map(|b| &**b)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
