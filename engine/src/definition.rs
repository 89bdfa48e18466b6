//! Block definitions.
//!
//! A [`BlockDefinition`] describes one distinct defer block: which content
//! blocks exist, their timing configuration, and the injected capability that
//! fetches the block's dependencies. Definitions are shared by every instance
//! of the block; the dependency resolver runs at most once per definition.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use latch_types::{ContentRef, DeferState, LoadingConfig, PlaceholderConfig};

/// One pending dependency fetch. Settles with the loaded artifact's success
/// or the fetch error; the core only aggregates outcomes.
pub type DependencyFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Produces the pending dependency fetches for a block definition.
///
/// Injected at definition construction, never a global. The shared load task
/// guarantees `resolve` is invoked at most once per definition.
pub trait DependencyResolver: Send {
    fn resolve(&self) -> Vec<DependencyFuture>;
}

impl<F> DependencyResolver for F
where
    F: Fn() -> Vec<DependencyFuture> + Send,
{
    fn resolve(&self) -> Vec<DependencyFuture> {
        self()
    }
}

/// One distinct defer block, shared across its rendered instances.
pub struct BlockDefinition {
    pub(crate) primary: ContentRef,
    pub(crate) placeholder: Option<ContentRef>,
    pub(crate) loading: Option<ContentRef>,
    pub(crate) error: Option<ContentRef>,
    pub(crate) placeholder_config: PlaceholderConfig,
    pub(crate) loading_config: LoadingConfig,
    pub(crate) resolver: Option<Box<dyn DependencyResolver>>,
}

impl BlockDefinition {
    /// A definition with only primary content: no placeholder, no loading
    /// block, no error block, no dependencies.
    #[must_use]
    pub fn new(primary: ContentRef) -> Self {
        Self {
            primary,
            placeholder: None,
            loading: None,
            error: None,
            placeholder_config: PlaceholderConfig::default(),
            loading_config: LoadingConfig::default(),
            resolver: None,
        }
    }

    #[must_use]
    pub fn with_placeholder(mut self, content: ContentRef, config: PlaceholderConfig) -> Self {
        self.placeholder = Some(content);
        self.placeholder_config = config;
        self
    }

    #[must_use]
    pub fn with_loading(mut self, content: ContentRef, config: LoadingConfig) -> Self {
        self.loading = Some(content);
        self.loading_config = config;
        self
    }

    #[must_use]
    pub fn with_error(mut self, content: ContentRef) -> Self {
        self.error = Some(content);
        self
    }

    /// Inject the dependency-fetching capability. Set at most once.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Box<dyn DependencyResolver>) -> Self {
        debug_assert!(
            self.resolver.is_none(),
            "dependency resolver must be set at most once"
        );
        self.resolver = Some(resolver);
        self
    }

    /// The content block configured for `state`, if any. `Initial` never has
    /// content; `Complete` always renders the primary block.
    pub(crate) fn content_for(&self, state: DeferState) -> Option<ContentRef> {
        match state {
            DeferState::Initial => None,
            DeferState::Placeholder => self.placeholder,
            DeferState::Loading => self.loading,
            DeferState::Complete => Some(self.primary),
            DeferState::Error => self.error,
        }
    }
}

impl fmt::Debug for BlockDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockDefinition")
            .field("primary", &self.primary)
            .field("placeholder", &self.placeholder)
            .field("loading", &self.loading)
            .field("error", &self.error)
            .field("placeholder_config", &self.placeholder_config)
            .field("loading_config", &self.loading_config)
            .field("has_resolver", &self.resolver.is_some())
            .finish()
    }
}
