//! Registry of element factories keyed by [`ElementKind`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{RenderError, Result};

use super::{
    AlcElement, BitConvert, ChannelConvert, ElementKind, FadeElement, RateConvert,
    TransformElement,
};

/// Constructor for one element instance.
pub type ElementFactory = Arc<dyn Fn() -> Box<dyn TransformElement> + Send + Sync>;

/// Pool from which pipelines materialize the elements they were asked for.
#[derive(Clone, Default)]
pub struct ElementPool {
    factories: HashMap<ElementKind, ElementFactory>,
}

impl ElementPool {
    /// Empty pool; every kind must be registered explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool with the built-in conversion, ALC and fade elements.
    pub fn with_defaults() -> Self {
        let mut pool = Self::new();
        pool.register(ElementKind::BitConvert, || Box::new(BitConvert::new()));
        pool.register(ElementKind::ChannelConvert, || Box::new(ChannelConvert::new()));
        pool.register(ElementKind::RateConvert, || Box::new(RateConvert::new()));
        pool.register(ElementKind::Alc, || Box::new(AlcElement::default()));
        pool.register(ElementKind::Fade, || Box::new(FadeElement::default()));
        pool
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register<F>(&mut self, kind: ElementKind, factory: F)
    where
        F: Fn() -> Box<dyn TransformElement> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
    }

    pub fn contains(&self, kind: ElementKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Instantiate an element, failing with `NotSupported` for unknown kinds.
    pub fn create(&self, kind: ElementKind) -> Result<Box<dyn TransformElement>> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| RenderError::NotSupported(format!("no factory registered for {}", kind)))?;
        let element = factory();
        if element.kind() != kind {
            return Err(RenderError::Fail(format!(
                "factory for {} produced a {} element",
                kind,
                element.kind()
            )));
        }
        Ok(element)
    }
}

impl std::fmt::Debug for ElementPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&'static str> = self.factories.keys().map(|kind| kind.name()).collect();
        kinds.sort_unstable();
        f.debug_struct("ElementPool").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_conversions_only() {
        let pool = ElementPool::with_defaults();
        assert!(pool.contains(ElementKind::RateConvert));
        assert!(pool.contains(ElementKind::Fade));
        assert!(!pool.contains(ElementKind::Encoder));
        assert!(matches!(
            pool.create(ElementKind::Eq),
            Err(RenderError::NotSupported(_))
        ));
    }

    #[test]
    fn mismatched_factory_is_rejected() {
        let mut pool = ElementPool::new();
        pool.register(ElementKind::Sonic, || Box::new(AlcElement::default()));
        assert!(matches!(pool.create(ElementKind::Sonic), Err(RenderError::Fail(_))));
    }

    #[test]
    fn debug_lists_registered_kinds() {
        let pool = ElementPool::with_defaults();
        let text = format!("{:?}", pool);
        assert!(text.contains("alc"));
        assert!(text.contains("rate_convert"));
    }
}
