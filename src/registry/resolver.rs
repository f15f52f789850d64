use crate::error::{LineageError, Result};
use crate::record::{split_tag, BuildFact};
use crate::registry::source::{HttpLayerSource, LayerInfo, LayerSource};
use crate::{log_registry_lookup, log_size_cache_hit};
use std::collections::{HashMap, HashSet};

/// Sizes attributed to one build's image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerSizes {
    /// Own layer plus every parent layer
    pub total: u64,
    /// Own layer only
    pub own: u64,
}

/// Anything able to put a size on a build. Lookups never fail: an unknown
/// size is `LayerSizes::default()`.
pub trait SizeOracle {
    fn resolve(&mut self, fact: &BuildFact) -> LayerSizes;
}

#[derive(Debug, Clone)]
struct CachedLayer {
    /// Image name the layer was found under
    image: String,
    info: LayerInfo,
    /// Size of this layer and all its parents, once known
    chain_total: Option<u64>,
}

/// Memoized registry answers for one run
#[derive(Debug, Default)]
pub struct SizeCache {
    layers: HashMap<String, CachedLayer>,
    by_name: HashMap<String, u64>,
    by_image_id: HashMap<String, LayerSizes>,
}

impl SizeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image name a layer id was resolved under
    pub fn image_for_layer(&self, layer_id: &str) -> Option<&str> {
        self.layers.get(layer_id).map(|l| l.image.as_str())
    }

    /// Total size recorded for a `Name:Version-Release` display name
    pub fn size_for_name(&self, name: &str) -> Option<u64> {
        self.by_name.get(name).copied()
    }

    pub fn size_for_image_id(&self, image_id: &str) -> Option<LayerSizes> {
        self.by_image_id.get(image_id).copied()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Fetch one layer, answering from the cache when possible
    fn layer(
        &mut self,
        source: &dyn LayerSource,
        image: &str,
        layer_id: &str,
    ) -> Result<LayerInfo> {
        if let Some(cached) = self.layers.get(layer_id) {
            log_size_cache_hit!("layer", layer_id, cached.info.size);
            return Ok(cached.info.clone());
        }

        log_registry_lookup!(image, layer_id);
        let info = source.layer(image, layer_id)?;
        self.layers.insert(
            layer_id.to_string(),
            CachedLayer {
                image: image.to_string(),
                info: info.clone(),
                chain_total: None,
            },
        );
        Ok(info)
    }

    /// Fetch a parent layer whose repository is not known up front. Tries
    /// the preferred image (where its child lived), then each candidate.
    fn parent_layer(
        &mut self,
        source: &dyn LayerSource,
        preferred: Option<&str>,
        candidates: &[&str],
        layer_id: &str,
    ) -> Result<LayerInfo> {
        if let Some(cached) = self.layers.get(layer_id) {
            return Ok(cached.info.clone());
        }

        let mut tried = HashSet::new();
        let mut last_err = None;
        for image in preferred.iter().chain(candidates.iter()) {
            if !tried.insert(*image) {
                continue;
            }
            match self.layer(source, image, layer_id) {
                Ok(info) => return Ok(info),
                Err(e) => {
                    tracing::debug!(
                        image = %image,
                        layer = %layer_id,
                        error = %e,
                        "Parent not in repository"
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| LineageError::MalformedLayer {
            layer_id: layer_id.to_string(),
            reason: "no repository to look up parent in".to_string(),
        }))
    }

    /// Size of `layer_id` and everything below it
    fn chain_total(
        &mut self,
        source: &dyn LayerSource,
        candidates: &[&str],
        layer_id: &str,
    ) -> Result<u64> {
        let mut pending: Vec<(String, u64)> = Vec::new();
        let mut visited = HashSet::new();
        let mut below = 0;
        let mut current = Some(layer_id.to_string());
        let mut preferred: Option<String> = None;

        while let Some(id) = current.take() {
            if let Some(total) = self.layers.get(&id).and_then(|l| l.chain_total) {
                log_size_cache_hit!("chain", id, total);
                below = total;
                break;
            }
            // A layer naming itself as an ancestor would never terminate
            if !visited.insert(id.clone()) {
                break;
            }
            let info = self.parent_layer(source, preferred.as_deref(), candidates, &id)?;
            preferred = self.image_for_layer(&id).map(str::to_string);
            current = info.parent.clone();
            pending.push((id, info.size));
        }

        let mut total = below;
        for (id, size) in pending.into_iter().rev() {
            total += size;
            if let Some(cached) = self.layers.get_mut(&id) {
                cached.chain_total = Some(total);
            }
        }
        Ok(total)
    }

    /// Walk the repository listing until a layer carries the expected name
    fn scan_for_layer(
        &mut self,
        source: &dyn LayerSource,
        image: &str,
        expected: &str,
    ) -> Result<LayerInfo> {
        let candidates = source.list_layers(image)?;
        tracing::debug!(
            image = %image,
            candidates = candidates.len(),
            expected = %expected,
            "Scanning repository listing"
        );

        for id in candidates {
            match self.layer(source, image, &id) {
                Ok(info) if info.display_name.as_deref() == Some(expected) => return Ok(info),
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(layer = %id, error = %e, "Skipping unreadable layer");
                }
            }
        }

        Err(LineageError::NoMatchingLayer {
            repo: image.to_string(),
            expected: expected.to_string(),
        })
    }
}

/// Registry-backed size lookups with a per-run cache.
///
/// Without a registry the build's own uploaded-archive size hint is used.
pub struct SizeResolver {
    source: Option<Box<dyn LayerSource>>,
    cache: SizeCache,
}

impl SizeResolver {
    pub fn new(source: Box<dyn LayerSource>) -> Self {
        Self {
            source: Some(source),
            cache: SizeCache::new(),
        }
    }

    /// Resolver with no registry configured
    pub fn offline() -> Self {
        Self {
            source: None,
            cache: SizeCache::new(),
        }
    }

    /// HTTP-backed resolver when a base URL is given, offline otherwise
    pub fn from_registry_url(base_url: Option<&str>) -> Self {
        match base_url {
            Some(url) if !url.trim().is_empty() => {
                Self::new(Box::new(HttpLayerSource::new(url)))
            }
            _ => Self::offline(),
        }
    }

    pub fn cache(&self) -> &SizeCache {
        &self.cache
    }

    fn lookup(
        source: &dyn LayerSource,
        cache: &mut SizeCache,
        fact: &BuildFact,
    ) -> Result<LayerSizes> {
        let (image, _) = split_tag(&fact.lookup_image);
        let (base, _) = split_tag(&fact.base_image);

        let layer = match cache.layer(source, image, &fact.image_id) {
            Ok(layer) => layer,
            Err(e) => {
                tracing::debug!(
                    image = %image,
                    image_id = %fact.image_id,
                    error = %e,
                    "Direct lookup failed, falling back to listing"
                );
                cache.scan_for_layer(source, image, fact.expected_display_name())?
            }
        };

        let parents = match layer.parent.as_deref() {
            Some(parent) => cache.chain_total(source, &[image, base], parent)?,
            None => 0,
        };
        let total = layer.size + parents;

        if let Some(cached) = cache.layers.get_mut(&layer.id) {
            cached.chain_total = Some(total);
        }
        if let Some(name) = layer.display_name {
            cache.by_name.insert(name, total);
        }

        Ok(LayerSizes {
            total,
            own: layer.size,
        })
    }
}

impl SizeOracle for SizeResolver {
    fn resolve(&mut self, fact: &BuildFact) -> LayerSizes {
        if let Some(sizes) = self.cache.size_for_image_id(&fact.image_id) {
            log_size_cache_hit!("image", fact.image_id, sizes.total);
            return sizes;
        }

        let Some(source) = self.source.as_deref() else {
            let hint = fact.size_hint.unwrap_or(0);
            return LayerSizes {
                total: hint,
                own: hint,
            };
        };

        match Self::lookup(source, &mut self.cache, fact) {
            Ok(sizes) => {
                self.cache.by_image_id.insert(fact.image_id.clone(), sizes);
                sizes
            }
            Err(e) => {
                tracing::warn!(
                    image = %fact.lookup_image,
                    image_id = %fact.image_id,
                    error = %e,
                    "Size lookup failed, treating size as unknown"
                );
                LayerSizes::default()
            }
        }
    }
}
