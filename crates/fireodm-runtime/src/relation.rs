//! Relation population.
//!
//! A relation path is a dot-separated list of reference fields, each one
//! declared on the model reached by the previous segment (`post.author`
//! starting from a `Comment` follows `Comment.post`, then `Post.author`).
//! The root document sits at depth 0 and its direct targets at depth 1.
//! Targets deeper than `max_depth` are not fetched; they are cached as
//! [`Relation::Unresolved`] markers, which is what keeps cyclic data from
//! looping.

use async_trait::async_trait;
use fireodm_core::schema::Cardinality;
use fireodm_core::{
    CodecError, DocRef, Document, Error, ModelDescriptor, Relation, Result, SchemaRegistry,
};
use futures::future::{try_join_all, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// What to do when a referenced document does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnMissing {
    /// Leave the relation out of the populated view.
    #[default]
    Skip,
    /// Fail with [`Error::DanglingReference`].
    Fail,
}

impl fmt::Display for OnMissing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => f.write_str("skip"),
            Self::Fail => f.write_str("fail"),
        }
    }
}

impl FromStr for OnMissing {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "fail" => Ok(Self::Fail),
            _ => Err(Error::InvalidData(format!(
                "unknown missing-reference policy `{s}` (expected skip or fail)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulateOptions {
    max_depth: usize,
    pub on_missing: OnMissing,
}

impl Default for PopulateOptions {
    fn default() -> Self {
        Self {
            max_depth: 3,
            on_missing: OnMissing::Skip,
        }
    }
}

impl PopulateOptions {
    /// `max_depth` is clamped to at least 1.
    pub fn new(max_depth: usize, on_missing: OnMissing) -> Self {
        Self {
            max_depth: max_depth.max(1),
            on_missing,
        }
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    #[must_use]
    pub const fn with_on_missing(mut self, on_missing: OnMissing) -> Self {
        self.on_missing = on_missing;
        self
    }

    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }
}

/// Source of related documents.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Fetch and decode the document `pointer` designates, if it exists.
    async fn fetch(&self, model: &Arc<ModelDescriptor>, pointer: &DocRef)
        -> Result<Option<Document>>;
}

/// Requested relation paths merged into a tree, so a shared prefix is
/// fetched once.
#[derive(Debug, Default)]
struct PathTree {
    children: BTreeMap<String, PathTree>,
}

impl PathTree {
    fn parse(registry: &SchemaRegistry, root: &Arc<ModelDescriptor>, paths: &[&str]) -> Result<Self> {
        let mut tree = Self::default();
        for path in paths {
            let mut model = Arc::clone(root);
            let mut node = &mut tree;
            for segment in path.split('.') {
                let invalid = |reason: String| Error::InvalidPath {
                    path: (*path).to_string(),
                    reason,
                };
                if segment.is_empty() {
                    return Err(invalid("empty segment".to_string()));
                }
                let relation = model
                    .field(segment)
                    .ok_or_else(|| invalid(format!("{} has no field `{segment}`", model.id())))?
                    .relation()
                    .ok_or_else(|| {
                        invalid(format!("{}.{segment} is not a reference", model.id()))
                    })?;
                model = registry.lookup(relation.target())?;
                node = node.children.entry(segment.to_string()).or_default();
            }
        }
        Ok(tree)
    }
}

/// Populates reference fields by fetching their targets through a [`Loader`].
pub struct RelationResolver<'a> {
    registry: &'a SchemaRegistry,
    loader: &'a dyn Loader,
    options: PopulateOptions,
}

impl fmt::Debug for RelationResolver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationResolver")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<'a> RelationResolver<'a> {
    pub fn new(registry: &'a SchemaRegistry, loader: &'a dyn Loader, options: PopulateOptions) -> Self {
        Self {
            registry,
            loader,
            options,
        }
    }

    /// Resolve `paths` on `doc` and cache the results on it.
    ///
    /// Independent paths are fetched concurrently. On error `doc` is left
    /// as it was.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for paths that do not follow reference
    /// fields, [`Error::DanglingReference`] for a missing target when the
    /// policy is [`OnMissing::Fail`], and any error the loader reports.
    pub async fn populate(&self, doc: &mut Document, paths: &[&str]) -> Result<()> {
        let tree = PathTree::parse(self.registry, doc.model(), paths)?;
        let resolved = self.expand(doc, &tree, 1, String::new()).await?;
        for (field, relation) in resolved {
            doc.cache_relation(field, relation);
        }
        Ok(())
    }

    /// Resolve every child of `tree` on `doc`, whose targets sit at `depth`.
    fn expand<'b>(
        &'b self,
        doc: &'b Document,
        tree: &'b PathTree,
        depth: usize,
        prefix: String,
    ) -> BoxFuture<'b, Result<Vec<(String, Relation)>>> {
        async move {
            let fields = tree.children.iter().map(|(field, subtree)| {
                let path = if prefix.is_empty() {
                    field.clone()
                } else {
                    format!("{prefix}.{field}")
                };
                self.resolve_field(doc, field, subtree, depth, path)
            });
            let resolved = try_join_all(fields).await?;

            Ok(tree
                .children
                .keys()
                .cloned()
                .zip(resolved)
                .filter_map(|(field, relation)| relation.map(|r| (field, r)))
                .collect())
        }
        .boxed()
    }

    async fn resolve_field(
        &self,
        doc: &Document,
        field: &str,
        subtree: &PathTree,
        depth: usize,
        path: String,
    ) -> Result<Option<Relation>> {
        let descriptor = doc.model().field(field).and_then(|f| f.relation()).ok_or_else(|| {
            Error::InvalidPath {
                path: path.clone(),
                reason: format!("{}.{field} is not a reference", doc.model_id()),
            }
        })?;
        let target = self.registry.lookup(descriptor.target())?;
        let pointers = doc.pointers(field);

        match (descriptor.cardinality(), pointers.as_slice()) {
            (_, []) => Ok(None),
            (Cardinality::One, [pointer, ..]) => self
                .resolve_pointer(doc.model_id(), &target, pointer, subtree, depth, &path)
                .await
                .map(Some),
            (Cardinality::Many, pointers) => {
                let items = try_join_all(pointers.iter().enumerate().map(|(i, pointer)| {
                    let item_path = format!("{path}[{i}]");
                    let target = &target;
                    async move {
                        self.resolve_pointer(doc.model_id(), target, pointer, subtree, depth, &item_path)
                            .await
                    }
                }))
                .await?;
                Ok(Some(Relation::Many(
                    items.into_iter().filter(|r| !r.is_missing()).collect(),
                )))
            }
        }
    }

    fn resolve_pointer<'b>(
        &'b self,
        owner: &'b str,
        target: &'b Arc<ModelDescriptor>,
        pointer: &'b DocRef,
        subtree: &'b PathTree,
        depth: usize,
        path: &'b str,
    ) -> BoxFuture<'b, Result<Relation>> {
        async move {
            if depth > self.options.max_depth {
                log::debug!("Not expanding {path} -> {pointer}: depth {depth} exceeds limit");
                return Ok(Relation::Unresolved(pointer.clone()));
            }
            if pointer.collection != target.collection() {
                return Err(CodecError::new(
                    path,
                    format!("pointer into `{}`", target.collection()),
                    pointer,
                )
                .into());
            }

            let Some(mut related) = self.loader.fetch(target, pointer).await? else {
                return match self.options.on_missing {
                    OnMissing::Skip => {
                        log::debug!("Skipping missing {pointer} at {path}");
                        Ok(Relation::Missing(pointer.clone()))
                    }
                    OnMissing::Fail => Err(Error::DanglingReference {
                        model: owner.to_string(),
                        path: path.to_string(),
                        target: pointer.clone(),
                    }),
                };
            };

            log::debug!("Resolved {path} -> {pointer} at depth {depth}");
            if !subtree.children.is_empty() {
                let nested = self
                    .expand(&related, subtree, depth + 1, path.to_string())
                    .await?;
                for (field, relation) in nested {
                    related.cache_relation(field, relation);
                }
            }
            Ok(Relation::Resolved(Box::new(related)))
        }
        .boxed()
    }
}
