//! Flattening declared stages into the stack the pipeline runs.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use super::{BoxedMiddleware, Middleware, Stage};
use crate::error::Error;

/// Groups may name other groups this many levels down, no further.
const MAX_GROUP_DEPTH: usize = 1;

/// Name-to-middleware lookup.
///
/// The registry answers for its own aliases first and then asks its
/// fallback, which is where an application's service locator plugs in.
pub trait Resolve: Send + Sync {
    fn resolve(&self, name: &str) -> Option<BoxedMiddleware>;
}

impl<F> Resolve for F
where
    F: Fn(&str) -> Option<BoxedMiddleware> + Send + Sync,
{
    fn resolve(&self, name: &str) -> Option<BoxedMiddleware> {
        self(name)
    }
}

/// A stage after resolution.
#[derive(Clone)]
pub struct ResolvedStage {
    name: Arc<str>,
    middleware: BoxedMiddleware,
}

impl ResolvedStage {
    pub fn name(&self) -> &str { &self.name }
    pub fn middleware(&self) -> &dyn Middleware { &*self.middleware }
}

impl fmt::Debug for ResolvedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResolvedStage").field(&self.name).finish()
    }
}

/// The flat, ordered result of resolution. Cheap to clone, never changes.
#[derive(Clone, Debug)]
pub struct Stack(Arc<[ResolvedStage]>);

impl Stack {
    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(ResolvedStage::name).collect()
    }
}

impl Deref for Stack {
    type Target = [ResolvedStage];

    fn deref(&self) -> &Self::Target { &self.0 }
}

/// Aliases, groups and priority, consulted once to build a [`Stack`].
///
/// ```rust
/// use keel::{Outcome, Request, middleware::{Next, Registry, Stage}};
///
/// async fn session(req: Request, next: Next) -> Outcome { next.run(req).await }
/// async fn csrf(req: Request, next: Next) -> Outcome { next.run(req).await }
///
/// let mut registry = Registry::new();
/// registry.alias("session", session);
/// registry.alias("csrf", csrf);
/// registry.group("web", [Stage::alias("csrf"), Stage::alias("session")]);
/// registry.set_priority(["session", "csrf"]);
///
/// let stack = registry.resolve_stack(&[Stage::group("web")]).unwrap();
/// assert_eq!(stack.names(), ["session", "csrf"]);
/// ```
#[derive(Clone, Default)]
pub struct Registry {
    aliases: HashMap<String, BoxedMiddleware>,
    groups: HashMap<String, Vec<Stage>>,
    priority: Vec<String>,
    fallback: Option<Arc<dyn Resolve>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alias(&mut self, name: impl Into<String>, middleware: impl Middleware) -> &mut Self {
        self.aliases.insert(name.into(), Arc::new(middleware));
        self
    }

    pub fn group(&mut self, name: impl Into<String>, stages: impl IntoIterator<Item = Stage>) -> &mut Self {
        self.groups.insert(name.into(), stages.into_iter().collect());
        self
    }

    /// Stages named here run in this relative order wherever they appear.
    pub fn set_priority<S: Into<String>>(&mut self, names: impl IntoIterator<Item = S>) -> &mut Self {
        self.priority = names.into_iter().map(Into::into).collect();
        self
    }

    /// Consulted for aliases the registry does not know itself.
    pub fn set_fallback(&mut self, resolver: impl Resolve + 'static) -> &mut Self {
        self.fallback = Some(Arc::new(resolver));
        self
    }

    /// Resolves aliases, expands groups and applies priority.
    ///
    /// Fails on the first alias or group that cannot be resolved, so a
    /// misconfigured stack never runs at all.
    pub fn resolve_stack(&self, stages: &[Stage]) -> Result<Stack, Error> {
        let mut resolved = Vec::with_capacity(stages.len());
        for stage in stages {
            self.expand(stage, 0, &mut resolved)?;
        }
        sort_by_priority(&mut resolved, &self.priority);
        Ok(Stack(resolved.into()))
    }

    fn expand(&self, stage: &Stage, depth: usize, out: &mut Vec<ResolvedStage>) -> Result<(), Error> {
        match stage {
            Stage::Direct { name, middleware } => {
                out.push(ResolvedStage { name: Arc::clone(name), middleware: Arc::clone(middleware) });
            }
            Stage::Alias(name) => {
                let middleware = self
                    .resolve(name)
                    .ok_or_else(|| Error::unresolved(name, "no middleware is registered under this name"))?;
                out.push(ResolvedStage { name: Arc::from(name.as_str()), middleware });
            }
            Stage::Group(name) => {
                if depth > MAX_GROUP_DEPTH {
                    return Err(Error::unresolved(name, "groups nest at most one level deep"));
                }
                let members = self
                    .groups
                    .get(name)
                    .ok_or_else(|| Error::unresolved(name, "no such middleware group"))?;
                for member in members {
                    self.expand(member, depth + 1, out)?;
                }
            }
        }
        Ok(())
    }
}

impl Resolve for Registry {
    fn resolve(&self, name: &str) -> Option<BoxedMiddleware> {
        self.aliases
            .get(name)
            .cloned()
            .or_else(|| self.fallback.as_ref().and_then(|f| f.resolve(name)))
    }
}

/// Reorders prioritized stages among the slots they already occupy.
/// Everything else stays where it was declared.
fn sort_by_priority(stages: &mut [ResolvedStage], priority: &[String]) {
    let rank = |stage: &ResolvedStage| priority.iter().position(|p| **p == *stage.name);

    let slots: Vec<usize> = (0..stages.len()).filter(|&i| rank(&stages[i]).is_some()).collect();
    let mut ranked: Vec<ResolvedStage> = slots.iter().map(|&i| stages[i].clone()).collect();
    ranked.sort_by_key(|stage| rank(stage));

    for (slot, stage) in slots.into_iter().zip(ranked) {
        stages[slot] = stage;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Outcome;
    use crate::middleware::Next;
    use crate::request::Request;

    async fn pass(req: Request, next: Next) -> Outcome {
        next.run(req).await
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        for name in ["auth", "session", "csrf", "throttle", "bindings"] {
            registry.alias(name, pass);
        }
        registry
    }

    #[test]
    fn aliases_resolve_in_declared_order() {
        let stack = registry()
            .resolve_stack(&[Stage::alias("auth"), Stage::direct("inline", pass), Stage::alias("csrf")])
            .unwrap();
        assert_eq!(stack.names(), ["auth", "inline", "csrf"]);
    }

    #[test]
    fn unknown_alias_fails_resolution() {
        let err = registry().resolve_stack(&[Stage::alias("nope")]).unwrap_err();
        assert!(matches!(err, Error::MiddlewareResolution { ref name, .. } if name == "nope"));
    }

    #[test]
    fn unknown_group_fails_resolution() {
        let err = registry().resolve_stack(&[Stage::group("api")]).unwrap_err();
        assert!(matches!(err, Error::MiddlewareResolution { ref name, .. } if name == "api"));
    }

    #[test]
    fn groups_expand_one_nested_level() {
        let mut registry = registry();
        registry.group("base", [Stage::alias("session"), Stage::alias("csrf")]);
        registry.group("web", [Stage::group("base"), Stage::alias("bindings")]);

        let stack = registry.resolve_stack(&[Stage::alias("auth"), Stage::group("web")]).unwrap();
        assert_eq!(stack.names(), ["auth", "session", "csrf", "bindings"]);
    }

    #[test]
    fn deeper_nesting_is_rejected() {
        let mut registry = registry();
        registry.group("inner", [Stage::alias("csrf")]);
        registry.group("middle", [Stage::group("inner")]);
        registry.group("outer", [Stage::group("middle")]);

        let err = registry.resolve_stack(&[Stage::group("outer")]).unwrap_err();
        assert!(matches!(err, Error::MiddlewareResolution { ref name, .. } if name == "inner"));
    }

    #[test]
    fn self_referencing_group_terminates() {
        let mut registry = registry();
        registry.group("loop", [Stage::group("loop")]);
        assert!(registry.resolve_stack(&[Stage::group("loop")]).is_err());
    }

    #[test]
    fn priority_reorders_only_prioritized_slots() {
        let mut registry = registry();
        registry.set_priority(["session", "auth", "bindings"]);

        let stack = registry
            .resolve_stack(&[
                Stage::alias("bindings"),
                Stage::alias("throttle"),
                Stage::alias("auth"),
                Stage::alias("csrf"),
                Stage::alias("session"),
            ])
            .unwrap();

        assert_eq!(stack.names(), ["session", "throttle", "auth", "csrf", "bindings"]);
    }

    #[test]
    fn fallback_resolver_answers_unknown_aliases() {
        let mut registry = Registry::new();
        registry.set_fallback(|name: &str| -> Option<BoxedMiddleware> {
            (name == "located").then(|| Arc::new(pass) as BoxedMiddleware)
        });

        let stack = registry.resolve_stack(&[Stage::alias("located")]).unwrap();
        assert_eq!(stack.names(), ["located"]);
        assert!(registry.resolve_stack(&[Stage::alias("missing")]).is_err());
    }
}
