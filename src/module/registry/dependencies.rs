//! Module dependency resolution
//!
//! Computes start/stop ordering over the dependency graph and detects
//! cycles. Traversal is depth-first over dependencies sorted by registration
//! order, so an unchanged registry always yields the same plan.

use std::collections::{HashSet, VecDeque};
use tracing::debug;

use crate::module::traits::{ModuleError, ModuleState};

/// Read-only view of a dependency graph
pub trait DependencyGraph {
    /// Declared dependencies of a registered module
    fn dependencies_of(&self, name: &str) -> Option<Vec<String>>;

    /// Position in registration order
    fn registration_index(&self, name: &str) -> Option<usize>;

    /// Every registered module in registration order
    fn module_names(&self) -> Vec<String>;

    /// Current lifecycle state, if tracked
    fn state_of(&self, _name: &str) -> Option<ModuleState> {
        None
    }
}

/// Dependency resolver
pub struct DependencyResolver;

impl DependencyResolver {
    /// Modules to bring up for `name`, dependencies first, `name` last
    pub fn plan_start<G: DependencyGraph + ?Sized>(graph: &G, name: &str) -> Result<Vec<String>, ModuleError> {
        if graph.dependencies_of(name).is_none() {
            return Err(ModuleError::ModuleNotFound(name.to_string()));
        }

        let mut walk = Walk::new(graph, true);
        walk.visit(name)?;
        debug!("Start plan for {}: {:?}", name, walk.order);
        Ok(walk.order)
    }

    /// Check that `name` may be stopped
    ///
    /// Fails with `ModuleInUse` listing every ACTIVE or STARTING module that
    /// transitively depends on `name`. Stopping never cascades.
    pub fn plan_stop<G: DependencyGraph + ?Sized>(graph: &G, name: &str) -> Result<Vec<String>, ModuleError> {
        if graph.dependencies_of(name).is_none() {
            return Err(ModuleError::ModuleNotFound(name.to_string()));
        }

        let running: Vec<String> = Self::transitive_dependents(graph, name)
            .into_iter()
            .filter(|d| graph.state_of(d).map(|s| s.is_running()).unwrap_or(false))
            .collect();

        if !running.is_empty() {
            return Err(ModuleError::ModuleInUse {
                module: name.to_string(),
                dependents: running,
            });
        }
        Ok(vec![name.to_string()])
    }

    /// Every module that depends on `name`, directly or not, in registration order
    pub fn transitive_dependents<G: DependencyGraph + ?Sized>(graph: &G, name: &str) -> Vec<String> {
        let modules = graph.module_names();
        let mut found: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::from([name.to_string()]);

        while let Some(current) = queue.pop_front() {
            for candidate in &modules {
                if found.contains(candidate) || candidate == name {
                    continue;
                }
                let depends = graph
                    .dependencies_of(candidate)
                    .map(|deps| deps.iter().any(|d| *d == current))
                    .unwrap_or(false);
                if depends {
                    found.insert(candidate.clone());
                    queue.push_back(candidate.clone());
                }
            }
        }

        modules.into_iter().filter(|m| found.contains(m)).collect()
    }

    /// Fail with `CircularDependency` if a cycle is reachable from `name`
    ///
    /// Unregistered dependencies are ignored here; they are reported when a
    /// start plan is computed.
    pub fn check_acyclic<G: DependencyGraph + ?Sized>(graph: &G, name: &str) -> Result<(), ModuleError> {
        let mut walk = Walk::new(graph, false);
        walk.visit(name)
    }

    /// Every registered module, dependencies before dependents
    pub fn topological_order<G: DependencyGraph + ?Sized>(graph: &G) -> Result<Vec<String>, ModuleError> {
        let mut walk = Walk::new(graph, false);
        for name in graph.module_names() {
            walk.visit(&name)?;
        }
        Ok(walk.order)
    }
}

struct Walk<'a, G: ?Sized> {
    graph: &'a G,
    /// Fail on unregistered dependencies instead of skipping them
    strict: bool,
    path: Vec<String>,
    done: HashSet<String>,
    order: Vec<String>,
}

impl<'a, G: DependencyGraph + ?Sized> Walk<'a, G> {
    fn new(graph: &'a G, strict: bool) -> Self {
        Self {
            graph,
            strict,
            path: Vec::new(),
            done: HashSet::new(),
            order: Vec::new(),
        }
    }

    fn visit(&mut self, name: &str) -> Result<(), ModuleError> {
        if self.done.contains(name) {
            return Ok(());
        }

        if let Some(pos) = self.path.iter().position(|n| n == name) {
            let mut cycle = self.path[pos..].to_vec();
            cycle.push(name.to_string());
            return Err(ModuleError::CircularDependency { cycle });
        }

        let Some(mut deps) = self.graph.dependencies_of(name) else {
            if self.strict {
                return Err(ModuleError::DependencyMissing {
                    module: self.path.last().cloned().unwrap_or_default(),
                    dependency: name.to_string(),
                });
            }
            self.done.insert(name.to_string());
            return Ok(());
        };

        // Registered dependencies in registration order, unknown ones last
        deps.sort_by_key(|d| self.graph.registration_index(d).unwrap_or(usize::MAX));

        self.path.push(name.to_string());
        for dep in &deps {
            self.visit(dep)?;
        }
        self.path.pop();

        self.done.insert(name.to_string());
        self.order.push(name.to_string());
        Ok(())
    }
}
