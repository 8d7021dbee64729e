//! Callee Graph Provider
//!
//! This module defines the collaborators the inliner uses to find out about
//! methods and to get their graphs, and the provider that combines them
//! into a private candidate graph for one call site:
//!
//! - [`MethodResolver`]: method metadata and virtual dispatch resolution
//! - [`SubstitutionProvider`]: cached or intrinsic replacement graphs
//! - [`GraphBuilderService`]: parsing a method into a fresh graph
//!
//! [`MethodRegistry`] implements all three over an in-memory table.
//!
//! # Thread Safety
//!
//! All collaborator traits are `Send + Sync` so one registry can serve
//! several compiler threads. Graphs shared between compilations are
//! [`SharedGraph`]s and are copied before anyone mutates them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{trace, warn};

use super::profile::{NoProfile, ProfileProvider};
use super::telemetry::{Counter, NullSink, TelemetrySink};
use super::InliningOptions;
use crate::error::{InlineError, InlineResult};
use crate::ir::graph::{CalleeSource, Graph, SharedGraph};
use crate::ir::kind::MethodId;
use crate::ir::stamp::TypeId;
use crate::opt::canonicalize::{Canonicalizer, Simplifier};
use crate::opt::gvn::Gvn;

// =============================================================================
// Method Metadata
// =============================================================================

bitflags! {
    /// Inlining-relevant properties of a method.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u8 {
        /// Annotated to always be inlined.
        const MUST_INLINE = 0b0000_0001;
        /// Annotated to never be inlined.
        const NEVER_INLINE = 0b0000_0010;
        /// Recognized by the compiler and replaced by a substitution.
        const INTRINSIC = 0b0000_0100;
        /// Implemented outside the managed code; no graph can be built.
        const NATIVE = 0b0000_1000;
        const ABSTRACT = 0b0001_0000;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodInfo {
    pub id: MethodId,
    pub name: String,
    /// Declaring type, for receiver-based resolution.
    pub holder: Option<TypeId>,
    pub flags: MethodFlags,
    /// Size of the machine code from an earlier compilation, if any.
    pub compiled_code_size: Option<u32>,
}

impl MethodInfo {
    pub fn new(id: MethodId, name: impl Into<String>) -> Self {
        MethodInfo {
            id,
            name: name.into(),
            holder: None,
            flags: MethodFlags::empty(),
            compiled_code_size: None,
        }
    }

    pub fn with_flags(mut self, flags: MethodFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_holder(mut self, holder: TypeId) -> Self {
        self.holder = Some(holder);
        self
    }

    pub fn with_compiled_code_size(mut self, size: u32) -> Self {
        self.compiled_code_size = Some(size);
        self
    }

    /// A graph can be built for this method.
    #[inline]
    pub fn has_body(&self) -> bool {
        !self.flags.intersects(MethodFlags::NATIVE | MethodFlags::ABSTRACT)
    }

    #[inline]
    pub fn is_intrinsic(&self) -> bool {
        self.flags.contains(MethodFlags::INTRINSIC)
    }

    #[inline]
    pub fn must_inline(&self) -> bool {
        self.flags.contains(MethodFlags::MUST_INLINE)
    }

    #[inline]
    pub fn never_inline(&self) -> bool {
        self.flags.contains(MethodFlags::NEVER_INLINE)
    }
}

/// Options passed to the graph builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BuildOptions {
    /// The graph is parsed to be spliced into another method.
    pub for_inlining: bool,
}

/// Identifies a call site for substitution lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallSiteKey {
    pub caller: MethodId,
    pub bci: u32,
    /// Substitutions and intrinsics may replace the target here.
    pub allow_substitutions: bool,
}

// =============================================================================
// Collaborators
// =============================================================================

pub trait MethodResolver: Send + Sync {
    fn method(&self, id: MethodId) -> Option<MethodInfo>;

    /// Implementation of `method` that runs for receivers of exactly
    /// `receiver`. `None` when there is none.
    fn resolve_virtual(&self, method: MethodId, receiver: TypeId) -> Option<MethodId>;
}

pub trait GraphBuilderService: Send + Sync {
    fn build_graph(&self, method: &MethodInfo, options: BuildOptions) -> InlineResult<Graph>;
}

pub trait SubstitutionProvider: Send + Sync {
    /// A graph to use instead of parsing `method` at `site`.
    fn lookup_inline_substitution(&self, method: MethodId, site: &CallSiteKey)
        -> Option<CalleeSource>;
}

// =============================================================================
// Method Registry
// =============================================================================

struct MethodEntry {
    info: MethodInfo,
    body: Option<SharedGraph>,
    substitution: Option<SharedGraph>,
}

/// In-memory method table with frozen bodies.
#[derive(Default)]
pub struct MethodRegistry {
    methods: RwLock<FxHashMap<MethodId, MethodEntry>>,
    /// `(declared method, receiver type) -> implementation`.
    overrides: RwLock<FxHashMap<(MethodId, TypeId), MethodId>>,
    builds: AtomicUsize,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method. `body` is frozen; builds hand out copies of it.
    pub fn register(&self, info: MethodInfo, body: Option<Graph>) {
        let entry = MethodEntry {
            body: body.map(SharedGraph::new),
            substitution: None,
            info,
        };
        self.methods.write().insert(entry.info.id, entry);
    }

    /// Register a replacement graph served instead of parsing `method`.
    /// Returns `false` if the method is unknown.
    pub fn register_substitution(&self, method: MethodId, graph: Graph) -> bool {
        match self.methods.write().get_mut(&method) {
            Some(entry) => {
                entry.substitution = Some(SharedGraph::new(graph));
                true
            }
            None => false,
        }
    }

    /// `implementation` runs for calls of `declared` on receivers of type
    /// `receiver`.
    pub fn register_override(&self, declared: MethodId, receiver: TypeId, implementation: MethodId) {
        self.overrides
            .write()
            .insert((declared, receiver), implementation);
    }

    /// Number of graphs built so far.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.read().is_empty()
    }
}

impl MethodResolver for MethodRegistry {
    fn method(&self, id: MethodId) -> Option<MethodInfo> {
        self.methods.read().get(&id).map(|e| e.info.clone())
    }

    fn resolve_virtual(&self, method: MethodId, receiver: TypeId) -> Option<MethodId> {
        if let Some(&implementation) = self.overrides.read().get(&(method, receiver)) {
            return Some(implementation);
        }
        // Not overridden: the declared method is inherited, unless abstract.
        let methods = self.methods.read();
        let entry = methods.get(&method)?;
        (!entry.info.flags.contains(MethodFlags::ABSTRACT)).then_some(method)
    }
}

impl GraphBuilderService for MethodRegistry {
    fn build_graph(&self, method: &MethodInfo, options: BuildOptions) -> InlineResult<Graph> {
        let methods = self.methods.read();
        let entry = methods
            .get(&method.id)
            .ok_or(InlineError::UnknownMethod(method.id))?;
        if !entry.info.has_body() {
            return Err(InlineError::MissingBody(method.id));
        }
        let body = entry
            .body
            .as_ref()
            .ok_or(InlineError::MissingBody(method.id))?;
        self.builds.fetch_add(1, Ordering::Relaxed);
        trace!(method = %method.id, name = %method.name, ?options, "building graph");
        Ok(body.to_owned_graph())
    }
}

impl SubstitutionProvider for MethodRegistry {
    fn lookup_inline_substitution(
        &self,
        method: MethodId,
        site: &CallSiteKey,
    ) -> Option<CalleeSource> {
        if !site.allow_substitutions {
            return None;
        }
        let methods = self.methods.read();
        let graph = methods.get(&method)?.substitution.clone()?;
        Some(CalleeSource::Shared(graph))
    }
}

// =============================================================================
// Inlining Context
// =============================================================================

/// The collaborators one inlining run talks to.
#[derive(Clone)]
pub struct InliningContext {
    pub resolver: Arc<dyn MethodResolver>,
    pub builder: Arc<dyn GraphBuilderService>,
    pub substitutions: Arc<dyn SubstitutionProvider>,
    pub canonicalizer: Arc<dyn Canonicalizer>,
    pub profile: Arc<dyn ProfileProvider>,
    pub telemetry: Arc<dyn TelemetrySink>,
}

impl InliningContext {
    /// Context backed by `registry`, with the default simplifier and
    /// neither profile nor telemetry.
    pub fn with_registry(registry: Arc<MethodRegistry>) -> Self {
        InliningContext {
            resolver: registry.clone(),
            builder: registry.clone(),
            substitutions: registry,
            canonicalizer: Arc::new(Simplifier::new()),
            profile: Arc::new(NoProfile),
            telemetry: Arc::new(NullSink),
        }
    }

    pub fn with_profile(mut self, profile: Arc<dyn ProfileProvider>) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_canonicalizer(mut self, canonicalizer: Arc<dyn Canonicalizer>) -> Self {
        self.canonicalizer = canonicalizer;
        self
    }
}

// =============================================================================
// Candidate Graphs
// =============================================================================

/// Where a candidate graph came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphOrigin {
    /// Served by the substitution collaborator; `shared` if it was a copy of
    /// a frozen graph.
    Substitution { shared: bool },
    /// Parsed and simplified for this call site.
    Built,
}

/// A private graph for one inlining target.
#[derive(Debug)]
pub struct CandidateGraph {
    pub graph: Graph,
    pub origin: GraphOrigin,
}

impl CandidateGraph {
    #[inline]
    pub fn is_substitution(&self) -> bool {
        matches!(self.origin, GraphOrigin::Substitution { .. })
    }
}

/// Produces candidate graphs from the collaborators of a context.
pub struct CalleeGraphProvider<'a> {
    context: &'a InliningContext,
    options: &'a InliningOptions,
}

impl<'a> CalleeGraphProvider<'a> {
    pub fn new(context: &'a InliningContext, options: &'a InliningOptions) -> Self {
        CalleeGraphProvider { context, options }
    }

    /// A graph for `target` that the caller owns exclusively.
    ///
    /// Substitutions are preferred. Otherwise the method is built, then
    /// simplified once and, if enabled, value numbered.
    pub fn obtain_callee_graph(
        &self,
        target: &MethodInfo,
        site: &CallSiteKey,
    ) -> InlineResult<CandidateGraph> {
        let telemetry = &self.context.telemetry;
        if let Some(source) = self
            .context
            .substitutions
            .lookup_inline_substitution(target.id, site)
        {
            telemetry.increment(Counter::SubstitutionsUsed);
            let shared = source.is_shared();
            trace!(method = %target.id, shared, "using substitution");
            return Ok(CandidateGraph {
                graph: source.into_owned_graph(),
                origin: GraphOrigin::Substitution { shared },
            });
        }

        if !target.has_body() {
            return Err(InlineError::MissingBody(target.id));
        }
        let mut graph = self
            .context
            .builder
            .build_graph(target, BuildOptions { for_inlining: true })?;
        telemetry.increment(Counter::GraphsBuilt);

        self.context.canonicalizer.apply(&mut graph);
        if self.options.enable_global_value_numbering {
            Gvn::new().number(&mut graph);
        }
        if !graph.has_body() {
            warn!(method = %target.id, "built graph has an empty body");
            return Err(InlineError::EmptyCalleeBody(target.id));
        }
        Ok(CandidateGraph {
            graph,
            origin: GraphOrigin::Built,
        })
    }
}
