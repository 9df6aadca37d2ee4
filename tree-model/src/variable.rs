//! Random variables of a latent tree model.
//!
//! A variable is compared by identity: every constructor allocates a
//! fresh process-wide id, so two variables with the same name are
//! distinct until a data set is synchronized to a model.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_VARIABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(u64);

impl VarId {
    fn allocate() -> Self {
        VarId(NEXT_VARIABLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Closed set of variable kinds
#[derive(Debug, Clone)]
pub enum VariableKind {
    /// Unobserved discrete variable with ordered state names
    DiscreteLatent { states: Vec<Box<str>> },
    /// Observed discrete variable with ordered state names
    DiscreteObserved { states: Vec<Box<str>> },
    /// Observed continuous scalar
    ContinuousScalar,
    /// Observed continuous vector built by merging scalars
    ContinuousJoint { components: Vec<Variable> },
}

#[derive(Debug)]
struct VariableInner {
    id: VarId,
    name: Box<str>,
    kind: VariableKind,
}

/// A shared, immutable variable handle
#[derive(Clone)]
pub struct Variable(Arc<VariableInner>);

impl Variable {
    fn with_kind(name: &str, kind: VariableKind) -> Self {
        Variable(Arc::new(VariableInner {
            id: VarId::allocate(),
            name: name.into(),
            kind,
        }))
    }

    /// Latent variable with states `s0 .. s{k-1}`
    pub fn latent(name: &str, cardinality: usize) -> Self {
        Self::with_kind(
            name,
            VariableKind::DiscreteLatent {
                states: default_state_names(cardinality),
            },
        )
    }

    /// Latent variable with explicit state names
    pub fn latent_with_states(name: &str, states: Vec<Box<str>>) -> Self {
        Self::with_kind(name, VariableKind::DiscreteLatent { states })
    }

    /// Observed discrete variable
    pub fn discrete(name: &str, states: Vec<Box<str>>) -> Self {
        Self::with_kind(name, VariableKind::DiscreteObserved { states })
    }

    /// Observed continuous scalar
    pub fn continuous(name: &str) -> Self {
        Self::with_kind(name, VariableKind::ContinuousScalar)
    }

    /// Merge continuous variables into one joint variable.
    ///
    /// Joint inputs are flattened so components are always scalars.
    pub fn joint(parts: &[Variable]) -> anyhow::Result<Self> {
        let mut components = vec![];
        for v in parts {
            match v.kind() {
                VariableKind::ContinuousScalar => components.push(v.clone()),
                VariableKind::ContinuousJoint { components: inner } => {
                    components.extend(inner.iter().cloned())
                }
                _ => anyhow::bail!("cannot merge discrete variable {} into a joint", v.name()),
            }
        }
        if components.len() < 2 {
            anyhow::bail!("a joint variable needs at least two components");
        }
        let name = components
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join("+");
        Ok(Self::with_kind(
            &name,
            VariableKind::ContinuousJoint { components },
        ))
    }

    /// Same name, new identity, `cardinality` states (latent only)
    pub fn resized(&self, cardinality: usize) -> anyhow::Result<Self> {
        match self.kind() {
            VariableKind::DiscreteLatent { .. } => Ok(Self::latent(self.name(), cardinality)),
            _ => anyhow::bail!("only latent variables can change cardinality: {}", self.name()),
        }
    }

    /// Same name, new identity, one state removed (latent only)
    pub fn without_state(&self, state: usize) -> anyhow::Result<Self> {
        match self.kind() {
            VariableKind::DiscreteLatent { states } if state < states.len() => {
                let states = states
                    .iter()
                    .enumerate()
                    .filter(|&(s, _)| s != state)
                    .map(|(_, x)| x.clone())
                    .collect();
                Ok(Self::latent_with_states(self.name(), states))
            }
            _ => anyhow::bail!("cannot remove state {} from {}", state, self.name()),
        }
    }

    pub fn id(&self) -> VarId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> &VariableKind {
        &self.0.kind
    }

    /// State names of a discrete variable
    pub fn states(&self) -> Option<&[Box<str>]> {
        match self.kind() {
            VariableKind::DiscreteLatent { states } | VariableKind::DiscreteObserved { states } => {
                Some(states)
            }
            _ => None,
        }
    }

    /// Number of states of a discrete variable
    pub fn cardinality(&self) -> Option<usize> {
        self.states().map(|s| s.len())
    }

    /// Number of continuous dimensions (zero for discrete)
    pub fn dimension(&self) -> usize {
        match self.kind() {
            VariableKind::ContinuousScalar => 1,
            VariableKind::ContinuousJoint { components } => components.len(),
            _ => 0,
        }
    }

    pub fn is_latent(&self) -> bool {
        matches!(self.kind(), VariableKind::DiscreteLatent { .. })
    }

    pub fn is_discrete(&self) -> bool {
        self.states().is_some()
    }

    pub fn is_continuous(&self) -> bool {
        !self.is_discrete()
    }

    /// Variables that map onto data columns: itself, or the components
    /// of a joint. Latent variables have none.
    pub fn manifest(&self) -> Vec<Variable> {
        match self.kind() {
            VariableKind::DiscreteLatent { .. } => vec![],
            VariableKind::ContinuousJoint { components } => components.clone(),
            _ => vec![self.clone()],
        }
    }

    /// Position of a state name
    pub fn state_index(&self, state: &str) -> Option<usize> {
        self.states()?.iter().position(|s| s.as_ref() == state)
    }
}

/// `s0`, `s1`, ...
pub fn default_state_names(cardinality: usize) -> Vec<Box<str>> {
    (0..cardinality)
        .map(|s| format!("s{}", s).into_boxed_str())
        .collect()
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Variable {}

impl Hash for Variable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name(), self.id().0)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
