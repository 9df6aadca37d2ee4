//! Latent tree model: a tree graph plus the conditional distributions
//! of its nodes.

use crate::graph::{NodeId, TreeGraph};
use crate::potential::{free_parameters, Potential};
use crate::variable::{VarId, Variable};
use nalgebra::{DMatrix, DVector};
use std::collections::{HashMap, HashSet};

/// Structure and parameters of a latent tree model
#[derive(Debug, Clone)]
pub struct LatentTreeModel {
    name: Box<str>,
    graph: TreeGraph,
    potentials: HashMap<VarId, Potential>,
}

impl LatentTreeModel {
    pub fn new(name: &str) -> Self {
        LatentTreeModel {
            name: name.into(),
            graph: TreeGraph::new(),
            potentials: HashMap::new(),
        }
    }

    /// A single latent root with every manifest variable as its child
    ///
    /// * `name` - model name
    /// * `manifest` - observed variables (discrete or continuous scalars)
    /// * `cardinality` - number of latent states
    pub fn latent_class(
        name: &str,
        manifest: &[Variable],
        cardinality: usize,
    ) -> anyhow::Result<Self> {
        let mut model = Self::new(name);
        let root = model.graph.add_node(Variable::latent("Z1", cardinality))?;
        for x in manifest {
            if x.is_latent() {
                anyhow::bail!("{} is latent; expected an observed variable", x.name());
            }
            model.graph.add_child(root, x.clone())?;
        }
        Ok(model)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &TreeGraph {
        &self.graph
    }

    /// Structural edits go through the graph; callers must drop the
    /// potentials they invalidate.
    pub fn graph_mut(&mut self) -> &mut TreeGraph {
        &mut self.graph
    }

    pub fn variable(&self, id: NodeId) -> &Variable {
        self.graph.variable(id)
    }

    pub fn node_of(&self, variable: &Variable) -> Option<NodeId> {
        self.graph.node_of(variable)
    }

    /// Variables in node order
    pub fn variables(&self) -> Vec<Variable> {
        self.graph
            .node_ids()
            .into_iter()
            .map(|id| self.graph.variable(id).clone())
            .collect()
    }

    pub fn latent_variables(&self) -> Vec<Variable> {
        self.variables()
            .into_iter()
            .filter(|v| v.is_latent())
            .collect()
    }

    /// Observed variables that map to data columns, in node order
    pub fn manifest_variables(&self) -> Vec<Variable> {
        self.variables().iter().flat_map(|v| v.manifest()).collect()
    }

    pub fn find_variable(&self, name: &str) -> Option<Variable> {
        self.variables().into_iter().find(|v| v.name() == name)
    }

    /// An unused latent variable name
    pub fn fresh_latent_name(&self) -> String {
        let used: HashSet<String> = self
            .variables()
            .iter()
            .map(|v| v.name().to_string())
            .collect();
        (1..)
            .map(|n| format!("Z{}", n))
            .find(|x| !used.contains(x))
            .unwrap_or_default()
    }

    ///////////////////////
    // parameters        //
    ///////////////////////

    /// Number of states of the node's parent (1 at the root)
    pub fn parent_states(&self, id: NodeId) -> usize {
        self.graph
            .parent(id)
            .and_then(|p| self.graph.variable(p).cardinality())
            .unwrap_or(1)
    }

    fn fits(&self, id: NodeId, potential: &Potential) -> bool {
        let v = self.graph.variable(id);
        potential.fits(
            self.parent_states(id),
            v.cardinality().unwrap_or(0),
            v.dimension(),
        )
    }

    /// The potential of a variable, if present and shaped for its node
    pub fn potential(&self, variable: &Variable) -> Option<&Potential> {
        let id = self.node_of(variable)?;
        self.potentials
            .get(&variable.id())
            .filter(|p| self.fits(id, p))
    }

    pub fn set_potential(&mut self, variable: &Variable, potential: Potential) -> anyhow::Result<()> {
        let id = self
            .node_of(variable)
            .ok_or_else(|| anyhow::anyhow!("{} is not in model {}", variable.name(), self.name))?;
        if !self.fits(id, &potential) {
            anyhow::bail!("potential does not fit the node of {}", variable.name());
        }
        self.potentials.insert(variable.id(), potential);
        Ok(())
    }

    /// Forget the parameters of a variable
    pub fn invalidate(&mut self, variable: &Variable) {
        self.potentials.remove(&variable.id());
    }

    /// Drop potentials of variables no longer in the graph
    pub fn prune_potentials(&mut self) {
        let live: HashSet<VarId> = self.variables().iter().map(|v| v.id()).collect();
        self.potentials.retain(|k, _| live.contains(k));
    }

    /// Variables whose potential is missing or no longer fits
    pub fn uninitialized(&self) -> Vec<Variable> {
        self.variables()
            .into_iter()
            .filter(|v| self.potential(v).is_none())
            .collect()
    }

    pub fn is_initialized(&self) -> bool {
        self.uninitialized().is_empty()
    }

    /// Number of free parameters implied by the structure
    pub fn dimension(&self) -> usize {
        self.graph
            .node_ids()
            .into_iter()
            .map(|id| {
                let v = self.graph.variable(id);
                free_parameters(
                    self.parent_states(id),
                    v.cardinality().unwrap_or(0),
                    v.dimension(),
                )
            })
            .sum()
    }

    ///////////////////////
    // regularity        //
    ///////////////////////

    /// Largest cardinality a latent node may take and stay identifiable.
    ///
    /// A continuous neighbour makes the bound unbounded; otherwise it is
    /// the product of the neighbour cardinalities except the largest.
    pub fn regularity_bound(&self, id: NodeId) -> usize {
        let mut cards = vec![];
        for n in self.graph.neighbors(id) {
            match self.graph.variable(n).cardinality() {
                Some(k) => cards.push(k),
                None => return usize::MAX,
            }
        }
        cards.sort_unstable();
        cards.pop();
        cards.iter().fold(1usize, |acc, &k| acc.saturating_mul(k))
    }

    /// Non-latent nodes are always regular
    pub fn is_regular_at(&self, id: NodeId) -> bool {
        let v = self.graph.variable(id);
        match v.cardinality() {
            Some(k) if v.is_latent() => k <= self.regularity_bound(id),
            _ => true,
        }
    }

    /// Check a set of touched nodes; removed ids are skipped
    pub fn is_regular_on(&self, nodes: &[NodeId]) -> bool {
        nodes
            .iter()
            .filter(|&&id| self.graph.contains(id))
            .all(|&id| self.is_regular_at(id))
    }

    pub fn is_regular(&self) -> bool {
        self.is_regular_on(&self.graph.node_ids())
    }

    /// Fail on the first latent node with more states than its bound
    pub fn check_regular(&self) -> anyhow::Result<()> {
        for id in self.graph.node_ids() {
            if !self.is_regular_at(id) {
                let v = self.graph.variable(id);
                anyhow::bail!(
                    "{} in {} has {} states; at most {} are identifiable",
                    v.name(),
                    self.name,
                    v.cardinality().unwrap_or(0),
                    self.regularity_bound(id)
                );
            }
        }
        Ok(())
    }

    /// Graph invariants plus the rule that continuous variables are leaves
    pub fn validate(&self) -> anyhow::Result<()> {
        self.graph.validate()?;
        if let Some(root) = self.graph.root() {
            if !self.graph.variable(root).is_latent() {
                anyhow::bail!("the root of {} is not latent", self.name);
            }
        }
        Ok(())
    }

    ///////////////////////
    // re-rooting        //
    ///////////////////////

    /// Prior marginals along `path` (node first, root last), computed
    /// top-down from the root
    fn path_marginals(tables: &[DMatrix<f64>]) -> Vec<DVector<f64>> {
        let k = tables.len();
        let mut marg = vec![DVector::zeros(0); k];
        marg[k - 1] = tables[k - 1].row(0).transpose();
        for i in (0..k - 1).rev() {
            marg[i] = tables[i].transpose() * &marg[i + 1];
        }
        marg
    }

    /// Make a latent node the root.
    ///
    /// When every potential on the path to the old root is present the
    /// reversed edges get their Bayes-inverted tables, so the joint
    /// distribution is unchanged; otherwise the path potentials are
    /// dropped.
    pub fn reroot(&mut self, id: NodeId) -> anyhow::Result<()> {
        let path = self.graph.path_to_root(id)?;
        if path.len() == 1 {
            return Ok(());
        }
        if !self.graph.variable(id).is_latent() {
            anyhow::bail!("cannot root the model at {}", self.graph.variable(id).name());
        }

        let vars: Vec<Variable> = path.iter().map(|&n| self.variable(n).clone()).collect();
        let tables: Option<Vec<DMatrix<f64>>> = vars
            .iter()
            .map(|v| self.potential(v).and_then(|p| p.table()).cloned())
            .collect();

        self.graph.reroot(id)?;

        let tables = match tables {
            Some(t) => t,
            None => {
                for v in &vars {
                    self.invalidate(v);
                }
                return Ok(());
            }
        };

        let marg = Self::path_marginals(&tables);

        let prior = DMatrix::from_row_slice(1, marg[0].len(), marg[0].as_slice());
        self.potentials
            .insert(vars[0].id(), Potential::Categorical(prior));

        for i in 1..path.len() {
            // path[i] now hangs under path[i-1]
            let old = &tables[i - 1];
            let (na, nb) = (old.nrows(), old.ncols());
            let mut table = DMatrix::<f64>::zeros(nb, na);
            for b in 0..nb {
                let pb = marg[i - 1][b];
                for a in 0..na {
                    table[(b, a)] = if pb > 0.0 {
                        old[(a, b)] * marg[i][a] / pb
                    } else {
                        1.0 / na as f64
                    };
                }
            }
            self.potentials
                .insert(vars[i].id(), Potential::Categorical(table));
        }
        Ok(())
    }

    /// Latent nodes with their cardinalities, e.g. `Z1(3) Z2(2)`
    pub fn summary(&self) -> String {
        self.latent_variables()
            .iter()
            .map(|v| format!("{}({})", v.name(), v.cardinality().unwrap_or(0)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::default_state_names;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_regularity_bound() {
        let xs: Vec<Variable> = (0..3)
            .map(|i| Variable::discrete(&format!("x{}", i), default_state_names(2)))
            .collect();
        let m = LatentTreeModel::latent_class("m", &xs, 4).unwrap();
        let root = m.graph().root().unwrap();
        // 2 * 2 * 2 / 2
        assert_eq!(m.regularity_bound(root), 4);
        assert!(m.is_regular());

        let m5 = LatentTreeModel::latent_class("m", &xs, 5).unwrap();
        assert!(!m5.is_regular());
        assert!(m.check_regular().is_ok());
        let err = m5.check_regular().unwrap_err().to_string();
        assert!(err.contains("5 states"), "{}", err);

        let ys = vec![Variable::continuous("y"), xs[0].clone()];
        let c = LatentTreeModel::latent_class("c", &ys, 10).unwrap();
        assert_eq!(c.regularity_bound(c.graph().root().unwrap()), usize::MAX);
    }

    #[test]
    fn test_dimension() {
        let xs = vec![
            Variable::discrete("a", default_state_names(3)),
            Variable::continuous("b"),
        ];
        let m = LatentTreeModel::latent_class("m", &xs, 2).unwrap();
        // root 1, a: 2*2, b: 2*(1+1)
        assert_eq!(m.dimension(), 1 + 4 + 4);
    }

    #[test]
    fn test_reroot_preserves_marginals() {
        let mut m = LatentTreeModel::new("m");
        let g = m.graph_mut();
        let z0 = g.add_node(Variable::latent("z0", 2)).unwrap();
        let z1 = g.add_child(z0, Variable::latent("z1", 3)).unwrap();
        let x = g
            .add_child(z1, Variable::discrete("x", default_state_names(2)))
            .unwrap();
        let (v0, v1, vx) = (m.variable(z0).clone(), m.variable(z1).clone(), m.variable(x).clone());
        m.set_potential(&v0, Potential::Categorical(DMatrix::from_row_slice(1, 2, &[0.3, 0.7])))
            .unwrap();
        m.set_potential(
            &v1,
            Potential::Categorical(DMatrix::from_row_slice(
                2,
                3,
                &[0.2, 0.5, 0.3, 0.6, 0.1, 0.3],
            )),
        )
        .unwrap();
        m.set_potential(
            &vx,
            Potential::Categorical(DMatrix::from_row_slice(3, 2, &[0.9, 0.1, 0.4, 0.6, 0.5, 0.5])),
        )
        .unwrap();

        let joint = |m: &LatentTreeModel| -> f64 {
            // P(z0 = 1, z1 = 2)
            let root = m.graph().root().unwrap();
            if root == z0 {
                let t0 = m.potential(&v0).unwrap().table().unwrap();
                let t1 = m.potential(&v1).unwrap().table().unwrap();
                t0[(0, 1)] * t1[(1, 2)]
            } else {
                let t1 = m.potential(&v1).unwrap().table().unwrap();
                let t0 = m.potential(&v0).unwrap().table().unwrap();
                t1[(0, 2)] * t0[(2, 1)]
            }
        };

        let before = joint(&m);
        m.reroot(z1).unwrap();
        m.validate().unwrap();
        assert_eq!(m.graph().root(), Some(z1));
        assert!(m.is_initialized());
        assert_abs_diff_eq!(joint(&m), before, epsilon = 1e-12);

        let t0 = m.potential(&v0).unwrap().table().unwrap();
        for r in 0..3 {
            assert_abs_diff_eq!(t0.row(r).sum(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_reroot_without_parameters_drops_path() {
        let xs = vec![Variable::continuous("a"), Variable::continuous("b")];
        let mut m = LatentTreeModel::latent_class("m", &xs, 2).unwrap();
        let root = m.graph().root().unwrap();
        let z2 = m.graph_mut().add_child(root, Variable::latent("Z2", 2)).unwrap();
        m.reroot(z2).unwrap();
        assert_eq!(m.graph().root(), Some(z2));
        assert!(!m.is_initialized());
    }

    #[test]
    fn test_fresh_latent_name() {
        let xs = vec![Variable::continuous("a")];
        let m = LatentTreeModel::latent_class("m", &xs, 2).unwrap();
        assert_eq!(m.fresh_latent_name(), "Z2");
    }
}
