//! Network text format for latent tree models.
//!
//! ```text
//! // loglikelihood: -1234.5
//! network "m" {
//! }
//! variable "Z1" {
//!     type discrete[2] { "s0" "s1" };
//!     property latent;
//! }
//! variable "y" {
//!     type continuous;
//! }
//! probability ( "Z1" ) {
//!     table 0.4 0.6;
//! }
//! probability ( "y" | "Z1" ) {
//!     table -1 1 1 1;
//! }
//! ```
//!
//! A probability block with several heads declares a joint continuous
//! leaf. Discrete tables are parent-state major; continuous tables list,
//! per parent state, the means then the row-major covariance. A block
//! without a table leaves the node uninitialized.

use crate::common_io::{open_buf_writer, read_lines};
use log::info;
use nalgebra::{DMatrix, DVector};
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use tree_model::{GaussianComponent, LatentTreeModel, NodeId, Potential, Variable};

/// Scores written as header comments
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelAnnotation {
    pub loglikelihood: Option<f64>,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(Box<str>),
    Quoted(Box<str>),
    Punct(char),
}

fn tokenize(text: &str) -> anyhow::Result<Vec<(Token, usize)>> {
    const PUNCT: &[char] = &['{', '}', '[', ']', '(', ')', ';', '|'];
    let mut tokens = vec![];
    for (ln, line) in text.lines().enumerate() {
        let line = match line.find("//") {
            Some(k) => &line[..k],
            None => line,
        };
        let mut chars = line.char_indices().peekable();
        while let Some(&(start, c)) = chars.peek() {
            if c.is_whitespace() {
                chars.next();
            } else if PUNCT.contains(&c) {
                tokens.push((Token::Punct(c), ln + 1));
                chars.next();
            } else if c == '"' {
                chars.next();
                let mut end = None;
                for (k, x) in chars.by_ref() {
                    if x == '"' {
                        end = Some(k);
                        break;
                    }
                }
                let end =
                    end.ok_or_else(|| anyhow::anyhow!("line {}: unterminated string", ln + 1))?;
                tokens.push((Token::Quoted(line[start + 1..end].into()), ln + 1));
            } else {
                let mut end = line.len();
                while let Some(&(k, x)) = chars.peek() {
                    if x.is_whitespace() || x == '"' || PUNCT.contains(&x) {
                        end = k;
                        break;
                    }
                    chars.next();
                }
                tokens.push((Token::Word(line[start..end].into()), ln + 1));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(_, l)| *l)
            .unwrap_or(0)
    }

    fn next(&mut self) -> anyhow::Result<Token> {
        let t = self
            .tokens
            .get(self.pos)
            .map(|(t, _)| t.clone())
            .ok_or_else(|| anyhow::anyhow!("unexpected end of input"))?;
        self.pos += 1;
        Ok(t)
    }

    fn error<T>(&self, what: &str) -> anyhow::Result<T> {
        Err(anyhow::anyhow!(
            "line {}: expected {}, found {:?}",
            self.line(),
            what,
            self.peek()
        ))
    }

    fn punct(&mut self, c: char) -> anyhow::Result<()> {
        match self.peek() {
            Some(Token::Punct(x)) if *x == c => {
                self.pos += 1;
                Ok(())
            }
            _ => self.error(&format!("'{}'", c)),
        }
    }

    fn is_punct(&self, c: char) -> bool {
        matches!(self.peek(), Some(Token::Punct(x)) if *x == c)
    }

    fn keyword(&mut self, w: &str) -> anyhow::Result<()> {
        match self.peek() {
            Some(Token::Word(x)) if x.as_ref() == w => {
                self.pos += 1;
                Ok(())
            }
            _ => self.error(&format!("'{}'", w)),
        }
    }

    fn quoted(&mut self) -> anyhow::Result<Box<str>> {
        if let Some(Token::Quoted(s)) = self.peek() {
            let s = s.clone();
            self.pos += 1;
            Ok(s)
        } else {
            self.error("a quoted name")
        }
    }

    fn number(&mut self) -> anyhow::Result<f64> {
        let line = self.line();
        match self.next()? {
            Token::Word(w) => w
                .parse::<f64>()
                .map_err(|_| anyhow::anyhow!("line {}: {} is not a number", line, w)),
            t => anyhow::bail!("line {}: expected a number, found {:?}", line, t),
        }
    }

    /// Skip a `{ ... }` block with nesting
    fn skip_block(&mut self) -> anyhow::Result<()> {
        self.punct('{')?;
        let mut depth = 1;
        while depth > 0 {
            match self.next()? {
                Token::Punct('{') => depth += 1,
                Token::Punct('}') => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }
}

struct Declared {
    states: Option<Vec<Box<str>>>,
    latent: bool,
}

struct Block {
    heads: Vec<Box<str>>,
    parent: Option<Box<str>>,
    table: Option<Vec<f64>>,
    line: usize,
}

/// Parse a model from text
pub fn parse_model(text: &str) -> anyhow::Result<LatentTreeModel> {
    let mut p = Parser {
        tokens: tokenize(text)?,
        pos: 0,
    };

    let mut name: Box<str> = "model".into();
    let mut order: Vec<Box<str>> = vec![];
    let mut declared: HashMap<Box<str>, Declared> = HashMap::new();
    let mut blocks: Vec<Block> = vec![];

    while let Some(t) = p.peek().cloned() {
        match t {
            Token::Word(w) if w.as_ref() == "network" => {
                p.pos += 1;
                name = p.quoted()?;
                p.skip_block()?;
            }
            Token::Word(w) if w.as_ref() == "variable" => {
                p.pos += 1;
                let v = p.quoted()?;
                p.punct('{')?;
                p.keyword("type")?;
                let states = match p.next()? {
                    Token::Word(w) if w.as_ref() == "continuous" => None,
                    Token::Word(w) if w.as_ref() == "discrete" => {
                        p.punct('[')?;
                        let k = p.number()? as usize;
                        p.punct(']')?;
                        p.punct('{')?;
                        let mut states = vec![];
                        while !p.is_punct('}') {
                            states.push(p.quoted()?);
                        }
                        p.punct('}')?;
                        if states.len() != k {
                            anyhow::bail!(
                                "{} declares {} states but lists {}",
                                v,
                                k,
                                states.len()
                            );
                        }
                        Some(states)
                    }
                    t => anyhow::bail!("line {}: unknown type {:?}", p.line(), t),
                };
                p.punct(';')?;
                let mut latent = false;
                while !p.is_punct('}') {
                    p.keyword("property")?;
                    while !p.is_punct(';') {
                        if let Token::Word(w) = p.next()? {
                            latent |= w.as_ref() == "latent";
                        }
                    }
                    p.punct(';')?;
                }
                p.punct('}')?;
                if latent && states.is_none() {
                    anyhow::bail!("continuous variable {} cannot be latent", v);
                }
                if declared.insert(v.clone(), Declared { states, latent }).is_some() {
                    anyhow::bail!("variable {} declared twice", v);
                }
                order.push(v);
            }
            Token::Word(w) if w.as_ref() == "probability" => {
                let line = p.line();
                p.pos += 1;
                p.punct('(')?;
                let mut heads = vec![];
                while !p.is_punct('|') && !p.is_punct(')') {
                    heads.push(p.quoted()?);
                }
                let parent = if p.is_punct('|') {
                    p.pos += 1;
                    Some(p.quoted()?)
                } else {
                    None
                };
                p.punct(')')?;
                p.punct('{')?;
                let mut table = None;
                while !p.is_punct('}') {
                    p.keyword("table")?;
                    let mut values = vec![];
                    while !p.is_punct(';') {
                        values.push(p.number()?);
                    }
                    p.punct(';')?;
                    table = Some(values);
                }
                p.punct('}')?;
                if heads.is_empty() {
                    anyhow::bail!("line {}: probability block without a variable", line);
                }
                blocks.push(Block {
                    heads,
                    parent,
                    table,
                    line,
                });
            }
            _ => return p.error("'network', 'variable' or 'probability'"),
        }
    }

    build_model(&name, &order, &declared, &blocks)
}

fn build_model(
    name: &str,
    order: &[Box<str>],
    declared: &HashMap<Box<str>, Declared>,
    blocks: &[Block],
) -> anyhow::Result<LatentTreeModel> {
    // one node variable per block
    let mut scalars: HashMap<&str, Variable> = HashMap::new();
    for v in order {
        let d = &declared[v];
        let var = match (&d.states, d.latent) {
            (Some(s), true) => Variable::latent_with_states(v, s.clone()),
            (Some(s), false) => Variable::discrete(v, s.clone()),
            (None, _) => Variable::continuous(v),
        };
        scalars.insert(v.as_ref(), var);
    }

    let mut owner: HashMap<&str, usize> = HashMap::new();
    let mut nodes: Vec<Variable> = Vec::with_capacity(blocks.len());
    for (b, block) in blocks.iter().enumerate() {
        let mut parts = vec![];
        for h in &block.heads {
            let v = scalars
                .get(h.as_ref())
                .ok_or_else(|| anyhow::anyhow!("line {}: {} is not declared", block.line, h))?;
            if owner.insert(h.as_ref(), b).is_some() {
                anyhow::bail!("{} has more than one probability block", h);
            }
            parts.push(v.clone());
        }
        let node = if parts.len() == 1 {
            parts.remove(0)
        } else {
            Variable::joint(&parts)?
        };
        nodes.push(node);
    }
    if let Some(v) = order.iter().find(|v| !owner.contains_key(v.as_ref())) {
        anyhow::bail!("{} has no probability block", v);
    }

    let parent_of = |b: &Block| -> anyhow::Result<Option<usize>> {
        match &b.parent {
            None => Ok(None),
            Some(p) => {
                let pb = *owner
                    .get(p.as_ref())
                    .ok_or_else(|| anyhow::anyhow!("line {}: {} is not declared", b.line, p))?;
                if blocks[pb].heads.len() > 1 || !nodes[pb].is_latent() {
                    anyhow::bail!("line {}: parent {} is not latent", b.line, p);
                }
                Ok(Some(pb))
            }
        }
    };
    let parents = blocks
        .iter()
        .map(parent_of)
        .collect::<anyhow::Result<Vec<_>>>()?;

    let roots: Vec<usize> = (0..blocks.len()).filter(|&b| parents[b].is_none()).collect();
    let root = match roots.as_slice() {
        [r] => *r,
        _ => anyhow::bail!("expected exactly one root, found {}", roots.len()),
    };

    let mut model = LatentTreeModel::new(name);
    let mut node_ids: Vec<Option<NodeId>> = vec![None; blocks.len()];
    node_ids[root] = Some(model.graph_mut().add_node(nodes[root].clone())?);
    let mut queue = VecDeque::from([root]);
    while let Some(b) = queue.pop_front() {
        let pid = node_ids[b].ok_or_else(|| anyhow::anyhow!("unreachable block"))?;
        for c in (0..blocks.len()).filter(|&c| parents[c] == Some(b)) {
            node_ids[c] = Some(model.graph_mut().add_child(pid, nodes[c].clone())?);
            queue.push_back(c);
        }
    }
    if let Some(b) = (0..blocks.len()).find(|&b| node_ids[b].is_none()) {
        anyhow::bail!("{} is not connected to the root", nodes[b].name());
    }
    model.validate()?;
    model.check_regular()?;

    for (b, block) in blocks.iter().enumerate() {
        let Some(values) = &block.table else {
            continue;
        };
        let var = &nodes[b];
        let id = node_ids[b].ok_or_else(|| anyhow::anyhow!("unreachable block"))?;
        let p = model.parent_states(id);
        let potential = match var.cardinality() {
            Some(k) => {
                if values.len() != p * k {
                    anyhow::bail!(
                        "line {}: table of {} needs {} values, found {}",
                        block.line,
                        var.name(),
                        p * k,
                        values.len()
                    );
                }
                Potential::Categorical(DMatrix::from_row_slice(p, k, values))
            }
            None => {
                let d = var.dimension();
                let per = d + d * d;
                if values.len() != p * per {
                    anyhow::bail!(
                        "line {}: table of {} needs {} values, found {}",
                        block.line,
                        var.name(),
                        p * per,
                        values.len()
                    );
                }
                Potential::Gaussian(
                    values
                        .chunks(per)
                        .map(|c| GaussianComponent {
                            mean: DVector::from_row_slice(&c[..d]),
                            covariance: DMatrix::from_row_slice(d, d, &c[d..]),
                        })
                        .collect(),
                )
            }
        };
        model.set_potential(var, potential)?;
    }

    Ok(model)
}

/// Read a model file (gzip transparent)
pub fn read_model(file: &str) -> anyhow::Result<LatentTreeModel> {
    let text = read_lines(file)?.join("\n");
    let model = parse_model(&text).map_err(|e| anyhow::anyhow!("{}: {}", file, e))?;
    info!(
        "read model {} with {} nodes from {}",
        model.name(),
        model.graph().num_nodes(),
        file
    );
    Ok(model)
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s)
}

fn join_values<'a>(xs: impl Iterator<Item = &'a f64>) -> String {
    xs.map(|x| x.to_string()).collect::<Vec<_>>().join(" ")
}

/// Render a model as text
pub fn format_model(model: &LatentTreeModel, annotation: &ModelAnnotation) -> String {
    let mut out = String::new();
    if let Some(ll) = annotation.loglikelihood {
        out.push_str(&format!("// loglikelihood: {}\n", ll));
    }
    if let Some(s) = annotation.score {
        out.push_str(&format!("// BIC score: {}\n", s));
    }
    out.push_str(&format!("network {} {{\n}}\n", quote(model.name())));

    let graph = model.graph();
    let order = graph.pre_order();

    for &id in &order {
        let v = graph.variable(id);
        match v.states() {
            Some(states) => {
                out.push_str(&format!("variable {} {{\n", quote(v.name())));
                let names: Vec<String> = states.iter().map(|s| quote(s)).collect();
                out.push_str(&format!(
                    "\ttype discrete[{}] {{ {} }};\n",
                    states.len(),
                    names.join(" ")
                ));
                if v.is_latent() {
                    out.push_str("\tproperty latent;\n");
                }
                out.push_str("}\n");
            }
            None => {
                for c in v.manifest() {
                    out.push_str(&format!(
                        "variable {} {{\n\ttype continuous;\n}}\n",
                        quote(c.name())
                    ));
                }
            }
        }
    }

    for &id in &order {
        let v = graph.variable(id);
        let heads: Vec<String> = if v.is_continuous() {
            v.manifest().iter().map(|c| quote(c.name())).collect()
        } else {
            vec![quote(v.name())]
        };
        let parent = graph
            .parent(id)
            .map(|p| format!(" | {}", quote(graph.variable(p).name())))
            .unwrap_or_default();
        out.push_str(&format!("probability ( {}{} ) {{\n", heads.join(" "), parent));
        match model.potential(v) {
            Some(Potential::Categorical(t)) => {
                // row-major
                let values = t.transpose();
                out.push_str(&format!("\ttable {};\n", join_values(values.iter())));
            }
            Some(Potential::Gaussian(comps)) => {
                let mut values = vec![];
                for c in comps {
                    values.extend(c.mean.iter().copied());
                    for r in c.covariance.row_iter() {
                        values.extend(r.iter().copied());
                    }
                }
                out.push_str(&format!("\ttable {};\n", join_values(values.iter())));
            }
            None => {}
        }
        out.push_str("}\n");
    }
    out
}

/// Write a model file (gzip transparent)
pub fn write_model(
    model: &LatentTreeModel,
    annotation: &ModelAnnotation,
    file: &str,
) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(file)?;
    buf.write_all(format_model(model, annotation).as_bytes())?;
    buf.flush()?;
    info!("wrote model {} to {}", model.name(), file);
    Ok(())
}
