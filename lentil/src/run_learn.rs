use crate::common::*;
use std::str::FromStr;
use tree_em::evaluation::class_agreement;
use tree_search::{learn, SearchSettings};

/// Which data column holds class labels to hold out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassColumn {
    First,
    Last,
    None,
    Index(usize),
}

impl FromStr for ClassColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first" => Ok(ClassColumn::First),
            "last" => Ok(ClassColumn::Last),
            "none" => Ok(ClassColumn::None),
            x => x
                .parse::<usize>()
                .map(ClassColumn::Index)
                .map_err(|_| format!("expected first, last, none or a column index: {}", s)),
        }
    }
}

impl ClassColumn {
    /// Column index among `num_columns`, if any
    pub fn resolve(&self, num_columns: usize) -> anyhow::Result<Option<usize>> {
        let j = match *self {
            ClassColumn::None => return Ok(None),
            ClassColumn::First => 0,
            ClassColumn::Last => num_columns.saturating_sub(1),
            ClassColumn::Index(j) => j,
        };
        if j >= num_columns {
            anyhow::bail!("class column {} out of {} columns", j, num_columns);
        }
        Ok(Some(j))
    }
}

#[derive(Args, Debug)]
pub struct LearnArgs {
    /// Data file (csv, or tsv/tab/txt; .gz ok) with a header line
    #[arg(long, short, required = true)]
    data: Box<str>,

    /// Initial model; a latent class model over all columns if absent
    #[arg(long, short)]
    model: Option<Box<str>>,

    /// JSON settings file
    #[arg(long, short)]
    settings: Option<Box<str>>,

    /// Class column to hold out: first, last, none or a 0-based index
    #[arg(long, short, default_value = "none")]
    class: ClassColumn,

    /// Output model file
    #[arg(long, short, required = true)]
    output: Box<str>,

    /// States of the latent class model's root
    #[arg(long, short = 'k', default_value_t = DEFAULT_CARDINALITY)]
    cardinality: usize,

    /// Worker threads; overrides the settings file
    #[arg(long, short)]
    threads: Option<usize>,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

pub fn run_learn(args: &LearnArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let initial = args.model.as_deref().map(read_model).transpose()?;
    let raw = read_data(&args.data, initial.as_ref())?;
    info!(
        "{} cases, {} variables from {}",
        raw.num_cases(),
        raw.variables().len(),
        args.data
    );

    // 1. hold out the class column
    let (data, class) = match args.class.resolve(raw.variables().len())? {
        Some(j) => {
            let v = raw.variables()[j].clone();
            let labels: Vec<f64> = (0..raw.num_cases()).map(|i| raw.value(i, j)).collect();
            info!("holding out {} as the class", v);
            (raw.without_column(j)?, Some((v, labels)))
        }
        None => (raw, None),
    };

    // 2. settings
    let mut settings = match args.settings.as_deref() {
        Some(file) => SearchSettings::from_json_file(file)?,
        None => SearchSettings::default(),
    };
    if let Some(t) = args.threads {
        settings.threads = t;
    }
    settings.validate()?;

    // 3. starting model
    let model = match initial {
        Some(m) => m,
        None => LatentTreeModel::latent_class("lcm", data.variables(), args.cardinality)?,
    };
    let data = Arc::new(data.synchronize(&model)?);

    // 4. search
    let result = learn(data.clone(), &model, &settings)?;
    let best = &result.estimate;
    info!(
        "{} round(s), {} step(s): BIC {:.4} -> {:.4}, {}",
        result.rounds,
        result.history.len(),
        result.initial_score,
        best.score,
        best.model.summary()
    );

    let annotation = ModelAnnotation {
        loglikelihood: Some(best.loglikelihood),
        score: Some(best.score),
    };
    write_model(&best.model, &annotation, &args.output)?;

    // 5. agreement with the held-out class
    if let Some((v, labels)) = class {
        match v.cardinality() {
            Some(k) => {
                for (z, nmi) in class_agreement(&best.model, &data, &labels, k)? {
                    info!("NMI({}, {}) = {:.4}", v, z, nmi);
                }
            }
            None => warn!("class {} is continuous; skipping NMI", v),
        }
    }
    Ok(())
}
