//! Delimited text data sets.

use crate::common_io::{read_lines_of_words_delim, write_lines, Delimiter};
use log::info;
use nalgebra::DMatrix;
use std::collections::{BTreeSet, HashMap};
use tree_model::{LatentTreeModel, MixedData, Variable};

/// Tokens read as a missing value
pub const MISSING_TOKENS: [&str; 4] = ["", "?", "NA", "NaN"];

/// Written for a missing value
pub const MISSING_OUTPUT: &str = "NA";

fn is_missing(token: &str) -> bool {
    MISSING_TOKENS.contains(&token)
}

fn column(lines: &[Vec<Box<str>>], j: usize) -> impl Iterator<Item = &str> + '_ {
    lines.iter().map(move |row| row[j].as_ref())
}

/// Read a data set.
///
/// * `file` - comma separated, or tab separated for `.tsv`/`.tab`/`.txt`,
///   optionally gzipped; the first line names the variables
/// * `schema` - a model whose observed variables fix the kind and state
///   order of columns with the same name
///
/// Without a schema entry a column is continuous when every present
/// value is a number, otherwise discrete with its distinct values sorted
/// as states.
pub fn read_data(file: &str, schema: Option<&LatentTreeModel>) -> anyhow::Result<MixedData> {
    let out = read_lines_of_words_delim(file, Delimiter::from_file_name(file))?;
    let (header, lines) = (out.header, out.lines);

    let known: HashMap<String, Variable> = schema
        .map(|m| {
            m.manifest_variables()
                .into_iter()
                .map(|v| (v.name().to_string(), v))
                .collect()
        })
        .unwrap_or_default();

    let n = lines.len();
    let mut variables = Vec::with_capacity(header.len());
    let mut values = DMatrix::<f64>::from_element(n, header.len(), f64::NAN);

    for (j, name) in header.iter().enumerate() {
        let variable = match known.get(name.as_ref()) {
            Some(v) if v.is_discrete() => {
                Variable::discrete(name, v.states().unwrap_or(&[]).to_vec())
            }
            Some(_) => Variable::continuous(name),
            None => {
                let numeric = column(&lines, j)
                    .filter(|x| !is_missing(x))
                    .all(|x| x.parse::<f64>().is_ok());
                if numeric {
                    Variable::continuous(name)
                } else {
                    let states: BTreeSet<&str> =
                        column(&lines, j).filter(|x| !is_missing(x)).collect();
                    Variable::discrete(name, states.into_iter().map(|s| s.into()).collect())
                }
            }
        };

        for (i, token) in column(&lines, j).enumerate() {
            if is_missing(token) {
                continue;
            }
            values[(i, j)] = match variable.state_index(token) {
                Some(s) => s as f64,
                None if variable.is_discrete() => anyhow::bail!(
                    "{}: line {}: {} is not a state of {}",
                    file,
                    i + 2,
                    token,
                    name
                ),
                None => token.parse::<f64>().map_err(|_| {
                    anyhow::anyhow!("{}: line {}: {} is not a number", file, i + 2, token)
                })?,
            };
        }
        variables.push(variable);
    }

    info!(
        "read {} cases x {} variables from {}",
        n,
        variables.len(),
        file
    );
    MixedData::from_values(variables, values)
}

/// Write a data set in the format `read_data` accepts
pub fn write_data(data: &MixedData, file: &str) -> anyhow::Result<()> {
    let delim = Delimiter::from_file_name(file).as_char().to_string();
    let mut lines = Vec::with_capacity(data.num_cases() + 1);
    lines.push(
        data.variables()
            .iter()
            .map(|v| v.name())
            .collect::<Vec<_>>()
            .join(&delim),
    );
    for i in 0..data.num_cases() {
        let row: Vec<String> = data
            .variables()
            .iter()
            .enumerate()
            .map(|(j, v)| {
                let x = data.value(i, j);
                if x.is_nan() {
                    MISSING_OUTPUT.to_string()
                } else if let Some(states) = v.states() {
                    states[x as usize].to_string()
                } else {
                    x.to_string()
                }
            })
            .collect();
        lines.push(row.join(&delim));
    }
    write_lines(&lines, file)
}
