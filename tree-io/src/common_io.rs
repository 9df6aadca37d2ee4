use flate2::read::GzDecoder;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Column separator of a delimited file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Comma,
    Tab,
}

impl Delimiter {
    pub fn as_char(&self) -> char {
        match self {
            Delimiter::Comma => ',',
            Delimiter::Tab => '\t',
        }
    }

    /// `.tsv`, `.tab`, `.txt` (optionally `.gz`) are tab separated;
    /// everything else comma separated
    pub fn from_file_name(file: &str) -> Self {
        let stem = file.strip_suffix(".gz").unwrap_or(file);
        match Path::new(stem).extension().and_then(|x| x.to_str()) {
            Some("tsv") | Some("tab") | Some("txt") => Delimiter::Tab,
            _ => Delimiter::Comma,
        }
    }
}

impl From<char> for Delimiter {
    fn from(c: char) -> Self {
        if c == '\t' {
            Delimiter::Tab
        } else {
            Delimiter::Comma
        }
    }
}

///
/// Read every line of the input_file into memory
///
/// * `input_file` - file name--either gzipped or not
///
pub fn read_lines(input_file_path: &str) -> anyhow::Result<Vec<Box<str>>> {
    let buf: Box<dyn BufRead> = open_buf_reader(input_file_path)?;
    let mut lines = vec![];
    for x in buf.lines() {
        lines.push(x?.into_boxed_str());
    }
    Ok(lines)
}

///
/// Write every line into the output_file
///
/// * `lines` - vector of lines
/// * `output_file` - file name--either gzipped or not
///
pub fn write_lines<T>(lines: &[T], output_file_path: &str) -> anyhow::Result<()>
where
    T: std::fmt::Display,
{
    let mut buf = open_buf_writer(output_file_path)?;
    for line in lines {
        if let Err(e) = writeln!(buf, "{}", line) {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            } else {
                return Err(anyhow::anyhow!("unexpected error: {}", e));
            }
        }
    }
    buf.flush()?;
    Ok(())
}

pub struct ReadLinesOut {
    pub lines: Vec<Vec<Box<str>>>,
    pub header: Vec<Box<str>>,
}

///
/// Read a delimited file with a header line. Blank lines and lines
/// starting with `#` are skipped; fields are trimmed.
///
/// * `input_file` - file name--either gzipped or not
/// * `delim` - column separator
///
pub fn read_lines_of_words_delim(
    input_file: &str,
    delim: impl Into<Delimiter>,
) -> anyhow::Result<ReadLinesOut> {
    let delim = delim.into().as_char();

    // 1-based line numbers survive the filter for error messages
    let lines_raw: Vec<(usize, Box<str>)> = read_lines(input_file)?
        .into_iter()
        .enumerate()
        .filter(|(_, x)| !x.trim().is_empty() && !x.starts_with('#'))
        .map(|(i, x)| (i + 1, x))
        .collect();

    let ((_, first), rest) = lines_raw
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("{} has no header line", input_file))?;

    let split = |line: &str| -> Vec<Box<str>> {
        line.split(delim)
            .map(|x| x.trim().trim_matches('"').to_owned().into_boxed_str())
            .collect()
    };

    let header = split(first);

    // parsing is slower than reading; rows keep their order
    let lines: Vec<Vec<Box<str>>> = rest.par_iter().map(|(_, s)| split(s)).collect();

    for ((lineno, _), row) in rest.iter().zip(lines.iter()) {
        if row.len() != header.len() {
            anyhow::bail!(
                "{}: line {} has {} fields, expected {}",
                input_file,
                lineno,
                row.len(),
                header.len()
            );
        }
    }

    Ok(ReadLinesOut { lines, header })
}

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    let file = File::open(input_file)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", input_file, e))?;
    match ext {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn std::io::Write>> {
    // we can simply override with stdout
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(std::io::BufWriter::new(std::io::stdout())));
    }

    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    match ext {
        Some("gz") => {
            let output_file = File::create(output_file)?;
            let encoder =
                flate2::write::GzEncoder::new(output_file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => {
            let output_file = File::create(output_file)?;
            Ok(Box::new(BufWriter::new(output_file)))
        }
    }
}

///
/// Create a directory if needed
/// * `file` - file name
///
pub fn mkdir(file: &str) -> anyhow::Result<()> {
    let path = Path::new(file);
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gz_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("x.tsv.gz");
        let file = file.to_str().ok_or_else(|| anyhow::anyhow!("path"))?;
        write_lines(&["a\tb", "# note", "1\t2", "", "3\t4"], file)?;
        let out = read_lines_of_words_delim(file, Delimiter::from_file_name(file))?;
        let header: Vec<Box<str>> = vec!["a".into(), "b".into()];
        assert_eq!(out.header, header);
        assert_eq!(out.lines.len(), 2);
        assert_eq!(out.lines[1][0].as_ref(), "3");
        Ok(())
    }

    #[test]
    fn test_ragged_rows_fail() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("x.csv");
        let file = file.to_str().ok_or_else(|| anyhow::anyhow!("path"))?;
        write_lines(&["a,b", "1"], file)?;
        assert!(read_lines_of_words_delim(file, ',').is_err());

        // skipped lines still count
        write_lines(&["# comment", "a,b", "", "1,2", "# more", "3"], file)?;
        let err = read_lines_of_words_delim(file, ',').err();
        let msg = err.map(|e| e.to_string()).unwrap_or_default();
        assert!(msg.contains("line 6 has 1 fields"), "{}", msg);
        Ok(())
    }
}
