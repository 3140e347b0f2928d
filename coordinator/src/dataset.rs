use std::{
    error::Error,
    fmt,
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};

use rand::{Rng, seq::index};

/// A binary class label, always `1` or `-1`.
pub type Label = i8;

/// A sparse sample as `(feature index, value)` pairs.
pub type Features = Vec<(u32, f32)>;

#[derive(Debug)]
pub enum DatasetErr {
    Io(io::Error),
    Parse { line: usize, detail: String },
    Empty,
    LengthMismatch { samples: usize, labels: usize },
}

impl fmt::Display for DatasetErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Parse { line, detail } => write!(f, "line {line}: {detail}"),
            Self::Empty => write!(f, "the dataset has no samples"),
            Self::LengthMismatch { samples, labels } => {
                write!(f, "got {samples} samples but {labels} labels")
            }
        }
    }
}

impl Error for DatasetErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DatasetErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// A labelled set of sparse samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    samples: Vec<Features>,
    labels: Vec<Label>,
}

/// The outcome of holding out part of a dataset for validation.
#[derive(Debug, Clone)]
pub struct Split {
    pub validation: Dataset,
    /// Positions of the validation samples in the full dataset, sorted.
    pub val_indices: Vec<usize>,
    pub train_len: usize,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `samples` - The sparse feature vectors.
    /// * `labels` - One label per sample, anything positive maps to `1`, the rest to `-1`.
    ///
    /// # Returns
    /// A new dataset or an error if the lengths differ.
    pub fn new(samples: Vec<Features>, labels: Vec<Label>) -> Result<Self, DatasetErr> {
        if samples.len() != labels.len() {
            return Err(DatasetErr::LengthMismatch {
                samples: samples.len(),
                labels: labels.len(),
            });
        }

        let labels = labels.into_iter().map(to_label).collect();
        Ok(Self { samples, labels })
    }

    /// Reads a dataset from a file, see `Dataset::parse` for the format.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DatasetErr> {
        let file = File::open(path)?;
        Self::parse(BufReader::new(file))
    }

    /// Parses one sample per line as `<label> <index>:<value> ...`.
    ///
    /// Blank lines and anything after a `#` are ignored.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, DatasetErr> {
        let mut samples = Vec::new();
        let mut labels = Vec::new();

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let content = line.split('#').next().unwrap_or_default().trim();
            if content.is_empty() {
                continue;
            }

            let parse_err = |detail: String| DatasetErr::Parse { line: i + 1, detail };
            let mut tokens = content.split_whitespace();

            let label: f32 = tokens
                .next()
                .unwrap_or_default()
                .parse()
                .map_err(|e| parse_err(format!("invalid label: {e}")))?;

            let mut features = Features::new();
            for token in tokens {
                let Some((index, value)) = token.split_once(':') else {
                    return Err(parse_err(format!("expected index:value, got '{token}'")));
                };

                let index: u32 = index
                    .parse()
                    .map_err(|e| parse_err(format!("invalid index '{index}': {e}")))?;
                let value: f32 = value
                    .parse()
                    .map_err(|e| parse_err(format!("invalid value '{value}': {e}")))?;

                if !value.is_finite() {
                    return Err(parse_err(format!("non finite value at index {index}")));
                }

                features.push((index, value));
            }

            samples.push(features);
            labels.push(if label > 0.0 { 1 } else { -1 });
        }

        if samples.is_empty() {
            return Err(DatasetErr::Empty);
        }

        Ok(Self { samples, labels })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Features] {
        &self.samples
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// The model dimension needed to cover every feature, the largest index plus one.
    pub fn dimension(&self) -> usize {
        self.samples
            .iter()
            .flatten()
            .map(|&(index, _)| index as usize + 1)
            .max()
            .unwrap_or(0)
    }

    /// Selects the samples at the given positions, in the given order.
    pub fn select(&self, indices: &[usize]) -> Self {
        let samples = indices.iter().map(|&i| self.samples[i].clone()).collect();
        let labels = indices.iter().map(|&i| self.labels[i]).collect();
        Self { samples, labels }
    }

    /// Holds out a random fraction of the samples for validation.
    ///
    /// # Arguments
    /// * `fraction` - The share of samples to hold out, in `[0, 1)`.
    /// * `rng` - The source of randomness, seed it for reproducible splits.
    ///
    /// # Returns
    /// The validation samples along with their positions in this dataset.
    pub fn split<R: Rng + ?Sized>(&self, fraction: f32, rng: &mut R) -> Split {
        let len = self.len();
        let amount = ((len as f64 * fraction as f64).floor() as usize).min(len);

        let mut val_indices = index::sample(rng, len, amount).into_vec();
        val_indices.sort_unstable();

        Split {
            validation: self.select(&val_indices),
            train_len: len - val_indices.len(),
            val_indices,
        }
    }
}

fn to_label(raw: Label) -> Label {
    if raw > 0 { 1 } else { -1 }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    const SAMPLE: &str = "\
# label index:value ...
+1 0:0.5 3:1.0
-1 1:2.0

0 2:1.5 # zero counts as the negative class
1 9:-1.0
";

    #[test]
    fn parses_sparse_lines() {
        let data = Dataset::parse(SAMPLE.as_bytes()).unwrap();

        assert_eq!(data.len(), 4);
        assert_eq!(data.labels(), &[1, -1, -1, 1]);
        assert_eq!(data.samples()[0], vec![(0, 0.5), (3, 1.0)]);
        assert_eq!(data.dimension(), 10);
    }

    #[test]
    fn reports_the_offending_line() {
        let err = Dataset::parse("1 0:1.0\n-1 3-2.0\n".as_bytes()).unwrap_err();
        assert!(matches!(err, DatasetErr::Parse { line: 2, .. }), "{err}");

        let err = Dataset::parse("1 0:nan\n".as_bytes()).unwrap_err();
        assert!(matches!(err, DatasetErr::Parse { line: 1, .. }), "{err}");
    }

    #[test]
    fn empty_input_is_an_error() {
        let err = Dataset::parse("# nothing here\n\n".as_bytes()).unwrap_err();
        assert!(matches!(err, DatasetErr::Empty));
    }

    #[test]
    fn new_normalizes_labels_and_checks_lengths() {
        let data = Dataset::new(vec![vec![], vec![]], vec![3, 0]).unwrap();
        assert_eq!(data.labels(), &[1, -1]);

        let err = Dataset::new(vec![vec![]], vec![]).unwrap_err();
        assert!(matches!(
            err,
            DatasetErr::LengthMismatch {
                samples: 1,
                labels: 0
            }
        ));
    }

    #[test]
    fn split_is_reproducible_and_disjoint() {
        let samples = (0..100).map(|i| vec![(i, 1.0)]).collect();
        let data = Dataset::new(samples, vec![1; 100]).unwrap();

        let a = data.split(0.2, &mut StdRng::seed_from_u64(7));
        let b = data.split(0.2, &mut StdRng::seed_from_u64(7));

        assert_eq!(a.val_indices, b.val_indices);
        assert_eq!(a.val_indices.len(), 20);
        assert_eq!(a.train_len, 80);
        assert!(a.val_indices.windows(2).all(|w| w[0] < w[1]));

        for (pos, &i) in a.val_indices.iter().enumerate() {
            assert_eq!(a.validation.samples()[pos], vec![(i as u32, 1.0)]);
        }
    }

    #[test]
    fn zero_fraction_holds_out_nothing() {
        let data = Dataset::parse(SAMPLE.as_bytes()).unwrap();
        let split = data.split(0.0, &mut StdRng::seed_from_u64(1));

        assert!(split.validation.is_empty());
        assert!(split.val_indices.is_empty());
        assert_eq!(split.train_len, 4);
    }
}
