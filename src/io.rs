//! Textual export and import
//!
//! Self-describing whitespace-separated blocks: numeric tokens first, with
//! human-readable `//` comments after them. Readers tokenize line by line,
//! dropping everything from `//` to the end of the line, so they accept
//! exactly what the writers emit. Values print in Rust's shortest
//! round-trip form, which keeps write-then-read element-wise exact.

use crate::ann::{Activation, NeuralNetwork};
use crate::error::{DrmError, Result};
use crate::statespace::StateSpace;
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::io::{BufRead, Write};

/// Format version emitted in matrix headers.
const MATRIX_FORMAT_VERSION: usize = 0;

/// Whitespace tokenizer that strips `//` comments
pub struct TokenReader<R: BufRead> {
    reader: R,
    tokens: VecDeque<String>,
}

impl<R: BufRead> TokenReader<R> {
    /// Wrap a buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            tokens: VecDeque::new(),
        }
    }

    fn refill(&mut self) -> Result<bool> {
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(false);
            }
            let content = match line.find("//") {
                Some(pos) => &line[..pos],
                None => &line[..],
            };
            for token in content.split_whitespace() {
                self.tokens.push_back(token.to_string());
            }
            if !self.tokens.is_empty() {
                return Ok(true);
            }
        }
    }

    fn next_token(&mut self) -> Result<String> {
        while self.tokens.is_empty() {
            if !self.refill()? {
                return Err(DrmError::ParseError {
                    message: "unexpected end of input".to_string(),
                });
            }
        }
        Ok(self.tokens.pop_front().unwrap())
    }

    /// Next token parsed as f64.
    pub fn next_f64(&mut self) -> Result<f64> {
        let token = self.next_token()?;
        token.parse().map_err(|_| DrmError::ParseError {
            message: format!("expected a number, found '{}'", token),
        })
    }

    /// Next token parsed as usize.
    pub fn next_usize(&mut self) -> Result<usize> {
        let token = self.next_token()?;
        token.parse().map_err(|_| DrmError::ParseError {
            message: format!("expected an integer, found '{}'", token),
        })
    }
}

/// Write a matrix block: version, rows, cols, allocated flag, then rows.
pub fn write_matrix<W: Write>(writer: &mut W, m: &DMatrix<f64>) -> Result<()> {
    let allocated = usize::from(m.nrows() * m.ncols() > 0);
    writeln!(writer, "{}\t//version number", MATRIX_FORMAT_VERSION)?;
    writeln!(writer, "{}\t//number of rows", m.nrows())?;
    writeln!(writer, "{}\t//number of columns", m.ncols())?;
    writeln!(writer, "{}\t//0 if empty, 1 if contains elements", allocated)?;
    if allocated == 1 {
        for i in 0..m.nrows() {
            let row: Vec<String> = (0..m.ncols()).map(|j| format!("{}", m[(i, j)])).collect();
            writeln!(writer, "{}", row.join("\t"))?;
        }
    }
    Ok(())
}

/// Read a matrix block written by [`write_matrix`].
pub fn read_matrix<R: BufRead>(reader: &mut TokenReader<R>) -> Result<DMatrix<f64>> {
    let version = reader.next_usize()?;
    if version != MATRIX_FORMAT_VERSION {
        return Err(DrmError::ParseError {
            message: format!("unsupported matrix format version {}", version),
        });
    }
    let nrow = reader.next_usize()?;
    let ncol = reader.next_usize()?;
    let allocated = reader.next_usize()?;
    let mut m = DMatrix::zeros(nrow, ncol);
    if allocated == 1 {
        for i in 0..nrow {
            for j in 0..ncol {
                m[(i, j)] = reader.next_f64()?;
            }
        }
    }
    Ok(m)
}

/// Write a state-space block: order, A rows, B row. The output row C is
/// not persisted; the consuming network maps states directly.
pub fn write_state_space<W: Write>(writer: &mut W, ss: &StateSpace) -> Result<()> {
    let n = ss.order();
    writeln!(writer, "{}\t//number of states", n)?;
    writeln!(writer, "//A matrix")?;
    for i in 0..n {
        let row: Vec<String> = (0..n).map(|j| format!("{}", ss.a[(i, j)])).collect();
        writeln!(writer, "{}", row.join("\t"))?;
    }
    writeln!(writer, "//B matrix")?;
    let row: Vec<String> = (0..n).map(|i| format!("{}", ss.b[i])).collect();
    writeln!(writer, "{}", row.join("\t"))?;
    Ok(())
}

/// Read a state-space block written by [`write_state_space`].
pub fn read_state_space<R: BufRead>(reader: &mut TokenReader<R>) -> Result<StateSpace> {
    let n = reader.next_usize()?;
    let mut a = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            a[(i, j)] = reader.next_f64()?;
        }
    }
    let mut b = DVector::zeros(n);
    for i in 0..n {
        b[i] = reader.next_f64()?;
    }
    StateSpace::from_parts(a, b, DVector::zeros(n))
}

fn activation_index(activation: Activation) -> usize {
    match activation {
        Activation::Linear => 0,
        Activation::Sigmoid => 1,
        Activation::SymmetricSigmoid => 2,
    }
}

fn activation_from_index(index: usize) -> Result<Activation> {
    match index {
        0 => Ok(Activation::Linear),
        1 => Ok(Activation::Sigmoid),
        2 => Ok(Activation::SymmetricSigmoid),
        other => Err(DrmError::ParseError {
            message: format!("unknown activation index {}", other),
        }),
    }
}

/// Write a network block: topology, activations, steepness, weights and
/// channel scaling.
pub fn write_network<W: Write>(writer: &mut W, net: &NeuralNetwork) -> Result<()> {
    writeln!(writer, "{}\t//number of inputs", net.n_input())?;
    writeln!(writer, "{}\t//number of outputs", net.n_output())?;
    let hidden = net.hidden_layer_sizes();
    writeln!(writer, "{}\t//number of hidden layers", hidden.len())?;
    let sizes: Vec<String> = hidden.iter().map(|h| h.to_string()).collect();
    writeln!(
        writer,
        "{}\t//neurons per hidden layer excluding bias",
        sizes.join("\t")
    )?;
    writeln!(writer, "{}\t//hidden activation", activation_index(net.hidden_activation))?;
    writeln!(writer, "{}\t//output activation", activation_index(net.output_activation))?;
    writeln!(writer, "{}\t//hidden steepness", net.steepness_hidden)?;
    writeln!(writer, "{}\t//output steepness", net.steepness_output)?;
    writeln!(writer, "//list of weights for {} connections", net.n_connection())?;
    for w in net.weights() {
        writeln!(writer, "{}", w)?;
    }
    let (mean, sigma) = net.channel_scaling();
    let row: Vec<String> = mean.iter().map(|v| v.to_string()).collect();
    writeln!(writer, "{}\t//mean of training data", row.join("\t"))?;
    let row: Vec<String> = sigma.iter().map(|v| v.to_string()).collect();
    writeln!(writer, "{}\t//standard deviation of training data", row.join("\t"))?;
    Ok(())
}

/// Read a network block written by [`write_network`].
pub fn read_network<R: BufRead>(reader: &mut TokenReader<R>) -> Result<NeuralNetwork> {
    let n_input = reader.next_usize()?;
    let n_output = reader.next_usize()?;
    let n_hidden_layers = reader.next_usize()?;
    let mut hidden = Vec::with_capacity(n_hidden_layers);
    for _ in 0..n_hidden_layers {
        hidden.push(reader.next_usize()?);
    }
    // Weights and scaling are overwritten below, the seed is irrelevant
    let mut rng = SmallRng::seed_from_u64(0);
    let mut net = NeuralNetwork::new(n_input, n_output, &hidden, &mut rng)?;
    net.hidden_activation = activation_from_index(reader.next_usize()?)?;
    net.output_activation = activation_from_index(reader.next_usize()?)?;
    net.steepness_hidden = reader.next_f64()?;
    net.steepness_output = reader.next_f64()?;
    let mut weights = vec![0.0; net.n_connection()];
    for w in weights.iter_mut() {
        *w = reader.next_f64()?;
    }
    net.set_weights(&weights)?;
    let n_chan = n_input + n_output;
    let mut mean = vec![0.0; n_chan];
    for m in mean.iter_mut() {
        *m = reader.next_f64()?;
    }
    let mut sigma = vec![0.0; n_chan];
    for s in sigma.iter_mut() {
        *s = reader.next_f64()?;
    }
    net.set_channel_scaling(&mean, &sigma)?;
    Ok(net)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    #[test]
    fn matrix_round_trip_is_exact() {
        let m = DMatrix::from_row_slice(2, 3, &[1.5, -2.25, 1.0 / 3.0, 0.0, 1e-17, 7.0]);
        let mut buffer = Vec::new();
        write_matrix(&mut buffer, &m).unwrap();
        let mut reader = TokenReader::new(BufReader::new(buffer.as_slice()));
        let back = read_matrix(&mut reader).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn empty_matrix_round_trips() {
        let m = DMatrix::<f64>::zeros(0, 0);
        let mut buffer = Vec::new();
        write_matrix(&mut buffer, &m).unwrap();
        let mut reader = TokenReader::new(BufReader::new(buffer.as_slice()));
        let back = read_matrix(&mut reader).unwrap();
        assert_eq!(back.nrows(), 0);
    }

    #[test]
    fn state_space_round_trip() {
        let a = DMatrix::from_row_slice(2, 2, &[0.5, 0.0, 0.25, 0.5]);
        let b = DVector::from_vec(vec![1.0, 0.0]);
        let c = DVector::from_vec(vec![0.1, 0.2]);
        let ss = StateSpace::from_parts(a, b, c).unwrap();
        let mut buffer = Vec::new();
        write_state_space(&mut buffer, &ss).unwrap();
        let mut reader = TokenReader::new(BufReader::new(buffer.as_slice()));
        let back = read_state_space(&mut reader).unwrap();
        assert_eq!(ss.a, back.a);
        assert_eq!(ss.b, back.b);
    }

    #[test]
    fn network_round_trip_preserves_prediction() {
        let mut rng = SmallRng::seed_from_u64(13);
        let mut net = NeuralNetwork::new(2, 1, &[3], &mut rng).unwrap();
        let mut dc = crate::data::DataCollection::new(4, 2, 1);
        for i in 0..4 {
            dc.data[(i, 0)] = i as f64;
            dc.data[(i, 1)] = -(i as f64);
            dc.data[(i, 2)] = 0.5 * i as f64;
        }
        net.fit_scaling(&dc).unwrap();

        let mut buffer = Vec::new();
        write_network(&mut buffer, &net).unwrap();
        let mut reader = TokenReader::new(BufReader::new(buffer.as_slice()));
        let mut back = read_network(&mut reader).unwrap();

        assert_eq!(net.weights(), back.weights());
        let mut out1 = [0.0];
        let mut out2 = [0.0];
        net.predict(&[0.3, -0.8], &mut out1).unwrap();
        back.predict(&[0.3, -0.8], &mut out2).unwrap();
        assert_eq!(out1[0], out2[0]);
    }

    #[test]
    fn comments_are_ignored_mid_line() {
        let text = "0 //version\n2 //rows\n1\t//cols\n1 //allocated\n1.5\n-2.5 //trailing note\n";
        let mut reader = TokenReader::new(BufReader::new(text.as_bytes()));
        let m = read_matrix(&mut reader).unwrap();
        assert_eq!(m[(0, 0)], 1.5);
        assert_eq!(m[(1, 0)], -2.5);
    }
}
