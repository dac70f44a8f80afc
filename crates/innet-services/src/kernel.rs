//! Iteration kernels — the numeric capability a hop advances.
//!
//! The protocol layer never looks inside a problem or an iterate. A kernel
//! loads the problem from the raw data payload, says how many rounds the
//! problem takes in total, produces the initial iterate, and performs one
//! round at a time.

use serde::{Deserialize, Serialize};

/// One round's outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Step<I> {
    pub next: I,
    pub converged: bool,
}

/// The opaque numeric capability driven by the iteration controller.
pub trait IterationKernel: Send + Sync + 'static {
    type Problem;
    type Iterate;

    /// Decode the raw data payload.
    fn load(&self, payload: &[u8]) -> Result<Self::Problem, KernelError>;

    /// Fixed number of rounds this problem takes when it never converges early.
    fn total_rounds(&self, problem: &Self::Problem) -> u16;

    /// Initial iterate for a fresh computation.
    fn init(&self, problem: &Self::Problem) -> Self::Iterate;

    /// Run round `round` (0-based, global across hops).
    fn step(&self, problem: &Self::Problem, iterate: &Self::Iterate, round: u16)
        -> Step<Self::Iterate>;

    fn encode_iterate(&self, iterate: &Self::Iterate) -> Result<Vec<u8>, KernelError>;

    fn decode_iterate(
        &self,
        problem: &Self::Problem,
        bytes: &[u8],
    ) -> Result<Self::Iterate, KernelError>;
}

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("invalid problem payload: {0}")]
    BadPayload(String),

    #[error("invalid iterate: {0}")]
    BadIterate(String),
}

// ── Scripted kernel ───────────────────────────────────────────────────────────

/// Deterministic kernel for tests and dry runs.
///
/// The iterate is the list of round indices applied so far, so a finished
/// computation shows exactly which rounds ran and in what order. Converges
/// once round `converge_after - 1` has run, if set.
#[derive(Debug, Clone)]
pub struct ScriptedKernel {
    pub total_rounds: u16,
    pub converge_after: Option<u16>,
}

impl ScriptedKernel {
    pub fn new(total_rounds: u16) -> Self {
        Self {
            total_rounds,
            converge_after: None,
        }
    }

    pub fn converging_after(mut self, rounds: u16) -> Self {
        self.converge_after = Some(rounds);
        self
    }
}

impl IterationKernel for ScriptedKernel {
    type Problem = ();
    type Iterate = Vec<u16>;

    fn load(&self, _payload: &[u8]) -> Result<(), KernelError> {
        Ok(())
    }

    fn total_rounds(&self, _problem: &()) -> u16 {
        self.total_rounds
    }

    fn init(&self, _problem: &()) -> Vec<u16> {
        Vec::new()
    }

    fn step(&self, _problem: &(), iterate: &Vec<u16>, round: u16) -> Step<Vec<u16>> {
        let mut next = iterate.clone();
        next.push(round);
        Step {
            next,
            converged: self.converge_after.is_some_and(|c| round + 1 >= c),
        }
    }

    fn encode_iterate(&self, iterate: &Vec<u16>) -> Result<Vec<u8>, KernelError> {
        serde_json::to_vec(iterate).map_err(|e| KernelError::BadIterate(e.to_string()))
    }

    fn decode_iterate(&self, _problem: &(), bytes: &[u8]) -> Result<Vec<u16>, KernelError> {
        serde_json::from_slice(bytes).map_err(|e| KernelError::BadIterate(e.to_string()))
    }
}

// ── Power iteration kernel ────────────────────────────────────────────────────

/// Row-major matrix: `rows` mixed signals × `cols` samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl Matrix {
    pub fn to_bytes(&self) -> Result<Vec<u8>, KernelError> {
        serde_json::to_vec(self).map_err(|e| KernelError::BadPayload(e.to_string()))
    }

    fn sample(&self, col: usize) -> impl Iterator<Item = f64> + '_ {
        (0..self.rows).map(move |r| self.data[r * self.cols + col])
    }
}

/// Samples in the first stage. Each later stage doubles the sample count.
pub const MIN_STAGE_SAMPLES: usize = 16;

/// Extracts the dominant unmixing direction of a mixture matrix.
///
/// Round `r` applies one power step with the sample covariance of the first
/// `cols / 2^(R-1-r)` samples, so early rounds are cheap and later rounds
/// refine on more data. The result is sign-aligned with the previous
/// iterate so convergence can be measured as a plain distance.
#[derive(Debug, Clone)]
pub struct PowerIterationKernel {
    pub tolerance: f64,
}

impl Default for PowerIterationKernel {
    fn default() -> Self {
        Self { tolerance: 1e-9 }
    }
}

/// A loaded mixture plus its stage sizes.
#[derive(Debug, Clone)]
pub struct StagedMixture {
    pub matrix: Matrix,
    pub stages: Vec<usize>,
}

fn stage_sizes(cols: usize) -> Vec<usize> {
    let mut sizes = vec![cols];
    let mut n = cols;
    while n / 2 >= MIN_STAGE_SAMPLES && sizes.len() < u8::MAX as usize {
        n /= 2;
        sizes.push(n);
    }
    sizes.reverse();
    sizes
}

fn normalize(v: &mut [f64]) {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

impl IterationKernel for PowerIterationKernel {
    type Problem = StagedMixture;
    type Iterate = Vec<f64>;

    fn load(&self, payload: &[u8]) -> Result<StagedMixture, KernelError> {
        let matrix: Matrix =
            serde_json::from_slice(payload).map_err(|e| KernelError::BadPayload(e.to_string()))?;
        if matrix.rows == 0 || matrix.cols == 0 {
            return Err(KernelError::BadPayload("matrix has no rows or columns".into()));
        }
        // Dimensions come off the wire: the product must match the values
        // actually carried, which also bounds `rows` by the payload size.
        if matrix.rows.checked_mul(matrix.cols) != Some(matrix.data.len()) {
            return Err(KernelError::BadPayload(format!(
                "{}x{} matrix carries {} values",
                matrix.rows,
                matrix.cols,
                matrix.data.len()
            )));
        }
        let stages = stage_sizes(matrix.cols);
        Ok(StagedMixture { matrix, stages })
    }

    fn total_rounds(&self, problem: &StagedMixture) -> u16 {
        problem.stages.len() as u16
    }

    fn init(&self, problem: &StagedMixture) -> Vec<f64> {
        let rows = problem.matrix.rows;
        vec![1.0 / (rows as f64).sqrt(); rows]
    }

    fn step(&self, problem: &StagedMixture, iterate: &Vec<f64>, round: u16) -> Step<Vec<f64>> {
        let matrix = &problem.matrix;
        let samples = problem
            .stages
            .get(round as usize)
            .copied()
            .unwrap_or(matrix.cols);

        let mut next = vec![0.0; matrix.rows];
        for col in 0..samples {
            let projection: f64 = matrix.sample(col).zip(iterate).map(|(x, w)| x * w).sum();
            for (acc, x) in next.iter_mut().zip(matrix.sample(col)) {
                *acc += projection * x;
            }
        }
        next.iter_mut().for_each(|x| *x /= samples as f64);
        normalize(&mut next);

        let dot: f64 = next.iter().zip(iterate).map(|(a, b)| a * b).sum();
        if dot < 0.0 {
            next.iter_mut().for_each(|x| *x = -*x);
        }
        let moved = next
            .iter()
            .zip(iterate)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();

        Step {
            next,
            converged: moved < self.tolerance,
        }
    }

    fn encode_iterate(&self, iterate: &Vec<f64>) -> Result<Vec<u8>, KernelError> {
        // JSON has no NaN or infinity; serde_json would write `null`.
        if let Some(i) = iterate.iter().position(|w| !w.is_finite()) {
            return Err(KernelError::BadIterate(format!(
                "weight {} is {}",
                i, iterate[i]
            )));
        }
        serde_json::to_vec(iterate).map_err(|e| KernelError::BadIterate(e.to_string()))
    }

    fn decode_iterate(&self, problem: &StagedMixture, bytes: &[u8]) -> Result<Vec<f64>, KernelError> {
        let iterate: Vec<f64> =
            serde_json::from_slice(bytes).map_err(|e| KernelError::BadIterate(e.to_string()))?;
        if iterate.len() != problem.matrix.rows {
            return Err(KernelError::BadIterate(format!(
                "expected {} weights, got {}",
                problem.matrix.rows,
                iterate.len()
            )));
        }
        Ok(iterate)
    }
}
