//! Linear state tomography.
//!
//! Stokes parameters are expectation values of Pauli products,
//! `T_p = <σ_p1 ⊗ ... ⊗ σ_pn>`, estimated from normalized outcome frequencies.
//! A parameter with identity on some qubits is averaged over every basis group
//! that measures the remaining qubits in the right bases. The density matrix
//! is then
//!
//! ```text
//! ρ = 1/2ⁿ Σ_p T_p σ_p
//! ```
//!
//! with qubit 1 as the first tensor factor. Nothing forces ρ to be physical;
//! counting noise can push the purity above one, which is reported through
//! [`Diagnostics`] rather than corrected.

use crate::analysis::frequency::{normalize, FrequencyTable};
use crate::error::{AppResult, DaqError};
use crate::experiment::{Basis, ExperimentVariant, Projection, SettingGroup};
use chrono::{DateTime, Utc};
use num_complex::Complex64;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);
const ONE: Complex64 = Complex64::new(1.0, 0.0);
const IM: Complex64 = Complex64::new(0.0, 1.0);

/// Single-qubit Pauli operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pauli {
    /// Identity
    I,
    /// σx
    X,
    /// σy
    Y,
    /// σz
    Z,
}

impl Pauli {
    /// Identity first, then X, Y, Z.
    pub const ALL: [Pauli; 4] = [Pauli::I, Pauli::X, Pauli::Y, Pauli::Z];

    /// Character used in Stokes parameter names.
    pub fn symbol(self) -> char {
        match self {
            Pauli::I => '0',
            Pauli::X => 'X',
            Pauli::Y => 'Y',
            Pauli::Z => 'Z',
        }
    }

    /// Measurement basis that estimates this operator.
    pub fn basis(self) -> Option<Basis> {
        match self {
            Pauli::I => None,
            Pauli::X => Some(Basis::X),
            Pauli::Y => Some(Basis::Y),
            Pauli::Z => Some(Basis::Z),
        }
    }

    /// 2×2 matrix.
    pub fn matrix(self) -> DensityMatrix {
        let data = match self {
            Pauli::I => [ONE, ZERO, ZERO, ONE],
            Pauli::X => [ZERO, ONE, ONE, ZERO],
            Pauli::Y => [ZERO, -IM, IM, ZERO],
            Pauli::Z => [ONE, ZERO, ZERO, -ONE],
        };
        DensityMatrix {
            dim: 2,
            data: data.to_vec(),
        }
    }
}

/// Polarization state selected by a projection, as a ket in the H/V basis.
pub fn projection_ket(projection: Projection) -> [Complex64; 2] {
    let h = std::f64::consts::FRAC_1_SQRT_2;
    match projection {
        Projection::H => [ONE, ZERO],
        Projection::V => [ZERO, ONE],
        Projection::P => [Complex64::new(h, 0.0), Complex64::new(h, 0.0)],
        Projection::M => [Complex64::new(h, 0.0), Complex64::new(-h, 0.0)],
        Projection::R => [Complex64::new(h, 0.0), Complex64::new(0.0, h)],
        Projection::L => [Complex64::new(h, 0.0), Complex64::new(0.0, -h)],
    }
}

/// Square complex matrix, row-major.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DensityMatrix {
    dim: usize,
    data: Vec<Complex64>,
}

impl DensityMatrix {
    /// All-zero `dim × dim` matrix.
    pub fn zeros(dim: usize) -> Self {
        Self {
            dim,
            data: vec![ZERO; dim * dim],
        }
    }

    /// `dim × dim` identity.
    pub fn identity(dim: usize) -> Self {
        let mut m = Self::zeros(dim);
        for i in 0..dim {
            m.data[i * dim + i] = ONE;
        }
        m
    }

    /// Projector `|ψ⟩⟨ψ|` of a normalized ket.
    pub fn from_pure(ket: &[Complex64]) -> Self {
        let dim = ket.len();
        let mut m = Self::zeros(dim);
        for (r, a) in ket.iter().enumerate() {
            for (c, b) in ket.iter().enumerate() {
                m.data[r * dim + c] = a * b.conj();
            }
        }
        m
    }

    /// Product state of one projection per qubit, qubit 1 first.
    pub fn from_projections(projections: &[Projection]) -> Self {
        projections
            .iter()
            .map(|&p| Self::from_pure(&projection_ket(p)))
            .reduce(|acc, m| acc.kron(&m))
            .unwrap_or_else(|| Self::identity(1))
    }

    /// Matrix dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Entry at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> Complex64 {
        self.data[row * self.dim + col]
    }

    /// Rows as nested vectors.
    pub fn rows(&self) -> Vec<Vec<Complex64>> {
        self.data.chunks(self.dim.max(1)).map(<[_]>::to_vec).collect()
    }

    /// Kronecker product `self ⊗ other`.
    pub fn kron(&self, other: &Self) -> Self {
        let dim = self.dim * other.dim;
        let mut out = Self::zeros(dim);
        for r1 in 0..self.dim {
            for c1 in 0..self.dim {
                let a = self.get(r1, c1);
                for r2 in 0..other.dim {
                    for c2 in 0..other.dim {
                        let row = r1 * other.dim + r2;
                        let col = c1 * other.dim + c2;
                        out.data[row * dim + col] = a * other.get(r2, c2);
                    }
                }
            }
        }
        out
    }

    /// Matrix product.
    pub fn matmul(&self, other: &Self) -> Self {
        let n = self.dim;
        let mut out = Self::zeros(n);
        for r in 0..n {
            for c in 0..n {
                out.data[r * n + c] = (0..n).map(|k| self.get(r, k) * other.get(k, c)).sum();
            }
        }
        out
    }

    /// `self + factor · other`, in place.
    pub fn add_scaled(&mut self, other: &Self, factor: f64) {
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += *b * factor;
        }
    }

    /// Multiply every entry by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for a in &mut self.data {
            *a *= factor;
        }
    }

    /// Conjugate transpose.
    pub fn dagger(&self) -> Self {
        let n = self.dim;
        let mut out = Self::zeros(n);
        for r in 0..n {
            for c in 0..n {
                out.data[c * n + r] = self.get(r, c).conj();
            }
        }
        out
    }

    /// Trace.
    pub fn trace(&self) -> Complex64 {
        (0..self.dim).map(|i| self.get(i, i)).sum()
    }

    /// `Re tr(ρ²)`.
    pub fn purity(&self) -> f64 {
        self.matmul(self).trace().re
    }

    /// Largest entry-wise `|ρ - ρ†|`.
    pub fn hermiticity_defect(&self) -> f64 {
        self.max_abs_diff(&self.dagger())
    }

    /// `Re ⟨ψ|ρ|ψ⟩` for the product state of `projections`.
    pub fn probability(&self, projections: &[Projection]) -> f64 {
        let projector = Self::from_projections(projections);
        self.matmul(&projector).trace().re
    }

    /// Largest entry-wise distance to `other`, infinite when the dimensions differ.
    pub fn max_abs_diff(&self, other: &Self) -> f64 {
        if self.dim != other.dim {
            return f64::INFINITY;
        }
        self.data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).norm())
            .fold(0.0, f64::max)
    }
}

impl fmt::Display for DensityMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.rows() {
            let cells: Vec<String> = row
                .iter()
                .map(|z| format!("{:+.4}{:+.4}i", z.re, z.im))
                .collect();
            writeln!(f, "[ {} ]", cells.join("  "))?;
        }
        Ok(())
    }
}

/// Named Stokes parameters (`"T0"`, `"TX"`, … or `"T00"`, `"T0X"`, …).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StokesParameters(BTreeMap<String, f64>);

impl StokesParameters {
    /// Value of `name`, if computed.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// All parameters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// No parameters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Physicality checks on a reconstructed state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Diagnostics {
    /// Largest entry of `|ρ - ρ†|`
    pub hermiticity_defect: f64,
    /// `tr ρ`, ideally 1
    pub trace: Complex64,
    /// `Re tr(ρ²)`, above 1 means the estimate is not a physical state
    pub purity: f64,
}

impl Diagnostics {
    /// Diagnostics of `rho`.
    pub fn of(rho: &DensityMatrix) -> Self {
        Self {
            hermiticity_defect: rho.hermiticity_defect(),
            trace: rho.trace(),
            purity: rho.purity(),
        }
    }

    /// Purity exceeds one beyond `tolerance`.
    pub fn is_unphysical(&self, tolerance: f64) -> bool {
        self.purity > 1.0 + tolerance
    }
}

/// Result of one reconstruction.
#[derive(Debug, Clone, Serialize)]
pub struct Reconstruction {
    /// Frequencies the estimate was built from
    pub frequencies: FrequencyTable,
    /// Stokes parameters
    pub stokes: StokesParameters,
    /// Density matrix estimate
    pub rho: DensityMatrix,
    /// Physicality checks
    pub diagnostics: Diagnostics,
}

/// Every Pauli multi-index on `qubits` qubits, qubit 1 most significant.
fn pauli_indices(qubits: usize) -> Vec<Vec<Pauli>> {
    let mut indices = vec![Vec::new()];
    for _ in 0..qubits {
        indices = indices
            .into_iter()
            .flat_map(|prefix: Vec<Pauli>| {
                Pauli::ALL.into_iter().map(move |p| {
                    let mut next = prefix.clone();
                    next.push(p);
                    next
                })
            })
            .collect();
    }
    indices
}

fn stokes_name(index: &[Pauli]) -> String {
    std::iter::once('T').chain(index.iter().map(|p| p.symbol())).collect()
}

/// Signed frequency sum of `group` for the operator `index`.
fn group_expectation(index: &[Pauli], group: &SettingGroup, table: &FrequencyTable) -> f64 {
    group
        .members
        .iter()
        .map(|member| {
            let sign: f64 = index
                .iter()
                .zip(member.projections())
                .filter(|(p, _)| **p != Pauli::I)
                .map(|(_, proj)| proj.sign())
                .product();
            sign * table.get(member.label())
        })
        .sum()
}

fn group_measures(index: &[Pauli], group: &SettingGroup) -> bool {
    group.bases.len() == index.len()
        && index
            .iter()
            .zip(&group.bases)
            .all(|(p, b)| p.basis().map_or(true, |needed| needed == *b))
}

/// Reconstruct the state measured by a tomography `variant`.
pub fn reconstruct(variant: &ExperimentVariant, table: &FrequencyTable) -> AppResult<Reconstruction> {
    let qubits = variant.qubits();
    if qubits == 0 {
        return Err(DaqError::Analysis(format!(
            "{} is not a tomography experiment",
            variant.name()
        )));
    }

    let mut stokes = BTreeMap::new();
    let mut rho = DensityMatrix::zeros(1 << qubits);
    for index in pauli_indices(qubits) {
        let value = if index.iter().all(|p| *p == Pauli::I) {
            1.0
        } else {
            let estimates: Vec<f64> = variant
                .groups()
                .iter()
                .filter(|g| group_measures(&index, g))
                .map(|g| group_expectation(&index, g, table))
                .collect();
            if estimates.is_empty() {
                return Err(DaqError::Analysis(format!(
                    "No basis group measures {}",
                    stokes_name(&index)
                )));
            }
            estimates.iter().sum::<f64>() / estimates.len() as f64
        };

        let operator = index
            .iter()
            .map(|p| p.matrix())
            .reduce(|acc, m| acc.kron(&m))
            .unwrap_or_else(|| DensityMatrix::identity(1));
        rho.add_scaled(&operator, value);
        stokes.insert(stokes_name(&index), value);
    }
    rho.scale(1.0 / f64::from(1u32 << qubits));

    let diagnostics = Diagnostics::of(&rho);
    Ok(Reconstruction {
        frequencies: table.clone(),
        stokes: StokesParameters(stokes),
        rho,
        diagnostics,
    })
}

/// Normalize raw setting totals and reconstruct.
pub fn reconstruct_from_counts(
    variant: &ExperimentVariant,
    totals: &BTreeMap<String, f64>,
) -> AppResult<Reconstruction> {
    let table = normalize(totals, variant.groups())?;
    reconstruct(variant, &table)
}

/// Reconstruction with run metadata, written as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct ReconstructionReport {
    /// Run the data came from
    pub run_id: Uuid,
    /// Report creation time
    pub created_at: DateTime<Utc>,
    /// Experiment name
    pub experiment: String,
    /// Channel the totals came from
    pub analysis_channel: String,
    /// The reconstruction
    #[serde(flatten)]
    pub reconstruction: Reconstruction,
}

impl ReconstructionReport {
    /// Wrap `reconstruction` of `variant` for run `run_id`.
    pub fn new(run_id: Uuid, variant: &ExperimentVariant, reconstruction: Reconstruction) -> Self {
        Self {
            run_id,
            created_at: Utc::now(),
            experiment: variant.name().to_string(),
            analysis_channel: variant.analysis_channel().to_string(),
            reconstruction,
        }
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> AppResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| DaqError::Parse(e.to_string()))
    }
}
