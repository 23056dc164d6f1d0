//! Experiment variant descriptors.
//!
//! One `ExperimentVariant` fully describes an experiment: which detector
//! channels are drained per sample, the ordered settings and the optics angles
//! behind each of them, how settings group into measurement bases, and which
//! channel feeds the analysis. The sequencer and the reconstructor are driven
//! by this descriptor alone.

use crate::config::MotionConfig;
use crate::error::{AppResult, DaqError};
use crate::acquisition::motion::{degrees_to_steps, TargetAssignment};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Measurement basis of one qubit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Basis {
    /// Diagonal/anti-diagonal (P/M)
    X,
    /// Right/left circular (R/L)
    Y,
    /// Horizontal/vertical (H/V)
    Z,
}

impl Basis {
    /// Bases in the order groups are generated.
    pub const ALL: [Basis; 3] = [Basis::Z, Basis::X, Basis::Y];

    /// The two mutually exclusive outcomes, positive eigenvalue first.
    pub fn outcomes(self) -> [Projection; 2] {
        match self {
            Basis::Z => [Projection::H, Projection::V],
            Basis::X => [Projection::P, Projection::M],
            Basis::Y => [Projection::R, Projection::L],
        }
    }
}

impl fmt::Display for Basis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Basis::X => write!(f, "X"),
            Basis::Y => write!(f, "Y"),
            Basis::Z => write!(f, "Z"),
        }
    }
}

/// Single-qubit projection outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Projection {
    /// Horizontal
    H,
    /// Vertical
    V,
    /// Diagonal (+45°)
    P,
    /// Anti-diagonal (-45°)
    M,
    /// Right circular
    R,
    /// Left circular
    L,
}

/// Optics angles (degrees) that realize one projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpticsAngles {
    /// Quarter-wave plate angle
    pub qwp_deg: f64,
    /// Polarizer angle
    pub pol_deg: f64,
}

impl Projection {
    /// All six outcomes in measurement order.
    pub const ALL: [Projection; 6] = [
        Projection::H,
        Projection::V,
        Projection::P,
        Projection::M,
        Projection::R,
        Projection::L,
    ];

    /// Parse the one-letter label.
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'H' => Some(Projection::H),
            'V' => Some(Projection::V),
            'P' => Some(Projection::P),
            'M' => Some(Projection::M),
            'R' => Some(Projection::R),
            'L' => Some(Projection::L),
            _ => None,
        }
    }

    /// One-letter label.
    pub fn letter(self) -> char {
        match self {
            Projection::H => 'H',
            Projection::V => 'V',
            Projection::P => 'P',
            Projection::M => 'M',
            Projection::R => 'R',
            Projection::L => 'L',
        }
    }

    /// Basis this outcome belongs to.
    pub fn basis(self) -> Basis {
        match self {
            Projection::H | Projection::V => Basis::Z,
            Projection::P | Projection::M => Basis::X,
            Projection::R | Projection::L => Basis::Y,
        }
    }

    /// Eigenvalue of the basis Pauli operator for this outcome.
    pub fn sign(self) -> f64 {
        match self {
            Projection::H | Projection::P | Projection::R => 1.0,
            Projection::V | Projection::M | Projection::L => -1.0,
        }
    }

    /// Optics angles for this outcome.
    ///
    /// The motor driver treats a QWP like a polarizer mount offset by 90°, and
    /// negative targets time out, so QWP angles are folded as
    /// `180 - |angle - 90|`.
    pub fn angles(self) -> OpticsAngles {
        let (qwp_deg, pol_deg) = match self {
            Projection::H => (90.0, 0.0),
            Projection::V => (90.0, 90.0),
            Projection::P => (135.0, 45.0),
            Projection::M => (135.0, 135.0),
            Projection::R => (135.0, 90.0),
            Projection::L => (135.0, 0.0),
        };
        OpticsAngles { qwp_deg, pol_deg }
    }

    /// Outcome whose optics angles match, within `tolerance_deg`.
    pub fn from_angles(qwp_deg: f64, pol_deg: f64, tolerance_deg: f64) -> Option<Self> {
        Projection::ALL.into_iter().find(|p| {
            let a = p.angles();
            (a.qwp_deg - qwp_deg).abs() <= tolerance_deg
                && (a.pol_deg - pol_deg).abs() <= tolerance_deg
        })
    }
}

/// A motorized optic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Component {
    /// Quarter-wave plate, qubit 1
    Qwp1,
    /// Polarizer, qubit 1
    Pol1,
    /// Quarter-wave plate, qubit 2
    Qwp2,
    /// Polarizer, qubit 2
    Pol2,
}

impl Component {
    /// QWP and polarizer for qubit `index` (0-based).
    pub fn for_qubit(index: usize) -> Option<(Component, Component)> {
        match index {
            0 => Some((Component::Qwp1, Component::Pol1)),
            1 => Some((Component::Qwp2, Component::Pol2)),
            _ => None,
        }
    }
}

/// Logical detector channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    /// Singles, APD 1
    Ch1,
    /// Singles, APD 2
    Ch2,
    /// Singles, APD 3
    Ch3,
    /// Singles, APD 4
    Ch4,
    /// Coincidences between APD 1 and 2
    Coinc12,
    /// Coincidences between APD 2 and 3
    Coinc23,
}

impl Channel {
    /// Every channel the counting unit reports.
    pub const ALL: [Channel; 6] = [
        Channel::Ch1,
        Channel::Ch2,
        Channel::Ch3,
        Channel::Ch4,
        Channel::Coinc12,
        Channel::Coinc23,
    ];

    /// Data channel id used by the counting unit.
    pub fn hardware_id(self) -> i32 {
        match self {
            Channel::Coinc12 => 8,
            Channel::Ch1 => 9,
            Channel::Ch2 => 10,
            Channel::Ch3 => 12,
            Channel::Ch4 => 13,
            Channel::Coinc23 => 14,
        }
    }

    /// Inverse of [`Channel::hardware_id`].
    pub fn from_hardware_id(id: i32) -> Option<Self> {
        Channel::ALL.into_iter().find(|c| c.hardware_id() == id)
    }

    /// Column name used in output files.
    pub fn name(self) -> &'static str {
        match self {
            Channel::Ch1 => "ch1",
            Channel::Ch2 => "ch2",
            Channel::Ch3 => "ch3",
            Channel::Ch4 => "ch4",
            Channel::Coinc12 => "coinc12",
            Channel::Coinc23 => "coinc23",
        }
    }

    /// Inverse of [`Channel::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        Channel::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One named measurement setting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Setting {
    label: String,
    projections: Vec<Projection>,
}

impl Setting {
    /// Parse a projection label such as `"H"` or `"PM"`, one letter per qubit.
    pub fn parse(label: &str) -> AppResult<Self> {
        let projections = label
            .chars()
            .map(|c| {
                Projection::from_letter(c).ok_or_else(|| {
                    DaqError::Configuration(format!("'{c}' in setting '{label}' is not a projection"))
                })
            })
            .collect::<AppResult<Vec<_>>>()?;
        if projections.is_empty() || projections.len() > 2 {
            return Err(DaqError::Configuration(format!(
                "Setting '{label}' must name one or two projections"
            )));
        }
        Ok(Self {
            label: label.to_ascii_uppercase(),
            projections,
        })
    }

    /// A setting that moves no optics.
    pub fn fixed(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            projections: Vec::new(),
        }
    }

    /// Setting label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Per-qubit projections, qubit 1 first.
    pub fn projections(&self) -> &[Projection] {
        &self.projections
    }

    /// Optics angles of this setting.
    pub fn component_angles(&self) -> Vec<(Component, f64)> {
        self.projections
            .iter()
            .enumerate()
            .filter_map(|(qubit, p)| {
                let (qwp, pol) = Component::for_qubit(qubit)?;
                let angles = p.angles();
                Some([(qwp, angles.qwp_deg), (pol, angles.pol_deg)])
            })
            .flatten()
            .collect()
    }

    /// Motor targets for this setting.
    pub fn targets(&self, motion: &MotionConfig) -> TargetAssignment {
        self.component_angles()
            .into_iter()
            .map(|(component, deg)| {
                (
                    motion.ports.port(component),
                    degrees_to_steps(deg, motion.steps_per_revolution),
                )
            })
            .collect()
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Settings whose outcomes are mutually exclusive and exhaustive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingGroup {
    /// Group name (the per-qubit bases, e.g. `"ZX"`)
    pub name: String,
    /// Basis of each qubit
    pub bases: Vec<Basis>,
    /// Member settings
    pub members: Vec<Setting>,
}

impl SettingGroup {
    /// Group measuring each qubit in the given basis.
    pub fn for_bases(bases: &[Basis]) -> Self {
        let mut labels = vec![String::new()];
        for basis in bases {
            labels = labels
                .iter()
                .flat_map(|prefix| {
                    basis
                        .outcomes()
                        .into_iter()
                        .map(move |p| format!("{prefix}{}", p.letter()))
                })
                .collect();
        }
        let members = labels
            .iter()
            .map(|label| Setting {
                label: label.clone(),
                projections: label.chars().filter_map(Projection::from_letter).collect(),
            })
            .collect();
        Self {
            name: bases.iter().map(|b| b.to_string()).collect(),
            bases: bases.to_vec(),
            members,
        }
    }
}

/// Experiment kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariantKind {
    /// Single-qubit tomography
    SingleQubit,
    /// Two-qubit tomography
    TwoQubit,
    /// Hanbury Brown–Twiss g²(0)
    Hbt,
    /// Singles/dark-count baseline
    Base,
}

/// Ordered two-qubit settings as measured on the apparatus.
const TWO_QUBIT_ORDER: [&str; 36] = [
    "HH", "HV", "VH", "VV", "PP", "PM", "MP", "MM", "RR", "RL", "LR", "LL", "HP", "HM", "VP", "VM",
    "HR", "HL", "VL", "VR", "PH", "MH", "PV", "MV", "RH", "LH", "LV", "RV", "PR", "PL", "MR", "ML",
    "RP", "LP", "RM", "LM",
];

/// Full description of one experiment.
#[derive(Debug, Clone)]
pub struct ExperimentVariant {
    kind: VariantKind,
    channels: Vec<Channel>,
    settings: Vec<Setting>,
    groups: Vec<SettingGroup>,
    analysis_channel: Channel,
    components: Vec<Component>,
}

impl ExperimentVariant {
    /// Single-qubit tomography on APD 1 singles.
    pub fn single_qubit() -> Self {
        let settings = Projection::ALL
            .into_iter()
            .map(|p| Setting {
                label: p.letter().to_string(),
                projections: vec![p],
            })
            .collect();
        let groups = Basis::ALL
            .into_iter()
            .map(|b| SettingGroup::for_bases(&[b]))
            .collect();
        Self {
            kind: VariantKind::SingleQubit,
            channels: vec![Channel::Ch1],
            settings,
            groups,
            analysis_channel: Channel::Ch1,
            components: vec![Component::Qwp1, Component::Pol1],
        }
    }

    /// Two-qubit tomography on coincidences between APD 1 and 2.
    pub fn two_qubit() -> Self {
        let settings = TWO_QUBIT_ORDER
            .iter()
            .map(|label| Setting {
                label: (*label).to_string(),
                projections: label.chars().filter_map(Projection::from_letter).collect(),
            })
            .collect();
        let groups = Basis::ALL
            .into_iter()
            .flat_map(|a| Basis::ALL.into_iter().map(move |b| SettingGroup::for_bases(&[a, b])))
            .collect();
        Self {
            kind: VariantKind::TwoQubit,
            channels: vec![Channel::Ch1, Channel::Ch2, Channel::Coinc12],
            settings,
            groups,
            analysis_channel: Channel::Coinc12,
            components: vec![
                Component::Qwp1,
                Component::Pol1,
                Component::Qwp2,
                Component::Pol2,
            ],
        }
    }

    /// HBT: three APDs, two coincidence pairings, no optics moved.
    pub fn hbt() -> Self {
        Self {
            kind: VariantKind::Hbt,
            channels: vec![
                Channel::Ch1,
                Channel::Ch2,
                Channel::Ch3,
                Channel::Coinc12,
                Channel::Coinc23,
            ],
            settings: vec![Setting::fixed("HBT")],
            groups: Vec::new(),
            analysis_channel: Channel::Coinc23,
            components: Vec::new(),
        }
    }

    /// Baseline singles on all four APDs, no optics moved.
    pub fn base() -> Self {
        Self {
            kind: VariantKind::Base,
            channels: vec![Channel::Ch1, Channel::Ch2, Channel::Ch3, Channel::Ch4],
            settings: vec![Setting::fixed("BASE")],
            groups: Vec::new(),
            analysis_channel: Channel::Ch1,
            components: Vec::new(),
        }
    }

    /// Tomography variant for `qubits` qubits.
    pub fn tomography(qubits: u8) -> AppResult<Self> {
        match qubits {
            1 => Ok(Self::single_qubit()),
            2 => Ok(Self::two_qubit()),
            other => Err(DaqError::Configuration(format!(
                "Tomography supports 1 or 2 qubits, got {other}"
            ))),
        }
    }

    /// Experiment kind.
    pub fn kind(&self) -> VariantKind {
        self.kind
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self.kind {
            VariantKind::SingleQubit => "single-qubit tomography",
            VariantKind::TwoQubit => "two-qubit tomography",
            VariantKind::Hbt => "HBT",
            VariantKind::Base => "base",
        }
    }

    /// Number of qubits reconstructed (0 for non-tomography variants).
    pub fn qubits(&self) -> usize {
        match self.kind {
            VariantKind::SingleQubit => 1,
            VariantKind::TwoQubit => 2,
            VariantKind::Hbt | VariantKind::Base => 0,
        }
    }

    /// Channels drained together for every sample.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Settings in measurement order.
    pub fn settings(&self) -> &[Setting] {
        &self.settings
    }

    /// Look up a setting by label.
    pub fn setting(&self, label: &str) -> AppResult<&Setting> {
        self.settings
            .iter()
            .find(|s| s.label == label)
            .ok_or_else(|| DaqError::MissingSetting(label.to_string()))
    }

    /// Normalization groups.
    pub fn groups(&self) -> &[SettingGroup] {
        &self.groups
    }

    /// Channel whose averages feed the analysis.
    pub fn analysis_channel(&self) -> Channel {
        self.analysis_channel
    }

    /// Whether settings involve actuator motion.
    pub fn requires_motion(&self) -> bool {
        !self.components.is_empty()
    }

    /// Check the descriptor is internally consistent.
    ///
    /// Every setting must assign exactly the required optics, every group
    /// member must be a declared setting, and the analysis channel must be
    /// acquired.
    pub fn validate(&self) -> AppResult<()> {
        let required: HashSet<Component> = self.components.iter().copied().collect();
        for setting in &self.settings {
            let assigned: HashSet<Component> =
                setting.component_angles().into_iter().map(|(c, _)| c).collect();
            if assigned != required {
                return Err(DaqError::Configuration(format!(
                    "Setting '{}' assigns {:?} but {} requires {:?}",
                    setting.label,
                    assigned,
                    self.name(),
                    required
                )));
            }
        }

        let labels: HashSet<&str> = self.settings.iter().map(|s| s.label.as_str()).collect();
        if labels.len() != self.settings.len() {
            return Err(DaqError::Configuration(format!(
                "{} declares a setting twice",
                self.name()
            )));
        }
        for group in &self.groups {
            if let Some(missing) = group
                .members
                .iter()
                .find(|m| !labels.contains(m.label.as_str()))
            {
                return Err(DaqError::MissingSetting(missing.label.clone()));
            }
        }

        if !self.channels.contains(&self.analysis_channel) {
            return Err(DaqError::Configuration(format!(
                "Analysis channel {} is not acquired",
                self.analysis_channel
            )));
        }
        Ok(())
    }
}
