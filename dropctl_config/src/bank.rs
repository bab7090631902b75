//! Controller calibration bank file.
//!
//! A bank is a TOML document with plant-wide scalars and one `[ctrl.<k>]`
//! table per controller. Matrices are row-major `{ rows, cols, data }`
//! tables:
//!
//! ```toml
//! numCtrl = 1
//! samplePeriod = 0.05
//! numPlantState = 1
//! numPlantInput = 1
//! numPlantOutput = 1
//!
//! [ctrl.0]
//! uncoUnob = 0
//! n = 1
//! m = 1
//! p = 1
//! outputIdx = [0]
//! stateIdx = [0]
//! A = { rows = 1, cols = 1, data = [0.0] }
//! # ... B, C, D, K1, K2, H, Ad, Bd, Cd, Wd
//! ```
//!
//! `parse_bank` rejects the whole document on the first inconsistency so a
//! half-valid bank can never be installed.
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MatrixEntry {
    pub rows: usize,
    pub cols: usize,
    #[serde(default)]
    pub data: Vec<f64>,
}

impl MatrixEntry {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn identity(size: usize) -> Self {
        let mut m = Self::zeros(size, size);
        for i in 0..size {
            m.data[i * size + i] = 1.0;
        }
        m
    }

    /// Row-major element access; `None` when out of range.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.data.get(row * self.cols + col).copied()
    }

    fn check(&self, ordinal: usize, name: &str, rows: usize, cols: usize) -> eyre::Result<()> {
        if self.rows != rows || self.cols != cols {
            eyre::bail!(
                "ctrl.{ordinal}.{name} must be {rows}x{cols}, got {}x{}",
                self.rows,
                self.cols
            );
        }
        if self.data.len() != rows * cols {
            eyre::bail!(
                "ctrl.{ordinal}.{name} declares {rows}x{cols} but holds {} values",
                self.data.len()
            );
        }
        if self.data.iter().any(|v| !v.is_finite()) {
            eyre::bail!("ctrl.{ordinal}.{name} contains non-finite values");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerEntry {
    /// Non-zero when the design has uncontrollable or unobservable modes.
    #[serde(default)]
    pub unco_unob: i32,
    pub n: usize,
    pub m: usize,
    pub p: usize,
    pub output_idx: Vec<usize>,
    pub state_idx: Vec<usize>,
    #[serde(rename = "A")]
    pub a: MatrixEntry,
    #[serde(rename = "B")]
    pub b: MatrixEntry,
    #[serde(rename = "C")]
    pub c: MatrixEntry,
    #[serde(rename = "D")]
    pub d: MatrixEntry,
    #[serde(rename = "K1")]
    pub k1: MatrixEntry,
    #[serde(rename = "K2")]
    pub k2: MatrixEntry,
    #[serde(rename = "H")]
    pub h: MatrixEntry,
    #[serde(rename = "Ad")]
    pub ad: MatrixEntry,
    #[serde(rename = "Bd")]
    pub bd: MatrixEntry,
    #[serde(rename = "Cd")]
    pub cd: MatrixEntry,
    #[serde(rename = "Wd")]
    pub wd: MatrixEntry,
}

impl ControllerEntry {
    /// Matrix names paired with their entries, in file order.
    pub fn matrices(&self) -> [(&'static str, &MatrixEntry); 11] {
        [
            ("A", &self.a),
            ("B", &self.b),
            ("C", &self.c),
            ("D", &self.d),
            ("K1", &self.k1),
            ("K2", &self.k2),
            ("H", &self.h),
            ("Ad", &self.ad),
            ("Bd", &self.bd),
            ("Cd", &self.cd),
            ("Wd", &self.wd),
        ]
    }

    fn validate(&self, ordinal: usize, bank: &BankFile) -> eyre::Result<()> {
        let (n, m, p) = (self.n, self.m, self.p);
        if p == 0 {
            eyre::bail!("ctrl.{ordinal}.p must be > 0");
        }
        if n > bank.num_plant_state || m > bank.num_plant_input || p > bank.num_plant_output {
            eyre::bail!(
                "ctrl.{ordinal} dimensions n={n} m={m} p={p} exceed plant {}x{}x{}",
                bank.num_plant_state,
                bank.num_plant_input,
                bank.num_plant_output
            );
        }
        if self.output_idx.len() != p {
            eyre::bail!("ctrl.{ordinal}.outputIdx must list {p} indices");
        }
        if self.state_idx.len() != n {
            eyre::bail!("ctrl.{ordinal}.stateIdx must list {n} indices");
        }
        if let Some(bad) = self.output_idx.iter().find(|&&i| i >= bank.num_plant_output) {
            eyre::bail!("ctrl.{ordinal}.outputIdx entry {bad} is out of range");
        }
        if let Some(bad) = self.state_idx.iter().find(|&&i| i >= bank.num_plant_state) {
            eyre::bail!("ctrl.{ordinal}.stateIdx entry {bad} is out of range");
        }
        let mut seen = self.output_idx.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != p {
            eyre::bail!("ctrl.{ordinal}.outputIdx contains duplicates");
        }

        let aug = n + m;
        self.a.check(ordinal, "A", n, n)?;
        self.b.check(ordinal, "B", n, m)?;
        self.c.check(ordinal, "C", p, n)?;
        self.d.check(ordinal, "D", p, m)?;
        self.k1.check(ordinal, "K1", m, n)?;
        self.k2.check(ordinal, "K2", m, p)?;
        self.h.check(ordinal, "H", n, p)?;
        self.ad.check(ordinal, "Ad", aug, aug)?;
        self.bd.check(ordinal, "Bd", aug, m)?;
        self.cd.check(ordinal, "Cd", p, aug)?;
        self.wd.check(ordinal, "Wd", aug, aug)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BankFile {
    pub num_ctrl: usize,
    pub sample_period: f64,
    pub num_plant_state: usize,
    pub num_plant_input: usize,
    pub num_plant_output: usize,
    #[serde(default)]
    pub ctrl: BTreeMap<String, ControllerEntry>,
}

impl BankFile {
    /// Controllers ordered by their numeric ordinal.
    pub fn controllers(&self) -> Vec<(usize, &ControllerEntry)> {
        let mut out: Vec<(usize, &ControllerEntry)> = self
            .ctrl
            .iter()
            .filter_map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, v)))
            .collect();
        out.sort_by_key(|(i, _)| *i);
        out
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if !(self.sample_period.is_finite() && self.sample_period > 0.0) {
            eyre::bail!("samplePeriod must be > 0");
        }
        if self.num_plant_input == 0 || self.num_plant_output == 0 {
            eyre::bail!("numPlantInput and numPlantOutput must be > 0");
        }
        if self.ctrl.len() != self.num_ctrl {
            eyre::bail!(
                "numCtrl is {} but {} [ctrl.*] tables are present",
                self.num_ctrl,
                self.ctrl.len()
            );
        }
        for key in self.ctrl.keys() {
            match key.parse::<usize>() {
                Ok(i) if i < self.num_ctrl => {}
                _ => eyre::bail!("controller table [ctrl.{key}] must be numbered 0..{}", self.num_ctrl),
            }
        }
        for (ordinal, entry) in self.controllers() {
            entry.validate(ordinal, self)?;
        }
        Ok(())
    }
}

/// Parse and validate a bank document.
pub fn parse_bank(s: &str) -> eyre::Result<BankFile> {
    let bank: BankFile =
        toml::from_str(s).map_err(|e| eyre::eyre!("controller bank is not valid TOML: {e}"))?;
    bank.validate()?;
    Ok(bank)
}

/// Read, parse and validate a bank file.
pub fn load_bank(path: &Path) -> eyre::Result<BankFile> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("open controller bank {:?}: {}", path, e))?;
    parse_bank(&text)
}
