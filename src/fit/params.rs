//! Named model parameters
//!
//! [`Parameters`] keeps insertion order, so free values map onto the
//! optimizer vector in the order the model declared them.

use serde::{Deserialize, Serialize};

use super::FitError;

/// A named model parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Short symbol used for lookup, e.g. `Fp`
    pub symbol: &'static str,
    /// Descriptive name
    pub name: &'static str,
    pub unit: &'static str,
    pub value: f64,
    /// Lower and upper bound used during training
    pub bounds: (f64, f64),
    /// Whether training estimates this parameter
    pub free: bool,
    /// Standard deviation of the estimate, zero when not estimated
    pub stdev: f64,
}

impl Parameter {
    /// A free parameter without bounds
    pub fn new(symbol: &'static str, name: &'static str, unit: &'static str, value: f64) -> Self {
        Self {
            symbol,
            name,
            unit,
            value,
            bounds: (f64::NEG_INFINITY, f64::INFINITY),
            free: true,
            stdev: 0.0,
        }
    }

    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.bounds = (lower, upper);
        self
    }

    /// Exclude the parameter from training
    pub fn fixed(mut self) -> Self {
        self.free = false;
        self
    }

    /// Export row for this parameter
    pub fn row(&self) -> ParamRow {
        ParamRow {
            parameter: self.symbol.to_string(),
            name: self.name.to_string(),
            value: self.value,
            unit: self.unit.to_string(),
            stdev: self.stdev,
        }
    }
}

/// One exported parameter: `[parameter, name, value, unit, stdev]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamRow {
    pub parameter: String,
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub stdev: f64,
}

/// Ordered collection of model parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    params: Vec<Parameter>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, parameter: Parameter) -> Self {
        self.push(parameter);
        self
    }

    /// Append a parameter, replacing any with the same symbol
    pub fn push(&mut self, parameter: Parameter) {
        match self.params.iter_mut().find(|p| p.symbol == parameter.symbol) {
            Some(existing) => *existing = parameter,
            None => self.params.push(parameter),
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.get(symbol).is_some()
    }

    pub fn get(&self, symbol: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.symbol == symbol)
    }

    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut Parameter> {
        self.params.iter_mut().find(|p| p.symbol == symbol)
    }

    fn lookup_mut(&mut self, symbol: &str) -> Result<&mut Parameter, FitError> {
        self.get_mut(symbol)
            .ok_or_else(|| FitError::UnknownParameter(symbol.to_string()))
    }

    /// Current value of a parameter
    pub fn value(&self, symbol: &str) -> Result<f64, FitError> {
        self.get(symbol)
            .map(|p| p.value)
            .ok_or_else(|| FitError::UnknownParameter(symbol.to_string()))
    }

    pub fn set_value(&mut self, symbol: &str, value: f64) -> Result<(), FitError> {
        self.lookup_mut(symbol)?.value = value;
        Ok(())
    }

    pub fn set_bounds(&mut self, symbol: &str, lower: f64, upper: f64) -> Result<(), FitError> {
        if !(lower < upper) {
            return Err(FitError::InvalidBounds {
                symbol: symbol.to_string(),
                lower,
                upper,
            });
        }
        self.lookup_mut(symbol)?.bounds = (lower, upper);
        Ok(())
    }

    /// Include or exclude a parameter from training
    pub fn set_free(&mut self, symbol: &str, free: bool) -> Result<(), FitError> {
        self.lookup_mut(symbol)?.free = free;
        Ok(())
    }

    pub fn free_symbols(&self) -> Vec<&'static str> {
        self.params
            .iter()
            .filter(|p| p.free)
            .map(|p| p.symbol)
            .collect()
    }

    pub fn free_values(&self) -> Vec<f64> {
        self.params
            .iter()
            .filter(|p| p.free)
            .map(|p| p.value)
            .collect()
    }

    pub fn free_bounds(&self) -> Vec<(f64, f64)> {
        self.params
            .iter()
            .filter(|p| p.free)
            .map(|p| p.bounds)
            .collect()
    }

    /// Overwrite the free parameters, in order, with `values`
    pub fn set_free_values(&mut self, values: &[f64]) {
        for (p, &v) in self.params.iter_mut().filter(|p| p.free).zip(values) {
            p.value = v;
        }
    }

    pub fn set_free_stdevs(&mut self, stdevs: &[f64]) {
        for (p, &s) in self.params.iter_mut().filter(|p| p.free).zip(stdevs) {
            p.stdev = s;
        }
    }

    pub fn rows(&self) -> Vec<ParamRow> {
        self.params.iter().map(Parameter::row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Parameters {
        Parameters::new()
            .with(Parameter::new("Fp", "Plasma flow", "mL/sec/cm3", 0.01).with_bounds(0.0, 1.0))
            .with(Parameter::new("S0", "Signal scaling factor", "a.u.", 1.0).fixed())
            .with(Parameter::new("vp", "Plasma volume", "mL/cm3", 0.05).with_bounds(0.0, 1.0))
    }

    #[test]
    fn free_values_follow_declaration_order() {
        let mut p = sample();
        assert_eq!(p.free_symbols(), vec!["Fp", "vp"]);
        p.set_free_values(&[0.02, 0.1]);
        assert_eq!(p.value("Fp").unwrap(), 0.02);
        assert_eq!(p.value("vp").unwrap(), 0.1);
        assert_eq!(p.value("S0").unwrap(), 1.0);
    }

    #[test]
    fn unknown_symbol_is_reported() {
        let p = sample();
        match p.value("Ktrans") {
            Err(FitError::UnknownParameter(s)) => assert_eq!(s, "Ktrans"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn push_replaces_existing_symbol() {
        let mut p = sample();
        p.push(Parameter::new("Fp", "Plasma flow", "mL/sec/cm3", 0.5));
        assert_eq!(p.len(), 3);
        assert_eq!(p.value("Fp").unwrap(), 0.5);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let mut p = sample();
        assert!(p.set_bounds("Fp", 1.0, 0.0).is_err());
    }
}
