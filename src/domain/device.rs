//! Device catalogue
//!
//! Devices are identified by their abbreviation. The catalogue turns the
//! loosely-typed `{abbreviation, specifications: [{name, value}]}` records
//! into typed [`DeviceSpec`]s. A missing specification falls back to its
//! documented default; a present but malformed one is rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

use super::Carrier;
use crate::error::{HubError, HubResult};

/// Temperature lift floor (K) for Carnot-based heat pump COPs.
pub const MIN_TEMPERATURE_LIFT_K: f64 = 5.0;

const KELVIN_OFFSET: f64 = 273.15;
const DEFAULT_INTEREST_RATE: f64 = 0.05;

/// Heat pump coefficient of performance model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CopModel {
    Fixed(f64),
    /// Quality grade times the Carnot COP between ambient air and supply.
    Carnot { grade: f64, supply_temperature_c: f64 },
}

impl CopModel {
    pub fn cop_at(&self, ambient_c: f64) -> f64 {
        match *self {
            CopModel::Fixed(cop) => cop,
            CopModel::Carnot {
                grade,
                supply_temperature_c,
            } => {
                let lift = (supply_temperature_c - ambient_c).max(MIN_TEMPERATURE_LIFT_K);
                grade * (KELVIN_OFFSET + supply_temperature_c) / lift
            }
        }
    }
}

/// Storage coefficients. Fractions refer to the installed capacity (Wh).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageParams {
    pub carrier: Carrier,
    pub soc_min: f64,
    pub soc_max: f64,
    /// Charging efficiency
    pub eta_ch: f64,
    /// Discharging efficiency
    pub eta_dch: f64,
    /// Maximum charging power per unit of capacity (W/Wh)
    pub coeff_ch: f64,
    /// Maximum discharging power per unit of capacity (W/Wh)
    pub coeff_dch: f64,
    /// Fraction of stored energy lost per hour
    pub standby_loss: f64,
    /// Initial state of charge as a fraction of capacity, pinned when present
    pub soc_init: Option<f64>,
}

impl StorageParams {
    /// Retention factor over a step of `dt_h` hours.
    pub fn retention(&self, dt_h: f64) -> f64 {
        (1.0 - self.standby_loss).powf(dt_h)
    }
}

/// Tagged device types. Each variant carries the conversion metadata its
/// constraint generator needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceKind {
    HeatPump { cop: CopModel },
    ElectricHeater { eta: f64 },
    Boiler { fuel: Carrier, eta_th: f64 },
    Chp { fuel: Carrier, eta_th: f64, eta_el: f64 },
    GasHeatPump { cop: f64 },
    /// With `heat_dissipation` the heat output may stay below `η_th × H2`
    FuelCell { eta_el: f64, eta_th: f64, heat_dissipation: bool },
    Electrolyzer { eta: f64 },
    CompressionChiller { cop: f64 },
    AbsorptionChiller { eta: f64 },
    Sabatier { eta: f64 },
    /// Curtailable generation bounded by an availability profile
    Renewable { output: Carrier },
    Storage(StorageParams),
}

/// Which constraint generator handles a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    Conversion,
    Renewable,
    Storage,
}

/// Whether a conversion output is pinned to or capped by input × efficiency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Equal,
    AtMost,
}

/// Conversion coefficient, constant or per timestep.
#[derive(Debug, Clone, PartialEq)]
pub enum Efficiency {
    Fixed(f64),
    Series(Vec<f64>),
}

impl Efficiency {
    pub fn at(&self, t: usize) -> f64 {
        match self {
            Efficiency::Fixed(v) => *v,
            Efficiency::Series(values) => values[t],
        }
    }

    pub fn min(&self) -> f64 {
        match self {
            Efficiency::Fixed(v) => *v,
            Efficiency::Series(values) => values.iter().copied().fold(f64::INFINITY, f64::min),
        }
    }

    pub fn max(&self) -> f64 {
        match self {
            Efficiency::Fixed(v) => *v,
            Efficiency::Series(values) => values.iter().copied().fold(0.0, f64::max),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    pub carrier: Carrier,
    pub efficiency: Efficiency,
    pub relation: Relation,
}

/// The flow bounded by a device's installed capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rating {
    Input,
    Output(usize),
}

/// Linear single-input conversion: `output_k = input × η_k`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionSpec {
    pub input: Carrier,
    pub outputs: Vec<OutputSpec>,
    pub rating: Rating,
}

impl DeviceKind {
    pub fn role(&self) -> DeviceRole {
        match self {
            DeviceKind::Renewable { .. } => DeviceRole::Renewable,
            DeviceKind::Storage(_) => DeviceRole::Storage,
            _ => DeviceRole::Conversion,
        }
    }

    pub fn needs_ambient_temperature(&self) -> bool {
        matches!(
            self,
            DeviceKind::HeatPump {
                cop: CopModel::Carnot { .. }
            }
        )
    }

    /// Conversion metadata for one period. `ambient_c` is required for
    /// temperature-dependent devices and must cover every timestep.
    pub fn conversion(&self, ambient_c: Option<&[f64]>) -> Option<ConversionSpec> {
        let fixed = |carrier, eta| OutputSpec {
            carrier,
            efficiency: Efficiency::Fixed(eta),
            relation: Relation::Equal,
        };
        let spec = match self {
            DeviceKind::HeatPump { cop } => {
                let efficiency = match (cop, ambient_c) {
                    (CopModel::Fixed(v), _) => Efficiency::Fixed(*v),
                    (model, Some(ambient)) => {
                        Efficiency::Series(ambient.iter().map(|t| model.cop_at(*t)).collect())
                    }
                    (_, None) => return None,
                };
                ConversionSpec {
                    input: Carrier::Electricity,
                    outputs: vec![OutputSpec {
                        carrier: Carrier::Heat,
                        efficiency,
                        relation: Relation::Equal,
                    }],
                    rating: Rating::Output(0),
                }
            }
            DeviceKind::ElectricHeater { eta } => ConversionSpec {
                input: Carrier::Electricity,
                outputs: vec![fixed(Carrier::Heat, *eta)],
                rating: Rating::Input,
            },
            DeviceKind::Boiler { fuel, eta_th } => ConversionSpec {
                input: *fuel,
                outputs: vec![fixed(Carrier::Heat, *eta_th)],
                rating: Rating::Output(0),
            },
            DeviceKind::Chp {
                fuel,
                eta_th,
                eta_el,
            } => ConversionSpec {
                input: *fuel,
                outputs: vec![
                    fixed(Carrier::Heat, *eta_th),
                    fixed(Carrier::Electricity, *eta_el),
                ],
                rating: Rating::Output(0),
            },
            DeviceKind::GasHeatPump { cop } => ConversionSpec {
                input: Carrier::Gas,
                outputs: vec![fixed(Carrier::Heat, *cop)],
                rating: Rating::Output(0),
            },
            DeviceKind::FuelCell {
                eta_el,
                eta_th,
                heat_dissipation,
            } => ConversionSpec {
                input: Carrier::Hydrogen,
                outputs: vec![
                    fixed(Carrier::Electricity, *eta_el),
                    OutputSpec {
                        carrier: Carrier::Heat,
                        efficiency: Efficiency::Fixed(*eta_th),
                        relation: if *heat_dissipation {
                            Relation::AtMost
                        } else {
                            Relation::Equal
                        },
                    },
                ],
                rating: Rating::Output(0),
            },
            DeviceKind::Electrolyzer { eta } => ConversionSpec {
                input: Carrier::Electricity,
                outputs: vec![fixed(Carrier::Hydrogen, *eta)],
                rating: Rating::Input,
            },
            DeviceKind::CompressionChiller { cop } => ConversionSpec {
                input: Carrier::Electricity,
                outputs: vec![fixed(Carrier::Cooling, *cop)],
                rating: Rating::Output(0),
            },
            DeviceKind::AbsorptionChiller { eta } => ConversionSpec {
                input: Carrier::Heat,
                outputs: vec![fixed(Carrier::Cooling, *eta)],
                rating: Rating::Output(0),
            },
            DeviceKind::Sabatier { eta } => ConversionSpec {
                input: Carrier::Hydrogen,
                outputs: vec![fixed(Carrier::Gas, *eta)],
                rating: Rating::Output(0),
            },
            DeviceKind::Renewable { .. } | DeviceKind::Storage(_) => return None,
        };
        Some(spec)
    }

    /// Efficiencies and fractions that must be strictly positive or lie in [0, 1].
    fn validate(&self, abbreviation: &str) -> HubResult<()> {
        let positive = |name: &str, v: f64| -> HubResult<()> {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(HubError::data(
                    format!("{abbreviation}.{name}"),
                    format!("must be finite and positive, got {v}"),
                ))
            }
        };
        let fraction = |name: &str, v: f64| -> HubResult<()> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(HubError::data(
                    format!("{abbreviation}.{name}"),
                    format!("must lie in [0, 1], got {v}"),
                ))
            }
        };

        match self {
            DeviceKind::HeatPump { cop } => match cop {
                CopModel::Fixed(v) => positive("COP", *v),
                CopModel::Carnot { grade, .. } => positive("grade", *grade),
            },
            DeviceKind::ElectricHeater { eta } => positive("eta_th", *eta),
            DeviceKind::Boiler { eta_th, .. } => positive("eta_th", *eta_th),
            DeviceKind::Chp { eta_th, eta_el, .. } => {
                positive("eta_th", *eta_th)?;
                positive("eta_el", *eta_el)
            }
            DeviceKind::GasHeatPump { cop } | DeviceKind::CompressionChiller { cop } => {
                positive("COP", *cop)
            }
            DeviceKind::FuelCell { eta_el, eta_th, .. } => {
                positive("eta_el", *eta_el)?;
                positive("eta_th", *eta_th)
            }
            DeviceKind::Electrolyzer { eta }
            | DeviceKind::AbsorptionChiller { eta }
            | DeviceKind::Sabatier { eta } => positive("eta", *eta),
            DeviceKind::Renewable { .. } => Ok(()),
            DeviceKind::Storage(p) => {
                fraction("soc_min", p.soc_min)?;
                fraction("soc_max", p.soc_max)?;
                if p.soc_min > p.soc_max {
                    return Err(HubError::data(
                        format!("{abbreviation}.soc_min"),
                        format!("soc_min {} exceeds soc_max {}", p.soc_min, p.soc_max),
                    ));
                }
                positive("eta_ch", p.eta_ch)?;
                positive("eta_dch", p.eta_dch)?;
                positive("coeff_ch", p.coeff_ch)?;
                positive("coeff_dch", p.coeff_dch)?;
                fraction("sto_loss", p.standby_loss)?;
                if let Some(init) = p.soc_init {
                    fraction("init", init)?;
                    if init < p.soc_min || init > p.soc_max {
                        return Err(HubError::data(
                            format!("{abbreviation}.init"),
                            format!("initial state {init} outside [{}, {}]", p.soc_min, p.soc_max),
                        ));
                    }
                }
                Ok(())
            }
        }
    }
}

/// Investment data for hub sizing. Costs are per kW (or kWh for storages).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEconomics {
    pub inv_var: f64,
    pub ann_factor: f64,
    /// Operation and maintenance as a fraction of investment per year
    pub cost_om: f64,
    /// Sizing bounds in W (Wh for storages)
    pub min_cap: f64,
    pub max_cap: f64,
}

impl Default for DeviceEconomics {
    fn default() -> Self {
        Self {
            inv_var: 0.0,
            ann_factor: 0.0,
            cost_om: 0.0,
            min_cap: 0.0,
            max_cap: 0.0,
        }
    }
}

impl DeviceEconomics {
    /// Annualised cost per W of installed capacity.
    pub fn annual_cost_per_w(&self) -> f64 {
        self.inv_var * (self.ann_factor + self.cost_om) / 1000.0
    }
}

/// Capital recovery factor for an annuity over `years` at `rate`.
pub fn annuity_factor(rate: f64, years: f64) -> f64 {
    if years <= 0.0 {
        return 0.0;
    }
    if rate.abs() < 1e-12 {
        return 1.0 / years;
    }
    let q = (1.0 + rate).powf(years);
    rate * q / (q - 1.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub abbreviation: String,
    pub kind: DeviceKind,
    pub economics: DeviceEconomics,
}

/// One `{name, value}` pair of a raw catalogue record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSpecification {
    pub name: String,
    pub value: Value,
}

/// Raw catalogue record as produced by the device data generators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDeviceEntry {
    pub abbreviation: String,
    /// Device type for abbreviations outside the default table
    #[serde(default)]
    pub kind: Option<String>,
    pub specifications: Vec<RawSpecification>,
}

/// Typed lookup over a raw record's specifications.
struct Specs<'a> {
    abbreviation: &'a str,
    values: BTreeMap<&'a str, &'a Value>,
}

impl<'a> Specs<'a> {
    fn new(entry: &'a RawDeviceEntry) -> Self {
        Self {
            abbreviation: &entry.abbreviation,
            values: entry
                .specifications
                .iter()
                .map(|s| (s.name.as_str(), &s.value))
                .collect(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}.{}", self.abbreviation, name)
    }

    /// `Ok(None)` when absent, an error when present but not a number.
    fn number(&self, name: &str) -> HubResult<Option<f64>> {
        match self.values.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .filter(|v| v.is_finite())
                .map(Some)
                .ok_or_else(|| HubError::data(self.key(name), "not a finite number")),
            Some(other) => Err(HubError::data(
                self.key(name),
                format!("expected a number, got {other}"),
            )),
        }
    }

    fn number_or(&self, name: &str, default: f64) -> HubResult<f64> {
        Ok(self.number(name)?.unwrap_or(default))
    }

    fn required(&self, name: &str) -> HubResult<f64> {
        self.number(name)?
            .ok_or_else(|| HubError::data(self.key(name), "required specification is missing"))
    }

    fn flag(&self, name: &str, default: bool) -> HubResult<bool> {
        match self.values.get(name) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::Number(n)) if n.as_f64() == Some(0.0) => Ok(false),
            Some(Value::Number(n)) if n.as_f64() == Some(1.0) => Ok(true),
            Some(other) => Err(HubError::data(
                self.key(name),
                format!("expected a boolean, got {other}"),
            )),
        }
    }

    fn carrier(&self, name: &str, default: Carrier) -> HubResult<Carrier> {
        match self.values.get(name) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::String(s)) => Carrier::from_str(s)
                .map_err(|_| HubError::data(self.key(name), format!("unknown carrier '{s}'"))),
            Some(other) => Err(HubError::data(
                self.key(name),
                format!("expected a carrier name, got {other}"),
            )),
        }
    }
}

/// Device types addressable by name in a record's `kind` field.
const KIND_NAMES: &[(&str, &str)] = &[
    ("heat_pump", "HP"),
    ("electric_heater", "EH"),
    ("boiler", "BOI"),
    ("chp", "CHP"),
    ("gas_heat_pump", "GHP"),
    ("fuel_cell", "FC"),
    ("electrolyzer", "ELYZ"),
    ("compression_chiller", "CC"),
    ("absorption_chiller", "AC"),
    ("sabatier", "SAB"),
    ("photovoltaic", "PV"),
    ("wind_turbine", "WT"),
    ("solar_thermal", "STC"),
    ("hydro", "WAT"),
    ("battery", "BAT"),
    ("thermal_storage", "TES"),
    ("cold_storage", "CTES"),
    ("hydrogen_storage", "H2S"),
    ("gas_storage", "GS"),
];

fn parse_kind(template: &str, specs: &Specs<'_>) -> HubResult<DeviceKind> {
    let storage = |carrier: Carrier, coeff_default: f64| -> HubResult<DeviceKind> {
        let eta_ch = specs.number_or("eta_ch", 1.0)?;
        let coeff_ch = specs.number_or("coeff_ch", coeff_default)?;
        let standby_loss = match (specs.number("sto_loss")?, specs.number("eta_standby")?) {
            (Some(loss), _) => loss,
            (None, Some(standby)) => 1.0 - standby,
            (None, None) => 0.0,
        };
        Ok(DeviceKind::Storage(StorageParams {
            carrier: specs.carrier("carrier", carrier)?,
            soc_min: specs.number_or("soc_min", 0.0)?,
            soc_max: specs.number_or("soc_max", 1.0)?,
            eta_ch,
            eta_dch: specs.number_or("eta_dch", eta_ch)?,
            coeff_ch,
            coeff_dch: specs.number_or("coeff_dch", coeff_ch)?,
            standby_loss,
            soc_init: specs.number("init")?,
        }))
    };

    let kind = match template {
        "HP" => {
            let cop = match specs.number("COP")? {
                Some(cop) => CopModel::Fixed(cop),
                None => CopModel::Carnot {
                    grade: specs.number_or("grade", 0.4)?,
                    supply_temperature_c: specs.number_or("T_supply", 35.0)?,
                },
            };
            DeviceKind::HeatPump { cop }
        }
        "EH" => DeviceKind::ElectricHeater {
            eta: specs.number_or("eta_th", 1.0)?,
        },
        "BOI" | "BBOI" | "WBOI" => {
            let fuel = match template {
                "BBOI" => Carrier::Biomass,
                "WBOI" => Carrier::Waste,
                _ => Carrier::Gas,
            };
            DeviceKind::Boiler {
                fuel: specs.carrier("fuel", fuel)?,
                eta_th: specs.required("eta_th")?,
            }
        }
        "CHP" | "BCHP" | "WCHP" => {
            let fuel = match template {
                "BCHP" => Carrier::Biomass,
                "WCHP" => Carrier::Waste,
                _ => Carrier::Gas,
            };
            DeviceKind::Chp {
                fuel: specs.carrier("fuel", fuel)?,
                eta_th: specs.required("eta_th")?,
                eta_el: specs.required("eta_el")?,
            }
        }
        "GHP" => DeviceKind::GasHeatPump {
            cop: specs.required("COP")?,
        },
        "FC" => DeviceKind::FuelCell {
            eta_el: specs.required("eta_el")?,
            eta_th: specs.required("eta_th")?,
            heat_dissipation: specs.flag("enable_heat_diss", false)?,
        },
        "ELYZ" => DeviceKind::Electrolyzer {
            eta: specs.number("eta")?.map_or_else(|| specs.required("eta_el"), Ok)?,
        },
        "CC" => DeviceKind::CompressionChiller {
            cop: specs.required("COP")?,
        },
        "AC" => DeviceKind::AbsorptionChiller {
            eta: specs.required("eta_th")?,
        },
        "SAB" => DeviceKind::Sabatier {
            eta: specs.required("eta")?,
        },
        "PV" | "WT" | "WAT" => DeviceKind::Renewable {
            output: Carrier::Electricity,
        },
        "STC" => DeviceKind::Renewable {
            output: Carrier::Heat,
        },
        "BAT" => storage(Carrier::Electricity, 0.8)?,
        "TES" => storage(Carrier::Heat, 1.0)?,
        "CTES" => storage(Carrier::Cooling, 1.0)?,
        "H2S" => storage(Carrier::Hydrogen, 1.0)?,
        "GS" => storage(Carrier::Gas, 1.0)?,
        other => {
            return Err(HubError::data(
                specs.abbreviation,
                format!("unknown device type '{other}'"),
            ))
        }
    };
    Ok(kind)
}

impl DeviceSpec {
    /// Parse one raw catalogue record. The device type comes from the
    /// record's `kind` field, or from the abbreviation when it is one of
    /// the standard ones.
    pub fn from_raw(entry: &RawDeviceEntry) -> HubResult<Self> {
        let specs = Specs::new(entry);
        let template = match entry.kind.as_deref() {
            Some(name) => KIND_NAMES
                .iter()
                .find(|(kind, _)| *kind == name)
                .map(|(_, abbr)| *abbr)
                .ok_or_else(|| {
                    HubError::data(&entry.abbreviation, format!("unknown device kind '{name}'"))
                })?,
            None => entry.abbreviation.as_str(),
        };
        let kind = parse_kind(template, &specs)?;

        let inv_var = specs.number_or("inv_var", 0.0)?;
        let ann_factor = match (specs.number("ann_factor")?, specs.number("life_time")?) {
            (Some(factor), _) => factor,
            (None, Some(years)) => annuity_factor(
                specs.number_or("interest_rate", DEFAULT_INTEREST_RATE)?,
                years,
            ),
            (None, None) => 0.0,
        };
        let economics = DeviceEconomics {
            inv_var,
            ann_factor,
            cost_om: specs.number_or("cost_om", 0.0)?,
            min_cap: specs.number_or("min_cap", 0.0)?,
            max_cap: specs.number_or("max_cap", 0.0)?,
        };

        let spec = Self {
            abbreviation: entry.abbreviation.clone(),
            kind,
            economics,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Physical parameters and sizing bounds, checked however the spec was built.
    pub fn validate(&self) -> HubResult<()> {
        self.kind.validate(&self.abbreviation)?;
        let economics = &self.economics;
        let bounds_ok = economics.min_cap.is_finite()
            && economics.min_cap >= 0.0
            && economics.max_cap >= economics.min_cap;
        if !bounds_ok {
            return Err(HubError::data(
                format!("{}.max_cap", self.abbreviation),
                format!(
                    "sizing bounds [{}, {}] are not a valid range",
                    economics.min_cap, economics.max_cap
                ),
            ));
        }
        Ok(())
    }
}

/// Device catalogue keyed by abbreviation. Every entry has passed
/// [`DeviceSpec::validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<DeviceSpec>", into = "Vec<DeviceSpec>")]
pub struct Catalogue {
    devices: BTreeMap<String, DeviceSpec>,
}

impl Catalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_raw(entries: &[RawDeviceEntry]) -> HubResult<Self> {
        entries
            .iter()
            .map(DeviceSpec::from_raw)
            .collect::<HubResult<Vec<_>>>()?
            .try_into()
    }

    /// Add or replace a device after validating it.
    pub fn insert(&mut self, spec: DeviceSpec) -> HubResult<()> {
        spec.validate()?;
        self.devices.insert(spec.abbreviation.clone(), spec);
        Ok(())
    }

    pub fn with(mut self, spec: DeviceSpec) -> HubResult<Self> {
        self.insert(spec)?;
        Ok(self)
    }

    pub fn get(&self, abbreviation: &str) -> HubResult<&DeviceSpec> {
        self.devices
            .get(abbreviation)
            .ok_or_else(|| HubError::data(abbreviation, "device missing from catalogue"))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl TryFrom<Vec<DeviceSpec>> for Catalogue {
    type Error = HubError;

    fn try_from(specs: Vec<DeviceSpec>) -> HubResult<Self> {
        let mut catalogue = Self::new();
        for spec in specs {
            if catalogue.devices.contains_key(&spec.abbreviation) {
                return Err(HubError::data(
                    &spec.abbreviation,
                    "abbreviation listed twice in catalogue",
                ));
            }
            catalogue.insert(spec)?;
        }
        Ok(catalogue)
    }
}

impl From<Catalogue> for Vec<DeviceSpec> {
    fn from(catalogue: Catalogue) -> Self {
        catalogue.devices.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn entry(abbreviation: &str, specs: Value) -> RawDeviceEntry {
        let specifications = specs
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| RawSpecification {
                name: k.clone(),
                value: v.clone(),
            })
            .collect();
        RawDeviceEntry {
            abbreviation: abbreviation.to_string(),
            kind: None,
            specifications,
        }
    }

    #[test]
    fn test_parse_boiler_and_chp() {
        let boi = DeviceSpec::from_raw(&entry("BOI", json!({"eta_th": 0.97, "inv_var": 130}))).unwrap();
        assert_eq!(
            boi.kind,
            DeviceKind::Boiler {
                fuel: Carrier::Gas,
                eta_th: 0.97
            }
        );
        assert_eq!(boi.economics.inv_var, 130.0);

        let bchp = DeviceSpec::from_raw(&entry("BCHP", json!({"eta_th": 0.6, "eta_el": 0.3}))).unwrap();
        assert!(matches!(
            bchp.kind,
            DeviceKind::Chp {
                fuel: Carrier::Biomass,
                ..
            }
        ));
    }

    #[test]
    fn test_absent_specification_uses_default() {
        let tes = DeviceSpec::from_raw(&entry("TES", json!({"eta_standby": 0.97}))).unwrap();
        match tes.kind {
            DeviceKind::Storage(p) => {
                assert_eq!(p.carrier, Carrier::Heat);
                assert_eq!(p.soc_min, 0.0);
                assert_eq!(p.soc_max, 1.0);
                assert!((p.standby_loss - 0.03).abs() < 1e-12);
                assert_eq!(p.soc_init, None);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_malformed_specification_is_rejected() {
        let err = DeviceSpec::from_raw(&entry("BOI", json!({"eta_th": "high"}))).unwrap_err();
        assert!(matches!(err, HubError::DataInconsistency { ref key, .. } if key == "BOI.eta_th"));

        let err = DeviceSpec::from_raw(&entry("BOI", json!({}))).unwrap_err();
        assert!(matches!(err, HubError::DataInconsistency { ref key, .. } if key == "BOI.eta_th"));

        let err = DeviceSpec::from_raw(&entry("BAT", json!({"soc_min": 0.9, "soc_max": 0.5}))).unwrap_err();
        assert!(matches!(err, HubError::DataInconsistency { .. }));
    }

    #[test]
    fn test_unknown_abbreviation_needs_kind() {
        let err = DeviceSpec::from_raw(&entry("XYZ", json!({}))).unwrap_err();
        assert!(matches!(err, HubError::DataInconsistency { .. }));

        let mut raw = entry("BOI2", json!({"eta_th": 0.9}));
        raw.kind = Some("boiler".to_string());
        let spec = DeviceSpec::from_raw(&raw).unwrap();
        assert_eq!(spec.abbreviation, "BOI2");
        assert_eq!(spec.kind.role(), DeviceRole::Conversion);
    }

    #[test]
    fn test_carnot_cop_uses_lift_floor() {
        let model = CopModel::Carnot {
            grade: 0.4,
            supply_temperature_c: 35.0,
        };
        let cold = model.cop_at(-5.0);
        assert!((cold - 0.4 * 308.15 / 40.0).abs() < 1e-9);
        // Ambient above the supply temperature must still give a positive COP.
        let hot = model.cop_at(40.0);
        assert!((hot - 0.4 * 308.15 / MIN_TEMPERATURE_LIFT_K).abs() < 1e-9);
    }

    #[test]
    fn test_heat_pump_conversion_requires_ambient() {
        let kind = DeviceKind::HeatPump {
            cop: CopModel::Carnot {
                grade: 0.4,
                supply_temperature_c: 35.0,
            },
        };
        assert!(kind.needs_ambient_temperature());
        assert!(kind.conversion(None).is_none());
        let spec = kind.conversion(Some(&[0.0, 10.0])).unwrap();
        match &spec.outputs[0].efficiency {
            Efficiency::Series(values) => assert_eq!(values.len(), 2),
            other => panic!("expected series, got {other:?}"),
        }
    }

    #[test]
    fn test_annuity_factor() {
        // 20 years at 5% -> ~0.0802
        assert!((annuity_factor(0.05, 20.0) - 0.080_242_6).abs() < 1e-6);
        assert!((annuity_factor(0.0, 10.0) - 0.1).abs() < 1e-12);
        assert_eq!(annuity_factor(0.05, 0.0), 0.0);
    }

    #[rstest]
    #[case(json!({"eta_el": 0.5, "eta_th": 0.4, "enable_heat_diss": true}), Relation::AtMost)]
    #[case(json!({"eta_el": 0.5, "eta_th": 0.4, "enable_heat_diss": false}), Relation::Equal)]
    #[case(json!({"eta_el": 0.5, "eta_th": 0.4}), Relation::Equal)]
    fn test_fuel_cell_heat_dissipation_flag(#[case] specs: Value, #[case] relation: Relation) {
        let fc = DeviceSpec::from_raw(&entry("FC", specs)).unwrap();
        let conversion = fc.kind.conversion(None).unwrap();
        assert_eq!(conversion.input, Carrier::Hydrogen);
        assert_eq!(conversion.outputs[0].relation, Relation::Equal);
        assert_eq!(conversion.outputs[1].carrier, Carrier::Heat);
        assert_eq!(conversion.outputs[1].relation, relation);
    }

    #[test]
    fn test_catalogue_validates_inserted_specs() {
        let broken = DeviceSpec {
            abbreviation: "BOI".into(),
            kind: DeviceKind::Boiler {
                fuel: Carrier::Gas,
                eta_th: 0.0,
            },
            economics: DeviceEconomics::default(),
        };
        let err = Catalogue::new().with(broken.clone()).unwrap_err();
        assert!(matches!(err, HubError::DataInconsistency { ref key, .. } if key == "BOI.eta_th"));

        let mut inverted = broken.clone();
        inverted.kind = DeviceKind::Boiler {
            fuel: Carrier::Gas,
            eta_th: 0.9,
        };
        inverted.economics.min_cap = 10.0;
        assert!(Catalogue::new().with(inverted).is_err());

        let raw = serde_json::to_value(vec![broken]).unwrap();
        assert!(serde_json::from_value::<Catalogue>(raw).is_err());
    }

    #[test]
    fn test_catalogue_serde_keeps_entries() {
        let catalogue = Catalogue::from_raw(&[entry("BOI", json!({"eta_th": 0.9}))]).unwrap();
        let json = serde_json::to_value(&catalogue).unwrap();
        let back: Catalogue = serde_json::from_value(json).unwrap();
        assert_eq!(back.len(), 1);
        assert!(back.get("BOI").is_ok());
    }

    #[test]
    fn test_catalogue_rejects_duplicates() {
        let entries = vec![
            entry("BOI", json!({"eta_th": 0.9})),
            entry("BOI", json!({"eta_th": 0.95})),
        ];
        assert!(Catalogue::from_raw(&entries).is_err());
        let catalogue = Catalogue::from_raw(&entries[..1]).unwrap();
        assert_eq!(catalogue.len(), 1);
        assert!(catalogue.get("HP").is_err());
    }
}
