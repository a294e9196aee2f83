//! Bluetooth measurement subsystem.

use super::{command_tree, INSTANCE};
use crate::io::Core;
use scpi_core::{
    ArgStruct, Bindings, CommandTree, FloatExt, ScpiError, ScpiRecord, ScpiResult, StructRecord,
    Value,
};
use serde::Serialize;
use std::sync::Arc;

/// HDR P8H DEVM limits.
pub const HDR_P8H_DEVM: &str = "CONFigure:BLUetooth:MEASurement<Instance>:HDR:LIMit:P8H:DEVM";
/// Single-shot or continuous measurement.
pub const REPETITION: &str = "CONFigure:BLUetooth:MEASurement<Instance>:MEValuation:REPetition";
/// Trigger source of the multi-evaluation measurement.
pub const TRIGGER_SOURCE: &str = "TRIGger:BLUetooth:MEASurement<Instance>:MEValuation:SOURce";
/// Current power-vs-time results.
pub const PVT_CURRENT: &str = "FETCh:BLUetooth:MEASurement<Instance>:MEValuation:PVTime:CURRent";
/// Start the multi-evaluation measurement.
pub const INITIATE: &str = "INITiate:BLUetooth:MEASurement<Instance>:MEValuation";
/// Stop the multi-evaluation measurement.
pub const ABORT: &str = "ABORt:BLUetooth:MEASurement<Instance>:MEValuation";

/// Every Bluetooth template in this module.
pub const COMMANDS: &[&str] = &[
    HDR_P8H_DEVM,
    REPETITION,
    TRIGGER_SOURCE,
    PVT_CURRENT,
    INITIATE,
    ABORT,
];

fn triple(field: &str, list: Vec<bool>) -> ScpiResult<[bool; 3]> {
    <[bool; 3]>::try_from(list).map_err(|_| ScpiError::FieldTypeMismatch {
        field: field.to_string(),
        expected: "list of 3 booleans".to_string(),
    })
}

/// DEVM limits for HDR P8H packets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DevmStruct {
    /// RMS DEVM limit in percent.
    pub rms: f64,
    /// Peak DEVM limit in percent.
    pub peak: f64,
    /// 99 % DEVM limit in percent.
    pub p_99: f64,
    /// RMS limit enables per packet section.
    pub rms_enabled: [bool; 3],
    /// Peak limit enables per packet section.
    pub peak_enabled: [bool; 3],
    /// 99 % limit enable.
    pub p_99_enabled: bool,
}

impl ScpiRecord for DevmStruct {
    const NAME: &'static str = "DevmStruct";
    const FIELDS: &'static [ArgStruct] = &[
        ArgStruct::scalar_float("Rms"),
        ArgStruct::scalar_float("Peak"),
        ArgStruct::scalar_float("P_99"),
        ArgStruct::bool_list("Rms_Enabled", 3),
        ArgStruct::bool_list("Peak_Enabled", 3),
        ArgStruct::scalar_bool("P_99_Enabled"),
    ];

    fn from_record(r: &StructRecord) -> ScpiResult<Self> {
        Ok(Self {
            rms: r.required("Rms", r.float("Rms"))?,
            peak: r.required("Peak", r.float("Peak"))?,
            p_99: r.required("P_99", r.float("P_99"))?,
            rms_enabled: triple(
                "Rms_Enabled",
                r.required("Rms_Enabled", r.bool_list("Rms_Enabled"))?,
            )?,
            peak_enabled: triple(
                "Peak_Enabled",
                r.required("Peak_Enabled", r.bool_list("Peak_Enabled"))?,
            )?,
            p_99_enabled: r.required("P_99_Enabled", r.bool("P_99_Enabled"))?,
        })
    }

    fn to_record(&self) -> ScpiResult<StructRecord> {
        Self::empty_record()
            .with("Rms", Value::Float(self.rms))?
            .with("Peak", Value::Float(self.peak))?
            .with("P_99", Value::Float(self.p_99))?
            .with("Rms_Enabled", Value::BoolList(self.rms_enabled.to_vec()))?
            .with("Peak_Enabled", Value::BoolList(self.peak_enabled.to_vec()))?
            .with("P_99_Enabled", Value::Bool(self.p_99_enabled))
    }
}

/// Current power-vs-time results.
///
/// Power values may be reported as sentinels (`INV`, `NCAP`, ...) when the
/// measurement could not produce them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerVsTimeResult {
    /// 0 means the result is reliable.
    pub reliability: i64,
    /// Nominal power in dBm.
    pub nominal_power: FloatExt,
    /// Peak power in dBm.
    pub peak_power: FloatExt,
    /// Leakage power in dBm.
    pub leakage_power: FloatExt,
    /// Not reported by older firmware.
    pub packet_timing: Option<FloatExt>,
}

impl ScpiRecord for PowerVsTimeResult {
    const NAME: &'static str = "PowerVsTimeResult";
    const FIELDS: &'static [ArgStruct] = &[
        ArgStruct::scalar_int("Reliability"),
        ArgStruct::scalar_float_ext("Nominal_Power"),
        ArgStruct::scalar_float_ext("Peak_Power"),
        ArgStruct::scalar_float_ext("Leakage_Power"),
        ArgStruct::scalar_float_ext("Packet_Timing").optional(),
    ];

    fn from_record(r: &StructRecord) -> ScpiResult<Self> {
        Ok(Self {
            reliability: r.required("Reliability", r.int("Reliability"))?,
            nominal_power: r.required("Nominal_Power", r.float_ext("Nominal_Power"))?,
            peak_power: r.required("Peak_Power", r.float_ext("Peak_Power"))?,
            leakage_power: r.required("Leakage_Power", r.float_ext("Leakage_Power"))?,
            packet_timing: r.float_ext("Packet_Timing")?,
        })
    }

    fn to_record(&self) -> ScpiResult<StructRecord> {
        let mut record = Self::empty_record()
            .with("Reliability", Value::Int(self.reliability))?
            .with("Nominal_Power", Value::FloatExt(self.nominal_power))?
            .with("Peak_Power", Value::FloatExt(self.peak_power))?
            .with("Leakage_Power", Value::FloatExt(self.leakage_power))?;
        record.set("Packet_Timing", self.packet_timing.map(Value::FloatExt))?;
        Ok(record)
    }
}

/// Measurement repetition mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Repetition {
    /// Stop after one statistics cycle.
    SingleShot,
    /// Measure until aborted.
    Continuous,
}

impl Repetition {
    const MNEMONICS: &'static [&'static str] = &["SINGleshot", "CONTinuous"];

    /// Declared SCPI mnemonic.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Repetition::SingleShot => Self::MNEMONICS[0],
            Repetition::Continuous => Self::MNEMONICS[1],
        }
    }

    fn from_mnemonic(field: &str, mnemonic: &str) -> ScpiResult<Self> {
        match Self::MNEMONICS.iter().position(|m| *m == mnemonic) {
            Some(0) => Ok(Repetition::SingleShot),
            Some(_) => Ok(Repetition::Continuous),
            None => Err(ScpiError::InvalidToken {
                field: field.to_string(),
                token: mnemonic.to_string(),
                expected: "SINGleshot or CONTinuous",
            }),
        }
    }
}

/// Repetition setting as a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RepetitionStruct {
    /// Measurement repetition mode.
    pub repetition: Repetition,
}

impl ScpiRecord for RepetitionStruct {
    const NAME: &'static str = "RepetitionStruct";
    const FIELDS: &'static [ArgStruct] =
        &[ArgStruct::scalar_enum("Repetition", Repetition::MNEMONICS)];

    fn from_record(r: &StructRecord) -> ScpiResult<Self> {
        let mnemonic = r.required("Repetition", r.enum_value("Repetition"))?;
        Ok(Self {
            repetition: Repetition::from_mnemonic("Repetition", &mnemonic)?,
        })
    }

    fn to_record(&self) -> ScpiResult<StructRecord> {
        Self::empty_record().with(
            "Repetition",
            Value::Enum(self.repetition.mnemonic().to_string()),
        )
    }
}

/// Trigger source setting as a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerSourceStruct {
    /// Trigger source name as reported by the instrument.
    pub source: String,
}

impl ScpiRecord for TriggerSourceStruct {
    const NAME: &'static str = "TriggerSourceStruct";
    const FIELDS: &'static [ArgStruct] = &[ArgStruct::raw_string("Source")];

    fn from_record(r: &StructRecord) -> ScpiResult<Self> {
        Ok(Self {
            source: r.required("Source", r.string("Source"))?,
        })
    }

    fn to_record(&self) -> ScpiResult<StructRecord> {
        Self::empty_record().with("Source", Value::Str(self.source.clone()))
    }
}

/// Bluetooth measurement commands bound to one instance.
///
/// Cloning is cheap; [`with_instance`](Self::with_instance) returns a copy
/// addressing another measurement instance over the same core.
#[derive(Debug, Clone)]
pub struct BluetoothMeas {
    core: Arc<Core>,
    tree: Arc<CommandTree>,
    bindings: Bindings,
}

impl BluetoothMeas {
    /// Facade over the default catalogue tree (instance 1).
    pub fn new(core: Arc<Core>) -> ScpiResult<Self> {
        Ok(Self::with_bindings(
            core,
            Arc::new(command_tree()?),
            Bindings::new(),
        ))
    }

    /// Facade over an explicit tree and bindings.
    pub fn with_bindings(core: Arc<Core>, tree: Arc<CommandTree>, bindings: Bindings) -> Self {
        Self {
            core,
            tree,
            bindings,
        }
    }

    /// Same facade, bound to another measurement instance.
    pub fn with_instance(&self, instance: u32) -> Self {
        let mut other = self.clone();
        other.bindings.set(INSTANCE, instance);
        other
    }

    /// Shared I/O core.
    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    /// Compose a catalogue template with this facade's bindings.
    pub fn command(&self, template: &str) -> ScpiResult<String> {
        let id = self.tree.lookup(template)?;
        self.tree.compose(id, &self.bindings)
    }

    /// Query the HDR P8H DEVM limits.
    pub fn get_hdr_p8h_devm(&self) -> ScpiResult<DevmStruct> {
        self.core.query_struct(&self.command(HDR_P8H_DEVM)?)
    }

    /// Set the HDR P8H DEVM limits.
    pub fn set_hdr_p8h_devm(&self, value: &DevmStruct) -> ScpiResult<()> {
        self.core.write_struct(&self.command(HDR_P8H_DEVM)?, value)
    }

    /// Fetch the current power-vs-time results.
    pub fn fetch_power_vs_time(&self) -> ScpiResult<PowerVsTimeResult> {
        self.core.query_struct(&self.command(PVT_CURRENT)?)
    }

    /// Query the repetition mode.
    pub fn get_repetition(&self) -> ScpiResult<Repetition> {
        let value: RepetitionStruct = self.core.query_struct(&self.command(REPETITION)?)?;
        Ok(value.repetition)
    }

    /// Set the repetition mode.
    pub fn set_repetition(&self, repetition: Repetition) -> ScpiResult<()> {
        self.core
            .write_struct(&self.command(REPETITION)?, &RepetitionStruct { repetition })
    }

    /// Query the trigger source.
    pub fn get_trigger_source(&self) -> ScpiResult<String> {
        let value: TriggerSourceStruct = self.core.query_struct(&self.command(TRIGGER_SOURCE)?)?;
        Ok(value.source)
    }

    /// Set the trigger source.
    pub fn set_trigger_source(&self, source: &str) -> ScpiResult<()> {
        self.core.write_struct(
            &self.command(TRIGGER_SOURCE)?,
            &TriggerSourceStruct {
                source: source.to_string(),
            },
        )
    }

    /// Start the measurement and wait until the instrument accepted it.
    pub fn initiate(&self) -> ScpiResult<()> {
        self.core.write_with_opc(&self.command(INITIATE)?)
    }

    /// Abort the measurement.
    pub fn abort(&self) -> ScpiResult<()> {
        self.core.write(&self.command(ABORT)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::IoSettings;
    use crate::transport::SimTransport;
    use scpi_core::{ErrorKind, Sentinel};

    fn meas(sim: &SimTransport) -> BluetoothMeas {
        let core = Core::new(
            Box::new(sim.clone()),
            IoSettings {
                query_instrument_status: false,
                ..Default::default()
            },
        );
        BluetoothMeas::new(Arc::new(core)).unwrap()
    }

    fn sample() -> DevmStruct {
        DevmStruct {
            rms: 1.0,
            peak: 2.0,
            p_99: 3.0,
            rms_enabled: [true, false, true],
            peak_enabled: [true, false, true],
            p_99_enabled: false,
        }
    }

    #[test]
    fn test_devm_set_then_get() {
        let sim = SimTransport::new();
        let bt = meas(&sim);
        bt.set_hdr_p8h_devm(&sample()).unwrap();
        assert_eq!(
            sim.call_log()[0],
            "CONFigure:BLUetooth:MEASurement1:HDR:LIMit:P8H:DEVM 1.0,2.0,3.0,1,0,1,1,0,1,0"
        );
        assert_eq!(bt.get_hdr_p8h_devm().unwrap(), sample());
    }

    #[test]
    fn test_with_instance_rebinds() {
        let sim = SimTransport::new();
        let bt = meas(&sim).with_instance(3);
        bt.set_repetition(Repetition::Continuous).unwrap();
        assert_eq!(
            sim.call_log()[0],
            "CONFigure:BLUetooth:MEASurement3:MEValuation:REPetition CONTinuous"
        );
        assert_eq!(bt.get_repetition().unwrap(), Repetition::Continuous);
    }

    #[test]
    fn test_repetition_short_form_response() {
        let sim = SimTransport::new();
        sim.respond(
            "CONFigure:BLUetooth:MEASurement1:MEValuation:REPetition?",
            "SING",
        );
        assert_eq!(meas(&sim).get_repetition().unwrap(), Repetition::SingleShot);
    }

    #[test]
    fn test_fetch_power_vs_time_with_sentinels() {
        let sim = SimTransport::new();
        sim.respond(
            "FETCh:BLUetooth:MEASurement1:MEValuation:PVTime:CURRent?",
            "0,-10.5,INV,NCAP",
        );
        let pvt = meas(&sim).fetch_power_vs_time().unwrap();
        assert_eq!(pvt.reliability, 0);
        assert_eq!(pvt.nominal_power, FloatExt::Numeric(-10.5));
        assert_eq!(pvt.peak_power, FloatExt::Invalid(Sentinel::Invalid));
        assert_eq!(pvt.leakage_power, FloatExt::Invalid(Sentinel::NotCapable));
        assert_eq!(pvt.packet_timing, None);
    }

    #[test]
    fn test_trigger_source_quoted() {
        let sim = SimTransport::new();
        let bt = meas(&sim);
        bt.set_trigger_source("Bluetooth Meas1: Power").unwrap();
        assert_eq!(
            sim.setting("TRIGger:BLUetooth:MEASurement1:MEValuation:SOURce")
                .as_deref(),
            Some("\"Bluetooth Meas1: Power\"")
        );
        assert_eq!(bt.get_trigger_source().unwrap(), "Bluetooth Meas1: Power");
    }

    #[test]
    fn test_missing_binding_sends_nothing() {
        let sim = SimTransport::new();
        let core = Arc::new(Core::new(Box::new(sim.clone()), IoSettings::default()));
        let tree = Arc::new(CommandTree::from_catalogue(COMMANDS).unwrap());
        let bt = BluetoothMeas::with_bindings(core, tree, Bindings::new());

        let err = bt.get_hdr_p8h_devm().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingInstanceBinding);
        assert!(sim.call_log().is_empty());
    }

    #[test]
    fn test_initiate_and_abort() {
        let sim = SimTransport::new();
        let bt = meas(&sim).with_instance(2);
        bt.initiate().unwrap();
        bt.abort().unwrap();
        assert_eq!(
            sim.call_log(),
            vec![
                "INITiate:BLUetooth:MEASurement2:MEValuation",
                "*OPC?",
                "ABORt:BLUetooth:MEASurement2:MEValuation",
            ]
        );
    }
}
