//! Behavioural laws of the record codec: round trips, boolean spellings,
//! sentinel preservation and arity enforcement.

use scpi_core::{
    ArgStruct, FloatExt, ScpiError, ScpiRecord, ScpiResult, Sentinel, StructRecord, Value,
};

#[derive(Debug, Clone, PartialEq)]
struct DevmStruct {
    rms: f64,
    peak: f64,
    p_99: f64,
    rms_enabled: [bool; 3],
    peak_enabled: [bool; 3],
    p_99_enabled: bool,
}

fn triple(list: Vec<bool>) -> [bool; 3] {
    [list[0], list[1], list[2]]
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
            rms_enabled: triple(r.required("Rms_Enabled", r.bool_list("Rms_Enabled"))?),
            peak_enabled: triple(r.required("Peak_Enabled", r.bool_list("Peak_Enabled"))?),
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

#[test]
fn test_devm_example_scenario() {
    let devm = DevmStruct::decode("1.0,2.0,3.0,1,0,1,1,0,1,0").unwrap();
    assert_eq!(
        devm,
        DevmStruct {
            rms: 1.0,
            peak: 2.0,
            p_99: 3.0,
            rms_enabled: [true, false, true],
            peak_enabled: [true, false, true],
            p_99_enabled: false,
        }
    );
}

#[test]
fn test_round_trip_typed_records() {
    let samples = [
        DevmStruct {
            rms: 0.125,
            peak: -40.5,
            p_99: 1e-9,
            rms_enabled: [false, false, true],
            peak_enabled: [true, true, true],
            p_99_enabled: true,
        },
        DevmStruct {
            rms: 0.0,
            peak: 123456.789,
            p_99: -0.1,
            rms_enabled: [true, false, false],
            peak_enabled: [false, true, false],
            p_99_enabled: false,
        },
    ];
    for sample in samples {
        let wire = sample.encode().unwrap();
        assert_eq!(DevmStruct::decode(&wire).unwrap(), sample, "wire: {wire}");
    }
}

#[test]
fn test_round_trip_generic_record() {
    const FIELDS: &[ArgStruct] = &[
        ArgStruct::scalar_int("Reliability"),
        ArgStruct::scalar_float_ext("Level"),
        ArgStruct::raw_string("Name"),
        ArgStruct::scalar_enum("Mode", &["SINGleshot", "CONTinuous"]),
    ];
    let rec = StructRecord::new("Generic", FIELDS)
        .with("Reliability", Value::Int(3))
        .unwrap()
        .with("Level", Value::FloatExt(FloatExt::Numeric(-7.25)))
        .unwrap()
        .with("Name", Value::Str("quoted \"name\", with comma".into()))
        .unwrap()
        .with("Mode", Value::Enum("CONTinuous".into()))
        .unwrap();

    let wire = rec.to_scpi_string().unwrap();
    let back = StructRecord::parse("Generic", FIELDS, &wire).unwrap();
    assert_eq!(back, rec);
}

#[test]
fn test_round_trip_infinities() {
    const FIELDS: &[ArgStruct] = &[
        ArgStruct::scalar_float("A"),
        ArgStruct::scalar_float_ext("B"),
    ];
    let rec = StructRecord::new("Limits", FIELDS)
        .with("A", Value::Float(f64::NEG_INFINITY))
        .unwrap()
        .with("B", Value::FloatExt(FloatExt::Numeric(f64::INFINITY)))
        .unwrap();

    let wire = rec.to_scpi_string().unwrap();
    assert_eq!(wire, "NINF,INF");
    assert_eq!(StructRecord::parse("Limits", FIELDS, &wire).unwrap(), rec);

    let devm = DevmStruct {
        rms: f64::INFINITY,
        peak: f64::NEG_INFINITY,
        p_99: 0.5,
        rms_enabled: [true; 3],
        peak_enabled: [false; 3],
        p_99_enabled: true,
    };
    assert_eq!(DevmStruct::decode(&devm.encode().unwrap()).unwrap(), devm);
}

#[test]
fn test_round_trip_loosely_spelled_inputs() {
    const FIELDS: &[ArgStruct] = &[
        ArgStruct::scalar_enum("Mode", &["SINGleshot", "CONTinuous"]),
        ArgStruct::scalar_float_ext("Level"),
    ];
    let rec = StructRecord::new("Loose", FIELDS)
        .with("Mode", Value::Enum("cont".into()))
        .unwrap()
        .with("Level", Value::Float(1.5))
        .unwrap();

    let wire = rec.to_scpi_string().unwrap();
    assert_eq!(wire, "CONTinuous,1.5");
    assert_eq!(StructRecord::parse("Loose", FIELDS, &wire).unwrap(), rec);
}

#[test]
fn test_boolean_spellings_equivalent() {
    let on = DevmStruct::decode("1,1,1,ON,on,1,1,1,1,ON").unwrap();
    assert_eq!(on.rms_enabled, [true, true, true]);
    assert!(on.p_99_enabled);

    let off = DevmStruct::decode("1,1,1,OFF,off,0,0,0,0,OFF").unwrap();
    assert_eq!(off.rms_enabled, [false, false, false]);
    assert!(!off.p_99_enabled);
}

#[test]
fn test_sentinel_preserved_through_encode_decode() {
    const FIELDS: &[ArgStruct] = &[ArgStruct::scalar_float_ext("Power")];
    for sentinel in [Sentinel::Invalid, Sentinel::NotCapable, Sentinel::NotAvailable] {
        let rec = StructRecord::new("Pwr", FIELDS)
            .with("Power", Value::FloatExt(FloatExt::Invalid(sentinel)))
            .unwrap();
        let back = StructRecord::parse("Pwr", FIELDS, &rec.to_scpi_string().unwrap()).unwrap();
        let decoded = back.float_ext("Power").unwrap().unwrap();
        assert_eq!(decoded, FloatExt::Invalid(sentinel));
        assert_eq!(decoded.numeric(), None);
        assert_ne!(decoded, FloatExt::Numeric(0.0));
    }
}

#[test]
fn test_arity_eight_fields_six_tokens() {
    const EIGHT: &[ArgStruct] = &[
        ArgStruct::scalar_float("A"),
        ArgStruct::scalar_float("B"),
        ArgStruct::scalar_float("C"),
        ArgStruct::scalar_float("D"),
        ArgStruct::scalar_int("E"),
        ArgStruct::scalar_int("F"),
        ArgStruct::scalar_bool("G"),
        ArgStruct::scalar_bool("H"),
    ];
    let err = StructRecord::parse("Eight", EIGHT, "1,2,3,4,5,6").unwrap_err();
    assert!(matches!(
        err,
        ScpiError::FieldArityMismatch {
            min: 8,
            max: 8,
            actual: 6,
            ..
        }
    ));
    assert!(err.is_decode());
}

#[test]
fn test_short_devm_response_rejected() {
    let err = DevmStruct::decode("1.0,2.0,3.0,1,0,1").unwrap_err();
    assert!(matches!(err, ScpiError::FieldArityMismatch { actual: 6, .. }));
}

#[test]
fn test_unavailable_float_surfaces_as_unset() {
    // Malformed numeric text never raises; the typed layer sees it as unset.
    let err = DevmStruct::decode("1.0,---,3.0,1,0,1,1,0,1,0").unwrap_err();
    assert!(matches!(err, ScpiError::UnsetField { ref field, .. } if field == "Peak"));

    let generic =
        StructRecord::parse("DevmStruct", DevmStruct::FIELDS, "1.0,---,3.0,1,0,1,1,0,1,0")
            .unwrap();
    assert_eq!(generic.float("Peak").unwrap(), None);
}

#[test]
fn test_values_serialize_as_json() {
    let rec = DevmStruct::decode("1.0,2.0,3.0,1,0,1,1,0,1,0")
        .unwrap()
        .to_record()
        .unwrap();
    let json: Vec<_> = rec
        .iter()
        .map(|(name, value)| (name, serde_json::to_value(value).unwrap()))
        .collect();
    assert_eq!(json[0].1, serde_json::json!(1.0));
    assert_eq!(json[3].1, serde_json::json!([true, false, true]));
    assert_eq!(json[5].1, serde_json::json!(false));
}
